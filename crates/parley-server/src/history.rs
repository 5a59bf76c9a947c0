//! History pages and unread accounting.
//!
//! Pagination is keyset-based: the store is asked for `page_size + 1` rows
//! strictly older than the cursor, the extra row only signals that another
//! page exists, and the next token points at the oldest row actually
//! returned. Tokens are opaque to clients; a token that does not decode is a
//! validation error before any query runs.

use parley_shared::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use parley_shared::protocol::{HistoryPageEvent, HistoryRequest};
use parley_shared::{Conversation, Cursor, Message, MessageStatus, UserId};

use crate::error::ServerError;
use crate::state::CoreState;

pub async fn history_page(
    state: &CoreState,
    viewer: UserId,
    req: HistoryRequest,
) -> Result<HistoryPageEvent, ServerError> {
    let page_size = req
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let cursor = match &req.page_token {
        Some(token) => Some(
            Cursor::decode(token)
                .map_err(|_| ServerError::Validation("invalid page token".into()))?,
        ),
        None => None,
    };

    let mut rows = match req.conversation {
        Conversation::Private { peer } => {
            let db = state.db.lock().await;
            db.private_history(viewer, peer, cursor.as_ref(), page_size + 1)?
        }
        Conversation::Group { group } => {
            let db = state.db.lock().await;
            if !db.is_group_member(group, viewer)? {
                return Err(ServerError::PolicyViolation(
                    "viewer is not a member of the group".into(),
                ));
            }
            db.group_history(viewer, group, cursor.as_ref(), page_size + 1)?
        }
    };

    let has_more = rows.len() as u32 > page_size;
    rows.truncate(page_size as usize);

    let next_page_token = if has_more {
        rows.last()
            .map(|last| Cursor::new(last.send_time, last.id).encode())
    } else {
        None
    };

    let messages = rows
        .into_iter()
        .map(|m| present(m, viewer, req.conversation))
        .collect();

    Ok(HistoryPageEvent {
        conversation: req.conversation,
        messages,
        next_page_token,
    })
}

/// Shape one stored row for a particular viewer.
///
/// Recalled content is scrubbed, and in a group the viewer's own messages
/// show as `Read`: the row-level status only tracks the private lifecycle,
/// per-member group state lives in receipts.
fn present(message: Message, viewer: UserId, conversation: Conversation) -> Message {
    let mut message = message.scrub_if_recalled();
    if conversation.is_group()
        && message.sender == viewer
        && !message.status.is_terminal()
    {
        message.status = MessageStatus::Read;
    }
    message
}

/// Unread count, scoped to one conversation or the user's total.
pub async fn unread_count(
    state: &CoreState,
    user: UserId,
    conversation: Option<Conversation>,
) -> Result<u64, ServerError> {
    let db = state.db.lock().await;
    let count = match conversation {
        Some(Conversation::Private { peer }) => {
            db.private_conversation_unread_count(user, peer)?
        }
        Some(Conversation::Group { group }) => db.group_unread_count(group, user)?,
        None => db.total_unread_count(user)?,
    };
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use parley_shared::{GroupId, MessageType};
    use parley_store::Database;

    use crate::config::ServerConfig;

    fn test_state() -> CoreState {
        let db = Database::open_in_memory().unwrap();
        CoreState::new(db, ServerConfig::default())
    }

    async fn seed_private(state: &CoreState, from: UserId, to: UserId, n: i64) -> Vec<Message> {
        let db = state.db.lock().await;
        let base = Utc::now();
        let mut out = Vec::new();
        for i in 0..n {
            let mut msg = Message::new(
                from,
                Conversation::Private { peer: to },
                MessageType::Text,
                format!("m{i}"),
                None,
                None,
            );
            msg.status = MessageStatus::Sent;
            msg.send_time = base + Duration::seconds(i);
            db.insert_message(&msg).unwrap();
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn pages_terminate_and_cover_everything() {
        let state = test_state();
        let a = UserId::new();
        let b = UserId::new();
        let seeded = seed_private(&state, a, b, 5).await;

        let mut collected = Vec::new();
        let mut token = None;
        for _ in 0..10 {
            let page = history_page(
                &state,
                a,
                HistoryRequest {
                    conversation: Conversation::Private { peer: b },
                    page_token: token.clone(),
                    page_size: Some(2),
                },
            )
            .await
            .unwrap();
            collected.extend(page.messages.into_iter().map(|m| m.id));
            token = page.next_page_token;
            if token.is_none() {
                break;
            }
        }

        let mut expected: Vec<_> = seeded.iter().rev().map(|m| m.id).collect();
        assert_eq!(collected, expected);
        expected.dedup();
        assert_eq!(collected.len(), expected.len());
    }

    #[tokio::test]
    async fn garbage_tokens_are_rejected_before_querying() {
        let state = test_state();
        let err = history_page(
            &state,
            UserId::new(),
            HistoryRequest {
                conversation: Conversation::Private { peer: UserId::new() },
                page_token: Some("!!!".into()),
                page_size: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }

    #[tokio::test]
    async fn recalled_rows_come_back_scrubbed() {
        let state = test_state();
        let a = UserId::new();
        let b = UserId::new();
        let seeded = seed_private(&state, a, b, 1).await;
        {
            let db = state.db.lock().await;
            db.transition_status(
                seeded[0].id,
                &[MessageStatus::Sent],
                MessageStatus::Recalled,
                Utc::now(),
            )
            .unwrap();
        }

        let page = history_page(
            &state,
            b,
            HistoryRequest {
                conversation: Conversation::Private { peer: a },
                page_token: None,
                page_size: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].status, MessageStatus::Recalled);
        assert!(page.messages[0].content.is_empty());
    }

    #[tokio::test]
    async fn group_history_shows_own_messages_as_read() {
        let state = test_state();
        let group = GroupId::new();
        let me = UserId::new();
        let other = UserId::new();
        {
            let db = state.db.lock().await;
            db.add_group_member(group, me, Utc::now()).unwrap();
            db.add_group_member(group, other, Utc::now()).unwrap();

            for (sender, text) in [(me, "mine"), (other, "theirs")] {
                let mut msg = Message::new(
                    sender,
                    Conversation::Group { group },
                    MessageType::Text,
                    text.into(),
                    None,
                    None,
                );
                msg.status = MessageStatus::Sent;
                db.insert_message(&msg).unwrap();
            }
        }

        let page = history_page(
            &state,
            me,
            HistoryRequest {
                conversation: Conversation::Group { group },
                page_token: None,
                page_size: None,
            },
        )
        .await
        .unwrap();

        for msg in &page.messages {
            if msg.sender == me {
                assert_eq!(msg.status, MessageStatus::Read);
            } else {
                assert_eq!(msg.status, MessageStatus::Sent);
            }
        }
    }

    #[tokio::test]
    async fn unread_counts_follow_reads() {
        let state = test_state();
        let me = UserId::new();
        let peer = UserId::new();
        seed_private(&state, peer, me, 3).await;

        let conversation = Some(Conversation::Private { peer });
        assert_eq!(unread_count(&state, me, conversation).await.unwrap(), 3);
        assert_eq!(unread_count(&state, me, None).await.unwrap(), 3);

        {
            let db = state.db.lock().await;
            db.mark_private_conversation_read(me, peer, Utc::now()).unwrap();
        }
        assert_eq!(unread_count(&state, me, conversation).await.unwrap(), 0);
    }
}

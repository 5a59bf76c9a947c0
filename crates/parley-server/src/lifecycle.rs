//! Message lifecycle engine.
//!
//! Owns the send path, read acknowledgement, recall and forward. Every
//! status change goes through the store's conditional UPDATE, so two racing
//! transitions resolve to exactly one winner and the loser surfaces as
//! [`ServerError::StaleTransition`] instead of silently overwriting.

use chrono::{Duration, Utc};

use parley_shared::constants::RECALL_WINDOW;
use parley_shared::protocol::{
    ForwardRequest, MessageRecalledEvent, MessagesReadEvent, SendGroupRequest,
    SendPrivateRequest, ServerEvent, StatusUpdatedEvent, TypingEvent,
};
use parley_shared::{Conversation, Message, MessageId, MessageStatus, MessageType, UserId};

use crate::dispatch;
use crate::error::ServerError;
use crate::state::CoreState;

pub async fn send_private(
    state: &CoreState,
    sender: UserId,
    req: SendPrivateRequest,
) -> Result<Message, ServerError> {
    send_message(
        state,
        sender,
        Conversation::Private { peer: req.to },
        req.message_type,
        req.content,
        req.reply_to,
        req.client_ref,
        req.extended_data,
    )
    .await
}

pub async fn send_group(
    state: &CoreState,
    sender: UserId,
    req: SendGroupRequest,
) -> Result<Message, ServerError> {
    send_message(
        state,
        sender,
        Conversation::Group { group: req.group },
        req.message_type,
        req.content,
        req.reply_to,
        req.client_ref,
        req.extended_data,
    )
    .await
}

/// Shared send path: validate, persist, echo status to the sender, fan out,
/// and advance to `Delivered` when at least one recipient connection took
/// the push.
#[allow(clippy::too_many_arguments)]
async fn send_message(
    state: &CoreState,
    sender: UserId,
    conversation: Conversation,
    message_type: MessageType,
    content: String,
    reply_to: Option<MessageId>,
    client_ref: Option<String>,
    extended_data: Option<String>,
) -> Result<Message, ServerError> {
    if content.is_empty() && message_type == MessageType::Text {
        return Err(ServerError::Validation("empty message content".into()));
    }
    if content.len() > state.config.max_content_size {
        return Err(ServerError::Validation(format!(
            "content exceeds {} bytes",
            state.config.max_content_size
        )));
    }

    if let Conversation::Group { group } = conversation {
        let db = state.db.lock().await;
        if !db.is_group_member(group, sender)? {
            return Err(ServerError::PolicyViolation(
                "sender is not a member of the group".into(),
            ));
        }
    }

    let mut message = Message::new(
        sender,
        conversation,
        message_type,
        content,
        reply_to,
        extended_data,
    );
    message.status = MessageStatus::Sent;

    let persisted = {
        let db = state.db.lock().await;
        db.insert_message(&message)
    };
    if let Err(e) = persisted {
        // Persistence refused the message: report it failed, never fan out.
        tracing::warn!(message = %message.id, error = %e, "Message persistence failed");
        status_echo(state, sender, message.id, &client_ref, MessageStatus::Failed);
        return Err(e.into());
    }

    status_echo(state, sender, message.id, &client_ref, MessageStatus::Sent);

    let result = dispatch::dispatch_message(state, &message).await?;
    if result.delivered_any() {
        let now = Utc::now();
        let won = {
            let db = state.db.lock().await;
            db.transition_status(
                message.id,
                &[MessageStatus::Sent],
                MessageStatus::Delivered,
                now,
            )?
        };
        if won {
            message.status = MessageStatus::Delivered;
            message.delivered_time = Some(now);
            status_echo(state, sender, message.id, &client_ref, MessageStatus::Delivered);
        }
    }

    Ok(message)
}

/// Mirror a lifecycle transition back to every connection the sender holds.
fn status_echo(
    state: &CoreState,
    sender: UserId,
    message_id: MessageId,
    client_ref: &Option<String>,
    status: MessageStatus,
) {
    let event = ServerEvent::StatusUpdated(StatusUpdatedEvent {
        message_id,
        client_ref: client_ref.clone(),
        status,
        updated_at: Utc::now(),
    });
    state.registry.send_to_user(sender, &event);
}

/// Acknowledge specific messages as read by `reader`.
///
/// Private messages take the status CAS on the row; group messages gain a
/// receipt and the row itself stays untouched. Returns the ids that actually
/// changed, which is also what the notification carries.
pub async fn mark_read(
    state: &CoreState,
    reader: UserId,
    conversation: Conversation,
    message_ids: Vec<MessageId>,
) -> Result<Vec<MessageId>, ServerError> {
    if message_ids.is_empty() {
        return Err(ServerError::Validation("no message ids given".into()));
    }

    let now = Utc::now();
    let mut changed = Vec::new();

    match conversation {
        Conversation::Private { .. } => {
            let db = state.db.lock().await;
            for id in message_ids {
                if db.mark_private_read(id, reader, now)? {
                    changed.push(id);
                }
            }
        }
        Conversation::Group { group } => {
            let db = state.db.lock().await;
            if !db.is_group_member(group, reader)? {
                return Err(ServerError::PolicyViolation(
                    "reader is not a member of the group".into(),
                ));
            }
            for id in message_ids {
                // Unknown ids simply don't transition, same as the private
                // branch; the batch carries on.
                let message = match db.message_by_id(id) {
                    Ok(m) => m,
                    Err(parley_store::StoreError::NotFound) => continue,
                    Err(e) => return Err(e.into()),
                };
                let belongs = message.conversation == conversation;
                // A reader never acknowledges their own messages, and a
                // recalled message needs no receipt.
                if !belongs
                    || message.sender == reader
                    || message.status == MessageStatus::Recalled
                {
                    continue;
                }
                if db.upsert_read_receipt(id, reader, now)? {
                    changed.push(id);
                }
            }
        }
    }

    if !changed.is_empty() {
        let event = ServerEvent::MessagesRead(MessagesReadEvent {
            reader,
            conversation,
            message_ids: changed.clone(),
            read_at: now,
        });
        dispatch::notify_conversation(state, conversation, reader, &event).await?;
    }

    Ok(changed)
}

/// Acknowledge everything currently unread in one conversation.
pub async fn mark_conversation_read(
    state: &CoreState,
    reader: UserId,
    conversation: Conversation,
) -> Result<Vec<MessageId>, ServerError> {
    let now = Utc::now();

    let changed = match conversation {
        Conversation::Private { peer } => {
            let db = state.db.lock().await;
            db.mark_private_conversation_read(reader, peer, now)?
        }
        Conversation::Group { group } => {
            let db = state.db.lock().await;
            if !db.is_group_member(group, reader)? {
                return Err(ServerError::PolicyViolation(
                    "reader is not a member of the group".into(),
                ));
            }
            db.mark_group_conversation_read(reader, group, now)?
        }
    };

    if !changed.is_empty() {
        let event = ServerEvent::MessagesRead(MessagesReadEvent {
            reader,
            conversation,
            message_ids: changed.clone(),
            read_at: now,
        });
        dispatch::notify_conversation(state, conversation, reader, &event).await?;
    }

    Ok(changed)
}

/// Retract a sent message.
///
/// Sender-only, inside the recall window, and only while the message sits in
/// a recallable state. The row is kept with its content; egress paths scrub
/// it based on the `Recalled` status.
pub async fn recall(
    state: &CoreState,
    user: UserId,
    message_id: MessageId,
) -> Result<Message, ServerError> {
    let now = Utc::now();

    let mut message = {
        let db = state.db.lock().await;
        db.message_by_id(message_id).map_err(not_found_message)?
    };

    if message.sender != user {
        return Err(ServerError::PolicyViolation(
            "only the sender may recall a message".into(),
        ));
    }
    let window = Duration::from_std(RECALL_WINDOW).unwrap_or_else(|_| Duration::seconds(120));
    if now - message.send_time > window {
        return Err(ServerError::PolicyViolation("recall window elapsed".into()));
    }

    let won = {
        let db = state.db.lock().await;
        db.transition_status(
            message_id,
            &[
                MessageStatus::Sent,
                MessageStatus::Delivered,
                MessageStatus::Read,
            ],
            MessageStatus::Recalled,
            now,
        )?
    };
    if !won {
        return Err(ServerError::StaleTransition);
    }
    message.status = MessageStatus::Recalled;

    let event = ServerEvent::MessageRecalled(MessageRecalledEvent {
        message_id,
        conversation: message.conversation,
        recalled_by: user,
        recalled_at: now,
    });
    dispatch::notify_conversation(state, message.conversation, user, &event).await?;
    // The sender's other devices learn about it too.
    state.registry.send_to_user(user, &event);

    Ok(message.scrub_if_recalled())
}

/// Copy an existing message's payload into a new send. The copy starts its
/// own lifecycle and never carries the original's `reply_to`.
pub async fn forward(
    state: &CoreState,
    user: UserId,
    req: ForwardRequest,
) -> Result<Message, ServerError> {
    let original = {
        let db = state.db.lock().await;
        db.message_by_id(req.message_id).map_err(not_found_message)?
    };

    ensure_participant(state, user, &original).await?;
    if original.status == MessageStatus::Recalled {
        return Err(ServerError::PolicyViolation(
            "recalled messages cannot be forwarded".into(),
        ));
    }

    send_message(
        state,
        user,
        req.to,
        original.message_type,
        original.content,
        None,
        req.client_ref,
        original.extended_data,
    )
    .await
}

/// Hide a message from the acting user's own history. The row is untouched;
/// only this user's view changes.
pub async fn hide(
    state: &CoreState,
    user: UserId,
    message_id: MessageId,
) -> Result<(), ServerError> {
    let db = state.db.lock().await;
    let message = db.message_by_id(message_id).map_err(not_found_message)?;
    drop(db);

    ensure_participant(state, user, &message).await?;

    let db = state.db.lock().await;
    db.hide_message(message_id, user, Utc::now())?;
    Ok(())
}

/// Broadcast a typing indicator to the conversation's recipient set.
pub async fn typing(
    state: &CoreState,
    user: UserId,
    conversation: Conversation,
) -> Result<(), ServerError> {
    if let Conversation::Group { group } = conversation {
        let db = state.db.lock().await;
        if !db.is_group_member(group, user)? {
            return Err(ServerError::PolicyViolation(
                "user is not a member of the group".into(),
            ));
        }
    }

    let event = ServerEvent::Typing(TypingEvent {
        user,
        conversation,
        at: Utc::now(),
    });
    dispatch::notify_conversation(state, conversation, user, &event).await?;
    Ok(())
}

/// Whether `user` participates in the message's conversation.
async fn ensure_participant(
    state: &CoreState,
    user: UserId,
    message: &Message,
) -> Result<(), ServerError> {
    let allowed = match message.conversation {
        Conversation::Private { peer } => user == message.sender || user == peer,
        Conversation::Group { group } => {
            let db = state.db.lock().await;
            db.is_group_member(group, user)?
        }
    };
    if allowed {
        Ok(())
    } else {
        Err(ServerError::PolicyViolation(
            "user is not part of this conversation".into(),
        ))
    }
}

pub(crate) fn not_found_message(e: parley_store::StoreError) -> ServerError {
    match e {
        parley_store::StoreError::NotFound => ServerError::NotFound("message"),
        other => ServerError::Store(other),
    }
}

//! Fan-out dispatcher.
//!
//! Resolves a conversation to its current recipient set and pushes events
//! through the registry's per-connection queues. A push never blocks on a
//! slow socket, and an offline recipient is bookkeeping, not an error: the
//! caller gets the reached/unreached split and the offline path picks the
//! rest up on the next sync pull.

use parley_shared::protocol::{MessageReceivedEvent, ServerEvent};
use parley_shared::{Conversation, Message, UserId};

use crate::error::ServerError;
use crate::state::CoreState;

/// Outcome of one fan-out pass.
#[derive(Debug, Default)]
pub struct DispatchResult {
    /// Users with at least one connection that took the push.
    pub reached: Vec<UserId>,
    /// Users with no live connection; served later by the sync pull.
    pub unreached: Vec<UserId>,
}

impl DispatchResult {
    pub fn delivered_any(&self) -> bool {
        !self.reached.is_empty()
    }
}

/// Resolve the users an event for this conversation goes to.
///
/// Private resolves to the single peer; group resolves to the roster minus
/// the acting user. Recall, read and typing notifications use the same
/// resolution as the original send.
pub async fn recipients_for(
    state: &CoreState,
    conversation: Conversation,
    actor: UserId,
) -> Result<Vec<UserId>, ServerError> {
    match conversation {
        Conversation::Private { peer } => Ok(vec![peer]),
        Conversation::Group { group } => {
            let db = state.db.lock().await;
            let members = db.group_members(group)?;
            Ok(members.into_iter().filter(|m| *m != actor).collect())
        }
    }
}

/// Push one event to each user, recording who was reachable.
pub fn push_to_users(
    state: &CoreState,
    recipients: &[UserId],
    event: &ServerEvent,
) -> DispatchResult {
    let mut result = DispatchResult::default();
    for &user in recipients {
        if state.registry.send_to_user(user, event) > 0 {
            result.reached.push(user);
        } else {
            result.unreached.push(user);
        }
    }
    result
}

/// Fan a freshly persisted message out to its conversation.
pub async fn dispatch_message(
    state: &CoreState,
    message: &Message,
) -> Result<DispatchResult, ServerError> {
    let recipients = recipients_for(state, message.conversation, message.sender).await?;
    let event = ServerEvent::MessageReceived(MessageReceivedEvent {
        message: message.clone().scrub_if_recalled(),
    });

    let result = push_to_users(state, &recipients, &event);
    tracing::debug!(
        message = %message.id,
        conversation = %message.conversation,
        reached = result.reached.len(),
        unreached = result.unreached.len(),
        "Message dispatched"
    );
    Ok(result)
}

/// Notify a conversation's recipient set about a lifecycle event (read,
/// recall, typing), resolved the same way as a send by `actor`.
pub async fn notify_conversation(
    state: &CoreState,
    conversation: Conversation,
    actor: UserId,
    event: &ServerEvent,
) -> Result<DispatchResult, ServerError> {
    let recipients = recipients_for(state, conversation, actor).await?;
    Ok(push_to_users(state, &recipients, event))
}

//! Command router: one explicit match from decoded [`ClientCommand`]s to the
//! engine. Every rejected operation is answered with an `Error` event on the
//! submitting connection; nothing is silently dropped.

use chrono::Utc;

use parley_shared::protocol::{
    ClientCommand, ErrorCode, ErrorEvent, PongEvent, ServerEvent, UnreadCountsEvent,
};
use parley_shared::{ConnectionId, UserId};

use crate::error::ServerError;
use crate::state::CoreState;
use crate::{history, lifecycle};

pub async fn handle_command(
    state: &CoreState,
    user: UserId,
    connection: ConnectionId,
    command: ClientCommand,
) {
    if let Err(e) = run(state, user, connection, command).await {
        tracing::debug!(user = %user, error = %e, "Command rejected");
        let event = ServerEvent::Error(ErrorEvent {
            code: e.code(),
            message: e.to_string(),
        });
        state.registry.send_to_connection(connection, &event);
    }
}

async fn run(
    state: &CoreState,
    user: UserId,
    connection: ConnectionId,
    command: ClientCommand,
) -> Result<(), ServerError> {
    match command {
        ClientCommand::Hello(_) => {
            // The session is already bound; a second hello is a protocol slip.
            let event = ServerEvent::Error(ErrorEvent {
                code: ErrorCode::Protocol,
                message: "connection is already identified".into(),
            });
            state.registry.send_to_connection(connection, &event);
            Ok(())
        }

        ClientCommand::Ping => {
            let event = ServerEvent::Pong(PongEvent { server_time: Utc::now() });
            state.registry.send_to_connection(connection, &event);
            Ok(())
        }

        ClientCommand::SendPrivate(req) => {
            lifecycle::send_private(state, user, req).await?;
            Ok(())
        }

        ClientCommand::SendGroup(req) => {
            lifecycle::send_group(state, user, req).await?;
            Ok(())
        }

        ClientCommand::MarkRead(req) => {
            lifecycle::mark_read(state, user, req.conversation, req.message_ids).await?;
            Ok(())
        }

        ClientCommand::MarkConversationRead(req) => {
            lifecycle::mark_conversation_read(state, user, req.conversation).await?;
            Ok(())
        }

        ClientCommand::Recall(req) => {
            lifecycle::recall(state, user, req.message_id).await?;
            Ok(())
        }

        ClientCommand::Forward(req) => {
            lifecycle::forward(state, user, req).await?;
            Ok(())
        }

        ClientCommand::Hide(req) => {
            lifecycle::hide(state, user, req.message_id).await?;
            Ok(())
        }

        ClientCommand::GetHistory(req) => {
            let page = history::history_page(state, user, req).await?;
            state
                .registry
                .send_to_connection(connection, &ServerEvent::HistoryPage(page));
            Ok(())
        }

        ClientCommand::GetUnreadCounts(req) => {
            let count = history::unread_count(state, user, req.conversation).await?;
            let event = ServerEvent::UnreadCounts(UnreadCountsEvent {
                conversation: req.conversation,
                count,
            });
            state.registry.send_to_connection(connection, &event);
            Ok(())
        }

        ClientCommand::Typing(req) => {
            lifecycle::typing(state, user, req.conversation).await?;
            Ok(())
        }
    }
}

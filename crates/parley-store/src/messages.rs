//! Message rows: append, compare-and-swap status transitions, keyset history
//! queries, visibility exclusions, and the offline-sync pull.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use parley_shared::{Conversation, Cursor, GroupId, Message, MessageId, MessageStatus, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

const MESSAGE_COLUMNS: &str = "id, sender_id, recipient_id, group_id, message_type, content, \
     reply_to, status, send_time, delivered_time, read_time, extended_data";

impl Database {
    /// Append a message. Rows are immutable apart from the lifecycle fields;
    /// there is no update path for content or addressing.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let (recipient_id, group_id) = match message.conversation {
            Conversation::Private { peer } => (Some(peer.0.to_string()), None),
            Conversation::Group { group } => (None, Some(group.0.to_string())),
        };

        self.conn().execute(
            "INSERT INTO messages (id, sender_id, recipient_id, group_id, message_type, content, \
             reply_to, status, send_time, delivered_time, read_time, extended_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                message.id.0.to_string(),
                message.sender.0.to_string(),
                recipient_id,
                group_id,
                message.message_type.as_str(),
                message.content,
                message.reply_to.map(|id| id.0.to_string()),
                message.status.as_str(),
                message.send_time.to_rfc3339(),
                message.delivered_time.map(|t| t.to_rfc3339()),
                message.read_time.map(|t| t.to_rfc3339()),
                message.extended_data,
            ],
        )?;
        Ok(())
    }

    pub fn message_by_id(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.0.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Conditionally advance a message's status.
    ///
    /// The update only applies while the current status is one of
    /// `allowed_from`; the return value says whether this caller won the
    /// transition. Two racing callers therefore serialize here, and the
    /// loser observes `false` instead of overwriting.
    pub fn transition_status(
        &self,
        id: MessageId,
        allowed_from: &[MessageStatus],
        to: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        // Timestamp column tracked by the target state, if any.
        let extra_set = match to {
            MessageStatus::Delivered => ", delivered_time = ?2",
            MessageStatus::Read => ", read_time = ?2",
            _ => "",
        };

        // `allowed_from` is a fixed internal set, safe to inline as literals.
        let from_list = allowed_from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "UPDATE messages SET status = ?1{extra_set} \
             WHERE id = ?3 AND status IN ({from_list})"
        );

        let affected = self.conn().execute(
            &sql,
            params![to.as_str(), at.to_rfc3339(), id.0.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Mark one private message read by its recipient.
    ///
    /// Guarded on the recipient so a user can never "read" messages addressed
    /// to somebody else; returns whether the row actually transitioned.
    pub fn mark_private_read(
        &self,
        id: MessageId,
        reader: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET status = 'read', read_time = ?1 \
             WHERE id = ?2 AND recipient_id = ?3 AND group_id IS NULL \
               AND status IN ('sent', 'delivered')",
            params![at.to_rfc3339(), id.0.to_string(), reader.0.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Mark every unread private message from `peer` to `reader` as read and
    /// return the ids that transitioned.
    pub fn mark_private_conversation_read(
        &self,
        reader: UserId,
        peer: UserId,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageId>> {
        let mut stmt = self.conn().prepare(
            "SELECT id FROM messages \
             WHERE recipient_id = ?1 AND sender_id = ?2 AND group_id IS NULL \
               AND status IN ('sent', 'delivered')",
        )?;
        let ids = stmt
            .query_map(
                params![reader.0.to_string(), peer.0.to_string()],
                |row| row.get::<_, String>(0),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.conn().execute(
            "UPDATE messages SET status = 'read', read_time = ?1 \
             WHERE recipient_id = ?2 AND sender_id = ?3 AND group_id IS NULL \
               AND status IN ('sent', 'delivered')",
            params![at.to_rfc3339(), reader.0.to_string(), peer.0.to_string()],
        )?;

        ids.into_iter()
            .map(|s| Ok(MessageId(Uuid::parse_str(&s)?)))
            .collect()
    }

    /// Keyset page over the private conversation between `viewer` and `peer`.
    ///
    /// Returns rows strictly older than the cursor in `(send_time, id)`
    /// descending order; messages the viewer has hidden are excluded. The
    /// caller passes `page_size + 1` as the limit to detect further pages.
    pub fn private_history(
        &self,
        viewer: UserId,
        peer: UserId,
        before: Option<&Cursor>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let (cursor_ts, cursor_id) = cursor_params(before);

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             WHERE m.group_id IS NULL \
               AND ((m.sender_id = ?1 AND m.recipient_id = ?2) \
                 OR (m.sender_id = ?2 AND m.recipient_id = ?1)) \
               AND NOT EXISTS (SELECT 1 FROM hidden_messages h \
                               WHERE h.message_id = m.id AND h.user_id = ?1) \
               AND (?3 IS NULL OR m.send_time < ?3 \
                 OR (m.send_time = ?3 AND m.id < ?4)) \
             ORDER BY m.send_time DESC, m.id DESC \
             LIMIT ?5"
        ))?;

        let rows = stmt.query_map(
            params![
                viewer.0.to_string(),
                peer.0.to_string(),
                cursor_ts,
                cursor_id,
                limit,
            ],
            row_to_message,
        )?;

        collect_messages(rows)
    }

    /// Keyset page over a group conversation, same contract as
    /// [`Database::private_history`].
    pub fn group_history(
        &self,
        viewer: UserId,
        group: GroupId,
        before: Option<&Cursor>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let (cursor_ts, cursor_id) = cursor_params(before);

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             WHERE m.group_id = ?1 \
               AND NOT EXISTS (SELECT 1 FROM hidden_messages h \
                               WHERE h.message_id = m.id AND h.user_id = ?2) \
               AND (?3 IS NULL OR m.send_time < ?3 \
                 OR (m.send_time = ?3 AND m.id < ?4)) \
             ORDER BY m.send_time DESC, m.id DESC \
             LIMIT ?5"
        ))?;

        let rows = stmt.query_map(
            params![
                group.0.to_string(),
                viewer.0.to_string(),
                cursor_ts,
                cursor_id,
                limit,
            ],
            row_to_message,
        )?;

        collect_messages(rows)
    }

    /// Offline-sync pull: everything addressed to `user` newer than the
    /// last-seen watermark, oldest first. Covers private messages to the
    /// user and other members' messages in the user's groups; recalled
    /// messages are included so the client can drop its local copy.
    pub fn messages_after(&self, user: UserId, since: DateTime<Utc>) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             WHERE m.send_time > ?1 \
               AND m.status != 'failed' \
               AND ((m.group_id IS NULL AND m.recipient_id = ?2) \
                 OR (m.group_id IN (SELECT group_id FROM group_members \
                                    WHERE user_id = ?2) \
                     AND m.sender_id != ?2)) \
               AND NOT EXISTS (SELECT 1 FROM hidden_messages h \
                               WHERE h.message_id = m.id AND h.user_id = ?2) \
             ORDER BY m.send_time ASC, m.id ASC"
        ))?;

        let rows = stmt.query_map(
            params![since.to_rfc3339(), user.0.to_string()],
            row_to_message,
        )?;

        collect_messages(rows)
    }

    /// Record a per-user visibility exclusion. Idempotent; the message row
    /// itself is untouched.
    pub fn hide_message(&self, id: MessageId, user: UserId, at: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO hidden_messages (message_id, user_id, hidden_at) \
             VALUES (?1, ?2, ?3)",
            params![id.0.to_string(), user.0.to_string(), at.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }
}

fn cursor_params(before: Option<&Cursor>) -> (Option<String>, Option<String>) {
    match before {
        Some(c) => (
            Some(c.send_time.to_rfc3339()),
            Some(c.id.0.to_string()),
        ),
        None => (None, None),
    }
}

fn collect_messages(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<Message>>,
) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id = parse_uuid(row, 0)?;
    let sender = parse_uuid(row, 1)?;
    let recipient: Option<String> = row.get(2)?;
    let group: Option<String> = row.get(3)?;
    let type_str: String = row.get(4)?;
    let content: String = row.get(5)?;
    let reply_to: Option<String> = row.get(6)?;
    let status_str: String = row.get(7)?;
    let send_time = parse_timestamp(row, 8)?;

    let delivered_time: Option<String> = row.get(9)?;
    let read_time: Option<String> = row.get(10)?;
    let extended_data: Option<String> = row.get(11)?;

    let conversation = match (recipient, group) {
        (Some(peer), None) => Conversation::Private {
            peer: UserId(parse_uuid_str(&peer, 2)?),
        },
        (None, Some(group)) => Conversation::Group {
            group: GroupId(parse_uuid_str(&group, 3)?),
        },
        // Unreachable given the schema CHECK constraint.
        _ => {
            return Err(rusqlite::Error::IntegralValueOutOfRange(2, 0));
        }
    };

    let message_type = type_str.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })?;
    let status = status_str.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })?;

    Ok(Message {
        id: MessageId(id),
        sender: UserId(sender),
        conversation,
        message_type,
        content,
        reply_to: reply_to
            .map(|s| parse_uuid_str(&s, 6).map(MessageId))
            .transpose()?,
        status,
        send_time,
        delivered_time: delivered_time
            .map(|s| parse_timestamp_str(&s, 9))
            .transpose()?,
        read_time: read_time.map(|s| parse_timestamp_str(&s, 10)).transpose()?,
        extended_data,
    })
}

fn parse_uuid(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    parse_uuid_str(&s, idx)
}

fn parse_uuid_str(s: &str, idx: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_timestamp_str(&s, idx)
}

fn parse_timestamp_str(s: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parley_shared::MessageType;

    fn text_message(sender: UserId, conversation: Conversation, content: &str) -> Message {
        let mut msg = Message::new(
            sender,
            conversation,
            MessageType::Text,
            content.to_string(),
            None,
            None,
        );
        msg.status = MessageStatus::Sent;
        msg
    }

    #[test]
    fn insert_and_fetch_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let sender = UserId::new();
        let peer = UserId::new();
        let msg = text_message(sender, Conversation::Private { peer }, "hi");

        db.insert_message(&msg).unwrap();
        let back = db.message_by_id(msg.id).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn missing_message_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.message_by_id(MessageId::new()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn transition_is_conditional() {
        let db = Database::open_in_memory().unwrap();
        let msg = text_message(UserId::new(), Conversation::Private { peer: UserId::new() }, "x");
        db.insert_message(&msg).unwrap();

        let won = db
            .transition_status(msg.id, &[MessageStatus::Sent], MessageStatus::Delivered, Utc::now())
            .unwrap();
        assert!(won);

        // A second caller expecting `Sent` has lost the race.
        let lost = db
            .transition_status(msg.id, &[MessageStatus::Sent], MessageStatus::Delivered, Utc::now())
            .unwrap();
        assert!(!lost);

        let back = db.message_by_id(msg.id).unwrap();
        assert_eq!(back.status, MessageStatus::Delivered);
        assert!(back.delivered_time.is_some());
    }

    #[test]
    fn private_read_is_recipient_guarded() {
        let db = Database::open_in_memory().unwrap();
        let sender = UserId::new();
        let recipient = UserId::new();
        let msg = text_message(sender, Conversation::Private { peer: recipient }, "x");
        db.insert_message(&msg).unwrap();

        // The sender cannot read their own outgoing message.
        assert!(!db.mark_private_read(msg.id, sender, Utc::now()).unwrap());
        assert!(db.mark_private_read(msg.id, recipient, Utc::now()).unwrap());

        let back = db.message_by_id(msg.id).unwrap();
        assert_eq!(back.status, MessageStatus::Read);
        assert!(back.read_time.is_some());
    }

    #[test]
    fn history_pages_are_strictly_descending_and_exhaustive() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let b = UserId::new();
        let base = Utc::now();

        let mut ids = Vec::new();
        for i in 0..7 {
            let mut msg = text_message(a, Conversation::Private { peer: b }, &format!("m{i}"));
            msg.send_time = base + Duration::seconds(i);
            db.insert_message(&msg).unwrap();
            ids.push(msg.id);
        }

        // Walk pages of 3 (limit 4 = page_size + 1).
        let mut seen = Vec::new();
        let mut cursor: Option<Cursor> = None;
        loop {
            let mut page = db.private_history(a, b, cursor.as_ref(), 4).unwrap();
            let more = page.len() > 3;
            page.truncate(3);
            if page.is_empty() {
                break;
            }
            let last = page.last().unwrap();
            cursor = Some(Cursor::new(last.send_time, last.id));
            seen.extend(page.into_iter().map(|m| m.id));
            if !more {
                break;
            }
        }

        // Every message exactly once, newest first.
        ids.reverse();
        assert_eq!(seen, ids);
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let b = UserId::new();
        let at = Utc::now();

        for i in 0..4 {
            let mut msg = text_message(a, Conversation::Private { peer: b }, &format!("m{i}"));
            msg.send_time = at;
            db.insert_message(&msg).unwrap();
        }

        let all = db.private_history(a, b, None, 10).unwrap();
        assert_eq!(all.len(), 4);
        for pair in all.windows(2) {
            assert!(pair[0].id > pair[1].id, "ids must strictly descend on ties");
        }

        // Paging across the tie must not duplicate or skip rows.
        let first = db.private_history(a, b, None, 3).unwrap();
        let cursor = Cursor::new(first[1].send_time, first[1].id);
        let rest = db.private_history(a, b, Some(&cursor), 10).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].id, first[2].id);
    }

    #[test]
    fn hidden_messages_are_excluded_for_the_hiding_user_only() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::new();
        let b = UserId::new();
        let msg = text_message(a, Conversation::Private { peer: b }, "secret");
        db.insert_message(&msg).unwrap();

        assert!(db.hide_message(msg.id, b, Utc::now()).unwrap());
        // Hiding twice is a no-op.
        assert!(!db.hide_message(msg.id, b, Utc::now()).unwrap());

        assert!(db.private_history(b, a, None, 10).unwrap().is_empty());
        assert_eq!(db.private_history(a, b, None, 10).unwrap().len(), 1);
    }

    #[test]
    fn offline_pull_respects_the_watermark() {
        let db = Database::open_in_memory().unwrap();
        let sender = UserId::new();
        let user = UserId::new();
        let group = GroupId::new();
        db.add_group_member(group, user, Utc::now()).unwrap();

        let base = Utc::now();
        let mut old = text_message(sender, Conversation::Private { peer: user }, "old");
        old.send_time = base - Duration::seconds(60);
        db.insert_message(&old).unwrap();

        let mut fresh = text_message(sender, Conversation::Group { group }, "fresh");
        fresh.send_time = base + Duration::seconds(5);
        db.insert_message(&fresh).unwrap();

        // Own messages in the group are not pulled back.
        let mut own = text_message(user, Conversation::Group { group }, "mine");
        own.send_time = base + Duration::seconds(6);
        db.insert_message(&own).unwrap();

        let pulled = db.messages_after(user, base).unwrap();
        assert_eq!(pulled.len(), 1);
        assert_eq!(pulled[0].id, fresh.id);
    }

    #[test]
    fn conversation_bulk_read_returns_transitioned_ids() {
        let db = Database::open_in_memory().unwrap();
        let peer = UserId::new();
        let me = UserId::new();

        let m1 = text_message(peer, Conversation::Private { peer: me }, "a");
        let m2 = text_message(peer, Conversation::Private { peer: me }, "b");
        // A message I sent must not be touched.
        let mine = text_message(me, Conversation::Private { peer }, "c");
        db.insert_message(&m1).unwrap();
        db.insert_message(&m2).unwrap();
        db.insert_message(&mine).unwrap();

        let mut read = db.mark_private_conversation_read(me, peer, Utc::now()).unwrap();
        read.sort();
        let mut expected = vec![m1.id, m2.id];
        expected.sort();
        assert_eq!(read, expected);

        // Second pass: nothing left to read.
        assert!(db.mark_private_conversation_read(me, peer, Utc::now()).unwrap().is_empty());
        assert_eq!(db.message_by_id(mine.id).unwrap().status, MessageStatus::Sent);
    }
}

//! Group read receipts.
//!
//! Private read state lives on the message row itself; group read state is a
//! row per `(message, reader)` here. Inserts go through `INSERT OR IGNORE` so
//! a duplicate acknowledgement from a reconnecting client is silently absorbed.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use parley_shared::{GroupId, MessageId, ReadReceipt, UserId};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Record that `reader` has read a group message. Returns whether a new
    /// receipt was created; `false` means it already existed.
    pub fn upsert_read_receipt(
        &self,
        message_id: MessageId,
        reader: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO read_receipts (message_id, reader_id, read_at) \
             VALUES (?1, ?2, ?3)",
            params![
                message_id.0.to_string(),
                reader.0.to_string(),
                at.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// All receipts recorded for one message, reader order unspecified.
    pub fn receipts_for_message(&self, message_id: MessageId) -> Result<Vec<ReadReceipt>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, reader_id, read_at FROM read_receipts \
             WHERE message_id = ?1",
        )?;

        let rows = stmt.query_map(params![message_id.0.to_string()], |row| {
            let message_id: String = row.get(0)?;
            let reader: String = row.get(1)?;
            let read_at: String = row.get(2)?;
            Ok((message_id, reader, read_at))
        })?;

        let mut receipts = Vec::new();
        for row in rows {
            let (message_id, reader, read_at) = row?;
            receipts.push(ReadReceipt {
                message_id: MessageId(Uuid::parse_str(&message_id)?),
                reader: UserId(Uuid::parse_str(&reader)?),
                read_at: DateTime::parse_from_rfc3339(&read_at)?.with_timezone(&Utc),
            });
        }
        Ok(receipts)
    }

    /// Ids of group messages `user` has not yet acknowledged.
    ///
    /// Unread means: sent by somebody else, not recalled, no receipt from
    /// this user, and not hidden by this user.
    pub fn unread_group_message_ids(
        &self,
        group: GroupId,
        user: UserId,
    ) -> Result<Vec<MessageId>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.id FROM messages m \
             WHERE m.group_id = ?1 AND m.sender_id != ?2 \
               AND m.status NOT IN ('recalled', 'failed') \
               AND NOT EXISTS (SELECT 1 FROM read_receipts r \
                               WHERE r.message_id = m.id AND r.reader_id = ?2) \
               AND NOT EXISTS (SELECT 1 FROM hidden_messages h \
                               WHERE h.message_id = m.id AND h.user_id = ?2) \
             ORDER BY m.send_time ASC, m.id ASC",
        )?;

        let ids = stmt
            .query_map(
                params![group.0.to_string(), user.0.to_string()],
                |row| row.get::<_, String>(0),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        ids.into_iter()
            .map(|s| Ok(MessageId(Uuid::parse_str(&s)?)))
            .collect()
    }

    /// Acknowledge everything currently unread in a group for one user and
    /// return the ids that gained a receipt.
    pub fn mark_group_conversation_read(
        &self,
        user: UserId,
        group: GroupId,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageId>> {
        let unread = self.unread_group_message_ids(group, user)?;
        for id in &unread {
            self.upsert_read_receipt(*id, user, at)?;
        }
        Ok(unread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::{Conversation, Message, MessageStatus, MessageType};

    fn group_message(sender: UserId, group: GroupId, content: &str) -> Message {
        let mut msg = Message::new(
            sender,
            Conversation::Group { group },
            MessageType::Text,
            content.to_string(),
            None,
            None,
        );
        msg.status = MessageStatus::Sent;
        msg
    }

    #[test]
    fn duplicate_receipts_are_absorbed() {
        let db = Database::open_in_memory().unwrap();
        let group = GroupId::new();
        let reader = UserId::new();
        let msg = group_message(UserId::new(), group, "hi");
        db.insert_message(&msg).unwrap();

        assert!(db.upsert_read_receipt(msg.id, reader, Utc::now()).unwrap());
        assert!(!db.upsert_read_receipt(msg.id, reader, Utc::now()).unwrap());

        let receipts = db.receipts_for_message(msg.id).unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].reader, reader);
    }

    #[test]
    fn unread_excludes_own_recalled_and_acknowledged() {
        let db = Database::open_in_memory().unwrap();
        let group = GroupId::new();
        let me = UserId::new();
        let other = UserId::new();

        let mine = group_message(me, group, "mine");
        let theirs = group_message(other, group, "theirs");
        let mut recalled = group_message(other, group, "gone");
        recalled.status = MessageStatus::Recalled;
        let acked = group_message(other, group, "seen");

        for m in [&mine, &theirs, &recalled, &acked] {
            db.insert_message(m).unwrap();
        }
        db.upsert_read_receipt(acked.id, me, Utc::now()).unwrap();

        let unread = db.unread_group_message_ids(group, me).unwrap();
        assert_eq!(unread, vec![theirs.id]);
    }

    #[test]
    fn bulk_group_read_drains_the_unread_set() {
        let db = Database::open_in_memory().unwrap();
        let group = GroupId::new();
        let me = UserId::new();
        let other = UserId::new();

        let m1 = group_message(other, group, "a");
        let m2 = group_message(other, group, "b");
        db.insert_message(&m1).unwrap();
        db.insert_message(&m2).unwrap();

        let read = db.mark_group_conversation_read(me, group, Utc::now()).unwrap();
        assert_eq!(read.len(), 2);

        assert!(db.unread_group_message_ids(group, me).unwrap().is_empty());
        assert!(db.mark_group_conversation_read(me, group, Utc::now()).unwrap().is_empty());
    }
}

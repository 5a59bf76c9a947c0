//! Unread counters.
//!
//! Counts are always derived from the authoritative rows at query time;
//! nothing here maintains a denormalized counter. Private unread is a status
//! predicate on the message row, group unread is the absence of a receipt.

use rusqlite::params;

use parley_shared::{GroupId, UserId};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Unread private messages from `peer` to `user`.
    pub fn private_conversation_unread_count(&self, user: UserId, peer: UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages m \
             WHERE m.recipient_id = ?1 AND m.sender_id = ?2 AND m.group_id IS NULL \
               AND m.status IN ('sent', 'delivered') \
               AND NOT EXISTS (SELECT 1 FROM hidden_messages h \
                               WHERE h.message_id = m.id AND h.user_id = ?1)",
            params![user.0.to_string(), peer.0.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Unread private messages addressed to `user`, across all peers.
    pub fn private_unread_count(&self, user: UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages m \
             WHERE m.recipient_id = ?1 AND m.group_id IS NULL \
               AND m.status IN ('sent', 'delivered') \
               AND NOT EXISTS (SELECT 1 FROM hidden_messages h \
                               WHERE h.message_id = m.id AND h.user_id = ?1)",
            params![user.0.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Unread group messages for `user` in one group.
    pub fn group_unread_count(&self, group: GroupId, user: UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages m \
             WHERE m.group_id = ?1 AND m.sender_id != ?2 \
               AND m.status NOT IN ('recalled', 'failed') \
               AND NOT EXISTS (SELECT 1 FROM read_receipts r \
                               WHERE r.message_id = m.id AND r.reader_id = ?2) \
               AND NOT EXISTS (SELECT 1 FROM hidden_messages h \
                               WHERE h.message_id = m.id AND h.user_id = ?2)",
            params![group.0.to_string(), user.0.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Total unread for `user`: private across all peers plus every group the
    /// user belongs to.
    pub fn total_unread_count(&self, user: UserId) -> Result<u64> {
        let mut total = self.private_unread_count(user)?;
        for group in self.groups_of(user)? {
            total += self.group_unread_count(group, user)?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_shared::{Conversation, Message, MessageStatus, MessageType};

    fn sent_message(sender: UserId, conversation: Conversation) -> Message {
        let mut msg = Message::new(
            sender,
            conversation,
            MessageType::Text,
            "x".to_string(),
            None,
            None,
        );
        msg.status = MessageStatus::Sent;
        msg
    }

    #[test]
    fn private_counts_track_the_status_predicate() {
        let db = Database::open_in_memory().unwrap();
        let me = UserId::new();
        let peer = UserId::new();

        let unread = sent_message(peer, Conversation::Private { peer: me });
        let mut delivered = sent_message(peer, Conversation::Private { peer: me });
        delivered.status = MessageStatus::Delivered;
        let mut read = sent_message(peer, Conversation::Private { peer: me });
        read.status = MessageStatus::Read;
        let mut recalled = sent_message(peer, Conversation::Private { peer: me });
        recalled.status = MessageStatus::Recalled;
        // Outgoing traffic never counts against me.
        let outgoing = sent_message(me, Conversation::Private { peer });

        for m in [&unread, &delivered, &read, &recalled, &outgoing] {
            db.insert_message(m).unwrap();
        }

        assert_eq!(db.private_conversation_unread_count(me, peer).unwrap(), 2);
        assert_eq!(db.private_unread_count(me).unwrap(), 2);

        db.mark_private_conversation_read(me, peer, Utc::now()).unwrap();
        assert_eq!(db.private_conversation_unread_count(me, peer).unwrap(), 0);
    }

    #[test]
    fn total_spans_private_and_group() {
        let db = Database::open_in_memory().unwrap();
        let me = UserId::new();
        let peer = UserId::new();
        let group = GroupId::new();
        db.add_group_member(group, me, Utc::now()).unwrap();
        db.add_group_member(group, peer, Utc::now()).unwrap();

        db.insert_message(&sent_message(peer, Conversation::Private { peer: me }))
            .unwrap();
        db.insert_message(&sent_message(peer, Conversation::Group { group }))
            .unwrap();
        db.insert_message(&sent_message(me, Conversation::Group { group }))
            .unwrap();

        assert_eq!(db.group_unread_count(group, me).unwrap(), 1);
        assert_eq!(db.total_unread_count(me).unwrap(), 2);
        // The peer sees only my group message.
        assert_eq!(db.total_unread_count(peer).unwrap(), 1);
    }

    #[test]
    fn hidden_messages_do_not_count() {
        let db = Database::open_in_memory().unwrap();
        let me = UserId::new();
        let peer = UserId::new();

        let msg = sent_message(peer, Conversation::Private { peer: me });
        db.insert_message(&msg).unwrap();
        db.hide_message(msg.id, me, Utc::now()).unwrap();

        assert_eq!(db.private_unread_count(me).unwrap(), 0);
    }
}

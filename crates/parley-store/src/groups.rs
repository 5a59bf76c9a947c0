//! Group rosters.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use parley_shared::{GroupId, UserId};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Add a member to a group. Returns whether the membership was new.
    pub fn add_group_member(
        &self,
        group: GroupId,
        user: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at) \
             VALUES (?1, ?2, ?3)",
            params![group.0.to_string(), user.0.to_string(), at.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Remove a member. Returns whether a membership existed.
    pub fn remove_group_member(&self, group: GroupId, user: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group.0.to_string(), user.0.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Current roster of a group, join order.
    pub fn group_members(&self, group: GroupId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM group_members WHERE group_id = ?1 \
             ORDER BY joined_at ASC, user_id ASC",
        )?;
        let ids = stmt
            .query_map(params![group.0.to_string()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        ids.into_iter()
            .map(|s| Ok(UserId(Uuid::parse_str(&s)?)))
            .collect()
    }

    pub fn is_group_member(&self, group: GroupId, user: UserId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group.0.to_string(), user.0.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Groups the user belongs to.
    pub fn groups_of(&self, user: UserId) -> Result<Vec<GroupId>> {
        let mut stmt = self.conn().prepare(
            "SELECT group_id FROM group_members WHERE user_id = ?1",
        )?;
        let ids = stmt
            .query_map(params![user.0.to_string()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        ids.into_iter()
            .map(|s| Ok(GroupId(Uuid::parse_str(&s)?)))
            .collect()
    }
}

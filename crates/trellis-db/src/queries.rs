use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use trellis_types::models::PresenceRow;

use crate::Database;
use crate::models::{ChannelMessageRow, ChannelRow, DmRow, HealthCounts, UserRow};

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Presence --

    /// Idempotent registration: an identical (username, ip, port) row is
    /// replaced rather than duplicated. A clash on (ip, port) held by a
    /// different user bubbles up as a constraint error.
    pub fn upsert_peer(&self, username: &str, ip: &str, port: u16) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM peers WHERE username = ?1 AND ip = ?2 AND port = ?3",
                params![username, ip, port],
            )?;
            tx.execute(
                "INSERT INTO peers (ip, port, username) VALUES (?1, ?2, ?3)",
                params![ip, port, username],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Every registered row, the caller's own included. Self-exclusion is
    /// the caller's job.
    pub fn list_peers(&self) -> Result<Vec<PresenceRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT ip, port, username FROM peers")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(PresenceRow {
                        ip: row.get(0)?,
                        port: row.get(1)?,
                        username: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// With an endpoint: remove the one exact row. Without: remove every
    /// row for the user (logout-everywhere).
    pub fn remove_peer(&self, username: &str, endpoint: Option<(&str, u16)>) -> Result<()> {
        self.with_conn(|conn| {
            match endpoint {
                Some((ip, port)) => {
                    conn.execute(
                        "DELETE FROM peers WHERE username = ?1 AND ip = ?2 AND port = ?3",
                        params![username, ip, port],
                    )?;
                }
                None => {
                    conn.execute("DELETE FROM peers WHERE username = ?1", [username])?;
                }
            }
            Ok(())
        })
    }

    // -- Channels --

    /// Insert the channel and, when private, seed membership from
    /// `allowed_usernames`. Unknown usernames are skipped silently.
    pub fn create_channel(
        &self,
        id: &str,
        name: &str,
        topic: &str,
        owner_id: &str,
        is_private: bool,
        allowed_usernames: &[String],
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO channels (id, name, topic, owner_id, is_private, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, name, topic, owner_id, is_private as i64, created_at],
            )?;
            if is_private {
                for username in allowed_usernames {
                    let user_id: Option<String> = tx
                        .query_row("SELECT id FROM users WHERE username = ?1", [username], |row| {
                            row.get(0)
                        })
                        .optional()?;
                    if let Some(user_id) = user_id {
                        tx.execute(
                            "INSERT OR IGNORE INTO channel_members (id, channel_id, user_id)
                             VALUES (?1, ?2, ?3)",
                            params![uuid::Uuid::new_v4().to_string(), id, user_id],
                        )?;
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_channel_by_name(&self, name: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT c.id, c.name, c.topic, c.owner_id, u.username, c.is_private
                     FROM channels c JOIN users u ON c.owner_id = u.id
                     WHERE c.name = ?1",
                    [name],
                    map_channel,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Newest channel first.
    pub fn list_channels(&self) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.topic, c.owner_id, u.username, c.is_private
                 FROM channels c JOIN users u ON c.owner_id = u.id
                 ORDER BY c.created_at DESC",
            )?;
            let rows = stmt
                .query_map([], map_channel)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn channel_member_usernames(&self, channel_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.username FROM channel_members cm
                 JOIN users u ON cm.user_id = u.id
                 WHERE cm.channel_id = ?1",
            )?;
            let rows = stmt
                .query_map([channel_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn channel_member_ids(&self, channel_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT user_id FROM channel_members WHERE channel_id = ?1")?;
            let rows = stmt
                .query_map([channel_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_channel_member(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let hit: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
                    [channel_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(hit.is_some())
        })
    }

    pub fn add_channel_member(&self, id: &str, channel_id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channel_members (id, channel_id, user_id) VALUES (?1, ?2, ?3)",
                [id, channel_id, user_id],
            )?;
            Ok(())
        })
    }

    pub fn remove_channel_member(&self, channel_id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
                [channel_id, user_id],
            )?;
            Ok(())
        })
    }

    // -- Channel messages --

    pub fn insert_channel_message(
        &self,
        id: &str,
        channel_id: &str,
        user_id: &str,
        content: &str,
        timestamp: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, content, timestamp, user_id, channel_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, content, timestamp, user_id, channel_id],
            )?;
            Ok(())
        })
    }

    /// The most recent `limit` entries, returned ascending by timestamp.
    pub fn channel_history(&self, channel_id: &str, limit: u32) -> Result<Vec<ChannelMessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.content, u.username, m.timestamp
                 FROM messages m JOIN users u ON m.user_id = u.id
                 WHERE m.channel_id = ?1
                 ORDER BY m.timestamp DESC
                 LIMIT ?2",
            )?;
            let mut rows = stmt
                .query_map(params![channel_id, limit], |row| {
                    Ok(ChannelMessageRow {
                        content: row.get(0)?,
                        username: row.get(1)?,
                        timestamp: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    // -- Direct messages --

    pub fn insert_direct_message(
        &self,
        id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        timestamp: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO direct_messages (id, content, timestamp, sender_id, receiver_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, content, timestamp, sender_id, receiver_id],
            )?;
            Ok(())
        })
    }

    /// The most recent `limit` messages between the two users, ascending,
    /// identical regardless of which participant asks.
    pub fn dm_history(&self, user_id: &str, other_id: &str, limit: u32) -> Result<Vec<DmRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT dm.content, sender.username, receiver.username, dm.timestamp
                 FROM direct_messages dm
                 JOIN users sender ON dm.sender_id = sender.id
                 JOIN users receiver ON dm.receiver_id = receiver.id
                 WHERE (dm.sender_id = ?1 AND dm.receiver_id = ?2)
                    OR (dm.sender_id = ?2 AND dm.receiver_id = ?1)
                 ORDER BY dm.timestamp DESC
                 LIMIT ?3",
            )?;
            let mut rows = stmt
                .query_map(params![user_id, other_id, limit], |row| {
                    Ok(DmRow {
                        content: row.get(0)?,
                        sender: row.get(1)?,
                        receiver: row.get(2)?,
                        timestamp: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    // -- Health --

    pub fn health_counts(&self) -> Result<HealthCounts> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64> {
                let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
                Ok(n as u64)
            };
            Ok(HealthCounts {
                peers_online: count("SELECT COUNT(*) FROM peers")?,
                total_users: count("SELECT COUNT(*) FROM users")?,
                total_channels: count("SELECT COUNT(*) FROM channels")?,
                total_dms: count("SELECT COUNT(*) FROM direct_messages")?,
            })
        })
    }
}

fn map_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelRow> {
    Ok(ChannelRow {
        id: row.get(0)?,
        name: row.get(1)?,
        topic: row.get(2)?,
        owner_id: row.get(3)?,
        owner_username: row.get(4)?,
        is_private: row.get::<_, i64>(5)? != 0,
    })
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is one of two fixed identifiers, never user input.
    let sql = format!("SELECT id, username, password FROM users WHERE {} = ?1", column);
    let row = conn
        .query_row(&sql, [value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password_hash: row.get(2)?,
            })
        })
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now_utc;
    use uuid::Uuid;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, username: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, username, "$argon2id$fake-hash").unwrap();
        id
    }

    #[test]
    fn presence_registration_is_idempotent() {
        let db = db();
        add_user(&db, "bob");
        db.upsert_peer("bob", "10.0.0.5", 9002).unwrap();
        db.upsert_peer("bob", "10.0.0.5", 9002).unwrap();

        let rows = db.list_peers().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].username, "bob");
    }

    #[test]
    fn one_user_may_hold_several_sessions() {
        let db = db();
        add_user(&db, "bob");
        db.upsert_peer("bob", "10.0.0.5", 9002).unwrap();
        db.upsert_peer("bob", "10.0.0.5", 9003).unwrap();
        assert_eq!(db.list_peers().unwrap().len(), 2);
    }

    #[test]
    fn endpoint_clash_between_users_is_rejected() {
        let db = db();
        add_user(&db, "bob");
        add_user(&db, "eve");
        db.upsert_peer("bob", "10.0.0.5", 9002).unwrap();
        assert!(db.upsert_peer("eve", "10.0.0.5", 9002).is_err());
    }

    #[test]
    fn logout_without_endpoint_removes_all_rows() {
        let db = db();
        add_user(&db, "bob");
        db.upsert_peer("bob", "10.0.0.5", 9002).unwrap();
        db.upsert_peer("bob", "10.0.0.5", 9003).unwrap();

        db.remove_peer("bob", None).unwrap();
        assert!(db.list_peers().unwrap().is_empty());
    }

    #[test]
    fn logout_with_endpoint_removes_only_the_match() {
        let db = db();
        add_user(&db, "bob");
        db.upsert_peer("bob", "10.0.0.5", 9002).unwrap();
        db.upsert_peer("bob", "10.0.0.5", 9003).unwrap();

        db.remove_peer("bob", Some(("10.0.0.5", 9002))).unwrap();
        let rows = db.list_peers().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].port, 9003);
    }

    #[test]
    fn private_channel_seeds_members_and_skips_unknowns() {
        let db = db();
        let admin = add_user(&db, "admin");
        let user2 = add_user(&db, "user2");
        db.create_channel(
            &Uuid::new_v4().to_string(),
            "ops",
            "operations",
            &admin,
            true,
            &["user2".to_string(), "ghost".to_string()],
            &now_utc(),
        )
        .unwrap();

        let ch = db.get_channel_by_name("ops").unwrap().unwrap();
        assert!(ch.is_private);
        assert_eq!(db.channel_member_ids(&ch.id).unwrap(), vec![user2.clone()]);
        assert!(db.is_channel_member(&ch.id, &user2).unwrap());
        assert!(!db.is_channel_member(&ch.id, &admin).unwrap());
    }

    #[test]
    fn duplicate_membership_is_a_constraint_error() {
        let db = db();
        let admin = add_user(&db, "admin");
        let user2 = add_user(&db, "user2");
        let ch_id = Uuid::new_v4().to_string();
        db.create_channel(&ch_id, "ops", "", &admin, true, &[], &now_utc()).unwrap();

        db.add_channel_member(&Uuid::new_v4().to_string(), &ch_id, &user2).unwrap();
        assert!(
            db.add_channel_member(&Uuid::new_v4().to_string(), &ch_id, &user2)
                .is_err()
        );
    }

    #[test]
    fn channel_history_is_ascending_and_truncated_to_newest() {
        let db = db();
        let admin = add_user(&db, "admin");
        let ch_id = Uuid::new_v4().to_string();
        db.create_channel(&ch_id, "general", "", &admin, false, &[], &now_utc()).unwrap();

        for i in 0..5 {
            db.insert_channel_message(
                &Uuid::new_v4().to_string(),
                &ch_id,
                &admin,
                &format!("msg {}", i),
                &format!("2026-08-05T00:00:0{}.000000Z", i),
            )
            .unwrap();
        }

        let all = db.channel_history(&ch_id, 100).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].content, "msg 0");
        assert_eq!(all[4].content, "msg 4");

        // Truncation keeps the most recent entries, still ascending.
        let tail = db.channel_history(&ch_id, 3).unwrap();
        assert_eq!(
            tail.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["msg 2", "msg 3", "msg 4"]
        );
    }

    #[test]
    fn dm_history_reads_the_same_from_both_sides() {
        let db = db();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");

        db.insert_direct_message(
            &Uuid::new_v4().to_string(),
            &alice,
            &bob,
            "hi bob",
            "2026-08-05T00:00:01.000000Z",
        )
        .unwrap();
        db.insert_direct_message(
            &Uuid::new_v4().to_string(),
            &bob,
            &alice,
            "hi alice",
            "2026-08-05T00:00:02.000000Z",
        )
        .unwrap();

        let from_alice = db.dm_history(&alice, &bob, 100).unwrap();
        let from_bob = db.dm_history(&bob, &alice, 100).unwrap();
        assert_eq!(from_alice.len(), 2);
        assert_eq!(from_alice[0].content, "hi bob");
        assert_eq!(from_alice[0].sender, "alice");
        assert_eq!(from_alice[0].receiver, "bob");
        assert_eq!(from_bob[1].sender, "bob");
        assert_eq!(
            from_alice.iter().map(|m| &m.content).collect::<Vec<_>>(),
            from_bob.iter().map(|m| &m.content).collect::<Vec<_>>()
        );
    }

    #[test]
    fn health_counts_track_rows() {
        let db = db();
        let a = add_user(&db, "a");
        let b = add_user(&db, "b");
        db.upsert_peer("a", "10.0.0.1", 9002).unwrap();
        db.insert_direct_message(
            &Uuid::new_v4().to_string(),
            &a,
            &b,
            "x",
            &now_utc(),
        )
        .unwrap();

        let counts = db.health_counts().unwrap();
        assert_eq!(counts.total_users, 2);
        assert_eq!(counts.peers_online, 1);
        assert_eq!(counts.total_channels, 0);
        assert_eq!(counts.total_dms, 1);
    }
}

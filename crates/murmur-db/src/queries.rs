use crate::Database;
use crate::models::{MessageRow, UserRow};
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str = "id, username, email, password, is_verified, verify_code, \
     verify_code_expiry, is_accepting_messages, created_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
        verify_code: &str,
        code_expiry: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password, verify_code, verify_code_expiry)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, username, email, password_hash, verify_code, code_expiry),
            )?;
            Ok(())
        })
    }

    /// Re-arm an unverified registration: new password hash, new code, new
    /// expiry. Verified rows are never touched.
    pub fn refresh_unverified(
        &self,
        email: &str,
        password_hash: &str,
        verify_code: &str,
        code_expiry: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET password = ?2, verify_code = ?3, verify_code_expiry = ?4
                 WHERE email = ?1 AND is_verified = 0",
                (email, password_hash, verify_code, code_expiry),
            )?;
            Ok(())
        })
    }

    pub fn find_verified_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_one_user(
                conn,
                "WHERE username = ?1 AND is_verified = 1",
                [username],
            )
        })
    }

    /// Any holder of the username; a verified holder wins over unverified
    /// claims, the earliest claim otherwise.
    pub fn find_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_one_user(
                conn,
                "WHERE username = ?1 ORDER BY is_verified DESC, rowid ASC LIMIT 1",
                [username],
            )
        })
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_one_user(conn, "WHERE email = ?1", [email]))
    }

    /// Sign-in lookup: the identifier may be a username or an email.
    pub fn find_by_identifier(&self, identifier: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_one_user(
                conn,
                "WHERE username = ?1 OR email = ?1
                 ORDER BY is_verified DESC, rowid ASC LIMIT 1",
                [identifier],
            )
        })
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_one_user(conn, "WHERE id = ?1", [id]))
    }

    /// Flip the verified flag. Fails with a unique violation if another user
    /// already verified the same username (see `is_unique_violation`).
    pub fn mark_verified(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE users SET is_verified = 1 WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn set_accepting(&self, id: &str, accepting: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_accepting_messages = ?2 WHERE id = ?1",
                (id, accepting),
            )?;
            Ok(())
        })
    }

    /// Compensating delete for a registration whose verification email never
    /// went out. Only rows that never verified are eligible.
    pub fn delete_unverified_user(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM users WHERE id = ?1 AND is_verified = 0", [id])?;
            Ok(())
        })
    }

    pub fn list_users(&self, offset: u64, limit: u64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY rowid LIMIT ?1 OFFSET ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map((limit, offset), map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_users(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let n: u64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            Ok(n)
        })
    }

    // -- Messages --

    /// Message intake is one INSERT, so concurrent senders to the same
    /// recipient can never lose each other's writes.
    pub fn insert_message(&self, id: &str, recipient_id: &str, content: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, recipient_id, content) VALUES (?1, ?2, ?3)",
                (id, recipient_id, content),
            )?;
            Ok(())
        })
    }

    pub fn messages_for(&self, recipient_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recipient_id, content, created_at FROM messages
                 WHERE recipient_id = ?1
                 ORDER BY created_at DESC, rowid DESC",
            )?;
            let rows = stmt
                .query_map([recipient_id], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        recipient_id: row.get(1)?,
                        content: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns the number of rows removed (0 or 1). Deleting an id that does
    /// not exist, or that belongs to someone else, removes nothing.
    pub fn delete_message(&self, recipient_id: &str, message_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM messages WHERE id = ?1 AND recipient_id = ?2",
                (message_id, recipient_id),
            )?;
            Ok(n)
        })
    }
}

fn query_one_user<P: rusqlite::Params>(
    conn: &Connection,
    predicate: &str,
    params: P,
) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users {predicate}");
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row(params, map_user).optional()?;
    Ok(row)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        is_verified: row.get(4)?,
        verify_code: row.get(5)?,
        verify_code_expiry: row.get(6)?,
        is_accepting_messages: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// True when an error chain bottoms out in a SQLite uniqueness violation,
/// e.g. the partial unique index on verified usernames.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, username: &str, email: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(
            &id,
            username,
            email,
            "hash",
            "123456",
            "2099-01-01T00:00:00+00:00",
        )
        .unwrap();
        id
    }

    #[test]
    fn lookup_by_username_email_and_identifier() {
        let db = db();
        let id = add_user(&db, "alice", "alice@example.com");

        assert_eq!(db.find_by_username("alice").unwrap().unwrap().id, id);
        assert_eq!(db.find_by_email("alice@example.com").unwrap().unwrap().id, id);
        assert_eq!(db.find_by_identifier("alice").unwrap().unwrap().id, id);
        assert_eq!(
            db.find_by_identifier("alice@example.com").unwrap().unwrap().id,
            id
        );
        assert!(db.find_by_identifier("nobody").unwrap().is_none());
    }

    #[test]
    fn verified_filter_only_sees_verified_rows() {
        let db = db();
        let id = add_user(&db, "bob", "bob@example.com");

        assert!(db.find_verified_by_username("bob").unwrap().is_none());
        db.mark_verified(&id).unwrap();
        assert!(db.find_verified_by_username("bob").unwrap().is_some());
    }

    #[test]
    fn refresh_only_touches_unverified_rows() {
        let db = db();
        let id = add_user(&db, "carol", "carol@example.com");

        db.refresh_unverified("carol@example.com", "hash2", "654321", "2099-06-01T00:00:00+00:00")
            .unwrap();
        let row = db.find_by_id(&id).unwrap().unwrap();
        assert_eq!(row.verify_code, "654321");
        assert_eq!(row.password, "hash2");

        db.mark_verified(&id).unwrap();
        db.refresh_unverified("carol@example.com", "hash3", "111111", "2099-06-01T00:00:00+00:00")
            .unwrap();
        let row = db.find_by_id(&id).unwrap().unwrap();
        assert_eq!(row.verify_code, "654321", "verified row must stay untouched");
    }

    #[test]
    fn only_one_holder_of_a_username_can_verify() {
        let db = db();
        let first = add_user(&db, "dave", "dave@one.example");
        let second = add_user(&db, "dave", "dave@two.example");

        db.mark_verified(&first).unwrap();
        let err = db.mark_verified(&second).unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let db = db();
        add_user(&db, "erin", "erin@example.com");
        let err = db
            .create_user(
                &Uuid::new_v4().to_string(),
                "erin2",
                "erin@example.com",
                "hash",
                "222222",
                "2099-01-01T00:00:00+00:00",
            )
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn messages_append_list_and_delete() {
        let db = db();
        let id = add_user(&db, "frank", "frank@example.com");

        let m1 = Uuid::new_v4().to_string();
        let m2 = Uuid::new_v4().to_string();
        db.insert_message(&m1, &id, "first").unwrap();
        db.insert_message(&m2, &id, "second").unwrap();

        let messages = db.messages_for(&id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "second", "newest first");

        assert_eq!(db.delete_message(&id, &m1).unwrap(), 1);
        assert_eq!(db.delete_message(&id, &m1).unwrap(), 0, "repeat delete is a no-op");
        assert_eq!(db.messages_for(&id).unwrap().len(), 1);
    }

    #[test]
    fn delete_message_requires_matching_recipient() {
        let db = db();
        let owner = add_user(&db, "gina", "gina@example.com");
        let other = add_user(&db, "hugo", "hugo@example.com");

        let m = Uuid::new_v4().to_string();
        db.insert_message(&m, &owner, "hi").unwrap();
        assert_eq!(db.delete_message(&other, &m).unwrap(), 0);
        assert_eq!(db.messages_for(&owner).unwrap().len(), 1);
    }

    #[test]
    fn compensating_delete_skips_verified_rows() {
        let db = db();
        let id = add_user(&db, "ivan", "ivan@example.com");

        db.mark_verified(&id).unwrap();
        db.delete_unverified_user(&id).unwrap();
        assert!(db.find_by_id(&id).unwrap().is_some());
    }

    #[test]
    fn listing_pages_in_insertion_order() {
        let db = db();
        for i in 0..5 {
            add_user(&db, &format!("user{i}"), &format!("user{i}@example.com"));
        }

        assert_eq!(db.count_users().unwrap(), 5);
        let page = db.list_users(2, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].username, "user2");
        assert_eq!(page[1].username, "user3");
        assert_eq!(db.list_users(4, 2).unwrap().len(), 1);
    }
}

use rusqlite::ffi;
use uuid::Uuid;

use tsuki_types::models::{EdgeKind, User, UserUpdate};
use tsuki_types::store::{Store, StoreError, StoreResult};

use crate::Database;

/// Maps a uniqueness violation to [`StoreError::Conflict`], naming the
/// offending column when SQLite reports it. Everything else is a backend
/// failure.
fn classify(err: anyhow::Error, what: &str) -> StoreError {
    if let Some(rusqlite::Error::SqliteFailure(code, message)) = err.downcast_ref::<rusqlite::Error>()
    {
        let unique = code.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
            || code.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY;
        if unique {
            let field = match message.as_deref() {
                Some(m) if m.contains("users.email") => "email",
                Some(m) if m.contains("users.username") => "username",
                _ => what,
            };
            return StoreError::Conflict(field.to_string());
        }
    }
    StoreError::Backend(err)
}

/// Edges reference their actor and target, so a foreign-key violation means
/// one of them was deleted underneath the write.
fn classify_edge(err: anyhow::Error, kind: EdgeKind) -> StoreError {
    if let Some(rusqlite::Error::SqliteFailure(code, _)) = err.downcast_ref::<rusqlite::Error>() {
        if code.extended_code == ffi::SQLITE_CONSTRAINT_FOREIGNKEY {
            let missing = match kind {
                EdgeKind::Follow => "user",
                EdgeKind::Vote => "user or post",
            };
            return StoreError::Missing(missing.to_string());
        }
    }
    classify(err, kind.as_str())
}

impl Store for Database {
    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.get_user_by_email(email)?)
    }

    fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self.get_user_by_username(username)?)
    }

    fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.get_user_by_id(id)?)
    }

    fn create_user(&self, user: &User, oauth_origin: bool) -> StoreResult<()> {
        Database::create_user(self, user, oauth_origin).map_err(|e| classify(e, "user"))
    }

    fn update_user(&self, id: Uuid, update: &UserUpdate) -> StoreResult<bool> {
        Database::update_user(self, id, update).map_err(|e| classify(e, update.field()))
    }

    fn delete_user(&self, id: Uuid) -> StoreResult<bool> {
        Ok(Database::delete_user(self, id)?)
    }

    fn is_oauth_origin(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.is_oauth_user(id)?)
    }

    fn target_exists(&self, kind: EdgeKind, target: Uuid) -> StoreResult<bool> {
        Ok(Database::target_exists(self, kind, target)?)
    }

    fn edge_exists(&self, kind: EdgeKind, actor: Uuid, target: Uuid) -> StoreResult<bool> {
        Ok(Database::edge_exists(self, kind, actor, target)?)
    }

    fn insert_edge(&self, kind: EdgeKind, actor: Uuid, target: Uuid) -> StoreResult<()> {
        Database::insert_edge(self, kind, actor, target).map_err(|e| classify_edge(e, kind))
    }

    fn delete_edge(&self, kind: EdgeKind, actor: Uuid, target: Uuid) -> StoreResult<bool> {
        Ok(Database::delete_edge(self, kind, actor, target)?)
    }

    fn save_verification_record(&self, opaque_id: &str, token: &str) -> StoreResult<()> {
        self.insert_verification(opaque_id, token)
            .map_err(|e| classify(e, "verification record"))
    }

    fn find_verification_record(&self, opaque_id: &str) -> StoreResult<Option<String>> {
        Ok(self.get_verification_token(opaque_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(name: &str, email: &str) -> User {
        User {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
            username: name.to_string(),
            password_hash: "hash".to_string(),
            verified: false,
            avatar_url: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_columns_are_named_in_conflicts() {
        let db = Database::open_in_memory().unwrap();
        let store: &dyn Store = &db;
        store.create_user(&user("alice", "a@example.com"), false).unwrap();

        match store.create_user(&user("alice", "other@example.com"), false) {
            Err(StoreError::Conflict(field)) => assert_eq!(field, "username"),
            other => panic!("expected username conflict, got {:?}", other),
        }
        match store.create_user(&user("alicia", "a@example.com"), false) {
            Err(StoreError::Conflict(field)) => assert_eq!(field, "email"),
            other => panic!("expected email conflict, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_edge_is_a_conflict_and_dangling_edge_is_missing() {
        let db = Database::open_in_memory().unwrap();
        let store: &dyn Store = &db;
        let a = user("a", "a@example.com");
        let b = user("b", "b@example.com");
        store.create_user(&a, false).unwrap();
        store.create_user(&b, false).unwrap();

        store.insert_edge(EdgeKind::Follow, a.id, b.id).unwrap();
        assert!(matches!(
            store.insert_edge(EdgeKind::Follow, a.id, b.id),
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.insert_edge(EdgeKind::Vote, a.id, Uuid::new_v4()),
            Err(StoreError::Missing(_))
        ));

        store.delete_user(a.id).unwrap();
        assert!(matches!(
            store.insert_edge(EdgeKind::Follow, a.id, b.id),
            Err(StoreError::Missing(_))
        ));
    }
}

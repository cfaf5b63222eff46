//! Persistence contract consumed by the auth core.
//!
//! Every method may block. Implementations own their own concurrency
//! safety; in particular `insert_edge` must reject a second row for the same
//! `(kind, actor, target)` with [`StoreError::Conflict`] rather than writing a
//! duplicate.

use thiserror::Error;
use uuid::Uuid;

use crate::models::{EdgeKind, User, UserUpdate};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("{0} already exists")]
    Conflict(String),

    /// A write referenced a row that does not exist.
    #[error("{0} not found")]
    Missing(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait Store: Send + Sync {
    // -- Users --

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// Inserts the user and, when `oauth_origin` is set, its OAuth link in
    /// the same transaction.
    fn create_user(&self, user: &User, oauth_origin: bool) -> StoreResult<()>;

    /// Returns `false` when no such user exists.
    fn update_user(&self, id: Uuid, update: &UserUpdate) -> StoreResult<bool>;

    /// Returns `false` when no such user exists. Owned rows cascade.
    fn delete_user(&self, id: Uuid) -> StoreResult<bool>;

    fn is_oauth_origin(&self, id: Uuid) -> StoreResult<bool>;

    // -- Edges --

    /// Whether the target of a `kind` edge exists (a user for follows, a
    /// post for votes).
    fn target_exists(&self, kind: EdgeKind, target: Uuid) -> StoreResult<bool>;
    fn edge_exists(&self, kind: EdgeKind, actor: Uuid, target: Uuid) -> StoreResult<bool>;
    /// A second identical edge is [`StoreError::Conflict`]; an actor or
    /// target that no longer exists is [`StoreError::Missing`].
    fn insert_edge(&self, kind: EdgeKind, actor: Uuid, target: Uuid) -> StoreResult<()>;
    /// Returns whether a row was removed.
    fn delete_edge(&self, kind: EdgeKind, actor: Uuid, target: Uuid) -> StoreResult<bool>;

    // -- Verification --

    fn save_verification_record(&self, opaque_id: &str, token: &str) -> StoreResult<()>;
    fn find_verification_record(&self, opaque_id: &str) -> StoreResult<Option<String>>;
}

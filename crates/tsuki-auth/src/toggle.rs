use tracing::{debug, warn};
use uuid::Uuid;

use tsuki_types::models::EdgeKind;
use tsuki_types::store::{Store, StoreError};

use crate::error::{AuthError, Result};

/// Bound on delete/insert races lost in a row before giving up.
const MAX_RACE_RETRIES: usize = 8;

/// Presence-only edges flipped by a single call.
///
/// A toggle is one statement at a time: try to delete the edge; if nothing
/// was deleted, insert it; if the insert hits the uniqueness constraint,
/// another toggler inserted first, so go back to deleting. Each attempt that
/// changes state is one flip, which keeps parity exact under concurrent
/// callers without holding a lock across statements.
pub struct ToggleStateManager<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> ToggleStateManager<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Flip the `(actor, target)` edge. Callers that need the resulting state
    /// ask [`exists`](Self::exists) afterwards.
    pub fn toggle(&self, kind: EdgeKind, actor: Uuid, target: Uuid) -> Result<()> {
        if kind == EdgeKind::Follow && actor == target {
            return Err(AuthError::Validation("cannot follow yourself".into()));
        }
        if !self.store.target_exists(kind, target)? {
            return Err(AuthError::not_found(match kind {
                EdgeKind::Follow => "user",
                EdgeKind::Vote => "post",
            }));
        }

        for attempt in 0..MAX_RACE_RETRIES {
            if self.store.delete_edge(kind, actor, target)? {
                debug!("{} edge {} -> {} removed", kind, actor, target);
                return Ok(());
            }
            match self.store.insert_edge(kind, actor, target) {
                Ok(()) => {
                    debug!("{} edge {} -> {} added", kind, actor, target);
                    return Ok(());
                }
                Err(StoreError::Conflict(_)) => {
                    debug!(
                        "{} edge {} -> {} appeared concurrently (attempt {})",
                        kind, actor, target, attempt
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!("Gave up toggling {} edge {} -> {} under contention", kind, actor, target);
        Err(AuthError::Persistence(anyhow::anyhow!(
            "{} edge kept changing concurrently",
            kind
        )))
    }

    pub fn exists(&self, kind: EdgeKind, actor: Uuid, target: Uuid) -> Result<bool> {
        Ok(self.store.edge_exists(kind, actor, target)?)
    }
}

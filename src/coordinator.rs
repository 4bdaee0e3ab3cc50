use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::backend::{BackendError, BookmarkBackend};
use crate::error::EngineError;
use crate::record::{self, BookmarkRecord};
use crate::reconcile::Directive;
use crate::session::SessionTracker;
use crate::store::BookmarkStore;
use crate::sync::{Envelope, TabBus};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Lifecycle of a single optimistic mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MutationPhase {
    OptimisticallyApplied,
    Confirmed,
    RolledBack,
}

/// Runs one optimistic mutation end-to-end: local merge and sibling notify
/// first, then the backend call, then confirm or compensate.
///
/// The store is free to absorb unrelated envelopes and push events while a
/// call is in flight — every path goes through the same idempotent
/// directives, so the interleaving cannot corrupt the list.
pub struct MutationCoordinator {
    store: BookmarkStore,
    backend: Arc<dyn BookmarkBackend>,
    session: SessionTracker,
    bus: Option<TabBus>,
    tab_id: String,
    call_timeout: Duration,
}

impl MutationCoordinator {
    pub fn new(
        store: BookmarkStore,
        backend: Arc<dyn BookmarkBackend>,
        session: SessionTracker,
        bus: Option<TabBus>,
        tab_id: String,
    ) -> Self {
        MutationCoordinator {
            store,
            backend,
            session,
            bus,
            tab_id,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    fn publish(&self, envelope: Envelope) {
        match &self.bus {
            Some(bus) => bus.publish(envelope),
            None => tracing::debug!("no tab bus, sibling instances not notified"),
        }
    }

    /// A stalled backend must not pin a mutation in its optimistic phase
    /// forever; an elapsed timer takes the same compensation path as a
    /// failed call.
    async fn settle<T>(
        &self,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, EngineError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(EngineError::Timeout(self.call_timeout)),
        }
    }

    /// Add a bookmark. The provisional record is visible (and broadcast)
    /// before the backend call is issued; the returned record is the
    /// authoritative one.
    pub async fn add(&self, title: &str, url: &str) -> Result<BookmarkRecord, EngineError> {
        let user = self.session.current_user().ok_or(EngineError::NoSession)?;

        let title = title.trim();
        let url = url.trim();
        if title.is_empty() {
            return Err(EngineError::Validation {
                reason: "title must not be empty",
            });
        }
        if url.is_empty() {
            return Err(EngineError::Validation {
                reason: "url must not be empty",
            });
        }
        let url = normalize_url(url);
        if Url::parse(&url).is_err() {
            return Err(EngineError::Validation {
                reason: "url is not valid",
            });
        }

        let mutation_id = record::new_mutation_id();
        let provisional = BookmarkRecord::provisional(&user.id, title, &url, &mutation_id);

        self.store
            .apply(&Directive::InsertOptimistic(provisional.clone()));
        tracing::debug!(
            %mutation_id,
            phase = ?MutationPhase::OptimisticallyApplied,
            "insert applied locally"
        );
        self.publish(Envelope::AddOptimistic {
            tab_id: self.tab_id.clone(),
            user_id: user.id.clone(),
            mutation_id: mutation_id.clone(),
            bookmark: provisional,
        });

        match self.settle(self.backend.insert(&user.id, title, &url)).await {
            Ok(confirmed) => {
                self.store.apply(&Directive::ConfirmInsert {
                    mutation_id: Some(mutation_id.clone()),
                    record: confirmed.clone(),
                });
                self.publish(Envelope::AddConfirmed {
                    tab_id: self.tab_id.clone(),
                    user_id: user.id.clone(),
                    mutation_id: mutation_id.clone(),
                    bookmark: confirmed.clone(),
                });
                tracing::debug!(%mutation_id, phase = ?MutationPhase::Confirmed, "insert confirmed");
                Ok(confirmed)
            }
            Err(err) => {
                self.store.apply(&Directive::RollbackInsert {
                    mutation_id: mutation_id.clone(),
                });
                self.publish(Envelope::AddFailed {
                    tab_id: self.tab_id.clone(),
                    user_id: user.id.clone(),
                    mutation_id: mutation_id.clone(),
                });
                tracing::warn!(
                    %mutation_id,
                    phase = ?MutationPhase::RolledBack,
                    error = %err,
                    "insert failed, rolled back"
                );
                Err(err)
            }
        }
    }

    /// Delete a bookmark. Removal is visible (and broadcast) before the
    /// backend call; a failed call restores the captured snapshot in place.
    pub async fn delete(&self, id: &str) -> Result<(), EngineError> {
        let user = self.session.current_user().ok_or(EngineError::NoSession)?;

        let snapshot = self.store.get(id);
        self.store.apply(&Directive::RemoveById { id: id.to_string() });
        self.publish(Envelope::Delete {
            tab_id: self.tab_id.clone(),
            user_id: user.id.clone(),
            id: id.to_string(),
        });

        match self.settle(self.backend.delete(id)).await {
            Ok(()) => {
                tracing::debug!(id, phase = ?MutationPhase::Confirmed, "delete confirmed");
                Ok(())
            }
            Err(err) => {
                if let Some(captured) = snapshot {
                    self.store.apply(&Directive::Restore(captured.clone()));
                    self.publish(Envelope::DeleteRollback {
                        tab_id: self.tab_id.clone(),
                        user_id: user.id.clone(),
                        bookmark: captured,
                    });
                }
                tracing::warn!(
                    id,
                    phase = ?MutationPhase::RolledBack,
                    error = %err,
                    "delete failed, restored"
                );
                Err(err)
            }
        }
    }
}

/// Prefix a scheme when the caller typed a bare host ("example.com").
pub fn normalize_url(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    }
}

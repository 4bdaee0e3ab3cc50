pub mod realtime;
pub mod wire;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::reconcile::Directive;
use crate::record::BookmarkRecord;
use crate::session::SessionTracker;
use crate::store::BookmarkStore;

pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// One mutation lifecycle notification as it crosses instance boundaries.
///
/// The tag values are the channel message names the web client uses, so both
/// ends of a mixed deployment read the same frames. Dispatch over the kinds
/// is exhaustive — adding a kind without a merge rule will not compile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "bookmark_add_optimistic")]
    AddOptimistic {
        tab_id: String,
        user_id: String,
        mutation_id: String,
        bookmark: BookmarkRecord,
    },
    #[serde(rename = "bookmark_add_confirmed")]
    AddConfirmed {
        tab_id: String,
        user_id: String,
        mutation_id: String,
        bookmark: BookmarkRecord,
    },
    #[serde(rename = "bookmark_add_failed")]
    AddFailed {
        tab_id: String,
        user_id: String,
        mutation_id: String,
    },
    #[serde(rename = "bookmark_delete")]
    Delete {
        tab_id: String,
        user_id: String,
        id: String,
    },
    #[serde(rename = "bookmark_delete_rollback")]
    DeleteRollback {
        tab_id: String,
        user_id: String,
        bookmark: BookmarkRecord,
    },
}

impl Envelope {
    pub fn tab_id(&self) -> &str {
        match self {
            Envelope::AddOptimistic { tab_id, .. }
            | Envelope::AddConfirmed { tab_id, .. }
            | Envelope::AddFailed { tab_id, .. }
            | Envelope::Delete { tab_id, .. }
            | Envelope::DeleteRollback { tab_id, .. } => tab_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Envelope::AddOptimistic { user_id, .. }
            | Envelope::AddConfirmed { user_id, .. }
            | Envelope::AddFailed { user_id, .. }
            | Envelope::Delete { user_id, .. }
            | Envelope::DeleteRollback { user_id, .. } => user_id,
        }
    }

    /// The merge a receiving instance performs for this envelope.
    pub fn to_directive(&self) -> Directive {
        match self {
            Envelope::AddOptimistic { bookmark, .. } => {
                Directive::InsertOptimistic(bookmark.clone())
            }
            Envelope::AddConfirmed {
                mutation_id,
                bookmark,
                ..
            } => Directive::ConfirmInsert {
                mutation_id: Some(mutation_id.clone()),
                record: bookmark.clone(),
            },
            Envelope::AddFailed { mutation_id, .. } => Directive::RollbackInsert {
                mutation_id: mutation_id.clone(),
            },
            Envelope::Delete { id, .. } => Directive::RemoveById { id: id.clone() },
            Envelope::DeleteRollback { bookmark, .. } => Directive::Restore(bookmark.clone()),
        }
    }
}

// ── tab bus ─────────────────────────────────────────────────────────────────

/// Best-effort broadcast channel between instances of the same browser.
///
/// Delivery is unacknowledged and a slow subscriber may lag out; the push
/// feed is the authoritative second path, so a lost envelope only delays
/// convergence, it never loses a confirmed record.
#[derive(Clone)]
pub struct TabBus {
    tx: broadcast::Sender<Envelope>,
}

impl TabBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        TabBus { tx }
    }

    /// Publish to whoever is listening. Nobody listening is not an error —
    /// the user may simply have a single instance open.
    pub fn publish(&self, envelope: Envelope) {
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

impl Default for TabBus {
    fn default() -> Self {
        TabBus::new(DEFAULT_BUS_CAPACITY)
    }
}

// ── inbound dispatch ────────────────────────────────────────────────────────

/// Apply one sibling envelope to the store, unless a guard drops it.
/// Returns true when the envelope was applied.
pub fn handle_envelope(
    envelope: &Envelope,
    store: &BookmarkStore,
    session: &SessionTracker,
    own_tab_id: &str,
) -> bool {
    if envelope.tab_id() == own_tab_id {
        return false; // our own echo, already applied locally
    }
    let Some(user) = session.current_user() else {
        return false;
    };
    if envelope.user_id() != user.id {
        tracing::debug!("dropping envelope for another user");
        return false;
    }
    store.apply(&envelope.to_directive());
    true
}

/// Consume sibling envelopes until the bus closes.
pub async fn run_inbound(
    mut rx: broadcast::Receiver<Envelope>,
    store: BookmarkStore,
    session: SessionTracker,
    own_tab_id: String,
) {
    loop {
        match rx.recv().await {
            Ok(envelope) => {
                handle_envelope(&envelope, &store, &session, &own_tab_id);
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "tab bus lagged, envelopes dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

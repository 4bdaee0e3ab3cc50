use std::sync::Arc;

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::backend::BookmarkBackend;
use crate::config::EngineConfig;
use crate::coordinator::MutationCoordinator;
use crate::error::EngineError;
use crate::record;
use crate::session::{self, SessionTracker};
use crate::store::BookmarkStore;
use crate::sync::realtime::{self, ChangeEvent};
use crate::sync::{self, TabBus};

/// One running engine instance — the per-tab assembly of store, coordinator,
/// and background merge loops.
pub struct Engine {
    store: BookmarkStore,
    coordinator: MutationCoordinator,
    backend: Arc<dyn BookmarkBackend>,
    session: SessionTracker,
    bus: Option<TabBus>,
    tab_id: String,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(
        backend: Arc<dyn BookmarkBackend>,
        session: SessionTracker,
        bus: Option<TabBus>,
    ) -> Self {
        Self::with_config(backend, session, bus, &EngineConfig::default())
    }

    pub fn with_config(
        backend: Arc<dyn BookmarkBackend>,
        session: SessionTracker,
        bus: Option<TabBus>,
        config: &EngineConfig,
    ) -> Self {
        let store = BookmarkStore::new();
        let tab_id = record::new_tab_id();
        if bus.is_none() {
            // degraded but functional: the push feed still converges us
            tracing::warn!("no tab bus available, running single-instance");
        }
        let coordinator = MutationCoordinator::new(
            store.clone(),
            backend.clone(),
            session.clone(),
            bus.clone(),
            tab_id.clone(),
        )
        .with_call_timeout(config.call_timeout());

        Engine {
            store,
            coordinator,
            backend,
            session,
            bus,
            tab_id,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &BookmarkStore {
        &self.store
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// Fetch the authoritative list and make it the visible state.
    pub async fn load_initial(&self) -> Result<usize, EngineError> {
        let user = self.session.current_user().ok_or(EngineError::NoSession)?;
        let records = self.backend.list(&user.id).await?;
        let count = records.len();
        self.store.replace_all(records);
        tracing::info!(count, "bookmarks loaded");
        Ok(count)
    }

    /// Start consuming sibling envelopes. No-op without a bus.
    pub fn start_inbound(&self) {
        let Some(bus) = &self.bus else { return };
        let task = tokio::spawn(sync::run_inbound(
            bus.subscribe(),
            self.store.clone(),
            self.session.clone(),
            self.tab_id.clone(),
        ));
        self.tasks.lock().push(task);
    }

    /// Clear local state the moment the session ends.
    pub fn start_session_watch(&self) {
        let task = tokio::spawn(session::run_session_watch(
            self.session.changes(),
            self.store.clone(),
        ));
        self.tasks.lock().push(task);
    }

    /// Start merging a backend change feed for the signed-in user.
    pub fn attach_feed<S>(&self, feed: S) -> Result<(), EngineError>
    where
        S: Stream<Item = ChangeEvent> + Send + 'static,
    {
        let user = self.session.current_user().ok_or(EngineError::NoSession)?;
        let task = tokio::spawn(realtime::run_change_feed(
            Box::pin(feed),
            self.store.clone(),
            user.id,
        ));
        self.tasks.lock().push(task);
        Ok(())
    }

    /// Abort every background loop.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

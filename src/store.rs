use std::sync::Arc;

use parking_lot::Mutex;

use crate::reconcile::{self, Directive};
use crate::record::BookmarkRecord;

/// The one in-memory bookmark list for the signed-in user.
///
/// Cheap to clone — every clone shares the same list. A directive holds the
/// lock for the whole merge, so each merge is atomic with respect to every
/// other path feeding the store.
#[derive(Clone, Default)]
pub struct BookmarkStore {
    records: Arc<Mutex<Vec<BookmarkRecord>>>,
}

impl BookmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one directive. Returns true when the visible list changed.
    pub fn apply(&self, directive: &Directive) -> bool {
        reconcile::apply(&mut self.records.lock(), directive)
    }

    /// Swap in a freshly fetched authoritative list (initial load).
    pub fn replace_all(&self, records: Vec<BookmarkRecord>) {
        *self.records.lock() = records;
    }

    pub fn snapshot(&self) -> Vec<BookmarkRecord> {
        self.records.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<BookmarkRecord> {
        self.records.lock().iter().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drop everything. Called on session loss — bookmark data never
    /// outlives the session that owns it.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rec(id: &str) -> BookmarkRecord {
        BookmarkRecord {
            id: id.to_string(),
            user_id: "u1".to_string(),
            title: "t".to_string(),
            url: "https://example.com".to_string(),
            created_at: Utc::now(),
            client_mutation_id: None,
        }
    }

    #[test]
    fn clones_share_state() {
        let store = BookmarkStore::new();
        let view = store.clone();
        store.replace_all(vec![rec("1"), rec("2")]);
        assert_eq!(view.len(), 2);
        assert_eq!(view.get("2").unwrap().id, "2");

        view.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn apply_reports_change() {
        let store = BookmarkStore::new();
        store.replace_all(vec![rec("1")]);
        assert!(store.apply(&Directive::RemoveById { id: "1".into() }));
        assert!(!store.apply(&Directive::RemoveById { id: "1".into() }));
    }
}

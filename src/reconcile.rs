//! Merge directives for the bookmark list.
//!
//! Every inbound path — the acting instance, sibling broadcasts, the backend
//! change feed — mutates the list only through these directives. Each one is
//! total and idempotent, so the same fact may arrive repeatedly and over any
//! path without changing the final state.

use crate::record::BookmarkRecord;

/// A single merge instruction.
#[derive(Clone, Debug)]
pub enum Directive {
    /// Prepend a provisional record unless its mutation or id is already known.
    InsertOptimistic(BookmarkRecord),
    /// Swap the provisional record (if any) for the authoritative one.
    ConfirmInsert {
        mutation_id: Option<String>,
        record: BookmarkRecord,
    },
    /// Drop the provisional record of a failed insert.
    RollbackInsert { mutation_id: String },
    /// Remove a record, optimistically or on confirmed delete.
    RemoveById { id: String },
    /// Undo an optimistic removal whose backend call failed.
    Restore(BookmarkRecord),
}

/// Apply one directive in place. Returns true when the list changed.
///
/// The list is ordered newest-first by `created_at`; prepends keep that
/// order because fresh records carry the current time. Removals preserve
/// the relative order of everything else.
pub fn apply(records: &mut Vec<BookmarkRecord>, directive: &Directive) -> bool {
    match directive {
        Directive::InsertOptimistic(record) => {
            let mutation_id = record.client_mutation_id.as_deref();
            let known = records.iter().any(|r| {
                r.id == record.id
                    || (mutation_id.is_some() && r.client_mutation_id.as_deref() == mutation_id)
            });
            if known {
                return false;
            }
            records.insert(0, record.clone());
            true
        }
        Directive::ConfirmInsert {
            mutation_id,
            record,
        } => {
            let mut changed = false;
            if let Some(mid) = mutation_id {
                let before = records.len();
                records.retain(|r| r.client_mutation_id.as_deref() != Some(mid.as_str()));
                changed = records.len() != before;
            }
            if records.iter().any(|r| r.id == record.id) {
                // already landed via another path — keep it, drop the duplicate
                return changed;
            }
            let mut confirmed = record.clone();
            confirmed.client_mutation_id = None;
            records.insert(0, confirmed);
            true
        }
        Directive::RollbackInsert { mutation_id } => {
            let before = records.len();
            records.retain(|r| r.client_mutation_id.as_deref() != Some(mutation_id.as_str()));
            records.len() != before
        }
        Directive::RemoveById { id } => {
            let before = records.len();
            records.retain(|r| r.id != *id);
            records.len() != before
        }
        Directive::Restore(record) => {
            if records.iter().any(|r| r.id == record.id) {
                return false;
            }
            // back into created_at-descending position, where it was removed from
            let at = records
                .iter()
                .position(|r| r.created_at < record.created_at)
                .unwrap_or(records.len());
            records.insert(at, record.clone());
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn rec(id: &str, mutation_id: Option<&str>, secs: i64) -> BookmarkRecord {
        BookmarkRecord {
            id: id.to_string(),
            user_id: "u1".to_string(),
            title: format!("title-{}", id),
            url: format!("https://example.com/{}", id),
            created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            client_mutation_id: mutation_id.map(str::to_string),
        }
    }

    fn ids(records: &[BookmarkRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn optimistic_insert_prepends_once() {
        let mut list = vec![rec("1", None, 0)];
        let provisional = rec("optimistic-m1", Some("m1"), 10);

        assert!(apply(&mut list, &Directive::InsertOptimistic(provisional.clone())));
        assert_eq!(ids(&list), ["optimistic-m1", "1"]);

        // same mutation again (broadcast echo of a fact we already hold)
        assert!(!apply(&mut list, &Directive::InsertOptimistic(provisional)));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn confirm_swaps_provisional_for_authoritative() {
        let mut list = vec![rec("optimistic-m1", Some("m1"), 10), rec("1", None, 0)];
        let confirmed = rec("42", None, 10);

        assert!(apply(
            &mut list,
            &Directive::ConfirmInsert {
                mutation_id: Some("m1".into()),
                record: confirmed,
            }
        ));
        assert_eq!(ids(&list), ["42", "1"]);
        assert!(list.iter().all(|r| !r.is_provisional()));
    }

    #[test]
    fn confirm_is_idempotent() {
        let mut list = vec![rec("optimistic-m1", Some("m1"), 10), rec("1", None, 0)];
        let directive = Directive::ConfirmInsert {
            mutation_id: Some("m1".into()),
            record: rec("42", None, 10),
        };

        apply(&mut list, &directive);
        let once = list.clone();
        apply(&mut list, &directive);
        assert_eq!(list, once);
    }

    #[test]
    fn confirm_clears_mutation_id_on_stored_record() {
        let mut list = Vec::new();
        apply(
            &mut list,
            &Directive::ConfirmInsert {
                mutation_id: None,
                record: rec("42", Some("m1"), 10),
            },
        );
        assert!(list[0].client_mutation_id.is_none());
    }

    #[test]
    fn no_duplicate_for_any_optimistic_confirm_order() {
        let provisional = rec("optimistic-m1", Some("m1"), 10);
        let confirm = Directive::ConfirmInsert {
            mutation_id: Some("m1".into()),
            record: rec("42", None, 10),
        };

        // optimistic then confirm
        let mut a = vec![rec("1", None, 0)];
        apply(&mut a, &Directive::InsertOptimistic(provisional.clone()));
        apply(&mut a, &confirm);

        // confirm then (late) optimistic
        let mut b = vec![rec("1", None, 0)];
        apply(&mut b, &confirm);
        apply(&mut b, &Directive::InsertOptimistic(provisional));

        assert_eq!(ids(&a), ["42", "1"]);
        // the late optimistic has a different id and its mutation is no longer
        // tracked, so it lands — but never as a duplicate of id 42
        assert_eq!(b.iter().filter(|r| r.id == "42").count(), 1);
        assert_eq!(a.iter().filter(|r| r.id == "42").count(), 1);
    }

    #[test]
    fn convergence_across_delivery_orders() {
        // the same logical insert arrives as: direct confirmation, broadcast
        // confirmation, and a push-feed insert (no mutation id)
        let direct = Directive::ConfirmInsert {
            mutation_id: Some("m1".into()),
            record: rec("42", None, 10),
        };
        let broadcast = direct.clone();
        let push = Directive::ConfirmInsert {
            mutation_id: None,
            record: rec("42", None, 10),
        };

        let paths: [[&Directive; 3]; 6] = [
            [&direct, &broadcast, &push],
            [&direct, &push, &broadcast],
            [&broadcast, &direct, &push],
            [&broadcast, &push, &direct],
            [&push, &direct, &broadcast],
            [&push, &broadcast, &direct],
        ];

        let mut outcomes = Vec::new();
        for order in paths {
            let mut list = vec![rec("optimistic-m1", Some("m1"), 10), rec("1", None, 0)];
            for d in order {
                apply(&mut list, d);
            }
            outcomes.push(list);
        }
        for outcome in &outcomes[1..] {
            assert_eq!(outcome, &outcomes[0]);
        }
        assert_eq!(ids(&outcomes[0]), ["42", "1"]);
    }

    #[test]
    fn rollback_removes_only_its_mutation() {
        let mut list = vec![
            rec("optimistic-m2", Some("m2"), 20),
            rec("optimistic-m1", Some("m1"), 10),
            rec("1", None, 0),
        ];
        assert!(apply(&mut list, &Directive::RollbackInsert { mutation_id: "m1".into() }));
        assert_eq!(ids(&list), ["optimistic-m2", "1"]);

        // unknown mutation is a no-op
        assert!(!apply(&mut list, &Directive::RollbackInsert { mutation_id: "m9".into() }));
    }

    #[test]
    fn remove_by_id_is_total() {
        let mut list = vec![rec("2", None, 20), rec("1", None, 0)];
        assert!(apply(&mut list, &Directive::RemoveById { id: "2".into() }));
        assert!(!apply(&mut list, &Directive::RemoveById { id: "2".into() }));
        assert_eq!(ids(&list), ["1"]);
    }

    #[test]
    fn restore_returns_record_to_original_position() {
        let mut list = vec![rec("3", None, 30), rec("2", None, 20), rec("1", None, 10)];
        let snapshot = list[1].clone();

        apply(&mut list, &Directive::RemoveById { id: "2".into() });
        assert_eq!(ids(&list), ["3", "1"]);

        assert!(apply(&mut list, &Directive::Restore(snapshot.clone())));
        assert_eq!(ids(&list), ["3", "2", "1"]);

        // double restore (local rollback plus sibling rollback envelope)
        assert!(!apply(&mut list, &Directive::Restore(snapshot)));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn restore_of_newest_record_lands_on_top() {
        let mut list = vec![rec("2", None, 20), rec("1", None, 10)];
        let newest = rec("3", None, 30);
        apply(&mut list, &Directive::Restore(newest));
        assert_eq!(ids(&list), ["3", "2", "1"]);
    }
}

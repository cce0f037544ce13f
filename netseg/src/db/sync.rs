// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Range synchronizer
//!
//! Reconciles a scope's allocation table with its configured ranges: every
//! in-range id must have a record (so the pool always exposes every free
//! id), and unallocated records outside the ranges are purged. Allocated
//! records are never touched, in or out of range; a stale allocated record
//! is only removed by a later release.

use super::delete_unallocated;
use super::insert_unallocated;
use super::scope_rows;
use super::Db;
use super::TransactionError;
use netseg_types::Error;
use netseg_types::SegmentRange;
use netseg_types::SegmentScope;
use netseg_types::MAX_RANGE_SIZE;
use slog::debug;
use slog::error;
use std::collections::BTreeSet;

impl Db {
    /// Reconcile one scope's allocation table with `ranges`, in one
    /// transaction. Idempotent: re-running with the same configuration
    /// changes nothing.
    ///
    /// A single range covering more than [`MAX_RANGE_SIZE`] ids is skipped
    /// (with an error log) rather than materialized; its ids stay
    /// unmanaged until the range is narrowed.
    pub fn sync_allocations(
        &mut self,
        scope: &SegmentScope,
        ranges: &[SegmentRange],
    ) -> Result<(), Error> {
        // The full set of ids that ought to have a record.
        let mut ids: BTreeSet<i64> = BTreeSet::new();
        for range in ranges {
            if range.len() > MAX_RANGE_SIZE {
                error!(
                    self.log,
                    "skipping unreasonable {} id range {}",
                    scope.segment_type(),
                    range
                );
                continue;
            }
            ids.extend((range.first..=range.last).map(i64::from));
        }

        let result = self.conn.immediate_transaction::<_, TransactionError, _>(
            |conn| {
                let mut stale = Vec::new();
                for row in scope_rows(conn, scope)? {
                    // An existing record covers its id, allocated or not.
                    // Out-of-range unallocated records are stale.
                    if !ids.remove(&row.id) && !row.allocated {
                        stale.push(row.id);
                    }
                }
                delete_unallocated(conn, scope, &stale)?;

                // Whatever remains had no record: insert it free, ascending.
                let missing: Vec<i64> = ids.iter().copied().collect();
                insert_unallocated(conn, scope, &missing)?;
                Ok((missing.len(), stale.len()))
            },
        );
        match result {
            Ok((added, removed)) => {
                debug!(
                    self.log,
                    "synchronized {} allocations", scope;
                    "added" => added,
                    "removed" => removed
                );
                Ok(())
            }
            Err(err) => Err(err.into_public()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbConfig;
    use crate::test_utils;

    fn open_db() -> Db {
        Db::open(&test_utils::log(), ":memory:", &DbConfig::default()).unwrap()
    }

    fn range(first: u32, last: u32) -> SegmentRange {
        SegmentRange::new(first, last).unwrap()
    }

    #[test]
    fn creates_record_for_every_in_range_id() {
        let mut db = open_db();
        let scope = SegmentScope::vlan("physnet1");
        db.sync_allocations(&scope, &[range(10, 15)]).unwrap();

        let allocs = db.allocations(&scope).unwrap();
        assert_eq!(
            allocs.iter().map(|a| a.id).collect::<Vec<_>>(),
            vec![10, 11, 12, 13, 14, 15]
        );
        assert!(allocs.iter().all(|a| !a.allocated));
        assert_eq!(db.allocation(&scope, 9).unwrap(), None);
        assert_eq!(db.allocation(&scope, 16).unwrap(), None);
    }

    #[test]
    fn covers_disjoint_ranges() {
        let mut db = open_db();
        let scope = SegmentScope::Vxlan;
        db.sync_allocations(&scope, &[range(100, 101), range(200, 201)])
            .unwrap();
        let ids: Vec<u32> =
            db.allocations(&scope).unwrap().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![100, 101, 200, 201]);
    }

    #[test]
    fn is_idempotent() {
        let mut db = open_db();
        let scope = SegmentScope::Vxlan;
        let ranges = [range(100, 110)];
        db.sync_allocations(&scope, &ranges).unwrap();
        let before = db.allocations(&scope).unwrap();
        db.sync_allocations(&scope, &ranges).unwrap();
        assert_eq!(before, db.allocations(&scope).unwrap());
    }

    #[test]
    fn purges_stale_unallocated_but_keeps_allocated() {
        let mut db = open_db();
        let scope = SegmentScope::Gre;
        db.sync_allocations(&scope, &[range(100, 105)]).unwrap();
        db.allocate_specific(&scope, 105, Some("net-a")).unwrap();

        // Narrow the range: 103 and 104 are stale and free, 105 is stale
        // but allocated.
        db.sync_allocations(&scope, &[range(100, 102)]).unwrap();
        let ids: Vec<u32> =
            db.allocations(&scope).unwrap().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![100, 101, 102, 105]);
        assert!(db.allocation(&scope, 105).unwrap().unwrap().allocated);
    }

    #[test]
    fn widened_range_adopts_existing_allocated_record() {
        let mut db = open_db();
        let scope = SegmentScope::Vxlan;
        db.allocate_specific(&scope, 500, Some("net-b")).unwrap();

        // The record predates the range; synchronizing must leave it
        // allocated, not reset it.
        db.sync_allocations(&scope, &[range(499, 501)]).unwrap();
        let alloc = db.allocation(&scope, 500).unwrap().unwrap();
        assert!(alloc.allocated);
        assert_eq!(alloc.network_id.as_deref(), Some("net-b"));
        assert!(!db.allocation(&scope, 499).unwrap().unwrap().allocated);
    }

    #[test]
    fn empty_ranges_purge_the_free_pool() {
        let mut db = open_db();
        let scope = SegmentScope::Vxlan;
        db.sync_allocations(&scope, &[range(100, 105)]).unwrap();
        db.allocate_specific(&scope, 100, None).unwrap();

        db.sync_allocations(&scope, &[]).unwrap();
        let ids: Vec<u32> =
            db.allocations(&scope).unwrap().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![100]);
    }

    #[test]
    fn oversized_range_is_skipped() {
        let mut db = open_db();
        let scope = SegmentScope::Vxlan;
        db.sync_allocations(&scope, &[range(1, 1_100_000), range(10, 12)])
            .unwrap();
        // Only the sane range was materialized.
        let ids: Vec<u32> =
            db.allocations(&scope).unwrap().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
    }
}

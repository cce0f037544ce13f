// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Allocator operations: dynamic allocation, specific reservation, release
//!
//! Each operation performs its existence check and its mutation inside one
//! immediate transaction, so a "check free, then mark allocated" sequence
//! cannot interleave with a concurrent caller's.

use super::delete_segment;
use super::fetch_segment;
use super::first_free_in_range;
use super::insert_allocated;
use super::mark_allocated;
use super::mark_unallocated;
use super::models::SegmentAllocation;
use super::public_error_from_diesel;
use super::scope_rows;
use super::Db;
use super::TransactionError;
use diesel::result::DatabaseErrorKind;
use netseg_types::in_any_range;
use netseg_types::Error;
use netseg_types::SegmentRange;
use netseg_types::SegmentScope;
use slog::debug;
use slog::warn;

/// Where a specific reservation found its id.
enum Placement {
    InPool,
    OutsidePool,
}

/// What `release` did with the record.
enum Released {
    NotFound,
    ToPool,
    OutsidePool,
}

impl Db {
    /// Allocate any free id with `first <= id <= last` in `scope`, lowest
    /// first, attaching `owner` to the record. Fails with
    /// [`Error::PoolExhausted`] when no unallocated record matches.
    pub fn allocate_dynamic(
        &mut self,
        scope: &SegmentScope,
        first: u32,
        last: u32,
        owner: Option<&str>,
    ) -> Result<u32, Error> {
        let result = self.conn.immediate_transaction::<_, TransactionError, _>(
            |conn| {
                let id = first_free_in_range(
                    conn,
                    scope,
                    i64::from(first),
                    i64::from(last),
                )?
                .ok_or_else(|| {
                    TransactionError::Custom(Error::PoolExhausted {
                        scope: scope.clone(),
                        first,
                        last,
                    })
                })?;
                mark_allocated(conn, scope, id, owner, false)?;
                Ok(id)
            },
        );
        match result {
            Ok(id) => {
                debug!(self.log, "allocating {} id {} from pool", scope, id);
                Ok(id as u32)
            }
            Err(err) => Err(err.into_public()),
        }
    }

    /// Reserve the specific id `id` in `scope`. An id with no record (e.g.
    /// a provider id outside the configured ranges) gets a new record
    /// created directly in the allocated state, with the provider flag set.
    /// Fails with [`Error::IdInUse`] if the id is already allocated,
    /// including when a concurrent reservation wins the race.
    pub fn allocate_specific(
        &mut self,
        scope: &SegmentScope,
        id: u32,
        owner: Option<&str>,
    ) -> Result<(), Error> {
        let result = self.conn.immediate_transaction::<_, TransactionError, _>(
            |conn| match fetch_segment(conn, scope, i64::from(id))? {
                Some(row) if row.allocated => {
                    Err(TransactionError::Custom(Error::IdInUse {
                        scope: scope.clone(),
                        id,
                    }))
                }
                Some(_) => {
                    mark_allocated(conn, scope, i64::from(id), owner, true)?;
                    Ok(Placement::InPool)
                }
                None => {
                    insert_allocated(conn, scope, i64::from(id), owner)?;
                    Ok(Placement::OutsidePool)
                }
            },
        );
        match result {
            Ok(Placement::InPool) => {
                debug!(
                    self.log,
                    "reserving specific {} id {} from pool", scope, id
                );
                Ok(())
            }
            Ok(Placement::OutsidePool) => {
                debug!(
                    self.log,
                    "reserving specific {} id {} outside pool", scope, id
                );
                Ok(())
            }
            // Two racing inserts of the same absent id: the loser hits the
            // primary key.
            Err(TransactionError::Database(
                diesel::result::Error::DatabaseError(
                    DatabaseErrorKind::UniqueViolation,
                    _,
                ),
            )) => Err(Error::IdInUse { scope: scope.clone(), id }),
            Err(err) => Err(err.into_public()),
        }
    }

    /// Release `id` in `scope`. The record returns to the pool when `id`
    /// still falls within `ranges`; otherwise it is deleted. Releasing an
    /// id with no record is a no-op.
    pub fn release(
        &mut self,
        scope: &SegmentScope,
        id: u32,
        ranges: &[SegmentRange],
    ) -> Result<(), Error> {
        let inside = in_any_range(id, ranges);
        let result = self.conn.immediate_transaction::<_, TransactionError, _>(
            |conn| match fetch_segment(conn, scope, i64::from(id))? {
                None => Ok(Released::NotFound),
                Some(_) if inside => {
                    mark_unallocated(conn, scope, i64::from(id))?;
                    Ok(Released::ToPool)
                }
                Some(_) => {
                    delete_segment(conn, scope, i64::from(id))?;
                    Ok(Released::OutsidePool)
                }
            },
        );
        match result {
            Ok(Released::NotFound) => {
                warn!(self.log, "{} id {} not found on release", scope, id);
                Ok(())
            }
            Ok(Released::ToPool) => {
                debug!(self.log, "releasing {} id {} to pool", scope, id);
                Ok(())
            }
            Ok(Released::OutsidePool) => {
                debug!(self.log, "releasing {} id {} outside pool", scope, id);
                Ok(())
            }
            Err(err) => Err(err.into_public()),
        }
    }

    /// Point lookup of one allocation record.
    pub fn allocation(
        &mut self,
        scope: &SegmentScope,
        id: u32,
    ) -> Result<Option<SegmentAllocation>, Error> {
        fetch_segment(&mut self.conn, scope, i64::from(id))
            .map(|row| row.map(|r| SegmentAllocation::from_row(scope, r)))
            .map_err(public_error_from_diesel)
    }

    /// Every record for `scope`, ascending by id.
    pub fn allocations(
        &mut self,
        scope: &SegmentScope,
    ) -> Result<Vec<SegmentAllocation>, Error> {
        Ok(scope_rows(&mut self.conn, scope)
            .map_err(public_error_from_diesel)?
            .into_iter()
            .map(|r| SegmentAllocation::from_row(scope, r))
            .collect())
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
    fn dynamic_allocates_ascending_and_exhausts() {
        let mut db = open_db();
        let scope = SegmentScope::Vxlan;
        db.sync_allocations(&scope, &[range(100, 102)]).unwrap();

        assert_eq!(
            db.allocate_dynamic(&scope, 100, 102, Some("net-a")).unwrap(),
            100
        );
        assert_eq!(db.allocate_dynamic(&scope, 100, 102, None).unwrap(), 101);
        assert_eq!(db.allocate_dynamic(&scope, 100, 102, None).unwrap(), 102);
        assert_eq!(
            db.allocate_dynamic(&scope, 100, 102, None),
            Err(Error::PoolExhausted {
                scope: scope.clone(),
                first: 100,
                last: 102
            })
        );

        let alloc = db.allocation(&scope, 100).unwrap().unwrap();
        assert!(alloc.allocated);
        assert_eq!(alloc.network_id.as_deref(), Some("net-a"));
        assert!(!alloc.is_provider);
    }

    #[test]
    fn dynamic_respects_requested_subrange() {
        let mut db = open_db();
        let scope = SegmentScope::Gre;
        db.sync_allocations(&scope, &[range(100, 110)]).unwrap();
        assert_eq!(db.allocate_dynamic(&scope, 104, 106, None).unwrap(), 104);
    }

    #[test]
    fn dynamic_fails_when_single_id_range_is_taken() {
        let mut db = open_db();
        let scope = SegmentScope::Vxlan;
        db.sync_allocations(&scope, &[range(5, 5)]).unwrap();
        db.allocate_specific(&scope, 5, None).unwrap();
        assert_eq!(
            db.allocate_dynamic(&scope, 5, 5, None),
            Err(Error::PoolExhausted { scope, first: 5, last: 5 })
        );
    }

    #[test]
    fn specific_reservation_inside_pool() {
        let mut db = open_db();
        let scope = SegmentScope::vlan("physnet1");
        db.sync_allocations(&scope, &[range(100, 199)]).unwrap();

        db.allocate_specific(&scope, 150, Some("net-b")).unwrap();
        assert_eq!(
            db.allocate_specific(&scope, 150, None),
            Err(Error::IdInUse { scope: scope.clone(), id: 150 })
        );

        let alloc = db.allocation(&scope, 150).unwrap().unwrap();
        assert!(alloc.allocated);
        assert!(alloc.is_provider);
        assert_eq!(alloc.network_id.as_deref(), Some("net-b"));
    }

    #[test]
    fn specific_reservation_outside_pool_creates_record() {
        let mut db = open_db();
        let scope = SegmentScope::vlan("physnet1");
        db.sync_allocations(&scope, &[range(100, 199)]).unwrap();

        db.allocate_specific(&scope, 4000, None).unwrap();
        let alloc = db.allocation(&scope, 4000).unwrap().unwrap();
        assert!(alloc.allocated);
        assert!(alloc.is_provider);

        // Releasing it with the same ranges deletes it again.
        db.release(&scope, 4000, &[range(100, 199)]).unwrap();
        assert_eq!(db.allocation(&scope, 4000).unwrap(), None);
    }

    #[test]
    fn release_returns_in_range_id_to_pool() {
        let mut db = open_db();
        let scope = SegmentScope::Vxlan;
        let ranges = [range(100, 102)];
        db.sync_allocations(&scope, &ranges).unwrap();

        let id = db.allocate_dynamic(&scope, 100, 102, Some("net-c")).unwrap();
        db.release(&scope, id, &ranges).unwrap();

        let alloc = db.allocation(&scope, id).unwrap().unwrap();
        assert!(!alloc.allocated);
        assert_eq!(alloc.network_id, None);
        assert!(!alloc.is_provider);

        // The freed id is allocatable again.
        assert_eq!(db.allocate_dynamic(&scope, id, id, None).unwrap(), id);
    }

    #[test]
    fn release_deletes_out_of_range_id() {
        let mut db = open_db();
        let scope = SegmentScope::vlan("physnet1");
        db.sync_allocations(&scope, &[range(10, 30)]).unwrap();
        assert_eq!(db.allocate_dynamic(&scope, 20, 20, None).unwrap(), 20);

        // The configured range shrank to 10:15 while id 20 was live;
        // releasing it now discards the record instead of recycling it.
        db.sync_allocations(&scope, &[range(10, 15)]).unwrap();
        db.release(&scope, 20, &[range(10, 15)]).unwrap();
        assert_eq!(db.allocation(&scope, 20).unwrap(), None);
    }

    #[test]
    fn release_of_unknown_id_is_noop() {
        let mut db = open_db();
        let scope = SegmentScope::Gre;
        db.release(&scope, 999, &[range(1, 10)]).unwrap();
        db.release(&scope, 999, &[]).unwrap();
    }

    #[test]
    fn vlan_scopes_are_independent() {
        let mut db = open_db();
        let net1 = SegmentScope::vlan("physnet1");
        let net2 = SegmentScope::vlan("physnet2");
        db.sync_allocations(&net1, &[range(100, 100)]).unwrap();
        db.sync_allocations(&net2, &[range(100, 100)]).unwrap();

        assert_eq!(db.allocate_dynamic(&net1, 100, 100, None).unwrap(), 100);
        // Same tag, different physical network: not in use.
        assert_eq!(db.allocate_dynamic(&net2, 100, 100, None).unwrap(), 100);
    }
}

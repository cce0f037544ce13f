// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistent allocation store
//!
//! An embedded SQLite database holding one allocation table per segment type
//! and one endpoint table per tunnel type. Every mutating operation runs in
//! a single `BEGIN IMMEDIATE` transaction: the write lock is taken before
//! the operation's reads, so a concurrent writer blocks (up to the busy
//! timeout) and then re-reads committed state. That is what upholds the
//! at-most-one-owner-per-id invariant under arbitrary interleaving.
//!
//! Multiple `Db` handles may be open against the same path from different
//! threads or processes; SQLite arbitrates between them.

mod allocation;
mod endpoint;
pub(crate) mod models;
mod schema;
mod sync;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::result::ConnectionError;
use diesel::SqliteConnection;
use netseg_types::Error;
use netseg_types::SegmentScope;
use slog::info;
use slog::o;
use slog::Logger;
use std::time::Duration;

pub use endpoint::TunnelEndpoint;
pub use models::SegmentAllocation;

use models::GreAllocation;
use models::SegmentRow;
use models::VlanAllocation;
use models::VxlanAllocation;

/// SQLite limits the number of bound variables per statement; batch
/// inserts and deletes are chunked to stay under it.
const SQL_BATCH_SIZE: usize = 1000;

#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error("failed to open db connection to {path}: {err}")]
    DbOpen { path: String, err: ConnectionError },

    #[error(transparent)]
    Db(#[from] diesel::result::Error),
}

/// Store tuning knobs.
#[derive(Clone, Debug)]
pub struct DbConfig {
    /// How long a transaction waits for a concurrent writer before giving
    /// up. Expiry rolls the transaction back and surfaces
    /// [`Error::StoreUnavailable`].
    pub busy_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> DbConfig {
        DbConfig { busy_timeout: Duration::from_secs(5) }
    }
}

pub struct Db {
    log: Logger,
    conn: SqliteConnection,
}

impl Db {
    pub fn open(
        log: &Logger,
        path: &str,
        config: &DbConfig,
    ) -> Result<Db, DbError> {
        let schema = include_str!("./schema.sql");
        let log = log.new(o!("component" => "NetsegDb"));
        info!(log, "opening database {:?}", path);
        let mut conn = SqliteConnection::establish(path)
            .map_err(|err| DbError::DbOpen { path: path.into(), err })?;

        // Enable foreign key processing, which is off by default.
        diesel::sql_query("PRAGMA foreign_keys = 'ON'").execute(&mut conn)?;

        // Wait for concurrent writers instead of failing immediately. Set
        // before any statement that can contend with another handle.
        diesel::sql_query(format!(
            "PRAGMA busy_timeout = {}",
            config.busy_timeout.as_millis()
        ))
        .execute(&mut conn)?;

        // Enable the WAL so readers don't block writers.
        diesel::sql_query("PRAGMA journal_mode = 'WAL'").execute(&mut conn)?;

        // Create tables
        conn.batch_execute(schema)?;

        Ok(Db { log, conn })
    }
}

/// Error produced inside a store transaction: either an already-formed
/// public error or a database error to be converted at the boundary.
#[derive(Debug)]
pub(crate) enum TransactionError {
    Custom(Error),
    Database(diesel::result::Error),
}

impl From<diesel::result::Error> for TransactionError {
    fn from(err: diesel::result::Error) -> Self {
        TransactionError::Database(err)
    }
}

impl TransactionError {
    pub(crate) fn into_public(self) -> Error {
        match self {
            TransactionError::Custom(err) => err,
            TransactionError::Database(err) => public_error_from_diesel(err),
        }
    }
}

pub(crate) fn public_error_from_diesel(err: diesel::result::Error) -> Error {
    Error::StoreUnavailable { internal_message: err.to_string() }
}

// Row-level helpers shared by the allocator and the synchronizer. Each
// dispatches on the scope to the corresponding per-type table; callers
// compose them inside a transaction.

pub(crate) fn fetch_segment(
    conn: &mut SqliteConnection,
    scope: &SegmentScope,
    id: i64,
) -> Result<Option<SegmentRow>, diesel::result::Error> {
    match scope {
        SegmentScope::Vlan { physical_network } => {
            use schema::vlan_allocations::dsl;
            dsl::vlan_allocations
                .filter(dsl::physical_network.eq(physical_network.as_str()))
                .filter(dsl::vlan_id.eq(id))
                .select((
                    dsl::vlan_id,
                    dsl::allocated,
                    dsl::network_id,
                    dsl::is_provider,
                ))
                .first::<SegmentRow>(conn)
                .optional()
        }
        SegmentScope::Vxlan => {
            use schema::vxlan_allocations::dsl;
            dsl::vxlan_allocations
                .filter(dsl::vxlan_id.eq(id))
                .select((
                    dsl::vxlan_id,
                    dsl::allocated,
                    dsl::network_id,
                    dsl::is_provider,
                ))
                .first::<SegmentRow>(conn)
                .optional()
        }
        SegmentScope::Gre => {
            use schema::gre_allocations::dsl;
            dsl::gre_allocations
                .filter(dsl::gre_id.eq(id))
                .select((
                    dsl::gre_id,
                    dsl::allocated,
                    dsl::network_id,
                    dsl::is_provider,
                ))
                .first::<SegmentRow>(conn)
                .optional()
        }
    }
}

/// Every row for the scope, ascending by id.
pub(crate) fn scope_rows(
    conn: &mut SqliteConnection,
    scope: &SegmentScope,
) -> Result<Vec<SegmentRow>, diesel::result::Error> {
    match scope {
        SegmentScope::Vlan { physical_network } => {
            use schema::vlan_allocations::dsl;
            dsl::vlan_allocations
                .filter(dsl::physical_network.eq(physical_network.as_str()))
                .order(dsl::vlan_id.asc())
                .select((
                    dsl::vlan_id,
                    dsl::allocated,
                    dsl::network_id,
                    dsl::is_provider,
                ))
                .load::<SegmentRow>(conn)
        }
        SegmentScope::Vxlan => {
            use schema::vxlan_allocations::dsl;
            dsl::vxlan_allocations
                .order(dsl::vxlan_id.asc())
                .select((
                    dsl::vxlan_id,
                    dsl::allocated,
                    dsl::network_id,
                    dsl::is_provider,
                ))
                .load::<SegmentRow>(conn)
        }
        SegmentScope::Gre => {
            use schema::gre_allocations::dsl;
            dsl::gre_allocations
                .order(dsl::gre_id.asc())
                .select((
                    dsl::gre_id,
                    dsl::allocated,
                    dsl::network_id,
                    dsl::is_provider,
                ))
                .load::<SegmentRow>(conn)
        }
    }
}

/// Lowest unallocated id with `first <= id <= last`, if any.
pub(crate) fn first_free_in_range(
    conn: &mut SqliteConnection,
    scope: &SegmentScope,
    first: i64,
    last: i64,
) -> Result<Option<i64>, diesel::result::Error> {
    match scope {
        SegmentScope::Vlan { physical_network } => {
            use schema::vlan_allocations::dsl;
            dsl::vlan_allocations
                .filter(dsl::physical_network.eq(physical_network.as_str()))
                .filter(dsl::vlan_id.ge(first))
                .filter(dsl::vlan_id.le(last))
                .filter(dsl::allocated.eq(false))
                .order(dsl::vlan_id.asc())
                .select(dsl::vlan_id)
                .first::<i64>(conn)
                .optional()
        }
        SegmentScope::Vxlan => {
            use schema::vxlan_allocations::dsl;
            dsl::vxlan_allocations
                .filter(dsl::vxlan_id.ge(first))
                .filter(dsl::vxlan_id.le(last))
                .filter(dsl::allocated.eq(false))
                .order(dsl::vxlan_id.asc())
                .select(dsl::vxlan_id)
                .first::<i64>(conn)
                .optional()
        }
        SegmentScope::Gre => {
            use schema::gre_allocations::dsl;
            dsl::gre_allocations
                .filter(dsl::gre_id.ge(first))
                .filter(dsl::gre_id.le(last))
                .filter(dsl::allocated.eq(false))
                .order(dsl::gre_id.asc())
                .select(dsl::gre_id)
                .first::<i64>(conn)
                .optional()
        }
    }
}

pub(crate) fn mark_allocated(
    conn: &mut SqliteConnection,
    scope: &SegmentScope,
    id: i64,
    owner: Option<&str>,
    provider: bool,
) -> Result<usize, diesel::result::Error> {
    match scope {
        SegmentScope::Vlan { physical_network } => {
            use schema::vlan_allocations::dsl;
            diesel::update(
                dsl::vlan_allocations
                    .filter(dsl::physical_network.eq(physical_network.as_str()))
                    .filter(dsl::vlan_id.eq(id)),
            )
            .set((
                dsl::allocated.eq(true),
                dsl::network_id.eq(owner),
                dsl::is_provider.eq(provider),
            ))
            .execute(conn)
        }
        SegmentScope::Vxlan => {
            use schema::vxlan_allocations::dsl;
            diesel::update(dsl::vxlan_allocations.filter(dsl::vxlan_id.eq(id)))
                .set((
                    dsl::allocated.eq(true),
                    dsl::network_id.eq(owner),
                    dsl::is_provider.eq(provider),
                ))
                .execute(conn)
        }
        SegmentScope::Gre => {
            use schema::gre_allocations::dsl;
            diesel::update(dsl::gre_allocations.filter(dsl::gre_id.eq(id)))
                .set((
                    dsl::allocated.eq(true),
                    dsl::network_id.eq(owner),
                    dsl::is_provider.eq(provider),
                ))
                .execute(conn)
        }
    }
}

/// Return a row to the free pool, clearing owner metadata.
pub(crate) fn mark_unallocated(
    conn: &mut SqliteConnection,
    scope: &SegmentScope,
    id: i64,
) -> Result<usize, diesel::result::Error> {
    match scope {
        SegmentScope::Vlan { physical_network } => {
            use schema::vlan_allocations::dsl;
            diesel::update(
                dsl::vlan_allocations
                    .filter(dsl::physical_network.eq(physical_network.as_str()))
                    .filter(dsl::vlan_id.eq(id)),
            )
            .set((
                dsl::allocated.eq(false),
                dsl::network_id.eq(None::<String>),
                dsl::is_provider.eq(false),
            ))
            .execute(conn)
        }
        SegmentScope::Vxlan => {
            use schema::vxlan_allocations::dsl;
            diesel::update(dsl::vxlan_allocations.filter(dsl::vxlan_id.eq(id)))
                .set((
                    dsl::allocated.eq(false),
                    dsl::network_id.eq(None::<String>),
                    dsl::is_provider.eq(false),
                ))
                .execute(conn)
        }
        SegmentScope::Gre => {
            use schema::gre_allocations::dsl;
            diesel::update(dsl::gre_allocations.filter(dsl::gre_id.eq(id)))
                .set((
                    dsl::allocated.eq(false),
                    dsl::network_id.eq(None::<String>),
                    dsl::is_provider.eq(false),
                ))
                .execute(conn)
        }
    }
}

/// Insert a row directly in the allocated state (specific reservation of an
/// id with no existing record).
pub(crate) fn insert_allocated(
    conn: &mut SqliteConnection,
    scope: &SegmentScope,
    id: i64,
    owner: Option<&str>,
) -> Result<usize, diesel::result::Error> {
    match scope {
        SegmentScope::Vlan { physical_network } => {
            use schema::vlan_allocations::dsl;
            diesel::insert_into(dsl::vlan_allocations)
                .values(&VlanAllocation {
                    physical_network: physical_network.clone(),
                    vlan_id: id,
                    allocated: true,
                    network_id: owner.map(str::to_string),
                    is_provider: true,
                })
                .execute(conn)
        }
        SegmentScope::Vxlan => {
            use schema::vxlan_allocations::dsl;
            diesel::insert_into(dsl::vxlan_allocations)
                .values(&VxlanAllocation {
                    vxlan_id: id,
                    allocated: true,
                    network_id: owner.map(str::to_string),
                    is_provider: true,
                })
                .execute(conn)
        }
        SegmentScope::Gre => {
            use schema::gre_allocations::dsl;
            diesel::insert_into(dsl::gre_allocations)
                .values(&GreAllocation {
                    gre_id: id,
                    allocated: true,
                    network_id: owner.map(str::to_string),
                    is_provider: true,
                })
                .execute(conn)
        }
    }
}

/// Insert unallocated pool rows for `ids`, chunked to respect the SQLite
/// bound-variable limit.
pub(crate) fn insert_unallocated(
    conn: &mut SqliteConnection,
    scope: &SegmentScope,
    ids: &[i64],
) -> Result<(), diesel::result::Error> {
    for chunk in ids.chunks(SQL_BATCH_SIZE) {
        match scope {
            SegmentScope::Vlan { physical_network } => {
                use schema::vlan_allocations::dsl;
                let rows: Vec<VlanAllocation> = chunk
                    .iter()
                    .map(|&id| VlanAllocation {
                        physical_network: physical_network.clone(),
                        vlan_id: id,
                        allocated: false,
                        network_id: None,
                        is_provider: false,
                    })
                    .collect();
                diesel::insert_into(dsl::vlan_allocations)
                    .values(&rows)
                    .execute(conn)?;
            }
            SegmentScope::Vxlan => {
                use schema::vxlan_allocations::dsl;
                let rows: Vec<VxlanAllocation> = chunk
                    .iter()
                    .map(|&id| VxlanAllocation {
                        vxlan_id: id,
                        allocated: false,
                        network_id: None,
                        is_provider: false,
                    })
                    .collect();
                diesel::insert_into(dsl::vxlan_allocations)
                    .values(&rows)
                    .execute(conn)?;
            }
            SegmentScope::Gre => {
                use schema::gre_allocations::dsl;
                let rows: Vec<GreAllocation> = chunk
                    .iter()
                    .map(|&id| GreAllocation {
                        gre_id: id,
                        allocated: false,
                        network_id: None,
                        is_provider: false,
                    })
                    .collect();
                diesel::insert_into(dsl::gre_allocations)
                    .values(&rows)
                    .execute(conn)?;
            }
        }
    }
    Ok(())
}

/// Delete the unallocated rows among `ids`, chunked like
/// [`insert_unallocated`]. The `allocated = false` filter keeps a row that
/// was allocated concurrently from being evicted.
pub(crate) fn delete_unallocated(
    conn: &mut SqliteConnection,
    scope: &SegmentScope,
    ids: &[i64],
) -> Result<(), diesel::result::Error> {
    for chunk in ids.chunks(SQL_BATCH_SIZE) {
        match scope {
            SegmentScope::Vlan { physical_network } => {
                use schema::vlan_allocations::dsl;
                diesel::delete(
                    dsl::vlan_allocations
                        .filter(dsl::physical_network.eq(physical_network.as_str()))
                        .filter(dsl::vlan_id.eq_any(chunk.iter().copied()))
                        .filter(dsl::allocated.eq(false)),
                )
                .execute(conn)?;
            }
            SegmentScope::Vxlan => {
                use schema::vxlan_allocations::dsl;
                diesel::delete(
                    dsl::vxlan_allocations
                        .filter(dsl::vxlan_id.eq_any(chunk.iter().copied()))
                        .filter(dsl::allocated.eq(false)),
                )
                .execute(conn)?;
            }
            SegmentScope::Gre => {
                use schema::gre_allocations::dsl;
                diesel::delete(
                    dsl::gre_allocations
                        .filter(dsl::gre_id.eq_any(chunk.iter().copied()))
                        .filter(dsl::allocated.eq(false)),
                )
                .execute(conn)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn delete_segment(
    conn: &mut SqliteConnection,
    scope: &SegmentScope,
    id: i64,
) -> Result<usize, diesel::result::Error> {
    match scope {
        SegmentScope::Vlan { physical_network } => {
            use schema::vlan_allocations::dsl;
            diesel::delete(
                dsl::vlan_allocations
                    .filter(dsl::physical_network.eq(physical_network.as_str()))
                    .filter(dsl::vlan_id.eq(id)),
            )
            .execute(conn)
        }
        SegmentScope::Vxlan => {
            use schema::vxlan_allocations::dsl;
            diesel::delete(dsl::vxlan_allocations.filter(dsl::vxlan_id.eq(id)))
                .execute(conn)
        }
        SegmentScope::Gre => {
            use schema::gre_allocations::dsl;
            diesel::delete(dsl::gre_allocations.filter(dsl::gre_id.eq(id)))
                .execute(conn)
        }
    }
}

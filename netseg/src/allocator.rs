// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Public entry point: store + registry, wired together
//!
//! A `SegmentAllocator` owns one store handle and the current scope
//! registry. For concurrent use, open one allocator per request handler
//! against the same database path; the store serializes them.

use crate::config::PoolConfig;
use crate::db::Db;
use crate::db::SegmentAllocation;
use crate::db::TunnelEndpoint;
use crate::registry::ScopeRegistry;
use netseg_types::Error;
use netseg_types::SegmentScope;
use netseg_types::TunnelType;
use slog::info;
use slog::o;
use slog::Logger;
use std::net::IpAddr;

pub struct SegmentAllocator {
    log: Logger,
    db: Db,
    registry: ScopeRegistry,
}

impl SegmentAllocator {
    pub fn new(log: &Logger, db: Db, config: PoolConfig) -> SegmentAllocator {
        let log = log.new(o!("component" => "SegmentAllocator"));
        SegmentAllocator { log, db, registry: ScopeRegistry::new(config) }
    }

    /// Reconcile every configured scope's allocation table with its
    /// ranges. Called once at startup and after every [`Self::reload`].
    pub fn synchronize(&mut self) -> Result<(), Error> {
        for scope in self.registry.scopes() {
            self.db.sync_allocations(&scope, self.registry.ranges_for(&scope))?;
        }
        Ok(())
    }

    /// Replace the configuration (e.g. an administrator added or removed a
    /// range) and resynchronize the store against it.
    pub fn reload(&mut self, config: PoolConfig) -> Result<(), Error> {
        info!(self.log, "reloading pool configuration");
        self.registry = ScopeRegistry::new(config);
        self.synchronize()
    }

    /// Allocate any free id in `[first, last]` for `scope`, lowest first.
    pub fn allocate_dynamic(
        &mut self,
        scope: &SegmentScope,
        first: u32,
        last: u32,
        owner: Option<&str>,
    ) -> Result<u32, Error> {
        self.db.allocate_dynamic(scope, first, last, owner)
    }

    /// Reserve the specific id `id` for `scope`, creating the record if the
    /// id lies outside the configured ranges (provider reservation).
    pub fn allocate_specific(
        &mut self,
        scope: &SegmentScope,
        id: u32,
        owner: Option<&str>,
    ) -> Result<(), Error> {
        self.db.allocate_specific(scope, id, owner)
    }

    /// Release `id` back to `scope`'s pool, or delete its record when the
    /// id no longer falls within the currently configured ranges.
    ///
    /// Range membership is judged against the registry's ranges at release
    /// time: if a reload re-widened a range over a stale allocated id (and
    /// [`Self::synchronize`] ran), the id is back in range here and returns
    /// to the pool instead of being discarded.
    pub fn release(
        &mut self,
        scope: &SegmentScope,
        id: u32,
    ) -> Result<(), Error> {
        self.db.release(scope, id, self.registry.ranges_for(scope))
    }

    /// Point lookup of one allocation record.
    pub fn allocation(
        &mut self,
        scope: &SegmentScope,
        id: u32,
    ) -> Result<Option<SegmentAllocation>, Error> {
        self.db.allocation(scope, id)
    }

    /// Register a tunnel-capable transport endpoint.
    pub fn add_endpoint(
        &mut self,
        tunnel: TunnelType,
        ip: IpAddr,
    ) -> Result<TunnelEndpoint, Error> {
        self.db.add_endpoint(tunnel, ip)
    }

    /// Every registered endpoint for `tunnel`.
    pub fn endpoints(
        &mut self,
        tunnel: TunnelType,
    ) -> Result<Vec<TunnelEndpoint>, Error> {
        self.db.endpoints(tunnel)
    }

    pub fn registry(&self) -> &ScopeRegistry {
        &self.registry
    }
}

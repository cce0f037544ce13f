// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Segment-identifier pool engine for a virtual-network control plane
//!
//! netseg manages finite, numeric network-segment identifier pools: VLAN
//! tags (scoped per physical network) and VXLAN/GRE tunnel identifiers
//! (one global pool each). The engine reconciles a persistent allocation
//! table against administrator-configured identifier ranges, hands out free
//! identifiers on demand, honors reservations of specific identifiers
//! (including provider identifiers outside the configured ranges), and
//! releases identifiers back to the pool, deleting records that no longer
//! fall within any configured range.
//!
//! The store is an embedded SQLite database; every read-then-write sequence
//! runs in a single immediate transaction, so no two concurrent callers can
//! be handed the same identifier. See [`SegmentAllocator`] for the public
//! entry point.

pub mod allocator;
pub mod config;
pub mod db;
pub mod registry;

pub use allocator::SegmentAllocator;
pub use config::PoolConfig;
pub use db::Db;
pub use db::DbConfig;
pub use db::SegmentAllocation;
pub use db::TunnelEndpoint;
pub use netseg_types::Error;
pub use netseg_types::SegmentRange;
pub use netseg_types::SegmentScope;
pub use netseg_types::TunnelType;

#[cfg(test)]
pub(crate) mod test_utils {
    use slog::o;
    use slog::Drain;
    use slog::Logger;

    /// Logger that writes through the test harness's captured stdout.
    pub fn log() -> Logger {
        let decorator =
            slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        Logger::root(drain, o!())
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scope registry: the engine's view of configured ranges per scope
//!
//! A pure projection of [`PoolConfig`] with no persistence of its own. It is
//! built at construction and replaced wholesale on reload; nothing reads
//! configuration from ambient global state.

use crate::config::PoolConfig;
use netseg_types::SegmentRange;
use netseg_types::SegmentScope;

pub struct ScopeRegistry {
    config: PoolConfig,
}

impl ScopeRegistry {
    pub fn new(config: PoolConfig) -> ScopeRegistry {
        ScopeRegistry { config }
    }

    /// The configured ranges for `scope`. A scope with no configuration
    /// (e.g. an unknown physical network) has no allocatable ranges.
    pub fn ranges_for(&self, scope: &SegmentScope) -> &[SegmentRange] {
        match scope {
            SegmentScope::Vlan { physical_network } => self
                .config
                .vlan_ranges
                .get(physical_network)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
            SegmentScope::Vxlan => &self.config.vxlan_ranges,
            SegmentScope::Gre => &self.config.gre_ranges,
        }
    }

    /// Every scope the synchronizer must reconcile. The tunnel scopes are
    /// always included: synchronizing them with empty ranges purges stale
    /// unallocated records.
    pub fn scopes(&self) -> Vec<SegmentScope> {
        self.config
            .vlan_ranges
            .keys()
            .cloned()
            .map(SegmentScope::vlan)
            .chain([SegmentScope::Vxlan, SegmentScope::Gre])
            .collect()
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared vocabulary for the netseg segment-identifier pool engine
//!
//! These types are the contract between the engine and its callers: which
//! pool a segment identifier lives in ([`SegmentScope`]), which ranges of a
//! pool are administrator-managed ([`SegmentRange`]), and how allocation
//! failures are reported ([`Error`]).

use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// Smallest usable VLAN tag.
pub const VLAN_MIN: u32 = 1;
/// Largest usable VLAN tag.
pub const VLAN_MAX: u32 = 4094;
/// Largest VXLAN/GRE tunnel identifier (a 24-bit space).
pub const MAX_TUNNEL_ID: u32 = (1 << 24) - 1;
/// Any single configured range with more identifiers than this is skipped
/// during synchronization rather than materialized into the store.
pub const MAX_RANGE_SIZE: u64 = 1_000_000;

/// The kind of network segment an identifier names.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SegmentType {
    Vlan,
    Vxlan,
    Gre,
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SegmentType::Vlan => "vlan",
            SegmentType::Vxlan => "vxlan",
            SegmentType::Gre => "gre",
        };
        f.write_str(s)
    }
}

/// A tunnel segment type, used to address the per-type endpoint tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TunnelType {
    Vxlan,
    Gre,
}

impl fmt::Display for TunnelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelType::Vxlan => "vxlan",
            TunnelType::Gre => "gre",
        };
        f.write_str(s)
    }
}

/// An independent namespace for a segment-identifier pool
///
/// VLAN tags are only unique per physical network, so each physical network
/// is its own scope. Tunnel identifiers (VXLAN, GRE) are drawn from a single
/// global space per segment type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SegmentScope {
    Vlan { physical_network: String },
    Vxlan,
    Gre,
}

impl SegmentScope {
    pub fn vlan<S: Into<String>>(physical_network: S) -> SegmentScope {
        SegmentScope::Vlan { physical_network: physical_network.into() }
    }

    pub fn segment_type(&self) -> SegmentType {
        match self {
            SegmentScope::Vlan { .. } => SegmentType::Vlan,
            SegmentScope::Vxlan => SegmentType::Vxlan,
            SegmentScope::Gre => SegmentType::Gre,
        }
    }
}

impl fmt::Display for SegmentScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentScope::Vlan { physical_network } => {
                write!(f, "vlan/{}", physical_network)
            }
            SegmentScope::Vxlan => f.write_str("vxlan"),
            SegmentScope::Gre => f.write_str("gre"),
        }
    }
}

/// A range whose minimum exceeds its maximum.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
#[error("invalid segment range {first}:{last} (min exceeds max)")]
pub struct InvalidRange {
    pub first: u32,
    pub last: u32,
}

/// An inclusive range of segment identifiers available for allocation
///
/// Ranges arrive here already parsed and validated by the embedding
/// service's configuration loader.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct SegmentRange {
    pub first: u32,
    pub last: u32,
}

impl SegmentRange {
    pub fn new(first: u32, last: u32) -> Result<SegmentRange, InvalidRange> {
        if first > last {
            return Err(InvalidRange { first, last });
        }
        Ok(SegmentRange { first, last })
    }

    /// Number of identifiers covered by the range.
    pub fn len(&self) -> u64 {
        u64::from(self.last - self.first) + 1
    }

    pub fn contains(&self, id: u32) -> bool {
        self.first <= id && id <= self.last
    }
}

impl fmt::Display for SegmentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.first, self.last)
    }
}

/// Whether `id` falls within any of `ranges`.
pub fn in_any_range(id: u32, ranges: &[SegmentRange]) -> bool {
    ranges.iter().any(|r| r.contains(id))
}

/// An error that can be generated by the allocation engine
///
/// `PoolExhausted` and `IdInUse` are recoverable by the caller (pick another
/// range, pick another id, or surface a conflict to the end user); they are
/// never retried internally. `StoreUnavailable` means the operation rolled
/// back and may be retried wholesale.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// No unallocated identifier was left in the requested range.
    #[error("no free segment id in {first}:{last} for scope {scope}")]
    PoolExhausted { scope: SegmentScope, first: u32, last: u32 },
    /// A specific reservation collided with an existing allocation.
    #[error("segment id {id} already in use in scope {scope}")]
    IdInUse { scope: SegmentScope, id: u32 },
    /// The persistent store could not be reached or the transaction could
    /// not be committed.
    #[error("allocation store unavailable: {internal_message}")]
    StoreUnavailable { internal_message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_rejects_inverted_bounds() {
        assert_eq!(
            SegmentRange::new(10, 5),
            Err(InvalidRange { first: 10, last: 5 })
        );
        let r = SegmentRange::new(5, 5).unwrap();
        assert_eq!(r.len(), 1);
        assert!(r.contains(5));
        assert!(!r.contains(6));
    }

    #[test]
    fn range_len_counts_inclusive_bounds() {
        let r = SegmentRange::new(VLAN_MIN, VLAN_MAX).unwrap();
        assert_eq!(r.len(), 4094);
        let full = SegmentRange::new(0, MAX_TUNNEL_ID).unwrap();
        assert_eq!(full.len(), 1 << 24);
    }

    #[test]
    fn membership_across_disjoint_ranges() {
        let ranges = [
            SegmentRange::new(100, 199).unwrap(),
            SegmentRange::new(300, 399).unwrap(),
        ];
        assert!(in_any_range(100, &ranges));
        assert!(in_any_range(399, &ranges));
        assert!(!in_any_range(200, &ranges));
        assert!(!in_any_range(400, &ranges));
        assert!(!in_any_range(100, &[]));
    }

    #[test]
    fn scope_display_names_the_pool() {
        assert_eq!(SegmentScope::vlan("physnet1").to_string(), "vlan/physnet1");
        assert_eq!(SegmentScope::Vxlan.to_string(), "vxlan");
        assert_eq!(SegmentScope::Gre.to_string(), "gre");
        assert_eq!(SegmentScope::vlan("p").segment_type(), SegmentType::Vlan);
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! DB models

use super::schema::*;
use diesel::prelude::*;
use netseg_types::SegmentScope;

/// Row in `vlan_allocations`. A row exists for every allocatable in-range
/// VLAN tag on a physical network, plus any allocated out-of-range tag.
#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = vlan_allocations)]
pub struct VlanAllocation {
    pub physical_network: String,
    pub vlan_id: i64,
    pub allocated: bool,
    pub network_id: Option<String>,
    pub is_provider: bool,
}

/// Row in `vxlan_allocations`.
#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = vxlan_allocations)]
pub struct VxlanAllocation {
    pub vxlan_id: i64,
    pub allocated: bool,
    pub network_id: Option<String>,
    pub is_provider: bool,
}

/// Row in `gre_allocations`.
#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = gre_allocations)]
pub struct GreAllocation {
    pub gre_id: i64,
    pub allocated: bool,
    pub network_id: Option<String>,
    pub is_provider: bool,
}

/// Row in `vxlan_endpoints` / `gre_endpoints`.
#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = vxlan_endpoints)]
pub struct VxlanEndpoint {
    pub ip_address: String,
    pub endpoint_id: i64,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = gre_endpoints)]
pub struct GreEndpoint {
    pub ip_address: String,
    pub endpoint_id: i64,
}

/// Table-independent view of one allocation row, as selected by the
/// engine's queries.
#[derive(Debug, Clone, PartialEq, Queryable)]
pub struct SegmentRow {
    pub id: i64,
    pub allocated: bool,
    pub network_id: Option<String>,
    pub is_provider: bool,
}

/// Public view of an allocation record, for point lookups and debugging.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentAllocation {
    pub scope: SegmentScope,
    pub id: u32,
    pub allocated: bool,
    /// Opaque owner reference (e.g. a virtual-network id) attached at
    /// allocation time.
    pub network_id: Option<String>,
    /// Set on identifiers claimed by specific (provider) reservation.
    pub is_provider: bool,
}

impl SegmentAllocation {
    pub(crate) fn from_row(scope: &SegmentScope, row: SegmentRow) -> Self {
        SegmentAllocation {
            scope: scope.clone(),
            // Ids are written from `u32` values; the store never holds one
            // outside that domain.
            id: row.id as u32,
            allocated: row.allocated,
            network_id: row.network_id,
            is_provider: row.is_provider,
        }
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Diesel table definitions, mirroring `schema.sql`

use diesel::table;

table! {
    vlan_allocations (physical_network, vlan_id) {
        physical_network -> Text,
        vlan_id -> BigInt,
        allocated -> Bool,
        network_id -> Nullable<Text>,
        is_provider -> Bool,
    }
}

table! {
    vxlan_allocations (vxlan_id) {
        vxlan_id -> BigInt,
        allocated -> Bool,
        network_id -> Nullable<Text>,
        is_provider -> Bool,
    }
}

table! {
    gre_allocations (gre_id) {
        gre_id -> BigInt,
        allocated -> Bool,
        network_id -> Nullable<Text>,
        is_provider -> Bool,
    }
}

table! {
    vxlan_endpoints (ip_address) {
        ip_address -> Text,
        endpoint_id -> BigInt,
    }
}

table! {
    gre_endpoints (ip_address) {
        ip_address -> Text,
        endpoint_id -> BigInt,
    }
}

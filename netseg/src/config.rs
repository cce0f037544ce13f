// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pool configuration handed to the engine at construction or reload
//!
//! Range strings (`min:max`) are parsed and validated by the embedding
//! service's configuration loader; this struct receives the numeric result.
//! It derives `Deserialize` so a service can embed it directly in its own
//! config file.

use netseg_types::SegmentRange;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// Administrator-configured identifier ranges for every pool
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// VLAN ranges, keyed by physical network name.
    #[serde(default)]
    pub vlan_ranges: BTreeMap<String, Vec<SegmentRange>>,
    /// VXLAN tunnel-identifier ranges (global).
    #[serde(default)]
    pub vxlan_ranges: Vec<SegmentRange>,
    /// GRE tunnel-identifier ranges (global).
    #[serde(default)]
    pub gre_ranges: Vec<SegmentRange>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_from_embedded_toml() {
        let raw = r#"
            vxlan_ranges = [{ first = 5000, last = 5999 }]

            [vlan_ranges]
            physnet1 = [
                { first = 100, last = 199 },
                { first = 300, last = 399 },
            ]
            physnet2 = [{ first = 1000, last = 1099 }]
        "#;
        let config: PoolConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.vlan_ranges.len(), 2);
        assert_eq!(
            config.vlan_ranges["physnet1"],
            vec![
                SegmentRange::new(100, 199).unwrap(),
                SegmentRange::new(300, 399).unwrap(),
            ]
        );
        assert_eq!(
            config.vxlan_ranges,
            vec![SegmentRange::new(5000, 5999).unwrap()]
        );
        assert!(config.gre_ranges.is_empty());
    }

    #[test]
    fn empty_config_is_valid() {
        let config: PoolConfig = toml::from_str("").unwrap();
        assert_eq!(config, PoolConfig::default());
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tunnel endpoint registry
//!
//! A small appendage of the allocation store: the set of tunnel-capable
//! transport endpoints per tunnel type, deduplicated by ip, each carrying a
//! local auto-incrementing id. Not part of the id-allocation invariants.

use super::models::GreEndpoint;
use super::models::VxlanEndpoint;
use super::public_error_from_diesel;
use super::schema;
use super::Db;
use super::TransactionError;
use diesel::prelude::*;
use netseg_types::Error;
use netseg_types::TunnelType;
use slog::debug;
use slog::warn;
use std::net::IpAddr;

/// A tunnel-capable transport endpoint registered with the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEndpoint {
    pub ip: IpAddr,
    pub id: u32,
}

fn endpoint_from_row(
    ip_address: &str,
    endpoint_id: i64,
) -> Result<TunnelEndpoint, Error> {
    let ip = ip_address.parse().map_err(|_| Error::StoreUnavailable {
        internal_message: format!(
            "corrupt endpoint row: bad ip address {:?}",
            ip_address
        ),
    })?;
    Ok(TunnelEndpoint { ip, id: endpoint_id as u32 })
}

impl Db {
    /// Register `ip` as a `tunnel` endpoint. Registering an ip that is
    /// already present returns the existing record unchanged; a new ip is
    /// assigned the next local endpoint id.
    pub fn add_endpoint(
        &mut self,
        tunnel: TunnelType,
        ip: IpAddr,
    ) -> Result<TunnelEndpoint, Error> {
        let ip_text = ip.to_string();
        let result = self.conn.immediate_transaction::<_, TransactionError, _>(
            |conn| {
                let existing = fetch_endpoint_id(conn, tunnel, &ip_text)?;
                if let Some(id) = existing {
                    return Ok((id, false));
                }
                let id = next_endpoint_id(conn, tunnel)?;
                insert_endpoint(conn, tunnel, &ip_text, id)?;
                Ok((id, true))
            },
        );
        match result {
            Ok((id, added)) => {
                if added {
                    debug!(self.log, "added {} endpoint {}", tunnel, ip);
                } else {
                    warn!(
                        self.log,
                        "{} endpoint with ip {} already exists", tunnel, ip
                    );
                }
                Ok(TunnelEndpoint { ip, id: id as u32 })
            }
            Err(err) => Err(err.into_public()),
        }
    }

    /// Every registered endpoint for `tunnel`.
    pub fn endpoints(
        &mut self,
        tunnel: TunnelType,
    ) -> Result<Vec<TunnelEndpoint>, Error> {
        let rows: Vec<(String, i64)> = match tunnel {
            TunnelType::Vxlan => {
                use schema::vxlan_endpoints::dsl;
                dsl::vxlan_endpoints
                    .order(dsl::endpoint_id.asc())
                    .select((dsl::ip_address, dsl::endpoint_id))
                    .load(&mut self.conn)
            }
            TunnelType::Gre => {
                use schema::gre_endpoints::dsl;
                dsl::gre_endpoints
                    .order(dsl::endpoint_id.asc())
                    .select((dsl::ip_address, dsl::endpoint_id))
                    .load(&mut self.conn)
            }
        }
        .map_err(public_error_from_diesel)?;

        rows.iter().map(|(ip, id)| endpoint_from_row(ip, *id)).collect()
    }
}

fn fetch_endpoint_id(
    conn: &mut SqliteConnection,
    tunnel: TunnelType,
    ip: &str,
) -> Result<Option<i64>, diesel::result::Error> {
    match tunnel {
        TunnelType::Vxlan => {
            use schema::vxlan_endpoints::dsl;
            dsl::vxlan_endpoints
                .filter(dsl::ip_address.eq(ip))
                .select(dsl::endpoint_id)
                .first::<i64>(conn)
                .optional()
        }
        TunnelType::Gre => {
            use schema::gre_endpoints::dsl;
            dsl::gre_endpoints
                .filter(dsl::ip_address.eq(ip))
                .select(dsl::endpoint_id)
                .first::<i64>(conn)
                .optional()
        }
    }
}

/// Next local endpoint id: one past the current maximum, starting at 1.
fn next_endpoint_id(
    conn: &mut SqliteConnection,
    tunnel: TunnelType,
) -> Result<i64, diesel::result::Error> {
    let max: Option<i64> = match tunnel {
        TunnelType::Vxlan => {
            use schema::vxlan_endpoints::dsl;
            dsl::vxlan_endpoints
                .select(diesel::dsl::max(dsl::endpoint_id))
                .first(conn)?
        }
        TunnelType::Gre => {
            use schema::gre_endpoints::dsl;
            dsl::gre_endpoints
                .select(diesel::dsl::max(dsl::endpoint_id))
                .first(conn)?
        }
    };
    Ok(max.unwrap_or(0) + 1)
}

fn insert_endpoint(
    conn: &mut SqliteConnection,
    tunnel: TunnelType,
    ip: &str,
    id: i64,
) -> Result<(), diesel::result::Error> {
    match tunnel {
        TunnelType::Vxlan => {
            use schema::vxlan_endpoints::dsl;
            diesel::insert_into(dsl::vxlan_endpoints)
                .values(&VxlanEndpoint {
                    ip_address: ip.to_string(),
                    endpoint_id: id,
                })
                .execute(conn)?;
        }
        TunnelType::Gre => {
            use schema::gre_endpoints::dsl;
            diesel::insert_into(dsl::gre_endpoints)
                .values(&GreEndpoint {
                    ip_address: ip.to_string(),
                    endpoint_id: id,
                })
                .execute(conn)?;
        }
    }
    Ok(())
}

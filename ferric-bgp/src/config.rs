//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::IpNetwork;
use serde::Deserialize;

use crate::af::AfiSafi;
use crate::packet::consts::AddPathMode;

// Default timer values, overridable per process and per neighbor.
pub const DFLT_HOLDTIME: u16 = 180;
pub const DFLT_CONNECT_RETRY_INTERVAL: u16 = 120;
pub const DFLT_GRACEFUL_RESTART_TIME: u16 = 120;
// Cap of the exponential idle-hold back-off.
pub const MAX_IDLE_HOLD_TIME: u16 = 120;

//
// Validated configuration tree.
//
// The file grammar and its validation live outside the core: by the time
// this structure exists, every field has passed validation. The daemon
// deserialises it from TOML.
//
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub router_id: Ipv4Addr,
    pub asn: u32,
    // Listening addresses. An empty list disables the listener
    // (active-only deployment).
    pub listen: Vec<IpAddr>,
    pub hold_time: u16,
    pub connect_retry_time: u16,
    pub graceful_restart_time: u16,
    // Maximum cumulative TCP connection failures before the reactor exits
    // (0 = unlimited).
    pub max_connect_failures: u32,
    pub neighbors: Vec<NeighborCfg>,
    pub api: Vec<ApiProcessCfg>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NeighborCfg {
    pub remote_addr: IpAddr,
    pub local_addr: Option<IpAddr>,
    pub peer_as: u32,
    pub enabled: bool,
    pub passive: bool,
    pub hold_time: Option<u16>,
    pub keepalive: Option<u16>,
    pub md5_password: Option<String>,
    pub ebgp_multihop_ttl: Option<u8>,
    pub ttl_security: Option<u8>,
    // Address families offered to this neighbor.
    pub families: Vec<AfiSafi>,
    // Per-family ADD-PATH mode.
    pub add_path: BTreeMap<AfiSafi, AddPathMode>,
    pub route_refresh: bool,
    pub extended_message: bool,
    pub graceful_restart: bool,
    pub operational: bool,
    // Routes loaded into the Adj-RIB-Out at session establishment.
    pub routes: Vec<StaticRouteCfg>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticRouteCfg {
    pub prefix: IpNetwork,
    pub next_hop: IpAddr,
    pub med: Option<u32>,
    pub local_preference: Option<u32>,
    pub communities: Option<Vec<u32>>,
    pub path_id: Option<u32>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiProcessCfg {
    pub name: String,
    // Command line, run through the shell.
    pub run: String,
    pub respawn: bool,
    pub encoder: ApiEncoder,
    // Maximum number of buffered event lines per child before the oldest
    // are dropped.
    pub backlog: usize,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiEncoder {
    Text,
    #[default]
    Json,
}

// ===== impl Config =====

impl Default for Config {
    fn default() -> Config {
        Config {
            router_id: Ipv4Addr::UNSPECIFIED,
            asn: 0,
            listen: vec![IpAddr::from(Ipv4Addr::UNSPECIFIED)],
            hold_time: DFLT_HOLDTIME,
            connect_retry_time: DFLT_CONNECT_RETRY_INTERVAL,
            graceful_restart_time: DFLT_GRACEFUL_RESTART_TIME,
            max_connect_failures: 0,
            neighbors: Vec::new(),
            api: Vec::new(),
        }
    }
}

// ===== impl NeighborCfg =====

impl Default for NeighborCfg {
    fn default() -> NeighborCfg {
        NeighborCfg {
            remote_addr: IpAddr::from(Ipv4Addr::UNSPECIFIED),
            local_addr: None,
            peer_as: 0,
            enabled: true,
            passive: false,
            hold_time: None,
            keepalive: None,
            md5_password: None,
            ebgp_multihop_ttl: None,
            ttl_security: None,
            families: vec![AfiSafi::Ipv4Unicast],
            add_path: BTreeMap::new(),
            route_refresh: true,
            extended_message: false,
            graceful_restart: false,
            operational: false,
            routes: Vec::new(),
        }
    }
}

// ===== impl ApiProcessCfg =====

impl Default for ApiProcessCfg {
    fn default() -> ApiProcessCfg {
        ApiProcessCfg {
            name: String::new(),
            run: String::new(),
            respawn: false,
            encoder: ApiEncoder::default(),
            backlog: 10000,
        }
    }
}

//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

//! Process-global codec registration tables.
//!
//! Dispatch sites never switch on numeric codes directly: they look the code
//! up here. Supporting a new address family (or a new EVPN/MVPN/MUP/BGP-LS
//! route type) means writing the handler and adding one registration line
//! below. Kinds with a generic fallback route unknown codes to that
//! fallback; the rest fail with the appropriate decode error.

use std::collections::HashMap;
use std::sync::LazyLock;

use bytes::Bytes;

use crate::af::AfiSafi;
use crate::packet::consts::{
    Afi, BgpLsNlriType, EvpnRouteType, MupRouteType, MvpnRouteType,
};
use crate::packet::error::DecodeResult;
use crate::packet::nlri::bgp_ls::{self, BgpLsValue};
use crate::packet::nlri::evpn::{self, EvpnRoute};
use crate::packet::nlri::mup::{self, MupRoute};
use crate::packet::nlri::mvpn::{self, MvpnRoute};
use crate::packet::nlri::{NlriValue, flow, inet, rtc, vpls};

// Codec entry for one (AFI, SAFI) pair.
//
// `take` splits the canonical bytes of a single NLRI off the front of a
// buffer; `parse` turns canonical bytes into a semantic container.
pub struct NlriCodec {
    pub take: fn(&mut Bytes, AfiSafi) -> DecodeResult<Bytes>,
    pub parse: fn(AfiSafi, Bytes) -> DecodeResult<NlriValue>,
}

pub type EvpnRouteParser = fn(&mut Bytes) -> DecodeResult<EvpnRoute>;
pub type MvpnRouteParser = fn(&mut Bytes) -> DecodeResult<MvpnRoute>;
pub type MupRouteParser = fn(&mut Bytes, Afi) -> DecodeResult<MupRoute>;
pub type BgpLsNlriParser = fn(&mut Bytes, AfiSafi) -> DecodeResult<BgpLsValue>;

static NLRI_CODECS: LazyLock<HashMap<AfiSafi, NlriCodec>> =
    LazyLock::new(|| {
        let mut table = HashMap::new();
        let mut register =
            |family,
             take: fn(&mut Bytes, AfiSafi) -> DecodeResult<Bytes>,
             parse| {
                table.insert(family, NlriCodec { take, parse });
            };

        register(AfiSafi::Ipv4Unicast, inet::take, inet::parse_inet);
        register(AfiSafi::Ipv6Unicast, inet::take, inet::parse_inet);
        register(AfiSafi::Ipv4Multicast, inet::take, inet::parse_inet);
        register(AfiSafi::Ipv6Multicast, inet::take, inet::parse_inet);
        register(AfiSafi::Ipv4NlriMpls, inet::take, inet::parse_label);
        register(AfiSafi::Ipv6NlriMpls, inet::take, inet::parse_label);
        register(AfiSafi::Ipv4MplsVpn, inet::take, inet::parse_ipvpn);
        register(AfiSafi::Ipv6MplsVpn, inet::take, inet::parse_ipvpn);
        register(AfiSafi::Ipv4Flow, flow::take, flow::parse);
        register(AfiSafi::Ipv6Flow, flow::take, flow::parse);
        register(AfiSafi::Ipv4FlowVpn, flow::take, flow::parse);
        register(AfiSafi::Ipv6FlowVpn, flow::take, flow::parse);
        register(AfiSafi::L2vpnEvpn, evpn::take, evpn::parse);
        register(AfiSafi::L2vpnVpls, vpls::take, vpls::parse);
        register(AfiSafi::BgpLs, bgp_ls::take, bgp_ls::parse);
        register(AfiSafi::BgpLsVpn, bgp_ls::take, bgp_ls::parse);
        register(AfiSafi::Ipv4Rtc, rtc::take, rtc::parse);
        register(AfiSafi::Ipv4Mup, mup::take, mup::parse);
        register(AfiSafi::Ipv6Mup, mup::take, mup::parse);
        register(AfiSafi::Ipv4McastVpn, mvpn::take, mvpn::parse);
        register(AfiSafi::Ipv6McastVpn, mvpn::take, mvpn::parse);

        table
    });

static EVPN_ROUTES: LazyLock<HashMap<u8, EvpnRouteParser>> =
    LazyLock::new(|| {
        let mut table: HashMap<u8, EvpnRouteParser> = HashMap::new();

        table.insert(
            EvpnRouteType::EthernetAutoDiscovery as u8,
            evpn::parse_auto_discovery,
        );
        table.insert(
            EvpnRouteType::MacIpAdvertisement as u8,
            evpn::parse_mac_ip,
        );
        table.insert(
            EvpnRouteType::InclusiveMulticastEthernetTag as u8,
            evpn::parse_multicast,
        );
        table.insert(
            EvpnRouteType::EthernetSegment as u8,
            evpn::parse_ethernet_segment,
        );
        table.insert(EvpnRouteType::IpPrefix as u8, evpn::parse_ip_prefix);

        table
    });

static MVPN_ROUTES: LazyLock<HashMap<u8, MvpnRouteParser>> =
    LazyLock::new(|| {
        let mut table: HashMap<u8, MvpnRouteParser> = HashMap::new();

        table.insert(
            MvpnRouteType::IntraAsIPmsiAd as u8,
            mvpn::parse_intra_as_i_pmsi,
        );
        table.insert(
            MvpnRouteType::InterAsIPmsiAd as u8,
            mvpn::parse_inter_as_i_pmsi,
        );
        table.insert(MvpnRouteType::SPmsiAd as u8, mvpn::parse_s_pmsi);

        table
    });

static MUP_ROUTES: LazyLock<HashMap<u16, MupRouteParser>> =
    LazyLock::new(|| {
        let mut table: HashMap<u16, MupRouteParser> = HashMap::new();

        table.insert(
            MupRouteType::InterworkSegmentDiscovery as u16,
            mup::parse_isd,
        );
        table.insert(
            MupRouteType::DirectSegmentDiscovery as u16,
            mup::parse_dsd,
        );

        table
    });

static BGP_LS_NLRIS: LazyLock<HashMap<u16, BgpLsNlriParser>> =
    LazyLock::new(|| {
        let mut table: HashMap<u16, BgpLsNlriParser> = HashMap::new();

        table.insert(BgpLsNlriType::Node as u16, bgp_ls::parse_link_state);
        table.insert(BgpLsNlriType::Link as u16, bgp_ls::parse_link_state);
        table
            .insert(BgpLsNlriType::Ipv4Prefix as u16, bgp_ls::parse_link_state);
        table
            .insert(BgpLsNlriType::Ipv6Prefix as u16, bgp_ls::parse_link_state);
        table.insert(BgpLsNlriType::Srv6Sid as u16, bgp_ls::parse_link_state);

        table
    });

// ===== global functions =====

// Looks up the NLRI codec registered for the given address family.
pub fn nlri_codec(family: AfiSafi) -> Option<&'static NlriCodec> {
    NLRI_CODECS.get(&family)
}

// Looks up the parser for an EVPN route type.
pub fn evpn_route_parser(route_type: u8) -> Option<EvpnRouteParser> {
    EVPN_ROUTES.get(&route_type).copied()
}

// Looks up the parser for an MCAST-VPN route type.
pub fn mvpn_route_parser(route_type: u8) -> Option<MvpnRouteParser> {
    MVPN_ROUTES.get(&route_type).copied()
}

// Looks up the parser for a BGP-MUP route type.
pub fn mup_route_parser(route_type: u16) -> Option<MupRouteParser> {
    MUP_ROUTES.get(&route_type).copied()
}

// Looks up the parser for a BGP-LS NLRI type.
pub fn bgp_ls_nlri_parser(nlri_type: u16) -> Option<BgpLsNlriParser> {
    BGP_LS_NLRIS.get(&nlri_type).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_family_has_a_codec() {
        for family in AfiSafi::ALL {
            assert!(nlri_codec(family).is_some(), "{family} not registered");
        }
    }

    #[test]
    fn unknown_subtypes_have_no_parser() {
        assert!(evpn_route_parser(200).is_none());
        assert!(mvpn_route_parser(200).is_none());
        assert!(mup_route_parser(200).is_none());
        assert!(bgp_ls_nlri_parser(200).is_none());
    }
}

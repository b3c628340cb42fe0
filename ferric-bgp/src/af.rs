//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

use crate::packet::consts::{Afi, Safi};

// Supported (AFI, SAFI) tuples.
//
// Each variant is a cached singleton: two tuples decoded from the same wire
// bytes always compare equal and hash identically. Pairs outside this set are
// representable on the wire but unsupported by the speaker.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AfiSafi {
    Ipv4Unicast,
    Ipv6Unicast,
    Ipv4Multicast,
    Ipv6Multicast,
    Ipv4NlriMpls,
    Ipv6NlriMpls,
    Ipv4MplsVpn,
    Ipv6MplsVpn,
    Ipv4Flow,
    Ipv6Flow,
    Ipv4FlowVpn,
    Ipv6FlowVpn,
    L2vpnEvpn,
    L2vpnVpls,
    BgpLs,
    BgpLsVpn,
    Ipv4Rtc,
    Ipv4Mup,
    Ipv6Mup,
    Ipv4McastVpn,
    Ipv6McastVpn,
}

// ===== impl AfiSafi =====

impl AfiSafi {
    // All supported tuples, in registration order.
    pub const ALL: [AfiSafi; 21] = [
        AfiSafi::Ipv4Unicast,
        AfiSafi::Ipv6Unicast,
        AfiSafi::Ipv4Multicast,
        AfiSafi::Ipv6Multicast,
        AfiSafi::Ipv4NlriMpls,
        AfiSafi::Ipv6NlriMpls,
        AfiSafi::Ipv4MplsVpn,
        AfiSafi::Ipv6MplsVpn,
        AfiSafi::Ipv4Flow,
        AfiSafi::Ipv6Flow,
        AfiSafi::Ipv4FlowVpn,
        AfiSafi::Ipv6FlowVpn,
        AfiSafi::L2vpnEvpn,
        AfiSafi::L2vpnVpls,
        AfiSafi::BgpLs,
        AfiSafi::BgpLsVpn,
        AfiSafi::Ipv4Rtc,
        AfiSafi::Ipv4Mup,
        AfiSafi::Ipv6Mup,
        AfiSafi::Ipv4McastVpn,
        AfiSafi::Ipv6McastVpn,
    ];

    pub fn afi(&self) -> Afi {
        match self {
            AfiSafi::Ipv4Unicast
            | AfiSafi::Ipv4Multicast
            | AfiSafi::Ipv4NlriMpls
            | AfiSafi::Ipv4MplsVpn
            | AfiSafi::Ipv4Flow
            | AfiSafi::Ipv4FlowVpn
            | AfiSafi::Ipv4Rtc
            | AfiSafi::Ipv4Mup
            | AfiSafi::Ipv4McastVpn => Afi::Ipv4,
            AfiSafi::Ipv6Unicast
            | AfiSafi::Ipv6Multicast
            | AfiSafi::Ipv6NlriMpls
            | AfiSafi::Ipv6MplsVpn
            | AfiSafi::Ipv6Flow
            | AfiSafi::Ipv6FlowVpn
            | AfiSafi::Ipv6Mup
            | AfiSafi::Ipv6McastVpn => Afi::Ipv6,
            AfiSafi::L2vpnEvpn | AfiSafi::L2vpnVpls => Afi::L2vpn,
            AfiSafi::BgpLs | AfiSafi::BgpLsVpn => Afi::BgpLs,
        }
    }

    pub fn safi(&self) -> Safi {
        match self {
            AfiSafi::Ipv4Unicast | AfiSafi::Ipv6Unicast => Safi::Unicast,
            AfiSafi::Ipv4Multicast | AfiSafi::Ipv6Multicast => Safi::Multicast,
            AfiSafi::Ipv4NlriMpls | AfiSafi::Ipv6NlriMpls => Safi::NlriMpls,
            AfiSafi::Ipv4MplsVpn | AfiSafi::Ipv6MplsVpn => Safi::MplsVpn,
            AfiSafi::Ipv4Flow | AfiSafi::Ipv6Flow => Safi::Flow,
            AfiSafi::Ipv4FlowVpn | AfiSafi::Ipv6FlowVpn => Safi::FlowVpn,
            AfiSafi::L2vpnEvpn => Safi::Evpn,
            AfiSafi::L2vpnVpls => Safi::Vpls,
            AfiSafi::BgpLs => Safi::BgpLs,
            AfiSafi::BgpLsVpn => Safi::BgpLsVpn,
            AfiSafi::Ipv4Rtc => Safi::RouteTarget,
            AfiSafi::Ipv4Mup | AfiSafi::Ipv6Mup => Safi::Mup,
            AfiSafi::Ipv4McastVpn | AfiSafi::Ipv6McastVpn => Safi::McastVpn,
        }
    }

    pub fn from_pair(afi: Afi, safi: Safi) -> Option<AfiSafi> {
        AfiSafi::ALL
            .into_iter()
            .find(|af| af.afi() == afi && af.safi() == safi)
    }
}

impl std::fmt::Display for AfiSafi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AfiSafi::Ipv4Unicast => "ipv4-unicast",
            AfiSafi::Ipv6Unicast => "ipv6-unicast",
            AfiSafi::Ipv4Multicast => "ipv4-multicast",
            AfiSafi::Ipv6Multicast => "ipv6-multicast",
            AfiSafi::Ipv4NlriMpls => "ipv4-nlri-mpls",
            AfiSafi::Ipv6NlriMpls => "ipv6-nlri-mpls",
            AfiSafi::Ipv4MplsVpn => "ipv4-mpls-vpn",
            AfiSafi::Ipv6MplsVpn => "ipv6-mpls-vpn",
            AfiSafi::Ipv4Flow => "ipv4-flow",
            AfiSafi::Ipv6Flow => "ipv6-flow",
            AfiSafi::Ipv4FlowVpn => "ipv4-flow-vpn",
            AfiSafi::Ipv6FlowVpn => "ipv6-flow-vpn",
            AfiSafi::L2vpnEvpn => "l2vpn-evpn",
            AfiSafi::L2vpnVpls => "l2vpn-vpls",
            AfiSafi::BgpLs => "bgp-ls",
            AfiSafi::BgpLsVpn => "bgp-ls-vpn",
            AfiSafi::Ipv4Rtc => "ipv4-rtc",
            AfiSafi::Ipv4Mup => "ipv4-mup",
            AfiSafi::Ipv6Mup => "ipv6-mup",
            AfiSafi::Ipv4McastVpn => "ipv4-mcast-vpn",
            AfiSafi::Ipv6McastVpn => "ipv6-mcast-vpn",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn afi_safi_pair_round_trip() {
        for af in AfiSafi::ALL {
            assert_eq!(AfiSafi::from_pair(af.afi(), af.safi()), Some(af));
        }
    }

    #[test]
    fn afi_safi_unknown_pair() {
        assert_eq!(AfiSafi::from_pair(Afi::L2vpn, Safi::Unicast), None);
        assert_eq!(AfiSafi::from_pair(Afi::Ipv4, Safi::Evpn), None);
    }
}

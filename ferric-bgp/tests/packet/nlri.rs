//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::str::FromStr;

use bytes::Bytes;
use ferric_bgp::af::AfiSafi;
use ferric_bgp::packet::nlri::evpn::{Esi, EvpnRoute, MacAddr};
use ferric_bgp::packet::nlri::flow::{FlowRule, FLOW_DEST_PREFIX};
use ferric_bgp::packet::nlri::mup::MupRoute;
use ferric_bgp::packet::nlri::mvpn::MvpnRoute;
use ferric_bgp::packet::nlri::bgp_ls::BgpLsValue;
use ferric_bgp::packet::nlri::{
    BgpLsNlri, EvpnNlri, FlowNlri, IpvpnNlri, LabelNlri, LabelStack,
    MupNlri, MvpnNlri, Nlri, NlriValue, RouteDistinguisher, RtcNlri,
    VplsNlri,
};
use ipnetwork::IpNetwork;

//
// Helper functions.
//

// Decodes the canonical bytes, validates the fingerprint, checks the
// semantic view, then packs the view back and compares.
fn test_nlri(family: AfiSafi, bytes: &[u8], expected: &NlriValue) {
    let mut buf = Bytes::copy_from_slice(bytes);
    let nlri = Nlri::decode(family, &mut buf, false).unwrap();
    assert_eq!(buf.len(), 0, "trailing bytes after NLRI");
    assert_eq!(nlri.bytes().as_ref(), bytes, "canonical bytes mismatch");
    assert_eq!(nlri.family(), family);

    let value = nlri.parse().unwrap();
    assert_eq!(&value, expected);

    // Packing the semantic view regenerates the identical fingerprint.
    let packed = value.pack(None);
    assert_eq!(packed, nlri);
}

fn rd(asn: u16, number: u32) -> RouteDistinguisher {
    let mut rd = [0; 8];
    rd[2..4].copy_from_slice(&asn.to_be_bytes());
    rd[4..8].copy_from_slice(&number.to_be_bytes());
    RouteDistinguisher(rd)
}

//
// Tests.
//

#[test]
fn test_nlri_label() {
    test_nlri(
        AfiSafi::Ipv4NlriMpls,
        &[0x30, 0x03, 0xe8, 0x01, 0x0a, 0x01, 0x01],
        &NlriValue::Label(LabelNlri {
            family: AfiSafi::Ipv4NlriMpls,
            labels: LabelStack(vec![16000]),
            prefix: IpNetwork::from_str("10.1.1.0/24").unwrap(),
        }),
    );
}

#[test]
fn test_nlri_ipvpn() {
    test_nlri(
        AfiSafi::Ipv4MplsVpn,
        &[
            0x70, 0x00, 0x7d, 0x01, 0x00, 0x00, 0xfd, 0xe8, 0x00, 0x00, 0x00,
            0x01, 0x0a, 0x02, 0x00,
        ],
        &NlriValue::Ipvpn(IpvpnNlri {
            family: AfiSafi::Ipv4MplsVpn,
            labels: LabelStack(vec![2000]),
            rd: rd(65000, 1),
            prefix: IpNetwork::from_str("10.2.0.0/24").unwrap(),
        }),
    );
}

#[test]
fn test_nlri_vpls() {
    test_nlri(
        AfiSafi::L2vpnVpls,
        &[
            0x00, 0x11, 0x00, 0x00, 0xfd, 0xe8, 0x00, 0x00, 0x00, 0x02, 0x00,
            0x05, 0x00, 0x00, 0x00, 0x0a, 0x00, 0x03, 0xe8,
        ],
        &NlriValue::Vpls(VplsNlri {
            rd: rd(65000, 2),
            ve_id: 5,
            ve_block_offset: 0,
            ve_block_size: 10,
            label_base: 1000,
        }),
    );
}

#[test]
fn test_nlri_flow() {
    // Destination 10.0.1.0/24, protocol == 6.
    test_nlri(
        AfiSafi::Ipv4Flow,
        &[0x08, 0x01, 0x18, 0x0a, 0x00, 0x01, 0x03, 0x81, 0x06],
        &NlriValue::Flow(FlowNlri {
            family: AfiSafi::Ipv4Flow,
            rd: None,
            rules: vec![
                FlowRule {
                    component: FLOW_DEST_PREFIX,
                    data: Bytes::from_static(&[0x18, 0x0a, 0x00, 0x01]),
                },
                FlowRule {
                    component: 3,
                    data: Bytes::from_static(&[0x81, 0x06]),
                },
            ],
        }),
    );
}

#[test]
fn test_nlri_evpn_mac_ip() {
    test_nlri(
        AfiSafi::L2vpnEvpn,
        &[
            0x02, 0x25,
            // RD 65000:3.
            0x00, 0x00, 0xfd, 0xe8, 0x00, 0x00, 0x00, 0x03,
            // ESI.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            // Ethernet tag.
            0x00, 0x00, 0x00, 0x64,
            // MAC address.
            0x30, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
            // IP address.
            0x20, 0x0a, 0x00, 0x00, 0x01,
            // MPLS label 1.
            0x00, 0x00, 0x00,
        ],
        &NlriValue::Evpn(EvpnNlri {
            route_type: 2,
            route: EvpnRoute::MacIpAdvertisement {
                rd: rd(65000, 3),
                esi: Esi([0; 10]),
                eth_tag: 100,
                mac: MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
                ip: Some(IpAddr::from_str("10.0.0.1").unwrap()),
                label1: 0,
                label2: None,
            },
        }),
    );
}

#[test]
fn test_nlri_evpn_generic() {
    // Unknown route type 9 is preserved as opaque bytes.
    test_nlri(
        AfiSafi::L2vpnEvpn,
        &[0x09, 0x04, 0xde, 0xad, 0xbe, 0xef],
        &NlriValue::Evpn(EvpnNlri {
            route_type: 9,
            route: EvpnRoute::Generic(Bytes::from_static(&[
                0xde, 0xad, 0xbe, 0xef,
            ])),
        }),
    );
}

#[test]
fn test_nlri_mvpn() {
    test_nlri(
        AfiSafi::Ipv4McastVpn,
        &[
            0x01, 0x0c, 0x00, 0x00, 0xfd, 0xe8, 0x00, 0x00, 0x00, 0x04, 0x0a,
            0x00, 0x00, 0x01,
        ],
        &NlriValue::Mvpn(MvpnNlri {
            family: AfiSafi::Ipv4McastVpn,
            route_type: 1,
            route: MvpnRoute::IntraAsIPmsiAd {
                rd: rd(65000, 4),
                originator: IpAddr::from_str("10.0.0.1").unwrap(),
            },
        }),
    );
}

#[test]
fn test_nlri_mup() {
    test_nlri(
        AfiSafi::Ipv4Mup,
        &[
            0x01, 0x00, 0x01, 0x0c, 0x00, 0x00, 0xfd, 0xe8, 0x00, 0x00, 0x00,
            0x05, 0x18, 0x0a, 0x00, 0x00,
        ],
        &NlriValue::Mup(MupNlri {
            family: AfiSafi::Ipv4Mup,
            arch_type: 1,
            route_type: 1,
            route: MupRoute::InterworkSegmentDiscovery {
                rd: rd(65000, 5),
                prefix_len: 24,
                prefix: IpAddr::from_str("10.0.0.0").unwrap(),
            },
        }),
    );
}

#[test]
fn test_nlri_rtc() {
    test_nlri(
        AfiSafi::Ipv4Rtc,
        &[
            0x60, 0x00, 0x00, 0xfd, 0xe8, 0x00, 0x02, 0xfd, 0xe8, 0x00, 0x00,
            0x00, 0x06,
        ],
        &NlriValue::Rtc(RtcNlri {
            prefix_len: 96,
            origin_as: 65000,
            route_target: Bytes::from_static(&[
                0x00, 0x02, 0xfd, 0xe8, 0x00, 0x00, 0x00, 0x06,
            ]),
        }),
    );
}

#[test]
fn test_nlri_rtc_default() {
    test_nlri(
        AfiSafi::Ipv4Rtc,
        &[0x00],
        &NlriValue::Rtc(RtcNlri {
            prefix_len: 0,
            origin_as: 0,
            route_target: Bytes::new(),
        }),
    );
}

#[test]
fn test_nlri_bgp_ls_node() {
    test_nlri(
        AfiSafi::BgpLs,
        &[
            0x00, 0x01, 0x00, 0x11,
            // Protocol-ID: IS-IS level 2.
            0x02,
            // Identifier.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
            // Node descriptors (opaque).
            0x01, 0x00, 0x00, 0x04, 0x00, 0x00, 0xfd, 0xe8,
        ],
        &NlriValue::BgpLs(BgpLsNlri {
            family: AfiSafi::BgpLs,
            nlri_type: 1,
            value: BgpLsValue::LinkState {
                rd: None,
                protocol_id: 2,
                identifier: 1,
                descriptors: Bytes::from_static(&[
                    0x01, 0x00, 0x00, 0x04, 0x00, 0x00, 0xfd, 0xe8,
                ]),
            },
        }),
    );
}

#[test]
fn test_nlri_bgp_ls_generic() {
    // Unknown link-state NLRI type 5 is preserved as opaque bytes.
    test_nlri(
        AfiSafi::BgpLs,
        &[0x00, 0x05, 0x00, 0x03, 0x01, 0x02, 0x03],
        &NlriValue::BgpLs(BgpLsNlri {
            family: AfiSafi::BgpLs,
            nlri_type: 5,
            value: BgpLsValue::Generic(Bytes::from_static(&[
                0x01, 0x02, 0x03,
            ])),
        }),
    );
}

#[test]
fn test_nlri_fingerprint_stability() {
    let bytes = [0x10, 0x0a, 0x64];
    let mut buf = Bytes::copy_from_slice(&bytes);
    let first = Nlri::decode(AfiSafi::Ipv4Unicast, &mut buf, false).unwrap();
    let mut buf = Bytes::copy_from_slice(&bytes);
    let second = Nlri::decode(AfiSafi::Ipv4Unicast, &mut buf, false).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.bytes(), second.bytes());

    // Re-encoding the parsed view keeps the fingerprint.
    let repacked = first.parse().unwrap().pack(first.path_id());
    assert_eq!(repacked, first);
}

#[test]
fn test_nlri_addpath_wire_format() {
    let bytes = [0x00, 0x00, 0x00, 0x02, 0x18, 0x0a, 0x32, 0x00];
    let mut buf = Bytes::copy_from_slice(&bytes);
    let nlri = Nlri::decode(AfiSafi::Ipv4Unicast, &mut buf, true).unwrap();

    assert_eq!(nlri.path_id(), Some(2));
    assert_eq!(nlri.bytes().as_ref(), &bytes[4..]);
}

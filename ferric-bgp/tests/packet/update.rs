//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock as Lazy;

use ferric_bgp::af::AfiSafi;
use ferric_bgp::neighbor::PeerType;
use ferric_bgp::packet::attribute::{
    AsPath, AsPathSegment, Attrs, BaseAttrs,
};
use ferric_bgp::packet::consts::{AsPathSegmentType, Origin};
use ferric_bgp::packet::error::{DecodeError, UpdateMessageError};
use ferric_bgp::packet::message::{
    DecodeCxt, Message, Negotiated, UpdateMsg,
};
use ferric_bgp::packet::nlri::{InetNlri, Nlri, NlriValue};
use ipnetwork::IpNetwork;

use super::{
    test_decode_msg, test_decode_msg_nego, test_encode_msg,
    test_encode_msg_nego,
};

//
// Helper functions.
//

fn inet_nlri(family: AfiSafi, prefix: &str, path_id: Option<u32>) -> Nlri {
    NlriValue::Inet(InetNlri {
        family,
        prefix: IpNetwork::from_str(prefix).unwrap(),
    })
    .pack(path_id)
}

fn attrs(as_path_members: &[u32], nexthop: &str) -> Attrs {
    let mut segments = VecDeque::new();
    if !as_path_members.is_empty() {
        segments.push_back(AsPathSegment {
            seg_type: AsPathSegmentType::Sequence,
            members: as_path_members.iter().copied().collect(),
        });
    }
    Attrs {
        base: BaseAttrs {
            origin: Origin::Igp,
            as_path: AsPath { segments },
            as4_path: None,
            nexthop: Some(IpAddr::from_str(nexthop).unwrap()),
            ll_nexthop: None,
            med: None,
            local_pref: None,
            aggregator: None,
            as4_aggregator: None,
            atomic_aggregate: false,
            originator_id: None,
            cluster_list: None,
        },
        comm: None,
        ext_comm: None,
        extv6_comm: None,
        large_comm: None,
        aigp: None,
        pmsi_tunnel: None,
        prefix_sid: None,
        unknown: vec![],
    }
}

fn addpath_nego() -> Negotiated {
    Negotiated {
        four_octet_as: true,
        addpath_tx: [AfiSafi::Ipv4Unicast].into(),
        addpath_rx: [AfiSafi::Ipv4Unicast].into(),
        ..Default::default()
    }
}

//
// Test vectors.
//

// Classic IPv4 unicast announcement.
static UPDATE1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x2e, 0x02, 0x00, 0x00, 0x00,
            0x14,
            // ORIGIN: IGP.
            0x40, 0x01, 0x01, 0x00,
            // AS_PATH: sequence [65000].
            0x40, 0x02, 0x06, 0x02, 0x01, 0x00, 0x00, 0xfd, 0xe8,
            // NEXT_HOP: 10.0.0.1.
            0x40, 0x03, 0x04, 0x0a, 0x00, 0x00, 0x01,
            // NLRI: 10.100.0.0/16.
            0x10, 0x0a, 0x64,
        ],
        Message::Update(Box::new(UpdateMsg {
            reach: vec![inet_nlri(
                AfiSafi::Ipv4Unicast,
                "10.100.0.0/16",
                None,
            )],
            unreach: vec![],
            attrs: Some(attrs(&[65000], "10.0.0.1")),
            eor: None,
        })),
    )
});

// Classic IPv4 unicast withdrawal.
static UPDATE2: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x1b, 0x02, 0x00, 0x04, 0x18,
            0x0a, 0xc8, 0x00, 0x00, 0x00,
        ],
        Message::Update(Box::new(UpdateMsg {
            reach: vec![],
            unreach: vec![inet_nlri(
                AfiSafi::Ipv4Unicast,
                "10.200.0.0/24",
                None,
            )],
            attrs: None,
            eor: None,
        })),
    )
});

// IPv4 unicast End-of-RIB.
static UPDATE3: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x17, 0x02, 0x00, 0x00, 0x00,
            0x00,
        ],
        Message::Update(Box::new(UpdateMsg::eor(AfiSafi::Ipv4Unicast))),
    )
});

// IPv6 unicast announcement carried in MP_REACH_NLRI.
static UPDATE4: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x41, 0x02, 0x00, 0x00, 0x00,
            0x2a,
            // MP_REACH_NLRI: ipv6-unicast, nexthop 2001:db8::1,
            // 2001:db8::/32.
            0x80, 0x0e, 0x1a, 0x00, 0x02, 0x01, 0x10, 0x20, 0x01, 0x0d, 0xb8,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x20, 0x20, 0x01, 0x0d, 0xb8,
            // ORIGIN: IGP.
            0x40, 0x01, 0x01, 0x00,
            // AS_PATH: sequence [65000].
            0x40, 0x02, 0x06, 0x02, 0x01, 0x00, 0x00, 0xfd, 0xe8,
        ],
        Message::Update(Box::new(UpdateMsg {
            reach: vec![inet_nlri(
                AfiSafi::Ipv6Unicast,
                "2001:db8::/32",
                None,
            )],
            unreach: vec![],
            attrs: Some(attrs(&[65000], "2001:db8::1")),
            eor: None,
        })),
    )
});

// IPv6 unicast End-of-RIB: an empty MP_UNREACH_NLRI.
static UPDATE5: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x1d, 0x02, 0x00, 0x00, 0x00,
            0x06, 0x80, 0x0f, 0x03, 0x00, 0x02, 0x01,
        ],
        Message::Update(Box::new(UpdateMsg::eor(AfiSafi::Ipv6Unicast))),
    )
});

// ADD-PATH announcement: path identifier 1 ahead of the prefix.
static UPDATE6: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x33, 0x02, 0x00, 0x00, 0x00,
            0x14,
            // ORIGIN: IGP.
            0x40, 0x01, 0x01, 0x00,
            // AS_PATH: sequence [65001].
            0x40, 0x02, 0x06, 0x02, 0x01, 0x00, 0x00, 0xfd, 0xe9,
            // NEXT_HOP: 10.0.0.5.
            0x40, 0x03, 0x04, 0x0a, 0x00, 0x00, 0x05,
            // NLRI: path-id 1, 10.50.0.0/24.
            0x00, 0x00, 0x00, 0x01, 0x18, 0x0a, 0x32, 0x00,
        ],
        Message::Update(Box::new(UpdateMsg {
            reach: vec![inet_nlri(
                AfiSafi::Ipv4Unicast,
                "10.50.0.0/24",
                Some(1),
            )],
            unreach: vec![],
            attrs: Some(attrs(&[65001], "10.0.0.5")),
            eor: None,
        })),
    )
});

// Four-octet AS number downgrade: AS_TRANS in AS_PATH, the real path in
// AS4_PATH.
static UPDATE7: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x35, 0x02, 0x00, 0x00, 0x00,
            0x1b,
            // ORIGIN: IGP.
            0x40, 0x01, 0x01, 0x00,
            // AS_PATH: sequence [23456].
            0x40, 0x02, 0x04, 0x02, 0x01, 0x5b, 0xa0,
            // NEXT_HOP: 10.0.0.1.
            0x40, 0x03, 0x04, 0x0a, 0x00, 0x00, 0x01,
            // AS4_PATH: sequence [70000].
            0xc0, 0x11, 0x06, 0x02, 0x01, 0x00, 0x01, 0x11, 0x70,
            // NLRI: 10.100.0.0/16.
            0x10, 0x0a, 0x64,
        ],
        Message::Update(Box::new(UpdateMsg {
            reach: vec![inet_nlri(
                AfiSafi::Ipv4Unicast,
                "10.100.0.0/16",
                None,
            )],
            unreach: vec![],
            attrs: Some(attrs(&[70000], "10.0.0.1")),
            eor: None,
        })),
    )
});

#[test]
fn test_encode_update1() {
    let (ref bytes, ref msg) = *UPDATE1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update1() {
    let (ref bytes, ref msg) = *UPDATE1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_update2() {
    let (ref bytes, ref msg) = *UPDATE2;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update2() {
    let (ref bytes, ref msg) = *UPDATE2;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_update3() {
    let (ref bytes, ref msg) = *UPDATE3;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update3() {
    let (ref bytes, ref msg) = *UPDATE3;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_update4() {
    let (ref bytes, ref msg) = *UPDATE4;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update4() {
    let (ref bytes, ref msg) = *UPDATE4;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_update5() {
    let (ref bytes, ref msg) = *UPDATE5;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update5() {
    let (ref bytes, ref msg) = *UPDATE5;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_update6() {
    let (ref bytes, ref msg) = *UPDATE6;
    test_encode_msg_nego(bytes, msg, addpath_nego());
}

#[test]
fn test_decode_update6() {
    let (ref bytes, ref msg) = *UPDATE6;
    test_decode_msg_nego(bytes, msg, addpath_nego());
}

// Encoding with ADD-PATH disabled drops the path identifier from the wire.
#[test]
fn test_encode_update6_no_addpath() {
    let (_, ref msg) = *UPDATE6;
    let Message::Update(update) = msg else {
        unreachable!();
    };
    let nlri = &update.reach[0];

    let mut with = bytes::BytesMut::new();
    nlri.encode(&mut with, true);
    let mut without = bytes::BytesMut::new();
    nlri.encode(&mut without, false);

    assert_eq!(with.len(), without.len() + 4);
    assert_eq!(&with[0..4], &1u32.to_be_bytes());
    assert_eq!(&with[4..], &without[..]);
}

#[test]
fn test_encode_update7() {
    let (ref bytes, ref msg) = *UPDATE7;
    let nego = Negotiated::default();
    test_encode_msg_nego(bytes, msg, nego);
}

#[test]
fn test_decode_update7() {
    let (ref bytes, ref msg) = *UPDATE7;
    let nego = Negotiated::default();
    test_decode_msg_nego(bytes, msg, nego);
}

// A malformed ORIGIN (wrong attribute length) resets the session with the
// Attribute-Length-Error subcode.
#[test]
fn test_decode_malformed_origin() {
    let bytes = vec![
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x1c, 0x02, 0x00, 0x00, 0x00,
        0x05, 0x40, 0x01, 0x02, 0x00, 0x00,
    ];
    let cxt = DecodeCxt {
        peer_type: PeerType::External,
        peer_as: 65001,
        nego: Negotiated::default(),
    };

    let result = Message::decode(&bytes, &cxt);
    assert_eq!(
        result,
        Err(DecodeError::UpdateMessage(
            UpdateMessageError::AttributeLengthError
        ))
    );
}

//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::LazyLock as Lazy;

use ferric_bgp::packet::consts::{
    AddPathMode, Afi, BGP_VERSION, Safi,
};
use ferric_bgp::packet::message::{
    AddPathTuple, Capability, GracefulRestartTuple, Message, OpenMsg,
};
use maplit::btreeset;

use super::{test_decode_msg, test_encode_msg};

static OPEN1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x1d, 0x01, 0x04, 0xfd, 0xe8,
            0x00, 0x5a, 0x0a, 0x00, 0x00, 0x01, 0x00,
        ],
        Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as: 65000,
            holdtime: 90,
            identifier: Ipv4Addr::from_str("10.0.0.1").unwrap(),
            capabilities: btreeset![],
        }),
    )
});

static OPEN2: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x31, 0x01, 0x04, 0xfd, 0xe8,
            0x00, 0x5a, 0x0a, 0x00, 0x00, 0x01, 0x14, 0x02, 0x06, 0x01, 0x04,
            0x00, 0x01, 0x00, 0x01, 0x02, 0x02, 0x02, 0x00, 0x02, 0x06, 0x41,
            0x04, 0x00, 0x00, 0xfd, 0xe8,
        ],
        Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as: 65000,
            holdtime: 90,
            identifier: Ipv4Addr::from_str("10.0.0.1").unwrap(),
            capabilities: btreeset![
                Capability::MultiProtocol {
                    afi: Afi::Ipv4,
                    safi: Safi::Unicast,
                },
                Capability::RouteRefresh,
                Capability::FourOctetAsNumber { asn: 65000 },
            ],
        }),
    )
});

static OPEN3: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x43, 0x01, 0x04, 0xfd, 0xe8,
            0x00, 0x5a, 0x0a, 0x00, 0x00, 0x01, 0x26,
            // Multiprotocol: IPv4 unicast.
            0x02, 0x06, 0x01, 0x04, 0x00, 0x01, 0x00, 0x01,
            // Extended Message.
            0x02, 0x02, 0x06, 0x00,
            // Graceful Restart: time 120, IPv4 unicast.
            0x02, 0x08, 0x40, 0x06, 0x00, 0x78, 0x00, 0x01, 0x01, 0x00,
            // Four-octet AS number.
            0x02, 0x06, 0x41, 0x04, 0x00, 0x00, 0xfd, 0xe8,
            // ADD-PATH: IPv4 unicast, receive+send.
            0x02, 0x06, 0x45, 0x04, 0x00, 0x01, 0x01, 0x03,
        ],
        Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as: 65000,
            holdtime: 90,
            identifier: Ipv4Addr::from_str("10.0.0.1").unwrap(),
            capabilities: btreeset![
                Capability::MultiProtocol {
                    afi: Afi::Ipv4,
                    safi: Safi::Unicast,
                },
                Capability::ExtendedMessage,
                Capability::GracefulRestart {
                    restart_state: false,
                    restart_time: 120,
                    families: btreeset![GracefulRestartTuple {
                        afi: Afi::Ipv4,
                        safi: Safi::Unicast,
                        forwarding: false,
                    }],
                },
                Capability::FourOctetAsNumber { asn: 65000 },
                Capability::AddPath(btreeset![AddPathTuple {
                    afi: Afi::Ipv4,
                    safi: Safi::Unicast,
                    mode: AddPathMode::ReceiveSend,
                }]),
            ],
        }),
    )
});

#[test]
fn test_encode_open1() {
    let (ref bytes, ref msg) = *OPEN1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_open1() {
    let (ref bytes, ref msg) = *OPEN1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_open2() {
    let (ref bytes, ref msg) = *OPEN2;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_open2() {
    let (ref bytes, ref msg) = *OPEN2;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_open3() {
    let (ref bytes, ref msg) = *OPEN3;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_open3() {
    let (ref bytes, ref msg) = *OPEN3;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_open_real_as() {
    let (_, ref msg) = *OPEN2;
    let Message::Open(msg) = msg else {
        unreachable!();
    };
    assert_eq!(msg.real_as(), 65000);
}

//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use bytes::Bytes;
use ferric_bgp::packet::message::{Message, OperationalMsg};

use super::{test_decode_msg, test_encode_msg};

static OPERATIONAL1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x17, 0x06, 0x00, 0x03, 0x00,
            0x00,
        ],
        Message::Operational(OperationalMsg {
            code: 3,
            payload: Bytes::new(),
        }),
    )
});

static OPERATIONAL2: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x1b, 0x06, 0x00, 0x01, 0x00,
            0x04, 0x64, 0x6f, 0x77, 0x6e,
        ],
        Message::Operational(OperationalMsg {
            code: 1,
            payload: Bytes::from_static(b"down"),
        }),
    )
});

#[test]
fn test_encode_operational1() {
    let (ref bytes, ref msg) = *OPERATIONAL1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_operational1() {
    let (ref bytes, ref msg) = *OPERATIONAL1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_operational2() {
    let (ref bytes, ref msg) = *OPERATIONAL2;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_operational2() {
    let (ref bytes, ref msg) = *OPERATIONAL2;
    test_decode_msg(bytes, msg);
}

//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use ferric_bgp::packet::message::{Message, NotificationMsg};

use super::{test_decode_msg, test_encode_msg};

// Cease / Administrative Shutdown.
static NOTIFICATION1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x15, 0x03, 0x06, 0x02,
        ],
        Message::Notification(NotificationMsg {
            error_code: 6,
            error_subcode: 2,
            data: vec![],
        }),
    )
});

// Hold Timer Expired.
static NOTIFICATION2: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x15, 0x03, 0x04, 0x00,
        ],
        Message::Notification(NotificationMsg {
            error_code: 4,
            error_subcode: 0,
            data: vec![],
        }),
    )
});

#[test]
fn test_encode_notification1() {
    let (ref bytes, ref msg) = *NOTIFICATION1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_notification1() {
    let (ref bytes, ref msg) = *NOTIFICATION1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_notification2() {
    let (ref bytes, ref msg) = *NOTIFICATION2;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_notification2() {
    let (ref bytes, ref msg) = *NOTIFICATION2;
    test_decode_msg(bytes, msg);
}

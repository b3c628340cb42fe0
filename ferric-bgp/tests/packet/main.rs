//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

mod keepalive;
mod nlri;
mod notification;
mod open;
mod operational;
mod route_refresh;
mod update;

use ferric_bgp::neighbor::PeerType;
use ferric_bgp::packet::message::{
    DecodeCxt, EncodeCxt, Message, Negotiated,
};

//
// Helper functions.
//

fn default_nego() -> Negotiated {
    Negotiated {
        four_octet_as: true,
        ..Default::default()
    }
}

fn test_encode_msg(bytes_expected: &[u8], msg: &Message) {
    test_encode_msg_nego(bytes_expected, msg, default_nego());
}

fn test_encode_msg_nego(
    bytes_expected: &[u8],
    msg: &Message,
    nego: Negotiated,
) {
    let cxt = EncodeCxt { nego };
    let bytes_actual = msg.encode(&cxt);
    assert_eq!(
        bytes_expected,
        bytes_actual.as_ref(),
        "encoded message mismatch"
    );
}

fn test_decode_msg(bytes: &[u8], msg_expected: &Message) {
    test_decode_msg_nego(bytes, msg_expected, default_nego());
}

fn test_decode_msg_nego(
    bytes: &[u8],
    msg_expected: &Message,
    nego: Negotiated,
) {
    let cxt = DecodeCxt {
        peer_type: PeerType::External,
        peer_as: 65001,
        nego,
    };

    let msg_size = Message::get_message_len(bytes)
        .expect("Buffer doesn't contain a full BGP message");
    let msg_actual = Message::decode(&bytes[0..msg_size], &cxt).unwrap();
    assert_eq!(*msg_expected, msg_actual);
}

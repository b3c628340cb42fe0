//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::{Buf, BufMut, Bytes};
use ferric_utils::bytes::TLS_BUF;
use serde::{Deserialize, Serialize};

use crate::af::AfiSafi;
use crate::packet::error::{DecodeResult, UpdateMessageError};
use crate::packet::nlri::{NlriValue, prefix_wire_len};

//
// Route Target Constraint NLRI (RFC 4684).
//
// Encoding format:
//
// +-------------------------------+
// | Prefix length in bits (1)     |
// +-------------------------------+
// | Origin AS (4)                 |
// +-------------------------------+
// | Route Target prefix (0..8)    |
// +-------------------------------+
//
// A zero prefix length denotes the default route target, matching all
// route targets.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RtcNlri {
    pub prefix_len: u8,
    pub origin_as: u32,
    pub route_target: Bytes,
}

// The route-target prefix space is 96 bits wide.
const MAX_PREFIXLEN: u8 = 96;
// Bits taken by the origin AS field.
const ORIGIN_AS_BITS: u8 = 32;

// ===== global functions =====

pub(crate) fn take(buf: &mut Bytes, _family: AfiSafi) -> DecodeResult<Bytes> {
    if buf.remaining() < 1 {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    let plen = buf.chunk()[0];
    let len = 1 + prefix_wire_len(plen);
    if plen > MAX_PREFIXLEN || buf.remaining() < len {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    Ok(buf.copy_to_bytes(len))
}

pub(crate) fn parse(
    _family: AfiSafi,
    mut buf: Bytes,
) -> DecodeResult<NlriValue> {
    let prefix_len = buf.get_u8();

    // The default route target.
    if prefix_len == 0 {
        return Ok(NlriValue::Rtc(RtcNlri {
            prefix_len,
            origin_as: 0,
            route_target: Bytes::new(),
        }));
    }

    if prefix_len < ORIGIN_AS_BITS {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    let origin_as = buf.try_get_u32()?;
    let route_target = buf.copy_to_bytes(buf.remaining());
    Ok(NlriValue::Rtc(RtcNlri {
        prefix_len,
        origin_as,
        route_target,
    }))
}

pub(crate) fn emit(nlri: &RtcNlri) -> Bytes {
    TLS_BUF.with(|buf| {
        let mut buf = buf.borrow_mut();
        buf.clear();
        buf.put_u8(nlri.prefix_len);
        if nlri.prefix_len != 0 {
            buf.put_u32(nlri.origin_as);
            buf.put_slice(&nlri.route_target);
        }
        buf.clone().freeze()
    })
}

// ===== impl Display =====

impl std::fmt::Display for RtcNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.prefix_len == 0 {
            write!(f, "rtc default")
        } else {
            write!(
                f,
                "rtc {}:{:02x?}/{}",
                self.origin_as, self.route_target, self.prefix_len
            )
        }
    }
}

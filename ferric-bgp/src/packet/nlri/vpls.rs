//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::{Buf, BufMut, Bytes};
use ferric_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use serde::{Deserialize, Serialize};

use crate::af::AfiSafi;
use crate::packet::error::{DecodeResult, UpdateMessageError};
use crate::packet::nlri::{NlriValue, RouteDistinguisher};

//
// VPLS NLRI (RFC 4761).
//
// Encoding format (fixed 19 octets):
//
// +------------------------------------+
// |  Length (2 octets) = 17            |
// +------------------------------------+
// |  Route Distinguisher (8 octets)    |
// +------------------------------------+
// |  VE ID (2 octets)                  |
// +------------------------------------+
// |  VE Block Offset (2 octets)        |
// +------------------------------------+
// |  VE Block Size (2 octets)          |
// +------------------------------------+
// |  Label Base (3 octets)             |
// +------------------------------------+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct VplsNlri {
    pub rd: RouteDistinguisher,
    pub ve_id: u16,
    pub ve_block_offset: u16,
    pub ve_block_size: u16,
    pub label_base: u32,
}

const BODY_LEN: u16 = 17;
const WIRE_LEN: usize = 19;

// ===== global functions =====

pub(crate) fn take(buf: &mut Bytes, _family: AfiSafi) -> DecodeResult<Bytes> {
    if buf.remaining() < WIRE_LEN {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    let body_len = u16::from_be_bytes([buf.chunk()[0], buf.chunk()[1]]);
    if body_len != BODY_LEN {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    Ok(buf.copy_to_bytes(WIRE_LEN))
}

pub(crate) fn parse(
    _family: AfiSafi,
    mut buf: Bytes,
) -> DecodeResult<NlriValue> {
    let _body_len = buf.get_u16();
    let rd = RouteDistinguisher::decode(&mut buf)?;
    let ve_id = buf.get_u16();
    let ve_block_offset = buf.get_u16();
    let ve_block_size = buf.get_u16();
    let label_base = buf.get_u24();
    Ok(NlriValue::Vpls(VplsNlri {
        rd,
        ve_id,
        ve_block_offset,
        ve_block_size,
        label_base,
    }))
}

pub(crate) fn emit(nlri: &VplsNlri) -> Bytes {
    TLS_BUF.with(|buf| {
        let mut buf = buf.borrow_mut();
        buf.clear();
        buf.put_u16(BODY_LEN);
        nlri.rd.encode(&mut buf);
        buf.put_u16(nlri.ve_id);
        buf.put_u16(nlri.ve_block_offset);
        buf.put_u16(nlri.ve_block_size);
        buf.put_u24(nlri.label_base);
        buf.clone().freeze()
    })
}

// ===== impl Display =====

impl std::fmt::Display for VplsNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "vpls rd {} ve-id {} base {}",
            self.rd, self.ve_id, self.label_base
        )
    }
}

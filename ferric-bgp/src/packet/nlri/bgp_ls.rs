//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ferric_utils::bytes::TLS_BUF;
use serde::{Deserialize, Serialize};

use crate::af::AfiSafi;
use crate::packet::consts::Safi;
use crate::packet::error::{DecodeResult, UpdateMessageError};
use crate::packet::nlri::{NlriValue, RouteDistinguisher};
use crate::packet::registry;

//
// BGP-LS NLRI (RFC 7752).
//
// Encoding format:
//
// +------------------+
// |  NLRI Type (2)   |
// +------------------+
// | Total Length (2) |
// +------------------+
// |  Protocol-ID (1) |
// +------------------+
// |  Identifier (8)  |
// +------------------+
// | Descriptors (var)|
// +------------------+
//
// The VPN variant carries a route distinguisher ahead of the Protocol-ID.
// Descriptor TLVs are preserved as opaque bytes; their interpretation
// belongs to a link-state consumer, not to the speaker.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct BgpLsNlri {
    pub family: AfiSafi,
    pub nlri_type: u16,
    pub value: BgpLsValue,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum BgpLsValue {
    LinkState {
        rd: Option<RouteDistinguisher>,
        protocol_id: u8,
        identifier: u64,
        descriptors: Bytes,
    },
    // Unknown NLRI types are preserved as opaque bytes.
    Generic(Bytes),
}

// ===== global functions =====

pub(crate) fn take(buf: &mut Bytes, _family: AfiSafi) -> DecodeResult<Bytes> {
    if buf.remaining() < 4 {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    let body_len =
        u16::from_be_bytes([buf.chunk()[2], buf.chunk()[3]]) as usize;
    if buf.remaining() < 4 + body_len {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    Ok(buf.copy_to_bytes(4 + body_len))
}

pub(crate) fn parse(
    family: AfiSafi,
    mut buf: Bytes,
) -> DecodeResult<NlriValue> {
    let nlri_type = buf.get_u16();
    let body_len = buf.get_u16() as usize;
    let mut body = buf.copy_to_bytes(body_len);

    let value = match registry::bgp_ls_nlri_parser(nlri_type) {
        Some(parser) => (parser)(&mut body, family)?,
        None => BgpLsValue::Generic(body),
    };

    Ok(NlriValue::BgpLs(BgpLsNlri {
        family,
        nlri_type,
        value,
    }))
}

pub(crate) fn emit(nlri: &BgpLsNlri) -> Bytes {
    TLS_BUF.with(|buf| {
        let mut buf = buf.borrow_mut();
        buf.clear();
        buf.put_u16(nlri.nlri_type);

        let len_pos = buf.len();
        buf.put_u16(0);
        nlri.value.encode(&mut buf);
        let body_len = (buf.len() - len_pos - 2) as u16;
        buf[len_pos..len_pos + 2].copy_from_slice(&body_len.to_be_bytes());

        buf.clone().freeze()
    })
}

// Shared parser for all known link-state NLRI types: the header is common
// and the per-type descriptors stay opaque.
pub(crate) fn parse_link_state(
    buf: &mut Bytes,
    family: AfiSafi,
) -> DecodeResult<BgpLsValue> {
    let mut rd = None;
    if family.safi() == Safi::BgpLsVpn {
        rd = Some(RouteDistinguisher::decode(buf)?);
    }
    let protocol_id = buf.try_get_u8()?;
    let identifier = buf.try_get_u64()?;
    let descriptors = buf.copy_to_bytes(buf.remaining());
    Ok(BgpLsValue::LinkState {
        rd,
        protocol_id,
        identifier,
        descriptors,
    })
}

// ===== impl BgpLsValue =====

impl BgpLsValue {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            BgpLsValue::LinkState {
                rd,
                protocol_id,
                identifier,
                descriptors,
            } => {
                if let Some(rd) = rd {
                    rd.encode(buf);
                }
                buf.put_u8(*protocol_id);
                buf.put_u64(*identifier);
                buf.put_slice(descriptors);
            }
            BgpLsValue::Generic(bytes) => {
                buf.put_slice(bytes);
            }
        }
    }
}

// ===== impl Display =====

impl std::fmt::Display for BgpLsNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bgp-ls:{}", self.nlri_type)?;
        match &self.value {
            BgpLsValue::LinkState {
                rd,
                protocol_id,
                identifier,
                ..
            } => {
                if let Some(rd) = rd {
                    write!(f, " rd {rd}")?;
                }
                write!(f, " protocol {protocol_id} id {identifier}")
            }
            BgpLsValue::Generic(_) => write!(f, " opaque"),
        }
    }
}

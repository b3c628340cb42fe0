//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ferric_utils::bytes::TLS_BUF;
use ferric_utils::ip::{Ipv4AddrExt, Ipv6AddrExt};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::af::AfiSafi;
use crate::packet::consts::Afi;
use crate::packet::error::{DecodeResult, UpdateMessageError};
use crate::packet::nlri::{
    LabelStack, NlriValue, RouteDistinguisher, prefix_wire_len,
};

//
// Plain IP prefix NLRI (unicast and multicast).
//
// Encoding format:
//
// +---------------------------+
// |   Length (1 octet)        |
// +---------------------------+
// |   Prefix (variable)       |
// +---------------------------+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct InetNlri {
    pub family: AfiSafi,
    pub prefix: IpNetwork,
}

// Labeled IP prefix NLRI (RFC 8277). The length field covers the label
// stack and the prefix, in bits.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LabelNlri {
    pub family: AfiSafi,
    pub labels: LabelStack,
    pub prefix: IpNetwork,
}

// VPN IP prefix NLRI (RFC 4364): label stack, route distinguisher and
// prefix behind a single bit-length field.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct IpvpnNlri {
    pub family: AfiSafi,
    pub labels: LabelStack,
    pub rd: RouteDistinguisher,
    pub prefix: IpNetwork,
}

// ===== global functions =====

// Splits off the canonical bytes of one prefix-shaped NLRI.
//
// All three variants share the [bit-length][payload] shape, so a single
// routine covers them.
pub(crate) fn take(buf: &mut Bytes, _family: AfiSafi) -> DecodeResult<Bytes> {
    if buf.remaining() < 1 {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    let plen = buf.chunk()[0];
    let len = 1 + prefix_wire_len(plen);
    if buf.remaining() < len {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    Ok(buf.copy_to_bytes(len))
}

pub(crate) fn parse_inet(
    family: AfiSafi,
    mut buf: Bytes,
) -> DecodeResult<NlriValue> {
    let plen = buf.get_u8();
    let prefix = decode_prefix(&mut buf, family.afi(), plen)?;
    Ok(NlriValue::Inet(InetNlri { family, prefix }))
}

pub(crate) fn parse_label(
    family: AfiSafi,
    mut buf: Bytes,
) -> DecodeResult<NlriValue> {
    let plen = buf.get_u8();
    let labels = LabelStack::decode(&mut buf)?;
    let plen = plen_strip(plen, labels.wire_len())?;
    let prefix = decode_prefix(&mut buf, family.afi(), plen)?;
    Ok(NlriValue::Label(LabelNlri {
        family,
        labels,
        prefix,
    }))
}

pub(crate) fn parse_ipvpn(
    family: AfiSafi,
    mut buf: Bytes,
) -> DecodeResult<NlriValue> {
    let plen = buf.get_u8();
    let labels = LabelStack::decode(&mut buf)?;
    let rd = RouteDistinguisher::decode(&mut buf)?;
    let plen =
        plen_strip(plen, labels.wire_len() + RouteDistinguisher::LENGTH)?;
    let prefix = decode_prefix(&mut buf, family.afi(), plen)?;
    Ok(NlriValue::Ipvpn(IpvpnNlri {
        family,
        labels,
        rd,
        prefix,
    }))
}

pub(crate) fn emit_inet(nlri: &InetNlri) -> Bytes {
    TLS_BUF.with(|buf| {
        let mut buf = buf.borrow_mut();
        buf.clear();
        encode_prefix(&mut buf, &nlri.prefix, 0);
        buf.clone().freeze()
    })
}

pub(crate) fn emit_label(nlri: &LabelNlri) -> Bytes {
    TLS_BUF.with(|buf| {
        let mut buf = buf.borrow_mut();
        buf.clear();
        let extra = nlri.labels.wire_len() as u8 * 8;
        buf.put_u8(nlri.prefix.prefix() + extra);
        nlri.labels.encode(&mut buf);
        encode_prefix_addr(&mut buf, &nlri.prefix);
        buf.clone().freeze()
    })
}

pub(crate) fn emit_ipvpn(nlri: &IpvpnNlri) -> Bytes {
    TLS_BUF.with(|buf| {
        let mut buf = buf.borrow_mut();
        buf.clear();
        let extra = (nlri.labels.wire_len() + RouteDistinguisher::LENGTH)
            as u8
            * 8;
        buf.put_u8(nlri.prefix.prefix() + extra);
        nlri.labels.encode(&mut buf);
        nlri.rd.encode(&mut buf);
        encode_prefix_addr(&mut buf, &nlri.prefix);
        buf.clone().freeze()
    })
}

// ===== impl Display =====

impl std::fmt::Display for InetNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix)
    }
}

impl std::fmt::Display for LabelNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} label {}", self.prefix, self.labels)
    }
}

impl std::fmt::Display for IpvpnNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rd {} {} label {}", self.rd, self.prefix, self.labels)
    }
}

// ===== helper functions =====

// Subtracts the label/RD overhead from the on-wire bit length, leaving the
// prefix length proper.
fn plen_strip(plen: u8, overhead_bytes: usize) -> DecodeResult<u8> {
    let overhead_bits = overhead_bytes * 8;
    let plen = plen as usize;
    if plen < overhead_bits {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    Ok((plen - overhead_bits) as u8)
}

// Parses a prefix of the given bit length from the buffer.
pub(crate) fn decode_prefix(
    buf: &mut Bytes,
    afi: Afi,
    plen: u8,
) -> DecodeResult<IpNetwork> {
    let plen_wire = prefix_wire_len(plen);
    if plen_wire > buf.remaining() {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }

    let addr: IpAddr = match afi {
        Afi::Ipv4 => {
            if plen > 32 {
                return Err(UpdateMessageError::InvalidNetworkField.into());
            }
            let mut bytes = [0; Ipv4Addr::LENGTH];
            buf.copy_to_slice(&mut bytes[..plen_wire]);
            Ipv4Addr::from(bytes).into()
        }
        Afi::Ipv6 => {
            if plen > 128 {
                return Err(UpdateMessageError::InvalidNetworkField.into());
            }
            let mut bytes = [0; Ipv6Addr::LENGTH];
            buf.copy_to_slice(&mut bytes[..plen_wire]);
            Ipv6Addr::from(bytes).into()
        }
        _ => {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
    };

    IpNetwork::new(addr, plen)
        .map_err(|_| UpdateMessageError::InvalidNetworkField.into())
}

// Encodes a prefix, preceded by its bit length.
pub(crate) fn encode_prefix(
    buf: &mut BytesMut,
    prefix: &IpNetwork,
    extra_bits: u8,
) {
    buf.put_u8(prefix.prefix() + extra_bits);
    encode_prefix_addr(buf, prefix);
}

// Encodes the variable-length address portion of a prefix.
pub(crate) fn encode_prefix_addr(buf: &mut BytesMut, prefix: &IpNetwork) {
    let plen_wire = prefix_wire_len(prefix.prefix());
    match prefix.ip() {
        IpAddr::V4(addr) => buf.put_slice(&addr.octets()[..plen_wire]),
        IpAddr::V6(addr) => buf.put_slice(&addr.octets()[..plen_wire]),
    }
}

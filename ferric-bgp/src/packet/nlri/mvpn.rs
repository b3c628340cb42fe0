//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ferric_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use serde::{Deserialize, Serialize};

use crate::af::AfiSafi;
use crate::packet::error::{DecodeResult, UpdateMessageError};
use crate::packet::nlri::{NlriValue, RouteDistinguisher};
use crate::packet::registry;

//
// MCAST-VPN NLRI (RFC 6514).
//
// Encoding format:
//
// +-----------------------------------+
// |    Route Type (1 octet)           |
// +-----------------------------------+
// |     Length (1 octet)              |
// +-----------------------------------+
// | Route Type specific (variable)    |
// +-----------------------------------+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MvpnNlri {
    pub family: AfiSafi,
    pub route_type: u8,
    pub route: MvpnRoute,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MvpnRoute {
    IntraAsIPmsiAd {
        rd: RouteDistinguisher,
        originator: IpAddr,
    },
    InterAsIPmsiAd {
        rd: RouteDistinguisher,
        source_as: u32,
    },
    SPmsiAd {
        rd: RouteDistinguisher,
        source: (u8, IpAddr),
        group: (u8, IpAddr),
        originator: IpAddr,
    },
    // Unknown route types are preserved as opaque bytes.
    Generic(Bytes),
}

// ===== global functions =====

pub(crate) fn take(buf: &mut Bytes, _family: AfiSafi) -> DecodeResult<Bytes> {
    if buf.remaining() < 2 {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    let body_len = buf.chunk()[1] as usize;
    if buf.remaining() < 2 + body_len {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    Ok(buf.copy_to_bytes(2 + body_len))
}

pub(crate) fn parse(
    family: AfiSafi,
    mut buf: Bytes,
) -> DecodeResult<NlriValue> {
    let route_type = buf.get_u8();
    let body_len = buf.get_u8() as usize;
    let mut body = buf.copy_to_bytes(body_len);

    let route = match registry::mvpn_route_parser(route_type) {
        Some(parser) => (parser)(&mut body)?,
        None => MvpnRoute::Generic(body),
    };

    Ok(NlriValue::Mvpn(MvpnNlri {
        family,
        route_type,
        route,
    }))
}

pub(crate) fn emit(nlri: &MvpnNlri) -> Bytes {
    TLS_BUF.with(|buf| {
        let mut buf = buf.borrow_mut();
        buf.clear();
        buf.put_u8(nlri.route_type);

        let len_pos = buf.len();
        buf.put_u8(0);
        nlri.route.encode(&mut buf);
        let body_len = buf.len() - len_pos - 1;
        buf[len_pos] = body_len as u8;

        buf.clone().freeze()
    })
}

pub(crate) fn parse_intra_as_i_pmsi(
    buf: &mut Bytes,
) -> DecodeResult<MvpnRoute> {
    let rd = RouteDistinguisher::decode(buf)?;
    let len = buf.remaining();
    let originator = decode_addr_by_len(buf, len)?;
    Ok(MvpnRoute::IntraAsIPmsiAd { rd, originator })
}

pub(crate) fn parse_inter_as_i_pmsi(
    buf: &mut Bytes,
) -> DecodeResult<MvpnRoute> {
    let rd = RouteDistinguisher::decode(buf)?;
    let source_as = buf.try_get_u32()?;
    Ok(MvpnRoute::InterAsIPmsiAd { rd, source_as })
}

pub(crate) fn parse_s_pmsi(buf: &mut Bytes) -> DecodeResult<MvpnRoute> {
    let rd = RouteDistinguisher::decode(buf)?;
    let source = decode_len_addr(buf)?;
    let group = decode_len_addr(buf)?;
    let len = buf.remaining();
    let originator = decode_addr_by_len(buf, len)?;
    Ok(MvpnRoute::SPmsiAd {
        rd,
        source,
        group,
        originator,
    })
}

// ===== impl MvpnRoute =====

impl MvpnRoute {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            MvpnRoute::IntraAsIPmsiAd { rd, originator } => {
                rd.encode(buf);
                buf.put_ip(originator);
            }
            MvpnRoute::InterAsIPmsiAd { rd, source_as } => {
                rd.encode(buf);
                buf.put_u32(*source_as);
            }
            MvpnRoute::SPmsiAd {
                rd,
                source,
                group,
                originator,
            } => {
                rd.encode(buf);
                buf.put_u8(source.0);
                buf.put_ip(&source.1);
                buf.put_u8(group.0);
                buf.put_ip(&group.1);
                buf.put_ip(originator);
            }
            MvpnRoute::Generic(bytes) => {
                buf.put_slice(bytes);
            }
        }
    }
}

// ===== impl Display =====

impl std::fmt::Display for MvpnNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mvpn:{}", self.route_type)?;
        match &self.route {
            MvpnRoute::IntraAsIPmsiAd { rd, originator } => {
                write!(f, " rd {rd} originator {originator}")
            }
            MvpnRoute::InterAsIPmsiAd { rd, source_as } => {
                write!(f, " rd {rd} source-as {source_as}")
            }
            MvpnRoute::SPmsiAd {
                rd, source, group, ..
            } => {
                write!(f, " rd {rd} source {} group {}", source.1, group.1)
            }
            MvpnRoute::Generic(_) => write!(f, " opaque"),
        }
    }
}

// ===== helper functions =====

// Parses a [bit-length][address] pair where the length is 32 or 128 bits.
fn decode_len_addr(buf: &mut Bytes) -> DecodeResult<(u8, IpAddr)> {
    let len = buf.try_get_u8()?;
    let addr = match len {
        32 => IpAddr::from(buf.try_get_ipv4()?),
        128 => IpAddr::from(buf.try_get_ipv6()?),
        _ => return Err(UpdateMessageError::InvalidNetworkField.into()),
    };
    Ok((len, addr))
}

// Parses a trailing address whose size is implied by the remaining bytes.
fn decode_addr_by_len(buf: &mut Bytes, len: usize) -> DecodeResult<IpAddr> {
    match len {
        4 => Ok(buf.try_get_ipv4()?.into()),
        16 => Ok(buf.try_get_ipv6()?.into()),
        _ => Err(UpdateMessageError::InvalidNetworkField.into()),
    }
}

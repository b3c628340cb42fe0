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
use crate::packet::consts::Afi;
use crate::packet::error::{DecodeResult, UpdateMessageError};
use crate::packet::nlri::{NlriValue, RouteDistinguisher, prefix_wire_len};
use crate::packet::registry;

//
// BGP-MUP NLRI (draft-mpmz-bess-mup-safi).
//
// Encoding format:
//
// +-----------------------------------+
// |    Architecture Type (1 octet)    |
// +-----------------------------------+
// |     Route Type (2 octets)         |
// +-----------------------------------+
// |     Length (1 octet)              |
// +-----------------------------------+
// | Route Type specific (variable)    |
// +-----------------------------------+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MupNlri {
    pub family: AfiSafi,
    pub arch_type: u8,
    pub route_type: u16,
    pub route: MupRoute,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MupRoute {
    InterworkSegmentDiscovery {
        rd: RouteDistinguisher,
        prefix_len: u8,
        prefix: IpAddr,
    },
    DirectSegmentDiscovery {
        rd: RouteDistinguisher,
        address: IpAddr,
    },
    // Unknown route types are preserved as opaque bytes.
    Generic(Bytes),
}

// ===== global functions =====

pub(crate) fn take(buf: &mut Bytes, _family: AfiSafi) -> DecodeResult<Bytes> {
    if buf.remaining() < 4 {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    let body_len = buf.chunk()[3] as usize;
    if buf.remaining() < 4 + body_len {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    Ok(buf.copy_to_bytes(4 + body_len))
}

pub(crate) fn parse(
    family: AfiSafi,
    mut buf: Bytes,
) -> DecodeResult<NlriValue> {
    let arch_type = buf.get_u8();
    let route_type = buf.get_u16();
    let body_len = buf.get_u8() as usize;
    let mut body = buf.copy_to_bytes(body_len);

    let route = match registry::mup_route_parser(route_type) {
        Some(parser) => (parser)(&mut body, family.afi())?,
        None => MupRoute::Generic(body),
    };

    Ok(NlriValue::Mup(MupNlri {
        family,
        arch_type,
        route_type,
        route,
    }))
}

pub(crate) fn emit(nlri: &MupNlri) -> Bytes {
    TLS_BUF.with(|buf| {
        let mut buf = buf.borrow_mut();
        buf.clear();
        buf.put_u8(nlri.arch_type);
        buf.put_u16(nlri.route_type);

        let len_pos = buf.len();
        buf.put_u8(0);
        nlri.route.encode(&mut buf);
        let body_len = buf.len() - len_pos - 1;
        buf[len_pos] = body_len as u8;

        buf.clone().freeze()
    })
}

pub(crate) fn parse_isd(
    buf: &mut Bytes,
    afi: Afi,
) -> DecodeResult<MupRoute> {
    let rd = RouteDistinguisher::decode(buf)?;
    let prefix_len = buf.try_get_u8()?;
    if prefix_len > afi_max_bits(afi)? {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    let plen_wire = prefix_wire_len(prefix_len);
    if buf.remaining() < plen_wire {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    let prefix = match afi {
        Afi::Ipv4 => {
            let mut bytes = [0; 4];
            buf.copy_to_slice(&mut bytes[..plen_wire]);
            IpAddr::from(bytes)
        }
        _ => {
            let mut bytes = [0; 16];
            buf.copy_to_slice(&mut bytes[..plen_wire]);
            IpAddr::from(bytes)
        }
    };
    Ok(MupRoute::InterworkSegmentDiscovery {
        rd,
        prefix_len,
        prefix,
    })
}

pub(crate) fn parse_dsd(
    buf: &mut Bytes,
    afi: Afi,
) -> DecodeResult<MupRoute> {
    let rd = RouteDistinguisher::decode(buf)?;
    let address = match afi {
        Afi::Ipv4 => IpAddr::from(buf.try_get_ipv4()?),
        _ => IpAddr::from(buf.try_get_ipv6()?),
    };
    Ok(MupRoute::DirectSegmentDiscovery { rd, address })
}

// ===== impl MupRoute =====

impl MupRoute {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            MupRoute::InterworkSegmentDiscovery {
                rd,
                prefix_len,
                prefix,
            } => {
                rd.encode(buf);
                buf.put_u8(*prefix_len);
                let plen_wire = prefix_wire_len(*prefix_len);
                match prefix {
                    IpAddr::V4(addr) => {
                        buf.put_slice(&addr.octets()[..plen_wire])
                    }
                    IpAddr::V6(addr) => {
                        buf.put_slice(&addr.octets()[..plen_wire])
                    }
                }
            }
            MupRoute::DirectSegmentDiscovery { rd, address } => {
                rd.encode(buf);
                buf.put_ip(address);
            }
            MupRoute::Generic(bytes) => {
                buf.put_slice(bytes);
            }
        }
    }
}

// ===== impl Display =====

impl std::fmt::Display for MupNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mup:{}:{}", self.arch_type, self.route_type)?;
        match &self.route {
            MupRoute::InterworkSegmentDiscovery {
                rd,
                prefix_len,
                prefix,
            } => {
                write!(f, " rd {rd} prefix {prefix}/{prefix_len}")
            }
            MupRoute::DirectSegmentDiscovery { rd, address } => {
                write!(f, " rd {rd} address {address}")
            }
            MupRoute::Generic(_) => write!(f, " opaque"),
        }
    }
}

// ===== helper functions =====

fn afi_max_bits(afi: Afi) -> DecodeResult<u8> {
    match afi {
        Afi::Ipv4 => Ok(32),
        Afi::Ipv6 => Ok(128),
        _ => Err(UpdateMessageError::InvalidNetworkField.into()),
    }
}

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
// EVPN NLRI (RFC 7432).
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
pub struct EvpnNlri {
    pub route_type: u8,
    pub route: EvpnRoute,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum EvpnRoute {
    EthernetAutoDiscovery {
        rd: RouteDistinguisher,
        esi: Esi,
        eth_tag: u32,
        label: u32,
    },
    MacIpAdvertisement {
        rd: RouteDistinguisher,
        esi: Esi,
        eth_tag: u32,
        mac: MacAddr,
        ip: Option<IpAddr>,
        label1: u32,
        label2: Option<u32>,
    },
    InclusiveMulticastEthernetTag {
        rd: RouteDistinguisher,
        eth_tag: u32,
        ip: Option<IpAddr>,
    },
    EthernetSegment {
        rd: RouteDistinguisher,
        esi: Esi,
        ip: Option<IpAddr>,
    },
    IpPrefix {
        rd: RouteDistinguisher,
        esi: Esi,
        eth_tag: u32,
        prefix_len: u8,
        prefix: IpAddr,
        gateway: IpAddr,
        label: u32,
    },
    // Unknown route types are preserved as opaque bytes.
    Generic(Bytes),
}

// Ethernet Segment Identifier.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Esi(pub [u8; 10]);

// IEEE 802 MAC address.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct MacAddr(pub [u8; 6]);

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
    _family: AfiSafi,
    mut buf: Bytes,
) -> DecodeResult<NlriValue> {
    let route_type = buf.get_u8();
    let body_len = buf.get_u8() as usize;
    let mut body = buf.copy_to_bytes(body_len);

    let route = match registry::evpn_route_parser(route_type) {
        Some(parser) => (parser)(&mut body)?,
        None => EvpnRoute::Generic(body),
    };

    Ok(NlriValue::Evpn(EvpnNlri { route_type, route }))
}

pub(crate) fn emit(nlri: &EvpnNlri) -> Bytes {
    TLS_BUF.with(|buf| {
        let mut buf = buf.borrow_mut();
        buf.clear();
        buf.put_u8(nlri.route_type);

        // The length field is rewritten once the body size is known.
        let len_pos = buf.len();
        buf.put_u8(0);
        nlri.route.encode(&mut buf);
        let body_len = buf.len() - len_pos - 1;
        buf[len_pos] = body_len as u8;

        buf.clone().freeze()
    })
}

// Parsers for the individual route types, registered by route-type code.

pub(crate) fn parse_auto_discovery(
    buf: &mut Bytes,
) -> DecodeResult<EvpnRoute> {
    let rd = RouteDistinguisher::decode(buf)?;
    let esi = Esi::decode(buf)?;
    let eth_tag = buf.try_get_u32()?;
    let label = buf.try_get_u24()?;
    Ok(EvpnRoute::EthernetAutoDiscovery {
        rd,
        esi,
        eth_tag,
        label,
    })
}

pub(crate) fn parse_mac_ip(buf: &mut Bytes) -> DecodeResult<EvpnRoute> {
    let rd = RouteDistinguisher::decode(buf)?;
    let esi = Esi::decode(buf)?;
    let eth_tag = buf.try_get_u32()?;
    let mac_len = buf.try_get_u8()?;
    if mac_len != 48 {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    let mac = MacAddr::decode(buf)?;
    let ip = decode_opt_addr(buf)?;
    let label1 = buf.try_get_u24()?;
    let mut label2 = None;
    if buf.remaining() >= 3 {
        label2 = Some(buf.try_get_u24()?);
    }
    Ok(EvpnRoute::MacIpAdvertisement {
        rd,
        esi,
        eth_tag,
        mac,
        ip,
        label1,
        label2,
    })
}

pub(crate) fn parse_multicast(buf: &mut Bytes) -> DecodeResult<EvpnRoute> {
    let rd = RouteDistinguisher::decode(buf)?;
    let eth_tag = buf.try_get_u32()?;
    let ip = decode_opt_addr(buf)?;
    Ok(EvpnRoute::InclusiveMulticastEthernetTag { rd, eth_tag, ip })
}

pub(crate) fn parse_ethernet_segment(
    buf: &mut Bytes,
) -> DecodeResult<EvpnRoute> {
    let rd = RouteDistinguisher::decode(buf)?;
    let esi = Esi::decode(buf)?;
    let ip = decode_opt_addr(buf)?;
    Ok(EvpnRoute::EthernetSegment { rd, esi, ip })
}

pub(crate) fn parse_ip_prefix(buf: &mut Bytes) -> DecodeResult<EvpnRoute> {
    let rd = RouteDistinguisher::decode(buf)?;
    let esi = Esi::decode(buf)?;
    let eth_tag = buf.try_get_u32()?;
    let prefix_len = buf.try_get_u8()?;

    // The remaining length discriminates between the IPv4 (4+4+3) and
    // IPv6 (16+16+3) forms.
    let (prefix, gateway): (IpAddr, IpAddr) = match buf.remaining() {
        11 => (buf.get_ipv4().into(), buf.get_ipv4().into()),
        35 => (buf.get_ipv6().into(), buf.get_ipv6().into()),
        _ => return Err(UpdateMessageError::InvalidNetworkField.into()),
    };
    let label = buf.try_get_u24()?;
    Ok(EvpnRoute::IpPrefix {
        rd,
        esi,
        eth_tag,
        prefix_len,
        prefix,
        gateway,
        label,
    })
}

// ===== impl EvpnRoute =====

impl EvpnRoute {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            EvpnRoute::EthernetAutoDiscovery {
                rd,
                esi,
                eth_tag,
                label,
            } => {
                rd.encode(buf);
                esi.encode(buf);
                buf.put_u32(*eth_tag);
                buf.put_u24(*label);
            }
            EvpnRoute::MacIpAdvertisement {
                rd,
                esi,
                eth_tag,
                mac,
                ip,
                label1,
                label2,
            } => {
                rd.encode(buf);
                esi.encode(buf);
                buf.put_u32(*eth_tag);
                buf.put_u8(48);
                mac.encode(buf);
                encode_opt_addr(buf, ip);
                buf.put_u24(*label1);
                if let Some(label2) = label2 {
                    buf.put_u24(*label2);
                }
            }
            EvpnRoute::InclusiveMulticastEthernetTag { rd, eth_tag, ip } => {
                rd.encode(buf);
                buf.put_u32(*eth_tag);
                encode_opt_addr(buf, ip);
            }
            EvpnRoute::EthernetSegment { rd, esi, ip } => {
                rd.encode(buf);
                esi.encode(buf);
                encode_opt_addr(buf, ip);
            }
            EvpnRoute::IpPrefix {
                rd,
                esi,
                eth_tag,
                prefix_len,
                prefix,
                gateway,
                label,
            } => {
                rd.encode(buf);
                esi.encode(buf);
                buf.put_u32(*eth_tag);
                buf.put_u8(*prefix_len);
                buf.put_ip(prefix);
                buf.put_ip(gateway);
                buf.put_u24(*label);
            }
            EvpnRoute::Generic(bytes) => {
                buf.put_slice(bytes);
            }
        }
    }
}

// ===== impl Esi =====

impl Esi {
    pub const LENGTH: usize = 10;

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Esi> {
        if buf.remaining() < Self::LENGTH {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
        let mut esi = [0; Self::LENGTH];
        buf.copy_to_slice(&mut esi);
        Ok(Esi(esi))
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }
}

impl std::fmt::Display for Esi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (pos, byte) in self.0.iter().enumerate() {
            if pos > 0 {
                write!(f, ":")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

// ===== impl MacAddr =====

impl MacAddr {
    pub const LENGTH: usize = 6;

    pub fn decode(buf: &mut Bytes) -> DecodeResult<MacAddr> {
        if buf.remaining() < Self::LENGTH {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
        let mut mac = [0; Self::LENGTH];
        buf.copy_to_slice(&mut mac);
        Ok(MacAddr(mac))
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }
}

impl std::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

// ===== impl Display =====

impl std::fmt::Display for EvpnNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "evpn:{}", self.route_type)?;
        match &self.route {
            EvpnRoute::EthernetAutoDiscovery { rd, esi, .. } => {
                write!(f, " rd {rd} esi {esi}")
            }
            EvpnRoute::MacIpAdvertisement { rd, mac, ip, .. } => {
                write!(f, " rd {rd} mac {mac}")?;
                if let Some(ip) = ip {
                    write!(f, " ip {ip}")?;
                }
                Ok(())
            }
            EvpnRoute::InclusiveMulticastEthernetTag { rd, eth_tag, .. } => {
                write!(f, " rd {rd} etag {eth_tag}")
            }
            EvpnRoute::EthernetSegment { rd, esi, .. } => {
                write!(f, " rd {rd} esi {esi}")
            }
            EvpnRoute::IpPrefix {
                rd,
                prefix,
                prefix_len,
                ..
            } => {
                write!(f, " rd {rd} prefix {prefix}/{prefix_len}")
            }
            EvpnRoute::Generic(_) => write!(f, " opaque"),
        }
    }
}

// ===== helper functions =====

// Parses an [ip-length][ip-address] pair where the length is 0, 32 or 128
// bits.
fn decode_opt_addr(buf: &mut Bytes) -> DecodeResult<Option<IpAddr>> {
    let ip_len = buf.try_get_u8()?;
    match ip_len {
        0 => Ok(None),
        32 => Ok(Some(buf.try_get_ipv4()?.into())),
        128 => Ok(Some(buf.try_get_ipv6()?.into())),
        _ => Err(UpdateMessageError::InvalidNetworkField.into()),
    }
}

fn encode_opt_addr(buf: &mut BytesMut, addr: &Option<IpAddr>) {
    match addr {
        None => buf.put_u8(0),
        Some(IpAddr::V4(addr)) => {
            buf.put_u8(32);
            buf.put_ipv4(addr);
        }
        Some(IpAddr::V6(addr)) => {
            buf.put_u8(128);
            buf.put_ipv6(addr);
        }
    }
}

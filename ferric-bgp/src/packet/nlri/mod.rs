//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod bgp_ls;
pub mod evpn;
pub mod flow;
pub mod inet;
pub mod mup;
pub mod mvpn;
pub mod rtc;
pub mod vpls;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::af::AfiSafi;
use crate::packet::error::{DecodeResult, UpdateMessageError};
use crate::packet::registry;

pub use self::bgp_ls::BgpLsNlri;
pub use self::evpn::EvpnNlri;
pub use self::flow::FlowNlri;
pub use self::inet::{InetNlri, IpvpnNlri, LabelNlri};
pub use self::mup::MupNlri;
pub use self::mvpn::MvpnNlri;
pub use self::rtc::RtcNlri;
pub use self::vpls::VplsNlri;

//
// NLRI wire container.
//
// The instance owns the canonical wire bytes it was decoded from (or packed
// into) and nothing else. Semantic fields are produced by `parse()`, which
// reads from the stored bytes on demand and never caches the result.
// Equality and hashing are byte-level, so an NLRI received from one neighbor
// can be forwarded into another neighbor's Adj-RIB-Out without re-encoding.
//
// The fingerprint used for RIB indexing is the (family, bytes, path_id)
// triple, which is exactly the derived `Eq`/`Hash` of this struct.
//
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Nlri {
    family: AfiSafi,
    path_id: Option<u32>,
    bytes: Bytes,
}

// NLRI semantic container, produced by `Nlri::parse()`.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum NlriValue {
    Inet(InetNlri),
    Label(LabelNlri),
    Ipvpn(IpvpnNlri),
    Vpls(VplsNlri),
    Flow(FlowNlri),
    Evpn(EvpnNlri),
    BgpLs(BgpLsNlri),
    Mvpn(MvpnNlri),
    Mup(MupNlri),
    Rtc(RtcNlri),
}

//
// Route Distinguisher (RFC 4364).
//
// Stored in wire form. The three assigned types only differ in how the
// administrator/assigned-number fields are rendered.
//
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct RouteDistinguisher(pub [u8; 8]);

// MPLS label stack entry: 20-bit label value.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LabelStack(pub Vec<u32>);

// ===== impl Nlri =====

impl Nlri {
    // Constructs an NLRI directly from canonical wire bytes.
    //
    // The caller is responsible for the bytes being a single well-formed
    // NLRI of the given family.
    pub(crate) fn from_canonical(
        family: AfiSafi,
        path_id: Option<u32>,
        bytes: Bytes,
    ) -> Nlri {
        Nlri {
            family,
            path_id,
            bytes,
        }
    }

    // Decodes one NLRI from the buffer.
    //
    // When `addpath` is in effect for the family and direction, the 4-byte
    // path identifier precedes the family-specific encoding.
    pub fn decode(
        family: AfiSafi,
        buf: &mut Bytes,
        addpath: bool,
    ) -> DecodeResult<Nlri> {
        let mut path_id = None;
        if addpath {
            if buf.remaining() < 4 {
                return Err(UpdateMessageError::InvalidNetworkField.into());
            }
            path_id = Some(buf.get_u32());
        }

        let codec = registry::nlri_codec(family)
            .ok_or(UpdateMessageError::UnsupportedAddressFamily)?;
        let bytes = (codec.take)(buf, family)?;

        // Validate the canonical bytes eagerly so that parsing at a later
        // point can't fail.
        let nlri = Nlri {
            family,
            path_id,
            bytes,
        };
        nlri.parse()?;

        Ok(nlri)
    }

    // Appends the canonical wire encoding to the buffer.
    //
    // This is a zero-copy write of the stored bytes, optionally preceded by
    // the path identifier.
    pub fn encode(&self, buf: &mut BytesMut, addpath: bool) {
        if addpath {
            buf.put_u32(self.path_id.unwrap_or(0));
        }
        buf.put_slice(&self.bytes);
    }

    // Parses the stored bytes into a fresh semantic container.
    pub fn parse(&self) -> DecodeResult<NlriValue> {
        let codec = registry::nlri_codec(self.family)
            .ok_or(UpdateMessageError::UnsupportedAddressFamily)?;
        (codec.parse)(self.family, self.bytes.clone())
    }

    pub fn family(&self) -> AfiSafi {
        self.family
    }

    pub fn path_id(&self) -> Option<u32> {
        self.path_id
    }

    // Canonical wire bytes, excluding any path identifier.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    // Length of the wire encoding under the given ADD-PATH setting.
    pub fn wire_len(&self, addpath: bool) -> usize {
        self.bytes.len() + if addpath { 4 } else { 0 }
    }

    // Returns a copy of the NLRI with a different path identifier. The
    // canonical bytes are shared, not copied.
    pub fn with_path_id(&self, path_id: Option<u32>) -> Nlri {
        Nlri {
            family: self.family,
            path_id,
            bytes: self.bytes.clone(),
        }
    }
}

impl std::fmt::Display for Nlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.parse() {
            Ok(value) => value.fmt(f)?,
            Err(_) => write!(f, "{}:opaque", self.family)?,
        }
        if let Some(path_id) = self.path_id {
            write!(f, " path-id {path_id}")?;
        }
        Ok(())
    }
}

// ===== impl NlriValue =====

impl NlriValue {
    pub fn family(&self) -> AfiSafi {
        match self {
            NlriValue::Inet(nlri) => nlri.family,
            NlriValue::Label(nlri) => nlri.family,
            NlriValue::Ipvpn(nlri) => nlri.family,
            NlriValue::Vpls(_) => AfiSafi::L2vpnVpls,
            NlriValue::Flow(nlri) => nlri.family,
            NlriValue::Evpn(_) => AfiSafi::L2vpnEvpn,
            NlriValue::BgpLs(nlri) => nlri.family,
            NlriValue::Mvpn(nlri) => nlri.family,
            NlriValue::Mup(nlri) => nlri.family,
            NlriValue::Rtc(_) => AfiSafi::Ipv4Rtc,
        }
    }

    // Packs the semantic fields into a new wire container.
    //
    // This is the factory side of the wire/semantic split: the canonical
    // bytes are generated immediately and the resulting instance is
    // immutable.
    pub fn pack(&self, path_id: Option<u32>) -> Nlri {
        let bytes = match self {
            NlriValue::Inet(nlri) => inet::emit_inet(nlri),
            NlriValue::Label(nlri) => inet::emit_label(nlri),
            NlriValue::Ipvpn(nlri) => inet::emit_ipvpn(nlri),
            NlriValue::Vpls(nlri) => vpls::emit(nlri),
            NlriValue::Flow(nlri) => flow::emit(nlri),
            NlriValue::Evpn(nlri) => evpn::emit(nlri),
            NlriValue::BgpLs(nlri) => bgp_ls::emit(nlri),
            NlriValue::Mvpn(nlri) => mvpn::emit(nlri),
            NlriValue::Mup(nlri) => mup::emit(nlri),
            NlriValue::Rtc(nlri) => rtc::emit(nlri),
        };
        Nlri::from_canonical(self.family(), path_id, bytes)
    }
}

impl std::fmt::Display for NlriValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NlriValue::Inet(nlri) => nlri.fmt(f),
            NlriValue::Label(nlri) => nlri.fmt(f),
            NlriValue::Ipvpn(nlri) => nlri.fmt(f),
            NlriValue::Vpls(nlri) => nlri.fmt(f),
            NlriValue::Flow(nlri) => nlri.fmt(f),
            NlriValue::Evpn(nlri) => nlri.fmt(f),
            NlriValue::BgpLs(nlri) => nlri.fmt(f),
            NlriValue::Mvpn(nlri) => nlri.fmt(f),
            NlriValue::Mup(nlri) => nlri.fmt(f),
            NlriValue::Rtc(nlri) => nlri.fmt(f),
        }
    }
}

// ===== impl RouteDistinguisher =====

impl RouteDistinguisher {
    pub const LENGTH: usize = 8;

    pub fn decode(buf: &mut Bytes) -> DecodeResult<RouteDistinguisher> {
        if buf.remaining() < Self::LENGTH {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
        let mut rd = [0; Self::LENGTH];
        buf.copy_to_slice(&mut rd);
        Ok(RouteDistinguisher(rd))
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }
}

impl std::fmt::Display for RouteDistinguisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rd_type = u16::from_be_bytes([self.0[0], self.0[1]]);
        match rd_type {
            // 2-byte ASN : 4-byte number.
            0 => {
                let asn = u16::from_be_bytes([self.0[2], self.0[3]]);
                let num = u32::from_be_bytes([
                    self.0[4], self.0[5], self.0[6], self.0[7],
                ]);
                write!(f, "{asn}:{num}")
            }
            // IPv4 address : 2-byte number.
            1 => {
                let addr = std::net::Ipv4Addr::new(
                    self.0[2], self.0[3], self.0[4], self.0[5],
                );
                let num = u16::from_be_bytes([self.0[6], self.0[7]]);
                write!(f, "{addr}:{num}")
            }
            // 4-byte ASN : 2-byte number.
            2 => {
                let asn = u32::from_be_bytes([
                    self.0[2], self.0[3], self.0[4], self.0[5],
                ]);
                let num = u16::from_be_bytes([self.0[6], self.0[7]]);
                write!(f, "{asn}:{num}")
            }
            _ => {
                write!(f, "raw:{:02x?}", self.0)
            }
        }
    }
}

// ===== impl LabelStack =====

impl LabelStack {
    // Size of a single label stack entry on the wire.
    pub const ENTRY_LENGTH: usize = 3;
    // Bottom-of-stack marker in the third octet of an entry.
    const BOS: u8 = 0x01;

    // Parses a label stack, consuming entries until the bottom-of-stack bit.
    //
    // Returns the stack and the number of bytes consumed.
    pub fn decode(buf: &mut Bytes) -> DecodeResult<LabelStack> {
        let mut labels = Vec::new();
        loop {
            if buf.remaining() < Self::ENTRY_LENGTH {
                return Err(UpdateMessageError::InvalidNetworkField.into());
            }
            let b0 = buf.get_u8();
            let b1 = buf.get_u8();
            let b2 = buf.get_u8();
            let label =
                ((b0 as u32) << 12) | ((b1 as u32) << 4) | ((b2 as u32) >> 4);
            labels.push(label);
            if b2 & Self::BOS != 0 || label == 0x80000 {
                // A withdrawn-routes compatibility value (0x800000) also
                // terminates the stack.
                break;
            }
        }
        Ok(LabelStack(labels))
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let last = self.0.len().saturating_sub(1);
        for (pos, label) in self.0.iter().enumerate() {
            let mut entry = label << 4;
            if pos == last && *label != 0x80000 {
                entry |= Self::BOS as u32;
            }
            buf.put_u8((entry >> 16) as u8);
            buf.put_u8((entry >> 8) as u8);
            buf.put_u8(entry as u8);
        }
    }

    // Wire length of the stack.
    pub fn wire_len(&self) -> usize {
        self.0.len() * Self::ENTRY_LENGTH
    }
}

impl std::fmt::Display for LabelStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (pos, label) in self.0.iter().enumerate() {
            if pos > 0 {
                write!(f, " ")?;
            }
            write!(f, "{label}")?;
        }
        write!(f, "]")
    }
}

// ===== helper functions =====

// Calculates the number of bytes required to encode a prefix.
pub(crate) fn prefix_wire_len(len: u8) -> usize {
    (len as usize).div_ceil(8)
}

//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use enum_as_inner::EnumAsInner;
use ferric_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::af::AfiSafi;
use crate::neighbor::PeerType;
use crate::packet::attribute::{self, Attrs};
use crate::packet::consts::{
    AddPathMode, Afi, BGP_VERSION, CapabilityCode, ErrorCode,
    GR_FORWARDING_STATE_FLAG, GR_RESTART_STATE_FLAG, MessageHeaderErrorSubcode,
    MessageType, OpenMessageErrorSubcode, OpenParamType,
    RouteRefreshErrorSubcode, Safi, UpdateMessageErrorSubcode,
};
use crate::packet::error::{
    AttrError, DecodeError, DecodeResult, MessageHeaderError, OpenMessageError,
    RouteRefreshMessageError, UpdateMessageError,
};
use crate::packet::nlri::Nlri;

//
// BGP message.
//
// Encoding format (message header):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// +                                                               +
// |                                                               |
// +                                                               +
// |                           Marker                              |
// +                                                               +
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |          Length               |      Type     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(EnumAsInner)]
#[derive(Deserialize, Serialize)]
pub enum Message {
    Open(OpenMsg),
    Update(Box<UpdateMsg>),
    Notification(NotificationMsg),
    Keepalive(KeepaliveMsg),
    RouteRefresh(RouteRefreshMsg),
    Operational(OperationalMsg),
}

//
// OPEN Message.
//
// Encoding format (message body):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+
// |    Version    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |     My Autonomous System      |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           Hold Time           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         BGP Identifier                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Opt Parm Len  |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |             Optional Parameters (variable)                    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct OpenMsg {
    pub version: u8,
    pub my_as: u16,
    pub holdtime: u16,
    pub identifier: Ipv4Addr,
    pub capabilities: BTreeSet<Capability>,
}

//
// Capabilities Optional Parameter (RFC 5492).
//
// Encoding format:
//
// +------------------------------+
// | Capability Code (1 octet)    |
// +------------------------------+
// | Capability Length (1 octet)  |
// +------------------------------+
// | Capability Value (variable)  |
// ~                              ~
// +------------------------------+
//
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(EnumAsInner)]
#[derive(Deserialize, Serialize)]
pub enum Capability {
    MultiProtocol {
        afi: Afi,
        safi: Safi,
    },
    RouteRefresh,
    ExtendedNexthop(BTreeSet<ExtNexthopTuple>),
    ExtendedMessage,
    MultipleLabels(BTreeSet<MultipleLabelsTuple>),
    GracefulRestart {
        restart_state: bool,
        restart_time: u16,
        families: BTreeSet<GracefulRestartTuple>,
    },
    FourOctetAsNumber {
        asn: u32,
    },
    Operational,
    Multisession(Bytes),
    AddPath(BTreeSet<AddPathTuple>),
    Aigp,
    // Unknown capabilities are preserved in the received OPEN but take no
    // part in negotiation.
    Unknown {
        code: u8,
        value: Bytes,
    },
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AddPathTuple {
    pub afi: Afi,
    pub safi: Safi,
    pub mode: AddPathMode,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct ExtNexthopTuple {
    pub afi: Afi,
    pub safi: Safi,
    pub nexthop_afi: Afi,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct MultipleLabelsTuple {
    pub afi: Afi,
    pub safi: Safi,
    pub count: u8,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct GracefulRestartTuple {
    pub afi: Afi,
    pub safi: Safi,
    pub forwarding: bool,
}

//
// UPDATE Message.
//
// Encoding format (message body):
//
// +-----------------------------------------------------+
// |   Withdrawn Routes Length (2 octets)                |
// +-----------------------------------------------------+
// |   Withdrawn Routes (variable)                       |
// +-----------------------------------------------------+
// |   Total Path Attribute Length (2 octets)            |
// +-----------------------------------------------------+
// |   Path Attributes (variable)                        |
// +-----------------------------------------------------+
// |   Network Layer Reachability Information (variable) |
// +-----------------------------------------------------+
//
// The semantic container holds announcement and withdrawal change sets; the
// split between the classic fields and the MP_REACH_NLRI/MP_UNREACH_NLRI
// attributes is an encoding decision made by `encode()` from the NLRI
// family. Each set holds NLRIs of one family per message.
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[skip_serializing_none]
#[derive(Deserialize, Serialize)]
pub struct UpdateMsg {
    pub reach: Vec<Nlri>,
    pub unreach: Vec<Nlri>,
    pub attrs: Option<Attrs>,
    // End-of-RIB marker for the given family, mutually exclusive with the
    // other fields.
    pub eor: Option<AfiSafi>,
}

// MP_REACH_NLRI attribute contents (RFC 4760).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MpReach {
    pub family: AfiSafi,
    pub nexthop: IpAddr,
    pub ll_nexthop: Option<Ipv6Addr>,
    pub nlris: Vec<Nlri>,
}

// MP_UNREACH_NLRI attribute contents (RFC 4760).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MpUnreach {
    pub family: AfiSafi,
    pub nlris: Vec<Nlri>,
}

//
// NOTIFICATION Message.
//
// Encoding format (message body):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Error code    | Error subcode |   Data (variable)             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct NotificationMsg {
    pub error_code: u8,
    pub error_subcode: u8,
    pub data: Vec<u8>,
}

//
// KEEPALIVE Message.
//
// A KEEPALIVE message consists of only the message header and has a length
// of 19 octets.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct KeepaliveMsg {}

//
// ROUTE-REFRESH Message.
//
// Encoding format (message body):
//
// 0       7      15      23      31
// +-------+-------+-------+-------+
// |      AFI      | Res.  | SAFI  |
// +-------+-------+-------+-------+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteRefreshMsg {
    pub afi: u16,
    pub safi: u8,
}

//
// OPERATIONAL Message (draft-ietf-idr-operational-message).
//
// Encoding format (message body):
//
// +-------------------------------+
// |      Code (2 octets)          |
// +-------------------------------+
// |      Length (2 octets)        |
// +-------------------------------+
// |      Payload (variable)       |
// +-------------------------------+
//
// The payload is opaque to the speaker and passed through to the API
// stream.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct OperationalMsg {
    pub code: u16,
    pub payload: Bytes,
}

//
// Session capability intersection.
//
// Produced once per session after the OPEN exchange completes; every codec
// invocation for that session carries it and derives its encoding choices
// (AS number width, path identifiers in NLRI, maximum message size) from
// it.
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Negotiated {
    pub four_octet_as: bool,
    pub route_refresh: bool,
    pub extended_message: bool,
    pub families: BTreeSet<AfiSafi>,
    // Families with ADD-PATH in effect, per direction.
    pub addpath_tx: BTreeSet<AfiSafi>,
    pub addpath_rx: BTreeSet<AfiSafi>,
    pub multiple_labels: BTreeMap<AfiSafi, u8>,
    pub graceful_restart: Option<GracefulRestartNego>,
    pub holdtime: u16,
    pub keepalive: u16,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct GracefulRestartNego {
    pub restart_time: u16,
    pub families: BTreeSet<AfiSafi>,
}

// BGP message encoding context.
#[derive(Clone, Debug, Default)]
pub struct EncodeCxt {
    pub nego: Negotiated,
}

// BGP message decoding context.
#[derive(Clone, Debug)]
pub struct DecodeCxt {
    pub peer_type: PeerType,
    pub peer_as: u32,
    pub nego: Negotiated,
}

// ===== impl Message =====

impl Message {
    pub const MIN_LEN: u16 = 19;
    pub const MAX_LEN: u16 = 4096;
    // RFC 8654 extended maximum message size.
    pub const MAX_LEN_EXT: u16 = u16::MAX;
    const MSG_LEN_POS: std::ops::Range<usize> = 16..18;

    // Encodes BGP message into a bytes buffer.
    pub fn encode(&self, cxt: &EncodeCxt) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            // Marker field.
            buf.put_u128(u128::MAX);
            // The length field will be initialized later.
            buf.put_u16(0);

            // Message type and body.
            match self {
                Message::Open(msg) => msg.encode(&mut buf),
                Message::Update(msg) => msg.encode(&mut buf, cxt),
                Message::Notification(msg) => msg.encode(&mut buf),
                Message::Keepalive(msg) => msg.encode(&mut buf),
                Message::RouteRefresh(msg) => msg.encode(&mut buf),
                Message::Operational(msg) => msg.encode(&mut buf),
            }

            // Rewrite message length.
            let msg_len = buf.len() as u16;
            buf[Self::MSG_LEN_POS].copy_from_slice(&msg_len.to_be_bytes());

            buf.clone().freeze()
        })
    }

    // Decode buffer into a BGP message.
    //
    // This function panics if the provided buffer doesn't contain an entire
    // message.
    pub fn decode(data: &[u8], cxt: &DecodeCxt) -> DecodeResult<Self> {
        let mut buf = Bytes::copy_from_slice(data);

        // Parse and validate marker.
        let marker = buf.get_u128();
        if marker != u128::MAX {
            return Err(MessageHeaderError::ConnectionNotSynchronized.into());
        }

        // Parse and validate message length.
        let msg_len = buf.get_u16();
        let max_len = if cxt.nego.extended_message {
            Self::MAX_LEN_EXT
        } else {
            Self::MAX_LEN
        };
        if msg_len < Self::MIN_LEN || msg_len > max_len {
            return Err(MessageHeaderError::BadMessageLength(msg_len).into());
        }

        // Parse message type.
        let msg_type = buf.get_u8();
        let Some(msg_etype) = MessageType::from_u8(msg_type) else {
            return Err(MessageHeaderError::BadMessageType(msg_type).into());
        };

        // Parse message body.
        let min_msg_len = match msg_etype {
            MessageType::Open => OpenMsg::MIN_LEN,
            MessageType::Update => UpdateMsg::MIN_LEN,
            MessageType::Notification => NotificationMsg::MIN_LEN,
            MessageType::Keepalive => KeepaliveMsg::LEN,
            MessageType::RouteRefresh => RouteRefreshMsg::LEN,
            MessageType::Operational => OperationalMsg::MIN_LEN,
        };
        if msg_len < min_msg_len {
            return Err(MessageHeaderError::BadMessageLength(msg_len).into());
        }
        match msg_etype {
            MessageType::Open => {
                let msg = OpenMsg::decode(&mut buf)?;
                Ok(Message::Open(msg))
            }
            MessageType::Update => {
                let msg = UpdateMsg::decode(&mut buf, cxt)?;
                Ok(Message::Update(Box::new(msg)))
            }
            MessageType::Notification => {
                let msg = NotificationMsg::decode(&mut buf)?;
                Ok(Message::Notification(msg))
            }
            MessageType::Keepalive => {
                if msg_len != KeepaliveMsg::LEN {
                    return Err(
                        MessageHeaderError::BadMessageLength(msg_len).into()
                    );
                }
                let msg = KeepaliveMsg::decode(&mut buf)?;
                Ok(Message::Keepalive(msg))
            }
            MessageType::RouteRefresh => {
                if msg_len != RouteRefreshMsg::LEN {
                    return Err(RouteRefreshMessageError::InvalidMessageLength(
                        msg_len,
                    )
                    .into());
                }
                let msg = RouteRefreshMsg::decode(&mut buf)?;
                Ok(Message::RouteRefresh(msg))
            }
            MessageType::Operational => {
                let msg = OperationalMsg::decode(&mut buf)?;
                Ok(Message::Operational(msg))
            }
        }
    }

    // Parses the given buffer to determine if it contains a complete BGP
    // message, and returns the length of the message if successful.
    pub fn get_message_len(data: &[u8]) -> Option<usize> {
        // Validate that the buffer contains sufficient space for at least
        // the message header.
        let buf_size = data.len();
        if buf_size < Self::MIN_LEN as usize {
            return None;
        }

        // Ensure the buffer is big enough to hold the entire message.
        let mut buf = Bytes::copy_from_slice(&data[0..Self::MIN_LEN as usize]);
        let _marker = buf.get_u128();
        let msg_len = buf.get_u16();
        if msg_len < Self::MIN_LEN || msg_len as usize > buf_size {
            return None;
        }

        // Return the message size.
        Some(msg_len as usize)
    }

    pub fn msg_type(&self) -> MessageType {
        match self {
            Message::Open(_) => MessageType::Open,
            Message::Update(_) => MessageType::Update,
            Message::Notification(_) => MessageType::Notification,
            Message::Keepalive(_) => MessageType::Keepalive,
            Message::RouteRefresh(_) => MessageType::RouteRefresh,
            Message::Operational(_) => MessageType::Operational,
        }
    }
}

// ===== impl OpenMsg =====

impl OpenMsg {
    const MIN_LEN: u16 = 29;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Open as u8);
        buf.put_u8(self.version);
        buf.put_u16(self.my_as);
        buf.put_u16(self.holdtime);
        buf.put_ipv4(&self.identifier);

        // Capabilities.
        let opt_param_len_pos = buf.len();
        buf.put_u8(0);
        for capability in &self.capabilities {
            buf.put_u8(OpenParamType::Capabilities as u8);

            // The "Parm. Length" field will be initialized later.
            let param_len_pos = buf.len();
            buf.put_u8(0);

            // Encode individual capability.
            capability.encode(buf);

            // Rewrite the "Parm. Length" field.
            let param_len = buf.len() - param_len_pos - 1;
            buf[param_len_pos] = param_len as u8;
        }

        // Rewrite the "Opt Parm Len" field.
        let opt_param_len = buf.len() - opt_param_len_pos - 1;
        buf[opt_param_len_pos] = opt_param_len as u8;
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        // Parse and validate BGP version.
        let version = buf.get_u8();
        if version != BGP_VERSION {
            return Err(
                OpenMessageError::UnsupportedVersion(BGP_VERSION).into()
            );
        }

        // Parse and validate ASN.
        let my_as = buf.get_u16();
        if my_as == 0 {
            return Err(OpenMessageError::BadPeerAs.into());
        }

        // Parse and validate hold time.
        let holdtime = buf.get_u16();
        if holdtime == 1 || holdtime == 2 {
            return Err(OpenMessageError::UnacceptableHoldTime.into());
        }

        // Parse and validate BGP identifier.
        let identifier = buf.get_ipv4();
        if identifier.is_unspecified()
            || identifier.is_multicast()
            || identifier.is_broadcast()
        {
            return Err(OpenMessageError::BadBgpIdentifier.into());
        }

        // Parse and validate optional parameters.
        let mut capabilities = BTreeSet::new();
        let opt_param_len = buf.get_u8();
        if opt_param_len as usize > buf.remaining() {
            return Err(OpenMessageError::MalformedOptParam.into());
        }
        let mut buf_opts = buf.copy_to_bytes(opt_param_len as usize);
        while buf_opts.remaining() > 0 {
            if buf_opts.remaining() < 2 {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
            let param_type = buf_opts.get_u8();
            let param_len = buf_opts.get_u8();
            if param_len as usize > buf_opts.remaining() {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
            let mut buf_param_value =
                buf_opts.copy_to_bytes(param_len as usize);

            // Parse and validate capabilities.
            match OpenParamType::from_u8(param_type) {
                Some(OpenParamType::Capabilities) => {
                    while buf_param_value.remaining() > 0 {
                        if let Some(cap) =
                            Capability::decode(&mut buf_param_value)?
                        {
                            capabilities.insert(cap);
                        }
                    }
                }
                None => {
                    return Err(OpenMessageError::UnsupportedOptParam.into());
                }
            }
        }

        Ok(OpenMsg {
            version,
            my_as,
            holdtime,
            identifier,
            capabilities,
        })
    }

    // The peer's real AS number: the four-octet capability value when
    // advertised, the header field otherwise.
    pub fn real_as(&self) -> u32 {
        self.capabilities
            .iter()
            .find_map(|cap| {
                if let Capability::FourOctetAsNumber { asn } = cap {
                    Some(*asn)
                } else {
                    None
                }
            })
            .unwrap_or(self.my_as as u32)
    }
}

// ===== impl Capability =====

impl Capability {
    fn encode(&self, buf: &mut BytesMut) {
        let start_pos = buf.len();

        match self {
            Capability::MultiProtocol { afi, safi } => {
                buf.put_u8(CapabilityCode::MultiProtocol as u8);
                buf.put_u8(0);
                buf.put_u16(afi.to_u16().unwrap());
                buf.put_u8(0);
                buf.put_u8(safi.to_u8().unwrap());
            }
            Capability::RouteRefresh => {
                buf.put_u8(CapabilityCode::RouteRefresh as u8);
                buf.put_u8(0);
            }
            Capability::ExtendedNexthop(tuples) => {
                buf.put_u8(CapabilityCode::ExtendedNexthop as u8);
                buf.put_u8(0);
                for tuple in tuples {
                    buf.put_u16(tuple.afi.to_u16().unwrap());
                    buf.put_u16(tuple.safi.to_u8().unwrap() as u16);
                    buf.put_u16(tuple.nexthop_afi.to_u16().unwrap());
                }
            }
            Capability::ExtendedMessage => {
                buf.put_u8(CapabilityCode::ExtendedMessage as u8);
                buf.put_u8(0);
            }
            Capability::MultipleLabels(tuples) => {
                buf.put_u8(CapabilityCode::MultipleLabels as u8);
                buf.put_u8(0);
                for tuple in tuples {
                    buf.put_u16(tuple.afi.to_u16().unwrap());
                    buf.put_u8(tuple.safi.to_u8().unwrap());
                    buf.put_u8(tuple.count);
                }
            }
            Capability::GracefulRestart {
                restart_state,
                restart_time,
                families,
            } => {
                buf.put_u8(CapabilityCode::GracefulRestart as u8);
                buf.put_u8(0);
                let mut flags_time = restart_time & 0x0fff;
                if *restart_state {
                    flags_time |= (GR_RESTART_STATE_FLAG as u16) << 12;
                }
                buf.put_u16(flags_time);
                for tuple in families {
                    buf.put_u16(tuple.afi.to_u16().unwrap());
                    buf.put_u8(tuple.safi.to_u8().unwrap());
                    buf.put_u8(if tuple.forwarding {
                        GR_FORWARDING_STATE_FLAG
                    } else {
                        0
                    });
                }
            }
            Capability::FourOctetAsNumber { asn } => {
                buf.put_u8(CapabilityCode::FourOctetAsNumber as u8);
                buf.put_u8(0);
                buf.put_u32(*asn);
            }
            Capability::Operational => {
                buf.put_u8(CapabilityCode::Operational as u8);
                buf.put_u8(0);
            }
            Capability::Multisession(value) => {
                buf.put_u8(CapabilityCode::Multisession as u8);
                buf.put_u8(0);
                buf.put_slice(value);
            }
            Capability::AddPath(tuples) => {
                buf.put_u8(CapabilityCode::AddPath as u8);
                buf.put_u8(0);
                for tuple in tuples {
                    buf.put_u16(tuple.afi.to_u16().unwrap());
                    buf.put_u8(tuple.safi.to_u8().unwrap());
                    buf.put_u8(tuple.mode as u8);
                }
            }
            Capability::Aigp => {
                buf.put_u8(CapabilityCode::Aigp as u8);
                buf.put_u8(0);
            }
            Capability::Unknown { code, value } => {
                buf.put_u8(*code);
                buf.put_u8(0);
                buf.put_slice(value);
            }
        }

        // Rewrite the "Capability Length" field.
        let cap_len = buf.len() - start_pos - 2;
        buf[start_pos + 1] = cap_len as u8;
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Option<Self>> {
        if buf.remaining() < 2 {
            return Err(OpenMessageError::MalformedOptParam.into());
        }
        let cap_type = buf.get_u8();
        let cap_len = buf.get_u8();
        if cap_len as usize > buf.remaining() {
            return Err(OpenMessageError::MalformedOptParam.into());
        }

        let mut buf_cap = buf.copy_to_bytes(cap_len as usize);
        let cap = match CapabilityCode::from_u8(cap_type) {
            Some(CapabilityCode::MultiProtocol) => {
                if cap_len != 4 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                let afi = buf_cap.get_u16();
                let Some(afi) = Afi::from_u16(afi) else {
                    // Ignore unknown AFI.
                    return Ok(None);
                };
                let _reserved = buf_cap.get_u8();
                let safi = buf_cap.get_u8();
                let Some(safi) = Safi::from_u8(safi) else {
                    // Ignore unknown SAFI.
                    return Ok(None);
                };

                Capability::MultiProtocol { afi, safi }
            }
            Some(CapabilityCode::RouteRefresh) => {
                if cap_len != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                Capability::RouteRefresh
            }
            Some(CapabilityCode::ExtendedNexthop) => {
                if cap_len % 6 != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                let mut tuples = BTreeSet::new();
                while buf_cap.remaining() > 0 {
                    let afi = buf_cap.get_u16();
                    let Some(afi) = Afi::from_u16(afi) else {
                        return Ok(None);
                    };
                    let safi = buf_cap.get_u16();
                    let Some(safi) = Safi::from_u8(safi as u8) else {
                        return Ok(None);
                    };
                    let nexthop_afi = buf_cap.get_u16();
                    let Some(nexthop_afi) = Afi::from_u16(nexthop_afi) else {
                        return Ok(None);
                    };
                    tuples.insert(ExtNexthopTuple {
                        afi,
                        safi,
                        nexthop_afi,
                    });
                }
                Capability::ExtendedNexthop(tuples)
            }
            Some(CapabilityCode::ExtendedMessage) => {
                if cap_len != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                Capability::ExtendedMessage
            }
            Some(CapabilityCode::MultipleLabels) => {
                if cap_len % 4 != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                let mut tuples = BTreeSet::new();
                while buf_cap.remaining() > 0 {
                    let afi = buf_cap.get_u16();
                    let Some(afi) = Afi::from_u16(afi) else {
                        return Ok(None);
                    };
                    let safi = buf_cap.get_u8();
                    let Some(safi) = Safi::from_u8(safi) else {
                        return Ok(None);
                    };
                    let count = buf_cap.get_u8();
                    tuples.insert(MultipleLabelsTuple { afi, safi, count });
                }
                Capability::MultipleLabels(tuples)
            }
            Some(CapabilityCode::GracefulRestart) => {
                if cap_len < 2 || (cap_len - 2) % 4 != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                let flags_time = buf_cap.get_u16();
                let restart_state = (flags_time >> 12) as u8
                    & GR_RESTART_STATE_FLAG
                    != 0;
                let restart_time = flags_time & 0x0fff;
                let mut families = BTreeSet::new();
                while buf_cap.remaining() > 0 {
                    let afi = buf_cap.get_u16();
                    let Some(afi) = Afi::from_u16(afi) else {
                        return Ok(None);
                    };
                    let safi = buf_cap.get_u8();
                    let Some(safi) = Safi::from_u8(safi) else {
                        return Ok(None);
                    };
                    let flags = buf_cap.get_u8();
                    families.insert(GracefulRestartTuple {
                        afi,
                        safi,
                        forwarding: flags & GR_FORWARDING_STATE_FLAG != 0,
                    });
                }
                Capability::GracefulRestart {
                    restart_state,
                    restart_time,
                    families,
                }
            }
            Some(CapabilityCode::FourOctetAsNumber) => {
                if cap_len != 4 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                let asn = buf_cap.get_u32();
                Capability::FourOctetAsNumber { asn }
            }
            Some(CapabilityCode::Operational) => {
                Capability::Operational
            }
            Some(CapabilityCode::Multisession) => {
                Capability::Multisession(buf_cap.copy_to_bytes(buf_cap.remaining()))
            }
            Some(CapabilityCode::AddPath) => {
                if cap_len % 4 != 0 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }

                let mut tuples = BTreeSet::new();
                while buf_cap.remaining() > 0 {
                    let afi = buf_cap.get_u16();
                    let Some(afi) = Afi::from_u16(afi) else {
                        // Ignore unknown AFI.
                        return Ok(None);
                    };
                    let safi = buf_cap.get_u8();
                    let Some(safi) = Safi::from_u8(safi) else {
                        // Ignore unknown SAFI.
                        return Ok(None);
                    };
                    let mode = buf_cap.get_u8();
                    let Some(mode) = AddPathMode::from_u8(mode) else {
                        // Ignore unknown value.
                        return Ok(None);
                    };
                    tuples.insert(AddPathTuple { afi, safi, mode });
                }
                Capability::AddPath(tuples)
            }
            Some(CapabilityCode::Aigp) => {
                Capability::Aigp
            }
            None => Capability::Unknown {
                code: cap_type,
                value: buf_cap.copy_to_bytes(buf_cap.remaining()),
            },
        };

        Ok(Some(cap))
    }

    pub fn code(&self) -> u8 {
        match self {
            Capability::MultiProtocol { .. } => {
                CapabilityCode::MultiProtocol as u8
            }
            Capability::RouteRefresh => CapabilityCode::RouteRefresh as u8,
            Capability::ExtendedNexthop(_) => {
                CapabilityCode::ExtendedNexthop as u8
            }
            Capability::ExtendedMessage => {
                CapabilityCode::ExtendedMessage as u8
            }
            Capability::MultipleLabels(_) => {
                CapabilityCode::MultipleLabels as u8
            }
            Capability::GracefulRestart { .. } => {
                CapabilityCode::GracefulRestart as u8
            }
            Capability::FourOctetAsNumber { .. } => {
                CapabilityCode::FourOctetAsNumber as u8
            }
            Capability::Operational => CapabilityCode::Operational as u8,
            Capability::Multisession(_) => CapabilityCode::Multisession as u8,
            Capability::AddPath { .. } => CapabilityCode::AddPath as u8,
            Capability::Aigp => CapabilityCode::Aigp as u8,
            Capability::Unknown { code, .. } => *code,
        }
    }
}

// ===== impl UpdateMsg =====

impl UpdateMsg {
    pub const MIN_LEN: u16 = 23;

    // Constructs an End-of-RIB marker for the given family.
    pub fn eor(family: AfiSafi) -> UpdateMsg {
        UpdateMsg {
            eor: Some(family),
            ..Default::default()
        }
    }

    fn encode(&self, buf: &mut BytesMut, cxt: &EncodeCxt) {
        buf.put_u8(MessageType::Update as u8);

        // Withdrawn Routes.
        let start_pos = buf.len();
        buf.put_u16(0);
        let classic_unreach = self
            .unreach
            .iter()
            .filter(|nlri| nlri.family() == AfiSafi::Ipv4Unicast)
            .collect::<Vec<_>>();
        if !classic_unreach.is_empty() {
            let addpath =
                cxt.nego.addpath_tx.contains(&AfiSafi::Ipv4Unicast);
            for nlri in &classic_unreach {
                nlri.encode(buf, addpath);
            }

            // Rewrite the "Withdrawn Routes Length" field.
            let len = (buf.len() - start_pos - 2) as u16;
            buf[start_pos..start_pos + 2].copy_from_slice(&len.to_be_bytes());
        }

        // Path Attributes.
        let start_pos = buf.len();
        buf.put_u16(0);
        let mp_unreach = self
            .unreach
            .iter()
            .filter(|nlri| nlri.family() != AfiSafi::Ipv4Unicast)
            .cloned()
            .collect::<Vec<_>>();
        if let Some(family) = self.eor
            && family != AfiSafi::Ipv4Unicast
        {
            // Multiprotocol End-of-RIB: an empty MP_UNREACH_NLRI.
            attribute::encode_mp_unreach_eor(buf, family);
        } else if let Some(attrs) = &self.attrs {
            attrs.encode(buf, &self.reach, &mp_unreach, cxt);
        } else if !mp_unreach.is_empty() {
            attribute::encode_mp_unreach(buf, &mp_unreach, cxt);
        }
        let len = (buf.len() - start_pos - 2) as u16;
        if len != 0 {
            // Rewrite the "Total Path Attribute Length" field.
            buf[start_pos..start_pos + 2].copy_from_slice(&len.to_be_bytes());
        }

        // Network Layer Reachability Information.
        let addpath = cxt.nego.addpath_tx.contains(&AfiSafi::Ipv4Unicast);
        for nlri in self
            .reach
            .iter()
            .filter(|nlri| nlri.family() == AfiSafi::Ipv4Unicast)
        {
            nlri.encode(buf, addpath);
        }
    }

    pub fn decode(buf: &mut Bytes, cxt: &DecodeCxt) -> DecodeResult<Self> {
        let mut reach = Vec::new();
        let mut unreach = Vec::new();
        let mut attrs = None;
        let mut nexthop = None;
        let mut mp_reach = None;
        let mut mp_unreach: Option<MpUnreach> = None;

        let classic_addpath =
            cxt.nego.addpath_rx.contains(&AfiSafi::Ipv4Unicast);

        // Withdrawn Routes Length.
        let wdraw_len = buf.get_u16();
        if wdraw_len as usize > buf.remaining() {
            return Err(UpdateMessageError::MalformedAttributeList.into());
        }

        // Withdrawn Routes.
        let mut buf_wdraw = buf.copy_to_bytes(wdraw_len as usize);
        while buf_wdraw.remaining() > 0 {
            let nlri = Nlri::decode(
                AfiSafi::Ipv4Unicast,
                &mut buf_wdraw,
                classic_addpath,
            )?;
            unreach.push(nlri);
        }

        // Total Path Attribute Length.
        if buf.remaining() < 2 {
            return Err(UpdateMessageError::MalformedAttributeList.into());
        }
        let attr_len = buf.get_u16();
        if attr_len as usize > buf.remaining() {
            return Err(UpdateMessageError::MalformedAttributeList.into());
        }

        // Path Attributes.
        if attr_len != 0 {
            let mut buf_attr = buf.copy_to_bytes(attr_len as usize);
            let nlri_present = buf.remaining() > 0;
            attrs = Attrs::decode(
                &mut buf_attr,
                cxt,
                &mut nexthop,
                nlri_present,
                &mut mp_reach,
                &mut mp_unreach,
            )?;
        }

        // Network Layer Reachability Information.
        //
        // All prefixes are ignored if the NEXT_HOP attribute is missing.
        let mut classic_reach = Vec::new();
        while buf.remaining() > 0 {
            let nlri = Nlri::decode(
                AfiSafi::Ipv4Unicast,
                buf,
                classic_addpath,
            )?;
            classic_reach.push(nlri);
        }
        if let Some(attrs) = attrs.as_mut() {
            if !classic_reach.is_empty()
                && let Some(nexthop) = nexthop
            {
                attrs.base.nexthop = Some(nexthop.into());
                reach.extend(classic_reach);
            }

            // Multiprotocol reachable NLRIs carry their next hop(s) inside
            // the attribute.
            if let Some(mp_reach) = mp_reach {
                attrs.base.nexthop = Some(mp_reach.nexthop);
                attrs.base.ll_nexthop = mp_reach.ll_nexthop;
                reach.extend(mp_reach.nlris);
            }
        }

        // Multiprotocol unreachable NLRIs.
        let mut mp_eor = None;
        if let Some(mp_unreach) = mp_unreach {
            if mp_unreach.nlris.is_empty() {
                mp_eor = Some(mp_unreach.family);
            }
            unreach.extend(mp_unreach.nlris);
        }

        // End-of-RIB detection.
        let eor = if wdraw_len == 0
            && attr_len == 0
            && reach.is_empty()
            && unreach.is_empty()
        {
            Some(AfiSafi::Ipv4Unicast)
        } else if attrs.is_none() && reach.is_empty() && unreach.is_empty() {
            mp_eor
        } else {
            None
        };

        Ok(UpdateMsg {
            reach,
            unreach,
            attrs,
            eor,
        })
    }
}

// ===== impl MpReach =====

impl MpReach {
    pub const MIN_LEN: u16 = 5;

    pub(crate) fn decode(
        buf: &mut Bytes,
        cxt: &DecodeCxt,
        mp_reach: &mut Option<MpReach>,
    ) -> Result<(), AttrError> {
        let Some(family) = attribute::decode_mp_family(buf)? else {
            // Unsupported address family: quietly ignore the attribute.
            return Err(AttrError::Discard);
        };

        // Next hop.
        let nh_len = buf.try_get_u8()?;
        if nh_len as usize > buf.remaining() {
            return Err(AttrError::Reset);
        }
        let mut buf_nh = buf.copy_to_bytes(nh_len as usize);
        let (nexthop, ll_nexthop): (IpAddr, Option<Ipv6Addr>) = match nh_len {
            4 => (buf_nh.get_ipv4().into(), None),
            16 => (buf_nh.get_ipv6().into(), None),
            32 => {
                let global = buf_nh.get_ipv6();
                let ll = buf_nh.get_ipv6();
                (global.into(), Some(ll))
            }
            // VPN forms: the next hop is prefixed by a zeroed RD.
            12 => {
                buf_nh.advance(8);
                (buf_nh.get_ipv4().into(), None)
            }
            24 => {
                buf_nh.advance(8);
                (buf_nh.get_ipv6().into(), None)
            }
            _ => return Err(AttrError::Reset),
        };

        // Reserved octet.
        let _reserved = buf.try_get_u8()?;

        // NLRIs.
        let addpath = cxt.nego.addpath_rx.contains(&family);
        let mut nlris = Vec::new();
        while buf.remaining() > 0 {
            let nlri = Nlri::decode(family, buf, addpath)
                .map_err(|_| AttrError::Withdraw)?;
            nlris.push(nlri);
        }

        *mp_reach = Some(MpReach {
            family,
            nexthop,
            ll_nexthop,
            nlris,
        });
        Ok(())
    }
}

// ===== impl MpUnreach =====

impl MpUnreach {
    pub const MIN_LEN: u16 = 3;

    pub(crate) fn decode(
        buf: &mut Bytes,
        cxt: &DecodeCxt,
        mp_unreach: &mut Option<MpUnreach>,
    ) -> Result<(), AttrError> {
        let Some(family) = attribute::decode_mp_family(buf)? else {
            // Unsupported address family: quietly ignore the attribute.
            return Err(AttrError::Discard);
        };

        let addpath = cxt.nego.addpath_rx.contains(&family);
        let mut nlris = Vec::new();
        while buf.remaining() > 0 {
            let nlri = Nlri::decode(family, buf, addpath)
                .map_err(|_| AttrError::Withdraw)?;
            nlris.push(nlri);
        }

        *mp_unreach = Some(MpUnreach { family, nlris });
        Ok(())
    }
}

// ===== impl NotificationMsg =====

impl NotificationMsg {
    const MIN_LEN: u16 = 21;

    pub(crate) fn new(
        error_code: impl ToPrimitive,
        error_subcode: impl ToPrimitive,
    ) -> Self {
        NotificationMsg {
            error_code: error_code.to_u8().unwrap(),
            error_subcode: error_subcode.to_u8().unwrap(),
            data: Default::default(),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Notification as u8);
        buf.put_u8(self.error_code);
        buf.put_u8(self.error_subcode);
        buf.put_slice(&self.data);
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let error_code = buf.get_u8();
        let error_subcode = buf.get_u8();

        Ok(NotificationMsg {
            error_code,
            error_subcode,
            data: buf.to_vec(),
        })
    }

    pub fn is_cease(&self, subcode: impl ToPrimitive) -> bool {
        self.error_code == ErrorCode::Cease as u8
            && Some(self.error_subcode) == subcode.to_u8()
    }
}

impl From<DecodeError> for NotificationMsg {
    fn from(error: DecodeError) -> NotificationMsg {
        let error_code;
        let error_subcode;
        let data = vec![];

        match error {
            DecodeError::ReadOutOfBounds => {
                error_code = ErrorCode::MessageHeaderError as u8;
                error_subcode = MessageHeaderErrorSubcode::Unspecific as u8;
            }
            DecodeError::MessageHeader(error) => {
                error_code = ErrorCode::MessageHeaderError as u8;
                error_subcode = match error {
                    MessageHeaderError::ReadOutOfBounds => {
                        MessageHeaderErrorSubcode::Unspecific
                    }
                    MessageHeaderError::ConnectionNotSynchronized => {
                        MessageHeaderErrorSubcode::ConnectionNotSynchronized
                    }
                    MessageHeaderError::BadMessageLength(..) => {
                        MessageHeaderErrorSubcode::BadMessageLength
                    }
                    MessageHeaderError::BadMessageType(..) => {
                        MessageHeaderErrorSubcode::BadMessageType
                    }
                } as u8;
            }
            DecodeError::OpenMessage(error) => {
                error_code = ErrorCode::OpenMessageError as u8;
                error_subcode = match error {
                    OpenMessageError::ReadOutOfBounds => {
                        OpenMessageErrorSubcode::Unspecific
                    }
                    OpenMessageError::UnsupportedVersion(..) => {
                        OpenMessageErrorSubcode::UnsupportedVersionNumber
                    }
                    OpenMessageError::BadPeerAs => {
                        OpenMessageErrorSubcode::BadPeerAs
                    }
                    OpenMessageError::BadBgpIdentifier => {
                        OpenMessageErrorSubcode::BadBgpIdentifier
                    }
                    OpenMessageError::UnsupportedOptParam => {
                        OpenMessageErrorSubcode::UnsupportedOptParam
                    }
                    OpenMessageError::UnacceptableHoldTime => {
                        OpenMessageErrorSubcode::UnacceptableHoldTime
                    }
                    OpenMessageError::UnsupportedCapability => {
                        OpenMessageErrorSubcode::UnsupportedCapability
                    }
                    OpenMessageError::MalformedOptParam => {
                        OpenMessageErrorSubcode::Unspecific
                    }
                } as u8;
            }
            DecodeError::UpdateMessage(error) => {
                error_code = ErrorCode::UpdateMessageError as u8;
                error_subcode = match error {
                    UpdateMessageError::ReadOutOfBounds => {
                        UpdateMessageErrorSubcode::MalformedAttributeList
                    }
                    UpdateMessageError::MalformedAttributeList => {
                        UpdateMessageErrorSubcode::MalformedAttributeList
                    }
                    UpdateMessageError::UnrecognizedWellKnownAttribute => {
                        UpdateMessageErrorSubcode::UnrecognizedWellKnownAttribute
                    }
                    UpdateMessageError::AttributeLengthError => {
                        UpdateMessageErrorSubcode::AttributeLengthError
                    }
                    UpdateMessageError::OptionalAttributeError => {
                        UpdateMessageErrorSubcode::OptionalAttributeError
                    }
                    UpdateMessageError::InvalidNetworkField => {
                        UpdateMessageErrorSubcode::InvalidNetworkField
                    }
                    UpdateMessageError::UnsupportedAddressFamily => {
                        UpdateMessageErrorSubcode::OptionalAttributeError
                    }
                } as u8;
            }
            DecodeError::RouteRefreshMessage(error) => {
                error_code = ErrorCode::RouteRefreshMessageError as u8;
                error_subcode = match error {
                    RouteRefreshMessageError::InvalidMessageLength(..) => {
                        RouteRefreshErrorSubcode::InvalidMessageLength
                    }
                } as u8;
            }
        }

        NotificationMsg {
            error_code,
            error_subcode,
            data,
        }
    }
}

// ===== impl KeepaliveMsg =====

impl KeepaliveMsg {
    const LEN: u16 = 19;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Keepalive as u8);
    }

    pub fn decode(_buf: &mut Bytes) -> DecodeResult<Self> {
        // A KEEPALIVE message consists of only the message header.
        Ok(KeepaliveMsg {})
    }
}

// ===== impl RouteRefreshMsg =====

impl RouteRefreshMsg {
    const LEN: u16 = 23;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::RouteRefresh as u8);
        buf.put_u16(self.afi);
        buf.put_u8(0);
        buf.put_u8(self.safi);
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let afi = buf.get_u16();
        let _reserved = buf.get_u8();
        let safi = buf.get_u8();
        Ok(RouteRefreshMsg { afi, safi })
    }

    pub fn family(&self) -> Option<AfiSafi> {
        let afi = Afi::from_u16(self.afi)?;
        let safi = Safi::from_u8(self.safi)?;
        AfiSafi::from_pair(afi, safi)
    }
}

// ===== impl OperationalMsg =====

impl OperationalMsg {
    const MIN_LEN: u16 = 23;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Operational as u8);
        buf.put_u16(self.code);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let code = buf.get_u16();
        let payload_len = buf.try_get_u16()?;
        if payload_len as usize != buf.remaining() {
            return Err(
                MessageHeaderError::BadMessageLength(payload_len).into()
            );
        }
        let payload = buf.copy_to_bytes(payload_len as usize);
        Ok(OperationalMsg { code, payload })
    }
}

// ===== impl Negotiated =====

impl Negotiated {
    // Maximum message size in effect for the session.
    pub fn max_message_len(&self) -> u16 {
        if self.extended_message {
            Message::MAX_LEN_EXT
        } else {
            Message::MAX_LEN
        }
    }
}

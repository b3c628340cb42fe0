//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::{Buf, BufMut, Bytes};
use ferric_utils::bytes::TLS_BUF;
use serde::{Deserialize, Serialize};

use crate::af::AfiSafi;
use crate::packet::consts::{Afi, Safi};
use crate::packet::error::{DecodeResult, UpdateMessageError};
use crate::packet::nlri::{NlriValue, RouteDistinguisher, prefix_wire_len};

//
// Flow Specification NLRI (RFC 8955/8956).
//
// Encoding format:
//
// +------------------------------+
// |    Length (0xnn or 0xfnnn)   |
// +------------------------------+
// |    NLRI value (variable)     |
// +------------------------------+
//
// The VPN variants prepend a route distinguisher to the rule set. The rule
// set is an ordered list of components, each identified by a 1-octet type.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct FlowNlri {
    pub family: AfiSafi,
    pub rd: Option<RouteDistinguisher>,
    pub rules: Vec<FlowRule>,
}

// A single flow component: type plus its raw encoded payload.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct FlowRule {
    pub component: u8,
    pub data: Bytes,
}

// Flow component types.
pub const FLOW_DEST_PREFIX: u8 = 1;
pub const FLOW_SRC_PREFIX: u8 = 2;
pub const FLOW_FLOW_LABEL: u8 = 13;

// Length values of 0xf0 and above use the extended 2-octet form.
const LEN_EXTENDED: u8 = 0xf0;
const LEN_MAX: usize = 0x0fff;

// End-of-list bit in a numeric operator octet.
const OP_END: u8 = 0x80;

// ===== global functions =====

pub(crate) fn take(buf: &mut Bytes, _family: AfiSafi) -> DecodeResult<Bytes> {
    if buf.remaining() < 1 {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    let b0 = buf.chunk()[0];
    let (hdr_len, body_len) = if b0 >= LEN_EXTENDED {
        if buf.remaining() < 2 {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
        let len = (((b0 & 0x0f) as usize) << 8) | buf.chunk()[1] as usize;
        (2, len)
    } else {
        (1, b0 as usize)
    };
    if body_len > LEN_MAX || buf.remaining() < hdr_len + body_len {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    Ok(buf.copy_to_bytes(hdr_len + body_len))
}

pub(crate) fn parse(
    family: AfiSafi,
    mut buf: Bytes,
) -> DecodeResult<NlriValue> {
    // Strip the length field.
    let b0 = buf.get_u8();
    if b0 >= LEN_EXTENDED {
        let _ = buf.get_u8();
    }

    // The VPN variants carry a route distinguisher first.
    let mut rd = None;
    if family.safi() == Safi::FlowVpn {
        rd = Some(RouteDistinguisher::decode(&mut buf)?);
    }

    // Walk the components. Their ordering by increasing type is mandated by
    // the RFC and preserved as received.
    let mut rules = Vec::new();
    while buf.remaining() > 0 {
        let component = buf.get_u8();
        let data_len = component_len(component, family.afi(), &buf)?;
        if data_len > buf.remaining() {
            return Err(UpdateMessageError::InvalidNetworkField.into());
        }
        let data = buf.copy_to_bytes(data_len);
        rules.push(FlowRule { component, data });
    }

    Ok(NlriValue::Flow(FlowNlri { family, rd, rules }))
}

pub(crate) fn emit(nlri: &FlowNlri) -> Bytes {
    TLS_BUF.with(|buf| {
        let mut buf = buf.borrow_mut();
        buf.clear();

        let mut body_len = nlri
            .rules
            .iter()
            .map(|rule| 1 + rule.data.len())
            .sum::<usize>();
        if nlri.rd.is_some() {
            body_len += RouteDistinguisher::LENGTH;
        }

        if body_len >= LEN_EXTENDED as usize {
            buf.put_u16(0xf000 | body_len as u16);
        } else {
            buf.put_u8(body_len as u8);
        }
        if let Some(rd) = &nlri.rd {
            rd.encode(&mut buf);
        }
        for rule in &nlri.rules {
            buf.put_u8(rule.component);
            buf.put_slice(&rule.data);
        }
        buf.clone().freeze()
    })
}

// ===== impl Display =====

impl std::fmt::Display for FlowNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "flow")?;
        if let Some(rd) = &self.rd {
            write!(f, " rd {rd}")?;
        }
        for rule in &self.rules {
            write!(f, " component {}", rule.component)?;
        }
        Ok(())
    }
}

// ===== helper functions =====

// Computes the payload length of a single flow component without consuming
// the buffer.
fn component_len(component: u8, afi: Afi, buf: &Bytes) -> DecodeResult<usize> {
    match component {
        FLOW_DEST_PREFIX | FLOW_SRC_PREFIX => {
            if buf.remaining() < 1 {
                return Err(UpdateMessageError::InvalidNetworkField.into());
            }
            let plen = buf.chunk()[0];
            match afi {
                // [length][prefix]
                Afi::Ipv4 => Ok(1 + prefix_wire_len(plen)),
                // [length][offset][pattern]
                Afi::Ipv6 => {
                    if buf.remaining() < 2 {
                        return Err(
                            UpdateMessageError::InvalidNetworkField.into()
                        );
                    }
                    let offset = buf.chunk()[1];
                    if offset > plen {
                        return Err(
                            UpdateMessageError::InvalidNetworkField.into()
                        );
                    }
                    Ok(2 + prefix_wire_len(plen - offset))
                }
                _ => Err(UpdateMessageError::InvalidNetworkField.into()),
            }
        }
        _ => {
            // Numeric component: a list of (operator, value) pairs terminated
            // by the end-of-list bit.
            let mut pos = 0;
            loop {
                if pos >= buf.remaining() {
                    return Err(UpdateMessageError::InvalidNetworkField.into());
                }
                let op = buf.chunk()[pos];
                let value_len = 1 << ((op >> 4) & 0x03);
                pos += 1 + value_len;
                if op & OP_END != 0 {
                    break;
                }
            }
            if pos > buf.remaining() {
                return Err(UpdateMessageError::InvalidNetworkField.into());
            }
            Ok(pos)
        }
    }
}

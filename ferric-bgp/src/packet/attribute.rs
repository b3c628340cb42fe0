//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use ferric_utils::bytes::{BytesExt, BytesMutExt};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::af::AfiSafi;
use crate::debug::Debug;
use crate::neighbor::PeerType;
use crate::packet::consts::{
    AS_TRANS, Afi, AigpType, AsPathSegmentType, AttrFlags, AttrType, Origin,
    Safi,
};
use crate::packet::error::{AttrError, UpdateMessageError};
use crate::packet::message::{DecodeCxt, EncodeCxt, MpReach, MpUnreach};
use crate::packet::nlri::{Nlri, RouteDistinguisher};

pub const ATTR_MIN_LEN: u16 = 3;
pub const ATTR_MIN_LEN_EXT: u16 = 4;

//
// Path attribute collection.
//
// The collection is the semantic container for the attribute portion of an
// UPDATE message: `encode()` canonicalises it (ascending type codes, MP
// attributes first, AS number width chosen from the negotiated
// capabilities), and two collections are equal exactly when they
// canonicalise to the same wire bytes.
//
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Attrs {
    pub base: BaseAttrs,
    pub comm: Option<Comms>,
    pub ext_comm: Option<ExtComms>,
    pub extv6_comm: Option<Extv6Comms>,
    pub large_comm: Option<LargeComms>,
    pub aigp: Option<u64>,
    pub pmsi_tunnel: Option<PmsiTunnel>,
    pub prefix_sid: Option<PrefixSid>,
    pub unknown: Vec<UnknownAttr>,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct BaseAttrs {
    pub origin: Origin,
    pub as_path: AsPath,
    pub as4_path: Option<AsPath>,
    pub nexthop: Option<IpAddr>,
    pub ll_nexthop: Option<Ipv6Addr>,
    pub med: Option<u32>,
    pub local_pref: Option<u32>,
    pub aggregator: Option<Aggregator>,
    pub as4_aggregator: Option<Aggregator>,
    pub atomic_aggregate: bool,
    pub originator_id: Option<Ipv4Addr>,
    pub cluster_list: Option<ClusterList>,
}

#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AsPath {
    pub segments: VecDeque<AsPathSegment>,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AsPathSegment {
    pub seg_type: AsPathSegmentType,
    pub members: VecDeque<u32>,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Aggregator {
    pub asn: u32,
    pub identifier: Ipv4Addr,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct ClusterList(pub BTreeSet<Ipv4Addr>);

// P-Multicast Service Interface tunnel attribute (RFC 6514). The tunnel
// identifier is kept in wire form.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct PmsiTunnel {
    pub flags: u8,
    pub tunnel_type: u8,
    pub label: u32,
    pub tunnel_id: Bytes,
}

// BGP Prefix-SID attribute (RFC 8669), kept as its raw TLV sequence with
// lazy accessors for the pieces the speaker cares about.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct PrefixSid(pub Bytes);

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Comm(pub u32);

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct ExtComm(pub [u8; 8]);

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Extv6Comm(pub Ipv6Addr, pub u32);

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LargeComm(pub [u8; 12]);

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct CommList<T: CommType>(pub BTreeSet<T>);

pub trait CommType:
    Clone + std::fmt::Debug + Eq + Ord + PartialEq + PartialOrd
{
    const TYPE: AttrType;
    const LENGTH: usize;

    fn encode(&self, buf: &mut BytesMut);
    fn decode(buf: &mut Bytes) -> Self;
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(new)]
#[derive(Deserialize, Serialize)]
pub struct UnknownAttr {
    pub attr_type: u8,
    pub flags: AttrFlags,
    pub length: u16,
    pub value: Bytes,
}

// Useful type definitions.
pub type Comms = CommList<Comm>;
pub type ExtComms = CommList<ExtComm>;
pub type Extv6Comms = CommList<Extv6Comm>;
pub type LargeComms = CommList<LargeComm>;

// ===== impl Attrs =====

impl Attrs {
    // Encodes the attribute collection.
    //
    // `reach` and `unreach` are the announcement and withdrawal change sets
    // of the message being built; they drive the synthesis of the
    // MP_REACH_NLRI/MP_UNREACH_NLRI attributes and of the classic NEXT_HOP.
    // Each set holds NLRIs of a single family.
    pub(crate) fn encode(
        &self,
        buf: &mut BytesMut,
        reach: &[Nlri],
        unreach: &[Nlri],
        cxt: &EncodeCxt,
    ) {
        let four_byte_asn = cxt.nego.four_octet_as;

        // RFC 7606 - Section 5.1:
        // "The MP_REACH_NLRI or MP_UNREACH_NLRI attribute (if present) SHALL
        // be encoded as the very first path attribute in an UPDATE message".
        if let Some(first) = reach.first()
            && first.family() != AfiSafi::Ipv4Unicast
        {
            self.encode_mp_reach(buf, reach, cxt);
        }
        if let Some(first) = unreach.first()
            && first.family() != AfiSafi::Ipv4Unicast
        {
            encode_mp_unreach(buf, unreach, cxt);
        }

        // RFC 4271 - Section 5:
        // "The sender of an UPDATE message SHOULD order path attributes
        // within the UPDATE message in ascending order of attribute type".

        // ORIGIN attribute.
        origin::encode(self.base.origin, buf);

        // AS_PATH attribute (with AS4_PATH synthesis on downgrade).
        let mut as4_path = None;
        if four_byte_asn {
            self.base.as_path.encode(
                buf,
                AttrFlags::TRANSITIVE,
                AttrType::AsPath,
                true,
            );
        } else {
            if self.base.as_path.has_as4() {
                as4_path = Some(self.base.as_path.clone());
            }
            self.base.as_path.downgrade().encode(
                buf,
                AttrFlags::TRANSITIVE,
                AttrType::AsPath,
                false,
            );
        }

        // NEXT_HOP attribute (IPv4 unicast over the classic fields only).
        if let Some(first) = reach.first()
            && first.family() == AfiSafi::Ipv4Unicast
            && let Some(IpAddr::V4(nexthop)) = self.base.nexthop
        {
            nexthop::encode(nexthop, buf);
        }

        // MULTI_EXIT_DISC attribute.
        if let Some(metric) = self.base.med {
            med::encode(metric, buf);
        }

        // LOCAL_PREF attribute.
        if let Some(local_pref) = self.base.local_pref {
            local_pref::encode(local_pref, buf);
        }

        // ATOMIC_AGGREGATE attribute.
        if self.base.atomic_aggregate {
            atomic_aggregate::encode(buf);
        }

        // AGGREGATOR attribute (with AS4_AGGREGATOR synthesis on downgrade).
        let mut as4_aggregator = self.base.as4_aggregator.clone();
        if let Some(aggregator) = &self.base.aggregator {
            if !four_byte_asn && aggregator.asn > u16::MAX as u32 {
                as4_aggregator = Some(aggregator.clone());
            }
            aggregator.encode(
                buf,
                AttrFlags::TRANSITIVE | AttrFlags::OPTIONAL,
                AttrType::Aggregator,
                four_byte_asn,
            );
        }

        // COMMUNITIES attribute.
        if let Some(comm) = &self.comm {
            comm.encode(buf);
        }

        // ORIGINATOR_ID attribute.
        if let Some(originator_id) = self.base.originator_id {
            originator_id::encode(originator_id, buf);
        }

        // CLUSTER_LIST attribute.
        if let Some(cluster_list) = &self.base.cluster_list {
            cluster_list.encode(buf);
        }

        // EXTENDED COMMUNITIES attribute.
        if let Some(ext_comm) = &self.ext_comm {
            ext_comm.encode(buf);
        }

        // AS4_PATH attribute.
        if let Some(as4_path) = as4_path.as_ref().or(self.base.as4_path.as_ref())
        {
            as4_path.encode(
                buf,
                AttrFlags::TRANSITIVE | AttrFlags::OPTIONAL,
                AttrType::As4Path,
                true,
            );
        }

        // AS4_AGGREGATOR attribute.
        if let Some(as4_aggregator) = &as4_aggregator {
            as4_aggregator.encode(
                buf,
                AttrFlags::TRANSITIVE | AttrFlags::OPTIONAL,
                AttrType::As4Aggregator,
                true,
            );
        }

        // PMSI_TUNNEL attribute.
        if let Some(pmsi_tunnel) = &self.pmsi_tunnel {
            pmsi_tunnel.encode(buf);
        }

        // IPv6 Address Specific Extended Community attribute.
        if let Some(extv6_comm) = &self.extv6_comm {
            extv6_comm.encode(buf);
        }

        // AIGP attribute.
        if let Some(metric) = self.aigp {
            aigp::encode(metric, buf);
        }

        // LARGE_COMMUNITY attribute.
        if let Some(large_comm) = &self.large_comm {
            large_comm.encode(buf);
        }

        // BGP Prefix-SID attribute.
        if let Some(prefix_sid) = &self.prefix_sid {
            prefix_sid.encode(buf);
        }

        // Unknown attributes, preserved from the original UPDATE.
        for unknown in &self.unknown {
            unknown.encode(buf);
        }
    }

    // Synthesises the MP_REACH_NLRI attribute from the announcement set.
    fn encode_mp_reach(
        &self,
        buf: &mut BytesMut,
        reach: &[Nlri],
        cxt: &EncodeCxt,
    ) {
        let family = reach[0].family();
        let addpath = cxt.nego.addpath_tx.contains(&family);

        let mut value = BytesMut::new();
        value.put_u16(family.afi().to_u16().unwrap());
        value.put_u8(family.safi().to_u8().unwrap());

        // Next hop. VPN families carry it behind a zeroed route
        // distinguisher.
        let rd_prefixed =
            matches!(family.safi(), Safi::MplsVpn | Safi::FlowVpn);
        let nexthop = self.base.nexthop.expect("missing MP nexthop");
        let mut nh = BytesMut::new();
        if rd_prefixed {
            nh.put_slice(&[0; RouteDistinguisher::LENGTH]);
        }
        nh.put_ip(&nexthop);
        if let Some(ll_nexthop) = &self.ll_nexthop_for(&nexthop) {
            nh.put_ipv6(ll_nexthop);
        }
        value.put_u8(nh.len() as u8);
        value.put_slice(&nh);

        // Reserved octet.
        value.put_u8(0);

        // NLRIs.
        for nlri in reach {
            nlri.encode(&mut value, addpath);
        }

        encode_attr(
            buf,
            AttrFlags::OPTIONAL,
            AttrType::MpReachNlri as u8,
            &value,
        );
    }

    fn ll_nexthop_for(&self, nexthop: &IpAddr) -> Option<Ipv6Addr> {
        match nexthop {
            IpAddr::V4(_) => None,
            IpAddr::V6(_) => self.base.ll_nexthop,
        }
    }

    // Decodes the path attribute portion of an UPDATE message.
    //
    // Malformed attributes are handled along RFC 7606 lines: discard the
    // attribute, treat the whole message as withdraw, or reset the session,
    // depending on the attribute.
    pub(crate) fn decode(
        buf: &mut Bytes,
        cxt: &DecodeCxt,
        nexthop: &mut Option<Ipv4Addr>,
        nlri_present: bool,
        mp_reach: &mut Option<MpReach>,
        mp_unreach: &mut Option<MpUnreach>,
    ) -> Result<Option<Self>, UpdateMessageError> {
        let mut origin = None;
        let mut as_path = None;
        let mut as4_path: Option<AsPath> = None;
        let mut med = None;
        let mut local_pref = None;
        let mut aggregator = None;
        let mut as4_aggregator = None;
        let mut atomic_aggregate = false;
        let mut originator_id = None;
        let mut cluster_list = None;
        let mut comm = None;
        let mut ext_comm = None;
        let mut extv6_comm = None;
        let mut large_comm = None;
        let mut aigp = None;
        let mut pmsi_tunnel = None;
        let mut prefix_sid = None;
        let mut unknown = vec![];
        let mut withdraw = false;

        let four_byte_asn = cxt.nego.four_octet_as;

        // List of parsed attributes.
        let mut attr_list = HashSet::new();

        // Parse attributes.
        while buf.remaining() > 0 {
            if buf.remaining() < 2 {
                withdraw = true;
                break;
            }

            // Parse attribute flags.
            let attr_flags = buf.get_u8();
            let mut attr_flags = AttrFlags::from_bits_truncate(attr_flags);

            // Parse attribute type.
            let attr_type_raw = buf.get_u8();
            let attr_type = AttrType::from_u8(attr_type_raw);

            // Parse attribute length.
            let attr_len = if attr_flags.contains(AttrFlags::EXTENDED) {
                if buf.remaining() < 2 {
                    withdraw = true;
                    break;
                }
                buf.get_u16() as usize
            } else {
                if buf.remaining() < 1 {
                    withdraw = true;
                    break;
                }
                buf.get_u8() as usize
            };
            if attr_len > buf.remaining() {
                withdraw = true;
                break;
            }
            let mut buf = buf.copy_to_bytes(attr_len);

            // RFC 7606 - Section 3.c:
            // "If the value of either the Optional or Transitive bits in the
            // Attribute Flags is in conflict with their specified values,
            // then the attribute MUST be treated as malformed and the
            // "treat-as-withdraw" approach used".
            if let Some(attr_type) = attr_type
                && (attr_flags & (AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE))
                    != attribute_flags(attr_type)
            {
                withdraw = true;
                continue;
            }

            // RFC 7606 - Section 3.g:
            // "If the MP_REACH_NLRI attribute or the MP_UNREACH_NLRI
            // attribute appears more than once in the UPDATE message, then a
            // NOTIFICATION message MUST be sent with the Error Subcode
            // "Malformed Attribute List". If any other attribute (whether
            // recognized or unrecognized) appears more than once in an
            // UPDATE message, then all the occurrences of the attribute
            // other than the first one SHALL be discarded".
            if !attr_list.insert(attr_type_raw) {
                if matches!(
                    attr_type,
                    Some(AttrType::MpReachNlri | AttrType::MpUnreachNlri)
                ) {
                    return Err(UpdateMessageError::MalformedAttributeList);
                } else {
                    continue;
                }
            }

            // Parse attribute value.
            match attr_type {
                // Known attribute.
                Some(attr_type) => {
                    if let Err(error) = match attr_type {
                        AttrType::Origin => {
                            origin::decode(&mut buf, &mut origin)
                        }
                        AttrType::AsPath => AsPath::decode(
                            &mut buf,
                            four_byte_asn,
                            &mut as_path,
                        ),
                        AttrType::Nexthop => nexthop::decode(&mut buf, nexthop),
                        AttrType::Med => med::decode(&mut buf, &mut med),
                        AttrType::LocalPref => {
                            local_pref::decode(&mut buf, cxt, &mut local_pref)
                        }
                        AttrType::AtomicAggregate => atomic_aggregate::decode(
                            &mut buf,
                            &mut atomic_aggregate,
                        ),
                        AttrType::Aggregator => Aggregator::decode(
                            &mut buf,
                            four_byte_asn,
                            &mut aggregator,
                        ),
                        AttrType::Communities => {
                            Comms::decode(&mut buf, &mut comm)
                        }
                        AttrType::OriginatorId => originator_id::decode(
                            &mut buf,
                            cxt,
                            &mut originator_id,
                        ),
                        AttrType::ClusterList => ClusterList::decode(
                            &mut buf,
                            cxt,
                            &mut cluster_list,
                        ),
                        AttrType::MpReachNlri => {
                            MpReach::decode(&mut buf, cxt, mp_reach)
                        }
                        AttrType::MpUnreachNlri => {
                            MpUnreach::decode(&mut buf, cxt, mp_unreach)
                        }
                        AttrType::ExtCommunities => {
                            ExtComms::decode(&mut buf, &mut ext_comm)
                        }
                        AttrType::As4Path => {
                            AsPath::decode(&mut buf, true, &mut as4_path)
                        }
                        AttrType::As4Aggregator => Aggregator::decode(
                            &mut buf,
                            true,
                            &mut as4_aggregator,
                        ),
                        AttrType::PmsiTunnel => {
                            PmsiTunnel::decode(&mut buf, &mut pmsi_tunnel)
                        }
                        AttrType::Extv6Community => {
                            Extv6Comms::decode(&mut buf, &mut extv6_comm)
                        }
                        AttrType::Aigp => aigp::decode(&mut buf, &mut aigp),
                        AttrType::LargeCommunity => {
                            LargeComms::decode(&mut buf, &mut large_comm)
                        }
                        AttrType::PrefixSid => {
                            PrefixSid::decode(&mut buf, &mut prefix_sid)
                        }
                    } {
                        // Log malformed attribute.
                        Debug::NbrAttrError(attr_type, error).log();

                        // Process malformed attribute.
                        match error {
                            AttrError::Discard => continue,
                            AttrError::Withdraw => withdraw = true,
                            AttrError::Reset => {
                                return Err(
                                    UpdateMessageError::OptionalAttributeError,
                                );
                            }
                            AttrError::Length => {
                                return Err(
                                    UpdateMessageError::AttributeLengthError,
                                );
                            }
                        }
                    }
                }
                // Unknown attribute.
                None => {
                    // RFC 4271 - Section 6.3:
                    // "If any of the well-known mandatory attributes are not
                    // recognized, then the Error Subcode MUST be set to
                    // Unrecognized Well-known Attribute".
                    if !attr_flags.contains(AttrFlags::OPTIONAL) {
                        return Err(
                            UpdateMessageError::UnrecognizedWellKnownAttribute,
                        );
                    }

                    // RFC 4271 - Section 9:
                    // "If an optional non-transitive attribute is
                    // unrecognized, it is quietly ignored".
                    if !attr_flags.contains(AttrFlags::TRANSITIVE) {
                        continue;
                    }

                    // RFC 4271 - Section 9:
                    // "If an optional transitive attribute is unrecognized,
                    // the Partial bit in the attribute flags octet is set to
                    // 1, and the attribute is retained for propagation to
                    // other BGP speakers".
                    attr_flags.insert(AttrFlags::PARTIAL);
                    let attr_value = buf.copy_to_bytes(attr_len);
                    unknown.push(UnknownAttr::new(
                        attr_type_raw,
                        attr_flags,
                        attr_len as u16,
                        attr_value,
                    ));
                }
            }
        }

        // RFC 6793 - Section 4.2.3: reconcile the AS4_PATH attribute with
        // the AS_TRANS placeholders in AS_PATH.
        if !four_byte_asn
            && let Some(as_path) = as_path.as_mut()
            && let Some(as4_path) = as4_path.take()
        {
            *as_path = AsPath::reconcile(as_path.clone(), as4_path);
        }

        // Check for missing well-known attributes.
        //
        // RFC 7606 - Section 3.d:
        // "If any of the well-known mandatory attributes are not present in
        //  an UPDATE message, then "treat-as-withdraw" MUST be used".
        let mut attrs = None;
        if !withdraw
            && let Some(origin) = origin
            && let Some(as_path) = as_path
            && (local_pref.is_some() || cxt.peer_type == PeerType::External)
            && (nexthop.is_some() || mp_reach.is_some() || !nlri_present)
        {
            attrs = Some(Attrs {
                base: BaseAttrs {
                    origin,
                    as_path,
                    as4_path,
                    nexthop: None,
                    ll_nexthop: None,
                    med,
                    local_pref,
                    aggregator,
                    as4_aggregator,
                    atomic_aggregate,
                    originator_id,
                    cluster_list,
                },
                comm,
                ext_comm,
                extv6_comm,
                large_comm,
                aigp,
                pmsi_tunnel,
                prefix_sid,
                unknown,
            });
        }

        Ok(attrs)
    }

    // Approximate canonical length, used for sizing outgoing messages.
    pub(crate) fn length(&self, cxt: &EncodeCxt) -> u16 {
        let mut buf = BytesMut::new();
        self.encode(&mut buf, &[], &[], cxt);
        buf.len() as u16
    }
}

// ===== impl AsPath =====

impl AsPath {
    fn encode(
        &self,
        buf: &mut BytesMut,
        flags: AttrFlags,
        attr_type: AttrType,
        four_byte_asn: bool,
    ) {
        let mut value = BytesMut::new();
        for segment in &self.segments {
            value.put_u8(segment.seg_type.to_u8().unwrap());
            value.put_u8(segment.members.len() as u8);
            for member in &segment.members {
                if four_byte_asn {
                    value.put_u32(*member);
                } else {
                    value.put_u16(*member as u16);
                }
            }
        }
        encode_attr(buf, flags, attr_type as u8, &value);
    }

    fn decode(
        buf: &mut Bytes,
        four_byte_asn: bool,
        as_path: &mut Option<AsPath>,
    ) -> Result<(), AttrError> {
        let mut segments = VecDeque::new();

        while buf.remaining() > 0 {
            if buf.remaining() < 2 {
                return Err(AttrError::Withdraw);
            }
            let seg_type = buf.get_u8();
            let Some(seg_type) = AsPathSegmentType::from_u8(seg_type) else {
                return Err(AttrError::Withdraw);
            };
            let num_members = buf.get_u8() as usize;
            let member_len = if four_byte_asn { 4 } else { 2 };
            if num_members == 0 || buf.remaining() < num_members * member_len {
                return Err(AttrError::Withdraw);
            }
            let mut members = VecDeque::with_capacity(num_members);
            for _ in 0..num_members {
                let member = if four_byte_asn {
                    buf.get_u32()
                } else {
                    buf.get_u16() as u32
                };
                members.push_back(member);
            }
            segments.push_back(AsPathSegment { seg_type, members });
        }

        *as_path = Some(AsPath { segments });
        Ok(())
    }

    // Iterates over all path members, irrespective of segments.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.segments
            .iter()
            .flat_map(|segment| segment.members.iter().copied())
    }

    pub fn contains(&self, asn: u32) -> bool {
        self.iter().any(|member| member == asn)
    }

    // Whether any member needs more than two octets.
    pub fn has_as4(&self) -> bool {
        self.iter().any(|member| member > u16::MAX as u32)
    }

    // Returns a copy with every four-octet member replaced by AS_TRANS.
    pub fn downgrade(&self) -> AsPath {
        let segments = self
            .segments
            .iter()
            .map(|segment| AsPathSegment {
                seg_type: segment.seg_type,
                members: segment
                    .members
                    .iter()
                    .map(|member| {
                        if *member > u16::MAX as u32 {
                            AS_TRANS as u32
                        } else {
                            *member
                        }
                    })
                    .collect(),
            })
            .collect();
        AsPath { segments }
    }

    // Merges an AS4_PATH into an AS_TRANS-mangled AS_PATH (RFC 6793).
    //
    // If the AS4_PATH claims more hops than the AS_PATH, it is ignored.
    pub fn reconcile(as_path: AsPath, as4_path: AsPath) -> AsPath {
        let count = as_path.iter().count();
        let count4 = as4_path.iter().count();
        if count4 > count {
            return as_path;
        }

        // Keep the leading (count - count4) members from AS_PATH, then
        // append the AS4_PATH segments.
        let mut keep = count - count4;
        let mut segments = VecDeque::new();
        for segment in &as_path.segments {
            if keep == 0 {
                break;
            }
            let take = std::cmp::min(keep, segment.members.len());
            segments.push_back(AsPathSegment {
                seg_type: segment.seg_type,
                members: segment.members.iter().take(take).copied().collect(),
            });
            keep -= take;
        }
        segments.extend(as4_path.segments);
        AsPath { segments }
    }
}

// ===== impl Aggregator =====

impl Aggregator {
    fn encode(
        &self,
        buf: &mut BytesMut,
        flags: AttrFlags,
        attr_type: AttrType,
        four_byte_asn: bool,
    ) {
        let mut value = BytesMut::new();
        if four_byte_asn {
            value.put_u32(self.asn);
        } else if self.asn > u16::MAX as u32 {
            value.put_u16(AS_TRANS);
        } else {
            value.put_u16(self.asn as u16);
        }
        value.put_ipv4(&self.identifier);
        encode_attr(buf, flags, attr_type as u8, &value);
    }

    fn decode(
        buf: &mut Bytes,
        four_byte_asn: bool,
        aggregator: &mut Option<Aggregator>,
    ) -> Result<(), AttrError> {
        let expected = if four_byte_asn { 8 } else { 6 };
        if buf.remaining() != expected {
            return Err(AttrError::Discard);
        }
        let asn = if four_byte_asn {
            buf.get_u32()
        } else {
            buf.get_u16() as u32
        };
        let identifier = buf.get_ipv4();
        *aggregator = Some(Aggregator { asn, identifier });
        Ok(())
    }
}

// ===== impl ClusterList =====

impl ClusterList {
    fn encode(&self, buf: &mut BytesMut) {
        let mut value = BytesMut::new();
        for addr in &self.0 {
            value.put_ipv4(addr);
        }
        encode_attr(
            buf,
            AttrFlags::OPTIONAL,
            AttrType::ClusterList as u8,
            &value,
        );
    }

    fn decode(
        buf: &mut Bytes,
        cxt: &DecodeCxt,
        cluster_list: &mut Option<ClusterList>,
    ) -> Result<(), AttrError> {
        // RFC 7606 - Section 7.10: received from an external peer, discard.
        if cxt.peer_type == PeerType::External {
            return Err(AttrError::Discard);
        }
        if buf.remaining() == 0 || buf.remaining() % 4 != 0 {
            return Err(AttrError::Withdraw);
        }
        let mut list = BTreeSet::new();
        while buf.remaining() > 0 {
            list.insert(buf.get_ipv4());
        }
        *cluster_list = Some(ClusterList(list));
        Ok(())
    }
}

// ===== impl PmsiTunnel =====

impl PmsiTunnel {
    fn encode(&self, buf: &mut BytesMut) {
        let mut value = BytesMut::new();
        value.put_u8(self.flags);
        value.put_u8(self.tunnel_type);
        value.put_u24(self.label);
        value.put_slice(&self.tunnel_id);
        encode_attr(
            buf,
            AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
            AttrType::PmsiTunnel as u8,
            &value,
        );
    }

    fn decode(
        buf: &mut Bytes,
        pmsi_tunnel: &mut Option<PmsiTunnel>,
    ) -> Result<(), AttrError> {
        if buf.remaining() < 5 {
            return Err(AttrError::Withdraw);
        }
        let flags = buf.get_u8();
        let tunnel_type = buf.get_u8();
        let label = buf.get_u24();
        let tunnel_id = buf.copy_to_bytes(buf.remaining());
        *pmsi_tunnel = Some(PmsiTunnel {
            flags,
            tunnel_type,
            label,
            tunnel_id,
        });
        Ok(())
    }
}

// ===== impl PrefixSid =====

impl PrefixSid {
    fn encode(&self, buf: &mut BytesMut) {
        encode_attr(
            buf,
            AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
            AttrType::PrefixSid as u8,
            &self.0,
        );
    }

    fn decode(
        buf: &mut Bytes,
        prefix_sid: &mut Option<PrefixSid>,
    ) -> Result<(), AttrError> {
        // Validate the TLV structure without interpreting it.
        let bytes = buf.copy_to_bytes(buf.remaining());
        let mut cursor = bytes.clone();
        while cursor.remaining() > 0 {
            if cursor.remaining() < 3 {
                return Err(AttrError::Discard);
            }
            let _tlv_type = cursor.get_u8();
            let tlv_len = cursor.get_u16() as usize;
            if tlv_len > cursor.remaining() {
                return Err(AttrError::Discard);
            }
            cursor.advance(tlv_len);
        }
        *prefix_sid = Some(PrefixSid(bytes));
        Ok(())
    }

    // Label index carried in the Label-Index TLV (type 1), when present.
    pub fn label_index(&self) -> Option<u32> {
        let mut cursor = self.0.clone();
        while cursor.remaining() >= 3 {
            let tlv_type = cursor.get_u8();
            let tlv_len = cursor.get_u16() as usize;
            if tlv_len > cursor.remaining() {
                return None;
            }
            if tlv_type == 1 && tlv_len == 7 {
                let _reserved = cursor.get_u8();
                let _flags = cursor.get_u16();
                return Some(cursor.get_u32());
            }
            cursor.advance(tlv_len);
        }
        None
    }
}

// ===== impl CommList =====

impl<T> CommList<T>
where
    T: CommType,
{
    fn encode(&self, buf: &mut BytesMut) {
        let mut value = BytesMut::new();
        for comm in &self.0 {
            comm.encode(&mut value);
        }
        encode_attr(
            buf,
            AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
            T::TYPE as u8,
            &value,
        );
    }

    fn decode(
        buf: &mut Bytes,
        comms: &mut Option<CommList<T>>,
    ) -> Result<(), AttrError> {
        if buf.remaining() == 0 || buf.remaining() % T::LENGTH != 0 {
            return Err(AttrError::Withdraw);
        }
        let mut list = BTreeSet::new();
        while buf.remaining() > 0 {
            list.insert(T::decode(buf));
        }
        *comms = Some(CommList(list));
        Ok(())
    }
}

impl CommType for Comm {
    const TYPE: AttrType = AttrType::Communities;
    const LENGTH: usize = 4;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.0);
    }

    fn decode(buf: &mut Bytes) -> Comm {
        Comm(buf.get_u32())
    }
}

impl CommType for ExtComm {
    const TYPE: AttrType = AttrType::ExtCommunities;
    const LENGTH: usize = 8;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }

    fn decode(buf: &mut Bytes) -> ExtComm {
        let mut comm = [0; 8];
        buf.copy_to_slice(&mut comm);
        ExtComm(comm)
    }
}

impl CommType for Extv6Comm {
    const TYPE: AttrType = AttrType::Extv6Community;
    const LENGTH: usize = 20;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv6(&self.0);
        buf.put_u32(self.1);
    }

    fn decode(buf: &mut Bytes) -> Extv6Comm {
        let addr = buf.get_ipv6();
        let local = buf.get_u32();
        Extv6Comm(addr, local)
    }
}

impl CommType for LargeComm {
    const TYPE: AttrType = AttrType::LargeCommunity;
    const LENGTH: usize = 12;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }

    fn decode(buf: &mut Bytes) -> LargeComm {
        let mut comm = [0; 12];
        buf.copy_to_slice(&mut comm);
        LargeComm(comm)
    }
}

// ===== impl UnknownAttr =====

impl UnknownAttr {
    fn encode(&self, buf: &mut BytesMut) {
        encode_attr(buf, self.flags, self.attr_type, &self.value);
    }
}

// ===== attribute submodules =====

pub(crate) mod origin {
    use super::*;

    pub(crate) fn encode(origin: Origin, buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::TRANSITIVE.bits());
        buf.put_u8(AttrType::Origin as u8);
        buf.put_u8(1);
        buf.put_u8(origin as u8);
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        origin: &mut Option<Origin>,
    ) -> Result<(), AttrError> {
        if buf.remaining() != 1 {
            return Err(AttrError::Length);
        }
        let Some(value) = Origin::from_u8(buf.get_u8()) else {
            return Err(AttrError::Withdraw);
        };
        *origin = Some(value);
        Ok(())
    }
}

pub(crate) mod nexthop {
    use super::*;

    pub(crate) fn length() -> u16 {
        ATTR_MIN_LEN + 4
    }

    pub(crate) fn encode(nexthop: Ipv4Addr, buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::TRANSITIVE.bits());
        buf.put_u8(AttrType::Nexthop as u8);
        buf.put_u8(4);
        buf.put_ipv4(&nexthop);
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        nexthop: &mut Option<Ipv4Addr>,
    ) -> Result<(), AttrError> {
        if buf.remaining() != 4 {
            return Err(AttrError::Withdraw);
        }
        let addr = buf.get_ipv4();
        if addr.is_unspecified() || addr.is_multicast() || addr.is_broadcast()
        {
            return Err(AttrError::Withdraw);
        }
        *nexthop = Some(addr);
        Ok(())
    }
}

pub(crate) mod med {
    use super::*;

    pub(crate) fn encode(metric: u32, buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::OPTIONAL.bits());
        buf.put_u8(AttrType::Med as u8);
        buf.put_u8(4);
        buf.put_u32(metric);
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        med: &mut Option<u32>,
    ) -> Result<(), AttrError> {
        if buf.remaining() != 4 {
            return Err(AttrError::Withdraw);
        }
        *med = Some(buf.get_u32());
        Ok(())
    }
}

pub(crate) mod local_pref {
    use super::*;

    pub(crate) fn encode(local_pref: u32, buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::TRANSITIVE.bits());
        buf.put_u8(AttrType::LocalPref as u8);
        buf.put_u8(4);
        buf.put_u32(local_pref);
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        cxt: &DecodeCxt,
        local_pref: &mut Option<u32>,
    ) -> Result<(), AttrError> {
        // RFC 7606 - Section 7.7: ignored when received from an external
        // peer.
        if cxt.peer_type == PeerType::External {
            return Err(AttrError::Discard);
        }
        if buf.remaining() != 4 {
            return Err(AttrError::Withdraw);
        }
        *local_pref = Some(buf.get_u32());
        Ok(())
    }
}

pub(crate) mod atomic_aggregate {
    use super::*;

    pub(crate) fn encode(buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::TRANSITIVE.bits());
        buf.put_u8(AttrType::AtomicAggregate as u8);
        buf.put_u8(0);
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        atomic_aggregate: &mut bool,
    ) -> Result<(), AttrError> {
        if buf.remaining() != 0 {
            return Err(AttrError::Discard);
        }
        *atomic_aggregate = true;
        Ok(())
    }
}

pub(crate) mod originator_id {
    use super::*;

    pub(crate) fn encode(originator_id: Ipv4Addr, buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::OPTIONAL.bits());
        buf.put_u8(AttrType::OriginatorId as u8);
        buf.put_u8(4);
        buf.put_ipv4(&originator_id);
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        cxt: &DecodeCxt,
        originator_id: &mut Option<Ipv4Addr>,
    ) -> Result<(), AttrError> {
        // RFC 7606 - Section 7.9: received from an external peer, discard.
        if cxt.peer_type == PeerType::External {
            return Err(AttrError::Discard);
        }
        if buf.remaining() != 4 {
            return Err(AttrError::Withdraw);
        }
        *originator_id = Some(buf.get_ipv4());
        Ok(())
    }
}

pub(crate) mod aigp {
    use super::*;

    pub(crate) fn encode(metric: u64, buf: &mut BytesMut) {
        buf.put_u8(AttrFlags::OPTIONAL.bits());
        buf.put_u8(AttrType::Aigp as u8);
        buf.put_u8(11);
        buf.put_u8(AigpType::Aigp as u8);
        buf.put_u16(11);
        buf.put_u64(metric);
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        aigp: &mut Option<u64>,
    ) -> Result<(), AttrError> {
        // Scan the TLVs for the AIGP TLV; ignore the others.
        while buf.remaining() >= 3 {
            let tlv_type = buf.get_u8();
            let tlv_len = buf.get_u16() as usize;
            if tlv_len < 3 || tlv_len - 3 > buf.remaining() {
                return Err(AttrError::Discard);
            }
            if AigpType::from_u8(tlv_type) == Some(AigpType::Aigp) {
                if tlv_len != 11 {
                    return Err(AttrError::Discard);
                }
                *aigp = Some(buf.get_u64());
            } else {
                buf.advance(tlv_len - 3);
            }
        }
        Ok(())
    }
}

// ===== global functions =====

// Canonical OPTIONAL/TRANSITIVE flag combination of each known attribute.
pub(crate) fn attribute_flags(attr_type: AttrType) -> AttrFlags {
    match attr_type {
        AttrType::Origin
        | AttrType::AsPath
        | AttrType::Nexthop
        | AttrType::LocalPref
        | AttrType::AtomicAggregate => AttrFlags::TRANSITIVE,
        AttrType::Med
        | AttrType::OriginatorId
        | AttrType::ClusterList
        | AttrType::MpReachNlri
        | AttrType::MpUnreachNlri
        | AttrType::Aigp => AttrFlags::OPTIONAL,
        AttrType::Aggregator
        | AttrType::Communities
        | AttrType::ExtCommunities
        | AttrType::As4Path
        | AttrType::As4Aggregator
        | AttrType::PmsiTunnel
        | AttrType::Extv6Community
        | AttrType::LargeCommunity
        | AttrType::PrefixSid => AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
    }
}

// Writes an attribute header plus value, choosing the extended-length form
// when the value doesn't fit a single length octet.
pub(crate) fn encode_attr(
    buf: &mut BytesMut,
    flags: AttrFlags,
    attr_type: u8,
    value: &[u8],
) {
    let mut flags = flags;
    if value.len() > u8::MAX as usize {
        flags.insert(AttrFlags::EXTENDED);
    }
    buf.put_u8(flags.bits());
    buf.put_u8(attr_type);
    if flags.contains(AttrFlags::EXTENDED) {
        buf.put_u16(value.len() as u16);
    } else {
        buf.put_u8(value.len() as u8);
    }
    buf.put_slice(value);
}

// Synthesises the MP_UNREACH_NLRI attribute from the withdrawal set.
pub(crate) fn encode_mp_unreach(
    buf: &mut BytesMut,
    unreach: &[Nlri],
    cxt: &EncodeCxt,
) {
    let family = unreach[0].family();
    let addpath = cxt.nego.addpath_tx.contains(&family);

    let mut value = BytesMut::new();
    value.put_u16(family.afi().to_u16().unwrap());
    value.put_u8(family.safi().to_u8().unwrap());
    for nlri in unreach {
        nlri.encode(&mut value, addpath);
    }

    encode_attr(
        buf,
        AttrFlags::OPTIONAL,
        AttrType::MpUnreachNlri as u8,
        &value,
    );
}

// Writes an empty MP_UNREACH_NLRI attribute: the End-of-RIB marker for a
// multiprotocol family.
pub(crate) fn encode_mp_unreach_eor(buf: &mut BytesMut, family: AfiSafi) {
    let mut value = BytesMut::new();
    value.put_u16(family.afi().to_u16().unwrap());
    value.put_u8(family.safi().to_u8().unwrap());
    encode_attr(
        buf,
        AttrFlags::OPTIONAL,
        AttrType::MpUnreachNlri as u8,
        &value,
    );
}

// Parses the AFI/SAFI pair opening the MP attributes.
pub(crate) fn decode_mp_family(
    buf: &mut Bytes,
) -> Result<Option<AfiSafi>, AttrError> {
    if buf.remaining() < 3 {
        return Err(AttrError::Reset);
    }
    let afi = buf.get_u16();
    let safi = buf.get_u8();
    let Some(afi) = Afi::from_u16(afi) else {
        return Ok(None);
    };
    let Some(safi) = Safi::from_u8(safi) else {
        return Ok(None);
    };
    Ok(AfiSafi::from_pair(afi, safi))
}

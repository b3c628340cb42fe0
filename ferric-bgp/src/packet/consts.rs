//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

pub const BGP_VERSION: u8 = 4;
pub const AS_TRANS: u16 = 23456;

// BGP Message Types.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-parameters-1
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum MessageType {
    Open = 1,
    Update = 2,
    Notification = 3,
    Keepalive = 4,
    // RFC 2918
    RouteRefresh = 5,
    // draft-ietf-idr-operational-message
    Operational = 6,
}

// BGP OPEN Optional Parameter Types.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-parameters-11
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum OpenParamType {
    // RFC 5492
    Capabilities = 2,
}

// Capability Codes.
//
// IANA registry:
// https://www.iana.org/assignments/capability-codes/capability-codes.xhtml#capability-codes-2
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum CapabilityCode {
    // RFC 2858
    MultiProtocol = 1,
    // RFC 2918
    RouteRefresh = 2,
    // RFC 8950
    ExtendedNexthop = 5,
    // RFC 8654
    ExtendedMessage = 6,
    // RFC 8277
    MultipleLabels = 8,
    // RFC 4724
    GracefulRestart = 64,
    // RFC 6793
    FourOctetAsNumber = 65,
    // draft-ietf-idr-operational-message
    Operational = 66,
    // draft-ietf-idr-bgp-multisession
    Multisession = 68,
    // RFC 7911
    AddPath = 69,
    // RFC 7311
    Aigp = 71,
}

// Send/Receive value for a per-AFI/SAFI instance of the ADD-PATH Capability.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum AddPathMode {
    Receive = 1,
    Send = 2,
    ReceiveSend = 3,
}

// Graceful Restart restart-state flag (RFC 4724).
pub const GR_RESTART_STATE_FLAG: u8 = 0x08;
// Graceful Restart forwarding-state flag for a single AFI/SAFI (RFC 4724).
pub const GR_FORWARDING_STATE_FLAG: u8 = 0x80;

// BGP Error (Notification) Codes.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-parameters-3
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum ErrorCode {
    MessageHeaderError = 1,
    OpenMessageError = 2,
    UpdateMessageError = 3,
    HoldTimerExpired = 4,
    FiniteStateMachineError = 5,
    Cease = 6,
    // RFC 7313
    RouteRefreshMessageError = 7,
}

// Message Header Error subcodes.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-parameters-5
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum MessageHeaderErrorSubcode {
    Unspecific = 0,
    ConnectionNotSynchronized = 1,
    BadMessageLength = 2,
    BadMessageType = 3,
}

// OPEN Message Error subcodes.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-parameters-6
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum OpenMessageErrorSubcode {
    Unspecific = 0,
    UnsupportedVersionNumber = 1,
    BadPeerAs = 2,
    BadBgpIdentifier = 3,
    UnsupportedOptParam = 4,
    UnacceptableHoldTime = 6,
    // RFC 5492
    UnsupportedCapability = 7,
}

// UPDATE Message Error subcodes.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-parameters-7
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum UpdateMessageErrorSubcode {
    Unspecific = 0,
    MalformedAttributeList = 1,
    UnrecognizedWellKnownAttribute = 2,
    MissingWellKnownAttribute = 3,
    AttributeFlagsError = 4,
    AttributeLengthError = 5,
    InvalidOriginAttribute = 6,
    InvalidNexthopAttribute = 8,
    OptionalAttributeError = 9,
    InvalidNetworkField = 10,
    MalformedAsPath = 11,
}

// BGP Finite State Machine Error subcodes.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-finite-state-machine-error-subcodes
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum FsmErrorSubcode {
    UnexpectedMessageInOpenSent = 1,
    UnexpectedMessageInOpenConfirm = 2,
    UnexpectedMessageInEstablished = 3,
}

// BGP Cease NOTIFICATION message subcodes.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-parameters-8
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum CeaseSubcode {
    MaximumNumberofPrefixesReached = 1,
    AdministrativeShutdown = 2,
    PeerDeConfigured = 3,
    AdministrativeReset = 4,
    ConnectionRejected = 5,
    OtherConfigurationChange = 6,
    ConnectionCollisionResolution = 7,
    OutOfResources = 8,
    // RFC 8538
    HardReset = 9,
}

// BGP ROUTE-REFRESH Message Error subcodes.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#route-refresh-error-subcodes
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum RouteRefreshErrorSubcode {
    InvalidMessageLength = 1,
}

// Address Family Identifiers (AFI).
//
// IANA registry:
// http://www.iana.org/assignments/address-family-numbers
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum Afi {
    Ipv4 = 1,
    Ipv6 = 2,
    L2vpn = 25,
    BgpLs = 16388,
}

// Subsequent Address Family Identifiers (SAFI).
//
// IANA registry:
// https://www.iana.org/assignments/safi-namespace/safi-namespace.xhtml#safi-namespace-2
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum Safi {
    Unicast = 1,
    Multicast = 2,
    NlriMpls = 4,
    McastVpn = 5,
    Vpls = 65,
    Evpn = 70,
    BgpLs = 71,
    BgpLsVpn = 72,
    Mup = 85,
    MplsVpn = 128,
    RouteTarget = 132,
    Flow = 133,
    FlowVpn = 134,
}

// BGP Path Attribute Flags.
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct AttrFlags: u8 {
        const OPTIONAL = 0x80;
        const TRANSITIVE = 0x40;
        const PARTIAL = 0x20;
        const EXTENDED = 0x10;
    }
}

// BGP Path Attribute Types.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-parameters-2
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum AttrType {
    Origin = 1,
    AsPath = 2,
    Nexthop = 3,
    Med = 4,
    LocalPref = 5,
    AtomicAggregate = 6,
    Aggregator = 7,
    // RFC 1997
    Communities = 8,
    // RFC 4456
    OriginatorId = 9,
    ClusterList = 10,
    // RFC 4760
    MpReachNlri = 14,
    MpUnreachNlri = 15,
    // RFC 4360
    ExtCommunities = 16,
    // RFC 6793
    As4Path = 17,
    As4Aggregator = 18,
    // RFC 6514
    PmsiTunnel = 22,
    // RFC 5701
    Extv6Community = 25,
    // RFC 7311
    Aigp = 26,
    // RFC 8092
    LargeCommunity = 32,
    // RFC 8669
    PrefixSid = 40,
}

// BGP Origin.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum Origin {
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum AsPathSegmentType {
    Set = 1,
    Sequence = 2,
    ConfedSequence = 3,
    ConfedSet = 4,
}

// BGP Well-known Communities.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-well-known-communities/bgp-well-known-communities.xhtml
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
#[repr(u32)]
pub enum WellKnownCommunities {
    NoExport = 0xFFFFFF01,
    NoAdvertise = 0xFFFFFF02,
    NoExportSubconfed = 0xFFFFFF03,
}

// BGP AIGP Attribute Types.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-aigp
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum AigpType {
    Aigp = 1,
}

// EVPN route types (RFC 7432).
//
// IANA registry:
// https://www.iana.org/assignments/evpn/evpn.xhtml#evpn-route-types
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum EvpnRouteType {
    EthernetAutoDiscovery = 1,
    MacIpAdvertisement = 2,
    InclusiveMulticastEthernetTag = 3,
    EthernetSegment = 4,
    IpPrefix = 5,
}

// MCAST-VPN route types (RFC 6514).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum MvpnRouteType {
    IntraAsIPmsiAd = 1,
    InterAsIPmsiAd = 2,
    SPmsiAd = 3,
    LeafAd = 4,
    SourceActiveAd = 5,
    SharedTreeJoin = 6,
    SourceTreeJoin = 7,
}

// BGP-MUP route types (draft-mpmz-bess-mup-safi).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum MupRouteType {
    InterworkSegmentDiscovery = 1,
    DirectSegmentDiscovery = 2,
    Type1SessionTransformed = 3,
    Type2SessionTransformed = 4,
}

// BGP-LS NLRI types (RFC 7752).
//
// IANA registry:
// https://www.iana.org/assignments/bgp-ls-parameters/bgp-ls-parameters.xhtml
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum BgpLsNlriType {
    Node = 1,
    Link = 2,
    Ipv4Prefix = 3,
    Ipv6Prefix = 4,
    Srv6Sid = 6,
}

// PMSI tunnel types (RFC 6514).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum PmsiTunnelType {
    NoTunnel = 0,
    RsvpTeP2mpLsp = 1,
    MldpP2mpLsp = 2,
    PimSsmTree = 3,
    PimSmTree = 4,
    BidirPimTree = 5,
    IngressReplication = 6,
    MldpMp2mpLsp = 7,
}

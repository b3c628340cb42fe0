//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{Ipv4Network, Ipv6Network};
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

// Address Family identifier.
//
// IANA registry:
// http://www.iana.org/assignments/address-family-numbers
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum AddressFamily {
    Ipv4 = 1,
    Ipv6 = 2,
}

// Extension methods for IpAddr.
pub trait IpAddrExt {
    // Returns the address family of the IP address.
    fn address_family(&self) -> AddressFamily;

    // Returns length of the IP address in bytes.
    fn length(&self) -> usize;

    // Returns an unspecified address of the given address family.
    fn unspecified(af: AddressFamily) -> IpAddr;
}

// Extension methods for Ipv4Addr.
pub trait Ipv4AddrExt {
    const LENGTH: usize;
}

// Extension methods for Ipv6Addr.
pub trait Ipv6AddrExt {
    const LENGTH: usize;
}

// Extension methods for Ipv4Network.
pub trait Ipv4NetworkExt {
    const MAX_PREFIXLEN: u8;

    // Returns a copy of the network with the host bits zeroed out.
    fn apply_mask(&self) -> Ipv4Network;

    // Returns true if this network can appear in a routing update.
    fn is_routable(&self) -> bool;
}

// Extension methods for Ipv6Network.
pub trait Ipv6NetworkExt {
    const MAX_PREFIXLEN: u8;

    // Returns a copy of the network with the host bits zeroed out.
    fn apply_mask(&self) -> Ipv6Network;

    // Returns true if this network can appear in a routing update.
    fn is_routable(&self) -> bool;
}

// ===== impl AddressFamily =====

impl AddressFamily {
    pub fn addr_len(&self) -> usize {
        match self {
            AddressFamily::Ipv4 => Ipv4Addr::LENGTH,
            AddressFamily::Ipv6 => Ipv6Addr::LENGTH,
        }
    }

    pub fn max_prefixlen(&self) -> u8 {
        match self {
            AddressFamily::Ipv4 => Ipv4Network::MAX_PREFIXLEN,
            AddressFamily::Ipv6 => Ipv6Network::MAX_PREFIXLEN,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "ipv4"),
            AddressFamily::Ipv6 => write!(f, "ipv6"),
        }
    }
}

// ===== impl IpAddr =====

impl IpAddrExt for IpAddr {
    fn address_family(&self) -> AddressFamily {
        match self {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn length(&self) -> usize {
        match self {
            IpAddr::V4(_) => Ipv4Addr::LENGTH,
            IpAddr::V6(_) => Ipv6Addr::LENGTH,
        }
    }

    fn unspecified(af: AddressFamily) -> IpAddr {
        match af {
            AddressFamily::Ipv4 => Ipv4Addr::UNSPECIFIED.into(),
            AddressFamily::Ipv6 => Ipv6Addr::UNSPECIFIED.into(),
        }
    }
}

// ===== impl Ipv4Addr =====

impl Ipv4AddrExt for Ipv4Addr {
    const LENGTH: usize = 4;
}

// ===== impl Ipv6Addr =====

impl Ipv6AddrExt for Ipv6Addr {
    const LENGTH: usize = 16;
}

// ===== impl Ipv4Network =====

impl Ipv4NetworkExt for Ipv4Network {
    const MAX_PREFIXLEN: u8 = 32;

    fn apply_mask(&self) -> Ipv4Network {
        Ipv4Network::new(self.network(), self.prefix()).unwrap()
    }

    fn is_routable(&self) -> bool {
        // Loopback and link-local prefixes are never routed.
        !self.ip().is_loopback() && !self.ip().is_link_local()
    }
}

// ===== impl Ipv6Network =====

impl Ipv6NetworkExt for Ipv6Network {
    const MAX_PREFIXLEN: u8 = 128;

    fn apply_mask(&self) -> Ipv6Network {
        Ipv6Network::new(self.network(), self.prefix()).unwrap()
    }

    fn is_routable(&self) -> bool {
        !self.ip().is_loopback() && (self.ip().segments()[0] & 0xffc0) != 0xfe80
    }
}

//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::af::AfiSafi;
use crate::error::CommandError;
use crate::neighbor::Neighbor;

//
// API command interpreter.
//
// The grammar itself belongs to the external command parser; the reactor
// receives one whitespace-tokenised line per command and interprets the
// semantic operation: daemon control, session control, RIB reads, RIB
// writes and peer control, each optionally scoped by a peer selector.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Command {
    // daemon-control
    Shutdown,
    Reload,
    Restart,
    Status,
    // session-control
    Ping,
    Ack(bool),
    Sync(bool),
    Reset(PeerSelector),
    Refresh(PeerSelector),
    // rib-write
    Announce {
        selector: PeerSelector,
        route: RouteSpec,
    },
    Withdraw {
        selector: PeerSelector,
        prefix: IpNetwork,
        path_id: Option<u32>,
    },
    // rib-read
    ShowRib {
        selector: PeerSelector,
        direction: RibDirection,
        family: Option<AfiSafi>,
    },
    // peer-control
    Teardown {
        selector: PeerSelector,
        subcode: Option<u8>,
    },
    PeerCreate {
        remote_addr: IpAddr,
        peer_as: u32,
    },
    PeerDelete(PeerSelector),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RibDirection {
    In,
    Out,
}

// A route expressed by an API command.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteSpec {
    pub prefix: IpNetwork,
    pub next_hop: IpAddr,
    pub path_id: Option<u32>,
    pub med: Option<u32>,
    pub local_preference: Option<u32>,
    pub communities: Vec<u32>,
}

//
// Peer selector: a disjunction of predicate groups. Predicates within one
// group are ANDed; groups are ORed. The empty selector matches every
// peer.
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PeerSelector {
    pub groups: Vec<PeerPredicates>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PeerPredicates {
    pub addr: Option<IpAddr>,
    pub peer_as: Option<u32>,
    pub router_id: Option<Ipv4Addr>,
    pub family: Option<AfiSafi>,
}

// ===== impl Command =====

impl Command {
    // Interprets one tokenised command line.
    pub fn parse(tokens: &[&str]) -> Result<Command, CommandError> {
        let mut cursor = Cursor { tokens, pos: 0 };

        // Leading peer selector, when present.
        let selector = PeerSelector::parse(&mut cursor)?;

        let verb = cursor
            .next()
            .ok_or(CommandError::MissingArgument("command"))?;
        match verb {
            "shutdown" => Ok(Command::Shutdown),
            "reload" => Ok(Command::Reload),
            "restart" => Ok(Command::Restart),
            "status" => Ok(Command::Status),
            "ping" => Ok(Command::Ping),
            "ack" => match cursor.next() {
                Some("enable") => Ok(Command::Ack(true)),
                Some("disable") | Some("silence") => Ok(Command::Ack(false)),
                other => Err(CommandError::InvalidArgument(
                    "ack mode",
                    other.unwrap_or("").to_string(),
                )),
            },
            "sync" => match cursor.next() {
                Some("enable") => Ok(Command::Sync(true)),
                Some("disable") => Ok(Command::Sync(false)),
                other => Err(CommandError::InvalidArgument(
                    "sync mode",
                    other.unwrap_or("").to_string(),
                )),
            },
            "reset" => Ok(Command::Reset(selector)),
            "refresh" => Ok(Command::Refresh(selector)),
            "announce" => {
                let route = RouteSpec::parse(&mut cursor)?;
                Ok(Command::Announce { selector, route })
            }
            "withdraw" => {
                let prefix = cursor.parse_arg("prefix")?;
                let mut path_id = None;
                while let Some(token) = cursor.next() {
                    match token {
                        "path-id" => {
                            path_id = Some(cursor.parse_arg("path-id")?)
                        }
                        _ => {
                            return Err(CommandError::InvalidArgument(
                                "option",
                                token.to_string(),
                            ));
                        }
                    }
                }
                Ok(Command::Withdraw {
                    selector,
                    prefix,
                    path_id,
                })
            }
            "show" => {
                match cursor.next() {
                    Some("rib") => {}
                    _ => {
                        return Err(CommandError::MissingArgument("rib"));
                    }
                }
                let direction = match cursor.next() {
                    Some("in") => RibDirection::In,
                    Some("out") => RibDirection::Out,
                    _ => {
                        return Err(CommandError::MissingArgument(
                            "rib direction",
                        ));
                    }
                };
                let family = match cursor.next() {
                    Some(token) => Some(parse_family(token)?),
                    None => None,
                };
                Ok(Command::ShowRib {
                    selector,
                    direction,
                    family,
                })
            }
            "teardown" => {
                let subcode = match cursor.next() {
                    Some(token) => Some(token.parse().map_err(|_| {
                        CommandError::InvalidArgument(
                            "subcode",
                            token.to_string(),
                        )
                    })?),
                    None => None,
                };
                Ok(Command::Teardown { selector, subcode })
            }
            "create" => {
                // The selector names the peer being created.
                let remote_addr = selector
                    .groups
                    .first()
                    .and_then(|group| group.addr)
                    .ok_or(CommandError::MissingArgument("neighbor"))?;
                match cursor.next() {
                    Some("peer-as") => {}
                    _ => {
                        return Err(CommandError::MissingArgument("peer-as"));
                    }
                }
                let peer_as = cursor.parse_arg("peer-as")?;
                Ok(Command::PeerCreate {
                    remote_addr,
                    peer_as,
                })
            }
            "delete" => Ok(Command::PeerDelete(selector)),
            _ => Err(CommandError::UnknownCommand(verb.to_string())),
        }
    }
}

// ===== impl RouteSpec =====

impl RouteSpec {
    fn parse(cursor: &mut Cursor<'_>) -> Result<RouteSpec, CommandError> {
        let prefix: IpNetwork = cursor.parse_arg("prefix")?;

        let mut next_hop = None;
        let mut path_id = None;
        let mut med = None;
        let mut local_preference = None;
        let mut communities = Vec::new();

        while let Some(token) = cursor.next() {
            match token {
                "next-hop" => next_hop = Some(cursor.parse_arg("next-hop")?),
                "path-id" => path_id = Some(cursor.parse_arg("path-id")?),
                "med" => med = Some(cursor.parse_arg("med")?),
                "local-preference" => {
                    local_preference =
                        Some(cursor.parse_arg("local-preference")?)
                }
                "community" => {
                    communities.push(parse_community(
                        cursor
                            .next()
                            .ok_or(CommandError::MissingArgument("community"))?,
                    )?);
                }
                _ => {
                    return Err(CommandError::InvalidArgument(
                        "option",
                        token.to_string(),
                    ));
                }
            }
        }

        let next_hop =
            next_hop.ok_or(CommandError::MissingArgument("next-hop"))?;
        Ok(RouteSpec {
            prefix,
            next_hop,
            path_id,
            med,
            local_preference,
            communities,
        })
    }

    pub fn family(&self) -> AfiSafi {
        match self.prefix {
            IpNetwork::V4(_) => AfiSafi::Ipv4Unicast,
            IpNetwork::V6(_) => AfiSafi::Ipv6Unicast,
        }
    }
}

// ===== impl PeerSelector =====

impl PeerSelector {
    // Parses the leading selector tokens: `*`, or one or more
    // `neighbor <ip> [peer-as N] [router-id R] [family F]` groups.
    fn parse(cursor: &mut Cursor<'_>) -> Result<PeerSelector, CommandError> {
        let mut groups = Vec::new();

        loop {
            match cursor.peek() {
                Some("*") => {
                    cursor.next();
                }
                Some("neighbor") => {
                    cursor.next();
                    let mut group = PeerPredicates {
                        addr: Some(cursor.parse_arg("neighbor address")?),
                        ..Default::default()
                    };
                    loop {
                        match cursor.peek() {
                            Some("peer-as") => {
                                cursor.next();
                                group.peer_as =
                                    Some(cursor.parse_arg("peer-as")?);
                            }
                            Some("router-id") => {
                                cursor.next();
                                group.router_id =
                                    Some(cursor.parse_arg("router-id")?);
                            }
                            Some("family") => {
                                cursor.next();
                                let token = cursor.next().ok_or(
                                    CommandError::MissingArgument("family"),
                                )?;
                                group.family = Some(parse_family(token)?);
                            }
                            _ => break,
                        }
                    }
                    groups.push(group);
                }
                _ => break,
            }
        }

        Ok(PeerSelector { groups })
    }

    pub fn wildcard() -> PeerSelector {
        PeerSelector::default()
    }

    // Returns whether the neighbor matches the selector: all predicates of
    // at least one group, or any peer for the empty selector.
    pub fn matches(&self, nbr: &Neighbor) -> bool {
        if self.groups.is_empty() {
            return true;
        }
        self.groups.iter().any(|group| group.matches(nbr))
    }
}

// ===== impl PeerPredicates =====

impl PeerPredicates {
    fn matches(&self, nbr: &Neighbor) -> bool {
        if let Some(addr) = &self.addr
            && *addr != nbr.remote_addr
        {
            return false;
        }
        if let Some(peer_as) = self.peer_as
            && peer_as != nbr.config.peer_as
        {
            return false;
        }
        if let Some(router_id) = self.router_id
            && Some(router_id) != nbr.identifier
        {
            return false;
        }
        if let Some(family) = self.family
            && !nbr.config.families.contains(&family)
        {
            return false;
        }
        true
    }
}

// ===== helper types and functions =====

struct Cursor<'a> {
    tokens: &'a [&'a str],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<&'a str> {
        let token = self.peek()?;
        self.pos += 1;
        Some(token)
    }

    fn parse_arg<T>(&mut self, what: &'static str) -> Result<T, CommandError>
    where
        T: FromStr,
    {
        let token = self.next().ok_or(CommandError::MissingArgument(what))?;
        token
            .parse()
            .map_err(|_| CommandError::InvalidArgument(what, token.to_string()))
    }
}

fn parse_family(token: &str) -> Result<AfiSafi, CommandError> {
    AfiSafi::ALL
        .into_iter()
        .find(|family| family.to_string() == token)
        .ok_or_else(|| CommandError::UnsupportedFamily(token.to_string()))
}

// Parses a community in the `asn:value` or plain integer form.
fn parse_community(token: &str) -> Result<u32, CommandError> {
    if let Some((global, local)) = token.split_once(':') {
        let global: u32 = global.parse().map_err(|_| {
            CommandError::InvalidArgument("community", token.to_string())
        })?;
        let local: u32 = local.parse().map_err(|_| {
            CommandError::InvalidArgument("community", token.to_string())
        })?;
        if global > u16::MAX as u32 || local > u16::MAX as u32 {
            return Err(CommandError::InvalidArgument(
                "community",
                token.to_string(),
            ));
        }
        Ok((global << 16) | local)
    } else {
        token.parse().map_err(|_| {
            CommandError::InvalidArgument("community", token.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NeighborCfg;

    fn tokens(line: &str) -> Vec<&str> {
        line.split_whitespace().collect()
    }

    fn neighbor(addr: &str, peer_as: u32) -> Neighbor {
        let config = NeighborCfg {
            remote_addr: addr.parse().unwrap(),
            peer_as,
            ..Default::default()
        };
        Neighbor::new(config, 65000)
    }

    #[test]
    fn parse_announce_wildcard() {
        let command =
            Command::parse(&tokens("* announce 10.200.0.0/24 next-hop 10.0.0.1"))
                .unwrap();
        let Command::Announce { selector, route } = command else {
            panic!("wrong command");
        };
        assert!(selector.groups.is_empty());
        assert_eq!(route.prefix, "10.200.0.0/24".parse().unwrap());
        assert_eq!(route.next_hop, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(route.family(), AfiSafi::Ipv4Unicast);
    }

    #[test]
    fn parse_announce_options() {
        let command = Command::parse(&tokens(
            "neighbor 10.0.0.2 announce 2001:db8::/32 next-hop 2001:db8::1 \
             med 50 local-preference 200 path-id 7 community 65000:10",
        ))
        .unwrap();
        let Command::Announce { selector, route } = command else {
            panic!("wrong command");
        };
        assert_eq!(selector.groups.len(), 1);
        assert_eq!(route.med, Some(50));
        assert_eq!(route.local_preference, Some(200));
        assert_eq!(route.path_id, Some(7));
        assert_eq!(route.communities, vec![(65000 << 16) | 10]);
        assert_eq!(route.family(), AfiSafi::Ipv6Unicast);
    }

    #[test]
    fn parse_withdraw() {
        let command =
            Command::parse(&tokens("withdraw 10.200.0.0/24 path-id 3"))
                .unwrap();
        assert_eq!(command, Command::Withdraw {
            selector: PeerSelector::wildcard(),
            prefix: "10.200.0.0/24".parse().unwrap(),
            path_id: Some(3),
        });
    }

    #[test]
    fn parse_show_rib() {
        let command =
            Command::parse(&tokens("neighbor 10.0.0.2 show rib in ipv4-unicast"))
                .unwrap();
        let Command::ShowRib {
            direction, family, ..
        } = command
        else {
            panic!("wrong command");
        };
        assert_eq!(direction, RibDirection::In);
        assert_eq!(family, Some(AfiSafi::Ipv4Unicast));
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!(matches!(
            Command::parse(&tokens("frobnicate")),
            Err(CommandError::UnknownCommand(_))
        ));
        assert!(matches!(
            Command::parse(&tokens("announce not-a-prefix next-hop 10.0.0.1")),
            Err(CommandError::InvalidArgument("prefix", _))
        ));
        assert!(matches!(
            Command::parse(&tokens("announce 10.0.0.0/8")),
            Err(CommandError::MissingArgument("next-hop"))
        ));
    }

    #[test]
    fn selector_matching() {
        let nbr_a = neighbor("10.0.0.2", 65001);
        let nbr_b = neighbor("10.0.0.3", 65002);

        // Wildcard matches everything.
        let selector = PeerSelector::wildcard();
        assert!(selector.matches(&nbr_a));
        assert!(selector.matches(&nbr_b));

        // Predicates within a group are ANDed.
        let command = Command::parse(&tokens(
            "neighbor 10.0.0.2 peer-as 65002 teardown",
        ))
        .unwrap();
        let Command::Teardown { selector, .. } = command else {
            panic!("wrong command");
        };
        assert!(!selector.matches(&nbr_a));
        assert!(!selector.matches(&nbr_b));

        // Groups are ORed.
        let command = Command::parse(&tokens(
            "neighbor 10.0.0.2 neighbor 10.0.0.3 teardown",
        ))
        .unwrap();
        let Command::Teardown { selector, .. } = command else {
            panic!("wrong command");
        };
        assert!(selector.matches(&nbr_a));
        assert!(selector.matches(&nbr_b));
    }
}

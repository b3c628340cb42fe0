//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use chrono::Utc;
use ferric_utils::ip::IpAddrExt;
use ferric_utils::socket::{TcpConnInfo, TcpStream};
use num_traits::FromPrimitive;

use crate::af::AfiSafi;
use crate::api::ApiEvent;
use crate::command::{Command, PeerSelector, RibDirection, RouteSpec};
use crate::config::NeighborCfg;
use crate::debug::Debug;
use crate::error::{CommandError, Error, IoError, NbrRxError};
use crate::instance::InstanceUpView;
use crate::neighbor::{
    Neighbor, Neighbors, collision_local_wins, fsm,
};
use crate::packet::attribute::{
    AsPath, Attrs, BaseAttrs, Comm, CommList,
};
use crate::packet::consts::{CeaseSubcode, ErrorCode, Origin};
use crate::packet::message::{
    Message, NotificationMsg, OperationalMsg, RouteRefreshMsg, UpdateMsg,
};
use crate::packet::nlri::{InetNlri, Nlri, NlriValue};
use crate::network;
use crate::rib::Change;
use crate::tasks::messages::input::ApiCommandMsg;

// Action requested by a daemon-control command, handled by the reactor's
// main loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ControlAction {
    Continue,
    Shutdown,
    Reload,
}

// ===== TCP connection request =====

pub(crate) fn process_tcp_accept(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    stream: TcpStream,
    conn_info: TcpConnInfo,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&conn_info.remote_addr) else {
        return Ok(());
    };
    if !nbr.config.enabled {
        return Ok(());
    }

    // Connection collision handling (RFC 4271 section 6.8).
    if nbr.conn_info.is_some() {
        match nbr.state {
            fsm::State::OpenSent | fsm::State::OpenConfirm => {
                let local_id = instance.config.router_id;
                if let Some(peer_id) = nbr.identifier
                    && !collision_local_wins(local_id, peer_id)
                {
                    // The existing session loses: tear it down and adopt
                    // the new connection.
                    let msg = NotificationMsg::new(
                        ErrorCode::Cease,
                        CeaseSubcode::ConnectionCollisionResolution,
                    );
                    nbr.fsm_event(instance, fsm::Event::Stop(Some(msg)));
                } else {
                    // The existing session wins: refuse the new
                    // connection.
                    let msg = NotificationMsg::new(
                        ErrorCode::Cease,
                        CeaseSubcode::ConnectionCollisionResolution,
                    );
                    network::reject_stream(stream, msg);
                    return Ok(());
                }
            }
            _ => {
                // An established (or embryonic) session is never displaced
                // by a new connection.
                let msg = NotificationMsg::new(
                    ErrorCode::Cease,
                    CeaseSubcode::ConnectionRejected,
                );
                network::reject_stream(stream, msg);
                return Ok(());
            }
        }
    }

    // Initialize the accepted stream.
    network::accepted_stream_init(
        &stream,
        nbr.remote_addr.address_family(),
        nbr.tx_ttl(),
        nbr.config.ttl_security,
    )
    .map_err(IoError::TcpSocketError)?;

    // Invoke FSM event.
    nbr.fsm_event(instance, fsm::Event::Connected(stream, conn_info));

    Ok(())
}

// ===== TCP connection established (or failed) =====

pub(crate) fn process_tcp_connect(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    nbr_addr: IpAddr,
    stream: Option<TcpStream>,
    conn_info: Option<TcpConnInfo>,
) -> Result<bool, Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&nbr_addr) else {
        return Ok(false);
    };
    nbr.tasks.connect = None;

    match (stream, conn_info) {
        (Some(stream), Some(conn_info)) => {
            if nbr.conn_info.is_some() {
                // A passive connection won the race.
                return Ok(false);
            }
            nbr.fsm_event(instance, fsm::Event::Connected(stream, conn_info));
            Ok(false)
        }
        _ => {
            nbr.fsm_event(instance, fsm::Event::ConnFail);
            Ok(true)
        }
    }
}

// ===== neighbor message receipt =====

pub(crate) fn process_nbr_msg(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    nbr_addr: IpAddr,
    msg: Result<Message, NbrRxError>,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&nbr_addr) else {
        return Ok(());
    };

    // Process received message.
    match msg {
        Ok(msg) => {
            Debug::NbrMsgRx(&nbr.remote_addr, &msg).log();

            // Update statistics.
            nbr.statistics.msgs_rcvd.update(&msg);

            // Per-state admissibility check: a message type that isn't
            // admissible in the current state tears the session down with
            // an FSM-error notification.
            if !fsm::admissible(nbr.state, msg.msg_type()) {
                let notif = NotificationMsg::new(
                    ErrorCode::FiniteStateMachineError,
                    fsm::error_subcode(nbr.state),
                );
                nbr.fsm_event(instance, fsm::Event::Stop(Some(notif)));
                return Ok(());
            }

            match msg {
                Message::Open(msg) => {
                    nbr.fsm_event(
                        instance,
                        fsm::Event::RcvdOpen(Box::new(msg)),
                    );
                }
                Message::Update(msg) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdUpdate);
                    process_nbr_update(instance, nbr, *msg)?;
                }
                Message::Notification(msg) => {
                    instance.emit_event(ApiEvent::NotificationRx {
                        peer: nbr.remote_addr,
                        code: msg.error_code,
                        subcode: msg.error_subcode,
                    });
                    nbr.fsm_event(instance, fsm::Event::RcvdNotif(msg.clone()));
                    // Keep track of the last received notification.
                    nbr.notification_rcvd = Some((Utc::now(), msg));
                }
                Message::Keepalive(_) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdKalive);
                }
                Message::RouteRefresh(msg) => {
                    nbr.fsm_event(instance, fsm::Event::RcvdKalive);
                    process_nbr_route_refresh(nbr, msg);
                }
                Message::Operational(msg) => {
                    process_nbr_operational(instance, nbr, msg);
                }
            }
        }
        Err(error) => match error {
            NbrRxError::TcpConnClosed => {
                nbr.fsm_event(instance, fsm::Event::ConnFail);
            }
            NbrRxError::MsgDecodeError(error) => {
                nbr.fsm_event(instance, fsm::Event::RcvdError(error));
            }
        },
    }

    Ok(())
}

fn process_nbr_update(
    instance: &mut InstanceUpView<'_>,
    nbr: &mut Neighbor,
    msg: UpdateMsg,
) -> Result<(), Error> {
    // End-of-RIB: clear the stale marks of the family.
    if let Some(family) = msg.eor {
        nbr.rib.rib_in.clear_stale(family);
        instance.emit_event(ApiEvent::Eor {
            peer: nbr.remote_addr,
            family: family.to_string(),
        });
        return Ok(());
    }

    let mut announced = Vec::new();
    let mut withdrawn = Vec::new();

    // Store announcements in the Adj-RIB-In.
    if let Some(attrs) = &msg.attrs {
        for nlri in msg.reach {
            if !nbr.is_af_enabled(nlri.family()) {
                continue;
            }
            announced.push(nlri.to_string());
            nbr.rib.rib_in.insert_announce(Change::Announce {
                nlri,
                attrs: Box::new(attrs.clone()),
            });
        }
    }

    // Remove withdrawn routes.
    for nlri in msg.unreach {
        if !nbr.is_af_enabled(nlri.family()) {
            continue;
        }
        withdrawn.push(nlri.to_string());
        nbr.rib.rib_in.remove(&nlri);
    }

    instance.emit_event(ApiEvent::UpdateRx {
        peer: nbr.remote_addr,
        announced,
        withdrawn,
    });

    Ok(())
}

fn process_nbr_route_refresh(nbr: &mut Neighbor, msg: RouteRefreshMsg) {
    // RFC 2918 - Section 4: ignore a refresh for an address family that
    // wasn't negotiated.
    let Some(family) = msg.family() else {
        return;
    };
    if !nbr.is_af_enabled(family) {
        return;
    }

    // Re-queue the entire Adj-RIB-Out for the family.
    nbr.refresh_adj_rib_out(family);
}

fn process_nbr_operational(
    instance: &mut InstanceUpView<'_>,
    nbr: &mut Neighbor,
    msg: OperationalMsg,
) {
    // The payload is opaque to the speaker: relay it to the API stream.
    instance.emit_event(ApiEvent::Operational {
        peer: nbr.remote_addr,
        code: msg.code,
    });
}

// ===== neighbor timeout =====

pub(crate) fn process_nbr_timer(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    nbr_addr: IpAddr,
    timer: fsm::Timer,
) -> Result<(), Error> {
    // Lookup neighbor.
    let Some(nbr) = neighbors.get_mut(&nbr_addr) else {
        return Ok(());
    };

    nbr.fsm_event(instance, fsm::Event::Timer(timer));

    Ok(())
}

// ===== API command processing =====

pub(crate) fn process_api_command(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    msg: ApiCommandMsg,
) -> ControlAction {
    Debug::ApiCommandRx(&msg.process, &msg.line).log();

    let tokens = msg.line.split_whitespace().collect::<Vec<_>>();
    if tokens.is_empty() {
        return ControlAction::Continue;
    }

    match Command::parse(&tokens) {
        Ok(command) => {
            match execute_command(instance, neighbors, &msg.process, command) {
                Ok(action) => {
                    // Acknowledge the command, unless the stream asked for
                    // silence.
                    if instance.api.ack_enabled(&msg.process) {
                        instance.api.emit_to(
                            &msg.process,
                            &ApiEvent::CommandResult {
                                ok: true,
                                message: msg.line.clone(),
                            },
                        );
                    }
                    action
                }
                Err(error) => {
                    reject_command(instance, &msg.process, &error);
                    ControlAction::Continue
                }
            }
        }
        Err(error) => {
            reject_command(instance, &msg.process, &error);
            ControlAction::Continue
        }
    }
}

fn reject_command(
    instance: &mut InstanceUpView<'_>,
    process: &str,
    error: &CommandError,
) {
    Error::Command(error.clone()).log();
    instance.api.emit_to(process, &ApiEvent::CommandResult {
        ok: false,
        message: error.to_string(),
    });
}

fn execute_command(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    process: &str,
    command: Command,
) -> Result<ControlAction, CommandError> {
    match command {
        Command::Shutdown => return Ok(ControlAction::Shutdown),
        Command::Reload => return Ok(ControlAction::Reload),
        Command::Restart => {
            // Tear every session down, then re-apply the configuration.
            for nbr in neighbors.values_mut() {
                nbr.clear_session(
                    instance,
                    CeaseSubcode::AdministrativeReset,
                );
            }
            return Ok(ControlAction::Reload);
        }
        Command::Ack(enabled) | Command::Sync(enabled) => {
            instance.api.set_ack(process, enabled);
        }
        Command::Status => {
            for nbr in neighbors.values() {
                instance.api.emit_to(process, &ApiEvent::PeerStateChange {
                    peer: nbr.remote_addr,
                    old_state: nbr.state,
                    new_state: nbr.state,
                });
            }
        }
        Command::Ping => {
            // The acknowledgment is the command result itself.
        }
        Command::Reset(selector) => {
            for nbr in select_peers(neighbors, &selector)? {
                nbr.clear_session(
                    instance,
                    CeaseSubcode::AdministrativeReset,
                );
            }
        }
        Command::Refresh(selector) => {
            // Ask each matching peer to re-send its routes.
            for nbr in select_peers(neighbors, &selector)? {
                nbr.request_refresh();
            }
        }
        Command::Announce { selector, route } => {
            let change = route_spec_change(&route);
            for nbr in select_peers(neighbors, &selector)? {
                nbr.rib.rib_out.insert_announce(change.clone());
            }
        }
        Command::Withdraw {
            selector,
            prefix,
            path_id,
        } => {
            let family = match prefix {
                ipnetwork::IpNetwork::V4(_) => AfiSafi::Ipv4Unicast,
                ipnetwork::IpNetwork::V6(_) => AfiSafi::Ipv6Unicast,
            };
            let nlri = NlriValue::Inet(InetNlri { family, prefix })
                .pack(path_id);
            for nbr in select_peers(neighbors, &selector)? {
                nbr.rib.rib_out.insert_withdraw(nlri.clone());
            }
        }
        Command::ShowRib {
            selector,
            direction,
            family,
        } => {
            show_rib(instance, neighbors, process, &selector, direction, family)?;
        }
        Command::Teardown { selector, subcode } => {
            let subcode = subcode
                .and_then(CeaseSubcode::from_u8)
                .unwrap_or(CeaseSubcode::AdministrativeShutdown);
            for nbr in select_peers(neighbors, &selector)? {
                nbr.clear_session(instance, subcode);
            }
        }
        Command::PeerCreate {
            remote_addr,
            peer_as,
        } => {
            if neighbors.contains_key(&remote_addr) {
                return Err(CommandError::InvalidArgument(
                    "neighbor",
                    remote_addr.to_string(),
                ));
            }
            let config = NeighborCfg {
                remote_addr,
                peer_as,
                ..Default::default()
            };
            let mut nbr = Neighbor::new(config, instance.config.asn);
            nbr.fsm_event(instance, fsm::Event::Start);
            neighbors.insert(remote_addr, nbr);
        }
        Command::PeerDelete(selector) => {
            let addrs = select_peers(neighbors, &selector)?
                .into_iter()
                .map(|nbr| nbr.remote_addr)
                .collect::<Vec<_>>();
            for addr in addrs {
                if let Some(mut nbr) = neighbors.remove(&addr) {
                    nbr.clear_session(
                        instance,
                        CeaseSubcode::PeerDeConfigured,
                    );
                }
            }
        }
    }

    Ok(ControlAction::Continue)
}

fn select_peers<'a>(
    neighbors: &'a mut Neighbors,
    selector: &PeerSelector,
) -> Result<Vec<&'a mut Neighbor>, CommandError> {
    let matched = neighbors
        .values_mut()
        .filter(|nbr| selector.matches(nbr))
        .collect::<Vec<_>>();
    if matched.is_empty() {
        return Err(CommandError::NoMatchingPeer);
    }
    Ok(matched)
}

fn route_spec_change(route: &RouteSpec) -> Change {
    let family = route.family();
    let nlri = NlriValue::Inet(InetNlri {
        family,
        prefix: route.prefix,
    })
    .pack(route.path_id);
    let attrs = Attrs {
        base: BaseAttrs {
            origin: Origin::Igp,
            as_path: AsPath::default(),
            as4_path: None,
            nexthop: Some(route.next_hop),
            ll_nexthop: None,
            med: route.med,
            local_pref: route.local_preference,
            aggregator: None,
            as4_aggregator: None,
            atomic_aggregate: false,
            originator_id: None,
            cluster_list: None,
        },
        comm: if route.communities.is_empty() {
            None
        } else {
            Some(CommList(
                route.communities.iter().map(|comm| Comm(*comm)).collect(),
            ))
        },
        ext_comm: None,
        extv6_comm: None,
        large_comm: None,
        aigp: None,
        pmsi_tunnel: None,
        prefix_sid: None,
        unknown: vec![],
    };
    Change::Announce {
        nlri,
        attrs: Box::new(attrs),
    }
}

fn show_rib(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    process: &str,
    selector: &PeerSelector,
    direction: RibDirection,
    family: Option<AfiSafi>,
) -> Result<(), CommandError> {
    for nbr in select_peers(neighbors, selector)? {
        let (rib, name) = match direction {
            RibDirection::In => (&nbr.rib.rib_in, "in"),
            RibDirection::Out => (&nbr.rib.rib_out, "out"),
        };
        let families = match family {
            Some(family) => vec![family],
            None => rib.families().collect(),
        };
        for family in families {
            for change in rib.iter(family) {
                instance.api.emit_to(process, &ApiEvent::RibEntry {
                    peer: nbr.remote_addr,
                    direction: name,
                    family: family.to_string(),
                    nlri: change.nlri().to_string(),
                    nexthop: change.nexthop(),
                });
            }
        }
    }
    Ok(())
}

// ===== outbound update servicing =====

// Emits at most one UPDATE for the neighbor, preserving reactor fairness
// between peers. Returns whether anything was sent.
pub(crate) fn service_nbr_update_queue(
    instance: &mut InstanceUpView<'_>,
    nbr: &mut Neighbor,
) -> bool {
    if nbr.state != fsm::State::Established {
        return false;
    }

    let Some(family) = nbr.rib.rib_out.dirty_families().first().copied()
    else {
        // Nothing queued: emit any pending End-of-RIB markers.
        for family in nbr.eor_pending.clone() {
            nbr.maybe_send_eor(family);
            instance.emit_event(ApiEvent::Eor {
                peer: nbr.remote_addr,
                family: family.to_string(),
            });
        }
        return false;
    };

    let Some(msg) = nbr.build_update(family) else {
        return false;
    };

    if let Message::Update(update) = &msg {
        instance.emit_event(ApiEvent::UpdateTx {
            peer: nbr.remote_addr,
            announced: update
                .reach
                .iter()
                .map(Nlri::to_string)
                .collect(),
            withdrawn: update
                .unreach
                .iter()
                .map(Nlri::to_string)
                .collect(),
        });
    }
    nbr.message_send(msg);
    true
}

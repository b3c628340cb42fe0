//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{self, AtomicU32};

use chrono::{DateTime, Utc};
use ferric_utils::UnboundedSender;
use ferric_utils::socket::{TTL_MAX, TcpConnInfo, TcpStream};
use ferric_utils::task::{IntervalTask, Task, TimeoutTask};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::af::AfiSafi;
use crate::api::ApiEvent;
use crate::config::{MAX_IDLE_HOLD_TIME, NeighborCfg};
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::packet::attribute::{self, AsPath, Attrs, BaseAttrs, Comm, CommList};
use crate::packet::consts::{
    AS_TRANS, AddPathMode, BGP_VERSION, CeaseSubcode, ErrorCode,
    FsmErrorSubcode, Origin,
};
use crate::packet::message::{
    AddPathTuple, Capability, DecodeCxt, EncodeCxt, GracefulRestartNego,
    GracefulRestartTuple, KeepaliveMsg, Message, Negotiated, NotificationMsg,
    OpenMsg, RouteRefreshMsg, UpdateMsg,
};
use crate::packet::nlri::{InetNlri, NlriValue};
use crate::rib::{Change, Rib};
use crate::tasks;
use crate::tasks::messages::output::NbrTxMsg;

// Large hold-time used during session initialization.
const LARGE_HOLDTIME: u16 = 240;
// Initial idle-hold back-off, doubled on each consecutive failure.
const INITIAL_IDLE_HOLD_TIME: u16 = 1;

// BGP neighbor.
#[derive(Debug)]
pub struct Neighbor {
    pub remote_addr: IpAddr,
    pub config: NeighborCfg,
    pub state: fsm::State,
    pub peer_type: PeerType,
    pub conn_info: Option<TcpConnInfo>,
    pub identifier: Option<Ipv4Addr>,
    pub holdtime_nego: Option<u16>,
    pub capabilities_adv: BTreeSet<Capability>,
    pub capabilities_rcvd: BTreeSet<Capability>,
    pub nego: Option<Negotiated>,
    pub notification_sent: Option<(DateTime<Utc>, NotificationMsg)>,
    pub notification_rcvd: Option<(DateTime<Utc>, NotificationMsg)>,
    pub last_established: Option<DateTime<Utc>>,
    pub statistics: NeighborStatistics,
    pub tasks: NeighborTasks,
    // Per-neighbor Adj-RIB-In and Adj-RIB-Out.
    pub rib: Rib,
    // Families owing an End-of-RIB marker after the initial drain.
    pub eor_pending: BTreeSet<AfiSafi>,
    // Current idle-hold back-off value.
    pub idle_hold_time: u16,
    pub msg_txp: Option<UnboundedSender<NbrTxMsg>>,
}

// BGP peer type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PeerType {
    Internal,
    External,
}

// Neighbor statistics.
#[derive(Debug, Default)]
pub struct NeighborStatistics {
    pub established_transitions: u32,
    pub msgs_rcvd: MessageStatistics,
    pub msgs_sent: MessageStatistics,
    pub erroneous_updates_withdrawn: u32,
}

// Inbound and outbound message counters.
#[derive(Debug, Default)]
pub struct MessageStatistics {
    pub total: Arc<AtomicU32>,
    pub updates: u32,
    pub notifications: u32,
    pub route_refreshes: u32,
}

// Neighbor tasks.
#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub autostart: Option<TimeoutTask>,
    pub connect: Option<Task<()>>,
    pub connect_retry: Option<TimeoutTask>,
    pub tcp_rx: Option<Task<()>>,
    pub keepalive: Option<IntervalTask>,
    pub holdtime: Option<TimeoutTask>,
    pub graceful_restart: Option<TimeoutTask>,
}

// Type alias.
pub type Neighbors = std::collections::BTreeMap<IpAddr, Neighbor>;

// Finite State Machine.
pub mod fsm {
    use ferric_utils::socket::{TcpConnInfo, TcpStream};
    use serde::{Deserialize, Serialize};

    use crate::packet::consts::MessageType;
    use crate::packet::error::DecodeError;
    use crate::packet::message::{NotificationMsg, OpenMsg};

    // FSM states.
    #[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        Idle,
        Connect,
        Active,
        OpenSent,
        OpenConfirm,
        Established,
    }

    // FSM events.
    //
    // The original RFC FSM events are listed above each event for clarity.
    #[derive(Debug)]
    pub enum Event {
        // ManualStart
        // ManualStart_with_PassiveTcpEstablishment
        Start,
        // ManualStop
        Stop(Option<NotificationMsg>),
        // Tcp_CR_Acked
        // TcpConnectionConfirmed
        Connected(TcpStream, TcpConnInfo),
        // TcpConnectionFails
        ConnFail,
        // BGPHeaderErr
        // BGPOpenMsgErr
        // UpdateMsgErr
        RcvdError(DecodeError),
        // BGPOpen
        RcvdOpen(Box<OpenMsg>),
        // NotifMsg
        RcvdNotif(NotificationMsg),
        // KeepAliveMsg
        RcvdKalive,
        // UpdateMsg
        RcvdUpdate,
        // ConnectRetryTimer_Expires
        // HoldTimer_Expires
        // IdleHoldTimer_Expires
        Timer(Timer),
    }

    // BGP timers.
    //
    // Note: KEEPALIVE messages are sent independently, separate from the
    // FSM.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Timer {
        ConnectRetry,
        Hold,
        IdleHold,
        GracefulRestart,
    }

    // Per-state message admissibility.
    //
    // A message outside this table tears the session down with an FSM-error
    // NOTIFICATION.
    pub fn admissible(state: State, msg_type: MessageType) -> bool {
        match state {
            State::Idle | State::Connect | State::Active => false,
            State::OpenSent => matches!(
                msg_type,
                MessageType::Open | MessageType::Notification
            ),
            State::OpenConfirm => matches!(
                msg_type,
                MessageType::Keepalive | MessageType::Notification
            ),
            State::Established => matches!(
                msg_type,
                MessageType::Update
                    | MessageType::Keepalive
                    | MessageType::Notification
                    | MessageType::RouteRefresh
                    | MessageType::Operational
            ),
        }
    }

    // The FSM-error subcode reporting an inadmissible message in the given
    // state.
    pub fn error_subcode(state: State) -> crate::packet::consts::FsmErrorSubcode {
        use crate::packet::consts::FsmErrorSubcode;
        match state {
            State::OpenConfirm => {
                FsmErrorSubcode::UnexpectedMessageInOpenConfirm
            }
            State::Established => {
                FsmErrorSubcode::UnexpectedMessageInEstablished
            }
            _ => FsmErrorSubcode::UnexpectedMessageInOpenSent,
        }
    }
}

// Connection collision resolution (RFC 4271 section 6.8): the session
// whose speaker has the numerically larger BGP Identifier survives.
pub fn collision_local_wins(
    local_id: Ipv4Addr,
    peer_id: Ipv4Addr,
) -> bool {
    u32::from(local_id) > u32::from(peer_id)
}


// Computes the session-scoped capability intersection from the advertised
// and received capability sets.
//
// Also used by the Rx task to derive its decoding context as soon as the
// peer's OPEN arrives, before the main task publishes the final value.
pub(crate) fn negotiate_caps(
    adv: &BTreeSet<Capability>,
    rcvd: &BTreeSet<Capability>,
    holdtime: u16,
    keepalive: u16,
) -> Negotiated {
    let four_octet_as = rcvd
        .iter()
        .any(|cap| cap.is_four_octet_as_number());
    let route_refresh = adv.iter().any(|cap| cap.is_route_refresh())
        && rcvd.iter().any(|cap| cap.is_route_refresh());
    let extended_message = adv.iter().any(|cap| cap.is_extended_message())
        && rcvd.iter().any(|cap| cap.is_extended_message());

    // Effective families: the intersection of the multiprotocol
    // capabilities. A peer that advertised no multiprotocol capability
    // at all implies the IPv4 unicast default.
    let family_set = |caps: &BTreeSet<Capability>| {
        let families = caps
            .iter()
            .filter_map(|cap| {
                if let Capability::MultiProtocol { afi, safi } = cap {
                    AfiSafi::from_pair(*afi, *safi)
                } else {
                    None
                }
            })
            .collect::<BTreeSet<_>>();
        if families.is_empty() {
            [AfiSafi::Ipv4Unicast].into()
        } else {
            families
        }
    };
    let families = family_set(adv)
        .intersection(&family_set(rcvd))
        .copied()
        .collect::<BTreeSet<_>>();

    // ADD-PATH per direction (RFC 7911 section 4).
    let addpath_modes = |caps: &BTreeSet<Capability>| {
        caps.iter()
            .filter_map(|cap| cap.as_add_path())
            .flatten()
            .filter_map(|tuple| {
                AfiSafi::from_pair(tuple.afi, tuple.safi)
                    .map(|family| (family, tuple.mode))
            })
            .collect::<std::collections::BTreeMap<_, _>>()
    };
    let local = addpath_modes(adv);
    let remote = addpath_modes(rcvd);
    let mut addpath_tx = BTreeSet::new();
    let mut addpath_rx = BTreeSet::new();
    for family in &families {
        let local_mode = local.get(family);
        let remote_mode = remote.get(family);
        if matches!(
            local_mode,
            Some(AddPathMode::Send | AddPathMode::ReceiveSend)
        ) && matches!(
            remote_mode,
            Some(AddPathMode::Receive | AddPathMode::ReceiveSend)
        ) {
            addpath_tx.insert(*family);
        }
        if matches!(
            local_mode,
            Some(AddPathMode::Receive | AddPathMode::ReceiveSend)
        ) && matches!(
            remote_mode,
            Some(AddPathMode::Send | AddPathMode::ReceiveSend)
        ) {
            addpath_rx.insert(*family);
        }
    }

    // Multiple-Labels counts: the minimum of both directions.
    let labels = |caps: &BTreeSet<Capability>| {
        caps.iter()
            .filter_map(|cap| cap.as_multiple_labels())
            .flatten()
            .filter_map(|tuple| {
                AfiSafi::from_pair(tuple.afi, tuple.safi)
                    .map(|family| (family, tuple.count))
            })
            .collect::<std::collections::BTreeMap<_, _>>()
    };
    let local_labels = labels(adv);
    let remote_labels = labels(rcvd);
    let multiple_labels = local_labels
        .iter()
        .filter_map(|(family, local_count)| {
            remote_labels.get(family).map(|remote_count| {
                (*family, std::cmp::min(*local_count, *remote_count))
            })
        })
        .collect();

    // Graceful restart: in effect when both sides advertised it. The
    // retention timer follows the peer's advertised restart time.
    let graceful_restart = if adv.iter().any(|cap| cap.is_graceful_restart())
    {
        rcvd.iter()
            .find_map(|cap| {
                if let Capability::GracefulRestart {
                    restart_time,
                    families: gr_families,
                    ..
                } = cap
                {
                    Some(GracefulRestartNego {
                        restart_time: *restart_time,
                        families: gr_families
                            .iter()
                            .filter_map(|tuple| {
                                AfiSafi::from_pair(tuple.afi, tuple.safi)
                            })
                            .filter(|family| families.contains(family))
                            .collect(),
                    })
                } else {
                    None
                }
            })
    } else {
        None
    };

    Negotiated {
        four_octet_as,
        route_refresh,
        extended_message,
        families,
        addpath_tx,
        addpath_rx,
        multiple_labels,
        graceful_restart,
        holdtime,
        keepalive,
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    // Creates a new neighbor in the Idle state.
    pub(crate) fn new(config: NeighborCfg, local_as: u32) -> Neighbor {
        let peer_type = if config.peer_as == local_as {
            PeerType::Internal
        } else {
            PeerType::External
        };

        Neighbor {
            remote_addr: config.remote_addr,
            config,
            state: fsm::State::Idle,
            peer_type,
            conn_info: None,
            identifier: None,
            holdtime_nego: None,
            capabilities_adv: Default::default(),
            capabilities_rcvd: Default::default(),
            nego: None,
            notification_sent: None,
            notification_rcvd: None,
            last_established: None,
            statistics: Default::default(),
            tasks: Default::default(),
            rib: Default::default(),
            eor_pending: Default::default(),
            idle_hold_time: INITIAL_IDLE_HOLD_TIME,
            msg_txp: None,
        }
    }

    // Injects an event into the neighbor's FSM.
    pub(crate) fn fsm_event(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        event: fsm::Event,
    ) {
        Debug::NbrFsmEvent(&self.remote_addr, &event).log();

        // The graceful-restart retention timer runs independently of the
        // session state.
        if let fsm::Event::Timer(fsm::Timer::GracefulRestart) = event {
            self.graceful_restart_expired(instance);
            return;
        }

        // Process FSM event.
        let next_state = match self.state {
            // Idle state
            fsm::State::Idle => match event {
                fsm::Event::Start
                | fsm::Event::Timer(fsm::Timer::IdleHold) => {
                    self.connect_retry_start(instance);
                    if self.config.passive {
                        Some(fsm::State::Active)
                    } else {
                        self.connect(instance);
                        Some(fsm::State::Connect)
                    }
                }
                // An accepted connection restarts the session immediately,
                // e.g. after losing a connection collision.
                fsm::Event::Connected(stream, conn_info)
                    if self.config.enabled =>
                {
                    self.connection_setup(instance, stream, conn_info);
                    self.open_send(instance);
                    self.holdtime_start(LARGE_HOLDTIME, instance);
                    Some(fsm::State::OpenSent)
                }
                _ => None,
            },
            // Connect state
            fsm::State::Connect => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(instance, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Connected(stream, conn_info) => {
                    self.connect_retry_stop();
                    self.connection_setup(instance, stream, conn_info);
                    self.open_send(instance);
                    self.holdtime_start(LARGE_HOLDTIME, instance);
                    Some(fsm::State::OpenSent)
                }
                fsm::Event::ConnFail => {
                    self.connect_retry_start(instance);
                    Some(fsm::State::Active)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::ConnectRetry) => {
                    self.connect(instance);
                    self.connect_retry_start(instance);
                    None
                }
                fsm::Event::Timer(_) => None,
                _ => {
                    // FSM error.
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
            },
            // Active state
            fsm::State::Active => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(instance, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Connected(stream, conn_info) => {
                    self.connect_retry_stop();
                    self.connection_setup(instance, stream, conn_info);
                    self.open_send(instance);
                    self.holdtime_start(LARGE_HOLDTIME, instance);
                    Some(fsm::State::OpenSent)
                }
                fsm::Event::ConnFail => {
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::ConnectRetry) => {
                    if !self.config.passive {
                        self.connect(instance);
                        self.connect_retry_start(instance);
                        Some(fsm::State::Connect)
                    } else {
                        self.connect_retry_start(instance);
                        None
                    }
                }
                fsm::Event::Timer(_) => None,
                _ => {
                    // FSM error.
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
            },
            // OpenSent state
            fsm::State::OpenSent => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(instance, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(instance, None);
                    self.connect_retry_start(instance);
                    Some(fsm::State::Active)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdOpen(msg) => {
                    let next_state = self.open_process(instance, *msg);
                    Some(next_state)
                }
                fsm::Event::RcvdNotif(_) => {
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let msg = NotificationMsg::new(
                        ErrorCode::HoldTimerExpired,
                        0,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(_) => None,
                _ => {
                    // FSM error.
                    let msg = NotificationMsg::new(
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInOpenSent,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
            },
            // OpenConfirm state
            fsm::State::OpenConfirm => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(instance, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(error);
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdNotif(_) => {
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdKalive => {
                    self.holdtime_restart();
                    Some(fsm::State::Established)
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let msg = NotificationMsg::new(
                        ErrorCode::HoldTimerExpired,
                        0,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(_) => None,
                _ => {
                    // FSM error.
                    let msg = NotificationMsg::new(
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInOpenConfirm,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
            },
            // Established state
            fsm::State::Established => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(instance, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    self.statistics.erroneous_updates_withdrawn += 1;
                    let msg = NotificationMsg::from(error);
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdNotif(_) => {
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdKalive | fsm::Event::RcvdUpdate => {
                    self.holdtime_restart();
                    None
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let msg = NotificationMsg::new(
                        ErrorCode::HoldTimerExpired,
                        0,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(_) => None,
                _ => {
                    // FSM error.
                    let msg = NotificationMsg::new(
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInEstablished,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
            },
        };

        // Change to next FSM state when applicable.
        if let Some(next_state) = next_state
            && self.state != next_state
        {
            // Schedule another session attempt unless the peer has been
            // manually disabled.
            if next_state == fsm::State::Idle && self.config.enabled {
                self.idle_hold_start(instance);
            } else {
                self.tasks.autostart = None;
            }

            self.fsm_state_change(instance, next_state);
        }
    }

    // Updates the neighbor's FSM state.
    fn fsm_state_change(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        next_state: fsm::State,
    ) {
        Debug::NbrFsmTransition(&self.remote_addr, &self.state, &next_state)
            .log();

        instance.emit_event(ApiEvent::PeerStateChange {
            peer: self.remote_addr,
            old_state: self.state,
            new_state: next_state,
        });

        // Keep track of the time that the BGP session last transitioned in
        // or out of the Established state.
        if self.state == fsm::State::Established
            || next_state == fsm::State::Established
        {
            self.last_established = Some(Utc::now());
        }

        if next_state == fsm::State::Established {
            // Update statistics and reset the session back-off.
            self.statistics.established_transitions += 1;
            self.idle_hold_time = INITIAL_IDLE_HOLD_TIME;

            // Initialize session.
            self.session_init();

            instance.emit_event(ApiEvent::PeerUp {
                peer: self.remote_addr,
                identifier: self.identifier.unwrap_or(Ipv4Addr::UNSPECIFIED),
                holdtime: self.holdtime_nego.unwrap_or(0),
            });
        } else if self.state == fsm::State::Established {
            instance.emit_event(ApiEvent::PeerDown {
                peer: self.remote_addr,
                reason: self
                    .notification_sent
                    .as_ref()
                    .map(|(_, msg)| format!("{}/{}", msg.error_code, msg.error_subcode)),
            });
        }

        self.state = next_state;
    }

    // Sets up the connection for the BGP neighbor, spawning the TCP Rx and
    // Tx tasks.
    fn connection_setup(
        &mut self,
        instance: &InstanceUpView<'_>,
        stream: TcpStream,
        conn_info: TcpConnInfo,
    ) {
        // Store TCP connection information.
        self.conn_info = Some(conn_info);

        // Compute the advertised capability set up front: the Rx task needs
        // it to derive its decoding context once the peer's OPEN arrives.
        self.capabilities_adv = self.build_capabilities(instance);

        // Split TCP stream into two halves.
        let (read_half, write_half) = stream.into_split();

        // Spawn neighbor TCP Tx task.
        let (msg_txp, msg_txc) = mpsc::unbounded_channel();
        let cxt = EncodeCxt::default();
        let mut tx_task = tasks::nbr_tx(self, cxt, write_half, msg_txc);
        self.msg_txp = Some(msg_txp);

        // Spawn neighbor TCP Rx task.
        let cxt = DecodeCxt {
            peer_type: self.peer_type,
            peer_as: self.config.peer_as,
            nego: Default::default(),
        };
        let tcp_rx_task = tasks::nbr_rx(
            self,
            cxt,
            self.capabilities_adv.clone(),
            read_half,
            &instance.tx.nbr_msg_rx,
        );
        self.tasks.tcp_rx = Some(tcp_rx_task);

        // No need to keep track of the Tx task since it gracefully exits as
        // soon as the tx end of its mpsc channel is dropped. This ensures
        // that messages sent during neighbor shutdown will be delivered.
        tx_task.detach();
    }

    // Initializes the BGP session once Established is reached.
    fn session_init(&mut self) {
        let nego = self.nego.clone().unwrap_or_default();

        // Update the Tx task with the negotiated session parameters.
        let msg = NbrTxMsg::UpdateNegotiated(nego.clone());
        if let Some(msg_txp) = &self.msg_txp {
            let _ = msg_txp.send(msg);
        }

        // A new session supersedes any graceful-restart state. Routes
        // retained from the previous session survive, still marked stale,
        // only if graceful restart was negotiated again.
        self.tasks.graceful_restart = None;
        if nego.graceful_restart.is_none() {
            self.rib.rib_in.clear();
        }

        // Queue the full Adj-RIB-Out for transmission and schedule the
        // End-of-RIB markers.
        self.rib.rib_out.requeue_all();
        self.eor_pending = if nego.graceful_restart.is_some() {
            nego.families.clone()
        } else {
            Default::default()
        };
    }

    // Closes the BGP session, performing necessary cleanup and releasing
    // resources.
    fn session_close(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        send_notif: Option<NotificationMsg>,
    ) {
        // Send a notification message.
        if self.state >= fsm::State::OpenSent
            && let Some(msg) = send_notif
        {
            self.message_send(Message::Notification(msg));
        }

        // Set the ConnectRetryTimer to zero.
        self.connect_retry_stop();

        // Adj-RIB-In handling: with graceful restart in effect the received
        // routes are retained, marked stale, until the restart timer fires
        // or the session re-establishes.
        if self.state == fsm::State::Established
            && let Some(nego) = &self.nego
            && let Some(gr) = &nego.graceful_restart
        {
            self.rib.rib_in.mark_stale();
            let task = tasks::nbr_timer(
                self,
                fsm::Timer::GracefulRestart,
                gr.restart_time,
                &instance.tx.nbr_timer,
            );
            self.tasks.graceful_restart = Some(task);
        } else {
            self.rib.rib_in.clear();
        }

        // Release all resources.
        self.conn_info = None;
        self.identifier = None;
        self.holdtime_nego = None;
        self.capabilities_adv.clear();
        self.capabilities_rcvd.clear();
        self.nego = None;
        self.eor_pending.clear();
        let graceful_restart = self.tasks.graceful_restart.take();
        self.tasks = NeighborTasks {
            graceful_restart,
            ..Default::default()
        };
        self.msg_txp = None;
    }

    // Withdraws all stale routes once the graceful-restart timer fires.
    fn graceful_restart_expired(&mut self, instance: &mut InstanceUpView<'_>) {
        let swept = self.rib.rib_in.sweep_stale();
        for nlri in swept {
            instance.emit_event(ApiEvent::UpdateRx {
                peer: self.remote_addr,
                announced: vec![],
                withdrawn: vec![nlri.to_string()],
            });
        }
        self.tasks.graceful_restart = None;
    }

    // Enqueues a single BGP message for transmission.
    pub(crate) fn message_send(&mut self, msg: Message) {
        Debug::NbrMsgTx(&self.remote_addr, &msg).log();

        // Update statistics.
        self.statistics.msgs_sent.update(&msg);

        // Keep track of the last sent notification.
        if let Message::Notification(msg) = &msg {
            self.notification_sent = Some((Utc::now(), msg.clone()));
        }

        // Ignore any possible error as the connection might have gone down
        // already.
        if let Some(msg_txp) = &self.msg_txp {
            let nbr_addr = self.remote_addr;
            let msg = NbrTxMsg::SendMessage { nbr_addr, msg };
            let _ = msg_txp.send(msg);
        }
    }

    // Builds the capability set advertised to this neighbor.
    fn build_capabilities(
        &self,
        instance: &InstanceUpView<'_>,
    ) -> BTreeSet<Capability> {
        // Base capabilities.
        let mut capabilities: BTreeSet<_> =
            [Capability::FourOctetAsNumber {
                asn: instance.config.asn,
            }]
            .into();

        if self.config.route_refresh {
            capabilities.insert(Capability::RouteRefresh);
        }
        if self.config.extended_message {
            capabilities.insert(Capability::ExtendedMessage);
        }
        if self.config.operational {
            capabilities.insert(Capability::Operational);
        }

        // Multiprotocol capabilities.
        for family in &self.config.families {
            capabilities.insert(Capability::MultiProtocol {
                afi: family.afi(),
                safi: family.safi(),
            });
        }

        // ADD-PATH capability.
        let add_path_tuples = self
            .config
            .add_path
            .iter()
            .map(|(family, mode)| AddPathTuple {
                afi: family.afi(),
                safi: family.safi(),
                mode: *mode,
            })
            .collect::<BTreeSet<_>>();
        if !add_path_tuples.is_empty() {
            capabilities.insert(Capability::AddPath(add_path_tuples));
        }

        // Graceful-Restart capability.
        if self.config.graceful_restart {
            capabilities.insert(Capability::GracefulRestart {
                restart_state: false,
                restart_time: instance.config.graceful_restart_time,
                families: self
                    .config
                    .families
                    .iter()
                    .map(|family| GracefulRestartTuple {
                        afi: family.afi(),
                        safi: family.safi(),
                        forwarding: false,
                    })
                    .collect(),
            });
        }

        capabilities
    }

    // Sends a BGP OPEN message based on the local configuration.
    //
    // The advertised capability set was computed during connection setup.
    fn open_send(&mut self, instance: &InstanceUpView<'_>) {
        let msg = Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as: instance.config.asn.try_into().unwrap_or(AS_TRANS),
            holdtime: self.config.hold_time.unwrap_or(instance.config.hold_time),
            identifier: instance.config.router_id,
            capabilities: self.capabilities_adv.clone(),
        });
        self.message_send(msg);
    }

    // Processes the received OPEN message while in the OpenSent state.
    fn open_process(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        msg: OpenMsg,
    ) -> fsm::State {
        use crate::packet::consts::OpenMessageErrorSubcode as ErrorSubcode;

        // Validate the received message.
        if let Err(error) = self.open_validate(instance, &msg) {
            error.log();

            // Close the session.
            let msg = match error {
                Error::NbrBadAs(..) => Some(NotificationMsg::new(
                    ErrorCode::OpenMessageError,
                    ErrorSubcode::BadPeerAs,
                )),
                Error::NbrBadIdentifier(..) => Some(NotificationMsg::new(
                    ErrorCode::OpenMessageError,
                    ErrorSubcode::BadBgpIdentifier,
                )),
                _ => None,
            };
            self.session_close(instance, msg);

            // Transition to the Idle state.
            return fsm::State::Idle;
        }

        // Calculate negotiated hold-time.
        let local_holdtime =
            self.config.hold_time.unwrap_or(instance.config.hold_time);
        let holdtime_nego = std::cmp::min(msg.holdtime, local_holdtime);

        // Set the ConnectRetryTimer to zero.
        self.connect_retry_stop();

        // Send Keepalive message.
        self.message_send(Message::Keepalive(KeepaliveMsg {}));

        // Start Keepalive interval and session hold timer.
        let keepalive = if holdtime_nego != 0 {
            let keepalive = self
                .config
                .keepalive
                .unwrap_or(holdtime_nego / 3)
                .max(1);
            self.keepalive_interval_start(keepalive);
            self.holdtime_start(holdtime_nego, instance);
            keepalive
        } else {
            self.holdtime_stop();
            0
        };

        // Keep track of the received data.
        self.identifier = Some(msg.identifier);
        self.holdtime_nego = (holdtime_nego != 0).then_some(holdtime_nego);
        self.capabilities_rcvd = msg.capabilities;

        // Compute the negotiated session parameters.
        self.nego = Some(self.negotiate(holdtime_nego, keepalive));

        // Transition to the OpenConfirm state.
        fsm::State::OpenConfirm
    }

    // Performs semantic validation of the received BGP OPEN message.
    // Syntactic errors are detected during the decoding phase.
    fn open_validate(
        &self,
        instance: &InstanceUpView<'_>,
        msg: &OpenMsg,
    ) -> Result<(), Error> {
        // Validate ASN.
        if self.config.peer_as != msg.real_as() {
            return Err(Error::NbrBadAs(
                self.remote_addr,
                msg.real_as(),
                self.config.peer_as,
            ));
        }

        // Validate BGP identifier.
        if msg.identifier == instance.config.router_id {
            return Err(Error::NbrBadIdentifier(
                self.remote_addr,
                msg.identifier,
            ));
        }

        Ok(())
    }

    // Computes the session-scoped capability intersection after the OPEN
    // exchange.
    fn negotiate(&self, holdtime: u16, keepalive: u16) -> Negotiated {
        negotiate_caps(
            &self.capabilities_adv,
            &self.capabilities_rcvd,
            holdtime,
            keepalive,
        )
    }

    // Returns the neighbor's Tx-TTL value based on the peer type and
    // configuration.
    pub(crate) fn tx_ttl(&self) -> u8 {
        match self.peer_type {
            PeerType::Internal => TTL_MAX,
            PeerType::External => {
                if self.config.ttl_security.is_some() {
                    TTL_MAX
                } else if let Some(ttl) = self.config.ebgp_multihop_ttl {
                    ttl
                } else {
                    1
                }
            }
        }
    }

    // Loads the statically configured routes into the Adj-RIB-Out.
    pub(crate) fn load_static_routes(&mut self) {
        for route in self.config.routes.clone() {
            let family = match route.prefix {
                ipnetwork::IpNetwork::V4(_) => AfiSafi::Ipv4Unicast,
                ipnetwork::IpNetwork::V6(_) => AfiSafi::Ipv6Unicast,
            };
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
                comm: route.communities.as_ref().map(|communities| {
                    CommList(communities.iter().map(|comm| Comm(*comm)).collect())
                }),
                ext_comm: None,
                extv6_comm: None,
                large_comm: None,
                aigp: None,
                pmsi_tunnel: None,
                prefix_sid: None,
                unknown: vec![],
            };
            self.rib.rib_out.insert_announce(Change::Announce {
                nlri,
                attrs: Box::new(attrs),
            });
        }
    }

    // Builds at most one outbound UPDATE from the Adj-RIB-Out queue of the
    // given family.
    //
    // Announcements sharing an attribute collection coalesce into a single
    // message until it approaches the negotiated size limit; withdrawals
    // batch together the same way.
    pub(crate) fn build_update(&mut self, family: AfiSafi) -> Option<Message> {
        let nego = self.nego.clone().unwrap_or_default();
        let cxt = EncodeCxt { nego: nego.clone() };
        let addpath = nego.addpath_tx.contains(&family);
        let max_len = nego.max_message_len() as usize;

        let first = self.rib.rib_out.peek_queued(family)?;
        let withdraw_batch = first.is_withdraw();
        let attrs = first.attrs().cloned();

        // Fixed message overhead: header plus the encoded attributes, with
        // room for the NEXT_HOP or MP_REACH_NLRI scaffolding.
        let mut msg_len = UpdateMsg::MIN_LEN as usize
            + attrs
                .as_ref()
                .map(|attrs| {
                    attrs.length(&cxt) as usize
                        + attribute::nexthop::length() as usize
                        + 16
                })
                .unwrap_or(8);

        let mut reach = Vec::new();
        let mut unreach = Vec::new();
        while let Some(next) = self.rib.rib_out.peek_queued(family) {
            // Stop at a batching boundary.
            if next.is_withdraw() != withdraw_batch
                || next.attrs() != attrs.as_ref()
            {
                break;
            }
            // Stop before exceeding the message size limit.
            let nlri_len = next.nlri().wire_len(addpath);
            if msg_len + nlri_len > max_len && !(reach.is_empty() && unreach.is_empty()) {
                break;
            }
            msg_len += nlri_len;

            let change = self.rib.rib_out.pop_queued(family).unwrap();
            match change {
                Change::Announce { nlri, .. } => reach.push(nlri),
                Change::Withdraw { nlri } => unreach.push(nlri),
            }
        }

        if reach.is_empty() && unreach.is_empty() {
            return None;
        }

        let msg = UpdateMsg {
            reach,
            unreach,
            attrs: if withdraw_batch { None } else { attrs },
            eor: None,
        };
        Some(Message::Update(Box::new(msg)))
    }

    // Emits the End-of-RIB marker for the family if the initial drain has
    // completed.
    pub(crate) fn maybe_send_eor(&mut self, family: AfiSafi) {
        if self.eor_pending.contains(&family)
            && !self.rib.rib_out.has_queued(family)
        {
            self.eor_pending.remove(&family);
            let msg = UpdateMsg::eor(family);
            self.message_send(Message::Update(Box::new(msg)));
        }
    }

    // Starts the idle-hold timer with exponential back-off and jitter.
    fn idle_hold_start(&mut self, instance: &InstanceUpView<'_>) {
        let base = self.idle_hold_time;
        let jitter = if base > 1 {
            rand::rng().random_range(0..=base / 4)
        } else {
            0
        };
        let task = tasks::nbr_timer(
            self,
            fsm::Timer::IdleHold,
            base + jitter,
            &instance.tx.nbr_timer,
        );
        self.tasks.autostart = Some(task);

        // Double the back-off, up to the cap.
        self.idle_hold_time =
            std::cmp::min(base.saturating_mul(2), MAX_IDLE_HOLD_TIME);
    }

    // Starts a TCP connection task to the neighbor's remote address.
    fn connect(&mut self, instance: &InstanceUpView<'_>) {
        let task = tasks::tcp_connect(self, &instance.tx.tcp_connect);
        self.tasks.connect = Some(task);
    }

    // Starts the Keepalive Tx interval.
    fn keepalive_interval_start(&mut self, interval: u16) {
        let task = tasks::nbr_kalive_interval(self, interval);
        self.tasks.keepalive = Some(task);
    }

    // Starts the session hold timer.
    fn holdtime_start(&mut self, seconds: u16, instance: &InstanceUpView<'_>) {
        let task = tasks::nbr_timer(
            self,
            fsm::Timer::Hold,
            seconds,
            &instance.tx.nbr_timer,
        );
        self.tasks.holdtime = Some(task);
    }

    // Restarts the session hold timer if the negotiated HoldTime value is
    // non-zero.
    fn holdtime_restart(&mut self) {
        if let Some(holdtime) = self.tasks.holdtime.as_mut() {
            holdtime.reset(None);
        }
    }

    // Stops the session hold timer.
    fn holdtime_stop(&mut self) {
        self.tasks.holdtime = None;
    }

    // Starts the connect retry timer.
    fn connect_retry_start(&mut self, instance: &InstanceUpView<'_>) {
        let task = tasks::nbr_timer(
            self,
            fsm::Timer::ConnectRetry,
            instance.config.connect_retry_time,
            &instance.tx.nbr_timer,
        );
        self.tasks.connect_retry = Some(task);
    }

    // Stops the connect retry timer.
    fn connect_retry_stop(&mut self) {
        self.tasks.connect_retry = None;
    }

    // Requeues the current Adj-RIB-Out for the given family (soft
    // refresh).
    pub(crate) fn refresh_adj_rib_out(&mut self, family: AfiSafi) {
        let changes = self
            .rib
            .rib_out
            .iter(family)
            .cloned()
            .collect::<Vec<_>>();
        for change in changes {
            self.rib.rib_out.insert_announce(change);
        }
    }

    // Clears the neighbor session administratively.
    pub(crate) fn clear_session(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        subcode: CeaseSubcode,
    ) {
        let msg = NotificationMsg::new(ErrorCode::Cease, subcode);
        self.fsm_event(instance, fsm::Event::Stop(Some(msg)));
    }

    // Sends a ROUTE-REFRESH request for every negotiated family.
    pub(crate) fn request_refresh(&mut self) {
        let Some(nego) = &self.nego else {
            return;
        };
        if !nego.route_refresh {
            return;
        }
        for family in nego.families.clone() {
            let msg = RouteRefreshMsg {
                afi: num_traits::ToPrimitive::to_u16(&family.afi()).unwrap(),
                safi: num_traits::ToPrimitive::to_u8(&family.safi()).unwrap(),
            };
            self.message_send(Message::RouteRefresh(msg));
        }
    }

    // Check if the given address-family is enabled for this session.
    pub(crate) fn is_af_enabled(&self, family: AfiSafi) -> bool {
        match &self.nego {
            Some(nego) => nego.families.contains(&family),
            None => false,
        }
    }
}

// ===== impl MessageStatistics =====

impl MessageStatistics {
    pub(crate) fn update(&mut self, msg: &Message) {
        self.total.fetch_add(1, atomic::Ordering::Relaxed);
        match msg {
            Message::Update(_) => {
                self.updates += 1;
            }
            Message::Notification(_) => {
                self.notifications += 1;
            }
            Message::RouteRefresh(_) => {
                self.route_refreshes += 1;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::consts::MessageType;

    #[test]
    fn admissibility_table() {
        use MessageType::*;
        use fsm::State;

        let all_types = [
            Open,
            Update,
            Notification,
            Keepalive,
            RouteRefresh,
            Operational,
        ];

        for msg_type in all_types {
            assert!(!fsm::admissible(State::Idle, msg_type));
            assert!(!fsm::admissible(State::Connect, msg_type));
            assert!(!fsm::admissible(State::Active, msg_type));
        }

        assert!(fsm::admissible(State::OpenSent, Open));
        assert!(fsm::admissible(State::OpenSent, Notification));
        assert!(!fsm::admissible(State::OpenSent, Update));
        assert!(!fsm::admissible(State::OpenSent, Keepalive));
        assert!(!fsm::admissible(State::OpenSent, RouteRefresh));

        assert!(fsm::admissible(State::OpenConfirm, Keepalive));
        assert!(fsm::admissible(State::OpenConfirm, Notification));
        assert!(!fsm::admissible(State::OpenConfirm, Open));
        assert!(!fsm::admissible(State::OpenConfirm, Update));

        assert!(fsm::admissible(State::Established, Update));
        assert!(fsm::admissible(State::Established, Keepalive));
        assert!(fsm::admissible(State::Established, Notification));
        assert!(fsm::admissible(State::Established, RouteRefresh));
        assert!(fsm::admissible(State::Established, Operational));
        assert!(!fsm::admissible(State::Established, Open));
    }

    #[test]
    fn collision_resolution() {
        let low = Ipv4Addr::new(10, 0, 0, 1);
        let high = Ipv4Addr::new(10, 0, 0, 2);

        assert!(collision_local_wins(high, low));
        assert!(!collision_local_wins(low, high));
        // A tied identifier never happens between distinct speakers, but
        // the loser is deterministic regardless.
        assert!(!collision_local_wins(low, low));
    }
}

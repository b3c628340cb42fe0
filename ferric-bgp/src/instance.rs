//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use ferric_utils::socket::TcpListener;
use ferric_utils::task::Task;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::api::ApiSupervisor;
use crate::config::Config;
use crate::debug::Debug;
use crate::error::{Error, IoError};
use crate::events::{self, ControlAction};
use crate::neighbor::{Neighbor, Neighbors, fsm};
use crate::network;
use crate::packet::consts::{CeaseSubcode, ErrorCode};
use crate::packet::message::NotificationMsg;
use crate::tasks;
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::{
    ApiCommandMsg, ApiExitMsg, NbrRxMsg, NbrTimerMsg, TcpAcceptMsg,
    TcpConnectMsg,
};

// How long the reactor keeps draining writes during shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(1);
// Interval driving outbound UPDATE generation when the loop is otherwise
// idle.
const UPDATE_TX_INTERVAL: Duration = Duration::from_millis(50);

//
// The reactor: a single event loop owning all peer FSMs, the listening
// sockets and the API helper processes.
//
// All mutable protocol state lives here and is only ever touched from this
// task; child tasks communicate exclusively through channels.
//
#[derive(Debug)]
pub struct Instance {
    // Validated configuration.
    pub config: Config,
    // Instance neighbors.
    pub neighbors: Neighbors,
    // TCP listening sockets.
    pub listeners: Vec<ListenerTask>,
    // API process supervisor.
    pub api: ApiSupervisor,
    // Input channel senders, cloned into child tasks.
    pub tx: ProtocolChannelsTx,
    // Cumulative TCP connection failures.
    connect_failures: u32,
}

#[derive(Debug)]
pub struct ListenerTask {
    pub addr: IpAddr,
    pub socket: Arc<TcpListener>,
    _task: Task<()>,
}

#[derive(Clone, Debug)]
pub struct ProtocolChannelsTx {
    // TCP accept event.
    pub tcp_accept: Sender<TcpAcceptMsg>,
    // TCP connect event.
    pub tcp_connect: Sender<TcpConnectMsg>,
    // TCP neighbor message.
    pub nbr_msg_rx: Sender<NbrRxMsg>,
    // Neighbor timeout event.
    pub nbr_timer: Sender<NbrTimerMsg>,
    // API command line.
    pub api_command: Sender<ApiCommandMsg>,
    // API process exit.
    pub api_exit: Sender<ApiExitMsg>,
}

#[derive(Debug)]
pub struct ProtocolChannelsRx {
    tcp_accept: Receiver<TcpAcceptMsg>,
    tcp_connect: Receiver<TcpConnectMsg>,
    nbr_msg_rx: Receiver<NbrRxMsg>,
    nbr_timer: Receiver<NbrTimerMsg>,
    api_command: Receiver<ApiCommandMsg>,
    api_exit: Receiver<ApiExitMsg>,
}

// Borrowed view of the reactor handed to the event handlers, alongside the
// (separately borrowed) neighbor table.
pub struct InstanceUpView<'a> {
    pub config: &'a Config,
    pub tx: &'a ProtocolChannelsTx,
    pub api: &'a mut ApiSupervisor,
}

// ===== impl Instance =====

impl Instance {
    pub fn new(config: Config) -> (Instance, ProtocolChannelsRx) {
        let (tx, rx) = protocol_channels();

        let instance = Instance {
            config,
            neighbors: Default::default(),
            listeners: Vec::new(),
            api: Default::default(),
            tx,
            connect_failures: 0,
        };
        (instance, rx)
    }

    // Starts the reactor: listeners, neighbors and API processes.
    pub fn start(&mut self) -> Result<(), Error> {
        Debug::InstanceStart.log();

        // Create TCP listeners.
        for addr in self.config.listen.clone() {
            let socket = network::listen_socket(addr)
                .map(Arc::new)
                .map_err(|error| {
                    Error::InstanceStartError(Box::new(
                        IoError::TcpSocketError(error).into(),
                    ))
                })?;
            let task = tasks::tcp_listener(&socket, &self.tx.tcp_accept);
            Debug::ListenerStart(&addr).log();
            self.listeners.push(ListenerTask {
                addr,
                socket,
                _task: task,
            });
        }

        // Create neighbors.
        for nbr_config in self.config.neighbors.clone() {
            let mut nbr = Neighbor::new(nbr_config, self.config.asn);
            nbr.load_static_routes();

            // Install the neighbor's MD5 key on the listening sockets.
            if let Some(password) = &nbr.config.md5_password {
                for listener in &self.listeners {
                    network::listen_socket_md5sig_update(
                        &listener.socket,
                        &nbr.remote_addr,
                        Some(password),
                    );
                }
            }

            self.neighbors.insert(nbr.remote_addr, nbr);
        }

        // Spawn API processes.
        self.api.start(
            &self.config.api,
            &self.tx.api_command,
            &self.tx.api_exit,
        );

        // Start all enabled neighbors.
        let (mut instance, neighbors) = self.as_view();
        for nbr in neighbors.values_mut() {
            if nbr.config.enabled {
                nbr.fsm_event(&mut instance, fsm::Event::Start);
            }
        }

        Ok(())
    }

    // Runs the reactor until a shutdown is requested.
    pub async fn run(
        &mut self,
        rx: &mut ProtocolChannelsRx,
    ) -> Result<(), Error> {
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(IoError::TcpSocketError)?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(IoError::TcpSocketError)?;
        let mut update_tx = tokio::time::interval(UPDATE_TX_INTERVAL);

        loop {
            let action = tokio::select! {
                biased;
                _ = sigterm.recv() => ControlAction::Shutdown,
                _ = sigint.recv() => ControlAction::Shutdown,
                msg = rx.recv() => {
                    match msg {
                        Some(msg) => self.process(msg),
                        None => ControlAction::Continue,
                    }
                }
                _ = update_tx.tick() => ControlAction::Continue,
            };

            match action {
                ControlAction::Shutdown => break,
                ControlAction::Reload => {
                    // The daemon drives reconfiguration; from the core's
                    // point of view a reload re-applies the neighbor set.
                    self.reconfigure();
                }
                ControlAction::Continue => {}
            }

            // Outbound UPDATE generation: one UPDATE per peer per turn, so
            // one busy peer can't starve the others.
            self.service_update_queues();

            // Exit if the connection failure ceiling was reached.
            if self.config.max_connect_failures != 0
                && self.connect_failures >= self.config.max_connect_failures
            {
                break;
            }
        }

        self.shutdown().await;
        Ok(())
    }

    // Dispatches one input event.
    fn process(&mut self, msg: ProtocolInputMsg) -> ControlAction {
        let (mut instance, neighbors) = instance_view(
            &self.config,
            &self.tx,
            &mut self.api,
            &mut self.neighbors,
        );

        let mut action = ControlAction::Continue;
        let result = match msg {
            // Accepted TCP connection request.
            ProtocolInputMsg::TcpAccept(msg) => events::process_tcp_accept(
                &mut instance,
                neighbors,
                msg.stream,
                msg.conn_info,
            ),
            // TCP connection attempt completed.
            ProtocolInputMsg::TcpConnect(msg) => {
                match events::process_tcp_connect(
                    &mut instance,
                    neighbors,
                    msg.nbr_addr,
                    msg.stream,
                    msg.conn_info,
                ) {
                    Ok(failed) => {
                        if failed {
                            self.connect_failures += 1;
                        }
                        Ok(())
                    }
                    Err(error) => Err(error),
                }
            }
            // Received message from neighbor.
            ProtocolInputMsg::NbrRx(msg) => events::process_nbr_msg(
                &mut instance,
                neighbors,
                msg.nbr_addr,
                msg.msg,
            ),
            // Neighbor's timeout has expired.
            ProtocolInputMsg::NbrTimer(msg) => events::process_nbr_timer(
                &mut instance,
                neighbors,
                msg.nbr_addr,
                msg.timer,
            ),
            // API command line.
            ProtocolInputMsg::ApiCommand(msg) => {
                action =
                    events::process_api_command(&mut instance, neighbors, msg);
                Ok(())
            }
            // API process exited.
            ProtocolInputMsg::ApiExit(msg) => {
                instance.api.child_exited(
                    &msg.process,
                    &self.tx.api_command,
                    &self.tx.api_exit,
                );
                Ok(())
            }
        };
        if let Err(error) = result {
            error.log();
        }

        action
    }

    // Emits at most one pending UPDATE per Established peer.
    fn service_update_queues(&mut self) {
        let (mut instance, neighbors) = instance_view(
            &self.config,
            &self.tx,
            &mut self.api,
            &mut self.neighbors,
        );
        for nbr in neighbors.values_mut() {
            events::service_nbr_update_queue(&mut instance, nbr);
        }
    }

    // Re-applies the neighbor configuration after a reload: new neighbors
    // are created, removed ones are torn down. Existing neighbors keep
    // their sessions.
    fn reconfigure(&mut self) {
        let configured = self
            .config
            .neighbors
            .iter()
            .map(|nbr_config| nbr_config.remote_addr)
            .collect::<std::collections::BTreeSet<_>>();

        // Tear down neighbors that are no longer configured.
        let removed = self
            .neighbors
            .keys()
            .filter(|addr| !configured.contains(addr))
            .copied()
            .collect::<Vec<_>>();
        let (mut instance, neighbors) = instance_view(
            &self.config,
            &self.tx,
            &mut self.api,
            &mut self.neighbors,
        );
        for addr in removed {
            if let Some(mut nbr) = neighbors.remove(&addr) {
                nbr.clear_session(
                    &mut instance,
                    CeaseSubcode::PeerDeConfigured,
                );
            }
        }

        // Create newly configured neighbors.
        for nbr_config in self.config.neighbors.clone() {
            if self.neighbors.contains_key(&nbr_config.remote_addr) {
                continue;
            }
            let mut nbr = Neighbor::new(nbr_config, self.config.asn);
            nbr.load_static_routes();
            let addr = nbr.remote_addr;
            let (mut instance, _) = instance_view(
                &self.config,
                &self.tx,
                &mut self.api,
                &mut self.neighbors,
            );
            if nbr.config.enabled {
                nbr.fsm_event(&mut instance, fsm::Event::Start);
            }
            self.neighbors.insert(addr, nbr);
        }
    }

    // Replaces the configuration (between reactor turns) and re-applies
    // it.
    pub fn reload(&mut self, config: Config) {
        self.config = config;
        self.reconfigure();
    }

    // Sends Cease notifications to all Established peers, drains writes for
    // a bounded time and releases everything.
    async fn shutdown(&mut self) {
        Debug::InstanceShutdown.log();

        let (mut instance, neighbors) = instance_view(
            &self.config,
            &self.tx,
            &mut self.api,
            &mut self.neighbors,
        );
        for nbr in neighbors.values_mut() {
            let msg = NotificationMsg::new(
                ErrorCode::Cease,
                CeaseSubcode::AdministrativeShutdown,
            );
            nbr.fsm_event(&mut instance, fsm::Event::Stop(Some(msg)));
        }
        self.api.shutdown();

        // Give the detached Tx tasks a chance to flush the notifications.
        tokio::time::sleep(SHUTDOWN_DRAIN).await;
    }

    // Returns a view struct plus the neighbor table, borrowed apart.
    pub(crate) fn as_view(
        &mut self,
    ) -> (InstanceUpView<'_>, &mut Neighbors) {
        instance_view(
            &self.config,
            &self.tx,
            &mut self.api,
            &mut self.neighbors,
        )
    }
}

// ===== impl ProtocolChannelsRx =====

impl ProtocolChannelsRx {
    // Receives the next input event from any of the channels.
    pub async fn recv(&mut self) -> Option<ProtocolInputMsg> {
        tokio::select! {
            biased;
            msg = self.tcp_accept.recv() => {
                msg.map(ProtocolInputMsg::TcpAccept)
            }
            msg = self.tcp_connect.recv() => {
                msg.map(ProtocolInputMsg::TcpConnect)
            }
            msg = self.nbr_msg_rx.recv() => {
                msg.map(ProtocolInputMsg::NbrRx)
            }
            msg = self.nbr_timer.recv() => {
                msg.map(ProtocolInputMsg::NbrTimer)
            }
            msg = self.api_command.recv() => {
                msg.map(ProtocolInputMsg::ApiCommand)
            }
            msg = self.api_exit.recv() => {
                msg.map(ProtocolInputMsg::ApiExit)
            }
        }
    }
}

// ===== impl InstanceUpView =====

impl InstanceUpView<'_> {
    // Emits a structured event to every API process.
    pub(crate) fn emit_event(&mut self, event: crate::api::ApiEvent) {
        self.api.emit(&event);
    }
}

// ===== helper functions =====

fn protocol_channels() -> (ProtocolChannelsTx, ProtocolChannelsRx) {
    let (tcp_acceptp, tcp_acceptc) = mpsc::channel(4);
    let (tcp_connectp, tcp_connectc) = mpsc::channel(4);
    let (nbr_msg_rxp, nbr_msg_rxc) = mpsc::channel(4);
    let (nbr_timerp, nbr_timerc) = mpsc::channel(4);
    let (api_commandp, api_commandc) = mpsc::channel(64);
    let (api_exitp, api_exitc) = mpsc::channel(4);

    let tx = ProtocolChannelsTx {
        tcp_accept: tcp_acceptp,
        tcp_connect: tcp_connectp,
        nbr_msg_rx: nbr_msg_rxp,
        nbr_timer: nbr_timerp,
        api_command: api_commandp,
        api_exit: api_exitp,
    };
    let rx = ProtocolChannelsRx {
        tcp_accept: tcp_acceptc,
        tcp_connect: tcp_connectc,
        nbr_msg_rx: nbr_msg_rxc,
        nbr_timer: nbr_timerc,
        api_command: api_commandc,
        api_exit: api_exitc,
    };

    (tx, rx)
}

fn instance_view<'a>(
    config: &'a Config,
    tx: &'a ProtocolChannelsTx,
    api: &'a mut ApiSupervisor,
    neighbors: &'a mut Neighbors,
) -> (InstanceUpView<'a>, &'a mut Neighbors) {
    (InstanceUpView { config, tx, api }, neighbors)
}

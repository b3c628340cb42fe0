//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic;
use std::time::Duration;

use ferric_utils::socket::{OwnedReadHalf, OwnedWriteHalf, TcpListener};
use ferric_utils::task::{IntervalTask, Task, TimeoutTask};
use tokio::sync::mpsc::{Sender, UnboundedReceiver};
use tracing::{Instrument, debug_span};

use crate::debug::Debug;
use crate::neighbor::{Neighbor, fsm};
use crate::network;
use crate::packet::message::{
    Capability, DecodeCxt, EncodeCxt, KeepaliveMsg, Message,
};

//
// BGP tasks diagram:
//
//                 tcp_listener (Nx) -> +--------------+
//                  tcp_connect (Nx) -> |              | -> (Nx) nbr_tx
//                       nbr_rx (Nx) -> |              | -> (Nx) nbr_kalive_interval
//                    nbr_timer (Nx) -> |   instance   |
//              api_process_rx (Nx) -> |              | -> (Nx) api_process_tx
//                                      +--------------+
//

// BGP inter-task message types.
pub mod messages {
    use std::net::IpAddr;

    use serde::{Deserialize, Serialize};

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use ferric_utils::socket::{TcpConnInfo, TcpStream};

        use super::*;
        use crate::error::NbrRxError;
        use crate::neighbor::fsm;
        use crate::packet::message::Message;

        #[derive(Debug)]
        pub enum ProtocolMsg {
            TcpAccept(TcpAcceptMsg),
            TcpConnect(TcpConnectMsg),
            NbrRx(NbrRxMsg),
            NbrTimer(NbrTimerMsg),
            ApiCommand(ApiCommandMsg),
            ApiExit(ApiExitMsg),
        }

        #[derive(Debug)]
        pub struct TcpAcceptMsg {
            pub stream: TcpStream,
            pub conn_info: TcpConnInfo,
        }

        #[derive(Debug)]
        pub struct TcpConnectMsg {
            pub nbr_addr: IpAddr,
            // Unset when the connection attempt failed.
            pub stream: Option<TcpStream>,
            pub conn_info: Option<TcpConnInfo>,
        }

        #[derive(Debug)]
        pub struct NbrRxMsg {
            pub nbr_addr: IpAddr,
            pub msg: Result<Message, NbrRxError>,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct NbrTimerMsg {
            pub nbr_addr: IpAddr,
            pub timer: fsm::Timer,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct ApiCommandMsg {
            pub process: String,
            pub line: String,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct ApiExitMsg {
            pub process: String,
        }
    }

    // Output messages (main task -> child task).
    pub mod output {
        use super::*;
        use crate::packet::message::{Message, Negotiated};

        #[derive(Debug, Serialize)]
        pub enum NbrTxMsg {
            SendMessage {
                nbr_addr: IpAddr,
                msg: Message,
            },
            UpdateNegotiated(Negotiated),
        }
    }
}

// ===== BGP tasks =====

// TCP listening task.
pub(crate) fn tcp_listener(
    listener: &Arc<TcpListener>,
    tcp_acceptp: &Sender<messages::input::TcpAcceptMsg>,
) -> Task<()> {
    let span = debug_span!("listener");
    let _span_guard = span.enter();

    let listener = listener.clone();
    let tcp_acceptp = tcp_acceptp.clone();
    Task::spawn(
        async move {
            let _ = network::listen_loop(listener, tcp_acceptp).await;
        }
        .in_current_span(),
    )
}

// TCP connect task.
pub(crate) fn tcp_connect(
    nbr: &Neighbor,
    tcp_connectp: &Sender<messages::input::TcpConnectMsg>,
) -> Task<()> {
    let span = debug_span!("neighbor", addr = %nbr.remote_addr);
    let _span_guard = span.enter();

    let remote_addr = nbr.remote_addr;
    let local_addr = nbr.config.local_addr;
    let ttl = nbr.tx_ttl();
    let ttl_security = nbr.config.ttl_security;
    let tcp_password = nbr.config.md5_password.clone();
    let tcp_connectp = tcp_connectp.clone();
    Task::spawn(
        async move {
            let result = network::connect(
                remote_addr,
                local_addr,
                ttl,
                ttl_security,
                &tcp_password,
            )
            .await;

            let msg = match result {
                Ok((stream, conn_info)) => messages::input::TcpConnectMsg {
                    nbr_addr: remote_addr,
                    stream: Some(stream),
                    conn_info: Some(conn_info),
                },
                Err(error) => {
                    error.log();
                    messages::input::TcpConnectMsg {
                        nbr_addr: remote_addr,
                        stream: None,
                        conn_info: None,
                    }
                }
            };
            let _ = tcp_connectp.send(msg).await;
        }
        .in_current_span(),
    )
}

// Neighbor TCP Rx task.
pub(crate) fn nbr_rx(
    nbr: &Neighbor,
    cxt: DecodeCxt,
    adv_caps: BTreeSet<Capability>,
    read_half: OwnedReadHalf,
    nbr_msg_rxp: &Sender<messages::input::NbrRxMsg>,
) -> Task<()> {
    let span1 = debug_span!("neighbor", addr = %nbr.remote_addr);
    let _span1_guard = span1.enter();
    let span2 = debug_span!("input");
    let _span2_guard = span2.enter();

    let nbr_addr = nbr.remote_addr;
    let nbr_msg_rxp = nbr_msg_rxp.clone();
    Task::spawn(
        async move {
            let _ = network::nbr_read_loop(
                read_half, nbr_addr, cxt, adv_caps, nbr_msg_rxp,
            )
            .await;
        }
        .in_current_span(),
    )
}

// Neighbor TCP Tx task.
pub(crate) fn nbr_tx(
    nbr: &Neighbor,
    cxt: EncodeCxt,
    write_half: OwnedWriteHalf,
    msg_txc: UnboundedReceiver<messages::output::NbrTxMsg>,
) -> Task<()> {
    let span1 = debug_span!("neighbor", addr = %nbr.remote_addr);
    let _span1_guard = span1.enter();
    let span2 = debug_span!("output");
    let _span2_guard = span2.enter();

    Task::spawn(
        async move {
            network::nbr_write_loop(write_half, cxt, msg_txc).await;
        }
        .in_current_span(),
    )
}

// Neighbor timer task.
pub(crate) fn nbr_timer(
    nbr: &Neighbor,
    timer: fsm::Timer,
    seconds: u16,
    nbr_timerp: &Sender<messages::input::NbrTimerMsg>,
) -> TimeoutTask {
    let nbr_timerp = nbr_timerp.clone();
    let nbr_addr = nbr.remote_addr;

    TimeoutTask::new(Duration::from_secs(seconds.into()), move || async move {
        let msg = messages::input::NbrTimerMsg { nbr_addr, timer };
        let _ = nbr_timerp.send(msg).await;
    })
}

// Send periodic keepalive messages.
pub(crate) fn nbr_kalive_interval(
    nbr: &Neighbor,
    interval: u16,
) -> IntervalTask {
    let msg_txp = nbr.msg_txp.as_ref().unwrap().clone();
    let nbr_addr = nbr.remote_addr;
    let msg_counter = nbr.statistics.msgs_sent.total.clone();

    IntervalTask::new(
        Duration::from_secs(interval.into()),
        false,
        move || {
            let msg_txp = msg_txp.clone();
            let msg_counter = msg_counter.clone();

            async move {
                let msg = Message::Keepalive(KeepaliveMsg {});
                Debug::NbrMsgTx(&nbr_addr, &msg).log();

                let msg =
                    messages::output::NbrTxMsg::SendMessage { nbr_addr, msg };
                let _ = msg_txp.send(msg);
                msg_counter.fetch_add(1, atomic::Ordering::Relaxed);
            }
        },
    )
}

//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use ferric_utils::ip::{AddressFamily, IpAddrExt};
use ferric_utils::socket::{
    OwnedReadHalf, OwnedWriteHalf, SocketExt, TTL_MAX, TcpConnInfo,
    TcpListener, TcpSocket, TcpSocketExt, TcpStream, TcpStreamExt,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::UnboundedReceiver;

use ferric_utils::task::Task;

use crate::error::{Error, IoError, NbrRxError};
use crate::neighbor;
use crate::packet::message::{
    Capability, DecodeCxt, EncodeCxt, Message, NotificationMsg,
};
use crate::tasks::messages::input::{NbrRxMsg, TcpAcceptMsg};
use crate::tasks::messages::output::NbrTxMsg;

pub const BGP_PORT: u16 = 179;

// ===== global functions =====

pub(crate) fn listen_socket(
    addr: IpAddr,
) -> Result<TcpListener, std::io::Error> {
    // Create TCP socket.
    let socket = socket(addr.address_family())?;

    // Bind socket.
    let sockaddr = SocketAddr::from((addr, BGP_PORT));
    socket.set_reuseaddr(true)?;
    socket.bind(sockaddr)?;

    // GTSM Procedure: set TTL to max for outgoing packets.
    socket.set_ttl(addr.address_family(), TTL_MAX)?;

    // Convert the socket into a TcpListener.
    let socket = socket.listen(4096)?;

    Ok(socket)
}

// Installs or clears the TCP MD5 key for a neighbor on the listening
// socket.
pub(crate) fn listen_socket_md5sig_update(
    socket: &TcpListener,
    nbr_addr: &IpAddr,
    password: Option<&str>,
) {
    if let Err(error) = socket.set_md5sig(nbr_addr, password) {
        IoError::TcpAuthError(error).log();
    }
}

pub(crate) async fn listen_loop(
    listener: Arc<TcpListener>,
    tcp_acceptp: Sender<TcpAcceptMsg>,
) -> Result<(), SendError<TcpAcceptMsg>> {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => match stream.conn_info() {
                Ok(conn_info) => {
                    let msg = TcpAcceptMsg { stream, conn_info };
                    tcp_acceptp.send(msg).await?;
                }
                Err(error) => {
                    IoError::TcpInfoError(error).log();
                }
            },
            Err(error) => {
                IoError::TcpAcceptError(error).log();
            }
        }
    }
}

// Applies per-neighbor socket options to an accepted connection.
pub(crate) fn accepted_stream_init(
    stream: &TcpStream,
    af: AddressFamily,
    ttl: u8,
    ttl_security: Option<u8>,
) -> Result<(), std::io::Error> {
    // Set TTL.
    SocketExt::set_ttl(stream, af, ttl)?;

    // Set TTL security check.
    if let Some(ttl_security_hops) = ttl_security {
        let ttl = TTL_MAX - ttl_security_hops + 1;
        stream.set_min_ttl(af, ttl)?;
    }

    Ok(())
}

pub(crate) async fn connect(
    remote_addr: IpAddr,
    local_addr: Option<IpAddr>,
    ttl: u8,
    ttl_security: Option<u8>,
    tcp_password: &Option<String>,
) -> Result<(TcpStream, TcpConnInfo), Error> {
    let af = remote_addr.address_family();

    // Create TCP socket.
    let socket = socket(af).map_err(IoError::TcpSocketError)?;

    // Bind socket to the configured local address.
    if let Some(local_addr) = local_addr {
        let sockaddr = SocketAddr::from((local_addr, 0));
        socket
            .set_reuseaddr(true)
            .map_err(IoError::TcpSocketError)?;
        socket.bind(sockaddr).map_err(IoError::TcpSocketError)?;
    }

    // Set TTL.
    socket.set_ttl(af, ttl).map_err(IoError::TcpSocketError)?;

    // Set TTL security check.
    if let Some(ttl_security_hops) = ttl_security {
        let min_ttl = TTL_MAX - ttl_security_hops + 1;
        socket
            .set_min_ttl(af, min_ttl)
            .map_err(IoError::TcpSocketError)?;
    }

    // Set the TCP MD5 password.
    if let Some(tcp_password) = tcp_password {
        socket
            .set_md5sig(&remote_addr, Some(tcp_password))
            .map_err(IoError::TcpAuthError)?;
    }

    // Connect to remote address on the BGP port.
    let sockaddr = SocketAddr::from((remote_addr, BGP_PORT));
    let stream = socket
        .connect(sockaddr)
        .await
        .map_err(IoError::TcpConnectError)?;

    // Obtain TCP connection address/port information.
    let conn_info = stream.conn_info().map_err(IoError::TcpInfoError)?;

    Ok((stream, conn_info))
}

pub(crate) async fn nbr_write_loop(
    mut stream: OwnedWriteHalf,
    mut cxt: EncodeCxt,
    mut nbr_msg_txc: UnboundedReceiver<NbrTxMsg>,
) {
    while let Some(msg) = nbr_msg_txc.recv().await {
        match msg {
            // Send message to the peer.
            NbrTxMsg::SendMessage { msg, .. } => {
                let buf = msg.encode(&cxt);
                if let Err(error) = stream.write_all(&buf).await {
                    IoError::TcpSendError(error).log();
                }
            }
            // Update the negotiated session parameters.
            NbrTxMsg::UpdateNegotiated(nego) => cxt.nego = nego,
        }
    }
}

pub(crate) async fn nbr_read_loop(
    mut stream: OwnedReadHalf,
    nbr_addr: IpAddr,
    mut cxt: DecodeCxt,
    adv_caps: BTreeSet<Capability>,
    nbr_msg_rxp: Sender<NbrRxMsg>,
) -> Result<(), SendError<NbrRxMsg>> {
    const BUF_SIZE: usize = 65535;
    let mut buf = [0; BUF_SIZE];
    let mut data = Vec::with_capacity(BUF_SIZE);

    loop {
        // Read data from the network.
        match stream.read(&mut buf).await {
            Ok(0) => {
                // Notify that the connection was closed by the remote end.
                let msg = NbrRxMsg {
                    nbr_addr,
                    msg: Err(NbrRxError::TcpConnClosed),
                };
                nbr_msg_rxp.send(msg).await?;
                return Ok(());
            }
            Ok(num_bytes) => data.extend_from_slice(&buf[..num_bytes]),
            Err(error) => {
                IoError::TcpRecvError(error).log();
                let msg = NbrRxMsg {
                    nbr_addr,
                    msg: Err(NbrRxError::TcpConnClosed),
                };
                nbr_msg_rxp.send(msg).await?;
                return Ok(());
            }
        };

        // Decode message(s).
        while let Some(msg_size) = Message::get_message_len(&data) {
            let msg = Message::decode(&data[0..msg_size], &cxt)
                .map_err(NbrRxError::MsgDecodeError);
            data.drain(..msg_size);

            // The peer's advertised capabilities influence how subsequent
            // messages are decoded. Derive the session parameters as soon
            // as the OPEN arrives.
            if let Ok(Message::Open(msg)) = &msg {
                cxt.nego =
                    neighbor::negotiate_caps(&adv_caps, &msg.capabilities, 0, 0);
            }

            // Notify that the BGP message was received.
            let msg = NbrRxMsg { nbr_addr, msg };
            nbr_msg_rxp.send(msg).await?;
        }
    }
}

// Sends a NOTIFICATION on a connection that is being refused and closes
// it. Used when resolving connection collisions.
pub(crate) fn reject_stream(stream: TcpStream, msg: NotificationMsg) {
    let mut task = Task::spawn(async move {
        let mut stream = stream;
        let buf = Message::Notification(msg).encode(&EncodeCxt::default());
        let _ = stream.write_all(&buf).await;
        let _ = stream.shutdown().await;
    });
    task.detach();
}

// ===== helper functions =====

fn socket(af: AddressFamily) -> Result<TcpSocket, std::io::Error> {
    let socket = match af {
        AddressFamily::Ipv4 => TcpSocket::new_v4()?,
        AddressFamily::Ipv6 => {
            let socket = TcpSocket::new_v6()?;
            socket.set_ipv6_only(true)?;
            socket
        }
    };

    // Internetwork control precedence.
    match af {
        AddressFamily::Ipv4 => {
            socket.set_ipv4_tos(libc::IPTOS_PREC_INTERNETCONTROL)?;
        }
        AddressFamily::Ipv6 => {
            socket.set_ipv6_tclass(libc::IPTOS_PREC_INTERNETCONTROL)?;
        }
    }

    Ok(socket)
}

//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, SocketAddr};
use std::os::raw::c_int;
use std::os::unix::io::AsRawFd;

use serde::{Deserialize, Serialize};
pub use tokio::net::{
    TcpListener, TcpSocket, TcpStream, tcp::OwnedReadHalf, tcp::OwnedWriteHalf,
};

use crate::ip::AddressFamily;

// Maximum TTL for IPv4 or Hop Limit for IPv6.
pub const TTL_MAX: u8 = 255;

// Useful type definition.
type Result<T> = std::io::Result<T>;

// TCP connection information.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct TcpConnInfo {
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
}

// FFI struct used to set the TCP_MD5SIG socket option.
#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Copy, Clone)]
struct tcp_md5sig {
    tcpm_addr: nix::sys::socket::SockaddrStorage,
    tcpm_flags: u8,
    tcpm_prefixlen: u8,
    tcpm_keylen: u16,
    __tcpm_pad: u32,
    tcpm_key: [u8; 108],
}

// Extension methods for all socket types.
pub trait SocketExt: Sized + AsRawFd {
    // Sets the value of the IP_TOS option for this socket.
    fn set_ipv4_tos(&self, tos: u8) -> Result<()> {
        let optval = tos as c_int;
        setsockopt(self, libc::IPPROTO_IP, libc::IP_TOS, &optval)
    }

    // Sets the value of the IP_TTL option for this socket.
    fn set_ipv4_ttl(&self, ttl: u8) -> Result<()> {
        let optval = ttl as c_int;
        setsockopt(self, libc::IPPROTO_IP, libc::IP_TTL, &optval)
    }

    // Sets the value of the IP_MINTTL option for this socket.
    fn set_ipv4_minttl(&self, ttl: u8) -> Result<()> {
        let optval = ttl as c_int;
        setsockopt(self, libc::IPPROTO_IP, libc::IP_MINTTL, &optval)
    }

    // Sets the value of the IPV6_TCLASS option for this socket.
    fn set_ipv6_tclass(&self, dscp: u8) -> Result<()> {
        let optval = dscp as c_int;
        setsockopt(self, libc::IPPROTO_IPV6, libc::IPV6_TCLASS, &optval)
    }

    // Sets the value of the IPV6_UNICAST_HOPS option for this socket.
    fn set_ipv6_unicast_hops(&self, hops: u8) -> Result<()> {
        let optval = hops as c_int;
        setsockopt(self, libc::IPPROTO_IPV6, libc::IPV6_UNICAST_HOPS, &optval)
    }

    // Sets the value of the IPV6_MINHOPCOUNT option for this socket.
    fn set_ipv6_min_hopcount(&self, hopcount: u8) -> Result<()> {
        let optval = hopcount as c_int;
        setsockopt(self, libc::IPPROTO_IPV6, libc::IPV6_MINHOPCOUNT, &optval)
    }

    // Sets the TTL or hop-limit option appropriate for the address family.
    fn set_ttl(&self, af: AddressFamily, ttl: u8) -> Result<()> {
        match af {
            AddressFamily::Ipv4 => self.set_ipv4_ttl(ttl),
            AddressFamily::Ipv6 => self.set_ipv6_unicast_hops(ttl),
        }
    }

    // Sets the minimum TTL or hop-count option appropriate for the address
    // family (GTSM).
    fn set_min_ttl(&self, af: AddressFamily, ttl: u8) -> Result<()> {
        match af {
            AddressFamily::Ipv4 => self.set_ipv4_minttl(ttl),
            AddressFamily::Ipv6 => self.set_ipv6_min_hopcount(ttl),
        }
    }
}

// Extension methods for TcpSocket, TcpListener and TcpStream.
pub trait TcpSocketExt: SocketExt {
    // Sets the value of the IPV6_V6ONLY option for this socket.
    fn set_ipv6_only(&self, enable: bool) -> Result<()> {
        let optval = enable as c_int;
        setsockopt(self, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, &optval)
    }

    // Sets the value of the TCP_MD5SIG option for this socket.
    //
    // Passing `None` clears a previously installed key.
    fn set_md5sig(&self, dst: &IpAddr, password: Option<&str>) -> Result<()> {
        let dst = SocketAddr::from((*dst, 0));
        let mut optval = tcp_md5sig {
            tcpm_addr: dst.into(),
            tcpm_flags: 0,
            tcpm_prefixlen: 0,
            tcpm_keylen: 0,
            __tcpm_pad: 0,
            tcpm_key: [0; 108],
        };
        if let Some(password) = password {
            optval.tcpm_keylen = password.len() as u16;
            optval.tcpm_key[..password.len()]
                .copy_from_slice(password.as_bytes());
        }

        setsockopt(self, libc::IPPROTO_TCP, libc::TCP_MD5SIG, &optval)
    }
}

// Extension methods for TcpStream.
pub trait TcpStreamExt: TcpSocketExt {
    // Returns address and port information about the TCP connection.
    fn conn_info(&self) -> Result<TcpConnInfo>;
}

// ===== trait implementations =====

impl SocketExt for TcpSocket {}
impl SocketExt for TcpListener {}
impl SocketExt for TcpStream {}
impl TcpSocketExt for TcpSocket {}
impl TcpSocketExt for TcpListener {}
impl TcpSocketExt for TcpStream {}

impl TcpStreamExt for TcpStream {
    fn conn_info(&self) -> Result<TcpConnInfo> {
        let local = self.local_addr()?;
        let remote = self.peer_addr()?;
        Ok(TcpConnInfo {
            local_addr: local.ip(),
            local_port: local.port(),
            remote_addr: remote.ip(),
            remote_port: remote.port(),
        })
    }
}

// ===== helper functions =====

fn setsockopt<S, T>(socket: &S, level: c_int, name: c_int, optval: &T) -> Result<()>
where
    S: AsRawFd,
{
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            optval as *const _ as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

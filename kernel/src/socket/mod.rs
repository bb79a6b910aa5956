//! Socket subsystem: a single global table of sockets keyed by small
//! integer descriptors, per AF_INET + SOCK_STREAM (TCP) / SOCK_DGRAM (UDP) /
//! SOCK_RAW. There is no per-process file descriptor table here — one flat
//! namespace shared by every process, mirroring the process table's own
//! concurrency model: one global `Mutex<SocketTable>`, entered only from
//! inside `without_interrupts`.

pub mod types;
pub mod udp;

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;
use x86_64::instructions::interrupts::without_interrupts;

use crate::net::tcp::{self, ConnectionId};
use crate::process::process::ProcessId;
use udp::UdpSocket;

pub const AF_INET: u16 = types::AF_INET;
pub const SOCK_STREAM: u16 = 1;
pub const SOCK_DGRAM: u16 = types::SOCK_DGRAM;
pub const SOCK_RAW: u16 = 3;

/// Opaque identifier for a UDP socket's internal state, distinct from its
/// table descriptor so the two can be renumbered independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketHandle(u64);

static NEXT_SOCKET_HANDLE: AtomicU32 = AtomicU32::new(0);

fn alloc_socket_handle() -> SocketHandle {
    SocketHandle(NEXT_SOCKET_HANDLE.fetch_add(1, Ordering::Relaxed) as u64)
}

/// Closed error set every socket call draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SocketError {
    Inval = -1,
    NoBufs = -2,
    ConnRefused = -3,
    Timeout = -4,
    NotConn = -5,
    Already = -6,
    AddrInUse = -7,
    WouldBlock = -8,
}

/// Recognized socket options (SO_REUSEADDR, SO_RCVTIMEO, SO_SNDTIMEO,
/// SO_RCVBUF, SO_SNDBUF, SO_KEEPALIVE).
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    pub reuseaddr: bool,
    pub rcvtimeo_ticks: Option<u64>,
    pub sndtimeo_ticks: Option<u64>,
    pub rcvbuf: usize,
    pub sndbuf: usize,
    pub keepalive: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        SocketOptions {
            reuseaddr: false,
            rcvtimeo_ticks: None,
            sndtimeo_ticks: None,
            rcvbuf: 64 * 1024,
            sndbuf: 64 * 1024,
            keepalive: false,
        }
    }
}

pub struct RawPacket {
    pub src_addr: [u8; 4],
    pub data: Vec<u8>,
}

const MAX_RAW_QUEUE: usize = 32;

pub struct RawSocket {
    pub protocol: u8,
    rx_queue: VecDeque<RawPacket>,
}

impl RawSocket {
    fn new(protocol: u8) -> Self {
        RawSocket { protocol, rx_queue: VecDeque::new() }
    }

    fn enqueue(&mut self, packet: RawPacket) {
        if self.rx_queue.len() >= MAX_RAW_QUEUE {
            self.rx_queue.pop_front();
        }
        self.rx_queue.push_back(packet);
    }
}

enum SocketKind {
    /// SOCK_STREAM before `listen`/`connect` has committed it to one or the
    /// other. `local_port` is set once `bind` has run.
    TcpUnbound { local_port: Option<u16> },
    TcpListener { local_port: u16 },
    TcpConnection { conn_id: ConnectionId },
    Udp(UdpSocket),
    Raw(RawSocket),
}

struct Socket {
    owner_pid: ProcessId,
    #[allow(dead_code)] // kept for getsockopt(SO_DOMAIN)-style introspection
    domain: u16,
    type_: u16,
    kind: SocketKind,
    options: SocketOptions,
}

struct SocketTable {
    sockets: BTreeMap<i32, Socket>,
    next_fd: i32,
    /// port -> descriptor, for delivering inbound UDP datagrams without a
    /// linear scan of the whole table.
    udp_ports: BTreeMap<u16, i32>,
}

impl SocketTable {
    fn new() -> Self {
        SocketTable { sockets: BTreeMap::new(), next_fd: 0, udp_ports: BTreeMap::new() }
    }

    fn alloc_fd(&mut self) -> i32 {
        let fd = self.next_fd;
        self.next_fd += 1;
        fd
    }
}

static SOCKET_TABLE: Mutex<Option<SocketTable>> = Mutex::new(None);
static NEXT_EPHEMERAL_PORT: AtomicU32 = AtomicU32::new(49152);

pub fn init() {
    without_interrupts(|| {
        *SOCKET_TABLE.lock() = Some(SocketTable::new());
    });
    log::info!("Socket table initialized");
}

fn with_sockets<R>(f: impl FnOnce(&mut SocketTable) -> R) -> R {
    without_interrupts(|| {
        let mut guard = SOCKET_TABLE.lock();
        let table = guard.as_mut().expect("socket table not initialized");
        f(table)
    })
}

fn alloc_ephemeral_port() -> u16 {
    let port = NEXT_EPHEMERAL_PORT.fetch_add(1, Ordering::Relaxed);
    (port % (65535 - 49152) + 49152) as u16
}

/// Create a new socket. `protocol` is only meaningful for SOCK_RAW.
pub fn socket_create(owner_pid: ProcessId, domain: u16, type_: u16, protocol: u8) -> Result<i32, SocketError> {
    if domain != AF_INET {
        return Err(SocketError::Inval);
    }

    let kind = match type_ {
        t if t == SOCK_STREAM => SocketKind::TcpUnbound { local_port: None },
        t if t == SOCK_DGRAM => SocketKind::Udp(UdpSocket::new()),
        t if t == SOCK_RAW => SocketKind::Raw(RawSocket::new(protocol)),
        _ => return Err(SocketError::Inval),
    };

    Ok(with_sockets(|table| {
        let fd = table.alloc_fd();
        table.sockets.insert(fd, Socket { owner_pid, domain, type_, kind, options: SocketOptions::default() });
        fd
    }))
}

/// Bind a socket to a local port. For TCP this only records the port for a
/// later `listen`/`connect`; for UDP it registers the port for delivery.
pub fn socket_bind(fd: i32, local_addr: [u8; 4], port: u16) -> Result<(), SocketError> {
    with_sockets(|table| {
        let sock = table.sockets.get_mut(&fd).ok_or(SocketError::Inval)?;
        match &mut sock.kind {
            SocketKind::TcpUnbound { local_port } => {
                *local_port = Some(port);
                Ok(())
            }
            SocketKind::Udp(udp) => {
                if table.udp_ports.contains_key(&port) && !sock.options.reuseaddr {
                    return Err(SocketError::AddrInUse);
                }
                udp.bind(local_addr, port);
                table.udp_ports.insert(port, fd);
                Ok(())
            }
            _ => Err(SocketError::Inval),
        }
    })
}

/// Move a SOCK_STREAM socket from unbound into LISTEN.
pub fn socket_listen(fd: i32, backlog: usize) -> Result<(), SocketError> {
    let (owner_pid, local_port) = with_sockets(|table| {
        let sock = table.sockets.get(&fd).ok_or(SocketError::Inval)?;
        match &sock.kind {
            SocketKind::TcpUnbound { local_port: Some(p) } => Ok((sock.owner_pid, *p)),
            _ => Err(SocketError::Inval),
        }
    })?;

    tcp::tcp_listen(local_port, backlog, owner_pid)?;

    with_sockets(|table| {
        if let Some(sock) = table.sockets.get_mut(&fd) {
            sock.kind = SocketKind::TcpListener { local_port };
        }
    });
    Ok(())
}

/// Initiate an outgoing TCP connection. Returns immediately in `SynSent`
/// state; the caller polls `socket_tcp_state` to learn when it resolves.
pub fn socket_connect(fd: i32, remote_addr: [u8; 4], remote_port: u16) -> Result<(), SocketError> {
    let (owner_pid, local_port) = with_sockets(|table| {
        let sock = table.sockets.get_mut(&fd).ok_or(SocketError::Inval)?;
        match &sock.kind {
            SocketKind::TcpUnbound { local_port } => {
                let port = local_port.unwrap_or_else(alloc_ephemeral_port);
                Ok((sock.owner_pid, port))
            }
            _ => Err(SocketError::Inval),
        }
    })?;

    let conn_id = tcp::tcp_connect(local_port, remote_addr, remote_port, owner_pid)?;

    with_sockets(|table| {
        if let Some(sock) = table.sockets.get_mut(&fd) {
            sock.kind = SocketKind::TcpConnection { conn_id };
        }
    });
    Ok(())
}

/// Accept a pending connection on a listening socket. `Ok(None)` means no
/// connection is pending yet — callers poll.
pub fn socket_accept(fd: i32) -> Result<Option<i32>, SocketError> {
    let (owner_pid, local_port) = with_sockets(|table| {
        let sock = table.sockets.get(&fd).ok_or(SocketError::Inval)?;
        match &sock.kind {
            SocketKind::TcpListener { local_port } => Ok((sock.owner_pid, *local_port)),
            _ => Err(SocketError::Inval),
        }
    })?;

    let Some(conn_id) = tcp::tcp_accept(local_port) else { return Ok(None) };

    let new_fd = with_sockets(|table| {
        let fd = table.alloc_fd();
        table.sockets.insert(fd, Socket {
            owner_pid,
            domain: AF_INET,
            type_: SOCK_STREAM,
            kind: SocketKind::TcpConnection { conn_id },
            options: SocketOptions::default(),
        });
        fd
    });
    Ok(Some(new_fd))
}

/// Send on a connected TCP socket, bounded by SO_SNDTIMEO if set.
pub fn socket_send(fd: i32, data: &[u8]) -> Result<usize, SocketError> {
    let (conn_id, sndtimeo_ticks) = with_sockets(|table| {
        let sock = table.sockets.get(&fd).ok_or(SocketError::Inval)?;
        match &sock.kind {
            SocketKind::TcpConnection { conn_id } => Ok((*conn_id, sock.options.sndtimeo_ticks)),
            _ => Err(SocketError::NotConn),
        }
    })?;
    tcp::tcp_send(&conn_id, data, sndtimeo_ticks)
}

/// Receive from a connected TCP socket, bounded by SO_RCVTIMEO if set.
pub fn socket_recv(fd: i32, buf: &mut [u8]) -> Result<usize, SocketError> {
    let (conn_id, rcvtimeo_ticks) = with_sockets(|table| {
        let sock = table.sockets.get(&fd).ok_or(SocketError::Inval)?;
        match &sock.kind {
            SocketKind::TcpConnection { conn_id } => Ok((*conn_id, sock.options.rcvtimeo_ticks)),
            _ => Err(SocketError::NotConn),
        }
    })?;
    tcp::tcp_recv(&conn_id, buf, rcvtimeo_ticks)
}

/// Send a UDP or raw datagram to an explicit destination.
pub fn socket_sendto(fd: i32, dst_addr: [u8; 4], dst_port: u16, data: &[u8]) -> Result<usize, SocketError> {
    with_sockets(|table| {
        let sock = table.sockets.get_mut(&fd).ok_or(SocketError::Inval)?;
        match &mut sock.kind {
            SocketKind::Udp(udp) => {
                if udp.local_port().is_none() {
                    let port = alloc_ephemeral_port();
                    udp.bind([0; 4], port);
                    table.udp_ports.insert(port, fd);
                }
                let src_port = udp.local_port().unwrap();
                let packet = crate::net::udp::build_udp_packet(src_port, dst_port, data);
                crate::net::send_ipv4(dst_addr, crate::net::ipv4::PROTOCOL_UDP, &packet)
                    .map_err(|_| SocketError::NoBufs)?;
                Ok(data.len())
            }
            SocketKind::Raw(raw) => {
                let protocol = raw.protocol;
                crate::net::send_ipv4(dst_addr, protocol, data).map_err(|_| SocketError::NoBufs)?;
                Ok(data.len())
            }
            _ => Err(SocketError::Inval),
        }
    })
}

/// Receive a UDP or raw datagram, returning the sender's address.
pub fn socket_recvfrom(fd: i32, buf: &mut [u8]) -> Result<(usize, [u8; 4]), SocketError> {
    with_sockets(|table| {
        let sock = table.sockets.get_mut(&fd).ok_or(SocketError::Inval)?;
        match &mut sock.kind {
            SocketKind::Udp(udp) => {
                let packet = udp.recv_from().ok_or(SocketError::WouldBlock)?;
                let len = buf.len().min(packet.data.len());
                buf[..len].copy_from_slice(&packet.data[..len]);
                Ok((len, packet.src_addr))
            }
            SocketKind::Raw(raw) => {
                let packet = raw.rx_queue.pop_front().ok_or(SocketError::WouldBlock)?;
                let len = buf.len().min(packet.data.len());
                buf[..len].copy_from_slice(&packet.data[..len]);
                Ok((len, packet.src_addr))
            }
            _ => Err(SocketError::Inval),
        }
    })
}

/// Set a socket option. `value` is interpreted per-option: a tick count for
/// the timeouts, a byte count for the buffer sizes, nonzero-is-true for the
/// two booleans.
pub fn socket_setsockopt(fd: i32, option: SocketOpt, value: u64) -> Result<(), SocketError> {
    with_sockets(|table| {
        let sock = table.sockets.get_mut(&fd).ok_or(SocketError::Inval)?;
        match option {
            SocketOpt::ReuseAddr => sock.options.reuseaddr = value != 0,
            SocketOpt::RcvTimeo => sock.options.rcvtimeo_ticks = if value == 0 { None } else { Some(value) },
            SocketOpt::SndTimeo => sock.options.sndtimeo_ticks = if value == 0 { None } else { Some(value) },
            SocketOpt::RcvBuf => sock.options.rcvbuf = value as usize,
            SocketOpt::SndBuf => sock.options.sndbuf = value as usize,
            SocketOpt::KeepAlive => sock.options.keepalive = value != 0,
        }
        Ok(())
    })
}

pub fn socket_getsockopt(fd: i32, option: SocketOpt) -> Result<u64, SocketError> {
    with_sockets(|table| {
        let sock = table.sockets.get(&fd).ok_or(SocketError::Inval)?;
        Ok(match option {
            SocketOpt::ReuseAddr => sock.options.reuseaddr as u64,
            SocketOpt::RcvTimeo => sock.options.rcvtimeo_ticks.unwrap_or(0),
            SocketOpt::SndTimeo => sock.options.sndtimeo_ticks.unwrap_or(0),
            SocketOpt::RcvBuf => sock.options.rcvbuf as u64,
            SocketOpt::SndBuf => sock.options.sndbuf as u64,
            SocketOpt::KeepAlive => sock.options.keepalive as u64,
        })
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOpt {
    ReuseAddr,
    RcvTimeo,
    SndTimeo,
    RcvBuf,
    SndBuf,
    KeepAlive,
}

/// Current TCP state of a connected stream socket, for callers polling
/// `connect`/`accept` progress instead of blocking.
pub fn socket_tcp_state(fd: i32) -> Result<tcp::TcpState, SocketError> {
    let conn_id = tcp_conn_id(fd)?;
    tcp::tcp_get_state(&conn_id).ok_or(SocketError::NotConn)
}

fn tcp_conn_id(fd: i32) -> Result<ConnectionId, SocketError> {
    with_sockets(|table| {
        let sock = table.sockets.get(&fd).ok_or(SocketError::Inval)?;
        match &sock.kind {
            SocketKind::TcpConnection { conn_id } => Ok(*conn_id),
            _ => Err(SocketError::NotConn),
        }
    })
}

/// Close a socket and release whatever network-layer state it owned.
pub fn socket_close(fd: i32) -> Result<(), SocketError> {
    let kind = with_sockets(|table| table.sockets.remove(&fd).map(|s| s.kind));
    match kind {
        Some(SocketKind::TcpListener { local_port }) => tcp::tcp_unlisten(local_port),
        Some(SocketKind::TcpConnection { conn_id }) => {
            let _ = tcp::tcp_close(&conn_id);
        }
        Some(SocketKind::Udp(udp)) => {
            if let Some(port) = udp.local_port() {
                with_sockets(|table| {
                    table.udp_ports.remove(&port);
                });
            }
        }
        _ => {}
    }
    Ok(())
}

/// Deliver an inbound UDP datagram to whichever socket is bound to
/// `dst_port`. Returns `false` if nothing is bound there.
pub fn deliver_udp(dst_port: u16, src_addr: [u8; 4], src_port: u16, payload: &[u8]) -> bool {
    with_sockets(|table| {
        let Some(&fd) = table.udp_ports.get(&dst_port) else { return false };
        let Some(sock) = table.sockets.get_mut(&fd) else { return false };
        if let SocketKind::Udp(udp) = &mut sock.kind {
            udp.enqueue_packet(udp::UdpPacket { src_addr, src_port, data: payload.to_vec() });
            true
        } else {
            false
        }
    })
}

/// Deliver an inbound datagram of an unhandled IP protocol to every raw
/// socket registered for it.
pub fn deliver_raw(protocol: u8, src_addr: [u8; 4], payload: &[u8]) {
    with_sockets(|table| {
        for sock in table.sockets.values_mut() {
            if let SocketKind::Raw(raw) = &mut sock.kind {
                if raw.protocol == protocol {
                    raw.enqueue(RawPacket { src_addr, data: payload.to_vec() });
                }
            }
        }
    });
}

/// Drain the loopback/link receive path and advance TCP retransmit timers.
/// No background threading is assumed — callers poll this directly.
pub fn socket_poll() {
    crate::net::process_rx();
    tcp::poll_timers(crate::task::scheduler::current_tick());
}

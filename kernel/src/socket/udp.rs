//! UDP socket state.
//!
//! Binding and port-table bookkeeping live in the owning `SocketTable`
//! (`super::socket_bind`/`deliver_udp`); this type only holds per-socket
//! state: the bound address, and the queue of datagrams waiting to be
//! read.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use spin::Mutex;

use super::types::SockAddrIn;
use super::SocketHandle;

/// Maximum number of packets to queue per socket
const MAX_RX_QUEUE_SIZE: usize = 32;

/// A received UDP packet
#[derive(Debug)]
pub struct UdpPacket {
    /// Source IP address
    pub src_addr: [u8; 4],
    /// Source port
    pub src_port: u16,
    /// Packet payload data
    pub data: Vec<u8>,
}

/// UDP socket state
pub struct UdpSocket {
    /// Unique handle for this socket
    pub handle: SocketHandle,
    /// Local address (if bound)
    pub local_addr: Option<[u8; 4]>,
    /// Local port (if bound)
    pub local_port: Option<u16>,
    /// Receive queue for incoming packets (protected for interrupt-safe access)
    rx_queue: Mutex<VecDeque<UdpPacket>>,
}

impl core::fmt::Debug for UdpSocket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UdpSocket")
            .field("handle", &self.handle)
            .field("local_addr", &self.local_addr)
            .field("local_port", &self.local_port)
            .finish()
    }
}

impl UdpSocket {
    /// Create a new, unbound UDP socket.
    pub fn new() -> Self {
        UdpSocket {
            handle: super::alloc_socket_handle(),
            local_addr: None,
            local_port: None,
            rx_queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Record the local address/port this socket is bound to. Port-table
    /// registration is the caller's (`SocketTable`'s) responsibility.
    pub fn bind(&mut self, addr: [u8; 4], port: u16) {
        self.local_addr = Some(addr);
        self.local_port = Some(port);
    }

    /// Pop the oldest queued datagram, if any.
    pub fn recv_from(&mut self) -> Option<UdpPacket> {
        self.rx_queue.lock().pop_front()
    }

    /// Enqueue a received packet (called from the IP receive path).
    pub fn enqueue_packet(&self, packet: UdpPacket) {
        let mut queue = self.rx_queue.lock();
        if queue.len() >= MAX_RX_QUEUE_SIZE {
            queue.pop_front();
            log::warn!("UDP: RX queue full, dropped oldest packet");
        }
        queue.push_back(packet);
    }

    /// True if a datagram is ready to read.
    #[allow(dead_code)]
    pub fn has_data(&self) -> bool {
        !self.rx_queue.lock().is_empty()
    }

    /// This socket's bound address, if any.
    #[allow(dead_code)]
    pub fn local_addr(&self) -> Option<SockAddrIn> {
        let (addr, port) = (self.local_addr?, self.local_port?);
        Some(SockAddrIn::new(addr, port))
    }

    /// This socket's bound port, if any.
    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }
}

impl Default for UdpSocket {
    fn default() -> Self {
        Self::new()
    }
}

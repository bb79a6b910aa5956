//! Network stack: IPv4 framing plus the TCP/UDP state machines that sit on it.
//!
//! Everything below the IP transmit/receive pair — Ethernet framing, ARP,
//! the NIC itself — is an external collaborator this module never speaks
//! to directly. [`send_ipv4`] hands a completed datagram to whatever link
//! driver is registered via [`set_link`]; with none registered (or when
//! the destination is our own address) packets loop back locally, which is
//! enough to drive the TCP state machine end to end without real hardware.

extern crate alloc;

pub mod ipv4;
pub mod tcp;
pub mod udp;

use alloc::vec::Vec;
use spin::Mutex;

/// Narrow interface to whatever sits below IP: build the Ethernet/ARP
/// framing and hand packets to hardware, or demux interrupts and return
/// received IP datagrams. No implementation ships here.
pub trait LinkDriver: Send {
    fn transmit_ip_packet(&self, packet: &[u8]) -> Result<(), &'static str>;
}

static LINK: Mutex<Option<alloc::boxed::Box<dyn LinkDriver>>> = Mutex::new(None);

/// Register the link driver used to actually reach the network. Without
/// one, all non-loopback traffic is silently dropped at `send_ipv4`.
pub fn set_link(driver: alloc::boxed::Box<dyn LinkDriver>) {
    *LINK.lock() = Some(driver);
}

/// Network interface configuration
#[derive(Clone, Copy, Debug)]
pub struct NetConfig {
    /// Our IPv4 address
    pub ip_addr: [u8; 4],
    /// Subnet mask (for routing decisions - not yet used but required for complete config)
    #[allow(dead_code)] // Part of complete network config API
    pub subnet_mask: [u8; 4],
    /// Default gateway
    pub gateway: [u8; 4],
}

/// Default network configuration for QEMU user-mode networking (SLIRP):
/// 10.0.2.0/24 with the gateway at 10.0.2.2.
pub const DEFAULT_CONFIG: NetConfig = NetConfig {
    ip_addr: [10, 0, 2, 15],
    subnet_mask: [255, 255, 255, 0],
    gateway: [10, 0, 2, 2],
};

static NET_CONFIG: Mutex<NetConfig> = Mutex::new(DEFAULT_CONFIG);

/// Maximum number of packets queued for local (loopback) delivery before
/// the oldest is dropped to bound memory growth.
const MAX_LOOPBACK_QUEUE_SIZE: usize = 32;

static LOOPBACK_QUEUE: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

/// Deliver everything queued for loopback. Called from [`socket_poll`],
/// never from inside a lock held by the sender.
pub fn drain_loopback_queue() {
    let packets: Vec<Vec<u8>> = {
        let mut queue = LOOPBACK_QUEUE.lock();
        core::mem::take(&mut *queue)
    };
    for packet in packets {
        if let Some(ip) = ipv4::Ipv4Packet::parse(&packet) {
            ipv4::handle_ipv4(&ip);
        }
    }
}

pub fn init() {
    let config = NET_CONFIG.lock();
    log::info!(
        "NET: address {}.{}.{}.{}, gateway {}.{}.{}.{}",
        config.ip_addr[0], config.ip_addr[1], config.ip_addr[2], config.ip_addr[3],
        config.gateway[0], config.gateway[1], config.gateway[2], config.gateway[3],
    );
}

/// Get the current network configuration
pub fn config() -> NetConfig {
    *NET_CONFIG.lock()
}

/// Drain whatever the registered link driver has queued for us. With no
/// driver registered this is a no-op; only loopback traffic flows.
pub fn process_rx() {
    drain_loopback_queue();
}

/// Hand a raw IP datagram to the registered link driver, or loop it back
/// locally when addressed to ourselves or to 127.0.0.0/8.
pub fn send_ipv4(dst_ip: [u8; 4], protocol: u8, payload: &[u8]) -> Result<(), &'static str> {
    let config = config();
    let packet = ipv4::Ipv4Packet::build(config.ip_addr, dst_ip, protocol, payload);

    if dst_ip == config.ip_addr || dst_ip[0] == 127 {
        let mut queue = LOOPBACK_QUEUE.lock();
        if queue.len() >= MAX_LOOPBACK_QUEUE_SIZE {
            queue.remove(0);
            log::warn!("NET: loopback queue full, dropped oldest packet");
        }
        queue.push(packet);
        return Ok(());
    }

    let guard = LINK.lock();
    match guard.as_ref() {
        Some(link) => link.transmit_ip_packet(&packet),
        None => Err("no link driver registered"),
    }
}

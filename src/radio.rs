//! ==============================================================================
//! radio.rs - the low-power wireless hop between senders and the gateway
//! ==============================================================================
//!
//! purpose:
//!     abstracts the point-to-point radio (esp-now style: 6-byte hardware
//!     addresses, best-effort datagrams, no acks) behind the `Radio` trait.
//!
//! implementations:
//!     - UdpRadio: each node is a udp socket; a static peer table maps
//!       hardware addresses to socket addresses. used on real deployments
//!       where the nodes sit on one lan, and for local multi-process runs.
//!     - MemoryRadio: in-process medium for tests. every frame is also
//!       recorded so tests can assert on what went over the air.
//!
//! delivery is best-effort on both. nothing here retries.
//!
//! ==============================================================================

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::error::{RadioError, WireError};

/// 6-byte hardware address of a radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 || parts.iter().any(|p| p.len() != 2) {
            return Err(format!("invalid hardware address {s:?}"));
        }
        let bytes = hex::decode(parts.concat())
            .map_err(|e| format!("invalid hardware address {s:?}: {e}"))?;
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&bytes);
        Ok(MacAddr(mac))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A best-effort datagram link addressed by hardware address.
pub trait Radio: Send + Sync + 'static {
    /// This node's own hardware address
    fn local_addr(&self) -> MacAddr;

    /// Hand one payload to the link. `Ok` means it left this node, not that
    /// anyone received it.
    fn send(
        &self,
        to: MacAddr,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), RadioError>> + Send;

    /// Wait for the next payload addressed to this node (or broadcast).
    fn recv(&self) -> impl Future<Output = Result<(MacAddr, Vec<u8>), RadioError>> + Send;
}

// ==============================================================================
// udp radio
// ==============================================================================
//
// frame layout on the udp socket:
//
//     [ src mac (6) | dst mac (6) | payload ... ]

const FRAME_HEADER_LEN: usize = 12;
const MAX_FRAME_LEN: usize = 256;

pub fn encode_frame(src: MacAddr, dst: MacAddr, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&src.0);
    frame.extend_from_slice(&dst.0);
    frame.extend_from_slice(payload);
    frame
}

pub fn decode_frame(frame: &[u8]) -> Result<(MacAddr, MacAddr, &[u8]), WireError> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(WireError::Truncated(frame.len()));
    }
    let mut src = [0u8; 6];
    let mut dst = [0u8; 6];
    src.copy_from_slice(&frame[0..6]);
    dst.copy_from_slice(&frame[6..12]);
    Ok((MacAddr(src), MacAddr(dst), &frame[FRAME_HEADER_LEN..]))
}

pub struct UdpRadio {
    socket: UdpSocket,
    mac: MacAddr,
    peers: HashMap<MacAddr, SocketAddr>,
}

impl UdpRadio {
    /// Bring the radio up. Failure here is an initialization fault.
    pub async fn bind(
        bind: &str,
        mac: MacAddr,
        peers: HashMap<MacAddr, SocketAddr>,
    ) -> Result<Self, RadioError> {
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| RadioError::Init(format!("bind {bind}: {e}")))?;
        tracing::info!(%mac, bind, peers = peers.len(), "udp radio up");
        Ok(Self { socket, mac, peers })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, RadioError> {
        Ok(self.socket.local_addr()?)
    }
}

impl Radio for UdpRadio {
    fn local_addr(&self) -> MacAddr {
        self.mac
    }

    async fn send(&self, to: MacAddr, payload: &[u8]) -> Result<(), RadioError> {
        let frame = encode_frame(self.mac, to, payload);
        if to.is_broadcast() {
            // every peer gets its copy; fails only if nobody did
            let mut last_err = None;
            let mut delivered = 0;
            for (mac, addr) in &self.peers {
                match self.socket.send_to(&frame, addr).await {
                    Ok(_) => delivered += 1,
                    Err(e) => {
                        tracing::warn!(peer = %mac, %addr, "broadcast copy failed: {e}");
                        last_err = Some(e);
                    }
                }
            }
            return match last_err {
                Some(e) if delivered == 0 => Err(e.into()),
                _ => Ok(()),
            };
        }
        let addr = self.peers.get(&to).ok_or(RadioError::UnknownPeer(to))?;
        self.socket.send_to(&frame, addr).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<(MacAddr, Vec<u8>), RadioError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            let (src, dst, payload) = match decode_frame(&buf[..len]) {
                Ok(parts) => parts,
                Err(e) => {
                    tracing::debug!(%from, "dropping frame: {e}");
                    continue;
                }
            };
            if dst != self.mac && !dst.is_broadcast() {
                tracing::debug!(%src, %dst, "dropping frame for another node");
                continue;
            }
            return Ok((src, payload.to_vec()));
        }
    }
}

// ==============================================================================
// in-memory radio
// ==============================================================================

/// One frame as it went over the in-memory air
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirFrame {
    pub from: MacAddr,
    pub to: MacAddr,
    pub payload: Vec<u8>,
}

type Inbox = mpsc::UnboundedSender<(MacAddr, Vec<u8>)>;

/// Shared medium that `MemoryRadio`s attach to.
#[derive(Clone, Default)]
pub struct MemoryAir {
    nodes: Arc<Mutex<HashMap<MacAddr, Inbox>>>,
    log: Arc<Mutex<Vec<AirFrame>>>,
}

impl MemoryAir {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, mac: MacAddr) -> MemoryRadio {
        let (tx, rx) = mpsc::unbounded_channel();
        self.nodes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(mac, tx);
        MemoryRadio {
            mac,
            air: self.clone(),
            inbox: tokio::sync::Mutex::new(rx),
        }
    }

    /// Every frame sent so far, in send order
    pub fn frames(&self) -> Vec<AirFrame> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn deliver(&self, from: MacAddr, to: MacAddr, payload: &[u8]) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(AirFrame {
                from,
                to,
                payload: payload.to_vec(),
            });

        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        for (mac, inbox) in nodes.iter() {
            if *mac != from && (to.is_broadcast() || *mac == to) {
                // a detached receiver is just a node that is out of range
                let _ = inbox.send((from, payload.to_vec()));
            }
        }
    }
}

pub struct MemoryRadio {
    mac: MacAddr,
    air: MemoryAir,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<(MacAddr, Vec<u8>)>>,
}

impl Radio for MemoryRadio {
    fn local_addr(&self) -> MacAddr {
        self.mac
    }

    async fn send(&self, to: MacAddr, payload: &[u8]) -> Result<(), RadioError> {
        self.air.deliver(self.mac, to, payload);
        Ok(())
    }

    async fn recv(&self) -> Result<(MacAddr, Vec<u8>), RadioError> {
        self.inbox.lock().await.recv().await.ok_or(RadioError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GATEWAY: MacAddr = MacAddr([0x24, 0x6F, 0x28, 0x00, 0x00, 0x01]);
    const NODE_A: MacAddr = MacAddr([0x24, 0x6F, 0x28, 0x00, 0x00, 0x0A]);
    const NODE_B: MacAddr = MacAddr([0x24, 0x6F, 0x28, 0x00, 0x00, 0x0B]);

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddr = "24:6f:28:AA:bb:01".parse().unwrap();
        assert_eq!(mac.0, [0x24, 0x6F, 0x28, 0xAA, 0xBB, 0x01]);
        assert_eq!(mac.to_string(), "24:6F:28:AA:BB:01");
    }

    #[test]
    fn test_mac_parse_rejects_garbage() {
        assert!("24:6f:28:aa:bb".parse::<MacAddr>().is_err());
        assert!("24-6f-28-aa-bb-01".parse::<MacAddr>().is_err());
        assert!("zz:6f:28:aa:bb:01".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_frame_header() {
        let frame = encode_frame(NODE_A, GATEWAY, b"hi");
        let (src, dst, payload) = decode_frame(&frame).unwrap();
        assert_eq!((src, dst, payload), (NODE_A, GATEWAY, &b"hi"[..]));
        assert_eq!(decode_frame(&frame[..5]).unwrap_err(), WireError::Truncated(5));
    }

    #[tokio::test]
    async fn test_memory_unicast_reaches_only_target() {
        let air = MemoryAir::new();
        let gateway = air.attach(GATEWAY);
        let a = air.attach(NODE_A);
        let b = air.attach(NODE_B);

        gateway.send(NODE_A, b"cmd").await.unwrap();

        let (from, payload) = a.recv().await.unwrap();
        assert_eq!(from, GATEWAY);
        assert_eq!(payload, b"cmd");
        assert!(b.inbox.lock().await.try_recv().is_err());
        assert_eq!(air.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_broadcast_skips_sender() {
        let air = MemoryAir::new();
        let gateway = air.attach(GATEWAY);
        let a = air.attach(NODE_A);

        a.send(MacAddr::BROADCAST, b"reading").await.unwrap();

        let (from, _) = gateway.recv().await.unwrap();
        assert_eq!(from, NODE_A);
        assert!(a.inbox.lock().await.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_udp_radio_unicast() {
        let gateway = UdpRadio::bind("127.0.0.1:0", GATEWAY, HashMap::new())
            .await
            .unwrap();
        let gateway_addr = gateway.socket_addr().unwrap();

        let mut peers = HashMap::new();
        peers.insert(GATEWAY, gateway_addr);
        let node = UdpRadio::bind("127.0.0.1:0", NODE_A, peers).await.unwrap();

        node.send(GATEWAY, b"payload").await.unwrap();
        let (from, payload) = gateway.recv().await.unwrap();
        assert_eq!(from, NODE_A);
        assert_eq!(payload, b"payload");
    }

    #[tokio::test]
    async fn test_udp_broadcast_survives_failing_peer() {
        let gateway = UdpRadio::bind("127.0.0.1:0", GATEWAY, HashMap::new())
            .await
            .unwrap();

        let mut peers = HashMap::new();
        peers.insert(GATEWAY, gateway.socket_addr().unwrap());
        // ipv6 target from an ipv4 socket: send_to fails
        peers.insert(NODE_B, "[::1]:4210".parse().unwrap());
        let node = UdpRadio::bind("127.0.0.1:0", NODE_A, peers).await.unwrap();

        node.send(MacAddr::BROADCAST, b"hello").await.unwrap();
        let (from, payload) = gateway.recv().await.unwrap();
        assert_eq!(from, NODE_A);
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn test_udp_broadcast_all_peers_failing() {
        let mut peers = HashMap::new();
        peers.insert(NODE_B, "[::1]:4210".parse().unwrap());
        let node = UdpRadio::bind("127.0.0.1:0", NODE_A, peers).await.unwrap();
        assert!(matches!(
            node.send(MacAddr::BROADCAST, b"hello").await,
            Err(RadioError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_udp_radio_unknown_peer() {
        let node = UdpRadio::bind("127.0.0.1:0", NODE_A, HashMap::new())
            .await
            .unwrap();
        let err = node.send(GATEWAY, b"x").await.unwrap_err();
        assert!(matches!(err, RadioError::UnknownPeer(mac) if mac == GATEWAY));
    }

    #[tokio::test]
    async fn test_udp_radio_bind_failure_is_init_error() {
        let err = UdpRadio::bind("not-an-address", NODE_A, HashMap::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RadioError::Init(_)));
    }
}

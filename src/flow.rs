//! Direction-invariant conversation identity.
//!
//! Both traffic directions of one conversation must collapse to the same
//! key. The endpoint pair is canonicalized by ordering the two
//! (address, port) tuples under their total order, then hashed together with
//! the transport protocol into a fixed-width identity. The canonical tuple
//! stays on the key: a 64-bit hash can collide for distinct flows, so the
//! tracker compares full tuples before treating two packets as the same
//! conversation.

use std::{
    fmt,
    hash::{Hash, Hasher},
    net::IpAddr,
};

use fxhash::FxHasher64;
use serde::Serialize;

use crate::packet::{PacketRecord, Transport};

/// One side of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Endpoint {
    pub addr: IpAddr,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Canonical bidirectional flow identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowKey {
    endpoints: [Endpoint; 2],
    transport: Transport,
    hash: u64,
}

impl FlowKey {
    /// Build the canonical key for a packet. Swapping source and destination
    /// yields the same key.
    pub fn from_packet(packet: &PacketRecord) -> Self {
        let a = Endpoint {
            addr: packet.src_addr,
            port: packet.src_port,
        };
        let b = Endpoint {
            addr: packet.dst_addr,
            port: packet.dst_port,
        };
        let endpoints = if a <= b { [a, b] } else { [b, a] };
        let hash = hash_endpoints(&endpoints, packet.transport);
        Self {
            endpoints,
            transport: packet.transport,
            hash,
        }
    }

    /// Fixed-width identity. Not sufficient on its own; see [`Self::same_flow`].
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// The canonical (ordered) endpoint pair.
    pub fn endpoints(&self) -> &[Endpoint; 2] {
        &self.endpoints
    }

    /// Exact-tuple comparison for collision resolution. Hash equality alone
    /// never decides that two packets belong to the same conversation.
    pub fn same_flow(&self, other: &FlowKey) -> bool {
        self.endpoints == other.endpoints && self.transport == other.transport
    }

    /// Force a specific hash value, so collision handling can be exercised
    /// without hunting for real colliding tuples.
    #[cfg(test)]
    pub fn with_hash(mut self, hash: u64) -> Self {
        self.hash = hash;
        self
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} <-> {}/{}",
            self.endpoints[0], self.endpoints[1], self.transport
        )
    }
}

fn hash_endpoints(endpoints: &[Endpoint; 2], transport: Transport) -> u64 {
    let mut hasher = FxHasher64::default();
    for endpoint in endpoints {
        endpoint.addr.hash(&mut hasher);
        endpoint.port.hash(&mut hasher);
    }
    transport.hash(&mut hasher);
    hasher.finish()
}

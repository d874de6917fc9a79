//! Conversation tracking.
//!
//! A conversation is one bidirectional TCP exchange. Progress is modeled as
//! an explicit state machine driven by TCP flags in arrival order, so latency
//! sampling can be scoped to the established window by construction instead
//! of being inferred from an unstructured packet log.

use std::{collections::HashMap, time::Duration};

use fxhash::FxBuildHasher;
use serde::Serialize;
use tracing::trace;

use crate::{
    direction,
    flow::{Endpoint, FlowKey},
    latency::{self, OutstandingSegment},
    packet::PacketRecord,
    registry::PortRegistry,
    stats::LatencyStats,
};

/// Handshake state of a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// Created on the first packet; no SYN observed yet.
    #[default]
    Init,
    /// SYN observed; waiting for the SYN-ACK/ACK exchange.
    Handshake,
    /// Three-way handshake complete; the data transfer phase.
    Established,
    /// FIN observed from either side.
    Closing,
    /// Teardown acknowledged, or the connection was reset.
    Closed,
}

impl ConversationState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Init => "init",
            ConversationState::Handshake => "handshake",
            ConversationState::Established => "established",
            ConversationState::Closing => "closing",
            ConversationState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counters for absorbed per-packet anomalies.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AnomalyCounts {
    /// Packets that arrived after the conversation closed.
    pub late_packets: u64,
    /// Pure acknowledgments that matched none of the outstanding segments.
    pub unmatched_acks: u64,
    /// Matches discarded because the computed elapsed time was negative.
    pub negative_samples: u64,
    /// Outstanding segments discarded when the conversation closed.
    pub discarded_segments: u64,
}

impl AnomalyCounts {
    pub fn merge(&mut self, other: &AnomalyCounts) {
        self.late_packets += other.late_packets;
        self.unmatched_acks += other.unmatched_acks;
        self.negative_samples += other.negative_samples;
        self.discarded_segments += other.discarded_segments;
    }

    pub fn total(&self) -> u64 {
        self.late_packets + self.unmatched_acks + self.negative_samples + self.discarded_segments
    }
}

/// One bidirectional TCP exchange.
#[derive(Debug)]
pub struct Conversation {
    pub key: FlowKey,
    pub state: ConversationState,
    syn_ack_seen: bool,
    /// FIN observed per canonical endpoint slot.
    fin_seen: [bool; 2],
    pub packets: u64,
    /// Payload segments awaiting acknowledgment, in arrival order.
    pub outstanding: Vec<OutstandingSegment>,
    pub network_samples: Vec<Duration>,
    pub local_samples: Vec<Duration>,
    pub remote_samples: Vec<Duration>,
    pub anomalies: AnomalyCounts,
    /// Per-category statistics; filled at finalization.
    pub stats: LatencyStats,
}

impl Conversation {
    pub fn new(key: FlowKey) -> Self {
        Self {
            key,
            state: ConversationState::Init,
            syn_ack_seen: false,
            fin_seen: [false; 2],
            packets: 0,
            outstanding: Vec::new(),
            network_samples: Vec::new(),
            local_samples: Vec::new(),
            remote_samples: Vec::new(),
            anomalies: AnomalyCounts::default(),
            stats: LatencyStats::default(),
        }
    }

    /// Canonical endpoint slot the packet's source occupies.
    pub(crate) fn source_slot(&self, packet: &PacketRecord) -> usize {
        let src = Endpoint {
            addr: packet.src_addr,
            port: packet.src_port,
        };
        usize::from(self.key.endpoints()[0] != src)
    }

    /// Advance the state machine for one packet and return the state after
    /// the transition.
    ///
    /// RST forces `Closed` from any state. The final ACK of the teardown
    /// requires FINs from both sides; a lone FIN leaves the conversation in
    /// `Closing`.
    pub fn advance(&mut self, packet: &PacketRecord) -> ConversationState {
        use ConversationState::*;

        if packet.rst() {
            self.close();
            return self.state;
        }

        match self.state {
            Init => {
                if packet.syn() {
                    self.state = Handshake;
                    // A SYN-ACK as the first observed packet still counts as
                    // the second leg of the handshake.
                    self.syn_ack_seen = packet.ack_flag();
                }
            }
            Handshake => {
                if packet.syn() && packet.ack_flag() {
                    self.syn_ack_seen = true;
                } else if packet.ack_flag() && self.syn_ack_seen {
                    self.state = Established;
                }
            }
            Established => {
                if packet.fin() {
                    self.fin_seen[self.source_slot(packet)] = true;
                    self.state = Closing;
                }
            }
            Closing => {
                if packet.fin() {
                    self.fin_seen[self.source_slot(packet)] = true;
                } else if packet.ack_flag() && self.fin_seen[0] && self.fin_seen[1] {
                    self.close();
                }
            }
            Closed => {}
        }

        self.state
    }

    fn close(&mut self) {
        self.state = ConversationState::Closed;
        // Segments never acknowledged in-capture are dropped, not sampled.
        self.anomalies.discarded_segments += self.outstanding.len() as u64;
        self.outstanding.clear();
    }
}

/// Owns every conversation seen in the capture, keyed by flow identity.
///
/// Conversations are bucketed by the key's fixed-width hash; within a bucket
/// the exact canonical tuple decides membership, so two flows that collide on
/// the hash are never merged.
#[derive(Debug, Default)]
pub struct ConversationTracker {
    buckets: HashMap<u64, Vec<Conversation>, FxBuildHasher>,
    conversations: usize,
}

impl ConversationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or create the conversation for a key.
    pub fn conversation_mut(&mut self, key: FlowKey) -> &mut Conversation {
        let bucket = self.buckets.entry(key.hash()).or_default();
        let index = match bucket.iter().position(|c| c.key.same_flow(&key)) {
            Some(index) => index,
            None => {
                self.conversations += 1;
                trace!(event.name = "conversation.created", flow = %key, "new conversation");
                bucket.push(Conversation::new(key));
                bucket.len() - 1
            }
        };
        &mut bucket[index]
    }

    /// Route one packet through the state machine and, while the conversation
    /// is established, the latency extractor.
    pub fn ingest(&mut self, packet: &PacketRecord, registry: &PortRegistry) {
        let key = FlowKey::from_packet(packet);
        let conversation = self.conversation_mut(key);
        conversation.packets += 1;

        if conversation.state == ConversationState::Closed {
            conversation.anomalies.late_packets += 1;
            trace!(
                event.name = "conversation.late_packet",
                flow = %conversation.key,
                "packet after close ignored for sampling"
            );
            return;
        }

        if conversation.advance(packet) == ConversationState::Established {
            let src_remote = direction::is_source_remote(packet, registry);
            latency::extract(conversation, packet, src_remote);
        }
    }

    /// Number of tracked conversations.
    pub fn len(&self) -> usize {
        self.conversations
    }

    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.buckets.values().flatten()
    }

    /// Consume the tracker, yielding every conversation.
    pub fn into_conversations(self) -> impl Iterator<Item = Conversation> {
        self.buckets.into_values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::packet::{TCP_FLAG_ACK, TCP_FLAG_FIN, TCP_FLAG_RST, TCP_FLAG_SYN, Transport};

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
    const SERVER: IpAddr = IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34));

    fn packet(from_client: bool, tcp_flags: u8, payload_len: u32) -> PacketRecord {
        let (src_addr, src_port, dst_addr, dst_port) = if from_client {
            (CLIENT, 52344, SERVER, 1080)
        } else {
            (SERVER, 1080, CLIENT, 52344)
        };
        PacketRecord {
            timestamp: Duration::ZERO,
            src_addr,
            dst_addr,
            src_port,
            dst_port,
            transport: Transport::Tcp,
            tcp_flags,
            seq: 0,
            ack: 0,
            payload_len,
        }
    }

    fn conversation() -> Conversation {
        Conversation::new(FlowKey::from_packet(&packet(true, TCP_FLAG_SYN, 0)))
    }

    #[test]
    fn test_three_way_handshake_establishes() {
        let mut conv = conversation();
        assert_eq!(conv.state, ConversationState::Init);

        conv.advance(&packet(true, TCP_FLAG_SYN, 0));
        assert_eq!(conv.state, ConversationState::Handshake);

        conv.advance(&packet(false, TCP_FLAG_SYN | TCP_FLAG_ACK, 0));
        assert_eq!(conv.state, ConversationState::Handshake);

        conv.advance(&packet(true, TCP_FLAG_ACK, 0));
        assert_eq!(conv.state, ConversationState::Established);
    }

    #[test]
    fn test_non_syn_first_packet_stays_init() {
        let mut conv = conversation();
        conv.advance(&packet(true, TCP_FLAG_ACK, 100));
        assert_eq!(conv.state, ConversationState::Init);
    }

    #[test]
    fn test_four_way_teardown_closes() {
        let mut conv = conversation();
        conv.advance(&packet(true, TCP_FLAG_SYN, 0));
        conv.advance(&packet(false, TCP_FLAG_SYN | TCP_FLAG_ACK, 0));
        conv.advance(&packet(true, TCP_FLAG_ACK, 0));

        conv.advance(&packet(true, TCP_FLAG_FIN | TCP_FLAG_ACK, 0));
        assert_eq!(conv.state, ConversationState::Closing);

        // Peer's FIN-ACK, then the final ACK.
        conv.advance(&packet(false, TCP_FLAG_FIN | TCP_FLAG_ACK, 0));
        assert_eq!(conv.state, ConversationState::Closing);

        conv.advance(&packet(true, TCP_FLAG_ACK, 0));
        assert_eq!(conv.state, ConversationState::Closed);
    }

    #[test]
    fn test_lone_fin_stays_closing() {
        let mut conv = conversation();
        conv.advance(&packet(true, TCP_FLAG_SYN, 0));
        conv.advance(&packet(false, TCP_FLAG_SYN | TCP_FLAG_ACK, 0));
        conv.advance(&packet(true, TCP_FLAG_ACK, 0));

        conv.advance(&packet(true, TCP_FLAG_FIN | TCP_FLAG_ACK, 0));
        conv.advance(&packet(false, TCP_FLAG_ACK, 0));
        assert_eq!(conv.state, ConversationState::Closing);
    }

    #[test]
    fn test_rst_closes_from_any_state() {
        for setup in [0usize, 1, 2, 3] {
            let mut conv = conversation();
            if setup >= 1 {
                conv.advance(&packet(true, TCP_FLAG_SYN, 0));
            }
            if setup >= 2 {
                conv.advance(&packet(false, TCP_FLAG_SYN | TCP_FLAG_ACK, 0));
                conv.advance(&packet(true, TCP_FLAG_ACK, 0));
            }
            if setup >= 3 {
                conv.advance(&packet(true, TCP_FLAG_FIN | TCP_FLAG_ACK, 0));
            }
            conv.advance(&packet(false, TCP_FLAG_RST, 0));
            assert_eq!(conv.state, ConversationState::Closed);
        }
    }

    #[test]
    fn test_close_discards_outstanding() {
        let mut conv = conversation();
        conv.advance(&packet(true, TCP_FLAG_SYN, 0));
        conv.advance(&packet(false, TCP_FLAG_SYN | TCP_FLAG_ACK, 0));
        conv.advance(&packet(true, TCP_FLAG_ACK, 0));
        conv.outstanding.push(OutstandingSegment {
            seq: 1,
            len: 100,
            timestamp: Duration::ZERO,
            sender_slot: 0,
        });

        conv.advance(&packet(false, TCP_FLAG_RST, 0));
        assert!(conv.outstanding.is_empty());
        assert_eq!(conv.anomalies.discarded_segments, 1);
    }

    #[test]
    fn test_late_packet_counted_as_anomaly() {
        let table = "Service Name,Port Number,Transport Protocol,Description\n";
        let registry = PortRegistry::from_reader(table.as_bytes()).unwrap();
        let mut tracker = ConversationTracker::new();

        tracker.ingest(&packet(true, TCP_FLAG_SYN, 0), &registry);
        tracker.ingest(&packet(false, TCP_FLAG_RST, 0), &registry);
        tracker.ingest(&packet(true, TCP_FLAG_ACK, 0), &registry);

        let conv = tracker.conversations().next().unwrap();
        assert_eq!(conv.state, ConversationState::Closed);
        assert_eq!(conv.anomalies.late_packets, 1);
        assert_eq!(conv.packets, 3);
    }

    #[test]
    fn test_hash_collision_keeps_flows_separate() {
        let mut tracker = ConversationTracker::new();

        let key_a = FlowKey::from_packet(&packet(true, 0, 0)).with_hash(42);
        let other = PacketRecord {
            src_port: 40001,
            ..packet(true, 0, 0)
        };
        let key_b = FlowKey::from_packet(&other).with_hash(42);

        tracker.conversation_mut(key_a).packets += 1;
        tracker.conversation_mut(key_b).packets += 1;
        tracker.conversation_mut(key_a).packets += 1;

        assert_eq!(tracker.len(), 2);
        let mut packet_counts: Vec<u64> = tracker.conversations().map(|c| c.packets).collect();
        packet_counts.sort_unstable();
        assert_eq!(packet_counts, vec![1, 2]);
    }
}

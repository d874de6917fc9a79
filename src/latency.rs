//! Latency extraction.
//!
//! While a conversation is established, every payload-carrying segment is
//! recorded as outstanding; a later acknowledgment from the other side whose
//! acknowledgment number equals the segment's sequence plus its length closes
//! the pair, and the elapsed time between the two packets becomes one latency
//! sample. The acknowledging packet's source classification decides the
//! category:
//!
//! - pure acknowledgment from a remote source: **network** latency, a round
//!   trip with no application-layer processing
//! - any acknowledgment from a local source: **local** latency
//! - payload-carrying acknowledgment from a remote source: **remote**
//!   latency, the remote side answering with data
//!
//! Cumulative acknowledgments only close the segment they match exactly;
//! segments covered but never named are discarded when the conversation
//! closes. A match whose elapsed time would be negative (capture clock
//! anomaly) is discarded and counted.

use tracing::{debug, trace};

use crate::{conversation::Conversation, packet::PacketRecord};

/// A payload-carrying segment awaiting acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutstandingSegment {
    pub seq: u32,
    pub len: u32,
    /// Capture timestamp of the segment.
    pub timestamp: std::time::Duration,
    /// Canonical endpoint slot of the segment's sender.
    pub sender_slot: usize,
}

impl OutstandingSegment {
    /// The acknowledgment number that closes this segment.
    pub fn expected_ack(&self) -> u32 {
        self.seq.wrapping_add(self.len)
    }
}

/// Feed one established-state packet through the extractor.
pub fn extract(conversation: &mut Conversation, packet: &PacketRecord, src_remote: bool) {
    let slot = conversation.source_slot(packet);

    if packet.ack_flag() {
        match_ack(conversation, packet, slot, src_remote);
    }

    if packet.has_payload() {
        conversation.outstanding.push(OutstandingSegment {
            seq: packet.seq,
            len: packet.payload_len,
            timestamp: packet.timestamp,
            sender_slot: slot,
        });
    }
}

/// Try to close an outstanding segment with this acknowledgment.
fn match_ack(
    conversation: &mut Conversation,
    packet: &PacketRecord,
    slot: usize,
    src_remote: bool,
) {
    let position = conversation
        .outstanding
        .iter()
        .position(|segment| segment.sender_slot != slot && segment.expected_ack() == packet.ack);

    let Some(position) = position else {
        // Nothing outstanding is the normal case for handshake-completion
        // acks and window updates; an ack that matches none of several
        // outstanding segments is the anomaly worth counting.
        if packet.is_pure_ack() && !conversation.outstanding.is_empty() {
            conversation.anomalies.unmatched_acks += 1;
            trace!(
                event.name = "latency.unmatched_ack",
                flow = %conversation.key,
                ack = packet.ack,
                "acknowledgment matched no outstanding segment"
            );
        }
        return;
    };

    let segment = conversation.outstanding.remove(position);

    let Some(elapsed) = packet.timestamp.checked_sub(segment.timestamp) else {
        conversation.anomalies.negative_samples += 1;
        debug!(
            event.name = "latency.negative_sample",
            flow = %conversation.key,
            "negative elapsed time discarded"
        );
        return;
    };

    if !src_remote {
        conversation.local_samples.push(elapsed);
    } else if packet.has_payload() {
        conversation.remote_samples.push(elapsed);
    } else {
        conversation.network_samples.push(elapsed);
    }
}

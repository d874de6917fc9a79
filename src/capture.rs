//! Whole-capture result.
//!
//! Aggregation happens strictly after ingestion: percentiles need the
//! complete sample sets, and the capture-wide statistics for each category
//! are computed over the union of every conversation's samples for that
//! category, never from per-conversation percentiles.

use std::time::Duration;

use crate::{
    conversation::{AnomalyCounts, Conversation, ConversationTracker},
    stats::{LatencyStats, Statistics},
};

/// Final result of one capture run.
#[derive(Debug)]
pub struct Capture {
    /// Every tracked conversation, in canonical endpoint order.
    pub conversations: Vec<Conversation>,
    /// Capture-wide statistics per category, over merged raw samples.
    pub stats: LatencyStats,
    /// Anomaly counters merged across all conversations.
    pub anomalies: AnomalyCounts,
    /// Packets routed into conversations.
    pub packets: u64,
    /// True when ingestion stopped early on the stop signal.
    pub partial: bool,
}

impl Capture {
    /// Finalize one or more trackers into the capture result.
    ///
    /// Sharded runs hand over one tracker per worker; conversations are
    /// disjoint across trackers, so flattening them is a plain move.
    pub fn finalize(
        trackers: Vec<ConversationTracker>,
        bucket_width: Duration,
        partial: bool,
    ) -> Self {
        let mut conversations: Vec<Conversation> = trackers
            .into_iter()
            .flat_map(ConversationTracker::into_conversations)
            .collect();

        let mut network = Vec::new();
        let mut local = Vec::new();
        let mut remote = Vec::new();
        let mut anomalies = AnomalyCounts::default();
        let mut packets = 0u64;

        for conversation in &mut conversations {
            conversation.stats = LatencyStats {
                network: Statistics::compute(&conversation.network_samples, bucket_width),
                local: Statistics::compute(&conversation.local_samples, bucket_width),
                remote: Statistics::compute(&conversation.remote_samples, bucket_width),
            };
            network.extend_from_slice(&conversation.network_samples);
            local.extend_from_slice(&conversation.local_samples);
            remote.extend_from_slice(&conversation.remote_samples);
            anomalies.merge(&conversation.anomalies);
            packets += conversation.packets;
        }

        // Deterministic report order regardless of worker count.
        conversations.sort_by(|a, b| a.key.endpoints().cmp(b.key.endpoints()));

        let stats = LatencyStats {
            network: Statistics::compute(&network, bucket_width),
            local: Statistics::compute(&local, bucket_width),
            remote: Statistics::compute(&remote, bucket_width),
        };

        Self {
            conversations,
            stats,
            anomalies,
            packets,
            partial,
        }
    }
}

//! Capture processing pipeline.
//!
//! Packets must be ingested in capture order: conversation state transitions
//! and outstanding-segment matching are order-dependent. The default model is
//! a single sequential pass. The sharded mode distributes conversations
//! across a fixed worker pool keyed by flow identity, so each conversation is
//! owned by exactly one worker for its whole lifetime and per-conversation
//! order is preserved; cross-conversation aggregation runs only after every
//! worker has drained, as a sequential finalization step.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    capture::Capture, conversation::ConversationTracker, flow::FlowKey, packet::PacketRecord,
    registry::PortRegistry,
};

/// Pipeline tuning knobs, taken from the runtime configuration.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Conversation workers; 1 selects the sequential pass.
    pub worker_count: usize,
    /// Bounded capacity of the packet channels feeding the worker pool.
    pub channel_capacity: usize,
    /// Histogram bucket width handed to the statistics aggregator.
    pub histogram_bucket_width: Duration,
}

pub struct Pipeline {
    registry: Arc<PortRegistry>,
    opts: PipelineOptions,
}

impl Pipeline {
    pub fn new(registry: Arc<PortRegistry>, opts: PipelineOptions) -> Self {
        Self { registry, opts }
    }

    /// Run to completion over an ordered packet sequence.
    pub async fn run<I>(&self, packets: I, stop: Arc<AtomicBool>) -> Capture
    where
        I: Iterator<Item = PacketRecord>,
    {
        if self.opts.worker_count > 1 {
            self.run_sharded(packets, stop).await
        } else {
            self.run_sequential(packets, &stop)
        }
    }

    /// Single sequential pass; the default model.
    pub fn run_sequential<I>(&self, packets: I, stop: &AtomicBool) -> Capture
    where
        I: Iterator<Item = PacketRecord>,
    {
        let mut tracker = ConversationTracker::new();
        let mut stopped = false;
        let mut count = 0u64;

        for packet in packets {
            if stop.load(Ordering::Relaxed) {
                stopped = true;
                break;
            }
            tracker.ingest(&packet, &self.registry);
            count += 1;
        }

        debug!(
            event.name = "pipeline.ingest_complete",
            packets = count,
            conversations = tracker.len(),
            stopped,
            "ingestion finished"
        );

        Capture::finalize(vec![tracker], self.opts.histogram_bucket_width, stopped)
    }

    /// Shard conversations across a fixed worker pool keyed by flow hash.
    ///
    /// Hash sharding keeps every packet of a conversation on the same worker,
    /// so no two workers ever mutate the same conversation and per-
    /// conversation arrival order is preserved.
    pub async fn run_sharded<I>(&self, packets: I, stop: Arc<AtomicBool>) -> Capture
    where
        I: Iterator<Item = PacketRecord>,
    {
        let worker_count = self.opts.worker_count.max(1);
        let capacity = (self.opts.channel_capacity / worker_count).max(1);

        let mut senders = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let (tx, mut rx) = mpsc::channel::<PacketRecord>(capacity);
            let registry = Arc::clone(&self.registry);
            handles.push(tokio::spawn(async move {
                let mut tracker = ConversationTracker::new();
                while let Some(packet) = rx.recv().await {
                    tracker.ingest(&packet, &registry);
                }
                tracker
            }));
            senders.push(tx);
        }

        let mut stopped = false;
        for packet in packets {
            if stop.load(Ordering::Relaxed) {
                stopped = true;
                break;
            }
            let shard = (FlowKey::from_packet(&packet).hash() % worker_count as u64) as usize;
            if senders[shard].send(packet).await.is_err() {
                warn!(
                    event.name = "pipeline.worker_gone",
                    shard, "worker channel closed; stopping ingestion"
                );
                stopped = true;
                break;
            }
        }
        drop(senders);

        let mut trackers = Vec::with_capacity(worker_count);
        for handle in handles {
            match handle.await {
                Ok(tracker) => trackers.push(tracker),
                Err(e) => warn!(
                    event.name = "pipeline.worker_lost",
                    error = %e,
                    "worker task did not complete; its conversations are dropped"
                ),
            }
        }

        Capture::finalize(trackers, self.opts.histogram_bucket_width, stopped)
    }
}

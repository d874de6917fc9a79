//! Report rendering.
//!
//! Builds a serializable view of the capture result and writes it to stdout.
//! Rendering is the only output surface; everything upstream hands over plain
//! engine types.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::{
    capture::Capture,
    conversation::{AnomalyCounts, Conversation, ConversationState},
    stats::{LatencyStats, Statistics},
};

#[derive(ValueEnum, Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    JsonCompact,
}

/// Whole-capture report model.
#[derive(Debug, Serialize)]
pub struct CaptureReport {
    pub packets: u64,
    pub conversation_count: usize,
    pub partial: bool,
    pub latency: LatencyStats,
    pub anomalies: AnomalyCounts,
    pub conversations: Vec<ConversationReport>,
}

/// One conversation row of the report.
#[derive(Debug, Serialize)]
pub struct ConversationReport {
    pub flow: String,
    pub state: ConversationState,
    pub packets: u64,
    pub latency: LatencyStats,
    pub anomalies: AnomalyCounts,
}

impl CaptureReport {
    pub fn from_capture(capture: &Capture) -> Self {
        Self {
            packets: capture.packets,
            conversation_count: capture.conversations.len(),
            partial: capture.partial,
            latency: capture.stats.clone(),
            anomalies: capture.anomalies,
            conversations: capture
                .conversations
                .iter()
                .map(ConversationReport::from_conversation)
                .collect(),
        }
    }
}

impl ConversationReport {
    fn from_conversation(conversation: &Conversation) -> Self {
        Self {
            flow: conversation.key.to_string(),
            state: conversation.state,
            packets: conversation.packets,
            latency: conversation.stats.clone(),
            anomalies: conversation.anomalies,
        }
    }
}

/// Render the capture to stdout in the requested format.
pub fn render(capture: &Capture, format: ReportFormat) -> anyhow::Result<()> {
    let report = CaptureReport::from_capture(capture);
    match format {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        ReportFormat::JsonCompact => println!("{}", serde_json::to_string(&report)?),
        ReportFormat::Text => render_text(&report),
    }
    Ok(())
}

fn render_text(report: &CaptureReport) {
    let partial = if report.partial { " (partial)" } else { "" };
    println!(
        "capture: {} packets, {} conversations{partial}",
        report.packets, report.conversation_count
    );
    print_latency(&report.latency, "  ");

    if report.anomalies.total() > 0 {
        let a = &report.anomalies;
        println!(
            "anomalies: {} late packets, {} unmatched acks, {} negative samples, {} discarded segments",
            a.late_packets, a.unmatched_acks, a.negative_samples, a.discarded_segments
        );
    }

    if !report.conversations.is_empty() {
        println!("conversations:");
        for conv in &report.conversations {
            println!(
                "  {}  {}  packets={}  samples: net={} loc={} rem={}",
                conv.flow,
                conv.state,
                conv.packets,
                conv.latency.network.samples,
                conv.latency.local.samples,
                conv.latency.remote.samples
            );
        }
    }
}

fn print_latency(latency: &LatencyStats, indent: &str) {
    print_stat_line(indent, "network", &latency.network);
    print_stat_line(indent, "local", &latency.local);
    print_stat_line(indent, "remote", &latency.remote);
}

fn print_stat_line(indent: &str, name: &str, stats: &Statistics) {
    if stats.samples == 0 {
        println!("{indent}{name:<8} no samples");
        return;
    }
    let fmt = humantime::format_duration;
    println!(
        "{indent}{name:<8} samples={} p50={} p90={} p99={} avg={} fastest={} slowest={}",
        stats.samples,
        fmt(stats.percentile50),
        fmt(stats.percentile90),
        fmt(stats.percentile99),
        fmt(stats.average),
        fmt(stats.fastest),
        fmt(stats.slowest),
    );
}

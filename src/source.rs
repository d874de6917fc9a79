//! Offline capture source.
//!
//! Thin wrapper around the external capture and dissection collaborators:
//! opens a pcap file and yields dissected [`PacketRecord`]s in capture order.
//! Frames that are not intact IPv4/IPv6 TCP segments are skipped and counted;
//! the engine itself never touches raw bytes.

use std::{net::IpAddr, path::Path, time::Duration};

use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use tracing::{debug, trace};

use crate::{
    error::Error,
    packet::{
        PacketRecord, TCP_FLAG_ACK, TCP_FLAG_FIN, TCP_FLAG_PSH, TCP_FLAG_RST, TCP_FLAG_SYN,
        Transport,
    },
};

/// Reads an offline capture file and iterates its TCP packet records.
pub struct PcapSource {
    capture: pcap::Capture<pcap::Offline>,
    skipped: u64,
}

impl PcapSource {
    /// Open an offline capture. An unreadable file is fatal.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let capture = pcap::Capture::from_file(path).map_err(|source| Error::CaptureOpen {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            capture,
            skipped: 0,
        })
    }
}

impl Iterator for PcapSource {
    type Item = PacketRecord;

    fn next(&mut self) -> Option<PacketRecord> {
        loop {
            let packet = match self.capture.next_packet() {
                Ok(packet) => packet,
                Err(pcap::Error::NoMorePackets) => {
                    debug!(
                        event.name = "source.complete",
                        skipped = self.skipped,
                        "capture drained"
                    );
                    return None;
                }
                Err(e) => {
                    debug!(
                        event.name = "source.read_error",
                        error = %e,
                        "capture read error; stopping"
                    );
                    return None;
                }
            };

            let ts = &packet.header.ts;
            let timestamp = Duration::new(
                ts.tv_sec.max(0) as u64,
                (ts.tv_usec.max(0) as u32).saturating_mul(1_000),
            );

            match dissect(timestamp, packet.data) {
                Some(record) => return Some(record),
                None => {
                    self.skipped += 1;
                    trace!(
                        event.name = "source.frame_skipped",
                        "frame skipped (not an intact TCP segment)"
                    );
                }
            }
        }
    }
}

/// Dissect one Ethernet frame into a packet record.
///
/// Returns `None` for anything that is not an intact IPv4/IPv6 TCP segment;
/// those frames carry none of the fields the engine needs.
pub(crate) fn dissect(timestamp: Duration, data: &[u8]) -> Option<PacketRecord> {
    let sliced = SlicedPacket::from_ethernet(data).ok()?;

    let (src_addr, dst_addr): (IpAddr, IpAddr) = match sliced.net? {
        NetSlice::Ipv4(v4) => (
            v4.header().source_addr().into(),
            v4.header().destination_addr().into(),
        ),
        NetSlice::Ipv6(v6) => (
            v6.header().source_addr().into(),
            v6.header().destination_addr().into(),
        ),
    };

    let Some(TransportSlice::Tcp(tcp)) = sliced.transport else {
        return None;
    };

    let mut tcp_flags = 0u8;
    if tcp.fin() {
        tcp_flags |= TCP_FLAG_FIN;
    }
    if tcp.syn() {
        tcp_flags |= TCP_FLAG_SYN;
    }
    if tcp.rst() {
        tcp_flags |= TCP_FLAG_RST;
    }
    if tcp.psh() {
        tcp_flags |= TCP_FLAG_PSH;
    }
    if tcp.ack() {
        tcp_flags |= TCP_FLAG_ACK;
    }

    Some(PacketRecord {
        timestamp,
        src_addr,
        dst_addr,
        src_port: tcp.source_port(),
        dst_port: tcp.destination_port(),
        transport: Transport::Tcp,
        tcp_flags,
        seq: tcp.sequence_number(),
        ack: tcp.acknowledgment_number(),
        payload_len: tcp.payload().len() as u32,
    })
}

//! Dissected transport-layer packet events.
//!
//! A [`PacketRecord`] is the unit the engine consumes: one already-dissected
//! TCP event carrying the IP/TCP header fields that conversation tracking and
//! latency extraction need. Capture parsing lives in [`crate::source`];
//! nothing downstream of it touches raw bytes.

use std::{fmt, net::IpAddr, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// TCP header flag bits, as found in the flags octet.
/// Based on the IANA "TCP Header Flags" registry.
pub const TCP_FLAG_FIN: u8 = 0x01;
pub const TCP_FLAG_SYN: u8 = 0x02;
pub const TCP_FLAG_RST: u8 = 0x04;
pub const TCP_FLAG_PSH: u8 = 0x08;
pub const TCP_FLAG_ACK: u8 = 0x10;

/// Transport protocol of a packet or registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown transport protocol")]
pub struct UnknownTransport;

impl FromStr for Transport {
    type Err = UnknownTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            _ => Err(UnknownTransport),
        }
    }
}

/// One dissected transport-layer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketRecord {
    /// Capture timestamp, as an offset from the Unix epoch.
    pub timestamp: Duration,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub transport: Transport,
    /// Raw TCP flags octet.
    pub tcp_flags: u8,
    pub seq: u32,
    pub ack: u32,
    /// Transport payload length in bytes.
    pub payload_len: u32,
}

impl PacketRecord {
    pub fn syn(&self) -> bool {
        self.tcp_flags & TCP_FLAG_SYN != 0
    }

    pub fn ack_flag(&self) -> bool {
        self.tcp_flags & TCP_FLAG_ACK != 0
    }

    pub fn fin(&self) -> bool {
        self.tcp_flags & TCP_FLAG_FIN != 0
    }

    pub fn rst(&self) -> bool {
        self.tcp_flags & TCP_FLAG_RST != 0
    }

    pub fn has_payload(&self) -> bool {
        self.payload_len > 0
    }

    /// An acknowledgment carrying no payload and no connection-control flags.
    pub fn is_pure_ack(&self) -> bool {
        self.ack_flag() && self.payload_len == 0 && !self.syn() && !self.fin() && !self.rst()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn record(tcp_flags: u8, payload_len: u32) -> PacketRecord {
        PacketRecord {
            timestamp: Duration::ZERO,
            src_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            dst_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            src_port: 40000,
            dst_port: 80,
            transport: Transport::Tcp,
            tcp_flags,
            seq: 0,
            ack: 0,
            payload_len,
        }
    }

    #[test]
    fn test_flag_accessors() {
        let pkt = record(TCP_FLAG_SYN | TCP_FLAG_ACK, 0);
        assert!(pkt.syn());
        assert!(pkt.ack_flag());
        assert!(!pkt.fin());
        assert!(!pkt.rst());
    }

    #[test]
    fn test_pure_ack() {
        assert!(record(TCP_FLAG_ACK, 0).is_pure_ack());

        // PSH does not disqualify a pure ack; payload and control flags do.
        assert!(record(TCP_FLAG_ACK | TCP_FLAG_PSH, 0).is_pure_ack());
        assert!(!record(TCP_FLAG_ACK, 12).is_pure_ack());
        assert!(!record(TCP_FLAG_ACK | TCP_FLAG_SYN, 0).is_pure_ack());
        assert!(!record(TCP_FLAG_ACK | TCP_FLAG_FIN, 0).is_pure_ack());
        assert!(!record(TCP_FLAG_ACK | TCP_FLAG_RST, 0).is_pure_ack());
    }

    #[test]
    fn test_transport_parse() {
        assert_eq!("tcp".parse::<Transport>().unwrap(), Transport::Tcp);
        assert_eq!("UDP".parse::<Transport>().unwrap(), Transport::Udp);
        assert_eq!(" tcp ".parse::<Transport>().unwrap(), Transport::Tcp);
        assert!("sctp".parse::<Transport>().is_err());
    }
}

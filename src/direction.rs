//! Local/remote source classification.
//!
//! Decides whether a packet's source endpoint is acting as the local party
//! of its conversation or the remote one, by applying two rules in order:
//!
//! 1. **Routability**: a source address outside the private/non-routable
//!    ranges is remote.
//! 2. **Port registry tiebreak**: a private source with an ephemeral port is
//!    local (a client inside the private network); a private source with a
//!    well-known or registered port is treated as remote: a service reached
//!    from inside a private network, e.g. a NAT'd server.
//!
//! This is a heuristic, not ground truth. Rule 2's well-known-port branch in
//! particular is a judgment call; misclassification is an expected,
//! measurable property of the classifier rather than a defect.

use std::net::IpAddr;

use crate::{
    packet::PacketRecord,
    registry::{PortClass, PortRegistry},
};

/// True when the packet's source endpoint classifies as remote.
pub fn is_source_remote(packet: &PacketRecord, registry: &PortRegistry) -> bool {
    if !is_private(packet.src_addr) {
        return true;
    }
    match registry.classify(packet.src_port, packet.transport) {
        PortClass::Ephemeral => false,
        PortClass::WellKnown => true,
    }
}

/// Private / non-routable address check.
fn is_private(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            // fc00::/7 unique-local, fe80::/10 link-local
            v6.is_loopback()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::{Ipv4Addr, Ipv6Addr},
        time::Duration,
    };

    use super::*;
    use crate::packet::Transport;

    fn registry() -> PortRegistry {
        let table = "Service Name,Port Number,Transport Protocol,Description\n\
                     socks,1080,tcp,SOCKS proxy\n";
        PortRegistry::from_reader(table.as_bytes()).unwrap()
    }

    fn packet(src_addr: IpAddr, src_port: u16) -> PacketRecord {
        PacketRecord {
            timestamp: Duration::ZERO,
            src_addr,
            dst_addr: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            src_port,
            dst_port: 443,
            transport: Transport::Tcp,
            tcp_flags: 0,
            seq: 0,
            ack: 0,
            payload_len: 0,
        }
    }

    #[test]
    fn test_public_source_is_remote() {
        let registry = registry();
        let pkt = packet(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)), 52344);
        // Routability wins even though the port is ephemeral.
        assert!(is_source_remote(&pkt, &registry));
    }

    #[test]
    fn test_private_source_with_ephemeral_port_is_local() {
        let registry = registry();
        let pkt = packet(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 52344);
        assert!(!is_source_remote(&pkt, &registry));
    }

    #[test]
    fn test_private_source_with_registered_port_is_remote() {
        let registry = registry();
        let pkt = packet(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 1080);
        // NAT'd server reading: private address, assigned service port.
        assert!(is_source_remote(&pkt, &registry));
    }

    #[test]
    fn test_private_source_with_reserved_port_is_remote() {
        let registry = registry();
        let pkt = packet(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)), 443);
        assert!(is_source_remote(&pkt, &registry));
    }

    #[test]
    fn test_loopback_and_link_local_are_private() {
        assert!(is_private(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(is_private(IpAddr::V4(Ipv4Addr::new(169, 254, 0, 1))));
        assert!(is_private(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(is_private(IpAddr::V6(Ipv6Addr::new(
            0xfd00, 0, 0, 0, 0, 0, 0, 1
        ))));
        assert!(is_private(IpAddr::V6(Ipv6Addr::new(
            0xfe80, 0, 0, 0, 0, 0, 0, 1
        ))));
        assert!(!is_private(IpAddr::V6(Ipv6Addr::new(
            0x2001, 0xdb8, 0, 0, 0, 0, 0, 1
        ))));
    }
}

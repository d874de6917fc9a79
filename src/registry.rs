//! Service-name / port-number registry.
//!
//! Loads an IANA-style service registry table once at startup and answers
//! whether a (port, transport) pair is an assigned service port or an
//! ephemeral one. The registry is immutable after load and passed explicitly
//! to its consumers, so tests can run against small synthetic tables.

use std::{
    collections::HashMap,
    fs::File,
    io::Read,
    ops::RangeInclusive,
    path::Path,
    sync::{Arc, LazyLock},
};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{error::Error, packet::Transport};

/// Ports at or below this value are reserved and always classify as
/// well-known, irrespective of registry contents.
pub const RESERVED_PORT_MAX: u16 = 1024;

/// Port-range fields look like "6000-6063". Both bounds must parse as full
/// multi-digit integers.
static RANGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<low>\d+)-(?P<high>\d+)$").expect("range pattern compiles")
});

/// Classification of a (port, transport) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortClass {
    WellKnown,
    Ephemeral,
}

/// One assigned service record from the registry table.
///
/// Metadata columns are retained verbatim but never interpreted by the
/// classification logic. A record covering a port range is shared by every
/// key the range expands to.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceEntry {
    pub service_name: String,
    pub transport: Transport,
    pub metadata: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RegistryKey {
    port: u16,
    transport: Transport,
}

/// The whole assignment table. Built once, read-only afterwards.
#[derive(Debug, Default)]
pub struct PortRegistry {
    entries: HashMap<RegistryKey, Arc<ServiceEntry>>,
    skipped_rows: u64,
}

impl PortRegistry {
    /// Load the registry from a CSV file. An unreadable file is fatal.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let file = File::open(path).map_err(|source| Error::RegistryOpen {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(file)
    }

    /// Load the registry from any reader producing the table.
    ///
    /// Expected columns, in order: service name, port or port-range,
    /// transport protocol, then free-text metadata columns. The first row is
    /// a header and is skipped. Rows whose port field is neither an integer
    /// nor a low-high range, or whose transport is unknown, are skipped.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, Error> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let mut entries: HashMap<RegistryKey, Arc<ServiceEntry>> = HashMap::new();
        let mut skipped_rows = 0u64;

        for result in csv_reader.records() {
            let record = match result {
                Ok(record) => record,
                // I/O failures abort the load; a single undecodable row does not.
                Err(e) if e.is_io_error() => return Err(Error::RegistryRead(e)),
                Err(e) => {
                    skipped_rows += 1;
                    warn!(
                        event.name = "registry.row_unreadable",
                        error = %e,
                        "skipping unreadable registry row"
                    );
                    continue;
                }
            };

            let port_field = record.get(1).unwrap_or_default();
            let transport = record.get(2).and_then(|s| s.parse::<Transport>().ok());

            let (Some(ports), Some(transport)) = (parse_port_field(port_field), transport) else {
                skipped_rows += 1;
                continue;
            };

            let entry = Arc::new(ServiceEntry {
                service_name: record.get(0).unwrap_or_default().to_string(),
                transport,
                metadata: record.iter().skip(3).map(str::to_string).collect(),
            });

            // Later rows for the same key overwrite earlier ones.
            for port in ports {
                entries.insert(RegistryKey { port, transport }, Arc::clone(&entry));
            }
        }

        debug!(
            event.name = "registry.loaded",
            entries = entries.len(),
            skipped_rows,
            "service registry loaded"
        );

        Ok(Self {
            entries,
            skipped_rows,
        })
    }

    /// Classify a (port, transport) pair as well-known or ephemeral.
    pub fn classify(&self, port: u16, transport: Transport) -> PortClass {
        if port <= RESERVED_PORT_MAX || self.entries.contains_key(&RegistryKey { port, transport })
        {
            PortClass::WellKnown
        } else {
            PortClass::Ephemeral
        }
    }

    /// Look up the service record assigned to a (port, transport) pair.
    pub fn lookup(&self, port: u16, transport: Transport) -> Option<&ServiceEntry> {
        self.entries
            .get(&RegistryKey { port, transport })
            .map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Rows skipped during load (malformed port field or unknown transport).
    pub fn skipped_rows(&self) -> u64 {
        self.skipped_rows
    }
}

/// Parse a port field into the range of ports it covers.
///
/// A single integer yields a one-port range; "low-high" yields the inclusive
/// range. Reversed bounds and anything else yield `None`.
fn parse_port_field(field: &str) -> Option<RangeInclusive<u16>> {
    let field = field.trim();
    if let Ok(port) = field.parse::<u16>() {
        return Some(port..=port);
    }

    let caps = RANGE_PATTERN.captures(field)?;
    let low = caps["low"].parse::<u16>().ok()?;
    let high = caps["high"].parse::<u16>().ok()?;
    if low > high {
        return None;
    }
    Some(low..=high)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "Service Name,Port Number,Transport Protocol,Description,Assignee,Contact\n";

    fn load(rows: &str) -> PortRegistry {
        let table = format!("{HEADER}{rows}");
        PortRegistry::from_reader(table.as_bytes()).unwrap()
    }

    #[test]
    fn test_reserved_ports_always_well_known() {
        let registry = load("");
        for port in [0u16, 1, 22, 443, 1024] {
            assert_eq!(registry.classify(port, Transport::Tcp), PortClass::WellKnown);
            assert_eq!(registry.classify(port, Transport::Udp), PortClass::WellKnown);
        }
    }

    #[test]
    fn test_registered_port_is_well_known() {
        let registry = load("socks,1080,tcp,SOCKS proxy,,\n");
        assert_eq!(registry.classify(1080, Transport::Tcp), PortClass::WellKnown);
        // Registration is per-transport.
        assert_eq!(registry.classify(1080, Transport::Udp), PortClass::Ephemeral);
    }

    #[test]
    fn test_unregistered_high_port_is_ephemeral() {
        let registry = load("socks,1080,tcp,SOCKS proxy,,\n");
        assert_eq!(registry.classify(52344, Transport::Tcp), PortClass::Ephemeral);
    }

    #[test]
    fn test_range_expansion() {
        let registry = load("x11,6000-6063,tcp,X Window System,,\n");
        for port in 6000..=6063u16 {
            assert_eq!(registry.classify(port, Transport::Tcp), PortClass::WellKnown);
        }
        assert_eq!(registry.classify(5999, Transport::Tcp), PortClass::Ephemeral);
        assert_eq!(registry.classify(6064, Transport::Tcp), PortClass::Ephemeral);
    }

    #[test]
    fn test_multi_digit_range_bounds() {
        // "100-2000" must parse both full boundaries, not single digits.
        let registry = load("bulk,1100-2000,udp,bulk range,,\n");
        assert_eq!(registry.classify(1100, Transport::Udp), PortClass::WellKnown);
        assert_eq!(registry.classify(1999, Transport::Udp), PortClass::WellKnown);
        assert_eq!(registry.classify(2001, Transport::Udp), PortClass::Ephemeral);
    }

    #[test]
    fn test_malformed_rows_skipped() {
        let registry = load(concat!(
            "no-port,,tcp,reserved row,,\n",
            "garbage,abc,tcp,not a port,,\n",
            "reversed,2000-1100,tcp,reversed bounds,,\n",
            "unknown-proto,4242,sctp,unsupported transport,,\n",
            "good,4242,tcp,kept,,\n",
        ));
        assert_eq!(registry.skipped_rows(), 4);
        assert_eq!(registry.classify(4242, Transport::Tcp), PortClass::WellKnown);
    }

    #[test]
    fn test_later_rows_overwrite() {
        let registry = load(concat!(
            "first,7000,tcp,original,,\n",
            "second,7000,tcp,overwrites,,\n",
        ));
        let entry = registry.lookup(7000, Transport::Tcp).unwrap();
        assert_eq!(entry.service_name, "second");
    }

    #[test]
    fn test_range_entry_shared_and_metadata_retained() {
        let registry = load("x11,6000-6001,tcp,X Window System,IANA,contact@example.com\n");
        let a = registry.lookup(6000, Transport::Tcp).unwrap();
        let b = registry.lookup(6001, Transport::Tcp).unwrap();
        assert_eq!(a.service_name, "x11");
        assert_eq!(b.service_name, "x11");
        assert_eq!(
            a.metadata,
            vec!["X Window System", "IANA", "contact@example.com"]
        );
    }

    #[test]
    fn test_parse_port_field() {
        assert_eq!(parse_port_field("443"), Some(443..=443));
        assert_eq!(parse_port_field("100-200"), Some(100..=200));
        assert_eq!(parse_port_field(" 8080 "), Some(8080..=8080));
        assert_eq!(parse_port_field("200-100"), None);
        assert_eq!(parse_port_field("-"), None);
        assert_eq!(parse_port_field(""), None);
        assert_eq!(parse_port_field("1-2-3"), None);
    }
}

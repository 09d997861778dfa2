use std::collections::BTreeMap;
use std::fmt::Display;

use k8s_openapi::api::core::v1::Container;

/// Inclusive range of ports, a single port when both bounds are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortRange {
    pub lower: u16,
    pub upper: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        PortRange {
            lower: port,
            upper: port,
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        self.lower <= port && port <= self.upper
    }
}

impl Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.lower == self.upper {
            write!(f, "{}", self.lower)
        } else {
            write!(f, "{}-{}", self.lower, self.upper)
        }
    }
}

fn parse_port(port: &str) -> Result<u16, String> {
    if port.starts_with('+') {
        return Err(format!("Invalid port {}", port));
    }
    port.parse::<u16>()
        .map_err(|e| format!("Invalid port {}: {}", port, e))
}

/// Parses `80` or `8000-9000`.
pub fn parse_port_range(range: &str) -> Result<PortRange, String> {
    let bounds: Vec<&str> = range.split('-').collect();
    match bounds.as_slice() {
        [port] => parse_port(port).map(PortRange::single),
        [lower, upper] => {
            let lower = parse_port(lower)?;
            let upper = parse_port(upper)?;
            if upper < lower {
                Err(format!(
                    "Upper-bound must be greater than or equal to lower-bound in range {}",
                    range
                ))
            } else {
                Ok(PortRange { lower, upper })
            }
        }
        _ => Err(format!(
            "Ranges expected as <lower>-<upper>, found {}",
            range
        )),
    }
}

/// Comma separated entries with surrounding whitespace removed; empty entries are dropped.
pub fn port_list_entries(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Resolves an opaque ports list made of ports, ranges and container port names.
/// Entries that can not be resolved are returned as errors next to the valid ranges,
/// the valid ranges keep the input order.
pub fn parse_container_opaque_ports(
    list: &str,
    named_ports: &BTreeMap<String, i32>,
) -> (Vec<PortRange>, Vec<String>) {
    let mut ranges = vec![];
    let mut errors = vec![];
    for entry in port_list_entries(list) {
        if let Some(port) = named_ports.get(entry) {
            match u16::try_from(*port) {
                Ok(port) => ranges.push(PortRange::single(port)),
                Err(_) => errors.push(format!("Invalid port {} for named port {}", port, entry)),
            }
            continue;
        }
        match parse_port_range(entry) {
            Ok(range) => ranges.push(range),
            Err(e) => errors.push(e),
        }
    }
    (ranges, errors)
}

/// Container port names mapped to their numbers. Later containers win on name clashes.
pub fn named_ports(containers: &[Container]) -> BTreeMap<String, i32> {
    containers
        .iter()
        .flat_map(|c| c.ports.iter().flatten())
        .filter_map(|p| {
            p.name
                .as_ref()
                .filter(|n| !n.is_empty())
                .map(|n| (n.clone(), p.container_port))
        })
        .collect()
}

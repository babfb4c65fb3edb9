//! Host network interface enumeration.

use std::net::Ipv4Addr;

use if_addrs::IfAddr;

use crate::error::GigeError;
use crate::netutil::is_normal_ip;

/// One IPv4 address bound to a host interface, with its netmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddress {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// A host network interface and its eligible IPv4 addresses.
///
/// Ineligible addresses (loopback, broadcast-equal) are filtered out at
/// enumeration time; an interface with no eligible address is dropped
/// entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iface {
    pub name: String,
    pub addresses: Vec<BoundAddress>,
}

impl Iface {
    /// First eligible address, used for sockets that only need one.
    pub fn primary_address(&self) -> Option<BoundAddress> {
        self.addresses.first().copied()
    }
}

/// Enumerate host network interfaces with at least one eligible IPv4
/// address.
pub fn enumerate() -> Result<Vec<Iface>, GigeError> {
    let mut by_name: std::collections::BTreeMap<String, Vec<BoundAddress>> =
        std::collections::BTreeMap::new();

    for entry in if_addrs::get_if_addrs()? {
        let IfAddr::V4(v4) = entry.addr else {
            continue;
        };
        if !is_normal_ip(v4.ip, v4.netmask) {
            continue;
        }
        by_name.entry(entry.name).or_default().push(BoundAddress {
            ip: v4.ip,
            netmask: v4.netmask,
        });
    }

    Ok(by_name
        .into_iter()
        .map(|(name, addresses)| Iface { name, addresses })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_address_is_first_eligible() {
        let iface = Iface {
            name: "eth0".into(),
            addresses: vec![BoundAddress {
                ip: Ipv4Addr::new(192, 168, 1, 5),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
            }],
        };
        assert_eq!(iface.primary_address().unwrap().ip, Ipv4Addr::new(192, 168, 1, 5));
    }

    #[test]
    fn empty_interface_has_no_primary_address() {
        let iface = Iface {
            name: "lo".into(),
            addresses: Vec::new(),
        };
        assert!(iface.primary_address().is_none());
    }
}

//! GenTL-flavored `System`/`Interface` enumeration object model (§4.5),
//! collapsed from the original class hierarchy into concrete structs.

use std::net::Ipv4Addr;
use std::time::Duration;

use tl_gige::{DeviceDescriptor, DiscoverOutcome, Iface};

use crate::error::GenicamError;

/// Root enumeration object: lists host network interfaces eligible for
/// GigE Vision discovery.
#[derive(Debug, Default, Clone, Copy)]
pub struct System;

impl System {
    pub fn new() -> Self {
        Self
    }

    /// Enumerate host network interfaces with at least one eligible IPv4
    /// address.
    pub fn update_interface_list(&self) -> Result<Vec<Interface>, GenicamError> {
        Ok(tl_gige::enumerate_interfaces()?.into_iter().map(Interface::new).collect())
    }
}

/// One host network interface, scoped to its bound IPv4 addresses.
#[derive(Debug, Clone)]
pub struct Interface {
    iface: Iface,
}

impl Interface {
    fn new(iface: Iface) -> Self {
        Self { iface }
    }

    pub fn name(&self) -> &str {
        &self.iface.name
    }

    pub fn primary_address(&self) -> Option<Ipv4Addr> {
        self.iface.primary_address().map(|a| a.ip)
    }

    /// Broadcast DISCOVERY on this interface and collect acks until
    /// `timeout` elapses, deduplicated by MAC in first-seen order.
    pub fn update_device_list(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, GenicamError> {
        Ok(tl_gige::discover(std::slice::from_ref(&self.iface), timeout)?)
    }
}

/// Walk every interface, broadcast DISCOVERY, and filter by vendor/model
/// (`spec.md` §4.5 `discover(target_vendor, target_model)`).
pub fn discover(interfaces: &[Interface], vendor: &str, model: &str, timeout: Duration) -> Result<DiscoverOutcome, GenicamError> {
    if interfaces.is_empty() {
        return Err(GenicamError::NoInterface);
    }
    let ifaces: Vec<Iface> = interfaces.iter().map(|i| i.iface.clone()).collect();
    Ok(tl_gige::discover_by_identity(&ifaces, vendor, model, timeout)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_gige::BoundAddress;

    fn iface(name: &str, ip: Ipv4Addr) -> Interface {
        Interface::new(Iface {
            name: name.into(),
            addresses: vec![BoundAddress { ip, netmask: Ipv4Addr::new(255, 255, 255, 0) }],
        })
    }

    #[test]
    fn primary_address_reads_through_to_bound_address() {
        let interface = iface("eth0", Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(interface.primary_address(), Some(Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(interface.name(), "eth0");
    }

    #[test]
    fn discover_with_no_interfaces_reports_no_interface() {
        let err = discover(&[], "Acme", "Widget", Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, GenicamError::NoInterface));
    }
}

//! Device facade: a claimed GVCP connection paired with the descriptor it
//! was opened from.

use std::sync::Arc;

use tl_gige::gvcp::consts;
use tl_gige::{DeviceDescriptor, GvcpConnection};
use tracing::info;

use crate::error::GenicamError;

/// Contract for a device type constructible from a discovery descriptor.
///
/// The base "discoverable" contract is the pair (vendor, model) plus a
/// constructor taking the descriptor, preferred over a class-inheritance
/// hierarchy (§9 Design Notes).
pub trait Discoverable: Sized {
    const VENDOR: &'static str;
    const MODEL: &'static str;

    fn open(descriptor: DeviceDescriptor) -> Result<Self, GenicamError>;
}

/// An opened GigE Vision device: a claimed GVCP connection plus the
/// descriptor it was discovered with.
pub struct GigeDevice {
    descriptor: DeviceDescriptor,
    connection: Arc<GvcpConnection>,
}

impl GigeDevice {
    /// Claim control of the device named by `descriptor` on the standard
    /// GVCP port.
    pub fn open(descriptor: DeviceDescriptor) -> Result<Self, GenicamError> {
        let connection = GvcpConnection::connect(descriptor.current_ip, consts::PORT)?;
        info!(model = %descriptor.model, serial = %descriptor.serial_number, "device opened");
        Ok(Self { descriptor, connection })
    }

    /// Discovery-time metadata this device was opened with.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Shared handle to the underlying GVCP connection, e.g. for
    /// [`crate::stream::StreamBuilder`].
    pub fn connection(&self) -> &Arc<GvcpConnection> {
        &self.connection
    }

    pub fn readreg(&self, addresses: &[u32]) -> Result<Vec<u32>, GenicamError> {
        Ok(self.connection.readreg(addresses)?)
    }

    pub fn writereg(&self, pairs: &[(u32, u32)], ack_required: bool) -> Result<(), GenicamError> {
        Ok(self.connection.writereg(pairs, ack_required)?)
    }

    pub fn readmem(&self, address: u32, byte_count: usize) -> Result<Vec<u8>, GenicamError> {
        Ok(self.connection.readmem(address, byte_count)?)
    }

    pub fn writemem(&self, address: u32, data: &[u8]) -> Result<(), GenicamError> {
        Ok(self.connection.writemem(address, data)?)
    }

    /// Fetch the device description document named by the bootstrap URL.
    pub fn get_device_description(&self) -> Result<Vec<u8>, GenicamError> {
        Ok(self.connection.get_device_description()?)
    }

    /// Release control of the device.
    pub fn close(&self) -> Result<(), GenicamError> {
        Ok(self.connection.disconnect()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    struct TestCamera;

    impl Discoverable for TestCamera {
        const VENDOR: &'static str = "Acme";
        const MODEL: &'static str = "Widget-9000";

        fn open(descriptor: DeviceDescriptor) -> Result<Self, GenicamError> {
            let _ = descriptor;
            Ok(TestCamera)
        }
    }

    #[test]
    fn discoverable_contract_exposes_vendor_and_model() {
        assert_eq!(TestCamera::VENDOR, "Acme");
        assert_eq!(TestCamera::MODEL, "Widget-9000");
        let descriptor = DeviceDescriptor {
            mac: [0, 1, 2, 3, 4, 5],
            vendor: "Acme".into(),
            model: "Widget-9000".into(),
            serial_number: "SN1".into(),
            user_defined_name: String::new(),
            firmware_version: "1.0".into(),
            current_ip: Ipv4Addr::new(169, 254, 0, 5),
            netmask: Ipv4Addr::new(255, 255, 0, 0),
            gateway: Ipv4Addr::UNSPECIFIED,
            raw: Vec::new(),
        };
        assert!(TestCamera::open(descriptor).is_ok());
    }
}

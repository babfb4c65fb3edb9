//! High level GenICam facade over GigE Vision discovery, device control,
//! and stream acquisition.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use genicam::{System, GigeDevice, StreamBuilder};
//!
//! # fn run() -> Result<(), genicam::GenicamError> {
//! let system = System::new();
//! let interfaces = system.update_interface_list()?;
//! let Some(interface) = interfaces.first() else {
//!     return Ok(());
//! };
//! let devices = interface.update_device_list(Duration::from_millis(500))?;
//! let Some(descriptor) = devices.into_iter().next() else {
//!     return Ok(());
//! };
//! let device = GigeDevice::open(descriptor)?;
//! let host_ip = interface.primary_address().expect("interface has an address");
//! let stream = StreamBuilder::new(&device, host_ip).build(Box::new(|_frame| false))?;
//! stream.close()?;
//! device.close()?;
//! # Ok(())
//! # }
//! ```

pub use genicp;
pub use tl_gige;

pub mod device;
pub mod error;
pub mod stream;
pub mod system;

pub use device::{Discoverable, GigeDevice};
pub use error::GenicamError;
pub use stream::{Stream, StreamBuilder};
pub use system::{discover, Interface, System};

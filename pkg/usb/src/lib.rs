//! Minimal USB host transport built directly on Linux `usbfs`.
//!
//! This does not link libusb: every primitive the rest of this codebase's
//! device tools need (enumerate by VID:PID, claim an interface, detach/
//! reattach whatever kernel driver is bound to it, and move bytes over a
//! bulk endpoint with a timeout) is implemented against the kernel's
//! `/dev/bus/usb/BBB/DDD` character devices.

extern crate common;

pub mod context;
pub mod descriptor;
pub mod device;
mod error;
mod ioctl;
pub mod selector;

pub use context::{Context, DeviceInfo};
pub use descriptor::DeviceDescriptor;
pub use device::{Device, DEFAULT_TIMEOUT_MS};
pub use error::UsbError;
pub use selector::DeviceSelector;

use common::errors::*;

/// Abstraction over "something that can move bytes on a bulk endpoint",
/// implemented by [Device] and, in tests, by an in-memory mock. Letting the
/// protocol layers built on top of this crate be generic over
/// [BulkChannel] is what makes the AWUSB/FEL round-trip tests in the `fel`
/// crate possible without real hardware.
pub trait BulkChannel {
    fn bulk_send(&self, endpoint: u8, buf: &[u8]) -> Result<()>;
    fn bulk_recv(&self, endpoint: u8, buf: &mut [u8]) -> Result<()>;
}

impl BulkChannel for Device {
    fn bulk_send(&self, endpoint: u8, buf: &[u8]) -> Result<()> {
        Device::bulk_send(self, endpoint, buf)
    }

    fn bulk_recv(&self, endpoint: u8, buf: &mut [u8]) -> Result<()> {
        Device::bulk_recv(self, endpoint, buf)
    }
}

use common::errors::*;
use common::Fail;

/// Errors raised by the raw `usbfs` transport. These describe transport-level
/// failures only: short/failed bulk transfers, a device that disappeared, or
/// a kernel call that was refused. Protocol-level interpretation of the
/// bytes moved over the wire is the caller's responsibility.
#[derive(Debug, Fail)]
pub enum UsbError {
    #[fail(display = "No device found matching vendor={:04x} product={:04x}", vendor, product)]
    DeviceNotFound { vendor: u16, product: u16 },

    #[fail(display = "Failed to open device node {}: {}", path, message)]
    OpenFailed { path: String, message: String },

    #[fail(
        display = "Permission denied opening {} (elevated privileges or a udev rule may be required)",
        path
    )]
    PermissionDenied { path: String },

    #[fail(display = "Failed to claim interface {}: {}", interface, message)]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[fail(display = "Bulk transfer on endpoint {:#04x} failed: {}", endpoint, message)]
    TransferFailed { endpoint: u8, message: String },

    #[fail(
        display = "Bulk transfer on endpoint {:#04x} timed out after moving {} of {} bytes",
        endpoint, transferred, requested
    )]
    TransferTimedOut {
        endpoint: u8,
        transferred: usize,
        requested: usize,
    },

    #[fail(display = "Malformed device descriptor ({} bytes)", len)]
    MalformedDescriptor { len: usize },
}

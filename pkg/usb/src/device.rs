use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use common::errors::*;

use crate::error::UsbError;
use crate::ioctl;

/// Default interface claimed by [Device::open]. The FEL target in this
/// codebase's scope exposes exactly one interface.
pub const DEFAULT_INTERFACE: u8 = 0;

/// Default per-transfer timeout, matching §6 of the transfer spec
/// (60 seconds).
pub const DEFAULT_TIMEOUT_MS: u32 = 60_000;

/// An opened, interface-claimed USB device plus the per-call timeout and
/// driver-detach bookkeeping needed to restore the host's state on close.
///
/// All transfers are blocking `usbfs` ioctls; there is deliberately no
/// internal buffering or pipelining, matching the single-threaded
/// cooperative transport model this crate is built for.
pub struct Device {
    file: std::fs::File,
    path: PathBuf,
    interface: u8,
    timeout_ms: u32,
    driver_detached: bool,
}

impl Device {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, DEFAULT_INTERFACE, DEFAULT_TIMEOUT_MS)
    }

    pub fn open_with<P: AsRef<Path>>(path: P, interface: u8, timeout_ms: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    Error::from(UsbError::PermissionDenied {
                        path: path.display().to_string(),
                    })
                } else {
                    Error::from(UsbError::OpenFailed {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    })
                }
            })?;

        let driver_detached = unsafe {
            ioctl::disconnect_driver(file.as_raw_fd(), interface).unwrap_or(false)
        };

        unsafe {
            ioctl::claim_interface(file.as_raw_fd(), interface).map_err(|e| {
                UsbError::ClaimInterfaceFailed {
                    interface,
                    message: e.to_string(),
                }
            })?;
        }

        Ok(Self {
            file,
            path,
            interface,
            timeout_ms,
            driver_detached,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_timeout_ms(&mut self, timeout_ms: u32) {
        self.timeout_ms = timeout_ms;
    }

    fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { ioctl::reset_device(self.raw_fd()) }
            .map_err(|e| format_err!("Device reset failed: {}", e))
    }

    /// Sends `buf` in full on `endpoint`, looping over partial completions.
    /// Returns as soon as an error (including a timeout) is hit, with the
    /// error naming how much of the buffer had already moved.
    pub fn bulk_send(&self, endpoint: u8, buf: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            let remaining = &buf[offset..];
            let sent = self.bulk_once(endpoint, remaining.as_ptr() as *mut u8, remaining.len())?;
            if sent == 0 {
                return Err(UsbError::TransferTimedOut {
                    endpoint,
                    transferred: offset,
                    requested: buf.len(),
                }
                .into());
            }
            offset += sent;
        }
        Ok(())
    }

    /// Receives exactly `buf.len()` bytes on `endpoint`, looping over
    /// partial completions.
    pub fn bulk_recv(&self, endpoint: u8, buf: &mut [u8]) -> Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            let sent = {
                let remaining = &mut buf[offset..];
                let len = remaining.len();
                self.bulk_once(endpoint, remaining.as_mut_ptr(), len)?
            };
            if sent == 0 {
                return Err(UsbError::TransferTimedOut {
                    endpoint,
                    transferred: offset,
                    requested: buf.len(),
                }
                .into());
            }
            offset += sent;
        }
        Ok(())
    }

    fn bulk_once(&self, endpoint: u8, data: *mut u8, len: usize) -> Result<usize> {
        let slice = unsafe { std::slice::from_raw_parts_mut(data, len) };
        unsafe { ioctl::bulk_transfer(self.raw_fd(), endpoint, slice, self.timeout_ms) }.map_err(
            |e| {
                UsbError::TransferFailed {
                    endpoint,
                    message: e.to_string(),
                }
                .into()
            },
        )
    }

    pub fn close(mut self) -> Result<()> {
        self.close_impl()
    }

    fn close_impl(&mut self) -> Result<()> {
        unsafe {
            let _ = ioctl::release_interface(self.raw_fd(), self.interface);
            if self.driver_detached {
                let _ = ioctl::reconnect_driver(self.raw_fd(), self.interface);
            }
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let _ = self.close_impl();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_matches_spec() {
        assert_eq!(DEFAULT_TIMEOUT_MS, 60_000);
    }
}

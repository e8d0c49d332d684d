//! Raw Linux `usbfs` ioctl bindings.
//!
//! This talks directly to `/dev/bus/usb/BBB/DDD` rather than linking a
//! bundled libusb: every operation the rest of this crate needs (claim an
//! interface, detach/reattach the kernel driver, submit a bulk transfer,
//! reset the device) maps onto one `usbdevfs` ioctl defined in
//! `<linux/usbdevice_fs.h>`.

use std::os::unix::io::RawFd;

use nix::libc;

/// `struct usbdevfs_bulktransfer`.
#[repr(C)]
pub struct UsbDevFsBulkTransfer {
    pub ep: libc::c_uint,
    pub len: libc::c_uint,
    pub timeout: libc::c_uint,
    pub data: *mut libc::c_void,
}

/// `struct usbdevfs_ctrltransfer`.
#[repr(C)]
pub struct UsbDevFsCtrlTransfer {
    pub bm_request_type: u8,
    pub b_request: u8,
    pub w_value: u16,
    pub w_index: u16,
    pub w_length: u16,
    pub timeout: u32,
    pub data: *mut libc::c_void,
}

/// `struct usbdevfs_setinterface`.
#[repr(C)]
pub struct UsbDevFsSetInterface {
    pub interface: libc::c_uint,
    pub altsetting: libc::c_uint,
}

/// `struct usbdevfs_ioctl`, used to issue the `USBDEVFS_DISCONNECT` and
/// `USBDEVFS_CONNECT` sub-commands that detach/reattach a kernel driver
/// bound to an interface.
#[repr(C)]
pub struct UsbDevFsIoctl {
    pub ifno: libc::c_int,
    pub ioctl_code: libc::c_int,
    pub data: *mut libc::c_void,
}

/// `struct usbdevfs_getdriver`.
#[repr(C)]
pub struct UsbDevFsGetDriver {
    pub interface: libc::c_uint,
    pub driver: [libc::c_char; 256],
}

/// Sub-command passed in `UsbDevFsIoctl::ioctl_code` to detach whatever
/// kernel driver (if any) is bound to the given interface.
pub const USBDEVFS_DISCONNECT: libc::c_int = nix_io_none(b'U', 22);
/// Sub-command to rebind the kernel driver that `USBDEVFS_DISCONNECT`
/// detached.
pub const USBDEVFS_CONNECT: libc::c_int = nix_io_none(b'U', 23);

const fn nix_io_none(ty: u8, nr: u8) -> libc::c_int {
    // Mirrors the kernel's `_IO(type, nr)` macro: no size/direction bits are
    // encoded for argument-less sub-commands.
    (((ty as libc::c_int) << 8) | (nr as libc::c_int)) as libc::c_int
}

nix::ioctl_readwrite!(usb_bulk, b'U', 2, UsbDevFsBulkTransfer);
nix::ioctl_readwrite!(usb_control, b'U', 0, UsbDevFsCtrlTransfer);
nix::ioctl_write_ptr!(usb_setinterface, b'U', 4, UsbDevFsSetInterface);
nix::ioctl_write_ptr!(usb_setconfiguration, b'U', 5, libc::c_uint);
nix::ioctl_readwrite!(usb_getdriver, b'U', 8, UsbDevFsGetDriver);
nix::ioctl_write_ptr!(usb_claiminterface, b'U', 15, libc::c_uint);
nix::ioctl_write_ptr!(usb_releaseinterface, b'U', 16, libc::c_uint);
nix::ioctl_readwrite!(usb_ioctl, b'U', 18, UsbDevFsIoctl);
nix::ioctl_none!(usb_reset, b'U', 20);

pub unsafe fn bulk_transfer(
    fd: RawFd,
    endpoint: u8,
    buf: &mut [u8],
    timeout_ms: u32,
) -> nix::Result<usize> {
    let mut req = UsbDevFsBulkTransfer {
        ep: endpoint as libc::c_uint,
        len: buf.len() as libc::c_uint,
        timeout: timeout_ms as libc::c_uint,
        data: buf.as_mut_ptr() as *mut libc::c_void,
    };

    let transferred = usb_bulk(fd, &mut req)?;
    Ok(transferred as usize)
}

pub unsafe fn claim_interface(fd: RawFd, interface: u8) -> nix::Result<()> {
    let iface = interface as libc::c_uint;
    usb_claiminterface(fd, &iface)?;
    Ok(())
}

pub unsafe fn release_interface(fd: RawFd, interface: u8) -> nix::Result<()> {
    let iface = interface as libc::c_uint;
    usb_releaseinterface(fd, &iface)?;
    Ok(())
}

pub unsafe fn reset_device(fd: RawFd) -> nix::Result<()> {
    usb_reset(fd)?;
    Ok(())
}

/// Detaches whatever kernel driver is bound to `interface`. Returns `true`
/// if a driver was actually detached (and so should be reattached on
/// close), `false` if none was bound.
pub unsafe fn disconnect_driver(fd: RawFd, interface: u8) -> nix::Result<bool> {
    let mut getdriver = UsbDevFsGetDriver {
        interface: interface as libc::c_uint,
        driver: [0; 256],
    };
    if usb_getdriver(fd, &mut getdriver).is_err() {
        // ENODATA: no driver bound to this interface.
        return Ok(false);
    }

    let mut req = UsbDevFsIoctl {
        ifno: interface as libc::c_int,
        ioctl_code: USBDEVFS_DISCONNECT,
        data: std::ptr::null_mut(),
    };
    usb_ioctl(fd, &mut req)?;
    Ok(true)
}

pub unsafe fn reconnect_driver(fd: RawFd, interface: u8) -> nix::Result<()> {
    let mut req = UsbDevFsIoctl {
        ifno: interface as libc::c_int,
        ioctl_code: USBDEVFS_CONNECT,
        data: std::ptr::null_mut(),
    };
    usb_ioctl(fd, &mut req)?;
    Ok(())
}

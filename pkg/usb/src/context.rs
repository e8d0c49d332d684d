use std::fs;
use std::path::PathBuf;

use common::errors::*;

use crate::descriptor::DeviceDescriptor;
use crate::device::Device;
use crate::error::UsbError;

/// A single enumerated-but-unopened USB device, identified by its location
/// on the bus rather than by a kept-open file descriptor.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    bus_num: u32,
    dev_num: u32,
    descriptor: DeviceDescriptor,
}

impl DeviceInfo {
    pub fn bus_num(&self) -> u32 {
        self.bus_num
    }

    pub fn dev_num(&self) -> u32 {
        self.dev_num
    }

    pub fn device_descriptor(&self) -> Result<DeviceDescriptor> {
        Ok(self.descriptor)
    }

    pub fn node_path(&self) -> PathBuf {
        PathBuf::from(format!(
            "/dev/bus/usb/{:03}/{:03}",
            self.bus_num, self.dev_num
        ))
    }

    pub async fn open(&self) -> Result<Device> {
        Device::open(self.node_path()).await
    }
}

/// A short-lived handle onto the kernel's USB device tree.
///
/// Per the rewrite's DESIGN.md: a [Context] is created fresh for every
/// enumeration and holds no state once `enumerate_devices` returns, matching
/// this crate's "one short-lived context per `find_device` call" contract.
pub struct Context;

impl Context {
    pub fn create() -> Result<Self> {
        Ok(Self)
    }

    /// Lists every USB device currently visible under `/sys/bus/usb/devices`.
    /// Entries which are hubs, interfaces, or otherwise lack a readable
    /// device descriptor are silently skipped.
    pub async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        let mut out = vec![];

        let root = fs::read_dir("/sys/bus/usb/devices")
            .map_err(|e| format_err!("Failed to list /sys/bus/usb/devices: {}", e))?;

        for entry in root {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };

            let path = entry.path();

            let bus_num = match read_u32_file(&path.join("busnum")) {
                Some(v) => v,
                None => continue,
            };
            let dev_num = match read_u32_file(&path.join("devnum")) {
                Some(v) => v,
                None => continue,
            };
            let id_vendor = match read_hex_file(&path.join("idVendor")) {
                Some(v) => v,
                None => continue,
            };
            let id_product = match read_hex_file(&path.join("idProduct")) {
                Some(v) => v,
                None => continue,
            };

            // We only need the handful of fields callers inspect (the
            // vendor/product pair); the rest of the standard device
            // descriptor is not exposed by sysfs as raw bytes without
            // reading `descriptors`, so we synthesize a descriptor record
            // carrying just what was read.
            let descriptor = DeviceDescriptor {
                length: 18,
                descriptor_type: 1,
                usb_version: 0,
                device_class: 0,
                device_sub_class: 0,
                device_protocol: 0,
                max_packet_size0: 0,
                id_vendor,
                id_product,
                device_version: 0,
            };

            out.push(DeviceInfo {
                bus_num,
                dev_num,
                descriptor,
            });
        }

        Ok(out)
    }

    /// Returns true iff any currently-attached device matches the given
    /// VID:PID. Never holds onto any enumeration state afterwards.
    pub async fn find_device(&self, vendor: u16, product: u16) -> Result<bool> {
        Ok(self.find_device_info(vendor, product).await?.is_some())
    }

    pub async fn find_device_info(&self, vendor: u16, product: u16) -> Result<Option<DeviceInfo>> {
        for dev in self.enumerate_devices().await? {
            if dev.descriptor.matches(vendor, product) {
                return Ok(Some(dev));
            }
        }
        Ok(None)
    }

    pub async fn open_device(&self, vendor: u16, product: u16) -> Result<Device> {
        let info = self
            .find_device_info(vendor, product)
            .await?
            .ok_or_else(|| UsbError::DeviceNotFound { vendor, product })?;

        info.open().await
    }
}

fn read_u32_file(path: &std::path::Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn read_hex_file(path: &std::path::Path) -> Option<u16> {
    u16::from_str_radix(fs::read_to_string(path).ok()?.trim(), 16).ok()
}

use crate::error::UsbError;
use common::errors::*;

/// The subset of the standard USB device descriptor (USB 2.0 spec table
/// 9-8) that `find_device`/`enumerate_devices` need. Always 18 bytes,
/// little-endian, as reported by `/sys/bus/usb/devices/*/descriptors` or the
/// first read of `/dev/bus/usb/BBB/DDD`.
#[derive(Debug, Clone, Copy)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub usb_version: u16,
    pub device_class: u8,
    pub device_sub_class: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub id_vendor: u16,
    pub id_product: u16,
    pub device_version: u16,
}

pub const DEVICE_DESCRIPTOR_LEN: usize = 18;

impl DeviceDescriptor {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < DEVICE_DESCRIPTOR_LEN {
            return Err(
                UsbError::MalformedDescriptor { len: raw.len() }.into(),
            );
        }

        Ok(Self {
            length: raw[0],
            descriptor_type: raw[1],
            usb_version: u16::from_le_bytes([raw[2], raw[3]]),
            device_class: raw[4],
            device_sub_class: raw[5],
            device_protocol: raw[6],
            max_packet_size0: raw[7],
            id_vendor: u16::from_le_bytes([raw[8], raw[9]]),
            id_product: u16::from_le_bytes([raw[10], raw[11]]),
            device_version: u16::from_le_bytes([raw[12], raw[13]]),
        })
    }

    pub fn matches(&self, vendor: u16, product: u16) -> bool {
        self.id_vendor == vendor && self.id_product == product
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_layout() {
        let mut raw = [0u8; DEVICE_DESCRIPTOR_LEN];
        raw[0] = 18;
        raw[1] = 1;
        raw[8..10].copy_from_slice(&0x1f3au16.to_le_bytes());
        raw[10..12].copy_from_slice(&0xefe8u16.to_le_bytes());

        let desc = DeviceDescriptor::parse(&raw).unwrap();
        assert_eq!(desc.id_vendor, 0x1f3a);
        assert_eq!(desc.id_product, 0xefe8);
        assert!(desc.matches(0x1f3a, 0xefe8));
        assert!(!desc.matches(0x1f3a, 0x0000));
    }

    #[test]
    fn rejects_short_buffers() {
        assert!(DeviceDescriptor::parse(&[0u8; 4]).is_err());
    }
}

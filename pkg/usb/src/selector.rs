use common::args::{ArgType, RawArgValue};
use common::errors::*;

use crate::context::{Context, DeviceInfo};

/// Identifies which attached device a CLI invocation should operate on.
///
/// Parsed from a `--usb=BBB:DDD` flag (bus number:device number, matching
/// the numbers `find_device`/`enumerate_devices` print); when absent, the
/// first device matching the configured VID:PID is used.
#[derive(Debug, Clone, Default)]
pub struct DeviceSelector {
    location: Option<(u32, u32)>,
}

impl DeviceSelector {
    pub fn any() -> Self {
        Self { location: None }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (bus, dev) = s
            .split_once(':')
            .ok_or_else(|| err_msg("Expected a 'bus:device' USB selector"))?;
        Ok(Self {
            location: Some((bus.parse()?, dev.parse()?)),
        })
    }

    fn matches(&self, info: &DeviceInfo) -> bool {
        match self.location {
            Some((bus, dev)) => info.bus_num() == bus && info.dev_num() == dev,
            None => true,
        }
    }

    pub async fn find(&self, ctx: &Context, vendor: u16, product: u16) -> Result<Option<DeviceInfo>> {
        for dev in ctx.enumerate_devices().await? {
            if dev.device_descriptor()?.matches(vendor, product) && self.matches(&dev) {
                return Ok(Some(dev));
            }
        }
        Ok(None)
    }
}

impl ArgType for DeviceSelector {
    fn parse_raw_arg(raw_arg: RawArgValue) -> Result<Self> {
        match raw_arg {
            RawArgValue::String(s) => Self::parse(&s),
            RawArgValue::Bool(_) => Err(err_msg("Expected a string USB selector")),
        }
    }

    fn parse_optional_raw_arg(raw_arg: Option<RawArgValue>) -> Result<Self> {
        match raw_arg {
            Some(v) => Self::parse_raw_arg(v),
            None => Ok(Self::any()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bus_device_pair() {
        let sel = DeviceSelector::parse("1:7").unwrap();
        assert_eq!(sel.location, Some((1, 7)));
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(DeviceSelector::parse("17").is_err());
    }
}

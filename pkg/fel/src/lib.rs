//! FEL transport stack and flashing state machine for the Allwinner A20
//! Cubietruck: the AWUSB envelope, FEL-1/FEL-2 command layers, the
//! firmware blob provider, and the orchestrator that drives a board from
//! power-on FEL through a running Stage-2 environment with BOOT0/U-Boot
//! installed.

extern crate common;
extern crate usb;

pub mod awusb;
pub mod blob;
pub mod events;
pub mod fel1;
pub mod fel2;
mod frame;
pub mod orchestrator;
#[cfg(feature = "partition")]
pub mod partition;
pub mod version;

#[cfg(test)]
pub mod testing;

pub use awusb::AwusbError;
pub use blob::{BlobError, BlobProvider, FsBlobProvider};
pub use events::{Event, EventSink};
pub use fel1::Fel1;
pub use fel2::{Direction, Fel2, Target};
pub use frame::FelError;
pub use orchestrator::OrchestratorError;
pub use version::{Chip, VersionRecord};

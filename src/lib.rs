#![cfg_attr(not(test), no_std)]

pub mod card;
pub mod config;
pub mod diskio;
pub mod error;
pub mod transport;

#[cfg(test)]
mod testing;

pub use card::{
    block_address, CapacityMode, CardFailure, CardSession, CardState, CardVersion, ReadyMode,
    SD_SECTOR_SIZE,
};
pub use config::SdSpiConfig;
pub use diskio::{DiskIo, DiskResult, DiskStatus, SdDisk};
pub use error::SdError;
pub use transport::{HalTransport, SelectedBus, SpiTransport};

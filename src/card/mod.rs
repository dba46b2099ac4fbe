use core::fmt::Write;

use heapless::String;

use crate::{config::SdSpiConfig, error::SdError, transport::SpiTransport};

mod command;
mod helpers;
mod init;
mod io;
mod state;

pub use command::{
    frame_command, Ocr, R1, SD_ACMD41, SD_ACMD41_HCS, SD_ACMD42, SD_CMD0, SD_CMD0_CRC, SD_CMD13,
    SD_CMD16, SD_CMD17, SD_CMD24, SD_CMD55, SD_CMD58, SD_CMD8, SD_CMD8_ARG, SD_CMD8_CRC, SD_CMD9,
    SD_DATA_ACCEPTED, SD_DATA_CRC_REJECTED, SD_DATA_RESPONSE_MASK, SD_DATA_WRITE_REJECTED,
    SD_NULL_CRC, SD_START_TOKEN,
};
pub use helpers::{csd_capacity_bytes, csd_sector_count, SD_CSD_SIZE};
pub use state::{CapacityMode, CardFailure, CardState, CardVersion, ReadyMode};

pub const SD_SECTOR_SIZE: usize = 512;

pub type DiagnosticLine = String<64>;

pub fn block_address(capacity: CapacityMode, lba: u32) -> u32 {
    match capacity {
        CapacityMode::HighCapacity => lba,
        CapacityMode::StandardCapacity => lba.saturating_mul(SD_SECTOR_SIZE as u32),
    }
}

pub struct CardSession<T: SpiTransport> {
    spi: T,
    config: SdSpiConfig,
    chip_select: u8,
    version: CardVersion,
    state: CardState,
    last_r1: u8,
    last_data_token: u8,
    last_data_crc: u16,
}

impl<T: SpiTransport> CardSession<T> {
    // The card is untouched until `init`.
    pub fn new(spi: T, chip_select: u8, config: SdSpiConfig) -> Self {
        Self {
            spi,
            config,
            chip_select,
            version: CardVersion::Unknown,
            state: CardState::NotReady,
            last_r1: 0,
            last_data_token: 0,
            last_data_crc: 0,
        }
    }

    pub fn release(self) -> T {
        self.spi
    }

    pub fn transport(&self) -> &T {
        &self.spi
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.spi
    }

    pub fn config(&self) -> &SdSpiConfig {
        &self.config
    }

    pub fn chip_select(&self) -> u8 {
        self.chip_select
    }

    pub fn state(&self) -> CardState {
        self.state
    }

    pub fn version(&self) -> CardVersion {
        self.version
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn capacity_mode(&self) -> Option<CapacityMode> {
        self.state.ready_mode().map(ReadyMode::capacity)
    }

    pub fn last_command_response(&self) -> u8 {
        self.last_r1
    }

    pub fn last_data_token(&self) -> u8 {
        self.last_data_token
    }

    pub fn last_data_crc(&self) -> u16 {
        self.last_data_crc
    }

    pub fn state_str(&self) -> &'static str {
        self.state.label()
    }

    pub fn diagnostic_line(&self) -> DiagnosticLine {
        let mut line = DiagnosticLine::new();
        let _ = write!(
            line,
            "{} r1=0x{:02x} token=0x{:02x}",
            self.state.label(),
            self.last_r1,
            self.last_data_token
        );
        line
    }

    fn ready_mode(&self) -> Result<ReadyMode, SdError<T::Error>> {
        self.state.ready_mode().ok_or(SdError::NotReady)
    }

    fn reset(&mut self) {
        self.version = CardVersion::Unknown;
        self.state = CardState::NotReady;
        self.last_r1 = 0;
        self.last_data_token = 0;
        self.last_data_crc = 0;
    }

    fn fail(&mut self, reason: CardFailure) -> SdError<T::Error> {
        self.state = CardState::Failed(reason);
        log::warn!(
            "sdcard[cs{}]: failed state={} r1=0x{:02x} token=0x{:02x}",
            self.chip_select,
            reason.label(),
            self.last_r1,
            self.last_data_token
        );
        SdError::Card(reason)
    }

    // A transport error still has to land in the session state.
    fn settle<R>(&mut self, result: Result<R, SdError<T::Error>>) -> Result<R, SdError<T::Error>> {
        if let Err(SdError::Transport(err)) = &result {
            log::warn!("sdcard[cs{}]: transport_error={:?}", self.chip_select, err);
            self.state = CardState::Failed(CardFailure::UnknownFail);
        }
        result
    }
}

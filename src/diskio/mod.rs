use bitflags::bitflags;

use crate::{
    card::{CardFailure, CardSession, CardState, SD_SECTOR_SIZE},
    config::SdSpiConfig,
    error::SdError,
    transport::{SpiTransport, SPI_IDLE_BYTE},
};


bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DiskStatus: u8 {
        const NOINIT = 0x01;
        const NODISK = 0x02;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DiskResult {
    Ok = 0,
    Error = 1,
    NotReady = 2,
    ParErr = 3,
}

impl DiskResult {
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl<E> From<SdError<E>> for DiskResult {
    fn from(value: SdError<E>) -> Self {
        match value {
            SdError::NotReady => Self::NotReady,
            SdError::OutOfRange { .. } => Self::ParErr,
            SdError::Transport(_) | SdError::Card(_) => Self::Error,
        }
    }
}

pub trait DiskIo {
    fn initialize(&mut self) -> DiskStatus;

    fn status(&self) -> DiskStatus;

    // Lands in `dest[..count]`.
    fn read_partial(
        &mut self,
        dest: &mut [u8],
        sector: u32,
        offset: usize,
        count: usize,
    ) -> DiskResult;

    fn write_begin(&mut self, sector: u32) -> DiskResult;

    fn write_data(&mut self, data: &[u8], count: usize) -> DiskResult;

    fn write_finish(&mut self) -> DiskResult;

    // Petit-FatFs `disk_writep` argument convention.
    fn write_partial(&mut self, data: Option<&[u8]>, sc: u32) -> DiskResult {
        match data {
            None if sc != 0 => self.write_begin(sc),
            None => self.write_finish(),
            Some(buf) => self.write_data(buf, sc as usize),
        }
    }
}

pub struct SdDisk<T: SpiTransport> {
    card: CardSession<T>,
    pending_sector: Option<u32>,
}

impl<T: SpiTransport> SdDisk<T> {
    pub fn new(spi: T, chip_select: u8, config: SdSpiConfig) -> Self {
        Self::from_session(CardSession::new(spi, chip_select, config))
    }

    pub fn from_session(card: CardSession<T>) -> Self {
        Self {
            card,
            pending_sector: None,
        }
    }

    pub fn card(&self) -> &CardSession<T> {
        &self.card
    }

    pub fn card_mut(&mut self) -> &mut CardSession<T> {
        &mut self.card
    }

    pub fn into_session(self) -> CardSession<T> {
        self.card
    }

    pub fn pending_sector(&self) -> Option<u32> {
        self.pending_sector
    }

    pub fn sector_count(&mut self) -> Result<u32, DiskResult> {
        self.card.sector_count().map_err(DiskResult::from)
    }

    // CMD0 drew no response at all: nothing is driving the data line.
    fn no_card(&self) -> bool {
        self.card.state() == CardState::Failed(CardFailure::Cmd0Fail)
            && self.card.last_command_response() == SPI_IDLE_BYTE
    }
}

impl<T: SpiTransport> DiskIo for SdDisk<T> {
    fn initialize(&mut self) -> DiskStatus {
        self.pending_sector = None;
        match self.card.init() {
            Ok(_) => DiskStatus::empty(),
            Err(err) => {
                log::warn!(
                    "diskio[cs{}]: init_error={:?} state={}",
                    self.card.chip_select(),
                    err,
                    self.card.state_str()
                );
                self.status()
            }
        }
    }

    fn status(&self) -> DiskStatus {
        if self.card.is_ready() {
            DiskStatus::empty()
        } else if self.no_card() {
            DiskStatus::NOINIT | DiskStatus::NODISK
        } else {
            DiskStatus::NOINIT
        }
    }

    fn read_partial(
        &mut self,
        dest: &mut [u8],
        sector: u32,
        offset: usize,
        count: usize,
    ) -> DiskResult {
        let in_sector = offset
            .checked_add(count)
            .is_some_and(|end| end <= SD_SECTOR_SIZE);
        if !in_sector || count > dest.len() {
            return DiskResult::ParErr;
        }
        match self.card.read_block_range(sector, offset, &mut dest[..count]) {
            Ok(()) => DiskResult::Ok,
            Err(err) => err.into(),
        }
    }

    fn write_begin(&mut self, sector: u32) -> DiskResult {
        self.pending_sector = Some(sector);
        DiskResult::Ok
    }

    fn write_data(&mut self, data: &[u8], count: usize) -> DiskResult {
        let Some(sector) = self.pending_sector else {
            return DiskResult::ParErr;
        };
        if count > SD_SECTOR_SIZE || count > data.len() {
            return DiskResult::ParErr;
        }
        match self.card.write_block(sector, &data[..count]) {
            Ok(()) => DiskResult::Ok,
            Err(err) => err.into(),
        }
    }

    fn write_finish(&mut self) -> DiskResult {
        self.pending_sector = None;
        DiskResult::Ok
    }
}

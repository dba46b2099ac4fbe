use super::{
    block_address,
    command::{
        poll_token, recv_r1, send_command, wait_not_busy, SD_ACMD42, SD_CMD13, SD_CMD17,
        SD_CMD24, SD_CMD9, SD_DATA_ACCEPTED, SD_DATA_RESPONSE_MASK, SD_NULL_ARG, SD_NULL_CRC,
        SD_START_TOKEN,
    },
    helpers::{csd_sector_count, register_bits, SD_CSD_SIZE},
    CardFailure, CardSession, SD_SECTOR_SIZE,
};
use crate::{
    error::SdError,
    transport::{SelectedBus, SpiTransport, SPI_IDLE_BYTE},
};

// CRC checking is never enabled on the card, so every value passes.
pub(crate) fn data_crc_accepted(_crc: u16) -> bool {
    true
}

impl<T: SpiTransport> CardSession<T> {
    pub fn read_block(
        &mut self,
        lba: u32,
        out: &mut [u8; SD_SECTOR_SIZE],
    ) -> Result<(), SdError<T::Error>> {
        self.read_block_range(lba, 0, out)
    }

    /// Reads sector `lba` and copies bytes `offset..offset + dest.len()` of it
    /// into `dest`. The whole sector and its CRC are always clocked off the
    /// card; only the requested slice is kept.
    pub fn read_block_range(
        &mut self,
        lba: u32,
        offset: usize,
        dest: &mut [u8],
    ) -> Result<(), SdError<T::Error>> {
        let mode = self.ready_mode()?;
        let end = offset
            .checked_add(dest.len())
            .filter(|end| *end <= SD_SECTOR_SIZE)
            .ok_or(SdError::OutOfRange {
                offset,
                len: dest.len(),
            })?;
        let arg = block_address(mode.capacity(), lba);
        let result = self.read_data_phase(arg, offset, end, dest);
        self.settle(result)
    }

    pub fn write_block(&mut self, lba: u32, data: &[u8]) -> Result<(), SdError<T::Error>> {
        let mode = self.ready_mode()?;
        if data.len() > SD_SECTOR_SIZE {
            return Err(SdError::OutOfRange {
                offset: 0,
                len: data.len(),
            });
        }
        let arg = block_address(mode.capacity(), lba);
        let result = self.write_data_phase(arg, data);
        self.settle(result)
    }

    // CMD13
    pub fn status(&mut self) -> Result<u16, SdError<T::Error>> {
        self.ready_mode()?;
        let mut r2 = [0u8; 2];
        let result = self
            .command_response(SD_CMD13, SD_NULL_ARG, SD_NULL_CRC, &mut r2)
            .map_err(SdError::from);
        self.settle(result)?;
        // High byte is R1.
        if register_bits(&r2, 15, 8) != 0 {
            return Err(self.fail(CardFailure::StatusFail));
        }
        Ok(register_bits(&r2, 15, 0) as u16)
    }

    // CMD9
    pub fn read_csd(&mut self) -> Result<[u8; SD_CSD_SIZE], SdError<T::Error>> {
        self.ready_mode()?;
        let result = self.read_register(SD_CMD9);
        self.settle(result)
    }

    pub fn sector_count(&mut self) -> Result<u32, SdError<T::Error>> {
        let csd = self.read_csd()?;
        match csd_sector_count(&csd) {
            Some(count) => Ok(count),
            None => Err(self.fail(CardFailure::CsdFail)),
        }
    }

    // ACMD42: pull-up on CS/DAT3
    pub fn set_card_detect_pullup(&mut self, connect: bool) -> Result<(), SdError<T::Error>> {
        self.ready_mode()?;
        let result = self
            .app_command(SD_ACMD42, connect as u32, SD_NULL_CRC)
            .map_err(SdError::from);
        let r1 = self.settle(result)?;
        if r1 != 0x00 {
            return Err(self.fail(CardFailure::Acmd42Fail));
        }
        Ok(())
    }

    fn read_data_phase(
        &mut self,
        arg: u32,
        offset: usize,
        end: usize,
        dest: &mut [u8],
    ) -> Result<(), SdError<T::Error>> {
        let ncr_attempts = self.config.ncr_attempts;
        let token_attempts = self.config.read_token_attempts();
        let mut bus = SelectedBus::acquire(&mut self.spi)?;

        send_command(&mut *bus, SD_CMD17, arg, SD_NULL_CRC)?;
        let r1 = recv_r1(&mut *bus, ncr_attempts)?;
        self.last_r1 = r1;
        if r1 != 0x00 {
            drop(bus);
            return Err(self.fail(CardFailure::ReadFailTimeout));
        }

        let token = poll_token(&mut *bus, token_attempts)?;
        self.last_data_token = token;
        if token != SD_START_TOKEN {
            drop(bus);
            return Err(self.fail(CardFailure::ReadFailStart));
        }

        for index in 0..SD_SECTOR_SIZE {
            let byte = bus.recv_byte()?;
            if index >= offset && index < end {
                dest[index - offset] = byte;
            }
        }
        let crc = u16::from_be_bytes([bus.recv_byte()?, bus.recv_byte()?]);
        drop(bus);

        self.last_data_crc = crc;
        if !data_crc_accepted(crc) {
            return Err(self.fail(CardFailure::ReadFailCrc));
        }
        Ok(())
    }

    fn write_data_phase(&mut self, arg: u32, data: &[u8]) -> Result<(), SdError<T::Error>> {
        let ncr_attempts = self.config.ncr_attempts;
        let busy_attempts = self.config.write_busy_attempts();
        let mut bus = SelectedBus::acquire(&mut self.spi)?;

        send_command(&mut *bus, SD_CMD24, arg, SD_NULL_CRC)?;
        let r1 = recv_r1(&mut *bus, ncr_attempts)?;
        self.last_r1 = r1;
        if r1 != 0x00 {
            drop(bus);
            return Err(self.fail(CardFailure::WriteFailCommand));
        }

        // One idle byte between the response and the start token.
        bus.send_byte(SPI_IDLE_BYTE)?;
        bus.send_byte(SD_START_TOKEN)?;
        for index in 0..SD_SECTOR_SIZE {
            bus.send_byte(data.get(index).copied().unwrap_or(0))?;
        }
        // Data CRC16 is ignored in SPI mode unless CRC is explicitly enabled.
        bus.send_byte(SPI_IDLE_BYTE)?;
        bus.send_byte(SPI_IDLE_BYTE)?;

        let token = bus.recv_byte()?;
        self.last_data_token = token;
        if token & SD_DATA_RESPONSE_MASK != SD_DATA_ACCEPTED {
            drop(bus);
            return Err(self.fail(CardFailure::WriteFailData));
        }

        let released = wait_not_busy(&mut *bus, busy_attempts)?;
        drop(bus);
        if !released {
            return Err(self.fail(CardFailure::WriteBusyTimeout));
        }
        Ok(())
    }

    fn read_register(&mut self, index: u8) -> Result<[u8; SD_CSD_SIZE], SdError<T::Error>> {
        let ncr_attempts = self.config.ncr_attempts;
        let token_attempts = self.config.read_token_attempts();
        let mut bus = SelectedBus::acquire(&mut self.spi)?;

        send_command(&mut *bus, index, SD_NULL_ARG, SD_NULL_CRC)?;
        let r1 = recv_r1(&mut *bus, ncr_attempts)?;
        self.last_r1 = r1;
        if r1 != 0x00 {
            drop(bus);
            return Err(self.fail(CardFailure::CsdFail));
        }
        let token = poll_token(&mut *bus, token_attempts)?;
        self.last_data_token = token;
        if token != SD_START_TOKEN {
            drop(bus);
            return Err(self.fail(CardFailure::CsdFail));
        }

        let mut register = [0u8; SD_CSD_SIZE];
        for slot in &mut register {
            *slot = bus.recv_byte()?;
        }
        let crc = u16::from_be_bytes([bus.recv_byte()?, bus.recv_byte()?]);
        drop(bus);
        self.last_data_crc = crc;
        Ok(register)
    }
}

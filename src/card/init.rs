use embedded_hal::spi::MODE_0;

use super::{
    command::{
        recv_r1, recv_response, send_app_command, send_command, Ocr, R1, SD_ACMD41, SD_ACMD41_HCS,
        SD_CMD0, SD_CMD0_CRC, SD_CMD16, SD_CMD58, SD_CMD8, SD_CMD8_ARG, SD_CMD8_CHECK_PATTERN,
        SD_CMD8_CRC, SD_CMD8_VOLTAGE_3V3, SD_NULL_ARG, SD_NULL_CRC,
    },
    CardFailure, CardSession, CardState, CardVersion, ReadyMode, SD_SECTOR_SIZE,
};
use crate::{
    error::SdError,
    transport::{SelectedBus, SpiTransport, SPI_IDLE_BYTE},
};

const R1_IDLE: u8 = R1::IN_IDLE_STATE.bits();
const R1_IDLE_ILLEGAL: u8 = R1::IN_IDLE_STATE.bits() | R1::ILLEGAL_COMMAND.bits();

impl<T: SpiTransport> CardSession<T> {
    // Safe to re-run on a used or failed session.
    pub fn init(&mut self) -> Result<ReadyMode, SdError<T::Error>> {
        self.reset();
        let result = self.handshake();
        self.settle(result)
    }

    fn handshake(&mut self) -> Result<ReadyMode, SdError<T::Error>> {
        self.spi.set_mode(MODE_0)?;
        self.spi.set_clock_frequency(self.config.init_hz)?;
        self.state = CardState::Initializing(CardVersion::Unknown);

        let mut cmd0_r1 = SPI_IDLE_BYTE;
        for _ in 0..self.config.cmd0_attempts.max(1) {
            self.power_up_clocks()?;
            cmd0_r1 = self.command(SD_CMD0, SD_NULL_ARG, SD_CMD0_CRC)?;
            if cmd0_r1 == R1_IDLE {
                break;
            }
        }
        if cmd0_r1 != R1_IDLE {
            return Err(self.fail(CardFailure::Cmd0Fail));
        }

        let mut r7 = [0u8; 5];
        self.command_response(SD_CMD8, SD_CMD8_ARG, SD_CMD8_CRC, &mut r7)?;
        let version = match r7[0] {
            R1_IDLE => {
                if r7[3] & 0x0F != SD_CMD8_VOLTAGE_3V3 {
                    return Err(self.fail(CardFailure::VoltageSetFail));
                }
                if r7[4] != SD_CMD8_CHECK_PATTERN {
                    return Err(self.fail(CardFailure::CheckPatternFail));
                }
                CardVersion::V2
            }
            R1_IDLE_ILLEGAL => CardVersion::V1,
            _ => return Err(self.fail(CardFailure::Cmd8Fail)),
        };
        self.version = version;
        self.state = CardState::Initializing(version);
        log::debug!("sdcard[cs{}]: cmd8 version={:?}", self.chip_select, version);

        self.spi.set_clock_frequency(self.config.data_hz)?;

        let (r1, ocr) = self.read_ocr()?;
        if !R1::is_clean(r1) || !ocr.supports_3v3() {
            return Err(self.fail(CardFailure::VoltageRangeFail));
        }

        let acmd41_arg = match version {
            CardVersion::V2 => SD_ACMD41_HCS,
            _ => SD_NULL_ARG,
        };
        let mut acmd41_ok = false;
        for _ in 0..self.config.acmd41_attempts() {
            if self.app_command(SD_ACMD41, acmd41_arg, SD_NULL_CRC)? == 0x00 {
                acmd41_ok = true;
                break;
            }
        }
        if !acmd41_ok {
            return Err(self.fail(CardFailure::Acmd41Fail));
        }

        let mode = if version == CardVersion::V2 {
            let (r1, ocr) = self.read_ocr()?;
            if r1 != 0x00 || !ocr.contains(Ocr::POWER_UP_STATUS) {
                return Err(self.fail(CardFailure::Cmd58Fail));
            }
            if ocr.contains(Ocr::CARD_CAPACITY_STATUS) {
                ReadyMode::HighCapacityV2
            } else {
                ReadyMode::StandardCapacityV2
            }
        } else {
            let r1 = self.command(SD_CMD16, SD_SECTOR_SIZE as u32, SD_NULL_CRC)?;
            if r1 != 0x00 {
                return Err(self.fail(CardFailure::Cmd16Fail));
            }
            ReadyMode::StandardCapacityV1
        };

        self.state = CardState::Ready(mode);
        self.last_r1 = 0;
        self.last_data_token = 0;
        self.last_data_crc = 0;
        log::debug!("sdcard[cs{}]: ready mode={:?}", self.chip_select, mode);
        Ok(mode)
    }

    fn power_up_clocks(&mut self) -> Result<(), T::Error> {
        self.spi.set_chip_select(self.chip_select, false)?;
        for _ in 0..self.config.power_up_bytes {
            self.spi.send_byte(SPI_IDLE_BYTE)?;
        }
        self.spi.set_chip_select(self.chip_select, true)
    }

    pub(super) fn command(&mut self, index: u8, arg: u32, crc: u8) -> Result<u8, T::Error> {
        let attempts = self.config.ncr_attempts;
        let mut bus = SelectedBus::acquire(&mut self.spi)?;
        send_command(&mut *bus, index, arg, crc)?;
        let r1 = recv_r1(&mut *bus, attempts)?;
        drop(bus);
        self.last_r1 = r1;
        Ok(r1)
    }

    pub(super) fn command_response(
        &mut self,
        index: u8,
        arg: u32,
        crc: u8,
        out: &mut [u8],
    ) -> Result<(), T::Error> {
        let attempts = self.config.ncr_attempts;
        let mut bus = SelectedBus::acquire(&mut self.spi)?;
        send_command(&mut *bus, index, arg, crc)?;
        recv_response(&mut *bus, out, attempts)?;
        drop(bus);
        self.last_r1 = out.first().copied().unwrap_or(SPI_IDLE_BYTE);
        Ok(())
    }

    pub(super) fn app_command(&mut self, index: u8, arg: u32, crc: u8) -> Result<u8, T::Error> {
        let attempts = self.config.ncr_attempts;
        let mut bus = SelectedBus::acquire(&mut self.spi)?;
        let r1 = send_app_command(&mut *bus, index, arg, crc, attempts)?;
        drop(bus);
        self.last_r1 = r1;
        Ok(r1)
    }

    fn read_ocr(&mut self) -> Result<(u8, Ocr), T::Error> {
        let mut r3 = [0u8; 5];
        self.command_response(SD_CMD58, SD_NULL_ARG, SD_NULL_CRC, &mut r3)?;
        Ok((r3[0], Ocr::from_response(&r3)))
    }
}

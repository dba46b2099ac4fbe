use bitflags::bitflags;

use super::helpers::register_bits;
use crate::transport::{SpiTransport, SPI_IDLE_BYTE};

pub const SD_CMD0: u8 = 0;
pub const SD_CMD8: u8 = 8;
pub const SD_CMD9: u8 = 9;
pub const SD_CMD13: u8 = 13;
pub const SD_CMD16: u8 = 16;
pub const SD_CMD17: u8 = 17;
pub const SD_CMD24: u8 = 24;
pub const SD_CMD55: u8 = 55;
pub const SD_CMD58: u8 = 58;
pub const SD_ACMD41: u8 = 41;
pub const SD_ACMD42: u8 = 42;

// Start bit 0, transmission bit 1.
const SD_CMD_PREFIX: u8 = 0x40;
const SD_CMD_INDEX_MASK: u8 = 0x3F;
const SD_CRC_STOP_BIT: u8 = 0x01;

// CRC7 for the two commands a card checks before CRC is switched off; the
// stop bit is ORed in at framing time.
pub const SD_CMD0_CRC: u8 = 0x94;
pub const SD_CMD8_CRC: u8 = 0x86;
pub const SD_NULL_CRC: u8 = 0x00;

pub const SD_NULL_ARG: u32 = 0;
// 2.7-3.6 V supply, 0xAA check pattern
pub const SD_CMD8_ARG: u32 = 0x0000_01AA;
pub const SD_CMD8_VOLTAGE_3V3: u8 = 0x01;
pub const SD_CMD8_CHECK_PATTERN: u8 = 0xAA;
pub const SD_ACMD41_HCS: u32 = 0x4000_0000;

pub const SD_START_TOKEN: u8 = 0xFE;
pub const SD_DATA_RESPONSE_MASK: u8 = 0x1F;
pub const SD_DATA_ACCEPTED: u8 = 0x05;
pub const SD_DATA_CRC_REJECTED: u8 = 0x0B;
pub const SD_DATA_WRITE_REJECTED: u8 = 0x0D;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct R1: u8 {
        const IN_IDLE_STATE = 0x01;
        const ERASE_RESET = 0x02;
        const ILLEGAL_COMMAND = 0x04;
        const COM_CRC_ERROR = 0x08;
        const ERASE_SEQUENCE_ERROR = 0x10;
        const ADDRESS_ERROR = 0x20;
        const PARAMETER_ERROR = 0x40;
    }
}

impl R1 {
    pub fn is_clean(raw: u8) -> bool {
        raw & !Self::IN_IDLE_STATE.bits() == 0
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Ocr: u32 {
        const POWER_UP_STATUS = 1 << 31;
        const CARD_CAPACITY_STATUS = 1 << 30;
        const VDD_33_34 = 1 << 21;
        const VDD_32_33 = 1 << 20;
    }
}

impl Ocr {
    // R3: R1 followed by the 32-bit register.
    pub fn from_response(r3: &[u8; 5]) -> Self {
        Self::from_bits_retain(register_bits(&r3[1..], 31, 0))
    }

    pub fn supports_3v3(self) -> bool {
        self.intersects(Self::VDD_32_33 | Self::VDD_33_34)
    }
}

pub fn frame_command(index: u8, arg: u32, crc: u8) -> [u8; 6] {
    let arg = arg.to_be_bytes();
    [
        SD_CMD_PREFIX | (index & SD_CMD_INDEX_MASK),
        arg[0],
        arg[1],
        arg[2],
        arg[3],
        crc | SD_CRC_STOP_BIT,
    ]
}

pub(crate) fn send_command<T: SpiTransport>(
    bus: &mut T,
    index: u8,
    arg: u32,
    crc: u8,
) -> Result<(), T::Error> {
    for byte in frame_command(index, arg, crc) {
        bus.send_byte(byte)?;
    }
    Ok(())
}

// 0xFF back means no response within `attempts` polls.
pub(crate) fn recv_r1<T: SpiTransport>(bus: &mut T, attempts: u32) -> Result<u8, T::Error> {
    let mut response = SPI_IDLE_BYTE;
    for _ in 0..attempts.max(1) {
        response = bus.recv_byte()?;
        if response != SPI_IDLE_BYTE {
            break;
        }
    }
    Ok(response)
}

// Only the first byte is polled; a timed-out first byte leaves the tail alone.
pub(crate) fn recv_response<T: SpiTransport>(
    bus: &mut T,
    out: &mut [u8],
    attempts: u32,
) -> Result<(), T::Error> {
    let Some((first, rest)) = out.split_first_mut() else {
        return Ok(());
    };
    *first = recv_r1(bus, attempts)?;
    if *first == SPI_IDLE_BYTE {
        return Ok(());
    }
    for slot in rest {
        *slot = bus.recv_byte()?;
    }
    Ok(())
}

pub(crate) fn poll_token<T: SpiTransport>(bus: &mut T, attempts: u32) -> Result<u8, T::Error> {
    recv_r1(bus, attempts)
}

pub(crate) fn wait_not_busy<T: SpiTransport>(bus: &mut T, attempts: u32) -> Result<bool, T::Error> {
    for _ in 0..attempts.max(1) {
        if bus.recv_byte()? != 0x00 {
            return Ok(true);
        }
    }
    Ok(false)
}

// A CMD55 reply with error bits is returned in place of the ACMD response.
pub(crate) fn send_app_command<T: SpiTransport>(
    bus: &mut T,
    index: u8,
    arg: u32,
    crc: u8,
    attempts: u32,
) -> Result<u8, T::Error> {
    send_command(bus, SD_CMD55, SD_NULL_ARG, SD_NULL_CRC)?;
    let prefix = recv_r1(bus, attempts)?;
    if !R1::is_clean(prefix) {
        return Ok(prefix);
    }
    send_command(bus, index, arg, crc)?;
    recv_r1(bus, attempts)
}

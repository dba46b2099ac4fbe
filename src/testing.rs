use std::{
    collections::{HashMap, VecDeque},
    vec,
    vec::Vec,
};

use embedded_hal::spi::Mode;

use crate::{
    card::{CardSession, SD_CSD_SIZE, SD_SECTOR_SIZE, SD_START_TOKEN},
    config::SdSpiConfig,
    transport::SpiTransport,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MockBusError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MockKind {
    Absent,
    V1,
    V2 { high_capacity: bool },
}

enum Phase {
    Command,
    WriteToken { arg: u32 },
    WriteData { arg: u32, buf: Vec<u8> },
}

pub(crate) const MOCK_READ_CRC: [u8; 2] = [0x12, 0x34];
const MOCK_OCR_3V3: u32 = 0x00FF_8000;

// Reacts to frames clocked under force-select, one idle byte before each reply.
pub(crate) struct MockCard {
    pub kind: MockKind,
    pub cmd0_ignored: usize,
    pub acmd41_busy_rounds: usize,
    pub cmd8_echo: Option<(u8, u8)>,
    pub ocr: u32,
    pub ready_ocr: Option<u32>,
    pub r1_override: HashMap<u8, u8>,
    pub read_token: u8,
    pub data_response: u8,
    pub busy_bytes: usize,
    pub stuck_busy: bool,
    pub blocks: HashMap<u32, [u8; SD_SECTOR_SIZE]>,
    pub csd: [u8; SD_CSD_SIZE],
    pub status: [u8; 2],
    pub fail_after: Option<usize>,

    pub mosi: Vec<u8>,
    // (byte, card selected while it shifted)
    pub wire: Vec<(u8, bool)>,
    pub commands: Vec<(u8, u32)>,
    pub written: Vec<(u32, Vec<u8>)>,
    pub clock_hz: Vec<u32>,
    pub mode: Option<Mode>,
    pub chip_select: Option<(u8, bool)>,
    pub forced: bool,
    pub force_count: usize,
    pub deselected_bytes: usize,

    frame: Vec<u8>,
    miso: VecDeque<u8>,
    phase: Phase,
    idle_reply: u8,
    in_idle: bool,
    app_pending: bool,
    transfers: usize,
}

impl MockCard {
    pub fn new(kind: MockKind) -> Self {
        Self {
            kind,
            cmd0_ignored: 0,
            acmd41_busy_rounds: 2,
            cmd8_echo: None,
            ocr: MOCK_OCR_3V3,
            ready_ocr: None,
            r1_override: HashMap::new(),
            read_token: SD_START_TOKEN,
            data_response: 0xE5,
            busy_bytes: 3,
            stuck_busy: false,
            blocks: HashMap::new(),
            csd: [0; SD_CSD_SIZE],
            status: [0x00, 0x00],
            fail_after: None,
            mosi: Vec::new(),
            wire: Vec::new(),
            commands: Vec::new(),
            written: Vec::new(),
            clock_hz: Vec::new(),
            mode: None,
            chip_select: None,
            forced: false,
            force_count: 0,
            deselected_bytes: 0,
            frame: Vec::new(),
            miso: VecDeque::new(),
            phase: Phase::Command,
            idle_reply: 0xFF,
            in_idle: false,
            app_pending: false,
            transfers: 0,
        }
    }

    pub fn high_capacity() -> Self {
        Self::new(MockKind::V2 {
            high_capacity: true,
        })
    }

    pub fn standard_capacity_v2() -> Self {
        Self::new(MockKind::V2 {
            high_capacity: false,
        })
    }

    pub fn v1() -> Self {
        Self::new(MockKind::V1)
    }

    pub fn with_block(mut self, arg: u32, data: [u8; SD_SECTOR_SIZE]) -> Self {
        self.blocks.insert(arg, data);
        self
    }

    pub fn count_commands(&self, index: u8) -> usize {
        self.commands.iter().filter(|(cmd, _)| *cmd == index).count()
    }

    pub fn last_command(&self) -> Option<(u8, u32)> {
        self.commands.last().copied()
    }

    fn selected(&self) -> bool {
        self.forced && matches!(self.chip_select, Some((_, true)))
    }

    fn end_transaction(&mut self) {
        self.frame.clear();
        self.miso.clear();
        self.phase = Phase::Command;
        self.idle_reply = 0xFF;
        self.app_pending = false;
    }

    fn respond(&mut self, bytes: &[u8]) {
        self.miso.push_back(0xFF);
        self.miso.extend(bytes.iter().copied());
    }

    fn on_frame(&mut self, index: u8, arg: u32) {
        self.commands.push((index, arg));
        if self.kind == MockKind::Absent {
            return;
        }
        let app = core::mem::take(&mut self.app_pending);
        if let Some(&r1) = self.r1_override.get(&index) {
            self.respond(&[r1]);
            return;
        }
        let r1_idle = self.in_idle as u8;
        match (index, app) {
            (0, _) => {
                if self.cmd0_ignored > 0 {
                    self.cmd0_ignored -= 1;
                } else {
                    self.in_idle = true;
                    self.respond(&[0x01]);
                }
            }
            (8, _) => match self.kind {
                MockKind::V2 { .. } => {
                    let (voltage, pattern) = self
                        .cmd8_echo
                        .unwrap_or((((arg >> 8) & 0x0F) as u8, arg as u8));
                    self.respond(&[0x01, 0x00, 0x00, voltage, pattern]);
                }
                _ => self.respond(&[0x05]),
            },
            (58, _) => {
                let mut ocr = self.ocr;
                if !self.in_idle {
                    ocr |= 1 << 31;
                    if matches!(
                        self.kind,
                        MockKind::V2 {
                            high_capacity: true
                        }
                    ) {
                        ocr |= 1 << 30;
                    }
                    if let Some(ready_ocr) = self.ready_ocr {
                        ocr = ready_ocr;
                    }
                }
                let b = ocr.to_be_bytes();
                self.respond(&[r1_idle, b[0], b[1], b[2], b[3]]);
            }
            (55, _) => {
                self.app_pending = true;
                self.respond(&[r1_idle]);
            }
            (41, true) => {
                if self.acmd41_busy_rounds > 0 {
                    self.acmd41_busy_rounds -= 1;
                    self.respond(&[0x01]);
                } else {
                    self.in_idle = false;
                    self.respond(&[0x00]);
                }
            }
            (42, true) => self.respond(&[0x00]),
            (16, _) => self.respond(&[r1_idle]),
            (17, _) => {
                self.respond(&[0x00, 0xFF, self.read_token]);
                if self.read_token == SD_START_TOKEN {
                    let block = self.blocks.get(&arg).copied().unwrap_or([0; SD_SECTOR_SIZE]);
                    self.miso.extend(block);
                    self.miso.extend(MOCK_READ_CRC);
                }
            }
            (24, _) => {
                self.respond(&[0x00]);
                self.phase = Phase::WriteToken { arg };
            }
            (9, _) => {
                self.respond(&[0x00, 0xFF, SD_START_TOKEN]);
                let csd = self.csd;
                self.miso.extend(csd);
                self.miso.extend(MOCK_READ_CRC);
            }
            (13, _) => {
                let status = self.status;
                self.respond(&status);
            }
            _ => self.respond(&[r1_idle | 0x04]),
        }
    }

    fn on_write_byte(&mut self, byte: u8) {
        let phase = core::mem::replace(&mut self.phase, Phase::Command);
        self.phase = match phase {
            Phase::WriteToken { arg } if byte == SD_START_TOKEN => Phase::WriteData {
                arg,
                buf: Vec::with_capacity(SD_SECTOR_SIZE + 2),
            },
            Phase::WriteData { arg, mut buf } => {
                buf.push(byte);
                if buf.len() < SD_SECTOR_SIZE + 2 {
                    Phase::WriteData { arg, buf }
                } else {
                    buf.truncate(SD_SECTOR_SIZE);
                    self.finish_write(arg, buf);
                    Phase::Command
                }
            }
            other => other,
        };
    }

    fn finish_write(&mut self, arg: u32, data: Vec<u8>) {
        if self.data_response & 0x1F == 0x05 {
            let mut block = [0u8; SD_SECTOR_SIZE];
            block.copy_from_slice(&data);
            self.blocks.insert(arg, block);
        }
        self.written.push((arg, data));
        self.miso.push_back(self.data_response);
        if self.stuck_busy {
            self.idle_reply = 0x00;
        } else {
            self.miso.extend(vec![0x00; self.busy_bytes]);
        }
    }
}

impl SpiTransport for MockCard {
    type Error = MockBusError;

    fn set_mode(&mut self, mode: Mode) -> Result<(), MockBusError> {
        self.mode = Some(mode);
        Ok(())
    }

    fn set_clock_frequency(&mut self, hz: u32) -> Result<(), MockBusError> {
        self.clock_hz.push(hz);
        Ok(())
    }

    fn set_chip_select(&mut self, index: u8, active: bool) -> Result<(), MockBusError> {
        self.chip_select = Some((index, active));
        Ok(())
    }

    fn set_force_select(&mut self, active: bool) -> Result<(), MockBusError> {
        if active {
            self.force_count += 1;
        } else {
            self.end_transaction();
        }
        self.forced = active;
        Ok(())
    }

    fn transfer(&mut self, byte: u8) -> Result<u8, MockBusError> {
        self.transfers += 1;
        if self.fail_after.is_some_and(|limit| self.transfers > limit) {
            return Err(MockBusError);
        }
        self.mosi.push(byte);
        self.wire.push((byte, self.selected()));
        if !self.selected() {
            if !matches!(self.chip_select, Some((_, true))) {
                self.deselected_bytes += 1;
            }
            return Ok(0xFF);
        }

        let reply = self.miso.pop_front().unwrap_or(self.idle_reply);
        if !matches!(self.phase, Phase::Command) {
            self.on_write_byte(byte);
            return Ok(reply);
        }
        if self.frame.is_empty() && byte & 0xC0 != 0x40 {
            return Ok(reply);
        }
        self.frame.push(byte);
        if self.frame.len() == 6 {
            let index = self.frame[0] & 0x3F;
            let arg = u32::from_be_bytes([self.frame[1], self.frame[2], self.frame[3], self.frame[4]]);
            self.frame.clear();
            self.on_frame(index, arg);
        }
        Ok(reply)
    }
}

// Short enough budgets for mocks that never answer.
pub(crate) fn test_config() -> SdSpiConfig {
    SdSpiConfig::new()
        .with_init_hz(400_000)
        .with_data_hz(800_000)
        .with_acmd41_timeout_ms(20)
        .with_read_timeout_ms(5)
        .with_write_timeout_ms(5)
}

pub(crate) fn ready_session(mock: MockCard) -> CardSession<MockCard> {
    let mut session = CardSession::new(mock, 0, test_config());
    session.init().unwrap();
    session
}

pub(crate) fn pattern_block(seed: u8) -> [u8; SD_SECTOR_SIZE] {
    let mut block = [0u8; SD_SECTOR_SIZE];
    for (index, byte) in block.iter_mut().enumerate() {
        *byte = (index as u8).wrapping_mul(7).wrapping_add(seed);
    }
    block
}

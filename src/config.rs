pub const SD_INIT_SPI_RATE_HZ: u32 = 400_000;
pub const SD_DATA_SPI_RATE_HZ: u32 = 20_000_000;
pub const SD_POWER_UP_BYTES: usize = 10;
pub const SD_NCR_ATTEMPTS: u32 = 8;
pub const SD_CMD0_ATTEMPTS: u32 = 10;
pub const SD_ACMD41_TIMEOUT_MS: u32 = 1_000;
pub const SD_READ_TIMEOUT_MS: u32 = 100;
pub const SD_WRITE_TIMEOUT_MS: u32 = 500;

// CMD55 + ACMD41 frames, each with up to `SD_NCR_ATTEMPTS` polled response bytes.
const ACMD41_ROUND_BYTES: u32 = 2 * (6 + SD_NCR_ATTEMPTS);

pub const fn bytes_for_ms(hz: u32, ms: u32) -> u32 {
    let per_ms = hz / 8 / 1000;
    let total = per_ms.saturating_mul(ms);
    if total == 0 {
        1
    } else {
        total
    }
}

// Millisecond budgets become poll counts at the clock the loop runs at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SdSpiConfig {
    pub init_hz: u32,
    pub data_hz: u32,
    pub power_up_bytes: usize,
    pub ncr_attempts: u32,
    pub cmd0_attempts: u32,
    pub acmd41_timeout_ms: u32,
    pub read_timeout_ms: u32,
    pub write_timeout_ms: u32,
}

impl SdSpiConfig {
    pub const fn new() -> Self {
        Self {
            init_hz: SD_INIT_SPI_RATE_HZ,
            data_hz: SD_DATA_SPI_RATE_HZ,
            power_up_bytes: SD_POWER_UP_BYTES,
            ncr_attempts: SD_NCR_ATTEMPTS,
            cmd0_attempts: SD_CMD0_ATTEMPTS,
            acmd41_timeout_ms: SD_ACMD41_TIMEOUT_MS,
            read_timeout_ms: SD_READ_TIMEOUT_MS,
            write_timeout_ms: SD_WRITE_TIMEOUT_MS,
        }
    }

    pub const fn with_init_hz(mut self, hz: u32) -> Self {
        self.init_hz = hz;
        self
    }

    pub const fn with_data_hz(mut self, hz: u32) -> Self {
        self.data_hz = hz;
        self
    }

    pub const fn with_ncr_attempts(mut self, attempts: u32) -> Self {
        self.ncr_attempts = attempts;
        self
    }

    pub const fn with_cmd0_attempts(mut self, attempts: u32) -> Self {
        self.cmd0_attempts = attempts;
        self
    }

    pub const fn with_acmd41_timeout_ms(mut self, ms: u32) -> Self {
        self.acmd41_timeout_ms = ms;
        self
    }

    pub const fn with_read_timeout_ms(mut self, ms: u32) -> Self {
        self.read_timeout_ms = ms;
        self
    }

    pub const fn with_write_timeout_ms(mut self, ms: u32) -> Self {
        self.write_timeout_ms = ms;
        self
    }

    pub const fn read_token_attempts(&self) -> u32 {
        bytes_for_ms(self.data_hz, self.read_timeout_ms)
    }

    pub const fn write_busy_attempts(&self) -> u32 {
        bytes_for_ms(self.data_hz, self.write_timeout_ms)
    }

    pub const fn acmd41_attempts(&self) -> u32 {
        let rounds = bytes_for_ms(self.data_hz, self.acmd41_timeout_ms) / ACMD41_ROUND_BYTES;
        if rounds == 0 {
            1
        } else {
            rounds
        }
    }
}

impl Default for SdSpiConfig {
    fn default() -> Self {
        Self::new()
    }
}

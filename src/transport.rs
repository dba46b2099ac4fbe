use core::{
    fmt::Debug,
    ops::{Deref, DerefMut},
};

use embedded_hal::{
    digital::OutputPin,
    spi::{ErrorType, Mode, SpiBus},
};

pub const SPI_IDLE_BYTE: u8 = 0xFF;

// Upper bound on FIFO drain polls before the select line is released.
const FIFO_DRAIN_POLLS: u32 = 1_024;

// `set_chip_select` picks the slave-select line, `set_force_select` asserts it.
// Bytes clocked while select is not forced reach no card.
pub trait SpiTransport {
    type Error: Debug;

    fn set_mode(&mut self, mode: Mode) -> Result<(), Self::Error>;

    fn set_clock_frequency(&mut self, hz: u32) -> Result<(), Self::Error>;

    fn set_chip_select(&mut self, index: u8, active: bool) -> Result<(), Self::Error>;

    fn set_force_select(&mut self, active: bool) -> Result<(), Self::Error>;

    fn transfer(&mut self, byte: u8) -> Result<u8, Self::Error>;

    fn fifo_busy(&self) -> bool {
        false
    }

    fn send_byte(&mut self, value: u8) -> Result<(), Self::Error> {
        self.transfer(value).map(|_| ())
    }

    fn recv_byte(&mut self) -> Result<u8, Self::Error> {
        self.transfer(SPI_IDLE_BYTE)
    }
}

// Drop: drain the FIFO, release select, then one idle byte with select high.
pub struct SelectedBus<'a, T: SpiTransport> {
    bus: &'a mut T,
}

impl<'a, T: SpiTransport> SelectedBus<'a, T> {
    pub fn acquire(bus: &'a mut T) -> Result<Self, T::Error> {
        bus.set_force_select(true)?;
        Ok(Self { bus })
    }
}

impl<T: SpiTransport> Deref for SelectedBus<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.bus
    }
}

impl<T: SpiTransport> DerefMut for SelectedBus<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.bus
    }
}

impl<T: SpiTransport> Drop for SelectedBus<'_, T> {
    fn drop(&mut self) {
        let mut polls = 0;
        while self.bus.fifo_busy() && polls < FIFO_DRAIN_POLLS {
            polls += 1;
        }
        let _ = self.bus.set_force_select(false);
        let _ = self.bus.send_byte(SPI_IDLE_BYTE);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalTransportError<S, P> {
    Spi(S),
    Pin(P),
}

// embedded-hal has no portable way to change mode or clock rate.
pub type BusReconfigure<S> = fn(&mut S, Mode, u32) -> Result<(), <S as ErrorType>::Error>;

/// [`SpiTransport`] over an embedded-hal bus and a GPIO chip-select pin.
///
/// The pin serves a single card, so the slave-select index is not decoded.
/// The pin is low only while the line is both selected and forced.
pub struct HalTransport<S, P>
where
    S: SpiBus,
    P: OutputPin,
{
    spi: S,
    cs: P,
    reconfigure: BusReconfigure<S>,
    mode: Mode,
    hz: u32,
    selected: bool,
    forced: bool,
}

impl<S, P> HalTransport<S, P>
where
    S: SpiBus,
    P: OutputPin,
{
    pub fn new(
        spi: S,
        mut cs: P,
        mode: Mode,
        reconfigure: BusReconfigure<S>,
    ) -> Result<Self, HalTransportError<S::Error, P::Error>> {
        cs.set_high().map_err(HalTransportError::Pin)?;
        Ok(Self {
            spi,
            cs,
            reconfigure,
            mode,
            hz: 0,
            selected: false,
            forced: false,
        })
    }

    pub fn release(self) -> (S, P) {
        (self.spi, self.cs)
    }

    fn apply(&mut self) -> Result<(), HalTransportError<S::Error, P::Error>> {
        if self.hz == 0 {
            return Ok(());
        }
        (self.reconfigure)(&mut self.spi, self.mode, self.hz).map_err(HalTransportError::Spi)
    }
}

impl<S, P> SpiTransport for HalTransport<S, P>
where
    S: SpiBus,
    P: OutputPin,
{
    type Error = HalTransportError<S::Error, P::Error>;

    fn set_mode(&mut self, mode: Mode) -> Result<(), Self::Error> {
        self.mode = mode;
        self.apply()
    }

    fn set_clock_frequency(&mut self, hz: u32) -> Result<(), Self::Error> {
        self.hz = hz;
        self.apply()
    }

    fn set_chip_select(&mut self, _index: u8, active: bool) -> Result<(), Self::Error> {
        self.selected = active;
        if !active {
            self.cs.set_high().map_err(HalTransportError::Pin)?;
        } else if self.forced {
            self.cs.set_low().map_err(HalTransportError::Pin)?;
        }
        Ok(())
    }

    fn set_force_select(&mut self, active: bool) -> Result<(), Self::Error> {
        self.forced = active;
        if active && self.selected {
            self.cs.set_low().map_err(HalTransportError::Pin)
        } else {
            self.spi.flush().map_err(HalTransportError::Spi)?;
            self.cs.set_high().map_err(HalTransportError::Pin)
        }
    }

    fn transfer(&mut self, byte: u8) -> Result<u8, Self::Error> {
        let mut frame = [byte];
        self.spi
            .transfer_in_place(&mut frame)
            .and_then(|_| self.spi.flush())
            .map_err(HalTransportError::Spi)?;
        Ok(frame[0])
    }
}

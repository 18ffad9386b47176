//! Hardware transport: the byte-oriented bus the packed frame is shifted
//! out on, and the XLAT/BLANK latch pins. A narrow transport trait plus a
//! concrete `embedded-hal`-backed blanket implementation, so the core can
//! be tested against a mock without ever touching real hardware.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::frame::FRAME_LEN;

/// Transport for one packed 36-byte frame.
pub trait Bus {
    type Error;

    fn write_frame(&mut self, frame: &[u8; FRAME_LEN]) -> Result<(), Self::Error>;
}

impl<SPI, E> Bus for SPI
where
    SPI: SpiBus<u8, Error = E>,
{
    type Error = E;

    fn write_frame(&mut self, frame: &[u8; FRAME_LEN]) -> Result<(), Self::Error> {
        self.write(frame)
    }
}

/// XLAT/BLANK control implementing the shift register's latch protocol:
/// pulse XLAT low-then-high after a frame write; drive BLANK to suppress
/// output while asserted.
pub trait Latch {
    type Error;

    fn pulse_xlat(&mut self) -> Result<(), Self::Error>;
    fn set_blank(&mut self, asserted: bool) -> Result<(), Self::Error>;
}

/// A [`Latch`] built from a pair of `embedded-hal` output pins.
pub struct OutputPinLatch<XLAT, BLANK> {
    xlat: XLAT,
    blank: BLANK,
}

impl<XLAT, BLANK> OutputPinLatch<XLAT, BLANK> {
    pub fn new(xlat: XLAT, blank: BLANK) -> Self {
        Self { xlat, blank }
    }

    pub fn release(self) -> (XLAT, BLANK) {
        (self.xlat, self.blank)
    }
}

impl<XLAT, BLANK, E> Latch for OutputPinLatch<XLAT, BLANK>
where
    XLAT: OutputPin<Error = E>,
    BLANK: OutputPin<Error = E>,
{
    type Error = E;

    fn pulse_xlat(&mut self) -> Result<(), Self::Error> {
        self.xlat.set_low()?;
        self.xlat.set_high()
    }

    fn set_blank(&mut self, asserted: bool) -> Result<(), Self::Error> {
        if asserted {
            self.blank.set_high()
        } else {
            self.blank.set_low()
        }
    }
}

//! The public-facing facade: ties the lifetime manager, compositor and
//! color pipeline to a concrete bus and latch, and exposes the driver's
//! tick/mutator/query API.

use alloc::vec::Vec;

use crate::color::{GamutMatrix, HexColor, Rgb12, Rgb8, WhiteBalance};
use crate::frame::{self, FRAME_LEN, NUM_LEDS};
use crate::interface::{Bus, Latch};
use crate::lifetime::{self, Manager};
use crate::Error;

/// Handle to a live pattern, stable until deleted. `0` is never issued.
pub type PatternId = u16;

/// A validated logical LED index, `1..=8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalLed(u8);


impl LogicalLed {
    pub fn new<BusE>(index: u8) -> Result<Self, Error<BusE>> {
        if (1..=NUM_LEDS as u8).contains(&index) {
            Ok(Self(index))
        } else {
            Err(Error::TypeMismatch)
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// One or more logical LEDs a pattern should be layered onto, validated at
/// construction: a raw index wrapped behind a constructor that rejects
/// out-of-range values rather than checking them at every call site.
#[derive(Debug)]
pub struct LedSelector {
    leds: Vec<u8>,
}

impl LedSelector {
    pub fn single<BusE>(index: u8) -> Result<Self, Error<BusE>> {
        let led = LogicalLed::new::<BusE>(index)?;
        Ok(Self {
            leds: alloc::vec![led.get()],
        })
    }

    pub fn many<BusE>(indices: &[u8]) -> Result<Self, Error<BusE>> {
        let mut leds = Vec::new();
        leds.try_reserve_exact(indices.len())
            .map_err(|_| Error::AllocationFailure)?;
        for &index in indices {
            LogicalLed::new::<BusE>(index)?;
            leds.push(index);
        }
        Ok(Self { leds })
    }

    fn as_slice(&self) -> &[u8] {
        &self.leds
    }
}

/// Initial values a [`Driver`] is constructed with — grounded in the
/// teacher's `Configuration` builder struct.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverConfig {
    pub white_balance: [f32; 3],
    pub gamut: [[f32; 3]; 3],
    pub id_map: [i8; NUM_LEDS],
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            white_balance: [1.0, 1.0, 1.0],
            gamut: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            id_map: [0, 1, 2, 3, 4, 5, 6, 7],
        }
    }
}

/// Ties the pattern core to a concrete transport. `BUS` carries the bus's
/// own error type through every fallible non-hardware-facing method
/// (`set`, `replace`, `get`, the configuration setters); `blank` surfaces
/// `LATCH`'s error type instead, since it is the one method that actually
/// drives the latch pin.
pub struct Driver<BUS, LATCH> {
    bus: BUS,
    latch: LATCH,
    manager: Manager,
    colors: [Rgb12; NUM_LEDS],
    frame: [u8; FRAME_LEN],
    frame_dirty: bool,
    blanked: bool,
}

impl<BUS, LATCH> Driver<BUS, LATCH>
where
    BUS: Bus,
    LATCH: Latch,
{
    pub fn new(bus: BUS, latch: LATCH, config: DriverConfig) -> Self {
        let gamut = GamutMatrix::from_raw::<BUS::Error>(config.gamut).unwrap_or(GamutMatrix::IDENTITY);
        let manager = Manager::new(
            WhiteBalance::from_raw(config.white_balance),
            gamut,
            config.id_map,
        );

        Self {
            bus,
            latch,
            manager,
            colors: [Rgb12::BLACK; NUM_LEDS],
            frame: [0u8; FRAME_LEN],
            frame_dirty: false,
            blanked: false,
        }
    }

    /// Step every pattern, recompute and repack the frame if anything
    /// changed, then transmit and latch it if it differs from what's
    /// already on the wire. A no-op while a mutator holds the tick guard,
    /// or while `blank(true)` is in effect.
    pub fn tick(&mut self) {
        if self.manager.guard_held() {
            defmt::trace!("tick skipped: mutator guard held");
            return;
        }

        if self.manager.step_all() {
            self.colors = self.manager.compose();
            let packed = frame::pack(&self.colors);
            if packed != self.frame {
                self.frame = packed;
                self.frame_dirty = true;
            }
        }

        if self.frame_dirty && !self.blanked {
            match self.bus.write_frame(&self.frame) {
                Ok(()) => match self.latch.pulse_xlat() {
                    Ok(()) => self.frame_dirty = false,
                    Err(_) => defmt::warn!("latch pulse failed, frame not marked transmitted"),
                },
                Err(_) => defmt::warn!("bus write_frame failed"),
            }
        }
    }

    /// Drive the BLANK line. While asserted, `tick` skips transmission.
    pub fn blank(&mut self, enabled: bool) -> Result<(), Error<LATCH::Error>> {
        self.latch.set_blank(enabled).map_err(Error::Bus)?;
        self.blanked = enabled;
        Ok(())
    }

    pub fn set(&mut self, leds: LedSelector, pattern: &str) -> Result<PatternId, Error<BUS::Error>> {
        let tokens = lifetime::parse_pattern::<BUS::Error>(pattern)?;
        let id = self.manager.set::<BUS::Error>(leds.as_slice(), tokens)?;
        defmt::debug!("pattern {} set", id);
        Ok(id)
    }

    pub fn replace(
        &mut self,
        id: PatternId,
        pattern: &str,
    ) -> Result<PatternId, Error<BUS::Error>> {
        let tokens = lifetime::parse_pattern::<BUS::Error>(pattern)?;
        self.manager.replace::<BUS::Error>(id, tokens)
    }

    pub fn delete(&mut self, id: PatternId) -> bool {
        let found = self.manager.delete(id);
        if found {
            defmt::debug!("pattern {} deleted", id);
        }
        found
    }

    pub fn exists(&self, id: PatternId) -> bool {
        self.manager.exists(id)
    }

    /// Format the current 8-bit-truncated frame contents for `led`.
    pub fn get(&self, led: LogicalLed) -> Result<HexColor, Error<BUS::Error>> {
        let channel = self.manager.physical_channel::<BUS::Error>(led.get())?;
        Ok(HexColor::from_rgb8(self.colors[channel].to_rgb8()))
    }

    pub fn set_white_balance(&mut self, wb: [f32; 3]) -> Result<(), Error<BUS::Error>> {
        self.manager.set_white_balance(wb);
        Ok(())
    }

    pub fn set_gamut(&mut self, m: [[f32; 3]; 3]) -> Result<(), Error<BUS::Error>> {
        self.manager.set_gamut::<BUS::Error>(m)
    }

    pub fn set_id_map(&mut self, map: [i8; NUM_LEDS]) -> Result<(), Error<BUS::Error>> {
        self.manager.set_id_map::<BUS::Error>(map)
    }

    pub fn release(self) -> (BUS, LATCH) {
        (self.bus, self.latch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::mock::{BusAccess, LatchAccess, MockBus, MockLatch};

    fn driver(bus: MockBus, latch: MockLatch) -> Driver<MockBus, MockLatch> {
        Driver::new(bus, latch, DriverConfig::default())
    }

    #[test]
    fn set_then_tick_transmits_and_latches() {
        let mut d = driver(
            MockBus::new(alloc::vec![]),
            MockLatch::new(alloc::vec![]),
        );
        let selector = LedSelector::single::<()>(1).unwrap();
        d.set(selector, "#FFFF00;").unwrap();

        let expected_colors = {
            let mut colors = [Rgb12::BLACK; NUM_LEDS];
            colors[0] = Rgb12::new(4095, 4095, 0);
            colors
        };
        let expected_frame = frame::pack(&expected_colors).to_vec();

        d.bus = MockBus::new(alloc::vec![BusAccess::WriteFrame(expected_frame)]);
        d.latch = MockLatch::new(alloc::vec![LatchAccess::Pulse]);

        d.tick();

        d.bus.done();
        d.latch.done();
    }

    #[test]
    fn blank_suppresses_transmit() {
        let mut d = driver(MockBus::new(alloc::vec![]), MockLatch::new(alloc::vec![]));
        d.latch = MockLatch::new(alloc::vec![LatchAccess::SetBlank(true)]);
        d.blank(true).unwrap();
        d.latch.done();

        let selector = LedSelector::single::<()>(1).unwrap();
        d.set(selector, "#FFFF00;").unwrap();

        // Blanked: tick must not touch the bus or pulse the latch.
        d.bus = MockBus::new(alloc::vec![]);
        d.latch = MockLatch::new(alloc::vec![]);
        d.tick();
        d.bus.done();
        d.latch.done();
    }

    #[test]
    fn get_reports_current_color_after_tick() {
        let mut d = driver(MockBus::new(alloc::vec![]), MockLatch::new(alloc::vec![]));
        let selector = LedSelector::single::<()>(1).unwrap();
        d.set(selector, "#FF00AA;").unwrap();

        d.bus = MockBus::new(alloc::vec![BusAccess::WriteFrame(
            frame::pack(&{
                let mut colors = [Rgb12::BLACK; NUM_LEDS];
                colors[0] = Rgb8::new(0xff, 0x00, 0xaa).to_rgb12();
                colors
            })
            .to_vec(),
        )]);
        d.latch = MockLatch::new(alloc::vec![LatchAccess::Pulse]);
        d.tick();

        let led = LogicalLed::new::<()>(1).unwrap();
        assert_eq!(d.get(led).unwrap().as_str(), "#FF00AA");
    }

    #[test]
    fn led_selector_rejects_out_of_range_index() {
        let result: Result<LedSelector, Error<()>> = LedSelector::single(9);
        assert_eq!(result.err(), Some(Error::TypeMismatch));
    }
}

//! Pattern list, id allocation, per-LED maps and configuration state —
//! everything `tick` and the mutator API share, guarded against observing
//! a half-grown list or a half-resolved jump target.

use alloc::vec::Vec;

use crate::color::{GamutMatrix, WhiteBalance};
use crate::compositor;
use crate::frame::NUM_LEDS;
use crate::lang::{self, Token};
use crate::vm::{Pattern, StepOutcome, TerminationReason};
use crate::Error;

/// Identity id-remap table: logical LED `n` (1-based) maps to physical
/// channel `n - 1`.
fn identity_id_map() -> [i8; NUM_LEDS] {
    [0, 1, 2, 3, 4, 5, 6, 7]
}

/// Owns the pattern list, the per-LED id stacks, the id-remap table and the
/// color-correction matrices. Everything here is mutated only while
/// `guard_depth` transitions 0 -> 1 -> 0 around one mutator call; `tick`
/// checks `guard_depth == 0` before stepping patterns.
pub struct Manager {
    patterns: Vec<Pattern>,
    next_id: u16,
    led_maps: [Vec<u16>; NUM_LEDS],
    id_map: [i8; NUM_LEDS],
    white_balance: WhiteBalance,
    gamut: GamutMatrix,
    guard_depth: u32,
}

impl Manager {
    pub fn new(white_balance: WhiteBalance, gamut: GamutMatrix, id_map: [i8; NUM_LEDS]) -> Self {
        Self {
            patterns: Vec::new(),
            next_id: 1,
            led_maps: Default::default(),
            id_map,
            white_balance,
            gamut,
            guard_depth: 0,
        }
    }

    pub fn guard_held(&self) -> bool {
        self.guard_depth != 0
    }

    fn allocate_id(&mut self) -> u16 {
        let id = self.next_id;
        self.next_id = if self.next_id == u16::MAX {
            1
        } else {
            self.next_id + 1
        };
        id
    }

    fn translate<BusE>(&self, logical: u8) -> Result<usize, Error<BusE>> {
        let raw = self.id_map[logical as usize - 1];
        if raw < 0 {
            Err(Error::LedNotInMap)
        } else {
            Ok(raw as usize)
        }
    }

    /// Create a new pattern from already-parsed tokens, appending its id to
    /// every LED in `leds`. Rolls back to no-op on any failure after the
    /// pattern list push — a failed `set` leaves no pattern and no map
    /// entry, per the crate's rollback policy.
    pub fn set<BusE>(&mut self, leds: &[u8], tokens: Vec<Token>) -> Result<u16, Error<BusE>> {
        self.guard_depth += 1;
        let result = self.set_guarded::<BusE>(leds, tokens);
        self.guard_depth -= 1;
        result
    }

    fn set_guarded<BusE>(&mut self, leds: &[u8], tokens: Vec<Token>) -> Result<u16, Error<BusE>> {
        let id = self.allocate_id();

        self.patterns
            .try_reserve(1)
            .map_err(|_| Error::AllocationFailure)?;
        self.patterns.push(Pattern::new(id, tokens));

        let mut appended: Vec<usize> = Vec::new();
        for &logical in leds {
            let channel = match self.translate::<BusE>(logical) {
                Ok(channel) => channel,
                Err(e) => {
                    self.rollback_set(id, &appended);
                    return Err(e);
                }
            };
            if self.led_maps[channel].try_reserve(1).is_err() {
                self.rollback_set(id, &appended);
                return Err(Error::AllocationFailure);
            }
            self.led_maps[channel].push(id);
            appended.push(channel);
        }

        Ok(id)
    }

    fn rollback_set(&mut self, id: u16, appended: &[usize]) {
        for &channel in appended {
            if let Some(pos) = self.led_maps[channel].iter().rposition(|&x| x == id) {
                self.led_maps[channel].remove(pos);
            }
        }
        self.patterns.retain(|p| p.id() != id);
    }

    /// Reinitialize the pattern with `id` in place, keeping its id and its
    /// entries in every LED's map. Errors with [`Error::InvalidPatternId`]
    /// if no live pattern has that id.
    pub fn replace<BusE>(&mut self, id: u16, tokens: Vec<Token>) -> Result<u16, Error<BusE>> {
        self.guard_depth += 1;
        let result = match self.patterns.iter_mut().find(|p| p.id() == id) {
            Some(pattern) => {
                pattern.reinit(tokens);
                Ok(id)
            }
            None => Err(Error::InvalidPatternId),
        };
        self.guard_depth -= 1;
        result
    }

    /// Remove `id` from every LED's map and from the pattern list. Returns
    /// whether anything was found.
    pub fn delete(&mut self, id: u16) -> bool {
        self.guard_depth += 1;
        let mut found = false;

        for stack in self.led_maps.iter_mut() {
            let before = stack.len();
            stack.retain(|&x| x != id);
            if stack.len() != before {
                found = true;
            }
        }

        let before = self.patterns.len();
        self.patterns.retain(|p| p.id() != id);
        if self.patterns.len() != before {
            found = true;
        }

        self.guard_depth -= 1;
        found
    }

    pub fn exists(&self, id: u16) -> bool {
        self.patterns.iter().any(|p| p.id() == id)
    }

    /// Step every pattern by one tick, cascade-deleting any that
    /// terminate. Returns whether the compositor should recompute the
    /// frame.
    pub fn step_all(&mut self) -> bool {
        let mut dirty = false;
        let mut terminated: Vec<u16> = Vec::new();

        for pattern in self.patterns.iter_mut() {
            match pattern.step(&self.white_balance, &self.gamut) {
                StepOutcome::Yielded { dirty: d } => dirty |= d,
                StepOutcome::Terminated(reason) => {
                    if reason != TerminationReason::EndOfTokens {
                        defmt::warn!(
                            "pattern {} terminated fatally: {}",
                            pattern.id(),
                            defmt::Debug2Format(&reason)
                        );
                    }
                    terminated.push(pattern.id());
                    dirty = true;
                }
            }
        }

        for id in terminated {
            self.delete(id);
        }

        dirty
    }

    /// Resolve all 8 LEDs' stacks into the colors the frame packer should
    /// pack next.
    pub fn compose(&self) -> [crate::color::Rgb12; NUM_LEDS] {
        let lookup = |id: u16| {
            self.patterns
                .iter()
                .find(|p| p.id() == id)
                .map(|p| (p.current_color(), p.visible()))
        };
        compositor::compose_frame(&self.led_maps, lookup)
    }

    pub fn white_balance(&self) -> WhiteBalance {
        self.white_balance
    }

    pub fn gamut(&self) -> GamutMatrix {
        self.gamut
    }

    pub fn set_white_balance(&mut self, raw: [f32; 3]) {
        self.guard_depth += 1;
        self.white_balance = WhiteBalance::from_raw(raw);
        self.guard_depth -= 1;
    }

    pub fn set_gamut<BusE>(&mut self, raw: [[f32; 3]; 3]) -> Result<(), Error<BusE>> {
        self.guard_depth += 1;
        let result = match GamutMatrix::from_raw::<BusE>(raw) {
            Ok(matrix) => {
                self.gamut = matrix;
                Ok(())
            }
            Err(e) => {
                self.gamut = GamutMatrix::IDENTITY;
                Err(e)
            }
        };
        self.guard_depth -= 1;
        result
    }

    pub fn set_id_map<BusE>(&mut self, raw: [i8; NUM_LEDS]) -> Result<(), Error<BusE>> {
        self.guard_depth += 1;
        let valid = raw.iter().all(|&v| v == -1 || (0..NUM_LEDS as i8).contains(&v));
        let result = if valid {
            self.id_map = raw;
            Ok(())
        } else {
            self.id_map = identity_id_map();
            Err(Error::TypeMismatch)
        };
        self.guard_depth -= 1;
        result
    }

    pub fn physical_channel<BusE>(&self, logical: u8) -> Result<usize, Error<BusE>> {
        self.translate(logical)
    }
}

/// Parse `src` into a fresh token array. Shared by `Driver::set` and
/// `Driver::replace` so both validate identically before ever touching the
/// pattern list.
pub fn parse_pattern<BusE>(src: &str) -> Result<Vec<Token>, Error<BusE>> {
    lang::parse::<BusE>(src)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb12;

    fn manager() -> Manager {
        Manager::new(WhiteBalance::IDENTITY, GamutMatrix::IDENTITY, identity_id_map())
    }

    #[test]
    fn set_then_exists_then_delete() {
        let mut m = manager();
        let tokens = parse_pattern::<()>("#FFFF00;").unwrap();
        let id: u16 = m.set::<()>(&[1], tokens).unwrap();

        assert!(m.exists(id));
        assert!(m.delete(id));
        assert!(!m.exists(id));
        assert!(!m.delete(id));
    }

    #[test]
    fn set_on_unmapped_led_rolls_back() {
        let mut m = manager();
        m.set_id_map::<()>([0, 1, 2, 3, 4, 5, 6, -1]).unwrap();
        let tokens = parse_pattern::<()>("#FFFF00;").unwrap();

        let result: Result<u16, Error<()>> = m.set(&[8], tokens);
        assert_eq!(result, Err(Error::LedNotInMap));
        assert_eq!(m.patterns.len(), 0);
    }

    #[test]
    fn replace_keeps_id_and_resets_state() {
        let mut m = manager();
        let tokens = parse_pattern::<()>("#FFFF00;").unwrap();
        let id: u16 = m.set::<()>(&[1], tokens).unwrap();

        let new_tokens = parse_pattern::<()>("#0000FF;").unwrap();
        let replaced: u16 = m.replace::<()>(id, new_tokens).unwrap();
        assert_eq!(replaced, id);
        assert!(m.exists(id));
    }

    #[test]
    fn replace_unknown_id_errors() {
        let mut m = manager();
        let tokens = parse_pattern::<()>("#FFFF00;").unwrap();
        let result: Result<u16, Error<()>> = m.replace(999, tokens);
        assert_eq!(result, Err(Error::InvalidPatternId));
    }

    #[test]
    fn step_all_composes_color_after_one_tick() {
        let mut m = manager();
        let tokens = parse_pattern::<()>("#FFFF00;").unwrap();
        m.set::<()>(&[1], tokens).unwrap();

        m.step_all();
        let colors = m.compose();
        assert_eq!(colors[0], Rgb12::new(4095, 4095, 0));
    }

    #[test]
    fn finite_pattern_is_removed_after_running_off_tokens() {
        let mut m = manager();
        let tokens = parse_pattern::<()>("#FF0000").unwrap();
        let id: u16 = m.set::<()>(&[1], tokens).unwrap();

        m.step_all();
        assert!(!m.exists(id));
    }

    #[test]
    fn set_gamut_rejects_oversum_and_resets_identity() {
        let mut m = manager();
        let bad = [[0.9, 0.9, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let result: Result<(), Error<()>> = m.set_gamut(bad);
        assert_eq!(result, Err(Error::InvalidGamut));
        assert_eq!(m.gamut(), GamutMatrix::IDENTITY);
    }

    #[test]
    fn set_id_map_rejects_out_of_range_entry_and_resets_identity() {
        let mut m = manager();
        let bad = [0, 1, 2, 3, 4, 5, 6, 9];
        let result: Result<(), Error<()>> = m.set_id_map(bad);
        assert_eq!(result, Err(Error::TypeMismatch));
        assert_eq!(m.id_map, identity_id_map());
    }

    #[test]
    fn id_counter_skips_zero_and_wraps() {
        let mut m = manager();
        m.next_id = u16::MAX;
        let tokens = parse_pattern::<()>("#FFFFFF;").unwrap();
        let first: u16 = m.set::<()>(&[1], tokens).unwrap();
        assert_eq!(first, u16::MAX);

        let tokens = parse_pattern::<()>("#FFFFFF;").unwrap();
        let second: u16 = m.set::<()>(&[1], tokens).unwrap();
        assert_eq!(second, 1);
    }
}

//! Per-LED pattern-stack resolution: walks each LED's id stack top-down and
//! picks the first visible layer, treating the bottom layer as always
//! opaque regardless of its own flag.

use crate::color::Rgb12;
use crate::frame::NUM_LEDS;

/// Resolve one LED's stack of pattern ids to a single color.
///
/// `lookup(id)` must return the pattern's current color and visibility for
/// any id actually present in `stack` — ids are only ever removed from a
/// LED's map in the same step that removes them from the pattern list, so a
/// live stack entry always resolves. If it doesn't (a lookup bug elsewhere),
/// that entry is treated as transparent rather than panicking.
pub fn resolve_led<F>(stack: &[u16], lookup: F) -> Rgb12
where
    F: Fn(u16) -> Option<(Rgb12, bool)>,
{
    if stack.is_empty() {
        return Rgb12::BLACK;
    }

    let mut i = stack.len() - 1;
    loop {
        if let Some((color, visible)) = lookup(stack[i]) {
            if visible || i == 0 {
                return color;
            }
        } else if i == 0 {
            return Rgb12::BLACK;
        }

        if i == 0 {
            return Rgb12::BLACK;
        }
        i -= 1;
    }
}

/// Resolve all 8 physical LEDs' stacks into the colors the frame packer
/// should pack next.
pub fn compose_frame<F>(maps: &[alloc::vec::Vec<u16>; NUM_LEDS], lookup: F) -> [Rgb12; NUM_LEDS]
where
    F: Fn(u16) -> Option<(Rgb12, bool)>,
{
    let mut colors = [Rgb12::BLACK; NUM_LEDS];
    for (n, stack) in maps.iter().enumerate() {
        colors[n] = resolve_led(stack, &lookup);
    }
    colors
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn empty_stack_is_black() {
        let stack: [u16; 0] = [];
        assert_eq!(resolve_led(&stack, |_| None), Rgb12::BLACK);
    }

    #[test]
    fn visible_top_wins() {
        let stack = [1u16, 2u16];
        let color = resolve_led(&stack, |id| match id {
            1 => Some((Rgb12::new(100, 0, 0), true)),
            2 => Some((Rgb12::new(0, 100, 0), true)),
            _ => None,
        });
        assert_eq!(color, Rgb12::new(0, 100, 0));
    }

    #[test]
    fn transparent_top_reveals_layer_below() {
        let stack = [1u16, 2u16];
        let color = resolve_led(&stack, |id| match id {
            1 => Some((Rgb12::new(100, 0, 0), true)),
            2 => Some((Rgb12::new(0, 100, 0), false)),
            _ => None,
        });
        assert_eq!(color, Rgb12::new(100, 0, 0));
    }

    #[test]
    fn bottom_layer_is_always_opaque_even_if_transparent() {
        let stack = [1u16];
        let color = resolve_led(&stack, |id| match id {
            1 => Some((Rgb12::new(5, 5, 5), false)),
            _ => None,
        });
        assert_eq!(color, Rgb12::new(5, 5, 5));
    }

    #[test]
    fn compose_frame_resolves_all_eight_leds() {
        let mut maps: [alloc::vec::Vec<u16>; NUM_LEDS] = Default::default();
        maps[0] = vec![7];
        let colors = compose_frame(&maps, |id| {
            if id == 7 {
                Some((Rgb12::new(1, 2, 3), true))
            } else {
                None
            }
        });
        assert_eq!(colors[0], Rgb12::new(1, 2, 3));
        for c in &colors[1..] {
            assert_eq!(*c, Rgb12::BLACK);
        }
    }
}

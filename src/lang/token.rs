//! The pattern language's token set. A tagged union — payloads are POD, no
//! inheritance attempted: small, `Copy` tag+payload variants, one per
//! opcode.

use crate::color::Rgb12;

/// One instruction of a compiled pattern program.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token {
    /// Set the pattern's base and current color; resets brightness to 1.0.
    Color(Rgb12),

    /// Flip the pattern's `visible` flag.
    Transparent,

    /// Hold for `duration` ticks. `remaining` is VM-owned scratch state,
    /// zero until the VM's first visit initializes it.
    Sleep { duration: u16, remaining: u16 },

    /// Add `delta` to brightness, clamped to `[0, 1]`.
    Brightness(f32),

    /// Increment the top-of-stack value.
    Increment,

    /// Decrement the top-of-stack value.
    Decrement,

    /// Push an immediate value onto the stack.
    Push(i16),

    /// Pop the top-of-stack value.
    Pop,

    /// A jump target; a no-op at execution.
    Mark,

    /// If top-of-stack is nonzero, jump to `target` (a resolved index into
    /// the pattern's token array) and yield for the rest of this tick.
    JumpNonZero { target: u16 },

    /// Permanently halt progress without terminating the pattern.
    Forever,
}

impl Token {
    /// `true` for opcodes that consume a following numeric (or color)
    /// literal during tokenization, used by the parser's length pre-pass.
    pub const fn is_forever(&self) -> bool {
        matches!(self, Token::Forever)
    }
}

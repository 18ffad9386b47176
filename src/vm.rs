//! The per-pattern stack machine: one step-to-observable-effect per tick,
//! yielding an updated current color, visibility flag, and liveness.

use alloc::vec::Vec;

use crate::color::{brightness_curve, GamutMatrix, Rgb12, WhiteBalance};
use crate::lang::token::Token;

/// Depth of a pattern's value stack (`stack: [i16; 10]` in the data model).
pub const STACK_DEPTH: usize = 10;

/// The shared, read-only token sequence a pattern collapses to once it
/// executes `FOREVER`. A plain `static` rather than a heap singleton: no
/// identity check is needed, switching `TokenStorage` to this variant is
/// itself the "same singleton" guarantee.
static FOREVER_TOKENS: [Token; 1] = [Token::Forever];

/// A pattern's token storage: either the heap-allocated array produced by
/// the parser, or the collapsed `FOREVER` marker that releases it.
#[derive(Debug)]
enum TokenStorage {
    Owned(Vec<Token>),
    Forever,
}

impl TokenStorage {
    fn as_slice(&self) -> &[Token] {
        match self {
            TokenStorage::Owned(tokens) => tokens.as_slice(),
            TokenStorage::Forever => &FOREVER_TOKENS,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [Token] {
        match self {
            TokenStorage::Owned(tokens) => tokens.as_mut_slice(),
            TokenStorage::Forever => &mut [],
        }
    }
}

/// Why a pattern stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Ran off the end of a finite token array.
    EndOfTokens,
    /// `PUSH` attempted while the stack was already full.
    StackOverflow,
    /// `POP` attempted while the stack was already at its floor.
    StackUnderflow,
}

/// Result of stepping a pattern by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The pattern yielded control; `dirty` is set if anything it did this
    /// tick should cause the compositor to recompute the frame.
    Yielded { dirty: bool },
    /// The pattern terminated and must be removed from the driver.
    Terminated(TerminationReason),
}

/// One running instance of a compiled pattern program.
#[derive(Debug)]
pub struct Pattern {
    id: u16,
    tokens: TokenStorage,
    pc: u16,
    stack: [i16; STACK_DEPTH],
    sp: u8,
    brightness: f32,
    base_color: Rgb12,
    current_color: Rgb12,
    visible: bool,
}

impl Pattern {
    /// Construct a freshly-parsed pattern with the given `id`. All VM state
    /// starts at its identity value (black, fully bright, visible, stack
    /// floor at its zeroed base slot).
    pub fn new(id: u16, tokens: Vec<Token>) -> Self {
        Self {
            id,
            tokens: TokenStorage::Owned(tokens),
            pc: 0,
            stack: [0; STACK_DEPTH],
            sp: 0,
            brightness: 1.0,
            base_color: Rgb12::BLACK,
            current_color: Rgb12::BLACK,
            visible: true,
        }
    }

    /// Reinitialize this pattern in place with a new token array, keeping
    /// its id. Used by `replace`.
    pub fn reinit(&mut self, tokens: Vec<Token>) {
        self.tokens = TokenStorage::Owned(tokens);
        self.pc = 0;
        self.stack = [0; STACK_DEPTH];
        self.sp = 0;
        self.brightness = 1.0;
        self.base_color = Rgb12::BLACK;
        self.current_color = Rgb12::BLACK;
        self.visible = true;
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn current_color(&self) -> Rgb12 {
        self.current_color
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    /// Advance this pattern by one tick: execute tokens in program order
    /// (modulo `JUMP_NZERO`) until it yields or terminates.
    pub fn step(&mut self, white_balance: &WhiteBalance, gamut: &GamutMatrix) -> StepOutcome {
        let mut dirty = false;

        loop {
            let len = self.tokens.as_slice().len();
            if self.pc as usize >= len {
                return StepOutcome::Terminated(TerminationReason::EndOfTokens);
            }

            match self.tokens.as_mut_slice()[self.pc as usize] {
                Token::Color(rgb) => {
                    let corrected = gamut.apply(white_balance.apply(rgb));
                    self.base_color = corrected;
                    self.current_color = corrected;
                    self.brightness = 1.0;
                    dirty = true;
                    self.pc += 1;
                }
                Token::Transparent => {
                    self.visible = !self.visible;
                    dirty = true;
                    self.pc += 1;
                }
                Token::Sleep {
                    duration,
                    ref mut remaining,
                } => {
                    if *remaining == 0 {
                        *remaining = duration;
                        if duration == 0 {
                            self.pc += 1;
                        } else {
                            return StepOutcome::Yielded { dirty };
                        }
                    } else {
                        *remaining -= 1;
                        if *remaining == 0 {
                            self.pc += 1;
                        } else {
                            return StepOutcome::Yielded { dirty };
                        }
                    }
                }
                Token::Brightness(delta) => {
                    self.brightness = (self.brightness + delta).clamp(0.0, 1.0);
                    let factor = brightness_curve(self.brightness);
                    self.current_color = self.base_color.scale_ten_thousandths(factor);
                    dirty = true;
                    self.pc += 1;
                }
                Token::Increment => {
                    let sp = self.sp as usize;
                    self.stack[sp] = self.stack[sp].wrapping_add(1);
                    self.pc += 1;
                }
                Token::Decrement => {
                    let sp = self.sp as usize;
                    self.stack[sp] = self.stack[sp].wrapping_sub(1);
                    self.pc += 1;
                }
                Token::Push(value) => {
                    if self.sp as usize + 1 == STACK_DEPTH {
                        return StepOutcome::Terminated(TerminationReason::StackOverflow);
                    }
                    self.sp += 1;
                    self.stack[self.sp as usize] = value;
                    self.pc += 1;
                }
                Token::Pop => {
                    if self.sp == 0 {
                        return StepOutcome::Terminated(TerminationReason::StackUnderflow);
                    }
                    self.sp -= 1;
                    self.pc += 1;
                }
                Token::Mark => {
                    self.pc += 1;
                }
                Token::JumpNonZero { target } => {
                    if self.stack[self.sp as usize] != 0 {
                        self.pc = target;
                        return StepOutcome::Yielded { dirty };
                    } else {
                        self.pc += 1;
                    }
                }
                Token::Forever => {
                    if !matches!(self.tokens, TokenStorage::Forever) {
                        self.tokens = TokenStorage::Forever;
                        self.pc = 0;
                    }
                    return StepOutcome::Yielded { dirty };
                }
            }
        }
    }
}

//! Three validating passes over a pattern source string, followed by a
//! fourth pass that allocates the exact-size token array and fills it.
//! All four run before any allocation commits to the driver's pattern list.

use alloc::vec::Vec;

use crate::color::{parse_hex_digits, Rgb8};
use crate::lang::token::Token;
use crate::Error;

/// Marker byte for a brightness literal (ASCII backspace, `0x08`), matching
/// the pattern language's `\b` escape.
const BRIGHTNESS_MARKER: u8 = 0x08;

/// Parse and validate `src`, returning its compiled token array.
///
/// Runs, in order: the balance check, the color-literal check, the length
/// pre-pass, and finally the allocating tokenize pass. Any failure in the
/// first three passes means nothing is ever allocated.
pub fn parse<BusE>(src: &str) -> Result<Vec<Token>, Error<BusE>> {
    let bytes = src.as_bytes();

    check_balance(bytes)?;
    check_colors(bytes)?;
    let count = count_tokens(bytes)?;

    tokenize(bytes, count)
}

/// Single scan counting `[` and `]`. Errors on a negative running count
/// (an unmatched `]`) or a nonzero final count (unmatched `[`).
fn check_balance<BusE>(bytes: &[u8]) -> Result<(), Error<BusE>> {
    let mut depth: i32 = 0;

    for &b in bytes {
        match b {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth < 0 {
                    return Err(Error::UnbalancedJumps);
                }
            }
            b';' => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(Error::UnbalancedJumps);
    }

    Ok(())
}

/// For each `#`, the next six bytes must be hex digits.
fn check_colors<BusE>(bytes: &[u8]) -> Result<(), Error<BusE>> {
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b';' {
            break;
        }
        if bytes[i] == b'#' {
            let digits = color_digits(bytes, i)?;
            for &d in digits {
                if !d.is_ascii_hexdigit() {
                    return Err(Error::InvalidColorFormat);
                }
            }
            i += 7;
        } else {
            i += 1;
        }
    }
    Ok(())
}

fn color_digits<BusE>(bytes: &[u8], hash_index: usize) -> Result<&[u8], Error<BusE>> {
    bytes
        .get(hash_index + 1..hash_index + 7)
        .ok_or(Error::InvalidColorFormat)
}

/// One scan computing the token count. Spaces are ignored; colors,
/// brightness, sleep and push consume their argument; any unrecognized
/// byte raises [`Error::UnknownCharacter`]. A zero-token pattern raises
/// [`Error::ZeroLength`].
fn count_tokens<BusE>(bytes: &[u8]) -> Result<usize, Error<BusE>> {
    let mut i = 0;
    let mut count = 0usize;

    while i < bytes.len() {
        let b = bytes[i];

        if b == b';' {
            count += 1;
            break;
        }

        let span = token_span::<BusE>(bytes, i)?;
        if span.is_counted {
            count += 1;
        }
        i += span.len;
    }

    if count == 0 {
        return Err(Error::ZeroLength);
    }

    Ok(count)
}

/// How many source bytes one token (or ignored space) occupies, and
/// whether it counts toward the token array.
struct Span {
    len: usize,
    is_counted: bool,
}

/// Determine the span of the token starting at `bytes[i]`, validating its
/// argument if it has one. Shared between [`count_tokens`] and
/// [`tokenize`] so the two passes can never disagree about where a token
/// ends.
fn token_span<BusE>(bytes: &[u8], i: usize) -> Result<Span, Error<BusE>> {
    match bytes[i] {
        b' ' => Ok(Span {
            len: 1,
            is_counted: false,
        }),
        b'#' => Ok(Span {
            len: 7,
            is_counted: true,
        }),
        BRIGHTNESS_MARKER => {
            let len = brightness_literal_len::<BusE>(bytes, i)?;
            Ok(Span {
                len,
                is_counted: true,
            })
        }
        b'|' => {
            let len = numeric_literal_len::<BusE>(bytes, i)?;
            parse_u16_arg::<BusE>(bytes, i + 1, len - 1)?;
            Ok(Span {
                len,
                is_counted: true,
            })
        }
        b'<' => {
            let len = numeric_literal_len::<BusE>(bytes, i)?;
            parse_i16_arg::<BusE>(bytes, i + 1, len - 1)?;
            Ok(Span {
                len,
                is_counted: true,
            })
        }
        b'>' | b'[' | b']' | b'+' | b'-' | b'@' => Ok(Span {
            len: 1,
            is_counted: true,
        }),
        _ => Err(Error::UnknownCharacter),
    }
}

fn numeric_literal_len<BusE>(bytes: &[u8], i: usize) -> Result<usize, Error<BusE>> {
    let mut j = i + 1;
    if j >= bytes.len() || !bytes[j].is_ascii_digit() {
        return Err(Error::UnknownCharacter);
    }
    while j < bytes.len() && bytes[j].is_ascii_digit() {
        j += 1;
    }
    Ok(j - i)
}

fn brightness_literal_len<BusE>(bytes: &[u8], i: usize) -> Result<usize, Error<BusE>> {
    let mut j = i + 1;
    if j < bytes.len() && bytes[j] == b'-' {
        j += 1;
    }
    let digits_start = j;
    while j < bytes.len() && bytes[j].is_ascii_digit() {
        j += 1;
    }
    if j == digits_start {
        return Err(Error::UnknownCharacter);
    }
    if j < bytes.len() && bytes[j] == b'.' {
        j += 1;
        let frac_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j == frac_start {
            return Err(Error::UnknownCharacter);
        }
    }
    parse_brightness_arg::<BusE>(bytes, i + 1, j - (i + 1))?;
    Ok(j - i)
}

fn as_str<BusE>(bytes: &[u8], start: usize, len: usize) -> Result<&str, Error<BusE>> {
    core::str::from_utf8(&bytes[start..start + len]).map_err(|_| Error::UnknownCharacter)
}

fn parse_u16_arg<BusE>(bytes: &[u8], start: usize, len: usize) -> Result<u16, Error<BusE>> {
    as_str::<BusE>(bytes, start, len)?
        .parse::<u16>()
        .map_err(|_| Error::UnknownCharacter)
}

fn parse_i16_arg<BusE>(bytes: &[u8], start: usize, len: usize) -> Result<i16, Error<BusE>> {
    as_str::<BusE>(bytes, start, len)?
        .parse::<i16>()
        .map_err(|_| Error::UnknownCharacter)
}

fn parse_brightness_arg<BusE>(bytes: &[u8], start: usize, len: usize) -> Result<f32, Error<BusE>> {
    as_str::<BusE>(bytes, start, len)?
        .parse::<f32>()
        .map_err(|_| Error::UnknownCharacter)
}

/// Allocate the exact-size token array and fill it, resolving every
/// `JUMP_NZERO`'s target to its nearest enclosing `MARK` via a stack of
/// open mark indices, computed in one forward pass rather than a reverse
/// scan per jump.
fn tokenize<BusE>(bytes: &[u8], count: usize) -> Result<Vec<Token>, Error<BusE>> {
    let mut tokens = Vec::new();
    tokens
        .try_reserve_exact(count)
        .map_err(|_| Error::AllocationFailure)?;

    let mut open_marks: Vec<u16> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if b == b';' {
            tokens.push(Token::Forever);
            break;
        }

        let span = token_span::<BusE>(bytes, i)?;

        if span.is_counted {
            let token = match b {
                b'#' => {
                    let digits = color_digits::<BusE>(bytes, i)?;
                    let digits: [u8; 6] = digits.try_into().unwrap();
                    let rgb8: Rgb8 = parse_hex_digits(&digits)?;
                    Token::Color(rgb8.to_rgb12())
                }
                BRIGHTNESS_MARKER => {
                    let arg = parse_brightness_arg::<BusE>(bytes, i + 1, span.len - 1)?;
                    Token::Brightness(arg)
                }
                b'|' => {
                    let arg = parse_u16_arg::<BusE>(bytes, i + 1, span.len - 1)?;
                    Token::Sleep {
                        duration: arg,
                        remaining: 0,
                    }
                }
                b'<' => {
                    let arg = parse_i16_arg::<BusE>(bytes, i + 1, span.len - 1)?;
                    Token::Push(arg)
                }
                b'>' => Token::Pop,
                b'[' => {
                    open_marks.push(tokens.len() as u16);
                    Token::Mark
                }
                b']' => {
                    let target = open_marks.pop().ok_or(Error::UnbalancedJumps)?;
                    Token::JumpNonZero { target }
                }
                b'+' => Token::Increment,
                b'-' => Token::Decrement,
                b'@' => Token::Transparent,
                _ => return Err(Error::UnknownCharacter),
            };
            tokens.push(token);
        }

        i += span.len;
    }

    Ok(tokens)
}

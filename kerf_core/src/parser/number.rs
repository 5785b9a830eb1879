//! Hand-rolled float scanner for g-code words.
//!
//! Accepts the g-code grammar only: optional sign, digits with at most
//! one decimal point. No exponents, no `inf`/`nan`, no internal
//! whitespace (the line assembler already stripped it). Digits
//! accumulate in an integer with a tracked exponent so the common short
//! values convert exactly.

/// Read a float starting at `*pos`. On success advances `*pos` past the
/// number and returns the value; on failure leaves `*pos` unspecified
/// and returns `None`.
pub fn read_float(line: &[u8], pos: &mut usize) -> Option<f32> {
    let mut idx = *pos;

    let negative = match line.get(idx) {
        Some(b'-') => {
            idx += 1;
            true
        }
        Some(b'+') => {
            idx += 1;
            false
        }
        _ => false,
    };

    // Accumulate digits into an integer, capping at a precision beyond
    // f32 anyway, and track the decimal exponent separately.
    let mut intval: u32 = 0;
    let mut exp: i32 = 0;
    let mut ndigit: u32 = 0;
    let mut is_decimal = false;
    let mut seen_digit = false;

    while let Some(&c) = line.get(idx) {
        match c {
            b'0'..=b'9' => {
                seen_digit = true;
                ndigit += 1;
                if ndigit <= 8 {
                    if is_decimal {
                        exp -= 1;
                    }
                    intval = intval * 10 + u32::from(c - b'0');
                } else if !is_decimal {
                    exp += 1;
                }
                idx += 1;
            }
            b'.' if !is_decimal => {
                is_decimal = true;
                idx += 1;
            }
            _ => break,
        }
    }

    if !seen_digit {
        return None;
    }

    let mut value = intval as f64;
    if exp != 0 {
        value *= 10f64.powi(exp);
    }

    *pos = idx;
    Some(if negative { -value as f32 } else { value as f32 })
}

// ─── Tests ──────────────────────────────────────────────────────────

//! Allocation-free numeric literal scanners.
//!
//! Both scanners consume a byte iterator, so a field that straddles two
//! buffered chunks is scanned straight out of the chunk window without being
//! copied. A failed scan returns `None` and the caller substitutes its default.
//!
//! Overflow never wraps: an integer that does not fit in `i64`, or a decimal
//! exponent that does not fit in `i32`, fails the scan.

use std::io::Write;
use std::str::FromStr;

/// Capacity of the decimal digit buffer. Literals with more significant digits
/// fail to scan.
pub const MAX_DIGITS: usize = 64;

#[inline]
fn digit_value(b: u8) -> u32 {
    match b {
        b'0'..=b'9' => u32::from(b - b'0'),
        b'a'..=b'z' => u32::from(b - b'a') + 10,
        b'A'..=b'Z' => u32::from(b - b'A') + 10,
        _ => u32::MAX,
    }
}

#[derive(Clone, Copy)]
enum IntState {
    Leading,
    Digits,
    Trailing,
}

/// Scan a signed integer in `radix` (2 to 36) with optional surrounding
/// whitespace.
///
/// ```
/// use chunked_csv::numeric::scan_int;
///
/// assert_eq!(scan_int(*b" -042  ", 10), Some(-42));
/// assert_eq!(scan_int(*b"ff", 16), Some(255));
/// assert_eq!(scan_int(*b"12x", 10), None);
/// ```
pub fn scan_int<I>(bytes: I, radix: u32) -> Option<i64>
where
    I: IntoIterator<Item = u8>,
{
    let mut state = IntState::Leading;
    let mut negative = false;
    let mut signed = false;
    let mut digits = 0usize;
    let mut acc: i64 = 0;

    for b in bytes {
        match state {
            IntState::Leading => {
                if b.is_ascii_whitespace() {
                    continue;
                }
                if !signed && (b == b'-' || b == b'+') {
                    signed = true;
                    negative = b == b'-';
                    continue;
                }
                acc = push_digit(acc, b, radix, negative)?;
                digits += 1;
                state = IntState::Digits;
            }
            IntState::Digits => {
                if b.is_ascii_whitespace() {
                    state = IntState::Trailing;
                } else {
                    acc = push_digit(acc, b, radix, negative)?;
                    digits += 1;
                }
            }
            IntState::Trailing => {
                if !b.is_ascii_whitespace() {
                    return None;
                }
            }
        }
    }
    (digits > 0).then_some(acc)
}

// Negative literals accumulate downwards so that i64::MIN is reachable.
#[inline]
fn push_digit(acc: i64, b: u8, radix: u32, negative: bool) -> Option<i64> {
    let d = digit_value(b);
    if d >= radix {
        return None;
    }
    let shifted = acc.checked_mul(i64::from(radix))?;
    if negative {
        shifted.checked_sub(i64::from(d))
    } else {
        shifted.checked_add(i64::from(d))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FloatState {
    Start,
    LeadingZeros,
    Integer,
    Fraction,
    Trailing,
}

/// Decimal floating-point scanner with a reusable digit buffer.
///
/// A scan reduces the literal to `0.d1d2..dn * 10^exponent` plus a sign.
/// Zeros after the decimal point are held back as a pending count and only
/// written to the buffer once a non-zero digit follows, so trailing zeros never
/// use buffer space. The assembled form is then handed once to the standard
/// library's correctly rounded conversion.
///
/// One scanner lives in each parser session; it is not shared.
#[derive(Debug, Clone)]
pub struct DecimalScanner {
    digits: [u8; MAX_DIGITS],
    n_digits: usize,
    exponent: i32,
    negative: bool,
}

impl Default for DecimalScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl DecimalScanner {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            digits: [0; MAX_DIGITS],
            n_digits: 0,
            exponent: 0,
            negative: false,
        }
    }

    /// Scan `bytes` as a 64-bit float.
    ///
    /// ```
    /// use chunked_csv::numeric::DecimalScanner;
    ///
    /// let mut scanner = DecimalScanner::new();
    /// assert_eq!(scanner.scan_f64(*b"1.2300e2"), Some(123.0));
    /// assert_eq!(scanner.scan_f64(*b" -.5 "), Some(-0.5));
    /// assert_eq!(scanner.scan_f64(*b"12x"), None);
    /// ```
    pub fn scan_f64<I: IntoIterator<Item = u8>>(&mut self, bytes: I) -> Option<f64> {
        if self.scan(bytes) { self.assemble() } else { None }
    }

    /// Scan `bytes` as a 32-bit float, rounding once from the decimal form.
    pub fn scan_f32<I: IntoIterator<Item = u8>>(&mut self, bytes: I) -> Option<f32> {
        if self.scan(bytes) { self.assemble() } else { None }
    }

    /// Significant digits of the last successful scan.
    #[must_use]
    pub fn digits(&self) -> &[u8] {
        &self.digits[..self.n_digits]
    }

    /// Decimal exponent of the last successful scan, for `0.digits` form.
    #[must_use]
    pub const fn exponent(&self) -> i32 {
        self.exponent
    }

    #[must_use]
    pub const fn is_negative(&self) -> bool {
        self.negative
    }

    /// Run the scanner state machine; returns whether the literal was valid.
    pub fn scan<I: IntoIterator<Item = u8>>(&mut self, bytes: I) -> bool {
        self.n_digits = 0;
        self.exponent = 0;
        self.negative = false;

        let mut state = FloatState::Start;
        let mut signed = false;
        let mut pending_zeros = 0usize;
        let mut iter = bytes.into_iter();

        while let Some(b) = iter.next() {
            match state {
                FloatState::Start => match b {
                    b'.' => state = FloatState::Fraction,
                    b'-' | b'+' if !signed => {
                        signed = true;
                        self.negative = b == b'-';
                    }
                    b'0' => {
                        if !self.push(b) {
                            return false;
                        }
                        self.exponent += 1;
                        state = FloatState::LeadingZeros;
                    }
                    b'1'..=b'9' => {
                        if !self.push(b) {
                            return false;
                        }
                        self.exponent += 1;
                        state = FloatState::Integer;
                    }
                    _ if b.is_ascii_whitespace() => {}
                    _ => return false,
                },
                FloatState::LeadingZeros if b == b'0' => {}
                FloatState::LeadingZeros | FloatState::Integer => match b {
                    b'.' => state = FloatState::Fraction,
                    b'e' | b'E' => return self.scan_exponent(iter.by_ref()),
                    b'0'..=b'9' => {
                        if !self.push(b) {
                            return false;
                        }
                        self.exponent += 1;
                        state = FloatState::Integer;
                    }
                    _ if b.is_ascii_whitespace() => state = FloatState::Trailing,
                    _ => return false,
                },
                FloatState::Fraction => match b {
                    b'0' => pending_zeros += 1,
                    b'e' | b'E' => return self.scan_exponent(iter.by_ref()),
                    b'1'..=b'9' => {
                        for _ in 0..pending_zeros {
                            if !self.push(b'0') {
                                return false;
                            }
                        }
                        pending_zeros = 0;
                        if !self.push(b) {
                            return false;
                        }
                    }
                    _ if b.is_ascii_whitespace() => state = FloatState::Trailing,
                    _ => return false,
                },
                FloatState::Trailing => {
                    if !b.is_ascii_whitespace() {
                        return false;
                    }
                }
            }
        }
        self.n_digits > 0
    }

    fn scan_exponent<I: Iterator<Item = u8>>(&mut self, rest: I) -> bool {
        let Some(exp) = scan_int(rest, 10) else {
            return false;
        };
        match i64::from(self.exponent)
            .checked_add(exp)
            .and_then(|e| i32::try_from(e).ok())
        {
            Some(e) => {
                self.exponent = e;
                self.n_digits > 0
            }
            None => false,
        }
    }

    #[inline]
    fn push(&mut self, digit: u8) -> bool {
        if self.n_digits == MAX_DIGITS {
            return false;
        }
        self.digits[self.n_digits] = digit;
        self.n_digits += 1;
        true
    }

    // Writes "-0.<digits>e<exponent>" into a stack buffer and parses it.
    fn assemble<F: FromStr>(&self) -> Option<F> {
        let mut buf = [0u8; MAX_DIGITS + 16];
        let mut len = 0usize;
        if self.negative {
            buf[len] = b'-';
            len += 1;
        }
        buf[len..len + 2].copy_from_slice(b"0.");
        len += 2;
        buf[len..len + self.n_digits].copy_from_slice(self.digits());
        len += self.n_digits;
        buf[len] = b'e';
        len += 1;

        let mut tail = &mut buf[len..];
        let room = tail.len();
        write!(tail, "{}", self.exponent).ok()?;
        len += room - tail.len();

        std::str::from_utf8(&buf[..len]).ok()?.parse().ok()
    }
}

//! Time suffix parsing for delays and timeouts (`30`, `30s`, `5m`, `1h`, `1d`, `1w`).

use crate::core::SchedulerError;

/// Parses a duration written with an optional time suffix into seconds.
///
/// # Errors
///
/// Returns [`SchedulerError::InvalidDelay`] when the text is empty, not a
/// number, carries an unknown suffix or overflows.
pub fn parse_seconds(text: &str) -> Result<u64, SchedulerError> {
    let text = text.trim();
    let invalid = |reason: &str| SchedulerError::InvalidDelay {
        delay: text.to_string(),
        reason: reason.to_string(),
    };

    let (digits, multiplier) = match text.char_indices().last() {
        None => return Err(invalid("empty value")),
        Some((idx, suffix)) if suffix.is_ascii_alphabetic() => {
            let multiplier = match suffix {
                's' => 1,
                'm' => 60,
                'h' => 3_600,
                'd' => 86_400,
                'w' => 7 * 86_400,
                _ => return Err(invalid("unknown time suffix")),
            };
            (&text[..idx], multiplier)
        }
        Some(_) => (text, 1),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("not a number"));
    }
    digits
        .parse::<u64>()
        .ok()
        .and_then(|value| value.checked_mul(multiplier))
        .ok_or_else(|| invalid("value out of range"))
}

//! Item key parsing: `name`, `name[p1,"quoted, p2",[array,p3]]`.

use crate::core::SchedulerError;

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// Splits an item key into its bare name and unquoted parameters.
///
/// Quoted parameters have `\"` unescaped; array parameters (`[a,b]`) are
/// returned as their raw inner text.
///
/// # Errors
///
/// Returns [`SchedulerError::InvalidKey`] for empty names, unbalanced
/// brackets or quotes, and trailing characters after the parameter list.
pub fn parse_key(text: &str) -> Result<(String, Vec<String>), SchedulerError> {
    let invalid = |reason: &str| SchedulerError::InvalidKey(format!("{text}: {reason}"));
    let chars: Vec<char> = text.chars().collect();

    let name_len = chars.iter().take_while(|c| is_key_char(**c)).count();
    if name_len == 0 {
        return Err(invalid("missing key name"));
    }
    let name: String = chars[..name_len].iter().collect();
    if name_len == chars.len() {
        return Ok((name, Vec::new()));
    }
    if chars[name_len] != '[' {
        return Err(invalid("invalid character in key name"));
    }

    let mut params = Vec::new();
    let mut pos = name_len + 1;
    loop {
        while pos < chars.len() && chars[pos] == ' ' {
            pos += 1;
        }
        let Some(&first) = chars.get(pos) else {
            return Err(invalid("unterminated parameter list"));
        };
        let param = match first {
            '"' => {
                let mut value = String::new();
                pos += 1;
                loop {
                    match chars.get(pos) {
                        None => return Err(invalid("unterminated quoted parameter")),
                        Some('\\') if chars.get(pos + 1) == Some(&'"') => {
                            value.push('"');
                            pos += 2;
                        }
                        Some('"') => {
                            pos += 1;
                            break;
                        }
                        Some(&c) => {
                            value.push(c);
                            pos += 1;
                        }
                    }
                }
                while pos < chars.len() && chars[pos] == ' ' {
                    pos += 1;
                }
                value
            }
            '[' => {
                let start = pos + 1;
                let mut quoted = false;
                pos = start;
                loop {
                    match chars.get(pos) {
                        None => return Err(invalid("unterminated array parameter")),
                        Some('\\') if quoted && chars.get(pos + 1) == Some(&'"') => pos += 2,
                        Some('"') => {
                            quoted = !quoted;
                            pos += 1;
                        }
                        Some('[') if !quoted => return Err(invalid("nested arrays are not supported")),
                        Some(']') if !quoted => break,
                        Some(_) => pos += 1,
                    }
                }
                let value: String = chars[start..pos].iter().collect();
                pos += 1;
                while pos < chars.len() && chars[pos] == ' ' {
                    pos += 1;
                }
                value
            }
            _ => {
                let start = pos;
                while pos < chars.len() && chars[pos] != ',' && chars[pos] != ']' {
                    pos += 1;
                }
                chars[start..pos].iter().collect()
            }
        };
        params.push(param);

        match chars.get(pos) {
            Some(',') => pos += 1,
            Some(']') => {
                if pos + 1 != chars.len() {
                    return Err(invalid("unexpected characters after parameters"));
                }
                return Ok((name, params));
            }
            _ => return Err(invalid("unterminated parameter list")),
        }
    }
}

/// Bare key name of an item key, or the whole text when it cannot be parsed.
#[must_use]
pub fn key_name(text: &str) -> &str {
    let end = text.find('[').unwrap_or(text.len());
    &text[..end]
}

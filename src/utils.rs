use std::borrow::Cow;

/// Convertit les caractères non imprimables en séquences d'échappement
pub fn safe_log_string(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\0' => result.push_str("\\0"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            '\x01'..='\x08' | '\x0b' | '\x0c' | '\x0e'..='\x1f' | '\x7f' => {
                result.push_str(&format!("\\x{:02x}", c as u32));
            }
            _ if c.is_ascii_graphic() || c.is_ascii_whitespace() => {
                result.push(c);
            }
            _ => {
                result.push_str(&format!("\\u{{{:x}}}", c as u32));
            }
        }
    }
    result
}

/// Hides the credential in `AUTH PLAIN <payload>`.
pub fn redact_auth(line: &str) -> Cow<'_, str> {
    const AUTH_PLAIN: &str = "AUTH PLAIN ";
    match line.get(..AUTH_PLAIN.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(AUTH_PLAIN) => {
            Cow::Owned(format!("{prefix}[redacted]"))
        }
        _ => Cow::Borrowed(line),
    }
}

/// A client line as it should appear in the logs.
pub fn loggable_line(line: &str) -> String {
    safe_log_string(&redact_auth(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_log_string() {
        assert_eq!(safe_log_string("MAIL FROM:<a@b>"), "MAIL FROM:<a@b>");
        assert_eq!(safe_log_string("a\0b\x1bc"), "a\\0b\\x1bc");
        assert_eq!(safe_log_string("x\r\ny"), "x\\r\\ny");
        assert_eq!(safe_log_string("é"), "\\u{e9}");
    }

    #[test]
    fn test_redact_auth() {
        assert_eq!(redact_auth("AUTH PLAIN AGFsaWNlAHB3"), "AUTH PLAIN [redacted]");
        assert_eq!(redact_auth("auth plain AGFsaWNlAHB3"), "auth plain [redacted]");
        assert_eq!(redact_auth("AUTH PLAIN"), "AUTH PLAIN");
        assert_eq!(redact_auth("EHLO x"), "EHLO x");
    }

    #[test]
    fn test_loggable_line() {
        assert_eq!(loggable_line("AUTH PLAIN \x00secret"), "AUTH PLAIN [redacted]");
        assert_eq!(loggable_line("HELO \x07"), "HELO \\x07");
    }
}

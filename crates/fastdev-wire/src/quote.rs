//! Double-quoted literals with backslash escapes.
//!
//! Printable characters are kept verbatim, the usual single-letter escapes are
//! used where they exist, and everything else becomes `\xHH`, `\uHHHH` or
//! `\UHHHHHHHH`. Invalid UTF-8 bytes are written as `\xHH`, which is what lets
//! arbitrary binary round-trip. Octal escapes are accepted on read.

use crate::WireError;

pub fn quote(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for chunk in bytes.utf8_chunks() {
        for c in chunk.valid().chars() {
            push_escaped_char(&mut out, c);
        }
        for byte in chunk.invalid() {
            push_hex_byte(&mut out, *byte);
        }
    }
    out.push('"');
    out
}

fn push_escaped_char(out: &mut String, c: char) {
    match c {
        '"' => out.push_str("\\\""),
        '\\' => out.push_str("\\\\"),
        c if is_print(c) => out.push(c),
        '\x07' => out.push_str("\\a"),
        '\x08' => out.push_str("\\b"),
        '\x0c' => out.push_str("\\f"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        '\x0b' => out.push_str("\\v"),
        c if (c as u32) < 0x20 || c == '\x7f' => push_hex_byte(out, c as u8),
        c if (c as u32) < 0x10000 => out.push_str(&format!("\\u{:04x}", c as u32)),
        c => out.push_str(&format!("\\U{:08x}", c as u32)),
    }
}

fn push_hex_byte(out: &mut String, byte: u8) {
    out.push_str(&format!("\\x{byte:02x}"));
}

pub(crate) fn is_print(c: char) -> bool {
    c == ' ' || !(c.is_control() || c.is_whitespace())
}

pub fn unquote(quoted: &str) -> Result<Vec<u8>, WireError> {
    let inner = quoted
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .ok_or(WireError::Quote {
            offset: 0,
            reason: "literal must be wrapped in double quotes",
        })?;

    let bytes = inner.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte == b'"' {
            return Err(WireError::Quote {
                offset: i + 1,
                reason: "unescaped quote",
            });
        }
        if byte != b'\\' {
            out.push(byte);
            i += 1;
            continue;
        }
        let offset = i + 1;
        let Some(&escape) = bytes.get(i + 1) else {
            return Err(WireError::Quote {
                offset,
                reason: "dangling backslash",
            });
        };
        i += 2;
        match escape {
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'\\' | b'\'' | b'"' => out.push(escape),
            b'x' => {
                let value = parse_radix(bytes, i, 2, 16, offset)?;
                out.push(value as u8);
                i += 2;
            }
            b'0'..=b'7' => {
                let value = parse_radix(bytes, i - 1, 3, 8, offset)?;
                let byte = u8::try_from(value).map_err(|_| WireError::Quote {
                    offset,
                    reason: "octal escape out of range",
                })?;
                out.push(byte);
                i += 2;
            }
            b'u' | b'U' => {
                let width = if escape == b'u' { 4 } else { 8 };
                let value = parse_radix(bytes, i, width, 16, offset)?;
                let c = char::from_u32(value).ok_or(WireError::Quote {
                    offset,
                    reason: "escape is not a unicode scalar value",
                })?;
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                i += width;
            }
            _ => {
                return Err(WireError::Quote {
                    offset,
                    reason: "unknown escape",
                });
            }
        }
    }
    Ok(out)
}

fn parse_radix(
    bytes: &[u8],
    start: usize,
    width: usize,
    radix: u32,
    offset: usize,
) -> Result<u32, WireError> {
    let digits = bytes.get(start..start + width).ok_or(WireError::Quote {
        offset,
        reason: "truncated escape",
    })?;
    digits.iter().try_fold(0u32, |acc, digit| {
        (*digit as char)
            .to_digit(radix)
            .map(|d| acc * radix + d)
            .ok_or(WireError::Quote {
                offset,
                reason: "invalid digit in escape",
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_binary_with_lowercase_hex() {
        let raw = b"\x00\xC0\n\t\x00\xBEm\x06\x89Z(\x00\n";
        assert_eq!(quote(raw), r#""\x00\xc0\n\t\x00\xbem\x06\x89Z(\x00\n""#);
    }

    #[test]
    fn quotes_text_with_escapes() {
        assert_eq!(quote(b"say \"hi\"\\"), r#""say \"hi\"\\""#);
        assert_eq!(quote("caf\u{e9} \u{7f}\u{a0}".as_bytes()), r#""café \x7f\u00a0""#);
        assert_eq!(quote("\u{1d11e}".as_bytes()), "\"\u{1d11e}\"");
    }

    #[test]
    fn unquote_accepts_every_escape_form() {
        let decoded = unquote(r#""\a\b\f\n\r\t\v\\\'\"\x41\101é\U0001F600""#).unwrap();
        let mut expected = b"\x07\x08\x0c\n\r\t\x0b\\'\"AA".to_vec();
        expected.extend_from_slice("é😀".as_bytes());
        assert_eq!(decoded, expected);
    }

    #[test]
    fn unquote_rejects_malformed_literals() {
        assert!(unquote("no quotes").is_err());
        assert!(unquote("\"").is_err());
        assert!(unquote(r#""tail\""#).is_err());
        assert!(unquote(r#""\xZZ""#).is_err());
        assert!(unquote(r#""\777""#).is_err());
        assert!(unquote(r#""\q""#).is_err());
        assert!(unquote(r#""a"b""#).is_err());
    }

    #[test]
    fn quote_then_unquote_is_identity_on_every_byte() {
        let all: Vec<u8> = (0..=255u8).collect();
        assert_eq!(unquote(&quote(&all)).unwrap(), all);
    }
}

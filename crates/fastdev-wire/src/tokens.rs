//! Token-list encodings for command-shaped payloads.
//!
//! The command-line form separates tokens with spaces and only quotes tokens
//! that need it (`SET a "\x00\xc0"`), which keeps recorded Redis commands
//! readable. The CSV form quotes every token and separates them with commas.
//! Inside quotes, `"` and `\` are backslash-escaped and unprintable bytes are
//! written as `\xHH`.

use crate::WireError;
use crate::quote::is_print;

pub fn encode_command_line<T: AsRef<[u8]>>(tokens: &[T]) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let token = token.as_ref();
        match std::str::from_utf8(token) {
            Ok(text) if !needs_quoting(text) => out.push_str(text),
            _ => push_quoted(&mut out, token),
        }
    }
    out
}

pub fn encode_csv<T: AsRef<[u8]>>(tokens: &[T]) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_quoted(&mut out, token.as_ref());
    }
    out
}

fn needs_quoting(text: &str) -> bool {
    text.is_empty()
        || text
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '"' || c == '\\')
}

fn push_quoted(out: &mut String, token: &[u8]) {
    out.push('"');
    for chunk in token.utf8_chunks() {
        for c in chunk.valid().chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                c if is_print(c) => out.push(c),
                c => {
                    let mut buf = [0u8; 4];
                    for byte in c.encode_utf8(&mut buf).bytes() {
                        out.push_str(&format!("\\x{byte:02x}"));
                    }
                }
            }
        }
        for byte in chunk.invalid() {
            out.push_str(&format!("\\x{byte:02x}"));
        }
    }
    out.push('"');
}

pub fn decode_command_line(line: &str) -> Result<Vec<Vec<u8>>, WireError> {
    let bytes = line.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i == bytes.len() {
            return Ok(tokens);
        }
        if bytes[i] == b'"' {
            let (token, next) = read_quoted(bytes, i)?;
            if next < bytes.len() && !bytes[next].is_ascii_whitespace() {
                return Err(WireError::Tokens {
                    offset: next,
                    reason: "closing quote must be followed by whitespace",
                });
            }
            tokens.push(token);
            i = next;
        } else {
            let start = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            tokens.push(bytes[start..i].to_vec());
        }
    }
}

pub fn decode_csv(line: &str) -> Result<Vec<Vec<u8>>, WireError> {
    let bytes = line.as_bytes();
    let mut tokens = Vec::new();
    if bytes.is_empty() {
        return Ok(tokens);
    }
    let mut i = 0;
    loop {
        let (token, next) = if bytes.get(i) == Some(&b'"') {
            read_quoted(bytes, i)?
        } else {
            let end = bytes[i..]
                .iter()
                .position(|b| *b == b',')
                .map_or(bytes.len(), |p| i + p);
            (bytes[i..end].to_vec(), end)
        };
        tokens.push(token);
        match bytes.get(next) {
            None => return Ok(tokens),
            Some(b',') => i = next + 1,
            Some(_) => {
                return Err(WireError::Tokens {
                    offset: next,
                    reason: "expected `,` between tokens",
                });
            }
        }
    }
}

/// Reads a quoted token starting at the opening quote. Returns the token and
/// the offset just past the closing quote.
fn read_quoted(bytes: &[u8], open: usize) -> Result<(Vec<u8>, usize), WireError> {
    let mut token = Vec::new();
    let mut i = open + 1;
    while let Some(&byte) = bytes.get(i) {
        match byte {
            b'"' => return Ok((token, i + 1)),
            b'\\' => {
                let escape = bytes.get(i + 1).copied();
                match escape {
                    Some(b'"') | Some(b'\\') => {
                        token.push(bytes[i + 1]);
                        i += 2;
                    }
                    Some(b'n') => {
                        token.push(b'\n');
                        i += 2;
                    }
                    Some(b't') => {
                        token.push(b'\t');
                        i += 2;
                    }
                    Some(b'r') => {
                        token.push(b'\r');
                        i += 2;
                    }
                    Some(b'x') => {
                        let hex = bytes
                            .get(i + 2..i + 4)
                            .and_then(|h| std::str::from_utf8(h).ok())
                            .and_then(|h| u8::from_str_radix(h, 16).ok())
                            .ok_or(WireError::Tokens {
                                offset: i,
                                reason: "malformed \\x escape",
                            })?;
                        token.push(hex);
                        i += 4;
                    }
                    _ => {
                        return Err(WireError::Tokens {
                            offset: i,
                            reason: "unknown escape",
                        });
                    }
                }
            }
            _ => {
                token.push(byte);
                i += 1;
            }
        }
    }
    Err(WireError::Tokens {
        offset: open,
        reason: "unterminated quoted token",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_quotes_only_what_needs_it() {
        let tokens: [&[u8]; 3] = [b"SET", b"a", b"\x00\xC0\n\t\x00\xBEm\x06\x89Z(\x00\n"];
        let line = encode_command_line(&tokens);
        assert_eq!(line, r#"SET a "\x00\xc0\x0a\x09\x00\xbem\x06\x89Z(\x00\x0a""#);
    }

    #[test]
    fn command_line_round_trips_awkward_tokens() {
        let tokens: Vec<Vec<u8>> = vec![
            b"HSET".to_vec(),
            b"".to_vec(),
            b"two words".to_vec(),
            br#"q"uote\slash"#.to_vec(),
            "ünïcode".as_bytes().to_vec(),
            vec![0xff, 0x00, 0x7f],
        ];
        let line = encode_command_line(&tokens);
        assert_eq!(decode_command_line(&line).unwrap(), tokens);
    }

    #[test]
    fn command_line_tolerates_extra_whitespace() {
        assert_eq!(
            decode_command_line("  GET   key  ").unwrap(),
            vec![b"GET".to_vec(), b"key".to_vec()]
        );
        assert!(decode_command_line("").unwrap().is_empty());
    }

    #[test]
    fn command_line_rejects_broken_quotes() {
        assert!(decode_command_line(r#"GET "open"#).is_err());
        assert!(decode_command_line(r#"GET "a"b"#).is_err());
        assert!(decode_command_line(r#"GET "\xZ1""#).is_err());
    }

    #[test]
    fn csv_quotes_every_token() {
        let line = encode_csv(&["id", "name, full", "tab\there"]);
        assert_eq!(line, r#""id","name, full","tab\x09here""#);
        assert_eq!(
            decode_csv(&line).unwrap(),
            vec![b"id".to_vec(), b"name, full".to_vec(), b"tab\there".to_vec()]
        );
    }

    #[test]
    fn csv_accepts_bare_and_empty_tokens() {
        assert_eq!(
            decode_csv(r#"a,"",b"#).unwrap(),
            vec![b"a".to_vec(), Vec::new(), b"b".to_vec()]
        );
        assert!(decode_csv("").unwrap().is_empty());
        assert!(decode_csv(r#""a"x"#).is_err());
    }
}

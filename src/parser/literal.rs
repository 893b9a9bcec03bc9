//! Helpers for JavaScript literals embedded in page script.

/// Byte length of the balanced `{...}` or `[...]` literal starting at
/// `text[0]`, or `None` if the opener is not closed. String contents
/// (single, double or backtick quoted) are skipped so brackets inside
/// them do not count.
pub fn balanced_len(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let (open, close) = match bytes.first()? {
        b'{' => (b'{', b'}'),
        b'[' => (b'[', b']'),
        _ => return None,
    };
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' | b'`' => quote = Some(b),
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Decode the escapes of a JavaScript string literal body.
///
/// Handles the single-character escapes, `\xHH`, `\uXXXX` (including
/// surrogate pairs) and `\u{...}`. Unknown escapes keep the escaped char;
/// invalid code points become U+FFFD.
pub fn unescape_js(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(esc) = chars.next() else {
            out.push('\\');
            break;
        };
        match esc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' => out.push('\0'),
            'x' => {
                let hex: String = take_hex(&mut chars, 2);
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) if hex.len() == 2 => out.push(ch),
                    _ => {
                        out.push('x');
                        out.push_str(&hex);
                    }
                }
            }
            'u' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    let hex: String = chars.by_ref().take_while(|&c| c != '}').collect();
                    out.push(
                        u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .unwrap_or(char::REPLACEMENT_CHARACTER),
                    );
                    continue;
                }
                let hex = take_hex(&mut chars, 4);
                let Ok(unit) = u32::from_str_radix(&hex, 16) else {
                    out.push('u');
                    out.push_str(&hex);
                    continue;
                };
                if (0xD800..0xDC00).contains(&unit) {
                    // High surrogate: a following \uDC00-\uDFFF completes it.
                    let mut lookahead = chars.clone();
                    if lookahead.next() == Some('\\') && lookahead.next() == Some('u') {
                        let low_hex = take_hex(&mut lookahead, 4);
                        if let Ok(low) = u32::from_str_radix(&low_hex, 16) {
                            if (0xDC00..0xE000).contains(&low) {
                                let cp = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
                                out.push(char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER));
                                chars = lookahead;
                                continue;
                            }
                        }
                    }
                    out.push(char::REPLACEMENT_CHARACTER);
                } else {
                    out.push(char::from_u32(unit).unwrap_or(char::REPLACEMENT_CHARACTER));
                }
            }
            '\n' => {}
            other => out.push(other),
        }
    }
    out
}

fn take_hex<I: Iterator<Item = char>>(chars: &mut std::iter::Peekable<I>, max: usize) -> String {
    let mut hex = String::with_capacity(max);
    while hex.len() < max {
        match chars.peek() {
            Some(c) if c.is_ascii_hexdigit() => {
                hex.push(*c);
                chars.next();
            }
            _ => break,
        }
    }
    hex
}

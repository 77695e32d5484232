//! Comment and whitespace compaction for script sources.
//!
//! The defining property: the number of newline characters in the output
//! equals the number of newlines in the input, so line numbers reported by
//! a runtime stack trace remain meaningful after compaction.
//!
//! The scanner understands enough of the guest language to be safe:
//! single-quoted strings (no escapes), double-quoted strings (backslash
//! escapes), backslash escapes in plain code, and `#` comments that only
//! open at line start or after horizontal whitespace (`$#` and `foo#bar`
//! stay code).

/// Returns true when the content carries the guest-language marker: an
/// interpreter directive at file start.
pub fn is_script_source(bytes: &[u8]) -> bool {
    bytes.starts_with(b"#!")
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    /// Copied verbatim.
    Code(&'a str),
    /// Replaced by one newline per newline the comment contained.
    Comment(&'a str),
    /// Normalized: horizontal runs to one space, line endings to `\n`,
    /// indentation after a newline dropped.
    Whitespace(&'a str),
}

fn is_hws(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn is_ws(b: u8) -> bool {
    is_hws(b) || b == b'\n' || b == b'\r'
}

fn scan(input: &str) -> Vec<Token<'_>> {
    let bytes = input.as_bytes();
    let len = bytes.len();
    let mut tokens = Vec::new();
    let mut pos = 0;

    // The interpreter directive is code, not a comment.
    if input.starts_with("#!") {
        let end = input.find('\n').unwrap_or(len);
        tokens.push(Token::Code(&input[..end]));
        pos = end;
    }

    let mut code_start = pos;
    let mut i = pos;
    while i < len {
        let b = bytes[i];
        if b == b'\'' {
            // Single-quoted: verbatim until the closing quote.
            i += 1;
            while i < len && bytes[i] != b'\'' {
                i += 1;
            }
            i = (i + 1).min(len);
        } else if b == b'"' {
            // Double-quoted: backslash escapes the next byte.
            i += 1;
            while i < len && bytes[i] != b'"' {
                i += if bytes[i] == b'\\' { 2 } else { 1 };
            }
            i = (i + 1).min(len);
        } else if b == b'\\' {
            i = (i + 2).min(len);
        } else if b == b'#' && (i == 0 || is_ws(bytes[i - 1])) {
            if code_start < i {
                tokens.push(Token::Code(&input[code_start..i]));
            }
            // The line ending (and a preceding \r) belongs to the
            // following whitespace token, not the comment.
            let mut end = input[i..].find('\n').map(|n| i + n).unwrap_or(len);
            if end > i && bytes[end - 1] == b'\r' {
                end -= 1;
            }
            tokens.push(Token::Comment(&input[i..end]));
            i = end;
            code_start = i;
        } else if is_ws(b) {
            if code_start < i {
                tokens.push(Token::Code(&input[code_start..i]));
            }
            let start = i;
            while i < len && is_ws(bytes[i]) {
                i += 1;
            }
            tokens.push(Token::Whitespace(&input[start..i]));
            code_start = i;
        } else {
            i += 1;
        }
    }
    if code_start < len {
        tokens.push(Token::Code(&input[code_start..]));
    }
    tokens
}

/// Count line endings: `\r\n`, `\r` and `\n` each count once.
fn newline_count(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut count = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                count += 1;
                i += 1;
            }
            b'\r' => {
                count += 1;
                i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
            }
            _ => i += 1,
        }
    }
    count
}

/// Compact a script source: strip comments, normalize whitespace, keep the
/// newline count identical to the input.
pub fn compact(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (idx, token) in scan(input).iter().enumerate() {
        match token {
            Token::Code(s) => out.push_str(s),
            Token::Comment(s) => {
                for _ in 0..newline_count(s) {
                    out.push('\n');
                }
            }
            Token::Whitespace(s) => {
                let newlines = newline_count(s);
                if newlines == 0 {
                    // Leading whitespace of the first line is dropped.
                    if idx > 0 {
                        out.push(' ');
                    }
                } else {
                    for _ in 0..newlines {
                        out.push('\n');
                    }
                }
            }
        }
    }
    out
}

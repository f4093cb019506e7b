// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! Quote-aware argv scanner for `-c` command strings. Not a shell: no
//! escapes, no variable expansion, no globbing. Whitespace splits tokens;
//! `"`, `'`, and `` ` `` open a verbatim bracket that the same character
//! closes; argv caps at [`MAX_ARGS`]; a non-printable byte ends scanning.

/// One slot is implicitly reserved for a terminator in the original C
/// scanner's fixed-size argv array; the Rust port has no such array, but
/// keeps the same effective cap so command lines behave identically.
pub const MAX_ARGS: usize = 32 - 1;

fn is_quote(b: u8) -> bool {
    matches!(b, b'"' | b'\'' | b'`')
}

fn is_printable_ascii(b: u8) -> bool {
    (0x20..=0x7e).contains(&b) || b == b'\t'
}

/// Splits `line` into argv tokens. Returns at most [`MAX_ARGS`] tokens.
pub fn tokenize(line: &str) -> Vec<String> {
    let bytes = line.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() && tokens.len() < MAX_ARGS {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        if !is_printable_ascii(bytes[i]) {
            break;
        }

        let start;
        let end;
        if is_quote(bytes[i]) {
            let quote = bytes[i];
            start = i + 1;
            let mut j = start;
            while j < bytes.len() && bytes[j] != quote {
                if !is_printable_ascii(bytes[j]) {
                    break;
                }
                j += 1;
            }
            end = j;
            i = if j < bytes.len() && bytes[j] == quote { j + 1 } else { j };
        } else {
            start = i;
            let mut j = start;
            while j < bytes.len() && !bytes[j].is_ascii_whitespace() {
                if !is_printable_ascii(bytes[j]) {
                    break;
                }
                j += 1;
            }
            end = j;
            i = j;
        }

        match std::str::from_utf8(&bytes[start..end]) {
            Ok(token) => tokens.push(token.to_string()),
            Err(_) => break,
        }
    }

    tokens
}

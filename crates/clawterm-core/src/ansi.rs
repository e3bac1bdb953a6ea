//! ANSI escape sequence stripping.
//!
//! Terminal output carries colour codes, cursor movement and window-title
//! sequences. Pattern matching and the plain transcript both want the text
//! only, so these sequences are removed before either sees a chunk.

const ESC: u8 = 0x1B;
const BEL: u8 = 0x07;

/// Strip escape sequences from raw terminal bytes, returning UTF-8 text.
///
/// Removes CSI (`ESC [`), OSC (`ESC ]` up to BEL or `ESC \`), two-byte
/// escapes and carriage returns. Invalid UTF-8 is replaced lossily.
///
/// 8-bit C1 introducers are left alone: `0x9B` is also a UTF-8 continuation
/// byte, and viewers run the session in UTF-8 mode.
pub fn strip_ansi(input: &[u8]) -> String {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        match input[i] {
            ESC => {
                i += 1;
                match input.get(i) {
                    None => break,
                    Some(b'[') => i = skip_csi(input, i + 1),
                    Some(b']') => i = skip_osc(input, i + 1),
                    // charset designation: ESC ( B
                    Some(b'(' | b')' | b'*' | b'+') => i += 2,
                    // ESC 7, ESC 8, ESC M ...
                    Some(_) => i += 1,
                }
            }
            b'\r' => i += 1,
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    match String::from_utf8(out) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Skip parameter/intermediate bytes and the final byte of a CSI sequence.
fn skip_csi(input: &[u8], mut i: usize) -> usize {
    while i < input.len() && (0x20..=0x3F).contains(&input[i]) {
        i += 1;
    }
    if i < input.len() && (0x40..=0x7E).contains(&input[i]) {
        i += 1;
    }
    i
}

/// Skip an OSC body up to and including its terminator.
fn skip_osc(input: &[u8], mut i: usize) -> usize {
    while i < input.len() {
        if input[i] == BEL {
            return i + 1;
        }
        if input[i] == ESC && input.get(i + 1) == Some(&b'\\') {
            return i + 2;
        }
        i += 1;
    }
    i
}

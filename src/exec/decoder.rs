//! Line decoding for child process output.
//!
//! Raw lines read from a pipe may carry `\r\n` or `\n` endings, bytes in a
//! legacy console codepage, and terminal color codes. [`decode_line`] turns
//! such a chunk into a single clean, `\n`-terminated line that can be
//! inserted into a plain text buffer.

use std::sync::LazyLock;

use regex::Regex;

/// `ESC [ <parameter bytes> <intermediate bytes> <final byte>`
static ANSI_CSI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]").expect("ANSI pattern is valid")
});

/// Decode one raw line read from a child stream.
///
/// Trailing line terminators are stripped, the bytes are decoded (see
/// [`force_decode`]), escape sequences are removed and a single `\n` is
/// appended.
pub fn decode_line(raw: &[u8]) -> String {
    let trimmed = trim_line_end(raw);
    let text = force_decode(trimmed);
    let text = text.trim_start_matches(['\n', '\r']);
    let mut line = strip_ansi(text);
    line.push('\n');
    line
}

/// Decode a whole buffer, falling back to the console codepage on Windows
/// and to lossy substitution everywhere else.
pub fn force_decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(err) => {
            tracing::debug!(error = %err, "output is not valid UTF-8, trying fallback");
            decode_fallback(bytes)
        }
    }
}

/// Remove ANSI/VT100 CSI sequences such as color and cursor codes.
pub fn strip_ansi(text: &str) -> String {
    ANSI_CSI.replace_all(text, "").into_owned()
}

fn trim_line_end(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &raw[..end]
}

#[cfg(not(windows))]
fn decode_fallback(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Decode using the active console output codepage. Legacy console tools on
/// non-English installs write in that codepage rather than UTF-8.
#[cfg(windows)]
fn decode_fallback(bytes: &[u8]) -> String {
    use windows::Win32::Globalization::{MULTI_BYTE_TO_WIDE_CHAR_FLAGS, MultiByteToWideChar};
    use windows::Win32::System::Console::GetConsoleOutputCP;

    if bytes.is_empty() {
        return String::new();
    }

    // SAFETY: both calls receive valid slices for the duration of the call
    // and MultiByteToWideChar never writes past the provided buffer.
    unsafe {
        let codepage = GetConsoleOutputCP();
        if codepage == 0 {
            return String::from_utf8_lossy(bytes).into_owned();
        }
        let flags = MULTI_BYTE_TO_WIDE_CHAR_FLAGS(0);
        let needed = MultiByteToWideChar(codepage, flags, bytes, None);
        if needed <= 0 {
            return String::from_utf8_lossy(bytes).into_owned();
        }
        let mut wide = vec![0u16; needed as usize];
        let written = MultiByteToWideChar(codepage, flags, bytes, Some(&mut wide));
        if written <= 0 {
            return String::from_utf8_lossy(bytes).into_owned();
        }
        wide.truncate(written as usize);
        String::from_utf16_lossy(&wide)
    }
}

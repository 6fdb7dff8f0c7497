//! Character encoding detection for uploaded data sources.

use super::SourceError;
use encoding_rs::{DecoderResult, Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};
use log::warn;
use serde::Serialize;

/// Bytes inspected when trying candidate encodings.
pub const SNIFF_LEN: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
    Cp1252,
    Iso8859_1,
}

impl SourceEncoding {
    pub fn label(self) -> &'static str {
        match self {
            SourceEncoding::Utf8 => "utf-8",
            SourceEncoding::Utf16Le => "utf-16le",
            SourceEncoding::Utf16Be => "utf-16be",
            SourceEncoding::Latin1 => "latin-1",
            SourceEncoding::Cp1252 => "cp1252",
            SourceEncoding::Iso8859_1 => "iso-8859-1",
        }
    }

    /// Backing decoder; `None` for the single-byte Latin-1 family, which
    /// maps bytes straight to code points.
    fn decoder(self) -> Option<&'static Encoding> {
        match self {
            SourceEncoding::Utf8 => Some(UTF_8),
            SourceEncoding::Utf16Le => Some(UTF_16LE),
            SourceEncoding::Utf16Be => Some(UTF_16BE),
            SourceEncoding::Cp1252 => Some(WINDOWS_1252),
            SourceEncoding::Latin1 | SourceEncoding::Iso8859_1 => None,
        }
    }
}

/// Tried in order after BOM sniffing.
const CANDIDATES: [SourceEncoding; 5] = [
    SourceEncoding::Utf8,
    SourceEncoding::Utf16Le,
    SourceEncoding::Latin1,
    SourceEncoding::Cp1252,
    SourceEncoding::Iso8859_1,
];

#[derive(Debug)]
pub struct Decoded {
    pub text: String,
    pub encoding: SourceEncoding,
    pub had_bom: bool,
}

pub fn decode(bytes: &[u8]) -> Result<Decoded, SourceError> {
    if let Some((encoding, bom_len)) = sniff_bom(bytes) {
        return Ok(Decoded {
            text: decode_all(encoding, &bytes[bom_len..]),
            encoding,
            had_bom: true,
        });
    }

    let truncated = bytes.len() > SNIFF_LEN;
    let sample = &bytes[..bytes.len().min(SNIFF_LEN)];
    CANDIDATES
        .iter()
        .copied()
        .find(|&encoding| decodes_cleanly(encoding, sample, truncated))
        .map(|encoding| Decoded {
            text: decode_all(encoding, bytes),
            encoding,
            had_bom: false,
        })
        .ok_or(SourceError::UnsupportedEncoding)
}

fn sniff_bom(bytes: &[u8]) -> Option<(SourceEncoding, usize)> {
    match bytes {
        [0xEF, 0xBB, 0xBF, ..] => Some((SourceEncoding::Utf8, 3)),
        [0xFF, 0xFE, ..] => Some((SourceEncoding::Utf16Le, 2)),
        [0xFE, 0xFF, ..] => Some((SourceEncoding::Utf16Be, 2)),
        _ => None,
    }
}

fn decodes_cleanly(encoding: SourceEncoding, sample: &[u8], truncated: bool) -> bool {
    // Without a BOM, UTF-16LE would happily decode most even-length ASCII
    // as CJK text; only consider it when the high bytes look like ASCII's.
    if encoding == SourceEncoding::Utf16Le && !looks_like_utf16le(sample) {
        return false;
    }
    let text = match encoding.decoder() {
        Some(decoder) => match decode_sample(decoder, sample, !truncated) {
            Some(text) => text,
            None => return false,
        },
        None => latin1(sample),
    };
    !text.chars().any(is_disallowed_control)
}

fn looks_like_utf16le(sample: &[u8]) -> bool {
    let odd = sample.iter().skip(1).step_by(2);
    let (nul, total) = odd.fold((0usize, 0usize), |(nul, total), &b| {
        (nul + usize::from(b == 0), total + 1)
    });
    total > 0 && nul * 2 >= total
}

fn decode_sample(encoding: &'static Encoding, sample: &[u8], last: bool) -> Option<String> {
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let capacity = decoder.max_utf8_buffer_length_without_replacement(sample.len())?;
    let mut text = String::with_capacity(capacity);
    let (result, _read) = decoder.decode_to_string_without_replacement(sample, &mut text, last);
    match result {
        DecoderResult::InputEmpty => Some(text),
        DecoderResult::OutputFull | DecoderResult::Malformed(_, _) => None,
    }
}

fn decode_all(encoding: SourceEncoding, bytes: &[u8]) -> String {
    match encoding.decoder() {
        Some(decoder) => {
            let (text, had_errors) = decoder.decode_without_bom_handling(bytes);
            if had_errors {
                warn!(
                    "data source decoded as {} with replacement characters past the first {} bytes",
                    encoding.label(),
                    SNIFF_LEN
                );
            }
            text.into_owned()
        }
        None => latin1(bytes),
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// C0 controls other than TAB/LF/CR, DEL excluded, and the C1 block.
fn is_disallowed_control(c: char) -> bool {
    match c {
        '\t' | '\n' | '\r' => false,
        '\u{0}'..='\u{1F}' | '\u{80}'..='\u{9F}' => true,
        _ => false,
    }
}

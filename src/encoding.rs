//! Source encoding detection and transcoding to UTF-8.
//!
//! Exports reach us as UTF-8 (with or without BOM), UTF-16 from spreadsheet "Unicode text"
//! saves, or Windows-1252 from older box-office software. Detection is heuristic:
//!
//! 1. A byte-order mark wins outright and is stripped
//! 2. BOM-less UTF-16, recognised by NUL bytes sitting on one parity of offsets
//! 3. Strict UTF-8
//! 4. Windows-1252, kept only while the decoded text looks like text (few control chars)

use crate::config::MAX_CONTROL_CHAR_RATIO;
use crate::error::ImportError;
use encoding_rs::{DecoderResult, Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};
use std::borrow::Cow;
use tracing::debug;

/// Share of code units that must carry a NUL high byte to call BOM-less input UTF-16
const UTF16_NUL_RATIO: f64 = 0.75;

/// Returns `raw` as UTF-8 without a BOM, borrowing when no conversion was needed.
pub fn normalize(raw: &[u8]) -> Result<Cow<'_, [u8]>, ImportError> {
    let encoding = detect(raw)?;
    debug!(encoding = encoding.name(), bytes = raw.len(), "Detected source encoding");
    transcode(raw, encoding)
}

/// Picks the most probable encoding of `raw`.
pub fn detect(raw: &[u8]) -> Result<&'static Encoding, ImportError> {
    if let Some((encoding, _)) = Encoding::for_bom(raw) {
        return Ok(encoding);
    }
    // NUL-laden UTF-16 is also valid UTF-8, so it is checked first
    if let Some(encoding) = detect_utf16(raw) {
        return Ok(encoding);
    }
    if std::str::from_utf8(raw).is_ok() {
        return Ok(UTF_8);
    }
    if looks_like_text(raw) {
        return Ok(WINDOWS_1252);
    }
    Err(ImportError::EncodingUndetectable)
}

/// Decodes `raw` from `encoding` into UTF-8, stripping a matching BOM.
pub fn transcode<'a>(
    raw: &'a [u8],
    encoding: &'static Encoding,
) -> Result<Cow<'a, [u8]>, ImportError> {
    let (bom_encoding, bom_len) = Encoding::for_bom(raw).unwrap_or((encoding, 0));
    let body = if bom_encoding == encoding {
        &raw[bom_len..]
    } else {
        raw
    };

    match encoding.decode_without_bom_handling_and_without_replacement(body) {
        Some(Cow::Borrowed(text)) => Ok(Cow::Borrowed(text.as_bytes())),
        Some(Cow::Owned(text)) => Ok(Cow::Owned(text.into_bytes())),
        None => Err(ImportError::TranscodeFailed {
            encoding: encoding.name(),
            offset: raw.len() - body.len() + malformed_offset(encoding, body),
        }),
    }
}

/// Offset in `body` of the first sequence `encoding` cannot decode.
fn malformed_offset(encoding: &'static Encoding, body: &[u8]) -> usize {
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let mut text = String::with_capacity(body.len());
    let mut read_total = 0;
    loop {
        let (result, read) =
            decoder.decode_to_string_without_replacement(&body[read_total..], &mut text, true);
        read_total += read;
        match result {
            DecoderResult::Malformed(bad, extra) => {
                return read_total.saturating_sub(bad as usize + extra as usize);
            }
            DecoderResult::OutputFull => text.reserve(body.len() - read_total + 16),
            DecoderResult::InputEmpty => return read_total,
        }
    }
}

fn detect_utf16(raw: &[u8]) -> Option<&'static Encoding> {
    if raw.len() < 2 || raw.len() % 2 != 0 {
        return None;
    }
    let units = raw.len() / 2;
    let (mut even_nuls, mut odd_nuls) = (0usize, 0usize);
    for pair in raw.chunks_exact(2) {
        if pair[0] == 0 {
            even_nuls += 1;
        }
        if pair[1] == 0 {
            odd_nuls += 1;
        }
    }
    let threshold = (units as f64 * UTF16_NUL_RATIO).ceil() as usize;
    // Latin text in UTF-16LE puts the NUL high byte second
    if odd_nuls >= threshold && even_nuls == 0 {
        Some(UTF_16LE)
    } else if even_nuls >= threshold && odd_nuls == 0 {
        Some(UTF_16BE)
    } else {
        None
    }
}

fn looks_like_text(raw: &[u8]) -> bool {
    let (text, _, _) = WINDOWS_1252.decode(raw);
    let mut total = 0usize;
    let mut controls = 0usize;
    for ch in text.chars() {
        total += 1;
        if ch.is_control() && !matches!(ch, '\t' | '\r' | '\n') {
            controls += 1;
        }
    }
    total > 0 && (controls as f64 / total as f64) < MAX_CONTROL_CHAR_RATIO
}

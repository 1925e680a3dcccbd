//! Decompression layer
//!
//! Normalises arbitrary response bytes, possibly compressed and possibly
//! mislabelled, into text. This never fails: when every decoder refuses the
//! payload it falls back to lossy UTF-8, and then to Latin-1.
//!
//! Order of attempts:
//! 1. The declared `Content-Encoding` (gzip, deflate, br)
//! 2. Magic-byte sniffing when the payload looks binary (gzip `1F 8B`,
//!    zlib `78 xx`, brotli heuristics), with raw inflate as a zlib fallback
//! 3. Plain text decoding

use encoding_rs::WINDOWS_1252;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::io::Read;
use tracing::debug;

/// Bytes inspected when deciding whether a payload is binary
const SNIFF_WINDOW: usize = 100;

/// Above this share of U+FFFD the payload is re-read as Latin-1
const MAX_REPLACEMENT_RATIO: f64 = 0.10;

/// Upper bound on decompressed size
const MAX_DECODED_BYTES: u64 = 64 * 1024 * 1024;

/// How a payload was turned into text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMethod {
    Identity,
    Gzip,
    Zlib,
    RawDeflate,
    Brotli,
    Latin1,
}

impl DecodeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
            Self::Zlib => "zlib",
            Self::RawDeflate => "raw-deflate",
            Self::Brotli => "brotli",
            Self::Latin1 => "latin1",
        }
    }
}

/// Decoded payload
#[derive(Debug, Clone)]
pub struct Decoded {
    pub text: String,
    pub method: DecodeMethod,
    /// Replacement characters were substituted somewhere
    pub lossy: bool,
}

/// Decode a response body into text
pub fn decompress(bytes: &[u8], content_encoding: Option<&str>) -> Decoded {
    if bytes.is_empty() {
        return Decoded {
            text: String::new(),
            method: DecodeMethod::Identity,
            lossy: false,
        };
    }

    if let Some(encoding) = content_encoding {
        if let Some(decoded) = decode_declared(bytes, encoding) {
            return decoded;
        }
        debug!(encoding, "Declared content encoding did not decode, sniffing");
    }

    if looks_binary(bytes) || std::str::from_utf8(bytes).is_err() {
        for method in sniff(bytes) {
            if let Some(raw) = inflate(bytes, method) {
                let decoded = to_text(&raw, method);
                if looks_like_text(&decoded.text) {
                    return decoded;
                }
            }
        }
        debug!(len = bytes.len(), "Binary payload matched no decoder");
    }

    to_text(bytes, DecodeMethod::Identity)
}

fn decode_declared(bytes: &[u8], encoding: &str) -> Option<Decoded> {
    let encoding = encoding.trim().to_ascii_lowercase();
    let candidates: &[DecodeMethod] = match encoding.as_str() {
        "gzip" | "x-gzip" => &[DecodeMethod::Gzip],
        "deflate" => &[DecodeMethod::Zlib, DecodeMethod::RawDeflate],
        "br" => &[DecodeMethod::Brotli],
        _ => return None,
    };

    candidates
        .iter()
        .filter_map(|method| inflate(bytes, *method).map(|raw| to_text(&raw, *method)))
        .find(|decoded| !decoded.lossy || looks_like_text(&decoded.text))
}

/// Control characters in the first bytes mean compressed or binary data
fn looks_binary(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .take(SNIFF_WINDOW)
        .any(|b| matches!(b, 0x00..=0x08 | 0x0E..=0x1F))
}

/// Candidate decoders for a binary payload, most likely first
fn sniff(bytes: &[u8]) -> Vec<DecodeMethod> {
    let mut methods = Vec::with_capacity(4);
    match bytes {
        [0x1F, 0x8B, ..] => methods.push(DecodeMethod::Gzip),
        [0x78, 0x01 | 0x5E | 0x9C | 0xDA, ..] => {
            methods.push(DecodeMethod::Zlib);
            methods.push(DecodeMethod::RawDeflate);
        }
        [first, ..] if is_brotli_lead(*first) => methods.push(DecodeMethod::Brotli),
        _ => {}
    }

    for fallback in [DecodeMethod::Brotli, DecodeMethod::RawDeflate] {
        if !methods.contains(&fallback) {
            methods.push(fallback);
        }
    }
    methods
}

fn is_brotli_lead(byte: u8) -> bool {
    matches!(byte & 0xE0, 0x80 | 0xC0)
}

fn inflate(bytes: &[u8], method: DecodeMethod) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let result = match method {
        DecodeMethod::Gzip => GzDecoder::new(bytes)
            .take(MAX_DECODED_BYTES)
            .read_to_end(&mut out),
        DecodeMethod::Zlib => ZlibDecoder::new(bytes)
            .take(MAX_DECODED_BYTES)
            .read_to_end(&mut out),
        DecodeMethod::RawDeflate => DeflateDecoder::new(bytes)
            .take(MAX_DECODED_BYTES)
            .read_to_end(&mut out),
        DecodeMethod::Brotli => brotli::Decompressor::new(bytes, 4096)
            .take(MAX_DECODED_BYTES)
            .read_to_end(&mut out),
        DecodeMethod::Identity | DecodeMethod::Latin1 => return Some(bytes.to_vec()),
    };

    match result {
        Ok(n) if n > 0 => Some(out),
        _ => None,
    }
}

/// Text fallback: UTF-8 unless too many bytes had to be replaced
fn to_text(bytes: &[u8], method: DecodeMethod) -> Decoded {
    let utf8 = String::from_utf8_lossy(bytes);
    let replacements = utf8.chars().filter(|c| *c == '\u{FFFD}').count();
    let total = utf8.chars().count().max(1);

    if (replacements as f64) / (total as f64) < MAX_REPLACEMENT_RATIO {
        return Decoded {
            lossy: replacements > 0,
            text: utf8.into_owned(),
            method,
        };
    }

    let (text, _, _) = WINDOWS_1252.decode(bytes);
    Decoded {
        text: text.into_owned(),
        method: DecodeMethod::Latin1,
        lossy: true,
    }
}

/// Markup, JSON, or mostly printable text
fn looks_like_text(text: &str) -> bool {
    if text.contains('<') || text.contains('{') {
        return true;
    }
    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    let printable = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .count();
    printable * 10 >= total * 9
}

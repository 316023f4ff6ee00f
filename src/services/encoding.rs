use std::borrow::Cow;
use std::sync::OnceLock;

use chardetng::EncodingDetector;
use encoding_rs::{DecoderResult, Encoding, UTF_16BE, UTF_16LE, UTF_8};
use regex::Regex;
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

const BOM_UTF8: &[u8] = &[0xEF, 0xBB, 0xBF];
const BOM_UTF16LE: &[u8] = &[0xFF, 0xFE];
const BOM_UTF16BE: &[u8] = &[0xFE, 0xFF];
const BOM_UTF32LE: &[u8] = &[0xFF, 0xFE, 0x00, 0x00];
const BOM_UTF32BE: &[u8] = &[0x00, 0x00, 0xFE, 0xFF];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    /// Any single- or multi-byte ASCII-compatible charset `encoding_rs` knows.
    Legacy(&'static Encoding),
}

impl TextEncoding {
    pub fn name(self) -> String {
        match self {
            TextEncoding::Utf8 => "utf-8".into(),
            TextEncoding::Utf16Le => "utf-16le".into(),
            TextEncoding::Utf16Be => "utf-16be".into(),
            TextEncoding::Utf32Le => "utf-32le".into(),
            TextEncoding::Utf32Be => "utf-32be".into(),
            TextEncoding::Legacy(enc) => enc.name().to_lowercase(),
        }
    }

    fn is_wide(self) -> bool {
        matches!(
            self,
            TextEncoding::Utf16Le
                | TextEncoding::Utf16Be
                | TextEncoding::Utf32Le
                | TextEncoding::Utf32Be
        )
    }

    /// Byte-order mark written ahead of text in this encoding, if it has one.
    fn preamble(self) -> &'static [u8] {
        match self {
            TextEncoding::Utf8 => BOM_UTF8,
            TextEncoding::Utf16Le => BOM_UTF16LE,
            TextEncoding::Utf16Be => BOM_UTF16BE,
            TextEncoding::Utf32Le => BOM_UTF32LE,
            TextEncoding::Utf32Be => BOM_UTF32BE,
            TextEncoding::Legacy(_) => &[],
        }
    }

    fn from_encoding_rs(enc: &'static Encoding) -> Self {
        if enc == UTF_8 {
            TextEncoding::Utf8
        } else if enc == UTF_16LE {
            TextEncoding::Utf16Le
        } else if enc == UTF_16BE {
            TextEncoding::Utf16Be
        } else {
            TextEncoding::Legacy(enc)
        }
    }

    /// Resolves an encoding label. Endianness-free `utf-16`/`utf-32`
    /// labels take the byte order of the BOM when there is one.
    pub fn from_label(label: &str, bom: Option<TextEncoding>) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase();

        let resolved = match normalized.as_str() {
            "utf-8" | "utf8" => TextEncoding::Utf8,
            "utf-16" | "utf16" | "unicode" => match bom {
                Some(TextEncoding::Utf16Be) => TextEncoding::Utf16Be,
                _ => TextEncoding::Utf16Le,
            },
            "utf-16le" | "utf16le" => TextEncoding::Utf16Le,
            "utf-16be" | "utf16be" => TextEncoding::Utf16Be,
            "utf-32" | "utf32" => match bom {
                Some(TextEncoding::Utf32Be) => TextEncoding::Utf32Be,
                _ => TextEncoding::Utf32Le,
            },
            "utf-32le" | "utf32le" => TextEncoding::Utf32Le,
            "utf-32be" | "utf32be" => TextEncoding::Utf32Be,
            other => TextEncoding::from_encoding_rs(Encoding::for_label(other.as_bytes())?),
        };

        Some(resolved)
    }
}

impl Serialize for TextEncoding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LineEnding {
    #[serde(rename = "\n")]
    Lf,
    #[serde(rename = "\r\n")]
    CrLf,
}

impl LineEnding {
    /// `\r\n` as soon as one instance exists, `\n` otherwise.
    pub fn detect(text: &str) -> Self {
        if text.contains("\r\n") {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }

    /// Rewrites every `\r\n`, lone `\r` and lone `\n` to this style.
    pub fn normalize(self, text: &str) -> String {
        let unified = text.replace("\r\n", "\n").replace('\r', "\n");
        match self {
            LineEnding::Lf => unified,
            LineEnding::CrLf => unified.replace('\n', "\r\n"),
        }
    }
}

/// How a document was decoded; the same values drive re-encoding on save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingContext {
    pub encoding: TextEncoding,
    #[serde(skip)]
    pub bom: &'static [u8],
    pub has_bom: bool,
    pub declared_encoding: Option<String>,
    pub line_ending: LineEnding,
}

pub fn detect_bom(bytes: &[u8]) -> Option<(TextEncoding, &'static [u8])> {
    // UTF-32LE shares its first two bytes with UTF-16LE, so it goes first.
    if bytes.starts_with(BOM_UTF32LE) {
        Some((TextEncoding::Utf32Le, BOM_UTF32LE))
    } else if bytes.starts_with(BOM_UTF32BE) {
        Some((TextEncoding::Utf32Be, BOM_UTF32BE))
    } else if bytes.starts_with(BOM_UTF8) {
        Some((TextEncoding::Utf8, BOM_UTF8))
    } else if bytes.starts_with(BOM_UTF16LE) {
        Some((TextEncoding::Utf16Le, BOM_UTF16LE))
    } else if bytes.starts_with(BOM_UTF16BE) {
        Some((TextEncoding::Utf16Be, BOM_UTF16BE))
    } else {
        None
    }
}

pub fn declared_encoding_name(text: &str) -> Option<String> {
    static DECLARATION: OnceLock<Regex> = OnceLock::new();
    let re = DECLARATION.get_or_init(|| {
        Regex::new(r#"(?i)<\?xml[^>]*encoding\s*=\s*["']([^"']+)["']"#)
            .expect("declaration pattern is valid")
    });

    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Decodes raw document bytes and records how to write them back.
pub fn decode(bytes: &[u8]) -> CoreResult<(String, EncodingContext)> {
    let bom_info = detect_bom(bytes);
    let bom_encoding = bom_info.map(|(enc, _)| enc);
    let mut bom: &'static [u8] = bom_info.map(|(_, b)| b).unwrap_or(&[]);
    let body = &bytes[bom.len()..];

    let mut encoding = bom_encoding.unwrap_or(TextEncoding::Utf8);

    // The declaration is ASCII, so a lossy first pass is enough to find it.
    let sniffed = decode_lossy(encoding, body);
    let declared = declared_encoding_name(&sniffed);

    match declared.as_deref() {
        Some(label) => match TextEncoding::from_label(label, bom_encoding) {
            Some(candidate) if candidate != encoding => {
                if bom_encoding.is_some() {
                    warn!(
                        declared = label,
                        bom = %encoding.name(),
                        "declared encoding disagrees with byte-order mark; re-decoding"
                    );
                    encoding = candidate;
                    bom = candidate.preamble();
                } else if candidate.is_wide() {
                    warn!(
                        declared = label,
                        "declared wide encoding on a document without byte-order mark; ignoring"
                    );
                } else {
                    debug!(declared = label, "re-decoding with declared encoding");
                    encoding = candidate;
                }
            }
            Some(_) => {}
            None => warn!(declared = label, "unknown declared encoding; keeping {}", encoding.name()),
        },
        None => {
            if bom_encoding.is_none() && std::str::from_utf8(body).is_err() {
                encoding = guess_encoding(body);
                debug!(guessed = %encoding.name(), "document is not UTF-8; using detected charset");
            }
        }
    }

    let text = decode_strict(encoding, body)?;
    let line_ending = LineEnding::detect(&text);

    Ok((
        text,
        EncodingContext {
            encoding,
            bom,
            has_bom: !bom.is_empty(),
            declared_encoding: declared,
            line_ending,
        },
    ))
}

/// Encodes `text` exactly as the source was encoded, BOM included.
pub fn encode(text: &str, ctx: &EncodingContext) -> CoreResult<Vec<u8>> {
    let mut out = Vec::with_capacity(ctx.bom.len() + text.len() * 2);
    out.extend_from_slice(ctx.bom);
    encode_into(text, ctx.encoding, &mut out)?;
    Ok(out)
}

/// Encodes a piece of a document, without any byte-order mark.
pub fn encode_fragment(text: &str, encoding: TextEncoding) -> CoreResult<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() * 2);
    encode_into(text, encoding, &mut out)?;
    Ok(out)
}

fn encode_into(text: &str, encoding: TextEncoding, out: &mut Vec<u8>) -> CoreResult<()> {
    match encoding {
        TextEncoding::Utf8 => out.extend_from_slice(text.as_bytes()),
        TextEncoding::Utf16Le => text
            .encode_utf16()
            .for_each(|u| out.extend_from_slice(&u.to_le_bytes())),
        TextEncoding::Utf16Be => text
            .encode_utf16()
            .for_each(|u| out.extend_from_slice(&u.to_be_bytes())),
        TextEncoding::Utf32Le => text
            .chars()
            .for_each(|c| out.extend_from_slice(&(c as u32).to_le_bytes())),
        TextEncoding::Utf32Be => text
            .chars()
            .for_each(|c| out.extend_from_slice(&(c as u32).to_be_bytes())),
        TextEncoding::Legacy(enc) => {
            let (bytes, _, unmappable) = enc.encode(text);
            if unmappable {
                return Err(CoreError::Encode {
                    encoding: encoding.name(),
                    detail: "text contains characters the charset cannot represent".into(),
                });
            }
            out.extend_from_slice(&bytes);
        }
    }

    Ok(())
}

/// Maps ascending byte offsets in the decoded `text` back to offsets in
/// the BOM-less `body` it was decoded from. Every offset must fall on a
/// character boundary of both.
pub fn source_offsets(
    text: &str,
    body: &[u8],
    encoding: TextEncoding,
    targets: &[usize],
) -> CoreResult<Vec<usize>> {
    let width: fn(char) -> usize = match encoding {
        TextEncoding::Utf8 => return Ok(targets.to_vec()),
        TextEncoding::Utf16Le | TextEncoding::Utf16Be => |c: char| c.len_utf16() * 2,
        TextEncoding::Utf32Le | TextEncoding::Utf32Be => |_: char| 4,
        TextEncoding::Legacy(enc) => return legacy_offsets(enc, body, targets),
    };

    let mut out = Vec::with_capacity(targets.len());
    let mut pending = targets.iter().copied().peekable();
    let mut source = 0usize;

    for (at, c) in text.char_indices().chain(std::iter::once((text.len(), '\0'))) {
        while pending.next_if_eq(&at).is_some() {
            out.push(source);
        }
        source += width(c);
    }

    if out.len() != targets.len() {
        return Err(CoreError::Malformed("offset is not on a character boundary".into()));
    }
    Ok(out)
}

/// Legacy decoders are not always injective, so positions are found by
/// feeding the decoder one byte at a time and watching its output grow.
fn legacy_offsets(
    enc: &'static Encoding,
    body: &[u8],
    targets: &[usize],
) -> CoreResult<Vec<usize>> {
    let failed = || CoreError::Decode(enc.name().to_lowercase());
    let mut decoder = enc.new_decoder_without_bom_handling();
    let mut scratch = [0u8; 32];
    let mut out = Vec::with_capacity(targets.len());
    let mut pending = targets.iter().copied().peekable();
    let mut produced = 0usize;

    for (at, byte) in body.iter().enumerate() {
        while pending.next_if_eq(&produced).is_some() {
            out.push(at);
        }
        let (result, _, written) = decoder.decode_to_utf8_without_replacement(
            std::slice::from_ref(byte),
            &mut scratch,
            false,
        );
        if !matches!(result, DecoderResult::InputEmpty) {
            return Err(failed());
        }
        produced += written;
    }

    let (result, _, written) = decoder.decode_to_utf8_without_replacement(&[], &mut scratch, true);
    if !matches!(result, DecoderResult::InputEmpty) {
        return Err(failed());
    }
    produced += written;
    while pending.next_if_eq(&produced).is_some() {
        out.push(body.len());
    }

    if out.len() != targets.len() {
        return Err(CoreError::Malformed("offset is not on a character boundary".into()));
    }
    Ok(out)
}

fn guess_encoding(body: &[u8]) -> TextEncoding {
    let mut detector = EncodingDetector::new();
    detector.feed(body, true);
    TextEncoding::from_encoding_rs(detector.guess(None, true))
}

fn decode_lossy(encoding: TextEncoding, body: &[u8]) -> Cow<'_, str> {
    match encoding {
        TextEncoding::Utf8 => String::from_utf8_lossy(body),
        TextEncoding::Utf16Le => UTF_16LE.decode_without_bom_handling(body).0,
        TextEncoding::Utf16Be => UTF_16BE.decode_without_bom_handling(body).0,
        TextEncoding::Utf32Le | TextEncoding::Utf32Be => Cow::Owned(
            utf32_units(body, encoding == TextEncoding::Utf32Le)
                .map(|u| char::from_u32(u).unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect(),
        ),
        TextEncoding::Legacy(enc) => enc.decode_without_bom_handling(body).0,
    }
}

fn decode_strict(encoding: TextEncoding, body: &[u8]) -> CoreResult<String> {
    let failed = || CoreError::Decode(encoding.name());

    match encoding {
        TextEncoding::Utf8 => std::str::from_utf8(body)
            .map(str::to_owned)
            .map_err(|_| failed()),
        TextEncoding::Utf16Le => UTF_16LE
            .decode_without_bom_handling_and_without_replacement(body)
            .map(Cow::into_owned)
            .ok_or_else(failed),
        TextEncoding::Utf16Be => UTF_16BE
            .decode_without_bom_handling_and_without_replacement(body)
            .map(Cow::into_owned)
            .ok_or_else(failed),
        TextEncoding::Utf32Le | TextEncoding::Utf32Be => {
            if body.len() % 4 != 0 {
                return Err(failed());
            }
            utf32_units(body, encoding == TextEncoding::Utf32Le)
                .map(|u| char::from_u32(u).ok_or_else(failed))
                .collect()
        }
        TextEncoding::Legacy(enc) => enc
            .decode_without_bom_handling_and_without_replacement(body)
            .map(Cow::into_owned)
            .ok_or_else(failed),
    }
}

fn utf32_units(body: &[u8], little_endian: bool) -> impl Iterator<Item = u32> + '_ {
    body.chunks_exact(4).map(move |c| {
        let quad = [c[0], c[1], c[2], c[3]];
        if little_endian {
            u32::from_le_bytes(quad)
        } else {
            u32::from_be_bytes(quad)
        }
    })
}

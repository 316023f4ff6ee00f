use std::ops::Range;

use quick_xml::escape::partial_escape;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::CoreResult;
use crate::parsers::cheat_table::{scan_regions, Region, RegionContent};
use crate::services::encoding::{self, LineEnding};

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";
const CDATA_SPLIT: &str = "]]]]><![CDATA[>";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchStats {
    pub regions: usize,
    pub rewritten: usize,
    /// Regions that had a replacement but could not be rewritten safely.
    pub skipped: Vec<usize>,
}

/// One inner span of the decoded text and what replaces it.
struct Edit {
    span: Range<usize>,
    text: String,
}

/// Replaces description contents in raw document bytes.
///
/// `values` is indexed by region; `None` keeps a region untouched. Only the
/// inner spans being rewritten are encoded; every other byte is copied from
/// `bytes`, and when nothing is rewritten the input comes back unchanged.
pub fn patch_document(bytes: &[u8], values: &[Option<String>]) -> CoreResult<(Vec<u8>, PatchStats)> {
    let (text, ctx) = encoding::decode(bytes)?;
    let regions = scan_regions(&text)?;

    if regions.is_empty() {
        debug!("no description regions, writing source verbatim");
        return Ok((bytes.to_vec(), PatchStats::default()));
    }

    let (edits, stats) = plan_edits(&text, &regions, values, ctx.line_ending);

    if edits.is_empty() {
        return Ok((bytes.to_vec(), stats));
    }

    let source_bom = encoding::detect_bom(bytes).map(|(_, b)| b.len()).unwrap_or(0);
    let body = &bytes[source_bom..];

    let bounds: Vec<usize> = edits
        .iter()
        .flat_map(|e| [e.span.start, e.span.end])
        .collect();
    let offsets = encoding::source_offsets(&text, body, ctx.encoding, &bounds)?;

    let mut out = Vec::with_capacity(bytes.len() + bytes.len() / 4);
    out.extend_from_slice(ctx.bom);

    let mut last = 0usize;
    for (edit, span) in edits.iter().zip(offsets.chunks_exact(2)) {
        out.extend_from_slice(&body[last..span[0]]);
        out.extend_from_slice(&encoding::encode_fragment(&edit.text, ctx.encoding)?);
        last = span[1];
    }
    out.extend_from_slice(&body[last..]);

    Ok((out, stats))
}

fn plan_edits(
    text: &str,
    regions: &[Region],
    values: &[Option<String>],
    newline: LineEnding,
) -> (Vec<Edit>, PatchStats) {
    let mut edits = Vec::new();
    let mut stats = PatchStats {
        regions: regions.len(),
        ..PatchStats::default()
    };

    for (index, region) in regions.iter().enumerate() {
        let Some(Some(value)) = values.get(index) else {
            continue;
        };

        if !region.is_rewritable() {
            warn!(region = index, content = ?region.content, "description left untouched");
            stats.skipped.push(index);
            continue;
        }

        let inner = &text[region.inner.clone()];
        let value = newline.normalize(value);

        edits.push(Edit {
            span: region.inner.clone(),
            text: rewrite_inner(inner, region.content, &value),
        });
        stats.rewritten += 1;
    }

    (edits, stats)
}

/// New inner text for one region: the old leading and trailing whitespace
/// around the value, in the region's own representation.
pub fn rewrite_inner(inner: &str, content: RegionContent, value: &str) -> String {
    let (leading, trailing) = surrounding_whitespace(inner);

    let body = match content {
        RegionContent::CData => wrap_cdata(value),
        _ if value.is_empty() => String::new(),
        _ => partial_escape(value).into_owned(),
    };

    let mut out = String::with_capacity(leading.len() + body.len() + trailing.len());
    out.push_str(leading);
    out.push_str(&body);
    out.push_str(trailing);
    out
}

fn surrounding_whitespace(inner: &str) -> (&str, &str) {
    let body = inner.trim();
    if body.is_empty() {
        return (inner, "");
    }

    let start = inner.len() - inner.trim_start().len();
    let end = inner.trim_end().len();
    (&inner[..start], &inner[end..])
}

pub fn wrap_cdata(value: &str) -> String {
    format!(
        "{CDATA_OPEN}{}{CDATA_CLOSE}",
        value.replace(CDATA_CLOSE, CDATA_SPLIT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::cheat_table::parse;

    fn patch(text: &str, values: &[Option<&str>]) -> String {
        let values: Vec<Option<String>> = values.iter().map(|v| v.map(str::to_string)).collect();
        let (out, _) = patch_document(text.as_bytes(), &values).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn shift_jis_table(description: &[u8]) -> Vec<u8> {
        let mut bytes = b"<?xml version=\"1.0\" encoding=\"shift_jis\"?>\r\n<CheatTable><CheatEntry><Description>".to_vec();
        bytes.extend_from_slice(description);
        // ED 40 decodes to a character that encodes back as FA 5C.
        bytes.extend_from_slice(b"</Description><Comment>\xED\x40</Comment></CheatEntry></CheatTable>\r\n");
        bytes
    }

    #[test]
    fn only_inner_spans_change() {
        let text = "<CheatEntry>\r\n  <Description>\"Gold\"</Description>\r\n  <Description>Ammo</Description>\r\n</CheatEntry>";
        let out = patch(text, &[Some("\"金币\""), None]);

        assert_eq!(
            out,
            "<CheatEntry>\r\n  <Description>\"金币\"</Description>\r\n  <Description>Ammo</Description>\r\n</CheatEntry>"
        );
    }

    #[test]
    fn whitespace_around_value_survives() {
        let out = rewrite_inner("\n    Speed\n  ", RegionContent::Text, "速度");
        assert_eq!(out, "\n    速度\n  ");
    }

    #[test]
    fn whitespace_only_region_keeps_it_once() {
        assert_eq!(rewrite_inner("  ", RegionContent::Text, "x"), "  x");
    }

    #[test]
    fn markup_characters_are_escaped() {
        let out = rewrite_inner("a", RegionContent::Text, "HP < 100 & MP > 0");
        assert_eq!(out, "HP &lt; 100 &amp; MP &gt; 0");
    }

    #[test]
    fn empty_value_produces_empty_span() {
        let text = "<Description>Old</Description>";
        assert_eq!(patch(text, &[Some("")]), "<Description></Description>");
    }

    #[test]
    fn cdata_terminator_is_split() {
        let out = rewrite_inner(" <![CDATA[old]]> ", RegionContent::CData, "a]]>b");
        assert_eq!(out, " <![CDATA[a]]]]><![CDATA[>b]]> ");

        let doc = format!("<CheatEntry><Description>{out}</Description></CheatEntry>");
        let scan = parse(&doc).unwrap();
        assert_eq!(scan.entries[0].original, "a]]>b");
    }

    #[test]
    fn replacement_newlines_follow_the_document() {
        let text = "<Description>x</Description>\r\n";
        assert_eq!(
            patch(text, &[Some("line1\nline2")]),
            "<Description>line1\r\nline2</Description>\r\n"
        );
    }

    #[test]
    fn unclassified_and_self_closing_regions_are_skipped() {
        let text = "<Description>a <b>c</b></Description><Description/>";
        let values = vec![Some("x".to_string()), Some("y".to_string())];

        let (out, stats) = patch_document(text.as_bytes(), &values).unwrap();
        assert_eq!(out, text.as_bytes());
        assert_eq!(stats.skipped, vec![0, 1]);
        assert_eq!(stats.rewritten, 0);
    }

    #[test]
    fn document_without_regions_is_returned_verbatim() {
        let bytes = b"\xEF\xBB\xBF<CheatTable></CheatTable>\r\n";
        let (out, stats) = patch_document(bytes, &[]).unwrap();
        assert_eq!(out, bytes);
        assert_eq!(stats.regions, 0);
    }

    #[test]
    fn utf16_document_round_trips_through_patch() {
        let text = "\u{feff}<?xml version=\"1.0\" encoding=\"utf-16\"?>\r\n<CheatTable><CheatEntry><Description>\"Ammo\"</Description></CheatEntry></CheatTable>";
        let bytes: Vec<u8> = text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();

        let (out, stats) = patch_document(&bytes, &[Some("\"弹药\"".to_string())]).unwrap();
        assert_eq!(stats.rewritten, 1);
        assert_eq!(&out[..2], &[0xFF, 0xFE]);

        let expected = text.replace("\"Ammo\"", "\"弹药\"");
        let expected: Vec<u8> = expected.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn legacy_bytes_outside_regions_are_copied() {
        let source = shift_jis_table(b"a");

        let (out, stats) = patch_document(&source, &[Some("b".to_string())]).unwrap();

        assert_eq!(stats.rewritten, 1);
        assert_eq!(out, shift_jis_table(b"b"));
    }

    #[test]
    fn legacy_replacement_is_encoded_in_the_document_charset() {
        let source = shift_jis_table(b"Gold");
        let gold = encoding_rs::SHIFT_JIS.encode("\u{91d1}\u{5e63}").0.into_owned();

        let (out, _) = patch_document(&source, &[Some("\u{91d1}\u{5e63}".to_string())]).unwrap();

        assert_eq!(out, shift_jis_table(&gold));
    }

    #[test]
    fn unrepresentable_replacement_fails_the_save() {
        let source = shift_jis_table(b"Gold");
        let result = patch_document(&source, &[Some("\u{1F600}".to_string())]);
        assert!(matches!(result, Err(crate::error::CoreError::Encode { .. })));
    }
}

use std::ops::Range;
use std::sync::OnceLock;

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::model::entry::Entry;

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionContent {
    /// Escaped character data, possibly empty.
    Text,
    /// One or more adjacent CDATA sections and nothing else.
    CData,
    /// `<Description/>`; there is no inner span to rewrite.
    SelfClosing,
    /// Child markup or mixed text/CDATA. Never rewritten.
    Unclassified,
}

/// Byte spans of one `<Description>` element in the decoded text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub start_tag: Range<usize>,
    pub inner: Range<usize>,
    pub end_tag: Range<usize>,
    pub content: RegionContent,
}

impl Region {
    pub fn is_rewritable(&self) -> bool {
        matches!(self.content, RegionContent::Text | RegionContent::CData)
    }
}

/// Lazy scan over every description region, skipping comments and CDATA
/// sections that sit outside a description.
pub struct RegionScanner<'a> {
    text: &'a str,
    pos: usize,
    failed: bool,
}

impl<'a> RegionScanner<'a> {
    pub fn new(text: &'a str) -> Self {
        RegionScanner {
            text,
            pos: 0,
            failed: false,
        }
    }
}

fn marker_re() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"<!--|<!\[CDATA\[|<Description(?:\s[^>]*|/)?>").expect("marker pattern is valid")
    })
}

fn end_tag_re() -> &'static Regex {
    static END: OnceLock<Regex> = OnceLock::new();
    END.get_or_init(|| Regex::new(r"</Description\s*>").expect("end tag pattern is valid"))
}

impl Iterator for RegionScanner<'_> {
    type Item = CoreResult<Region>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let m = marker_re().find_at(self.text, self.pos)?;
            let marker = m.as_str();

            if marker == "<!--" {
                self.pos = skip_past(self.text, m.end(), "-->");
                continue;
            }
            if marker == CDATA_OPEN {
                self.pos = skip_past(self.text, m.end(), CDATA_CLOSE);
                continue;
            }

            if marker.ends_with("/>") {
                self.pos = m.end();
                return Some(Ok(Region {
                    start_tag: m.range(),
                    inner: m.end()..m.end(),
                    end_tag: m.end()..m.end(),
                    content: RegionContent::SelfClosing,
                }));
            }

            let Some(end) = end_tag_re().find_at(self.text, m.end()) else {
                self.failed = true;
                return Some(Err(CoreError::Malformed(format!(
                    "description opened at byte {} is never closed",
                    m.start()
                ))));
            };

            self.pos = end.end();
            let inner = m.end()..end.start();
            let content = classify(&self.text[inner.clone()]);

            return Some(Ok(Region {
                start_tag: m.range(),
                inner,
                end_tag: end.range(),
                content,
            }));
        }
    }
}

fn skip_past(text: &str, from: usize, needle: &str) -> usize {
    text[from..]
        .find(needle)
        .map(|i| from + i + needle.len())
        .unwrap_or(text.len())
}

pub fn classify(inner: &str) -> RegionContent {
    let trimmed = inner.trim();

    if trimmed.starts_with(CDATA_OPEN) {
        return if is_cdata_sequence(trimmed) {
            RegionContent::CData
        } else {
            RegionContent::Unclassified
        };
    }

    if trimmed.contains('<') {
        RegionContent::Unclassified
    } else {
        RegionContent::Text
    }
}

fn is_cdata_sequence(mut rest: &str) -> bool {
    while !rest.is_empty() {
        let Some(body) = rest.strip_prefix(CDATA_OPEN) else {
            return false;
        };
        let Some(close) = body.find(CDATA_CLOSE) else {
            return false;
        };
        rest = &body[close + CDATA_CLOSE.len()..];
    }
    true
}

pub fn scan_regions(text: &str) -> CoreResult<Vec<Region>> {
    RegionScanner::new(text).collect()
}

/// Everything learned from one pass over a loaded table.
#[derive(Debug, Clone)]
pub struct TableScan {
    pub regions: Vec<Region>,
    pub entries: Vec<Entry>,
}

impl TableScan {
    pub fn flagged(&self) -> Vec<usize> {
        self.regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.content == RegionContent::Unclassified)
            .map(|(i, _)| i)
            .collect()
    }
}

struct Frame {
    is_cheat_entry: bool,
    id: Option<String>,
    description: Option<usize>,
    pending: Option<usize>,
}

struct PendingEntry {
    id: Option<String>,
    region: usize,
}

/// Parses a cheat table and pairs every `CheatEntry` description with its
/// region in the raw text.
pub fn parse(text: &str) -> CoreResult<TableScan> {
    let regions = scan_regions(text)?;

    let mut reader = Reader::from_str(text);
    let mut stack: Vec<Frame> = Vec::new();
    let mut values: Vec<String> = Vec::new();
    let mut pending: Vec<PendingEntry> = Vec::new();

    // Region being captured and the stack depth its start tag was read at.
    let mut in_description: Option<usize> = None;
    let mut description_depth: Option<usize> = None;
    let mut id_text: Option<String> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            CoreError::Malformed(format!("at byte {}: {e}", reader.buffer_position()))
        })?;

        match event {
            Event::Start(e) => {
                let name = e.name();
                let name = name.as_ref();
                let parent_is_entry = stack.last().map(|f| f.is_cheat_entry).unwrap_or(false);

                if name == b"Description" && in_description.is_none() {
                    let region = values.len();
                    values.push(String::new());
                    in_description = Some(region);
                    description_depth = Some(stack.len());
                    claim_description(&mut stack, &mut pending, parent_is_entry, region);
                } else if name == b"ID" && parent_is_entry {
                    id_text = Some(String::new());
                }

                stack.push(Frame {
                    is_cheat_entry: name == b"CheatEntry",
                    id: None,
                    description: None,
                    pending: None,
                });
            }
            Event::Empty(e) => {
                if e.name().as_ref() == b"Description" && in_description.is_none() {
                    let parent_is_entry = stack.last().map(|f| f.is_cheat_entry).unwrap_or(false);
                    let region = values.len();
                    values.push(String::new());
                    claim_description(&mut stack, &mut pending, parent_is_entry, region);
                }
            }
            Event::Text(t) => {
                let unescaped = t
                    .unescape()
                    .map_err(|e| CoreError::Malformed(format!("bad character data: {e}")))?;
                if let Some(region) = in_description {
                    values[region].push_str(&unescaped);
                } else if let Some(buf) = id_text.as_mut() {
                    buf.push_str(&unescaped);
                }
            }
            Event::CData(c) => {
                let raw = c.into_inner();
                let data = std::str::from_utf8(&raw)
                    .map_err(|e| CoreError::Malformed(format!("bad CDATA section: {e}")))?;
                if let Some(region) = in_description {
                    values[region].push_str(data);
                } else if let Some(buf) = id_text.as_mut() {
                    buf.push_str(data);
                }
            }
            Event::End(e) => {
                let frame = stack.pop();
                let name = e.name();
                let name = name.as_ref();

                if name == b"Description" && description_depth == Some(stack.len()) {
                    in_description = None;
                    description_depth = None;
                } else if name == b"ID" {
                    if let (Some(id), Some(parent)) = (id_text.take(), stack.last_mut()) {
                        if parent.is_cheat_entry && parent.id.is_none() {
                            parent.id = Some(id.trim().to_string());
                        }
                    }
                }

                if let Some(frame) = frame {
                    if let (true, Some(idx)) = (frame.is_cheat_entry, frame.pending) {
                        pending[idx].id = frame.id;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(CoreError::Malformed("document ends inside an open element".into()));
    }

    if regions.len() != values.len() {
        return Err(CoreError::RegionMismatch {
            scanned: regions.len(),
            parsed: values.len(),
        });
    }

    let entries = pending
        .into_iter()
        .map(|p| {
            let id = p.id.unwrap_or_else(|| "N/A".to_string());
            Entry::new(id, &values[p.region], p.region)
        })
        .collect();

    Ok(TableScan { regions, entries })
}

fn claim_description(
    stack: &mut [Frame],
    pending: &mut Vec<PendingEntry>,
    parent_is_entry: bool,
    region: usize,
) {
    if !parent_is_entry {
        return;
    }
    if let Some(parent) = stack.last_mut() {
        if parent.description.is_none() {
            parent.description = Some(region);
            parent.pending = Some(pending.len());
            pending.push(PendingEntry { id: None, region });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<CheatTable CheatEngineTableVersion="45">
  <CheatEntries>
    <CheatEntry>
      <ID>0</ID>
      <Description>"========= X4 v8.00 ========="</Description>
      <CheatEntries>
        <CheatEntry>
          <ID>12</ID>
          <Description>"Infinite Money"</Description>
          <VariableType>4 Bytes</VariableType>
        </CheatEntry>
        <CheatEntry>
          <ID>13</ID>
          <Description>Hull &amp; Shields</Description>
        </CheatEntry>
      </CheatEntries>
    </CheatEntry>
  </CheatEntries>
  <UserdefinedSymbols/>
</CheatTable>
"#;

    #[test]
    fn extracts_entries_in_document_order() {
        let scan = parse(TABLE).unwrap();

        let ids: Vec<&str> = scan.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "12", "13"]);

        assert_eq!(scan.entries[0].original, "========= X4 v8.00 =========");
        assert!(scan.entries[0].quoted);
        assert_eq!(scan.entries[1].original, "Infinite Money");
        assert_eq!(scan.entries[2].original, "Hull & Shields");
        assert!(!scan.entries[2].quoted);
        assert_eq!(scan.regions.len(), 3);
    }

    #[test]
    fn regions_cover_the_inner_text() {
        let scan = parse(TABLE).unwrap();
        let r = &scan.regions[2];
        assert_eq!(&TABLE[r.inner.clone()], "Hull &amp; Shields");
        assert_eq!(&TABLE[r.start_tag.clone()], "<Description>");
        assert_eq!(&TABLE[r.end_tag.clone()], "</Description>");
        assert_eq!(r.content, RegionContent::Text);
    }

    #[test]
    fn missing_id_becomes_placeholder() {
        let text = "<CheatTable><CheatEntries><CheatEntry><Description>Speed</Description></CheatEntry></CheatEntries></CheatTable>";
        let scan = parse(text).unwrap();
        assert_eq!(scan.entries[0].id, "N/A");
    }

    #[test]
    fn cdata_description_is_decoded_and_classified() {
        let text = "<CheatEntry><ID>1</ID><Description>  <![CDATA[<b>God</b> mode]]>  </Description></CheatEntry>";
        let scan = parse(text).unwrap();
        assert_eq!(scan.regions[0].content, RegionContent::CData);
        assert_eq!(scan.entries[0].original, "<b>God</b> mode");
    }

    #[test]
    fn split_cdata_sections_still_count_as_cdata() {
        assert_eq!(
            classify("<![CDATA[a]]]]><![CDATA[>b]]>"),
            RegionContent::CData
        );
        assert_eq!(
            classify("<![CDATA[a]]> tail"),
            RegionContent::Unclassified
        );
        assert_eq!(classify("plain"), RegionContent::Text);
        assert_eq!(classify(""), RegionContent::Text);
    }

    #[test]
    fn child_markup_is_flagged() {
        let text = "<CheatEntry><Description>Fly <i>fast</i></Description></CheatEntry>";
        let scan = parse(text).unwrap();
        assert_eq!(scan.flagged(), vec![0]);
        assert_eq!(scan.entries[0].original, "Fly fast");
    }

    #[test]
    fn descriptions_in_comments_are_not_regions() {
        let text = "<CheatTable><!-- <Description>old</Description> --><CheatEntry><Description>new</Description></CheatEntry></CheatTable>";
        let scan = parse(text).unwrap();
        assert_eq!(scan.regions.len(), 1);
        assert_eq!(scan.entries[0].original, "new");
    }

    #[test]
    fn self_closing_description_is_a_region() {
        let text = "<CheatEntry><ID>4</ID><Description/></CheatEntry><CheatEntry><Description>x</Description></CheatEntry>";
        let scan = parse(text).unwrap();
        assert_eq!(scan.regions.len(), 2);
        assert_eq!(scan.regions[0].content, RegionContent::SelfClosing);
        assert_eq!(scan.entries[0].original, "");
        assert_eq!(scan.entries[1].original, "x");
    }

    #[test]
    fn only_the_first_description_of_an_entry_is_an_entry() {
        let text = "<CheatEntry><Description>a</Description><Description>b</Description></CheatEntry>";
        let scan = parse(text).unwrap();
        assert_eq!(scan.regions.len(), 2);
        assert_eq!(scan.entries.len(), 1);
        assert_eq!(scan.entries[0].region, 0);
    }

    #[test]
    fn unclosed_description_is_malformed() {
        let text = "<CheatEntry><Description>broken</CheatEntry>";
        assert!(matches!(parse(text), Err(CoreError::Malformed(_))));
    }
}

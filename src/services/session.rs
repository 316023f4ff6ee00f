use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::{CoreError, CoreResult};
use crate::model::entry::Entry;
use crate::parsers::cheat_table;
use crate::services::encoding::{self, EncodingContext};
use crate::services::patcher::{self, PatchStats};
use crate::services::storage;

/// A loaded cheat table: the exact bytes read from disk and the entries
/// extracted from them. Saving always patches those bytes, never the file
/// as it may look on disk later.
#[derive(Debug, Clone)]
pub struct Session {
    path: PathBuf,
    source: Vec<u8>,
    context: EncodingContext,
    regions: usize,
    flagged: Vec<usize>,
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub path: PathBuf,
    pub encoding: EncodingContext,
    pub regions: usize,
    pub flagged: Vec<usize>,
    pub entries: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReport {
    pub path: PathBuf,
    pub bytes: usize,
    #[serde(flatten)]
    pub patch: PatchStats,
}

impl Session {
    pub fn open(path: &Path) -> CoreResult<Self> {
        let bytes = storage::read(path)?;
        Self::from_bytes(path, bytes)
    }

    pub fn from_bytes(path: &Path, source: Vec<u8>) -> CoreResult<Self> {
        let (text, context) = encoding::decode(&source)?;
        let scan = cheat_table::parse(&text)?;
        let flagged = scan.flagged();

        info!(
            path = %path.display(),
            encoding = %context.encoding.name(),
            regions = scan.regions.len(),
            entries = scan.entries.len(),
            "cheat table loaded"
        );

        Ok(Session {
            path: path.to_path_buf(),
            source,
            context,
            regions: scan.regions.len(),
            flagged,
            entries: scan.entries,
        })
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [Entry] {
        &mut self.entries
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            path: self.path.clone(),
            encoding: self.context.clone(),
            regions: self.regions,
            flagged: self.flagged.clone(),
            entries: self.entries.len(),
        }
    }

    /// Sets the translation of the entry bound to `region`.
    pub fn edit(&mut self, region: usize, translation: &str) -> CoreResult<&Entry> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.region == region)
            .ok_or(CoreError::UnknownEntry(region))?;

        entry.translation = translation.to_string();
        Ok(&*entry)
    }

    /// Replacement per region; only entries that differ from their
    /// original get one.
    pub fn replacements(&self) -> Vec<Option<String>> {
        let mut values = vec![None; self.regions];
        for e in self.entries.iter().filter(|e| e.is_modified()) {
            if let Some(slot) = values.get_mut(e.region) {
                *slot = Some(e.stored_value());
            }
        }
        values
    }

    pub fn render(&self) -> CoreResult<(Vec<u8>, PatchStats)> {
        patcher::patch_document(&self.source, &self.replacements())
    }

    /// `<stem><suffix>.<ext>` next to the source file.
    pub fn default_output_path(&self, suffix: &str) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "table".to_string());

        let name = match self.path.extension() {
            Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
            None => format!("{stem}{suffix}.CT"),
        };

        self.path.with_file_name(name)
    }

    pub fn save(&self, target: &Path) -> CoreResult<SaveReport> {
        let (bytes, patch) = self.render()?;
        storage::write_atomic(target, &bytes)?;

        info!(
            path = %target.display(),
            rewritten = patch.rewritten,
            skipped = patch.skipped.len(),
            "cheat table saved"
        );

        Ok(SaveReport {
            path: target.to_path_buf(),
            bytes: bytes.len(),
            patch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const TABLE: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\r\n\
<CheatTable CheatEngineTableVersion=\"45\">\r\n\
  <CheatEntries>\r\n\
    <CheatEntry>\r\n\
      <ID>1</ID>\r\n\
      <Description>\"Infinite Money\"</Description>\r\n\
    </CheatEntry>\r\n\
    <CheatEntry>\r\n\
      <ID>2</ID>\r\n\
      <Description>Speed &amp; Jump</Description>\r\n\
    </CheatEntry>\r\n\
  </CheatEntries>\r\n\
</CheatTable>\r\n";

    fn write_table(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn unmodified_save_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = b"\xEF\xBB\xBF".to_vec();
        bytes.extend_from_slice(TABLE.as_bytes());
        let src = write_table(dir.path(), "game.CT", &bytes);

        let session = Session::open(&src).unwrap();
        let out = session.default_output_path("_CN");
        let report = session.save(&out).unwrap();

        assert_eq!(out, dir.path().join("game_CN.CT"));
        assert_eq!(report.patch.rewritten, 0);
        assert_eq!(fs::read(&out).unwrap(), bytes);
    }

    #[test]
    fn edited_entry_is_written_with_quotes_and_escaping() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_table(dir.path(), "game.CT", TABLE.as_bytes());

        let mut session = Session::open(&src).unwrap();
        assert_eq!(session.entries()[1].original, "Speed & Jump");

        session.edit(0, "无限金钱").unwrap();
        session.edit(1, "速度 & 跳跃").unwrap();

        let out = dir.path().join("out.CT");
        let report = session.save(&out).unwrap();
        assert_eq!(report.patch.rewritten, 2);

        let expected = TABLE
            .replace("\"Infinite Money\"", "\"无限金钱\"")
            .replace("Speed &amp; Jump", "速度 &amp; 跳跃");
        assert_eq!(fs::read_to_string(&out).unwrap(), expected);

        let reopened = Session::open(&out).unwrap();
        assert_eq!(reopened.entries()[0].original, "无限金钱");
        assert!(reopened.entries()[0].quoted);
    }

    #[test]
    fn save_uses_bytes_captured_at_open() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_table(dir.path(), "game.CT", TABLE.as_bytes());

        let mut session = Session::open(&src).unwrap();
        fs::write(&src, b"<CheatTable/>").unwrap();

        session.edit(1, "速度").unwrap();
        session.save(&src).unwrap();

        let written = fs::read_to_string(&src).unwrap();
        assert!(written.contains("<Description>速度</Description>"));
        assert!(written.contains("\"Infinite Money\""));
    }

    #[test]
    fn editing_back_to_original_restores_bytes() {
        let session_bytes = TABLE.as_bytes().to_vec();
        let mut session = Session::from_bytes(Path::new("t.CT"), session_bytes.clone()).unwrap();

        session.edit(0, "临时").unwrap();
        session.edit(0, "Infinite Money").unwrap();

        let (bytes, stats) = session.render().unwrap();
        assert_eq!(stats.rewritten, 0);
        assert_eq!(bytes, session_bytes);
    }

    #[test]
    fn unknown_region_is_rejected() {
        let mut session = Session::from_bytes(Path::new("t.CT"), TABLE.as_bytes().to_vec()).unwrap();
        assert!(matches!(session.edit(9, "x"), Err(CoreError::UnknownEntry(9))));
    }

    #[test]
    fn failed_open_reports_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Session::open(&dir.path().join("missing.CT")),
            Err(CoreError::Io { .. })
        ));
    }

    #[test]
    fn summary_reports_encoding() {
        let session = Session::from_bytes(Path::new("t.CT"), TABLE.as_bytes().to_vec()).unwrap();
        let v = serde_json::to_value(session.summary()).unwrap();
        assert_eq!(v["regions"], 2);
        assert_eq!(v["encoding"]["encoding"], "utf-8");
        assert_eq!(v["encoding"]["hasBom"], false);
    }
}

use serde::{Deserialize, Serialize};

/// One translatable description tied to a region of the loaded table.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Text of the sibling `<ID>` element, `N/A` when the entry has none.
    pub id: String,

    #[serde(default)]
    pub original: String,

    #[serde(default)]
    pub translation: String,

    /// Index of the description region in document order. Back-reference
    /// only; the session owns the document.
    pub region: usize,

    /// The stored value was wrapped in a literal pair of double quotes.
    #[serde(default)]
    pub quoted: bool,
}

impl Entry {
    pub fn new(id: String, raw_value: &str, region: usize) -> Self {
        let (original, quoted) = unquote(raw_value);

        Entry {
            id,
            translation: original.clone(),
            original,
            region,
            quoted,
        }
    }

    /// The value that goes back into the document, quotes restored.
    pub fn stored_value(&self) -> String {
        if self.quoted {
            format!("\"{}\"", self.translation)
        } else {
            self.translation.clone()
        }
    }

    pub fn is_modified(&self) -> bool {
        self.translation != self.original
    }
}

fn unquote(raw: &str) -> (String, bool) {
    let trimmed = raw.trim();

    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        (trimmed[1..trimmed.len() - 1].to_string(), true)
    } else {
        (trimmed.to_string(), false)
    }
}

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Bad/good word lists for one language, as served by the external source.
///
/// `allowed` entries protect longer words that happen to contain a flagged
/// substring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WordList {
    #[serde(default)]
    pub flagged: Vec<String>,
    #[serde(default)]
    pub allowed: Vec<String>,
}

/// External source of per-language word lists.
#[async_trait]
pub trait WordListSource: Send + Sync + 'static {
    async fn load(&self, language: &str) -> anyhow::Result<WordList>;
}

/// Word-list source reading `<dir>/<language>.json` files.
pub struct JsonWordListSource {
    dir: PathBuf,
}

impl JsonWordListSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl WordListSource for JsonWordListSource {
    async fn load(&self, language: &str) -> anyhow::Result<WordList> {
        let path = self.dir.join(format!("{language}.json"));
        let raw = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Per-language masking of flagged vocabulary, with a preloaded list cache.
pub struct ContentFilter {
    enabled: bool,
    source: Arc<dyn WordListSource>,
    lists: RwLock<HashMap<String, Arc<WordList>>>,
}

impl ContentFilter {
    pub fn new(enabled: bool, source: Arc<dyn WordListSource>) -> Self {
        Self {
            enabled,
            source,
            lists: RwLock::new(HashMap::new()),
        }
    }

    /// Loads and caches the word list for a language ahead of first use.
    ///
    /// A source failure caches an empty list so captions still flow unmasked
    /// rather than blocking the pipeline.
    pub async fn preload(&self, language: &str) {
        if !self.enabled {
            return;
        }
        let list = match self.source.load(language).await {
            Ok(list) => {
                debug!(
                    language,
                    flagged = list.flagged.len(),
                    allowed = list.allowed.len(),
                    "Word list loaded"
                );
                list
            }
            Err(e) => {
                warn!(language, %e, "Failed to load word list, masking disabled for language");
                WordList::default()
            }
        };
        self.lists
            .write()
            .insert(language.to_string(), Arc::new(list));
    }

    /// Masks flagged vocabulary in `text` for the given language.
    ///
    /// Returns the text unchanged when the filter is disabled or no list has
    /// been preloaded for the language.
    pub fn mask(&self, language: &str, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }
        let list = match self.lists.read().get(language) {
            Some(list) => Arc::clone(list),
            None => return text.to_string(),
        };
        mask_with(&list, text)
    }
}

/// Replaces each flagged occurrence with `*` per character, preserving
/// length. Occurrences intersecting an allowed word are left intact.
fn mask_with(list: &WordList, text: &str) -> String {
    if list.flagged.is_empty() {
        return text.to_string();
    }

    let chars: Vec<char> = text.chars().collect();
    let folded: Vec<char> = chars.iter().map(fold_char).collect();

    let mut protected = vec![false; chars.len()];
    for word in &list.allowed {
        for (start, len) in occurrences(&folded, word) {
            for flag in protected.iter_mut().skip(start).take(len) {
                *flag = true;
            }
        }
    }

    let mut masked = vec![false; chars.len()];
    for word in &list.flagged {
        for (start, len) in occurrences(&folded, word) {
            if protected[start..start + len].iter().any(|p| *p) {
                continue;
            }
            for flag in masked.iter_mut().skip(start).take(len) {
                *flag = true;
            }
        }
    }

    chars
        .iter()
        .zip(masked)
        .map(|(c, mask)| if mask { '*' } else { *c })
        .collect()
}

/// Case-folded comparison character. Single-char lowercase covers every
/// language this filter targets; multi-char expansions keep the original.
fn fold_char(c: &char) -> char {
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => l,
        _ => *c,
    }
}

/// All (start, len) occurrences of `word` in the folded character sequence.
fn occurrences(folded: &[char], word: &str) -> Vec<(usize, usize)> {
    let needle: Vec<char> = word.chars().map(|c| fold_char(&c)).collect();
    if needle.is_empty() || needle.len() > folded.len() {
        return Vec::new();
    }
    folded
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle.as_slice())
        .map(|(start, _)| (start, needle.len()))
        .collect()
}

use crate::config::{ConfigError, VocabularySettings};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Read-only word lists that fuzz commands draw from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    pub valid_commands: Vec<String>,
    pub valid_words: Vec<String>,
    /// Category name to terms in that category.
    pub terms: BTreeMap<String, Vec<String>>,
}

impl Vocabulary {
    /// Builds the vocabulary from settings, loading `terms-dir` when one is set.
    pub fn from_settings(settings: &VocabularySettings) -> Result<Self, ConfigError> {
        let terms = match &settings.terms_dir {
            Some(dir) => load_terms_dir(dir)?,
            None => BTreeMap::new(),
        };
        Ok(Self {
            valid_commands: settings.valid_commands.clone(),
            valid_words: settings.valid_words.clone(),
            terms,
        })
    }
}

/// Loads every regular file in `dir` as a term category named after the file.
///
/// Each line is one term, trimmed; blank lines are skipped. Hidden files and
/// subdirectories are ignored, and empty categories are dropped.
pub fn load_terms_dir(dir: &Path) -> Result<BTreeMap<String, Vec<String>>, ConfigError> {
    let io_error = |source| ConfigError::Terms {
        path: dir.to_path_buf(),
        source,
    };

    let mut terms = BTreeMap::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(category) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if category.starts_with('.') {
            continue;
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Terms {
            path: path.clone(),
            source,
        })?;
        let entries: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        if !entries.is_empty() {
            terms.insert(category.to_string(), entries);
        }
    }
    Ok(terms)
}

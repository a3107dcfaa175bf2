use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use pastewords_contract::TransferCode;
use rand::{seq::SliceRandom, Rng};
use thiserror::Error;
use tracing::info;

/// Lines containing this character are skipped when loading the word list.
pub const DEFAULT_RESERVED_MARKER: char = '#';

#[derive(Debug, Error)]
pub enum WordPoolError {
    #[error("failed to read word list {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("word list {origin} yielded no usable codes")]
    Empty { origin: String },
}

/// Immutable set of candidate codes, loaded once at startup.
#[derive(Debug, Clone)]
pub struct WordPool {
    words: Vec<TransferCode>,
}

impl WordPool {
    pub fn load(
        path: &Path,
        reserved_marker: char,
        max_code_len: usize,
    ) -> Result<Self, WordPoolError> {
        let source = std::fs::read_to_string(path).map_err(|source| WordPoolError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let pool = Self::build(
            source.lines(),
            reserved_marker,
            max_code_len,
            &path.display().to_string(),
        )?;
        info!(path = %path.display(), words = pool.len(), "word pool loaded");
        Ok(pool)
    }

    pub fn from_lines<'a>(
        lines: impl IntoIterator<Item = &'a str>,
        reserved_marker: char,
        max_code_len: usize,
    ) -> Result<Self, WordPoolError> {
        Self::build(lines, reserved_marker, max_code_len, "<inline>")
    }

    fn build<'a>(
        lines: impl IntoIterator<Item = &'a str>,
        reserved_marker: char,
        max_code_len: usize,
        origin: &str,
    ) -> Result<Self, WordPoolError> {
        // Words longer than the receive box would be impossible to type back.
        let words: BTreeSet<TransferCode> = lines
            .into_iter()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.contains(reserved_marker))
            .filter_map(|line| TransferCode::parse(line, max_code_len).ok())
            .collect();

        if words.is_empty() {
            return Err(WordPoolError::Empty {
                origin: origin.to_string(),
            });
        }

        Ok(Self {
            words: words.into_iter().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Always false for a constructed pool.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[TransferCode] {
        &self.words
    }

    /// Uniformly random candidate.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> &TransferCode {
        // `build` guarantees at least one word.
        self.words.choose(rng).unwrap_or(&self.words[0])
    }
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VocabError {
    #[error("failed to read vocabulary '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("vocabulary '{}', line {line}: {reason}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("token id {0} is not in the vocabulary")]
    UnknownId(i64),
}

/// Id to token table loaded from a vocabulary file.
///
/// Each non-empty line is either `token` (its id is the zero-based line
/// number) or `token<TAB>id`.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    tokens: HashMap<i64, String>,
}

impl Vocabulary {
    pub fn load(path: &Path) -> Result<Self, VocabError> {
        let raw = std::fs::read_to_string(path).map_err(|source| VocabError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|(line, reason)| VocabError::Malformed {
            path: path.to_path_buf(),
            line,
            reason,
        })
    }

    fn parse(raw: &str) -> Result<Self, (usize, String)> {
        let mut tokens = HashMap::new();
        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (token, id) = match line.rsplit_once('\t') {
                Some((token, id)) => {
                    let id: i64 = id
                        .trim()
                        .parse()
                        .map_err(|_| (idx + 1, format!("invalid id '{}'", id)))?;
                    (token, id)
                }
                None => (line, idx as i64),
            };
            if tokens.insert(id, token.to_string()).is_some() {
                return Err((idx + 1, format!("duplicate id {}", id)));
            }
        }
        Ok(Vocabulary { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token(&self, id: i64) -> Option<&str> {
        self.tokens.get(&id).map(String::as_str)
    }

    pub fn translate(&self, ids: &[i64]) -> Result<Vec<&str>, VocabError> {
        ids.iter()
            .map(|id| self.token(*id).ok_or(VocabError::UnknownId(*id)))
            .collect()
    }
}

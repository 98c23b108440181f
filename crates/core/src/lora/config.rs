//! Declarative list of adapters to load alongside a model.
//!
//! ```json
//! {
//!   "adapters": {
//!     "sql": "adapters/sql.gail",
//!     "code": "adapters/code.gail"
//!   }
//! }
//! ```
//!
//! Paths are relative to the model's base directory. Entry order is kept and
//! repeated names are kept too, so the registry can reject them.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read adapter config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse adapter config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One declared adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterEntry {
    pub name: String,
    /// Container path relative to the model directory.
    pub file: PathBuf,
}

/// Ordered adapter declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AdapterListConfig {
    #[serde(default, deserialize_with = "deserialize_entries")]
    adapters: Vec<AdapterEntry>,
}

impl AdapterListConfig {
    pub fn from_entries<N, F>(entries: impl IntoIterator<Item = (N, F)>) -> Self
    where
        N: Into<String>,
        F: Into<PathBuf>,
    {
        Self {
            adapters: entries
                .into_iter()
                .map(|(name, file)| AdapterEntry {
                    name: name.into(),
                    file: file.into(),
                })
                .collect(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Declarations in document order.
    pub fn entries(&self) -> &[AdapterEntry] {
        &self.adapters
    }

    pub fn push(&mut self, name: impl Into<String>, file: impl Into<PathBuf>) {
        self.adapters.push(AdapterEntry {
            name: name.into(),
            file: file.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

fn deserialize_entries<'de, D>(deserializer: D) -> Result<Vec<AdapterEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    struct EntriesVisitor;

    impl<'de> Visitor<'de> for EntriesVisitor {
        type Value = Vec<AdapterEntry>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of adapter names to container files")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, file)) = map.next_entry::<String, PathBuf>()? {
                entries.push(AdapterEntry { name, file });
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(EntriesVisitor)
}

//! Data file formats and discovery.
//!
//! Every data set is looked up by base name, e.g. `buildings`, and may be
//! written as `buildings.ron`, `buildings.toml`, or `buildings.json`. Exactly
//! one of them may exist.

use crate::error::DataLoadError;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

impl Format {
    /// Lookup order when searching a directory.
    pub const ALL: [Format; 3] = [Format::Ron, Format::Toml, Format::Json];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Ron => "ron",
            Format::Toml => "toml",
            Format::Json => "json",
        }
    }

    /// Detect the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self, DataLoadError> {
        let ext = path.extension().and_then(|e| e.to_str());
        Self::ALL
            .into_iter()
            .find(|format| Some(format.extension()) == ext)
            .ok_or_else(|| DataLoadError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
    }

    fn parse<T: DeserializeOwned>(self, content: &str) -> Result<T, String> {
        match self {
            Format::Ron => ron::from_str(content).map_err(|e| e.to_string()),
            Format::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            Format::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        }
    }
}

/// Find `{base_name}.{ron,toml,json}` in `dir`.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut present = Format::ALL
        .into_iter()
        .map(|format| dir.join(format!("{base_name}.{}", format.extension())))
        .filter(|path| path.is_file());

    let first = present.next();
    if let (Some(first), Some(second)) = (&first, present.next()) {
        return Err(DataLoadError::ConflictingFormats {
            first: first.clone(),
            second,
        });
    }
    Ok(first)
}

/// Like [`find_data_file`], but a missing file is an error.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        base_name: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

fn read(path: &Path) -> Result<(Format, String), DataLoadError> {
    let format = Format::from_path(path)?;
    let content = std::fs::read_to_string(path).map_err(|source| DataLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((format, content))
}

/// Read a file and deserialize it as a single value.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let (format, content) = read(path)?;
    format.parse(&content).map_err(|detail| DataLoadError::Parse {
        path: path.to_path_buf(),
        detail,
    })
}

/// Read a list of entries.
///
/// RON and JSON files hold the list at top level. TOML has no top-level
/// arrays, so the list lives under `toml_key` (`[[toml_key]]` tables).
pub fn deserialize_list<T: DeserializeOwned>(
    path: &Path,
    toml_key: &str,
) -> Result<Vec<T>, DataLoadError> {
    let (format, content) = read(path)?;
    let parse_error = |detail: String| DataLoadError::Parse {
        path: path.to_path_buf(),
        detail,
    };

    if format != Format::Toml {
        return format.parse(&content).map_err(parse_error);
    }

    let mut table: toml::Table = format.parse(&content).map_err(parse_error)?;
    let entries = table
        .remove(toml_key)
        .ok_or_else(|| parse_error(format!("missing key '{toml_key}' in TOML file")))?;
    entries
        .try_into()
        .map_err(|e: toml::de::Error| parse_error(e.to_string()))
}

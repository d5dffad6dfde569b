use bastion_core::blueprint::BlueprintError;
use std::path::PathBuf;

/// Errors that can occur while loading settlement data.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{base_name}' not found in {}", dir.display())]
    MissingRequired { base_name: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    /// The same data is present in more than one format.
    #[error("conflicting formats: {} and {}", first.display(), second.display())]
    ConflictingFormats { first: PathBuf, second: PathBuf },

    #[error("parse error in {}: {detail}", path.display())]
    Parse { path: PathBuf, detail: String },

    /// A name reference could not be resolved.
    #[error("unresolved {kind} reference '{name}' in {}", path.display())]
    UnresolvedRef {
        path: PathBuf,
        name: String,
        kind: &'static str,
    },

    #[error("duplicate {kind} '{name}' in {}", path.display())]
    DuplicateName {
        path: PathBuf,
        name: String,
        kind: &'static str,
    },

    /// A building could not be registered.
    #[error("invalid building in {}: {source}", path.display())]
    Blueprint {
        path: PathBuf,
        #[source]
        source: BlueprintError,
    },

    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

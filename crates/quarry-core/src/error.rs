//! Engine error types
use std::path::PathBuf;
use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid target name '{name}': {reason}")]
    NameFormat { name: String, reason: String },

    #[error("No artifact definition is associated with '{target}'")]
    UnresolvedTarget { target: String },

    #[error("Unknown artifact kind '{kind}'")]
    UnknownKind { kind: String },

    #[error("No target name given and kind '{kind}' declares no default name")]
    MissingName { kind: String },

    #[error("'{target}' resolves through the definition that created its own container")]
    CyclicMeta { target: String },

    #[error("'{kind}:{name}' has cyclic dependency on '{dep_kind}:{dep_name}'")]
    CyclicDependency {
        kind: String,
        name: String,
        dep_kind: String,
        dep_name: String,
    },

    #[error("Build step failed for '{kind}:{name}'")]
    Step {
        kind: String,
        name: String,
        #[source]
        source: Box<BuildError>,
    },

    #[error("Slot '{slot}' already holds a different dependency than '{kind}:{name}'")]
    DuplicateAssignment {
        slot: String,
        kind: String,
        name: String,
    },

    #[error("Build state log error at {}: {source}", .path.display())]
    LogIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Build failed: {0}")]
    Failed(String),
}

impl BuildError {
    /// Create a name format error
    pub fn name_format(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NameFormat {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an unresolved target error
    pub fn unresolved(target: impl Into<String>) -> Self {
        Self::UnresolvedTarget {
            target: target.into(),
        }
    }

    /// Create an unknown kind error
    pub fn unknown_kind(kind: impl Into<String>) -> Self {
        Self::UnknownKind { kind: kind.into() }
    }

    /// Create a build step error attributed to the failing artifact
    pub fn step(kind: impl Into<String>, name: impl Into<String>, source: BuildError) -> Self {
        Self::Step {
            kind: kind.into(),
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a log I/O error with path context
    pub fn log_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LogIo {
            path: path.into(),
            source,
        }
    }

    /// Create a generic failure
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

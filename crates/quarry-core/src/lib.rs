//! Quarry incremental build engine
//!
//! Provides the core of the quarry build tool:
//! - Target name grammar: parsing, glob matching, specificity ordering
//! - Registries of artifact templates with owner-chain delegation
//! - Recursive dependency-tree resolution with cycle detection
//! - Expiration propagation and post-order incremental building
//! - Persisted per-artifact state logs for artifacts without output files
//! - Dependency injection of resolved artifacts into their parents

pub mod artifact;
pub mod assign;
pub mod error;
pub mod files;
pub mod kind;
pub mod logged;
pub mod logstore;
pub mod meta;
pub mod name;
pub mod project;
pub mod registry;
pub mod report;
pub mod tree;

// Re-export main types
pub use artifact::{combine, customize, label, same_artifact, Artifact, ArtifactBase, ArtifactCell, Customizer};
pub use assign::{assign_to_parent, Assignment, Binding};
pub use error::{BuildError, BuildResult};
pub use files::{DestDir, Directory, FileBase, FileSet, FileSetContainer, SourceFile};
pub use kind::{ArtifactKind, Factory, KindRegistry, Spawn};
pub use logged::{Logged, TrackedState};
pub use logstore::{file_mtime, LogStore, LOGS_DIR, META_DIR};
pub use meta::{Meta, MetaId, MetaTag};
pub use name::TargetName;
pub use project::{Project, ToolEnv};
pub use registry::{Delegation, Registry};
pub use tree::{ArtifactTree, BuildSession, Node};

//! Artifact creation templates
//!
//! A meta couples a (possibly masked) target name with the artifact kind to
//! instantiate and an optional configuration block. Registries keep their
//! metas sorted by the target-name specificity order so that resolution
//! always tries the most specific pattern first.

use crate::artifact::{combine, Customizer};
use crate::error::{BuildError, BuildResult};
use crate::name::TargetName;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub type MetaId = u64;

static NEXT_META_ID: AtomicU64 = AtomicU64::new(1);

fn next_meta_id() -> MetaId {
    NEXT_META_ID.fetch_add(1, Ordering::Relaxed)
}

/// Back-reference an artifact keeps to the meta it was created from.
///
/// Two tags compare equal when they describe the same template (pattern and
/// kind); the unique `id` is only consulted by the re-entrancy guard that
/// detects a container resolving through its own creating rule.
#[derive(Clone, Debug)]
pub struct MetaTag {
    pub id: MetaId,
    pub pattern: String,
    pub kind: String,
}

impl PartialEq for MetaTag {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.kind == other.kind
    }
}

impl Eq for MetaTag {}

/// A registered artifact template.
#[derive(Clone)]
pub struct Meta {
    id: MetaId,
    pattern: TargetName,
    kind: String,
    block: Option<Customizer>,
}

impl Meta {
    /// Create a meta from a pattern that names an artifact kind. The
    /// pattern's attached customizer becomes the template's block.
    pub fn new(pattern: TargetName) -> BuildResult<Self> {
        let kind = pattern
            .kind()
            .ok_or_else(|| {
                BuildError::failed(format!("No artifact kind for pattern '{pattern}'"))
            })?
            .to_string();
        let block = pattern.customizer().cloned();
        Ok(Self {
            id: next_meta_id(),
            pattern,
            kind,
            block,
        })
    }

    /// Treat a self-describing target name (one carrying an explicit kind)
    /// as an ad-hoc meta.
    pub fn from_name(name: &TargetName) -> BuildResult<Self> {
        Self::new(name.clone())
    }

    pub fn id(&self) -> MetaId {
        self.id
    }

    pub fn pattern(&self) -> &TargetName {
        &self.pattern
    }

    pub fn kind_id(&self) -> &str {
        &self.kind
    }

    pub fn block(&self) -> Option<&Customizer> {
        self.block.as_ref()
    }

    pub fn matches(&self, name: &TargetName) -> bool {
        self.pattern.matches(name)
    }

    /// Derive a new meta combining this template's block with an extra one;
    /// the original block runs first.
    pub fn reuse(&self, block: Option<Customizer>) -> Meta {
        Meta {
            id: next_meta_id(),
            pattern: self.pattern.clone(),
            kind: self.kind.clone(),
            block: combine(self.block.clone(), block),
        }
    }

    pub fn tag(&self) -> MetaTag {
        MetaTag {
            id: self.id,
            pattern: self.pattern.raw().to_string(),
            kind: self.kind.clone(),
        }
    }
}

impl fmt::Debug for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meta")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("kind", &self.kind)
            .finish()
    }
}

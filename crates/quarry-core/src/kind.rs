//! Artifact kind registry
//!
//! Arbitrary artifact kinds stay pluggable without engine changes through a
//! table of kind descriptors: an identifier, a factory function, an optional
//! default target name, an optional kind-level configuration block and an
//! optional dependency-assignment declaration. A target-name prefix is
//! derived into a kind by looking its text up here; unresolved lookups are
//! tolerated.

use crate::artifact::{ArtifactCell, Customizer};
use crate::assign::Assignment;
use crate::error::{BuildError, BuildResult};
use crate::registry::Registry;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Context a factory receives: the resolved concrete name and the registry
/// instantiating the artifact.
pub struct Spawn {
    pub name: String,
    pub owner: Rc<Registry>,
}

/// Creates a fresh artifact instance for a resolved name.
pub type Factory = Rc<dyn Fn(&Spawn) -> BuildResult<ArtifactCell>>;

/// Descriptor of one pluggable artifact kind.
#[derive(Clone)]
pub struct ArtifactKind {
    id: String,
    default_name: Option<String>,
    factory: Factory,
    default_block: Option<Customizer>,
    assignment: Option<Assignment>,
}

impl ArtifactKind {
    pub fn new(id: impl Into<String>, factory: Factory) -> Self {
        Self {
            id: id.into(),
            default_name: None,
            factory,
            default_block: None,
            assignment: None,
        }
    }

    /// Target name used when the kind is requested without one.
    pub fn with_default_name(mut self, name: impl Into<String>) -> Self {
        self.default_name = Some(name.into());
        self
    }

    /// Kind-level block applied to every new instance before any meta or
    /// explicit block.
    pub fn with_default_block(mut self, block: Customizer) -> Self {
        self.default_block = Some(block);
        self
    }

    /// Declare that instances inject themselves into their parents.
    pub fn with_assignment(mut self, assignment: Assignment) -> Self {
        self.assignment = Some(assignment);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    pub fn default_block(&self) -> Option<Customizer> {
        self.default_block.clone()
    }

    pub fn assignment(&self) -> Option<&Assignment> {
        self.assignment.as_ref()
    }

    pub fn instantiate(&self, spawn: &Spawn) -> BuildResult<ArtifactCell> {
        (self.factory)(spawn)
    }
}

impl fmt::Debug for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactKind")
            .field("id", &self.id)
            .field("default_name", &self.default_name)
            .field("assignment", &self.assignment)
            .finish()
    }
}

/// Kind-identifier to descriptor table shared by the registries of one
/// project hierarchy.
#[derive(Default)]
pub struct KindRegistry {
    kinds: RefCell<HashMap<String, Rc<ArtifactKind>>>,
}

impl KindRegistry {
    /// An empty kind table.
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// A kind table with the built-in file, container and environment kinds
    /// registered.
    pub fn with_builtins() -> Rc<Self> {
        let kinds = Self::new();
        crate::files::register(&kinds);
        crate::project::register(&kinds);
        kinds
    }

    /// Register a kind, replacing any previous descriptor with the same id.
    pub fn register(&self, kind: ArtifactKind) -> Rc<ArtifactKind> {
        let kind = Rc::new(kind);
        self.kinds
            .borrow_mut()
            .insert(kind.id().to_string(), Rc::clone(&kind));
        kind
    }

    /// Tolerant lookup, `None` when the identifier names no kind.
    pub fn lookup(&self, id: &str) -> Option<Rc<ArtifactKind>> {
        self.kinds.borrow().get(id).cloned()
    }

    /// Strict lookup for explicitly required kinds.
    pub fn get(&self, id: &str) -> BuildResult<Rc<ArtifactKind>> {
        self.lookup(id)
            .ok_or_else(|| BuildError::unknown_kind(id))
    }
}

impl fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.kinds.borrow().keys().cloned().collect();
        f.debug_struct("KindRegistry").field("kinds", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_tolerant_get_is_strict() {
        let kinds = KindRegistry::new();
        assert!(kinds.lookup("Nope").is_none());
        assert!(matches!(
            kinds.get("Nope"),
            Err(BuildError::UnknownKind { .. })
        ));
    }

    #[test]
    fn test_builtins_are_registered() {
        let kinds = KindRegistry::with_builtins();
        for id in ["SourceFile", "Directory", "DestDir", "FileSet", "FileSetContainer", "ToolEnv"] {
            assert!(kinds.lookup(id).is_some(), "missing builtin {id}");
        }
    }

    #[test]
    fn test_register_replaces_descriptor() {
        let kinds = KindRegistry::new();
        let noop: Factory = Rc::new(|_s| Err(BuildError::failed("unused")));
        kinds.register(ArtifactKind::new("Thing", Rc::clone(&noop)).with_default_name("a"));
        kinds.register(ArtifactKind::new("Thing", noop).with_default_name("b"));
        assert_eq!(kinds.get("Thing").unwrap().default_name(), Some("b"));
    }
}

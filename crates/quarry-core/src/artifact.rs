//! The artifact contract
//!
//! An artifact is a build node: something that can be built, cleaned and
//! checked for staleness. The engine drives artifacts exclusively through
//! the [`Artifact`] trait; concrete build steps (compilers, archivers,
//! deploy tools) live outside the engine and plug in through the same
//! contract.

use crate::error::BuildResult;
use crate::meta::MetaTag;
use crate::name::TargetName;
use crate::registry::Registry;
use crate::report;
use std::any::Any;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

/// Shared, interior-mutable handle to an artifact.
pub type ArtifactCell = Rc<RefCell<dyn Artifact>>;

/// A configuration block applied to a freshly created artifact instance.
pub type Customizer = Rc<dyn Fn(&mut dyn Artifact)>;

/// Build a customizer targeting one concrete artifact type. The block is a
/// no-op when applied to an artifact of a different type.
pub fn customize<T: Artifact>(f: impl Fn(&mut T) + 'static) -> Customizer {
    Rc::new(move |art: &mut dyn Artifact| {
        if let Some(t) = art.as_any_mut().downcast_mut::<T>() {
            f(t);
        }
    })
}

/// Combine two optional customizers into one that runs them in order.
pub fn combine(first: Option<Customizer>, second: Option<Customizer>) -> Option<Customizer> {
    match (first, second) {
        (None, b) => b,
        (a, None) => a,
        (Some(a), Some(b)) => Some(Rc::new(move |art: &mut dyn Artifact| {
            a(art);
            b(art);
        })),
    }
}

/// The build-node contract the engine consumes.
///
/// Equality of two artifacts is defined by [`same_artifact`]: same kind,
/// same name, same creating meta (structurally).
pub trait Artifact: Any {
    /// Resolved concrete name (the suffix the artifact was created for).
    fn name(&self) -> &str;

    /// Identifier of the artifact kind this instance belongs to.
    fn kind_id(&self) -> &str;

    /// The registry that created this artifact, `None` for roots.
    fn owner(&self) -> Option<Rc<Registry>>;

    fn created_by(&self) -> Option<&MetaTag>;

    fn set_created_by(&mut self, tag: MetaTag);

    /// Declared dependencies, in declaration order. Each entry may carry a
    /// per-edge customizer.
    fn requirements(&self) -> Vec<TargetName>;

    /// Whether the artifact itself reports being stale.
    fn expired(&self) -> BuildResult<bool> {
        Ok(true)
    }

    /// Last modification time in seconds, `-1` for timeless artifacts.
    fn mtime(&self) -> i64 {
        -1
    }

    fn before_build(&mut self, _expired: bool) -> BuildResult<()> {
        Ok(())
    }

    fn build(&mut self) -> BuildResult<()> {
        Ok(())
    }

    /// Called after a successful build.
    fn built(&mut self) -> BuildResult<()> {
        Ok(())
    }

    fn build_failed(&mut self) {}

    fn clean(&mut self) -> BuildResult<()> {
        Ok(())
    }

    /// Progress line for reporting, `None` to stay silent.
    fn what_it_does(&self) -> Option<String> {
        Some(format!("Build '{}:{}' artifact", self.kind_id(), self.name()))
    }

    /// Home directory the artifact resolves relative paths against.
    fn home(&self) -> PathBuf {
        match self.owner() {
            Some(reg) => reg.home().to_path_buf(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Container capability: the registry this artifact owns, if any.
    fn registry(&self) -> Option<Rc<Registry>> {
        None
    }

    /// How this artifact injects itself into a parent that required it.
    fn assignment(&self) -> Option<crate::assign::Assignment> {
        None
    }

    /// Parent-side hook overriding the slot a dependency declares.
    fn assign_slot_override(&self, _dep: &dyn Artifact) -> Option<String> {
        None
    }

    /// Accept an injected dependency into the named slot. Parents without
    /// the slot ignore the injection.
    fn assign_dependency(&mut self, _slot: &str, _dep: &ArtifactCell) -> BuildResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl std::fmt::Debug for dyn Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("kind", &self.kind_id())
            .field("name", &self.name())
            .finish()
    }
}

/// `kind:name` label used in reports and errors.
pub fn label(art: &dyn Artifact) -> String {
    format!("{}:{}", art.kind_id(), art.name())
}

/// The artifact equality contract: same kind, same name, same creating meta.
pub fn same_artifact(a: &dyn Artifact, b: &dyn Artifact) -> bool {
    a.kind_id() == b.kind_id() && a.name() == b.name() && a.created_by() == b.created_by()
}

/// Common state embedded by concrete artifact types: the resolved name, the
/// owning registry, the creating meta tag, the declared requirements and an
/// optional after-build hook.
pub struct ArtifactBase {
    name: String,
    owner: Option<Rc<Registry>>,
    created_by: Option<MetaTag>,
    requires: Vec<TargetName>,
    built_hook: Option<Customizer>,
}

impl ArtifactBase {
    pub fn new(name: impl Into<String>, owner: Option<Rc<Registry>>) -> Self {
        Self {
            name: name.into(),
            owner,
            created_by: None,
            requires: Vec::new(),
            built_hook: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> Option<Rc<Registry>> {
        self.owner.clone()
    }

    pub fn created_by(&self) -> Option<&MetaTag> {
        self.created_by.as_ref()
    }

    pub fn set_created_by(&mut self, tag: MetaTag) {
        self.created_by = Some(tag);
    }

    /// Declare a dependency. A requirement with the same name and kind
    /// replaces the earlier declaration with a warning.
    pub fn require(&mut self, name: TargetName) {
        let dup = self
            .requires
            .iter()
            .position(|r| r.raw() == name.raw() && r.kind() == name.kind());
        match dup {
            Some(i) => {
                report::warn(format!(
                    "Artifact '{}' requirement has been already defined",
                    name
                ));
                self.requires[i] = name;
            }
            None => self.requires.push(name),
        }
    }

    /// Drop a previously declared dependency.
    pub fn dismiss(&mut self, name: &TargetName) -> BuildResult<()> {
        let before = self.requires.len();
        self.requires
            .retain(|r| !(r.raw() == name.raw() && r.kind() == name.kind()));
        if self.requires.len() == before {
            return Err(crate::error::BuildError::failed(format!(
                "'{name}' dependency cannot be found and dismissed"
            )));
        }
        Ok(())
    }

    pub fn requirements(&self) -> Vec<TargetName> {
        self.requires.clone()
    }

    /// Register a hook to run after the artifact has been built.
    pub fn on_built(&mut self, hook: Customizer) {
        self.built_hook = Some(hook);
    }

    pub fn built_hook(&self) -> Option<Customizer> {
        self.built_hook.clone()
    }
}

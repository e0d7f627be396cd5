//! Project containers and environment artifacts
//!
//! A project is the root container of a build: an existing directory that
//! owns the top-level registry and resolves its own name to itself.
//! Environment artifacts live under the reserved `.env/` namespace, are
//! never expired by themselves and inject themselves into the artifacts
//! that require them; their tracked attributes let a reconfiguration expire
//! dependents even though no file changed.

use crate::artifact::{Artifact, ArtifactBase, ArtifactCell};
use crate::assign::Assignment;
use crate::error::{BuildError, BuildResult};
use crate::files::FileBase;
use crate::kind::{ArtifactKind, KindRegistry, Spawn};
use crate::logged::{Logged, TrackedState};
use crate::meta::MetaTag;
use crate::name::TargetName;
use crate::registry::{Delegation, Registry};
use crate::report;
use serde_json::{json, Value};
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub const PROJECT: &str = "Project";
pub const TOOL_ENV: &str = "ToolEnv";

/// The root build container: an existing directory with a registry.
pub struct Project {
    dir: FileBase,
    registry: Rc<Registry>,
}

impl Project {
    /// Open a standalone project rooted at `home`.
    pub fn open(home: &Path, kinds: Rc<KindRegistry>) -> BuildResult<(ArtifactCell, Rc<Registry>)> {
        Self::open_in(home, None, kinds)
    }

    /// Open a project, optionally nested inside an owning registry. The
    /// project's registry searches the owner chain for metas it does not
    /// define itself but always instantiates locally.
    pub fn open_in(
        home: &Path,
        owner: Option<Rc<Registry>>,
        kinds: Rc<KindRegistry>,
    ) -> BuildResult<(ArtifactCell, Rc<Registry>)> {
        let home = if home.is_absolute() {
            home.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| BuildError::io(home, e))?
                .join(home)
        };
        if !home.is_dir() {
            return Err(BuildError::failed(format!(
                "Project home '{}' is not an existing directory",
                home.display()
            )));
        }
        let registry = match &owner {
            Some(owner) => Registry::new_sub(owner, home.clone(), Delegation::Partial),
            None => Registry::new_root(home.clone(), kinds),
        };
        let project = Project {
            dir: FileBase::with_owner(home.to_string_lossy().into_owned(), owner),
            registry: Rc::clone(&registry),
        };
        let cell: ArtifactCell = Rc::new(RefCell::new(project));
        registry.attach_facade(&cell, true);
        Ok((cell, registry))
    }
}

impl Artifact for Project {
    fn name(&self) -> &str {
        self.dir.base().name()
    }

    fn kind_id(&self) -> &str {
        PROJECT
    }

    fn owner(&self) -> Option<Rc<Registry>> {
        self.dir.base().owner()
    }

    fn created_by(&self) -> Option<&MetaTag> {
        self.dir.base().created_by()
    }

    fn set_created_by(&mut self, tag: MetaTag) {
        self.dir.base_mut().set_created_by(tag);
    }

    fn requirements(&self) -> Vec<TargetName> {
        self.dir.base().requirements()
    }

    fn expired(&self) -> BuildResult<bool> {
        Ok(true)
    }

    fn mtime(&self) -> i64 {
        self.dir.mtime()
    }

    fn build(&mut self) -> BuildResult<()> {
        let path = self.dir.fullpath();
        if !path.is_dir() {
            return Err(BuildError::failed(format!(
                "Project home '{}' doesn't exist",
                path.display()
            )));
        }
        Ok(())
    }

    fn what_it_does(&self) -> Option<String> {
        None
    }

    fn home(&self) -> PathBuf {
        self.registry.home().to_path_buf()
    }

    fn registry(&self) -> Option<Rc<Registry>> {
        Some(Rc::clone(&self.registry))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An environment artifact locating a tool installation. Never expired by
/// itself; its tracked attributes expire dependents when the configured
/// tool or its detected home change between runs.
pub struct ToolEnv {
    base: ArtifactBase,
    tool: String,
    tool_home: Option<String>,
}

impl ToolEnv {
    pub fn new(spawn: &Spawn) -> Self {
        Self {
            base: ArtifactBase::new(spawn.name.clone(), Some(Rc::clone(&spawn.owner))),
            tool: String::new(),
            tool_home: None,
        }
    }

    pub fn set_tool(&mut self, tool: impl Into<String>) {
        self.tool = tool.into();
    }

    pub fn set_tool_home(&mut self, home: impl Into<String>) {
        self.tool_home = Some(home.into());
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn tool_home(&self) -> Option<&str> {
        self.tool_home.as_deref()
    }

    /// Look the tool up on PATH; its home is the parent of the directory
    /// holding the binary.
    fn locate(&self) -> Option<String> {
        if self.tool.is_empty() {
            return None;
        }
        let path = std::env::var_os("PATH")?;
        for dir in std::env::split_paths(&path) {
            let bin = dir.join(&self.tool);
            if bin.is_file() {
                let home = dir.parent().unwrap_or(&dir);
                return Some(home.to_string_lossy().into_owned());
            }
        }
        None
    }
}

impl Artifact for ToolEnv {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn kind_id(&self) -> &str {
        TOOL_ENV
    }

    fn owner(&self) -> Option<Rc<Registry>> {
        self.base.owner()
    }

    fn created_by(&self) -> Option<&MetaTag> {
        self.base.created_by()
    }

    fn set_created_by(&mut self, tag: MetaTag) {
        self.base.set_created_by(tag);
    }

    fn requirements(&self) -> Vec<TargetName> {
        self.base.requirements()
    }

    fn expired(&self) -> BuildResult<bool> {
        Ok(false)
    }

    fn build(&mut self) -> BuildResult<()> {
        if self.tool_home.is_none() {
            self.tool_home = self.locate();
        }
        match &self.tool_home {
            Some(home) => report::info(format!("'{}' home: '{home}'", self.name())),
            None => report::warn(format!(
                "Tool home for '{}' cannot be found, check if '{}' is a valid tool name",
                self.name(),
                self.tool
            )),
        }
        Ok(())
    }

    fn what_it_does(&self) -> Option<String> {
        Some(format!("Initialize '{}' environment", self.name()))
    }

    fn assignment(&self) -> Option<Assignment> {
        Some(Assignment::default_for(TOOL_ENV))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl TrackedState for ToolEnv {
    fn log_attrs(&self) -> BTreeMap<String, Value> {
        let mut attrs = BTreeMap::new();
        attrs.insert("tool".to_string(), json!(self.tool));
        attrs.insert("tool_home".to_string(), json!(self.tool_home));
        attrs
    }
}

/// Register the built-in environment kinds.
pub fn register(kinds: &KindRegistry) {
    kinds.register(
        ArtifactKind::new(
            TOOL_ENV,
            Rc::new(|s: &Spawn| Ok(Logged::cell(ToolEnv::new(s)))),
        )
        .with_default_name(".env/ToolEnv")
        .with_assignment(Assignment::default_for(TOOL_ENV)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_project_requires_existing_directory() {
        let home = TempDir::new().unwrap();
        let missing = home.path().join("nope");
        assert!(Project::open(&missing, KindRegistry::with_builtins()).is_err());
        assert!(Project::open(home.path(), KindRegistry::with_builtins()).is_ok());
    }

    #[test]
    fn test_project_resolves_itself() {
        let home = TempDir::new().unwrap();
        let (project, registry) =
            Project::open(home.path(), KindRegistry::with_builtins()).unwrap();
        let name = project.borrow().name().to_string();
        let resolved = registry.resolve_str(&name).unwrap();
        assert!(Rc::ptr_eq(&project, &resolved));
    }

    #[test]
    fn test_tool_env_default_name_is_reserved() {
        let kinds = KindRegistry::with_builtins();
        let name = TargetName::of_kind(&kinds, TOOL_ENV).unwrap();
        assert_eq!(name.raw(), ".env/ToolEnv");
        assert!(name.is_env_path());
    }
}

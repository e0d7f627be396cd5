//! Demonstration leaf artifact kinds
//!
//! Concrete build steps live outside the engine and reach it only through
//! the artifact contract. The CLI ships two simple leaves: `Touch` stamps a
//! file, `RunShell` runs every shell script a mask matches and tracks the
//! scripts plus its options in the build-state logs so unchanged scripts
//! are not re-run.

use quarry_core::{
    Artifact, ArtifactCell, ArtifactKind, BuildError, BuildResult, FileBase, FileSet,
    KindRegistry, Logged, MetaTag, Registry, Spawn, TargetName, TrackedState,
};
use serde_json::{json, Value};
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::rc::Rc;
use std::time::SystemTime;

pub const TOUCH: &str = "Touch";
pub const RUN_SHELL: &str = "RunShell";

/// Stamp a file with the current time, creating it when missing.
pub struct Touch {
    file: FileBase,
}

impl Touch {
    fn new(spawn: &Spawn) -> Self {
        Self {
            file: FileBase::new(spawn),
        }
    }
}

impl Artifact for Touch {
    fn name(&self) -> &str {
        self.file.base().name()
    }

    fn kind_id(&self) -> &str {
        TOUCH
    }

    fn owner(&self) -> Option<Rc<Registry>> {
        self.file.base().owner()
    }

    fn created_by(&self) -> Option<&MetaTag> {
        self.file.base().created_by()
    }

    fn set_created_by(&mut self, tag: MetaTag) {
        self.file.base_mut().set_created_by(tag);
    }

    fn requirements(&self) -> Vec<TargetName> {
        self.file.base().requirements()
    }

    fn mtime(&self) -> i64 {
        self.file.mtime()
    }

    fn build(&mut self) -> BuildResult<()> {
        let path = self.file.fullpath();
        if !path.exists() {
            fs::write(&path, "").map_err(|e| BuildError::io(&path, e))?;
        }
        let file = fs::File::options()
            .write(true)
            .open(&path)
            .map_err(|e| BuildError::io(&path, e))?;
        file.set_modified(SystemTime::now())
            .map_err(|e| BuildError::io(&path, e))
    }

    fn what_it_does(&self) -> Option<String> {
        Some(format!("Touch '{}'", self.name()))
    }

    fn home(&self) -> PathBuf {
        self.file.home()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Run every shell script the mask matches.
pub struct RunShell {
    files: FileSet,
    options: Vec<String>,
}

impl RunShell {
    fn new(spawn: &Spawn) -> Self {
        Self {
            files: FileSet::new(spawn),
            options: Vec::new(),
        }
    }

    pub fn opt(&mut self, option: impl Into<String>) {
        self.options.push(option.into());
    }
}

impl Artifact for RunShell {
    fn name(&self) -> &str {
        self.files.name()
    }

    fn kind_id(&self) -> &str {
        RUN_SHELL
    }

    fn owner(&self) -> Option<Rc<Registry>> {
        self.files.owner()
    }

    fn created_by(&self) -> Option<&MetaTag> {
        self.files.created_by()
    }

    fn set_created_by(&mut self, tag: MetaTag) {
        self.files.set_created_by(tag);
    }

    fn requirements(&self) -> Vec<TargetName> {
        self.files.requirements()
    }

    fn expired(&self) -> BuildResult<bool> {
        Ok(false)
    }

    fn build(&mut self) -> BuildResult<()> {
        let home = self.files.home();
        for (script, _) in self.files.list()? {
            let status = Command::new("bash")
                .args(&self.options)
                .arg(&script)
                .current_dir(&home)
                .status()
                .map_err(|e| BuildError::io(home.join(&script), e))?;
            if !status.success() {
                return Err(BuildError::failed(format!(
                    "'{script}' exited with {status}"
                )));
            }
        }
        Ok(())
    }

    fn what_it_does(&self) -> Option<String> {
        Some(format!("Run '{}' shell scripts", self.name()))
    }

    fn home(&self) -> PathBuf {
        self.files.home()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl TrackedState for RunShell {
    fn tracks_items(&self) -> bool {
        true
    }

    fn list_items(&self) -> BuildResult<Vec<(String, i64)>> {
        self.files.list()
    }

    fn log_attrs(&self) -> BTreeMap<String, Value> {
        let mut attrs = BTreeMap::new();
        attrs.insert("options".to_string(), json!(self.options));
        attrs
    }
}

/// Register the CLI leaf kinds.
pub fn register(kinds: &KindRegistry) {
    kinds.register(ArtifactKind::new(
        TOUCH,
        Rc::new(|s: &Spawn| {
            let cell: ArtifactCell = Rc::new(RefCell::new(Touch::new(s)));
            Ok(cell)
        }),
    ));
    kinds.register(ArtifactKind::new(
        RUN_SHELL,
        Rc::new(|s: &Spawn| Ok(Logged::cell(RunShell::new(s)))),
    ));
}

//! Built-in file artifact kinds
//!
//! The engine ships the artifact kinds every project needs regardless of
//! its concrete build steps: plain source files, directories, destination
//! directories that inject themselves into the requiring artifact, file
//! sets enumerated by a mask, and mask sub-containers owning nested rules.

use crate::artifact::{Artifact, ArtifactBase, ArtifactCell};
use crate::assign::Assignment;
use crate::error::{BuildError, BuildResult};
use crate::kind::{ArtifactKind, KindRegistry, Spawn};
use crate::logged::TrackedState;
use crate::logstore::file_mtime;
use crate::meta::MetaTag;
use crate::name::{clean_path, TargetName};
use crate::registry::{Delegation, Registry};
use crate::report;
use glob::{MatchOptions, Pattern};
use std::any::Any;
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use walkdir::WalkDir;

pub const SOURCE_FILE: &str = "SourceFile";
pub const DIRECTORY: &str = "Directory";
pub const DEST_DIR: &str = "DestDir";
pub const FILE_SET: &str = "FileSet";
pub const FILE_SET_CONTAINER: &str = "FileSetContainer";

/// Common state of filesystem-backed artifacts: the cleaned name and
/// whether it is absolute, plus home/fullpath resolution against the
/// owning registry.
pub struct FileBase {
    base: ArtifactBase,
    absolute: bool,
}

impl FileBase {
    pub fn new(spawn: &Spawn) -> Self {
        Self::with_owner(spawn.name.clone(), Some(Rc::clone(&spawn.owner)))
    }

    pub fn with_owner(name: String, owner: Option<Rc<Registry>>) -> Self {
        let name = clean_path(&name);
        let absolute = name.starts_with('/');
        Self {
            base: ArtifactBase::new(name, owner),
            absolute,
        }
    }

    pub fn base(&self) -> &ArtifactBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut ArtifactBase {
        &mut self.base
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn home(&self) -> PathBuf {
        if self.absolute {
            if let Some(reg) = self.base.owner() {
                let home = reg.home();
                if home.is_absolute() {
                    return home.to_path_buf();
                }
            }
            Path::new(self.base.name())
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/"))
        } else {
            match self.base.owner() {
                Some(reg) => reg.home().to_path_buf(),
                None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            }
        }
    }

    pub fn fullpath(&self) -> PathBuf {
        let name = self.base.name();
        if name.starts_with(".env/") || self.absolute {
            return PathBuf::from(name);
        }
        self.home().join(name)
    }

    pub fn exists(&self) -> bool {
        self.fullpath().exists()
    }

    pub fn mtime(&self) -> i64 {
        file_mtime(&self.fullpath())
    }
}

/// A plain file that must exist; timeless in itself, its mtime drives the
/// expiration of whatever requires it.
pub struct SourceFile {
    file: FileBase,
}

impl SourceFile {
    pub fn new(spawn: &Spawn) -> Self {
        Self {
            file: FileBase::new(spawn),
        }
    }

    pub fn fullpath(&self) -> PathBuf {
        self.file.fullpath()
    }
}

impl Artifact for SourceFile {
    fn name(&self) -> &str {
        self.file.base().name()
    }

    fn kind_id(&self) -> &str {
        SOURCE_FILE
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

    fn expired(&self) -> BuildResult<bool> {
        Ok(false)
    }

    fn mtime(&self) -> i64 {
        self.file.mtime()
    }

    fn build(&mut self) -> BuildResult<()> {
        let path = self.file.fullpath();
        if !path.is_file() {
            return Err(BuildError::failed(format!(
                "File '{}' doesn't exist",
                path.display()
            )));
        }
        Ok(())
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

/// A directory that is stale until it exists.
pub struct Directory {
    dir: FileBase,
}

impl Directory {
    pub fn new(spawn: &Spawn) -> Self {
        Self {
            dir: FileBase::new(spawn),
        }
    }

    pub fn fullpath(&self) -> PathBuf {
        self.dir.fullpath()
    }
}

impl Artifact for Directory {
    fn name(&self) -> &str {
        self.dir.base().name()
    }

    fn kind_id(&self) -> &str {
        DIRECTORY
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
        Ok(!self.dir.fullpath().is_dir())
    }

    fn mtime(&self) -> i64 {
        self.dir.mtime()
    }

    fn build(&mut self) -> BuildResult<()> {
        let path = self.dir.fullpath();
        if path.is_file() {
            return Err(BuildError::failed(format!(
                "File '{}' is not a directory",
                path.display()
            )));
        }
        if !path.is_dir() {
            return Err(BuildError::failed(format!(
                "Directory '{}' doesn't exist",
                path.display()
            )));
        }
        Ok(())
    }

    fn home(&self) -> PathBuf {
        self.dir.home()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An output directory created on demand; injects itself into the
/// requiring artifact's `destination` slot.
pub struct DestDir {
    dir: FileBase,
}

impl DestDir {
    pub fn new(spawn: &Spawn) -> Self {
        Self {
            dir: FileBase::new(spawn),
        }
    }

    pub fn fullpath(&self) -> PathBuf {
        self.dir.fullpath()
    }
}

impl Artifact for DestDir {
    fn name(&self) -> &str {
        self.dir.base().name()
    }

    fn kind_id(&self) -> &str {
        DEST_DIR
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
        Ok(!self.dir.fullpath().is_dir())
    }

    fn mtime(&self) -> i64 {
        self.dir.mtime()
    }

    fn build(&mut self) -> BuildResult<()> {
        let path = self.dir.fullpath();
        if !path.is_dir() {
            report::warn(format!("Create destination '{}' folder", path.display()));
            fs::create_dir_all(&path).map_err(|e| BuildError::io(&path, e))?;
        }
        Ok(())
    }

    fn home(&self) -> PathBuf {
        self.dir.home()
    }

    fn assignment(&self) -> Option<Assignment> {
        Some(Assignment::single("destination"))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A set of files identified by a mask, enumerated relative to the home
/// directory. Always considered expired as a build node; its value for
/// incremental builds is the item listing it contributes to state logs.
pub struct FileSet {
    file: FileBase,
    ignore_files: bool,
    ignore_dirs: bool,
}

impl FileSet {
    pub fn new(spawn: &Spawn) -> Self {
        Self {
            file: FileBase::new(spawn),
            ignore_files: false,
            ignore_dirs: false,
        }
    }

    pub fn ignore_files(&mut self, ignore: bool) {
        self.ignore_files = ignore;
    }

    pub fn ignore_dirs(&mut self, ignore: bool) {
        self.ignore_dirs = ignore;
    }

    pub fn home(&self) -> PathBuf {
        self.file.home()
    }

    /// Enumerate `(relative path, mtime)` pairs the mask matches, in a
    /// stable order. Hidden files are not matched unless the mask spells
    /// the leading dot out.
    pub fn list(&self) -> BuildResult<Vec<(String, i64)>> {
        if self.ignore_files && self.ignore_dirs {
            return Err(BuildError::failed(
                "Files and directories are ignored at the same time",
            ));
        }
        let name = self.file.base().name();
        let pattern = Pattern::new(name)
            .map_err(|e| BuildError::name_format(name, format!("invalid mask: {e}")))?;
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        };
        let home = self.file.home();
        let mut items = Vec::new();
        for entry in WalkDir::new(&home)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path == home.as_path() {
                continue;
            }
            let Ok(rel) = path.strip_prefix(&home) else {
                continue;
            };
            let is_dir = entry.file_type().is_dir();
            if (self.ignore_files && !is_dir) || (self.ignore_dirs && is_dir) {
                continue;
            }
            let rel = rel.to_string_lossy();
            if pattern.matches_with(&rel, options) {
                items.push((rel.into_owned(), file_mtime(path)));
            }
        }
        Ok(items)
    }
}

impl Artifact for FileSet {
    fn name(&self) -> &str {
        self.file.base().name()
    }

    fn kind_id(&self) -> &str {
        FILE_SET
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
        self.list().map(|_| ())
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

impl TrackedState for FileSet {
    fn tracks_items(&self) -> bool {
        true
    }

    fn list_items(&self) -> BuildResult<Vec<(String, i64)>> {
        self.list()
    }
}

/// A mask sub-container: a file set that also owns nested rules. Lookups
/// no local meta matches restart at the owner wholesale, so common
/// artifacts are shared through the surrounding project.
pub struct FileSetContainer {
    files: FileSet,
    registry: Rc<Registry>,
}

impl FileSetContainer {
    pub fn registry_ref(&self) -> &Registry {
        &self.registry
    }
}

impl Artifact for FileSetContainer {
    fn name(&self) -> &str {
        self.files.name()
    }

    fn kind_id(&self) -> &str {
        FILE_SET_CONTAINER
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

    fn mtime(&self) -> i64 {
        self.files.mtime()
    }

    fn home(&self) -> PathBuf {
        self.files.home()
    }

    fn registry(&self) -> Option<Rc<Registry>> {
        Some(Rc::clone(&self.registry))
    }

    fn what_it_does(&self) -> Option<String> {
        None
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Register the built-in file kinds.
pub fn register(kinds: &KindRegistry) {
    kinds.register(ArtifactKind::new(
        SOURCE_FILE,
        Rc::new(|s: &Spawn| {
            let cell: ArtifactCell = Rc::new(RefCell::new(SourceFile::new(s)));
            Ok(cell)
        }),
    ));
    kinds.register(ArtifactKind::new(
        DIRECTORY,
        Rc::new(|s: &Spawn| {
            let cell: ArtifactCell = Rc::new(RefCell::new(Directory::new(s)));
            Ok(cell)
        }),
    ));
    kinds.register(
        ArtifactKind::new(
            DEST_DIR,
            Rc::new(|s: &Spawn| {
                let cell: ArtifactCell = Rc::new(RefCell::new(DestDir::new(s)));
                Ok(cell)
            }),
        )
        .with_assignment(Assignment::single("destination")),
    );
    kinds.register(ArtifactKind::new(
        FILE_SET,
        Rc::new(|s: &Spawn| {
            let cell: ArtifactCell = Rc::new(RefCell::new(FileSet::new(s)));
            Ok(cell)
        }),
    ));
    kinds.register(ArtifactKind::new(
        FILE_SET_CONTAINER,
        Rc::new(|s: &Spawn| {
            let registry = Registry::new_sub(
                &s.owner,
                s.owner.home().to_path_buf(),
                Delegation::Full,
            );
            let cell: ArtifactCell = Rc::new(RefCell::new(FileSetContainer {
                files: FileSet::new(s),
                registry: Rc::clone(&registry),
            }));
            registry.attach_facade(&cell, false);
            Ok(cell)
        }),
    ));
}

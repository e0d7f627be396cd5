//! Logged-state decoration
//!
//! `Logged<A>` wraps an artifact that opts into persisted state tracking
//! and composes the log behavior around the wrapped `clean`, `built`,
//! `mtime` and `expired` implementations. This lets an artifact with no
//! output file of its own participate in incremental builds: its staleness
//! is judged against the recorded item and attribute snapshots instead of
//! an output timestamp.

use crate::artifact::{Artifact, ArtifactCell};
use crate::assign::Assignment;
use crate::error::BuildResult;
use crate::logstore::{attrs_expired, items_expired, LogStore};
use crate::meta::MetaTag;
use crate::name::TargetName;
use crate::registry::Registry;
use serde_json::Value;
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;

/// What a tracked artifact exposes to the log layer.
///
/// Items are enumerated as `(path, mtime)` pairs; artifacts that track no
/// items simply contribute nothing to the items log. Attributes are the
/// current values of the fields the artifact declares as tracked.
pub trait TrackedState {
    fn tracks_items(&self) -> bool {
        false
    }

    fn list_items(&self) -> BuildResult<Vec<(String, i64)>> {
        Ok(Vec::new())
    }

    fn log_attrs(&self) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    /// Explicit log id overriding the `<Kind>_<hash>` file stem.
    fn log_id(&self) -> Option<String> {
        None
    }
}

/// Decorator adding persisted-state tracking around an artifact.
pub struct Logged<A> {
    inner: A,
}

impl<A: Artifact + TrackedState> Logged<A> {
    pub fn new(inner: A) -> Self {
        Self { inner }
    }

    pub fn cell(inner: A) -> ArtifactCell {
        Rc::new(RefCell::new(Self::new(inner)))
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut A {
        &mut self.inner
    }

    fn store(&self) -> BuildResult<Option<LogStore>> {
        LogStore::open(&self.inner.home())
    }

    fn stem(&self) -> String {
        self.inner
            .log_id()
            .unwrap_or_else(|| LogStore::stem(self.inner.kind_id(), self.inner.name()))
    }

    fn attrs_enabled(&self) -> bool {
        !self.inner.log_attrs().is_empty()
    }

    fn logs_mtime(&self) -> i64 {
        match self.store() {
            Ok(Some(store)) => store.mtime(
                &self.stem(),
                self.inner.tracks_items(),
                self.attrs_enabled(),
            ),
            _ => -1,
        }
    }

    fn logs_expired(&self) -> BuildResult<bool> {
        let Some(store) = self.store()? else {
            return Ok(false);
        };
        let stem = self.stem();
        if self.inner.tracks_items() {
            let current = self.inner.list_items()?;
            let logged = store.load_items(&stem)?;
            if items_expired(&current, &logged) {
                return Ok(true);
            }
        }
        if self.attrs_enabled() {
            let current = self.inner.log_attrs();
            match store.load_attrs(&stem)? {
                None => return Ok(true),
                Some(snapshot) => {
                    if attrs_expired(&current, &snapshot) {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    fn update_logs(&self) -> BuildResult<()> {
        let Some(store) = self.store()? else {
            return Ok(());
        };
        let stem = self.stem();
        if self.inner.tracks_items() {
            store.update_items(&stem, &self.inner.list_items()?)?;
        }
        store.update_attrs(&stem, &self.inner.log_attrs())
    }

    fn expire_logs(&self) -> BuildResult<()> {
        let Some(store) = self.store()? else {
            return Ok(());
        };
        store.expire(&self.stem(), self.inner.tracks_items(), true)
    }
}

impl<A: Artifact + TrackedState> Artifact for Logged<A> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind_id(&self) -> &str {
        self.inner.kind_id()
    }

    fn owner(&self) -> Option<Rc<Registry>> {
        self.inner.owner()
    }

    fn created_by(&self) -> Option<&MetaTag> {
        self.inner.created_by()
    }

    fn set_created_by(&mut self, tag: MetaTag) {
        self.inner.set_created_by(tag);
    }

    fn requirements(&self) -> Vec<TargetName> {
        self.inner.requirements()
    }

    /// Stale when the wrapped artifact says so, or when the recorded item
    /// or attribute snapshots no longer match reality.
    fn expired(&self) -> BuildResult<bool> {
        Ok(self.inner.expired()? || self.logs_expired()?)
    }

    /// The wrapped mtime combined with the log files' own mtimes, whichever
    /// is most recent.
    fn mtime(&self) -> i64 {
        let logged = self.logs_mtime();
        if logged < 0 {
            self.inner.mtime()
        } else {
            logged.max(self.inner.mtime())
        }
    }

    fn before_build(&mut self, expired: bool) -> BuildResult<()> {
        self.inner.before_build(expired)
    }

    fn build(&mut self) -> BuildResult<()> {
        self.inner.build()
    }

    fn built(&mut self) -> BuildResult<()> {
        self.inner.built()?;
        self.update_logs()
    }

    fn build_failed(&mut self) {
        self.inner.build_failed();
    }

    fn clean(&mut self) -> BuildResult<()> {
        self.inner.clean()?;
        self.expire_logs()
    }

    fn what_it_does(&self) -> Option<String> {
        self.inner.what_it_does()
    }

    fn home(&self) -> PathBuf {
        self.inner.home()
    }

    fn registry(&self) -> Option<Rc<Registry>> {
        self.inner.registry()
    }

    fn assignment(&self) -> Option<Assignment> {
        self.inner.assignment()
    }

    fn assign_slot_override(&self, dep: &dyn Artifact) -> Option<String> {
        self.inner.assign_slot_override(dep)
    }

    fn assign_dependency(&mut self, slot: &str, dep: &ArtifactCell) -> BuildResult<()> {
        self.inner.assign_dependency(slot, dep)
    }

    /// Downcasting reaches through to the wrapped artifact so configuration
    /// blocks keep working on the concrete type.
    fn as_any(&self) -> &dyn Any {
        self.inner.as_any()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self.inner.as_any_mut()
    }
}

//! Artifact registries (the container capability)
//!
//! A registry owns an ordered list of metas, resolves requested target
//! names into artifact instances, caches what it creates and may delegate
//! to the registry of an owning container. Containers come in two
//! delegation flavors: mask sub-containers restart unresolved lookups at
//! their owner wholesale, projects only borrow the meta from the owner
//! chain and instantiate locally.

use crate::artifact::{Artifact, ArtifactCell, Customizer};
use crate::error::{BuildError, BuildResult};
use crate::kind::{KindRegistry, Spawn};
use crate::meta::{Meta, MetaTag};
use crate::name::TargetName;
use crate::tree::{ArtifactTree, BuildSession};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

/// What a registry does with a name no local meta matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delegation {
    /// Restart the whole resolution at the owner (mask sub-containers).
    Full,
    /// Only search the owner chain for a meta and instantiate locally
    /// (projects).
    Partial,
}

pub struct Registry {
    kinds: Rc<KindRegistry>,
    owner: Option<Rc<Registry>>,
    home: PathBuf,
    delegation: Delegation,
    weak_self: RefCell<Weak<Registry>>,
    resolve_self: Cell<bool>,
    created_by: RefCell<Option<MetaTag>>,
    facade: RefCell<Option<Weak<RefCell<dyn Artifact>>>>,
    facade_name: RefCell<Option<String>>,
    metas: RefCell<Vec<Meta>>,
    cache: RefCell<HashMap<TargetName, ArtifactCell>>,
}

impl Registry {
    /// Root registry of a project hierarchy.
    pub fn new_root(home: PathBuf, kinds: Rc<KindRegistry>) -> Rc<Self> {
        Self::build(kinds, None, home, Delegation::Partial)
    }

    /// Registry of a nested container.
    pub fn new_sub(owner: &Rc<Registry>, home: PathBuf, delegation: Delegation) -> Rc<Self> {
        Self::build(
            Rc::clone(&owner.kinds),
            Some(Rc::clone(owner)),
            home,
            delegation,
        )
    }

    fn build(
        kinds: Rc<KindRegistry>,
        owner: Option<Rc<Registry>>,
        home: PathBuf,
        delegation: Delegation,
    ) -> Rc<Self> {
        let registry = Rc::new(Self {
            kinds,
            owner,
            home,
            delegation,
            weak_self: RefCell::new(Weak::new()),
            resolve_self: Cell::new(false),
            created_by: RefCell::new(None),
            facade: RefCell::new(None),
            facade_name: RefCell::new(None),
            metas: RefCell::new(Vec::new()),
            cache: RefCell::new(HashMap::new()),
        });
        *registry.weak_self.borrow_mut() = Rc::downgrade(&registry);
        registry
    }

    /// The shared handle to this registry, used as the owner of artifacts
    /// it instantiates.
    fn me(&self) -> BuildResult<Rc<Registry>> {
        self.weak_self
            .borrow()
            .upgrade()
            .ok_or_else(|| BuildError::failed("registry is no longer alive"))
    }

    /// Attach the container artifact this registry belongs to. A registry
    /// with `resolve_self` resolves its own facade name to the facade
    /// (projects resolve themselves).
    pub fn attach_facade(&self, facade: &ArtifactCell, resolve_self: bool) {
        *self.facade.borrow_mut() = Some(Rc::downgrade(facade));
        *self.facade_name.borrow_mut() = Some(facade.borrow().name().to_string());
        self.resolve_self.set(resolve_self);
    }

    pub fn facade(&self) -> Option<ArtifactCell> {
        self.facade.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn kinds(&self) -> Rc<KindRegistry> {
        Rc::clone(&self.kinds)
    }

    pub fn owner(&self) -> Option<Rc<Registry>> {
        self.owner.clone()
    }

    pub fn set_created_by(&self, tag: MetaTag) {
        *self.created_by.borrow_mut() = Some(tag);
    }

    /// Parse a raw name in this registry's kind namespace.
    pub fn parse(&self, raw: &str) -> BuildResult<TargetName> {
        TargetName::parse_in(raw, &self.kinds)
    }

    /// Register a meta for the given pattern. Any meta with an identical
    /// pattern anywhere in the container hierarchy is removed first; the
    /// meta list stays sorted most-specific-first.
    pub fn define(&self, pattern: TargetName) -> BuildResult<()> {
        let meta = Meta::new(pattern)?;
        let mut level: Option<&Registry> = Some(self);
        while let Some(reg) = level {
            reg.metas
                .borrow_mut()
                .retain(|m| m.pattern().raw() != meta.pattern().raw());
            level = reg.owner.as_deref();
        }
        let mut metas = self.metas.borrow_mut();
        metas.push(meta);
        metas.sort_by(|a, b| a.pattern().cmp(b.pattern()));
        Ok(())
    }

    /// Convenience: register `raw` to instantiate `kind`.
    pub fn define_rule(&self, raw: &str, kind: &str) -> BuildResult<()> {
        self.define(TargetName::with_kind(raw, &self.kinds, kind)?)
    }

    /// Convenience: register `raw` to instantiate `kind` configured by
    /// `block`.
    pub fn define_rule_with(&self, raw: &str, kind: &str, block: Customizer) -> BuildResult<()> {
        self.define(TargetName::with_kind(raw, &self.kinds, kind)?.with_customizer(block))
    }

    /// Sugar for defining a mask sub-container whose body registers nested
    /// rules. The body runs once per instantiated container.
    pub fn match_rule(&self, raw: &str, body: impl Fn(&Registry) + 'static) -> BuildResult<()> {
        let block = crate::artifact::customize::<crate::files::FileSetContainer>(move |c| {
            body(c.registry_ref());
        });
        self.define(
            TargetName::with_kind(raw, &self.kinds, crate::files::FILE_SET_CONTAINER)?
                .with_customizer(block),
        )
    }

    /// Relocate a meta found anywhere up the owner chain into this registry,
    /// combining its block with `block` (original block first). Cached
    /// instances built from the relocated meta are purged.
    pub fn reuse(&self, raw: &str, block: Option<Customizer>) -> BuildResult<()> {
        let name = self.parse(raw)?;
        let Some((meta, holder)) = self.find_meta_up(&name) else {
            return Err(BuildError::failed(format!(
                "Cannot find '{raw}' definition in containers hierarchy"
            )));
        };
        holder.cache.borrow_mut().remove(&name);
        holder
            .cache
            .borrow_mut()
            .retain(|_, art| art.borrow().created_by().map(|t| t.id) != Some(meta.id()));
        holder.metas.borrow_mut().retain(|m| m.id() != meta.id());

        let mut metas = self.metas.borrow_mut();
        metas.push(meta.reuse(block));
        metas.sort_by(|a, b| a.pattern().cmp(b.pattern()));
        Ok(())
    }

    /// Delete every meta the given name matches, at every level of the
    /// owner hierarchy.
    pub fn remove(&self, raw: &str) -> BuildResult<()> {
        let raw = if raw.starts_with("./") || raw.starts_with("../") {
            self.home.join(raw).to_string_lossy().into_owned()
        } else {
            raw.to_string()
        };
        let mut level: Option<&Registry> = Some(self);
        while let Some(reg) = level {
            let probe = TargetName::parse_in(&raw, &reg.kinds)?.relative_to(&reg.home);
            reg.metas
                .borrow_mut()
                .retain(|m| !probe.matches(m.pattern()));
            level = reg.owner.as_deref();
        }
        Ok(())
    }

    /// First locally registered meta matching the name (relativized to this
    /// registry's home).
    fn find_meta(&self, name: &TargetName) -> Option<Meta> {
        let probe = name.relative_to(&self.home);
        self.metas
            .borrow()
            .iter()
            .find(|m| m.matches(&probe))
            .cloned()
    }

    /// Search this registry and then the owner chain for a matching meta.
    fn find_meta_up<'a>(&'a self, name: &TargetName) -> Option<(Meta, &'a Registry)> {
        let mut level: Option<&'a Registry> = Some(self);
        while let Some(reg) = level {
            if let Some(meta) = reg.find_meta(name) {
                return Some((meta, reg));
            }
            level = reg.owner.as_deref();
        }
        None
    }

    /// Resolve a raw target name into an artifact.
    pub fn resolve_str(&self, raw: &str) -> BuildResult<ArtifactCell> {
        let name = self.parse(raw)?;
        self.resolve(&name)
    }

    /// Resolve a raw target name with a one-off configuration block. The
    /// resulting instance is never cached and never shared.
    pub fn resolve_with(&self, raw: &str, block: Customizer) -> BuildResult<ArtifactCell> {
        let name = self.parse(raw)?.with_customizer(block);
        self.resolve(&name)
    }

    /// Resolve a target name into an artifact instance.
    pub fn resolve(&self, name: &TargetName) -> BuildResult<ArtifactCell> {
        // a project resolves its own name to itself
        if self.resolve_self.get()
            && self.facade_name.borrow().as_deref() == Some(name.raw())
            && name
                .kind()
                .map_or(true, |k| {
                    self.facade().map_or(false, |f| f.borrow().kind_id() == k)
                })
        {
            if let Some(facade) = self.facade() {
                return Ok(facade);
            }
        }

        let mut meta = self.find_meta(name);
        if meta.is_none() {
            if let Some(owner) = &self.owner {
                match self.delegation {
                    Delegation::Full => return owner.resolve(name),
                    Delegation::Partial => {
                        meta = owner.find_meta_up(name).map(|(m, _)| m);
                    }
                }
            }
            match &meta {
                Some(found) => {
                    // a container asked to resolve through the very rule
                    // that created it is a cyclic lookup
                    if self.created_by.borrow().as_ref().map(|t| t.id) == Some(found.id()) {
                        return Err(BuildError::CyclicMeta {
                            target: name.raw().to_string(),
                        });
                    }
                }
                None => {
                    if name.kind().is_some() {
                        meta = Some(Meta::from_name(name)?);
                    }
                }
            }
        }
        let Some(meta) = meta else {
            return Err(BuildError::unresolved(name.raw()));
        };

        let customized = name.customizer().is_some();
        let mut art = None;
        {
            let mut cache = self.cache.borrow_mut();
            if customized {
                cache.remove(name);
            } else if let Some(hit) = cache.get(name) {
                art = Some(Rc::clone(hit));
            }
        }
        let art = match art {
            Some(art) => art,
            None => self.instantiate(name, &meta)?,
        };
        if !customized {
            let is_container = art.borrow().registry().is_some();
            if name.mask().is_none() || is_container {
                self.cache
                    .borrow_mut()
                    .insert(name.clone(), Rc::clone(&art));
            }
        }

        // a resolved container takes over the remaining suffix
        let sub = art.borrow().registry();
        if let Some(sub) = sub {
            if !std::ptr::eq(&*sub, self) {
                if let Some(suffix) = name.suffix() {
                    let sub_name = TargetName::parse_in(suffix, &sub.kinds)?;
                    return sub.resolve(&sub_name);
                }
            }
        }
        Ok(art)
    }

    fn instantiate(&self, name: &TargetName, meta: &Meta) -> BuildResult<ArtifactCell> {
        let kind = self.kinds.get(meta.kind_id())?;
        let resolved = match name.suffix() {
            Some(suffix) => suffix.to_string(),
            None => kind
                .default_name()
                .map(str::to_string)
                .ok_or_else(|| BuildError::MissingName {
                    kind: kind.id().to_string(),
                })?,
        };
        let spawn = Spawn {
            name: resolved,
            owner: self.me()?,
        };
        let art = kind.instantiate(&spawn)?;
        art.borrow_mut().set_created_by(meta.tag());
        let sub = art.borrow().registry();
        if let Some(sub) = sub {
            sub.set_created_by(meta.tag());
        }
        for block in [
            kind.default_block(),
            meta.block().cloned(),
            name.customizer().cloned(),
        ]
        .into_iter()
        .flatten()
        {
            block(&mut *art.borrow_mut());
        }
        Ok(art)
    }

    /// Resolve and build a target, building every containing-project
    /// ancestor first (nearest owner outward).
    pub fn build_target(&self, raw: &str, session: &BuildSession) -> BuildResult<ArtifactCell> {
        let art = self.resolve_str(raw)?;
        let mut owner = art.borrow().owner();
        while let Some(reg) = owner {
            if let Some(facade) = reg.facade() {
                ArtifactTree::resolve(&facade)?.build(session)?;
            }
            owner = reg.owner();
        }
        ArtifactTree::resolve(&art)?.build(session)?;
        Ok(art)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("home", &self.home)
            .field("delegation", &self.delegation)
            .field("metas", &self.metas.borrow().len())
            .field("cached", &self.cache.borrow().len())
            .finish()
    }
}

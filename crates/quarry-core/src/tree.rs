//! Dependency tree resolution and execution
//!
//! One tree is resolved per build invocation: every declared requirement is
//! resolved through the owning container's registry, cycles are detected by
//! walking the ancestor chain, subtrees already resolved elsewhere in the
//! pass are not resolved twice, and expiration propagates children-first.
//! Execution is strictly post-order: all children of a node are built
//! before the node itself.

use crate::artifact::{label, same_artifact, Artifact, ArtifactCell};
use crate::assign::assign_to_parent;
use crate::error::{BuildError, BuildResult};
use crate::kind::KindRegistry;
use crate::name::TargetName;
use crate::registry::Registry;
use crate::report;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::rc::Rc;

/// State owned by one top-level build invocation: the verbosity level and
/// the pointer to the artifact currently being built, so collaborating
/// reporting code can attribute output. The pointer is saved and restored
/// around every node, which keeps nested builds re-entrant.
pub struct BuildSession {
    verbosity: u8,
    current: RefCell<Option<ArtifactCell>>,
}

impl BuildSession {
    pub fn new(verbosity: u8) -> Self {
        Self {
            verbosity,
            current: RefCell::new(None),
        }
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    /// The artifact whose build step is currently running.
    pub fn current(&self) -> Option<ArtifactCell> {
        self.current.borrow().clone()
    }

    fn swap_current(&self, next: Option<ArtifactCell>) -> Option<ArtifactCell> {
        self.current.replace(next)
    }
}

impl Default for BuildSession {
    fn default() -> Self {
        Self::new(0)
    }
}

/// One resolved dependency-tree node.
#[derive(Debug)]
pub struct Node {
    pub art: ArtifactCell,
    pub children: Vec<Node>,
    pub expired: bool,
    /// The first child that caused this node to expire, for diagnostics.
    pub expired_by: Option<ArtifactCell>,
}

/// A fully resolved dependency tree, ready to build.
#[derive(Debug)]
pub struct ArtifactTree {
    root: Node,
}

impl ArtifactTree {
    /// Resolve the dependency tree of the given root artifact. Any
    /// resolution failure (unresolved name, cycle, format error) aborts the
    /// whole invocation: a tree that cannot be fully resolved is never
    /// partially built.
    pub fn resolve(root: &ArtifactCell) -> BuildResult<Self> {
        let mut ancestors = Vec::new();
        let mut visited = Vec::new();
        let root = resolve_node(root, &mut ancestors, &mut visited)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Build the tree post-order. Build-phase failures are node-local: the
    /// failing artifact gets `build_failed`, the failure is reported, and
    /// the invocation continues unless the session verbosity demands an
    /// abort.
    pub fn build(&self, session: &BuildSession) -> BuildResult<()> {
        build_node(&self.root, session)
    }

    /// Render the tree with expiration marks and modification times.
    pub fn render(&self) -> String {
        let mut out = String::new();
        render_node(&self.root, 0, &mut out);
        out
    }
}

fn owning_registry(art: &ArtifactCell) -> Option<Rc<Registry>> {
    let a = art.borrow();
    a.registry().or_else(|| a.owner())
}

/// De-duplicate a requirement list the way declarations are meant to stack:
/// a later declaration wins, and singular assignable dependencies collapse
/// onto their assignment slot.
fn dedup_requirements(reqs: Vec<TargetName>, kinds: Option<&KindRegistry>) -> Vec<TargetName> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for req in reqs.into_iter().rev() {
        let key = match req.kind() {
            Some(kind) => {
                let assignment = kinds
                    .and_then(|ks| ks.lookup(kind))
                    .and_then(|k| k.assignment().cloned());
                match assignment {
                    Some(a) if !a.many => format!("@{}", a.slot),
                    _ => format!("{}:{}", kind, req.raw()),
                }
            }
            None => req.raw().to_string(),
        };
        if seen.insert(key) {
            out.push(req);
        }
    }
    out.reverse();
    out
}

fn resolve_node(
    art: &ArtifactCell,
    ancestors: &mut Vec<ArtifactCell>,
    visited: &mut Vec<(ArtifactCell, bool)>,
) -> BuildResult<Node> {
    let own_mtime = art.borrow().mtime();
    let registry = owning_registry(art);
    let kinds = registry.as_ref().map(|r| r.kinds());
    let requirements = dedup_requirements(art.borrow().requirements(), kinds.as_deref());

    let mut node = Node {
        art: Rc::clone(art),
        children: Vec::new(),
        expired: false,
        expired_by: None,
    };

    for req in requirements {
        let Some(registry) = registry.clone() else {
            return Err(BuildError::failed(format!(
                "Owner of '{}' artifact cannot be detected",
                label(&*art.borrow())
            )));
        };
        let child = registry.resolve(&req)?;

        for ancestor in ancestors.iter().chain(std::iter::once(art)) {
            if same_artifact(&*ancestor.borrow(), &*child.borrow()) {
                let (kind, name) = {
                    let a = art.borrow();
                    (a.kind_id().to_string(), a.name().to_string())
                };
                let (dep_kind, dep_name) = {
                    let c = child.borrow();
                    (c.kind_id().to_string(), c.name().to_string())
                };
                return Err(BuildError::CyclicDependency {
                    kind,
                    name,
                    dep_kind,
                    dep_name,
                });
            }
        }

        // a requirement with a one-off customizer is always distinct and
        // never reuses (or seeds) an already resolved subtree
        let reused = if req.customizer().is_none() {
            visited
                .iter()
                .find(|(cell, _)| Rc::ptr_eq(cell, &child))
                .map(|(_, expired)| *expired)
        } else {
            None
        };

        let child_expired = match reused {
            Some(expired) => expired,
            None => {
                ancestors.push(Rc::clone(art));
                let child_node = resolve_node(&child, ancestors, visited)?;
                ancestors.pop();
                let expired = child_node.expired;
                if req.customizer().is_none() {
                    visited.push((Rc::clone(&child), expired));
                }
                node.children.push(child_node);
                expired
            }
        };

        // injection happens even for deduplicated nodes: a shared
        // dependency reaches every parent that required it
        assign_to_parent(&child, art)?;

        if node.expired_by.is_none()
            && (child_expired || (own_mtime >= 0 && child.borrow().mtime() > own_mtime))
        {
            node.expired = true;
            node.expired_by = Some(Rc::clone(&child));
        }
    }

    // the node's own predicate only decides when no child already did;
    // it runs after injection so assigned dependencies can inform it
    if !node.expired {
        node.expired = art.borrow().expired()?;
    }
    Ok(node)
}

fn build_node(node: &Node, session: &BuildSession) -> BuildResult<()> {
    let node_label = label(&*node.art.borrow());
    if !node.expired {
        node.art.borrow_mut().before_build(false)?;
        report::warn(format!("'{node_label}' is not expired"));
        return Ok(());
    }

    for child in &node.children {
        build_node(child, session)?;
    }

    let previous = session.swap_current(Some(Rc::clone(&node.art)));
    let result = run_build_steps(&node.art);
    session.swap_current(previous);

    if let Err(err) = result {
        node.art.borrow_mut().build_failed();
        let (kind, name) = {
            let a = node.art.borrow();
            (a.kind_id().to_string(), a.name().to_string())
        };
        let step = BuildError::step(kind, name, err);
        if session.verbosity() > 1 {
            return Err(step);
        }
        report::failure(&step, session.verbosity());
    }
    Ok(())
}

fn run_build_steps(art: &ArtifactCell) -> BuildResult<()> {
    let mut a = art.borrow_mut();
    if let Some(what) = a.what_it_does() {
        report::info(what);
    }
    a.before_build(true)?;
    a.build()?;
    a.built()?;
    Ok(())
}

fn render_node(node: &Node, depth: usize, out: &mut String) {
    let art = node.art.borrow();
    let mark = if node.expired { "*" } else { "" };
    let by = node
        .expired_by
        .as_ref()
        .map(|a| format!(" <- [{}]", label(&*a.borrow())))
        .unwrap_or_default();
    let pad = "  ".repeat(depth);
    let connector = if depth == 0 { "" } else { "+- " };
    let _ = writeln!(
        out,
        "{pad}{connector}{}{mark}{by} : {}",
        label(&*art),
        art.mtime()
    );
    drop(art);
    for child in &node.children {
        render_node(child, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::{ArtifactKind, KindRegistry};

    #[test]
    fn test_dedup_keeps_later_declaration() {
        let kinds = KindRegistry::new();
        let reqs = vec![
            TargetName::parse_in("a", &kinds).unwrap(),
            TargetName::parse_in("b", &kinds).unwrap(),
            TargetName::parse_in("a", &kinds).unwrap(),
        ];
        let deduped = dedup_requirements(reqs, Some(&kinds));
        let raws: Vec<&str> = deduped.iter().map(|r| r.raw()).collect();
        assert_eq!(raws, ["b", "a"]);
    }

    #[test]
    fn test_dedup_collapses_singular_assignables_by_slot() {
        let kinds = KindRegistry::new();
        let factory: crate::kind::Factory =
            Rc::new(|_s| Err(BuildError::failed("not instantiated in this test")));
        kinds.register(
            ArtifactKind::new("EnvA", Rc::clone(&factory))
                .with_assignment(crate::assign::Assignment::single("env")),
        );
        kinds.register(
            ArtifactKind::new("EnvB", factory)
                .with_assignment(crate::assign::Assignment::single("env")),
        );
        let reqs = vec![
            TargetName::with_kind("one", &kinds, "EnvA").unwrap(),
            TargetName::with_kind("two", &kinds, "EnvB").unwrap(),
        ];
        let deduped = dedup_requirements(reqs, Some(&kinds));
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].raw(), "two");
    }

    #[test]
    fn test_session_current_pointer_swaps() {
        let session = BuildSession::new(0);
        assert!(session.current().is_none());
    }
}

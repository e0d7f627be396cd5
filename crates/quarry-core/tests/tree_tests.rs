//! Dependency tree tests: cycles, ordering, dedup, injection, expiration,
//! failure handling.

use quarry_core::{
    customize, Artifact, ArtifactBase, ArtifactCell, ArtifactKind, ArtifactTree, Assignment,
    BuildError, BuildResult, BuildSession, KindRegistry, MetaTag, Project, Registry, Spawn,
    TargetName,
};
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use tempfile::TempDir;

type Journal = Rc<RefCell<Vec<String>>>;

struct Stub {
    base: ArtifactBase,
    kind: &'static str,
    journal: Journal,
    expired: bool,
    mtime: i64,
    fail: bool,
    assignment: Option<Assignment>,
    received: Vec<(String, String)>,
}

impl Artifact for Stub {
    fn name(&self) -> &str {
        self.base.name()
    }
    fn kind_id(&self) -> &str {
        self.kind
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
        Ok(self.expired)
    }
    fn mtime(&self) -> i64 {
        self.mtime
    }
    fn before_build(&mut self, expired: bool) -> BuildResult<()> {
        if !expired {
            self.journal.borrow_mut().push(format!("skip {}", self.name()));
        }
        Ok(())
    }
    fn build(&mut self) -> BuildResult<()> {
        if self.fail {
            return Err(BuildError::failed("stub build failure"));
        }
        self.journal.borrow_mut().push(format!("build {}", self.name()));
        Ok(())
    }
    fn build_failed(&mut self) {
        self.journal.borrow_mut().push(format!("failed {}", self.name()));
    }
    fn what_it_does(&self) -> Option<String> {
        None
    }
    fn assignment(&self) -> Option<Assignment> {
        self.assignment.clone()
    }
    fn assign_dependency(&mut self, slot: &str, dep: &ArtifactCell) -> BuildResult<()> {
        let dep_name = dep.borrow().name().to_string();
        self.received.push((slot.to_string(), dep_name));
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn register_stub(kinds: &Rc<KindRegistry>, id: &'static str, journal: &Journal) {
    register_stub_with(kinds, id, journal, None);
}

fn register_stub_with(
    kinds: &Rc<KindRegistry>,
    id: &'static str,
    journal: &Journal,
    assignment: Option<Assignment>,
) {
    let journal = Rc::clone(journal);
    let instance_assignment = assignment.clone();
    let mut kind = ArtifactKind::new(
        id,
        Rc::new(move |s: &Spawn| {
            let cell: ArtifactCell = Rc::new(RefCell::new(Stub {
                base: ArtifactBase::new(s.name.clone(), Some(Rc::clone(&s.owner))),
                kind: id,
                journal: Rc::clone(&journal),
                expired: true,
                mtime: -1,
                fail: false,
                assignment: instance_assignment.clone(),
                received: Vec::new(),
            }));
            Ok(cell)
        }),
    );
    if let Some(assignment) = assignment {
        kind = kind.with_assignment(assignment);
    }
    kinds.register(kind);
}

fn setup() -> (TempDir, Rc<KindRegistry>, Rc<Registry>, Journal) {
    let home = TempDir::new().unwrap();
    let kinds = KindRegistry::with_builtins();
    let journal: Journal = Rc::new(RefCell::new(Vec::new()));
    register_stub(&kinds, "Stub", &journal);
    let registry = Registry::new_root(home.path().to_path_buf(), Rc::clone(&kinds));
    (home, kinds, registry, journal)
}

/// Define a Stub rule whose instances require the given raw names.
fn define_requiring(
    registry: &Rc<Registry>,
    kinds: &Rc<KindRegistry>,
    name: &str,
    requires: &[&str],
) {
    define_stub_rule(registry, kinds, name, requires, |_s| {});
}

fn define_stub_rule(
    registry: &Rc<Registry>,
    kinds: &Rc<KindRegistry>,
    name: &str,
    requires: &[&str],
    tune: impl Fn(&mut Stub) + 'static,
) {
    let requires: Vec<String> = requires.iter().map(|s| s.to_string()).collect();
    let kinds_for_block = Rc::clone(kinds);
    registry
        .define(
            TargetName::with_kind(name, kinds, "Stub")
                .unwrap()
                .with_customizer(customize::<Stub>(move |s| {
                    for req in &requires {
                        s.base_require(TargetName::parse_in(req, &kinds_for_block).unwrap());
                    }
                    tune(s);
                })),
        )
        .unwrap();
}

impl Stub {
    fn base_require(&mut self, name: TargetName) {
        self.base.require(name);
    }
}

fn journal_of(journal: &Journal) -> Vec<String> {
    journal.borrow().clone()
}

#[test]
fn test_cyclic_dependency_is_detected() {
    let (_home, kinds, registry, _journal) = setup();
    define_requiring(&registry, &kinds, "A", &["B"]);
    define_requiring(&registry, &kinds, "B", &["A"]);

    let root = registry.resolve_str("A").unwrap();
    let err = ArtifactTree::resolve(&root).unwrap_err();
    match err {
        BuildError::CyclicDependency {
            kind,
            name,
            dep_kind,
            dep_name,
        } => {
            assert_eq!(kind, "Stub");
            assert_eq!(name, "B");
            assert_eq!(dep_kind, "Stub");
            assert_eq!(dep_name, "A");
        }
        other => panic!("expected CyclicDependency, got {other:?}"),
    }
}

#[test]
fn test_children_build_before_parents_in_declaration_order() {
    let (_home, kinds, registry, journal) = setup();
    define_requiring(&registry, &kinds, "A", &["B", "C"]);
    define_requiring(&registry, &kinds, "B", &["D"]);
    define_requiring(&registry, &kinds, "C", &[]);
    define_requiring(&registry, &kinds, "D", &[]);

    let root = registry.resolve_str("A").unwrap();
    ArtifactTree::resolve(&root)
        .unwrap()
        .build(&BuildSession::new(0))
        .unwrap();

    assert_eq!(journal_of(&journal), ["build D", "build B", "build C", "build A"]);
}

#[test]
fn test_not_expired_node_reports_skip_and_does_nothing() {
    let (_home, kinds, registry, journal) = setup();
    define_stub_rule(&registry, &kinds, "A", &[], |s| s.expired = false);

    let root = registry.resolve_str("A").unwrap();
    ArtifactTree::resolve(&root)
        .unwrap()
        .build(&BuildSession::new(0))
        .unwrap();

    assert_eq!(journal_of(&journal), ["skip A"]);
}

#[test]
fn test_shared_dependency_builds_once_but_injects_into_every_parent() {
    let (_home, kinds, registry, journal) = setup();
    register_stub_with(&kinds, "Shared", &journal, Some(Assignment::single("shared")));

    registry.define_rule("S", "Shared").unwrap();
    define_requiring(&registry, &kinds, "P1", &["S"]);
    define_requiring(&registry, &kinds, "P2", &["S"]);
    define_requiring(&registry, &kinds, "Root", &["P1", "P2"]);

    let root = registry.resolve_str("Root").unwrap();
    let tree = ArtifactTree::resolve(&root).unwrap();
    tree.build(&BuildSession::new(0)).unwrap();

    assert_eq!(
        journal_of(&journal),
        ["build S", "build P1", "build P2", "build Root"]
    );

    for parent in ["P1", "P2"] {
        let art = registry.resolve_str(parent).unwrap();
        let borrowed = art.borrow();
        let stub = borrowed.as_any().downcast_ref::<Stub>().unwrap();
        assert_eq!(stub.received, [("shared".to_string(), "S".to_string())]);
    }

    // the shared subtree appears exactly once in the resolved tree
    fn count(node: &quarry_core::Node, name: &str) -> usize {
        let own = usize::from(node.art.borrow().name() == name);
        own + node.children.iter().map(|c| count(c, name)).sum::<usize>()
    }
    assert_eq!(count(tree.root(), "S"), 1);
}

#[test]
fn test_newer_child_mtime_expires_parent() {
    let (_home, kinds, registry, journal) = setup();
    define_stub_rule(&registry, &kinds, "Kid", &[], |s| {
        s.expired = false;
        s.mtime = 200;
    });
    define_stub_rule(&registry, &kinds, "Par", &["Kid"], |s| {
        s.expired = false;
        s.mtime = 100;
    });

    let root = registry.resolve_str("Par").unwrap();
    let tree = ArtifactTree::resolve(&root).unwrap();
    assert!(tree.root().expired);
    assert!(tree.root().expired_by.is_some());

    tree.build(&BuildSession::new(0)).unwrap();
    assert_eq!(journal_of(&journal), ["skip Kid", "build Par"]);
}

#[test]
fn test_older_child_leaves_parent_alone() {
    let (_home, kinds, registry, journal) = setup();
    define_stub_rule(&registry, &kinds, "Kid", &[], |s| {
        s.expired = false;
        s.mtime = 100;
    });
    define_stub_rule(&registry, &kinds, "Par", &["Kid"], |s| {
        s.expired = false;
        s.mtime = 200;
    });

    let root = registry.resolve_str("Par").unwrap();
    let tree = ArtifactTree::resolve(&root).unwrap();
    assert!(!tree.root().expired);

    tree.build(&BuildSession::new(0)).unwrap();
    assert_eq!(journal_of(&journal), ["skip Par"]);
}

#[test]
fn test_expired_child_expires_parent_with_diagnostic() {
    let (_home, kinds, registry, _journal) = setup();
    define_stub_rule(&registry, &kinds, "Kid", &[], |s| s.expired = true);
    define_stub_rule(&registry, &kinds, "Par", &["Kid"], |s| s.expired = false);

    let root = registry.resolve_str("Par").unwrap();
    let tree = ArtifactTree::resolve(&root).unwrap();
    assert!(tree.root().expired);
    let by = tree.root().expired_by.as_ref().unwrap();
    assert_eq!(by.borrow().name(), "Kid");
}

#[test]
fn test_build_failure_is_swallowed_at_default_verbosity() {
    let (_home, kinds, registry, journal) = setup();
    define_stub_rule(&registry, &kinds, "Boom", &[], |s| s.fail = true);
    define_requiring(&registry, &kinds, "Ok", &[]);
    define_requiring(&registry, &kinds, "Top", &["Boom", "Ok"]);

    let root = registry.resolve_str("Top").unwrap();
    ArtifactTree::resolve(&root)
        .unwrap()
        .build(&BuildSession::new(0))
        .unwrap();

    assert_eq!(
        journal_of(&journal),
        ["failed Boom", "build Ok", "build Top"]
    );
}

#[test]
fn test_build_failure_aborts_at_high_verbosity() {
    let (_home, kinds, registry, journal) = setup();
    define_stub_rule(&registry, &kinds, "Boom", &[], |s| s.fail = true);
    define_requiring(&registry, &kinds, "Top", &["Boom"]);

    let root = registry.resolve_str("Top").unwrap();
    let err = ArtifactTree::resolve(&root)
        .unwrap()
        .build(&BuildSession::new(2))
        .unwrap_err();
    assert!(matches!(err, BuildError::Step { .. }));
    assert_eq!(journal_of(&journal), ["failed Boom"]);
}

#[test]
fn test_customized_requirement_is_never_deduplicated() {
    let (_home, kinds, registry, journal) = setup();
    registry.define_rule("S", "Stub").unwrap();
    define_requiring(&registry, &kinds, "P1", &["S"]);

    // P2 requires S with a one-off block: a distinct instance is resolved
    // even though S was already visited under P1
    let kinds_for_edge = Rc::clone(&kinds);
    define_stub_rule(&registry, &kinds, "P2", &[], move |s| {
        s.base_require(
            TargetName::parse_in("S", &kinds_for_edge)
                .unwrap()
                .with_customizer(customize::<Stub>(|_s| {})),
        );
    });
    define_requiring(&registry, &kinds, "Root", &["P1", "P2"]);

    let root = registry.resolve_str("Root").unwrap();
    ArtifactTree::resolve(&root)
        .unwrap()
        .build(&BuildSession::new(0))
        .unwrap();

    let journal = journal_of(&journal);
    assert_eq!(
        journal.iter().filter(|l| l.as_str() == "build S").count(),
        2,
        "customized requirement must build its own instance: {journal:?}"
    );
}

#[test]
fn test_build_target_builds_containing_project_first() {
    let home = TempDir::new().unwrap();
    let kinds = KindRegistry::with_builtins();
    let journal: Journal = Rc::new(RefCell::new(Vec::new()));
    register_stub(&kinds, "Stub", &journal);

    let (_project, registry) = Project::open(home.path(), kinds).unwrap();
    registry.define_rule("thing", "Stub").unwrap();

    let session = BuildSession::new(0);
    let art = registry.build_target("thing", &session).unwrap();
    assert_eq!(art.borrow().name(), "thing");
    assert_eq!(journal_of(&journal), ["build thing"]);
}

#[test]
fn test_tree_render_marks_expiration() {
    let (_home, kinds, registry, _journal) = setup();
    define_stub_rule(&registry, &kinds, "Kid", &[], |s| s.expired = true);
    define_stub_rule(&registry, &kinds, "Par", &["Kid"], |s| s.expired = false);

    let root = registry.resolve_str("Par").unwrap();
    let tree = ArtifactTree::resolve(&root).unwrap();
    let rendered = tree.render();
    assert!(rendered.contains("Stub:Par*"));
    assert!(rendered.contains("+- Stub:Kid*"));
}

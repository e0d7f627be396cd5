//! Registry resolution tests: meta ordering, caching, delegation, reuse.

use quarry_core::{
    customize, Artifact, ArtifactBase, ArtifactCell, ArtifactKind, BuildError, Delegation,
    KindRegistry, MetaTag, Registry, Spawn, TargetName,
};
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use tempfile::TempDir;

struct Stub {
    base: ArtifactBase,
    kind: &'static str,
    notes: Vec<String>,
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
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn register_stub(kinds: &Rc<KindRegistry>, id: &'static str) {
    kinds.register(ArtifactKind::new(
        id,
        Rc::new(move |s: &Spawn| {
            let cell: ArtifactCell = Rc::new(RefCell::new(Stub {
                base: ArtifactBase::new(s.name.clone(), Some(Rc::clone(&s.owner))),
                kind: id,
                notes: Vec::new(),
            }));
            Ok(cell)
        }),
    ));
}

fn setup() -> (TempDir, Rc<KindRegistry>, Rc<Registry>) {
    let home = TempDir::new().unwrap();
    let kinds = KindRegistry::with_builtins();
    register_stub(&kinds, "Stub");
    let registry = Registry::new_root(home.path().to_path_buf(), Rc::clone(&kinds));
    (home, kinds, registry)
}

fn kind_of(art: &ArtifactCell) -> String {
    art.borrow().kind_id().to_string()
}

#[test]
fn test_exact_meta_wins_regardless_of_registration_order() {
    for flipped in [false, true] {
        let (_home, kinds, registry) = setup();
        register_stub(&kinds, "General");
        register_stub(&kinds, "Exact");

        let rules: [(&str, &str); 2] = if flipped {
            [("src/Main.java", "Exact"), ("**/*.java", "General")]
        } else {
            [("**/*.java", "General"), ("src/Main.java", "Exact")]
        };
        for (pattern, kind) in rules {
            registry.define_rule(pattern, kind).unwrap();
        }

        let exact = registry.resolve_str("src/Main.java").unwrap();
        assert_eq!(kind_of(&exact), "Exact");
        let general = registry.resolve_str("src/Other.java").unwrap();
        assert_eq!(kind_of(&general), "General");
    }
}

#[test]
fn test_unresolved_target_is_fatal() {
    let (_home, _kinds, registry) = setup();
    let err = registry.resolve_str("nothing/here").unwrap_err();
    assert!(matches!(err, BuildError::UnresolvedTarget { .. }));
}

#[test]
fn test_self_describing_name_is_its_own_meta() {
    let (_home, _kinds, registry) = setup();
    let art = registry.resolve_str("Stub:thing").unwrap();
    assert_eq!(kind_of(&art), "Stub");
    assert_eq!(art.borrow().name(), "thing");
}

#[test]
fn test_resolved_artifacts_are_cached() {
    let (_home, _kinds, registry) = setup();
    registry.define_rule("thing", "Stub").unwrap();
    let a = registry.resolve_str("thing").unwrap();
    let b = registry.resolve_str("thing").unwrap();
    assert!(Rc::ptr_eq(&a, &b));
}

#[test]
fn test_customized_requests_never_share_instances() {
    let (_home, _kinds, registry) = setup();
    registry.define_rule("thing", "Stub").unwrap();

    let cached = registry.resolve_str("thing").unwrap();
    let custom1 = registry
        .resolve_with("thing", customize::<Stub>(|s| s.notes.push("one".into())))
        .unwrap();
    let custom2 = registry
        .resolve_with("thing", customize::<Stub>(|s| s.notes.push("two".into())))
        .unwrap();
    assert!(!Rc::ptr_eq(&cached, &custom1));
    assert!(!Rc::ptr_eq(&custom1, &custom2));

    // the customized request evicted the cached entry; plain resolution
    // starts a fresh instance and caches it again
    let fresh = registry.resolve_str("thing").unwrap();
    assert!(!Rc::ptr_eq(&cached, &fresh));
    assert!(Rc::ptr_eq(&fresh, &registry.resolve_str("thing").unwrap()));
}

#[test]
fn test_meta_block_applies_to_instances() {
    let (_home, kinds, registry) = setup();
    registry
        .define(
            TargetName::with_kind("thing", &kinds, "Stub")
                .unwrap()
                .with_customizer(customize::<Stub>(|s| s.notes.push("configured".into()))),
        )
        .unwrap();
    let art = registry.resolve_str("thing").unwrap();
    let borrowed = art.borrow();
    let stub = borrowed.as_any().downcast_ref::<Stub>().unwrap();
    assert_eq!(stub.notes, ["configured"]);
}

#[test]
fn test_define_replaces_identical_pattern() {
    let (_home, kinds, registry) = setup();
    register_stub(&kinds, "Other");
    registry.define_rule("**/*.x", "Stub").unwrap();
    registry.define_rule("**/*.x", "Other").unwrap();
    let art = registry.resolve_str("f.x").unwrap();
    assert_eq!(kind_of(&art), "Other");
}

#[test]
fn test_reuse_moves_meta_and_combines_blocks_original_first() {
    let (home, kinds, registry) = setup();
    registry
        .define(
            TargetName::with_kind("thing", &kinds, "Stub")
                .unwrap()
                .with_customizer(customize::<Stub>(|s| s.notes.push("original".into()))),
        )
        .unwrap();

    let sub = Registry::new_sub(&registry, home.path().to_path_buf(), Delegation::Partial);
    sub.reuse(
        "thing",
        Some(customize::<Stub>(|s| s.notes.push("extra".into()))),
    )
    .unwrap();

    let art = sub.resolve_str("thing").unwrap();
    {
        let borrowed = art.borrow();
        let stub = borrowed.as_any().downcast_ref::<Stub>().unwrap();
        assert_eq!(stub.notes, ["original", "extra"]);
    }

    // the meta was relocated away from its original owner
    assert!(registry.resolve_str("thing").is_err());
}

#[test]
fn test_reuse_of_unknown_meta_fails() {
    let (home, _kinds, registry) = setup();
    let sub = Registry::new_sub(&registry, home.path().to_path_buf(), Delegation::Partial);
    assert!(sub.reuse("ghost", None).is_err());
}

#[test]
fn test_remove_deletes_matching_metas_across_hierarchy() {
    let (home, _kinds, registry) = setup();
    registry.define_rule("**/*.java", "Stub").unwrap();
    let sub = Registry::new_sub(&registry, home.path().to_path_buf(), Delegation::Partial);
    sub.define_rule("src/*.java", "Stub").unwrap();

    sub.remove("**/*.java").unwrap();

    assert!(sub.resolve_str("src/A.java").is_err());
    assert!(registry.resolve_str("src/A.java").is_err());
}

#[test]
fn test_mask_container_resolves_nested_rules_and_delegates_the_rest() {
    let (_home, kinds, registry) = setup();
    register_stub(&kinds, "Java");
    register_stub(&kinds, "Lib");

    registry.define_rule("lib/*.jar", "Lib").unwrap();
    registry
        .match_rule("compile:*", |r| {
            r.define_rule("**/*.java", "Java").unwrap();
        })
        .unwrap();

    let nested = registry.resolve_str("compile:src/A.java").unwrap();
    assert_eq!(kind_of(&nested), "Java");
    assert_eq!(nested.borrow().name(), "src/A.java");

    // nothing in the container matches a jar; the lookup restarts at the
    // owning project and lands on its rule
    let delegated = registry.resolve_str("compile:lib/x.jar").unwrap();
    assert_eq!(kind_of(&delegated), "Lib");
}

#[test]
fn test_container_resolving_its_creating_meta_is_cyclic() {
    let (home, _kinds, registry) = setup();
    registry.define_rule("sub:*", "Stub").unwrap();

    let from_root = registry.resolve_str("sub:x").unwrap();
    let tag = from_root.borrow().created_by().cloned().unwrap();

    let sub = Registry::new_sub(&registry, home.path().to_path_buf(), Delegation::Partial);
    sub.set_created_by(tag);

    let err = sub.resolve_str("sub:y").unwrap_err();
    assert!(matches!(err, BuildError::CyclicMeta { .. }));
}

#[test]
fn test_missing_default_name_fails() {
    let (_home, _kinds, registry) = setup();
    // "Stub" declares no default name; a bare-prefix request carries no
    // suffix to name the instance with
    registry.define_rule("st:", "Stub").unwrap();
    let err = registry.resolve_str("st:").unwrap_err();
    assert!(matches!(err, BuildError::MissingName { .. }));
}

//! Dependency injection convention
//!
//! An artifact kind can declare that resolved instances inject themselves
//! into a named slot of the artifact that required them: either a single
//! slot (a second, different instance is an error) or an accumulating
//! sequence (exact duplicates are ignored).

use crate::artifact::{label, Artifact, ArtifactCell};
use crate::error::{BuildError, BuildResult};
use std::rc::Rc;

/// Declares how a dependency assigns itself into its parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    /// Name of the parent slot to assign into.
    pub slot: String,
    /// Whether multiple same-typed dependencies accumulate into a sequence.
    pub many: bool,
}

impl Assignment {
    pub fn single(slot: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            many: false,
        }
    }

    pub fn many(slot: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            many: true,
        }
    }

    /// Default slot for a kind: its lower-cased identifier.
    pub fn default_for(kind_id: &str) -> Self {
        Self::single(kind_id.to_lowercase())
    }
}

/// Parent-side storage implementing the assignment rules.
pub enum Binding {
    One(Option<ArtifactCell>),
    Many(Vec<ArtifactCell>),
}

impl Binding {
    pub fn one() -> Self {
        Self::One(None)
    }

    pub fn many() -> Self {
        Self::Many(Vec::new())
    }

    /// Bind a dependency. Re-binding the exact same instance is a no-op;
    /// binding a different instance into an occupied single slot fails.
    pub fn bind(&mut self, slot: &str, dep: &ArtifactCell) -> BuildResult<()> {
        match self {
            Self::One(held) => match held {
                Some(existing) if Rc::ptr_eq(existing, dep) => Ok(()),
                Some(_) => {
                    let dep = dep.borrow();
                    Err(BuildError::DuplicateAssignment {
                        slot: slot.to_string(),
                        kind: dep.kind_id().to_string(),
                        name: dep.name().to_string(),
                    })
                }
                None => {
                    *held = Some(Rc::clone(dep));
                    Ok(())
                }
            },
            Self::Many(list) => {
                if !list.iter().any(|d| Rc::ptr_eq(d, dep)) {
                    list.push(Rc::clone(dep));
                }
                Ok(())
            }
        }
    }

    /// The held dependency of a single-valued binding.
    pub fn get(&self) -> Option<&ArtifactCell> {
        match self {
            Self::One(held) => held.as_ref(),
            Self::Many(list) => list.first(),
        }
    }

    /// All held dependencies.
    pub fn all(&self) -> Vec<ArtifactCell> {
        match self {
            Self::One(held) => held.iter().cloned().collect(),
            Self::Many(list) => list.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::One(held) => usize::from(held.is_some()),
            Self::Many(list) => list.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inject a resolved dependency into its parent if the dependency
/// participates in the assignment convention. The parent-provided slot
/// override takes precedence over the declared slot name.
pub fn assign_to_parent(child: &ArtifactCell, parent: &ArtifactCell) -> BuildResult<()> {
    let assignment = child.borrow().assignment();
    let Some(assignment) = assignment else {
        return Ok(());
    };
    let slot = {
        let c = child.borrow();
        parent
            .borrow()
            .assign_slot_override(&*c)
            .unwrap_or(assignment.slot)
    };
    let result = {
        let mut p = parent.borrow_mut();
        p.assign_dependency(&slot, child)
    };
    result.map_err(|e| {
        BuildError::failed(format!(
            "Cannot assign '{}' into '{}': {e}",
            label(&*child.borrow()),
            label(&*parent.borrow()),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Artifact, ArtifactBase};
    use crate::meta::MetaTag;
    use crate::name::TargetName;
    use std::any::Any;
    use std::cell::RefCell;

    struct Dummy {
        base: ArtifactBase,
    }

    impl Artifact for Dummy {
        fn name(&self) -> &str {
            self.base.name()
        }
        fn kind_id(&self) -> &str {
            "Dummy"
        }
        fn owner(&self) -> Option<Rc<crate::registry::Registry>> {
            None
        }
        fn created_by(&self) -> Option<&MetaTag> {
            None
        }
        fn set_created_by(&mut self, _tag: MetaTag) {}
        fn requirements(&self) -> Vec<TargetName> {
            Vec::new()
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn cell(name: &str) -> ArtifactCell {
        Rc::new(RefCell::new(Dummy {
            base: ArtifactBase::new(name, None),
        }))
    }

    #[test]
    fn test_single_binding_rejects_second_instance() {
        let mut binding = Binding::one();
        let a = cell("a");
        let b = cell("b");
        binding.bind("slot", &a).unwrap();
        binding.bind("slot", &a).unwrap();
        assert!(binding.bind("slot", &b).is_err());
        assert_eq!(binding.len(), 1);
    }

    #[test]
    fn test_many_binding_skips_exact_duplicates() {
        let mut binding = Binding::many();
        let a = cell("a");
        let b = cell("b");
        binding.bind("slot", &a).unwrap();
        binding.bind("slot", &a).unwrap();
        binding.bind("slot", &b).unwrap();
        assert_eq!(binding.len(), 2);
    }

    #[test]
    fn test_default_slot_is_lowercased_kind() {
        assert_eq!(Assignment::default_for("DestDir").slot, "destdir");
        assert!(!Assignment::default_for("DestDir").many);
    }
}

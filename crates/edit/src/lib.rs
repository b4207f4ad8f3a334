//! The edit/diff engine: staged edit application (`set`/`delete`/`move`/
//! `edit_batch`), merge against a reference tree, canonical diff, and the
//! module-set extraction `commit` uses to decide which locks to take.

pub mod error;
pub mod opts;
pub mod staged;

pub use error::EditError;
pub use opts::{EditOpts, Position};
pub use staged::StagedEdit;

use std::collections::BTreeSet;
use tree::{diff, validate, DiffEntry, SchemaContext, Tree};

/// A classified, depth-ordered change set: `Δ` in spec terms.
pub type Delta = Vec<DiffEntry>;

/// Validation failed during `merge_and_diff`: every offending node is
/// collected rather than short-circuiting on the first one.
#[derive(Debug, thiserror::Error)]
pub enum MergeAndDiffError {
    #[error("{} validation errors against the schema", .0.len())]
    ValidationFailed(Vec<tree::ValidationError>),
    #[error(transparent)]
    Edit(#[from] EditError),
}

/// Finalizes a session's staged edit: the staged tree has already been
/// mutated in place by `set`/`delete`/`move`/`edit_batch`, so this step
/// validates it against the schema and computes the diff against `base`.
/// Returns the merged tree plus its `Δ`.
pub fn merge_and_diff(
    base: &Tree,
    staged: &StagedEdit,
    schema: &SchemaContext,
) -> Result<(Tree, Delta), MergeAndDiffError> {
    let merged = Tree {
        root: staged.tree().root.clone(),
        generation: base.generation,
    };
    validate(&merged, schema).map_err(MergeAndDiffError::ValidationFailed)?;
    let delta = diff(&base.root, &merged.root);
    Ok((merged, delta))
}

/// `Mods(Δ)`: the set of top-level module names touched by a change set, in
/// the deterministic (sorted) order `commit` needs for its name-ordered
/// lock acquisition.
pub fn mods(delta: &Delta) -> BTreeSet<String> {
    delta
        .iter()
        .filter_map(|entry| {
            entry.xpath.iter().next().and_then(|t| match t {
                tree::Token::Property(name) => name.split(':').next().map(String::from),
                _ => None,
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use tree::{ModuleSchema, NodeKind, SchemaNode, Value};

    fn schema_with_module(name: &str) -> SchemaContext {
        let mut nodes = std::collections::BTreeMap::new();
        nodes.insert(
            "/a".to_string(),
            SchemaNode {
                path: "/a".into(),
                kind: NodeKind::Leaf { mandatory: false },
                children: vec![],
            },
        );
        let mut ctx = SchemaContext::new(1);
        ctx.install(ModuleSchema {
            name: name.to_string(),
            revision: "2024-01-01".into(),
            nodes,
            features: Vec::new(),
            feature_bitset: 0,
        });
        ctx
    }

    #[test]
    fn test_merge_and_diff_produces_create() {
        let base = Tree::empty(1);
        let schema = schema_with_module("m");
        let mut staged = StagedEdit::new(base.clone());
        staged
            .set(
                &tree::Pointer::parse("/m:a").unwrap(),
                Value::Bool(true),
                EditOpts::default(),
            )
            .unwrap();
        let (merged, delta) = merge_and_diff(&base, &staged, &schema).unwrap();
        assert!(merged.root.child("m:a").is_some());
        assert_eq!(mods(&delta), BTreeSet::from(["m".to_string()]));
    }

    #[test]
    fn test_strict_set_twice_fails() {
        let base = Tree::empty(1);
        let mut staged = StagedEdit::new(base);
        let path = tree::Pointer::parse("/m:a").unwrap();
        staged
            .set(&path, Value::Bool(true), EditOpts { strict: true, non_recursive: false })
            .unwrap();
        let err = staged
            .set(&path, Value::Bool(false), EditOpts { strict: true, non_recursive: false })
            .unwrap_err();
        assert!(matches!(err, EditError::AlreadyExists(_)));
    }

    #[test]
    fn test_set_leaf_list_positional_append() {
        let base = Tree::empty(1);
        let mut staged = StagedEdit::new(base);
        let path = tree::Pointer::parse("/m:tags[-]").unwrap();
        staged.set(&path, Value::String("a".into()), EditOpts::default()).unwrap();
        staged.set(&path, Value::String("b".into()), EditOpts::default()).unwrap();
        match staged.get(&tree::Pointer::parse("/m:tags").unwrap()) {
            Some(tree::Node::LeafList { values, .. }) => {
                assert_eq!(values, &vec![Value::String("a".into()), Value::String("b".into())]);
            }
            other => panic!("expected a leaf-list, got {other:?}"),
        }
    }

    #[test]
    fn test_set_leaf_list_slot_fixed_by_predicate_is_idempotent() {
        let base = Tree::empty(1);
        let mut staged = StagedEdit::new(base);
        let path = tree::Pointer::parse("/m:tags[.='a']").unwrap();
        staged.set(&path, Value::String("a".into()), EditOpts::default()).unwrap();
        staged.set(&path, Value::String("a".into()), EditOpts::default()).unwrap();
        match staged.get(&tree::Pointer::parse("/m:tags").unwrap()) {
            Some(tree::Node::LeafList { values, .. }) => {
                assert_eq!(values, &vec![Value::String("a".into())]);
            }
            other => panic!("expected a leaf-list, got {other:?}"),
        }
    }

    #[test]
    fn test_set_leaf_list_strict_on_existing_slot_fails() {
        let base = Tree::empty(1);
        let mut staged = StagedEdit::new(base);
        let path = tree::Pointer::parse("/m:tags[.='a']").unwrap();
        staged.set(&path, Value::String("a".into()), EditOpts::default()).unwrap();
        let err = staged
            .set(&path, Value::String("a".into()), EditOpts { strict: true, non_recursive: false })
            .unwrap_err();
        assert!(matches!(err, EditError::AlreadyExists(_)));
    }
}

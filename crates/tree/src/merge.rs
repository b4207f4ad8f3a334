//! Per-node operation inheritance and merge for `edit_batch`: each node of
//! an edit carries an operation (create/merge/replace/delete/remove)
//! inherited from the nearest ancestor override or a supplied default.

use crate::node::{Children, Node};
use crate::ptr::Pointer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    Merge,
    Replace,
    Delete,
    Remove,
}

/// Sparse per-path operation overrides; lookup resolves to the nearest
/// registered ancestor-or-self, falling back to the edit's default.
#[derive(Debug, Clone, Default)]
pub struct OpMap(Vec<(Pointer, Op)>);

impl OpMap {
    pub fn new() -> Self {
        OpMap(Vec::new())
    }

    pub fn set(&mut self, ptr: Pointer, op: Op) {
        self.0.retain(|(p, _)| p != &ptr);
        self.0.push((ptr, op));
    }

    pub fn resolve(&self, ptr: &Pointer, default: Op) -> Op {
        let mut best: Option<(usize, Op)> = None;
        for (p, op) in &self.0 {
            if is_prefix_or_equal(p, ptr) {
                let depth = p.depth();
                if best.map_or(true, |(d, _)| depth > d) {
                    best = Some((depth, *op));
                }
            }
        }
        best.map(|(_, op)| op).unwrap_or(default)
    }
}

fn is_prefix_or_equal(prefix: &Pointer, of: &Pointer) -> bool {
    if prefix.depth() > of.depth() {
        return false;
    }
    prefix.iter().zip(of.iter()).all(|(a, b)| a == b)
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MergeError {
    #[error("{0}: node already exists (create requires absence)")]
    AlreadyExists(String),
    #[error("{0}: node does not exist (delete requires presence)")]
    MissingForDelete(String),
    #[error("{0}: parent does not exist and non_recursive was set")]
    MissingParent(String),
}

/// Applies `edit` onto `base` using the per-path operations in `ops`
/// (falling back to `default_op`), returning the merged tree.
pub fn merge(
    base: &Node,
    edit: &Children,
    ops: &OpMap,
    default_op: Op,
) -> Result<Node, MergeError> {
    let mut out = base.clone();
    merge_children(&mut out, edit, &Pointer::root(), ops, default_op)?;
    Ok(out)
}

fn merge_children(
    base: &mut Node,
    edit: &Children,
    at: &Pointer,
    ops: &OpMap,
    default_op: Op,
) -> Result<(), MergeError> {
    if !matches!(base, Node::Container { .. }) {
        *base = Node::empty_container();
    }
    for (name, edit_child) in edit {
        let child_path = at.clone().pushed(crate::ptr::Token::Property(name.clone()));
        let op = ops.resolve(&child_path, default_op);
        let existing = base.child(name).cloned();

        match op {
            Op::Delete => {
                if existing.is_none() {
                    return Err(MergeError::MissingForDelete(child_path.to_string()));
                }
                base.remove_child(name);
            }
            Op::Remove => {
                base.remove_child(name);
            }
            Op::Create => {
                if existing.is_some() {
                    return Err(MergeError::AlreadyExists(child_path.to_string()));
                }
                base.upsert_child(name, edit_child.clone());
            }
            Op::Replace => {
                base.upsert_child(name, edit_child.clone());
            }
            Op::Merge => match (&existing, edit_child) {
                (Some(Node::Container { .. }), Node::Container { children: ec, .. }) => {
                    let mut merged = existing.unwrap();
                    merge_children(&mut merged, ec, &child_path, ops, default_op)?;
                    base.upsert_child(name, merged);
                }
                _ => {
                    base.upsert_child(name, edit_child.clone());
                }
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_merge_create_strict() {
        let base = Node::empty_container();
        let edit = vec![("a".to_string(), Node::leaf(Value::Bool(true)))];
        let mut ops = OpMap::new();
        ops.set(Pointer::root().pushed(crate::ptr::Token::Property("a".into())), Op::Create);

        let merged = merge(&base, &edit, &ops, Op::Merge).unwrap();
        assert_eq!(merged.child("a"), Some(&Node::leaf(Value::Bool(true))));

        // Second create of the same path fails.
        let err = merge(&merged, &edit, &ops, Op::Merge).unwrap_err();
        assert!(matches!(err, MergeError::AlreadyExists(_)));
    }

    #[test]
    fn test_merge_default_op_inherited() {
        let mut base = Node::empty_container();
        base.upsert_child("keep", Node::leaf(Value::Bool(true)));

        let edit = vec![("add".to_string(), Node::leaf(Value::Bool(false)))];
        let ops = OpMap::new();
        let merged = merge(&base, &edit, &ops, Op::Merge).unwrap();
        assert_eq!(merged.child("keep"), Some(&Node::leaf(Value::Bool(true))));
        assert_eq!(merged.child("add"), Some(&Node::leaf(Value::Bool(false))));
    }

    #[test]
    fn test_merge_delete_missing_errors() {
        let base = Node::empty_container();
        let edit = vec![("missing".to_string(), Node::leaf(Value::Bool(true)))];
        let mut ops = OpMap::new();
        ops.set(
            Pointer::root().pushed(crate::ptr::Token::Property("missing".into())),
            Op::Delete,
        );
        let err = merge(&base, &edit, &ops, Op::Merge).unwrap_err();
        assert!(matches!(err, MergeError::MissingForDelete(_)));
    }
}

//! Canonical structural diff between two trees: a full symmetric diff with
//! `{create, delete, modify, move}` classification and a position anchor
//! for moves, computed via a sorted merge-join traversal of each level's
//! children.

use crate::node::{value_as_key_string, Children, Node};
use crate::ptr::{Pointer, Token};
use crate::value::Value;
use itertools::{
    EitherOrBoth::{Both, Left, Right},
    Itertools,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOp {
    Create,
    Delete,
    Modify,
    Move,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Anchor {
    /// Preceding sibling's key predicate (lists) or value (leaf-lists).
    After(Pointer),
    /// No preceding sibling: this is the new first entry.
    First,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    pub xpath: Pointer,
    pub op: DiffOp,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub position: Option<Anchor>,
}

/// Computes the canonical diff between `old` and `new`: creates sort
/// ascending by schema depth, deletes sort descending, modifies/moves are
/// interleaved at their own depth. Ties break by xpath string order so the
/// result is deterministic for snapshot tests.
pub fn diff(old: &Node, new: &Node) -> Vec<DiffEntry> {
    let mut out = Vec::new();
    diff_inner(Some(old), Some(new), &Pointer::root(), &mut out);
    canonical_sort(&mut out);
    out
}

fn canonical_sort(entries: &mut [DiffEntry]) {
    entries.sort_by(|a, b| {
        let rank = |e: &DiffEntry| match e.op {
            DiffOp::Create => (0, e.xpath.depth() as i64),
            DiffOp::Modify | DiffOp::Move => (1, 0),
            DiffOp::Delete => (2, -(e.xpath.depth() as i64)),
        };
        rank(a)
            .cmp(&rank(b))
            .then_with(|| a.xpath.to_string().cmp(&b.xpath.to_string()))
    });
}

fn diff_inner(old: Option<&Node>, new: Option<&Node>, at: &Pointer, out: &mut Vec<DiffEntry>) {
    match (old, new) {
        (None, None) => {}
        (Some(Node::Leaf { value: ov, .. }), Some(Node::Leaf { value: nv, .. })) => {
            if !values_eq(ov, nv) {
                out.push(DiffEntry {
                    xpath: at.clone(),
                    op: DiffOp::Modify,
                    old_value: Some(ov.clone()),
                    new_value: Some(nv.clone()),
                    position: None,
                });
            }
        }
        (Some(Node::Container { children: oc, .. }), Some(Node::Container { children: nc, .. })) => {
            diff_children(oc, nc, at, out);
        }
        (Some(Node::List { entries: oe, keys, .. }), Some(Node::List { entries: ne, user_ordered, .. })) => {
            diff_list(oe, ne, keys, *user_ordered, at, out);
        }
        (Some(Node::LeafList { values: ov, .. }), Some(Node::LeafList { values: nv, user_ordered })) => {
            diff_leaf_list(ov, nv, *user_ordered, at, out);
        }
        (None, Some(n)) => emit_subtree(n, at, out, DiffOp::Create),
        (Some(n), None) => emit_subtree(n, at, out, DiffOp::Delete),
        (Some(_), Some(_)) => {
            // Type change at the same path: treat as delete-then-create.
            emit_subtree(old.unwrap(), at, out, DiffOp::Delete);
            emit_subtree(new.unwrap(), at, out, DiffOp::Create);
        }
    }
}

fn values_eq(a: &Value, b: &Value) -> bool {
    if let (Some(af), Some(bf)) = (a.as_f64(), b.as_f64()) {
        let epsilon = f64::EPSILON * af.abs().max(bf.abs()).max(1.0);
        return (af - bf).abs() <= epsilon;
    }
    a == b
}

fn diff_children(old: &Children, new: &Children, at: &Pointer, out: &mut Vec<DiffEntry>) {
    let old_sorted = sorted_by_name(old);
    let new_sorted = sorted_by_name(new);
    for eob in old_sorted
        .iter()
        .merge_join_by(new_sorted.iter(), |l, r| l.0.cmp(r.0))
    {
        match eob {
            Left((name, node)) => {
                emit_subtree(node, &at.clone().pushed(Token::Property(name.to_string())), out, DiffOp::Delete)
            }
            Right((name, node)) => {
                emit_subtree(node, &at.clone().pushed(Token::Property(name.to_string())), out, DiffOp::Create)
            }
            Both((name, old_node), (_, new_node)) => diff_inner(
                Some(old_node),
                Some(new_node),
                &at.clone().pushed(Token::Property(name.to_string())),
                out,
            ),
        }
    }
}

fn sorted_by_name(children: &Children) -> Vec<(&String, &Node)> {
    let mut v: Vec<_> = children.iter().map(|(n, c)| (n, c)).collect();
    v.sort_by(|a, b| a.0.cmp(b.0));
    v
}

fn entry_key(entry: &Children, keys: &[String]) -> Vec<(String, String)> {
    keys.iter()
        .map(|k| {
            let v = entry
                .iter()
                .find(|(n, _)| n == k)
                .and_then(|(_, c)| match c {
                    Node::Leaf { value, .. } => Some(value_as_key_string(value)),
                    _ => None,
                })
                .unwrap_or_default();
            (k.clone(), v)
        })
        .collect()
}

fn diff_list(
    old: &[Children],
    new: &[Children],
    keys: &[String],
    user_ordered: bool,
    at: &Pointer,
    out: &mut Vec<DiffEntry>,
) {
    let old_keyed: Vec<_> = old.iter().map(|e| (entry_key(e, keys), e)).collect();
    let new_keyed: Vec<_> = new.iter().map(|e| (entry_key(e, keys), e)).collect();

    // Deletes and modifies.
    for (key, old_entry) in &old_keyed {
        let predicate: Pointer = at.clone().pushed(Token::Predicate(key.clone()));
        match new_keyed.iter().find(|(k, _)| k == key) {
            None => emit_subtree(
                &Node::Container {
                    presence: false,
                    children: (*old_entry).clone(),
                },
                &predicate,
                out,
                DiffOp::Delete,
            ),
            Some((_, new_entry)) => diff_children(old_entry, new_entry, &predicate, out),
        }
    }
    // Creates.
    for (key, new_entry) in &new_keyed {
        if !old_keyed.iter().any(|(k, _)| k == key) {
            let predicate = at.clone().pushed(Token::Predicate(key.clone()));
            emit_subtree(
                &Node::Container {
                    presence: false,
                    children: (*new_entry).clone(),
                },
                &predicate,
                out,
                DiffOp::Create,
            );
        }
    }
    // Order change, only meaningful for `ordered-by user` lists.
    if user_ordered {
        let old_order: Vec<_> = old_keyed.iter().map(|(k, _)| k.clone()).collect();
        let new_order: Vec<_> = new_keyed.iter().map(|(k, _)| k.clone()).collect();
        let common: Vec<_> = new_order
            .iter()
            .filter(|k| old_order.contains(k))
            .cloned()
            .collect();
        let old_common: Vec<_> = old_order
            .iter()
            .filter(|k| common.contains(k))
            .cloned()
            .collect();
        if common != old_common {
            for (i, key) in common.iter().enumerate() {
                let anchor = if i == 0 {
                    Anchor::First
                } else {
                    Anchor::After(at.clone().pushed(Token::Predicate(common[i - 1].clone())))
                };
                out.push(DiffEntry {
                    xpath: at.clone().pushed(Token::Predicate(key.clone())),
                    op: DiffOp::Move,
                    old_value: None,
                    new_value: None,
                    position: Some(anchor),
                });
            }
        }
    }
}

fn diff_leaf_list(
    old: &[Value],
    new: &[Value],
    user_ordered: bool,
    at: &Pointer,
    out: &mut Vec<DiffEntry>,
) {
    for v in old {
        if !new.iter().any(|n| values_eq(n, v)) {
            out.push(DiffEntry {
                xpath: at.clone().pushed(Token::LeafListValue(value_as_key_string(v))),
                op: DiffOp::Delete,
                old_value: Some(v.clone()),
                new_value: None,
                position: None,
            });
        }
    }
    for v in new {
        if !old.iter().any(|o| values_eq(o, v)) {
            out.push(DiffEntry {
                xpath: at.clone().pushed(Token::LeafListValue(value_as_key_string(v))),
                op: DiffOp::Create,
                old_value: None,
                new_value: Some(v.clone()),
                position: None,
            });
        }
    }
    if user_ordered {
        let common: Vec<_> = new.iter().filter(|v| old.iter().any(|o| values_eq(o, v))).collect();
        let old_common: Vec<_> = old.iter().filter(|v| common.iter().any(|c| values_eq(c, v))).collect();
        let same_order = common.len() == old_common.len()
            && common.iter().zip(old_common.iter()).all(|(a, b)| values_eq(a, b));
        if !same_order {
            for (i, v) in common.iter().enumerate() {
                let anchor = if i == 0 {
                    Anchor::First
                } else {
                    Anchor::After(
                        at.clone()
                            .pushed(Token::LeafListValue(value_as_key_string(common[i - 1]))),
                    )
                };
                out.push(DiffEntry {
                    xpath: at.clone().pushed(Token::LeafListValue(value_as_key_string(v))),
                    op: DiffOp::Move,
                    old_value: None,
                    new_value: None,
                    position: Some(anchor),
                });
            }
        }
    }
}

fn emit_subtree(node: &Node, at: &Pointer, out: &mut Vec<DiffEntry>, op: DiffOp) {
    match node {
        Node::Leaf { value, .. } => out.push(DiffEntry {
            xpath: at.clone(),
            op,
            old_value: if op == DiffOp::Delete { Some(value.clone()) } else { None },
            new_value: if op == DiffOp::Create { Some(value.clone()) } else { None },
            position: None,
        }),
        Node::Container { children, .. } => {
            out.push(DiffEntry {
                xpath: at.clone(),
                op,
                old_value: None,
                new_value: None,
                position: None,
            });
            for (name, child) in children {
                emit_subtree(child, &at.clone().pushed(Token::Property(name.clone())), out, op);
            }
        }
        Node::List { entries, keys, .. } => {
            for entry in entries {
                let key = entry_key(entry, keys);
                let predicate = at.clone().pushed(Token::Predicate(key));
                emit_subtree(
                    &Node::Container {
                        presence: false,
                        children: entry.clone(),
                    },
                    &predicate,
                    out,
                    op,
                );
            }
        }
        Node::LeafList { values, .. } => {
            for v in values {
                out.push(DiffEntry {
                    xpath: at.clone().pushed(Token::LeafListValue(value_as_key_string(v))),
                    op,
                    old_value: if op == DiffOp::Delete { Some(v.clone()) } else { None },
                    new_value: if op == DiffOp::Create { Some(v.clone()) } else { None },
                    position: None,
                });
            }
        }
    }
}

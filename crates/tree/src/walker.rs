//! Depth-first tree walk, yielding a flat stream of `(Pointer, &Node)` pairs
//! in document order, one entry per structural node (containers, list
//! entries, leaves, and leaf-lists as a whole). Leaf-list values themselves
//! have no individually addressable `Node`, so [`crate::ser::to_flat_values`]
//! flattens them itself rather than through this walk.

use crate::node::{value_as_key_string, Node};
use crate::ptr::{Pointer, Token};

pub fn walk<'a>(root: &'a Node) -> Vec<(Pointer, &'a Node)> {
    let mut out = Vec::new();
    walk_inner(root, &Pointer::root(), &mut out);
    out
}

fn walk_inner<'a>(node: &'a Node, at: &Pointer, out: &mut Vec<(Pointer, &'a Node)>) {
    out.push((at.clone(), node));
    match node {
        Node::Leaf { .. } => {}
        Node::Container { children, .. } => {
            for (name, child) in children {
                walk_inner(child, &at.clone().pushed(Token::Property(name.clone())), out);
            }
        }
        Node::List { entries, keys, .. } => {
            for entry in entries {
                let key: Vec<(String, String)> = keys
                    .iter()
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
                    .collect();
                let predicate = at.clone().pushed(Token::Predicate(key));
                for (name, child) in entry {
                    walk_inner(child, &predicate.clone().pushed(Token::Property(name.clone())), out);
                }
            }
        }
        Node::LeafList { .. } => {}
    }
}

/// Visits only `Leaf` nodes, invoking `f(xpath, node)`.
pub fn walk_leaves<'a>(root: &'a Node, mut f: impl FnMut(&Pointer, &'a Node)) {
    for (ptr, node) in walk(root) {
        if matches!(node, Node::Leaf { .. }) {
            f(&ptr, node);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_walk_visits_every_node() {
        let mut root = Node::empty_container();
        let mut child = Node::empty_container();
        child.upsert_child("leaf", Node::leaf(Value::Bool(true)));
        root.upsert_child("container", child);
        let visited = walk(&root);
        // root + container + leaf
        assert_eq!(visited.len(), 3);
        assert!(visited.iter().any(|(p, _)| p.to_string() == "/container/leaf"));
    }

    #[test]
    fn test_walk_leaves_skips_containers() {
        let mut root = Node::empty_container();
        root.upsert_child("a", Node::leaf(Value::Bool(true)));
        root.upsert_child("b", Node::empty_container());
        let mut leaves = Vec::new();
        walk_leaves(&root, |ptr, _| leaves.push(ptr.to_string()));
        assert_eq!(leaves, vec!["/a".to_string()]);
    }
}

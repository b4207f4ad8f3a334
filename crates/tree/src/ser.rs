//! Whole-tree JSON (de)serialization and the flat-value marshaling form
//! used across the session boundary (`get_items`-style xpath/value lists).

use crate::node::{value_as_key_string, Children, Node};
use crate::ptr::{Pointer, Token};
use crate::value::{FlatValue, Value};
use crate::Tree;

#[derive(Debug, thiserror::Error)]
pub enum SerError {
    #[error("failed to parse tree JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot flatten path {0}: not addressable")]
    BadPath(String),
}

pub fn parse(bytes: &[u8]) -> Result<Tree, SerError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn serialize(tree: &Tree) -> Result<Vec<u8>, SerError> {
    Ok(serde_json::to_vec(tree)?)
}

/// Flattens a tree into `(xpath, value)` pairs in document order, skipping
/// pure structural markers for plain (non-presence) containers. Each
/// leaf-list value gets its own entry, addressed by its value predicate, so
/// the flat form round-trips losslessly through [`from_flat_values`].
pub fn to_flat_values(tree: &Tree) -> Vec<FlatValue> {
    let mut out = Vec::new();
    flatten(&Pointer::root(), &tree.root, &mut out);
    out
}

fn flatten(at: &Pointer, node: &Node, out: &mut Vec<FlatValue>) {
    match node {
        Node::Leaf { value, is_default } => out.push(FlatValue {
            xpath: at.to_string(),
            value: value.clone(),
            is_default: *is_default,
        }),
        Node::Container { children, .. } => {
            for (name, child) in children {
                flatten(&at.clone().pushed(Token::Property(name.clone())), child, out);
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
                    flatten(&predicate.clone().pushed(Token::Property(name.clone())), child, out);
                }
            }
        }
        Node::LeafList { values, .. } => {
            for v in values {
                out.push(FlatValue {
                    xpath: at.clone().pushed(Token::LeafListValue(value_as_key_string(v))).to_string(),
                    value: v.clone(),
                    is_default: false,
                });
            }
        }
    }
}

/// Rebuilds a tree from a flat-value list by inserting each leaf at its
/// parsed path, creating intermediate containers/lists/leaf-lists as
/// needed. Last write wins for duplicate paths.
pub fn from_flat_values(generation: u64, values: &[FlatValue]) -> Result<Tree, SerError> {
    let mut tree = Tree::empty(generation);
    for fv in values {
        let ptr = Pointer::parse(&fv.xpath).map_err(|_| SerError::BadPath(fv.xpath.clone()))?;
        insert_leaf(&mut tree.root, ptr.iter().collect::<Vec<_>>().as_slice(), fv.value.clone())?;
    }
    Ok(tree)
}

fn insert_leaf(node: &mut Node, tokens: &[&Token], value: Value) -> Result<(), SerError> {
    match tokens {
        [] => Err(SerError::BadPath("/".to_string())),
        [Token::Property(name)] => {
            ensure_container(node);
            node.upsert_child(
                name,
                Node::Leaf {
                    value,
                    is_default: false,
                },
            );
            Ok(())
        }
        [Token::Property(name), rest @ ..] => {
            ensure_container(node);
            if node.child(name).is_none() {
                node.upsert_child(name, Node::empty_container());
            }
            let child = node.child_mut(name).expect("just inserted");
            insert_leaf(child, rest, value)
        }
        [Token::Predicate(key), rest @ ..] => {
            if !matches!(node, Node::List { .. }) {
                *node = Node::List {
                    keys: key.iter().map(|(k, _)| k.clone()).collect(),
                    user_ordered: false,
                    entries: Vec::new(),
                };
            }
            let Node::List { entries, .. } = node else {
                unreachable!()
            };
            let idx = match entries.iter().position(|e| entry_matches(e, key)) {
                Some(i) => i,
                None => {
                    let entry: Children = key
                        .iter()
                        .map(|(k, v)| (k.clone(), Node::leaf(Value::String(v.clone()))))
                        .collect();
                    entries.push(entry);
                    entries.len() - 1
                }
            };
            let mut wrapper = Node::Container {
                presence: false,
                children: std::mem::take(&mut entries[idx]),
            };
            let result = insert_leaf(&mut wrapper, rest, value);
            if let Node::Container { children, .. } = wrapper {
                entries[idx] = children;
            }
            result
        }
        [Token::LeafListValue(_)] => {
            if !matches!(node, Node::LeafList { .. }) {
                *node = Node::LeafList {
                    user_ordered: false,
                    values: Vec::new(),
                };
            }
            let Node::LeafList { values, .. } = node else {
                unreachable!()
            };
            values.push(value);
            Ok(())
        }
        other => Err(SerError::BadPath(format!("{other:?}"))),
    }
}

fn ensure_container(node: &mut Node) {
    if !matches!(node, Node::Container { .. }) {
        *node = Node::empty_container();
    }
}

fn entry_matches(entry: &Children, key: &[(String, String)]) -> bool {
    key.iter().all(|(k, v)| {
        entry
            .iter()
            .any(|(n, c)| n == k && matches!(c, Node::Leaf { value, .. } if &value_as_key_string(value) == v))
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let mut tree = Tree::empty(7);
        let mut top = Node::empty_container();
        top.upsert_child("leaf", Node::leaf(Value::Uint32(42)));
        tree.root.upsert_child("m:top", top);

        let bytes = serialize(&tree).unwrap();
        let back = parse(&bytes).unwrap();
        assert_eq!(tree, back);
    }

    #[test]
    fn test_flatten_and_rebuild() {
        let mut tree = Tree::empty(1);
        let mut top = Node::empty_container();
        top.upsert_child("a", Node::leaf(Value::Bool(true)));
        tree.root.upsert_child("m:top", top);

        let flat = to_flat_values(&tree);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].xpath, "/m:top/a");

        let rebuilt = from_flat_values(1, &flat).unwrap();
        assert_eq!(rebuilt.root.child("m:top").unwrap().child("a"), Some(&Node::leaf(Value::Bool(true))));
    }

    #[test]
    fn test_leaf_list_values_flatten_and_rebuild() {
        let mut tree = Tree::empty(1);
        tree.root.upsert_child(
            "m:servers",
            Node::LeafList {
                user_ordered: false,
                values: vec![Value::String("a".into()), Value::String("b".into())],
            },
        );

        let flat = to_flat_values(&tree);
        assert_eq!(flat.len(), 2);
        assert!(flat.iter().any(|f| f.xpath == "/m:servers[.='a']"));
        assert!(flat.iter().any(|f| f.xpath == "/m:servers[.='b']"));

        let rebuilt = from_flat_values(1, &flat).unwrap();
        assert_eq!(
            rebuilt.root.child("m:servers"),
            Some(&Node::LeafList {
                user_ordered: false,
                values: vec![Value::String("a".into()), Value::String("b".into())],
            })
        );
    }
}

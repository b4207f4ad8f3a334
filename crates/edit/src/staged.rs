//! The staged, in-memory edit a session accumulates before `apply_changes`:
//! `set`/`delete`/`move`/`edit_batch` over a working copy of the tree, plus
//! the module-set extraction a commit uses to decide which locks to take.

use crate::error::EditError;
use crate::opts::{EditOpts, Position};
use std::collections::BTreeSet;
use tree::{Children, Node, Op, OpMap, Pointer, Token, Tree, Value};

pub struct StagedEdit {
    tree: Tree,
}

impl StagedEdit {
    pub fn new(base: Tree) -> StagedEdit {
        StagedEdit { tree: base }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn into_tree(self) -> Tree {
        self.tree
    }

    pub fn get(&self, path: &Pointer) -> Option<&Node> {
        lookup(&self.tree.root, &path.iter().collect::<Vec<_>>())
    }

    pub fn set(&mut self, path: &Pointer, value: Value, opts: EditOpts) -> Result<(), EditError> {
        let tokens: Vec<&Token> = path.iter().collect();
        set_at(&mut self.tree.root, &tokens, value, opts, path)
    }

    pub fn delete(&mut self, path: &Pointer, opts: EditOpts) -> Result<(), EditError> {
        let tokens: Vec<&Token> = path.iter().collect();
        delete_at(&mut self.tree.root, &tokens, opts, path)
    }

    /// Moves a user-ordered list entry or leaf-list value. `path` must
    /// address the entry/value itself (ending in a `Predicate` or
    /// `LeafListValue` token); `position` gives the new slot.
    pub fn move_entry(&mut self, path: &Pointer, position: Position) -> Result<(), EditError> {
        let tokens: Vec<&Token> = path.iter().collect();
        let Some((last, parent_tokens)) = tokens.split_last() else {
            return Err(EditError::BadPath(path.to_string()));
        };
        let parent = lookup_mut(&mut self.tree.root, parent_tokens)
            .ok_or_else(|| EditError::NotFound(path.to_string()))?;
        match (parent, last) {
            (Node::List { entries, user_ordered, .. }, Token::Predicate(key)) => {
                if !*user_ordered {
                    return Err(EditError::NotUserOrdered);
                }
                let idx = entries
                    .iter()
                    .position(|e| entry_matches(e, key))
                    .ok_or_else(|| EditError::NotFound(path.to_string()))?;
                let entry = entries.remove(idx);
                let dest = resolve_position(entries.len(), &position, |k| {
                    entries.iter().position(|e| predicate_matches_anchor(e, k))
                })?;
                entries.insert(dest, entry);
                Ok(())
            }
            (Node::LeafList { values, user_ordered }, Token::LeafListValue(v)) => {
                if !*user_ordered {
                    return Err(EditError::NotUserOrdered);
                }
                let idx = values
                    .iter()
                    .position(|existing| &tree::node::value_as_key_string(existing) == v)
                    .ok_or_else(|| EditError::NotFound(path.to_string()))?;
                let value = values.remove(idx);
                let dest = resolve_position(values.len(), &position, |anchor_ptr| {
                    anchor_leaf_list_index(values, anchor_ptr)
                })?;
                values.insert(dest, value);
                Ok(())
            }
            _ => Err(EditError::BadPath(path.to_string())),
        }
    }

    /// Merges an edit-config-style subtree (`edit`) against the staged
    /// tree, honoring per-node operation inheritance.
    pub fn edit_batch(&mut self, edit: &Children, ops: &OpMap, default_op: Op) -> Result<(), EditError> {
        self.tree.root = tree::merge(&self.tree.root, edit, ops, default_op)?;
        Ok(())
    }

    /// The set of top-level module names touched between `self` and
    /// `other` — `Mods(Δ)` in commit-orchestrator terms.
    pub fn touched_modules(&self, other: &Tree) -> BTreeSet<String> {
        let d = tree::diff(&self.tree.root, &other.root);
        d.into_iter()
            .filter_map(|entry| {
                entry
                    .xpath
                    .iter()
                    .next()
                    .and_then(|t| match t {
                        Token::Property(name) => name.split(':').next().map(String::from),
                        _ => None,
                    })
            })
            .collect()
    }
}

fn lookup<'a>(node: &'a Node, tokens: &[&Token]) -> Option<&'a Node> {
    match tokens {
        [] => Some(node),
        [Token::Property(name), rest @ ..] => lookup(node.child(name)?, rest),
        [Token::Predicate(key), rest @ ..] => {
            if let Node::List { entries, .. } = node {
                let entry = entries.iter().find(|e| entry_matches(e, key))?;
                lookup_in_children(entry, rest)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn lookup_in_children<'a>(children: &'a Children, tokens: &[&Token]) -> Option<&'a Node> {
    match tokens {
        [] => None,
        [Token::Property(name)] => children.iter().find(|(n, _)| n == name).map(|(_, c)| c),
        [Token::Property(name), rest @ ..] => {
            let child = children.iter().find(|(n, _)| n == name).map(|(_, c)| c)?;
            lookup(child, rest)
        }
        _ => None,
    }
}

fn lookup_mut<'a>(node: &'a mut Node, tokens: &[&Token]) -> Option<&'a mut Node> {
    match tokens {
        [] => Some(node),
        [Token::Property(name), rest @ ..] => lookup_mut(node.child_mut(name)?, rest),
        [Token::Predicate(key), rest @ ..] => {
            if let Node::List { entries, .. } = node {
                let idx = entries.iter().position(|e| entry_matches(e, key))?;
                let entry = &mut entries[idx];
                if rest.is_empty() {
                    None
                } else if let [Token::Property(name), deeper @ ..] = rest {
                    let (_, child) = entry.iter_mut().find(|(n, _)| n == name)?;
                    lookup_mut(child, deeper)
                } else {
                    None
                }
            } else {
                None
            }
        }
        _ => None,
    }
}

fn entry_matches(entry: &Children, key: &[(String, String)]) -> bool {
    key.iter().all(|(k, v)| {
        entry
            .iter()
            .any(|(n, c)| n == k && matches!(c, Node::Leaf { value, .. } if &tree::node::value_as_key_string(value) == v))
    })
}

fn predicate_matches_anchor(entry: &Children, anchor: &Pointer) -> bool {
    let Some(Token::Predicate(anchor_key)) = anchor.last() else {
        return false;
    };
    entry_matches(entry, anchor_key)
}

fn anchor_leaf_list_index(values: &[Value], anchor: &Pointer) -> Option<usize> {
    let Some(Token::LeafListValue(v)) = anchor.last() else {
        return None;
    };
    values.iter().position(|existing| &tree::node::value_as_key_string(existing) == v)
}

fn resolve_position(
    len: usize,
    position: &Position,
    find_anchor: impl Fn(&Pointer) -> Option<usize>,
) -> Result<usize, EditError> {
    match position {
        Position::First => Ok(0),
        Position::Last => Ok(len),
        Position::After(anchor) => find_anchor(anchor).map(|i| i + 1).ok_or(EditError::MissingAnchor),
        Position::Before(anchor) => find_anchor(anchor).ok_or(EditError::MissingAnchor),
    }
}

fn set_at(
    node: &mut Node,
    tokens: &[&Token],
    value: Value,
    opts: EditOpts,
    full_path: &Pointer,
) -> Result<(), EditError> {
    match tokens {
        [] => Err(EditError::BadPath(full_path.to_string())),
        [Token::Property(name)] => {
            ensure_container(node, opts, full_path)?;
            if opts.strict && node.child(name).is_some() {
                return Err(EditError::AlreadyExists(full_path.to_string()));
            }
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
            ensure_container(node, opts, full_path)?;
            if node.child(name).is_none() {
                if opts.non_recursive {
                    return Err(EditError::MissingParent(full_path.to_string()));
                }
                node.upsert_child(name, Node::empty_container());
            }
            let child = node.child_mut(name).expect("just ensured");
            set_at(child, rest, value, opts, full_path)
        }
        [Token::Predicate(key), rest @ ..] => {
            if !matches!(node, Node::List { .. }) {
                if opts.non_recursive {
                    return Err(EditError::MissingParent(full_path.to_string()));
                }
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
                    if opts.non_recursive {
                        return Err(EditError::MissingParent(full_path.to_string()));
                    }
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
            let result = set_at(&mut wrapper, rest, value, opts, full_path);
            if let Node::Container { children, .. } = wrapper {
                entries[idx] = children;
            }
            result
        }
        // Leaf-list append is positional (`tags[-]`) unless the path
        // predicate fixes the slot (`tags[.='v']`).
        [Token::NextIndex] => {
            ensure_leaf_list(node, opts, full_path)?;
            let Node::LeafList { values, .. } = node else { unreachable!() };
            values.push(value);
            Ok(())
        }
        [Token::LeafListValue(v)] => {
            ensure_leaf_list(node, opts, full_path)?;
            let Node::LeafList { values, .. } = node else { unreachable!() };
            let exists = values.iter().any(|existing| &tree::node::value_as_key_string(existing) == v);
            if exists {
                if opts.strict {
                    return Err(EditError::AlreadyExists(full_path.to_string()));
                }
                return Ok(());
            }
            values.push(value);
            Ok(())
        }
        _ => Err(EditError::BadPath(full_path.to_string())),
    }
}

fn ensure_leaf_list(node: &mut Node, opts: EditOpts, full_path: &Pointer) -> Result<(), EditError> {
    if matches!(node, Node::LeafList { .. }) {
        return Ok(());
    }
    if opts.non_recursive {
        return Err(EditError::MissingParent(full_path.to_string()));
    }
    *node = Node::LeafList {
        user_ordered: false,
        values: Vec::new(),
    };
    Ok(())
}

fn ensure_container(node: &mut Node, opts: EditOpts, full_path: &Pointer) -> Result<(), EditError> {
    if matches!(node, Node::Container { .. }) {
        return Ok(());
    }
    if opts.non_recursive {
        return Err(EditError::MissingParent(full_path.to_string()));
    }
    *node = Node::empty_container();
    Ok(())
}

fn delete_at(
    node: &mut Node,
    tokens: &[&Token],
    opts: EditOpts,
    full_path: &Pointer,
) -> Result<(), EditError> {
    match tokens {
        [] => Err(EditError::BadPath(full_path.to_string())),
        [Token::Property(name)] => {
            let existed = node.remove_child(name).is_some();
            if opts.strict && !existed {
                return Err(EditError::NotFound(full_path.to_string()));
            }
            Ok(())
        }
        [Token::Property(name), rest @ ..] => {
            let Some(child) = node.child_mut(name) else {
                if opts.strict {
                    return Err(EditError::NotFound(full_path.to_string()));
                }
                return Ok(());
            };
            delete_at(child, rest, opts, full_path)
        }
        [Token::Predicate(key)] => {
            if let Node::List { entries, .. } = node {
                let before = entries.len();
                entries.retain(|e| !entry_matches(e, key));
                if opts.strict && entries.len() == before {
                    return Err(EditError::NotFound(full_path.to_string()));
                }
            }
            Ok(())
        }
        [Token::Predicate(key), rest @ ..] => {
            if let Node::List { entries, .. } = node {
                if let Some(idx) = entries.iter().position(|e| entry_matches(e, key)) {
                    let mut wrapper = Node::Container {
                        presence: false,
                        children: std::mem::take(&mut entries[idx]),
                    };
                    let result = delete_at(&mut wrapper, rest, opts, full_path);
                    if let Node::Container { children, .. } = wrapper {
                        entries[idx] = children;
                    }
                    return result;
                }
            }
            if opts.strict {
                return Err(EditError::NotFound(full_path.to_string()));
            }
            Ok(())
        }
        [Token::LeafListValue(v)] => {
            if let Node::LeafList { values, .. } = node {
                let before = values.len();
                values.retain(|existing| &tree::node::value_as_key_string(existing) != v);
                if opts.strict && values.len() == before {
                    return Err(EditError::NotFound(full_path.to_string()));
                }
            }
            Ok(())
        }
        _ => Err(EditError::BadPath(full_path.to_string())),
    }
}

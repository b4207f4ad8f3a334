//! Structural validation: mandatory-leaf presence, list/leaf-list
//! cardinality (`min-elements`/`max-elements`), and node-kind matching
//! against a [`SchemaContext`]. Collects every offending node rather than
//! short-circuiting. Does not evaluate `must`/`when`/`leafref`.

use crate::node::{Children, Node};
use crate::schema::{ModuleSchema, NodeKind, SchemaContext};
use crate::Tree;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub message: String,
    pub xpath: String,
}

pub fn validate(tree: &Tree, ctx: &SchemaContext) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if let Node::Container { children, .. } = &tree.root {
        for (name, node) in children {
            let module_name = name.split(':').next().unwrap_or(name);
            match ctx.modules.get(module_name) {
                None => errors.push(ValidationError {
                    message: format!("module {module_name:?} is not installed"),
                    xpath: format!("/{name}"),
                }),
                Some(module) => {
                    let root_path = name
                        .splitn(2, ':')
                        .nth(1)
                        .map(|rest| format!("/{rest}"))
                        .unwrap_or_else(|| format!("/{name}"));
                    check_node(module, &root_path, node, &format!("/{name}"), &mut errors);
                }
            }
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_node(
    module: &ModuleSchema,
    schema_path: &str,
    node: &Node,
    xpath: &str,
    errors: &mut Vec<ValidationError>,
) {
    let Some(schema_node) = module.nodes.get(schema_path) else {
        errors.push(ValidationError {
            message: format!("no such node in schema: {schema_path}"),
            xpath: xpath.to_string(),
        });
        return;
    };

    match (&schema_node.kind, node) {
        (NodeKind::Leaf { .. }, Node::Leaf { .. }) => {}
        (NodeKind::Container { .. }, Node::Container { children, .. }) => {
            check_children(module, &schema_node.children, children, xpath, errors);
        }
        (NodeKind::List { min_elements, max_elements, .. }, Node::List { entries, .. }) => {
            if entries.len() < *min_elements as usize {
                errors.push(ValidationError {
                    message: format!(
                        "list has {} entries, fewer than min-elements {}",
                        entries.len(),
                        min_elements
                    ),
                    xpath: xpath.to_string(),
                });
            }
            if let Some(max) = max_elements {
                if entries.len() > *max as usize {
                    errors.push(ValidationError {
                        message: format!(
                            "list has {} entries, more than max-elements {}",
                            entries.len(),
                            max
                        ),
                        xpath: xpath.to_string(),
                    });
                }
            }
            for entry in entries {
                check_children(module, &schema_node.children, entry, xpath, errors);
            }
        }
        (NodeKind::LeafList { min_elements, max_elements }, Node::LeafList { values, .. }) => {
            if values.len() < *min_elements as usize {
                errors.push(ValidationError {
                    message: format!(
                        "leaf-list has {} values, fewer than min-elements {}",
                        values.len(),
                        min_elements
                    ),
                    xpath: xpath.to_string(),
                });
            }
            if let Some(max) = max_elements {
                if values.len() > *max as usize {
                    errors.push(ValidationError {
                        message: format!(
                            "leaf-list has {} values, more than max-elements {}",
                            values.len(),
                            max
                        ),
                        xpath: xpath.to_string(),
                    });
                }
            }
        }
        _ => errors.push(ValidationError {
            message: "instance node kind does not match schema".to_string(),
            xpath: xpath.to_string(),
        }),
    }
}

fn check_children(
    module: &ModuleSchema,
    child_schema_paths: &[String],
    children: &Children,
    parent_xpath: &str,
    errors: &mut Vec<ValidationError>,
) {
    for child_schema_path in child_schema_paths {
        let child_name = child_schema_path.rsplit('/').next().unwrap_or(child_schema_path);
        let found = children.iter().find(|(n, _)| n == child_name);
        let child_xpath = format!("{parent_xpath}/{child_name}");
        match found {
            Some((_, child_node)) => {
                check_node(module, child_schema_path, child_node, &child_xpath, errors);
            }
            None => {
                if let Some(schema_node) = module.nodes.get(child_schema_path) {
                    match &schema_node.kind {
                        NodeKind::Leaf { mandatory: true } => errors.push(ValidationError {
                            message: format!("mandatory leaf {child_name:?} is missing"),
                            xpath: child_xpath,
                        }),
                        NodeKind::List { min_elements, .. } if *min_elements > 0 => {
                            errors.push(ValidationError {
                                message: format!(
                                    "list {child_name:?} requires min-elements {min_elements} but is absent"
                                ),
                                xpath: child_xpath,
                            })
                        }
                        NodeKind::LeafList { min_elements, .. } if *min_elements > 0 => {
                            errors.push(ValidationError {
                                message: format!(
                                    "leaf-list {child_name:?} requires min-elements {min_elements} but is absent"
                                ),
                                xpath: child_xpath,
                            })
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::node::Node;
    use crate::schema::SchemaNode;
    use crate::value::Value;
    use std::collections::BTreeMap;

    fn test_schema() -> SchemaContext {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/top".to_string(),
            SchemaNode {
                path: "/top".into(),
                kind: NodeKind::Container { presence: false },
                children: vec!["/top/required".into()],
            },
        );
        nodes.insert(
            "/top/required".to_string(),
            SchemaNode {
                path: "/top/required".into(),
                kind: NodeKind::Leaf { mandatory: true },
                children: vec![],
            },
        );
        let mut ctx = SchemaContext::new(1);
        ctx.install(ModuleSchema {
            name: "m".into(),
            revision: "2024-01-01".into(),
            nodes,
            features: Vec::new(),
            feature_bitset: 0,
        });
        ctx
    }

    #[test]
    fn test_missing_mandatory_leaf() {
        let ctx = test_schema();
        let mut tree = Tree::empty(1);
        tree.root.upsert_child("m:top", Node::empty_container());
        let errs = validate(&tree, &ctx).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("mandatory"));
        assert_eq!(errs[0].xpath, "/m:top/required");
    }

    #[test]
    fn test_valid_tree_passes() {
        let ctx = test_schema();
        let mut tree = Tree::empty(1);
        let mut top = Node::empty_container();
        top.upsert_child("required", Node::leaf(Value::Bool(true)));
        tree.root.upsert_child("m:top", top);
        assert!(validate(&tree, &ctx).is_ok());
    }
}

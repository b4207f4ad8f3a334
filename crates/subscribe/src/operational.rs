//! Splices operational-data provider contributions into the `operational`
//! datastore overlay: `operational` equals `running` overlaid with
//! operational-provider contributions.

use tree::{Node, Pointer, Token, Tree};

/// Returns `base` with each `(path, contribution)` pair spliced in, in the
/// order given — callers pass contributions ascending by subscriber
/// priority so a later (higher-priority) entry overwrites an earlier one
/// at the same path.
pub fn stitch_operational(base: &Tree, contributions: &[(Pointer, Node)]) -> Tree {
    let mut out = base.clone();
    for (path, contribution) in contributions {
        splice(&mut out.root, path.iter().collect::<Vec<_>>().as_slice(), contribution.clone());
    }
    out
}

fn splice(node: &mut Node, tokens: &[&Token], contribution: Node) {
    if !matches!(node, Node::Container { .. }) {
        *node = Node::empty_container();
    }
    match tokens {
        [] => *node = contribution,
        [Token::Property(name)] => node.upsert_child(name, contribution),
        [Token::Property(name), rest @ ..] => {
            if node.child(name).is_none() {
                node.upsert_child(name, Node::empty_container());
            }
            splice(node.child_mut(name).expect("just ensured"), rest, contribution);
        }
        _ => tracing::warn!("operational overlay path has an unsupported trailing token shape"),
    }
}

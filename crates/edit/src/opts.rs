#[derive(Debug, Clone, Copy, Default)]
pub struct EditOpts {
    /// `set`: the final node must not already exist. `delete`: the target
    /// must exist (otherwise `delete` on an absent path is a no-op).
    pub strict: bool,
    /// `set`: missing intermediate parents are an error rather than being
    /// synthesized.
    pub non_recursive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Position {
    First,
    Last,
    Before(tree::Pointer),
    After(tree::Pointer),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EditError {
    #[error("{0}: node already exists (strict set requires absence)")]
    AlreadyExists(String),
    #[error("{0}: node does not exist (strict delete requires presence)")]
    NotFound(String),
    #[error("{0}: intermediate parent is missing and non_recursive was set")]
    MissingParent(String),
    #[error("path {0:?} is not addressable by set/delete/move")]
    BadPath(String),
    #[error("move is only valid on a user-ordered list or leaf-list")]
    NotUserOrdered,
    #[error("BEFORE/AFTER move requires an anchor sibling")]
    MissingAnchor,
    #[error(transparent)]
    Merge(#[from] tree::MergeError),
}

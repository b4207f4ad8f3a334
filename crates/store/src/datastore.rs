//! The three datastore kinds of §3, plus the optional `candidate` variant
//! the spec calls out as "where present" and the supplemented reset
//! semantics `store::Session::drop` implements for it.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatastoreKind {
    Startup,
    Running,
    /// Never persisted directly; always `running` overlaid with
    /// operational-provider contributions (§3 Datastore instance
    /// invariant).
    Operational,
    /// Reset by copy from `running` on session end if the session's
    /// staged edit was never applied (§3, SPEC_FULL.md supplemented
    /// features).
    Candidate,
}

impl DatastoreKind {
    /// The plugin-facing module name suffix this kind maps to; `plugin-api`
    /// addresses datastores by a plain string per module.
    pub fn plugin_suffix(self) -> &'static str {
        match self {
            DatastoreKind::Startup => "startup",
            DatastoreKind::Running => "running",
            DatastoreKind::Operational => "operational",
            DatastoreKind::Candidate => "candidate",
        }
    }

    pub fn is_writable_directly(self) -> bool {
        !matches!(self, DatastoreKind::Operational)
    }
}

impl fmt::Display for DatastoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plugin_suffix())
    }
}

//! The pending list of schema-affecting operations (install/remove/feature
//! toggle) that cannot apply in place while live sessions still observe the
//! current generation. Drained once no session references the old
//! generation, materializing a new MAIN-SHM layout.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredOp {
    Install { name: String, revision: String },
    Remove { name: String },
    EnableFeature { module: String, feature: String },
    DisableFeature { module: String, feature: String },
}

#[derive(Debug, Default)]
pub struct DeferredQueue {
    pending: Vec<DeferredOp>,
}

impl DeferredQueue {
    pub fn new() -> DeferredQueue {
        DeferredQueue { pending: Vec::new() }
    }

    pub fn push(&mut self, op: DeferredOp) {
        self.pending.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Removes and returns every queued operation, in FIFO order, for the
    /// caller to apply against a freshly materialized generation.
    pub fn drain(&mut self) -> Vec<DeferredOp> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_drain_empties_queue_fifo() {
        let mut q = DeferredQueue::new();
        q.push(DeferredOp::Install {
            name: "a".into(),
            revision: "r1".into(),
        });
        q.push(DeferredOp::Remove { name: "b".into() });
        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert!(q.is_empty());
        assert!(matches!(drained[0], DeferredOp::Install { .. }));
    }
}

use recgraph_storage::ChangeSet;

/// Nesting depth of the running batch and everything it changed so far.
#[derive(Debug, Default)]
pub(crate) struct BatchState {
    pub depth: usize,
    pub changes: ChangeSet,
}

impl BatchState {
    pub fn enter(&mut self) {
        self.depth += 1;
    }

    /// Leave one level; true when the outermost batch just ended.
    pub fn exit(&mut self) -> bool {
        self.depth = self.depth.saturating_sub(1);
        self.depth == 0
    }

    pub fn take_changes(&mut self) -> ChangeSet {
        std::mem::take(&mut self.changes)
    }
}

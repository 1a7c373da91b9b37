// History compaction: after a join replays a long history, submit one
// snapshot so the hub can collapse it.

pub const DEFAULT_COMPACTION_THRESHOLD: usize = 120;

/// Evaluated once per join, right after the history replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    pub threshold: usize,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self { threshold: DEFAULT_COMPACTION_THRESHOLD }
    }
}

impl CompactionPolicy {
    pub fn new(threshold: usize) -> Self {
        Self { threshold: threshold.max(1) }
    }

    pub fn should_compact(&self, replayed: usize) -> bool {
        replayed >= self.threshold
    }
}

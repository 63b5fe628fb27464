use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// 队列条目：优先级越大越先出队，优先级相同时按任务ID升序
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub priority: i64,
    pub task_id: String,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 待调度任务的优先级队列
///
/// 同一任务ID同时最多在队列中出现一次。
#[derive(Debug, Default)]
pub struct TaskQueue {
    heap: BinaryHeap<QueueEntry>,
    queued: HashSet<String>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队；任务已在队列中时返回 false
    pub fn push(&mut self, task_id: &str, priority: i64) -> bool {
        if !self.queued.insert(task_id.to_string()) {
            return false;
        }
        self.heap.push(QueueEntry {
            priority,
            task_id: task_id.to_string(),
        });
        true
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        let entry = self.heap.pop()?;
        self.queued.remove(&entry.task_id);
        Some(entry)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.queued.contains(task_id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

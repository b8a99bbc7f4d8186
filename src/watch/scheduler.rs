use crate::build::changeset::ChangeSet;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// 有待处理的变更，等待静默窗口结束
    Accumulating,
    /// 有构建正在执行
    Dispatching,
}

/// 变更防抖调度器
///
/// 纯状态机，不做任何 IO，时间由调用方传入：
/// - 每次 `record` 都会把截止时间推迟到 `now + window`
/// - 截止时间已过且没有构建在执行时，`poll` 派发累积的变更
/// - 构建执行期间到达的变更累积到下一批，`complete` 之后才会派发
#[derive(Debug)]
pub struct ChangeScheduler {
    window: Duration,
    pending: BTreeSet<PathBuf>,
    deadline: Option<Instant>,
    in_flight: bool,
}

impl ChangeScheduler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: BTreeSet::new(),
            deadline: None,
            in_flight: false,
        }
    }

    pub fn record<I>(&mut self, paths: I, now: Instant)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.pending.extend(paths);
        if !self.pending.is_empty() {
            self.deadline = Some(now + self.window);
        }
    }

    /// 到期则取出一批变更并进入 `Dispatching`
    pub fn poll(&mut self, now: Instant) -> Option<ChangeSet> {
        if self.in_flight {
            return None;
        }
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                let batch = ChangeSet::partial(std::mem::take(&mut self.pending))?;
                self.in_flight = true;
                Some(batch)
            }
            _ => None,
        }
    }

    /// 当前构建结束
    pub fn complete(&mut self) {
        self.in_flight = false;
    }

    /// 下一次需要 `poll` 的时间；构建执行期间为 `None`
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.in_flight { None } else { self.deadline }
    }

    pub fn state(&self) -> SchedulerState {
        if self.in_flight {
            SchedulerState::Dispatching
        } else if self.pending.is_empty() {
            SchedulerState::Idle
        } else {
            SchedulerState::Accumulating
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

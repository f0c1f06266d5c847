//! 优先级队列：按 (优先级降序, 提交时间升序) 出队
//!
//! 同优先级内严格 FIFO；提交时间相同（时钟精度不足）时再按请求 ID 升序。
//! 队列本身不加锁，由准入控制器在自己的互斥锁内操作。

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// 请求优先级（越大越先调度）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// 后台任务（知识整理、预取等）
    Background = 0,
    /// 用户对话
    UserConversation = 1,
    /// 系统关键调用
    SystemCritical = 2,
}

impl Default for Priority {
    fn default() -> Self {
        Self::UserConversation
    }
}

/// 请求 ID（进程内单调递增）
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RequestId(u64);

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(0);

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestId {
    pub fn new() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

/// 队列条目：调度所需的元数据 + 任意载荷（准入控制器放的是唤醒通道）
#[derive(Debug)]
pub struct QueueEntry<T> {
    pub id: RequestId,
    pub priority: Priority,
    pub user_id: String,
    pub submitted_at: Instant,
    pub payload: T,
}

impl<T> QueueEntry<T> {
    /// 调度键：越大越先出队
    fn key(&self) -> (Priority, std::cmp::Reverse<Instant>, std::cmp::Reverse<RequestId>) {
        (
            self.priority,
            std::cmp::Reverse(self.submitted_at),
            std::cmp::Reverse(self.id),
        )
    }
}

impl<T> PartialEq for QueueEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for QueueEntry<T> {}

impl<T> PartialOrd for QueueEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueueEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// 有界优先级队列
#[derive(Debug)]
pub struct PendingQueue<T> {
    heap: BinaryHeap<QueueEntry<T>>,
    capacity: usize,
}

impl<T> PendingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// 入队；队列已满时原样退回
    pub fn push(&mut self, entry: QueueEntry<T>) -> Result<(), QueueEntry<T>> {
        if self.is_full() {
            return Err(entry);
        }
        self.heap.push(entry);
        Ok(())
    }

    /// 弹出第一个满足 `eligible` 的条目；跳过的条目保持原有顺序留在队列里
    pub fn pop_next<F>(&mut self, mut eligible: F) -> Option<QueueEntry<T>>
    where
        F: FnMut(&QueueEntry<T>) -> bool,
    {
        let mut skipped = Vec::new();
        let mut found = None;
        while let Some(entry) = self.heap.pop() {
            if eligible(&entry) {
                found = Some(entry);
                break;
            }
            skipped.push(entry);
        }
        self.heap.extend(skipped);
        found
    }

    /// 队首（下一个将被调度的条目）
    pub fn peek(&self) -> Option<&QueueEntry<T>> {
        self.heap.peek()
    }

    /// 按 ID 移除（超时的等待者主动退出）
    pub fn remove(&mut self, id: RequestId) -> Option<QueueEntry<T>> {
        let mut removed = None;
        let entries = std::mem::take(&mut self.heap).into_vec();
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.id == id && removed.is_none() {
                removed = Some(entry);
            } else {
                kept.push(entry);
            }
        }
        self.heap = BinaryHeap::from(kept);
        removed
    }

    /// 最后一个将被调度的条目的优先级
    pub fn lowest_priority(&self) -> Option<Priority> {
        self.heap.iter().min().map(|e| e.priority)
    }

    /// 移除最后一个将被调度的条目（队列满时为更高优先级请求腾位置）
    pub fn evict_lowest(&mut self) -> Option<QueueEntry<T>> {
        let lowest = self.heap.iter().min().map(|e| e.id)?;
        self.remove(lowest)
    }

    /// 清空并返回全部条目
    pub fn drain(&mut self) -> Vec<QueueEntry<T>> {
        std::mem::take(&mut self.heap).into_vec()
    }
}

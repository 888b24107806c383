// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 单槽交接通道 (Single-slot handoff)
//!
//! 采集线程是唯一写者, 推流连接是读者。两种通道都只有一个槽位,
//! 内存占用与消费速度无关:
//! - `FrameChannel`: 覆盖式, 新帧替换未读旧帧 (旧帧丢弃)
//! - `EventChannel`: 去重式, 有未读事件时新事件被丢弃

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// 通道统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub published: u64, // 成功写入次数
    pub discarded: u64, // 覆盖(帧)或被抑制(事件)的次数
    pub taken: u64,     // 被读者取走次数
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    discarded: AtomicU64,
    taken: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SlotStats {
        SlotStats {
            published: self.published.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            taken: self.taken.load(Ordering::Relaxed),
        }
    }
}

/// 覆盖式单槽: 最新值优先
pub struct FrameChannel<T> {
    slot: Mutex<Option<T>>,
    counters: Counters,
}

impl<T> Default for FrameChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FrameChannel<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    /// 总是成功; 未被读取的旧值被丢弃
    pub fn publish(&self, value: T) {
        let previous = self.slot.lock().replace(value);
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        if previous.is_some() {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        }
        // 旧帧在锁外释放
        drop(previous);
    }

    /// 取走当前值; 已被取走或为空时返回 None
    pub fn try_take(&self) -> Option<T> {
        let value = self.slot.lock().take();
        if value.is_some() {
            self.counters.taken.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// 丢弃未读值 (计入 discarded), 读者之后只会看到更新的值
    pub fn clear(&self) {
        let previous = self.slot.lock().take();
        if previous.is_some() {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> SlotStats {
        self.counters.snapshot()
    }
}

/// 去重式单槽: 有未读值时写入被抑制
pub struct EventChannel<T> {
    slot: Mutex<Option<T>>,
    counters: Counters,
}

impl<T> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventChannel<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    /// 槽位为空时写入并返回 true, 否则丢弃 `value` 并返回 false
    pub fn publish(&self, value: T) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        *slot = Some(value);
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// 按需构造: 仅当槽位为空时调用 `make`
    pub fn publish_with(&self, make: impl FnOnce() -> T) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        *slot = Some(make());
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn try_take(&self) -> Option<T> {
        let value = self.slot.lock().take();
        if value.is_some() {
            self.counters.taken.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    pub fn stats(&self) -> SlotStats {
        self.counters.snapshot()
    }
}

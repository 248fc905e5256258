use std::num::NonZeroUsize;

use thiserror::Error;

/// 默认每块预分配的对象数量。
pub const DEFAULT_CHUNK_COUNT: usize = 1024;

/// 可被池回收复用的对象。
///
/// # 契约说明（What）
/// - `reset` 在对象归还自由链表前调用，必须释放对象持有的外部资源（例如 I/O 缓冲），
///   使下一次租借拿到的是“干净”的实例；
/// - 实现不得 panic，归还路径上的 panic 会破坏池的计数。
pub trait Reusable: Default {
    /// 将对象恢复为可复用的初始状态。
    fn reset(&mut self);
}

/// 池容量达到上限时返回的饱和信号。
///
/// 这是一个可恢复的结果：调用方应在下一次就绪通知后重试，而不是拆除连接。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("entry pool exhausted: {in_use} of {limit} entries in use")]
pub struct PoolExhausted {
    pub in_use: usize,
    pub limit: usize,
}

/// 池的增长策略。
///
/// - `chunk_count`：每次增长预分配的对象个数，必须大于 0；
/// - `max_count`：对象总数上限，`None` 表示不设上限。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub chunk_count: NonZeroUsize,
    pub max_count: Option<NonZeroUsize>,
}

impl PoolConfig {
    /// 以块大小与上限构造配置；`max_count == 0` 视为不设上限。
    ///
    /// `chunk_count == 0` 时回退为 1，保证池至少能够按单个对象增长。
    pub fn new(chunk_count: usize, max_count: usize) -> Self {
        Self {
            chunk_count: NonZeroUsize::new(chunk_count).unwrap_or(NonZeroUsize::MIN),
            max_count: NonZeroUsize::new(max_count),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_COUNT, 0)
    }
}

/// 池的统计快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 已分配的块数。
    pub chunks: usize,
    /// 池创建过的对象总数。
    pub capacity: usize,
    /// 当前被租借的对象数。
    pub in_use: usize,
    /// 自由链表中可直接复用的对象数。
    pub available: usize,
    /// 因触达上限而失败的租借次数。
    pub failed_allocations: u64,
}

/// 基于自由链表的分块对象池。
///
/// # 模块角色（Why）
/// - 为共享接收上下文提供条目对象，`post` 时租借、完成或取消时归还；
/// - 将“耗尽”建模为类型化的 [`PoolExhausted`]，取代空指针约定。
///
/// # 核心机制（How）
/// - 自由链表为空时按 `chunk_count` 一次性创建一批 `Box<T>`，总数受 `max_count` 约束，
///   最后一块可能小于 `chunk_count`；
/// - `release` 先调用 [`Reusable::reset`] 再压回链表，后进先出以提高缓存命中；
/// - 池被丢弃时，自由链表中的对象随之释放；仍被租借的对象由其持有者负责释放。
///
/// # 契约说明（What）
/// - **线程安全**：池不做内部同步，多方共享时必须由外层锁保护；
/// - **前置条件**：`release` 只能传入由同一个池 `alloc` 得到、且尚未归还的对象，
///   重复归还不受保护，只会破坏统计而不会造成内存错误；
/// - **后置条件**：`alloc` 成功时 `in_use` 加一，失败时池状态除失败计数外保持不变。
#[derive(Debug)]
pub struct EntryPool<T> {
    free_list: Vec<Box<T>>,
    config: PoolConfig,
    chunks: usize,
    capacity: usize,
    in_use: usize,
    failed_allocations: u64,
}

impl<T: Reusable> EntryPool<T> {
    /// 创建空池；首块在第一次 `alloc` 时才分配。
    pub fn new(config: PoolConfig) -> Self {
        Self {
            free_list: Vec::new(),
            config,
            chunks: 0,
            capacity: 0,
            in_use: 0,
            failed_allocations: 0,
        }
    }

    /// 租借一个对象；池饱和时返回 [`PoolExhausted`]。
    pub fn alloc(&mut self) -> Result<Box<T>, PoolExhausted> {
        if self.free_list.is_empty() && !self.grow() {
            self.failed_allocations += 1;
            let limit = self.config.max_count.map_or(self.capacity, NonZeroUsize::get);
            tracing::debug!(in_use = self.in_use, limit, "entry pool saturated");
            return Err(PoolExhausted {
                in_use: self.in_use,
                limit,
            });
        }
        let entry = self.free_list.pop().ok_or(PoolExhausted {
            in_use: self.in_use,
            limit: self.capacity,
        })?;
        self.in_use += 1;
        Ok(entry)
    }

    /// 归还对象。
    pub fn release(&mut self, mut entry: Box<T>) {
        debug_assert!(self.in_use > 0, "release without matching alloc");
        entry.reset();
        self.in_use = self.in_use.saturating_sub(1);
        self.free_list.push(entry);
    }

    /// 当前统计快照。
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            chunks: self.chunks,
            capacity: self.capacity,
            in_use: self.in_use,
            available: self.free_list.len(),
            failed_allocations: self.failed_allocations,
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// 当前被租借的对象数。
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// 追加一块对象，返回是否成功增长。
    fn grow(&mut self) -> bool {
        let chunk = self.config.chunk_count.get();
        let count = match self.config.max_count {
            Some(max) => chunk.min(max.get().saturating_sub(self.capacity)),
            None => chunk,
        };
        if count == 0 {
            return false;
        }
        self.free_list.reserve(count);
        self.free_list
            .extend(std::iter::repeat_with(|| Box::new(T::default())).take(count));
        self.chunks += 1;
        self.capacity += count;
        tracing::debug!(
            chunks = self.chunks,
            capacity = self.capacity,
            added = count,
            "entry pool grew by one chunk"
        );
        true
    }
}

impl<T: Reusable> Default for EntryPool<T> {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

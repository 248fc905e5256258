use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::BytesMut;
use fabric_buffer::{EntryPool, PoolStats};
use parking_lot::Mutex;

use crate::{
    config::TransportConfig,
    error::TransferError,
    xfer::{TransferEntry, xfer_flags},
};

/// 进程内存活的共享接收上下文数量。
static LIVE_SHARED_CONTEXTS: AtomicUsize = AtomicUsize::new(0);

/// 当前存活的共享接收上下文数量。
pub fn live_shared_contexts() -> usize {
    LIVE_SHARED_CONTEXTS.load(Ordering::Acquire)
}

struct SrxInner {
    rx_queue: VecDeque<Box<TransferEntry>>,
    pool: EntryPool<TransferEntry>,
}

/// 多个连接共享的接收请求队列。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 让绑定到同一上下文的多个连接共用一组已投递的接收缓冲，
///   由任一连接在识别出入站消息后按投递顺序取用；
/// - 池饱和是调用方可恢复的结果，`post` 失败时不留下任何部分状态。
///
/// ## 逻辑 (How)
/// - 单把 `parking_lot::Mutex` 同时保护 FIFO 队列与条目池，临界区内只做链表与 slab 操作，
///   从不跨越系统调用；
/// - 条目以 `Box<TransferEntry>` 的所有权在池、队列与连接之间移动，没有别名引用；
/// - 进程级计数器约束共享上下文的数量，超限时返回 [`TransferError::ContextLimit`]。
///
/// ## 契约 (What)
/// - `post`：分配、填充、入队尾，三步在同一临界区内完成；
/// - `dequeue`：弹出队头，空队列返回 `None`；
/// - `release`：把条目归还池，每个条目恰好归还一次；
/// - 上下文被丢弃时，仍在队列中的条目随池一起释放。
///
/// ## 注意事项 (Trade-offs)
/// - 匹配严格按投递顺序，不支持优先级或乱序匹配；
/// - 锁粒度是整个上下文，假设竞争只来自短小的链表操作。
pub struct SharedRxContext {
    inner: Mutex<SrxInner>,
    iov_limit: usize,
    counted: bool,
}

impl SharedRxContext {
    /// 创建受进程级数量上限约束的共享上下文。
    pub fn new(config: &TransportConfig) -> Result<Arc<Self>, TransferError> {
        let limit = config.max_shared_contexts;
        let admitted =
            LIVE_SHARED_CONTEXTS.fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < limit).then_some(live + 1)
            });
        match admitted {
            Ok(previous) => {
                tracing::debug!(live = previous + 1, limit, "shared receive context created");
                Ok(Arc::new(Self::build(config, true)))
            }
            Err(live) => {
                tracing::warn!(live, limit, "shared receive context limit reached");
                Err(TransferError::ContextLimit { limit })
            }
        }
    }

    /// 创建只属于单个连接的接收上下文，不计入共享上限。
    pub(crate) fn private(config: &TransportConfig) -> Arc<Self> {
        Arc::new(Self::build(config, false))
    }

    fn build(config: &TransportConfig, counted: bool) -> Self {
        Self {
            inner: Mutex::new(SrxInner {
                rx_queue: VecDeque::new(),
                pool: EntryPool::new(config.pool_config()),
            }),
            iov_limit: config.iov_limit,
            counted,
        }
    }

    /// 投递一个分散接收请求。
    ///
    /// 条目标志为 `base_flags | MSG | RECV`。段数超过上限返回 [`TransferError::IovLimit`]，
    /// 池饱和返回 [`TransferError::ResourceExhausted`]，两种情况下队列均不变。
    pub fn post(
        &self,
        iov: Vec<BytesMut>,
        base_flags: u64,
        context: u64,
    ) -> Result<(), TransferError> {
        if iov.len() > self.iov_limit {
            return Err(TransferError::IovLimit {
                count: iov.len(),
                limit: self.iov_limit,
            });
        }
        let mut inner = self.inner.lock();
        let mut entry = inner.pool.alloc()?;
        entry.init(base_flags | xfer_flags::MSG | xfer_flags::RECV, context);
        entry.set_iov(iov);
        inner.rx_queue.push_back(entry);
        Ok(())
    }

    /// 投递单缓冲接收请求。
    pub fn post_single(&self, buf: BytesMut, context: u64) -> Result<(), TransferError> {
        self.post(vec![buf], 0, context)
    }

    /// 弹出最早投递的请求。
    pub fn dequeue(&self) -> Option<Box<TransferEntry>> {
        self.inner.lock().rx_queue.pop_front()
    }

    /// 查看队头请求的上下文值而不出队。
    pub fn peek_context(&self) -> Option<u64> {
        self.inner.lock().rx_queue.front().map(|entry| entry.context())
    }

    /// 归还条目。
    pub fn release(&self, entry: Box<TransferEntry>) {
        self.inner.lock().pool.release(entry);
    }

    /// 已投递、尚未匹配的请求数。
    pub fn len(&self) -> usize {
        self.inner.lock().rx_queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().rx_queue.is_empty()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.lock().pool.stats()
    }

    pub fn iov_limit(&self) -> usize {
        self.iov_limit
    }

    /// 是否计入进程级共享上下文上限。
    pub fn is_shared(&self) -> bool {
        self.counted
    }
}

impl Drop for SharedRxContext {
    fn drop(&mut self) {
        let queued = self.inner.get_mut().rx_queue.len();
        if self.counted {
            LIVE_SHARED_CONTEXTS.fetch_sub(1, Ordering::AcqRel);
        }
        tracing::debug!(queued, shared = self.counted, "receive context dropped");
    }
}

impl std::fmt::Debug for SharedRxContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRxContext")
            .field("queued", &self.len())
            .field("iov_limit", &self.iov_limit)
            .field("shared", &self.counted)
            .finish()
    }
}

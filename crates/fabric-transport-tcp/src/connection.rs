use std::sync::Arc;

use bytes::BytesMut;
use fabric_buffer::{EntryPool, PoolStats};

use crate::{
    config::TransportConfig,
    detect::{DetectState, RxDetect},
    error::{Progress, TransferError, TransferResult},
    header::{BaseHeader, ExtendedHeader},
    socket::StreamSocket,
    srx::SharedRxContext,
    staging::{StagedReader, StagingBuffer},
    xfer::{ConnectionId, TransferEntry, xfer_flags},
};

/// 一条完整接收的消息。
///
/// 承载它的条目在产出本结构之前已归还到接收上下文的池中。
#[derive(Debug)]
pub struct RxCompletion {
    pub header: BaseHeader,
    pub extended: ExtendedHeader,
    pub flags: u64,
    pub context: u64,
    /// 接收到的负载长度。
    pub len: usize,
    /// 投递时提供的缓冲，按投递顺序，每段截到实际写入的末尾。
    pub buffers: Vec<BytesMut>,
}

/// 接收路径单次推进的结果。
#[derive(Debug)]
pub enum RxProgress {
    /// 暂无进展，等待下一次可读通知。
    Again,
    Completed(RxCompletion),
}

/// 取消进行中接收的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxCancel {
    /// 没有进行中的接收。
    Idle,
    /// 负载尚未写入任何字节：条目归还池，报文头保留并等待新的请求。
    HeaderRetained,
    /// 负载已部分消费，字节流无法重新对齐，连接已整体拆除。
    TornDown,
}

/// 单条连接上的帧引擎组合。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把暂存缓冲、报文头检测游标、进行中的接收条目与接收上下文组装为一个由外部反应器驱动的单元；
/// - 每次调用最多发起有限次非阻塞系统调用，从不阻塞、从不内部重试。
///
/// ## 逻辑 (How)
/// - 无进行中接收且暂存为空时，先以一次读取整体填充暂存缓冲，再从暂存中检测报文头；
/// - 报文头完整后从接收上下文按投递顺序取出一个请求，截到负载长度后写入负载；
///   没有可用请求时保留报文头并返回 `Again`；
/// - 负载阶段优先消费暂存，暂存为空时直接对用户缓冲做向量读，避免多一次拷贝。
///
/// ## 契约 (What)
/// - 任一终止性错误后连接进入失效状态：游标与暂存被丢弃，进行中的条目归还池，
///   之后的调用一律返回 [`TransferError::NotConnected`]；
/// - 取消进行中的接收使用 [`Connection::cancel_current_rx`]：负载尚未开始时保留报文头，
///   已消费部分负载时连接整体拆除；不存在单独取消半个报文头的途径；
/// - 发送条目取自每连接的发送池（[`Connection::alloc_send`]），由调用方在完成或放弃后
///   通过 [`Connection::release_send`] 归还。
pub struct Connection<S> {
    id: ConnectionId,
    socket: S,
    staging: StagingBuffer,
    detect: RxDetect,
    rx_ctx: Arc<SharedRxContext>,
    cur_rx: Option<Box<TransferEntry>>,
    tx_pool: EntryPool<TransferEntry>,
    iov_limit: usize,
    failed: bool,
}

impl<S: StreamSocket> Connection<S> {
    /// 组装连接；`shared` 为 `None` 时使用仅属于本连接的接收上下文。
    pub fn new(socket: S, config: &TransportConfig, shared: Option<Arc<SharedRxContext>>) -> Self {
        let rx_ctx = shared.unwrap_or_else(|| SharedRxContext::private(config));
        Self {
            id: ConnectionId::next(),
            socket,
            staging: StagingBuffer::new(config.staging_buffer_size),
            detect: RxDetect::new(),
            rx_ctx,
            cur_rx: None,
            tx_pool: EntryPool::new(config.pool_config()),
            iov_limit: config.iov_limit,
            failed: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// 本连接取用接收请求的上下文。
    pub fn rx_context(&self) -> &Arc<SharedRxContext> {
        &self.rx_ctx
    }

    pub fn detect_state(&self) -> DetectState {
        self.detect.state()
    }

    pub fn detector(&self) -> &RxDetect {
        &self.detect
    }

    pub fn staging(&self) -> &StagingBuffer {
        &self.staging
    }

    /// 当前进行中的接收条目。
    pub fn current_rx(&self) -> Option<&TransferEntry> {
        self.cur_rx.as_deref()
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    /// 向接收上下文投递请求，等价于 [`SharedRxContext::post`]。
    pub fn post_recv(&self, iov: Vec<BytesMut>, context: u64) -> Result<(), TransferError> {
        self.rx_ctx.post(iov, xfer_flags::COMPLETION, context)
    }

    /// 推进接收路径。
    pub fn progress_rx(&mut self) -> Result<RxProgress, TransferError> {
        if self.failed {
            return Err(TransferError::NotConnected);
        }
        match self.try_progress_rx() {
            Ok(progress) => Ok(progress),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// 从发送池分配并填充一个发送条目，标志为 `flags | MSG | SEND`。
    ///
    /// 段数超过上限返回 [`TransferError::IovLimit`]，池饱和返回
    /// [`TransferError::ResourceExhausted`]；两者都不影响连接状态。
    pub fn alloc_send(
        &mut self,
        iov: Vec<BytesMut>,
        flags: u64,
        context: u64,
    ) -> Result<Box<TransferEntry>, TransferError> {
        if iov.len() > self.iov_limit {
            return Err(TransferError::IovLimit {
                count: iov.len(),
                limit: self.iov_limit,
            });
        }
        let mut entry = self.tx_pool.alloc()?;
        entry.init(flags | xfer_flags::MSG | xfer_flags::SEND, context);
        entry.set_iov(iov);
        entry.set_owner(Some(self.id));
        Ok(entry)
    }

    /// 归还由 [`Connection::alloc_send`] 分配的条目。
    pub fn release_send(&mut self, entry: Box<TransferEntry>) {
        self.tx_pool.release(entry);
    }

    pub fn send_pool_stats(&self) -> PoolStats {
        self.tx_pool.stats()
    }

    /// 推进一个发送条目。
    pub fn send(&mut self, entry: &mut TransferEntry) -> TransferResult {
        if self.failed {
            return Err(TransferError::NotConnected);
        }
        entry.set_owner(Some(self.id));
        entry.send(&mut self.socket).map_err(|err| self.fail(err))
    }

    /// 放弃进行中的接收：先清除连接上的引用，再把条目归还池。
    ///
    /// 条目仍等于完整负载长度时，报文头保留，下一次推进会为它匹配新的请求；
    /// 一旦已有负载字节被消费，剩余负载无法与下一条消息区分，连接随之拆除。
    pub fn cancel_current_rx(&mut self) -> RxCancel {
        let Some(entry) = self.cur_rx.take() else {
            return RxCancel::Idle;
        };
        let expected = self
            .detect
            .base_header()
            .and_then(|header| header.payload_len().ok());
        let untouched = expected == Some(entry.rem_len());
        self.rx_ctx.release(entry);
        if untouched {
            return RxCancel::HeaderRetained;
        }
        tracing::debug!(
            connection = self.id.get(),
            "receive cancelled after payload bytes were consumed"
        );
        self.teardown();
        RxCancel::TornDown
    }

    fn try_progress_rx(&mut self) -> Result<RxProgress, TransferError> {
        if self.cur_rx.is_none() {
            if self.detect.state() != DetectState::Complete {
                if self.staging.is_empty()
                    && self.staging.size() > 0
                    && self.staging.refill(&mut self.socket)? == Progress::Again
                {
                    return Ok(RxProgress::Again);
                }
                let mut reader = StagedReader::new(&mut self.staging, &mut self.socket);
                if self.detect.recv_hdr(&mut reader)? == Progress::Again {
                    return Ok(RxProgress::Again);
                }
            }
            if !self.match_rx_entry()? {
                return Ok(RxProgress::Again);
            }
        }

        let Some(entry) = self.cur_rx.as_mut() else {
            return Ok(RxProgress::Again);
        };
        let mut reader = StagedReader::new(&mut self.staging, &mut self.socket);
        if entry.recv(&mut reader)? == Progress::Again {
            return Ok(RxProgress::Again);
        }
        self.complete_rx().map(RxProgress::Completed)
    }

    /// 为已完整的报文头匹配接收请求，返回是否匹配成功。
    fn match_rx_entry(&mut self) -> Result<bool, TransferError> {
        let Some(header) = self.detect.base_header() else {
            return Ok(false);
        };
        let payload_len = header.payload_len()?;
        let Some(mut entry) = self.rx_ctx.dequeue() else {
            return Ok(false);
        };
        let available = entry.rem_len();
        if available < payload_len {
            self.rx_ctx.release(entry);
            return Err(TransferError::Truncated {
                needed: payload_len,
                available,
            });
        }
        entry.truncate(payload_len);
        entry.set_owner(Some(self.id));
        self.cur_rx = Some(entry);
        Ok(true)
    }

    fn complete_rx(&mut self) -> Result<RxCompletion, TransferError> {
        let header = self.detect.base_header().ok_or(TransferError::NotConnected)?;
        let extended = match self.detect.extended_header() {
            Some(result) => result?,
            None => ExtendedHeader::default(),
        };
        let Some(mut entry) = self.cur_rx.take() else {
            return Err(TransferError::NotConnected);
        };
        let mut flags = entry.flags();
        if extended.cq_data.is_some() {
            flags |= xfer_flags::REMOTE_CQ_DATA;
        }
        let context = entry.context();
        let buffers = entry.take_buffers();
        self.rx_ctx.release(entry);
        self.detect.reset();
        Ok(RxCompletion {
            len: header.payload_len()?,
            header,
            extended,
            flags,
            context,
            buffers,
        })
    }

    /// 进入失效状态并整体丢弃每连接状态。
    fn fail(&mut self, err: TransferError) -> TransferError {
        if err.is_connection_terminal() {
            tracing::debug!(
                connection = self.id.get(),
                code = err.code(),
                error = %err,
                "tearing down connection state"
            );
            self.teardown();
        }
        err
    }

    fn teardown(&mut self) {
        self.failed = true;
        self.detect.reset();
        self.staging.clear();
        if let Some(entry) = self.cur_rx.take() {
            self.rx_ctx.release(entry);
        }
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        if let Some(entry) = self.cur_rx.take() {
            self.rx_ctx.release(entry);
        }
    }
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("detect", &self.detect.state())
            .field("staged", &self.staging.remaining())
            .field("rx_in_progress", &self.cur_rx.is_some())
            .field("failed", &self.failed)
            .finish()
    }
}

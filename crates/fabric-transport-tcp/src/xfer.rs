//! 传输条目与部分传输跟踪。
//!
//! # 模块定位（Why）
//! - 非阻塞套接字上的一次向量收发可能只完成一部分字节，条目需要跨多次调用记住进度；
//! - 条目独占其分散/聚集向量：已完成的段从向量前端逻辑移除，部分完成的段保留剩余长度与前移后的起点。
//!
//! # 设计概要（How）
//! - 每段持有自己的 `BytesMut`，以 `off..end` 描述尚未完成的区间，没有任何裸指针别名；
//! - `first` 指向第一个未完成的段，`rem_len` 始终等于剩余区间长度之和；
//! - 单段向量走非向量化的系统调用，语义与多段路径一致。

use std::{
    io::{IoSlice, IoSliceMut},
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::BytesMut;
use fabric_buffer::Reusable;

use crate::{
    error::{Progress, TransferResult, map_write},
    socket::StreamSocket,
    staging::StagedReader,
};

/// 条目标志位，取值沿用 fabric 接口的惯例。
pub mod xfer_flags {
    pub const MSG: u64 = 1 << 1;
    pub const RECV: u64 = 1 << 10;
    pub const SEND: u64 = 1 << 11;
    pub const COMPLETION: u64 = 1 << 24;
    pub const REMOTE_CQ_DATA: u64 = 1 << 25;
}

/// 连接标识，条目通过它回指所属连接。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// 分配一个进程内唯一的标识。
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// 向量中的一段。
#[derive(Debug)]
struct IoSegment {
    buf: BytesMut,
    off: usize,
    end: usize,
}

impl IoSegment {
    fn new(buf: BytesMut) -> Self {
        let end = buf.len();
        Self { buf, off: 0, end }
    }

    fn remaining(&self) -> usize {
        self.end - self.off
    }
}

/// 一次进行中的发送或接收。
///
/// # 契约说明（What）
/// - `rem_len()` 在任何观察点都等于 `remaining_lens()` 之和；
/// - 条目在投递时由池分配，完成或取消时恰好归还一次，期间只被投递方独占；
/// - 接收条目的每段在投递时即确定长度（`BytesMut` 的 `len`），数据写入 `0..len` 区间。
#[derive(Debug, Default)]
pub struct TransferEntry {
    segments: Vec<IoSegment>,
    first: usize,
    rem_len: usize,
    flags: u64,
    context: u64,
    owner: Option<ConnectionId>,
}

impl Reusable for TransferEntry {
    fn reset(&mut self) {
        self.segments.clear();
        self.first = 0;
        self.rem_len = 0;
        self.flags = 0;
        self.context = 0;
        self.owner = None;
    }
}

impl TransferEntry {
    /// 构造发送条目。
    pub fn for_send(bufs: Vec<BytesMut>, flags: u64, context: u64) -> Self {
        let mut entry = Self::default();
        entry.set_iov(bufs);
        entry.flags = flags | xfer_flags::MSG | xfer_flags::SEND;
        entry.context = context;
        entry
    }

    /// 以新的向量替换当前内容并重置进度。
    pub fn set_iov(&mut self, bufs: Vec<BytesMut>) {
        self.segments = bufs.into_iter().map(IoSegment::new).collect();
        self.first = 0;
        self.rem_len = self.segments.iter().map(IoSegment::remaining).sum();
        self.skip_drained();
    }

    pub(crate) fn init(&mut self, flags: u64, context: u64) {
        self.flags = flags;
        self.context = context;
    }

    /// 尚未完成的字节数。
    pub fn rem_len(&self) -> usize {
        self.rem_len
    }

    /// 尚未完成的段数。
    pub fn iov_cnt(&self) -> usize {
        self.segments.len() - self.first
    }

    /// 每个未完成段的剩余长度，按向量顺序。
    pub fn remaining_lens(&self) -> impl Iterator<Item = usize> + '_ {
        self.segments[self.first..].iter().map(IoSegment::remaining)
    }

    pub fn flags(&self) -> u64 {
        self.flags
    }

    pub fn context(&self) -> u64 {
        self.context
    }

    pub fn owner(&self) -> Option<ConnectionId> {
        self.owner
    }

    pub fn set_owner(&mut self, owner: Option<ConnectionId>) {
        self.owner = owner;
    }

    pub fn is_complete(&self) -> bool {
        self.rem_len == 0
    }

    /// 将尚未开始的向量截短为总长 `len`，超出部分的段被丢弃。
    ///
    /// 用于把较大的接收缓冲匹配到较短的消息上；`len` 不得大于 `rem_len()`。
    pub fn truncate(&mut self, len: usize) {
        debug_assert!(len <= self.rem_len);
        let mut left = len;
        let mut keep = self.first;
        for seg in &mut self.segments[self.first..] {
            let take = left.min(seg.remaining());
            seg.end = seg.off + take;
            left -= take;
            keep += 1;
            if left == 0 {
                break;
            }
        }
        self.segments.truncate(keep);
        self.rem_len = len;
        self.skip_drained();
    }

    /// 记录 `n` 字节已完成：完成的段从前端移除，部分完成的段前移起点。
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.rem_len);
        let mut left = n;
        while left > 0 {
            let Some(seg) = self.segments.get_mut(self.first) else {
                break;
            };
            let take = left.min(seg.remaining());
            seg.off += take;
            left -= take;
            if seg.remaining() == 0 {
                self.first += 1;
            }
        }
        self.rem_len -= n - left;
        self.skip_drained();
        debug_assert_eq!(self.rem_len, self.remaining_lens().sum::<usize>());
    }

    /// 取出全部缓冲（按投递顺序），每段截到其有效末尾；条目随后为空。
    pub fn take_buffers(&mut self) -> Vec<BytesMut> {
        self.first = 0;
        self.rem_len = 0;
        self.segments
            .drain(..)
            .map(|mut seg| {
                seg.buf.truncate(seg.end);
                seg.buf
            })
            .collect()
    }

    /// 发起一次向量写。
    ///
    /// 全部写完返回 `Complete`；短写更新向量并返回 `Again`；`BrokenPipe` 映射为
    /// [`TransferError::NotConnected`](crate::TransferError::NotConnected)，其余 OS 错误原样返回。
    pub fn send<S: StreamSocket + ?Sized>(&mut self, socket: &mut S) -> TransferResult {
        if self.rem_len == 0 {
            return Ok(Progress::Complete);
        }
        let result = if let [seg] = &self.segments[self.first..] {
            socket.send(&seg.buf[seg.off..seg.end])
        } else {
            let slices: Vec<IoSlice<'_>> = self.segments[self.first..]
                .iter()
                .map(|seg| IoSlice::new(&seg.buf[seg.off..seg.end]))
                .collect();
            socket.send_vectored(&slices)
        };
        match map_write(result)? {
            Some(sent) => Ok(self.advance(sent)),
            None => Ok(Progress::Again),
        }
    }

    /// 接收负载：先消费暂存缓冲，暂存为空时再发起向量读。
    pub fn recv<S: StreamSocket + ?Sized>(
        &mut self,
        reader: &mut StagedReader<'_, S>,
    ) -> TransferResult {
        if self.rem_len == 0 {
            return Ok(Progress::Complete);
        }
        let received = {
            let mut slices: Vec<IoSliceMut<'_>> = self.segments[self.first..]
                .iter_mut()
                .map(|seg| IoSliceMut::new(&mut seg.buf[seg.off..seg.end]))
                .collect();
            reader.read_vectored(&mut slices)?
        };
        match received {
            Some(n) => Ok(self.advance(n)),
            None => Ok(Progress::Again),
        }
    }

    fn advance(&mut self, n: usize) -> Progress {
        self.consume(n);
        if self.rem_len == 0 {
            Progress::Complete
        } else {
            Progress::Again
        }
    }

    fn skip_drained(&mut self) {
        while self
            .segments
            .get(self.first)
            .is_some_and(|seg| seg.remaining() == 0)
        {
            self.first += 1;
        }
    }
}

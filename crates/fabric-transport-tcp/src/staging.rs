//! 每连接的预读暂存缓冲。
//!
//! # 模块定位（Why）
//! - 一次套接字读取往往能拿到多于一个逻辑单元（报文头或负载）所需的字节；
//!   暂存缓冲把一次系统调用的结果留给后续多次提取，避免每个报文头都单独发起 `recv`；
//! - 多出的字节保留到下一次调用，而不是丢弃或交还内核重新缓冲。
//!
//! # 设计概要（How）
//! - [`StagingBuffer`] 维护 `off ≤ len ≤ size` 三元组，`len == off` 即“空，需要重新填充”；
//! - 只在缓冲为空时整体重填，保证未读字节始终是 `off..len` 的连续区间；
//! - [`StagedReader`] 把“先读暂存、再读套接字”封装为单一的读取入口，调用点无需分支判断来源。

use std::io::IoSliceMut;

use crate::{
    error::{Progress, TransferError, TransferResult, map_read},
    socket::StreamSocket,
};

/// 固定容量的预读缓冲。
#[derive(Debug)]
pub struct StagingBuffer {
    buf: Box<[u8]>,
    len: usize,
    off: usize,
}

impl StagingBuffer {
    /// 创建容量为 `size` 的空缓冲。
    pub fn new(size: usize) -> Self {
        Self {
            buf: vec![0u8; size].into_boxed_slice(),
            len: 0,
            off: 0,
        }
    }

    /// 缓冲容量。
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// 当前持有的有效字节数（含已消费部分）。
    pub fn len(&self) -> usize {
        self.len
    }

    /// 已消费的字节数。
    pub fn offset(&self) -> usize {
        self.off
    }

    /// 尚未消费的字节数。
    pub fn remaining(&self) -> usize {
        self.len - self.off
    }

    pub fn is_empty(&self) -> bool {
        self.len == self.off
    }

    /// 尚未消费的字节视图。
    pub fn unread(&self) -> &[u8] {
        &self.buf[self.off..self.len]
    }

    /// 以一次读取整体替换缓冲内容。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：缓冲必须为空；仍有未读字节时直接返回 `Complete` 且不发起系统调用，
    ///   以免覆盖尚未交付的数据；
    /// - 成功时 `off = 0, len = 读取字节数`；
    /// - 读到 0 字节返回 [`TransferError::NotConnected`]，OS 错误原样返回，`WouldBlock` 返回
    ///   [`Progress::Again`] 且缓冲保持为空；内部从不重试。
    pub fn refill<S: StreamSocket + ?Sized>(&mut self, socket: &mut S) -> TransferResult {
        debug_assert!(self.is_empty(), "refill would drop unread staged bytes");
        if !self.is_empty() {
            return Ok(Progress::Complete);
        }
        match map_read(socket.recv(&mut self.buf))? {
            Some(n) => {
                self.len = n;
                self.off = 0;
                Ok(Progress::Complete)
            }
            None => Ok(Progress::Again),
        }
    }

    /// 拷出 `min(dest.len(), remaining)` 字节并推进 `off`，返回实际拷贝数。
    pub fn consume(&mut self, dest: &mut [u8]) -> usize {
        let count = dest.len().min(self.remaining());
        dest[..count].copy_from_slice(&self.buf[self.off..self.off + count]);
        self.off += count;
        count
    }

    /// 丢弃全部暂存内容，供连接拆除时使用。
    pub fn clear(&mut self) {
        self.len = 0;
        self.off = 0;
    }
}

/// 优先消费暂存缓冲、暂存为空时才访问套接字的读取器。
///
/// 所有方法返回 `Ok(Some(n))` 表示取得 `n` 字节，`Ok(None)` 表示套接字暂无数据。
pub struct StagedReader<'a, S: ?Sized> {
    staging: &'a mut StagingBuffer,
    socket: &'a mut S,
}

impl<'a, S: StreamSocket + ?Sized> StagedReader<'a, S> {
    pub fn new(staging: &'a mut StagingBuffer, socket: &'a mut S) -> Self {
        Self { staging, socket }
    }

    /// 填充 `dest` 的一部分。
    pub fn read(&mut self, dest: &mut [u8]) -> Result<Option<usize>, TransferError> {
        if dest.is_empty() {
            return Ok(Some(0));
        }
        if !self.staging.is_empty() {
            return Ok(Some(self.staging.consume(dest)));
        }
        map_read(self.socket.recv(dest))
    }

    /// 按顺序填充多个缓冲。
    ///
    /// 暂存非空时逐段拷贝，一旦某段未被填满或暂存耗尽即停止，剩余部分留给下一次调用；
    /// 暂存为空时发起一次向量读。单段向量走 [`StagedReader::read`]，语义一致。
    pub fn read_vectored(
        &mut self,
        bufs: &mut [IoSliceMut<'_>],
    ) -> Result<Option<usize>, TransferError> {
        if let [single] = bufs {
            return self.read(single);
        }
        if self.staging.is_empty() {
            return map_read(self.socket.recv_vectored(bufs));
        }
        let mut total = 0;
        for buf in bufs.iter_mut() {
            let copied = self.staging.consume(buf);
            total += copied;
            if copied < buf.len() || self.staging.is_empty() {
                break;
            }
        }
        Ok(Some(total))
    }

    /// 暂存缓冲是否仍有未读字节。
    pub fn has_staged(&self) -> bool {
        !self.staging.is_empty()
    }
}

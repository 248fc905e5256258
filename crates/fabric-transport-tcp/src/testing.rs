//! 测试辅助：按脚本回放读写结果的内存套接字。
//!
//! 每个 `chunk` 代表一次到达的分片，单次 `recv` 不会跨越分片边界，
//! 从而可以精确复现任意分片方式。脚本耗尽后读操作返回 `WouldBlock`。

use std::{
    collections::VecDeque,
    io::{self, IoSlice, IoSliceMut},
};

use crate::socket::StreamSocket;

#[derive(Debug)]
enum RecvStep {
    Chunk(Vec<u8>),
    WouldBlock,
    Eof,
    Error(io::ErrorKind),
}

#[derive(Debug)]
enum SendStep {
    Accept(usize),
    WouldBlock,
    Error(io::ErrorKind),
}

/// 脚本化套接字。
#[derive(Debug, Default)]
pub struct ScriptedSocket {
    recv_script: VecDeque<RecvStep>,
    send_script: VecDeque<SendStep>,
    written: Vec<u8>,
    recv_calls: usize,
    send_calls: usize,
}

impl ScriptedSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一次数据到达。
    pub fn chunk(mut self, bytes: &[u8]) -> Self {
        self.push_chunk(bytes);
        self
    }

    pub fn would_block(mut self) -> Self {
        self.recv_script.push_back(RecvStep::WouldBlock);
        self
    }

    pub fn eof(mut self) -> Self {
        self.recv_script.push_back(RecvStep::Eof);
        self
    }

    pub fn recv_error(mut self, kind: io::ErrorKind) -> Self {
        self.recv_script.push_back(RecvStep::Error(kind));
        self
    }

    /// 下一次写最多接受 `limit` 字节。
    pub fn accept(mut self, limit: usize) -> Self {
        self.send_script.push_back(SendStep::Accept(limit));
        self
    }

    pub fn send_would_block(mut self) -> Self {
        self.send_script.push_back(SendStep::WouldBlock);
        self
    }

    pub fn send_error(mut self, kind: io::ErrorKind) -> Self {
        self.send_script.push_back(SendStep::Error(kind));
        self
    }

    /// 在测试中途追加到达的数据。
    pub fn push_chunk(&mut self, bytes: &[u8]) {
        self.recv_script.push_back(RecvStep::Chunk(bytes.to_vec()));
    }

    /// 已写出的全部字节。
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn recv_calls(&self) -> usize {
        self.recv_calls
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls
    }

    fn next_chunk(&mut self) -> io::Result<Vec<u8>> {
        match self.recv_script.pop_front() {
            Some(RecvStep::Chunk(bytes)) => Ok(bytes),
            Some(RecvStep::WouldBlock) | None => Err(io::ErrorKind::WouldBlock.into()),
            Some(RecvStep::Eof) => Ok(Vec::new()),
            Some(RecvStep::Error(kind)) => Err(kind.into()),
        }
    }

    fn requeue_rest(&mut self, chunk: Vec<u8>, used: usize) {
        if used < chunk.len() {
            self.recv_script
                .push_front(RecvStep::Chunk(chunk[used..].to_vec()));
        }
    }
}

impl StreamSocket for ScriptedSocket {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv_calls += 1;
        let chunk = self.next_chunk()?;
        let count = chunk.len().min(buf.len());
        buf[..count].copy_from_slice(&chunk[..count]);
        self.requeue_rest(chunk, count);
        Ok(count)
    }

    fn recv_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        self.recv_calls += 1;
        let chunk = self.next_chunk()?;
        let mut used = 0;
        for buf in bufs.iter_mut() {
            let count = (chunk.len() - used).min(buf.len());
            buf[..count].copy_from_slice(&chunk[used..used + count]);
            used += count;
            if used == chunk.len() {
                break;
            }
        }
        self.requeue_rest(chunk, used);
        Ok(used)
    }

    fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        self.send_calls += 1;
        let mut limit = match self.send_script.pop_front() {
            Some(SendStep::Accept(limit)) => limit,
            Some(SendStep::WouldBlock) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(SendStep::Error(kind)) => return Err(kind.into()),
            None => usize::MAX,
        };
        let mut sent = 0;
        for buf in bufs {
            let count = buf.len().min(limit);
            self.written.extend_from_slice(&buf[..count]);
            sent += count;
            limit -= count;
            if limit == 0 {
                break;
            }
        }
        Ok(sent)
    }
}

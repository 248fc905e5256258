//! 字节流套接字抽象。
//!
//! 引擎只依赖三个非阻塞原语：单缓冲读、向量读与向量写。返回值沿用 POSIX 语义：
//! `Ok(0)` 表示对端关闭，`WouldBlock` 表示暂无数据，其余错误为 OS 错误。

use std::{
    io::{self, IoSlice, IoSliceMut, Read},
    net::TcpStream,
};

use socket2::SockRef;

/// 非阻塞字节流。
pub trait StreamSocket {
    /// 读取至多 `buf.len()` 字节。
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// 按顺序填充多个缓冲。
    fn recv_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize>;

    /// 一次向量写入，可能只写出部分字节。
    fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send_vectored(&[IoSlice::new(buf)])
    }
}

impl StreamSocket for TcpStream {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn recv_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        self.read_vectored(bufs)
    }

    fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        // std 的 TcpStream 没有直接暴露 sendmsg，经 socket2 借用同一描述符发出聚集写。
        SockRef::from(&*self).send_vectored(bufs)
    }
}

impl<S: StreamSocket + ?Sized> StreamSocket for &mut S {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv(buf)
    }

    fn recv_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        (**self).recv_vectored(bufs)
    }

    fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        (**self).send_vectored(bufs)
    }
}

/// 将已建立的连接切换到引擎要求的工作模式：非阻塞，并按配置关闭 Nagle。
pub fn configure_stream(stream: &TcpStream, nodelay: bool) -> io::Result<()> {
    stream.set_nonblocking(true)?;
    stream.set_nodelay(nodelay)
}

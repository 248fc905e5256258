#![doc = r#"
# fabric-transport-tcp

## 设计动机（Why）
- **定位**：该 crate 是非阻塞 TCP 字节流上的消息分帧引擎，负责从任意分片的字节流中
  重建变长报文头，并把负载分散写入调用方预先投递的接收缓冲。
- **架构角色**：位于反应器/事件循环之下、协议语义之上；它不注册任何可读事件，也不阻塞，
  每次调用只在套接字上做有限次系统调用，然后把 `Complete`/`Again` 交还驱动方。
- **设计理念**：每个逻辑单元的进度都以显式游标记录，使“短读/短写”成为常态而非异常。

## 核心契约（What）
- **输入条件**：套接字已切换为非阻塞（见 [`configure_stream`]），同一连接的全部调用
  由单一执行流串行发起；
- **输出保障**：
  - [`Progress::Again`] 表示“稍后重试”，已完成的字节均已记录；
  - 读到 0 字节或写端 `EPIPE` 统一映射为 [`TransferError::NotConnected`]；
  - 其余 OS 错误经 [`TransferError::Io`] 原样透传；
- **共享接收**：[`SharedRxContext`] 可被多个连接共享，投递与出队在同一把锁下完成，
  严格按投递顺序匹配。

## 实现策略（How）
- [`StagingBuffer`] 以一次读取预取字节，报文头检测与负载接收都先消费暂存；
- [`RxDetect`] 以 `done_len`/`hdr_len` 两个游标驱动三阶段状态机；
- [`TransferEntry`] 持有 `BytesMut` 段向量，短读短写后逻辑移除已完成段；
- [`Connection`] 将以上部件组装为单连接的推进入口。

## 风险与考量（Trade-offs）
- 匹配策略为严格 FIFO，消息长于已投递缓冲时直接报告截断并拆除连接；
- 暂存缓冲只在为空时重填，未读字节不会被搬移或压缩。
"#]

mod config;
mod connection;
mod detect;
mod error;
mod header;
mod socket;
mod srx;
mod staging;
mod xfer;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{ConfigError, PoolSettings, TransportConfig};
pub use connection::{Connection, RxCancel, RxCompletion, RxProgress};
pub use detect::{DetectState, RxDetect};
pub use error::{Progress, TransferError, TransferResult};
pub use header::{
    BASE_HEADER_SIZE, BaseHeader, ExtendedHeader, MAX_HEADER_SIZE, Op, PROTOCOL_VERSION,
    RMA_IOV_SIZE, RmaIov, encode_header, flags,
};
pub use socket::{StreamSocket, configure_stream};
pub use srx::{SharedRxContext, live_shared_contexts};
pub use staging::{StagedReader, StagingBuffer};
pub use xfer::{ConnectionId, TransferEntry, xfer_flags};

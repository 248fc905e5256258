use std::io;

use fabric_buffer::PoolExhausted;
use thiserror::Error;

/// 一次非阻塞调用的推进结果。
///
/// `Again` 是非阻塞 I/O 下的常规结果而非错误：调用方在下一次可读/可写通知后重新调用即可。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// 本次目标已全部完成。
    Complete,
    /// 暂时无法继续推进，已完成的部分已记录在状态中。
    Again,
}

impl Progress {
    pub fn is_complete(self) -> bool {
        matches!(self, Progress::Complete)
    }
}

/// 传输层所有 I/O 例程的返回类型。
pub type TransferResult = Result<Progress, TransferError>;

/// 传输层的终止性错误。
///
/// # 教案式说明
/// - **意图 (Why)**：把“连接已关闭”“底层 OS 错误”“资源耗尽”“协议违例”区分开，
///   让驱动本引擎的上层决定连接命运；“稍后重试”不在此列，见 [`Progress::Again`]。
/// - **契约 (What)**：
///   - `NotConnected`：读到 0 字节或发送遇到 `BrokenPipe`，连接必须整体拆除；
///   - `Io`：其余 OS 错误原样透传；
///   - `ResourceExhausted`：`post` 时池饱和，没有任何请求入队；
///   - 其余变体为参数或协议违例。
/// - **执行 (How)**：[`TransferError::code`] 提供稳定的点分错误码，便于告警聚合。
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transport endpoint is not connected")]
    NotConnected,

    #[error("socket I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("receive pool exhausted: {0}")]
    ResourceExhausted(#[from] PoolExhausted),

    #[error("invalid message header: payload_off={payload_off}, size={size}")]
    InvalidHeader { payload_off: usize, size: u64 },

    #[error("posted receive too small: message needs {needed} bytes, buffer holds {available}")]
    Truncated { needed: usize, available: usize },

    #[error("io vector holds {count} segments, limit is {limit}")]
    IovLimit { count: usize, limit: usize },

    #[error("shared receive context limit ({limit}) reached")]
    ContextLimit { limit: usize },
}

impl TransferError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::NotConnected => "fabric.transport.tcp.not_connected",
            TransferError::Io(_) => "fabric.transport.tcp.io_failed",
            TransferError::ResourceExhausted(_) => "fabric.transport.tcp.resource_exhausted",
            TransferError::InvalidHeader { .. } => "fabric.transport.tcp.invalid_header",
            TransferError::Truncated { .. } => "fabric.transport.tcp.truncated",
            TransferError::IovLimit { .. } => "fabric.transport.tcp.iov_limit",
            TransferError::ContextLimit { .. } => "fabric.transport.tcp.context_limit",
        }
    }

    /// 该错误是否要求拆除所属连接。
    ///
    /// 资源耗尽与参数错误只影响单次调用；其余错误意味着连接的字节流已不可继续解析。
    pub fn is_connection_terminal(&self) -> bool {
        matches!(
            self,
            TransferError::NotConnected
                | TransferError::Io(_)
                | TransferError::InvalidHeader { .. }
                | TransferError::Truncated { .. }
        )
    }
}

/// 将一次读系统调用的结果映射为“字节数或推进信号”。
///
/// - `Ok(0)`：对端关闭，映射为 [`TransferError::NotConnected`]；
/// - `WouldBlock`/`Interrupted`：返回 `Ok(None)`，即“稍后重试”；
/// - 其余错误原样透传。
pub(crate) fn map_read(result: io::Result<usize>) -> Result<Option<usize>, TransferError> {
    match result {
        Ok(0) => Err(TransferError::NotConnected),
        Ok(n) => Ok(Some(n)),
        Err(err) if is_transient(&err) => Ok(None),
        Err(err) => Err(TransferError::Io(err)),
    }
}

/// 写路径的映射：`BrokenPipe` 视为连接断开。
pub(crate) fn map_write(result: io::Result<usize>) -> Result<Option<usize>, TransferError> {
    match result {
        Ok(n) => Ok(Some(n)),
        Err(err) if is_transient(&err) => Ok(None),
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Err(TransferError::NotConnected),
        Err(err) => Err(TransferError::Io(err)),
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

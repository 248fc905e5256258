use crate::{
    error::{Progress, TransferError, TransferResult},
    header::{BASE_HEADER_SIZE, BaseHeader, ExtendedHeader, MAX_HEADER_SIZE},
    socket::StreamSocket,
    staging::StagedReader,
};

/// 报文头检测的三个阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectState {
    /// 基础头尚未收齐，总长度未知。
    AwaitingBase,
    /// 总长度已知且大于基础头，扩展头尚未收齐。
    AwaitingExtended,
    /// 报文头已完整。
    Complete,
}

/// 每连接的报文头重建游标。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 在任意分片的非阻塞读取下逐字节重建变长报文头，跨越无限次调用保持进度；
/// - 重复调用而无新字节时不改变任何状态，每个字节只计入 `done_len` 一次。
///
/// ## 逻辑 (How)
/// - 每次调用尝试读满“当前目标长度 - `done_len`”：总长度未知时目标为基础头长度，
///   否则为解码得到的 `hdr_len`；
/// - `done_len` 首次到达基础头长度的那次调用中解码 `payload_off`，若总长度更大，
///   立即在同一次调用中继续读取扩展头，不浪费一次往返；
/// - 读取统一经过 [`StagedReader`]，优先消费暂存缓冲。
///
/// ## 契约 (What)
/// - 返回 `Complete` 时 `done_len == hdr_len`；短读返回 `Again`；
/// - 读到 0 字节或 OS 错误时原样返回终止性错误，游标不再可用，连接需整体拆除；
/// - 游标只有在上层消费完整个报文头后调用 [`RxDetect::reset`] 才回到初始状态。
#[derive(Debug, Clone)]
pub struct RxDetect {
    hdr: [u8; MAX_HEADER_SIZE],
    hdr_len: Option<usize>,
    done_len: usize,
}

impl Default for RxDetect {
    fn default() -> Self {
        Self::new()
    }
}

impl RxDetect {
    pub fn new() -> Self {
        Self {
            hdr: [0u8; MAX_HEADER_SIZE],
            hdr_len: None,
            done_len: 0,
        }
    }

    /// 当前阶段。
    pub fn state(&self) -> DetectState {
        match self.hdr_len {
            None => DetectState::AwaitingBase,
            Some(len) if self.done_len < len => DetectState::AwaitingExtended,
            Some(_) => DetectState::Complete,
        }
    }

    /// 已重建的字节数。
    pub fn done_len(&self) -> usize {
        self.done_len
    }

    /// 报文头总长度；基础头未收齐时为 `None`。
    pub fn hdr_len(&self) -> Option<usize> {
        self.hdr_len
    }

    /// 已收到的报文头字节。
    pub fn header_bytes(&self) -> &[u8] {
        &self.hdr[..self.done_len]
    }

    /// 基础头收齐后可用。
    pub fn base_header(&self) -> Option<BaseHeader> {
        self.hdr_len.map(|_| BaseHeader::decode(&self.hdr))
    }

    /// 报文头完整后解码扩展头区域。
    pub fn extended_header(&self) -> Option<Result<ExtendedHeader, TransferError>> {
        let base = self.base_header()?;
        if self.state() != DetectState::Complete {
            return None;
        }
        Some(ExtendedHeader::decode(
            &base,
            &self.hdr[BASE_HEADER_SIZE..self.done_len],
        ))
    }

    /// 丢弃当前报文头，准备检测下一条消息。
    pub fn reset(&mut self) {
        self.hdr_len = None;
        self.done_len = 0;
    }

    /// 推进报文头检测。
    pub fn recv_hdr<S: StreamSocket + ?Sized>(
        &mut self,
        reader: &mut StagedReader<'_, S>,
    ) -> TransferResult {
        if self.state() == DetectState::Complete {
            return Ok(Progress::Complete);
        }
        if !self.read_more(reader)? {
            return Ok(Progress::Again);
        }
        if self.hdr_len.is_none() && self.done_len == BASE_HEADER_SIZE {
            self.decode_len()?;
            if self.state() == DetectState::AwaitingExtended {
                self.read_more(reader)?;
            }
        }
        if self.hdr_len.is_some() {
            self.check_len_stable()?;
        }
        Ok(match self.state() {
            DetectState::Complete => Progress::Complete,
            _ => Progress::Again,
        })
    }

    fn target(&self) -> usize {
        self.hdr_len.unwrap_or(BASE_HEADER_SIZE)
    }

    /// 读取一次，返回是否取得了新字节。
    fn read_more<S: StreamSocket + ?Sized>(
        &mut self,
        reader: &mut StagedReader<'_, S>,
    ) -> Result<bool, TransferError> {
        let target = self.target();
        match reader.read(&mut self.hdr[self.done_len..target])? {
            Some(n) => {
                self.done_len += n;
                Ok(n > 0)
            }
            None => Ok(false),
        }
    }

    fn decode_len(&mut self) -> Result<(), TransferError> {
        let base = BaseHeader::decode(&self.hdr);
        base.payload_len()?;
        self.hdr_len = Some(base.header_len());
        Ok(())
    }

    /// 基础头一旦收齐便不再变化，解码出的总长度必须始终一致。
    fn check_len_stable(&self) -> Result<(), TransferError> {
        let base = BaseHeader::decode(&self.hdr);
        if Some(base.header_len()) != self.hdr_len {
            return Err(TransferError::InvalidHeader {
                payload_off: base.header_len(),
                size: base.size,
            });
        }
        Ok(())
    }
}

//! 报文头线格式。
//!
//! # 布局（What）
//! 基础头固定 16 字节，多字节字段使用网络字节序：
//!
//! ```text
//! 0        1      2          4         5             6             7      8
//! +--------+------+----------+---------+-------------+-------------+------+-----------+
//! |version |  op  |  flags   | op_data | rma_iov_cnt | payload_off | rsvd | size (u64)|
//! +--------+------+----------+---------+-------------+-------------+------+-----------+
//! ```
//!
//! - `payload_off`：报文头总长度（基础头 + 扩展头），也是负载的起始偏移；
//! - `size`：整条消息长度（报文头 + 负载）；
//! - `payload_off` 大于 16 时，紧随其后的是扩展头：`REMOTE_CQ_DATA` 置位时先有 8 字节
//!   远端完成数据，然后是 `rma_iov_cnt` 个 24 字节的 RMA 描述符。

use bytes::{Buf, BufMut};

use crate::error::TransferError;

/// 基础头长度。
pub const BASE_HEADER_SIZE: usize = 16;

/// 报文头存储容量上限，`payload_off` 不得超过该值。
pub const MAX_HEADER_SIZE: usize = 128;

/// 单个 RMA 描述符的编码长度。
pub const RMA_IOV_SIZE: usize = 24;

/// 当前协议版本。
pub const PROTOCOL_VERSION: u8 = 3;

/// 报文头标志位。
pub mod flags {
    /// 扩展头携带 8 字节远端完成数据。
    pub const REMOTE_CQ_DATA: u16 = 1 << 0;
    /// 请求投递完成语义。
    pub const DELIVERY_COMPLETE: u16 = 1 << 1;
    /// 请求提交完成语义。
    pub const COMMIT_COMPLETE: u16 = 1 << 2;
}

/// 报文操作码。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    Msg = 0,
    ReadReq = 1,
    ReadRsp = 2,
    Write = 3,
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Op::Msg),
            1 => Ok(Op::ReadReq),
            2 => Ok(Op::ReadRsp),
            3 => Ok(Op::Write),
            other => Err(other),
        }
    }
}

/// 解码后的基础头。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseHeader {
    pub version: u8,
    pub op: u8,
    pub flags: u16,
    pub op_data: u8,
    pub rma_iov_cnt: u8,
    pub payload_off: u8,
    pub size: u64,
}

impl BaseHeader {
    /// 构造一个不带扩展头的 `Msg` 报文头。
    pub fn msg(payload_len: usize) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            op: Op::Msg as u8,
            flags: 0,
            op_data: 0,
            rma_iov_cnt: 0,
            payload_off: BASE_HEADER_SIZE as u8,
            size: (BASE_HEADER_SIZE + payload_len) as u64,
        }
    }

    /// 从至少 16 字节的切片解码。
    pub fn decode(mut bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() >= BASE_HEADER_SIZE);
        let version = bytes.get_u8();
        let op = bytes.get_u8();
        let flags = bytes.get_u16();
        let op_data = bytes.get_u8();
        let rma_iov_cnt = bytes.get_u8();
        let payload_off = bytes.get_u8();
        let _rsvd = bytes.get_u8();
        let size = bytes.get_u64();
        Self {
            version,
            op,
            flags,
            op_data,
            rma_iov_cnt,
            payload_off,
            size,
        }
    }

    /// 编码到 `out` 末尾。
    pub fn encode<B: BufMut>(&self, out: &mut B) {
        out.put_u8(self.version);
        out.put_u8(self.op);
        out.put_u16(self.flags);
        out.put_u8(self.op_data);
        out.put_u8(self.rma_iov_cnt);
        out.put_u8(self.payload_off);
        out.put_u8(0);
        out.put_u64(self.size);
    }

    pub fn op(&self) -> Result<Op, u8> {
        Op::try_from(self.op)
    }

    /// 报文头总长度。
    pub fn header_len(&self) -> usize {
        self.payload_off as usize
    }

    /// 校验长度字段并返回负载长度。
    ///
    /// `payload_off` 必须落在 `[BASE_HEADER_SIZE, MAX_HEADER_SIZE]` 内且不超过 `size`。
    pub fn payload_len(&self) -> Result<usize, TransferError> {
        let header_len = self.header_len();
        if !(BASE_HEADER_SIZE..=MAX_HEADER_SIZE).contains(&header_len)
            || self.size < header_len as u64
        {
            return Err(TransferError::InvalidHeader {
                payload_off: header_len,
                size: self.size,
            });
        }
        usize::try_from(self.size - header_len as u64).map_err(|_| TransferError::InvalidHeader {
            payload_off: header_len,
            size: self.size,
        })
    }
}

/// RMA 描述符。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RmaIov {
    pub addr: u64,
    pub len: u64,
    pub key: u64,
}

/// 扩展头内容。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedHeader {
    pub cq_data: Option<u64>,
    pub rma_iov: Vec<RmaIov>,
}

impl ExtendedHeader {
    /// 编码后的长度。
    pub fn encoded_len(&self) -> usize {
        self.cq_data.map_or(0, |_| 8) + self.rma_iov.len() * RMA_IOV_SIZE
    }

    /// 按基础头的标志与计数解码扩展头区域。
    ///
    /// 区域长度不足以容纳声明的字段时返回 [`TransferError::InvalidHeader`]。
    pub fn decode(base: &BaseHeader, mut bytes: &[u8]) -> Result<Self, TransferError> {
        let cq_len = if base.flags & flags::REMOTE_CQ_DATA != 0 { 8 } else { 0 };
        let needed = cq_len + base.rma_iov_cnt as usize * RMA_IOV_SIZE;
        if bytes.len() < needed {
            return Err(TransferError::InvalidHeader {
                payload_off: base.header_len(),
                size: base.size,
            });
        }
        let cq_data = (cq_len > 0).then(|| bytes.get_u64());
        let rma_iov = (0..base.rma_iov_cnt)
            .map(|_| RmaIov {
                addr: bytes.get_u64(),
                len: bytes.get_u64(),
                key: bytes.get_u64(),
            })
            .collect();
        Ok(Self { cq_data, rma_iov })
    }

    pub fn encode<B: BufMut>(&self, out: &mut B) {
        if let Some(data) = self.cq_data {
            out.put_u64(data);
        }
        for iov in &self.rma_iov {
            out.put_u64(iov.addr);
            out.put_u64(iov.len);
            out.put_u64(iov.key);
        }
    }
}

/// 编码完整报文头：基础头的 `payload_off`、`flags`、`rma_iov_cnt` 按扩展头自动填写，
/// `size` 随报文头长度调整，负载长度保持不变。
///
/// 扩展头使总长度超过 [`MAX_HEADER_SIZE`] 时返回 [`TransferError::InvalidHeader`]，
/// 此时 `out` 不被写入。
pub fn encode_header<B: BufMut>(
    mut base: BaseHeader,
    ext: &ExtendedHeader,
    out: &mut B,
) -> Result<(), TransferError> {
    let header_len = BASE_HEADER_SIZE + ext.encoded_len();
    if header_len > MAX_HEADER_SIZE {
        return Err(TransferError::InvalidHeader {
            payload_off: header_len,
            size: base.size,
        });
    }
    let payload_len = base.size.saturating_sub(base.header_len() as u64);
    base.payload_off = header_len as u8;
    base.size = header_len as u64 + payload_len;
    base.rma_iov_cnt = ext.rma_iov.len() as u8;
    if ext.cq_data.is_some() {
        base.flags |= flags::REMOTE_CQ_DATA;
    } else {
        base.flags &= !flags::REMOTE_CQ_DATA;
    }
    base.encode(out);
    ext.encode(out);
    Ok(())
}

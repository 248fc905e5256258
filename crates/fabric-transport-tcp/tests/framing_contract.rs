//! `framing_contract` 集成测试：从外部视角验证报文头检测、部分传输与连接推进的契约。
//!
//! # 测试目标（Why）
//! - 非阻塞字节流可以在任意位置被切分，引擎必须对任意分片给出与一次性到达相同的结果；
//! - 对端关闭在报文头阶段与负载阶段都必须被识别为“连接断开”，并释放进行中的接收条目。
//!
//! # 测试手法（How）
//! - 以 `ScriptedSocket` 回放预先编排的分片，单次读取不跨越分片边界；
//! - 性质测试随机生成扩展头、负载与分片方式，断言重建结果逐字节一致。

use bytes::BytesMut;
use fabric_transport_tcp::{
    BASE_HEADER_SIZE, BaseHeader, Connection, DetectState, ExtendedHeader, Progress, RmaIov,
    RxCancel, RxCompletion, RxDetect, RxProgress, StagedReader, StagingBuffer, TransferEntry,
    TransferError, TransportConfig, encode_header, testing::ScriptedSocket, xfer_flags,
};
use proptest::prelude::*;

fn message(payload: &[u8], ext: &ExtendedHeader) -> Vec<u8> {
    let mut out = Vec::new();
    encode_header(BaseHeader::msg(payload.len()), ext, &mut out).unwrap();
    out.extend_from_slice(payload);
    out
}

fn rma_ext(count: u64) -> ExtendedHeader {
    ExtendedHeader {
        cq_data: None,
        rma_iov: (0..count)
            .map(|i| RmaIov {
                addr: 0x1000 * i,
                len: 64,
                key: i,
            })
            .collect(),
    }
}

fn connection(socket: ScriptedSocket) -> Connection<ScriptedSocket> {
    Connection::new(socket, &TransportConfig::default(), None)
}

fn expect_completion(progress: RxProgress) -> RxCompletion {
    match progress {
        RxProgress::Completed(done) => done,
        RxProgress::Again => panic!("接收尚未完成"),
    }
}

fn concat(buffers: &[BytesMut]) -> Vec<u8> {
    buffers.iter().flat_map(|buf| buf.iter().copied()).collect()
}

/// 基础头单独成帧时，一次读取即完成检测。
#[test]
fn base_only_header_completes_on_first_read() {
    let bytes = message(b"", &ExtendedHeader::default());
    assert_eq!(bytes.len(), BASE_HEADER_SIZE);

    let mut socket = ScriptedSocket::new().chunk(&bytes);
    let mut staging = StagingBuffer::new(0);
    let mut detect = RxDetect::new();
    let mut reader = StagedReader::new(&mut staging, &mut socket);
    assert_eq!(detect.recv_hdr(&mut reader).unwrap(), Progress::Complete);
    assert_eq!(detect.hdr_len(), Some(BASE_HEADER_SIZE));
}

/// 5/3/32 字节三次到达：前两次停留在基础头阶段，第三次直接完成扩展头。
#[test]
fn three_fragment_header_reports_done_len_at_each_step() {
    let bytes = message(b"", &rma_ext(1));
    assert_eq!(bytes.len(), 40);

    let mut socket = ScriptedSocket::new();
    let mut staging = StagingBuffer::new(0);
    let mut detect = RxDetect::new();
    let mut observed = Vec::new();
    for range in [0..5, 5..8, 8..40] {
        socket.push_chunk(&bytes[range]);
        let mut reader = StagedReader::new(&mut staging, &mut socket);
        let progress = detect.recv_hdr(&mut reader).unwrap();
        observed.push((progress, detect.state(), detect.done_len()));
    }
    assert_eq!(
        observed,
        vec![
            (Progress::Again, DetectState::AwaitingBase, 5),
            (Progress::Again, DetectState::AwaitingBase, 8),
            (Progress::Complete, DetectState::Complete, 40),
        ]
    );
}

/// 暂存 15 字节填充 {10,10,10}：第一段填满、第二段剩 5。
#[test]
fn staged_bytes_partially_fill_a_three_segment_vector() {
    let mut socket = ScriptedSocket::new().chunk(&[7u8; 15]);
    let mut staging = StagingBuffer::new(64);
    staging.refill(&mut socket).unwrap();

    let mut entry = TransferEntry::default();
    entry.set_iov((0..3).map(|_| BytesMut::zeroed(10)).collect());
    let mut reader = StagedReader::new(&mut staging, &mut socket);
    assert_eq!(entry.recv(&mut reader).unwrap(), Progress::Again);
    assert_eq!(entry.rem_len(), 15);
    assert_eq!(entry.remaining_lens().collect::<Vec<_>>(), vec![5, 10]);
    assert!(staging.is_empty());
}

/// 单条消息一次到达：报文头与负载都取自暂存缓冲。
#[test]
fn whole_message_in_one_read_completes_in_one_call() {
    let bytes = message(b"hello world", &rma_ext(1));
    let mut conn = connection(ScriptedSocket::new().chunk(&bytes));
    conn.rx_context()
        .post_single(BytesMut::zeroed(32), 11)
        .unwrap();

    let done = expect_completion(conn.progress_rx().unwrap());
    assert_eq!(done.len, 11);
    assert_eq!(done.context, 11);
    assert_eq!(done.extended.rma_iov.len(), 1);
    assert_eq!(concat(&done.buffers), b"hello world");
    assert_ne!(done.flags & xfer_flags::RECV, 0);
    assert_eq!(conn.socket().recv_calls(), 1, "一次预读应覆盖整条消息");
    assert_eq!(conn.detect_state(), DetectState::AwaitingBase);
    assert_eq!(conn.rx_context().pool_stats().in_use, 0);
}

/// 报文头就绪但没有已投递的接收：保留报文头，投递后继续。
#[test]
fn header_waits_for_a_posted_receive() {
    let bytes = message(b"abc", &ExtendedHeader::default());
    let mut conn = connection(ScriptedSocket::new().chunk(&bytes));

    assert!(matches!(conn.progress_rx().unwrap(), RxProgress::Again));
    assert_eq!(conn.detect_state(), DetectState::Complete);
    assert!(matches!(conn.progress_rx().unwrap(), RxProgress::Again));

    conn.post_recv(vec![BytesMut::zeroed(2), BytesMut::zeroed(2)], 5)
        .unwrap();
    let done = expect_completion(conn.progress_rx().unwrap());
    assert_eq!(done.buffers.len(), 2);
    assert_eq!(&done.buffers[0][..], b"ab");
    assert_eq!(&done.buffers[1][..], b"c");
    assert_ne!(done.flags & xfer_flags::COMPLETION, 0);
}

/// 同一次预读里的两条消息依次完成，第二条不再发起系统调用。
#[test]
fn back_to_back_messages_share_one_staging_fill() {
    let mut bytes = message(b"first", &ExtendedHeader::default());
    bytes.extend(message(b"second!", &rma_ext(2)));
    let mut conn = connection(ScriptedSocket::new().chunk(&bytes));
    for context in [1, 2] {
        conn.rx_context()
            .post_single(BytesMut::zeroed(16), context)
            .unwrap();
    }

    let first = expect_completion(conn.progress_rx().unwrap());
    let second = expect_completion(conn.progress_rx().unwrap());
    assert_eq!((first.context, concat(&first.buffers)), (1, b"first".to_vec()));
    assert_eq!(
        (second.context, concat(&second.buffers)),
        (2, b"second!".to_vec())
    );
    assert_eq!(conn.socket().recv_calls(), 1);
}

/// 零长度负载在匹配后立即完成。
#[test]
fn empty_payload_completes_without_reading() {
    let bytes = message(b"", &ExtendedHeader::default());
    let mut conn = connection(ScriptedSocket::new().chunk(&bytes));
    conn.rx_context().post_single(BytesMut::zeroed(8), 3).unwrap();

    let done = expect_completion(conn.progress_rx().unwrap());
    assert_eq!(done.len, 0);
    assert!(concat(&done.buffers).is_empty());
}

/// 远端完成数据随完成结果一并交付。
#[test]
fn remote_cq_data_is_reported() {
    let ext = ExtendedHeader {
        cq_data: Some(0xfeed),
        rma_iov: Vec::new(),
    };
    let bytes = message(b"xy", &ext);
    let mut conn = connection(ScriptedSocket::new().chunk(&bytes));
    conn.rx_context().post_single(BytesMut::zeroed(2), 0).unwrap();

    let done = expect_completion(conn.progress_rx().unwrap());
    assert_eq!(done.extended.cq_data, Some(0xfeed));
    assert_ne!(done.flags & xfer_flags::REMOTE_CQ_DATA, 0);
}

/// 已投递的缓冲小于消息时报告截断，连接随即失效。
#[test]
fn undersized_receive_is_truncation() {
    let bytes = message(b"0123456789", &ExtendedHeader::default());
    let mut conn = connection(ScriptedSocket::new().chunk(&bytes));
    conn.rx_context().post_single(BytesMut::zeroed(4), 0).unwrap();

    assert!(matches!(
        conn.progress_rx(),
        Err(TransferError::Truncated {
            needed: 10,
            available: 4
        })
    ));
    assert!(conn.is_failed());
    assert_eq!(conn.rx_context().pool_stats().in_use, 0);
    assert!(matches!(
        conn.progress_rx(),
        Err(TransferError::NotConnected)
    ));
}

/// 报文头阶段读到 0 字节即连接断开。
#[test]
fn eof_during_header_is_not_connected() {
    let bytes = message(b"", &rma_ext(2));
    let socket = ScriptedSocket::new().chunk(&bytes[..20]).eof();
    let mut conn = connection(socket);

    assert!(matches!(conn.progress_rx().unwrap(), RxProgress::Again));
    assert_eq!(conn.detect_state(), DetectState::AwaitingExtended);
    assert!(matches!(
        conn.progress_rx(),
        Err(TransferError::NotConnected)
    ));
    assert_eq!(conn.detect_state(), DetectState::AwaitingBase);
}

/// 负载阶段读到 0 字节同样是连接断开，进行中的条目归还池。
#[test]
fn eof_during_payload_releases_the_entry() {
    let bytes = message(b"0123456789", &ExtendedHeader::default());
    let socket = ScriptedSocket::new()
        .chunk(&bytes[..BASE_HEADER_SIZE + 3])
        .eof();
    let mut conn = connection(socket);
    conn.rx_context().post_single(BytesMut::zeroed(10), 0).unwrap();

    assert!(matches!(conn.progress_rx().unwrap(), RxProgress::Again));
    assert_eq!(conn.current_rx().map(TransferEntry::rem_len), Some(7));
    assert_eq!(conn.rx_context().pool_stats().in_use, 1);

    assert!(matches!(
        conn.progress_rx(),
        Err(TransferError::NotConnected)
    ));
    assert!(conn.current_rx().is_none());
    assert_eq!(conn.rx_context().pool_stats().in_use, 0);
}

/// 负载尚未写入时取消：条目回到池中，报文头保留，新的请求接收完整负载。
#[test]
fn cancelling_before_payload_keeps_the_header() {
    let bytes = message(b"0123456789", &ExtendedHeader::default());
    let socket = ScriptedSocket::new().chunk(&bytes[..BASE_HEADER_SIZE]);
    let mut conn = connection(socket);
    conn.rx_context().post_single(BytesMut::zeroed(10), 1).unwrap();

    assert!(matches!(conn.progress_rx().unwrap(), RxProgress::Again));
    assert_eq!(conn.current_rx().map(TransferEntry::rem_len), Some(10));
    assert_eq!(conn.cancel_current_rx(), RxCancel::HeaderRetained);
    assert_eq!(conn.cancel_current_rx(), RxCancel::Idle);
    assert_eq!(conn.rx_context().pool_stats().in_use, 0);
    assert!(!conn.is_failed());
    assert_eq!(conn.detect_state(), DetectState::Complete);

    conn.post_recv(vec![BytesMut::zeroed(10)], 2).unwrap();
    conn.socket_mut().push_chunk(&bytes[BASE_HEADER_SIZE..]);
    let done = expect_completion(conn.progress_rx().unwrap());
    assert_eq!(done.context, 2);
    assert_eq!(concat(&done.buffers), b"0123456789");
}

/// 已消费部分负载后取消：连接整体拆除，后续消息不会被错位解析。
#[test]
fn cancelling_mid_payload_tears_the_connection_down() {
    let first = message(b"0123456789", &ExtendedHeader::default());
    let second = message(b"XY", &ExtendedHeader::default());
    let socket = ScriptedSocket::new().chunk(&first[..BASE_HEADER_SIZE + 3]);
    let mut conn = connection(socket);
    conn.rx_context().post_single(BytesMut::zeroed(10), 1).unwrap();

    assert!(matches!(conn.progress_rx().unwrap(), RxProgress::Again));
    assert_eq!(conn.current_rx().map(TransferEntry::rem_len), Some(7));
    assert_eq!(conn.cancel_current_rx(), RxCancel::TornDown);
    assert!(conn.is_failed());
    assert!(conn.current_rx().is_none());
    assert_eq!(conn.detect_state(), DetectState::AwaitingBase);
    assert!(conn.staging().is_empty());
    assert_eq!(conn.rx_context().pool_stats().in_use, 0);

    for context in [2, 3] {
        conn.post_recv(vec![BytesMut::zeroed(10)], context).unwrap();
    }
    conn.socket_mut().push_chunk(&first[BASE_HEADER_SIZE + 3..]);
    conn.socket_mut().push_chunk(&second);
    let calls = conn.socket().recv_calls();
    assert!(matches!(
        conn.progress_rx(),
        Err(TransferError::NotConnected)
    ));
    assert_eq!(conn.socket().recv_calls(), calls, "拆除后不得再读取套接字");
    assert_eq!(conn.rx_context().len(), 2);
}

/// 发送路径：写端断开映射为连接断开，之后的调用不再触碰套接字。
#[test]
fn broken_pipe_on_send_fails_the_connection() {
    let socket = ScriptedSocket::new()
        .accept(3)
        .send_error(std::io::ErrorKind::BrokenPipe);
    let mut conn = connection(socket);
    let mut entry = TransferEntry::for_send(vec![BytesMut::from(&b"payload"[..])], 0, 1);

    assert_eq!(conn.send(&mut entry).unwrap(), Progress::Again);
    assert_eq!(entry.owner(), Some(conn.id()));
    assert!(matches!(
        conn.send(&mut entry),
        Err(TransferError::NotConnected)
    ));
    let calls = conn.socket().send_calls();
    assert!(conn.send(&mut entry).is_err());
    assert_eq!(conn.socket().send_calls(), calls);
}

/// 把 `bytes` 按循环使用的切分长度切成若干分片。
fn partition(bytes: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut rest = bytes;
    let mut sizes = cuts.iter().cycle();
    while !rest.is_empty() {
        let size = sizes.next().copied().unwrap_or(rest.len()).min(rest.len());
        let (head, tail) = rest.split_at(size);
        chunks.push(head.to_vec());
        rest = tail;
    }
    chunks
}

fn extended_header() -> impl Strategy<Value = ExtendedHeader> {
    (proptest::option::of(any::<u64>()), 0u64..=4).prop_map(|(cq_data, count)| {
        ExtendedHeader {
            cq_data,
            ..rma_ext(count)
        }
    })
}

proptest! {
    /// 任意分片重建出的报文头与一次性到达的逐字节一致。
    #[test]
    fn header_reassembly_is_partition_independent(
        ext in extended_header(),
        cuts in proptest::collection::vec(1usize..24, 1..16),
    ) {
        let bytes = message(b"", &ext);
        let mut socket = ScriptedSocket::new();
        for chunk in partition(&bytes, &cuts) {
            socket.push_chunk(&chunk);
        }

        let mut staging = StagingBuffer::new(0);
        let mut detect = RxDetect::new();
        let mut calls = 0;
        loop {
            let mut reader = StagedReader::new(&mut staging, &mut socket);
            if detect.recv_hdr(&mut reader).unwrap() == Progress::Complete {
                break;
            }
            calls += 1;
            prop_assert!(calls <= bytes.len(), "检测没有推进");
        }
        prop_assert_eq!(detect.header_bytes(), &bytes[..]);
        prop_assert_eq!(detect.extended_header().unwrap().unwrap(), ext);
    }

    /// 任意分片、任意暂存容量下，连接交付的负载与发送的一致。
    #[test]
    fn message_delivery_is_partition_independent(
        ext in extended_header(),
        payload in proptest::collection::vec(any::<u8>(), 0..256),
        cuts in proptest::collection::vec(1usize..48, 1..16),
        staging_size in 1usize..64,
    ) {
        let bytes = message(&payload, &ext);
        let mut socket = ScriptedSocket::new();
        for chunk in partition(&bytes, &cuts) {
            socket.push_chunk(&chunk);
        }
        let config = TransportConfig {
            staging_buffer_size: staging_size,
            ..TransportConfig::default()
        };
        let mut conn = Connection::new(socket, &config, None);
        conn.post_recv(
            vec![BytesMut::zeroed(100), BytesMut::zeroed(100), BytesMut::zeroed(56)],
            42,
        )
        .unwrap();

        let mut done = None;
        for _ in 0..=bytes.len() * 2 {
            if let RxProgress::Completed(completion) = conn.progress_rx().unwrap() {
                done = Some(completion);
                break;
            }
        }
        let done = done.expect("消息应在有限次调用内完成");
        prop_assert_eq!(done.len, payload.len());
        prop_assert_eq!(concat(&done.buffers), payload);
        prop_assert_eq!(done.extended, ext);
        prop_assert_eq!(done.context, 42);
    }

    /// 任意读写序列中 `rem_len` 始终等于剩余段长之和。
    #[test]
    fn rem_len_tracks_remaining_segments(
        lens in proptest::collection::vec(0usize..32, 1..6),
        accepts in proptest::collection::vec(0usize..40, 1..32),
    ) {
        let total: usize = lens.iter().sum();
        let mut socket = ScriptedSocket::new();
        for &limit in &accepts {
            socket = socket.accept(limit);
        }
        let bufs = lens.iter().map(|&len| BytesMut::zeroed(len)).collect();
        let mut entry = TransferEntry::for_send(bufs, 0, 0);
        let mut sent = 0;
        for &limit in &accepts {
            let before = entry.rem_len();
            let progress = entry.send(&mut socket).unwrap();
            sent += before - entry.rem_len();
            prop_assert_eq!(entry.rem_len(), entry.remaining_lens().sum::<usize>());
            prop_assert_eq!(entry.rem_len(), total - sent);
            prop_assert!(before - entry.rem_len() <= limit);
            if progress == Progress::Complete {
                break;
            }
        }
        prop_assert_eq!(socket.written().len(), sent);
    }

    /// `off ≤ len ≤ size` 恒成立，`consume` 不超过请求量与剩余量。
    #[test]
    fn staging_cursors_stay_ordered(
        size in 0usize..64,
        arrival in proptest::collection::vec(any::<u8>(), 1..128),
        takes in proptest::collection::vec(0usize..32, 1..16),
    ) {
        let mut socket = ScriptedSocket::new().chunk(&arrival);
        let mut staging = StagingBuffer::new(size);
        if size > 0 {
            staging.refill(&mut socket).unwrap();
        }
        for take in takes {
            let before = staging.remaining();
            let mut dest = vec![0u8; take];
            let copied = staging.consume(&mut dest);
            prop_assert!(copied <= take && copied <= before);
            prop_assert!(staging.offset() <= staging.len());
            prop_assert!(staging.len() <= staging.size());
        }
    }
}

//! `context_limit` 集成测试：进程级共享接收上下文数量上限。
//!
//! 计数器是进程全局状态，本文件只包含一个测试，避免与其他测试二进制共享计数。

use fabric_transport_tcp::{
    Connection, SharedRxContext, TransferError, TransportConfig, live_shared_contexts,
    testing::ScriptedSocket,
};

#[test]
fn creation_beyond_the_limit_is_refused_until_one_is_dropped() {
    let config = TransportConfig {
        max_shared_contexts: 2,
        ..TransportConfig::default()
    };
    assert_eq!(live_shared_contexts(), 0);

    let first = SharedRxContext::new(&config).expect("第一个上下文");
    let second = SharedRxContext::new(&config).expect("第二个上下文");
    assert!(first.is_shared() && second.is_shared());
    assert_eq!(live_shared_contexts(), 2);

    let err = SharedRxContext::new(&config).unwrap_err();
    assert!(matches!(err, TransferError::ContextLimit { limit: 2 }));
    assert_eq!(err.code(), "fabric.transport.tcp.context_limit");
    assert_eq!(live_shared_contexts(), 2, "被拒绝的创建不得占用名额");

    let private = Connection::new(ScriptedSocket::new(), &config, None);
    assert!(!private.rx_context().is_shared());
    assert_eq!(live_shared_contexts(), 2, "连接私有的上下文不计入上限");

    // 仍被连接持有的共享上下文在连接释放前保持计数。
    let bound = Connection::new(ScriptedSocket::new(), &config, Some(second));
    drop(bound);
    assert_eq!(live_shared_contexts(), 1);

    let third = SharedRxContext::new(&config).expect("名额释放后可以再次创建");
    drop((first, third));
    assert_eq!(live_shared_contexts(), 0);
}

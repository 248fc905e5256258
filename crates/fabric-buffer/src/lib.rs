//! `fabric-buffer` 提供传输层条目（Transfer Entry）使用的对象池。
//!
//! # 模块定位（Why）
//! - 接收/发送路径在每次投递请求时都需要一个条目对象，若逐次堆分配会在高频投递下
//!   产生明显抖动；
//! - 池以“块（chunk）”为单位一次性预分配多个对象，耗尽时按块增长，直至调用方设置的上限，
//!   上限触达时返回显式的 [`PoolExhausted`]，绝不阻塞。
//!
//! # 设计概要（How）
//! - [`EntryPool`] 维护一个 `Vec<Box<T>>` 自由链表，租借时弹出、归还时压回；
//! - 归还前调用 [`Reusable::reset`] 清理对象，避免把上一个请求的缓冲泄露给下一个请求；
//! - 池本身不做同步，由持有它的共享上下文用单把锁统一保护。
//!
//! # 命名约定（Consistency）
//! - `alloc`/`release` 与传输层的调用语义一一对应，统计快照沿用 [`PoolStats`] 命名。

mod pool;

pub use pool::{DEFAULT_CHUNK_COUNT, EntryPool, PoolConfig, PoolExhausted, PoolStats, Reusable};

#![feature(io_error_inprogress)]
//! `spark-rpc-core` 汇集 MessagePack-RPC 服务端传输核心中与套接字无关的部分。
//!
//! # 教案背景（Why）
//! - 传输状态机需要四类与 I/O 解耦的能力：可复用对象的租借、接收字节的零拷贝暂存、
//!   能在任意字节处挂起并恢复的请求解码，以及对套接字错误码的三态分类；
//! - 把它们集中在不依赖异步运行时的 crate 中，既便于用 proptest 覆盖分块边界，
//!   也让 TCP 传输 crate 只专注于连接生命周期。
//!
//! # 模块地图（How）
//! - [`pool`]：[`ObjectPool`] 与 RAII [`Lease`]；
//! - [`segment`]：[`SegmentStream`] 分段字节流；
//! - [`context`] / [`pipeline`]：[`RequestContext`] 与可恢复流水线；
//! - [`dispatch`]：[`Dispatcher`] 协作边界与 [`MethodTable`]；
//! - [`fault`]：套接字故障分类；
//! - [`message`]：信封类型与响应打包；
//! - [`error`]：[`CoreError`] 与稳定错误码。

pub mod context;
pub mod dispatch;
pub mod error;
pub mod fault;
pub mod message;
pub mod pipeline;
pub mod pool;
pub mod segment;

pub use crate::context::{DEFAULT_ARGUMENTS_CAPACITY, RequestContext};
pub use crate::dispatch::{ArgumentsReader, Dispatcher, Invocation, MethodTable};
pub use crate::error::{CoreError, ErrorCategory, Result, codes};
pub use crate::fault::{FaultVerdict, SocketErrorCode, classify, classify_io};
pub use crate::message::{MessageType, encode_response};
pub use crate::pipeline::{PipelineOutcome, PipelineStage};
pub use crate::pool::{
    ExhaustionPolicy, Lease, ObjectPool, PoolError, PoolSettings, PoolStats, Poolable,
};
pub use crate::segment::SegmentStream;

pub use spark_codec_msgpack::Value;

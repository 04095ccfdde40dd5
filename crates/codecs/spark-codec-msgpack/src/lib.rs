#![warn(missing_docs)]

//! `spark-codec-msgpack` 提供 RPC 信封所需的流式 MessagePack 编解码能力。
//!
//! # 教案背景（Why）
//! - 服务端传输核心只需要三类编解码原语：“打包一个值”“读取一个标量”“在长度前缀结构上开子读取器”；
//!   本 crate 将这三类原语收敛为一组无状态函数，供 `spark-rpc-core` 的反序列化流水线直接调用；
//! - 读取端以 [`ByteSource`] 抽象数据来源，既可以是接收路径上的分段字节流，也可以是独立的参数缓冲。
//!
//! # 使用概览（How）
//! - 解码：`read_marker`/`read_array_len`/`read_u32`/`read_str_bytes`/`read_value`/`skip_value` 等函数逐元素读取，
//!   数据不足时返回 [`DecodeError::Incomplete`]，调用方据此挂起并在下一次接收完成后重试；
//! - 编码：`write_*` 系列函数写入任意 [`bytes::BufMut`]，始终选择最短编码；
//! - [`Value`] 为动态值模型，供调度器读取参数与回写结果。
//!
//! # 合约说明（What）
//! - 解码函数不会在数据不足时 panic，也不会吞掉已读取字节之外的任何数据；
//!   “回退到元素起点”的职责由数据源（例如分段流的 `seek`）承担；
//! - 嵌套深度受 [`MAX_NESTING_DEPTH`] 约束，超限时返回 [`DecodeError::DepthLimitExceeded`]。

mod decode;
mod encode;
mod error;
mod marker;
mod source;
mod value;

pub use crate::decode::{
    ElementHeader, MAX_NESTING_DEPTH, read_array_len, read_bool, read_element_header, read_i64,
    read_map_len, read_marker, read_nil, read_str, read_str_bytes, read_str_len, read_u32,
    read_u64, read_value, skip_value,
};
pub use crate::encode::{
    write_array_len, write_bin, write_bool, write_ext, write_f32, write_f64, write_map_len,
    write_nil, write_sint, write_str, write_uint, write_value,
};
pub use crate::error::{DecodeError, EncodeError};
pub use crate::marker::Marker;
pub use crate::source::{ByteSource, SliceSource};
pub use crate::value::Value;

use bytes::Bytes;

/// 将单个值编码为独立的字节向量。
pub fn to_vec(value: &Value) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    write_value(&mut out, value)?;
    Ok(out)
}

/// 从完整的字节切片解码单个值。
///
/// 切片不足以构成完整值时返回 [`DecodeError::Incomplete`]；尾部多余字节被忽略。
pub fn from_slice(data: &[u8]) -> Result<Value, DecodeError> {
    let mut source = SliceSource::new(Bytes::copy_from_slice(data));
    read_value(&mut source)
}

use bytes::Bytes;

use crate::error::DecodeError;

/// 解码函数读取字节的来源。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 接收路径上的字节分散在多个段中，参数缓冲则是单段连续内存；
///   解码函数只依赖本 trait，即可在两种来源上复用同一份读取逻辑。
///
/// ## 契约（What）
/// - `take(len)`：成功时返回恰好 `len` 字节并推进游标；
///   可用字节不足时返回 [`DecodeError::Incomplete`]，且**不得**推进游标；
/// - 返回的 [`Bytes`] 可以是零拷贝切片，也可以是合并后的副本，调用方不应假设其来源。
pub trait ByteSource {
    /// 取出恰好 `len` 个字节。
    fn take(&mut self, len: usize) -> Result<Bytes, DecodeError>;

    /// 取出单个字节。
    fn take_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = self.take(1)?;
        byte.first()
            .copied()
            .ok_or(DecodeError::Incomplete { needed: 1 })
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn take(&mut self, len: usize) -> Result<Bytes, DecodeError> {
        (**self).take(len)
    }
}

/// 基于单段 [`Bytes`] 的数据源，常用于已完整接收的参数缓冲。
#[derive(Clone, Debug, Default)]
pub struct SliceSource {
    data: Bytes,
}

impl SliceSource {
    /// 以给定字节构造数据源。
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// 尚未读取的字节数。
    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    /// 取回尚未读取的字节。
    pub fn into_inner(self) -> Bytes {
        self.data
    }
}

impl ByteSource for SliceSource {
    fn take(&mut self, len: usize) -> Result<Bytes, DecodeError> {
        if len > self.data.len() {
            return Err(DecodeError::Incomplete {
                needed: len - self.data.len(),
            });
        }
        Ok(self.data.split_to(len))
    }
}

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use spark_codec_msgpack::{ByteSource, DecodeError};

/// 已接收但尚未完全消费的字节分段序列。
///
/// # 教案式说明
///
/// ## 意图（Why）
/// - 单次套接字读取可能只携带一个元素的一部分，也可能携带多个请求；
///   分段流把每次读取得到的 [`Bytes`] 原样挂在尾部，不做拼接拷贝；
/// - 读取游标可以回退到任意保留位置，流水线据此在数据不足时重放被截断的元素。
///
/// ## 逻辑（How）
/// - `segments` 为 `VecDeque<Bytes>`，前端淘汰为 O(1)；
/// - 游标由 `(segment_index, segment_offset)` 与线性位置 `position` 共同描述；
/// - [`SegmentStream::truncate_consumed`] 丢弃游标之前的全部字节，并将游标重新归一到新的段边界。
///
/// ## 契约（What）
/// - 位置均相对于当前保留的首字节；截断后 `position()` 归零，`length()` 同步缩减；
/// - `read(n)` 在段内为零拷贝切片，跨段时执行一次合并拷贝；
/// - 数据不足时返回 [`DecodeError::Incomplete`]，游标保持不变。
#[derive(Debug, Default)]
pub struct SegmentStream {
    segments: VecDeque<Bytes>,
    segment_index: usize,
    segment_offset: usize,
    position: usize,
    length: usize,
}

impl SegmentStream {
    /// 创建空流。
    pub fn new() -> Self {
        Self::default()
    }

    /// 在尾部追加新接收的字节；空段被忽略。
    pub fn append(&mut self, segment: Bytes) {
        if segment.is_empty() {
            return;
        }
        self.length += segment.len();
        self.segments.push_back(segment);
    }

    /// 读取恰好 `n` 个字节并推进游标。
    pub fn read(&mut self, n: usize) -> Result<Bytes, DecodeError> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(DecodeError::Incomplete {
                needed: n - remaining,
            });
        }
        if n == 0 {
            return Ok(Bytes::new());
        }

        let head = &self.segments[self.segment_index];
        let available = head.len() - self.segment_offset;
        let view = if n <= available {
            head.slice(self.segment_offset..self.segment_offset + n)
        } else {
            let mut merged = BytesMut::with_capacity(n);
            let mut index = self.segment_index;
            let mut offset = self.segment_offset;
            while merged.len() < n {
                let segment = &self.segments[index];
                let take = (segment.len() - offset).min(n - merged.len());
                merged.extend_from_slice(&segment[offset..offset + take]);
                index += 1;
                offset = 0;
            }
            merged.freeze()
        };
        self.advance(n);
        Ok(view)
    }

    /// 当前游标相对于保留首字节的位置。
    pub fn position(&self) -> usize {
        self.position
    }

    /// 保留的字节总数。
    pub fn length(&self) -> usize {
        self.length
    }

    /// 游标之后尚未读取的字节数。
    pub fn remaining(&self) -> usize {
        self.length - self.position
    }

    /// 保留的段数。
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// 将游标移动到保留范围内的 `position`；越界时夹到末尾。
    pub fn seek(&mut self, position: usize) {
        let target = position.min(self.length);
        self.segment_index = 0;
        self.segment_offset = 0;
        self.position = 0;
        self.advance(target);
    }

    /// 丢弃游标之前的全部字节，返回被回收的字节数。
    ///
    /// 完全落在游标之前的段整体出队；游标所在段被前移裁剪，仍共享底层缓冲。
    pub fn truncate_consumed(&mut self) -> usize {
        let consumed = self.position;
        if consumed == 0 {
            return 0;
        }
        self.segments.drain(..self.segment_index);
        if let Some(front) = self.segments.front_mut() {
            front.advance(self.segment_offset);
            if front.is_empty() {
                self.segments.pop_front();
            }
        }
        self.segment_index = 0;
        self.segment_offset = 0;
        self.position = 0;
        self.length -= consumed;
        consumed
    }

    /// 移出游标之后的全部字节，形成新的独立流；本流随后为空。
    ///
    /// 用于在请求上下文重置前保存属于下一条流水线请求的字节。
    pub fn take_unconsumed(&mut self) -> SegmentStream {
        self.truncate_consumed();
        std::mem::take(self)
    }

    /// 清空全部段与游标。
    pub fn clear(&mut self) {
        self.segments.clear();
        self.segment_index = 0;
        self.segment_offset = 0;
        self.position = 0;
        self.length = 0;
    }

    fn advance(&mut self, mut n: usize) {
        self.position += n;
        while n > 0 {
            let available = self.segments[self.segment_index].len() - self.segment_offset;
            if n < available {
                self.segment_offset += n;
                return;
            }
            n -= available;
            self.segment_index += 1;
            self.segment_offset = 0;
        }
    }
}

impl ByteSource for SegmentStream {
    fn take(&mut self, len: usize) -> Result<Bytes, DecodeError> {
        self.read(len)
    }
}

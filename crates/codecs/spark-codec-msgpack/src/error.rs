use thiserror::Error;

/// 解码阶段的失败类型。
///
/// # 教案式说明
/// - **意图（Why）**：把“数据不足”与“数据非法”区分开。前者是流式读取的正常挂起信号，
///   后者才是协议违规；调用方通过 [`DecodeError::is_incomplete`] 分流；
/// - **契约（What）**：`Incomplete::needed` 为至少还需要的字节数，是下限而非精确值，
///   嵌套结构内部的缺口只反映当前元素。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// 可用字节不足以完成当前元素。
    #[error("insufficient data: at least {needed} more byte(s) required")]
    Incomplete {
        /// 仍缺少的字节数下限。
        needed: usize,
    },
    /// 遇到规范保留的标记字节。
    #[error("marker 0x{0:02x} is reserved and never valid")]
    InvalidMarker(u8),
    /// 类型族与预期不符。
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// 期望的类型族。
        expected: &'static str,
        /// 实际读取到的类型族。
        found: &'static str,
    },
    /// 字符串负载不是合法的 UTF-8。
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,
    /// 嵌套深度超过上限。
    #[error("nesting depth exceeds the limit of {limit}")]
    DepthLimitExceeded {
        /// 生效的深度上限。
        limit: usize,
    },
    /// 整数超出目标类型的取值范围。
    #[error("integer does not fit into {target}")]
    IntegerOverflow {
        /// 目标类型名称。
        target: &'static str,
    },
}

impl DecodeError {
    /// 是否为“数据不足”挂起信号。
    pub fn is_incomplete(&self) -> bool {
        matches!(self, DecodeError::Incomplete { .. })
    }
}

/// 编码阶段的失败类型。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// 长度超出 MessagePack 32 位长度前缀的表示范围。
    #[error("{kind} length {len} exceeds the 32-bit MessagePack limit")]
    LengthOverflow {
        /// 出错的结构类型。
        kind: &'static str,
        /// 实际长度。
        len: usize,
    },
}

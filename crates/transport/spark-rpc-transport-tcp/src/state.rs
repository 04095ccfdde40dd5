use spark_rpc_core::{CoreError, PipelineStage};

use crate::error::invalid_transition;

/// 单条连接的处理状态。
///
/// ```text
/// Uninitialized → Accepting → Receiving → Parsing(stage) → Dispatching → Sending
///                                 ↑            │                │            │
///                                 └────────────┴────────────────┴────────────┘
///                        任意已分配状态 ──→ Closing ──(归还池中)──→ Uninitialized
/// ```
///
/// - `Parsing` 携带流水线下一步阶段，便于日志定位挂起点；
/// - `Closing` 对套接字是终态；`Uninitialized` 对归还池中、等待再分配的实例是终态。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransportState {
    #[default]
    Uninitialized,
    Accepting,
    Receiving,
    Parsing(PipelineStage),
    Dispatching,
    Sending,
    Closing,
}

impl TransportState {
    /// 判断 `self → next` 是否为合法迁移。
    pub fn can_transition_to(self, next: TransportState) -> bool {
        use TransportState::*;
        match (self, next) {
            (Uninitialized, Accepting) => true,
            (Accepting, Receiving) => true,
            (Receiving, Parsing(_)) => true,
            (Parsing(_), Parsing(_) | Receiving | Dispatching | Sending) => true,
            (Dispatching, Sending | Receiving) => true,
            (Sending, Receiving) => true,
            (Uninitialized | Closing, Closing) => false,
            (_, Closing) => true,
            _ => false,
        }
    }

    /// 校验并返回下一状态。
    pub(crate) fn advance(self, next: TransportState) -> Result<TransportState, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(invalid_transition(self, next))
        }
    }
}

use std::borrow::Cow;
use std::io;

use spark_rpc_core::{CoreError, ErrorCategory, FaultVerdict, classify_io, codes};

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "spark.rpc.transport.bind_failed",
    message: "tcp bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "spark.rpc.transport.accept_failed",
    message: "tcp accept",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "spark.rpc.transport.read_failed",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "spark.rpc.transport.write_failed",
    message: "tcp write",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "spark.rpc.transport.configure_failed",
    message: "tcp configure",
};

/// 将 IO 错误映射为 [`CoreError`]，分类取自套接字故障分类器。
///
/// - `Fatal` → [`ErrorCategory::SocketFatal`]；
/// - `Benign` → [`ErrorCategory::Transient`]；
/// - `Ignorable` → [`ErrorCategory::Ignorable`]。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> CoreError {
    let category = match classify_io(&error) {
        FaultVerdict::Fatal => ErrorCategory::SocketFatal,
        FaultVerdict::Benign => ErrorCategory::Transient,
        FaultVerdict::Ignorable => ErrorCategory::Ignorable,
    };
    CoreError::new(
        kind.code,
        Cow::Owned(format!("{}: {}", kind.message, error)),
    )
    .with_category(category)
    .with_cause(error)
}

/// 状态机收到非法迁移请求。
pub(crate) fn invalid_transition(from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> CoreError {
    CoreError::new(
        codes::INVALID_TRANSITION,
        format!("transport cannot move from {from:?} to {to:?}"),
    )
}

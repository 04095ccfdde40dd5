//! 套接字故障分类。
//!
//! # 教案背景（Why）
//! - 异步完成式 I/O 会把“操作仍在进行”“操作被我方中止”之类的 API 过渡状态也以错误码形式上报；
//!   这些状态既不是成功也不是失败，若以布尔值表达会迫使调用方在两种错误之间二选一；
//! - 本模块以三态 [`FaultVerdict`] 取代可空布尔，让传输状态机对每个错误码只做一次纯函数查表。

use std::io;

/// 底层套接字错误码。
///
/// 覆盖完成式 API 可能上报的状态码；`Other` 承载无法归入其他变体的 [`io::ErrorKind`]。
/// 从 [`io::Error`] 转换时先看原始 OS 错误码，再回退到 [`io::ErrorKind`]；
/// `Disconnecting` 与 `IoPending` 只有 Windows 会上报。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketErrorCode {
    Success,
    AlreadyInProgress,
    Disconnecting,
    IsConnected,
    Shutdown,
    InProgress,
    Interrupted,
    IoPending,
    OperationAborted,
    WouldBlock,
    ConnectionReset,
    ConnectionAborted,
    ConnectionRefused,
    BrokenPipe,
    NotConnected,
    TimedOut,
    AddressInUse,
    UnexpectedEof,
    Other(io::ErrorKind),
}

impl SocketErrorCode {
    /// 识别与完成式 API 语义相关的原始 OS 错误码；其余返回 `None`。
    pub fn from_raw_os_error(code: i32) -> Option<Self> {
        if code == 0 {
            return Some(SocketErrorCode::Success);
        }
        os::classify_raw(code)
    }
}

impl From<&io::Error> for SocketErrorCode {
    fn from(error: &io::Error) -> Self {
        error
            .raw_os_error()
            .and_then(SocketErrorCode::from_raw_os_error)
            .unwrap_or_else(|| SocketErrorCode::from(error.kind()))
    }
}

impl From<io::ErrorKind> for SocketErrorCode {
    fn from(kind: io::ErrorKind) -> Self {
        use io::ErrorKind;
        match kind {
            ErrorKind::WouldBlock => SocketErrorCode::WouldBlock,
            ErrorKind::Interrupted => SocketErrorCode::Interrupted,
            ErrorKind::InProgress => SocketErrorCode::InProgress,
            ErrorKind::ConnectionReset => SocketErrorCode::ConnectionReset,
            ErrorKind::ConnectionAborted => SocketErrorCode::ConnectionAborted,
            ErrorKind::ConnectionRefused => SocketErrorCode::ConnectionRefused,
            ErrorKind::BrokenPipe => SocketErrorCode::BrokenPipe,
            ErrorKind::NotConnected => SocketErrorCode::NotConnected,
            ErrorKind::TimedOut => SocketErrorCode::TimedOut,
            ErrorKind::AddrInUse => SocketErrorCode::AddressInUse,
            ErrorKind::UnexpectedEof => SocketErrorCode::UnexpectedEof,
            other => SocketErrorCode::Other(other),
        }
    }
}

#[cfg(unix)]
mod os {
    use super::SocketErrorCode;

    pub(super) fn classify_raw(code: i32) -> Option<SocketErrorCode> {
        let mapped = match code {
            libc::EALREADY => SocketErrorCode::AlreadyInProgress,
            libc::EISCONN => SocketErrorCode::IsConnected,
            libc::ESHUTDOWN => SocketErrorCode::Shutdown,
            libc::EINPROGRESS => SocketErrorCode::InProgress,
            libc::EINTR => SocketErrorCode::Interrupted,
            libc::ECANCELED => SocketErrorCode::OperationAborted,
            code if code == libc::EAGAIN || code == libc::EWOULDBLOCK => {
                SocketErrorCode::WouldBlock
            }
            _ => return None,
        };
        Some(mapped)
    }
}

#[cfg(windows)]
mod os {
    use super::SocketErrorCode;

    const ERROR_OPERATION_ABORTED: i32 = 995;
    const ERROR_IO_PENDING: i32 = 997;
    const WSAEINTR: i32 = 10004;
    const WSAEWOULDBLOCK: i32 = 10035;
    const WSAEINPROGRESS: i32 = 10036;
    const WSAEALREADY: i32 = 10037;
    const WSAEISCONN: i32 = 10056;
    const WSAESHUTDOWN: i32 = 10058;
    const WSAEDISCON: i32 = 10101;

    pub(super) fn classify_raw(code: i32) -> Option<SocketErrorCode> {
        let mapped = match code {
            WSAEALREADY => SocketErrorCode::AlreadyInProgress,
            WSAEDISCON => SocketErrorCode::Disconnecting,
            WSAEISCONN => SocketErrorCode::IsConnected,
            WSAESHUTDOWN => SocketErrorCode::Shutdown,
            WSAEINPROGRESS => SocketErrorCode::InProgress,
            WSAEINTR => SocketErrorCode::Interrupted,
            ERROR_IO_PENDING => SocketErrorCode::IoPending,
            ERROR_OPERATION_ABORTED => SocketErrorCode::OperationAborted,
            WSAEWOULDBLOCK => SocketErrorCode::WouldBlock,
            _ => return None,
        };
        Some(mapped)
    }
}

#[cfg(not(any(unix, windows)))]
mod os {
    use super::SocketErrorCode;

    pub(super) fn classify_raw(_code: i32) -> Option<SocketErrorCode> {
        None
    }
}

/// 故障处置结论。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultVerdict {
    /// 操作语义类状态码：不记录、不中止，视为当前操作结束。
    Ignorable,
    /// 预期内的过渡状态：继续正常处理，不产生故障。
    Benign,
    /// 中止当前连接的处理周期并释放资源，不在该套接字上重试。
    Fatal,
}

/// 将套接字错误码映射为处置结论。
///
/// # 契约（What）
/// - `AlreadyInProgress`、`Disconnecting`、`IsConnected`、`Shutdown` → [`FaultVerdict::Ignorable`]；
/// - `InProgress`、`Interrupted`、`IoPending`、`OperationAborted`、`Success`、`WouldBlock`
///   → [`FaultVerdict::Benign`]；
/// - 其余一律 → [`FaultVerdict::Fatal`]。
pub fn classify(code: SocketErrorCode) -> FaultVerdict {
    match code {
        SocketErrorCode::AlreadyInProgress
        | SocketErrorCode::Disconnecting
        | SocketErrorCode::IsConnected
        | SocketErrorCode::Shutdown => FaultVerdict::Ignorable,
        SocketErrorCode::InProgress
        | SocketErrorCode::Interrupted
        | SocketErrorCode::IoPending
        | SocketErrorCode::OperationAborted
        | SocketErrorCode::Success
        | SocketErrorCode::WouldBlock => FaultVerdict::Benign,
        _ => FaultVerdict::Fatal,
    }
}

/// 对 [`io::Error`] 直接分类。
pub fn classify_io(error: &io::Error) -> FaultVerdict {
    classify(SocketErrorCode::from(error))
}

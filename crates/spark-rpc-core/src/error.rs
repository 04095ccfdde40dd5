use std::borrow::Cow;
use std::error::Error;
use std::fmt;

use spark_codec_msgpack::Value;

/// `CoreError` 表示 RPC 服务端核心跨层共享的稳定错误域。
///
/// # 设计背景（Why）
/// - 流水线、对象池、传输状态机在不同层次产生的故障需要合流为统一的错误码，
///   才能让日志与响应信封使用同一份机读语义；
/// - 处置策略（丢弃当前消息、断开连接、视为编程错误）由 [`ErrorCategory`] 表达，
///   调用方无需解析字符串即可分流。
///
/// # 逻辑解析（How）
/// - 错误码 `code` 始终为 `'static` 字符串，遵循 `<域>.<语义>` 约定，见 [`codes`]；
/// - 分类可显式设置；未设置时按错误码查表得到默认分类。
///
/// # 契约说明（What）
/// - 构造后的错误可安全跨线程移动（`Send + Sync + 'static`）；
/// - [`CoreError::to_wire_value`] 生成写入响应信封 `error` 槽位的映射值。
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<ErrorCause>,
    category: Option<ErrorCategory>,
}

/// `ErrorCause` 封装底层原因，保持 `Send + Sync` 以方便跨线程传递。
pub type ErrorCause = Box<dyn Error + Send + Sync + 'static>;

/// 核心层统一的返回值别名。
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

impl CoreError {
    /// 构造核心错误。
    ///
    /// # 契约定义（What）
    /// - `code`：取自 [`codes`] 的稳定错误码；
    /// - `message`：面向排障人员的描述，可为静态字符串或堆分配字符串；
    /// - 返回的错误不含底层原因，分类按错误码默认推导。
    ///
    /// # 示例（Examples）
    /// ```rust
    /// use spark_rpc_core::error::{CoreError, ErrorCategory, codes};
    ///
    /// let err = CoreError::new(codes::PROTOCOL_VIOLATION, "envelope arity mismatch");
    /// assert_eq!(err.code(), codes::PROTOCOL_VIOLATION);
    /// assert_eq!(err.category(), ErrorCategory::ProtocolViolation);
    /// ```
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            category: None,
        }
    }

    /// 附带底层原因并返回新的核心错误。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 显式标记结构化分类，覆盖按错误码推导的默认值。
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// 获取结构化错误分类。
    ///
    /// # 执行逻辑（How）
    /// 1. 优先返回显式设置的分类；
    /// 2. 否则按错误码查表；
    /// 3. 查表失败时回退为 [`ErrorCategory::NonRetryable`]。
    pub fn category(&self) -> ErrorCategory {
        self.category
            .or_else(|| default_category(self.code))
            .unwrap_or(ErrorCategory::NonRetryable)
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取底层原因。
    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 转换为响应信封中的错误值 `{"code": ..., "message": ...}`。
    pub fn to_wire_value(&self) -> Value {
        error_value(self.code, self.message())
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|boxed| boxed.as_ref() as &(dyn Error + 'static))
    }
}

/// 构造写入响应信封的错误映射值。
pub fn error_value(code: &str, message: &str) -> Value {
    Value::Map(vec![
        (Value::from("code"), Value::from(code)),
        (Value::from("message"), Value::from(message)),
    ])
}

/// 错误分类枚举，驱动传输层的处置策略。
///
/// # 契约说明（What）
/// - `ProtocolViolation`：信封格式错误；错误码为 `violation` 时仅中止当前消息，
///   为 `unrecoverable` 时连接失去帧同步，必须关闭；
/// - `SocketFatal`：套接字致命故障，中止连接且不发送响应；
/// - `Transient`：异步完成 API 的过渡状态，继续处理即可；
/// - `Ignorable`：操作语义类状态码，不记录、不中止；
/// - `PoolMisuse`：对象池使用错误，属于编程缺陷，不重试；
/// - `ResourceExhausted`：有界对象池耗尽或等待超时；
/// - `Dispatch`：调度器报告的调用失败，写入响应信封的 `error` 槽位；
/// - `InvalidState`：状态机收到非法迁移请求；
/// - `Configuration`：配置加载或校验失败；
/// - `NonRetryable`：未登记错误码的兜底分类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    ProtocolViolation,
    SocketFatal,
    Transient,
    Ignorable,
    PoolMisuse,
    ResourceExhausted,
    Dispatch,
    InvalidState,
    Configuration,
    NonRetryable,
}

fn default_category(code: &str) -> Option<ErrorCategory> {
    let category = match code {
        codes::PROTOCOL_VIOLATION | codes::PROTOCOL_UNRECOVERABLE => {
            ErrorCategory::ProtocolViolation
        }
        codes::SOCKET_FATAL => ErrorCategory::SocketFatal,
        codes::POOL_MISUSE => ErrorCategory::PoolMisuse,
        codes::POOL_EXHAUSTED => ErrorCategory::ResourceExhausted,
        codes::DISPATCH_NO_SUCH_METHOD
        | codes::DISPATCH_INVALID_ARGUMENTS
        | codes::DISPATCH_UNENCODABLE_RESULT => ErrorCategory::Dispatch,
        codes::INVALID_TRANSITION => ErrorCategory::InvalidState,
        codes::CONFIG_INVALID | codes::CONFIG_UNKNOWN_SERVICE => ErrorCategory::Configuration,
        _ => return None,
    };
    Some(category)
}

/// 稳定错误码集合。
///
/// # 设计背景（Why）
/// - 错误码会出现在日志与发往客户端的响应信封中，一经发布即不可更改；
/// - 遵循 `spark.rpc.<领域>.<语义>` 命名，方便跨组件检索。
pub mod codes {
    /// 单条消息的信封格式错误（元数个数、类型标签、方法名类型）。
    pub const PROTOCOL_VIOLATION: &str = "spark.rpc.protocol.violation";
    /// 外层值不是数组等导致帧同步丢失的格式错误。
    pub const PROTOCOL_UNRECOVERABLE: &str = "spark.rpc.protocol.unrecoverable";
    /// 套接字致命故障。
    pub const SOCKET_FATAL: &str = "spark.rpc.transport.socket_fatal";
    /// 对象池误用。
    pub const POOL_MISUSE: &str = "spark.rpc.pool.misuse";
    /// 有界对象池耗尽。
    pub const POOL_EXHAUSTED: &str = "spark.rpc.pool.exhausted";
    /// 调度器未找到方法。
    pub const DISPATCH_NO_SUCH_METHOD: &str = "spark.rpc.dispatch.no_such_method";
    /// 参数与方法签名不匹配。
    pub const DISPATCH_INVALID_ARGUMENTS: &str = "spark.rpc.dispatch.invalid_arguments";
    /// 调度结果无法编码进响应信封。
    pub const DISPATCH_UNENCODABLE_RESULT: &str = "spark.rpc.dispatch.unencodable_result";
    /// 传输状态机非法迁移。
    pub const INVALID_TRANSITION: &str = "spark.rpc.transport.invalid_transition";
    /// 配置非法。
    pub const CONFIG_INVALID: &str = "spark.rpc.config.invalid";
    /// 服务描述文件引用了未注册的服务。
    pub const CONFIG_UNKNOWN_SERVICE: &str = "spark.rpc.config.unknown_service";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_category_overrides_code_default() {
        let err = CoreError::new(codes::POOL_MISUSE, "foreign lease");
        assert_eq!(err.category(), ErrorCategory::PoolMisuse);
        let err = err.with_category(ErrorCategory::InvalidState);
        assert_eq!(err.category(), ErrorCategory::InvalidState);
        let unknown = CoreError::new("spark.rpc.custom", "x");
        assert_eq!(unknown.category(), ErrorCategory::NonRetryable);
    }

    #[test]
    fn wire_value_carries_code_and_message() {
        let err = CoreError::new(codes::DISPATCH_NO_SUCH_METHOD, "no method `nope`");
        let value = err.to_wire_value();
        assert_eq!(
            value.get("code").and_then(Value::as_str),
            Some(codes::DISPATCH_NO_SUCH_METHOD)
        );
        assert_eq!(
            value.get("message").and_then(Value::as_str),
            Some("no method `nope`")
        );
        assert_eq!(err.to_string(), "[spark.rpc.dispatch.no_such_method] no method `nope`");
    }
}

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use spark_codec_msgpack::{DecodeError, SliceSource, Value, read_value};

use crate::error::{codes, error_value};
use crate::message::MessageType;

/// 调度器看到的一次调用。
///
/// # 契约（What）
/// - `method_name` 借用自请求上下文，仅在本次调度期间有效；
/// - `message_id` 仅对 `Request` 存在；
/// - `arguments` 是独立于接收缓冲的参数流，可按方法签名逐个读取。
#[derive(Debug)]
pub struct Invocation<'a> {
    method_name: &'a str,
    message_type: MessageType,
    message_id: Option<u32>,
    arguments: ArgumentsReader,
}

impl<'a> Invocation<'a> {
    /// 组装一次调用。
    pub fn new(
        method_name: &'a str,
        message_type: MessageType,
        message_id: Option<u32>,
        arguments: ArgumentsReader,
    ) -> Self {
        Self {
            method_name,
            message_type,
            message_id,
            arguments,
        }
    }

    /// 方法名。
    pub fn method_name(&self) -> &'a str {
        self.method_name
    }

    /// 消息类型。
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// 请求 ID；通知为 `None`。
    pub fn message_id(&self) -> Option<u32> {
        self.message_id
    }

    /// 可变访问参数流。
    pub fn arguments(&mut self) -> &mut ArgumentsReader {
        &mut self.arguments
    }

    /// 取走参数流。
    pub fn into_arguments(self) -> ArgumentsReader {
        self.arguments
    }
}

/// 已隔离参数缓冲上的顺序读取器。
///
/// 参数在拷贝阶段被逐个重新打包进独立缓冲；读取器持有该缓冲的只读视图与声明个数，
/// 不再触及接收路径上的分段流。
#[derive(Debug, Default)]
pub struct ArgumentsReader {
    source: SliceSource,
    remaining: u32,
}

impl ArgumentsReader {
    /// 以打包好的参数字节与个数构造读取器。
    pub fn new(packed: Bytes, count: u32) -> Self {
        Self {
            source: SliceSource::new(packed),
            remaining: count,
        }
    }

    /// 尚未读取的参数个数。
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// 读取下一个参数；读完后返回 `Ok(None)`。
    pub fn next_value(&mut self) -> Result<Option<Value>, DecodeError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let value = read_value(&mut self.source)?;
        self.remaining -= 1;
        Ok(Some(value))
    }

    /// 读取全部剩余参数。
    pub fn collect_values(mut self) -> Result<Vec<Value>, DecodeError> {
        let mut values = Vec::with_capacity(self.remaining as usize);
        while let Some(value) = self.next_value()? {
            values.push(value);
        }
        Ok(values)
    }
}

/// 外部调度协作方：根据方法名与参数产生结果值或错误值。
///
/// # 教案式说明
/// - **意图（Why）**：传输核心只关心“交出调用、拿回结果”，方法表的组织方式由宿主决定；
/// - **契约（What）**：`Ok(value)` 写入响应的 `result` 槽位，`Err(value)` 写入 `error` 槽位；
///   通知类型的调用同样会被调度，但其返回值被丢弃。
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    /// 执行一次调用。
    async fn dispatch(&self, invocation: Invocation<'_>) -> Result<Value, Value>;
}

#[async_trait]
impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    async fn dispatch(&self, invocation: Invocation<'_>) -> Result<Value, Value> {
        (**self).dispatch(invocation).await
    }
}

type Handler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, Value>> + Send + Sync>;

/// 以方法名索引的处理器表。
#[derive(Clone, Default)]
pub struct MethodTable {
    handlers: HashMap<String, Handler>,
}

impl MethodTable {
    /// 创建空表。
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器；同名处理器会被替换。
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Value>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args| Box::pin(handler(args)));
        self.handlers.insert(name.into(), handler);
        self
    }

    /// 是否已注册该方法。
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// 已注册方法名。
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl Dispatcher for MethodTable {
    async fn dispatch(&self, invocation: Invocation<'_>) -> Result<Value, Value> {
        let name = invocation.method_name();
        let Some(handler) = self.handlers.get(name).cloned() else {
            return Err(error_value(
                codes::DISPATCH_NO_SUCH_METHOD,
                &format!("no method named `{name}`"),
            ));
        };
        let arguments = invocation.into_arguments().collect_values().map_err(|err| {
            error_value(codes::DISPATCH_INVALID_ARGUMENTS, &err.to_string())
        })?;
        handler(arguments).await
    }
}

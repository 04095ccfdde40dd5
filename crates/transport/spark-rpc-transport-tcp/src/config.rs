use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use spark_rpc_core::{CoreError, DEFAULT_ARGUMENTS_CAPACITY, PoolSettings, codes};
use thiserror::Error;

/// 一条连接在首个响应之后的去向。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionReuse {
    /// 发送响应后在同一套接字上继续接收下一个请求。
    #[default]
    KeepAlive,
    /// 发送首个响应后关闭套接字（单次请求/响应语义）。
    OneShot,
}

/// 服务端传输配置。
///
/// # 教案式说明
///
/// ## 意图（Why）
/// - 监听端点、接受并发下限与三个对象池的增长策略都属于部署期决策，
///   以 TOML 文件承载，运维无需重新编译即可调整；
/// - 连接复用方式作为显式开关，两种语义（长连接流水请求、单次请求即关闭）都可选择。
///
/// ## 契约（What）
/// - 未出现的字段取 [`Default`] 中的值，未知字段会被拒绝；
/// - 构造后应调用 [`ServerConfig::validate`]，[`TransportManager::start`](crate::TransportManager::start)
///   会再次校验。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub binding_endpoint: SocketAddr,
    pub listen_backlog: u32,
    pub minimum_concurrency: usize,
    pub receive_buffer_size: usize,
    pub arguments_buffer_capacity: usize,
    pub connection_reuse: ConnectionReuse,
    pub tcp_nodelay: bool,
    /// `SO_LINGER` 超时（毫秒）；`None` 表示沿用内核默认行为。
    pub linger_ms: Option<u64>,
    /// 关闭时等待在途连接排空的上限（毫秒）。
    pub shutdown_grace_ms: u64,
    pub transport_pool: PoolSettings,
    pub accept_context_pool: PoolSettings,
    pub request_context_pool: PoolSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binding_endpoint: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            listen_backlog: 128,
            minimum_concurrency: 4,
            receive_buffer_size: 8192,
            arguments_buffer_capacity: DEFAULT_ARGUMENTS_CAPACITY,
            connection_reuse: ConnectionReuse::KeepAlive,
            tcp_nodelay: true,
            linger_ms: None,
            shutdown_grace_ms: 5_000,
            transport_pool: PoolSettings::default(),
            accept_context_pool: PoolSettings::default(),
            request_context_pool: PoolSettings::default(),
        }
    }
}

/// 配置加载或校验失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config field `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl From<ConfigError> for CoreError {
    fn from(error: ConfigError) -> Self {
        CoreError::new(codes::CONFIG_INVALID, error.to_string()).with_cause(error)
    }
}

impl ServerConfig {
    /// 从 TOML 文本解析并校验配置。
    ///
    /// ```rust
    /// use spark_rpc_transport_tcp::{ConnectionReuse, ServerConfig};
    ///
    /// let config = ServerConfig::from_toml_str(
    ///     r#"
    ///     binding_endpoint = "127.0.0.1:7000"
    ///     connection_reuse = "one-shot"
    ///     "#,
    /// )
    /// .expect("配置应合法");
    /// assert_eq!(config.connection_reuse, ConnectionReuse::OneShot);
    /// assert_eq!(config.minimum_concurrency, 4);
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 读取 TOML 文件并校验配置。
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 校验字段之间的约束。
    ///
    /// 拒绝 `minimum_concurrency == 0`、`listen_backlog == 0`、`receive_buffer_size == 0`，
    /// 以及容量低于 `minimum_concurrency` 的有界接受上下文池（否则接受循环无法保持下限）。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.minimum_concurrency == 0 {
            return Err(invalid("minimum_concurrency", "must be at least 1"));
        }
        if self.listen_backlog == 0 {
            return Err(invalid("listen_backlog", "must be at least 1"));
        }
        if i32::try_from(self.listen_backlog).is_err() {
            return Err(invalid("listen_backlog", "exceeds the platform limit"));
        }
        if self.receive_buffer_size == 0 {
            return Err(invalid("receive_buffer_size", "must be at least 1"));
        }
        if let Some(capacity) = self.accept_context_pool.capacity
            && capacity < self.minimum_concurrency
        {
            return Err(invalid(
                "accept_context_pool.capacity",
                format!(
                    "{capacity} is below minimum_concurrency {}",
                    self.minimum_concurrency
                ),
            ));
        }
        for (field, pool) in [
            ("transport_pool.capacity", &self.transport_pool),
            ("accept_context_pool.capacity", &self.accept_context_pool),
            ("request_context_pool.capacity", &self.request_context_pool),
        ] {
            if pool.capacity == Some(0) {
                return Err(invalid(field, "must be at least 1 when bounded"));
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

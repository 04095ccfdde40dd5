#![doc = r#"
# spark-rpc-transport-tcp

## 设计动机（Why）
- **定位**：在 Tokio 运行时上实现 MessagePack-RPC 服务端的连接层：监听与接受、
  单连接状态机、请求/响应周期的串行驱动，以及部署期配置与服务定位；
- **架构角色**：解码、对象池与故障分类全部来自 `spark-rpc-core`，本 crate 只负责把
  套接字事件接到这些能力上；
- **设计理念**：所有可复用对象（传输实例、接受上下文、请求上下文）都从对象池租用，
  任何退出路径（正常结束、故障、关闭信号）都经由租约释放归还。

## 核心契约（What）
- [`TransportManager::start`] 绑定端点并保持 `minimum_concurrency` 个在途接受；
- 每条连接按 `接收 → 解析 → 调度 → 发送` 串行推进，请求得到 `[1, id, error, result]` 响应，
  通知不产生响应；
- 单条消息的信封错误只中止该消息，连接保持可用；套接字致命故障与帧同步丢失会关闭连接；
- [`TransportManager::shutdown`] 停止接受、排空连接并释放对象池。

## 实现策略（How）
- 监听套接字由 `socket2` 创建后交给 Tokio；
- 读取先尝试 `try_read_buf`（同步完成），未就绪再等待可读事件（异步完成），两条路径进入同一处理函数；
- 关闭信号经 `tokio::sync::watch` 广播，在途连接数由原子计数与 `Notify` 追踪。

## 风险与考量（Trade-offs）
- 对象池的阻塞策略在 `spawn_blocking` 中等待，极端情况下会占用阻塞线程池；
- 连接复用方式由 [`ConnectionReuse`] 配置，单次模式下每个响应后都要重新建连。
"#]

mod accept;
mod config;
mod error;
mod locator;
mod manager;
mod state;
mod transport;

pub use accept::AcceptContext;
pub use config::{ConfigError, ConnectionReuse, ServerConfig};
pub use locator::{
    FileServiceLocator, LocatorError, ServiceCatalog, ServiceDescription, parse_service_directive,
};
pub use manager::TransportManager;
pub use state::TransportState;
pub use transport::Transport;

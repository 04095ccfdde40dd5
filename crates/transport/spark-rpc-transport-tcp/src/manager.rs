use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use spark_rpc_core::{
    CoreError, Dispatcher, ExhaustionPolicy, FaultVerdict, Lease, ObjectPool, PoolStats,
    Poolable, RequestContext, classify_io, codes,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::accept::AcceptContext;
use crate::config::ServerConfig;
use crate::error::{self, map_io_error};
use crate::transport::{Transport, run_connection};

/// 致命接受故障后重新发起接受前的退避时长。
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// 接受者任务与连接任务共享的服务端状态。
pub(crate) struct ServerShared {
    pub(crate) config: ServerConfig,
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
    pub(crate) transports: ObjectPool<Transport>,
    pub(crate) accept_contexts: ObjectPool<AcceptContext>,
    pub(crate) request_contexts: ObjectPool<RequestContext>,
    shutdown: watch::Receiver<bool>,
    active: AtomicUsize,
    drained: Notify,
    next_transport_id: AtomicU64,
}

impl ServerShared {
    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }

    fn connection_finished(&self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// 把已接受的套接字交给新连接任务；接受者随即返回继续接受。
    fn hand_off(self: &Arc<Self>, socket: TcpStream, peer: SocketAddr) {
        let id = self.next_transport_id.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::AcqRel);
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            run_connection(&shared, id, socket, peer).await;
            shared.connection_finished();
        });
    }

    async fn drain(&self, grace: Duration) -> usize {
        let wait = async {
            loop {
                let notified = self.drained.notified();
                if self.active.load(Ordering::Acquire) == 0 {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(grace, wait).await.is_err() {
            warn!(
                remaining = self.active.load(Ordering::Acquire),
                grace_ms = grace.as_millis() as u64,
                "connections still active after shutdown grace period"
            );
        }
        self.active.load(Ordering::Acquire)
    }
}

/// 从池中借出实例；有界且策略为阻塞的池在阻塞线程池中等待，避免占住异步工作线程。
pub(crate) async fn lease_from<T: Poolable>(pool: &ObjectPool<T>) -> Result<Lease<T>, CoreError> {
    let settings = pool.settings();
    if settings.capacity.is_some() && settings.exhaustion == ExhaustionPolicy::Block {
        let pool = pool.clone();
        return tokio::task::spawn_blocking(move || pool.borrow())
            .await
            .map_err(|err| {
                CoreError::new(
                    codes::POOL_MISUSE,
                    format!("blocking borrow did not complete: {err}"),
                )
            })?
            .map_err(CoreError::from);
    }
    pool.borrow().map_err(CoreError::from)
}

/// 持有监听套接字与三类对象池，维持固定数量的在途接受。
///
/// # 教案式说明
///
/// ## 意图（Why）
/// - 接受并发下限决定了突发建连时内核队列被消费的速度；管理器保证在途接受数恒定，
///   单个接受完成后立即重新发起，而不是等到连接处理结束；
/// - 监听套接字只归管理器所有，传输实例与上下文通过对象池在连接之间复用。
///
/// ## 逻辑（How）
/// - `start`：经 `socket2` 创建监听套接字（`SO_REUSEADDR`、配置的 backlog、非阻塞）并交给 Tokio，
///   随后启动 `minimum_concurrency` 个接受者任务；
/// - 每个接受者：租用接受上下文 → 等待一次接受 → 归还上下文 → 交接套接字 → 重新发起；
/// - `shutdown`：广播关闭信号，等待接受者退出（监听套接字随之关闭），
///   在宽限期内等待在途连接排空，最后释放对象池。
///
/// ## 契约（What）
/// - 必须在 Tokio 多线程运行时内调用 [`TransportManager::start`]；
/// - 关闭信号发出后不再接受新连接；正在调度或发送的连接完成当前周期后关闭，
///   正在等待字节的连接立即清理上下文并关闭；
/// - 管理器被直接丢弃时同样广播关闭信号，接受者任务随 `JoinSet` 一并中止。
///
/// ## 取舍（Trade-offs）
/// - 连接任务不纳入 `JoinSet`，排空依赖活动计数与 `Notify`，避免长连接把句柄集合无限撑大。
pub struct TransportManager {
    shared: Arc<ServerShared>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    acceptors: JoinSet<()>,
}

impl TransportManager {
    /// 绑定监听端点并启动接受循环。
    pub async fn start<D: Dispatcher>(
        config: ServerConfig,
        dispatcher: D,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let listener = Arc::new(bind_listener(&config)?);
        let local_addr = listener
            .local_addr()
            .map_err(|err| map_io_error(error::BIND, err))?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let receive_buffer_size = config.receive_buffer_size;
        let arguments_capacity = config.arguments_buffer_capacity;
        let shared = Arc::new(ServerShared {
            transports: ObjectPool::with_settings(
                move || Transport::new(receive_buffer_size),
                config.transport_pool.clone(),
            ),
            accept_contexts: ObjectPool::with_settings(
                AcceptContext::default,
                config.accept_context_pool.clone(),
            ),
            request_contexts: ObjectPool::with_settings(
                move || RequestContext::new(arguments_capacity),
                config.request_context_pool.clone(),
            ),
            dispatcher: Arc::new(dispatcher),
            config,
            shutdown: shutdown_rx,
            active: AtomicUsize::new(0),
            drained: Notify::new(),
            next_transport_id: AtomicU64::new(1),
        });

        let mut acceptors = JoinSet::new();
        for acceptor in 0..shared.config.minimum_concurrency {
            acceptors.spawn(accept_loop(
                acceptor,
                Arc::clone(&listener),
                Arc::clone(&shared),
            ));
        }
        info!(
            local = %local_addr,
            backlog = shared.config.listen_backlog,
            minimum_concurrency = shared.config.minimum_concurrency,
            reuse = ?shared.config.connection_reuse,
            "rpc transport listening"
        );

        Ok(Self {
            shared,
            local_addr,
            shutdown,
            acceptors,
        })
    }

    /// 实际绑定的本地地址。
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 当前仍在服务的连接数。
    pub fn active_connections(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// 生效中的配置。
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// 传输实例池统计。
    pub fn transport_pool_stats(&self) -> PoolStats {
        self.shared.transports.stats()
    }

    /// 接受上下文池统计。
    pub fn accept_context_pool_stats(&self) -> PoolStats {
        self.shared.accept_contexts.stats()
    }

    /// 请求上下文池统计。
    pub fn request_context_pool_stats(&self) -> PoolStats {
        self.shared.request_contexts.stats()
    }

    /// 停止接受并排空在途连接，返回宽限期结束时仍未关闭的连接数。
    pub async fn shutdown(mut self) -> usize {
        info!(
            local = %self.local_addr,
            active = self.active_connections(),
            "rpc transport shutting down"
        );
        self.shutdown.send_replace(true);
        while let Some(joined) = self.acceptors.join_next().await {
            if let Err(err) = joined
                && err.is_panic()
            {
                error!(error = %err, "acceptor task panicked");
            }
        }

        let grace = Duration::from_millis(self.shared.config.shutdown_grace_ms);
        let remaining = self.shared.drain(grace).await;

        self.shared.transports.dispose();
        self.shared.accept_contexts.dispose();
        self.shared.request_contexts.dispose();
        info!(local = %self.local_addr, remaining, "rpc transport stopped");
        remaining
    }
}

impl Drop for TransportManager {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

fn bind_listener(config: &ServerConfig) -> Result<TcpListener, CoreError> {
    let bind_error = |err: io::Error| map_io_error(error::BIND, err);
    let addr = config.binding_endpoint;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_error)?;
    socket.set_reuse_address(true).map_err(bind_error)?;
    socket.bind(&addr.into()).map_err(bind_error)?;
    let backlog = i32::try_from(config.listen_backlog).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(bind_error)?;
    socket.set_nonblocking(true).map_err(bind_error)?;
    TcpListener::from_std(socket.into()).map_err(bind_error)
}

async fn accept_loop(acceptor: usize, listener: Arc<TcpListener>, shared: Arc<ServerShared>) {
    let mut shutdown = shared.subscribe_shutdown();
    loop {
        if *shutdown.borrow() {
            break;
        }
        let mut ctx = match lease_from(&shared.accept_contexts).await {
            Ok(ctx) => ctx,
            Err(err) => {
                if shared.accept_contexts.is_disposed() {
                    break;
                }
                error!(acceptor, code = err.code(), "accept context unavailable: {err}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        ctx.issue(acceptor);

        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.changed() => break,
        };
        match accepted {
            Ok((socket, peer)) => {
                ctx.complete(peer);
                debug!(
                    acceptor,
                    peer = %peer,
                    waited_ms = ctx.waited_ms() as u64,
                    "accept completed"
                );
                drop(ctx);
                shared.hand_off(socket, peer);
            }
            Err(err) => {
                drop(ctx);
                if classify_io(&err) == FaultVerdict::Fatal {
                    let err = map_io_error(error::ACCEPT, err);
                    error!(acceptor, code = err.code(), "accept failed, retrying: {err}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
    debug!(acceptor, "acceptor stopped");
}

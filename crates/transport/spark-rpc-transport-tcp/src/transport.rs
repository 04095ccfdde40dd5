use std::io;
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use socket2::SockRef;
use spark_rpc_core::error::error_value;
use spark_rpc_core::{
    CoreError, ErrorCategory, FaultVerdict, MessageType, PipelineOutcome, Poolable,
    RequestContext, SegmentStream, Value, classify_io, codes, encode_response,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::config::{ConnectionReuse, ServerConfig};
use crate::error::{self, map_io_error};
use crate::manager::{ServerShared, lease_from};
use crate::state::TransportState;

/// 单条已接受连接的双工通道与处理状态。
///
/// # 教案式说明
///
/// ## 意图（Why）
/// - 连接的接收缓冲与响应缓冲随实例一起池化，稳态请求循环不再分配；
/// - 状态迁移集中在 [`TransportState::advance`] 校验，同步完成与异步完成走同一处理函数，
///   不会因两条路径各自迁移状态而重复推进。
///
/// ## 逻辑（How）
/// - 管理器在接受完成后借出实例并调用 `on_accepted` 分配套接字；
/// - 每个请求/响应周期借用一个 [`RequestContext`]，周期结束即归还，
///   游标之后的遗留字节转交下一周期的上下文；
/// - 连接结束时关闭套接字，租约释放后 [`Poolable::reset`] 把实例复位为 `Uninitialized`。
///
/// ## 契约（What）
/// - 同一实例在任一时刻只服务一条连接，周期严格串行：上一响应发出前不解码下一请求；
/// - 归还池中的实例不持有套接字。
#[derive(Debug)]
pub struct Transport {
    id: u64,
    state: TransportState,
    socket: Option<TcpStream>,
    peer: Option<SocketAddr>,
    receive_buffer: BytesMut,
    receive_buffer_size: usize,
    response: BytesMut,
    cycles: u64,
}

/// 一次接收的结果。
enum Received {
    Bytes { bytes: Bytes, synchronous: bool },
    Eof,
    Shutdown,
}

/// 周期结束后连接的去向。
enum CycleEnd {
    Continue,
    Close,
}

impl Transport {
    pub(crate) fn new(receive_buffer_size: usize) -> Self {
        Self {
            id: 0,
            state: TransportState::Uninitialized,
            socket: None,
            peer: None,
            receive_buffer: BytesMut::with_capacity(receive_buffer_size),
            receive_buffer_size,
            response: BytesMut::new(),
            cycles: 0,
        }
    }

    /// 连接序号；未分配时为 0。
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 当前状态。
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// 对端地址。
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// 本连接已完成的请求/响应周期数。
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn transition(&mut self, next: TransportState) -> Result<(), CoreError> {
        self.state = self.state.advance(next)?;
        debug!(transport = self.id, state = ?next, "transport state changed");
        Ok(())
    }

    /// 接受完成：配置套接字选项并进入 `Receiving`。
    pub(crate) fn on_accepted(
        &mut self,
        id: u64,
        socket: TcpStream,
        peer: SocketAddr,
        config: &ServerConfig,
    ) -> Result<(), CoreError> {
        self.id = id;
        self.transition(TransportState::Accepting)?;
        socket
            .set_nodelay(config.tcp_nodelay)
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        if let Some(linger_ms) = config.linger_ms {
            SockRef::from(&socket)
                .set_linger(Some(Duration::from_millis(linger_ms)))
                .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        }
        self.socket = Some(socket);
        self.peer = Some(peer);
        self.transition(TransportState::Receiving)
    }

    /// 驱动连接上的全部请求/响应周期，直至对端关闭、关闭信号或故障。
    async fn drive(
        &mut self,
        shared: &ServerShared,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), CoreError> {
        let mut leftover = SegmentStream::new();
        loop {
            let mut ctx = lease_from(&shared.request_contexts).await?;
            ctx.prime(leftover);
            let end = self.run_cycle(&mut ctx, shared, shutdown).await;
            leftover = ctx.take_unconsumed();
            drop(ctx);
            if let CycleEnd::Close = end? {
                return Ok(());
            }
        }
    }

    async fn run_cycle(
        &mut self,
        ctx: &mut RequestContext,
        shared: &ServerShared,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<CycleEnd, CoreError> {
        let mut outcome = if ctx.unparsed_len() > 0 {
            self.transition(TransportState::Parsing(ctx.stage()))?;
            ctx.process()
        } else {
            PipelineOutcome::Suspended
        };

        loop {
            match outcome {
                PipelineOutcome::Suspended => {
                    if self.state != TransportState::Receiving {
                        self.transition(TransportState::Receiving)?;
                    }
                    outcome = match self.receive(shutdown).await? {
                        Received::Bytes { bytes, synchronous } => {
                            self.on_received(ctx, bytes, synchronous)?
                        }
                        Received::Eof => {
                            debug!(
                                transport = self.id,
                                unparsed = ctx.unparsed_len(),
                                "peer closed the connection"
                            );
                            return Ok(CycleEnd::Close);
                        }
                        Received::Shutdown => {
                            debug!(transport = self.id, "shutdown while awaiting bytes");
                            return Ok(CycleEnd::Close);
                        }
                    };
                }
                PipelineOutcome::Ready => return self.dispatch(ctx, shared, shutdown).await,
                PipelineOutcome::Rejected { error, message_id } => {
                    warn!(
                        transport = self.id,
                        code = error.code(),
                        message_id = ?message_id,
                        "rejected malformed envelope: {}",
                        error.message()
                    );
                    if let Some(message_id) = message_id {
                        self.send(message_id, &Err(error.to_wire_value())).await?;
                    }
                    return self.end_cycle(shared.config.connection_reuse, shutdown);
                }
                PipelineOutcome::Fatal(error) => return Err(error),
            }
        }
    }

    /// 非阻塞读取：先尝试同步完成，未就绪时等待可读事件。
    async fn receive(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Received, CoreError> {
        let socket = self.socket.as_ref().ok_or_else(missing_socket)?;
        let mut synchronous = true;
        loop {
            self.receive_buffer.reserve(self.receive_buffer_size);
            match socket.try_read_buf(&mut self.receive_buffer) {
                Ok(0) => return Ok(Received::Eof),
                Ok(_) => {
                    let bytes = self.receive_buffer.split().freeze();
                    return Ok(Received::Bytes { bytes, synchronous });
                }
                Err(err) => settle_fault(error::READ, err)?,
            }

            if *shutdown.borrow() {
                return Ok(Received::Shutdown);
            }
            synchronous = false;
            tokio::select! {
                ready = socket.readable() => {
                    if let Err(err) = ready {
                        settle_fault(error::READ, err)?;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(Received::Shutdown);
                    }
                }
            }
        }
    }

    /// 接收完成的唯一入口：追加字节并从“下一处理步骤”继续流水线。
    fn on_received(
        &mut self,
        ctx: &mut RequestContext,
        bytes: Bytes,
        synchronous: bool,
    ) -> Result<PipelineOutcome, CoreError> {
        trace!(
            transport = self.id,
            len = bytes.len(),
            synchronous,
            "receive completed"
        );
        ctx.feed(bytes);
        self.transition(TransportState::Parsing(ctx.stage()))?;
        let outcome = ctx.process();
        if outcome.is_suspended() {
            self.transition(TransportState::Parsing(ctx.stage()))?;
        }
        Ok(outcome)
    }

    async fn dispatch(
        &mut self,
        ctx: &mut RequestContext,
        shared: &ServerShared,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<CycleEnd, CoreError> {
        self.transition(TransportState::Dispatching)?;
        let message_type = ctx.message_type();
        let message_id = ctx.message_id();
        let invocation = ctx.invocation().ok_or_else(|| {
            CoreError::new(
                codes::INVALID_TRANSITION,
                "pipeline reported ready without a complete invocation",
            )
        })?;
        debug!(
            transport = self.id,
            method = invocation.method_name(),
            message_id = ?message_id,
            "dispatching"
        );
        let outcome = shared.dispatcher.dispatch(invocation).await;

        match (message_type, message_id) {
            (Some(MessageType::Request), Some(message_id)) => {
                self.send(message_id, &outcome).await?;
            }
            _ => {
                if let Err(error) = &outcome {
                    debug!(transport = self.id, error = ?error, "notification handler failed");
                }
            }
        }
        self.end_cycle(shared.config.connection_reuse, shutdown)
    }

    /// 打包响应并写完全部字节。
    async fn send(
        &mut self,
        message_id: u32,
        outcome: &Result<Value, Value>,
    ) -> Result<(), CoreError> {
        self.transition(TransportState::Sending)?;
        self.response.clear();
        if let Err(err) = encode_response(&mut self.response, message_id, outcome) {
            warn!(transport = self.id, message_id, error = %err, "result is not encodable");
            self.response.clear();
            let fallback = Err(error_value(codes::DISPATCH_UNENCODABLE_RESULT, &err.to_string()));
            encode_response(&mut self.response, message_id, &fallback).map_err(|err| {
                CoreError::new(codes::DISPATCH_UNENCODABLE_RESULT, err.to_string())
            })?;
        }

        let socket = self.socket.as_mut().ok_or_else(missing_socket)?;
        let mut written = 0;
        while written < self.response.len() {
            match socket.write(&self.response[written..]).await {
                Ok(0) => {
                    return Err(map_io_error(
                        error::WRITE,
                        io::Error::from(io::ErrorKind::WriteZero),
                    ));
                }
                Ok(n) => written += n,
                Err(err) => settle_fault(error::WRITE, err)?,
            }
        }
        Ok(())
    }

    fn end_cycle(
        &mut self,
        reuse: ConnectionReuse,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CycleEnd, CoreError> {
        self.cycles += 1;
        if reuse == ConnectionReuse::OneShot || *shutdown.borrow() {
            return Ok(CycleEnd::Close);
        }
        self.transition(TransportState::Receiving)?;
        Ok(CycleEnd::Continue)
    }

    /// 半关闭写方向后释放套接字。
    pub(crate) fn close(&mut self) {
        let Some(socket) = self.socket.take() else {
            return;
        };
        if self.state.can_transition_to(TransportState::Closing) {
            self.state = TransportState::Closing;
        }
        if let Err(err) = SockRef::from(&socket).shutdown(Shutdown::Write) {
            trace!(transport = self.id, error = %err, "shutdown on close failed");
        }
        debug!(
            transport = self.id,
            peer = ?self.peer,
            cycles = self.cycles,
            "transport closed"
        );
    }
}

impl Poolable for Transport {
    fn reset(&mut self) {
        self.id = 0;
        self.state = TransportState::Uninitialized;
        self.socket = None;
        self.peer = None;
        self.receive_buffer.clear();
        self.response.clear();
        self.cycles = 0;
    }
}

/// Benign 故障视为操作仍在进行，其余转为带分类的错误。
fn settle_fault(kind: error::OperationKind, err: io::Error) -> Result<(), CoreError> {
    match classify_io(&err) {
        FaultVerdict::Benign => Ok(()),
        FaultVerdict::Ignorable | FaultVerdict::Fatal => Err(map_io_error(kind, err)),
    }
}

fn missing_socket() -> CoreError {
    CoreError::new(
        codes::INVALID_TRANSITION,
        "socket operation issued on an unassigned transport",
    )
}

/// 服务一条已接受的连接，直至其关闭；返回时传输实例已归还池中。
pub(crate) async fn run_connection(
    shared: &ServerShared,
    id: u64,
    socket: TcpStream,
    peer: SocketAddr,
) {
    let mut transport = match lease_from(&shared.transports).await {
        Ok(transport) => transport,
        Err(err) => {
            warn!(transport = id, peer = %peer, code = err.code(), "no transport available: {err}");
            return;
        }
    };
    if let Err(err) = transport.on_accepted(id, socket, peer, &shared.config) {
        warn!(transport = id, peer = %peer, code = err.code(), "socket setup failed: {err}");
        return;
    }

    let mut shutdown = shared.subscribe_shutdown();
    match transport.drive(shared, &mut shutdown).await {
        Ok(()) => {}
        Err(err) => match err.category() {
            ErrorCategory::Ignorable => {}
            ErrorCategory::SocketFatal => {
                warn!(transport = id, peer = %peer, code = err.code(), "socket fault aborted the connection: {err}");
            }
            _ => {
                warn!(transport = id, peer = %peer, code = err.code(), "connection aborted: {err}");
            }
        },
    }
    transport.close();
}

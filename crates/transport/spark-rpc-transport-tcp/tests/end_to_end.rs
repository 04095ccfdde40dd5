//! `end_to_end` 集成测试：通过回环 TCP 验证服务端完整的请求/响应周期。
//!
//! # 测试目标（Why）
//! - 通知不产生响应、请求得到 `[1, id, nil, result]`，信封错误只中止当前消息；
//! - 连接在读取中途被重置时，传输实例与请求上下文各自恰好归还一次；
//! - 单次模式在首个响应后关闭连接，关闭流程排空在途连接并停止接受。
//!
//! # 结构安排（How）
//! - 客户端直接使用 Tokio `TcpStream` 与 `spark-codec-msgpack` 的打包函数手写信封；
//! - 响应读取按 MessagePack 值边界切分，不依赖一次读取恰好收到一个响应。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use socket2::SockRef;
use spark_codec_msgpack::{
    SliceSource, Value, read_value, to_vec, write_array_len, write_str, write_uint, write_value,
};
use spark_rpc_core::{Dispatcher, Invocation, MethodTable, codes};
use spark_rpc_transport_tcp::{ConnectionReuse, ServerConfig, TransportManager};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn request(message_id: u32, method: &str, args: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    write_array_len(&mut out, 4).expect("编码失败");
    write_uint(&mut out, 0);
    write_uint(&mut out, u64::from(message_id));
    write_str(&mut out, method).expect("编码失败");
    write_array_len(&mut out, args.len()).expect("编码失败");
    for arg in args {
        write_value(&mut out, arg).expect("编码失败");
    }
    out
}

fn notification(method: &str, args: &[Value]) -> Vec<u8> {
    to_vec(&Value::Array(vec![
        Value::from(2u32),
        Value::from(method),
        Value::Array(args.to_vec()),
    ]))
    .expect("编码失败")
}

fn echo_table() -> MethodTable {
    let mut table = MethodTable::new();
    table.register("echo", |args: Vec<Value>| async move {
        Ok(args.into_iter().next().unwrap_or_default())
    });
    table
}

async fn start(config: ServerConfig, dispatcher: impl Dispatcher) -> TransportManager {
    TransportManager::start(config, dispatcher)
        .await
        .expect("启动失败")
}

async fn connect(manager: &TransportManager) -> TcpStream {
    let stream = TcpStream::connect(manager.local_addr())
        .await
        .expect("连接失败");
    stream.set_nodelay(true).expect("设置 nodelay 失败");
    stream
}

/// 读取一个完整的 MessagePack 值；多读到的字节留在 `pending` 中。
async fn read_message(stream: &mut TcpStream, pending: &mut Vec<u8>) -> Value {
    loop {
        if !pending.is_empty() {
            let mut source = SliceSource::new(Bytes::copy_from_slice(pending));
            match read_value(&mut source) {
                Ok(value) => {
                    let consumed = pending.len() - source.remaining();
                    pending.drain(..consumed);
                    return value;
                }
                Err(err) if err.is_incomplete() => {}
                Err(err) => panic!("响应无法解码: {err}"),
            }
        }
        let mut chunk = [0u8; 1024];
        let n = timeout(IO_TIMEOUT, stream.read(&mut chunk))
            .await
            .expect("等待响应超时")
            .expect("读取失败");
        assert!(n > 0, "连接在响应前被关闭");
        pending.extend_from_slice(&chunk[..n]);
    }
}

async fn expect_eof(stream: &mut TcpStream) {
    let mut chunk = [0u8; 16];
    let n = timeout(IO_TIMEOUT, stream.read(&mut chunk))
        .await
        .expect("等待关闭超时")
        .unwrap_or(0);
    assert_eq!(n, 0, "连接应已关闭");
}

fn response(message_id: u32, error: Value, result: Value) -> Value {
    Value::Array(vec![
        Value::from(1u32),
        Value::from(message_id),
        error,
        result,
    ])
}

fn error_code(message: &Value) -> Option<&str> {
    message.as_array()?.get(2)?.get("code")?.as_str()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(IO_TIMEOUT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("条件未在时限内满足");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn echo_request_yields_response_envelope() {
    let manager = start(ServerConfig::default(), echo_table()).await;
    let mut stream = connect(&manager).await;

    stream
        .write_all(&request(7, "echo", &[Value::from(42u32)]))
        .await
        .expect("写入失败");
    let mut raw = [0u8; 5];
    timeout(IO_TIMEOUT, stream.read_exact(&mut raw))
        .await
        .expect("等待响应超时")
        .expect("读取失败");
    assert_eq!(raw, [0x94, 0x01, 0x07, 0xc0, 0x2a]);

    drop(stream);
    assert_eq!(manager.shutdown().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn notification_produces_no_response_and_keeps_connection_open() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let mut table = echo_table();
    table.register("notify", move |args: Vec<Value>| {
        let seen_tx = seen_tx.clone();
        async move {
            seen_tx.send(args).expect("测试通道已关闭");
            Ok(Value::Nil)
        }
    });
    let manager = start(ServerConfig::default(), table).await;
    let mut stream = connect(&manager).await;

    stream
        .write_all(&notification("notify", &[Value::from("x")]))
        .await
        .expect("写入失败");
    let args = timeout(IO_TIMEOUT, seen_rx.recv())
        .await
        .expect("通知未被调度")
        .expect("通道关闭");
    assert_eq!(args, vec![Value::from("x")]);

    stream
        .write_all(&request(7, "echo", &[Value::from(42u32)]))
        .await
        .expect("写入失败");
    let mut pending = Vec::new();
    let reply = read_message(&mut stream, &mut pending).await;
    assert_eq!(reply, response(7, Value::Nil, Value::from(42u32)));
    assert!(pending.is_empty(), "通知不应产生任何响应字节");

    drop(stream);
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn arity_violation_is_reported_and_connection_stays_usable() {
    let manager = start(ServerConfig::default(), echo_table()).await;
    let mut stream = connect(&manager).await;
    let mut pending = Vec::new();

    stream
        .write_all(&[0x92, 0x00, 0x07])
        .await
        .expect("写入失败");
    let rejected = read_message(&mut stream, &mut pending).await;
    assert_eq!(error_code(&rejected), Some(codes::PROTOCOL_VIOLATION));
    assert_eq!(rejected.as_array().map(|items| items[1].clone()), Some(Value::from(7u32)));

    stream
        .write_all(&request(8, "echo", &[Value::from("still here")]))
        .await
        .expect("写入失败");
    let reply = read_message(&mut stream, &mut pending).await;
    assert_eq!(reply, response(8, Value::Nil, Value::from("still here")));

    drop(stream);
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_method_fault_travels_in_error_slot() {
    let manager = start(ServerConfig::default(), echo_table()).await;
    let mut stream = connect(&manager).await;
    let mut pending = Vec::new();

    stream
        .write_all(&request(3, "missing", &[]))
        .await
        .expect("写入失败");
    let reply = read_message(&mut stream, &mut pending).await;
    assert_eq!(error_code(&reply), Some(codes::DISPATCH_NO_SUCH_METHOD));

    stream
        .write_all(&request(4, "echo", &[Value::from(true)]))
        .await
        .expect("写入失败");
    let reply = read_message(&mut stream, &mut pending).await;
    assert_eq!(reply, response(4, Value::Nil, Value::from(true)));

    drop(stream);
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pipelined_and_trickled_requests_are_answered_in_order() {
    let manager = start(ServerConfig::default(), echo_table()).await;
    let mut stream = connect(&manager).await;
    let mut pending = Vec::new();

    let mut batch = request(1, "echo", &[Value::from(1u32)]);
    batch.extend(request(2, "echo", &[Value::from(2u32)]));
    stream.write_all(&batch).await.expect("写入失败");
    for id in [1u32, 2] {
        let reply = read_message(&mut stream, &mut pending).await;
        assert_eq!(reply, response(id, Value::Nil, Value::from(id)));
    }

    let payload = Value::Binary(Bytes::from(vec![0x5a; 300]));
    for byte in request(3, "echo", &[payload.clone()]) {
        stream.write_all(&[byte]).await.expect("写入失败");
        stream.flush().await.expect("刷新失败");
    }
    let reply = read_message(&mut stream, &mut pending).await;
    assert_eq!(reply, response(3, Value::Nil, payload));

    drop(stream);
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reset_mid_receive_releases_leases_exactly_once() {
    let manager = start(ServerConfig::default(), echo_table()).await;
    let mut stream = connect(&manager).await;

    let partial = request(9, "echo", &[Value::from("unfinished")]);
    stream
        .write_all(&partial[..partial.len() - 4])
        .await
        .expect("写入失败");
    wait_until(|| manager.request_context_pool_stats().leased == 1).await;

    SockRef::from(&stream)
        .set_linger(Some(Duration::ZERO))
        .expect("设置 linger 失败");
    drop(stream);

    wait_until(|| manager.active_connections() == 0).await;
    let transports = manager.transport_pool_stats();
    let contexts = manager.request_context_pool_stats();
    assert_eq!(transports.leased, 0);
    assert_eq!(transports.borrowed_total, 1);
    assert_eq!(transports.returned_total, 1);
    assert_eq!(contexts.leased, 0);
    assert_eq!(contexts.borrowed_total, 1);
    assert_eq!(contexts.returned_total, 1);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_shot_mode_closes_after_first_response() {
    let config = ServerConfig {
        connection_reuse: ConnectionReuse::OneShot,
        ..ServerConfig::default()
    };
    let manager = start(config, echo_table()).await;
    let mut stream = connect(&manager).await;
    let mut pending = Vec::new();

    stream
        .write_all(&request(11, "echo", &[Value::from(5u32)]))
        .await
        .expect("写入失败");
    let reply = read_message(&mut stream, &mut pending).await;
    assert_eq!(reply, response(11, Value::Nil, Value::from(5u32)));
    expect_eof(&mut stream).await;

    manager.shutdown().await;
}

/// 在调度中挂起，直到测试放行；用于观察关闭信号对在途周期的影响。
struct Gate {
    entered: AtomicUsize,
    release: tokio::sync::Notify,
}

#[async_trait]
impl Dispatcher for Gate {
    async fn dispatch(&self, invocation: Invocation<'_>) -> Result<Value, Value> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        Ok(Value::from(invocation.method_name()))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_finishes_in_flight_cycle_and_closes_idle_connections() {
    let gate = Arc::new(Gate {
        entered: AtomicUsize::new(0),
        release: tokio::sync::Notify::new(),
    });
    let manager = start(ServerConfig::default(), Arc::clone(&gate)).await;
    let addr = manager.local_addr();

    let mut idle = connect(&manager).await;
    let mut busy = connect(&manager).await;
    busy.write_all(&request(21, "slow", &[]))
        .await
        .expect("写入失败");
    wait_until(|| gate.entered.load(Ordering::SeqCst) == 1).await;
    wait_until(|| manager.active_connections() == 2).await;

    let shutdown = tokio::spawn(manager.shutdown());
    expect_eof(&mut idle).await;

    gate.release.notify_one();
    let mut pending = Vec::new();
    let reply = read_message(&mut busy, &mut pending).await;
    assert_eq!(reply, response(21, Value::Nil, Value::from("slow")));
    expect_eof(&mut busy).await;

    let remaining = timeout(IO_TIMEOUT, shutdown)
        .await
        .expect("关闭超时")
        .expect("关闭任务失败");
    assert_eq!(remaining, 0);
    assert!(TcpStream::connect(addr).await.is_err(), "关闭后不应再接受连接");
}

//! 回显服务：加载配置与服务描述后启动 RPC 传输，`Ctrl-C` 时优雅关闭。
//!
//! 用法：`spark-rpc-echo [config.toml] [service-directory]`。未给出服务目录时直接注册 `echo`。

use std::env;
use std::process::ExitCode;

use spark_rpc_core::{CoreError, MethodTable, Value};
use spark_rpc_transport_tcp::{FileServiceLocator, ServerConfig, ServiceCatalog, TransportManager};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn register_echo(table: &mut MethodTable) {
    table.register("echo", |args: Vec<Value>| async move {
        Ok(args.into_iter().next().unwrap_or_default())
    });
    table.register("echo.all", |args: Vec<Value>| async move { Ok(Value::Array(args)) });
}

fn catalog() -> ServiceCatalog {
    let mut catalog = ServiceCatalog::new();
    catalog.register("Echo", register_echo);
    catalog
}

async fn run() -> Result<(), CoreError> {
    let mut args = env::args().skip(1);
    let config = match args.next() {
        Some(path) => ServerConfig::from_path(path)?,
        None => ServerConfig::default(),
    };
    let table = match args.next() {
        Some(directory) => catalog().load(&FileServiceLocator::new(directory))?,
        None => {
            let mut table = MethodTable::new();
            register_echo(&mut table);
            table
        }
    };
    info!(methods = ?table.method_names().collect::<Vec<_>>(), "services loaded");

    let manager = TransportManager::start(config, table).await?;
    info!(local = %manager.local_addr(), "press Ctrl-C to stop");
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for Ctrl-C, shutting down");
    }
    manager.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(build_env_filter()).init();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(code = err.code(), "{err}");
            ExitCode::FAILURE
        }
    }
}

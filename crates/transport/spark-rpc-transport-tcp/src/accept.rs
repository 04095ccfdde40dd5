use std::net::SocketAddr;
use std::time::Instant;

use spark_rpc_core::Poolable;

/// 一次在途接受操作的完成状态。
///
/// # 契约（What）
/// - 每个接受者任务在发起接受前租用一个上下文，套接字交接给传输实例后立即归还；
/// - 同一上下文不会同时服务两个在途接受；
/// - [`Poolable::reset`] 清空本次完成记录，保留累计计数 `completions` 用于观测。
#[derive(Debug, Default)]
pub struct AcceptContext {
    acceptor: usize,
    issued_at: Option<Instant>,
    peer: Option<SocketAddr>,
    completions: u64,
}

impl AcceptContext {
    /// 标记由第 `acceptor` 个接受者发起接受。
    pub(crate) fn issue(&mut self, acceptor: usize) {
        self.acceptor = acceptor;
        self.issued_at = Some(Instant::now());
    }

    /// 记录接受完成的对端地址。
    pub(crate) fn complete(&mut self, peer: SocketAddr) {
        self.peer = Some(peer);
        self.completions += 1;
    }

    /// 发起接受的接受者序号。
    pub fn acceptor(&self) -> usize {
        self.acceptor
    }

    /// 已完成接受的对端地址。
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// 自发起以来等待的毫秒数。
    pub fn waited_ms(&self) -> u128 {
        self.issued_at
            .map(|issued| issued.elapsed().as_millis())
            .unwrap_or_default()
    }

    /// 该上下文累计完成的接受次数。
    pub fn completions(&self) -> u64 {
        self.completions
    }
}

impl Poolable for AcceptContext {
    fn reset(&mut self) {
        self.acceptor = 0;
        self.issued_at = None;
        self.peer = None;
    }
}

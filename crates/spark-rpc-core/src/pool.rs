use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{CoreError, codes};

/// 可被对象池复用的类型。
///
/// # 契约说明（What）
/// - `reset` 在实例归还池中、重新可借之前调用，必须清除全部单次使用状态；
/// - 实现者不得在 `reset` 中 panic，否则归还路径会中断并丢失实例。
pub trait Poolable: Send + 'static {
    /// 清除单次使用状态。
    fn reset(&mut self);
}

/// 有界池耗尽时的处理策略。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustionPolicy {
    /// 立即返回 [`PoolError::Exhausted`]。
    #[default]
    Fail,
    /// 阻塞等待其他持有者归还，可由 `borrow_timeout_ms` 限时。
    Block,
}

/// 对象池的增长与耗尽配置。
///
/// # 契约说明（What）
/// - `capacity = None` 表示无界，池按需增长；
/// - `prewarm` 个实例在构造池时预先创建（不超过容量上限）；
/// - `borrow_timeout_ms` 仅在 [`ExhaustionPolicy::Block`] 下生效，`None` 表示无限等待。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    pub capacity: Option<usize>,
    pub exhaustion: ExhaustionPolicy,
    pub prewarm: usize,
    pub borrow_timeout_ms: Option<u64>,
}

impl PoolSettings {
    /// 构造容量为 `capacity` 的有界配置。
    pub fn bounded(capacity: usize, exhaustion: ExhaustionPolicy) -> Self {
        Self {
            capacity: Some(capacity),
            exhaustion,
            ..Self::default()
        }
    }
}

/// 对象池操作失败的原因。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PoolError {
    /// 有界池已满且策略为 `Fail`。
    #[error("pool exhausted: all {capacity} instance(s) are leased")]
    Exhausted { capacity: usize },
    /// 阻塞等待超过配置的时限。
    #[error("timed out after {waited_ms} ms waiting for a pooled instance")]
    TimedOut { waited_ms: u64 },
    /// 池已释放，不再出借。
    #[error("pool has been disposed")]
    Disposed,
    /// 归还的租约来自另一个池。
    #[error("lease belongs to a different pool")]
    ForeignLease,
}

impl From<PoolError> for CoreError {
    fn from(error: PoolError) -> Self {
        let code = match error {
            PoolError::Exhausted { .. } | PoolError::TimedOut { .. } => codes::POOL_EXHAUSTED,
            PoolError::Disposed | PoolError::ForeignLease => codes::POOL_MISUSE,
        };
        CoreError::new(code, error.to_string()).with_cause(error)
    }
}

/// 对象池统计快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 池生命周期内构造的实例总数。
    pub created: usize,
    /// 当前空闲可借的实例数。
    pub available: usize,
    /// 当前借出未还的实例数。
    pub leased: usize,
    /// 累计出借次数。
    pub borrowed_total: u64,
    /// 累计归还次数。
    pub returned_total: u64,
}

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// 通用对象池。
///
/// # 教案式说明
///
/// ## 意图（Why）
/// - 传输实例、接受上下文与请求上下文都携带可观的缓冲，按请求分配会把稳态路径拖入堆分配；
///   对象池保证每个实例的构造成本在池生命周期内只支付一次。
///
/// ## 逻辑（How）
/// - 空闲实例保存在 `parking_lot::Mutex<Vec<T>>` 自由链表中，借出时优先复用；
/// - 链表为空且未达容量上限时，在锁外调用工厂函数构造新实例；
/// - 达到上限时按 [`ExhaustionPolicy`] 失败或在条件变量上等待；
/// - 借出结果为 RAII [`Lease`]，`Drop` 时先调用 [`Poolable::reset`] 再放回自由链表。
///
/// ## 契约（What）
/// - 同一实例在两次出借之间必然经过一次归还与重置；
/// - 重复归还由所有权阻止：租约在归还时被消费；
/// - [`ObjectPool::dispose`] 之后借用返回 [`PoolError::Disposed`]，迟到的归还直接丢弃实例。
///
/// ## 取舍（Trade-offs）
/// - `Block` 策略会阻塞当前线程，异步调用方应在阻塞线程池中借用。
pub struct ObjectPool<T: Poolable> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Poolable> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Poolable> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("id", &self.inner.id)
            .field("settings", &self.inner.settings)
            .field("stats", &self.stats())
            .finish()
    }
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

struct PoolInner<T> {
    id: u64,
    factory: Factory<T>,
    settings: PoolSettings,
    state: Mutex<PoolState<T>>,
    returned: Condvar,
    metrics: PoolMetrics,
}

struct PoolState<T> {
    idle: Vec<T>,
    created: usize,
    disposed: bool,
}

#[derive(Default)]
struct PoolMetrics {
    leased: AtomicUsize,
    borrowed_total: AtomicU64,
    returned_total: AtomicU64,
}

impl<T: Poolable> ObjectPool<T> {
    /// 以无界配置创建对象池。
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::with_settings(factory, PoolSettings::default())
    }

    /// 以指定配置创建对象池，并按 `prewarm` 预先构造实例。
    pub fn with_settings(
        factory: impl Fn() -> T + Send + Sync + 'static,
        settings: PoolSettings,
    ) -> Self {
        let prewarm = settings
            .capacity
            .map_or(settings.prewarm, |cap| settings.prewarm.min(cap));
        let idle: Vec<T> = (0..prewarm).map(|_| factory()).collect();
        let inner = PoolInner {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            factory: Box::new(factory),
            settings,
            state: Mutex::new(PoolState {
                created: idle.len(),
                idle,
                disposed: false,
            }),
            returned: Condvar::new(),
            metrics: PoolMetrics::default(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// 借出一个独占实例。
    pub fn borrow(&self) -> Result<Lease<T>, PoolError> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        let item = loop {
            if state.disposed {
                return Err(PoolError::Disposed);
            }
            if let Some(item) = state.idle.pop() {
                break Some(item);
            }
            match inner.settings.capacity {
                Some(capacity) if state.created >= capacity => {
                    match inner.settings.exhaustion {
                        ExhaustionPolicy::Fail => {
                            debug!(pool = inner.id, capacity, "pool exhausted");
                            return Err(PoolError::Exhausted { capacity });
                        }
                        ExhaustionPolicy::Block => match inner.settings.borrow_timeout_ms {
                            Some(waited_ms) => {
                                let timeout = Duration::from_millis(waited_ms);
                                if inner.returned.wait_for(&mut state, timeout).timed_out()
                                    && state.idle.is_empty()
                                    && !state.disposed
                                {
                                    return Err(PoolError::TimedOut { waited_ms });
                                }
                            }
                            None => inner.returned.wait(&mut state),
                        },
                    }
                }
                _ => {
                    state.created += 1;
                    break None;
                }
            }
        };
        drop(state);

        let item = item.unwrap_or_else(|| (inner.factory)());
        inner.metrics.leased.fetch_add(1, Ordering::Relaxed);
        inner.metrics.borrowed_total.fetch_add(1, Ordering::Relaxed);
        Ok(Lease {
            item: ManuallyDrop::new(item),
            pool: Arc::clone(inner),
        })
    }

    /// 显式归还租约。
    ///
    /// 来自其他池的租约返回 [`PoolError::ForeignLease`]；该租约仍会回到其所属的池。
    pub fn give_back(&self, lease: Lease<T>) -> Result<(), PoolError> {
        if lease.pool.id != self.inner.id {
            warn!(
                pool = self.inner.id,
                owner = lease.pool.id,
                code = codes::POOL_MISUSE,
                "lease returned to a foreign pool"
            );
            return Err(PoolError::ForeignLease);
        }
        drop(lease);
        Ok(())
    }

    /// 释放池：唤醒所有等待者，丢弃空闲实例，后续借用失败。
    pub fn dispose(&self) {
        let mut state = self.inner.state.lock();
        state.disposed = true;
        let dropped = state.idle.len();
        state.created -= dropped;
        state.idle.clear();
        drop(state);
        self.inner.returned.notify_all();
    }

    /// 池是否已释放。
    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    /// 当前配置。
    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    /// 读取统计快照。
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            created: state.created,
            available: state.idle.len(),
            leased: self.inner.metrics.leased.load(Ordering::Relaxed),
            borrowed_total: self.inner.metrics.borrowed_total.load(Ordering::Relaxed),
            returned_total: self.inner.metrics.returned_total.load(Ordering::Relaxed),
        }
    }
}

impl<T> PoolInner<T>
where
    T: Poolable,
{
    fn reclaim(&self, mut item: T) {
        item.reset();
        self.metrics.leased.fetch_sub(1, Ordering::Relaxed);
        self.metrics.returned_total.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        if state.disposed {
            state.created = state.created.saturating_sub(1);
            return;
        }
        state.idle.push(item);
        drop(state);
        self.returned.notify_one();
    }
}

/// 对象池租约：在生命周期内独占一个实例，`Drop` 时重置并归还。
pub struct Lease<T: Poolable> {
    item: ManuallyDrop<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Poolable> Lease<T> {
    /// 租约所属池的标识。
    pub fn pool_id(&self) -> u64 {
        self.pool.id
    }
}

impl<T: Poolable> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T: Poolable> DerefMut for Lease<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.item
    }
}

impl<T: Poolable + fmt::Debug> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("pool", &self.pool.id)
            .field("item", &*self.item)
            .finish()
    }
}

impl<T: Poolable> Drop for Lease<T> {
    fn drop(&mut self) {
        // SAFETY: `item` 只在此处取出一次，之后租约不再被访问。
        let item = unsafe { ManuallyDrop::take(&mut self.item) };
        self.pool.reclaim(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Scratch {
        generation: u32,
        dirty: Vec<u8>,
    }

    impl Poolable for Scratch {
        fn reset(&mut self) {
            self.dirty.clear();
        }
    }

    fn scratch_pool(settings: PoolSettings) -> ObjectPool<Scratch> {
        let counter = Arc::new(AtomicUsize::new(0));
        ObjectPool::with_settings(
            move || Scratch {
                generation: counter.fetch_add(1, Ordering::Relaxed) as u32,
                dirty: Vec::new(),
            },
            settings,
        )
    }

    #[test]
    fn returned_instance_is_reset_before_reuse() {
        let pool = scratch_pool(PoolSettings::default());
        let mut lease = pool.borrow().expect("借出失败");
        lease.dirty.extend_from_slice(b"state");
        let generation = lease.generation;
        pool.give_back(lease).expect("归还失败");

        let again = pool.borrow().expect("再次借出失败");
        assert_eq!(again.generation, generation, "应复用同一实例");
        assert!(again.dirty.is_empty(), "复用前必须重置");
        assert_eq!(pool.stats().created, 1);
    }

    #[test]
    fn bounded_pool_fails_when_exhausted() {
        let pool = scratch_pool(PoolSettings::bounded(1, ExhaustionPolicy::Fail));
        let held = pool.borrow().expect("借出失败");
        assert_eq!(pool.borrow().err(), Some(PoolError::Exhausted { capacity: 1 }));
        drop(held);
        assert!(pool.borrow().is_ok());
    }

    #[test]
    fn blocking_pool_times_out() {
        let settings = PoolSettings {
            borrow_timeout_ms: Some(20),
            ..PoolSettings::bounded(1, ExhaustionPolicy::Block)
        };
        let pool = scratch_pool(settings);
        let _held = pool.borrow().expect("借出失败");
        assert_eq!(pool.borrow().err(), Some(PoolError::TimedOut { waited_ms: 20 }));
    }

    #[test]
    fn blocking_pool_wakes_on_return() {
        let pool = scratch_pool(PoolSettings::bounded(1, ExhaustionPolicy::Block));
        let held = pool.borrow().expect("借出失败");
        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.borrow().map(|lease| lease.generation))
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(held);
        assert_eq!(waiter.join().expect("等待线程崩溃"), Ok(0));
    }

    #[test]
    fn foreign_lease_is_rejected_but_returns_home() {
        let home = scratch_pool(PoolSettings::default());
        let other = scratch_pool(PoolSettings::default());
        let lease = home.borrow().expect("借出失败");
        assert_eq!(other.give_back(lease), Err(PoolError::ForeignLease));
        let stats = home.stats();
        assert_eq!(stats.leased, 0);
        assert_eq!(stats.available, 1);
        assert_eq!(other.stats().available, 0);
    }

    #[test]
    fn dispose_rejects_borrows_and_drops_late_returns() {
        let pool = scratch_pool(PoolSettings {
            prewarm: 2,
            ..PoolSettings::default()
        });
        assert_eq!(pool.stats().available, 2);
        let lease = pool.borrow().expect("借出失败");
        pool.dispose();
        assert_eq!(pool.borrow().err(), Some(PoolError::Disposed));
        drop(lease);
        let stats = pool.stats();
        assert_eq!(stats.available, 0);
        assert_eq!(stats.leased, 0);
        assert_eq!(stats.returned_total, 1);
    }

    #[test]
    fn pool_errors_map_to_stable_codes() {
        let exhausted: CoreError = PoolError::Exhausted { capacity: 2 }.into();
        assert_eq!(exhausted.code(), codes::POOL_EXHAUSTED);
        let misuse: CoreError = PoolError::ForeignLease.into();
        assert_eq!(misuse.code(), codes::POOL_MISUSE);
    }
}

//! `pool_contract` 集成测试：验证对象池在并发借还下的独占性与重置契约。
//!
//! # 测试目标（Why）
//! - 同一实例绝不能同时借给两个调用方；
//! - 实例再次出借前必须已经执行过重置。

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;
use spark_rpc_core::{ExhaustionPolicy, ObjectPool, PoolSettings, Poolable};

struct Tracked {
    id: usize,
    in_use: bool,
    dirty: bool,
}

impl Poolable for Tracked {
    fn reset(&mut self) {
        self.in_use = false;
        self.dirty = false;
    }
}

#[test]
fn concurrent_borrowers_never_share_an_instance() {
    let ids = Arc::new(AtomicUsize::new(0));
    let pool = {
        let ids = Arc::clone(&ids);
        ObjectPool::with_settings(
            move || Tracked {
                id: ids.fetch_add(1, Ordering::Relaxed),
                in_use: false,
                dirty: false,
            },
            PoolSettings::bounded(4, ExhaustionPolicy::Block),
        )
    };
    let held = Arc::new(Mutex::new(HashSet::new()));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let held = Arc::clone(&held);
            thread::spawn(move || {
                for _ in 0..200 {
                    let mut lease = pool.borrow().expect("借出失败");
                    assert!(!lease.in_use, "实例被重复出借");
                    assert!(!lease.dirty, "实例未经重置即被复用");
                    assert!(held.lock().insert(lease.id), "两个调用方同时持有同一实例");
                    lease.in_use = true;
                    lease.dirty = true;
                    held.lock().remove(&lease.id);
                    pool.give_back(lease).expect("归还失败");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("工作线程崩溃");
    }

    let stats = pool.stats();
    assert!(stats.created <= 4);
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.borrowed_total, 1600);
    assert_eq!(stats.returned_total, 1600);
}

use bytes::Bytes;
use criterion::{Criterion, black_box};
use spark_codec_msgpack::{write_array_len, write_str, write_uint, write_value};
use spark_rpc_core::{ObjectPool, RequestContext, Value};
use std::{env, time::Duration};

/// 基准：请求上下文解码一条典型请求的成本。
///
/// # 设计背景（Why）
/// - 稳态路径应只包含解码与参数重打包，不包含上下文分配；
///   基准通过对象池复用上下文，对比整块送达与逐 16 字节送达两种接收形态。
fn envelope() -> Bytes {
    let mut out = Vec::new();
    write_array_len(&mut out, 4).unwrap();
    write_uint(&mut out, 0);
    write_uint(&mut out, 42);
    write_str(&mut out, "inventory.reserve").unwrap();
    write_array_len(&mut out, 3).unwrap();
    write_value(&mut out, &Value::from("sku-0001")).unwrap();
    write_value(&mut out, &Value::from(12u32)).unwrap();
    write_value(
        &mut out,
        &Value::Array((0..32).map(|i| Value::from(i as u32)).collect()),
    )
    .unwrap();
    Bytes::from(out)
}

fn bench_pipeline(c: &mut Criterion) {
    let bytes = envelope();
    let pool = ObjectPool::new(|| RequestContext::new(4096));

    c.bench_function("pipeline_decode_whole", |b| {
        b.iter(|| {
            let mut ctx = pool.borrow().unwrap();
            ctx.feed(bytes.clone());
            black_box(ctx.process().is_ready())
        });
    });

    c.bench_function("pipeline_decode_16b_chunks", |b| {
        b.iter(|| {
            let mut ctx = pool.borrow().unwrap();
            let mut ready = false;
            for start in (0..bytes.len()).step_by(16) {
                let end = (start + 16).min(bytes.len());
                ctx.feed(bytes.slice(start..end));
                ready = ctx.process().is_ready();
            }
            black_box(ready)
        });
    });
}

fn main() {
    let mut quick_mode = false;
    for arg in env::args().skip(1) {
        if arg == "--quick" {
            quick_mode = true;
        }
    }

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_pipeline(&mut criterion);
    criterion.final_summary();
}

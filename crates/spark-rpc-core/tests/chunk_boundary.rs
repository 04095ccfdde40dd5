//! `chunk_boundary` 集成测试：验证流水线对接收分块方式不敏感。
//!
//! # 测试目标（Why）
//! - 非阻塞读取可能在任意字节处截断信封，包括多字节长度前缀的中间；
//! - 无论信封被切成多少块送达，解码出的方法名、类型、ID 与参数序列必须与整块送达时一致。
//!
//! # 结构安排（How）
//! - `arb_envelope` 生成合法的 Request / Notification 信封；
//! - `arb_cuts` 生成任意切分点，按切分顺序逐块喂给同一个上下文。

use bytes::Bytes;
use proptest::prelude::*;
use spark_rpc_core::{MessageType, PipelineOutcome, RequestContext, Value};
use spark_codec_msgpack::{write_array_len, write_str, write_uint, write_value};

#[derive(Debug, Clone, PartialEq)]
struct Decoded {
    message_type: Option<MessageType>,
    message_id: Option<u32>,
    method_name: String,
    arguments: Vec<Value>,
}

fn arb_argument() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Nil),
        any::<bool>().prop_map(Value::Boolean),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,48}".prop_map(Value::from),
        proptest::collection::vec(any::<u8>(), 0..400).prop_map(|raw| Value::Binary(raw.into())),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        proptest::collection::vec(inner, 0..18).prop_map(Value::Array)
    })
}

fn arb_envelope() -> impl Strategy<Value = (Option<u32>, String, Vec<Value>)> {
    (
        proptest::option::of(any::<u32>()),
        "[a-z_]{1,40}",
        proptest::collection::vec(arb_argument(), 0..20),
    )
}

fn encode(message_id: Option<u32>, method: &str, args: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    match message_id {
        Some(id) => {
            write_array_len(&mut out, 4).expect("编码失败");
            write_uint(&mut out, 0);
            write_uint(&mut out, u64::from(id));
        }
        None => {
            write_array_len(&mut out, 3).expect("编码失败");
            write_uint(&mut out, 2);
        }
    }
    write_str(&mut out, method).expect("编码失败");
    write_array_len(&mut out, args.len()).expect("编码失败");
    for arg in args {
        write_value(&mut out, arg).expect("编码失败");
    }
    out
}

fn decode_in_chunks(bytes: &[u8], cuts: &[usize]) -> Decoded {
    let mut ctx = RequestContext::new(1024);
    let mut bounds: Vec<usize> = cuts.iter().map(|cut| cut % (bytes.len() + 1)).collect();
    bounds.push(0);
    bounds.push(bytes.len());
    bounds.sort_unstable();
    bounds.dedup();

    let mut ready = false;
    for window in bounds.windows(2) {
        assert!(!ready, "信封提前完成");
        ctx.feed(Bytes::copy_from_slice(&bytes[window[0]..window[1]]));
        match ctx.process() {
            PipelineOutcome::Ready => ready = true,
            PipelineOutcome::Suspended => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert!(ready, "全部字节送达后应就绪");
    let message_type = ctx.message_type();
    let message_id = ctx.message_id();
    let method_name = ctx.method_name().to_owned();
    let arguments = ctx
        .invocation()
        .expect("调用就绪")
        .into_arguments()
        .collect_values()
        .expect("参数应可解码");
    Decoded {
        message_type,
        message_id,
        method_name,
        arguments,
    }
}

proptest! {
    #[test]
    fn decoding_is_chunk_boundary_invariant(
        (message_id, method, args) in arb_envelope(),
        cuts in proptest::collection::vec(any::<usize>(), 0..12),
    ) {
        let bytes = encode(message_id, &method, &args);
        let whole = decode_in_chunks(&bytes, &[]);
        let chunked = decode_in_chunks(&bytes, &cuts);
        prop_assert_eq!(&whole, &chunked);
        prop_assert_eq!(whole.method_name, method);
        prop_assert_eq!(whole.message_id, message_id);
        let expected_type = if message_id.is_some() {
            MessageType::Request
        } else {
            MessageType::Notification
        };
        prop_assert_eq!(whole.message_type, Some(expected_type));
        prop_assert_eq!(whole.arguments, args);
    }
}

/// 两条信封在同一次读取中到达：第一条完成后，剩余字节须完整转交给下一周期。
#[test]
fn pipelined_envelopes_survive_context_reset() {
    let mut bytes = encode(Some(1), "first", &[Value::from(1u32)]);
    bytes.extend(encode(Some(2), "second", &[Value::from("two")]));

    let mut first = RequestContext::new(64);
    first.feed(Bytes::from(bytes));
    assert!(first.process().is_ready());
    assert_eq!(first.method_name(), "first");
    let leftover = first.take_unconsumed();

    let mut second = RequestContext::new(64);
    second.prime(leftover);
    assert!(second.process().is_ready());
    assert_eq!(second.method_name(), "second");
    assert_eq!(second.message_id(), Some(2));
}

//! 可恢复的反序列化流水线。
//!
//! # 教案背景（Why）
//! - 非阻塞读取随时可能在任意字节处截断一个请求；流水线把解码拆成若干阶段，
//!   每个阶段要么完整结束并前移“下一处理步骤”指针，要么原地挂起等待更多字节；
//! - 挂起不依赖调用栈：所有已提交的进度都保存在 [`RequestContext`] 的字段中，
//!   未提交的只有单个元素头（标记与长度前缀），挂起时游标回退到该元素头的起点；
//! - 字符串、二进制等负载以及容器的子元素按到达量逐步推进，同一字节不会被重复解码。
//!
//! # 阶段顺序（How）
//! 1. [`PipelineStage::Header`]：数组头、类型标签、请求 ID、方法名逐个提交；
//! 2. [`PipelineStage::ArgumentsCount`]：读取参数数组头；
//! 3. [`PipelineStage::ArgumentsCopy`]：逐个读取参数值并按相同编码写入隔离缓冲；
//! 4. [`PipelineStage::Complete`]：调用已就绪；
//! - [`PipelineStage::Discard`]：单条消息格式错误后越过信封剩余元素，保持帧同步。
//!
//! # 合约说明（What）
//! - 同一信封无论被切成多少块送达，解码结果一致；
//! - 挂起时已消费字节被截断，逐字节发送的慢客户端不会导致缓冲无界增长。

use spark_codec_msgpack::{
    DecodeError, MAX_NESTING_DEPTH, read_array_len, read_element_header, read_str_len, read_u64,
};
use tracing::debug;

use crate::context::RequestContext;
use crate::error::{CoreError, codes};
use crate::message::MessageType;

/// 流水线阶段，即请求上下文的“下一处理步骤”指针。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Header,
    ArgumentsCount,
    ArgumentsCopy,
    Discard,
    Complete,
}

/// 一次 [`process`] 调用的结果。
#[derive(Debug)]
pub enum PipelineOutcome {
    /// 完整请求已解码，可以调度。
    Ready,
    /// 数据不足，需要下一次接收完成后恢复。
    Suspended,
    /// 单条消息格式错误；信封已被完整越过，连接可继续使用。
    Rejected {
        error: CoreError,
        message_id: Option<u32>,
    },
    /// 帧同步丢失，连接必须关闭。
    Fatal(CoreError),
}

impl PipelineOutcome {
    /// 是否就绪。
    pub fn is_ready(&self) -> bool {
        matches!(self, PipelineOutcome::Ready)
    }

    /// 是否挂起。
    pub fn is_suspended(&self) -> bool {
        matches!(self, PipelineOutcome::Suspended)
    }
}

enum Step {
    Advance(PipelineStage),
    Suspend,
    Violation(CoreError),
    Fatal(CoreError),
}

/// 从当前阶段开始驱动流水线。
pub fn process(ctx: &mut RequestContext) -> PipelineOutcome {
    loop {
        let step = match ctx.stage {
            PipelineStage::Header => header(ctx),
            PipelineStage::ArgumentsCount => arguments_count(ctx),
            PipelineStage::ArgumentsCopy => arguments_copy(ctx),
            PipelineStage::Discard => discard(ctx),
            PipelineStage::Complete => return PipelineOutcome::Ready,
        };
        match step {
            Step::Advance(PipelineStage::Complete) if ctx.violation.is_some() => {
                ctx.stage = PipelineStage::Complete;
                let error = ctx
                    .violation
                    .take()
                    .unwrap_or_else(|| violation("envelope rejected"));
                return PipelineOutcome::Rejected {
                    error,
                    message_id: ctx.message_id,
                };
            }
            Step::Advance(next) => ctx.stage = next,
            Step::Suspend => {
                ctx.stream.truncate_consumed();
                debug!(
                    stage = ?ctx.stage,
                    buffered = ctx.stream.length(),
                    "pipeline suspended awaiting more bytes"
                );
                return PipelineOutcome::Suspended;
            }
            Step::Violation(error) => {
                ctx.discard_remaining = ctx.declared_elements.map_or(0, |declared| {
                    u64::from(declared.saturating_sub(ctx.consumed_elements))
                });
                ctx.pending_payload = 0;
                ctx.violation = Some(error);
                ctx.stage = PipelineStage::Discard;
            }
            Step::Fatal(error) => return PipelineOutcome::Fatal(error),
        }
    }
}

/// 以“检查点”方式执行单个定长元素或元素头的读取：数据不足时游标回到元素起点。
macro_rules! element {
    ($ctx:expr, $read:expr) => {{
        let checkpoint = $ctx.stream.position();
        match $read(&mut $ctx.stream) {
            Ok(value) => Ok(value),
            Err(err) => {
                $ctx.stream.seek(checkpoint);
                Err(err)
            }
        }
    }};
}

fn header(ctx: &mut RequestContext) -> Step {
    if ctx.declared_elements.is_none() {
        match element!(ctx, read_array_len) {
            Ok(len) => {
                ctx.declared_elements = Some(len);
                ctx.consumed_elements = 0;
            }
            Err(err) if err.is_incomplete() => return Step::Suspend,
            Err(err) => return Step::Fatal(unrecoverable(&err)),
        }
    }
    let declared = ctx.declared_elements.unwrap_or_default();

    if ctx.message_type.is_none() {
        if declared == 0 {
            return Step::Violation(violation("envelope array is empty"));
        }
        let code = match element!(ctx, read_u64) {
            Ok(code) => code,
            Err(err) => return element_failure(err, "message type"),
        };
        ctx.consumed_elements += 1;
        match MessageType::from_code(code) {
            Some(MessageType::Response) => {
                return Step::Violation(violation(
                    "response messages are not accepted on the server inbound path",
                ));
            }
            Some(message_type) => ctx.message_type = Some(message_type),
            None => {
                return Step::Violation(violation(format!("unknown message type tag {code}")));
            }
        }
    }
    let message_type = ctx.message_type.unwrap_or(MessageType::Notification);

    if message_type == MessageType::Request && ctx.message_id.is_none() && declared >= 2 {
        let id = match element!(ctx, read_u64) {
            Ok(id) => id,
            Err(err) => return element_failure(err, "message id"),
        };
        ctx.consumed_elements += 1;
        match u32::try_from(id) {
            Ok(id) => ctx.message_id = Some(id),
            Err(_) => return Step::Violation(violation("message id must be a uint32")),
        }
    }

    if declared != message_type.arity() {
        return Step::Violation(violation(format!(
            "{message_type:?} envelope must have {} elements, found {declared}",
            message_type.arity()
        )));
    }

    // 方法名负载暂存于参数缓冲，参数数组头读出前会被清空。
    if !ctx.name_header_read {
        match element!(ctx, read_str_len) {
            Ok(len) => {
                ctx.name_header_read = true;
                ctx.pending_payload = len;
                ctx.arguments.clear();
            }
            Err(err) => return element_failure(err, "method name"),
        }
    }
    if !drain_payload(ctx, true) {
        return Step::Suspend;
    }
    ctx.consumed_elements += 1;
    let Ok(name) = std::str::from_utf8(&ctx.arguments) else {
        return Step::Violation(violation("method name is not valid UTF-8"));
    };
    ctx.method_name.clear();
    ctx.method_name.push_str(name);
    ctx.arguments.clear();
    Step::Advance(PipelineStage::ArgumentsCount)
}

fn arguments_count(ctx: &mut RequestContext) -> Step {
    match element!(ctx, read_array_len) {
        Ok(count) => {
            ctx.arguments_count = count;
            ctx.unpacked_arguments = 0;
            ctx.arguments.clear();
            Step::Advance(PipelineStage::ArgumentsCopy)
        }
        Err(err) => element_failure(err, "arguments"),
    }
}

fn arguments_copy(ctx: &mut RequestContext) -> Step {
    while ctx.unpacked_arguments < ctx.arguments_count {
        match copy_argument(ctx) {
            Ok(()) => ctx.unpacked_arguments += 1,
            Err(err) if err.is_incomplete() => return Step::Suspend,
            Err(err @ DecodeError::InvalidMarker(_)) => return Step::Fatal(unrecoverable(&err)),
            Err(err) => return argument_violation(ctx, &err.to_string()),
        }
    }
    ctx.consumed_elements += 1;
    Step::Advance(PipelineStage::Complete)
}

/// 把当前参数的剩余部分原样拷入参数缓冲。
///
/// 每完成一个元素头就立即写出并提交；挂起后从中断的元素头或负载位置继续，
/// 参数整体分多少次到达，总工作量都与参数字节数成正比。
fn copy_argument(ctx: &mut RequestContext) -> Result<(), DecodeError> {
    loop {
        if ctx.pending_payload > 0 {
            if !drain_payload(ctx, true) {
                return Err(DecodeError::Incomplete {
                    needed: ctx.pending_payload,
                });
            }
            if let Some(start) = ctx.utf8_start.take()
                && std::str::from_utf8(&ctx.arguments[start..]).is_err()
            {
                if close_element(&mut ctx.open_containers) {
                    ctx.unpacked_arguments += 1;
                }
                return Err(DecodeError::InvalidUtf8);
            }
            if close_element(&mut ctx.open_containers) {
                return Ok(());
            }
            continue;
        }

        if ctx.open_containers.len() >= MAX_NESTING_DEPTH {
            return Err(DecodeError::DepthLimitExceeded {
                limit: MAX_NESTING_DEPTH,
            });
        }
        let checkpoint = ctx.stream.position();
        let header = element!(ctx, read_element_header)?;
        let header_len = ctx.stream.position() - checkpoint;
        ctx.stream.seek(checkpoint);
        let raw = ctx.stream.read(header_len)?;
        ctx.arguments.extend_from_slice(&raw);

        if header.children > 0 {
            ctx.open_containers.push(header.children);
        } else if header.payload > 0 {
            if header.is_str() {
                ctx.utf8_start = Some(ctx.arguments.len());
            }
            ctx.pending_payload = header.payload;
        } else if close_element(&mut ctx.open_containers) {
            return Ok(());
        }
    }
}

/// 记录一个元素完成；返回 `true` 表示最外层参数已完整。
fn close_element(open: &mut Vec<u64>) -> bool {
    loop {
        let Some(remaining) = open.last_mut() else {
            return true;
        };
        *remaining -= 1;
        if *remaining > 0 {
            return false;
        }
        open.pop();
    }
}

/// 消费当前元素已到达的负载字节；`keep` 为真时追加到参数缓冲。返回负载是否已完整。
fn drain_payload(ctx: &mut RequestContext, keep: bool) -> bool {
    let available = ctx.pending_payload.min(ctx.stream.remaining());
    if available > 0 {
        let Ok(chunk) = ctx.stream.read(available) else {
            return false;
        };
        if keep {
            ctx.arguments.extend_from_slice(&chunk);
        }
        ctx.pending_payload -= available;
    }
    ctx.pending_payload == 0
}

/// 参数内部的错误只需越过参数数组剩余元素：参数数组是信封最后一个元素。
///
/// 出错时游标可能停在某个参数内部，此时待越过的元素还包括各层容器尚未读到的子元素；
/// 非最内层的计数包含正在读取的子容器本身，其头部已被消费，需要扣除。
fn argument_violation(ctx: &mut RequestContext, detail: &str) -> Step {
    let rest = u64::from(ctx.arguments_count - ctx.unpacked_arguments);
    let depth = ctx.open_containers.len() as u64;
    let open: u64 = ctx.open_containers.drain(..).sum();
    ctx.violation = Some(violation(format!(
        "argument #{} is malformed: {detail}",
        ctx.unpacked_arguments
    )));
    ctx.discard_remaining = if depth > 0 {
        open - (depth - 1) + rest - 1
    } else {
        rest
    };
    ctx.pending_payload = 0;
    ctx.utf8_start = None;
    Step::Advance(PipelineStage::Discard)
}

fn discard(ctx: &mut RequestContext) -> Step {
    loop {
        if !drain_payload(ctx, false) {
            return Step::Suspend;
        }
        if ctx.discard_remaining == 0 {
            return Step::Advance(PipelineStage::Complete);
        }
        match element!(ctx, read_element_header) {
            Ok(header) => {
                ctx.discard_remaining = ctx.discard_remaining - 1 + header.children;
                ctx.pending_payload = header.payload;
            }
            Err(err) if err.is_incomplete() => return Step::Suspend,
            Err(err) => return Step::Fatal(unrecoverable(&err)),
        }
    }
}

fn element_failure(err: DecodeError, element: &str) -> Step {
    if err.is_incomplete() {
        return Step::Suspend;
    }
    if let DecodeError::InvalidMarker(_) = err {
        return Step::Fatal(unrecoverable(&err));
    }
    Step::Violation(violation(format!("invalid {element}: {err}")))
}

fn violation(message: impl Into<std::borrow::Cow<'static, str>>) -> CoreError {
    CoreError::new(codes::PROTOCOL_VIOLATION, message)
}

fn unrecoverable(err: &DecodeError) -> CoreError {
    CoreError::new(
        codes::PROTOCOL_UNRECOVERABLE,
        format!("envelope framing lost: {err}"),
    )
    .with_cause(err.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use spark_codec_msgpack::Value;

    fn feed(ctx: &mut RequestContext, bytes: &[u8]) -> PipelineOutcome {
        ctx.feed(Bytes::copy_from_slice(bytes));
        ctx.process()
    }

    const ECHO: &[u8] = &[0x94, 0x00, 0x07, 0xa4, b'e', b'c', b'h', b'o', 0x91, 0x2a];

    #[test]
    fn complete_request_in_one_chunk() {
        let mut ctx = RequestContext::new(64);
        assert!(feed(&mut ctx, ECHO).is_ready());
        assert_eq!(ctx.message_type(), Some(MessageType::Request));
        assert_eq!(ctx.message_id(), Some(7));
        assert_eq!(ctx.method_name(), "echo");
        assert_eq!(ctx.arguments_count(), 1);
        let args = ctx.invocation().expect("调用就绪").into_arguments();
        assert_eq!(args.collect_values(), Ok(vec![Value::from(42u32)]));
    }

    #[test]
    fn byte_at_a_time_resumes_each_stage() {
        let mut ctx = RequestContext::new(64);
        for (index, byte) in ECHO.iter().enumerate() {
            let outcome = feed(&mut ctx, &[*byte]);
            if index + 1 < ECHO.len() {
                assert!(outcome.is_suspended(), "byte {index}: {outcome:?}");
                assert!(ctx.buffered_len() <= 5, "挂起时应截断已消费字节");
            } else {
                assert!(outcome.is_ready());
            }
        }
        assert_eq!(ctx.method_name(), "echo");
    }

    #[test]
    fn notification_has_no_message_id() {
        let mut ctx = RequestContext::new(64);
        let bytes = [0x93, 0x02, 0xa6, b'n', b'o', b't', b'i', b'f', b'y', 0x91, 0xa1, b'x'];
        assert!(feed(&mut ctx, &bytes).is_ready());
        assert_eq!(ctx.message_type(), Some(MessageType::Notification));
        assert_eq!(ctx.message_id(), None);
    }

    #[test]
    fn request_arity_mismatch_is_rejected_with_id() {
        let mut ctx = RequestContext::new(64);
        match feed(&mut ctx, &[0x92, 0x00, 0x07]) {
            PipelineOutcome::Rejected { error, message_id } => {
                assert_eq!(error.code(), codes::PROTOCOL_VIOLATION);
                assert_eq!(message_id, Some(7));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(ctx.unparsed_len(), 0);
    }

    #[test]
    fn violation_discards_rest_of_envelope_across_chunks() {
        let mut ctx = RequestContext::new(64);
        // 通知携带 4 个元素：[2, "m", [1], {"k": "v"}]，随后紧跟下一条请求的首字节。
        let bytes = [0x94, 0x02, 0xa1, b'm', 0x91, 0x01, 0x81, 0xa1, b'k', 0xa1, b'v', 0x94];
        assert!(feed(&mut ctx, &bytes[..7]).is_suspended());
        match feed(&mut ctx, &bytes[7..]) {
            PipelineOutcome::Rejected { message_id, .. } => assert_eq!(message_id, None),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(ctx.unparsed_len(), 1, "下一条信封的字节必须保留");
    }

    #[test]
    fn inbound_response_is_a_violation() {
        let mut ctx = RequestContext::new(64);
        let bytes = [0x94, 0x01, 0x07, 0xc0, 0xc0];
        assert!(matches!(
            feed(&mut ctx, &bytes),
            PipelineOutcome::Rejected { .. }
        ));
        assert_eq!(ctx.unparsed_len(), 0);
    }

    #[test]
    fn non_array_envelope_is_fatal() {
        let mut ctx = RequestContext::new(64);
        match feed(&mut ctx, &[0xa3, b'b', b'a', b'd']) {
            PipelineOutcome::Fatal(error) => {
                assert_eq!(error.code(), codes::PROTOCOL_UNRECOVERABLE)
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn malformed_argument_is_skipped() {
        let mut ctx = RequestContext::new(64);
        // [0, 1, "f", [<invalid utf8 str>, 5]]
        let bytes = [0x94, 0x00, 0x01, 0xa1, b'f', 0x92, 0xa1, 0xff, 0x05];
        match feed(&mut ctx, &bytes) {
            PipelineOutcome::Rejected { error, message_id } => {
                assert_eq!(error.code(), codes::PROTOCOL_VIOLATION);
                assert_eq!(message_id, Some(1));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(ctx.unparsed_len(), 0);
    }

    fn argument_envelope(argument: &[u8]) -> Vec<u8> {
        // [2, "m", [<argument>]]
        let mut bytes = vec![0x93, 0x02, 0xa1, b'm', 0x91];
        bytes.extend_from_slice(argument);
        bytes
    }

    #[test]
    fn large_argument_resumes_inside_the_value() {
        // {"k": [0; 4000], "s": <300 字节字符串>}
        let mut argument = vec![0x82, 0xa1, b'k', 0xdc, 0x0f, 0xa0];
        argument.extend(std::iter::repeat_n(0x00, 4000));
        argument.extend_from_slice(&[0xa1, b's', 0xda, 0x01, 0x2c]);
        argument.extend(std::iter::repeat_n(b'z', 300));
        let bytes = argument_envelope(&argument);

        let mut ctx = RequestContext::new(64);
        let mut outcome = PipelineOutcome::Suspended;
        for (index, byte) in bytes.iter().enumerate() {
            outcome = feed(&mut ctx, &[*byte]);
            if index + 1 < bytes.len() {
                assert!(outcome.is_suspended(), "byte {index}: {outcome:?}");
                assert!(
                    ctx.buffered_len() < 5,
                    "byte {index}: 挂起时只应保留未完成的元素头，实际 {}",
                    ctx.buffered_len()
                );
            }
        }
        assert!(outcome.is_ready(), "{outcome:?}");
        let args = ctx.invocation().expect("调用就绪").into_arguments();
        let values = args.collect_values().expect("参数可解码");
        let Value::Map(entries) = &values[0] else {
            panic!("unexpected argument {values:?}");
        };
        assert_eq!(entries[0].1, Value::Array(vec![Value::UInt(0); 4000]));
        assert_eq!(entries[1].1, Value::String("z".repeat(300)));
    }

    #[test]
    fn arguments_keep_their_original_encoding() {
        // u32 编码的 5 不应被改写为 fixint。
        let bytes = argument_envelope(&[0xce, 0x00, 0x00, 0x00, 0x05]);
        let mut ctx = RequestContext::new(64);
        assert!(feed(&mut ctx, &bytes).is_ready());
        assert_eq!(&ctx.arguments[..], &[0xce, 0x00, 0x00, 0x00, 0x05]);
    }

    #[test]
    fn malformed_nested_argument_skips_the_rest_of_the_envelope() {
        // [0, 4, "f", [[1, <非法 UTF-8>], 9, 5]]，随后是下一条信封的首字节。
        let bytes = [
            0x94, 0x00, 0x04, 0xa1, b'f', 0x93, 0x92, 0x01, 0xa1, 0xff, 0x09, 0x05, 0x94,
        ];
        let mut ctx = RequestContext::new(64);
        let mut outcome = PipelineOutcome::Suspended;
        for byte in &bytes[..bytes.len() - 1] {
            outcome = feed(&mut ctx, &[*byte]);
        }
        match outcome {
            PipelineOutcome::Rejected { error, message_id } => {
                assert_eq!(error.code(), codes::PROTOCOL_VIOLATION);
                assert_eq!(message_id, Some(4));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        ctx.feed(Bytes::from_static(&[0x94]));
        assert_eq!(ctx.unparsed_len(), 1, "下一条信封的字节必须保留");
    }

    #[test]
    fn nesting_limit_inside_argument_keeps_framing() {
        // [2, "m", [<64 层嵌套的 [1]>, 5]] + 下一条信封首字节
        let mut bytes = vec![0x93, 0x02, 0xa1, b'm', 0x92];
        bytes.extend(std::iter::repeat_n(0x91, MAX_NESTING_DEPTH));
        bytes.extend_from_slice(&[0x01, 0x05, 0x94]);
        let mut ctx = RequestContext::new(64);
        match feed(&mut ctx, &bytes) {
            PipelineOutcome::Rejected { error, message_id } => {
                assert_eq!(error.code(), codes::PROTOCOL_VIOLATION);
                assert_eq!(message_id, None);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(ctx.unparsed_len(), 1);
    }

    #[test]
    fn split_method_name_is_assembled() {
        let mut ctx = RequestContext::new(64);
        let bytes = [0x93, 0x02, 0xa6, b'n', b'o', b't', b'i', b'f', b'y', 0x90];
        assert!(feed(&mut ctx, &bytes[..5]).is_suspended());
        assert!(feed(&mut ctx, &bytes[5..8]).is_suspended());
        assert!(feed(&mut ctx, &bytes[8..]).is_ready());
        assert_eq!(ctx.method_name(), "notify");
        assert_eq!(ctx.arguments_count(), 0);
    }

    #[test]
    fn non_string_method_name_is_rejected() {
        let mut ctx = RequestContext::new(64);
        let bytes = [0x94, 0x00, 0x03, 0x05, 0x90];
        assert!(matches!(
            feed(&mut ctx, &bytes),
            PipelineOutcome::Rejected {
                message_id: Some(3),
                ..
            }
        ));
        assert_eq!(ctx.unparsed_len(), 0);
    }
}

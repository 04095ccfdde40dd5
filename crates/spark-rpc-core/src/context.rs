use bytes::{Bytes, BytesMut};

use crate::dispatch::{ArgumentsReader, Invocation};
use crate::error::CoreError;
use crate::message::MessageType;
use crate::pipeline::{self, PipelineOutcome, PipelineStage};
use crate::pool::Poolable;
use crate::segment::SegmentStream;

/// 参数缓冲的默认初始容量。
pub const DEFAULT_ARGUMENTS_CAPACITY: usize = 64 * 1024;

/// 解码单个请求/通知并产出其响应所需的可变工作集。
///
/// # 教案式说明
///
/// ## 意图（Why）
/// - 一个请求可能横跨多次接收完成；上下文把“已解码到哪里”完整保存在自身字段里，
///   接收路径只需追加字节并再次调用 [`RequestContext::process`]；
/// - 参数被重新打包进独立缓冲，调度器可以按方法签名惰性解析，而不必继续持有接收缓冲。
///
/// ## 逻辑（How）
/// - `stage` 即“下一处理步骤”指针，只有当某阶段完整结束才前移；
/// - 信封头的每个子元素（数组头、类型、ID、方法名）单独提交，恢复时只重读被截断的那个元素；
/// - 参数按元素头逐个推进，容器栈与剩余负载字节数记录在上下文中，大参数分多次到达时不会被重复解码；
/// - 周期结束时 [`RequestContext::clear_buffers`] 先截断已消费字节再清空，
///   [`RequestContext::clear_dispatch_context`] 复位解码结果。
///
/// ## 契约（What）
/// - `message_type() == None` 表示上下文尚未初始化（信封类型尚未读出）；
/// - [`Poolable::reset`] 同时执行两类清理，保证归还池中的实例不残留单次状态。
#[derive(Debug)]
pub struct RequestContext {
    pub(crate) stream: SegmentStream,
    pub(crate) stage: PipelineStage,
    pub(crate) declared_elements: Option<u32>,
    pub(crate) consumed_elements: u32,
    pub(crate) message_type: Option<MessageType>,
    pub(crate) message_id: Option<u32>,
    pub(crate) method_name: String,
    pub(crate) arguments_count: u32,
    pub(crate) unpacked_arguments: u32,
    pub(crate) arguments: BytesMut,
    /// 当前参数中各层容器尚未拷贝的子元素数，栈顶为最内层。
    pub(crate) open_containers: Vec<u64>,
    /// 当前元素尚未到达的负载字节数。
    pub(crate) pending_payload: usize,
    /// 正在拷贝的字符串负载在参数缓冲中的起点，负载完整后据此校验 UTF-8。
    pub(crate) utf8_start: Option<usize>,
    pub(crate) name_header_read: bool,
    pub(crate) discard_remaining: u64,
    pub(crate) violation: Option<CoreError>,
    arguments_capacity: usize,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(DEFAULT_ARGUMENTS_CAPACITY)
    }
}

impl RequestContext {
    /// 以指定参数缓冲容量创建空上下文。
    pub fn new(arguments_capacity: usize) -> Self {
        Self {
            stream: SegmentStream::new(),
            stage: PipelineStage::Header,
            declared_elements: None,
            consumed_elements: 0,
            message_type: None,
            message_id: None,
            method_name: String::new(),
            arguments_count: 0,
            unpacked_arguments: 0,
            arguments: BytesMut::with_capacity(arguments_capacity),
            open_containers: Vec::new(),
            pending_payload: 0,
            utf8_start: None,
            name_header_read: false,
            discard_remaining: 0,
            violation: None,
            arguments_capacity,
        }
    }

    /// 追加一次接收完成带来的字节。
    pub fn feed(&mut self, received: Bytes) {
        self.stream.append(received);
    }

    /// 以上一周期遗留的字节作为本周期的起始数据。
    pub fn prime(&mut self, leftover: SegmentStream) {
        self.stream = leftover;
    }

    /// 运行流水线直至完成、挂起或失败。
    pub fn process(&mut self) -> PipelineOutcome {
        pipeline::process(self)
    }

    /// 流水线下一步将执行的阶段。
    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// 已解码的消息类型。
    pub fn message_type(&self) -> Option<MessageType> {
        self.message_type
    }

    /// 已解码的请求 ID。
    pub fn message_id(&self) -> Option<u32> {
        self.message_id
    }

    /// 已解码的方法名。
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// 参数数组声明的元素个数。
    pub fn arguments_count(&self) -> u32 {
        self.arguments_count
    }

    /// 已拷贝进参数缓冲的参数个数。
    pub fn unpacked_arguments(&self) -> u32 {
        self.unpacked_arguments
    }

    /// 分段流中仍保留的字节数（含已消费未截断部分）。
    pub fn buffered_len(&self) -> usize {
        self.stream.length()
    }

    /// 游标之后尚未解析的字节数。
    pub fn unparsed_len(&self) -> usize {
        self.stream.remaining()
    }

    /// 在流水线就绪后组装调度调用。
    ///
    /// 参数缓冲被拆出并冻结为只读视图交给 [`ArgumentsReader`]；流水线未就绪时返回 `None`。
    pub fn invocation(&mut self) -> Option<Invocation<'_>> {
        if self.stage != PipelineStage::Complete {
            return None;
        }
        let message_type = self.message_type?;
        let packed = self.arguments.split().freeze();
        let reader = ArgumentsReader::new(packed, self.arguments_count);
        Some(Invocation::new(
            &self.method_name,
            message_type,
            self.message_id,
            reader,
        ))
    }

    /// 移出游标之后的字节，供下一周期的上下文继续解析。
    pub fn take_unconsumed(&mut self) -> SegmentStream {
        self.stream.take_unconsumed()
    }

    /// 截断已消费字节，随后清空分段流与参数缓冲。
    pub fn clear_buffers(&mut self) {
        self.stream.truncate_consumed();
        self.stream.clear();
        self.arguments.clear();
        if self.arguments.capacity() < self.arguments_capacity {
            self.arguments.reserve(self.arguments_capacity);
        }
    }

    /// 复位解码结果与阶段指针。
    pub fn clear_dispatch_context(&mut self) {
        self.stage = PipelineStage::Header;
        self.declared_elements = None;
        self.consumed_elements = 0;
        self.message_type = None;
        self.message_id = None;
        self.method_name.clear();
        self.arguments_count = 0;
        self.unpacked_arguments = 0;
        self.open_containers.clear();
        self.pending_payload = 0;
        self.utf8_start = None;
        self.name_header_read = false;
        self.discard_remaining = 0;
        self.violation = None;
    }
}

impl Poolable for RequestContext {
    fn reset(&mut self) {
        self.clear_buffers();
        self.clear_dispatch_context();
    }
}

use bytes::BufMut;
use spark_codec_msgpack::{EncodeError, Value, write_array_len, write_nil, write_uint, write_value};

/// 信封首元素携带的消息类型。
///
/// 服务端入站路径只接受 `Request` 与 `Notification`；`Response` 仅由本端产生。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    Request,
    Response,
    Notification,
}

impl MessageType {
    /// 由线上类型标签解析；未知标签返回 `None`。
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(MessageType::Request),
            1 => Some(MessageType::Response),
            2 => Some(MessageType::Notification),
            _ => None,
        }
    }

    /// 线上类型标签。
    pub fn code(self) -> u8 {
        match self {
            MessageType::Request => 0,
            MessageType::Response => 1,
            MessageType::Notification => 2,
        }
    }

    /// 该类型信封应有的元素个数。
    pub fn arity(self) -> u32 {
        match self {
            MessageType::Request | MessageType::Response => 4,
            MessageType::Notification => 3,
        }
    }
}

/// 打包响应信封 `[1, message_id, error, result]`。
///
/// `Ok(result)` 写入 `[1, id, nil, result]`，`Err(error)` 写入 `[1, id, error, nil]`。
pub fn encode_response<B: BufMut + ?Sized>(
    out: &mut B,
    message_id: u32,
    outcome: &Result<Value, Value>,
) -> Result<(), EncodeError> {
    write_array_len(out, 4)?;
    write_uint(out, u64::from(MessageType::Response.code()));
    write_uint(out, u64::from(message_id));
    match outcome {
        Ok(result) => {
            write_nil(out);
            write_value(out, result)?;
        }
        Err(error) => {
            write_value(out, error)?;
            write_nil(out);
        }
    }
    Ok(())
}

use bytes::{Buf, Bytes};

use crate::error::DecodeError;
use crate::marker::Marker;
use crate::source::ByteSource;
use crate::value::Value;

/// 动态值解码允许的最大嵌套深度。
pub const MAX_NESTING_DEPTH: usize = 64;

/// 预分配容量上限，避免恶意长度前缀触发巨额分配。
const PREALLOCATION_CAP: usize = 1024;

/// 读取并解析下一个标记字节。
///
/// 保留字节 `0xc1` 返回 [`DecodeError::InvalidMarker`]。
pub fn read_marker<S: ByteSource + ?Sized>(source: &mut S) -> Result<Marker, DecodeError> {
    let byte = source.take_u8()?;
    match Marker::from_u8(byte) {
        Marker::Reserved => Err(DecodeError::InvalidMarker(byte)),
        marker => Ok(marker),
    }
}

/// 读取数组头，返回声明的元素数。
pub fn read_array_len<S: ByteSource + ?Sized>(source: &mut S) -> Result<u32, DecodeError> {
    match read_marker(source)? {
        Marker::FixArray(len) => Ok(u32::from(len)),
        Marker::Array16 => Ok(u32::from(be_u16(source)?)),
        Marker::Array32 => be_u32(source),
        other => Err(mismatch("array", other)),
    }
}

/// 读取映射头，返回声明的条目数。
pub fn read_map_len<S: ByteSource + ?Sized>(source: &mut S) -> Result<u32, DecodeError> {
    match read_marker(source)? {
        Marker::FixMap(len) => Ok(u32::from(len)),
        Marker::Map16 => Ok(u32::from(be_u16(source)?)),
        Marker::Map32 => be_u32(source),
        other => Err(mismatch("map", other)),
    }
}

/// 读取 `nil`。
pub fn read_nil<S: ByteSource + ?Sized>(source: &mut S) -> Result<(), DecodeError> {
    match read_marker(source)? {
        Marker::Nil => Ok(()),
        other => Err(mismatch("nil", other)),
    }
}

/// 读取布尔值。
pub fn read_bool<S: ByteSource + ?Sized>(source: &mut S) -> Result<bool, DecodeError> {
    match read_marker(source)? {
        Marker::True => Ok(true),
        Marker::False => Ok(false),
        other => Err(mismatch("boolean", other)),
    }
}

/// 读取任意整数编码并收窄为 `u64`。
///
/// 负数返回 [`DecodeError::IntegerOverflow`]。
pub fn read_u64<S: ByteSource + ?Sized>(source: &mut S) -> Result<u64, DecodeError> {
    let marker = read_marker(source)?;
    match read_integer(source, marker)? {
        Integer::Unsigned(value) => Ok(value),
        Integer::Signed(value) => {
            u64::try_from(value).map_err(|_| DecodeError::IntegerOverflow { target: "u64" })
        }
    }
}

/// 读取任意整数编码并收窄为 `u32`。
pub fn read_u32<S: ByteSource + ?Sized>(source: &mut S) -> Result<u32, DecodeError> {
    let value = read_u64(source)?;
    u32::try_from(value).map_err(|_| DecodeError::IntegerOverflow { target: "u32" })
}

/// 读取任意整数编码并收窄为 `i64`。
pub fn read_i64<S: ByteSource + ?Sized>(source: &mut S) -> Result<i64, DecodeError> {
    let marker = read_marker(source)?;
    match read_integer(source, marker)? {
        Integer::Signed(value) => Ok(value),
        Integer::Unsigned(value) => {
            i64::try_from(value).map_err(|_| DecodeError::IntegerOverflow { target: "i64" })
        }
    }
}

/// 读取字符串头，返回负载字节数；负载本身留在源中。
pub fn read_str_len<S: ByteSource + ?Sized>(source: &mut S) -> Result<usize, DecodeError> {
    match read_marker(source)? {
        Marker::FixStr(len) => Ok(usize::from(len)),
        Marker::Str8 => Ok(usize::from(source.take_u8()?)),
        Marker::Str16 => Ok(usize::from(be_u16(source)?)),
        Marker::Str32 => Ok(be_u32(source)? as usize),
        other => Err(mismatch("string", other)),
    }
}

/// 读取字符串的原始字节，不做 UTF-8 校验。
pub fn read_str_bytes<S: ByteSource + ?Sized>(source: &mut S) -> Result<Bytes, DecodeError> {
    let len = read_str_len(source)?;
    source.take(len)
}

/// 读取字符串并校验 UTF-8。
pub fn read_str<S: ByteSource + ?Sized>(source: &mut S) -> Result<String, DecodeError> {
    let raw = read_str_bytes(source)?;
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
}

/// 读取一个完整的动态值（含嵌套结构）。
///
/// # 教案式说明
/// - **意图（Why）**：参数拷贝阶段需要“读一个值、原样写回”，调度器也需要把参数还原为 [`Value`]；
/// - **逻辑（How）**：按标记分派；数组与映射递归读取子元素，深度每进入一层加一；
/// - **契约（What）**：
///   - 数据不足时返回 `Incomplete`，源游标停在中途，由调用方回退；
///   - 嵌套超过 [`MAX_NESTING_DEPTH`] 时返回 `DepthLimitExceeded`。
pub fn read_value<S: ByteSource + ?Sized>(source: &mut S) -> Result<Value, DecodeError> {
    read_value_at(source, 0)
}

fn read_value_at<S: ByteSource + ?Sized>(
    source: &mut S,
    depth: usize,
) -> Result<Value, DecodeError> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(DecodeError::DepthLimitExceeded {
            limit: MAX_NESTING_DEPTH,
        });
    }
    let marker = read_marker(source)?;
    let value = match marker {
        Marker::Nil => Value::Nil,
        Marker::True => Value::Boolean(true),
        Marker::False => Value::Boolean(false),
        Marker::PositiveFixInt(_)
        | Marker::NegativeFixInt(_)
        | Marker::U8
        | Marker::U16
        | Marker::U32
        | Marker::U64
        | Marker::I8
        | Marker::I16
        | Marker::I32
        | Marker::I64 => match read_integer(source, marker)? {
            Integer::Unsigned(value) => Value::UInt(value),
            Integer::Signed(value) => Value::from(value),
        },
        Marker::F32 => Value::F32(f32::from_bits(be_u32(source)?)),
        Marker::F64 => {
            let mut raw = source.take(8)?;
            Value::F64(f64::from_bits(raw.get_u64()))
        }
        Marker::FixStr(len) => string_value(source, usize::from(len))?,
        Marker::Str8 => {
            let len = usize::from(source.take_u8()?);
            string_value(source, len)?
        }
        Marker::Str16 => {
            let len = usize::from(be_u16(source)?);
            string_value(source, len)?
        }
        Marker::Str32 => {
            let len = be_u32(source)? as usize;
            string_value(source, len)?
        }
        Marker::Bin8 => {
            let len = usize::from(source.take_u8()?);
            Value::Binary(source.take(len)?)
        }
        Marker::Bin16 => {
            let len = usize::from(be_u16(source)?);
            Value::Binary(source.take(len)?)
        }
        Marker::Bin32 => {
            let len = be_u32(source)? as usize;
            Value::Binary(source.take(len)?)
        }
        Marker::FixArray(len) => array_value(source, u32::from(len), depth)?,
        Marker::Array16 => {
            let len = u32::from(be_u16(source)?);
            array_value(source, len, depth)?
        }
        Marker::Array32 => {
            let len = be_u32(source)?;
            array_value(source, len, depth)?
        }
        Marker::FixMap(len) => map_value(source, u32::from(len), depth)?,
        Marker::Map16 => {
            let len = u32::from(be_u16(source)?);
            map_value(source, len, depth)?
        }
        Marker::Map32 => {
            let len = be_u32(source)?;
            map_value(source, len, depth)?
        }
        Marker::FixExt1 => ext_value(source, 1)?,
        Marker::FixExt2 => ext_value(source, 2)?,
        Marker::FixExt4 => ext_value(source, 4)?,
        Marker::FixExt8 => ext_value(source, 8)?,
        Marker::FixExt16 => ext_value(source, 16)?,
        Marker::Ext8 => {
            let len = usize::from(source.take_u8()?);
            ext_value(source, len)?
        }
        Marker::Ext16 => {
            let len = usize::from(be_u16(source)?);
            ext_value(source, len)?
        }
        Marker::Ext32 => {
            let len = be_u32(source)? as usize;
            ext_value(source, len)?
        }
        Marker::Reserved => return Err(DecodeError::InvalidMarker(marker.to_u8())),
    };
    Ok(value)
}

/// 单个编码元素的头部：标记与长度前缀之后尚待处理的部分。
///
/// - `children`：数组贡献 `len` 个、映射贡献 `2 * len` 个后续元素；
/// - `payload`：标记与长度前缀之后紧随的原始字节数（扩展类型含 1 字节类型标签）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElementHeader {
    pub marker: Marker,
    pub children: u64,
    pub payload: usize,
}

impl ElementHeader {
    /// 负载是否为需要 UTF-8 校验的字符串。
    pub fn is_str(&self) -> bool {
        matches!(
            self.marker,
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32
        )
    }
}

/// 读取一个元素的标记与长度前缀，不触碰负载与子元素。
///
/// # 教案式说明
/// - **意图（Why）**：逐字节到达的大参数不能每次都从头重新解码；调用方以本函数为最小单位推进，
///   把“还剩多少子元素、还剩多少负载字节”记在自己的状态里，恢复时从中断的元素继续；
/// - **契约（What）**：仅在遇到保留标记时返回 `InvalidMarker`；数据不足返回 `Incomplete`，
///   已读取的标记字节由调用方回退。
pub fn read_element_header<S: ByteSource + ?Sized>(
    source: &mut S,
) -> Result<ElementHeader, DecodeError> {
    let marker = read_marker(source)?;
    let (children, payload) = match marker {
        Marker::Nil
        | Marker::True
        | Marker::False
        | Marker::PositiveFixInt(_)
        | Marker::NegativeFixInt(_) => (0, 0),
        Marker::U8 | Marker::I8 => (0, 1),
        Marker::U16 | Marker::I16 => (0, 2),
        Marker::U32 | Marker::I32 | Marker::F32 => (0, 4),
        Marker::U64 | Marker::I64 | Marker::F64 => (0, 8),
        Marker::FixStr(len) => (0, usize::from(len)),
        Marker::Str8 | Marker::Bin8 => (0, usize::from(source.take_u8()?)),
        Marker::Str16 | Marker::Bin16 => (0, usize::from(be_u16(source)?)),
        Marker::Str32 | Marker::Bin32 => (0, be_u32(source)? as usize),
        Marker::FixExt1 => (0, 2),
        Marker::FixExt2 => (0, 3),
        Marker::FixExt4 => (0, 5),
        Marker::FixExt8 => (0, 9),
        Marker::FixExt16 => (0, 17),
        Marker::Ext8 => (0, usize::from(source.take_u8()?) + 1),
        Marker::Ext16 => (0, usize::from(be_u16(source)?) + 1),
        Marker::Ext32 => (0, be_u32(source)? as usize + 1),
        Marker::FixArray(len) => (u64::from(len), 0),
        Marker::Array16 => (u64::from(be_u16(source)?), 0),
        Marker::Array32 => (u64::from(be_u32(source)?), 0),
        Marker::FixMap(len) => (2 * u64::from(len), 0),
        Marker::Map16 => (2 * u64::from(be_u16(source)?), 0),
        Marker::Map32 => (2 * u64::from(be_u32(source)?), 0),
        Marker::Reserved => return Err(DecodeError::InvalidMarker(marker.to_u8())),
    };
    Ok(ElementHeader {
        marker,
        children,
        payload,
    })
}

/// 跳过一个完整的值（含嵌套结构），不做 UTF-8 校验也不构造 [`Value`]。
///
/// # 教案式说明
/// - **意图（Why）**：格式错误之后需要越过剩余元素以保持帧同步；
///   跳过路径既不能因深度递归耗尽栈，也不应因负载内容（如非法 UTF-8）失败；
/// - **逻辑（How）**：以“待跳过元素计数”代替递归，每个元素只读 [`ElementHeader`]；
/// - **契约（What）**：仅在遇到保留标记时返回 `InvalidMarker`；数据不足返回 `Incomplete`。
pub fn skip_value<S: ByteSource + ?Sized>(source: &mut S) -> Result<(), DecodeError> {
    let mut pending: u64 = 1;
    while pending > 0 {
        pending -= 1;
        let header = read_element_header(source)?;
        pending += header.children;
        if header.payload > 0 {
            source.take(header.payload)?;
        }
    }
    Ok(())
}

enum Integer {
    Unsigned(u64),
    Signed(i64),
}

fn read_integer<S: ByteSource + ?Sized>(
    source: &mut S,
    marker: Marker,
) -> Result<Integer, DecodeError> {
    let value = match marker {
        Marker::PositiveFixInt(value) => Integer::Unsigned(u64::from(value)),
        Marker::NegativeFixInt(value) => Integer::Signed(i64::from(value)),
        Marker::U8 => Integer::Unsigned(u64::from(source.take_u8()?)),
        Marker::U16 => Integer::Unsigned(u64::from(be_u16(source)?)),
        Marker::U32 => Integer::Unsigned(u64::from(be_u32(source)?)),
        Marker::U64 => {
            let mut raw = source.take(8)?;
            Integer::Unsigned(raw.get_u64())
        }
        Marker::I8 => Integer::Signed(i64::from(source.take_u8()? as i8)),
        Marker::I16 => Integer::Signed(i64::from(be_u16(source)? as i16)),
        Marker::I32 => Integer::Signed(i64::from(be_u32(source)? as i32)),
        Marker::I64 => {
            let mut raw = source.take(8)?;
            Integer::Signed(raw.get_i64())
        }
        other => return Err(mismatch("integer", other)),
    };
    Ok(value)
}

fn string_value<S: ByteSource + ?Sized>(
    source: &mut S,
    len: usize,
) -> Result<Value, DecodeError> {
    let raw = source.take(len)?;
    let text = std::str::from_utf8(&raw).map_err(|_| DecodeError::InvalidUtf8)?;
    Ok(Value::String(text.to_owned()))
}

fn array_value<S: ByteSource + ?Sized>(
    source: &mut S,
    len: u32,
    depth: usize,
) -> Result<Value, DecodeError> {
    let len = len as usize;
    let mut items = Vec::with_capacity(len.min(PREALLOCATION_CAP));
    for _ in 0..len {
        items.push(read_value_at(source, depth + 1)?);
    }
    Ok(Value::Array(items))
}

fn map_value<S: ByteSource + ?Sized>(
    source: &mut S,
    len: u32,
    depth: usize,
) -> Result<Value, DecodeError> {
    let len = len as usize;
    let mut entries = Vec::with_capacity(len.min(PREALLOCATION_CAP));
    for _ in 0..len {
        let key = read_value_at(source, depth + 1)?;
        let value = read_value_at(source, depth + 1)?;
        entries.push((key, value));
    }
    Ok(Value::Map(entries))
}

fn ext_value<S: ByteSource + ?Sized>(source: &mut S, len: usize) -> Result<Value, DecodeError> {
    let tag = source.take_u8()? as i8;
    Ok(Value::Ext(tag, source.take(len)?))
}

fn be_u16<S: ByteSource + ?Sized>(source: &mut S) -> Result<u16, DecodeError> {
    let mut raw = source.take(2)?;
    Ok(raw.get_u16())
}

fn be_u32<S: ByteSource + ?Sized>(source: &mut S) -> Result<u32, DecodeError> {
    let mut raw = source.take(4)?;
    Ok(raw.get_u32())
}

fn mismatch(expected: &'static str, found: Marker) -> DecodeError {
    DecodeError::TypeMismatch {
        expected,
        found: found.family(),
    }
}

use bytes::BufMut;

use crate::error::EncodeError;
use crate::marker::Marker;
use crate::value::Value;

/// 写入 `nil`。
pub fn write_nil<B: BufMut + ?Sized>(out: &mut B) {
    out.put_u8(Marker::Nil.to_u8());
}

/// 写入布尔值。
pub fn write_bool<B: BufMut + ?Sized>(out: &mut B, value: bool) {
    let marker = if value { Marker::True } else { Marker::False };
    out.put_u8(marker.to_u8());
}

/// 以最短编码写入无符号整数。
pub fn write_uint<B: BufMut + ?Sized>(out: &mut B, value: u64) {
    if value < 0x80 {
        out.put_u8(value as u8);
    } else if value <= u64::from(u8::MAX) {
        out.put_u8(Marker::U8.to_u8());
        out.put_u8(value as u8);
    } else if value <= u64::from(u16::MAX) {
        out.put_u8(Marker::U16.to_u8());
        out.put_u16(value as u16);
    } else if value <= u64::from(u32::MAX) {
        out.put_u8(Marker::U32.to_u8());
        out.put_u32(value as u32);
    } else {
        out.put_u8(Marker::U64.to_u8());
        out.put_u64(value);
    }
}

/// 以最短编码写入有符号整数；非负数复用无符号编码。
pub fn write_sint<B: BufMut + ?Sized>(out: &mut B, value: i64) {
    if value >= 0 {
        write_uint(out, value as u64);
    } else if value >= -32 {
        out.put_i8(value as i8);
    } else if value >= i64::from(i8::MIN) {
        out.put_u8(Marker::I8.to_u8());
        out.put_i8(value as i8);
    } else if value >= i64::from(i16::MIN) {
        out.put_u8(Marker::I16.to_u8());
        out.put_i16(value as i16);
    } else if value >= i64::from(i32::MIN) {
        out.put_u8(Marker::I32.to_u8());
        out.put_i32(value as i32);
    } else {
        out.put_u8(Marker::I64.to_u8());
        out.put_i64(value);
    }
}

/// 写入单精度浮点。
pub fn write_f32<B: BufMut + ?Sized>(out: &mut B, value: f32) {
    out.put_u8(Marker::F32.to_u8());
    out.put_f32(value);
}

/// 写入双精度浮点。
pub fn write_f64<B: BufMut + ?Sized>(out: &mut B, value: f64) {
    out.put_u8(Marker::F64.to_u8());
    out.put_f64(value);
}

/// 写入 UTF-8 字符串。
pub fn write_str<B: BufMut + ?Sized>(out: &mut B, value: &str) -> Result<(), EncodeError> {
    let len = value.len();
    if len < 32 {
        out.put_u8(Marker::FixStr(len as u8).to_u8());
    } else if len <= usize::from(u8::MAX) {
        out.put_u8(Marker::Str8.to_u8());
        out.put_u8(len as u8);
    } else if len <= usize::from(u16::MAX) {
        out.put_u8(Marker::Str16.to_u8());
        out.put_u16(len as u16);
    } else {
        out.put_u8(Marker::Str32.to_u8());
        out.put_u32(checked_len("string", len)?);
    }
    out.put_slice(value.as_bytes());
    Ok(())
}

/// 写入二进制负载。
pub fn write_bin<B: BufMut + ?Sized>(out: &mut B, value: &[u8]) -> Result<(), EncodeError> {
    let len = value.len();
    if len <= usize::from(u8::MAX) {
        out.put_u8(Marker::Bin8.to_u8());
        out.put_u8(len as u8);
    } else if len <= usize::from(u16::MAX) {
        out.put_u8(Marker::Bin16.to_u8());
        out.put_u16(len as u16);
    } else {
        out.put_u8(Marker::Bin32.to_u8());
        out.put_u32(checked_len("binary", len)?);
    }
    out.put_slice(value);
    Ok(())
}

/// 写入数组头。
pub fn write_array_len<B: BufMut + ?Sized>(out: &mut B, len: usize) -> Result<(), EncodeError> {
    if len < 16 {
        out.put_u8(Marker::FixArray(len as u8).to_u8());
    } else if len <= usize::from(u16::MAX) {
        out.put_u8(Marker::Array16.to_u8());
        out.put_u16(len as u16);
    } else {
        out.put_u8(Marker::Array32.to_u8());
        out.put_u32(checked_len("array", len)?);
    }
    Ok(())
}

/// 写入映射头。
pub fn write_map_len<B: BufMut + ?Sized>(out: &mut B, len: usize) -> Result<(), EncodeError> {
    if len < 16 {
        out.put_u8(Marker::FixMap(len as u8).to_u8());
    } else if len <= usize::from(u16::MAX) {
        out.put_u8(Marker::Map16.to_u8());
        out.put_u16(len as u16);
    } else {
        out.put_u8(Marker::Map32.to_u8());
        out.put_u32(checked_len("map", len)?);
    }
    Ok(())
}

/// 写入扩展类型；长度为 1/2/4/8/16 时使用 fixext 编码。
pub fn write_ext<B: BufMut + ?Sized>(
    out: &mut B,
    tag: i8,
    payload: &[u8],
) -> Result<(), EncodeError> {
    let len = payload.len();
    match len {
        1 => out.put_u8(Marker::FixExt1.to_u8()),
        2 => out.put_u8(Marker::FixExt2.to_u8()),
        4 => out.put_u8(Marker::FixExt4.to_u8()),
        8 => out.put_u8(Marker::FixExt8.to_u8()),
        16 => out.put_u8(Marker::FixExt16.to_u8()),
        _ if len <= usize::from(u8::MAX) => {
            out.put_u8(Marker::Ext8.to_u8());
            out.put_u8(len as u8);
        }
        _ if len <= usize::from(u16::MAX) => {
            out.put_u8(Marker::Ext16.to_u8());
            out.put_u16(len as u16);
        }
        _ => {
            out.put_u8(Marker::Ext32.to_u8());
            out.put_u32(checked_len("ext", len)?);
        }
    }
    out.put_i8(tag);
    out.put_slice(payload);
    Ok(())
}

/// 递归写入动态值。
pub fn write_value<B: BufMut + ?Sized>(out: &mut B, value: &Value) -> Result<(), EncodeError> {
    match value {
        Value::Nil => write_nil(out),
        Value::Boolean(flag) => write_bool(out, *flag),
        Value::UInt(number) => write_uint(out, *number),
        Value::Int(number) => write_sint(out, *number),
        Value::F32(number) => write_f32(out, *number),
        Value::F64(number) => write_f64(out, *number),
        Value::String(text) => write_str(out, text)?,
        Value::Binary(raw) => write_bin(out, raw)?,
        Value::Array(items) => {
            write_array_len(out, items.len())?;
            for item in items {
                write_value(out, item)?;
            }
        }
        Value::Map(entries) => {
            write_map_len(out, entries.len())?;
            for (key, item) in entries {
                write_value(out, key)?;
                write_value(out, item)?;
            }
        }
        Value::Ext(tag, payload) => write_ext(out, *tag, payload)?,
    }
    Ok(())
}

fn checked_len(kind: &'static str, len: usize) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| EncodeError::LengthOverflow { kind, len })
}

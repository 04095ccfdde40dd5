/// MessagePack 格式的首字节标记。
///
/// # 教案式说明
/// - **意图（Why）**：首字节同时编码了类型族与（对 fix 系列而言）长度或取值，
///   将其拆解为枚举后，读取函数只需匹配变体即可决定后续需要多少字节；
/// - **契约（What）**：[`Marker::from_u8`] 对 0x00..=0xff 全域有定义，`0xc1` 映射为 [`Marker::Reserved`]，
///   由调用方将其视为非法输入。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marker {
    /// `0x00..=0x7f`，携带取值。
    PositiveFixInt(u8),
    /// `0x80..=0x8f`，携带条目数。
    FixMap(u8),
    /// `0x90..=0x9f`，携带元素数。
    FixArray(u8),
    /// `0xa0..=0xbf`，携带字节长度。
    FixStr(u8),
    /// `0xc0`
    Nil,
    /// `0xc1`，规范保留，永不出现在合法输入中。
    Reserved,
    /// `0xc2`
    False,
    /// `0xc3`
    True,
    /// `0xc4`
    Bin8,
    /// `0xc5`
    Bin16,
    /// `0xc6`
    Bin32,
    /// `0xc7`
    Ext8,
    /// `0xc8`
    Ext16,
    /// `0xc9`
    Ext32,
    /// `0xca`
    F32,
    /// `0xcb`
    F64,
    /// `0xcc`
    U8,
    /// `0xcd`
    U16,
    /// `0xce`
    U32,
    /// `0xcf`
    U64,
    /// `0xd0`
    I8,
    /// `0xd1`
    I16,
    /// `0xd2`
    I32,
    /// `0xd3`
    I64,
    /// `0xd4`
    FixExt1,
    /// `0xd5`
    FixExt2,
    /// `0xd6`
    FixExt4,
    /// `0xd7`
    FixExt8,
    /// `0xd8`
    FixExt16,
    /// `0xd9`
    Str8,
    /// `0xda`
    Str16,
    /// `0xdb`
    Str32,
    /// `0xdc`
    Array16,
    /// `0xdd`
    Array32,
    /// `0xde`
    Map16,
    /// `0xdf`
    Map32,
    /// `0xe0..=0xff`，携带取值。
    NegativeFixInt(i8),
}

impl Marker {
    /// 将首字节解析为标记。
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            0x00..=0x7f => Marker::PositiveFixInt(byte),
            0x80..=0x8f => Marker::FixMap(byte & 0x0f),
            0x90..=0x9f => Marker::FixArray(byte & 0x0f),
            0xa0..=0xbf => Marker::FixStr(byte & 0x1f),
            0xc0 => Marker::Nil,
            0xc1 => Marker::Reserved,
            0xc2 => Marker::False,
            0xc3 => Marker::True,
            0xc4 => Marker::Bin8,
            0xc5 => Marker::Bin16,
            0xc6 => Marker::Bin32,
            0xc7 => Marker::Ext8,
            0xc8 => Marker::Ext16,
            0xc9 => Marker::Ext32,
            0xca => Marker::F32,
            0xcb => Marker::F64,
            0xcc => Marker::U8,
            0xcd => Marker::U16,
            0xce => Marker::U32,
            0xcf => Marker::U64,
            0xd0 => Marker::I8,
            0xd1 => Marker::I16,
            0xd2 => Marker::I32,
            0xd3 => Marker::I64,
            0xd4 => Marker::FixExt1,
            0xd5 => Marker::FixExt2,
            0xd6 => Marker::FixExt4,
            0xd7 => Marker::FixExt8,
            0xd8 => Marker::FixExt16,
            0xd9 => Marker::Str8,
            0xda => Marker::Str16,
            0xdb => Marker::Str32,
            0xdc => Marker::Array16,
            0xdd => Marker::Array32,
            0xde => Marker::Map16,
            0xdf => Marker::Map32,
            0xe0..=0xff => Marker::NegativeFixInt(byte as i8),
        }
    }

    /// 返回标记对应的首字节。
    pub fn to_u8(self) -> u8 {
        match self {
            Marker::PositiveFixInt(value) => value & 0x7f,
            Marker::FixMap(len) => 0x80 | (len & 0x0f),
            Marker::FixArray(len) => 0x90 | (len & 0x0f),
            Marker::FixStr(len) => 0xa0 | (len & 0x1f),
            Marker::Nil => 0xc0,
            Marker::Reserved => 0xc1,
            Marker::False => 0xc2,
            Marker::True => 0xc3,
            Marker::Bin8 => 0xc4,
            Marker::Bin16 => 0xc5,
            Marker::Bin32 => 0xc6,
            Marker::Ext8 => 0xc7,
            Marker::Ext16 => 0xc8,
            Marker::Ext32 => 0xc9,
            Marker::F32 => 0xca,
            Marker::F64 => 0xcb,
            Marker::U8 => 0xcc,
            Marker::U16 => 0xcd,
            Marker::U32 => 0xce,
            Marker::U64 => 0xcf,
            Marker::I8 => 0xd0,
            Marker::I16 => 0xd1,
            Marker::I32 => 0xd2,
            Marker::I64 => 0xd3,
            Marker::FixExt1 => 0xd4,
            Marker::FixExt2 => 0xd5,
            Marker::FixExt4 => 0xd6,
            Marker::FixExt8 => 0xd7,
            Marker::FixExt16 => 0xd8,
            Marker::Str8 => 0xd9,
            Marker::Str16 => 0xda,
            Marker::Str32 => 0xdb,
            Marker::Array16 => 0xdc,
            Marker::Array32 => 0xdd,
            Marker::Map16 => 0xde,
            Marker::Map32 => 0xdf,
            Marker::NegativeFixInt(value) => value as u8,
        }
    }

    /// 标记所属的类型族名称，用于错误描述。
    pub fn family(self) -> &'static str {
        match self {
            Marker::PositiveFixInt(_)
            | Marker::NegativeFixInt(_)
            | Marker::U8
            | Marker::U16
            | Marker::U32
            | Marker::U64
            | Marker::I8
            | Marker::I16
            | Marker::I32
            | Marker::I64 => "integer",
            Marker::FixMap(_) | Marker::Map16 | Marker::Map32 => "map",
            Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => "array",
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => "string",
            Marker::Nil => "nil",
            Marker::Reserved => "reserved",
            Marker::False | Marker::True => "boolean",
            Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => "binary",
            Marker::F32 | Marker::F64 => "float",
            Marker::Ext8
            | Marker::Ext16
            | Marker::Ext32
            | Marker::FixExt1
            | Marker::FixExt2
            | Marker::FixExt4
            | Marker::FixExt8
            | Marker::FixExt16 => "ext",
        }
    }
}

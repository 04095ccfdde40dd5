use bytes::Bytes;

/// MessagePack 动态值模型。
///
/// # 教案式说明
/// - **意图（Why）**：调度器在编译期并不知道各方法的参数类型，需要一个可自描述的值模型承载参数与结果；
/// - **契约（What）**：整数按符号归一，非负值一律以 [`Value::UInt`] 表示，
///   [`Value::Int`] 仅承载负数；因此同一数值在比较时不存在两种表示。
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    /// `nil`
    #[default]
    Nil,
    /// 布尔值。
    Boolean(bool),
    /// 非负整数。
    UInt(u64),
    /// 负整数。
    Int(i64),
    /// 单精度浮点。
    F32(f32),
    /// 双精度浮点。
    F64(f64),
    /// UTF-8 字符串。
    String(String),
    /// 二进制负载。
    Binary(Bytes),
    /// 数组。
    Array(Vec<Value>),
    /// 映射，保留键的出现顺序。
    Map(Vec<(Value, Value)>),
    /// 扩展类型：类型标签与负载。
    Ext(i8, Bytes),
}

impl Value {
    /// 是否为 `nil`。
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// 以字符串视图访问。
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    /// 以 `u64` 访问整数。
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(value) => Some(*value),
            _ => None,
        }
    }

    /// 以 `i64` 访问整数。
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::UInt(value) => i64::try_from(*value).ok(),
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// 以布尔访问。
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(flag) => Some(*flag),
            _ => None,
        }
    }

    /// 以数组切片访问。
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// 在映射中按字符串键查找。
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries
                .iter()
                .find(|(candidate, _)| candidate.as_str() == Some(key))
                .map(|(_, value)| value),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::UInt(u64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        if value >= 0 {
            Value::UInt(value as u64)
        } else {
            Value::Int(value)
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::from(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Binary(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Nil, Into::into)
    }
}

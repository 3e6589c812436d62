//! Attribute values stored in Blocks

use crate::block::BlockId;

/// One attribute slot of a Block
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// No value: pads, void fields, and slots not yet populated
    #[default]
    Null,
    /// Unsigned integer (scalars, enums and bit-fields)
    UInt(u64),
    /// Signed integer
    SInt(i64),
    /// Floating point number
    Float(f64),
    /// Decoded text
    Str(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// A nested Block owned by the Block holding this value
    Block(BlockId),
}

impl Value {
    /// Short name of the variant, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::UInt(_) => "uint",
            Value::SInt(_) => "sint",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Block(_) => "block",
        }
    }

    /// Whether this slot is empty
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer value widened to i128, for either signedness
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::UInt(v) => Some(*v as i128),
            Value::SInt(v) => Some(*v as i128),
            _ => None,
        }
    }

    /// Integer value as u64, if it is a non-negative integer
    pub fn as_u64(&self) -> Option<u64> {
        self.as_int().and_then(|v| u64::try_from(v).ok())
    }

    /// Integer value as i64, if it fits
    pub fn as_i64(&self) -> Option<i64> {
        self.as_int().and_then(|v| i64::try_from(v).ok())
    }

    /// Integer value as usize, if it is a non-negative integer that fits
    pub fn as_usize(&self) -> Option<usize> {
        self.as_int().and_then(|v| usize::try_from(v).ok())
    }

    /// Numeric value as f64; integers are converted
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::UInt(v) => Some(*v as f64),
            Value::SInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Text value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Byte value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Nested Block handle
    pub fn as_block(&self) -> Option<BlockId> {
        match self {
            Value::Block(id) => Some(*id),
            _ => None,
        }
    }

    /// Replace the number in an integer value while keeping its signedness
    pub(crate) fn with_int(&self, n: u64) -> Value {
        match self {
            Value::SInt(_) => Value::SInt(n as i64),
            _ => Value::UInt(n),
        }
    }
}

macro_rules! impl_from_uint {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self { Value::UInt(v as u64) }
        })*
    };
}

macro_rules! impl_from_sint {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self { Value::SInt(v as i64) }
        })*
    };
}

impl_from_uint!(u8, u16, u32, u64, usize);
impl_from_sint!(i8, i16, i32, i64);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<BlockId> for Value {
    fn from(v: BlockId) -> Self {
        Value::Block(v)
    }
}

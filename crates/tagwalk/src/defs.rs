//! Constructor functions for building descriptor trees
//!
//! Format definitions code against these functions rather than against
//! [`FieldKind`] directly:
//!
//! ```rust
//! use tagwalk::defs::*;
//! use tagwalk::Endian;
//!
//! let record = container(
//!     "record",
//!     vec![
//!         uint8("count"),
//!         array("values", ".count", uint16("value", Endian::Little)),
//!     ],
//! );
//! assert_eq!(record.name, "record");
//! ```

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::descriptor::{
    BitSpec, DescRef, Descriptor, EnumTable, FieldContext, FieldKind, Fields, IntSpec, SizeSpec,
    StrSpec,
};
use crate::errors::Result;
use crate::primitives::{Encoding, Endian};

/// Unsigned integer of `width` bytes. Byte order may be left as `None` to
/// follow [`TagDef::with_endian`](crate::TagDef::with_endian).
pub fn uint(name: &str, width: usize, endian: impl Into<Option<Endian>>) -> Descriptor {
    Descriptor::new(
        name,
        FieldKind::Int(IntSpec {
            width,
            signed: false,
            endian: endian.into(),
            table: None,
        }),
    )
}

/// Signed integer of `width` bytes
pub fn sint(name: &str, width: usize, endian: impl Into<Option<Endian>>) -> Descriptor {
    Descriptor::new(
        name,
        FieldKind::Int(IntSpec {
            width,
            signed: true,
            endian: endian.into(),
            table: None,
        }),
    )
}

/// Single unsigned byte
pub fn uint8(name: &str) -> Descriptor {
    uint(name, 1, None)
}

/// Unsigned 16-bit integer
pub fn uint16(name: &str, endian: impl Into<Option<Endian>>) -> Descriptor {
    uint(name, 2, endian)
}

/// Unsigned 32-bit integer
pub fn uint32(name: &str, endian: impl Into<Option<Endian>>) -> Descriptor {
    uint(name, 4, endian)
}

/// Single signed byte
pub fn sint8(name: &str) -> Descriptor {
    sint(name, 1, None)
}

/// Signed 32-bit integer
pub fn sint32(name: &str, endian: impl Into<Option<Endian>>) -> Descriptor {
    sint(name, 4, endian)
}

/// IEEE single precision float
pub fn float32(name: &str, endian: impl Into<Option<Endian>>) -> Descriptor {
    Descriptor::new(name, FieldKind::Float { width: 4, endian: endian.into() })
}

/// IEEE double precision float
pub fn float64(name: &str, endian: impl Into<Option<Endian>>) -> Descriptor {
    Descriptor::new(name, FieldKind::Float { width: 8, endian: endian.into() })
}

/// Unsigned integer with an enumerated-value table
pub fn uenum(name: &str, width: usize, endian: impl Into<Option<Endian>>, table: EnumTable) -> Descriptor {
    Descriptor::new(
        name,
        FieldKind::Int(IntSpec {
            width,
            signed: false,
            endian: endian.into(),
            table: Some(Rc::new(table)),
        }),
    )
}

/// String whose byte length comes from `size`
pub fn str_sized(name: &str, encoding: Encoding, size: impl Into<SizeSpec>) -> Descriptor {
    Descriptor::new(
        name,
        FieldKind::Str(StrSpec {
            encoding,
            terminated: false,
            lossy: false,
        }),
    )
    .with_size(size)
}

/// NUL-terminated string
pub fn cstr(name: &str, encoding: Encoding) -> Descriptor {
    Descriptor::new(
        name,
        FieldKind::Str(StrSpec {
            encoding,
            terminated: true,
            lossy: false,
        }),
    )
}

/// Raw bytes whose length comes from `size`
pub fn bytes(name: &str, size: impl Into<SizeSpec>) -> Descriptor {
    Descriptor::new(name, FieldKind::Bytes).with_size(size)
}

/// `n` bytes skipped on read and zeroed on write
pub fn pad(n: usize) -> Descriptor {
    Descriptor::new("", FieldKind::Pad(n))
}

/// Zero-width placeholder
pub fn void(name: &str) -> Descriptor {
    Descriptor::new(name, FieldKind::Void)
}

/// Bit-fields packed into an integer of `width` bytes. Members are laid out
/// from the least significant bit upward, in declaration order.
pub fn bit_struct(name: &str, width: usize, endian: impl Into<Option<Endian>>, fields: Vec<Descriptor>) -> Descriptor {
    Descriptor::new(
        name,
        FieldKind::BitStruct {
            width,
            endian: endian.into(),
            fields: Rc::new(fields_of(fields)),
        },
    )
}

/// Unsigned bit-field
pub fn bit_uint(name: &str, bits: u32) -> Descriptor {
    Descriptor::new(
        name,
        FieldKind::Bits(BitSpec {
            bits,
            signed: false,
            table: None,
        }),
    )
}

/// Signed bit-field
pub fn bit_sint(name: &str, bits: u32) -> Descriptor {
    Descriptor::new(
        name,
        FieldKind::Bits(BitSpec {
            bits,
            signed: true,
            table: None,
        }),
    )
}

/// Single-bit flag
pub fn bit(name: &str) -> Descriptor {
    bit_uint(name, 1)
}

/// Unsigned bit-field with an enumerated-value table
pub fn bit_enum(name: &str, bits: u32, table: EnumTable) -> Descriptor {
    Descriptor::new(
        name,
        FieldKind::Bits(BitSpec {
            bits,
            signed: false,
            table: Some(Rc::new(table)),
        }),
    )
}

/// Unused bits inside a bit-struct
pub fn bit_pad(bits: u32) -> Descriptor {
    Descriptor::new("", FieldKind::BitPad(bits))
}

/// Structure whose members all have a static size
pub fn structure(name: &str, fields: Vec<Descriptor>) -> Descriptor {
    Descriptor::new(name, FieldKind::Struct(Rc::new(fields_of(fields))))
}

/// Structure whose members may vary in size
pub fn container(name: &str, fields: Vec<Descriptor>) -> Descriptor {
    Descriptor::new(name, FieldKind::Container(Rc::new(fields_of(fields))))
}

/// Array of `count` elements shaped by `sub`
pub fn array(name: &str, count: impl Into<SizeSpec>, sub: Descriptor) -> Descriptor {
    Descriptor::new(name, FieldKind::Array(Rc::new(sub))).with_size(count)
}

/// Array that keeps reading elements shaped by `sub` while `more` holds
pub fn while_array(
    name: &str,
    sub: Descriptor,
    more: impl Fn(&mut FieldContext<'_>) -> Result<bool> + 'static,
) -> Descriptor {
    Descriptor::new(
        name,
        FieldKind::WhileArray {
            sub: Rc::new(sub),
            more: Rc::new(more),
        },
    )
}

/// Variant chosen by `selector` among `cases`, falling back to `default`
pub fn switch(
    name: &str,
    selector: impl Fn(&mut FieldContext<'_>) -> Result<Option<i64>> + 'static,
    cases: Vec<(i64, Descriptor)>,
    default: Descriptor,
) -> Descriptor {
    let cases: BTreeMap<i64, DescRef> = cases.into_iter().map(|(k, d)| (k, Rc::new(d))).collect();
    Descriptor::new(
        name,
        FieldKind::Switch {
            selector: Rc::new(selector),
            cases: Rc::new(cases),
            default: Rc::new(default),
        },
    )
}

/// While-array predicate: continue until the next unconsumed byte is
/// `sentinel` or the data runs out
pub fn until_byte(sentinel: u8) -> impl Fn(&mut FieldContext<'_>) -> Result<bool> + 'static {
    move |ctx| {
        Ok(match ctx.peek(1)? {
            Some(next) => next.first().is_some_and(|&b| b != sentinel),
            None => false,
        })
    }
}

/// Switch selector: peek `len` unconsumed bytes and use the byte at `at`.
/// Selects the default when no source is attached or data runs out.
pub fn peek_byte(len: usize, at: usize) -> impl Fn(&mut FieldContext<'_>) -> Result<Option<i64>> + 'static {
    move |ctx| Ok(ctx.peek(len)?.and_then(|b| b.get(at).map(|&v| v as i64)))
}

/// Switch selector: use the integer stored at `path`
pub fn by_field(path: &str) -> impl Fn(&mut FieldContext<'_>) -> Result<Option<i64>> + 'static {
    let path = path.to_string();
    move |ctx| Ok(ctx.neighbor(&path)?.as_i64())
}

fn fields_of(fields: Vec<Descriptor>) -> Fields {
    Fields::new(fields.into_iter().map(Rc::new).collect())
}

//! tagwalk - descriptor-driven parsing and re-serialization of binary tags
//!
//! This crate provides the engine that turns a declarative descriptor tree
//! into a parser, editor and serializer for a binary format:
//! - Descriptors and constructor functions for every field type
//! - A Block arena holding parsed trees, with name/index attribute access
//! - Reader/writer traversal with offset threading, pointers and alignment
//! - A size resolver that keeps literal, path and computed sizes consistent
//!
//! # Quick Start
//!
//! ```rust
//! use tagwalk::defs::*;
//! use tagwalk::{Endian, Tag, TagDef, Value};
//!
//! let def = TagDef::new(
//!     "list",
//!     container(
//!         "list",
//!         vec![
//!             uint8("count"),
//!             array("items", ".count", uint16("item", Endian::Little)),
//!         ],
//!     ),
//! )?;
//!
//! // Parse
//! let mut tag = Tag::parse(def, &[2, 0x01, 0x00, 0x02, 0x00])?;
//! let root = tag.root();
//! let items = tag.arena().get_block(root, "items")?;
//! assert_eq!(tag.arena().len(items)?, 2);
//!
//! // Mutate, then let the size resolver update the count
//! let arena = tag.arena_mut();
//! let index = arena.append(items, Some(Value::UInt(3)))?;
//! assert_eq!(index, 2);
//! arena.set_size(root, Some("items".into()), None)?;
//!
//! // Serialize
//! assert_eq!(tag.serialize()?, vec![3, 1, 0, 2, 0, 3, 0]);
//! # Ok::<(), tagwalk::Error>(())
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod block;
pub mod defs;
mod descriptor;
mod errors;
mod primitives;
mod reader;
mod size;
mod source;
mod tag;
mod validator;
mod value;
mod writer;

pub use block::{Arena, AttrKey, Block, BlockId};
pub use descriptor::{
    BitSpec, DescRef, Descriptor, EnumTable, FieldContext, FieldKind, Fields, IntSpec, Meta,
    NameMap, Predicate, Selector, SizeEdit, SizeFn, SizeGetter, SizeSetter, SizeSpec, StrSpec,
};
pub use errors::{Error, Result};
pub use primitives::{Encoding, Endian};
pub use reader::{ReadOptions, DEFAULT_MAX_DEPTH};
pub use source::{ByteSource, NoPeek, SliceSource, StreamSource};
pub use tag::{AlignMode, Tag, TagDef, MAX_AUTO_ALIGN};
pub use validator::validate;
pub use value::Value;
pub use writer::WriteOptions;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        block::{Arena, AttrKey, BlockId},
        defs::*,
        descriptor::{DescRef, Descriptor, EnumTable, FieldContext, SizeSpec},
        errors::{Error, Result},
        primitives::{Encoding, Endian},
        reader::ReadOptions,
        source::{ByteSource, SliceSource},
        tag::{AlignMode, Tag, TagDef},
        value::Value,
        writer::WriteOptions,
    };
}

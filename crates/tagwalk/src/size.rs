//! Size resolution: finding and recording the size of variable fields

use std::rc::Rc;

use tracing::trace;

use crate::block::{Arena, AttrKey, BlockId};
use crate::descriptor::{FieldContext, FieldKind, SizeEdit, SizeSpec};
use crate::errors::{Error, Result};
use crate::value::Value;

/// Evaluate a size or pointer specification for the field named `name`
pub(crate) fn resolve(spec: &SizeSpec, name: &str, ctx: &mut FieldContext<'_>) -> Result<usize> {
    match spec {
        SizeSpec::Literal(n) => Ok(*n),
        SizeSpec::Path(path) => {
            let parent = ctx.parent.ok_or_else(|| {
                Error::schema("<root>", name, format!("size path '{}' needs an enclosing Block", path))
            })?;
            let value = ctx.arena.get_neighbor(parent, path)?;
            match value.as_usize() {
                Some(n) => Ok(n),
                None => Err(Error::schema(
                    ctx.arena.name_of(Some(parent)),
                    name,
                    format!("size path '{}' holds a {}, not a count", path, value.kind_name()),
                )),
            }
        }
        SizeSpec::Computed(f) => (f.get)(ctx),
    }
}

impl Arena {
    /// Logical size of an attribute: the element count of an array, the
    /// encoded byte length of anything else
    pub fn size_of<'k>(&self, id: BlockId, key: impl Into<AttrKey<'k>>) -> Result<usize> {
        let index = self.index_of(id, key)?;
        match &self.block(id)?.attrs[index] {
            Value::Block(nested) => {
                let block = self.block(*nested)?;
                if block.desc.kind.is_array() {
                    Ok(block.attrs.len())
                } else {
                    self.byte_size(*nested)
                }
            }
            Value::Str(text) => match &self.member_desc(id, index)?.kind {
                FieldKind::Str(spec) => Ok(spec.encoding.encode(text)?.len()),
                _ => Ok(text.len()),
            },
            Value::Bytes(bytes) => Ok(bytes.len()),
            _ => Ok(self.member_desc(id, index)?.fixed_size().unwrap_or(0)),
        }
    }

    /// Record the size of an attribute wherever its descriptor says the size
    /// lives. `new_size` defaults to [`Arena::size_of`]. With `key` set to
    /// `None` the Block `id` itself is resized through its parent.
    ///
    /// A literal size cannot grow: shrinking is accepted and ignored, growing
    /// fails with [`Error::SizeEditRejected`] until the descriptor is
    /// replaced with [`Arena::set_desc_size`]. While-arrays have no stored
    /// count and ignore the request.
    pub fn set_size(&mut self, id: BlockId, key: Option<AttrKey<'_>>, new_size: Option<usize>) -> Result<()> {
        let Some(key) = key else {
            return self.set_own_size(id, new_size);
        };
        let index = self.index_of(id, key)?;
        let desc = self.attr_desc(id, index)?;
        if matches!(desc.kind, FieldKind::WhileArray { .. }) {
            trace!(attr = %desc.name, "while-array has no size field");
            return Ok(());
        }
        let size = match new_size {
            Some(size) => size,
            None => self.size_of(id, index)?,
        };
        match &desc.size {
            None => Err(Error::schema(
                self.name_of(Some(id)),
                &desc.name,
                "no size specification",
            )),
            Some(SizeSpec::Literal(limit)) => {
                if size > *limit {
                    Err(Error::size_rejected(
                        self.name_of(Some(id)),
                        &desc.name,
                        format!("{} exceeds the declared size of {}", size, limit),
                    ))
                } else {
                    Ok(())
                }
            }
            Some(SizeSpec::Path(path)) => {
                trace!(attr = %desc.name, path = %path, size, "writing size field");
                self.store_at_path(id, &desc.name, path, size)
            }
            Some(SizeSpec::Computed(f)) => match &f.set {
                Some(set) => {
                    trace!(attr = %desc.name, size, "calling size setter");
                    set(
                        &mut SizeEdit {
                            arena: self,
                            parent: id,
                            index,
                        },
                        size,
                    )
                }
                None => Ok(()),
            },
        }
    }

    /// Store `n` in the integer field `path` names, relative to `id`,
    /// keeping the field's signedness
    pub(crate) fn store_at_path(&mut self, id: BlockId, name: &str, path: &str, n: usize) -> Result<()> {
        let current = self.get_neighbor(id, path)?;
        if current.as_int().is_none() {
            return Err(Error::schema(
                self.name_of(Some(id)),
                name,
                format!("path '{}' holds a {}, not an integer", path, current.kind_name()),
            ));
        }
        let updated = current.with_int(n as u64);
        self.set_neighbor(id, path, updated)
    }

    fn set_own_size(&mut self, id: BlockId, new_size: Option<usize>) -> Result<()> {
        let block = self.block(id)?;
        if block.is_while() {
            trace!(block = %block.desc.name, "while-block ignores size edits");
            return Ok(());
        }
        let parent = block
            .parent
            .ok_or_else(|| Error::schema(&block.desc.name, "", "a root Block has no size field"))?;
        let index = self
            .block(parent)?
            .attrs
            .iter()
            .position(|v| *v == Value::Block(id))
            .ok_or_else(|| {
                Error::schema(
                    self.name_of(Some(parent)),
                    self.name_of(Some(id)),
                    "Block is not stored in a sized attribute",
                )
            })?;
        self.set_size(parent, Some(AttrKey::Index(index)), new_size)
    }

    /// Replace the size specification of a Block's descriptor (`key` is
    /// `None`) or of one of its members. The Block gets a private copy of
    /// its descriptor; the shared template and every other Block built from
    /// it keep the original.
    pub fn set_desc_size(&mut self, id: BlockId, key: Option<AttrKey<'_>>, size: Option<SizeSpec>) -> Result<()> {
        let Some(key) = key else {
            let block = self.block_mut(id)?;
            Rc::make_mut(&mut block.desc).size = size;
            return Ok(());
        };
        let index = self.index_of(id, key)?;
        if let Some(nested) = self.block(id)?.attrs[index].as_block() {
            return self.set_desc_size(nested, None, size);
        }
        let block = self.block_mut(id)?;
        let name = block.desc.name.clone();
        let desc = Rc::make_mut(&mut block.desc);
        let fields = match &mut desc.kind {
            FieldKind::Struct(fields)
            | FieldKind::Container(fields)
            | FieldKind::BitStruct { fields, .. } => fields,
            _ => {
                return Err(Error::Shape(format!(
                    "elements of '{}' share one descriptor and cannot be overridden individually",
                    name
                )))
            }
        };
        let member = Rc::make_mut(fields)
            .members_mut()
            .get_mut(index)
            .ok_or_else(|| Error::MissingAttribute {
                block: name.clone(),
                name: index.to_string(),
            })?;
        Rc::make_mut(member).size = size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::*;
    use crate::descriptor::Descriptor;
    use crate::primitives::{Encoding, Endian};

    fn record() -> Descriptor {
        container(
            "record",
            vec![
                uint8("len"),
                bytes("data", ".len"),
                str_sized("tag", Encoding::Ascii, 4),
                sint("count", 2, Endian::Little),
                array("items", ".count", uint8("item")),
            ],
        )
    }

    #[test]
    fn test_size_of() {
        let mut arena = Arena::new();
        let r = arena.create(record()).unwrap();
        arena.set(r, "data", Value::Bytes(vec![1, 2, 3])).unwrap();
        arena.set(r, "tag", Value::Str("ab".into())).unwrap();
        let items = arena.get_block(r, "items").unwrap();
        arena.extend(items, Value::UInt(5)).unwrap();

        assert_eq!(arena.size_of(r, "data").unwrap(), 3);
        assert_eq!(arena.size_of(r, "tag").unwrap(), 2);
        assert_eq!(arena.size_of(r, "items").unwrap(), 5);
        assert_eq!(arena.size_of(r, "len").unwrap(), 1);
    }

    #[test]
    fn test_path_size_keeps_signedness() {
        let mut arena = Arena::new();
        let r = arena.create(record()).unwrap();
        let items = arena.get_block(r, "items").unwrap();
        arena.extend(items, Value::UInt(2)).unwrap();
        arena.set_size(r, Some("items".into()), None).unwrap();
        assert_eq!(arena.get(r, "count").unwrap(), &Value::SInt(2));
    }

    #[test]
    fn test_block_resizes_through_parent() {
        let mut arena = Arena::new();
        let r = arena.create(record()).unwrap();
        let items = arena.get_block(r, "items").unwrap();
        arena.append(items, None).unwrap();
        arena.set_size(items, None, None).unwrap();
        assert_eq!(arena.get(r, "count").unwrap(), &Value::SInt(1));
    }

    #[test]
    fn test_missing_size_spec_is_schema_error() {
        let mut arena = Arena::new();
        let r = arena.create(record()).unwrap();
        let err = arena.set_size(r, Some("len".into()), Some(4)).unwrap_err();
        assert!(matches!(err, Error::Schema { ref attr, .. } if attr == "len"));
    }

    #[test]
    fn test_root_has_no_size() {
        let mut arena = Arena::new();
        let r = arena.create(record()).unwrap();
        assert!(matches!(arena.set_size(r, None, Some(1)), Err(Error::Schema { .. })));
    }

    #[test]
    fn test_desc_override_is_private() {
        let template = Rc::new(record());
        let mut arena = Arena::new();
        let a = arena.create(template.clone()).unwrap();
        let b = arena.create(template.clone()).unwrap();

        assert!(arena.set_size(a, Some("tag".into()), Some(6)).is_err());
        arena.set_desc_size(a, Some("tag".into()), Some(SizeSpec::Literal(8))).unwrap();
        arena.set_size(a, Some("tag".into()), Some(6)).unwrap();

        assert!(arena.set_size(b, Some("tag".into()), Some(6)).is_err());
        assert!(matches!(template.member(2).and_then(|d| d.size.clone()), Some(SizeSpec::Literal(4))));
        assert!(matches!(arena.member_desc(a, 2).unwrap().size, Some(SizeSpec::Literal(8))));
    }

    #[test]
    fn test_array_elements_cannot_be_overridden() {
        let mut arena = Arena::new();
        let r = arena.create(record()).unwrap();
        let items = arena.get_block(r, "items").unwrap();
        arena.append(items, None).unwrap();
        let err = arena
            .set_desc_size(items, Some(AttrKey::Index(0)), Some(SizeSpec::Literal(1)))
            .unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
    }
}

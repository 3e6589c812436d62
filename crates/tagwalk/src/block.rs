//! Blocks and the arena that owns them
//!
//! Every Block of a parsed tree lives in one [`Arena`] and is addressed by a
//! generational [`BlockId`]. A Block refers to its parent by handle only, so
//! the parent link never keeps anything alive; releasing a Block frees its
//! whole subtree and turns every outstanding handle into it stale.

use std::fmt;

use tracing::trace;

use crate::descriptor::{DescRef, Descriptor, FieldKind};
use crate::errors::{Error, Result};
use crate::reader::Reader;
use crate::validator::validate;
use crate::value::Value;

const MAX_PREALLOC: usize = 4096;

/// Generational handle to a Block in an [`Arena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    index: u32,
    generation: u32,
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Attribute address: a position, or a name resolved through the
/// descriptor's name map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKey<'a> {
    /// Position in the Block
    Index(usize),
    /// Member name; digits are accepted as a position when no member has
    /// that name
    Name(&'a str),
}

impl From<usize> for AttrKey<'_> {
    fn from(index: usize) -> Self {
        AttrKey::Index(index)
    }
}

impl<'a> From<&'a str> for AttrKey<'a> {
    fn from(name: &'a str) -> Self {
        AttrKey::Name(name)
    }
}

impl fmt::Display for AttrKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrKey::Index(i) => write!(f, "{}", i),
            AttrKey::Name(name) => f.write_str(name),
        }
    }
}

/// Runtime container for the attributes of one struct-like or array
/// descriptor
#[derive(Debug, Clone)]
pub struct Block {
    pub(crate) desc: DescRef,
    pub(crate) parent: Option<BlockId>,
    pub(crate) attrs: Vec<Value>,
    pub(crate) child: Option<Value>,
}

impl Block {
    /// Descriptor this Block was built from, or its private override
    pub fn desc(&self) -> &DescRef {
        &self.desc
    }

    /// Descriptor name
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    /// Handle of the owning Block; `None` for roots and detached Blocks
    pub fn parent(&self) -> Option<BlockId> {
        self.parent
    }

    /// Attribute values in order
    pub fn attrs(&self) -> &[Value] {
        &self.attrs
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// Whether the Block has no attributes
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Trailing child value, if the descriptor declares one
    pub fn child(&self) -> Option<&Value> {
        self.child.as_ref()
    }

    /// Whether this is an open-ended while-block
    pub fn is_while(&self) -> bool {
        matches!(self.desc.kind, FieldKind::WhileArray { .. })
    }

    /// Name of attribute `index`, if its descriptor has one
    pub fn attr_name(&self, index: usize) -> Option<&str> {
        self.desc.names().and_then(|names| names.name_of(index))
    }
}

#[derive(Debug, Default)]
struct Entry {
    generation: u32,
    block: Option<Block>,
}

/// Owner of every Block in one or more trees
#[derive(Debug, Default)]
pub struct Arena {
    entries: Vec<Entry>,
    free: Vec<u32>,
    live: usize,
}

impl Arena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of Blocks currently allocated
    pub fn live(&self) -> usize {
        self.live
    }

    pub(crate) fn alloc(&mut self, desc: DescRef, parent: Option<BlockId>, capacity: usize) -> BlockId {
        let block = Block {
            desc,
            parent,
            attrs: Vec::with_capacity(capacity.min(MAX_PREALLOC)),
            child: None,
        };
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.block = Some(block);
                BlockId {
                    index,
                    generation: entry.generation,
                }
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(Entry {
                    generation: 0,
                    block: Some(block),
                });
                BlockId { index, generation: 0 }
            }
        }
    }

    /// Free a Block and its subtree. Stale handles are ignored.
    pub(crate) fn release(&mut self, id: BlockId) {
        let Some(entry) = self.entries.get_mut(id.index as usize) else {
            return;
        };
        if entry.generation != id.generation {
            return;
        }
        let Some(block) = entry.block.take() else {
            return;
        };
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        for value in block.attrs.iter().chain(block.child.iter()) {
            if let Value::Block(child) = value {
                self.release(*child);
            }
        }
    }

    /// Whether `id` still refers to a live Block
    pub fn contains(&self, id: BlockId) -> bool {
        self.block(id).is_ok()
    }

    /// Borrow a Block
    pub fn block(&self, id: BlockId) -> Result<&Block> {
        self.entries
            .get(id.index as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.block.as_ref())
            .ok_or(Error::StaleHandle)
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> Result<&mut Block> {
        self.entries
            .get_mut(id.index as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.block.as_mut())
            .ok_or(Error::StaleHandle)
    }

    /// Descriptor of a Block
    pub fn desc(&self, id: BlockId) -> Result<&DescRef> {
        Ok(&self.block(id)?.desc)
    }

    /// Parent handle of a Block
    pub fn parent(&self, id: BlockId) -> Result<Option<BlockId>> {
        Ok(self.block(id)?.parent)
    }

    /// Outermost ancestor of a Block
    pub fn root_of(&self, id: BlockId) -> Result<BlockId> {
        let mut cursor = id;
        while let Some(parent) = self.block(cursor)?.parent {
            cursor = parent;
        }
        Ok(cursor)
    }

    /// Number of attributes in a Block
    pub fn len(&self, id: BlockId) -> Result<usize> {
        Ok(self.block(id)?.attrs.len())
    }

    pub(crate) fn name_of(&self, id: Option<BlockId>) -> &str {
        id.and_then(|id| self.block(id).ok())
            .map(|block| block.desc.name.as_str())
            .unwrap_or("<root>")
    }

    /// Resolve a name or index to a position in the Block
    pub fn index_of<'k>(&self, id: BlockId, key: impl Into<AttrKey<'k>>) -> Result<usize> {
        let key = key.into();
        let block = self.block(id)?;
        let index = match key {
            AttrKey::Index(index) => Some(index),
            AttrKey::Name(name) => block
                .desc
                .names()
                .and_then(|names| names.index_of(name))
                .or_else(|| name.parse().ok()),
        };
        index
            .filter(|&index| index < block.attrs.len())
            .ok_or_else(|| Error::MissingAttribute {
                block: block.desc.name.clone(),
                name: key.to_string(),
            })
    }

    /// Attribute value
    pub fn get<'k>(&self, id: BlockId, key: impl Into<AttrKey<'k>>) -> Result<&Value> {
        let index = self.index_of(id, key)?;
        Ok(&self.block(id)?.attrs[index])
    }

    /// Handle of a nested Block attribute
    pub fn get_block<'k>(&self, id: BlockId, key: impl Into<AttrKey<'k>>) -> Result<BlockId> {
        let key = key.into();
        let value = self.get(id, key)?;
        value.as_block().ok_or_else(|| {
            Error::Shape(format!(
                "'{}' holds a {}, not a Block",
                key,
                value.kind_name()
            ))
        })
    }

    /// Declared descriptor of attribute `index`
    pub fn member_desc(&self, id: BlockId, index: usize) -> Result<DescRef> {
        let block = self.block(id)?;
        block
            .desc
            .member(index)
            .cloned()
            .ok_or_else(|| Error::MissingAttribute {
                block: block.desc.name.clone(),
                name: index.to_string(),
            })
    }

    /// Effective descriptor of an attribute: a nested Block's own
    /// descriptor, otherwise the declared member descriptor
    pub fn attr_desc<'k>(&self, id: BlockId, key: impl Into<AttrKey<'k>>) -> Result<DescRef> {
        let index = self.index_of(id, key)?;
        match &self.block(id)?.attrs[index] {
            Value::Block(nested) => Ok(self.block(*nested)?.desc.clone()),
            _ => self.member_desc(id, index),
        }
    }

    /// Replace an attribute. A detached Block value is re-parented to `id`;
    /// a Block value it replaces is released.
    pub fn set<'k>(&mut self, id: BlockId, key: impl Into<AttrKey<'k>>, value: Value) -> Result<()> {
        let index = self.index_of(id, key)?;
        if self.block(id)?.attrs[index] == value {
            return Ok(());
        }
        let desc = self.member_desc(id, index)?;
        self.check_shape(&desc, &value)?;
        self.adopt(id, &value)?;
        let old = std::mem::replace(&mut self.block_mut(id)?.attrs[index], value);
        if let Value::Block(old) = old {
            self.release(old);
        }
        Ok(())
    }

    /// Trailing child value
    pub fn child(&self, id: BlockId) -> Result<Option<&Value>> {
        Ok(self.block(id)?.child.as_ref())
    }

    /// Replace the trailing child value
    pub fn set_child(&mut self, id: BlockId, value: Value) -> Result<()> {
        let block = self.block(id)?;
        let desc = block.desc.child.clone().ok_or_else(|| {
            Error::schema(&block.desc.name, "<child>", "descriptor declares no trailing child")
        })?;
        if block.child.as_ref() == Some(&value) {
            return Ok(());
        }
        self.check_shape(&desc, &value)?;
        self.adopt(id, &value)?;
        if let Some(Value::Block(old)) = self.block_mut(id)?.child.replace(value) {
            self.release(old);
        }
        Ok(())
    }

    fn adopt(&mut self, parent: BlockId, value: &Value) -> Result<()> {
        let Value::Block(child) = value else {
            return Ok(());
        };
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == *child {
                return Err(Error::Shape(
                    "a Block cannot be stored inside itself or its descendants".to_string(),
                ));
            }
            cursor = self.block(current)?.parent;
        }
        let block = self.block_mut(*child)?;
        if block.parent.is_some() {
            return Err(Error::Shape(format!(
                "Block '{}' already has a parent; pop it first",
                block.desc.name
            )));
        }
        block.parent = Some(parent);
        Ok(())
    }

    fn check_shape(&self, desc: &Descriptor, value: &Value) -> Result<()> {
        if self.accepts(desc, value) {
            Ok(())
        } else {
            Err(Error::Shape(format!(
                "'{}' is a {} field and cannot hold a {}",
                desc.name,
                desc.kind.type_name(),
                value.kind_name()
            )))
        }
    }

    fn accepts(&self, desc: &Descriptor, value: &Value) -> bool {
        let nested = |id: &BlockId| self.block(*id).ok().map(|b| b.desc.clone());
        match (&desc.kind, value) {
            (FieldKind::Int(_) | FieldKind::Bits(_), Value::UInt(_) | Value::SInt(_)) => true,
            (FieldKind::Float { .. }, Value::Float(_) | Value::UInt(_) | Value::SInt(_)) => true,
            (FieldKind::Str(_), Value::Str(_)) => true,
            (FieldKind::Bytes, Value::Bytes(_)) => true,
            (FieldKind::Pad(_) | FieldKind::Void | FieldKind::BitPad(_), Value::Null) => true,
            (FieldKind::Switch { cases, default, .. }, Value::Block(id)) => nested(id)
                .is_some_and(|d| cases.values().chain([default]).any(|c| same_shape(c, &d))),
            (kind, Value::Block(id)) if kind.is_block() => {
                nested(id).is_some_and(|d| same_shape(desc, &d))
            }
            _ => false,
        }
    }

    fn array_sub(&self, id: BlockId) -> Result<DescRef> {
        let block = self.block(id)?;
        block.desc.kind.sub().cloned().ok_or_else(|| {
            Error::Shape(format!(
                "'{}' is a {}, not an array",
                block.desc.name,
                block.desc.kind.type_name()
            ))
        })
    }

    /// Default-construct a value for `desc` as if it sat at `index` of
    /// `parent`
    pub(crate) fn build(
        &mut self,
        desc: &DescRef,
        parent: Option<BlockId>,
        index: Option<usize>,
    ) -> Result<Value> {
        Reader::detached()
            .read(self, desc, parent, index, 0)
            .map(|(value, _)| value)
    }

    /// Build a detached, default-constructed Block for `desc`. The
    /// descriptor tree is validated first.
    pub fn create(&mut self, desc: impl Into<DescRef>) -> Result<BlockId> {
        let desc = desc.into();
        if !desc.kind.is_block() {
            return Err(Error::Shape(format!(
                "'{}' is a {} and does not form a Block",
                desc.name,
                desc.kind.type_name()
            )));
        }
        validate(&desc)?;
        let value = self.build(&desc, None, None)?;
        value
            .as_block()
            .ok_or_else(|| Error::Shape(format!("'{}' did not produce a Block", desc.name)))
    }

    /// Append an element to an array Block: `value` when given, otherwise a
    /// default-constructed element. Returns the new element's index.
    pub fn append(&mut self, id: BlockId, value: Option<Value>) -> Result<usize> {
        let len = self.len(id)?;
        self.insert(id, len, value)?;
        Ok(len)
    }

    /// Insert an element before `index`. On failure the Block is left
    /// exactly as it was.
    pub fn insert(&mut self, id: BlockId, index: usize, value: Option<Value>) -> Result<()> {
        let sub = self.array_sub(id)?;
        let block = self.block_mut(id)?;
        if index > block.attrs.len() {
            return Err(Error::MissingAttribute {
                block: block.desc.name.clone(),
                name: index.to_string(),
            });
        }
        block.attrs.insert(index, Value::Null);

        match self.populate(id, index, &sub, value) {
            Ok(value) => {
                self.block_mut(id)?.attrs[index] = value;
                Ok(())
            }
            Err(err) => {
                trace!(block = %id, index, "rolling back speculative slot");
                self.block_mut(id)?.attrs.remove(index);
                Err(err)
            }
        }
    }

    fn populate(&mut self, id: BlockId, index: usize, sub: &DescRef, value: Option<Value>) -> Result<Value> {
        match value {
            Some(value) => {
                self.check_shape(sub, &value)?;
                self.adopt(id, &value)?;
                Ok(value)
            }
            None => self.build(sub, Some(id), Some(index)),
        }
    }

    /// Remove an element from an array Block, the last one when `key` is
    /// `None`. A removed Block stays in the arena, detached, until it is
    /// stored elsewhere or discarded.
    pub fn pop(&mut self, id: BlockId, key: Option<AttrKey<'_>>) -> Result<(Value, DescRef)> {
        self.array_sub(id)?;
        let index = match key {
            Some(key) => self.index_of(id, key)?,
            None => self
                .len(id)?
                .checked_sub(1)
                .ok_or_else(|| Error::Shape("cannot pop from an empty array".to_string()))?,
        };
        let desc = self.attr_desc(id, index)?;
        let value = self.block_mut(id)?.attrs.remove(index);
        if let Value::Block(popped) = value {
            self.block_mut(popped)?.parent = None;
        }
        Ok((value, desc))
    }

    /// Grow an array Block by `count` default elements (an integer value) or
    /// by copies of every element of another array Block of the same element
    /// type. On failure nothing is appended.
    pub fn extend(&mut self, id: BlockId, with: Value) -> Result<()> {
        let sub = self.array_sub(id)?;
        let start = self.len(id)?;
        let result = match &with {
            Value::UInt(_) | Value::SInt(_) => {
                let count = with
                    .as_usize()
                    .ok_or_else(|| Error::Shape("cannot extend by a negative count".to_string()))?;
                (0..count).try_for_each(|_| self.append(id, None).map(drop))
            }
            Value::Block(other) => {
                let other_desc = self.desc(*other)?.clone();
                match other_desc.kind.sub() {
                    Some(other_sub) if same_shape(other_sub, &sub) => {
                        let items = self.block(*other)?.attrs.clone();
                        items.iter().try_for_each(|item| {
                            let copy = self.clone_value(item)?;
                            if let Err(err) = self.append(id, Some(copy.clone())) {
                                if let Value::Block(copy) = copy {
                                    self.release(copy);
                                }
                                return Err(err);
                            }
                            Ok(())
                        })
                    }
                    _ => Err(Error::Shape(format!(
                        "cannot extend '{}' with '{}': element types differ",
                        sub.name, other_desc.name
                    ))),
                }
            }
            other => Err(Error::Shape(format!(
                "an array can only be extended by a count or another array, not a {}",
                other.kind_name()
            ))),
        };
        if result.is_err() {
            self.truncate(id, start)?;
        }
        result
    }

    fn truncate(&mut self, id: BlockId, len: usize) -> Result<()> {
        let block = self.block_mut(id)?;
        let removed: Vec<Value> = block.attrs.drain(len.min(block.attrs.len())..).collect();
        for value in removed {
            if let Value::Block(nested) = value {
                self.release(nested);
            }
        }
        Ok(())
    }

    /// Free a detached Block and its subtree
    pub fn discard(&mut self, id: BlockId) -> Result<()> {
        let block = self.block(id)?;
        if block.parent.is_some() {
            return Err(Error::Shape(format!(
                "Block '{}' is still attached to a parent",
                block.desc.name
            )));
        }
        self.release(id);
        Ok(())
    }

    /// Deep-copy a Block into a new detached Block
    pub fn clone_block(&mut self, id: BlockId) -> Result<BlockId> {
        let source = self.block(id)?.clone();
        let copy = self.alloc(source.desc.clone(), None, source.attrs.len());
        let filled = self.fill_copy(copy, &source);
        if filled.is_err() {
            self.release(copy);
        }
        filled.map(|_| copy)
    }

    fn fill_copy(&mut self, copy: BlockId, source: &Block) -> Result<()> {
        for value in &source.attrs {
            let value = self.clone_value(value)?;
            self.attach_copy(copy, &value)?;
            self.block_mut(copy)?.attrs.push(value);
        }
        if let Some(child) = &source.child {
            let value = self.clone_value(child)?;
            self.attach_copy(copy, &value)?;
            self.block_mut(copy)?.child = Some(value);
        }
        Ok(())
    }

    fn attach_copy(&mut self, parent: BlockId, value: &Value) -> Result<()> {
        if let Value::Block(nested) = value {
            self.block_mut(*nested)?.parent = Some(parent);
        }
        Ok(())
    }

    fn clone_value(&mut self, value: &Value) -> Result<Value> {
        match value {
            Value::Block(id) => self.clone_block(*id).map(Value::Block),
            other => Ok(other.clone()),
        }
    }

    /// Name of the enumerated option an integer attribute currently holds
    pub fn enum_name<'k>(&self, id: BlockId, key: impl Into<AttrKey<'k>>) -> Result<Option<String>> {
        let index = self.index_of(id, key)?;
        let desc = self.member_desc(id, index)?;
        let table = desc.kind.table().ok_or_else(|| {
            Error::schema(self.name_of(Some(id)), &desc.name, "field has no enumerated values")
        })?;
        let value = &self.block(id)?.attrs[index];
        Ok(value.as_i64().and_then(|v| table.name_of(v)).map(str::to_string))
    }

    /// Assign an integer attribute by option name
    pub fn set_enum<'k>(&mut self, id: BlockId, key: impl Into<AttrKey<'k>>, name: &str) -> Result<()> {
        let index = self.index_of(id, key)?;
        let desc = self.member_desc(id, index)?;
        let table = desc.kind.table().ok_or_else(|| {
            Error::schema(self.name_of(Some(id)), &desc.name, "field has no enumerated values")
        })?;
        let value = table.value_of(name).ok_or_else(|| {
            Error::decode(0, format!("'{}' has no option named '{}'", desc.name, name))
        })?;
        let updated = self.block(id)?.attrs[index].with_int(value as u64);
        self.set(id, index, updated)
    }

    /// Walk a dotted path. A leading `.` starts at `id`, each further empty
    /// component climbs to the parent and each name descends; without a
    /// leading `.` the walk starts at the root Block.
    fn resolve_path(&self, id: BlockId, path: &str) -> Result<(BlockId, usize)> {
        let (mut cursor, rest) = match path.strip_prefix('.') {
            Some(rest) => (id, rest),
            None => (self.root_of(id)?, path),
        };
        let mut parts: Vec<&str> = rest.split('.').collect();
        let last = parts
            .pop()
            .filter(|part| !part.is_empty())
            .ok_or_else(|| Error::schema(self.name_of(Some(id)), path, "path does not end in an attribute"))?;
        for part in parts {
            cursor = if part.is_empty() {
                self.parent(cursor)?.ok_or_else(|| {
                    Error::schema(self.name_of(Some(id)), path, "path climbs above the root Block")
                })?
            } else {
                self.get_block(cursor, part)?
            };
        }
        Ok((cursor, self.index_of(cursor, last)?))
    }

    /// Value at a dotted path
    pub fn get_neighbor(&self, id: BlockId, path: &str) -> Result<&Value> {
        let (block, index) = self.resolve_path(id, path)?;
        Ok(&self.block(block)?.attrs[index])
    }

    /// Replace the value at a dotted path
    pub fn set_neighbor(&mut self, id: BlockId, path: &str, value: Value) -> Result<()> {
        let (block, index) = self.resolve_path(id, path)?;
        self.set(block, index, value)
    }
}

/// Blocks are interchangeable when built from descriptors with the same
/// name and kind
fn same_shape(a: &Descriptor, b: &Descriptor) -> bool {
    a.name == b.name && a.kind.type_name() == b.kind.type_name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::*;
    use crate::primitives::Endian;
    use std::rc::Rc;

    fn point() -> Descriptor {
        structure("point", vec![uint8("x"), uint8("y")])
    }

    fn polygon() -> DescRef {
        Rc::new(container(
            "polygon",
            vec![uint8("count"), array("points", ".count", point())],
        ))
    }

    #[test]
    fn test_create_builds_defaults() {
        let mut arena = Arena::new();
        let poly = arena.create(polygon()).unwrap();
        assert_eq!(arena.get(poly, "count").unwrap(), &Value::UInt(0));
        let points = arena.get_block(poly, "points").unwrap();
        assert_eq!(arena.len(points).unwrap(), 0);
        assert_eq!(arena.parent(points).unwrap(), Some(poly));
        assert_eq!(arena.live(), 2);
    }

    #[test]
    fn test_get_by_name_and_index() {
        let mut arena = Arena::new();
        let p = arena.create(point()).unwrap();
        arena.set(p, "y", Value::UInt(9)).unwrap();
        assert_eq!(arena.get(p, 1usize).unwrap(), &Value::UInt(9));
        assert_eq!(arena.get(p, "1").unwrap(), &Value::UInt(9));
        assert!(matches!(arena.get(p, "z"), Err(Error::MissingAttribute { .. })));
        assert!(matches!(arena.get(p, 2usize), Err(Error::MissingAttribute { .. })));
    }

    #[test]
    fn test_set_rejects_wrong_shape() {
        let mut arena = Arena::new();
        let p = arena.create(point()).unwrap();
        let err = arena.set(p, "x", Value::Str("nope".into())).unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
        assert_eq!(arena.get(p, "x").unwrap(), &Value::UInt(0));
    }

    #[test]
    fn test_set_reparents_detached_block() {
        let mut arena = Arena::new();
        let poly = arena.create(polygon()).unwrap();
        let points = arena.get_block(poly, "points").unwrap();
        let idx = arena.append(points, None).unwrap();
        let first = arena.get_block(points, idx).unwrap();

        let replacement = arena.create(point()).unwrap();
        arena.set(points, idx, Value::Block(replacement)).unwrap();
        assert_eq!(arena.parent(replacement).unwrap(), Some(points));
        assert!(!arena.contains(first));

        let err = arena.set(points, idx, Value::Block(poly)).unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
    }

    #[test]
    fn test_attached_block_cannot_be_stored_twice() {
        let mut arena = Arena::new();
        let poly = arena.create(polygon()).unwrap();
        let points = arena.get_block(poly, "points").unwrap();
        arena.extend(points, Value::UInt(2)).unwrap();
        let first = arena.get_block(points, 0usize).unwrap();
        let err = arena.set(points, 1usize, Value::Block(first)).unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
    }

    #[test]
    fn test_pop_detaches_and_discard_releases() {
        let mut arena = Arena::new();
        let poly = arena.create(polygon()).unwrap();
        let points = arena.get_block(poly, "points").unwrap();
        arena.extend(points, Value::UInt(3)).unwrap();

        let (value, desc) = arena.pop(points, None).unwrap();
        assert_eq!(desc.name, "point");
        let popped = value.as_block().unwrap();
        assert_eq!(arena.parent(popped).unwrap(), None);
        assert_eq!(arena.len(points).unwrap(), 2);

        arena.append(points, Some(Value::Block(popped))).unwrap();
        assert_eq!(arena.parent(popped).unwrap(), Some(points));

        let (value, _) = arena.pop(points, Some(AttrKey::Index(0))).unwrap();
        let popped = value.as_block().unwrap();
        arena.discard(popped).unwrap();
        assert!(matches!(arena.block(popped), Err(Error::StaleHandle)));
    }

    #[test]
    fn test_pop_empty_array_is_shape_error() {
        let mut arena = Arena::new();
        let poly = arena.create(polygon()).unwrap();
        let points = arena.get_block(poly, "points").unwrap();
        assert!(matches!(arena.pop(points, None), Err(Error::Shape(_))));
    }

    #[test]
    fn test_extend_with_array_copies_elements() {
        let mut arena = Arena::new();
        let a = arena.create(polygon()).unwrap();
        let b = arena.create(polygon()).unwrap();
        let a_points = arena.get_block(a, "points").unwrap();
        let b_points = arena.get_block(b, "points").unwrap();

        arena.append(b_points, None).unwrap();
        let src = arena.get_block(b_points, 0usize).unwrap();
        arena.set(src, "x", Value::UInt(7)).unwrap();

        arena.extend(a_points, Value::Block(b_points)).unwrap();
        let copied = arena.get_block(a_points, 0usize).unwrap();
        assert_ne!(copied, src);
        assert_eq!(arena.get(copied, "x").unwrap(), &Value::UInt(7));
        assert_eq!(arena.parent(copied).unwrap(), Some(a_points));
    }

    #[test]
    fn test_extend_with_other_shapes_fails() {
        let mut arena = Arena::new();
        let poly = arena.create(polygon()).unwrap();
        let points = arena.get_block(poly, "points").unwrap();
        assert!(matches!(arena.extend(points, Value::Str("x".into())), Err(Error::Shape(_))));
        assert!(matches!(arena.extend(points, Value::SInt(-1)), Err(Error::Shape(_))));
        assert!(matches!(arena.extend(points, Value::Block(poly)), Err(Error::Shape(_))));
        assert_eq!(arena.len(points).unwrap(), 0);
    }

    #[test]
    fn test_array_ops_on_struct_fail() {
        let mut arena = Arena::new();
        let p = arena.create(point()).unwrap();
        assert!(matches!(arena.append(p, None), Err(Error::Shape(_))));
    }

    #[test]
    fn test_neighbor_paths() {
        let mut arena = Arena::new();
        let poly = arena.create(polygon()).unwrap();
        let points = arena.get_block(poly, "points").unwrap();
        arena.append(points, None).unwrap();
        let p = arena.get_block(points, 0usize).unwrap();

        arena.set_neighbor(p, "...count", Value::UInt(1)).unwrap();
        assert_eq!(arena.get(poly, "count").unwrap(), &Value::UInt(1));
        assert_eq!(arena.get_neighbor(p, "count").unwrap(), &Value::UInt(1));
        assert_eq!(arena.get_neighbor(poly, "points.0.x").unwrap(), &Value::UInt(0));
        assert_eq!(arena.get_neighbor(p, ".x").unwrap(), &Value::UInt(0));

        assert!(matches!(arena.get_neighbor(poly, "..count"), Err(Error::Schema { .. })));
        assert!(matches!(arena.get_neighbor(poly, "."), Err(Error::Schema { .. })));
    }

    #[test]
    fn test_enum_access() {
        use crate::descriptor::EnumTable;
        let desc = structure(
            "pixel",
            vec![uenum("mode", 1, Endian::Little, EnumTable::new([("rgb", 0), ("indexed", 3)]))],
        );
        let mut arena = Arena::new();
        let px = arena.create(desc).unwrap();
        assert_eq!(arena.enum_name(px, "mode").unwrap().as_deref(), Some("rgb"));
        arena.set_enum(px, "mode", "indexed").unwrap();
        assert_eq!(arena.get(px, "mode").unwrap(), &Value::UInt(3));
        assert!(matches!(arena.set_enum(px, "mode", "cmyk"), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_release_makes_handles_stale() {
        let mut arena = Arena::new();
        let poly = arena.create(polygon()).unwrap();
        let points = arena.get_block(poly, "points").unwrap();
        arena.discard(poly).unwrap();
        assert!(!arena.contains(points));
        assert_eq!(arena.live(), 0);

        let reused = arena.create(point()).unwrap();
        assert!(arena.contains(reused));
        assert!(!arena.contains(poly));
    }
}

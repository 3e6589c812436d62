//! Reader: walks a descriptor tree over a byte source and builds Blocks
//!
//! Every call threads a running offset relative to the root offset. With no
//! byte source attached the same traversal default-constructs the tree.

use tracing::trace;

use crate::block::{Arena, BlockId};
use crate::descriptor::{
    DescRef, Descriptor, EnumTable, FieldContext, FieldKind, Fields, Predicate, StrSpec,
};
use crate::errors::{Error, Result, ResultExt};
use crate::primitives::{low_mask, sign_extend, Endian};
use crate::size::resolve;
use crate::source::ByteSource;
use crate::value::Value;

/// Nesting depth allowed when no other limit is configured
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Options for parsing a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Origin of all offsets and pointers
    pub root_offset: usize,
    /// Offset of the root field relative to `root_offset`
    pub offset: usize,
    /// Deepest descriptor nesting accepted before failing
    pub max_depth: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            root_offset: 0,
            offset: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ReadOptions {
    /// Set the root offset
    pub fn root_offset(mut self, root_offset: usize) -> Self {
        self.root_offset = root_offset;
        self
    }

    /// Set the starting offset
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Set the depth limit
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

pub(crate) struct Reader<'s> {
    source: Option<&'s mut dyn ByteSource>,
    root_offset: usize,
    max_depth: usize,
    depth: usize,
}

impl<'s> Reader<'s> {
    pub(crate) fn new(source: &'s mut dyn ByteSource, options: &ReadOptions) -> Self {
        Self {
            source: Some(source),
            root_offset: options.root_offset,
            max_depth: options.max_depth,
            depth: 0,
        }
    }

    /// Reader that default-constructs instead of parsing
    pub(crate) fn detached() -> Self {
        Self {
            source: None,
            root_offset: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            depth: 0,
        }
    }

    fn source(&mut self) -> Option<&mut dyn ByteSource> {
        match self.source.as_mut() {
            Some(source) => Some(&mut **source),
            None => None,
        }
    }

    fn context<'a>(
        &'a mut self,
        arena: &'a Arena,
        parent: Option<BlockId>,
        index: Option<usize>,
        offset: usize,
    ) -> FieldContext<'a> {
        let position = self.root_offset + offset;
        FieldContext::new(arena, parent, index, position, self.source())
    }

    /// Read one field at `offset`. The caller stores the returned value in
    /// `parent`; the returned offset is where the next sibling starts.
    pub(crate) fn read(
        &mut self,
        arena: &mut Arena,
        desc: &DescRef,
        parent: Option<BlockId>,
        index: Option<usize>,
        offset: usize,
    ) -> Result<(Value, usize)> {
        if self.depth >= self.max_depth {
            return Err(Error::DepthLimit(self.max_depth));
        }
        self.depth += 1;
        let result = self
            .read_field(arena, desc, parent, index, offset)
            .within(|| desc.frame());
        self.depth -= 1;
        result
    }

    fn read_field(
        &mut self,
        arena: &mut Arena,
        desc: &DescRef,
        parent: Option<BlockId>,
        index: Option<usize>,
        offset: usize,
    ) -> Result<(Value, usize)> {
        let offset = match desc.align {
            Some(align) if align > 1 => offset.div_ceil(align) * align,
            _ => offset,
        };
        if let Some(pointer) = &desc.pointer {
            let target = {
                let mut ctx = self.context(arena, parent, index, offset);
                resolve(pointer, &desc.name, &mut ctx)?
            };
            let (value, _) = self.read_body(arena, desc, parent, index, target)?;
            return Ok((value, offset));
        }
        self.read_body(arena, desc, parent, index, offset)
    }

    fn read_body(
        &mut self,
        arena: &mut Arena,
        desc: &DescRef,
        parent: Option<BlockId>,
        index: Option<usize>,
        offset: usize,
    ) -> Result<(Value, usize)> {
        match &desc.kind {
            FieldKind::Int(spec) => {
                let end = offset + spec.width;
                if self.source.is_none() {
                    let zero = if spec.signed { Value::SInt(0) } else { Value::UInt(0) };
                    return Ok((desc.default.clone().unwrap_or(zero), end));
                }
                let raw = self.take(offset, spec.width)?;
                let value = if spec.signed {
                    Value::SInt(spec.endian.unwrap_or_default().read_sint(&raw))
                } else {
                    Value::UInt(spec.endian.unwrap_or_default().read_uint(&raw))
                };
                self.check_enum(spec.table.as_deref(), &value, offset)?;
                Ok((value, end))
            }
            FieldKind::Float { width, endian } => {
                let end = offset + width;
                if self.source.is_none() {
                    return Ok((desc.default.clone().unwrap_or(Value::Float(0.0)), end));
                }
                let raw = self.take(offset, *width)?;
                let endian = endian.unwrap_or_default();
                let value = match width {
                    4 => endian.read_f32(&raw) as f64,
                    _ => endian.read_f64(&raw),
                };
                Ok((Value::Float(value), end))
            }
            FieldKind::Str(spec) => self.read_str(arena, desc, spec, parent, index, offset),
            FieldKind::Bytes => {
                let size = self.size(arena, desc, parent, index, offset)?;
                if self.source.is_none() {
                    let value = desc.default.clone().unwrap_or_else(|| Value::Bytes(vec![0; size]));
                    return Ok((value, offset + size));
                }
                Ok((Value::Bytes(self.take(offset, size)?), offset + size))
            }
            FieldKind::Pad(n) => Ok((Value::Null, offset + n)),
            FieldKind::Void => Ok((Value::Null, offset)),
            FieldKind::BitStruct {
                width,
                endian,
                fields,
            } => self.read_bit_struct(arena, desc, *width, endian.unwrap_or_default(), fields, parent, offset),
            FieldKind::Struct(fields) | FieldKind::Container(fields) => {
                let id = arena.alloc(desc.clone(), parent, fields.len());
                let result = self
                    .read_members(arena, id, fields, offset)
                    .and_then(|end| self.read_child(arena, desc, id, end));
                finish(arena, id, result)
            }
            FieldKind::Array(sub) => {
                let count = self.size(arena, desc, parent, index, offset)?;
                let id = arena.alloc(desc.clone(), parent, count);
                let result = self
                    .read_elements(arena, id, sub, count, offset)
                    .and_then(|end| self.read_child(arena, desc, id, end));
                finish(arena, id, result)
            }
            FieldKind::WhileArray { sub, more } => {
                let id = arena.alloc(desc.clone(), parent, 0);
                let result = self
                    .read_while(arena, id, sub, more, offset)
                    .and_then(|end| self.read_child(arena, desc, id, end));
                finish(arena, id, result)
            }
            FieldKind::Switch {
                selector,
                cases,
                default,
            } => {
                let key = {
                    let mut ctx = self.context(arena, parent, index, offset);
                    selector(&mut ctx)?
                };
                let case = key.and_then(|k| cases.get(&k)).unwrap_or(default);
                trace!(switch = %desc.name, ?key, case = %case.name, "selected switch case");
                self.read(arena, case, parent, index, offset)
            }
            FieldKind::Bits(_) | FieldKind::BitPad(_) => Err(Error::schema(
                arena.name_of(parent),
                &desc.name,
                "bit-field outside a bit-struct",
            )),
        }
    }

    fn read_members(&mut self, arena: &mut Arena, id: BlockId, fields: &Fields, offset: usize) -> Result<usize> {
        let mut offset = offset;
        for (i, member) in fields.members().iter().enumerate() {
            let (value, next) = self.read(arena, member, Some(id), Some(i), offset)?;
            arena.block_mut(id)?.attrs.push(value);
            offset = next;
        }
        Ok(offset)
    }

    fn read_elements(
        &mut self,
        arena: &mut Arena,
        id: BlockId,
        sub: &DescRef,
        count: usize,
        offset: usize,
    ) -> Result<usize> {
        let mut offset = offset;
        for i in 0..count {
            let (value, next) = self.read(arena, sub, Some(id), Some(i), offset)?;
            arena.block_mut(id)?.attrs.push(value);
            offset = next;
        }
        Ok(offset)
    }

    fn read_while(
        &mut self,
        arena: &mut Arena,
        id: BlockId,
        sub: &DescRef,
        more: &Predicate,
        offset: usize,
    ) -> Result<usize> {
        if self.source.is_none() {
            return Ok(offset);
        }
        let mut offset = offset;
        let mut count = 0;
        loop {
            let go = {
                let mut ctx = self.context(arena, Some(id), Some(count), offset);
                more(&mut ctx)?
            };
            if !go {
                break;
            }
            let (value, next) = self.read(arena, sub, Some(id), Some(count), offset)?;
            arena.block_mut(id)?.attrs.push(value);
            offset = next;
            count += 1;
        }
        trace!(array = %arena.name_of(Some(id)), count, end = offset, "while-array terminated");
        Ok(offset)
    }

    fn read_child(&mut self, arena: &mut Arena, desc: &Descriptor, id: BlockId, offset: usize) -> Result<usize> {
        let Some(child) = &desc.child else {
            return Ok(offset);
        };
        let (value, end) = self.read(arena, child, Some(id), None, offset)?;
        arena.block_mut(id)?.child = Some(value);
        Ok(end)
    }

    #[allow(clippy::too_many_arguments)]
    fn read_bit_struct(
        &mut self,
        arena: &mut Arena,
        desc: &DescRef,
        width: usize,
        endian: Endian,
        fields: &Fields,
        parent: Option<BlockId>,
        offset: usize,
    ) -> Result<(Value, usize)> {
        let raw = if self.source.is_some() {
            Some(endian.read_uint(&self.take(offset, width)?))
        } else {
            None
        };
        let mut values = Vec::with_capacity(fields.len());
        let mut shift = 0u32;
        for member in fields.members() {
            let value = match &member.kind {
                FieldKind::Bits(spec) => {
                    let value = match raw {
                        Some(raw) => {
                            let bits = raw.checked_shr(shift).unwrap_or(0) & low_mask(spec.bits);
                            let value = if spec.signed {
                                Value::SInt(sign_extend(bits, spec.bits))
                            } else {
                                Value::UInt(bits)
                            };
                            self.check_enum(spec.table.as_deref(), &value, offset)
                                .within(|| member.frame())?;
                            value
                        }
                        None => {
                            let zero = if spec.signed { Value::SInt(0) } else { Value::UInt(0) };
                            member.default.clone().unwrap_or(zero)
                        }
                    };
                    shift += spec.bits;
                    value
                }
                FieldKind::BitPad(bits) => {
                    shift += bits;
                    Value::Null
                }
                _ => {
                    return Err(Error::schema(
                        &desc.name,
                        &member.name,
                        "only bit-fields may appear in a bit-struct",
                    ))
                }
            };
            values.push(value);
        }
        let id = arena.alloc(desc.clone(), parent, 0);
        arena.block_mut(id)?.attrs = values;
        Ok((Value::Block(id), offset + width))
    }

    fn read_str(
        &mut self,
        arena: &mut Arena,
        desc: &Descriptor,
        spec: &StrSpec,
        parent: Option<BlockId>,
        index: Option<usize>,
        offset: usize,
    ) -> Result<(Value, usize)> {
        let unit = spec.encoding.unit_width();
        if desc.size.is_none() && spec.terminated {
            if self.source.is_none() {
                let value = desc.default.clone().unwrap_or_else(|| Value::Str(String::new()));
                let len = value.as_str().map_or(Ok(0), |s| spec.encoding.encode(s).map(|b| b.len()))?;
                return Ok((value, offset + len + unit));
            }
            let mut raw = Vec::new();
            let mut pos = offset;
            loop {
                let chunk = self.take(pos, unit)?;
                pos += unit;
                if chunk.iter().all(|&b| b == 0) {
                    break;
                }
                raw.extend_from_slice(&chunk);
            }
            let text = spec.encoding.decode(&raw, spec.lossy, self.root_offset + offset)?;
            return Ok((Value::Str(text), pos));
        }

        let size = self.size(arena, desc, parent, index, offset)?;
        if self.source.is_none() {
            let value = desc.default.clone().unwrap_or_else(|| Value::Str(String::new()));
            return Ok((value, offset + size));
        }
        let raw = self.take(offset, size)?;
        let text = if spec.terminated {
            let end = raw
                .chunks(unit)
                .position(|c| c.iter().all(|&b| b == 0))
                .map_or(raw.len(), |i| i * unit);
            &raw[..end]
        } else {
            &raw[..]
        };
        let text = spec.encoding.decode(text, spec.lossy, self.root_offset + offset)?;
        Ok((Value::Str(text), offset + size))
    }

    fn size(
        &mut self,
        arena: &Arena,
        desc: &Descriptor,
        parent: Option<BlockId>,
        index: Option<usize>,
        offset: usize,
    ) -> Result<usize> {
        let spec = desc.size.as_ref().ok_or_else(|| {
            Error::schema(arena.name_of(parent), &desc.name, "missing size specification")
        })?;
        let mut ctx = self.context(arena, parent, index, offset);
        resolve(spec, &desc.name, &mut ctx)
    }

    fn take(&mut self, offset: usize, n: usize) -> Result<Vec<u8>> {
        let at = self.root_offset + offset;
        let source = self.source.as_deref_mut().ok_or(Error::Capability("read"))?;
        source.seek(at)?;
        let bytes = source.read(n)?;
        if bytes.len() < n {
            return Err(Error::OutOfBounds { offset: at, wanted: n });
        }
        Ok(bytes)
    }

    fn check_enum(&self, table: Option<&EnumTable>, value: &Value, offset: usize) -> Result<()> {
        let Some(table) = table.filter(|t| t.strict) else {
            return Ok(());
        };
        if value.as_i64().and_then(|v| table.name_of(v)).is_none() {
            return Err(Error::decode(
                self.root_offset + offset,
                format!("{:?} is not an enumerated value", value),
            ));
        }
        Ok(())
    }
}

fn finish(arena: &mut Arena, id: BlockId, result: Result<usize>) -> Result<(Value, usize)> {
    match result {
        Ok(end) => Ok((Value::Block(id), end)),
        Err(err) => {
            arena.release(id);
            Err(err)
        }
    }
}

//! Writer: re-encodes a Block tree in descriptor declaration order

use tracing::trace;

use crate::block::{Arena, Block, BlockId};
use crate::descriptor::{DescRef, Descriptor, FieldContext, FieldKind, SizeEdit, SizeSpec};
use crate::errors::{Error, Result, ResultExt};
use crate::primitives::{fits, low_mask, Endian};
use crate::reader::DEFAULT_MAX_DEPTH;
use crate::size::resolve;
use crate::value::Value;

/// Options for encoding a tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Recompute every pointer before writing, see [`Arena::set_pointers`]
    pub calc_pointers: bool,
}

impl WriteOptions {
    /// Set whether pointers are recomputed
    pub fn calc_pointers(mut self, calc_pointers: bool) -> Self {
        self.calc_pointers = calc_pointers;
        self
    }
}

/// Output buffer addressed by absolute position. In counting mode only the
/// extent is tracked.
#[derive(Debug, Default)]
struct Sink {
    bytes: Vec<u8>,
    counting: bool,
    end: usize,
}

impl Sink {
    fn put(&mut self, at: usize, data: &[u8]) {
        let end = at + data.len();
        self.end = self.end.max(end);
        if self.counting {
            return;
        }
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        self.bytes[at..end].copy_from_slice(data);
    }

    fn zeros(&mut self, at: usize, n: usize) {
        let end = at + n;
        self.end = self.end.max(end);
        if self.counting {
            return;
        }
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        self.bytes[at..end].fill(0);
    }
}

/// Pointer-placed field skipped by a layout pass
struct Pointed {
    desc: DescRef,
    value: Value,
    parent: Option<BlockId>,
    index: Option<usize>,
}

struct Writer<'a> {
    arena: &'a Arena,
    sink: Sink,
    max_depth: usize,
    depth: usize,
    /// Set during layout: pointer-placed fields are recorded here instead
    /// of written
    pointed: Option<Vec<Pointed>>,
}

impl<'a> Writer<'a> {
    fn new(arena: &'a Arena, counting: bool) -> Self {
        Self {
            arena,
            sink: Sink {
                counting,
                ..Sink::default()
            },
            max_depth: DEFAULT_MAX_DEPTH,
            depth: 0,
            pointed: None,
        }
    }

    fn layout(arena: &'a Arena) -> Self {
        Self {
            pointed: Some(Vec::new()),
            ..Self::new(arena, true)
        }
    }

    fn take_pointed(&mut self) -> Vec<Pointed> {
        self.pointed.take().unwrap_or_default()
    }

    /// Write `value` as described by `desc` at `offset` and return the
    /// offset after it. Block values are written with their own descriptor,
    /// which may be a private override. A switch keeps its own descriptor
    /// so its alignment and pointer apply before the selected case.
    fn write(
        &mut self,
        desc: &DescRef,
        value: &Value,
        parent: Option<BlockId>,
        index: Option<usize>,
        offset: usize,
    ) -> Result<usize> {
        if self.depth >= self.max_depth {
            return Err(Error::DepthLimit(self.max_depth));
        }
        let arena = self.arena;
        let desc = match value {
            Value::Block(id) if !matches!(desc.kind, FieldKind::Switch { .. }) => arena.desc(*id)?,
            _ => desc,
        };
        self.depth += 1;
        let result = self
            .write_field(desc, value, parent, index, offset)
            .within(|| desc.frame());
        self.depth -= 1;
        result
    }

    fn write_field(
        &mut self,
        desc: &DescRef,
        value: &Value,
        parent: Option<BlockId>,
        index: Option<usize>,
        offset: usize,
    ) -> Result<usize> {
        let offset = match desc.align {
            Some(align) if align > 1 => {
                let aligned = offset.div_ceil(align) * align;
                self.sink.zeros(offset, aligned - offset);
                aligned
            }
            _ => offset,
        };
        if let Some(pointer) = &desc.pointer {
            if let Some(pointed) = self.pointed.as_mut() {
                pointed.push(Pointed {
                    desc: desc.clone(),
                    value: value.clone(),
                    parent,
                    index,
                });
                return Ok(offset);
            }
            let target = self.resolve(pointer, desc, parent, index, offset)?;
            self.write_body(desc, value, parent, index, target)?;
            return Ok(offset);
        }
        self.write_body(desc, value, parent, index, offset)
    }

    fn write_body(
        &mut self,
        desc: &Descriptor,
        value: &Value,
        parent: Option<BlockId>,
        index: Option<usize>,
        offset: usize,
    ) -> Result<usize> {
        match &desc.kind {
            FieldKind::Int(spec) => {
                if !(1..=8).contains(&spec.width) {
                    return Err(bad_width(self.arena, parent, desc, spec.width));
                }
                let bytes = encode_int(desc, value, spec.width, spec.signed, spec.endian.unwrap_or_default())?;
                self.sink.put(offset, &bytes);
                Ok(offset + spec.width)
            }
            FieldKind::Float { width, endian } => {
                let v = value.as_f64().ok_or_else(|| mismatch(desc, value))?;
                let endian = endian.unwrap_or_default();
                let bytes = match width {
                    4 => endian.write_f32(v as f32),
                    8 => endian.write_f64(v),
                    _ => return Err(bad_width(self.arena, parent, desc, *width)),
                };
                self.sink.put(offset, &bytes);
                Ok(offset + width)
            }
            FieldKind::Str(spec) => {
                let text = value.as_str().ok_or_else(|| mismatch(desc, value))?;
                let mut bytes = spec.encoding.encode(text)?;
                match &desc.size {
                    Some(size) => {
                        let size = self.resolve(size, desc, parent, index, offset)?;
                        bytes = fit(bytes, size)?;
                    }
                    None if spec.terminated => {
                        bytes.extend(std::iter::repeat(0).take(spec.encoding.unit_width()))
                    }
                    None => {
                        return Err(Error::schema(
                            self.arena.name_of(parent),
                            &desc.name,
                            "string has neither a size nor a terminator",
                        ))
                    }
                }
                self.sink.put(offset, &bytes);
                Ok(offset + bytes.len())
            }
            FieldKind::Bytes => {
                let data = value.as_bytes().ok_or_else(|| mismatch(desc, value))?;
                let size = match &desc.size {
                    Some(size) => self.resolve(size, desc, parent, index, offset)?,
                    None => data.len(),
                };
                let bytes = fit(data.to_vec(), size)?;
                self.sink.put(offset, &bytes);
                Ok(offset + size)
            }
            FieldKind::Pad(n) => {
                self.sink.zeros(offset, *n);
                Ok(offset + n)
            }
            FieldKind::Void => Ok(offset),
            FieldKind::BitStruct { width, endian, .. } => {
                if !(1..=8).contains(width) {
                    return Err(bad_width(self.arena, parent, desc, *width));
                }
                let (_, block) = self.block_of(desc, value)?;
                let raw = pack_bits(block)?;
                self.sink.put(offset, &endian.unwrap_or_default().write_uint(raw, *width));
                Ok(offset + width)
            }
            FieldKind::Struct(fields) | FieldKind::Container(fields) => {
                let (id, block) = self.block_of(desc, value)?;
                let mut offset = offset;
                for (i, (member, value)) in fields.members().iter().zip(&block.attrs).enumerate() {
                    offset = self.write(member, value, Some(id), Some(i), offset)?;
                }
                self.write_child(desc, block, id, offset)
            }
            FieldKind::Array(sub) | FieldKind::WhileArray { sub, .. } => {
                let (id, block) = self.block_of(desc, value)?;
                let mut offset = offset;
                for (i, value) in block.attrs.iter().enumerate() {
                    offset = self.write(sub, value, Some(id), Some(i), offset)?;
                }
                self.write_child(desc, block, id, offset)
            }
            FieldKind::Switch { .. } => match value {
                Value::Block(id) => {
                    let arena = self.arena;
                    let case = arena.desc(*id)?;
                    self.write(case, value, parent, index, offset)
                }
                _ => Err(Error::Shape(format!(
                    "switch '{}' holds a {}, not a Block",
                    desc.name,
                    value.kind_name()
                ))),
            },
            FieldKind::Bits(_) | FieldKind::BitPad(_) => Err(Error::schema(
                self.arena.name_of(parent),
                &desc.name,
                "bit-field outside a bit-struct",
            )),
        }
    }

    fn write_child(&mut self, desc: &Descriptor, block: &Block, id: BlockId, offset: usize) -> Result<usize> {
        match (&desc.child, &block.child) {
            (Some(child), Some(value)) => self.write(child, value, Some(id), None, offset),
            _ => Ok(offset),
        }
    }

    fn block_of(&self, desc: &Descriptor, value: &Value) -> Result<(BlockId, &'a Block)> {
        let arena = self.arena;
        match value {
            Value::Block(id) => Ok((*id, arena.block(*id)?)),
            _ => Err(mismatch(desc, value)),
        }
    }

    fn resolve(
        &self,
        spec: &SizeSpec,
        desc: &Descriptor,
        parent: Option<BlockId>,
        index: Option<usize>,
        offset: usize,
    ) -> Result<usize> {
        let mut ctx = FieldContext::new(self.arena, parent, index, offset, None);
        resolve(spec, &desc.name, &mut ctx)
    }
}

fn pack_bits(block: &Block) -> Result<u64> {
    let fields = block.desc.kind.fields().ok_or_else(|| {
        Error::schema(&block.desc.name, "", "bit-struct without bit-fields")
    })?;
    let mut raw = 0u64;
    let mut shift = 0u32;
    for (member, value) in fields.members().iter().zip(&block.attrs) {
        match &member.kind {
            FieldKind::Bits(spec) => {
                let n = value.as_int().ok_or_else(|| mismatch(member, value))?;
                if !fits(n, spec.bits, spec.signed) {
                    return Err(Error::Encode(format!("{} does not fit in {} bits", n, spec.bits))
                        .within(member.frame()));
                }
                let bits = (n as u64) & low_mask(spec.bits);
                raw |= bits.checked_shl(shift).unwrap_or(0);
                shift += spec.bits;
            }
            FieldKind::BitPad(bits) => shift += bits,
            _ => {
                return Err(Error::schema(
                    &block.desc.name,
                    &member.name,
                    "only bit-fields may appear in a bit-struct",
                ))
            }
        }
    }
    Ok(raw)
}

fn encode_int(desc: &Descriptor, value: &Value, width: usize, signed: bool, endian: Endian) -> Result<Vec<u8>> {
    let n = value.as_int().ok_or_else(|| mismatch(desc, value))?;
    if !fits(n, width as u32 * 8, signed) {
        return Err(Error::Encode(format!(
            "{} does not fit in a {}-byte {} integer",
            n,
            width,
            if signed { "signed" } else { "unsigned" }
        )));
    }
    Ok(endian.write_uint(n as u64, width))
}

fn fit(mut bytes: Vec<u8>, size: usize) -> Result<Vec<u8>> {
    if bytes.len() > size {
        return Err(Error::Encode(format!(
            "{} bytes do not fit in a field of {} bytes",
            bytes.len(),
            size
        )));
    }
    bytes.resize(size, 0);
    Ok(bytes)
}

fn bad_width(arena: &Arena, parent: Option<BlockId>, desc: &Descriptor, width: usize) -> Error {
    Error::schema(
        arena.name_of(parent),
        &desc.name,
        format!("{} width {} is not encodable", desc.kind.type_name(), width),
    )
}

fn mismatch(desc: &Descriptor, value: &Value) -> Error {
    Error::Shape(format!(
        "'{}' is a {} field but holds a {}",
        desc.name,
        desc.kind.type_name(),
        value.kind_name()
    ))
}

impl Arena {
    /// Encode the tree rooted at `id` into bytes
    pub fn serialize(&self, id: BlockId) -> Result<Vec<u8>> {
        let mut writer = Writer::new(self, false);
        let desc = self.desc(id)?.clone();
        let end = writer.write(&desc, &Value::Block(id), self.parent(id)?, None, 0)?;
        let mut bytes = writer.sink.bytes;
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        Ok(bytes)
    }

    /// Encoded byte size of the tree rooted at `id`, computed without
    /// producing any bytes
    pub fn byte_size(&self, id: BlockId) -> Result<usize> {
        let mut writer = Writer::new(self, true);
        let desc = self.desc(id)?.clone();
        let end = writer.write(&desc, &Value::Block(id), self.parent(id)?, None, 0)?;
        Ok(end.max(writer.sink.end))
    }

    /// Encode the tree rooted at `id`, recomputing pointers first when the
    /// options ask for it
    pub fn serialize_with(&mut self, id: BlockId, options: &WriteOptions) -> Result<Vec<u8>> {
        if options.calc_pointers {
            self.set_pointers(id)?;
        }
        self.serialize(id)
    }

    /// Lay out every pointer-placed field under `id` so that no two fields
    /// overlap, and store the new positions.
    ///
    /// Fields reached in declaration order are measured first; pointer
    /// fields are then placed one after another from the end of that data,
    /// in the order they were met. Pointer fields nested inside placed data
    /// follow in a further round. A path pointer gets the new position
    /// written to the field it names, a computed pointer goes through its
    /// setter, and a literal pointer or a computed one without a setter
    /// stays where it is.
    pub fn set_pointers(&mut self, id: BlockId) -> Result<()> {
        let desc = self.desc(id)?.clone();
        let parent = self.parent(id)?;
        let mut writer = Writer::layout(self);
        let mut cursor = writer.write(&desc, &Value::Block(id), parent, None, 0)?;
        let mut pending = writer.take_pointed();
        let mut round = 0;

        while !pending.is_empty() {
            trace!(round, fields = pending.len(), cursor, "placing pointer fields");
            let mut next = Vec::new();
            for field in pending {
                if let Some(align) = field.desc.align.filter(|a| *a > 1) {
                    cursor = cursor.div_ceil(align) * align;
                }
                let at = self.place(&field, cursor).within(|| field.desc.frame())?;
                let mut writer = Writer::layout(self);
                cursor = writer
                    .write_body(&field.desc, &field.value, field.parent, field.index, at)
                    .within(|| field.desc.frame())?;
                next.extend(writer.take_pointed());
            }
            pending = next;
            round += 1;
        }
        Ok(())
    }

    /// Record `cursor` as the position of a pointer-placed field and return
    /// where the field actually lands
    fn place(&mut self, field: &Pointed, cursor: usize) -> Result<usize> {
        let (Some(pointer), Some(parent)) = (&field.desc.pointer, field.parent) else {
            return Ok(cursor);
        };
        match pointer {
            SizeSpec::Literal(at) => Ok(*at),
            SizeSpec::Path(path) => {
                trace!(attr = %field.desc.name, path = %path, cursor, "writing pointer field");
                self.store_at_path(parent, &field.desc.name, path, cursor)?;
                Ok(cursor)
            }
            SizeSpec::Computed(f) => match (&f.set, field.index) {
                (Some(set), Some(index)) => {
                    set(
                        &mut SizeEdit {
                            arena: self,
                            parent,
                            index,
                        },
                        cursor,
                    )?;
                    Ok(cursor)
                }
                _ => {
                    let mut ctx = FieldContext::new(self, Some(parent), field.index, cursor, None);
                    resolve(pointer, &field.desc.name, &mut ctx)
                }
            },
        }
    }
}

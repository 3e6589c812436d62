//! Tag definitions and parsed tags

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::rc::Rc;

use tracing::debug;

use crate::block::{Arena, BlockId};
use crate::descriptor::{DescRef, Descriptor, FieldKind};
use crate::errors::{Error, Result};
use crate::primitives::Endian;
use crate::reader::{ReadOptions, Reader};
use crate::source::{ByteSource, SliceSource, StreamSource};
use crate::validator::validate;
use crate::writer::WriteOptions;

/// Largest alignment [`AlignMode::Auto`] assigns
pub const MAX_AUTO_ALIGN: usize = 8;

/// How fields without an explicit alignment are placed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AlignMode {
    /// Fields follow each other with no padding
    #[default]
    Packed,
    /// Scalars align to their width rounded up to a power of two, strings
    /// to their code unit, structs and arrays to their widest member.
    /// Capped at [`MAX_AUTO_ALIGN`]; pointer-placed fields are left alone.
    Auto,
}

/// A validated root descriptor together with its identity
#[derive(Debug, Clone)]
pub struct TagDef {
    id: String,
    ext: String,
    endian: Endian,
    align_mode: AlignMode,
    root: DescRef,
}

impl TagDef {
    /// Validate `root` and wrap it as a definition
    pub fn new(id: impl Into<String>, root: impl Into<DescRef>) -> Result<Self> {
        let root = root.into();
        validate(&root)?;
        Ok(Self {
            id: id.into(),
            ext: String::new(),
            endian: Endian::default(),
            align_mode: AlignMode::default(),
            root,
        })
    }

    /// Byte order for every scalar and bit-struct that names none
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        fill_endian(&mut self.root, endian);
        self
    }

    /// Alignment applied to fields that name none
    pub fn with_align_mode(mut self, mode: AlignMode) -> Self {
        self.align_mode = mode;
        if mode == AlignMode::Auto {
            auto_align(&mut self.root);
        }
        self
    }

    /// Set the file extension associated with this definition
    pub fn with_ext(mut self, ext: impl Into<String>) -> Self {
        self.ext = ext.into();
        self
    }

    /// Definition identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// File extension, without the dot
    pub fn ext(&self) -> &str {
        &self.ext
    }

    /// Default byte order
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Alignment mode
    pub fn align_mode(&self) -> AlignMode {
        self.align_mode
    }

    /// Root descriptor
    pub fn root(&self) -> &DescRef {
        &self.root
    }
}

/// Members, elements and cases of `desc`, then its trailing child
fn nested_mut(desc: &mut Descriptor) -> (Vec<&mut DescRef>, Option<&mut DescRef>) {
    let Descriptor { kind, child, .. } = desc;
    let members = match kind {
        FieldKind::Struct(fields) | FieldKind::Container(fields) | FieldKind::BitStruct { fields, .. } => {
            Rc::make_mut(fields).members_mut().iter_mut().collect()
        }
        FieldKind::Array(sub) | FieldKind::WhileArray { sub, .. } => vec![sub],
        FieldKind::Switch { cases, default, .. } => {
            let mut all: Vec<&mut DescRef> = Rc::make_mut(cases).values_mut().collect();
            all.push(default);
            all
        }
        _ => Vec::new(),
    };
    (members, child.as_mut())
}

fn fill_endian(desc: &mut DescRef, endian: Endian) {
    let desc = Rc::make_mut(desc);
    match &mut desc.kind {
        FieldKind::Int(spec) => {
            spec.endian.get_or_insert(endian);
        }
        FieldKind::Float { endian: order, .. } | FieldKind::BitStruct { endian: order, .. } => {
            order.get_or_insert(endian);
        }
        _ => {}
    }
    let (members, child) = nested_mut(desc);
    for member in members.into_iter().chain(child) {
        fill_endian(member, endian);
    }
}

/// Assign automatic alignments below `desc` and return its own
fn auto_align(desc: &mut DescRef) -> usize {
    let desc = Rc::make_mut(desc);
    let own = match &desc.kind {
        FieldKind::Int(spec) => spec.width,
        FieldKind::Float { width, .. } | FieldKind::BitStruct { width, .. } => *width,
        FieldKind::Str(spec) => spec.encoding.unit_width(),
        _ => 1,
    };
    let (members, child) = nested_mut(desc);
    let mut widest = own;
    for member in members {
        widest = widest.max(auto_align(member));
    }
    if let Some(child) = child {
        auto_align(child);
    }
    if desc.align.is_none() && desc.pointer.is_none() {
        let align = widest.next_power_of_two().min(MAX_AUTO_ALIGN);
        if align > 1 {
            desc.align = Some(align);
        }
    }
    desc.align.unwrap_or(1)
}

/// A Block tree built from a [`TagDef`]
#[derive(Debug)]
pub struct Tag {
    def: Rc<TagDef>,
    arena: Arena,
    root: BlockId,
}

impl Tag {
    /// Default-construct a tag
    pub fn new(def: impl Into<Rc<TagDef>>) -> Result<Self> {
        let def = def.into();
        let mut arena = Arena::new();
        let root = arena.create(def.root.clone())?;
        debug!(tag = %def.id, blocks = arena.live(), "constructed default tag");
        Ok(Self { def, arena, root })
    }

    /// Parse a tag from bytes
    pub fn parse(def: impl Into<Rc<TagDef>>, data: &[u8]) -> Result<Self> {
        Self::parse_with(def, &mut SliceSource::new(data), &ReadOptions::default())
    }

    /// Parse a tag from any byte source
    pub fn parse_with(
        def: impl Into<Rc<TagDef>>,
        source: &mut dyn ByteSource,
        options: &ReadOptions,
    ) -> Result<Self> {
        let def = def.into();
        let mut arena = Arena::new();
        debug!(tag = %def.id, root_offset = options.root_offset, offset = options.offset, "parsing tag");
        let (value, end) =
            Reader::new(source, options).read(&mut arena, &def.root, None, None, options.offset)?;
        let root = value.as_block().ok_or_else(|| {
            Error::schema("<root>", &def.root.name, "root descriptor did not produce a Block")
        })?;
        debug!(tag = %def.id, end, blocks = arena.live(), "parsed tag");
        Ok(Self { def, arena, root })
    }

    /// Parse a tag from a file
    pub fn load(def: impl Into<Rc<TagDef>>, path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut source = StreamSource::new(BufReader::new(file));
        Self::parse_with(def, &mut source, &ReadOptions::default())
    }

    /// Encode the tag
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let bytes = self.arena.serialize(self.root)?;
        debug!(tag = %self.def.id, len = bytes.len(), "serialized tag");
        Ok(bytes)
    }

    /// Encode the tag with explicit options; recomputing pointers updates
    /// the tree
    pub fn serialize_with(&mut self, options: &WriteOptions) -> Result<Vec<u8>> {
        let bytes = self.arena.serialize_with(self.root, options)?;
        debug!(tag = %self.def.id, len = bytes.len(), calc_pointers = options.calc_pointers, "serialized tag");
        Ok(bytes)
    }

    /// Encode the tag into a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.serialize()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Encoded size in bytes
    pub fn binsize(&self) -> Result<usize> {
        self.arena.byte_size(self.root)
    }

    /// Definition this tag was built from
    pub fn def(&self) -> &Rc<TagDef> {
        &self.def
    }

    /// Root Block handle
    pub fn root(&self) -> BlockId {
        self.root
    }

    /// Arena holding the tree
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Mutable arena holding the tree
    pub fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }
}

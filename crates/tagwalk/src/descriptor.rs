//! Descriptors: the declarative schema nodes a tag is parsed from
//!
//! A [`Descriptor`] describes one field. Its [`FieldKind`] is a closed set of
//! tagged variants, one per field type; format-specific behaviour (case
//! selectors, while-array predicates, computed sizes) is injected as bound
//! closures stored beside the variant. Descriptors are shared through
//! [`DescRef`] and are never mutated in place: a Block that needs an override
//! takes a private copy via `Rc::make_mut`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::block::{Arena, AttrKey, BlockId};
use crate::errors::{Error, Result};
use crate::primitives::{Encoding, Endian};
use crate::source::ByteSource;
use crate::value::Value;

/// Shared handle to an immutable descriptor
pub type DescRef = Rc<Descriptor>;

/// Decides whether a while-array has another element
pub type Predicate = Rc<dyn Fn(&mut FieldContext<'_>) -> Result<bool>>;

/// Picks a switch case; `None` selects the default descriptor
pub type Selector = Rc<dyn Fn(&mut FieldContext<'_>) -> Result<Option<i64>>>;

/// Computes a size or offset from context
pub type SizeGetter = Rc<dyn Fn(&mut FieldContext<'_>) -> Result<usize>>;

/// Records a new size somewhere in the tree
pub type SizeSetter = Rc<dyn Fn(&mut SizeEdit<'_>, usize) -> Result<()>>;

/// Schema node describing one field
#[derive(Clone)]
pub struct Descriptor {
    /// Attribute name; empty for anonymous pads
    pub name: String,
    /// Field type and its parameters
    pub kind: FieldKind,
    /// Byte length (data) or element count (arrays)
    pub size: Option<SizeSpec>,
    /// Absolute location relative to the root offset; the running offset is
    /// not advanced past a pointed-to field
    pub pointer: Option<SizeSpec>,
    /// Alignment applied to the running offset before the field
    pub align: Option<usize>,
    /// Value used when default-constructing a scalar field
    pub default: Option<Value>,
    /// Trailing child read after a Block's body into its extra slot
    pub child: Option<DescRef>,
    /// Presentation metadata; never affects parsing
    pub meta: Meta,
}

/// Presentation and validation hints for editors
#[derive(Debug, Clone, PartialEq)]
pub struct Meta {
    /// Display name
    pub gui_name: Option<String>,
    /// Whether editors should show the field
    pub visible: bool,
    /// Whether editors should allow changing the field
    pub editable: bool,
    /// Smallest value an editor should accept
    pub min: Option<i64>,
    /// Largest value an editor should accept
    pub max: Option<i64>,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            gui_name: None,
            visible: true,
            editable: true,
            min: None,
            max: None,
        }
    }
}

/// Integer scalar parameters
#[derive(Debug, Clone)]
pub struct IntSpec {
    /// Width in bytes, 1 to 8
    pub width: usize,
    /// Two's complement when set
    pub signed: bool,
    /// Byte order; `None` takes the definition default
    pub endian: Option<Endian>,
    /// Optional enumerated-value table
    pub table: Option<Rc<EnumTable>>,
}

/// String parameters
#[derive(Debug, Clone, Copy)]
pub struct StrSpec {
    /// Character set
    pub encoding: Encoding,
    /// Text ends at the first NUL code unit
    pub terminated: bool,
    /// Replace undecodable input instead of failing
    pub lossy: bool,
}

/// Bit-field parameters, only valid inside a bit-struct
#[derive(Debug, Clone)]
pub struct BitSpec {
    /// Width in bits
    pub bits: u32,
    /// Two's complement when set
    pub signed: bool,
    /// Optional enumerated-value table
    pub table: Option<Rc<EnumTable>>,
}

/// Field types
#[derive(Clone)]
pub enum FieldKind {
    /// Integer of any byte width
    Int(IntSpec),
    /// IEEE float, 4 or 8 bytes wide
    Float {
        /// Width in bytes
        width: usize,
        /// Byte order; `None` takes the definition default
        endian: Option<Endian>,
    },
    /// Text whose length is fixed, size-driven, or NUL-terminated
    Str(StrSpec),
    /// Raw bytes whose length comes from the size spec
    Bytes,
    /// Skipped bytes, written back as zero
    Pad(usize),
    /// Zero-width placeholder
    Void,
    /// Named bit-fields packed into one integer, lowest bits first
    BitStruct {
        /// Width of the containing integer in bytes
        width: usize,
        /// Byte order of the containing integer; `None` takes the
        /// definition default
        endian: Option<Endian>,
        /// Bit-field members in declaration order
        fields: Rc<Fields>,
    },
    /// Integer bit-field
    Bits(BitSpec),
    /// Unused bits, written back as zero
    BitPad(u32),
    /// Fixed-size structure: every member must have a static size
    Struct(Rc<Fields>),
    /// Structure whose members may be variable-size
    Container(Rc<Fields>),
    /// Homogeneous array whose element count comes from the size spec
    Array(DescRef),
    /// Homogeneous array that grows until the predicate reports no more
    /// elements
    WhileArray {
        /// Element descriptor
        sub: DescRef,
        /// Evaluated before each element with the source positioned at
        /// the next unconsumed byte
        more: Predicate,
    },
    /// Variant chosen at parse time
    Switch {
        /// Returns the discriminant
        selector: Selector,
        /// Discriminant to descriptor
        cases: Rc<BTreeMap<i64, DescRef>>,
        /// Used when no case matches
        default: DescRef,
    },
}

impl FieldKind {
    /// Type name used in diagnostics and error frames
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Int(spec) if spec.table.is_some() => "Enum",
            FieldKind::Int(spec) if spec.signed => "SInt",
            FieldKind::Int(_) => "UInt",
            FieldKind::Float { .. } => "Float",
            FieldKind::Str(_) => "Str",
            FieldKind::Bytes => "Bytes",
            FieldKind::Pad(_) => "Pad",
            FieldKind::Void => "Void",
            FieldKind::BitStruct { .. } => "BitStruct",
            FieldKind::Bits(_) => "Bits",
            FieldKind::BitPad(_) => "BitPad",
            FieldKind::Struct(_) => "Struct",
            FieldKind::Container(_) => "Container",
            FieldKind::Array(_) => "Array",
            FieldKind::WhileArray { .. } => "WhileArray",
            FieldKind::Switch { .. } => "Switch",
        }
    }

    /// Whether this kind materializes a Block
    pub fn is_block(&self) -> bool {
        matches!(
            self,
            FieldKind::BitStruct { .. }
                | FieldKind::Struct(_)
                | FieldKind::Container(_)
                | FieldKind::Array(_)
                | FieldKind::WhileArray { .. }
        )
    }

    /// Whether this kind is array-shaped
    pub fn is_array(&self) -> bool {
        matches!(self, FieldKind::Array(_) | FieldKind::WhileArray { .. })
    }

    /// Whether this kind only lives inside a bit-struct
    pub fn is_bit_member(&self) -> bool {
        matches!(self, FieldKind::Bits(_) | FieldKind::BitPad(_))
    }

    /// Named members of struct-like kinds
    pub fn fields(&self) -> Option<&Rc<Fields>> {
        match self {
            FieldKind::Struct(fields)
            | FieldKind::Container(fields)
            | FieldKind::BitStruct { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// Element descriptor of array kinds
    pub fn sub(&self) -> Option<&DescRef> {
        match self {
            FieldKind::Array(sub) | FieldKind::WhileArray { sub, .. } => Some(sub),
            _ => None,
        }
    }

    /// Enumerated-value table of integer kinds
    pub fn table(&self) -> Option<&Rc<EnumTable>> {
        match self {
            FieldKind::Int(spec) => spec.table.as_ref(),
            FieldKind::Bits(spec) => spec.table.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Int(spec) => f.debug_tuple("Int").field(spec).finish(),
            FieldKind::Float { width, endian } => f
                .debug_struct("Float")
                .field("width", width)
                .field("endian", endian)
                .finish(),
            FieldKind::Str(spec) => f.debug_tuple("Str").field(spec).finish(),
            FieldKind::Bytes => f.write_str("Bytes"),
            FieldKind::Pad(n) => f.debug_tuple("Pad").field(n).finish(),
            FieldKind::Void => f.write_str("Void"),
            FieldKind::BitStruct { width, endian, fields } => f
                .debug_struct("BitStruct")
                .field("width", width)
                .field("endian", endian)
                .field("fields", fields)
                .finish(),
            FieldKind::Bits(spec) => f.debug_tuple("Bits").field(spec).finish(),
            FieldKind::BitPad(n) => f.debug_tuple("BitPad").field(n).finish(),
            FieldKind::Struct(fields) => f.debug_tuple("Struct").field(fields).finish(),
            FieldKind::Container(fields) => f.debug_tuple("Container").field(fields).finish(),
            FieldKind::Array(sub) => f.debug_tuple("Array").field(sub).finish(),
            FieldKind::WhileArray { sub, .. } => {
                f.debug_struct("WhileArray").field("sub", sub).finish_non_exhaustive()
            }
            FieldKind::Switch { cases, default, .. } => f
                .debug_struct("Switch")
                .field("cases", cases)
                .field("default", default)
                .finish_non_exhaustive(),
        }
    }
}

/// Ordered members of a struct-like descriptor with their name map
#[derive(Debug, Clone)]
pub struct Fields {
    members: Vec<DescRef>,
    names: NameMap,
}

impl Fields {
    /// Build the member list and its name map
    pub fn new(members: Vec<DescRef>) -> Self {
        let names = NameMap::new(members.iter().map(|m| m.name.as_str()));
        Self { members, names }
    }

    /// Members in declaration order
    pub fn members(&self) -> &[DescRef] {
        &self.members
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether there are no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member at `index`
    pub fn get(&self, index: usize) -> Option<&DescRef> {
        self.members.get(index)
    }

    /// Name map of the members
    pub fn names(&self) -> &NameMap {
        &self.names
    }

    pub(crate) fn members_mut(&mut self) -> &mut Vec<DescRef> {
        &mut self.members
    }
}

/// Bidirectional name/index map built once per descriptor
#[derive(Debug, Clone, Default)]
pub struct NameMap {
    by_name: HashMap<String, usize>,
    names: Vec<String>,
}

impl NameMap {
    /// Build from names in index order; empty names are left unmapped and
    /// the first occurrence of a duplicate wins
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let names: Vec<String> = names.into_iter().map(str::to_string).collect();
        let mut by_name = HashMap::new();
        for (i, name) in names.iter().enumerate() {
            if !name.is_empty() {
                by_name.entry(name.clone()).or_insert(i);
            }
        }
        Self { by_name, names }
    }

    /// Index of `name`
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Name at `index`
    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str).filter(|n| !n.is_empty())
    }
}

/// Enumerated values of an integer field
#[derive(Debug, Clone, Default)]
pub struct EnumTable {
    options: Vec<(String, i64)>,
    names: NameMap,
    by_value: HashMap<i64, usize>,
    /// Reject values that have no name when decoding
    pub strict: bool,
}

impl EnumTable {
    /// Build a table from `(name, value)` pairs
    pub fn new<S: Into<String>>(options: impl IntoIterator<Item = (S, i64)>) -> Self {
        let options: Vec<(String, i64)> =
            options.into_iter().map(|(n, v)| (n.into(), v)).collect();
        let names = NameMap::new(options.iter().map(|(n, _)| n.as_str()));
        let mut by_value = HashMap::new();
        for (i, (_, value)) in options.iter().enumerate() {
            by_value.entry(*value).or_insert(i);
        }
        Self {
            options,
            names,
            by_value,
            strict: false,
        }
    }

    /// Reject unnamed values on read
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Options in declaration order
    pub fn options(&self) -> &[(String, i64)] {
        &self.options
    }

    /// Value of the option called `name`
    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.names.index_of(name).map(|i| self.options[i].1)
    }

    /// Name of the option with `value`
    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.by_value.get(&value).map(|&i| self.options[i].0.as_str())
    }
}

/// Where a size (or pointer) comes from
#[derive(Clone)]
pub enum SizeSpec {
    /// Fixed by the descriptor
    Literal(usize),
    /// Stored in another field, located by a dotted path
    Path(String),
    /// Derived by callbacks
    Computed(SizeFn),
}

impl SizeSpec {
    /// Size derived by `get`; requests to change it are ignored
    pub fn computed(get: impl Fn(&mut FieldContext<'_>) -> Result<usize> + 'static) -> Self {
        SizeSpec::Computed(SizeFn {
            get: Rc::new(get),
            set: None,
        })
    }

    /// Size derived by `get` and recorded by `set`
    pub fn computed_with_setter(
        get: impl Fn(&mut FieldContext<'_>) -> Result<usize> + 'static,
        set: impl Fn(&mut SizeEdit<'_>, usize) -> Result<()> + 'static,
    ) -> Self {
        SizeSpec::Computed(SizeFn {
            get: Rc::new(get),
            set: Some(Rc::new(set)),
        })
    }
}

impl fmt::Debug for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeSpec::Literal(n) => f.debug_tuple("Literal").field(n).finish(),
            SizeSpec::Path(p) => f.debug_tuple("Path").field(p).finish(),
            SizeSpec::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl From<usize> for SizeSpec {
    fn from(n: usize) -> Self {
        SizeSpec::Literal(n)
    }
}

impl From<&str> for SizeSpec {
    fn from(path: &str) -> Self {
        SizeSpec::Path(path.to_string())
    }
}

impl From<String> for SizeSpec {
    fn from(path: String) -> Self {
        SizeSpec::Path(path)
    }
}

/// Getter and optional setter of a computed size
#[derive(Clone)]
pub struct SizeFn {
    /// Computes the current size
    pub get: SizeGetter,
    /// Records a new size; `None` silently ignores size changes
    pub set: Option<SizeSetter>,
}

/// What a callback sees while a field is being read, written or measured
pub struct FieldContext<'a> {
    /// The tree built so far
    pub arena: &'a Arena,
    /// Block the field belongs to; `None` for a root field
    pub parent: Option<BlockId>,
    /// Slot of the field in its parent; `None` for roots and trailing children
    pub index: Option<usize>,
    /// Absolute byte position of the field
    pub position: usize,
    pub(crate) source: Option<&'a mut dyn ByteSource>,
}

impl<'a> FieldContext<'a> {
    pub(crate) fn new(
        arena: &'a Arena,
        parent: Option<BlockId>,
        index: Option<usize>,
        position: usize,
        source: Option<&'a mut dyn ByteSource>,
    ) -> Self {
        Self {
            arena,
            parent,
            index,
            position,
            source,
        }
    }

    /// Whether bytes are being parsed, as opposed to defaults being built
    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Look at up to `n` unconsumed bytes at the field's position without
    /// consuming them. `Ok(None)` when no byte source is attached.
    pub fn peek(&mut self, n: usize) -> Result<Option<Vec<u8>>> {
        match self.source.as_deref_mut() {
            Some(source) => {
                source.seek(self.position)?;
                source.peek(n).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Attribute of the parent Block
    pub fn sibling(&self, key: impl Into<AttrKey<'a>>) -> Result<&'a Value> {
        let parent = self.parent.ok_or(Error::StaleHandle)?;
        self.arena.get(parent, key)
    }

    /// Value at a dotted path, resolved from the parent Block
    pub fn neighbor(&self, path: &str) -> Result<&'a Value> {
        let parent = self.parent.ok_or(Error::StaleHandle)?;
        self.arena.get_neighbor(parent, path)
    }
}

/// Mutable access handed to size setters
pub struct SizeEdit<'a> {
    /// The tree being edited
    pub arena: &'a mut Arena,
    /// Block holding the resized attribute
    pub parent: BlockId,
    /// Index of the resized attribute
    pub index: usize,
}

impl Descriptor {
    /// A descriptor with no size, pointer, default or metadata
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            size: None,
            pointer: None,
            align: None,
            default: None,
            child: None,
            meta: Meta::default(),
        }
    }

    /// Set the size specification
    pub fn with_size(mut self, size: impl Into<SizeSpec>) -> Self {
        self.size = Some(size.into());
        self
    }

    /// Set the pointer specification
    pub fn with_pointer(mut self, pointer: impl Into<SizeSpec>) -> Self {
        self.pointer = Some(pointer.into());
        self
    }

    /// Set the alignment
    pub fn with_align(mut self, align: usize) -> Self {
        self.align = Some(align);
        self
    }

    /// Set the default value
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Attach a trailing child
    pub fn with_child(mut self, child: impl Into<DescRef>) -> Self {
        self.child = Some(child.into());
        self
    }

    /// Set the display name
    pub fn with_gui_name(mut self, gui_name: impl Into<String>) -> Self {
        self.meta.gui_name = Some(gui_name.into());
        self
    }

    /// Set editor bounds
    pub fn with_bounds(mut self, min: i64, max: i64) -> Self {
        self.meta.min = Some(min);
        self.meta.max = Some(max);
        self
    }

    /// Replace undecodable text instead of failing; no effect on non-strings
    pub fn lossy(mut self) -> Self {
        if let FieldKind::Str(spec) = &mut self.kind {
            spec.lossy = true;
        }
        self
    }

    /// Hide from editors
    pub fn hidden(mut self) -> Self {
        self.meta.visible = false;
        self
    }

    /// Forbid editing
    pub fn read_only(mut self) -> Self {
        self.meta.editable = false;
        self
    }

    /// Frame label used when annotating errors
    pub(crate) fn frame(&self) -> String {
        let name = if self.name.is_empty() { "<unnamed>" } else { &self.name };
        format!("{}: {}", name, self.kind.type_name())
    }

    /// Declared descriptor of member `index`: struct members by position,
    /// array elements share the sub-struct
    pub fn member(&self, index: usize) -> Option<&DescRef> {
        match &self.kind {
            FieldKind::Array(sub) | FieldKind::WhileArray { sub, .. } => Some(sub),
            kind => kind.fields().and_then(|f| f.get(index)),
        }
    }

    /// Name map of the members, if the descriptor has named members
    pub fn names(&self) -> Option<&NameMap> {
        self.kind.fields().map(|f| f.names())
    }

    /// Static byte size, if the field's encoding never varies
    pub fn fixed_size(&self) -> Option<usize> {
        match &self.kind {
            FieldKind::Int(spec) => Some(spec.width),
            FieldKind::Float { width, .. } => Some(*width),
            FieldKind::Pad(n) => Some(*n),
            FieldKind::Void => Some(0),
            FieldKind::BitStruct { width, .. } => Some(*width),
            FieldKind::Str(_) | FieldKind::Bytes => match self.size {
                Some(SizeSpec::Literal(n)) => Some(n),
                _ => None,
            },
            FieldKind::Struct(fields) => {
                if self.child.is_some() {
                    return None;
                }
                let outer = self.align.unwrap_or(1);
                fields
                    .members()
                    .iter()
                    .filter(|m| m.pointer.is_none())
                    .try_fold(0usize, |acc, m| {
                        // a member aligned more strictly than the struct
                        // moves with the struct's position
                        let align = m.align.unwrap_or(1);
                        if align > outer {
                            return None;
                        }
                        m.fixed_size().map(|n| acc.div_ceil(align) * align + n)
                    })
            }
            _ => None,
        }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("pointer", &self.pointer)
            .field("align", &self.align)
            .field("default", &self.default)
            .field("child", &self.child)
            .finish()
    }
}

//! BMP image files
//!
//! The file header is followed by one of several DIB header revisions, told
//! apart by their leading size field. Pixel data is located through the
//! header's pixel pointer rather than by position.

use tagwalk::defs::*;
use tagwalk::{Descriptor, Endian, EnumTable, FieldContext, Result, SizeSpec, TagDef, Value};

/// Size of the fixed file header
pub const FILE_HEADER_SIZE: usize = 14;
/// Header size of the oldest DIB header revision
pub const CORE_HEADER_SIZE: u32 = 12;
/// Header size of the newest DIB header revision
pub const V5_HEADER_SIZE: u32 = 124;

fn fourcc(code: &[u8; 4]) -> i64 {
    u32::from_le_bytes(*code) as i64
}

fn twocc(code: &[u8; 2]) -> i64 {
    u16::from_le_bytes(*code) as i64
}

/// The BMP definition
pub fn bmp_def() -> Result<TagDef> {
    let root = container(
        "bmp_image",
        vec![
            file_header(),
            dib_header(),
            bytes("color_table", SizeSpec::computed(color_table_size)),
            bytes("unspecified_color_table", SizeSpec::computed(gap_size)),
            bytes("pixels", SizeSpec::computed(pixel_data_size)).with_pointer(".header.pixels_pointer"),
            void("eof").with_pointer(".header.filelength").hidden(),
        ],
    );
    Ok(TagDef::new("bmp", root)?.with_ext("bmp"))
}

fn file_header() -> Descriptor {
    let kinds = EnumTable::new([
        ("bitmap", twocc(b"BM")),
        ("bitmap_array", twocc(b"BA")),
        ("color_icon", twocc(b"CI")),
        ("color_pointer", twocc(b"CP")),
        ("icon", twocc(b"IC")),
        ("pointer", twocc(b"PT")),
    ]);
    structure(
        "header",
        vec![
            uenum("bmp_type", 2, Endian::Little, kinds).with_default(u16::from_le_bytes(*b"BM")),
            uint32("filelength", Endian::Little),
            uint32("reserved", Endian::Little),
            uint32("pixels_pointer", Endian::Little),
        ],
    )
}

fn header_size(default: u32) -> Descriptor {
    uint32("header_size", Endian::Little).with_default(default)
}

fn compression_method() -> Descriptor {
    let methods = EnumTable::new([
        ("rgb", 0),
        ("rle8", 1),
        ("rle4", 2),
        ("bitfields", 3),
        ("jpeg", 4),
        ("png", 5),
        ("alphabitfields", 6),
        ("cmyk", 11),
        ("cmykrle8", 12),
        ("cmykrle4", 13),
    ]);
    uenum("compression_method", 4, Endian::Little, methods)
}

/// Fields shared by every header from the info header on
fn info_fields(size: u32) -> Vec<Descriptor> {
    vec![
        header_size(size),
        sint32("image_width", Endian::Little),
        sint32("image_height", Endian::Little),
        uint16("color_planes", Endian::Little).with_default(1u16),
        uint16("bpp", Endian::Little),
        compression_method(),
        uint32("image_size", Endian::Little),
        sint32("h_res", Endian::Little),
        sint32("v_res", Endian::Little),
        uint32("palette_count", Endian::Little),
        uint32("palette_colors_used", Endian::Little),
    ]
}

fn bitmasks(channels: &[&str]) -> Descriptor {
    structure(
        "bitmasks",
        channels.iter().map(|c| uint32(c, Endian::Little)).collect(),
    )
}

fn color_space_fields() -> Vec<Descriptor> {
    let spaces = EnumTable::new([
        ("calibrated_rgb", 0),
        ("srgb", fourcc(b"sRGB")),
        ("windows", fourcc(b"Win ")),
        ("linked", fourcc(b"LINK")),
        ("embedded", fourcc(b"MBED")),
    ]);
    vec![
        uenum("color_space_type", 4, Endian::Little, spaces),
        structure(
            "endpoints",
            vec![
                bytes("cie_xyz_red", 12),
                bytes("cie_xyz_green", 12),
                bytes("cie_xyz_blue", 12),
            ],
        ),
        bytes("gamma_red", 4),
        bytes("gamma_green", 4),
        bytes("gamma_blue", 4),
    ]
}

fn core_header() -> Descriptor {
    structure(
        "bitmap_core_header",
        vec![
            header_size(CORE_HEADER_SIZE),
            uint16("image_width", Endian::Little),
            uint16("image_height", Endian::Little),
            uint16("color_planes", Endian::Little).with_default(1u16),
            uint16("bpp", Endian::Little),
        ],
    )
}

fn info_header() -> Descriptor {
    structure("bitmap_info_header", info_fields(40))
}

fn v2_header() -> Descriptor {
    let mut fields = info_fields(52);
    fields.push(bitmasks(&["r", "g", "b"]));
    structure("bitmap_v2_header", fields)
}

fn v3_header() -> Descriptor {
    let mut fields = info_fields(56);
    fields.push(bitmasks(&["r", "g", "b", "a"]));
    structure("bitmap_v3_header", fields)
}

fn v4_header() -> Descriptor {
    let mut fields = info_fields(108);
    fields.push(bitmasks(&["r", "g", "b", "a"]));
    fields.extend(color_space_fields());
    structure("bitmap_v4_header", fields)
}

fn v5_header() -> Descriptor {
    let intents = EnumTable::new([
        ("none", 0),
        ("business", 1),
        ("graphics", 2),
        ("images", 4),
        ("abs_colorimetric", 8),
    ]);
    let mut fields = info_fields(V5_HEADER_SIZE);
    fields.push(bitmasks(&["r", "g", "b", "a"]));
    fields.extend(color_space_fields());
    fields.push(uenum("intent", 4, Endian::Little, intents));
    fields.push(uint32("profile_data_pointer", Endian::Little));
    fields.push(uint32("profile_size", Endian::Little));
    fields.push(uint32("reserved", Endian::Little));
    structure("bitmap_v5_header", fields)
}

/// Header revision this engine has no layout for; kept as raw bytes
fn unknown_header() -> Descriptor {
    container(
        "unknown_dib_header",
        vec![
            header_size(0),
            bytes(
                "header_data",
                SizeSpec::computed(|ctx| {
                    let size = ctx.sibling("header_size")?.as_usize().unwrap_or(0);
                    Ok(size.saturating_sub(4))
                }),
            ),
        ],
    )
}

/// Picks the DIB header revision from its leading size field. A tag built
/// without input uses the newest revision.
fn select_dib_header(ctx: &mut FieldContext<'_>) -> Result<Option<i64>> {
    match ctx.peek(4)? {
        Some(head) if head.len() == 4 => Ok(Some(Endian::Little.read_uint(&head) as i64)),
        Some(_) => Ok(None),
        None => Ok(Some(V5_HEADER_SIZE as i64)),
    }
}

fn dib_header() -> Descriptor {
    switch(
        "dib_header",
        select_dib_header,
        vec![
            (CORE_HEADER_SIZE as i64, core_header()),
            (40, info_header()),
            (52, v2_header()),
            (56, v3_header()),
            (108, v4_header()),
            (V5_HEADER_SIZE as i64, v5_header()),
        ],
        unknown_header(),
    )
}

fn int_at(ctx: &FieldContext<'_>, path: &str) -> Option<usize> {
    ctx.neighbor(path).ok().and_then(Value::as_usize)
}

/// Byte length of the palette. Images of 16 bits per pixel and more carry
/// none; core headers use 3-byte entries, later revisions 4-byte entries.
pub fn color_table_size(ctx: &mut FieldContext<'_>) -> Result<usize> {
    let bpp = int_at(ctx, ".dib_header.bpp").unwrap_or(0);
    if bpp == 0 || bpp >= 16 {
        return Ok(0);
    }
    let entry = match int_at(ctx, ".dib_header.header_size") {
        Some(size) if size == CORE_HEADER_SIZE as usize => 3,
        _ => 4,
    };
    let entries = match int_at(ctx, ".dib_header.palette_count") {
        Some(count) if count > 0 => count,
        _ => 1 << bpp,
    };
    Ok(entries * entry)
}

/// Bytes between the palette and the pixel data
pub fn gap_size(ctx: &mut FieldContext<'_>) -> Result<usize> {
    let pixels = int_at(ctx, ".header.pixels_pointer").unwrap_or(0);
    let header = int_at(ctx, ".dib_header.header_size").unwrap_or(0);
    let palette = ctx
        .sibling("color_table")?
        .as_bytes()
        .map_or(0, <[u8]>::len);
    Ok(pixels.saturating_sub(FILE_HEADER_SIZE + header + palette))
}

/// Everything from the pixel pointer to the recorded end of the file; once
/// loaded, the pixels' own length
pub fn pixel_data_size(ctx: &mut FieldContext<'_>) -> Result<usize> {
    if !ctx.has_source() {
        if let Some(pixels) = ctx.sibling("pixels").ok().and_then(Value::as_bytes) {
            return Ok(pixels.len());
        }
    }
    let end = int_at(ctx, ".header.filelength").unwrap_or(0);
    let start = int_at(ctx, ".header.pixels_pointer").unwrap_or(0);
    Ok(end.saturating_sub(start))
}

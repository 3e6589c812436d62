//! GIF image files
//!
//! A GIF is a header, a logical screen descriptor with an optional global
//! color table, a run of data blocks and a `;` trailer. Data blocks are
//! either extensions (`!` followed by a label byte) or images (`,`). Variable
//! payloads are stored as chains of length-prefixed sub-blocks ending in a
//! zero-length block.

use tagwalk::defs::*;
use tagwalk::{
    Arena, BlockId, Descriptor, Encoding, Endian, EnumTable, Error, FieldContext, Result,
    SizeEdit, SizeSpec, TagDef, Value,
};

/// Introducer of an extension block
pub const EXTENSION: u8 = 0x21;
/// Introducer of an image block
pub const IMAGE: u8 = 0x2C;
/// Final byte of every GIF
pub const TRAILER: u8 = 0x3B;

/// Label of a plain text extension
pub const PLAINTEXT_LABEL: u8 = 0x01;
/// Label of a graphic control extension
pub const GFX_CONTROL_LABEL: u8 = 0xF9;
/// Label of a comment extension
pub const COMMENT_LABEL: u8 = 0xFE;
/// Label of an application extension
pub const APPLICATION_LABEL: u8 = 0xFF;

/// Largest payload a single sub-block can carry
pub const MAX_SUB_BLOCK: usize = 255;

/// The GIF definition
pub fn gif_def() -> Result<TagDef> {
    let root = container(
        "gif_image",
        vec![
            header(),
            logical_screen(),
            while_array("data_blocks", data_block(), until_byte(TRAILER)),
            uint8("trailer")
                .with_default(TRAILER)
                .with_bounds(TRAILER as i64, TRAILER as i64)
                .hidden()
                .read_only(),
        ],
    );
    Ok(TagDef::new("gif", root)?.with_ext("gif"))
}

fn header() -> Descriptor {
    structure(
        "gif_header",
        vec![
            str_sized("signature", Encoding::Ascii, 3).with_default("GIF"),
            str_sized("version", Encoding::Ascii, 3).with_default("89a"),
        ],
    )
}

fn logical_screen() -> Descriptor {
    container(
        "gif_logical_screen",
        vec![
            uint16("canvas_width", Endian::Little),
            uint16("canvas_height", Endian::Little),
            bit_struct(
                "flags",
                1,
                Endian::Little,
                vec![
                    bit_uint("color_table_size", 3),
                    bit("sort"),
                    bit_uint("color_resolution", 3),
                    bit("color_table"),
                ],
            ),
            uint8("bg_color_index"),
            uint8("aspect_ratio"),
            bytes("global_color_table", color_table()),
        ],
    )
}

fn color_table() -> SizeSpec {
    SizeSpec::computed_with_setter(color_table_size, set_color_table_size)
}

/// Byte length of a color table, derived from the `flags` bit-struct that
/// precedes it: `3 * 2^(color_table_size + 1)` when the table is present
pub fn color_table_size(ctx: &mut FieldContext<'_>) -> Result<usize> {
    let present = ctx.neighbor(".flags.color_table")?.as_u64().unwrap_or(0);
    if present == 0 {
        return Ok(0);
    }
    let exponent = ctx.neighbor(".flags.color_table_size")?.as_u64().unwrap_or(0);
    Ok(3 << (exponent + 1))
}

/// Record a color table length in the `flags` bit-struct. Only lengths of
/// 0 and `3 * 2^n` for `n` in 1..=8 can be expressed.
pub fn set_color_table_size(edit: &mut SizeEdit<'_>, size: usize) -> Result<()> {
    let parent = edit.parent;
    if size == 0 {
        return edit
            .arena
            .set_neighbor(parent, ".flags.color_table", Value::UInt(0));
    }
    let entries = size / 3;
    if size % 3 != 0 || !entries.is_power_of_two() || !(2..=256).contains(&entries) {
        return Err(Error::size_rejected(
            edit.arena.desc(parent)?.name.as_str(),
            "color_table",
            format!("{} bytes is not a valid color table length", size),
        ));
    }
    let exponent = entries.trailing_zeros() - 1;
    edit.arena
        .set_neighbor(parent, ".flags.color_table_size", Value::UInt(exponent as u64))?;
    edit.arena
        .set_neighbor(parent, ".flags.color_table", Value::UInt(1))
}

/// Chain of length-prefixed sub-blocks closed by a zero-length block
fn sub_blocks(name: &str) -> Descriptor {
    container(
        name,
        vec![
            while_array(
                "blocks",
                container("sub_block", vec![uint8("size"), bytes("data", ".size")]),
                until_byte(0),
            ),
            block_delimiter(),
        ],
    )
}

fn block_delimiter() -> Descriptor {
    uint8("block_delimiter").with_bounds(0, 0).hidden().read_only()
}

fn sentinel(default: u8) -> Descriptor {
    let table = EnumTable::new([("extension", EXTENSION as i64), ("image", IMAGE as i64)]);
    uenum("sentinel", 1, Endian::Little, table)
        .with_default(default)
        .read_only()
}

fn label(default: u8) -> Descriptor {
    let table = EnumTable::new([
        ("plaintext_extension", PLAINTEXT_LABEL as i64),
        ("gfx_control_extension", GFX_CONTROL_LABEL as i64),
        ("comment_extension", COMMENT_LABEL as i64),
        ("application_extension", APPLICATION_LABEL as i64),
    ]);
    uenum("label", 1, Endian::Little, table)
        .with_default(default)
        .read_only()
}

/// Switch key of a data block: the image introducer, or the extension
/// introducer combined with the label that follows it
pub fn data_block_key(introducer: u8, label: u8) -> i64 {
    match introducer {
        EXTENSION => ((EXTENSION as i64) << 8) | label as i64,
        other => other as i64,
    }
}

fn select_data_block(ctx: &mut FieldContext<'_>) -> Result<Option<i64>> {
    let Some(head) = ctx.peek(2)? else {
        return Ok(None);
    };
    Ok(match head.as_slice() {
        [IMAGE, ..] => Some(IMAGE as i64),
        [EXTENSION, label, ..] => Some(data_block_key(EXTENSION, *label)),
        _ => None,
    })
}

fn data_block() -> Descriptor {
    switch(
        "data_block",
        select_data_block,
        vec![
            (IMAGE as i64, image_block()),
            (data_block_key(EXTENSION, PLAINTEXT_LABEL), plaintext_extension()),
            (data_block_key(EXTENSION, GFX_CONTROL_LABEL), gfx_control_extension()),
            (data_block_key(EXTENSION, COMMENT_LABEL), comment_extension()),
            (data_block_key(EXTENSION, APPLICATION_LABEL), application_extension()),
        ],
        unknown_extension(),
    )
}

fn unknown_extension() -> Descriptor {
    container(
        "unknown_extension",
        vec![sentinel(EXTENSION), uint8("label"), sub_blocks("body")],
    )
}

fn plaintext_extension() -> Descriptor {
    container(
        "plaintext_extension",
        vec![
            sentinel(EXTENSION),
            label(PLAINTEXT_LABEL),
            uint8("byte_size").with_default(12u8).read_only(),
            uint16("text_grid_left", Endian::Little),
            uint16("text_grid_top", Endian::Little),
            uint16("text_grid_width", Endian::Little),
            uint16("text_grid_height", Endian::Little),
            uint8("char_cell_width"),
            uint8("char_cell_height"),
            uint8("fg_color_index"),
            uint8("bg_color_index"),
            sub_blocks("text"),
        ],
    )
}

fn gfx_control_extension() -> Descriptor {
    container(
        "gfx_control_extension",
        vec![
            sentinel(EXTENSION),
            label(GFX_CONTROL_LABEL),
            uint8("byte_size").with_default(4u8).read_only(),
            bit_struct(
                "flags",
                1,
                Endian::Little,
                vec![
                    bit("transparent"),
                    bit("user_input"),
                    bit_uint("disposal_method", 3),
                    bit_pad(3),
                ],
            ),
            uint16("delay_time", Endian::Little),
            uint8("transparent_color_index"),
            block_delimiter(),
        ],
    )
}

fn comment_extension() -> Descriptor {
    container(
        "comment_extension",
        vec![sentinel(EXTENSION), label(COMMENT_LABEL), sub_blocks("comment")],
    )
}

fn application_extension() -> Descriptor {
    container(
        "application_extension",
        vec![
            sentinel(EXTENSION),
            label(APPLICATION_LABEL),
            uint8("byte_size").with_default(11u8).read_only(),
            str_sized("application_id", Encoding::Ascii, ".byte_size"),
            sub_blocks("application_data"),
        ],
    )
}

fn image_block() -> Descriptor {
    container(
        "image_block",
        vec![
            sentinel(IMAGE),
            uint16("left", Endian::Little),
            uint16("top", Endian::Little),
            uint16("width", Endian::Little),
            uint16("height", Endian::Little),
            bit_struct(
                "flags",
                1,
                Endian::Little,
                vec![
                    bit_uint("color_table_size", 3),
                    bit_pad(2),
                    bit("sort"),
                    bit("interlace"),
                    bit("color_table"),
                ],
            ),
            bytes("local_color_table", color_table()),
            uint8("lzw_min_code_size").with_default(2u8),
            sub_blocks("image_data"),
        ],
    )
}

/// Concatenate the payload of a sub-block chain
pub fn sub_block_data(arena: &Arena, chain: BlockId) -> Result<Vec<u8>> {
    let blocks = arena.get_block(chain, "blocks")?;
    let mut data = Vec::new();
    for value in arena.block(blocks)?.attrs() {
        if let Some(id) = value.as_block() {
            if let Some(bytes) = arena.get(id, "data")?.as_bytes() {
                data.extend_from_slice(bytes);
            }
        }
    }
    Ok(data)
}

/// Replace the payload of a sub-block chain, splitting `data` into blocks
/// of at most [`MAX_SUB_BLOCK`] bytes
pub fn set_sub_block_data(arena: &mut Arena, chain: BlockId, data: &[u8]) -> Result<()> {
    let blocks = arena.get_block(chain, "blocks")?;
    while arena.len(blocks)? > 0 {
        if let (Value::Block(old), _) = arena.pop(blocks, None)? {
            arena.discard(old)?;
        }
    }
    for chunk in data.chunks(MAX_SUB_BLOCK) {
        let index = arena.append(blocks, None)?;
        let block = arena.get_block(blocks, index)?;
        arena.set(block, "data", Value::from(chunk))?;
        arena.set_size(block, Some("data".into()), None)?;
    }
    Ok(())
}

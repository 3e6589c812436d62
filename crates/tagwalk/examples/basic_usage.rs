//! Basic usage example for tagwalk

use tagwalk::prelude::*;

fn record_def() -> Result<TagDef> {
    TagDef::new(
        "record",
        container(
            "record",
            vec![
                str_sized("magic", Encoding::Ascii, 4),
                bit_struct(
                    "flags",
                    1,
                    Endian::Little,
                    vec![bit_uint("version", 4), bit("compressed"), bit_pad(3)],
                ),
                uint8("title_len"),
                str_sized("title", Encoding::Utf8, ".title_len"),
                uint16("count", Endian::Little),
                array("samples", ".count", sint("sample", 2, Endian::Little)),
                while_array("notes", cstr("note", Encoding::Ascii), until_byte(0xFF)),
                uint8("end").with_default(0xFFu8),
            ],
        ),
    )
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    println!("tagwalk Basic Usage Example");
    println!("===========================");

    let mut data = Vec::new();
    data.extend_from_slice(b"RECD");
    data.push(0x12);
    data.push(5);
    data.extend_from_slice(b"hello");
    data.extend_from_slice(&[3, 0]);
    data.extend_from_slice(&[0x0A, 0x00, 0xF6, 0xFF, 0x64, 0x00]);
    data.extend_from_slice(b"first\0second\0");
    data.push(0xFF);

    // Parse the bytes with the descriptor tree
    let tag = Tag::parse(record_def()?, &data)?;
    let arena = tag.arena();
    let root = tag.root();

    println!("Parsed {} bytes into {} blocks", data.len(), arena.live());
    println!("   magic:   {:?}", arena.get(root, "magic")?.as_str());
    println!("   version: {:?}", arena.get_neighbor(root, "flags.version")?.as_u64());
    println!("   title:   {:?}", arena.get(root, "title")?.as_str());

    // Arrays are Blocks whose attributes are the elements
    let samples = arena.get_block(root, "samples")?;
    let values: Vec<i64> = arena
        .block(samples)?
        .attrs()
        .iter()
        .filter_map(Value::as_i64)
        .collect();
    println!("   samples: {:?}", values);

    let notes = arena.get_block(root, "notes")?;
    println!("   notes:   {} (terminated by 0xFF)", arena.len(notes)?);

    // Serializing an unmodified tag reproduces the input
    let bytes = tag.serialize()?;
    assert_eq!(bytes, data);
    println!("Round trip: {} bytes, identical", bytes.len());

    // A default-constructed tag has every field at its default
    let blank = Tag::new(record_def()?)?;
    println!("Default tag encodes to {:?}", blank.serialize()?);

    Ok(())
}

//! Editing a parsed tag and keeping its size fields consistent

use tagwalk::prelude::*;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let def = TagDef::new(
        "palette",
        container(
            "palette",
            vec![
                uint8("name_len"),
                str_sized("name", Encoding::Utf8, ".name_len"),
                uint16("count", Endian::Big),
                array(
                    "colors",
                    ".count",
                    structure("color", vec![uint8("r"), uint8("g"), uint8("b")]),
                ),
            ],
        ),
    )?;

    let mut tag = Tag::parse(def, &[3, b'r', b'e', b'd', 0, 1, 0xFF, 0, 0])?;
    let root = tag.root();
    println!("Before: {:?}", tag.serialize()?);

    let arena = tag.arena_mut();

    // Longer name: write the new length into the sibling it is sized by
    arena.set(root, "name", Value::from("crimson"))?;
    arena.set_size(root, Some("name".into()), None)?;

    // Two more colors, one default and one filled in
    let colors = arena.get_block(root, "colors")?;
    arena.append(colors, None)?;
    let index = arena.append(colors, None)?;
    let color = arena.get_block(colors, index)?;
    arena.set(color, "g", Value::UInt(0x80))?;
    arena.set_size(colors, None, None)?;

    println!("count is now {:?}", arena.get(root, "count")?.as_u64());
    println!("After:  {:?}", tag.serialize()?);

    // Fixed-size fields reject growth
    let fixed = TagDef::new("fixed", container("fixed", vec![bytes("blob", 4)]))?;
    let mut fixed = Tag::new(fixed)?;
    let root = fixed.root();
    match fixed.arena_mut().set_size(root, Some("blob".into()), Some(8)) {
        Err(Error::SizeEditRejected { message, .. }) => println!("Rejected: {}", message),
        other => println!("Unexpected: {:?}", other),
    }

    Ok(())
}

//! Integration tests for tagwalk

use std::rc::Rc;

use tagwalk::prelude::*;
use tagwalk::NoPeek;

fn chunk() -> Descriptor {
    switch(
        "chunk",
        peek_byte(1, 0),
        vec![
            (
                1,
                container(
                    "text",
                    vec![uint8("kind"), uint8("len"), str_sized("body", Encoding::Ascii, ".len")],
                ),
            ),
            (2, structure("pair", vec![uint8("kind"), uint16("value", Endian::Big)])),
        ],
        container("unknown", vec![uint8("kind")]),
    )
}

fn file_def() -> TagDef {
    TagDef::new(
        "file",
        container(
            "file",
            vec![
                str_sized("magic", Encoding::Ascii, 4),
                bit_struct(
                    "flags",
                    1,
                    Endian::Little,
                    vec![bit_uint("version", 4), bit("compressed"), bit_pad(3)],
                ),
                uint8("name_len"),
                str_sized("name", Encoding::Utf8, ".name_len"),
                uint16("count", Endian::Little),
                array(
                    "points",
                    ".count",
                    structure("point", vec![sint("x", 2, Endian::Little), sint("y", 2, Endian::Little)]),
                ),
                while_array("chunks", chunk(), until_byte(0x3B)),
                uint8("trailer").with_default(0x3Bu8),
            ],
        ),
    )
    .unwrap()
}

fn file_bytes() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"TAGW");
    data.push(0x13);
    data.extend_from_slice(&[2, b'o', b'k']);
    data.extend_from_slice(&[2, 0]);
    data.extend_from_slice(&[1, 0, 0xFF, 0xFF]);
    data.extend_from_slice(&[0, 1, 2, 0]);
    data.extend_from_slice(&[1, 3, b'a', b'b', b'c']);
    data.extend_from_slice(&[2, 0x12, 0x34]);
    data.push(9);
    data.push(0x3B);
    data
}

#[test]
fn test_roundtrip_reproduces_bytes() {
    let data = file_bytes();
    let tag = Tag::parse(file_def(), &data).unwrap();
    assert_eq!(tag.serialize().unwrap(), data);
    assert_eq!(tag.binsize().unwrap(), data.len());
}

#[test]
fn test_parsed_values() {
    let tag = Tag::parse(file_def(), &file_bytes()).unwrap();
    let arena = tag.arena();
    let root = tag.root();

    assert_eq!(arena.get(root, "magic").unwrap(), &Value::Str("TAGW".into()));
    assert_eq!(arena.get(root, "name").unwrap(), &Value::Str("ok".into()));
    assert_eq!(arena.get_neighbor(root, "flags.version").unwrap(), &Value::UInt(3));
    assert_eq!(arena.get_neighbor(root, "flags.compressed").unwrap(), &Value::UInt(1));
    assert_eq!(arena.get_neighbor(root, "points.0.y").unwrap(), &Value::SInt(-1));
    assert_eq!(arena.get_neighbor(root, "points.1.x").unwrap(), &Value::SInt(256));
    assert_eq!(arena.get(root, "trailer").unwrap(), &Value::UInt(0x3B));
}

#[test]
fn test_while_array_stops_at_terminator() {
    let tag = Tag::parse(file_def(), &file_bytes()).unwrap();
    let arena = tag.arena();
    let chunks = arena.get_block(tag.root(), "chunks").unwrap();
    assert_eq!(arena.len(chunks).unwrap(), 3);
    assert!(arena.block(chunks).unwrap().is_while());
}

#[test]
fn test_switch_selects_case_and_default() {
    let tag = Tag::parse(file_def(), &file_bytes()).unwrap();
    let arena = tag.arena();
    let chunks = arena.get_block(tag.root(), "chunks").unwrap();

    let names: Vec<&str> = arena
        .block(chunks)
        .unwrap()
        .attrs()
        .iter()
        .map(|v| arena.block(v.as_block().unwrap()).unwrap().name())
        .collect();
    assert_eq!(names, vec!["text", "pair", "unknown"]);

    let text = arena.get_block(chunks, 0usize).unwrap();
    assert_eq!(arena.get(text, "body").unwrap(), &Value::Str("abc".into()));
    let pair = arena.get_block(chunks, 1usize).unwrap();
    assert_eq!(arena.get(pair, "value").unwrap(), &Value::UInt(0x1234));
    let unknown = arena.get_block(chunks, 2usize).unwrap();
    assert_eq!(arena.get(unknown, "kind").unwrap(), &Value::UInt(9));
}

#[test]
fn test_size_path_updates_only_the_referenced_field() {
    let mut tag = Tag::parse(file_def(), &file_bytes()).unwrap();
    let root = tag.root();
    let before = tag.serialize().unwrap();

    let arena = tag.arena_mut();
    arena.set(root, "name", Value::Str("longer".into())).unwrap();
    arena.set_size(root, Some("name".into()), None).unwrap();

    assert_eq!(arena.get(root, "name_len").unwrap(), &Value::UInt(6));
    assert_eq!(arena.get(root, "count").unwrap(), &Value::UInt(2));

    let after = tag.serialize().unwrap();
    assert_eq!(after.len(), before.len() + 4);
    assert_eq!(&after[..5], &before[..5]);
    assert_eq!(after[5], 6);
    assert_eq!(&after[6..12], b"longer");
    assert_eq!(&after[12..], &before[8..]);
}

#[test]
fn test_count_follows_array_mutation() {
    let mut tag = Tag::parse(file_def(), &file_bytes()).unwrap();
    let root = tag.root();
    let arena = tag.arena_mut();
    let points = arena.get_block(root, "points").unwrap();
    arena.pop(points, None).unwrap();
    arena.set_size(points, None, None).unwrap();
    assert_eq!(arena.get(root, "count").unwrap(), &Value::UInt(1));

    let reparsed = Tag::parse(file_def(), &tag.serialize().unwrap()).unwrap();
    let points = reparsed.arena().get_block(reparsed.root(), "points").unwrap();
    assert_eq!(reparsed.arena().len(points).unwrap(), 1);
}

#[test]
fn test_while_block_ignores_size_edits() {
    let mut tag = Tag::parse(file_def(), &file_bytes()).unwrap();
    let root = tag.root();
    let arena = tag.arena_mut();
    let chunks = arena.get_block(root, "chunks").unwrap();
    arena.set_size(chunks, None, Some(10)).unwrap();
    arena.set_size(root, Some("chunks".into()), Some(10)).unwrap();
    assert_eq!(arena.len(chunks).unwrap(), 3);
}

#[test]
fn test_literal_size_grow_rejected_shrink_ignored() {
    let mut tag = Tag::parse(file_def(), &file_bytes()).unwrap();
    let root = tag.root();
    let arena = tag.arena_mut();

    let err = arena.set_size(root, Some("magic".into()), Some(5)).unwrap_err();
    assert!(matches!(err, Error::SizeEditRejected { ref attr, .. } if attr == "magic"));

    arena.set_size(root, Some("magic".into()), Some(2)).unwrap();
    assert!(matches!(arena.member_desc(root, 0).unwrap().size, Some(SizeSpec::Literal(4))));
    assert_eq!(tag.serialize().unwrap(), file_bytes());
}

#[test]
fn test_failed_append_rolls_back() {
    let refusing = container(
        "entry",
        vec![bytes(
            "data",
            SizeSpec::computed(|_| Err(Error::Encode("size unavailable".to_string()))),
        )],
    );
    let list = Rc::new(container(
        "list",
        vec![uint8("n"), array("entries", ".n", refusing)],
    ));

    let mut arena = Arena::new();
    let root = arena.create(list).unwrap();
    let entries = arena.get_block(root, "entries").unwrap();
    let live = arena.live();

    let err = arena.append(entries, None).unwrap_err();
    assert!(matches!(err.root(), Error::Encode(_)));
    assert_eq!(arena.len(entries).unwrap(), 0);
    assert_eq!(arena.live(), live);

    let err = arena.extend(entries, Value::UInt(3)).unwrap_err();
    assert!(matches!(err.root(), Error::Encode(_)));
    assert_eq!(arena.len(entries).unwrap(), 0);
    assert_eq!(arena.live(), live);
}

#[test]
fn test_failed_insert_leaves_contents_unchanged() {
    let mut tag = Tag::parse(file_def(), &file_bytes()).unwrap();
    let root = tag.root();
    let arena = tag.arena_mut();
    let points = arena.get_block(root, "points").unwrap();
    let before: Vec<Value> = arena.block(points).unwrap().attrs().to_vec();

    let err = arena.insert(points, 1, Some(Value::UInt(4))).unwrap_err();
    assert!(matches!(err, Error::Shape(_)));
    assert_eq!(arena.block(points).unwrap().attrs(), &before[..]);

    assert!(arena.insert(points, 9, None).is_err());
    assert_eq!(arena.block(points).unwrap().attrs(), &before[..]);
}

#[test]
fn test_bit_struct_nibbles() {
    let def = TagDef::new(
        "byte",
        container(
            "byte",
            vec![bit_struct("nibbles", 1, Endian::Little, vec![bit_uint("low", 4), bit_uint("high", 4)])],
        ),
    )
    .unwrap();
    let tag = Tag::parse(def, &[0xA5]).unwrap();
    let arena = tag.arena();
    assert_eq!(arena.get_neighbor(tag.root(), "nibbles.low").unwrap(), &Value::UInt(0x5));
    assert_eq!(arena.get_neighbor(tag.root(), "nibbles.high").unwrap(), &Value::UInt(0xA));
    assert_eq!(tag.serialize().unwrap(), vec![0xA5]);
}

#[test]
fn test_zero_count_array_consumes_nothing() {
    let def = TagDef::new(
        "list",
        container(
            "list",
            vec![
                uint8("n"),
                array("items", ".n", uint32("item", Endian::Little)),
                uint8("after"),
            ],
        ),
    )
    .unwrap();
    let tag = Tag::parse(def, &[0, 0x42]).unwrap();
    let items = tag.arena().get_block(tag.root(), "items").unwrap();
    assert_eq!(tag.arena().len(items).unwrap(), 0);
    assert_eq!(tag.arena().get(tag.root(), "after").unwrap(), &Value::UInt(0x42));
    assert_eq!(tag.binsize().unwrap(), 2);
}

#[test]
fn test_sentinel_first_parses_zero_elements() {
    let def = TagDef::new(
        "stream",
        container(
            "stream",
            vec![
                while_array("blocks", uint8("b"), until_byte(0x3B)),
                uint8("trailer"),
            ],
        ),
    )
    .unwrap();
    let tag = Tag::parse(def, &[0x3B]).unwrap();
    let blocks = tag.arena().get_block(tag.root(), "blocks").unwrap();
    assert_eq!(tag.arena().len(blocks).unwrap(), 0);
    assert_eq!(tag.binsize().unwrap(), 1);
    assert_eq!(tag.serialize().unwrap(), vec![0x3B]);
}

#[test]
fn test_source_without_peek_is_capability_error() {
    let data = file_bytes();
    let mut source = NoPeek(SliceSource::new(&data));
    let err = Tag::parse_with(file_def(), &mut source, &ReadOptions::default()).unwrap_err();
    assert!(matches!(err.root(), Error::Capability("peek")));
    assert_eq!(err.frames(), vec!["file: Container", "chunks: WhileArray"]);
}

#[test]
fn test_default_tag_is_schema_conformant() {
    let tag = Tag::new(file_def()).unwrap();
    let bytes = tag.serialize().unwrap();
    assert_eq!(bytes, vec![0, 0, 0, 0, 0, 0, 0, 0, 0x3B]);

    let reparsed = Tag::parse(file_def(), &bytes).unwrap();
    assert_eq!(reparsed.serialize().unwrap(), bytes);
}

#[test]
fn test_append_default_switch_element() {
    let mut tag = Tag::parse(file_def(), &file_bytes()).unwrap();
    let root = tag.root();
    let arena = tag.arena_mut();
    let chunks = arena.get_block(root, "chunks").unwrap();
    let index = arena.append(chunks, None).unwrap();
    let added = arena.get_block(chunks, index).unwrap();
    assert_eq!(arena.block(added).unwrap().name(), "unknown");
    arena.set(added, "kind", Value::UInt(7)).unwrap();

    let bytes = tag.serialize().unwrap();
    assert_eq!(&bytes[bytes.len() - 3..], &[9, 7, 0x3B]);
}

#[test]
fn test_truncated_input_names_the_field() {
    let data = file_bytes();
    let err = Tag::parse(file_def(), &data[..10]).unwrap_err();
    assert!(matches!(err.root(), Error::OutOfBounds { .. }));
    assert_eq!(err.frames()[..2], ["file: Container", "points: Array"]);
}

fn one_or_other() -> Descriptor {
    switch(
        "body",
        peek_byte(1, 0),
        vec![(1, container("one", vec![uint8("kind")]))],
        container("other", vec![uint8("kind")]),
    )
}

#[test]
fn test_aligned_switch_roundtrip() {
    let def = TagDef::new(
        "t",
        container("t", vec![uint8("a"), one_or_other().with_align(4)]),
    )
    .unwrap();
    let data = [7, 0, 0, 0, 1];
    let tag = Tag::parse(def, &data).unwrap();
    let body = tag.arena().get_block(tag.root(), "body").unwrap();
    assert_eq!(tag.arena().block(body).unwrap().name(), "one");
    assert_eq!(tag.serialize().unwrap(), data);
    assert_eq!(tag.binsize().unwrap(), 5);
}

#[test]
fn test_pointed_switch_roundtrip() {
    let def = TagDef::new(
        "t",
        container(
            "t",
            vec![uint8("at"), one_or_other().with_pointer(".at"), uint8("next")],
        ),
    )
    .unwrap();
    let data = [3, 0x55, 0, 1];
    let tag = Tag::parse(def, &data).unwrap();
    assert_eq!(tag.arena().get(tag.root(), "next").unwrap(), &Value::UInt(0x55));
    let body = tag.arena().get_block(tag.root(), "body").unwrap();
    assert_eq!(tag.arena().block(body).unwrap().name(), "one");
    assert_eq!(tag.serialize().unwrap(), data);
}

#[test]
fn test_create_rejects_invalid_descriptor() {
    let mut arena = Arena::new();
    let wide = container("c", vec![uint("wide", 9, Endian::Little)]);
    assert!(matches!(arena.create(wide), Err(Error::Schema { .. })));

    let half = container(
        "c",
        vec![Descriptor::new("half", tagwalk::FieldKind::Float { width: 2, endian: None })],
    );
    assert!(matches!(arena.create(half), Err(Error::Schema { .. })));
    assert_eq!(arena.live(), 0);
}

fn pointed_pair_def() -> TagDef {
    TagDef::new(
        "pair",
        container(
            "pair",
            vec![
                uint8("a_at"),
                uint8("a_len"),
                uint8("b_at"),
                uint8("b_len"),
                bytes("a", ".a_len").with_pointer(".a_at"),
                bytes("b", ".b_len").with_pointer(".b_at"),
            ],
        ),
    )
    .unwrap()
}

#[test]
fn test_growing_pointed_data_moves_later_pointers() {
    let data = [4, 2, 6, 1, 0xA1, 0xA2, 0xB1];
    let mut tag = Tag::parse(pointed_pair_def(), &data).unwrap();
    assert_eq!(tag.serialize().unwrap(), data);

    let root = tag.root();
    let arena = tag.arena_mut();
    arena.set(root, "a", Value::Bytes(vec![1, 2, 3])).unwrap();
    arena.set_size(root, Some("a".into()), None).unwrap();

    // b still points into the grown data
    assert_eq!(tag.serialize().unwrap(), vec![4, 3, 6, 1, 1, 2, 0xB1]);

    let bytes = tag
        .serialize_with(&WriteOptions::default().calc_pointers(true))
        .unwrap();
    assert_eq!(bytes, vec![4, 3, 7, 1, 1, 2, 3, 0xB1]);
    assert_eq!(tag.arena().get(root, "b_at").unwrap(), &Value::UInt(7));

    let reparsed = Tag::parse(pointed_pair_def(), &bytes).unwrap();
    assert_eq!(reparsed.arena().get(reparsed.root(), "a").unwrap(), &Value::from(vec![1u8, 2, 3]));
    assert_eq!(reparsed.arena().get(reparsed.root(), "b").unwrap(), &Value::from(vec![0xB1u8]));
}

#[test]
fn test_pointers_follow_declaration_order() {
    let data = [6, 1, 4, 2, 0xB1, 0xB2, 0xA1];
    let mut tag = Tag::parse(pointed_pair_def(), &data).unwrap();
    let root = tag.root();
    tag.arena_mut().set_pointers(root).unwrap();
    assert_eq!(tag.arena().get(root, "a_at").unwrap(), &Value::UInt(4));
    assert_eq!(tag.arena().get(root, "b_at").unwrap(), &Value::UInt(5));
    assert_eq!(tag.serialize().unwrap(), vec![4, 1, 5, 2, 0xA1, 0xB1, 0xB2]);
}

#[test]
fn test_definition_endian_fills_unset_fields() {
    let words = || container("words", vec![uint16("a", None), uint32("b", Endian::Little)]);
    let data = [0x12, 0x34, 1, 0, 0, 0];

    let big = TagDef::new("words", words()).unwrap().with_endian(Endian::Big);
    assert_eq!(big.endian(), Endian::Big);
    let tag = Tag::parse(big, &data).unwrap();
    assert_eq!(tag.arena().get(tag.root(), "a").unwrap(), &Value::UInt(0x1234));
    assert_eq!(tag.arena().get(tag.root(), "b").unwrap(), &Value::UInt(1));
    assert_eq!(tag.serialize().unwrap(), data);

    let tag = Tag::parse(TagDef::new("words", words()).unwrap(), &data).unwrap();
    assert_eq!(tag.arena().get(tag.root(), "a").unwrap(), &Value::UInt(0x3412));
}

#[test]
fn test_auto_alignment() {
    let def = TagDef::new(
        "rec",
        container(
            "rec",
            vec![
                uint8("tag"),
                structure("pair", vec![uint8("a"), uint16("b", Endian::Little)]),
                uint32("value", Endian::Little),
            ],
        ),
    )
    .unwrap()
    .with_align_mode(AlignMode::Auto);
    assert_eq!(def.align_mode(), AlignMode::Auto);
    let def = Rc::new(def);

    let blank = Tag::new(def.clone()).unwrap();
    assert_eq!(blank.binsize().unwrap(), 12);

    let data = [1, 0, 2, 0, 0x34, 0x12, 0, 0, 5, 0, 0, 0];
    let tag = Tag::parse(def, &data).unwrap();
    let pair = tag.arena().get_block(tag.root(), "pair").unwrap();
    assert_eq!(tag.arena().get(pair, "b").unwrap(), &Value::UInt(0x1234));
    assert_eq!(tag.arena().get(tag.root(), "value").unwrap(), &Value::UInt(5));
    assert_eq!(tag.serialize().unwrap(), data);
}

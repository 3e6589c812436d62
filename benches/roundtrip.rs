//! Benchmark tagwalk parse and serialize performance

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tagwalk::prelude::*;

fn record_def() -> TagDef {
    TagDef::new(
        "records",
        container(
            "records",
            vec![
                uint32("count", Endian::Little),
                array(
                    "entries",
                    ".count",
                    container(
                        "entry",
                        vec![
                            uint16("id", Endian::Little),
                            bit_struct(
                                "flags",
                                1,
                                Endian::Little,
                                vec![bit_uint("kind", 3), bit("active"), bit_pad(4)],
                            ),
                            uint8("name_len"),
                            str_sized("name", Encoding::Ascii, ".name_len"),
                            float32("weight", Endian::Little),
                        ],
                    ),
                ),
                while_array("tail", uint8("byte"), until_byte(0)),
                uint8("end"),
            ],
        ),
    )
    .unwrap()
}

fn record_bytes(count: u32) -> Vec<u8> {
    let mut data = count.to_le_bytes().to_vec();
    for i in 0..count {
        let name = format!("entry-{}", i);
        data.extend_from_slice(&(i as u16).to_le_bytes());
        data.push(((i % 8) as u8) | 0x08);
        data.push(name.len() as u8);
        data.extend_from_slice(name.as_bytes());
        data.extend_from_slice(&(i as f32 * 0.5).to_le_bytes());
    }
    data.extend(std::iter::repeat(0x7F).take(64));
    data.push(0);
    data
}

fn bench_parse(c: &mut Criterion) {
    let data = record_bytes(1000);

    c.bench_function("parse_1000_entries", |b| {
        b.iter(|| {
            let tag = Tag::parse(record_def(), black_box(&data)).unwrap();
            black_box(tag.root());
        });
    });
}

fn bench_serialize(c: &mut Criterion) {
    let tag = Tag::parse(record_def(), &record_bytes(1000)).unwrap();

    c.bench_function("serialize_1000_entries", |b| {
        b.iter(|| {
            let bytes = tag.serialize().unwrap();
            black_box(bytes);
        });
    });
}

fn bench_default_construct(c: &mut Criterion) {
    c.bench_function("default_construct", |b| {
        b.iter(|| {
            let tag = Tag::new(record_def()).unwrap();
            black_box(tag.binsize().unwrap());
        });
    });
}

fn bench_append_and_resize(c: &mut Criterion) {
    c.bench_function("append_100_and_resize", |b| {
        b.iter(|| {
            let mut tag = Tag::parse(record_def(), &record_bytes(0)).unwrap();
            let root = tag.root();
            let arena = tag.arena_mut();
            let entries = arena.get_block(root, "entries").unwrap();
            for _ in 0..100 {
                arena.append(entries, None).unwrap();
            }
            arena.set_size(entries, None, None).unwrap();
            black_box(tag.serialize().unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_parse,
    bench_serialize,
    bench_default_construct,
    bench_append_and_resize
);
criterion_main!(benches);

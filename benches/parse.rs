use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::io::Cursor;

#[path = "../tests/fixtures/mod.rs"]
mod fixtures;

use fixtures::FileSpec;
use tagkit::Mp4File;

fn tagged_file() -> Vec<u8> {
    fixtures::build(&FileSpec {
        ilst_entries: Some(vec![
            fixtures::text_entry(b"\xa9nam", "Danse Macabre, Op.40"),
            fixtures::text_entry(b"\xa9ART", "Saint-Sa\u{eb}ns"),
            fixtures::genre_entry(32),
            fixtures::position_entry(b"trkn", 10, 12),
            fixtures::jpeg_cover_entry(32 * 1024),
        ]),
        udta_padding: 4096,
        chunks: (0..64)
            .map(|index| fixtures::chunk_data(index as u8, 4096))
            .collect(),
        ..FileSpec::default()
    })
}

fn bench_parse(c: &mut Criterion) {
    let bytes = tagged_file();

    c.bench_function("parse_tagged_file", |b| {
        b.iter(|| {
            let file = Mp4File::read_from(Cursor::new(black_box(bytes.clone()))).unwrap();
            black_box(file.tracks().len())
        })
    });

    c.bench_function("parse_untagged_file", |b| {
        let bytes = fixtures::build(&FileSpec::default());
        b.iter(|| {
            let file = Mp4File::read_from(Cursor::new(black_box(bytes.clone()))).unwrap();
            black_box(file.tracks().len())
        })
    });
}

criterion_group!(benches, bench_parse);
criterion_main!(benches);

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use e8pack::codec::{codec_get, CodecId};
use e8pack::engine::ArchiveWriter;
use e8pack::stream::MemStream;

fn bench_codecs(c: &mut Criterion) {
    let data = b"benchmark corpus benchmark corpus benchmark corpus ".repeat(20_000);

    for id in [CodecId::Lz4, CodecId::Lzma, CodecId::Zstd] {
        let desc = codec_get(id).unwrap();
        let bound = desc.bound.unwrap()(data.len());
        let mut dst = vec![0u8; bound];
        c.bench_function(&format!("{}_compress_1mb", desc.name), |b| {
            b.iter(|| desc.compress.unwrap()(black_box(&data), &mut dst, 3))
        });
    }
}

fn bench_pack_single_entry(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024];

    for (name, codec) in [("pack_1mb_zstd", CodecId::Zstd), ("pack_1mb_lz4", CodecId::Lz4)] {
        c.bench_function(name, |b| {
            b.iter(|| {
                let mut w = ArchiveWriter::create(MemStream::new(), None).unwrap();
                let mut content = MemStream::from_vec(black_box(data.clone()));
                w.add_with_codec("bench.bin", &mut content, None, codec, 3).unwrap();
                w.close().unwrap();
            })
        });
    }
}

criterion_group!(benches, bench_codecs, bench_pack_single_entry);
criterion_main!(benches);

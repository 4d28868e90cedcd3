//! Bit-packed read benchmarks over a mapped long array.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use shale_memory::{BlobInput, MemoryMode, SegmentRecycler, SegmentedLongArray};
use std::io::Write;

fn mapped_array(num_longs: u64) -> (SegmentedLongArray, tempfile::NamedTempFile) {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for i in 0..num_longs {
        file.write_all(&(i.wrapping_mul(0x9E37_79B9_7F4A_7C15)).to_le_bytes())
            .unwrap();
    }
    file.flush().unwrap();

    let mut input = BlobInput::open(file.path(), MemoryMode::SharedMemoryLazy).unwrap();
    let mut recycler = SegmentRecycler::default();
    let mut array = SegmentedLongArray::new(&recycler);
    array.read_from(&mut input, &mut recycler, num_longs).unwrap();
    (array, file)
}

fn bench_bitpacked_reads(c: &mut Criterion) {
    let (array, _file) = mapped_array(1 << 16);
    let total_bits = (1u64 << 16) * 64 - 64;

    c.bench_function("get_element_value_17_bits", |b| {
        let mut offset = 0u64;
        b.iter(|| {
            offset = (offset + 17) % (total_bits - 17);
            black_box(array.get_element_value(black_box(offset), 17).unwrap())
        })
    });

    c.bench_function("get_large_element_value_64_bits", |b| {
        let mut offset = 0u64;
        b.iter(|| {
            offset = (offset + 64) % (total_bits - 64);
            black_box(array.get_large_element_value(black_box(offset), 64).unwrap())
        })
    });

    c.bench_function("get_word_aligned", |b| {
        let mut index = 0u64;
        b.iter(|| {
            index = (index + 1) % (1 << 16);
            black_box(array.get(black_box(index)).unwrap())
        })
    });
}

criterion_group!(benches, bench_bitpacked_reads);
criterion_main!(benches);

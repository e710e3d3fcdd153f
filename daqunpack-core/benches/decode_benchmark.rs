//! Benchmarks for buffer scanning throughput.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use daqunpack_core::{EventAssembler, Family, FamilyConfig, ModuleDecoder, TypeMaskVariant, Word};

fn assembler() -> EventAssembler {
    EventAssembler::new(vec![
        ModuleDecoder::new(
            Family::Conversion,
            FamilyConfig::conversion(TypeMaskVariant::Narrow),
            [3, 4, 5, 8],
        )
        .unwrap(),
        ModuleDecoder::new(
            Family::Timing,
            FamilyConfig::timing(TypeMaskVariant::Wide),
            [9],
        )
        .unwrap(),
    ])
}

/// One physics event: four fully populated ADCs and an MTDC, with padding.
fn synthetic_event(seed: u16) -> Vec<Word> {
    let mut words = Vec::new();
    for geo in [3u16, 4, 5, 8] {
        let g = geo << 11;
        words.extend_from_slice(&[0xFFFF, 0xFFFF]);
        words.extend_from_slice(&[32 << 8, g | 0x0200]);
        for ch in 0..32u16 {
            words.extend_from_slice(&[(seed.wrapping_mul(31) ^ ch) & 0x3fff, g | ch]);
        }
        words.extend_from_slice(&[seed, g | 0x0400]);
    }
    words.extend_from_slice(&[8 + 1, 0x4009]);
    for ch in 0..8u16 {
        words.extend_from_slice(&[seed.wrapping_add(ch * 100), 0x0400 | ch]);
    }
    words.extend_from_slice(&[seed, 0xc000]);
    words
}

fn scan_buffer_benchmark(c: &mut Criterion) {
    let assembler = assembler();
    let events: Vec<Vec<Word>> = (0..10_000u16).map(synthetic_event).collect();
    let total_words: usize = events.iter().map(Vec::len).sum();

    let mut group = c.benchmark_group("scan_buffer");
    group.throughput(Throughput::Elements(total_words as u64));

    group.bench_function("synthetic_10k_events", |b| {
        let mut blocks = Vec::new();
        b.iter(|| {
            blocks.clear();
            for words in &events {
                assembler.scan_into(black_box(words), &mut blocks);
            }
            black_box(blocks.len())
        })
    });

    group.bench_function("scan_many_10k_events", |b| {
        b.iter(|| black_box(assembler.scan_many(black_box(&events)).len()))
    });

    group.finish();
}

fn garbage_benchmark(c: &mut Criterion) {
    // Worst case for the resync path: no block starts at all.
    let assembler = assembler();
    let words: Vec<Word> = (0..1_000_000u32).map(|i| (i % 0x0100) as Word).collect();

    let mut group = c.benchmark_group("resync");
    group.throughput(Throughput::Elements(words.len() as u64));
    group.bench_function("no_headers_1m_words", |b| {
        b.iter(|| black_box(assembler.scan(black_box(&words)).len()))
    });
    group.finish();
}

criterion_group!(benches, scan_buffer_benchmark, garbage_benchmark);
criterion_main!(benches);

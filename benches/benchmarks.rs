use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use hkebin::{
    Channels, DataOptions, EngineConfig, FrameStore, HkeBinaryFile, RecordLayout, TableOptions,
    TestFileBuilder, parse_header, reduction,
};
use rand::Rng;
use std::sync::Arc;
use tempfile::TempDir;

/// 基准测试：头部解析
fn bench_header(c: &mut Criterion) {
    let header = TestFileBuilder::sample().header_bytes();

    c.bench_function("parse_header", |b| {
        b.iter(|| parse_header(black_box(&header)).unwrap());
    });
}

/// 基准测试：帧解码（顺序 / 并行）
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");
    let builder = TestFileBuilder::sample();

    for frames in [1_000usize, 20_000] {
        let bytes = builder.build(frames);
        let fd = parse_header(&bytes).unwrap();
        let layout = RecordLayout::from_descriptor(&fd);
        let data = &bytes[fd.header_len..];
        group.throughput(Throughput::Bytes(data.len() as u64));

        for parallel in [false, true] {
            let config = EngineConfig {
                parallel_decode: parallel,
                ..EngineConfig::default()
            };
            let label = if parallel { "parallel" } else { "sequential" };
            group.bench_with_input(BenchmarkId::new(label, frames), &data, |b, data| {
                b.iter(|| FrameStore::decode(&layout, black_box(data), fd.header_len, &config).unwrap());
            });
        }
    }

    group.finish();
}

/// 基准测试：文件打开（读入 / 内存映射）
fn bench_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("open");
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bench.dat");
    TestFileBuilder::sample().write_to(&path, 10_000).unwrap();

    let mapped = EngineConfig {
        use_mmap: true,
        mmap_threshold: 0,
        ..EngineConfig::default()
    };

    group.bench_function("owned", |b| {
        b.iter(|| HkeBinaryFile::open(black_box(&path)).unwrap());
    });
    group.bench_function("mmap", |b| {
        b.iter(|| HkeBinaryFile::open_with_config(black_box(&path), &mapped).unwrap());
    });

    group.finish();
}

/// 基准测试：查询
fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    let builder = TestFileBuilder::sample();
    let file = HkeBinaryFile::from_bytes(&builder.build(10_000), &EngineConfig::default()).unwrap();

    group.bench_function("get_data_calibrated_mean", |b| {
        let options = DataOptions::default();
        b.iter(|| file.get_data(black_box("3-R"), &options).unwrap());
    });

    group.bench_function("get_data_median", |b| {
        let options = DataOptions::raw().reduction(Arc::new(reduction::Median));
        b.iter(|| file.get_data(black_box("12-current"), &options).unwrap());
    });

    group.bench_function("get_data_random_channels", |b| {
        let mut rng = rand::thread_rng();
        b.iter(|| {
            let picks: Vec<usize> = (0..4).map(|_| rng.gen_range(0..4)).collect();
            let options = DataOptions::default().channels(Channels::Many(picks));
            file.get_data("12-levels", &options).unwrap()
        });
    });

    group.bench_function("get_table_all_registers", |b| {
        let ids: Vec<&String> = file.list_registers().iter().collect();
        let options = TableOptions::default();
        b.iter(|| file.get_table(black_box(ids.as_slice()), &options).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_header, bench_decode, bench_open, bench_query);
criterion_main!(benches);

#![allow(dead_code)]

use hkebin::{EngineConfig, HkeBinaryFile, TestFileBuilder};
use std::path::PathBuf;
use std::sync::Once;
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// 安装测试日志输出，`RUST_LOG` 控制级别
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// 测试环境设置
pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        init_tracing();
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    /// 把构造器生成的文件写入临时目录
    pub fn write(&self, name: &str, builder: &TestFileBuilder, frames: usize) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        builder.write_to(&path, frames).unwrap();
        path
    }

    pub fn write_bytes(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    /// 写入并打开典型样例文件
    pub fn open_sample(&self, frames: usize) -> (TestFileBuilder, HkeBinaryFile) {
        let builder = TestFileBuilder::sample().first_counter(500);
        let path = self.write("sample.dat", &builder, frames);
        let file = HkeBinaryFile::open(&path).unwrap();
        (builder, file)
    }
}

/// 打开内存中的文件
pub fn open_bytes(builder: &TestFileBuilder, frames: usize) -> HkeBinaryFile {
    init_tracing();
    HkeBinaryFile::from_bytes(&builder.build(frames), &EngineConfig::default()).unwrap()
}

/// 期望值辅助函数
pub mod expected {
    use hkebin::TestFileBuilder;

    /// 寄存器 `register` 的原始值块 `[frame][channel][sample]`
    pub fn raw_block(
        builder: &TestFileBuilder,
        register: usize,
        frames: usize,
        nch: usize,
        nsamples: usize,
    ) -> Vec<Vec<Vec<f64>>> {
        (0..frames)
            .map(|f| {
                (0..nch)
                    .map(|c| {
                        (0..nsamples)
                            .map(|s| builder.raw_value(register, f, c * nsamples + s))
                            .collect()
                    })
                    .collect()
            })
            .collect()
    }

    pub fn mean(values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// 断言辅助函数
pub mod assertions {
    pub fn assert_close(actual: f64, expected: f64, context: &str) {
        let tolerance = 1e-9 * expected.abs().max(1.0);
        assert!(
            (actual - expected).abs() <= tolerance,
            "{}: 实际 {} 期望 {}",
            context,
            actual,
            expected
        );
    }
}

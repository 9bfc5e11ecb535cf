//! # 测试数据生成器 (Test Data Generator)
//!
//! 按HKE二进制格式合成测试文件：头部描述板卡与寄存器，随后是定长帧。
//! 帧内的值由 (寄存器, 帧, 元素) 确定性地导出，测试可以用
//! [`TestFileBuilder::raw_value`] / [`TestFileBuilder::reduced_value`] 计算期望值。

use anyhow::{Context, Result};
use bytes::BufMut;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::register_type::RegisterType;

/// 寄存器规格
#[derive(Debug, Clone)]
pub struct RegisterSpec {
    pub name: String,
    pub register_type: RegisterType,
    pub nch: u16,
    pub nsamples: u16,
    pub channel_tags: Option<Vec<String>>,
    pub flags: u8,
    pub units: Option<String>,
    pub slope: f32,
    pub offset: f32,
}

impl RegisterSpec {
    pub fn new(name: &str, register_type: RegisterType) -> Self {
        Self {
            name: name.to_string(),
            register_type,
            nch: 1,
            nsamples: 1,
            channel_tags: None,
            flags: 0,
            units: None,
            slope: 1.0,
            offset: 0.0,
        }
    }

    pub fn shape(mut self, nch: u16, nsamples: u16) -> Self {
        self.nch = nch;
        self.nsamples = nsamples;
        self
    }

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.channel_tags = Some(tags.iter().map(|t| t.to_string()).collect());
        self
    }

    /// 标志 1：仅单位
    pub fn units(mut self, units: &str) -> Self {
        self.flags = 1;
        self.units = Some(units.to_string());
        self
    }

    /// 标志 2：单位 + 线性标定
    pub fn calibrated(mut self, units: &str, slope: f32, offset: f32) -> Self {
        self.flags = 2;
        self.units = Some(units.to_string());
        self.slope = slope;
        self.offset = offset;
        self
    }

    /// 标志 4：帧内附带归约列
    pub fn reduced(mut self) -> Self {
        self.flags = 4;
        self
    }

    fn values_per_frame(&self) -> usize {
        self.nch as usize * self.nsamples as usize
    }

    fn frame_bytes(&self) -> usize {
        let raw = self.values_per_frame() * self.register_type.width();
        if self.flags == 4 {
            raw + self.values_per_frame() * 4
        } else {
            raw
        }
    }
}

/// 板卡规格
#[derive(Debug, Clone)]
pub struct BoardSpec {
    pub board_type: String,
    pub address: u8,
    pub description: String,
    pub registers: Vec<RegisterSpec>,
}

impl BoardSpec {
    pub fn new(board_type: &str, address: u8, description: &str) -> Self {
        Self {
            board_type: board_type.to_string(),
            address,
            description: description.to_string(),
            registers: Vec::new(),
        }
    }

    pub fn register(mut self, register: RegisterSpec) -> Self {
        self.registers.push(register);
        self
    }
}

/// HKE文件构造器
#[derive(Debug, Clone)]
pub struct TestFileBuilder {
    version: u16,
    timestamp: String,
    boards: Vec<BoardSpec>,
    first_counter: u32,
}

impl Default for TestFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestFileBuilder {
    pub fn new() -> Self {
        Self {
            version: 1,
            timestamp: "2012-06-24 13:05:00".to_string(),
            boards: Vec::new(),
            first_counter: 0,
        }
    }

    /// 覆盖全部标志与类型的典型文件
    pub fn sample() -> Self {
        Self::new()
            .board(
                BoardSpec::new("ADC", 3, "Thermometry")
                    .register(RegisterSpec::new("T", RegisterType::Float32).units("K"))
                    .register(
                        RegisterSpec::new("R", RegisterType::Int32)
                            .shape(3, 4)
                            .calibrated("Ohm", 0.5, -2.0),
                    ),
            )
            .board(
                BoardSpec::new("DAC", 7, "Bias").register(
                    RegisterSpec::new("temp", RegisterType::UInt16)
                        .shape(2, 1)
                        .reduced(),
                ),
            )
            .board(
                BoardSpec::new("HK", 12, "Housekeeping")
                    .register(RegisterSpec::new("uptime", RegisterType::UInt32).units("s"))
                    .register(RegisterSpec::new("current", RegisterType::Int16).shape(1, 8))
                    .register(
                        RegisterSpec::new("levels", RegisterType::UInt8)
                            .shape(4, 2)
                            .reduced(),
                    ),
            )
    }

    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    pub fn timestamp(mut self, timestamp: &str) -> Self {
        self.timestamp = timestamp.to_string();
        self
    }

    pub fn board(mut self, board: BoardSpec) -> Self {
        self.boards.push(board);
        self
    }

    pub fn first_counter(mut self, first_counter: u32) -> Self {
        self.first_counter = first_counter;
        self
    }

    fn registers(&self) -> impl Iterator<Item = &RegisterSpec> {
        self.boards.iter().flat_map(|b| b.registers.iter())
    }

    /// 单帧字节数
    pub fn stride(&self) -> usize {
        9 + self.registers().map(RegisterSpec::frame_bytes).sum::<usize>()
    }

    pub fn header_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u8(b'F');
        out.put_u16_le(self.version);
        put_string(&mut out, &self.timestamp);
        out.put_u16_le(self.boards.len() as u16);

        for board in &self.boards {
            out.put_u8(b'B');
            put_string(&mut out, &board.board_type);
            out.put_u8(board.address);
            put_string(&mut out, &board.description);
            out.put_u16_le(board.registers.len() as u16);

            for reg in &board.registers {
                out.put_u8(b'R');
                put_string(&mut out, &reg.name);
                out.put_u8(reg.register_type.code());
                out.put_u16_le(reg.nch);
                out.put_u16_le(reg.nsamples);
                for ch in 0..reg.nch as usize {
                    match &reg.channel_tags {
                        Some(tags) => put_string(&mut out, tags.get(ch).map_or("", |t| t.as_str())),
                        None => put_string(&mut out, &format!("ch{ch}")),
                    }
                }
                out.put_u8(reg.flags);
                if reg.flags == 1 || reg.flags == 2 {
                    put_string(&mut out, reg.units.as_deref().unwrap_or(""));
                }
                if reg.flags == 2 {
                    out.put_f32_le(reg.slope);
                    out.put_f32_le(reg.offset);
                }
            }
        }
        out
    }

    /// 第 `frame` 帧的帧计数
    pub fn frame_counter(&self, frame: usize) -> u32 {
        self.first_counter.wrapping_add(frame as u32)
    }

    /// 第 `frame` 帧的接收时间（毫秒）
    pub fn received_ms(&self, frame: usize) -> u32 {
        1000 + frame as u32 * 250
    }

    /// 寄存器 `register`（文件顺序）在第 `frame` 帧第 `element` 个原始值
    ///
    /// 元素按 `channel * nsamples + sample` 排列。
    pub fn raw_value(&self, register: usize, frame: usize, element: usize) -> f64 {
        let reg = self
            .registers()
            .nth(register)
            .map(|r| r.register_type)
            .unwrap_or(RegisterType::Float32);
        let seed = frame as i64 * 31 + element as i64 * 7 + register as i64 * 101;
        match reg {
            RegisterType::UInt8 => (seed % 256) as f64,
            RegisterType::UInt16 => (seed * 3 % 65536) as f64,
            RegisterType::UInt32 => (seed * 100_003 + 7) as u32 as f64,
            RegisterType::Int16 => (seed % 2000 - 1000) as f64,
            RegisterType::Int32 => (seed * 37 - 50_000) as f64,
            RegisterType::Float32 => f64::from(seed as f32 * 0.25 - 3.0),
        }
    }

    /// 归约列的值（仅标志 4 的寄存器）
    pub fn reduced_value(&self, register: usize, frame: usize, element: usize) -> f32 {
        self.raw_value(register, frame, element) as f32 * 0.5 + 0.125
    }

    pub fn frame_bytes(&self, frame: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.stride());
        out.put_u8(b'F');
        out.put_u32_le(self.frame_counter(frame));
        out.put_u32_le(self.received_ms(frame));

        for (index, reg) in self.registers().enumerate() {
            for element in 0..reg.values_per_frame() {
                let v = self.raw_value(index, frame, element);
                match reg.register_type {
                    RegisterType::UInt8 => out.put_u8(v as u8),
                    RegisterType::UInt16 => out.put_u16_le(v as u16),
                    RegisterType::UInt32 => out.put_u32_le(v as u32),
                    RegisterType::Float32 => out.put_f32_le(v as f32),
                    RegisterType::Int16 => out.put_i16_le(v as i16),
                    RegisterType::Int32 => out.put_i32_le(v as i32),
                }
            }
            if reg.flags == 4 {
                for element in 0..reg.values_per_frame() {
                    out.put_f32_le(self.reduced_value(index, frame, element));
                }
            }
        }
        out
    }

    /// 头部 + `frame_count` 帧
    pub fn build(&self, frame_count: usize) -> Vec<u8> {
        let mut out = self.header_bytes();
        out.reserve(self.stride() * frame_count);
        for frame in 0..frame_count {
            out.extend_from_slice(&self.frame_bytes(frame));
        }
        out
    }

    pub fn write_to(&self, path: &Path, frame_count: usize) -> Result<()> {
        let bytes = self.build(frame_count);
        std::fs::write(path, &bytes)
            .with_context(|| format!("写入测试文件失败: {}", path.display()))?;
        debug!("测试文件已写入: {:?}，{} 帧，{} 字节", path, frame_count, bytes.len());
        Ok(())
    }
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    // 格式中每个字符占一个字节
    let bytes: Vec<u8> = s.chars().map(|c| c as u32 as u8).collect();
    out.put_u8(bytes.len() as u8);
    out.put_slice(&bytes);
}

/// 批量测试数据生成配置
#[derive(Debug, Clone)]
pub struct TestDataConfig {
    /// 生成文件数量
    pub file_count: usize,
    /// 每个文件的帧数量
    pub frames_per_file: usize,
    /// 输出目录
    pub output_dir: PathBuf,
}

impl Default for TestDataConfig {
    fn default() -> Self {
        Self {
            file_count: 4,
            frames_per_file: 1000,
            output_dir: PathBuf::from("test_data"),
        }
    }
}

/// 批量生成 `hke_YYYYMMDD_NNN.dat` 文件
pub struct TestDataGenerator {
    config: TestDataConfig,
    builder: TestFileBuilder,
}

impl TestDataGenerator {
    pub fn new(config: TestDataConfig) -> Self {
        Self {
            config,
            builder: TestFileBuilder::sample(),
        }
    }

    pub fn with_builder(mut self, builder: TestFileBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn builder(&self) -> &TestFileBuilder {
        &self.builder
    }

    pub async fn generate_all(&self) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .context("创建输出目录失败")?;

        let mut paths = Vec::with_capacity(self.config.file_count);
        for i in 0..self.config.file_count {
            let path = self
                .config
                .output_dir
                .join(format!("hke_20120624_{i:03}.dat"));
            let bytes = self.builder.build(self.config.frames_per_file);
            tokio::fs::write(&path, &bytes)
                .await
                .with_context(|| format!("写入测试文件失败: {}", path.display()))?;
            paths.push(path);
        }

        info!(
            "生成测试文件 {} 个，每个 {} 帧",
            paths.len(),
            self.config.frames_per_file
        );
        Ok(paths)
    }
}

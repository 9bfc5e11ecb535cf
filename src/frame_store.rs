//! # 帧存储 (Frame Store)
//!
//! 把头部之后的全部字节按固定帧长批量解码为列式存储：
//! 每个字段一列，列内按帧顺序平铺 `N * nch * nsamples` 个值，
//! 即行主序的 `(N, nch, nsamples)` 数组。
//!
//! ## 列名
//! - 原始列：寄存器全名
//! - 归约列：寄存器全名 + `" (reduced)"`
//!
//! 字段之间互不依赖，开启 `parallel_decode` 时用 rayon 按字段并行解码。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use ndarray::{Array3, ArrayView3};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{HkeError, Result};
use crate::record_layout::{
    FRAME_COUNTER_OFFSET, FRAME_MARKER, FieldLayout, RECEIVED_MS_OFFSET, RecordLayout,
};
use crate::register_type::{Primitive, RegisterType};

/// 类型化的列数据
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    Float32(Vec<f32>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
}

/// 可以存入 [`ColumnData`] 的原始类型
pub trait ColumnValue: Primitive {
    fn slice(data: &ColumnData) -> Option<&[Self]>;

    fn wrap(values: Vec<Self>) -> ColumnData;
}

macro_rules! impl_column_value {
    ($t:ty, $variant:ident) => {
        impl ColumnValue for $t {
            fn slice(data: &ColumnData) -> Option<&[Self]> {
                match data {
                    ColumnData::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn wrap(values: Vec<Self>) -> ColumnData {
                ColumnData::$variant(values)
            }
        }
    };
}

impl_column_value!(u8, UInt8);
impl_column_value!(u16, UInt16);
impl_column_value!(u32, UInt32);
impl_column_value!(f32, Float32);
impl_column_value!(i16, Int16);
impl_column_value!(i32, Int32);

macro_rules! each_column {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ColumnData::UInt8($v) => $body,
            ColumnData::UInt16($v) => $body,
            ColumnData::UInt32($v) => $body,
            ColumnData::Float32($v) => $body,
            ColumnData::Int16($v) => $body,
            ColumnData::Int32($v) => $body,
        }
    };
}

impl ColumnData {
    pub fn dtype(&self) -> RegisterType {
        match self {
            ColumnData::UInt8(_) => RegisterType::UInt8,
            ColumnData::UInt16(_) => RegisterType::UInt16,
            ColumnData::UInt32(_) => RegisterType::UInt32,
            ColumnData::Float32(_) => RegisterType::Float32,
            ColumnData::Int16(_) => RegisterType::Int16,
            ColumnData::Int32(_) => RegisterType::Int32,
        }
    }

    pub fn len(&self) -> usize {
        each_column!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values<T: ColumnValue>(&self) -> Option<&[T]> {
        T::slice(self)
    }

    /// 逐元素转换为 f64（所有原始类型都可无损表示）
    pub fn to_f64(&self) -> Vec<f64> {
        each_column!(self, v => v.iter().map(|x| x.to_f64()).collect())
    }
}

/// 一个字段在全部帧上的数据
#[derive(Debug, Clone)]
pub struct Column {
    pub field: FieldLayout,
    pub data: ColumnData,
    frames: usize,
}

impl Column {
    pub fn name(&self) -> &str {
        &self.field.name
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// `(N, nch, nsamples)`
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.frames, self.field.nch, self.field.nsamples)
    }

    /// 不复制的类型化视图，类型不符时返回 `None`
    pub fn view<T: ColumnValue>(&self) -> Option<ArrayView3<'_, T>> {
        let values = self.data.values::<T>()?;
        ArrayView3::from_shape(self.shape(), values).ok()
    }

    /// 转为 f64 的 `(N, nch, nsamples)` 数组
    pub fn to_array(&self) -> Result<Array3<f64>> {
        Ok(Array3::from_shape_vec(self.shape(), self.data.to_f64())?)
    }
}

/// 解码统计信息
#[derive(Debug, Default, Clone)]
pub struct DecodeStats {
    pub frames: usize,
    pub bytes: usize,
    pub stride: usize,
    pub columns: usize,
    pub parallel: bool,
    pub elapsed: Duration,
}

impl DecodeStats {
    pub fn print_summary(&self) {
        info!("📊 帧解码统计:");
        info!("  🎲 帧数: {}", self.frames);
        info!("  📏 帧长: {} 字节", self.stride);
        info!("  📦 数据量: {:.2} MB", self.bytes as f64 / 1024.0 / 1024.0);
        info!("  📋 列数: {}", self.columns);
        info!("  ⚡ 并行解码: {}", self.parallel);
        info!("  ⏱️ 耗时: {:.3} 秒", self.elapsed.as_secs_f64());
    }
}

#[derive(Debug, Clone)]
pub struct FrameStore {
    frame_count: usize,
    frame_counters: Vec<u32>,
    received_ms: Vec<u32>,
    columns: Vec<Column>,
    by_name: HashMap<String, usize>,
    stats: DecodeStats,
}

impl FrameStore {
    /// 解码帧数据区
    ///
    /// `data_offset` 是数据区在文件中的起始偏移，仅用于错误报告。
    pub fn decode(
        layout: &RecordLayout,
        data: &[u8],
        data_offset: usize,
        config: &EngineConfig,
    ) -> Result<Self> {
        let start_time = Instant::now();
        let stride = layout.stride();
        let frame_count = layout.frame_count(data.len())?;

        if config.verify_frame_markers {
            for (i, frame) in data.chunks_exact(stride).enumerate() {
                if frame[0] != FRAME_MARKER {
                    return Err(HkeError::MagicMismatch {
                        expected: char::from(FRAME_MARKER),
                        found: frame[0],
                        offset: data_offset + i * stride,
                    });
                }
            }
        }

        let frame_counters = decode_preamble(data, stride, FRAME_COUNTER_OFFSET);
        let received_ms = decode_preamble(data, stride, RECEIVED_MS_OFFSET);

        let columns: Vec<Column> = if config.parallel_decode {
            layout
                .fields()
                .par_iter()
                .map(|field| decode_column(data, stride, frame_count, field))
                .collect()
        } else {
            layout
                .fields()
                .iter()
                .map(|field| decode_column(data, stride, frame_count, field))
                .collect()
        };

        let mut by_name = HashMap::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            // 重名时保留第一个
            by_name.entry(column.name().to_string()).or_insert(i);
        }

        let stats = DecodeStats {
            frames: frame_count,
            bytes: data.len(),
            stride,
            columns: columns.len(),
            parallel: config.parallel_decode,
            elapsed: start_time.elapsed(),
        };

        counter!("hke_frames_decoded_total").increment(frame_count as u64);
        counter!("hke_bytes_decoded_total").increment(data.len() as u64);
        histogram!("hke_decode_duration_seconds").record(stats.elapsed.as_secs_f64());
        debug!(
            "✅ 帧解码完成: {} 帧 × {} 字节，{} 列",
            frame_count,
            stride,
            columns.len()
        );

        Ok(Self {
            frame_count,
            frame_counters,
            received_ms,
            columns,
            by_name,
            stats,
        })
    }

    /// 帧数 N
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn frame_counters(&self) -> &[u32] {
        &self.frame_counters
    }

    pub fn received_ms(&self) -> &[u32] {
        &self.received_ms
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// 与布局字段同序
    pub fn column_at(&self, field: usize) -> Option<&Column> {
        self.columns.get(field)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.by_name.get(name).map(|&i| &self.columns[i])
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }
}

fn decode_preamble(data: &[u8], stride: usize, offset: usize) -> Vec<u32> {
    data.chunks_exact(stride)
        .map(|frame| u32::get_le(&mut &frame[offset..offset + 4]))
        .collect()
}

fn decode_values<T: ColumnValue>(data: &[u8], stride: usize, frames: usize, field: &FieldLayout) -> ColumnData {
    let count = field.count();
    let end = field.offset + field.width();
    let mut values = Vec::with_capacity(frames * count);
    for frame in data.chunks_exact(stride) {
        let mut chunk = &frame[field.offset..end];
        for _ in 0..count {
            values.push(T::get_le(&mut chunk));
        }
    }
    T::wrap(values)
}

fn decode_column(data: &[u8], stride: usize, frames: usize, field: &FieldLayout) -> Column {
    let data = match field.dtype {
        RegisterType::UInt8 => decode_values::<u8>(data, stride, frames, field),
        RegisterType::UInt16 => decode_values::<u16>(data, stride, frames, field),
        RegisterType::UInt32 => decode_values::<u32>(data, stride, frames, field),
        RegisterType::Float32 => decode_values::<f32>(data, stride, frames, field),
        RegisterType::Int16 => decode_values::<i16>(data, stride, frames, field),
        RegisterType::Int32 => decode_values::<i32>(data, stride, frames, field),
    };
    Column {
        field: field.clone(),
        data,
        frames,
    }
}

//! # 帧布局 (Record Layout)
//!
//! 按文件顺序遍历一次描述符树，得到一帧的固定长度与每个字段的偏移：
//!
//! ```text
//! 'F' 帧计数:u32 接收时间ms:u32 | 寄存器0 原始 [寄存器0 归约] | 寄存器1 原始 ...
//! ```
//!
//! 布局在打开文件时计算一次，之后不再修改。

use serde::Serialize;
use tracing::debug;

use crate::descriptor_parser::{FileDescriptor, RegisterDescriptor};
use crate::error::{HkeError, Result};
use crate::register_type::RegisterType;

/// 帧前导：标记(1) + 帧计数(4) + 接收时间(4)
pub const PREAMBLE_LEN: usize = 9;
pub const FRAME_MARKER: u8 = b'F';
pub const FRAME_COUNTER_OFFSET: usize = 1;
pub const RECEIVED_MS_OFFSET: usize = 5;

/// 归约列名称后缀
pub const REDUCED_SUFFIX: &str = " (reduced)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldKind {
    Raw,
    Reduced,
}

/// 帧内一个字段的位置与形状
#[derive(Debug, Clone, Serialize)]
pub struct FieldLayout {
    /// 列名：原始字段为寄存器全名，归约字段附加 `" (reduced)"`
    pub name: String,
    pub register: usize,
    pub kind: FieldKind,
    /// 相对帧起点的字节偏移
    pub offset: usize,
    pub dtype: RegisterType,
    pub nch: usize,
    pub nsamples: usize,
}

impl FieldLayout {
    fn for_register(reg: &RegisterDescriptor, kind: FieldKind, offset: usize) -> Self {
        let (name, dtype) = match kind {
            FieldKind::Raw => (reg.fullname.clone(), reg.register_type),
            FieldKind::Reduced => (
                format!("{}{}", reg.fullname, REDUCED_SUFFIX),
                RegisterType::Float32,
            ),
        };
        Self {
            name,
            register: reg.index,
            kind,
            offset,
            dtype,
            nch: reg.nch(),
            nsamples: reg.nsamples(),
        }
    }

    /// 每帧的值个数
    pub fn count(&self) -> usize {
        self.nch * self.nsamples
    }

    /// 字节宽度
    pub fn width(&self) -> usize {
        self.count() * self.dtype.width()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordLayout {
    stride: usize,
    fields: Vec<FieldLayout>,
    /// 寄存器索引 -> 原始字段索引
    raw: Vec<usize>,
    /// 寄存器索引 -> 归约字段索引
    reduced: Vec<Option<usize>>,
}

impl RecordLayout {
    pub fn from_descriptor(fd: &FileDescriptor) -> Self {
        let mut offset = PREAMBLE_LEN;
        let mut fields = Vec::with_capacity(fd.registers.len() * 2);
        let mut raw = Vec::with_capacity(fd.registers.len());
        let mut reduced = Vec::with_capacity(fd.registers.len());

        for board in &fd.boards {
            for reg in fd.board_registers(board) {
                let field = FieldLayout::for_register(reg, FieldKind::Raw, offset);
                offset += field.width();
                raw.push(fields.len());
                fields.push(field);

                if reg.flags.has_reduced_column() {
                    let field = FieldLayout::for_register(reg, FieldKind::Reduced, offset);
                    offset += field.width();
                    reduced.push(Some(fields.len()));
                    fields.push(field);
                } else {
                    reduced.push(None);
                }
            }
        }

        debug!("帧布局: 长度={} 字节，字段数={}", offset, fields.len());

        Self {
            stride: offset,
            fields,
            raw,
            reduced,
        }
    }

    /// 一帧的字节数
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    /// 寄存器原始字段在 [`fields`](Self::fields) 中的位置
    pub fn raw_index(&self, register: usize) -> Option<usize> {
        self.raw.get(register).copied()
    }

    pub fn reduced_index(&self, register: usize) -> Option<usize> {
        self.reduced.get(register).copied().flatten()
    }

    pub fn raw_field(&self, register: usize) -> Option<&FieldLayout> {
        self.raw_index(register).map(|i| &self.fields[i])
    }

    pub fn reduced_field(&self, register: usize) -> Option<&FieldLayout> {
        self.reduced_index(register).map(|i| &self.fields[i])
    }

    /// 数据区长度对应的帧数，不允许残帧
    pub fn frame_count(&self, data_len: usize) -> Result<usize> {
        if data_len % self.stride != 0 {
            return Err(HkeError::TruncatedFrameRegion {
                remaining: data_len,
                stride: self.stride,
            });
        }
        Ok(data_len / self.stride)
    }
}

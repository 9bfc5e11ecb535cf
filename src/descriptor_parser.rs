//! # 描述符解析器 (Descriptor Parser)
//!
//! 自顶向下递归下降解析文件头部，不回溯：
//! 1. 文件描述符：`'F'` 版本 时间戳 板卡数量
//! 2. 板卡描述符：`'B'` 板卡类型 地址 描述 寄存器数量
//! 3. 寄存器描述符：`'R'` 名称 类型 nch nsamples 通道标签 标志 [单位] [斜率 偏移]
//!
//! 描述符保存在扁平的数组中：寄存器通过板卡索引指向所属板卡，
//! 板卡通过索引区间指向自己的寄存器，不存在反向指针。
//! 树的规模只由头部声明的数量决定，头部被截断时表现为 `TruncatedHeader`。

use std::ops::Range;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::debug;

use crate::byte_cursor::ByteCursor;
use crate::error::{HkeError, Result};
use crate::register_type::RegisterType;

pub const FILE_MARKER: u8 = b'F';
pub const BOARD_MARKER: u8 = b'B';
pub const REGISTER_MARKER: u8 = b'R';

/// 时间戳字符串可能出现的格式
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y%m%d_%H%M%S",
    "%m/%d/%Y %H:%M:%S",
    "%a %b %e %H:%M:%S %Y",
];

/// 寄存器标志字节
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegisterFlags {
    /// 0: 仅原始数据
    RawOnly,
    /// 1: 有单位，无标定
    Units,
    /// 2: 有单位和线性标定，查询时线性化
    Calibrated,
    /// 4: 每帧附带 float32 归约列
    Reduced,
}

impl RegisterFlags {
    pub fn from_byte(flags: u8) -> Option<Self> {
        match flags {
            0 => Some(RegisterFlags::RawOnly),
            1 => Some(RegisterFlags::Units),
            2 => Some(RegisterFlags::Calibrated),
            4 => Some(RegisterFlags::Reduced),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            RegisterFlags::RawOnly => 0,
            RegisterFlags::Units => 1,
            RegisterFlags::Calibrated => 2,
            RegisterFlags::Reduced => 4,
        }
    }

    pub fn has_units(self) -> bool {
        matches!(self, RegisterFlags::Units | RegisterFlags::Calibrated)
    }

    /// 帧内是否存储归约列
    pub fn has_reduced_column(self) -> bool {
        self == RegisterFlags::Reduced
    }
}

/// 线性标定 `raw * slope + offset`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearCalibration {
    pub slope: f32,
    pub offset: f32,
}

impl LinearCalibration {
    #[inline]
    pub fn apply(&self, raw: f64) -> f64 {
        raw * f64::from(self.slope) + f64::from(self.offset)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterDescriptor {
    /// 在文件寄存器列表中的位置
    pub index: usize,
    /// 所属板卡在文件板卡列表中的位置
    pub board: usize,
    pub name: String,
    /// `<板卡标签>: <名称>`
    pub fullname: String,
    /// `<地址>-<名称>`
    pub column_name: String,
    pub register_type: RegisterType,
    pub nch: u16,
    pub nsamples: u16,
    pub channel_tags: Vec<String>,
    pub flags: RegisterFlags,
    pub units: Option<String>,
    pub calibration: Option<LinearCalibration>,
}

impl RegisterDescriptor {
    pub fn nch(&self) -> usize {
        self.nch as usize
    }

    pub fn nsamples(&self) -> usize {
        self.nsamples as usize
    }

    /// 每帧的值个数 `nch * nsamples`
    pub fn values_per_frame(&self) -> usize {
        self.nch() * self.nsamples()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardDescriptor {
    pub index: usize,
    pub board_type: String,
    pub address: u8,
    pub description: String,
    pub register_count: u16,
    /// 在文件寄存器列表中的索引区间
    pub registers: Range<usize>,
}

impl BoardDescriptor {
    /// `<描述> (<地址>-<板卡类型>)`
    pub fn label(&self) -> String {
        board_label(&self.description, self.address, &self.board_type)
    }
}

fn board_label(description: &str, address: u8, board_type: &str) -> String {
    format!("{description} ({address}-{board_type})")
}

#[derive(Debug, Clone, Serialize)]
pub struct FileDescriptor {
    pub version: u16,
    pub timestamp: String,
    pub board_count: u16,
    pub boards: Vec<BoardDescriptor>,
    pub registers: Vec<RegisterDescriptor>,
    /// 文件顺序的寄存器全名
    pub register_keys: Vec<String>,
    /// 头部字节长度，即帧数据起始偏移
    pub header_len: usize,
}

impl FileDescriptor {
    pub fn board_registers(&self, board: &BoardDescriptor) -> &[RegisterDescriptor] {
        &self.registers[board.registers.clone()]
    }

    pub fn register_board(&self, register: &RegisterDescriptor) -> &BoardDescriptor {
        &self.boards[register.board]
    }

    /// 按已知格式解析时间戳字符串，无法识别时返回 `None`
    pub fn recorded_at(&self) -> Option<NaiveDateTime> {
        let ts = self.timestamp.trim();
        TIMESTAMP_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(ts, fmt).ok())
    }
}

/// 从文件开头解析完整头部
pub fn parse_header(buf: &[u8]) -> Result<FileDescriptor> {
    let mut cursor = ByteCursor::new(buf);
    parse_file(&mut cursor).map_err(HkeError::into_truncated_header)
}

fn expect_marker(cursor: &mut ByteCursor<'_>, expected: u8) -> Result<()> {
    let offset = cursor.position();
    let found = cursor.read_u8()?;
    if found != expected {
        return Err(HkeError::MagicMismatch {
            expected: char::from(expected),
            found,
            offset,
        });
    }
    Ok(())
}

fn parse_file(cursor: &mut ByteCursor<'_>) -> Result<FileDescriptor> {
    expect_marker(cursor, FILE_MARKER)?;
    let version = cursor.read_u16()?;
    let timestamp = cursor.read_string()?;
    let board_count = cursor.read_u16()?;
    debug!("文件头部: 版本={}, 时间戳={:?}, 板卡数={}", version, timestamp, board_count);

    let mut boards = Vec::with_capacity(board_count as usize);
    let mut registers = Vec::new();
    for index in 0..board_count as usize {
        let board = parse_board(cursor, index, &mut registers)?;
        boards.push(board);
    }

    let register_keys = registers.iter().map(|r| r.fullname.clone()).collect();

    Ok(FileDescriptor {
        version,
        timestamp,
        board_count,
        boards,
        registers,
        register_keys,
        header_len: cursor.position(),
    })
}

fn parse_board(
    cursor: &mut ByteCursor<'_>,
    index: usize,
    registers: &mut Vec<RegisterDescriptor>,
) -> Result<BoardDescriptor> {
    expect_marker(cursor, BOARD_MARKER)?;
    let board_type = cursor.read_string()?;
    let address = cursor.read_u8()?;
    let description = cursor.read_string()?;
    let register_count = cursor.read_u16()?;

    let label = board_label(&description, address, &board_type);
    debug!("板卡[{}]: {}，寄存器数={}", index, label, register_count);

    let first = registers.len();
    for _ in 0..register_count {
        let register = parse_register(cursor, registers.len(), index, address, &label)?;
        registers.push(register);
    }

    Ok(BoardDescriptor {
        index,
        board_type,
        address,
        description,
        register_count,
        registers: first..registers.len(),
    })
}

fn parse_register(
    cursor: &mut ByteCursor<'_>,
    index: usize,
    board: usize,
    address: u8,
    label: &str,
) -> Result<RegisterDescriptor> {
    expect_marker(cursor, REGISTER_MARKER)?;
    let name = cursor.read_string()?;
    let register_type = RegisterType::from_code(cursor.read_u8()?)?;
    let nch = cursor.read_u16()?;
    let nsamples = cursor.read_u16()?;
    let fullname = format!("{label}: {name}");

    if nch == 0 || nsamples == 0 {
        return Err(HkeError::InvalidShape {
            register: fullname,
            nch,
            nsamples,
        });
    }

    let channel_tags = cursor.read_string_array(nch as usize)?;
    let raw_flags = cursor.read_u8()?;
    let flags = RegisterFlags::from_byte(raw_flags).ok_or_else(|| HkeError::UnrecognizedFlags {
        register: fullname.clone(),
        flags: raw_flags,
    })?;

    let units = if flags.has_units() {
        Some(cursor.read_string()?)
    } else {
        None
    };
    let calibration = if flags == RegisterFlags::Calibrated {
        Some(LinearCalibration {
            slope: cursor.read_f32()?,
            offset: cursor.read_f32()?,
        })
    } else {
        None
    };

    debug!(
        "寄存器[{}]: {} 类型={} 形状=({}, {}) 标志={}",
        index,
        fullname,
        register_type,
        nch,
        nsamples,
        flags.bits()
    );

    Ok(RegisterDescriptor {
        index,
        board,
        column_name: format!("{address}-{name}"),
        name,
        fullname,
        register_type,
        nch,
        nsamples,
        channel_tags,
        flags,
        units,
        calibration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_data_generator::{BoardSpec, RegisterSpec, TestFileBuilder};

    fn sample_builder() -> TestFileBuilder {
        TestFileBuilder::new()
            .timestamp("2012-06-24 13:05:00")
            .board(
                BoardSpec::new("ADC", 3, "Thermometry")
                    .register(RegisterSpec::new("T", RegisterType::Float32))
                    .register(
                        RegisterSpec::new("R", RegisterType::Int32)
                            .shape(2, 4)
                            .calibrated("Ohm", 0.5, -1.0),
                    ),
            )
            .board(
                BoardSpec::new("DAC", 7, "Bias").register(
                    RegisterSpec::new("temp", RegisterType::UInt16)
                        .shape(2, 1)
                        .reduced(),
                ),
            )
    }

    #[test]
    fn test_parse_tree() {
        let header = sample_builder().header_bytes();
        let fd = parse_header(&header).unwrap();

        assert_eq!(fd.version, 1);
        assert_eq!(fd.board_count, 2);
        assert_eq!(fd.header_len, header.len());
        assert_eq!(fd.boards[0].label(), "Thermometry (3-ADC)");
        assert_eq!(fd.boards[1].registers, 2..3);
        assert_eq!(
            fd.register_keys,
            vec![
                "Thermometry (3-ADC): T",
                "Thermometry (3-ADC): R",
                "Bias (7-DAC): temp",
            ]
        );

        let r = &fd.registers[1];
        assert_eq!(r.column_name, "3-R");
        assert_eq!(r.board, 0);
        assert_eq!(r.flags, RegisterFlags::Calibrated);
        assert_eq!(r.units.as_deref(), Some("Ohm"));
        assert_eq!(r.channel_tags, vec!["ch0", "ch1"]);
        assert_eq!(
            r.calibration,
            Some(LinearCalibration {
                slope: 0.5,
                offset: -1.0
            })
        );

        let temp = &fd.registers[2];
        assert!(temp.flags.has_reduced_column());
        assert_eq!(fd.register_board(temp).address, 7);
        assert_eq!(fd.board_registers(&fd.boards[0]).len(), 2);
    }

    #[test]
    fn test_recorded_at() {
        let fd = parse_header(&sample_builder().header_bytes()).unwrap();
        let ts = fd.recorded_at().unwrap();
        assert_eq!(ts.format("%Y%m%d").to_string(), "20120624");

        let odd = parse_header(&TestFileBuilder::new().timestamp("sometime").header_bytes())
            .unwrap();
        assert!(odd.recorded_at().is_none());
    }

    #[test]
    fn test_bad_file_marker() {
        let mut header = sample_builder().header_bytes();
        header[0] = b'X';
        let err = parse_header(&header).unwrap_err();
        assert!(matches!(
            err,
            HkeError::MagicMismatch {
                expected: 'F',
                found: b'X',
                offset: 0
            }
        ));
    }

    #[test]
    fn test_bad_board_marker() {
        let header = TestFileBuilder::new()
            .timestamp("")
            .board(BoardSpec::new("ADC", 1, "A"))
            .header_bytes();
        // 'F' + u16 + 空字符串(1) + u16 = 6
        let mut broken = header.clone();
        broken[6] = b'Q';
        let err = parse_header(&broken).unwrap_err();
        assert!(matches!(
            err,
            HkeError::MagicMismatch {
                expected: 'B',
                offset: 6,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_type_and_flags() {
        let header = TestFileBuilder::new()
            .board(BoardSpec::new("ADC", 1, "A").register(RegisterSpec::new("x", RegisterType::UInt8)))
            .header_bytes();
        let reg_start = header.iter().rposition(|&b| b == REGISTER_MARKER).unwrap();

        // 'R' 名称(1+1) 类型
        let mut bad_type = header.clone();
        bad_type[reg_start + 3] = 9;
        assert!(matches!(
            parse_header(&bad_type),
            Err(HkeError::UnknownRegisterType { code: 9 })
        ));

        // 标志字节位于头部末尾
        let mut bad_flags = header.clone();
        let last = bad_flags.len() - 1;
        bad_flags[last] = 3;
        assert!(matches!(
            parse_header(&bad_flags),
            Err(HkeError::UnrecognizedFlags { flags: 3, .. })
        ));
    }

    #[test]
    fn test_truncated_header() {
        let header = sample_builder().header_bytes();
        for cut in [1, 5, header.len() / 2, header.len() - 1] {
            let err = parse_header(&header[..cut]).unwrap_err();
            assert!(
                matches!(err, HkeError::TruncatedHeader { .. }),
                "截断到 {cut} 字节: {err:?}"
            );
        }
    }

    #[test]
    fn test_zero_channels_rejected() {
        let header = TestFileBuilder::new()
            .board(
                BoardSpec::new("ADC", 1, "A")
                    .register(RegisterSpec::new("x", RegisterType::UInt8).shape(0, 1)),
            )
            .header_bytes();
        assert!(matches!(
            parse_header(&header),
            Err(HkeError::InvalidShape { nch: 0, .. })
        ));
    }
}

//! # 错误类型 (Error Types)
//!
//! 结构性错误（头部、帧区域）在构造阶段直接中止，不会产生半成品引擎；
//! 查询错误按调用返回，不影响引擎本身。

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HkeError {
    #[error("I/O错误: {0}")]
    Io(#[from] std::io::Error),

    /// 标记字节与期望字符不一致
    #[error("标记不匹配: 期望 '{expected}'，实际 0x{found:02X}，偏移 {offset}")]
    MagicMismatch {
        expected: char,
        found: u8,
        offset: usize,
    },

    #[error("未知寄存器类型代码: {code}")]
    UnknownRegisterType { code: u8 },

    #[error("寄存器 '{register}' 的标志字节无法识别: {flags}")]
    UnrecognizedFlags { register: String, flags: u8 },

    #[error("寄存器 '{register}' 的形状无效: nch={nch}, nsamples={nsamples}")]
    InvalidShape {
        register: String,
        nch: u16,
        nsamples: u16,
    },

    #[error("读取越界: 偏移 {offset} 需要 {needed} 字节，剩余 {remaining} 字节")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("文件头部被截断: 偏移 {offset} 需要 {needed} 字节，剩余 {remaining} 字节")]
    TruncatedHeader {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("帧数据区被截断: {remaining} 字节不是帧长 {stride} 的整数倍")]
    TruncatedFrameRegion { remaining: usize, stride: usize },

    #[error("找不到{kind}: {identifier}")]
    Lookup {
        kind: &'static str,
        identifier: String,
    },

    #[error("寄存器 '{register}' 的通道 {channel} 超出范围 [0, {nch})")]
    InvalidChannelSelection {
        register: String,
        channel: usize,
        nch: usize,
    },

    #[error("归约函数返回形状 {found:?}，期望 {expected:?} (寄存器 '{register}')")]
    ReductionContractViolation {
        register: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("批量参数 '{argument}' 长度 {found} 与寄存器数量 {expected} 不一致")]
    BatchArgumentMismatch {
        argument: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("数组形状错误: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("异步任务失败: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Arrow转换失败: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl HkeError {
    pub(crate) fn lookup(kind: &'static str, identifier: impl ToString) -> Self {
        HkeError::Lookup {
            kind,
            identifier: identifier.to_string(),
        }
    }

    /// 头部解析期间的越界即头部截断
    pub(crate) fn into_truncated_header(self) -> Self {
        match self {
            HkeError::OutOfBounds {
                offset,
                needed,
                remaining,
            } => HkeError::TruncatedHeader {
                offset,
                needed,
                remaining,
            },
            other => other,
        }
    }

    /// 是否属于结构性（构造期）错误
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            HkeError::MagicMismatch { .. }
                | HkeError::UnknownRegisterType { .. }
                | HkeError::UnrecognizedFlags { .. }
                | HkeError::InvalidShape { .. }
                | HkeError::OutOfBounds { .. }
                | HkeError::TruncatedHeader { .. }
                | HkeError::TruncatedFrameRegion { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, HkeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_bounds_becomes_truncated_header() {
        let err = HkeError::OutOfBounds {
            offset: 10,
            needed: 4,
            remaining: 1,
        }
        .into_truncated_header();
        assert!(matches!(
            err,
            HkeError::TruncatedHeader {
                offset: 10,
                needed: 4,
                remaining: 1
            }
        ));
        assert!(err.is_structural());
    }

    #[test]
    fn test_lookup_is_not_structural() {
        let err = HkeError::lookup("寄存器", "7-temp");
        assert!(!err.is_structural());
        assert!(err.to_string().contains("7-temp"));
    }
}

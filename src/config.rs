//! # 引擎配置 (Engine Configuration)
//!
//! 默认配置：整文件读入内存、顺序解码、严格检查帧标记。

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HkeError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 是否对大文件使用内存映射
    pub use_mmap: bool,
    /// 文件大小达到该值（字节）时才映射
    pub mmap_threshold: u64,
    /// 按字段并行解码帧数据
    pub parallel_decode: bool,
    /// 检查每帧开头的 `'F'` 标记
    pub verify_frame_markers: bool,
    /// 打开后输出解码统计
    pub log_summary: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_mmap: false,
            mmap_threshold: 64 * 1024 * 1024, // 64MB
            parallel_decode: false,
            verify_frame_markers: true,
            log_summary: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| HkeError::Config(e.to_string()))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// 给定文件大小时是否走内存映射
    pub fn should_mmap(&self, file_len: u64) -> bool {
        self.use_mmap && file_len >= self.mmap_threshold
    }
}

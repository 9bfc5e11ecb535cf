//! # 文件来源 (File Source)
//!
//! 只读打开文件并取得全部字节：小文件直接读入，大文件按配置做内存映射。
//! 文件句柄在返回前关闭；映射随 `FileSource` 一起释放。

use std::fs::File;
use std::io::Read;
use std::path::Path;

use memmap2::Mmap;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::Result;

pub enum FileSource {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl FileSource {
    pub fn open(path: &Path, config: &EngineConfig) -> Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();

        if config.should_mmap(len) {
            // 只读映射；文件在解码期间不得被截断
            let mmap = unsafe { Mmap::map(&file)? };
            debug!("内存映射文件: {:?}，{} 字节", path, len);
            return Ok(FileSource::Mapped(mmap));
        }

        let mut buf = Vec::with_capacity(len as usize);
        file.read_to_end(&mut buf)?;
        debug!("读入文件: {:?}，{} 字节", path, buf.len());
        Ok(FileSource::Owned(buf))
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            FileSource::Owned(buf) => buf.as_slice(),
            FileSource::Mapped(mmap) => &mmap[..],
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, FileSource::Mapped(_))
    }
}

//! # 字节游标 (Byte Cursor)
//!
//! 内存缓冲区上的顺序读取器。所有字段都按字节对齐，不需要位级访问。
//! 每次读取前检查剩余长度，越界时返回 `OutOfBounds`，偏移量不变。

use bytes::Buf;

use crate::error::{HkeError, Result};
use crate::register_type::Primitive;

#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// 当前字节偏移
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// 尚未读取的部分
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// 取出 `n` 字节并前移
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(HkeError::OutOfBounds {
                offset: self.pos,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let chunk = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(chunk)
    }

    pub fn read<T: Primitive>(&mut self) -> Result<T> {
        let mut chunk = self.take(T::TYPE.width())?;
        Ok(T::get_le(&mut chunk))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut chunk = self.take(1)?;
        Ok(chunk.get_u8())
    }

    /// 单字节字符（标记字节）
    pub fn read_char(&mut self) -> Result<char> {
        Ok(char::from(self.read_u8()?))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.read()
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.read()
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.read()
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.read()
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.read()
    }

    /// 长度前缀字符串：一个无符号字节 `n`，随后 `n` 个原始字节，
    /// 每个字节按 Latin-1 映射为一个字符。
    pub fn read_string(&mut self) -> Result<String> {
        let start = self.pos;
        let n = self.read_u8()? as usize;
        match self.take(n) {
            Ok(raw) => Ok(raw.iter().copied().map(char::from).collect()),
            Err(e) => {
                self.pos = start;
                Err(e)
            }
        }
    }

    /// 重复读取 `n` 个标量
    pub fn read_array<T: Primitive>(&mut self, n: usize) -> Result<Vec<T>> {
        let width = T::TYPE.width();
        let needed = n.checked_mul(width).ok_or(HkeError::OutOfBounds {
            offset: self.pos,
            needed: usize::MAX,
            remaining: self.remaining(),
        })?;
        let mut chunk = self.take(needed)?;
        Ok((0..n).map(|_| T::get_le(&mut chunk)).collect())
    }

    pub fn read_string_array(&mut self, n: usize) -> Result<Vec<String>> {
        (0..n).map(|_| self.read_string()).collect()
    }
}

//! # 寄存器原始类型 (Register Primitive Types)
//!
//! 头部中的类型代码与帧内的字节宽度一一对应：
//!
//! | 代码 | 类型    | 宽度 |
//! |------|---------|------|
//! | 0    | uint8   | 1    |
//! | 1    | uint16  | 2    |
//! | 2    | uint32  | 4    |
//! | 3    | float32 | 4    |
//! | 4    | int16   | 2    |
//! | 5    | int32   | 4    |

use bytes::Buf;
use serde::Serialize;

use crate::error::{HkeError, Result};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegisterType {
    UInt8 = 0,
    UInt16 = 1,
    UInt32 = 2,
    Float32 = 3,
    Int16 = 4,
    Int32 = 5,
}

impl RegisterType {
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(RegisterType::UInt8),
            1 => Ok(RegisterType::UInt16),
            2 => Ok(RegisterType::UInt32),
            3 => Ok(RegisterType::Float32),
            4 => Ok(RegisterType::Int16),
            5 => Ok(RegisterType::Int32),
            code => Err(HkeError::UnknownRegisterType { code }),
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// 单个值的字节宽度
    pub fn width(self) -> usize {
        match self {
            RegisterType::UInt8 => 1,
            RegisterType::UInt16 | RegisterType::Int16 => 2,
            RegisterType::UInt32 | RegisterType::Float32 | RegisterType::Int32 => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RegisterType::UInt8 => "uint8",
            RegisterType::UInt16 => "uint16",
            RegisterType::UInt32 => "uint32",
            RegisterType::Float32 => "float32",
            RegisterType::Int16 => "int16",
            RegisterType::Int32 => "int32",
        }
    }
}

impl std::fmt::Display for RegisterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 帧内可出现的小端原始值
///
/// 调用方保证 `buf` 至少剩余 `Self::TYPE.width()` 字节。
pub trait Primitive: Copy + Send + Sync + PartialEq + std::fmt::Debug + 'static {
    const TYPE: RegisterType;

    fn get_le(buf: &mut &[u8]) -> Self;

    fn to_f64(self) -> f64;
}

macro_rules! impl_primitive {
    ($t:ty, $variant:ident, $get:ident) => {
        impl Primitive for $t {
            const TYPE: RegisterType = RegisterType::$variant;

            #[inline]
            fn get_le(buf: &mut &[u8]) -> Self {
                buf.$get()
            }

            #[inline]
            fn to_f64(self) -> f64 {
                f64::from(self)
            }
        }
    };
}

impl_primitive!(u8, UInt8, get_u8);
impl_primitive!(u16, UInt16, get_u16_le);
impl_primitive!(u32, UInt32, get_u32_le);
impl_primitive!(f32, Float32, get_f32_le);
impl_primitive!(i16, Int16, get_i16_le);
impl_primitive!(i32, Int32, get_i32_le);

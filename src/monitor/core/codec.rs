//! 在线监控核心：值解析（codec）。
//!
//! 把内存镜像中已解析地址处的字节解释为类型化值；失败时返回 `DecodeError`（不得 panic）。
//!
//! 当前约定：
//! - 设备内存按小端序存放多字节值
//! - `bit` 地址读取 `(byte >> bit) & 1`
//! - 非 bit 类型的布尔读取：非零即真

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use super::model::{ResolvedAddress, SemanticType};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DecodedValue {
    Bool(bool),
    UInt8(u8),
    Int8(i8),
    UInt16(u16),
    Int16(i16),
    UInt32(u32),
    Int32(i32),
    UInt64(u64),
    Int64(i64),
    Float32(f32),
    Float64(f64),
}

impl DecodedValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            DecodedValue::Bool(value) => *value,
            DecodedValue::UInt8(value) => *value != 0,
            DecodedValue::Int8(value) => *value != 0,
            DecodedValue::UInt16(value) => *value != 0,
            DecodedValue::Int16(value) => *value != 0,
            DecodedValue::UInt32(value) => *value != 0,
            DecodedValue::Int32(value) => *value != 0,
            DecodedValue::UInt64(value) => *value != 0,
            DecodedValue::Int64(value) => *value != 0,
            DecodedValue::Float32(value) => *value != 0.0,
            DecodedValue::Float64(value) => *value != 0.0,
        }
    }

    pub fn to_value_display(&self) -> String {
        match self {
            DecodedValue::Bool(value) => {
                if *value {
                    "1".to_string()
                } else {
                    "0".to_string()
                }
            }
            DecodedValue::UInt8(value) => value.to_string(),
            DecodedValue::Int8(value) => value.to_string(),
            DecodedValue::UInt16(value) => value.to_string(),
            DecodedValue::Int16(value) => value.to_string(),
            DecodedValue::UInt32(value) => value.to_string(),
            DecodedValue::Int32(value) => value.to_string(),
            DecodedValue::UInt64(value) => value.to_string(),
            DecodedValue::Int64(value) => value.to_string(),
            DecodedValue::Float32(value) => value.to_string(),
            DecodedValue::Float64(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("address out of range: [{address}, {address}+{size}) exceeds image of {len} bytes")]
    OutOfRange { address: u32, size: u32, len: usize },

    #[error("invalid bit index {bit} (expected 0..=7)")]
    InvalidBit { bit: u8 },
}

pub fn decode_value(memory: &[u8], resolved: &ResolvedAddress) -> Result<DecodedValue, DecodeError> {
    let width = match resolved.bit {
        Some(_) => 1,
        None => resolved.data_type.width(),
    };
    let bytes = slice(memory, resolved.address, width)?;

    if let Some(bit) = resolved.bit {
        if bit > 7 {
            return Err(DecodeError::InvalidBit { bit });
        }
        return Ok(DecodedValue::Bool((bytes[0] >> bit) & 1 == 1));
    }

    let value = match resolved.data_type {
        // 未带位号的 bit 类型按整字节读取
        SemanticType::Bit => DecodedValue::Bool(bytes[0] != 0),
        SemanticType::Byte | SemanticType::U8 => DecodedValue::UInt8(bytes[0]),
        SemanticType::I8 => DecodedValue::Int8(bytes[0] as i8),
        SemanticType::Int | SemanticType::I16 => DecodedValue::Int16(LittleEndian::read_i16(bytes)),
        SemanticType::U16 | SemanticType::Word => DecodedValue::UInt16(LittleEndian::read_u16(bytes)),
        SemanticType::Dint | SemanticType::I32 => DecodedValue::Int32(LittleEndian::read_i32(bytes)),
        SemanticType::U32 | SemanticType::Dword => {
            DecodedValue::UInt32(LittleEndian::read_u32(bytes))
        }
        SemanticType::Real | SemanticType::Float | SemanticType::F32 => {
            DecodedValue::Float32(LittleEndian::read_f32(bytes))
        }
        SemanticType::U64 | SemanticType::Lword => {
            DecodedValue::UInt64(LittleEndian::read_u64(bytes))
        }
        SemanticType::I64 => DecodedValue::Int64(LittleEndian::read_i64(bytes)),
        SemanticType::F64 => DecodedValue::Float64(LittleEndian::read_f64(bytes)),
    };

    Ok(value)
}

/// 布尔读取；越界/非法位号一律视为 `false`（调用方按“无值”处理）。
pub fn read_bool(memory: &[u8], resolved: &ResolvedAddress) -> bool {
    decode_value(memory, resolved)
        .map(|value| value.is_truthy())
        .unwrap_or(false)
}

fn slice(memory: &[u8], address: u32, size: u32) -> Result<&[u8], DecodeError> {
    let start = address as usize;
    let end = start.checked_add(size as usize);
    match end {
        Some(end) if end <= memory.len() => Ok(&memory[start..end]),
        _ => Err(DecodeError::OutOfRange {
            address,
            size,
            len: memory.len(),
        }),
    }
}

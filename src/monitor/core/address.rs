//! 地址解析（resolver）：符号名 / 直接地址文本 → 绝对内存位置。
//!
//! 优先级（冻结约束）：
//! 1. 传入 `Symbol` 对象：直接使用
//! 2. 字符串与符号表中的名称完全匹配：使用该符号
//! 3. 字母前缀直接地址：`[KCTXYSM]` + 十进制数，可带 `.bit`（如 `M10.5`）
//! 4. 无前缀的纯数字地址：绝对偏移，不叠加 region 基址
//! 5. 以上都不匹配：返回 `None`（调用方按“地址未知”处理，不抛错）

use super::model::{ProjectDescriptor, RegionName, ResolvedAddress, SemanticType, Symbol};

#[derive(Clone, Copy, Debug)]
pub enum AddressRef<'a> {
    Name(&'a str),
    Symbol(&'a Symbol),
}

impl<'a> From<&'a str> for AddressRef<'a> {
    fn from(value: &'a str) -> Self {
        AddressRef::Name(value)
    }
}

impl<'a> From<&'a String> for AddressRef<'a> {
    fn from(value: &'a String) -> Self {
        AddressRef::Name(value.as_str())
    }
}

impl<'a> From<&'a Symbol> for AddressRef<'a> {
    fn from(value: &'a Symbol) -> Self {
        AddressRef::Symbol(value)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AddressResolver<'p> {
    project: &'p ProjectDescriptor,
}

impl<'p> AddressResolver<'p> {
    pub fn new(project: &'p ProjectDescriptor) -> Self {
        Self { project }
    }

    pub fn resolve<'a>(&self, input: impl Into<AddressRef<'a>>) -> Option<ResolvedAddress> {
        match input.into() {
            AddressRef::Symbol(symbol) => self.resolve_symbol(symbol),
            AddressRef::Name(text) => {
                if let Some(symbol) = self.project.symbol(text) {
                    return self.resolve_symbol(symbol);
                }

                let text = text.trim();
                self.resolve_prefixed(text)
                    .or_else(|| resolve_bare(text))
            }
        }
    }

    pub fn resolve_symbol(&self, symbol: &Symbol) -> Option<ResolvedAddress> {
        let region = self.project.region(symbol.location)?;
        if !symbol.address.is_finite() || symbol.address < 0.0 {
            return None;
        }

        let unit = symbol.location.unit_size();

        if symbol.data_type == SemanticType::Bit {
            let (byte, bit) = split_byte_bit(symbol.address)?;
            return Some(ResolvedAddress {
                address: region.offset.checked_add(byte.checked_mul(unit)?)?,
                size: 1,
                bit: Some(bit),
                data_type: SemanticType::Bit,
            });
        }

        let byte = whole_byte(symbol.address)?;
        Some(ResolvedAddress {
            address: region.offset.checked_add(byte.checked_mul(unit)?)?,
            size: symbol.data_type.width(),
            bit: None,
            data_type: symbol.data_type,
        })
    }

    fn resolve_prefixed(&self, text: &str) -> Option<ResolvedAddress> {
        let mut chars = text.chars();
        let region_name = RegionName::from_prefix(chars.next()?)?;
        let parsed = parse_numeric_address(chars.as_str())?;
        let region = self.project.region(region_name)?;

        let unit_offset = parsed.byte.checked_mul(region_name.unit_size())?;
        Some(ResolvedAddress {
            address: region.offset.checked_add(unit_offset)?,
            size: 1,
            bit: parsed.bit,
            data_type: parsed.data_type(),
        })
    }
}

fn resolve_bare(text: &str) -> Option<ResolvedAddress> {
    let parsed = parse_numeric_address(text)?;
    Some(ResolvedAddress {
        address: parsed.byte,
        size: 1,
        bit: parsed.bit,
        data_type: parsed.data_type(),
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct NumericAddress {
    byte: u32,
    bit: Option<u8>,
}

impl NumericAddress {
    fn data_type(&self) -> SemanticType {
        if self.bit.is_some() {
            SemanticType::Bit
        } else {
            SemanticType::Byte
        }
    }
}

/// 解析 `digits` 或 `digits.digits`；其余形式（符号、指数、空段）一律视为不匹配。
fn parse_numeric_address(text: &str) -> Option<NumericAddress> {
    let (int_part, frac_part) = match text.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (text, None),
    };

    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    match frac_part {
        None => Some(NumericAddress {
            byte: int_part.parse().ok()?,
            bit: None,
        }),
        Some(frac) => {
            if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let value: f64 = text.parse().ok()?;
            let (byte, bit) = split_byte_bit(value)?;
            Some(NumericAddress {
                byte,
                bit: Some(bit),
            })
        }
    }
}

const MAX_BIT: u8 = 7;

/// `byte.bit` 拆分：`bit = round((value - floor(value)) * 10)`。
///
/// 字节超出 `u32` 或位号大于 7 时返回 `None`。
fn split_byte_bit(value: f64) -> Option<(u32, u8)> {
    let byte = whole_byte(value)?;
    let bit = ((value - value.floor()) * 10.0).round();
    if bit > f64::from(MAX_BIT) {
        return None;
    }
    Some((byte, bit as u8))
}

fn whole_byte(value: f64) -> Option<u32> {
    let byte = value.floor();
    if !(0.0..=f64::from(u32::MAX)).contains(&byte) {
        return None;
    }
    Some(byte as u32)
}

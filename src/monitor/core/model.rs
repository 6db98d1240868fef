//! 在线监控核心：稳定数据模型。
//!
//! 约束：
//! - 区域（region）互不重叠，地址均相对 region 的 `offset` 解释
//! - 符号（symbol）由工程编辑侧维护，对本模块只读
//! - `ResolvedAddress` 不持久化，每次按需重新计算

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 本地缓存（设备内存镜像）大小。
pub const MEMORY_IMAGE_SIZE: usize = 65536;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RegionName {
    System,
    Input,
    Output,
    Marker,
    Timer,
    Counter,
}

impl RegionName {
    /// 每个地址单位占用的字节数：timer 为 9 字节结构体，counter 为 5 字节，其余 1 字节。
    pub fn unit_size(self) -> u32 {
        match self {
            RegionName::Timer => 9,
            RegionName::Counter => 5,
            _ => 1,
        }
    }

    /// 直接地址前缀字母映射：`K,S→system`、`C→counter`、`T→timer`、`X→input`、`Y→output`、`M→marker`。
    pub fn from_prefix(prefix: char) -> Option<Self> {
        match prefix.to_ascii_uppercase() {
            'K' | 'S' => Some(RegionName::System),
            'C' => Some(RegionName::Counter),
            'T' => Some(RegionName::Timer),
            'X' => Some(RegionName::Input),
            'Y' => Some(RegionName::Output),
            'M' => Some(RegionName::Marker),
            _ => None,
        }
    }
}

impl fmt::Display for RegionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegionName::System => "system",
            RegionName::Input => "input",
            RegionName::Output => "output",
            RegionName::Marker => "marker",
            RegionName::Timer => "timer",
            RegionName::Counter => "counter",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Bit,
    Byte,
    U8,
    I8,
    Int,
    U16,
    I16,
    Word,
    Dint,
    U32,
    I32,
    Dword,
    Real,
    Float,
    F32,
    U64,
    I64,
    F64,
    Lword,
}

impl SemanticType {
    /// 类型固定字节宽度。
    pub fn width(self) -> u32 {
        match self {
            SemanticType::Bit | SemanticType::Byte | SemanticType::U8 | SemanticType::I8 => 1,
            SemanticType::Int | SemanticType::U16 | SemanticType::I16 | SemanticType::Word => 2,
            SemanticType::Dint
            | SemanticType::U32
            | SemanticType::I32
            | SemanticType::Dword
            | SemanticType::Real
            | SemanticType::Float
            | SemanticType::F32 => 4,
            SemanticType::U64 | SemanticType::I64 | SemanticType::F64 | SemanticType::Lword => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRegion {
    pub offset: u32,
    pub size: u32,
}

impl MemoryRegion {
    pub fn end(&self) -> u32 {
        self.offset.saturating_add(self.size)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Symbol {
    pub name: String,
    pub location: RegionName,
    #[serde(rename = "type")]
    pub data_type: SemanticType,
    /// 位类型按 `byte.bit` 编码（小数位即位号，而不是十进制小数）。
    pub address: f64,
    #[serde(default)]
    pub initial_value: serde_json::Value,
    #[serde(default)]
    pub comment: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAddress {
    pub address: u32,
    pub size: u32,
    pub bit: Option<u8>,
    #[serde(rename = "type")]
    pub data_type: SemanticType,
}

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("invalid project descriptor json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("region {a} [{a_start}, {a_end}) overlaps region {b} [{b_start}, {b_end})")]
    OverlappingRegions {
        a: RegionName,
        a_start: u32,
        a_end: u32,
        b: RegionName,
        b_start: u32,
        b_end: u32,
    },

    #[error("duplicate symbol name: {name}")]
    DuplicateSymbol { name: String },
}

/// 工程描述：区域偏移表 + 符号表（对核心只读）。
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDescriptor {
    #[serde(default)]
    pub offsets: BTreeMap<RegionName, MemoryRegion>,
    #[serde(default)]
    pub symbols: Vec<Symbol>,
}

impl ProjectDescriptor {
    pub fn from_json_str(text: &str) -> Result<Self, ProjectError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn region(&self, name: RegionName) -> Option<&MemoryRegion> {
        self.offsets.get(&name)
    }

    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|symbol| symbol.name == name)
    }

    /// 校验区域互不重叠、符号名唯一；返回第一个发现的问题。
    pub fn validate(&self) -> Result<(), ProjectError> {
        let mut regions: Vec<(RegionName, MemoryRegion)> =
            self.offsets.iter().map(|(name, region)| (*name, *region)).collect();
        regions.sort_by_key(|(name, region)| (region.offset, *name));

        for pair in regions.windows(2) {
            let (a, ra) = pair[0];
            let (b, rb) = pair[1];
            if ra.size > 0 && rb.size > 0 && rb.offset < ra.end() {
                return Err(ProjectError::OverlappingRegions {
                    a,
                    a_start: ra.offset,
                    a_end: ra.end(),
                    b,
                    b_start: rb.offset,
                    b_end: rb.end(),
                });
            }
        }

        let mut seen = std::collections::HashSet::new();
        for symbol in &self.symbols {
            if !seen.insert(symbol.name.as_str()) {
                return Err(ProjectError::DuplicateSymbol {
                    name: symbol.name.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_descriptor_json_uses_region_names_and_type_field() {
        let json = r#"{
            "offsets": {
                "marker": { "offset": 192, "size": 256 },
                "timer": { "offset": 448, "size": 144 }
            },
            "symbols": [
                { "name": "button1", "location": "marker", "type": "bit", "address": 0.1 },
                { "name": "speed", "location": "marker", "type": "dint", "address": 4,
                  "initialValue": 10, "comment": "rpm" }
            ]
        }"#;

        let project = ProjectDescriptor::from_json_str(json).unwrap();
        assert_eq!(project.region(RegionName::Marker).unwrap().offset, 192);
        assert_eq!(project.symbols.len(), 2);
        assert_eq!(project.symbols[0].data_type, SemanticType::Bit);
        assert_eq!(project.symbols[0].comment, "");
        assert_eq!(project.symbols[1].initial_value, serde_json::json!(10));
        assert_eq!(project.symbol("speed").unwrap().location, RegionName::Marker);
        assert!(project.validate().is_ok());
    }

    #[test]
    fn malformed_descriptor_is_an_error_not_a_panic() {
        let err = ProjectDescriptor::from_json_str("{ \"offsets\": 3 }").unwrap_err();
        assert!(matches!(err, ProjectError::Json(_)));
    }

    #[test]
    fn validate_rejects_overlapping_regions_and_duplicate_symbols() {
        let mut project = ProjectDescriptor::default();
        project
            .offsets
            .insert(RegionName::Input, MemoryRegion { offset: 0, size: 64 });
        project
            .offsets
            .insert(RegionName::Output, MemoryRegion { offset: 32, size: 64 });
        assert!(matches!(
            project.validate(),
            Err(ProjectError::OverlappingRegions { .. })
        ));

        project
            .offsets
            .insert(RegionName::Output, MemoryRegion { offset: 64, size: 64 });
        let symbol = Symbol {
            name: "lamp".to_string(),
            location: RegionName::Output,
            data_type: SemanticType::Bit,
            address: 0.0,
            initial_value: serde_json::Value::Null,
            comment: String::new(),
        };
        project.symbols = vec![symbol.clone(), symbol];
        assert!(matches!(
            project.validate(),
            Err(ProjectError::DuplicateSymbol { .. })
        ));
    }

    #[test]
    fn widths_follow_type_families() {
        assert_eq!(SemanticType::Bit.width(), 1);
        assert_eq!(SemanticType::Word.width(), 2);
        assert_eq!(SemanticType::Real.width(), 4);
        assert_eq!(SemanticType::Lword.width(), 8);
        assert_eq!(RegionName::Timer.unit_size(), 9);
        assert_eq!(RegionName::Counter.unit_size(), 5);
        assert_eq!(RegionName::Marker.unit_size(), 1);
    }
}

//! 监控配置（轮询周期、批次聚合参数）及工程描述的磁盘加载。

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::core::model::ProjectDescriptor;
use super::core::plan::BatchOptions;

fn default_poll_interval_ms() -> u64 {
    200
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(flatten)]
    pub batch: BatchOptions,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch: BatchOptions::default(),
        }
    }
}

impl MonitorConfig {
    /// 文件不存在时返回默认配置；内容非法时带路径上下文报错。
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read monitor config from: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse monitor config JSON from: {}", path.display()))?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

pub fn load_project_file(path: &Path) -> Result<ProjectDescriptor> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read project descriptor from: {}", path.display()))?;
    let project = ProjectDescriptor::from_json_str(&content)
        .with_context(|| format!("Failed to parse project descriptor from: {}", path.display()))?;
    project
        .validate()
        .with_context(|| format!("Invalid project descriptor: {}", path.display()))?;
    Ok(project)
}

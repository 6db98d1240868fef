//! 在线监控核心：批量读取计划（plan）。
//!
//! 目标：
//! - 订阅区间去重后按起始地址排序
//! - 相邻/相近区间聚合为一个批次（间隙 < `gap_threshold` 且批次跨度 ≤ `max_batch_size`）
//! - 与当前批次重叠的区间总是并入该批次（即使超出 `max_batch_size`），批次之间互不重叠
//! - 批次数超过单轮上限时，按游标做环形轮询窗口，保证所有批次最终都会被服务
//! - 输出顺序稳定（按 start，再按 size）

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchOptions {
    /// 批次末尾与下一区间起点之间允许的最大间隙（严格小于）。
    pub gap_threshold: u32,
    /// 单个批次的最大字节跨度。
    pub max_batch_size: u32,
    /// 每轮最多发出的批次数。
    pub max_batches_per_tick: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            gap_threshold: 64,
            max_batch_size: 512,
            max_batches_per_tick: 4,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub struct AddressRange {
    pub start: u32,
    pub size: u32,
}

impl AddressRange {
    pub fn new(start: u32, size: u32) -> Self {
        Self { start, size }
    }

    pub fn end(&self) -> u32 {
        self.start.saturating_add(self.size)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlannedRange {
    pub range: AddressRange,
    /// 相对 `Batch.start` 的偏移
    pub offset: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub start: u32,
    pub size: u32,
    pub ranges: Vec<PlannedRange>,
}

impl Batch {
    pub fn end(&self) -> u32 {
        self.start.saturating_add(self.size)
    }
}

pub fn build_batches(ranges: &[AddressRange], options: &BatchOptions) -> Vec<Batch> {
    let mut sorted: Vec<AddressRange> = ranges.iter().copied().filter(|r| r.size > 0).collect();
    sorted.sort();
    sorted.dedup();

    let mut batches: Vec<Batch> = Vec::new();
    let mut current_start: Option<u32> = None;
    let mut current_end: u32 = 0;
    let mut current_ranges: Vec<AddressRange> = Vec::new();

    for range in sorted {
        match current_start {
            None => {
                current_start = Some(range.start);
                current_end = range.end();
                current_ranges.push(range);
            }
            Some(batch_start) => {
                let gap = range.start.saturating_sub(current_end);
                let merged_end = current_end.max(range.end());
                let overlaps = range.start < current_end;
                let can_merge = overlaps
                    || (gap < options.gap_threshold
                        && merged_end - batch_start <= options.max_batch_size);

                if can_merge {
                    current_end = merged_end;
                    current_ranges.push(range);
                } else {
                    batches.push(finalize_batch(batch_start, current_end, &current_ranges));

                    current_start = Some(range.start);
                    current_end = range.end();
                    current_ranges = vec![range];
                }
            }
        }
    }

    if let Some(batch_start) = current_start {
        batches.push(finalize_batch(batch_start, current_end, &current_ranges));
    }

    batches
}

fn finalize_batch(start: u32, end: u32, ranges: &[AddressRange]) -> Batch {
    Batch {
        start,
        size: end - start,
        ranges: ranges
            .iter()
            .map(|range| PlannedRange {
                range: *range,
                offset: range.start - start,
            })
            .collect(),
    }
}

/// 选出本轮要服务的批次下标及下一轮游标。
///
/// - `batch_count <= cap`：全部服务，游标归零
/// - 否则从 `cursor` 起取 `cap` 个（环形），游标前进 `cap`（对批次数取模）
pub fn select_window(batch_count: usize, cursor: usize, cap: usize) -> (Vec<usize>, usize) {
    if batch_count == 0 {
        return (Vec::new(), 0);
    }

    if cap == 0 || batch_count <= cap {
        return ((0..batch_count).collect(), 0);
    }

    let start = cursor % batch_count;
    let selected = (0..cap).map(|i| (start + i) % batch_count).collect();
    (selected, (start + cap) % batch_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearby_ranges_merge_and_far_ranges_split() {
        let ranges = vec![
            AddressRange::new(1000, 2),
            AddressRange::new(15, 2),
            AddressRange::new(10, 2),
        ];

        let batches = build_batches(&ranges, &BatchOptions::default());
        assert_eq!(batches.len(), 2);

        assert_eq!(batches[0].start, 10);
        assert_eq!(batches[0].size, 7);
        assert_eq!(batches[0].ranges.len(), 2);
        assert_eq!(batches[0].ranges[0].offset, 0);
        assert_eq!(batches[0].ranges[1].offset, 5);

        assert_eq!(batches[1].start, 1000);
        assert_eq!(batches[1].size, 2);
    }

    #[test]
    fn gap_threshold_is_strict() {
        let options = BatchOptions::default();
        let near = build_batches(
            &[AddressRange::new(0, 1), AddressRange::new(64, 1)],
            &options,
        );
        assert_eq!(near.len(), 1);

        let apart = build_batches(
            &[AddressRange::new(0, 1), AddressRange::new(65, 1)],
            &options,
        );
        assert_eq!(apart.len(), 2);
    }

    #[test]
    fn batch_span_never_exceeds_max_batch_size() {
        let options = BatchOptions {
            max_batch_size: 16,
            ..BatchOptions::default()
        };
        let ranges: Vec<AddressRange> = (0..10).map(|i| AddressRange::new(i * 4, 4)).collect();

        let batches = build_batches(&ranges, &options);
        assert!(batches.iter().all(|b| b.size <= 16));
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].start, 32);
        assert_eq!(batches[2].size, 8);
    }

    #[test]
    fn duplicates_and_overlaps_are_folded() {
        let ranges = vec![
            AddressRange::new(20, 4),
            AddressRange::new(20, 4),
            AddressRange::new(22, 1),
        ];
        let batches = build_batches(&ranges, &BatchOptions::default());
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].start, 20);
        assert_eq!(batches[0].size, 4);
        assert_eq!(batches[0].ranges.len(), 2);
        assert_eq!(batches[0].ranges[1].offset, 2);
    }

    #[test]
    fn oversized_single_range_is_its_own_batch() {
        let options = BatchOptions::default();
        let batches = build_batches(
            &[AddressRange::new(0, 2), AddressRange::new(10, 1024)],
            &options,
        );
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].size, 1024);
    }

    #[test]
    fn overlapping_range_extends_batch_past_max_span() {
        let ranges = vec![
            AddressRange::new(0, 500),
            AddressRange::new(10, 600),
            AddressRange::new(700, 4),
        ];
        let batches = build_batches(&ranges, &BatchOptions::default());

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].start, 0);
        assert_eq!(batches[0].end(), 610);
        assert_eq!(batches[0].ranges[1].offset, 10);
        assert!(batches.windows(2).all(|w| w[0].end() <= w[1].start));
    }

    #[test]
    fn window_round_robin_wraps() {
        let (first, cursor) = select_window(6, 0, 4);
        assert_eq!(first, vec![0, 1, 2, 3]);
        assert_eq!(cursor, 4);

        let (second, cursor) = select_window(6, cursor, 4);
        assert_eq!(second, vec![4, 5, 0, 1]);
        assert_eq!(cursor, 2);
    }

    #[test]
    fn window_serves_everything_when_under_cap() {
        assert_eq!(select_window(3, 2, 4), (vec![0, 1, 2], 0));
        assert_eq!(select_window(0, 5, 4), (Vec::new(), 0));
    }
}

//! 在线监控：实时内存轮询调度（scheduler）。
//!
//! 约束（执行要求）：
//! - 订阅按 `(requester, start, size)` 去重，同一键下的回调为集合（同一回调重复登记不重复）
//! - 每轮：区间排序 → 聚合批次 → 超出上限时环形轮询窗口 → 并发读取 → 写缓存 → 分发
//! - 单个批次失败只影响该批次：缓存与回调保持不变，本轮不重试
//! - start 必须 spawn 后台任务，不阻塞调用方；stop 立即生效，进行中的一轮允许跑完
//! - 回调一律在锁外调用（回调内可以 register/unregister）

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use crate::monitor::adapters::driver::{DeviceMemoryPort, DriverError, SessionState};
use crate::monitor::config::MonitorConfig;
use crate::monitor::core::address::AddressResolver;
use crate::monitor::core::codec::{decode_value, DecodeError, DecodedValue};
use crate::monitor::core::ladder::{LadderEvaluator, LadderNetwork};
use crate::monitor::core::model::{ResolvedAddress, MEMORY_IMAGE_SIZE};
use crate::monitor::core::plan::{build_batches, select_window, AddressRange, Batch};

/// 订阅回调句柄：克隆出来的句柄视为同一个回调（按 `id` 判等）。
#[derive(Clone)]
pub struct MemoryCallback {
    id: Uuid,
    func: Arc<dyn Fn(&[u8]) + Send + Sync>,
}

impl MemoryCallback {
    pub fn new(func: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        Self {
            id: Uuid::new_v4(),
            func: Arc::new(func),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn call(&self, bytes: &[u8]) {
        (self.func)(bytes)
    }
}

impl PartialEq for MemoryCallback {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MemoryCallback {}

impl fmt::Debug for MemoryCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCallback").field("id", &self.id).finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct RegistrationKey {
    requester: String,
    start: u32,
    size: u32,
}

#[derive(Debug)]
struct Registration {
    range: AddressRange,
    callbacks: Vec<MemoryCallback>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    /// 聚合后的批次总数
    pub total_batches: usize,
    /// 本轮实际发出的批次（按选择顺序）
    pub selected: Vec<AddressRange>,
    pub ok: u32,
    pub failed: u32,
    /// 下一轮的轮询游标
    pub cursor: usize,
    pub finished_at: DateTime<Utc>,
}

struct SchedulerState {
    registrations: BTreeMap<RegistrationKey, Registration>,
    cache: Vec<u8>,
    batch_cursor: usize,
}

struct SchedulerShared {
    port: Arc<dyn DeviceMemoryPort>,
    session: Arc<dyn SessionState>,
    config: MonitorConfig,
    state: Mutex<SchedulerState>,
}

struct PollHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

pub struct LiveMemoryScheduler {
    shared: Arc<SchedulerShared>,
    poll: Mutex<Option<PollHandle>>,
}

impl LiveMemoryScheduler {
    pub fn new(
        port: Arc<dyn DeviceMemoryPort>,
        session: Arc<dyn SessionState>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                port,
                session,
                config,
                state: Mutex::new(SchedulerState {
                    registrations: BTreeMap::new(),
                    cache: vec![0; MEMORY_IMAGE_SIZE],
                    batch_cursor: 0,
                }),
            }),
            poll: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    /// 登记对 `[start, start + size)` 的关注。`size == 0` 或地址溢出时忽略并返回 `false`。
    pub fn register(&self, requester: &str, start: u32, size: u32, callback: MemoryCallback) -> bool {
        if size == 0 || start.checked_add(size).is_none() {
            warn!(
                "ignored registration requester={} start={} size={}: invalid range",
                requester, start, size
            );
            return false;
        }

        {
            let mut state = self.shared.state.lock();
            let key = RegistrationKey {
                requester: requester.to_string(),
                start,
                size,
            };
            let registration = state.registrations.entry(key).or_insert_with(|| Registration {
                range: AddressRange::new(start, size),
                callbacks: Vec::new(),
            });
            if !registration.callbacks.contains(&callback) {
                registration.callbacks.push(callback);
            }
        }

        if self.shared.session.monitoring_active() {
            self.start();
        }
        true
    }

    pub fn unregister(&self, requester: &str, start: u32, size: u32, callback: &MemoryCallback) {
        let empty = {
            let mut state = self.shared.state.lock();
            let key = RegistrationKey {
                requester: requester.to_string(),
                start,
                size,
            };
            if let Some(registration) = state.registrations.get_mut(&key) {
                registration.callbacks.retain(|cb| cb != callback);
                if registration.callbacks.is_empty() {
                    state.registrations.remove(&key);
                }
            }
            state.registrations.is_empty()
        };

        if empty {
            self.stop();
        }
    }

    pub fn unregister_all(&self, requester: &str) {
        let empty = {
            let mut state = self.shared.state.lock();
            state.registrations.retain(|key, _| key.requester != requester);
            state.registrations.is_empty()
        };

        if empty {
            self.stop();
        }
    }

    /// 缓存清零，并以全零缓冲（长度 = 订阅 size）调用每个剩余回调一次。
    pub fn reset(&self) {
        let targets: Vec<(u32, Vec<MemoryCallback>)> = {
            let mut state = self.shared.state.lock();
            state.cache.fill(0);
            let targets = state
                .registrations
                .values()
                .map(|registration| (registration.range.size, registration.callbacks.clone()))
                .collect();
            targets
        };

        for (size, callbacks) in targets {
            let zeros = vec![0u8; size as usize];
            for callback in callbacks {
                callback.call(&zeros);
            }
        }
    }

    pub async fn tick(&self) -> TickReport {
        self.shared.tick().await
    }

    /// 启动后台轮询；已在运行时直接返回 `true`，无 tokio runtime 时返回 `false`。
    ///
    /// 监控关闭后循环自行退出（`is_running()` 变为 `false`），再次开启监控后的下一次
    /// `register`（或显式 `start`）重新启动；设备断开时循环保留，仅跳过本轮读取。
    pub fn start(&self) -> bool {
        let mut poll = self.poll.lock();
        if let Some(handle) = poll.as_ref() {
            if !handle.join.is_finished() {
                return true;
            }
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("cannot start memory polling: no tokio runtime");
                return false;
            }
        };

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let interval = shared.config.poll_interval();

        let join = runtime.spawn(async move {
            debug!("memory polling started interval={:?}", interval);
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                if !shared.session.monitoring_active() {
                    debug!("monitoring turned off, polling loop exits");
                    break;
                }

                // 进行中的一轮不被 stop 打断
                if shared.session.polling_allowed() {
                    let report = shared.tick().await;
                    debug!(
                        "tick batches={}/{} ok={} failed={} cursor={}",
                        report.selected.len(),
                        report.total_batches,
                        report.ok,
                        report.failed,
                        report.cursor
                    );
                }

                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!("memory polling stopped");
        });

        *poll = Some(PollHandle { stop_tx, join });
        true
    }

    /// 立即停止调度下一轮；不等待进行中的读取。
    pub fn stop(&self) {
        if let Some(handle) = self.poll.lock().take() {
            let _ = handle.stop_tx.send(true);
        }
    }

    /// 停止并等待后台任务退出（最多 1 秒）。
    pub async fn shutdown(&self) -> bool {
        let handle = self.poll.lock().take();
        let Some(handle) = handle else {
            return true;
        };

        let _ = handle.stop_tx.send(true);
        match tokio::time::timeout(Duration::from_secs(1), handle.join).await {
            Ok(join_result) => join_result.is_ok(),
            Err(_) => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.poll
            .lock()
            .as_ref()
            .map(|handle| !handle.join.is_finished())
            .unwrap_or(false)
    }

    pub fn registration_count(&self) -> usize {
        self.shared.state.lock().registrations.len()
    }

    pub fn cache_snapshot(&self) -> Vec<u8> {
        self.shared.state.lock().cache.clone()
    }

    pub fn read_cache(&self, address: u32, size: u32) -> Option<Vec<u8>> {
        let start = address as usize;
        let end = start.checked_add(size as usize)?;
        self.shared.state.lock().cache.get(start..end).map(|bytes| bytes.to_vec())
    }

    pub fn with_cache<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let state = self.shared.state.lock();
        f(&state.cache)
    }

    pub fn read_value(&self, resolved: &ResolvedAddress) -> Result<DecodedValue, DecodeError> {
        self.with_cache(|memory| decode_value(memory, resolved))
    }

    /// 监控开启时按当前缓存重算网络能流；监控关闭时不做任何修改并返回 `false`。
    pub fn evaluate_network(&self, resolver: &AddressResolver<'_>, network: &mut LadderNetwork) -> bool {
        if !self.shared.session.monitoring_active() {
            return false;
        }
        self.with_cache(|memory| LadderEvaluator::new(resolver, memory).evaluate(network));
        true
    }
}

impl Drop for LiveMemoryScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SchedulerShared {
    async fn tick(&self) -> TickReport {
        let (batches, selected, cursor) = {
            let mut state = self.state.lock();
            let ranges: Vec<AddressRange> = state
                .registrations
                .values()
                .map(|registration| registration.range)
                .collect();
            let batches = build_batches(&ranges, &self.config.batch);
            let (selected, next_cursor) = select_window(
                batches.len(),
                state.batch_cursor,
                self.config.batch.max_batches_per_tick,
            );
            state.batch_cursor = next_cursor;
            (batches, selected, next_cursor)
        };

        let mut report = TickReport {
            total_batches: batches.len(),
            selected: selected
                .iter()
                .map(|&i| AddressRange::new(batches[i].start, batches[i].size))
                .collect(),
            ok: 0,
            failed: 0,
            cursor,
            finished_at: Utc::now(),
        };

        let mut reads: JoinSet<(Batch, Result<Vec<u8>, DriverError>)> = JoinSet::new();
        for index in selected {
            let batch = batches[index].clone();
            let port = Arc::clone(&self.port);
            reads.spawn(async move {
                let result = port.read_memory(batch.start, batch.size).await;
                (batch, result)
            });
        }

        while let Some(joined) = reads.join_next().await {
            match joined {
                Ok((batch, Ok(bytes))) => {
                    self.apply_batch(&batch, &bytes);
                    report.ok += 1;
                }
                Ok((batch, Err(err))) => {
                    warn!(
                        "batch read failed start={} size={}: {}",
                        batch.start, batch.size, err
                    );
                    report.failed += 1;
                }
                Err(err) => {
                    warn!("batch read task failed: {}", err);
                    report.failed += 1;
                }
            }
        }

        report.finished_at = Utc::now();
        report
    }

    fn apply_batch(&self, batch: &Batch, bytes: &[u8]) {
        if bytes.len() < batch.size as usize {
            debug!(
                "short batch read start={} expected={} got={}",
                batch.start,
                batch.size,
                bytes.len()
            );
        }

        let deliveries: Vec<(Vec<u8>, Vec<MemoryCallback>)> = {
            let mut state = self.state.lock();

            let start = (batch.start as usize).min(state.cache.len());
            let end = start.saturating_add(bytes.len()).min(state.cache.len());
            state.cache[start..end].copy_from_slice(&bytes[..end - start]);

            let deliveries = batch
                .ranges
                .iter()
                .filter_map(|planned| {
                    let from = planned.offset as usize;
                    let slice = bytes.get(from..from + planned.range.size as usize)?;
                    let callbacks: Vec<MemoryCallback> = state
                        .registrations
                        .values()
                        .filter(|registration| registration.range == planned.range)
                        .flat_map(|registration| registration.callbacks.iter().cloned())
                        .collect();
                    Some((slice.to_vec(), callbacks))
                })
                .collect();
            deliveries
        };

        for (slice, callbacks) in deliveries {
            for callback in callbacks {
                callback.call(&slice);
            }
        }
    }
}

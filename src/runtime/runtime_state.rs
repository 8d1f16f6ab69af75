// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Per-fragment-instance execution context: memory trackers, codegen
//! handle, bounded error log, deterministic clock and the sticky query
//! status.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDateTime;
use tracing::warn;

use crate::common::pretty;
use crate::common::status::{CancelledCause, Status, StatusCell};
use crate::common::sysinfo;
use crate::common::types::UniqueId;
use crate::exec::data_stream::{DataStreamRecvr, StreamKey};
use crate::runtime::codegen::CodegenContext;
use crate::runtime::exec_env::ExecEnv;
use crate::runtime::mem_tracker::{MemTracker, NO_LIMIT};
use crate::runtime::profile::{CounterRef, RuntimeProfile};
use crate::runtime::thread_resource_mgr::ResourcePool;
use crate::wire::internal_service::{TQueryCtx, TQueryOptions};
use crate::wire::metrics::TCounterType;

pub const DEFAULT_BATCH_SIZE: i32 = 1024;
const DEFAULT_MAX_ERRORS: i32 = 100;

#[derive(Default)]
struct ErrorLog {
    entries: Vec<String>,
    // Index of the first entry not yet shipped to the coordinator.
    unreported_idx: usize,
}

pub struct RuntimeState {
    query_options: TQueryOptions,
    user: String,
    now: NaiveDateTime,
    query_id: UniqueId,
    fragment_instance_id: UniqueId,
    exec_env: Option<Arc<ExecEnv>>,
    profile: RuntimeProfile,
    codegen: Option<Arc<CodegenContext>>,
    resource_pool: Option<Arc<ResourcePool>>,

    // Receivers created by this instance; deregistered when the state
    // drops so late senders cannot reach a dead fragment.
    data_stream_recvrs: Mutex<Vec<StreamKey>>,

    // Insert side effects, shipped with the final status report only.
    files_to_move: Mutex<std::collections::BTreeMap<String, String>>,
    num_appended_rows: Mutex<std::collections::BTreeMap<String, i64>>,

    error_log: Mutex<ErrorLog>,
    file_errors: Mutex<Vec<(String, i64)>>,
    query_status: StatusCell,
    is_cancelled: AtomicBool,

    total_cpu_timer: CounterRef,
    total_storage_wait_timer: CounterRef,
    total_network_wait_timer: CounterRef,

    // instance tracker must be declared (and therefore dropped) before the
    // query tracker it consumes against.
    instance_mem_tracker: Option<Arc<MemTracker>>,
    udf_mem_tracker: Option<Arc<MemTracker>>,
    query_mem_tracker: Option<Arc<MemTracker>>,
}

impl Drop for RuntimeState {
    fn drop(&mut self) {
        let Some(env) = self.exec_env.clone() else {
            return;
        };
        let keys: Vec<StreamKey> = self
            .data_stream_recvrs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for key in keys {
            env.stream_mgr().deregister_recvr(&key);
        }
    }
}

impl RuntimeState {
    pub fn new(
        query_id: UniqueId,
        fragment_instance_id: UniqueId,
        query_ctx: &TQueryCtx,
        exec_env: Option<Arc<ExecEnv>>,
    ) -> Result<RuntimeState, Status> {
        let mut query_options = query_ctx.query_options.clone().unwrap_or_default();
        // Non-positive caps fall back to the configured defaults.
        if query_options.max_errors.unwrap_or(0) <= 0 {
            let configured = crate::common::config::max_errors();
            query_options.max_errors = Some(if configured > 0 {
                configured
            } else {
                DEFAULT_MAX_ERRORS
            });
        }
        if query_options.batch_size.unwrap_or(0) <= 0 {
            let configured = crate::common::config::default_batch_size();
            query_options.batch_size = Some(if configured > 0 {
                configured
            } else {
                DEFAULT_BATCH_SIZE
            });
        }

        let now = NaiveDateTime::parse_from_str(&query_ctx.now_string, "%Y-%m-%d %H:%M:%S%.f")
            .unwrap_or_default();

        let profile = RuntimeProfile::new(format!("Fragment {fragment_instance_id}"));

        let codegen = if query_options.disable_codegen.unwrap_or(false) {
            None
        } else {
            let ctx = CodegenContext::new(&format!("Fragment {fragment_instance_id}"))?;
            ctx.enable_optimizations(true);
            profile.add_child(ctx.profile().clone(), true);
            Some(Arc::new(ctx))
        };

        let resource_pool = exec_env
            .as_ref()
            .map(|env| env.thread_mgr().register_pool());

        let total_cpu_timer = profile.add_timer("TotalCpuTime");
        let total_storage_wait_timer = profile.add_timer("TotalStorageWaitTime");
        let total_network_wait_timer = profile.add_timer("TotalNetworkWaitTime");

        Ok(RuntimeState {
            query_options,
            user: query_ctx.user.clone(),
            now,
            query_id,
            fragment_instance_id,
            exec_env,
            profile,
            codegen,
            resource_pool,
            data_stream_recvrs: Mutex::new(Vec::new()),
            files_to_move: Mutex::new(std::collections::BTreeMap::new()),
            num_appended_rows: Mutex::new(std::collections::BTreeMap::new()),
            error_log: Mutex::new(ErrorLog::default()),
            file_errors: Mutex::new(Vec::new()),
            query_status: StatusCell::new(),
            is_cancelled: AtomicBool::new(false),
            total_cpu_timer,
            total_storage_wait_timer,
            total_network_wait_timer,
            instance_mem_tracker: None,
            udf_mem_tracker: None,
            query_mem_tracker: None,
        })
    }

    /// Sets up the tracker chain: query-wide tracker (shared across the
    /// instances of this query on the node), instance tracker beneath it,
    /// and the UDF tracker beneath that.
    pub fn init_mem_trackers(&mut self, query_bytes_limit: i64) {
        let query_tracker = match &self.exec_env {
            Some(env) => env.get_query_mem_tracker(self.query_id, query_bytes_limit),
            None => MemTracker::new_root(format!("Query({})", self.query_id), query_bytes_limit),
        };
        if query_bytes_limit != NO_LIMIT && query_bytes_limit > sysinfo::physical_mem() {
            warn!(
                target: "springbok::exec",
                "Memory limit {} exceeds physical memory of {}",
                pretty::print(query_bytes_limit, TCounterType::Bytes),
                pretty::print(sysinfo::physical_mem(), TCounterType::Bytes)
            );
        }
        let instance_tracker =
            MemTracker::new_child(self.profile.name(), NO_LIMIT, &query_tracker);
        let udf_tracker = MemTracker::new_child("UDFs", NO_LIMIT, &instance_tracker);
        self.query_mem_tracker = Some(query_tracker);
        self.instance_mem_tracker = Some(instance_tracker);
        self.udf_mem_tracker = Some(udf_tracker);
    }

    pub fn query_id(&self) -> UniqueId {
        self.query_id
    }

    pub fn fragment_instance_id(&self) -> UniqueId {
        self.fragment_instance_id
    }

    pub fn query_options(&self) -> &TQueryOptions {
        &self.query_options
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Deterministic statement timestamp, fixed at query submission.
    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    pub fn batch_size(&self) -> usize {
        self.query_options.batch_size.unwrap_or(DEFAULT_BATCH_SIZE) as usize
    }

    pub fn max_errors(&self) -> usize {
        self.query_options.max_errors.unwrap_or(DEFAULT_MAX_ERRORS) as usize
    }

    pub fn exec_env(&self) -> Option<Arc<ExecEnv>> {
        self.exec_env.clone()
    }

    pub fn profile(&self) -> &RuntimeProfile {
        &self.profile
    }

    pub fn codegen(&self) -> Option<Arc<CodegenContext>> {
        self.codegen.clone()
    }

    pub fn resource_pool(&self) -> Option<Arc<ResourcePool>> {
        self.resource_pool.clone()
    }

    pub fn query_mem_tracker(&self) -> Option<Arc<MemTracker>> {
        self.query_mem_tracker.clone()
    }

    pub fn instance_mem_tracker(&self) -> Option<Arc<MemTracker>> {
        self.instance_mem_tracker.clone()
    }

    pub fn udf_mem_tracker(&self) -> Option<Arc<MemTracker>> {
        self.udf_mem_tracker.clone()
    }

    pub fn total_cpu_timer(&self) -> CounterRef {
        Arc::clone(&self.total_cpu_timer)
    }

    pub fn total_storage_wait_timer(&self) -> CounterRef {
        Arc::clone(&self.total_storage_wait_timer)
    }

    pub fn total_network_wait_timer(&self) -> CounterRef {
        Arc::clone(&self.total_network_wait_timer)
    }

    /// Registers an exchange receiver for `dest_node_id`, owned by this
    /// state for the lifetime of the fragment instance.
    pub fn create_recvr(
        &self,
        dest_node_id: i32,
        num_senders: usize,
    ) -> Option<Arc<DataStreamRecvr>> {
        let env = self.exec_env.as_ref()?;
        let key = StreamKey {
            fragment_instance_id: self.fragment_instance_id,
            dest_node_id,
        };
        let recvr = env.stream_mgr().create_recvr(key, num_senders);
        self.data_stream_recvrs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key);
        Some(recvr)
    }

    /// Appends to the bounded diagnostic log. Returns false when the log
    /// is full; overflow is dropped silently.
    pub fn log_error(&self, error: impl Into<String>) -> bool {
        let mut guard = self.error_log.lock().unwrap_or_else(|e| e.into_inner());
        if guard.entries.len() < self.max_errors() {
            guard.entries.push(error.into());
            return true;
        }
        false
    }

    pub fn log_error_status(&self, status: &Status) {
        if status.ok() {
            return;
        }
        self.log_error(status.message().to_string());
    }

    pub fn error_log_is_empty(&self) -> bool {
        let guard = self.error_log.lock().unwrap_or_else(|e| e.into_inner());
        guard.entries.is_empty()
    }

    pub fn error_log(&self) -> String {
        let guard = self.error_log.lock().unwrap_or_else(|e| e.into_inner());
        guard.entries.join("\n")
    }

    /// Drains entries logged since the previous call and advances the
    /// watermark.
    pub fn get_unreported_errors(&self, new_errors: &mut Vec<String>) {
        let mut guard = self.error_log.lock().unwrap_or_else(|e| e.into_inner());
        if guard.unreported_idx < guard.entries.len() {
            new_errors.extend_from_slice(&guard.entries[guard.unreported_idx..]);
            guard.unreported_idx = guard.entries.len();
        }
    }

    /// Records a staged file the coordinator must move on commit.
    pub fn add_file_to_move(&self, src: impl Into<String>, dst: impl Into<String>) {
        let mut guard = self.files_to_move.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(src.into(), dst.into());
    }

    pub fn files_to_move(&self) -> std::collections::BTreeMap<String, String> {
        self.files_to_move
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Adds rows appended to one partition by this instance's sink.
    pub fn add_appended_rows(&self, partition: impl Into<String>, rows: i64) {
        let mut guard = self
            .num_appended_rows
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *guard.entry(partition.into()).or_insert(0) += rows;
    }

    pub fn num_appended_rows(&self) -> std::collections::BTreeMap<String, i64> {
        self.num_appended_rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn report_file_errors(&self, file_name: impl Into<String>, num_errors: i64) {
        let mut guard = self.file_errors.lock().unwrap_or_else(|e| e.into_inner());
        guard.push((file_name.into(), num_errors));
    }

    pub fn file_errors(&self) -> String {
        let guard = self.file_errors.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = String::new();
        for (file, count) in guard.iter() {
            let _ = writeln!(out, "{count} errors in {file}");
        }
        out
    }

    pub fn is_cancelled(&self) -> bool {
        self.is_cancelled.load(Ordering::Acquire)
    }

    /// Cooperative cancellation: operators poll this between batches.
    pub fn set_cancelled(&self) {
        self.is_cancelled.store(true, Ordering::Release);
    }

    pub fn query_status(&self) -> Status {
        self.query_status.get()
    }

    /// First non-OK status wins; returns the current status.
    pub fn update_query_status(&self, status: &Status) -> Status {
        self.query_status.update(status)
    }

    /// Transitions the query status to MEM_LIMIT_EXCEEDED iff it was OK,
    /// logging one detailed usage dump. Idempotent on re-entry.
    pub fn set_mem_limit_exceeded(
        &self,
        tracker: Option<&Arc<MemTracker>>,
        failed_allocation_size: i64,
    ) -> Status {
        let (current, transitioned) = self
            .query_status
            .update_with_transition(&Status::mem_limit_exceeded("Memory Limit Exceeded"));
        // Only the transitioning call writes the usage dump; re-entry just
        // returns the sticky status.
        if !transitioned {
            return current;
        }
        let mut msg = String::from("Memory Limit Exceeded\n");
        if failed_allocation_size > 0 {
            if let Some(tracker) = tracker {
                let _ = writeln!(
                    msg,
                    "  {} could not allocate {} without exceeding limit.",
                    tracker.label(),
                    pretty::print(failed_allocation_size, TCounterType::Bytes)
                );
            }
        }
        let process_tracker = self.exec_env.as_ref().map(|env| env.process_mem_tracker());
        match (&process_tracker, &self.query_mem_tracker) {
            (Some(process), _) if process.limit_exceeded() => msg.push_str(&process.log_usage()),
            (_, Some(query)) => msg.push_str(&query.log_usage()),
            _ => {}
        }
        self.log_error(msg);
        current
    }

    /// Current query status, additionally transitioning to
    /// MEM_LIMIT_EXCEEDED when any ancestor tracker is over its limit.
    /// Cancellation is deliberately not reported here: callers overload
    /// CANCELLED to mean "limit reached during fetch" and must
    /// disambiguate via [`RuntimeState::cancelled_cause`].
    pub fn check_query_state(&self) -> Status {
        if let Some(tracker) = &self.instance_mem_tracker {
            if tracker.any_limit_exceeded() {
                return self.set_mem_limit_exceeded(Some(tracker), 0);
            }
        }
        self.query_status.get()
    }

    /// Discriminated exit reason, so callers need not consult the
    /// mem-tracker themselves.
    pub fn cancelled_cause(&self) -> Option<CancelledCause> {
        let status = self.query_status.get();
        if status.is_mem_limit_exceeded() {
            return Some(CancelledCause::MemLimit);
        }
        let tracker_exceeded = self
            .instance_mem_tracker
            .as_ref()
            .map(|t| t.any_limit_exceeded())
            .unwrap_or(false);
        if status.is_cancelled() || self.is_cancelled() {
            if tracker_exceeded {
                return Some(CancelledCause::MemLimit);
            }
            if status.is_cancelled() && !self.is_cancelled() {
                return Some(CancelledCause::System);
            }
            return Some(CancelledCause::User);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::internal_service::{TQueryCtx, TQueryOptions};

    fn test_state(options: TQueryOptions) -> RuntimeState {
        let ctx = TQueryCtx {
            query_options: Some(options),
            now_string: "2014-03-01 12:00:00".to_string(),
            user: "henry".to_string(),
        };
        RuntimeState::new(UniqueId::new(1, 2), UniqueId::new(1, 3), &ctx, None)
            .expect("runtime state")
    }

    #[test]
    fn clamps_non_positive_options() {
        let state = test_state(TQueryOptions {
            batch_size: Some(0),
            max_errors: Some(-5),
            ..Default::default()
        });
        assert_eq!(state.batch_size(), DEFAULT_BATCH_SIZE as usize);
        assert_eq!(state.max_errors(), 100);
    }

    #[test]
    fn error_log_is_bounded() {
        let state = test_state(TQueryOptions {
            max_errors: Some(3),
            ..Default::default()
        });
        assert!(state.error_log_is_empty());
        for idx in 0..5 {
            state.log_error(format!("error {idx}"));
        }
        assert!(!state.error_log_is_empty());
        assert_eq!(state.error_log().lines().count(), 3);
    }

    #[test]
    fn unreported_errors_drain_once() {
        let state = test_state(TQueryOptions::default());
        state.log_error("first");
        state.log_error("second");

        let mut batch = Vec::new();
        state.get_unreported_errors(&mut batch);
        assert_eq!(batch, vec!["first".to_string(), "second".to_string()]);

        let mut empty = Vec::new();
        state.get_unreported_errors(&mut empty);
        assert!(empty.is_empty());

        state.log_error("third");
        let mut third = Vec::new();
        state.get_unreported_errors(&mut third);
        assert_eq!(third, vec!["third".to_string()]);
    }

    #[test]
    fn mem_limit_exceeded_is_sticky() {
        let mut state = test_state(TQueryOptions::default());
        state.init_mem_trackers(100);
        let instance = state.instance_mem_tracker().expect("instance tracker");

        instance.consume(60);
        let first = state.set_mem_limit_exceeded(Some(&instance), 50);
        assert!(first.is_mem_limit_exceeded());

        let second = state.set_mem_limit_exceeded(Some(&instance), 50);
        assert_eq!(first, second);
        assert!(state.query_status().is_mem_limit_exceeded());
        assert_eq!(state.cancelled_cause(), Some(CancelledCause::MemLimit));
    }

    #[test]
    fn check_query_state_detects_exceeded_ancestor() {
        let mut state = test_state(TQueryOptions::default());
        state.init_mem_trackers(100);
        assert!(state.check_query_state().ok());

        state
            .instance_mem_tracker()
            .expect("instance tracker")
            .consume(150);
        assert!(state.check_query_state().is_mem_limit_exceeded());
    }

    #[test]
    fn sticky_status_ignores_later_updates() {
        let state = test_state(TQueryOptions::default());
        let err = Status::internal_error("first failure");
        state.update_query_status(&err);
        state.update_query_status(&Status::cancelled());
        state.update_query_status(&Status::OK);
        assert_eq!(state.query_status(), err);
    }
}

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
//! Drives one plan fragment instance: prepare builds the runtime state
//! and pipeline, open runs it to completion (every fragment has a sink),
//! close sends the final status report.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

use crate::common::config;
use crate::common::status::Status;
use crate::common::types::UniqueId;
use crate::exec::data_stream::StreamKey;
use crate::exec::scan_source::{EmptyScanSource, ExchangeScanSource, LinesScanSource, ScanSource};
use crate::exec::sink::{DataSink, DataStreamSink, ResultSink};
use crate::runtime::exec_env::ExecEnv;
use crate::runtime::mem_tracker::NO_LIMIT;
use crate::runtime::profile::{CounterRef, RuntimeProfile, ScopedTimer};
use crate::runtime::runtime_state::RuntimeState;
use crate::wire::internal_service::{TDataSinkType, TExecPlanFragmentParams, TPlanNodeType};

/// Invoked from the executor's reporter thread only; at most one call is
/// in flight at any moment, and the last call has `done == true`.
pub type ReportStatusCallback = Arc<dyn Fn(&Status, &RuntimeProfile, bool) + Send + Sync>;

struct ReportThreadControl {
    stop: Mutex<bool>,
    cv: Condvar,
}

pub struct PlanFragmentExecutor {
    exec_env: Arc<ExecEnv>,
    report_cb: ReportStatusCallback,
    runtime_state: OnceLock<Arc<RuntimeState>>,
    source: Mutex<Option<Box<dyn ScanSource>>>,
    sink: Mutex<Option<Box<dyn DataSink>>>,
    result_rows: Mutex<Option<Arc<Mutex<Vec<Vec<u8>>>>>>,
    rows_produced: OnceLock<CounterRef>,
    rate_counter: OnceLock<CounterRef>,
    report_control: Arc<ReportThreadControl>,
    report_thread: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl PlanFragmentExecutor {
    pub fn new(exec_env: Arc<ExecEnv>, report_cb: ReportStatusCallback) -> Self {
        Self {
            exec_env,
            report_cb,
            runtime_state: OnceLock::new(),
            source: Mutex::new(None),
            sink: Mutex::new(None),
            result_rows: Mutex::new(None),
            rows_produced: OnceLock::new(),
            rate_counter: OnceLock::new(),
            report_control: Arc::new(ReportThreadControl {
                stop: Mutex::new(false),
                cv: Condvar::new(),
            }),
            report_thread: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn runtime_state(&self) -> Option<Arc<RuntimeState>> {
        self.runtime_state.get().cloned()
    }

    pub fn profile(&self) -> Option<RuntimeProfile> {
        self.runtime_state().map(|s| s.profile().clone())
    }

    /// Builds the runtime state and pipeline. Single-shot.
    pub fn prepare(&self, params: &TExecPlanFragmentParams) -> Result<(), Status> {
        let exec_params = params
            .params
            .as_ref()
            .ok_or_else(|| Status::internal_error("missing fragment exec params"))?;
        let fragment = params
            .fragment
            .as_ref()
            .ok_or_else(|| Status::internal_error("missing plan fragment"))?;
        let query_ctx = params.query_ctx.clone().unwrap_or_default();

        let query_id = UniqueId::from(exec_params.query_id);
        let finst_id = UniqueId::from(exec_params.fragment_instance_id);

        let mut state = RuntimeState::new(
            query_id,
            finst_id,
            &query_ctx,
            Some(Arc::clone(&self.exec_env)),
        )?;
        let mem_limit = state.query_options().mem_limit.unwrap_or(NO_LIMIT);
        state.init_mem_trackers(if mem_limit > 0 { mem_limit } else { NO_LIMIT });
        let state = Arc::new(state);
        self.runtime_state
            .set(Arc::clone(&state))
            .map_err(|_| Status::internal_error("fragment executor prepared twice"))?;

        let lifecycle = state.profile().add_event_sequence("Fragment Lifecycle");

        let plan_nodes = fragment
            .plan
            .as_ref()
            .map(|p| p.nodes.as_slice())
            .unwrap_or(&[]);

        // Leftmost scan node feeds the pipeline; otherwise the leftmost
        // exchange node; a fragment with neither produces nothing.
        let scan_node = plan_nodes
            .iter()
            .find(|n| n.node_type == TPlanNodeType::ScanNode);
        let exchange_node = plan_nodes
            .iter()
            .find(|n| n.node_type == TPlanNodeType::ExchangeNode);

        let source: Box<dyn ScanSource> = if let Some(scan) = scan_node {
            let ranges = exec_params
                .per_node_scan_ranges
                .get(&scan.node_id)
                .map(|r| r.as_slice())
                .unwrap_or(&[]);
            Box::new(LinesScanSource::new(ranges))
        } else if let Some(exchange) = exchange_node {
            let num_senders = exec_params
                .per_exch_num_senders
                .as_ref()
                .and_then(|m| m.get(&exchange.node_id))
                .copied()
                .unwrap_or(1)
                .max(1) as usize;
            let recvr = state
                .create_recvr(exchange.node_id, num_senders)
                .ok_or_else(|| Status::internal_error("cannot create exchange receiver"))?;
            Box::new(ExchangeScanSource::new(recvr))
        } else {
            Box::new(EmptyScanSource)
        };
        *self.source.lock().unwrap_or_else(|e| e.into_inner()) = Some(source);

        let output_sink = fragment.output_sink.clone().unwrap_or_else(
            crate::wire::internal_service::TDataSink::result_sink,
        );
        let sink: Box<dyn DataSink> = match output_sink.sink_type {
            TDataSinkType::ResultSink => {
                let (sink, rows) = ResultSink::new();
                *self.result_rows.lock().unwrap_or_else(|e| e.into_inner()) = Some(rows);
                Box::new(sink)
            }
            TDataSinkType::DataStreamSink => {
                let dest_node_id = output_sink.dest_node_id.ok_or_else(|| {
                    Status::internal_error("stream sink missing destination node id")
                })?;
                let dest_keys: Vec<StreamKey> = exec_params
                    .destinations
                    .as_ref()
                    .map(|dests| {
                        dests
                            .iter()
                            .map(|d| StreamKey {
                                fragment_instance_id: UniqueId::from(d.fragment_instance_id),
                                dest_node_id,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Box::new(DataStreamSink::new(self.exec_env.stream_mgr(), dest_keys))
            }
        };
        *self.sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(sink);

        let rows_produced = state
            .profile()
            .add_counter("RowsProduced", crate::wire::metrics::TCounterType::Unit);
        let rate = self.exec_env.periodic_updater().add_rate_counter(
            state.profile(),
            "RowsProducedRate",
            Arc::clone(&rows_produced),
        );
        let _ = self.rows_produced.set(rows_produced);
        let _ = self.rate_counter.set(rate);

        lifecycle.mark_event("Prepare Finished");
        Ok(())
    }

    /// Optimizes the codegen module once preparation settled the plan
    /// shape. No-op when codegen is disabled.
    pub fn optimize_codegen(&self) -> Result<(), Status> {
        let Some(state) = self.runtime_state() else {
            return Ok(());
        };
        match state.codegen() {
            Some(codegen) => codegen.optimize_module(),
            None => Ok(()),
        }
    }

    /// Runs the pipeline until the sink drains. Blocks; errors carry the
    /// first failing status.
    pub fn open(&self) -> Result<(), Status> {
        let state = self
            .runtime_state()
            .ok_or_else(|| Status::internal_error("open() before prepare()"))?;

        self.start_report_thread(&state);
        let result = self.drive_pipeline(&state);

        // The sink is closed on every path so downstream consumers see EOS.
        let close_status = {
            let mut guard = self.sink.lock().unwrap_or_else(|e| e.into_inner());
            match guard.as_mut() {
                Some(sink) => sink.close(&state),
                None => Ok(()),
            }
        };
        if let Some(seq) = state.profile().get_event_sequence("Fragment Lifecycle") {
            seq.mark_event("Open Finished");
        }
        result.and(close_status)
    }

    fn drive_pipeline(&self, state: &Arc<RuntimeState>) -> Result<(), Status> {
        let _total = ScopedTimer::new(state.profile().total_time_counter());
        loop {
            let query_state = state.check_query_state();
            if !query_state.ok() {
                return Err(query_state);
            }
            if state.is_cancelled() {
                return Err(Status::cancelled());
            }

            let batch = {
                let mut guard = self.source.lock().unwrap_or_else(|e| e.into_inner());
                let source = guard
                    .as_mut()
                    .ok_or_else(|| Status::internal_error("pipeline source missing"))?;
                source.next_batch(state)?
            };
            let Some(batch) = batch else {
                return Ok(());
            };

            if let Some(counter) = self.rows_produced.get() {
                counter.update(batch.num_rows() as i64);
            }

            let mut guard = self.sink.lock().unwrap_or_else(|e| e.into_inner());
            let sink = guard
                .as_mut()
                .ok_or_else(|| Status::internal_error("pipeline sink missing"))?;
            sink.send(state, &batch)?;
        }
    }

    /// Stops reporting and sends the final report (`done == true`) with
    /// the overall status. Idempotent.
    pub fn close(&self, overall_status: &Status) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_report_thread();
        let Some(state) = self.runtime_state() else {
            return;
        };
        if let Some(rate) = self.rate_counter.get() {
            self.exec_env.periodic_updater().stop_rate_counter(rate);
        }
        if let Some(seq) = state.profile().get_event_sequence("Fragment Lifecycle") {
            seq.mark_event("Close Finished");
        }
        state.profile().compute_time_in_profile();
        (self.report_cb)(overall_status, state.profile(), true);
    }

    /// Cooperative cancel: flips the runtime-state flag and unblocks any
    /// exchange receivers feeding this instance.
    pub fn cancel(&self) {
        let Some(state) = self.runtime_state() else {
            return;
        };
        debug!(
            target: "springbok::exec",
            finst_id = %state.fragment_instance_id(),
            "cancelling fragment instance"
        );
        state.set_cancelled();
        self.exec_env
            .stream_mgr()
            .cancel_fragment(state.fragment_instance_id());
    }

    pub fn result_rows(&self) -> Option<Arc<Mutex<Vec<Vec<u8>>>>> {
        self.result_rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn start_report_thread(&self, state: &Arc<RuntimeState>) {
        let interval = Duration::from_secs(config::status_report_interval_secs() as u64);
        let control = Arc::clone(&self.report_control);
        let cb = Arc::clone(&self.report_cb);
        let state = Arc::clone(state);
        let handle = std::thread::Builder::new()
            .name("fragment_report".to_string())
            .spawn(move || {
                let mut stopped = control.stop.lock().unwrap_or_else(|e| e.into_inner());
                loop {
                    let (next, timeout) = control
                        .cv
                        .wait_timeout(stopped, interval)
                        .unwrap_or_else(|e| e.into_inner());
                    stopped = next;
                    if *stopped {
                        return;
                    }
                    if timeout.timed_out() {
                        let status = state.query_status();
                        cb(&status, state.profile(), false);
                    }
                }
            })
            .expect("spawn report thread");
        *self.report_thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    fn stop_report_thread(&self) {
        {
            let mut stopped = self
                .report_control
                .stop
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *stopped = true;
        }
        self.report_control.cv.notify_all();
        let handle = self
            .report_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

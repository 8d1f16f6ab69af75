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
//! The coordinator owns a scheduled query: it dispatches fragment
//! instances to backends, folds their status reports into the query
//! profile, and tears the query down on the first error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::common::status::{Status, StatusCell};
use crate::common::types::UniqueId;
use crate::rpc::client_cache::InternalServiceClient;
use crate::rpc::thrift_client::RpcError;
use crate::runtime::exec_env::ExecEnv;
use crate::runtime::profile::RuntimeProfile;
use crate::scheduler::query_schedule::QuerySchedule;
use crate::scheduler::simple_scheduler::QueryCancelHandle;
use crate::wire::internal_service::{
    INTERNAL_SERVICE_VERSION_V1, TCancelPlanFragmentParams, TExecPlanFragmentParams,
    TPlanFragmentExecParams, TReportExecStatusParams,
};
use crate::wire::types::TNetworkAddress;

struct BackendExecState {
    fragment_instance_id: UniqueId,
    backend_num: i32,
    address: TNetworkAddress,
    profile: RuntimeProfile,
    done: bool,
}

struct Completion {
    remaining: Mutex<usize>,
    cv: Condvar,
}

pub struct Coordinator {
    exec_env: Arc<ExecEnv>,
    query_id: UniqueId,
    schedule: QuerySchedule,
    query_profile: RuntimeProfile,
    backend_states: Mutex<Vec<BackendExecState>>,
    query_status: StatusCell,
    completion: Completion,
    error_log: Mutex<Vec<String>>,
    cancelled: AtomicBool,
    // Read by the expiration sweep; always the last lock acquired.
    last_active: Mutex<Instant>,
}

impl Coordinator {
    pub fn new(exec_env: Arc<ExecEnv>, schedule: QuerySchedule) -> Arc<Self> {
        let query_id = schedule.query_id();
        let query_profile = RuntimeProfile::new(format!("Query (id={query_id})"));
        let exec_profile = RuntimeProfile::new("Execution Profile");
        query_profile.add_child(exec_profile.clone(), true);

        let mut backend_states = Vec::new();
        let mut backend_num = 0;
        for params in schedule.fragment_exec_params() {
            for (instance_id, host) in params.instance_ids.iter().zip(params.hosts.iter()) {
                let profile =
                    RuntimeProfile::new(format!("Instance {instance_id} (host={host})"));
                exec_profile.add_child(profile.clone(), true);
                backend_states.push(BackendExecState {
                    fragment_instance_id: *instance_id,
                    backend_num,
                    address: host.clone(),
                    profile,
                    done: false,
                });
                backend_num += 1;
            }
        }
        let remaining = backend_states.len();

        Arc::new(Self {
            exec_env,
            query_id,
            schedule,
            query_profile,
            backend_states: Mutex::new(backend_states),
            query_status: StatusCell::new(),
            completion: Completion {
                remaining: Mutex::new(remaining),
                cv: Condvar::new(),
            },
            error_log: Mutex::new(Vec::new()),
            cancelled: AtomicBool::new(false),
            last_active: Mutex::new(Instant::now()),
        })
    }

    pub fn query_id(&self) -> UniqueId {
        self.query_id
    }

    pub fn schedule(&self) -> &QuerySchedule {
        &self.schedule
    }

    pub fn query_status(&self) -> Status {
        self.query_status.get()
    }

    pub fn query_profile(&self) -> RuntimeProfile {
        self.query_profile.compute_time_in_profile();
        self.query_profile.clone()
    }

    pub fn error_log(&self) -> Vec<String> {
        self.error_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // One RPC against a pooled client: a transport failure gets one
    // reopen and one retry, the same discipline as the reporter path.
    // Any other error is final.
    fn rpc_with_retry<T>(
        &self,
        address: &TNetworkAddress,
        call: impl Fn(&mut InternalServiceClient) -> Result<T, RpcError>,
    ) -> Result<T, Status> {
        let mut conn = self.exec_env.client_cache().get_client(address)?;
        match call(&mut conn) {
            Ok(result) => Ok(result),
            Err(e) if e.is_transport() => {
                debug!(
                    target: "springbok::coordinator",
                    backend = %address,
                    error = ?e,
                    "retrying RPC after transport failure"
                );
                conn.reopen()?;
                call(&mut conn).map_err(|e| e.to_status())
            }
            Err(e) => Err(e.to_status()),
        }
    }

    /// Dispatches every fragment instance to its backend. The first
    /// dispatch failure cancels whatever was already started.
    pub fn exec(self: &Arc<Self>) -> Result<(), Status> {
        let request = self.schedule.request();
        let mut backend_num = 0;
        for (fragment_idx, fragment) in request.fragments.iter().enumerate() {
            let params = &self.schedule.fragment_exec_params()[fragment_idx];
            for (instance_id, host) in params.instance_ids.iter().zip(params.hosts.iter()) {
                let scan_ranges = params
                    .scan_range_assignment
                    .get(host)
                    .cloned()
                    .unwrap_or_default();
                let exec_params = TExecPlanFragmentParams {
                    protocol_version: INTERNAL_SERVICE_VERSION_V1,
                    fragment: Some(fragment.clone()),
                    params: Some(TPlanFragmentExecParams {
                        query_id: self.query_id.into(),
                        fragment_instance_id: (*instance_id).into(),
                        per_node_scan_ranges: scan_ranges,
                        destinations: if params.destinations.is_empty() {
                            None
                        } else {
                            Some(params.destinations.clone())
                        },
                        per_exch_num_senders: if params.per_exch_num_senders.is_empty() {
                            None
                        } else {
                            Some(params.per_exch_num_senders.clone())
                        },
                    }),
                    coord: Some(self.exec_env.backend_address().clone()),
                    backend_num: Some(backend_num),
                    query_ctx: Some(request.query_ctx.clone()),
                };
                backend_num += 1;

                let rpc_result =
                    self.rpc_with_retry(host, |conn| conn.exec_plan_fragment(&exec_params));
                let remote_status = match rpc_result {
                    Ok(result) => result
                        .status
                        .map(|s| Status::from_thrift(&s))
                        .unwrap_or(Status::OK),
                    Err(status) => status,
                };
                if !remote_status.ok() {
                    let failure = Status::internal_error(format!(
                        "ExecPlanFragment to {host} failed: {remote_status}"
                    ));
                    self.query_status.update(&failure);
                    self.cancel_internal();
                    return Err(failure);
                }
            }
        }
        Ok(())
    }

    /// Applies one fragment status report. First non-OK status wins at
    /// query scope and triggers cancellation of the remaining fragments.
    pub fn update_fragment_exec_status(&self, params: &TReportExecStatusParams) -> Status {
        let Some(finst_id) = params.fragment_instance_id.map(UniqueId::from) else {
            return Status::internal_error("report missing fragment instance id");
        };

        let instance_done = params.done.unwrap_or(false);
        let reported_status = params
            .status
            .as_ref()
            .map(Status::from_thrift)
            .unwrap_or(Status::OK);

        let newly_done = {
            let mut guard = self
                .backend_states
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let Some(state) = guard
                .iter_mut()
                .find(|s| s.fragment_instance_id == finst_id)
            else {
                debug!(
                    target: "springbok::coordinator",
                    query_id = %self.query_id,
                    finst_id = %finst_id,
                    "report for unknown fragment instance"
                );
                return Status::OK;
            };
            if let Some(profile) = &params.profile {
                state.profile.update(profile);
            }
            let newly_done = instance_done && !state.done;
            state.done = state.done || instance_done;
            newly_done
        };

        if let Some(errors) = &params.error_log {
            let mut guard = self.error_log.lock().unwrap_or_else(|e| e.into_inner());
            guard.extend(errors.iter().cloned());
        }

        if !reported_status.ok() {
            self.query_status.update(&reported_status);
            self.cancel_internal();
        }

        if newly_done {
            let mut remaining = self
                .completion
                .remaining
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.completion.cv.notify_all();
            }
        }

        {
            let mut guard = self.last_active.lock().unwrap_or_else(|e| e.into_inner());
            *guard = Instant::now();
        }
        Status::OK
    }

    /// Blocks until every fragment instance reported `done`, or the
    /// timeout elapses. Returns the final query status.
    pub fn wait(&self, timeout: Duration) -> Status {
        let deadline = Instant::now() + timeout;
        let mut remaining = self
            .completion
            .remaining
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        while *remaining > 0 {
            let now = Instant::now();
            if now >= deadline {
                return Status::internal_error("timed out waiting for fragment completion");
            }
            let (next, _) = self
                .completion
                .cv
                .wait_timeout(remaining, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            remaining = next;
        }
        self.query_status.get()
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cancel(&self, cause: &Status) {
        self.query_status.update(cause);
        self.cancel_internal();
    }

    // Best-effort CancelPlanFragment to every instance not yet done.
    fn cancel_internal(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let targets: Vec<(UniqueId, TNetworkAddress)> = {
            let guard = self
                .backend_states
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            guard
                .iter()
                .filter(|s| !s.done)
                .map(|s| (s.fragment_instance_id, s.address.clone()))
                .collect()
        };
        for (finst_id, address) in targets {
            let params = TCancelPlanFragmentParams {
                protocol_version: INTERNAL_SERVICE_VERSION_V1,
                fragment_instance_id: Some(finst_id.into()),
            };
            let result =
                self.rpc_with_retry(&address, |conn| conn.cancel_plan_fragment(&params));
            if let Err(e) = result {
                warn!(
                    target: "springbok::coordinator",
                    finst_id = %finst_id,
                    backend = %address,
                    error = %e,
                    "CancelPlanFragment failed"
                );
            }
        }
    }
}

impl QueryCancelHandle for Coordinator {
    fn query_id(&self) -> UniqueId {
        self.query_id
    }

    fn cancel_query(&self, cause: &Status) {
        self.cancel(cause);
    }
}

/// Queries owned by this node as coordinator, keyed by query id. The
/// internal service routes incoming status reports through this map.
pub struct CoordinatorRegistry {
    map: Mutex<HashMap<UniqueId, Arc<Coordinator>>>,
}

impl CoordinatorRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            map: Mutex::new(HashMap::new()),
        })
    }

    pub fn register(&self, coordinator: Arc<Coordinator>) {
        let mut guard = self.map.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(coordinator.query_id, coordinator);
    }

    pub fn deregister(&self, query_id: UniqueId) {
        let mut guard = self.map.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(&query_id);
    }

    pub fn get(&self, query_id: UniqueId) -> Option<Arc<Coordinator>> {
        let guard = self.map.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(&query_id).cloned()
    }
}

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
//! Execution state of a single plan fragment instance on this backend.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::common::status::{Status, StatusCell};
use crate::common::types::UniqueId;
use crate::exec::fragment_executor::PlanFragmentExecutor;
use crate::rpc::client_cache::ClientCache;
use crate::runtime::exec_env::ExecEnv;
use crate::runtime::profile::RuntimeProfile;
use crate::wire::internal_service::{
    INTERNAL_SERVICE_VERSION_V1, TExecPlanFragmentParams, TInsertExecStatus,
    TReportExecStatusParams,
};
use crate::wire::types::TNetworkAddress;

pub struct FragmentExecState {
    query_id: UniqueId,
    backend_num: i32,
    fragment_instance_id: UniqueId,
    coord_hostport: TNetworkAddress,
    client_cache: Arc<ClientCache>,
    executor: PlanFragmentExecutor,
    exec_params: Mutex<Option<TExecPlanFragmentParams>>,
    // Set from ReportStatusCb; anything other than OK means execution has
    // terminated with an error. First error wins.
    exec_status: StatusCell,
}

impl FragmentExecState {
    pub fn new(
        query_id: UniqueId,
        backend_num: i32,
        fragment_instance_id: UniqueId,
        exec_env: Arc<ExecEnv>,
        coord_hostport: TNetworkAddress,
    ) -> Arc<Self> {
        let client_cache = exec_env.client_cache();
        Arc::new_cyclic(|weak: &std::sync::Weak<FragmentExecState>| {
            let cb_weak = weak.clone();
            let executor = PlanFragmentExecutor::new(
                Arc::clone(&exec_env),
                Arc::new(move |status: &Status, profile: &RuntimeProfile, done: bool| {
                    if let Some(state) = cb_weak.upgrade() {
                        state.report_status_cb(status, profile, done);
                    }
                }),
            );
            FragmentExecState {
                query_id,
                backend_num,
                fragment_instance_id,
                coord_hostport,
                client_cache,
                executor,
                exec_params: Mutex::new(None),
                exec_status: StatusCell::new(),
            }
        })
    }

    pub fn query_id(&self) -> UniqueId {
        self.query_id
    }

    pub fn fragment_instance_id(&self) -> UniqueId {
        self.fragment_instance_id
    }

    pub fn executor(&self) -> &PlanFragmentExecutor {
        &self.executor
    }

    pub fn exec_params(&self) -> Option<TExecPlanFragmentParams> {
        self.exec_params
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn exec_status(&self) -> Status {
        self.exec_status.get()
    }

    /// Updates `exec_status` if it isn't already an error; returns the
    /// current status either way.
    fn update_status(&self, status: &Status) -> Status {
        self.exec_status.update(status)
    }

    /// Returns the current execution status if it is an error; otherwise
    /// cancels the fragment. Idempotent.
    pub fn cancel(&self) -> Status {
        let current = self.exec_status.get();
        if !current.ok() {
            return current;
        }
        self.update_status(&Status::cancelled());
        self.executor.cancel();
        Status::OK
    }

    /// Runs executor preparation and codegen optimization. Single-shot.
    pub fn prepare(&self, exec_params: TExecPlanFragmentParams) -> Result<(), Status> {
        self.executor.prepare(&exec_params)?;
        self.executor.optimize_codegen()?;
        *self.exec_params.lock().unwrap_or_else(|e| e.into_inner()) = Some(exec_params);
        Ok(())
    }

    /// Main loop of fragment execution; blocks until it finishes. Open
    /// drives the full pipeline because every fragment carries a sink.
    pub fn exec(&self) {
        let open_status = match self.executor.open() {
            Ok(()) => Status::OK,
            Err(status) => status,
        };
        let overall = self.update_status(&open_status);
        self.executor.close(&overall);
    }

    /// Reports status to the coordinator. Only ever invoked from the
    /// executor's reporter thread, so at most one call is in flight and
    /// the reported status always reflects the most recent execution
    /// status; the last call has `done == true`.
    fn report_status_cb(&self, status: &Status, profile: &RuntimeProfile, done: bool) {
        let exec_status = self.update_status(status);

        let mut conn = match self.client_cache.get_client(&self.coord_hostport) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(
                    target: "springbok::report",
                    coord = %self.coord_hostport,
                    error = %e,
                    "couldn't get a client for coordinator"
                );
                self.update_status(&Status::internal_error(format!(
                    "couldn't get a client for {}",
                    self.coord_hostport
                )));
                return;
            }
        };

        let mut params = TReportExecStatusParams {
            protocol_version: INTERNAL_SERVICE_VERSION_V1,
            query_id: Some(self.query_id.into()),
            backend_num: Some(self.backend_num),
            fragment_instance_id: Some(self.fragment_instance_id.into()),
            status: Some(exec_status.to_thrift()),
            done: Some(done),
            profile: Some(profile.to_thrift()),
            error_log: None,
            insert_exec_status: None,
        };

        if let Some(runtime_state) = self.executor.runtime_state() {
            // Insert side effects only matter once the fragment finished;
            // the coordinator ignores them until then anyway.
            if done {
                let files_to_move = runtime_state.files_to_move();
                let num_appended_rows = runtime_state.num_appended_rows();
                if !files_to_move.is_empty() || !num_appended_rows.is_empty() {
                    params.insert_exec_status = Some(TInsertExecStatus {
                        files_to_move,
                        num_appended_rows: if num_appended_rows.is_empty() {
                            None
                        } else {
                            Some(num_appended_rows)
                        },
                    });
                }
            }

            let mut new_errors = Vec::new();
            runtime_state.get_unreported_errors(&mut new_errors);
            if !new_errors.is_empty() {
                params.error_log = Some(new_errors);
            }
        }

        // A transport failure gets one reopen and one retry; failing
        // either cancels this fragment. Other errors are final.
        let result = match conn.report_exec_status(&params) {
            Ok(result) => Ok(result),
            Err(e) if e.is_transport() => {
                debug!(
                    target: "springbok::report",
                    coord = %self.coord_hostport,
                    error = ?e,
                    "retrying ReportExecStatus"
                );
                match conn.reopen() {
                    Ok(()) => conn.report_exec_status(&params),
                    Err(reopen_err) => {
                        self.update_status(&reopen_err);
                        self.executor.cancel();
                        return;
                    }
                }
            }
            Err(e) => Err(e),
        };

        let rpc_status = match result {
            Ok(result) => result
                .status
                .map(|s| Status::from_thrift(&s))
                .unwrap_or(Status::OK),
            Err(e) => Status::internal_error(format!(
                "ReportExecStatus() to {} failed: {}",
                self.coord_hostport,
                e.to_status()
            )),
        };

        if !rpc_status.ok() {
            self.update_status(&rpc_status);
            self.executor.cancel();
        }
    }
}

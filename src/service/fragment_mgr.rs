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
//! Registry of fragment instances executing on this backend.
//!
//! Lock order: `fragment_map` is never held while taking any
//! fragment-level lock, and `expiration_data` is always the last lock
//! acquired on any path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::common::config;
use crate::common::status::Status;
use crate::common::types::UniqueId;
use crate::runtime::exec_env::ExecEnv;
use crate::service::fragment_exec_state::FragmentExecState;
use crate::wire::internal_service::TExecPlanFragmentParams;

pub struct FragmentMgr {
    exec_env: Arc<ExecEnv>,
    fragment_map: Mutex<HashMap<UniqueId, Arc<FragmentExecState>>>,
    expiration_data: Mutex<HashMap<UniqueId, Instant>>,
    sweep_stop: Arc<AtomicBool>,
}

impl FragmentMgr {
    pub fn new(exec_env: Arc<ExecEnv>) -> Arc<Self> {
        let mgr = Arc::new(Self {
            exec_env,
            fragment_map: Mutex::new(HashMap::new()),
            expiration_data: Mutex::new(HashMap::new()),
            sweep_stop: Arc::new(AtomicBool::new(false)),
        });
        let sweep_mgr = Arc::clone(&mgr);
        std::thread::Builder::new()
            .name("query_expiration".to_string())
            .spawn(move || sweep_mgr.expiration_sweep())
            .expect("spawn expiration sweep");
        mgr
    }

    /// Prepares the fragment synchronously (errors go straight back to
    /// the caller) and runs it on the fragment executor pool.
    pub fn exec_plan_fragment(
        self: &Arc<Self>,
        params: TExecPlanFragmentParams,
    ) -> Result<(), Status> {
        let exec_params = params
            .params
            .as_ref()
            .ok_or_else(|| Status::internal_error("missing fragment exec params"))?;
        let coord = params
            .coord
            .clone()
            .ok_or_else(|| Status::internal_error("missing coordinator address"))?;
        let backend_num = params.backend_num.unwrap_or(-1);
        let query_id = UniqueId::from(exec_params.query_id);
        let finst_id = UniqueId::from(exec_params.fragment_instance_id);

        debug!(
            target: "springbok::exec",
            query_id = %query_id,
            finst_id = %finst_id,
            backend_num,
            "ExecPlanFragment"
        );
        if config::debug_exec_params_json() {
            match crate::common::thrift_codec::thrift_named_json(&params) {
                Ok(json) => debug!(
                    target: "springbok::rpc",
                    rpc = "ExecPlanFragment",
                    named_json = %json,
                    "named_json"
                ),
                Err(e) => debug!(
                    target: "springbok::rpc",
                    rpc = "ExecPlanFragment",
                    error = %e,
                    "named_json_failed"
                ),
            }
        }

        let exec_state = FragmentExecState::new(
            query_id,
            backend_num,
            finst_id,
            Arc::clone(&self.exec_env),
            coord,
        );
        exec_state.prepare(params)?;

        {
            let mut guard = self.fragment_map.lock().unwrap_or_else(|e| e.into_inner());
            guard.insert(finst_id, Arc::clone(&exec_state));
        }
        self.touch(finst_id);

        let mgr = Arc::clone(self);
        self.exec_env.fragment_pool().execute(move || {
            exec_state.exec();
            mgr.deregister(finst_id);
        });
        Ok(())
    }

    /// Cancels a fragment instance. Unknown instances are not an error:
    /// the fragment may have finished and deregistered already.
    pub fn cancel_plan_fragment(&self, fragment_instance_id: UniqueId) -> Status {
        let state = {
            let guard = self.fragment_map.lock().unwrap_or_else(|e| e.into_inner());
            guard.get(&fragment_instance_id).cloned()
        };
        match state {
            Some(state) => state.cancel(),
            None => Status::OK,
        }
    }

    pub fn get_fragment(&self, fragment_instance_id: UniqueId) -> Option<Arc<FragmentExecState>> {
        let guard = self.fragment_map.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(&fragment_instance_id).cloned()
    }

    pub fn num_running(&self) -> usize {
        let guard = self.fragment_map.lock().unwrap_or_else(|e| e.into_inner());
        guard.len()
    }

    /// Marks the fragment active now.
    pub fn touch(&self, fragment_instance_id: UniqueId) {
        let mut guard = self
            .expiration_data
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.insert(fragment_instance_id, Instant::now());
    }

    fn deregister(&self, fragment_instance_id: UniqueId) {
        {
            let mut guard = self.fragment_map.lock().unwrap_or_else(|e| e.into_inner());
            guard.remove(&fragment_instance_id);
        }
        let mut guard = self
            .expiration_data
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.remove(&fragment_instance_id);
    }

    // Collect expired ids under the expiration lock alone, then cancel
    // with no locks held.
    fn expiration_sweep(self: Arc<Self>) {
        while !self.sweep_stop.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_secs(1));
            let timeout_secs = config::idle_query_timeout_secs();
            if timeout_secs <= 0 {
                continue;
            }
            let timeout = Duration::from_secs(timeout_secs as u64);
            let expired: Vec<UniqueId> = {
                let guard = self
                    .expiration_data
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                guard
                    .iter()
                    .filter(|(_, last_active)| last_active.elapsed() > timeout)
                    .map(|(finst_id, _)| *finst_id)
                    .collect()
            };
            for finst_id in expired {
                info!(
                    target: "springbok::exec",
                    finst_id = %finst_id,
                    "cancelling idle fragment instance"
                );
                let _ = self.cancel_plan_fragment(finst_id);
            }
        }
    }
}

impl Drop for FragmentMgr {
    fn drop(&mut self) {
        self.sweep_stop.store(true, Ordering::Release);
    }
}

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
//! Explicit per-process runtime context. Everything that would otherwise
//! be a global singleton hangs off one `ExecEnv`; tests build a fresh one
//! per case.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use threadpool::ThreadPool;
use tracing::warn;

use crate::common::config;
use crate::common::types::UniqueId;
use crate::exec::data_stream::DataStreamMgr;
use crate::rpc::client_cache::ClientCache;
use crate::rpc::thrift_client::TlsContext;
use crate::runtime::mem_tracker::{MemTracker, NO_LIMIT};
use crate::runtime::periodic::PeriodicCounterUpdater;
use crate::runtime::thread_resource_mgr::ThreadResourceMgr;
use crate::wire::types::TNetworkAddress;

pub struct ExecEnv {
    backend_address: TNetworkAddress,
    process_mem_tracker: Arc<MemTracker>,
    query_mem_trackers: Mutex<HashMap<UniqueId, Weak<MemTracker>>>,
    periodic_updater: Arc<PeriodicCounterUpdater>,
    thread_mgr: Arc<ThreadResourceMgr>,
    fragment_pool: ThreadPool,
    client_cache: Arc<ClientCache>,
    stream_mgr: Arc<DataStreamMgr>,
}

impl ExecEnv {
    pub fn new(backend_address: TNetworkAddress) -> Arc<Self> {
        let tls = Self::load_tls_context();
        Arc::new(Self {
            backend_address,
            process_mem_tracker: MemTracker::new_root("Process", NO_LIMIT),
            query_mem_trackers: Mutex::new(HashMap::new()),
            periodic_updater: Arc::new(PeriodicCounterUpdater::new(Duration::from_millis(
                config::periodic_counter_update_period_ms(),
            ))),
            thread_mgr: ThreadResourceMgr::new(0),
            fragment_pool: ThreadPool::with_name(
                "fragment_exec".to_string(),
                config::fragment_exec_threads(),
            ),
            client_cache: ClientCache::new(tls),
            stream_mgr: DataStreamMgr::new(),
        })
    }

    fn load_tls_context() -> Option<Arc<TlsContext>> {
        let ca_path = config::ssl_client_ca_certificate();
        if ca_path.is_empty() {
            return None;
        }
        match TlsContext::from_ca_file(&ca_path) {
            Ok(ctx) => Some(Arc::new(ctx)),
            Err(e) => {
                warn!(
                    target: "springbok::rpc",
                    error = %e,
                    ca_path = %ca_path,
                    "failed to load client CA bundle, TLS disabled"
                );
                None
            }
        }
    }

    pub fn backend_address(&self) -> &TNetworkAddress {
        &self.backend_address
    }

    pub fn process_mem_tracker(&self) -> Arc<MemTracker> {
        Arc::clone(&self.process_mem_tracker)
    }

    pub fn periodic_updater(&self) -> Arc<PeriodicCounterUpdater> {
        Arc::clone(&self.periodic_updater)
    }

    pub fn thread_mgr(&self) -> Arc<ThreadResourceMgr> {
        Arc::clone(&self.thread_mgr)
    }

    pub fn fragment_pool(&self) -> &ThreadPool {
        &self.fragment_pool
    }

    pub fn client_cache(&self) -> Arc<ClientCache> {
        Arc::clone(&self.client_cache)
    }

    pub fn stream_mgr(&self) -> Arc<DataStreamMgr> {
        Arc::clone(&self.stream_mgr)
    }

    /// Query-wide tracker shared by every fragment instance of `query_id`
    /// on this node. Created under the process tracker on first use;
    /// subsequent instances attach to the live tracker.
    pub fn get_query_mem_tracker(&self, query_id: UniqueId, bytes_limit: i64) -> Arc<MemTracker> {
        let mut guard = self
            .query_mem_trackers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = guard.get(&query_id).and_then(|weak| weak.upgrade()) {
            return existing;
        }
        let tracker = MemTracker::new_child(
            format!("Query({query_id})"),
            bytes_limit,
            &self.process_mem_tracker,
        );
        guard.retain(|_, weak| weak.strong_count() > 0);
        guard.insert(query_id, Arc::downgrade(&tracker));
        tracker
    }
}

#[cfg(test)]
mod tests {
    use super::ExecEnv;
    use crate::common::types::UniqueId;
    use crate::wire::types::TNetworkAddress;

    #[test]
    fn query_mem_tracker_is_shared_per_query() {
        let env = ExecEnv::new(TNetworkAddress::new("localhost", 22000));
        let q1 = UniqueId::new(1, 1);
        let a = env.get_query_mem_tracker(q1, 1000);
        let b = env.get_query_mem_tracker(q1, 1000);
        assert!(std::sync::Arc::ptr_eq(&a, &b));

        let c = env.get_query_mem_tracker(UniqueId::new(2, 2), -1);
        assert!(!std::sync::Arc::ptr_eq(&a, &c));

        drop((a, b));
        let fresh = env.get_query_mem_tracker(q1, 1000);
        assert_eq!(fresh.consumption(), 0);
    }
}

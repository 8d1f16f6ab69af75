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
use crate::springbok_config::config as springbok_app_config;

pub(crate) fn max_errors() -> i32 {
    springbok_app_config()
        .ok()
        .map(|c| c.runtime.max_errors)
        .unwrap_or(100)
}

pub(crate) fn default_batch_size() -> i32 {
    springbok_app_config()
        .ok()
        .map(|c| c.runtime.batch_size)
        .unwrap_or(1024)
}

pub(crate) fn status_report_interval_secs() -> i64 {
    springbok_app_config()
        .ok()
        .map(|c| c.runtime.status_report_interval)
        .unwrap_or(5)
        .max(1)
}

pub(crate) fn periodic_counter_update_period_ms() -> u64 {
    springbok_app_config()
        .ok()
        .map(|c| c.runtime.periodic_counter_update_period_ms)
        .unwrap_or(500)
        .max(1)
}

pub(crate) fn fragment_exec_threads() -> usize {
    springbok_app_config()
        .ok()
        .map(|c| c.runtime.actual_fragment_exec_threads())
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
}

pub(crate) fn idle_query_timeout_secs() -> i64 {
    springbok_app_config()
        .ok()
        .map(|c| c.runtime.idle_query_timeout)
        .unwrap_or(0)
}

pub(crate) fn ssl_client_ca_certificate() -> String {
    springbok_app_config()
        .ok()
        .map(|c| c.security.ssl_client_ca_certificate.clone())
        .unwrap_or_default()
}

pub(crate) fn pool_whitelist_path() -> String {
    springbok_app_config()
        .ok()
        .map(|c| c.scheduler.pool_whitelist_path.clone())
        .unwrap_or_default()
}

pub(crate) fn debug_exec_params_json() -> bool {
    springbok_app_config()
        .ok()
        .map(|c| c.debug.exec_params_json)
        .unwrap_or(false)
}

pub(crate) fn backend_port() -> u16 {
    springbok_app_config()
        .ok()
        .map(|c| c.server.backend_port)
        .unwrap_or(22000)
}

pub(crate) fn server_workers() -> usize {
    springbok_app_config()
        .ok()
        .map(|c| c.server.server_workers)
        .unwrap_or(4)
        .max(1)
}

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
use std::sync::Arc;
use std::time::Duration;

use springbok::scheduler::statestore::StatestoreSubscriber;
use springbok::service::coordinator::CoordinatorRegistry;
use springbok::service::fragment_mgr::FragmentMgr;
use springbok::service::internal_service::{InternalService, start_internal_service};
use springbok::wire::types::TNetworkAddress;
use springbok::{ExecEnv, SimpleScheduler, springbok_config, springbok_logging};

fn main() {
    let config = match springbok_config::init_from_env_or_default() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("springbokd: {e}");
            std::process::exit(1);
        }
    };
    match &config.log_filter {
        Some(filter) => springbok_logging::init_with_level(filter),
        None => springbok_logging::init_with_level(&config.log_level),
    }

    let hostname = if config.server.host == "0.0.0.0" {
        hostname_or_localhost()
    } else {
        config.server.host.clone()
    };
    let backend_address = TNetworkAddress::new(hostname, config.server.backend_port as i32);

    let exec_env = ExecEnv::new(backend_address.clone());
    let fragment_mgr = FragmentMgr::new(Arc::clone(&exec_env));
    let coordinators = CoordinatorRegistry::new();
    let service = InternalService::new(fragment_mgr, coordinators);

    let subscriber = StatestoreSubscriber::new(format!("{backend_address}"));
    let scheduler = SimpleScheduler::new_dynamic(
        subscriber,
        format!("{backend_address}"),
        backend_address.clone(),
        None,
    );
    if let Err(e) = scheduler.init() {
        tracing::error!(target: "springbok::scheduler", error = %e, "scheduler init failed");
        std::process::exit(1);
    }

    if let Err(e) = start_internal_service(
        service,
        &config.server.host,
        config.server.backend_port,
        config.server.server_workers,
    ) {
        tracing::error!(target: "springbok::rpc", error = %e, "internal service start failed");
        std::process::exit(1);
    }

    tracing::info!(
        target: "springbok::server",
        backend = %backend_address,
        "springbokd started"
    );

    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}

fn hostname_or_localhost() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

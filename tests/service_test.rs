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
//! End-to-end fragment execution over the loopback internal service.

use std::collections::HashMap;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use springbok::scheduler::query_schedule::{QueryExecRequest, QuerySchedule};
use springbok::scheduler::simple_scheduler::SimpleScheduler;
use springbok::service::coordinator::{Coordinator, CoordinatorRegistry};
use springbok::service::fragment_mgr::FragmentMgr;
use springbok::service::internal_service::{InternalService, start_internal_service};
use springbok::wire::internal_service::{
    TDataSink, TPlan, TPlanFragment, TPlanNode, TPlanNodeType,
};
use springbok::wire::types::{TNetworkAddress, TScanRange, TScanRangeLocations};
use springbok::{ExecEnv, Status, UniqueId};

mod common;

struct TestBackend {
    exec_env: Arc<ExecEnv>,
    coordinators: Arc<CoordinatorRegistry>,
    fragment_mgr: Arc<FragmentMgr>,
    address: TNetworkAddress,
}

fn pick_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

fn start_backend() -> TestBackend {
    let port = pick_port();
    let address = TNetworkAddress::new("127.0.0.1", port as i32);
    let exec_env = ExecEnv::new(address.clone());
    let fragment_mgr = FragmentMgr::new(Arc::clone(&exec_env));
    let coordinators = CoordinatorRegistry::new();
    let service = InternalService::new(Arc::clone(&fragment_mgr), Arc::clone(&coordinators));
    start_internal_service(service, "127.0.0.1", port, 4).expect("start service");
    assert!(
        common::wait_for(
            || TcpStream::connect(("127.0.0.1", port)).is_ok(),
            Duration::from_secs(5)
        ),
        "internal service did not come up"
    );
    TestBackend {
        exec_env,
        coordinators,
        fragment_mgr,
        address,
    }
}

fn scan_fragment(sink: TDataSink) -> TPlanFragment {
    TPlanFragment {
        display_name: "scan-fragment".to_string(),
        plan: Some(TPlan {
            nodes: vec![TPlanNode::new(0, TPlanNodeType::ScanNode, 0)],
        }),
        output_sink: Some(sink),
    }
}

fn exchange_fragment(node_id: i32, sink: TDataSink) -> TPlanFragment {
    TPlanFragment {
        display_name: "exchange-fragment".to_string(),
        plan: Some(TPlan {
            nodes: vec![TPlanNode::new(node_id, TPlanNodeType::ExchangeNode, 0)],
        }),
        output_sink: Some(sink),
    }
}

fn single_scan_request(payload: &[u8], host: &TNetworkAddress) -> QueryExecRequest {
    let mut per_node_scan_ranges = HashMap::new();
    per_node_scan_ranges.insert(
        0,
        vec![TScanRangeLocations {
            scan_range: TScanRange::new(payload.to_vec()),
            hosts: vec![host.clone()],
        }],
    );
    QueryExecRequest {
        fragments: vec![scan_fragment(TDataSink::result_sink())],
        per_node_scan_ranges,
        query_ctx: common::test_query_ctx("henry"),
        per_host_mem_estimate: 0,
        per_host_vcores: 0,
    }
}

#[test]
fn single_fragment_query_runs_to_completion() {
    let _cfg = common::TestConfig::new().expect("test config");
    let backend = start_backend();

    let scheduler = SimpleScheduler::new_static(vec![backend.address.clone()], None);
    let request = single_scan_request(b"r1\nr2\nr3\n", &backend.address);
    let mut schedule = QuerySchedule::new(common::unique_query_id("single_fragment"), request);

    scheduler
        .schedule(Arc::new(NoopCancel), &mut schedule)
        .expect("schedule");
    let coordinator = Coordinator::new(Arc::clone(&backend.exec_env), schedule);
    backend.coordinators.register(Arc::clone(&coordinator));

    coordinator.exec().expect("dispatch");
    let status = coordinator.wait(Duration::from_secs(20));
    assert!(status.ok(), "query failed: {status}");

    // The reported instance profile carries the scan's row count.
    let profile = coordinator.query_profile();
    let exec_profile = profile
        .get_child("Execution Profile")
        .expect("execution profile");
    let instances = exec_profile.children();
    assert_eq!(instances.len(), 1);
    let rows = instances[0]
        .get_counter("RowsProduced")
        .expect("RowsProduced");
    assert_eq!(rows.value(), 3);

    backend.coordinators.deregister(coordinator.query_id());
}

#[test]
fn blocked_query_is_cancelled_end_to_end() {
    let _cfg = common::TestConfig::new().expect("test config");
    let backend = start_backend();

    // One exchange fragment with a sender that never shows up: open()
    // blocks in the exchange source until cancellation arrives.
    let request = QueryExecRequest {
        fragments: vec![exchange_fragment(10, TDataSink::result_sink())],
        per_node_scan_ranges: HashMap::new(),
        query_ctx: common::test_query_ctx("henry"),
        per_host_mem_estimate: 0,
        per_host_vcores: 0,
    };
    let scheduler = SimpleScheduler::new_static(vec![backend.address.clone()], None);
    let mut schedule = QuerySchedule::new(common::unique_query_id("blocked_cancel"), request);
    scheduler
        .schedule(Arc::new(NoopCancel), &mut schedule)
        .expect("schedule");

    let coordinator = Coordinator::new(Arc::clone(&backend.exec_env), schedule);
    backend.coordinators.register(Arc::clone(&coordinator));
    coordinator.exec().expect("dispatch");

    assert!(
        common::wait_for(|| backend.fragment_mgr.num_running() == 1, Duration::from_secs(5)),
        "fragment did not start"
    );

    coordinator.cancel(&Status::cancelled());
    let status = coordinator.wait(Duration::from_secs(20));
    assert!(status.is_cancelled(), "expected cancellation, got {status}");
    assert!(
        common::wait_for(|| backend.fragment_mgr.num_running() == 0, Duration::from_secs(10)),
        "fragment did not tear down"
    );

    backend.coordinators.deregister(coordinator.query_id());
}

#[test]
fn cancel_unknown_fragment_is_ok() {
    let backend = start_backend();
    let status = backend
        .fragment_mgr
        .cancel_plan_fragment(UniqueId::new(42, 4242));
    assert!(status.ok());
}

struct NoopCancel;

impl springbok::scheduler::simple_scheduler::QueryCancelHandle for NoopCancel {
    fn query_id(&self) -> UniqueId {
        UniqueId::new(0, 0)
    }

    fn cancel_query(&self, _cause: &Status) {}
}

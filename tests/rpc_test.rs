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
//! RPC client lifecycle: open-with-retry and reopen-on-transport-failure.

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thrift::protocol::{TBinaryInputProtocol, TBinaryOutputProtocol};
use thrift::server::TProcessor;
use thrift::transport::{TBufferedReadTransport, TBufferedWriteTransport};

use springbok::rpc::client_cache::InternalServiceClient;
use springbok::rpc::thrift_client::ThriftClient;
use springbok::scheduler::query_schedule::{QueryExecRequest, QuerySchedule};
use springbok::service::coordinator::{Coordinator, CoordinatorRegistry};
use springbok::service::fragment_mgr::FragmentMgr;
use springbok::service::internal_service::{InternalService, InternalServiceProcessor};
use springbok::wire::internal_service::{
    INTERNAL_SERVICE_VERSION_V1, TDataSink, TPlan, TPlanFragment, TPlanNode, TPlanNodeType,
    TReportExecStatusParams,
};
use springbok::wire::types::{TNetworkAddress, TScanRange, TScanRangeLocations};
use springbok::{ExecEnv, Status, UniqueId};

mod common;

#[test]
fn open_with_retry_is_bounded() {
    // Nothing listens on the freshly released port: with num_tries > 0
    // the client gives up after that many attempts.
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let mut client = ThriftClient::new(TNetworkAddress::new("127.0.0.1", port as i32), None);
    let start = Instant::now();
    let result = client.open_with_retry(3, 20);
    assert!(result.is_err());
    // Two sleeps between three attempts.
    assert!(start.elapsed() >= Duration::from_millis(40));
    assert!(!client.is_open());
    client.close();
}

#[test]
fn open_with_retry_zero_retries_until_success() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    // Listener appears only after a few failed attempts.
    let opener = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        TcpListener::bind(("127.0.0.1", port)).expect("rebind")
    });

    let mut client = ThriftClient::new(TNetworkAddress::new("127.0.0.1", port as i32), None);
    client
        .open_with_retry(0, 20)
        .expect("indefinite retry succeeds once the listener is up");
    assert!(client.is_open());
    client.close();
    let _listener = opener.join().expect("listener thread");
}

fn scan_only_schedule(query_id: UniqueId, host: &TNetworkAddress) -> QuerySchedule {
    let mut per_node_scan_ranges = HashMap::new();
    per_node_scan_ranges.insert(
        0,
        vec![TScanRangeLocations {
            scan_range: TScanRange::new(b"row\n".to_vec()),
            hosts: vec![host.clone()],
        }],
    );
    let request = QueryExecRequest {
        fragments: vec![TPlanFragment {
            display_name: "scan-fragment".to_string(),
            plan: Some(TPlan {
                nodes: vec![TPlanNode::new(0, TPlanNodeType::ScanNode, 0)],
            }),
            output_sink: Some(TDataSink::result_sink()),
        }],
        per_node_scan_ranges,
        query_ctx: common::test_query_ctx("henry"),
        per_host_mem_estimate: 0,
        per_host_vcores: 0,
    };
    let mut schedule = QuerySchedule::new(query_id, request);
    let scheduler = springbok::SimpleScheduler::new_static(vec![host.clone()], None);
    scheduler
        .schedule(Arc::new(NoopCancel), &mut schedule)
        .expect("schedule");
    schedule
}

/// The reporter retry discipline: a dropped connection produces one
/// reopen and one retry, and the coordinator sees exactly one report.
#[test]
fn report_exec_status_retries_once_after_transport_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let address = TNetworkAddress::new("127.0.0.1", port as i32);

    let exec_env = ExecEnv::new(address.clone());
    let fragment_mgr = FragmentMgr::new(Arc::clone(&exec_env));
    let coordinators = CoordinatorRegistry::new();
    let service = InternalService::new(fragment_mgr, Arc::clone(&coordinators));

    let query_id = common::unique_query_id("report_retry");
    let schedule = scan_only_schedule(query_id, &address);
    let finst_id = schedule.fragment_exec_params()[0].instance_ids[0];
    let coordinator = Coordinator::new(Arc::clone(&exec_env), schedule);
    coordinators.register(Arc::clone(&coordinator));

    // First accepted connection is dropped on the floor; the second one
    // is served for real.
    let server = std::thread::spawn(move || {
        let (first, _) = listener.accept().expect("first accept");
        drop(first);

        let (stream, _) = listener.accept().expect("second accept");
        let read_stream = stream.try_clone().expect("clone stream");
        let mut i_prot = TBinaryInputProtocol::new(TBufferedReadTransport::new(read_stream), true);
        let mut o_prot = TBinaryOutputProtocol::new(TBufferedWriteTransport::new(stream), true);
        let processor = InternalServiceProcessor::new(service);
        processor
            .process(&mut i_prot, &mut o_prot)
            .expect("serve one call");
    });

    let mut client = InternalServiceClient::new(address.clone(), None);
    client.open().expect("open");

    let params = TReportExecStatusParams {
        protocol_version: INTERNAL_SERVICE_VERSION_V1,
        query_id: Some(query_id.into()),
        backend_num: Some(0),
        fragment_instance_id: Some(finst_id.into()),
        status: Some(Status::OK.to_thrift()),
        done: Some(true),
        profile: None,
        error_log: None,
        insert_exec_status: None,
    };

    // First call rides the dead connection.
    let first = client.report_exec_status(&params);
    let err = first.expect_err("connection was dropped");
    assert!(err.is_transport());

    client.reopen().expect("reopen");
    let second = client
        .report_exec_status(&params)
        .expect("retry after reopen");
    let status = second.status.map(|s| Status::from_thrift(&s)).expect("status");
    assert!(status.ok());

    // Exactly one report was applied: the lone instance is done.
    assert!(coordinator.wait(Duration::from_secs(5)).ok());
    server.join().expect("server thread");
}

/// Dispatch rides the client cache: the first pooled connection dies, the
/// failing call drops it, and `Coordinator::exec` retries once after a
/// reopen. The query still runs to completion.
#[test]
fn coordinator_exec_retries_after_transport_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let address = TNetworkAddress::new("127.0.0.1", port as i32);

    let exec_env = ExecEnv::new(address.clone());
    let fragment_mgr = FragmentMgr::new(Arc::clone(&exec_env));
    let coordinators = CoordinatorRegistry::new();
    let service = InternalService::new(fragment_mgr, Arc::clone(&coordinators));

    let query_id = common::unique_query_id("coordinator_retry");
    let schedule = scan_only_schedule(query_id, &address);
    let coordinator = Coordinator::new(Arc::clone(&exec_env), schedule);
    coordinators.register(Arc::clone(&coordinator));

    // First accepted connection is dropped on the floor; every later one
    // (the dispatch retry, then the fragment's status reports) is served.
    std::thread::spawn(move || {
        let (first, _) = listener.accept().expect("first accept");
        drop(first);

        while let Ok((stream, _)) = listener.accept() {
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                let read_stream = stream.try_clone().expect("clone stream");
                let mut i_prot =
                    TBinaryInputProtocol::new(TBufferedReadTransport::new(read_stream), true);
                let mut o_prot =
                    TBinaryOutputProtocol::new(TBufferedWriteTransport::new(stream), true);
                let processor = InternalServiceProcessor::new(service);
                while processor.process(&mut i_prot, &mut o_prot).is_ok() {}
            });
        }
    });

    coordinator.exec().expect("dispatch succeeds after one retry");
    let status = coordinator.wait(Duration::from_secs(20));
    assert!(status.ok(), "query failed: {status}");
    coordinators.deregister(coordinator.query_id());
}

struct NoopCancel;

impl springbok::scheduler::simple_scheduler::QueryCancelHandle for NoopCancel {
    fn query_id(&self) -> UniqueId {
        UniqueId::new(0, 0)
    }

    fn cancel_query(&self, _cause: &Status) {}
}

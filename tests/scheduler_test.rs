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
//! Integration tests for scan-range assignment and membership handling.

use std::collections::HashMap;

use springbok::common::thrift_codec::thrift_binary_serialize;
use springbok::scheduler::query_schedule::{QueryExecRequest, QuerySchedule};
use springbok::scheduler::simple_scheduler::{MEMBERSHIP_TOPIC, SimpleScheduler};
use springbok::scheduler::statestore::{
    StatestoreSubscriber, TopicDelta, TopicDeltaMap, TopicEntry,
};
use springbok::wire::internal_service::{
    TDataSink, TPlan, TPlanFragment, TPlanNode, TPlanNodeType,
};
use springbok::wire::types::{
    TBackendDescriptor, TNetworkAddress, TScanRange, TScanRangeLocations,
};

mod common;

fn backend(host: &str, port: i32) -> TBackendDescriptor {
    TBackendDescriptor {
        address: TNetworkAddress::new(host, port),
        ip_address: host.to_string(),
        is_coordinator: None,
    }
}

fn membership_delta(backends: &[(&str, TBackendDescriptor)], deleted: &[&str]) -> TopicDeltaMap {
    let mut entries: Vec<TopicEntry> = backends
        .iter()
        .map(|(key, descriptor)| TopicEntry {
            key: key.to_string(),
            value: thrift_binary_serialize(descriptor).expect("serialize descriptor"),
            deleted: false,
        })
        .collect();
    entries.extend(deleted.iter().map(|key| TopicEntry {
        key: key.to_string(),
        value: Vec::new(),
        deleted: true,
    }));
    let mut deltas = HashMap::new();
    deltas.insert(
        MEMBERSHIP_TOPIC.to_string(),
        TopicDelta {
            topic_name: MEMBERSHIP_TOPIC.to_string(),
            entries,
            is_delta: true,
        },
    );
    deltas
}

fn locations(hosts: &[&str]) -> TScanRangeLocations {
    TScanRangeLocations {
        scan_range: TScanRange::new(b"range".to_vec()),
        hosts: hosts
            .iter()
            .map(|h| TNetworkAddress::new(*h, 20500))
            .collect(),
    }
}

fn dynamic_scheduler_with_backends(
    hosts: &[(&str, &str)],
) -> (std::sync::Arc<SimpleScheduler>, std::sync::Arc<StatestoreSubscriber>) {
    let subscriber = StatestoreSubscriber::new("test-subscriber");
    let scheduler = SimpleScheduler::new_dynamic(
        subscriber.clone(),
        "coordinator",
        TNetworkAddress::new("coordinator-host", 22000),
        None,
    );
    scheduler.init().expect("scheduler init");
    let backends: Vec<(&str, TBackendDescriptor)> = hosts
        .iter()
        .map(|(key, host)| (*key, backend(host, 22000)))
        .collect();
    subscriber.deliver(&membership_delta(&backends, &[]));
    (scheduler, subscriber)
}

#[test]
fn local_assignment_prefers_range_hosts() {
    let (scheduler, _subscriber) =
        dynamic_scheduler_with_backends(&[("b1", "hostA"), ("b2", "hostB"), ("b3", "hostC")]);

    let chosen = scheduler
        .get_backend(&TNetworkAddress::new("hostA", 20500))
        .expect("assignment");
    assert_eq!(chosen.address.hostname, "hostA");
    assert_eq!(scheduler.total_assignments(), 1);
    assert_eq!(scheduler.total_local_assignments(), 1);
}

#[test]
fn non_local_assignment_round_robins() {
    let (scheduler, _subscriber) =
        dynamic_scheduler_with_backends(&[("b1", "hostA"), ("b2", "hostB"), ("b3", "hostC")]);

    // hostD is unknown, so assignments walk all backends fairly.
    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..9 {
        let chosen = scheduler
            .get_backend(&TNetworkAddress::new("hostD", 20500))
            .expect("assignment");
        *counts.entry(chosen.address.hostname).or_insert(0) += 1;
    }
    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|count| *count == 3));
    assert_eq!(scheduler.total_assignments(), 9);
    assert_eq!(scheduler.total_local_assignments(), 0);
}

#[test]
fn membership_change_resets_round_robin() {
    let (scheduler, subscriber) =
        dynamic_scheduler_with_backends(&[("b1", "hostA"), ("b2", "hostB"), ("b3", "hostC")]);

    // Advance the cursor off the beginning.
    let first = scheduler
        .get_backend(&TNetworkAddress::new("hostZ", 20500))
        .expect("assignment");
    assert_eq!(first.address.hostname, "hostA");

    // Removing b1 rebuilds the maps; the next non-local assignment starts
    // from the beginning of the new backend list.
    subscriber.deliver(&membership_delta(&[], &["b1"]));
    let next = scheduler
        .get_backend(&TNetworkAddress::new("hostZ", 20500))
        .expect("assignment");
    assert_eq!(next.address.hostname, "hostB");
}

#[test]
fn removed_backend_no_longer_assigned() {
    let (scheduler, subscriber) =
        dynamic_scheduler_with_backends(&[("b1", "hostA"), ("b2", "hostB")]);
    assert!(scheduler.has_local_backend(&TNetworkAddress::new("hostA", 20500)));

    subscriber.deliver(&membership_delta(&[], &["b1"]));
    assert!(!scheduler.has_local_backend(&TNetworkAddress::new("hostA", 20500)));
    for _ in 0..4 {
        let chosen = scheduler
            .get_backend(&TNetworkAddress::new("hostA", 20500))
            .expect("assignment");
        assert_eq!(chosen.address.hostname, "hostB");
    }
}

#[test]
fn scan_range_assignment_mixes_local_and_remote() {
    let (scheduler, _subscriber) =
        dynamic_scheduler_with_backends(&[("b1", "hostA"), ("b2", "hostB"), ("b3", "hostC")]);

    let mut assignment = HashMap::new();
    scheduler
        .compute_scan_range_assignment(
            0,
            &[locations(&["hostA", "hostB"]), locations(&["hostD"])],
            false,
            &mut assignment,
        )
        .expect("assignment");

    assert_eq!(scheduler.total_assignments(), 2);
    assert_eq!(scheduler.total_local_assignments(), 1);
    let total_ranges: usize = assignment
        .values()
        .flat_map(|by_node| by_node.values())
        .map(|ranges| ranges.len())
        .sum();
    assert_eq!(total_ranges, 2);
    // The local range landed on hostA.
    assert!(
        assignment
            .get(&TNetworkAddress::new("hostA", 22000))
            .is_some()
    );
}

fn scan_fragment(node_id: i32) -> TPlanFragment {
    TPlanFragment {
        display_name: format!("scan-fragment-{node_id}"),
        plan: Some(TPlan {
            nodes: vec![TPlanNode::new(node_id, TPlanNodeType::ScanNode, 0)],
        }),
        output_sink: Some(TDataSink::stream_sink(10)),
    }
}

fn coordinator_fragment() -> TPlanFragment {
    TPlanFragment {
        display_name: "coordinator-fragment".to_string(),
        plan: Some(TPlan {
            nodes: vec![TPlanNode::new(10, TPlanNodeType::ExchangeNode, 0)],
        }),
        output_sink: Some(TDataSink::result_sink()),
    }
}

struct NoopCancel;

impl springbok::scheduler::simple_scheduler::QueryCancelHandle for NoopCancel {
    fn query_id(&self) -> springbok::UniqueId {
        springbok::UniqueId::new(0, 0)
    }

    fn cancel_query(&self, _cause: &springbok::Status) {}
}

#[test]
fn schedule_places_fragments_and_destinations() {
    let scheduler = SimpleScheduler::new_static(
        vec![
            TNetworkAddress::new("hostA", 22000),
            TNetworkAddress::new("hostB", 22000),
        ],
        None,
    );

    let mut per_node_scan_ranges = HashMap::new();
    per_node_scan_ranges.insert(
        0,
        vec![locations(&["hostA"]), locations(&["hostB"])],
    );
    let request = QueryExecRequest {
        fragments: vec![coordinator_fragment(), scan_fragment(0)],
        per_node_scan_ranges,
        query_ctx: common::test_query_ctx("henry"),
        per_host_mem_estimate: 128 * 1024 * 1024,
        per_host_vcores: 2,
    };

    let mut schedule = QuerySchedule::new(common::unique_query_id("schedule_places"), request);
    scheduler
        .schedule(std::sync::Arc::new(NoopCancel), &mut schedule)
        .expect("schedule");

    let params = schedule.fragment_exec_params();
    // Coordinator fragment has no scan source: pinned to the coordinator.
    assert_eq!(params[0].hosts.len(), 1);
    // Scan fragment runs on both data hosts, one instance each.
    assert_eq!(params[1].hosts.len(), 2);
    assert_eq!(params[1].instance_ids.len(), 2);

    // The scan fragment's sink feeds the coordinator fragment's exchange.
    assert_eq!(params[1].destinations.len(), params[0].instance_ids.len());
    assert_eq!(params[0].per_exch_num_senders.get(&10), Some(&2));
    assert_eq!(schedule.num_fragment_instances(), 3);
}

#[test]
fn pool_authorization_follows_whitelist() {
    // No whitelist configured: any pool request is rejected, and there is
    // no fallback pool.
    let scheduler = SimpleScheduler::new_static(vec![TNetworkAddress::new("hostA", 22000)], None);
    let err = scheduler
        .resolve_request_pool("henry", None)
        .expect_err("no pools configured");
    assert!(matches!(
        err.code(),
        springbok::wire::status::TStatusCode::PermissionDenied
    ));
}

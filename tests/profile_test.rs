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
//! Integration tests for the runtime profile tree.

use springbok::RuntimeProfile;
use springbok::wire::metrics::TCounterType;

mod common;

#[test]
fn merge_sums_counters_with_identical_path() {
    let p1 = RuntimeProfile::new("query");
    p1.add_counter("A", TCounterType::Unit).update(10);
    p1.add_counter("B", TCounterType::TimeNs)
        .update(2_000_000_000);

    let p2 = RuntimeProfile::new("query");
    p2.add_counter("A", TCounterType::Unit).update(5);
    p2.add_counter("B", TCounterType::TimeNs)
        .update(1_000_000_000);
    p2.add_counter("C", TCounterType::Unit).update(7);

    p1.merge(&p2);

    assert_eq!(p1.get_counter("A").expect("A").value(), 15);
    assert_eq!(p1.get_counter("B").expect("B").value(), 3_000_000_000);
    assert_eq!(p1.get_counter("C").expect("C").value(), 7);
}

#[test]
fn merge_preserves_first_seen_info_strings() {
    let p1 = RuntimeProfile::new("query");
    p1.add_info_string("Table", "lineitem");

    let p2 = RuntimeProfile::new("query");
    p2.add_info_string("Table", "orders");
    p2.add_info_string("Format", "parquet");

    p1.merge(&p2);
    assert_eq!(p1.get_info_string("Table").as_deref(), Some("lineitem"));
    assert_eq!(p1.get_info_string("Format").as_deref(), Some("parquet"));
}

#[test]
fn high_water_mark_sequence() {
    let profile = RuntimeProfile::new("node");
    let hwm = profile.add_high_water_mark_counter("PeakMem", TCounterType::Bytes, "");
    hwm.update(3);
    hwm.update(2);
    hwm.update(-4);
    hwm.update(1);
    assert_eq!(hwm.current_value(), 2);
    assert_eq!(hwm.value(), 5);
}

#[test]
fn counters_are_looked_up_by_identity() {
    let profile = RuntimeProfile::new("node");
    let a = profile.add_counter("Rows", TCounterType::Unit);
    let again = profile.add_counter("Rows", TCounterType::Unit);
    assert!(std::sync::Arc::ptr_eq(&a, &again));

    let looked_up = profile.get_counter("Rows").expect("Rows");
    assert!(std::sync::Arc::ptr_eq(&a, &looked_up));
    assert!(profile.get_counter("NoSuchCounter").is_none());
}

#[test]
fn thrift_round_trip_is_identity_up_to_values() {
    let root = RuntimeProfile::new("query");
    root.add_counter("RowsReturned", TCounterType::Unit).set(42);
    root.set_metadata(17);

    let scan = RuntimeProfile::new("SCAN");
    scan.add_counter("BytesRead", TCounterType::Bytes).set(4096);
    scan.add_counter("ScanRanges", TCounterType::Unit).set(3);
    scan.add_info_string("Table", "lineitem");
    root.add_child(scan, true);

    let agg = RuntimeProfile::new("AGG");
    agg.add_counter("GroupsReturned", TCounterType::Unit).set(9);
    root.add_child(agg, true);

    let rebuilt = RuntimeProfile::create_from_thrift(&root.to_thrift()).expect("rebuild");
    assert_eq!(rebuilt.name(), "query");
    assert_eq!(rebuilt.metadata(), 17);
    assert_eq!(
        rebuilt.get_counter("RowsReturned").expect("counter").value(),
        42
    );
    let children = rebuilt.children();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].name(), "SCAN");
    assert_eq!(children[1].name(), "AGG");
    assert_eq!(
        children[0].get_info_string("Table").as_deref(),
        Some("lineitem")
    );
}

#[test]
fn archive_round_trip_is_lossless() {
    let root = RuntimeProfile::new("query");
    root.add_info_string("Query State", "FINISHED");
    let timeline = root.add_event_sequence("Query Timeline");
    timeline.mark_event("Planning finished");
    timeline.mark_event("Rows available");

    for (child_name, rows) in [("hdfs-scan", 100i64), ("agg", 10)] {
        let child = RuntimeProfile::new(child_name);
        child.add_counter("RowsReturned", TCounterType::Unit).set(rows);
        child
            .add_counter("PeakMemoryUsage", TCounterType::Bytes)
            .set(rows * 1024);
        child
            .add_counter("TotalReadThroughput", TCounterType::BytesPerSecond)
            .set(rows * 7);
        child.add_info_string("ExecOption", "Codegen Enabled");
        root.add_child(child, true);
    }

    let archive = root.serialize_to_archive_string().expect("archive");
    let rebuilt = RuntimeProfile::from_archive_string(&archive).expect("unarchive");

    assert_eq!(rebuilt.name(), "query");
    assert_eq!(
        rebuilt.get_info_string("Query State").as_deref(),
        Some("FINISHED")
    );
    let children = rebuilt.children();
    assert_eq!(children.len(), 2);
    assert_eq!(
        children[0]
            .get_counter("RowsReturned")
            .expect("rows")
            .value(),
        100
    );
    assert_eq!(
        children[1]
            .get_counter("PeakMemoryUsage")
            .expect("peak")
            .value(),
        10 * 1024
    );
    let events = rebuilt
        .get_event_sequence("Query Timeline")
        .expect("timeline")
        .events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, "Planning finished");
    assert!(events[0].1 <= events[1].1);
}

#[test]
fn update_overwrites_and_leaves_extra_children_intact() {
    let reported = RuntimeProfile::new("instance");
    reported.add_counter("RowsProduced", TCounterType::Unit).set(5);
    let reported_child = RuntimeProfile::new("SCAN");
    reported_child
        .add_counter("BytesRead", TCounterType::Bytes)
        .set(100);
    reported.add_child(reported_child, true);
    let tree = reported.to_thrift();

    let local = RuntimeProfile::new("instance");
    let extra = RuntimeProfile::new("LocalOnly");
    local.add_child(extra, true);
    local.add_counter("RowsProduced", TCounterType::Unit).set(1);

    local.update(&tree);

    assert_eq!(
        local.get_counter("RowsProduced").expect("rows").value(),
        5
    );
    // Missing children created, extras untouched.
    assert!(local.get_child("SCAN").is_some());
    assert!(local.get_child("LocalOnly").is_some());
}

#[test]
fn pretty_print_renders_counters_and_info_strings() {
    let root = RuntimeProfile::new("query");
    root.add_info_string("Query Type", "SELECT");
    root.add_counter("RowsReturned", TCounterType::Unit).set(1500);
    let child = RuntimeProfile::new("SCAN");
    child.add_counter("BytesRead", TCounterType::Bytes).set(2048);
    root.add_child(child, true);

    let mut out = String::new();
    root.pretty_print(&mut out, "");

    assert!(out.contains("query:("));
    assert!(out.contains("Query Type: SELECT"));
    assert!(out.contains("- RowsReturned: 1.50K"));
    assert!(out.contains("- BytesRead: 2.00 KB"));
    // Indented child appears after the parent.
    assert!(out.find("query:(").expect("root") < out.find("SCAN:(").expect("child"));
}

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
//! Integration tests for runtime components (state, trackers, exec env).

use std::sync::Arc;

use springbok::wire::internal_service::{TQueryCtx, TQueryOptions};
use springbok::wire::types::TNetworkAddress;
use springbok::{CancelledCause, ExecEnv, RuntimeState, Status, UniqueId};

mod common;

fn state_with_options(options: TQueryOptions, env: Option<Arc<ExecEnv>>) -> RuntimeState {
    let ctx = TQueryCtx {
        query_options: Some(options),
        now_string: "2014-06-01 08:30:00".to_string(),
        user: "henry".to_string(),
    };
    RuntimeState::new(
        common::unique_query_id("runtime_test"),
        UniqueId::new(7, 8),
        &ctx,
        env,
    )
    .expect("runtime state")
}

#[test]
fn mem_limit_exceeded_scenario() {
    let _cfg = common::TestConfig::new().expect("test config");
    // Query limit 100: an instance that holds 60 and asks for 50 more
    // trips the limit; a second call returns the same sticky status.
    let mut state = state_with_options(TQueryOptions::default(), None);
    state.init_mem_trackers(100);
    let instance = state.instance_mem_tracker().expect("instance tracker");

    instance.consume(60);
    assert!(state.check_query_state().ok());
    assert!(!instance.try_consume(50));

    let first = state.set_mem_limit_exceeded(Some(&instance), 50);
    assert!(first.is_mem_limit_exceeded());
    let second = state.set_mem_limit_exceeded(Some(&instance), 50);
    assert_eq!(first, second);

    assert!(!state.error_log_is_empty());
    assert!(state.error_log().contains("Memory Limit Exceeded"));
    assert_eq!(state.cancelled_cause(), Some(CancelledCause::MemLimit));
}

#[test]
fn error_log_capacity_and_watermark() {
    let state = state_with_options(
        TQueryOptions {
            max_errors: Some(4),
            ..Default::default()
        },
        None,
    );

    for idx in 0..10 {
        state.log_error(format!("parse error in row {idx}"));
    }
    assert_eq!(state.error_log().lines().count(), 4);

    let mut reported = Vec::new();
    state.get_unreported_errors(&mut reported);
    assert_eq!(reported.len(), 4);

    let mut again = Vec::new();
    state.get_unreported_errors(&mut again);
    assert!(again.is_empty());
}

#[test]
fn file_errors_aggregate_by_file() {
    let state = state_with_options(TQueryOptions::default(), None);
    state.report_file_errors("/data/part-00000", 3);
    state.report_file_errors("/data/part-00007", 1);
    let rendered = state.file_errors();
    assert!(rendered.contains("3 errors in /data/part-00000"));
    assert!(rendered.contains("1 errors in /data/part-00007"));
}

#[test]
fn cancellation_is_a_single_flag() {
    let state = state_with_options(TQueryOptions::default(), None);
    assert!(!state.is_cancelled());
    assert_eq!(state.cancelled_cause(), None);
    state.set_cancelled();
    assert!(state.is_cancelled());
    assert_eq!(state.cancelled_cause(), Some(CancelledCause::User));
    // Cancellation is not reported through check_query_state: callers
    // disambiguate via cancelled_cause.
    assert!(state.check_query_state().ok());
}

#[test]
fn query_status_first_error_wins() {
    let state = state_with_options(TQueryOptions::default(), None);
    let boom = Status::internal_error("boom");
    assert_eq!(state.update_query_status(&boom), boom);
    assert_eq!(state.update_query_status(&Status::cancelled()), boom);
    assert_eq!(state.update_query_status(&Status::OK), boom);
    assert!(!state.query_status().ok());
}

#[test]
fn instance_trackers_share_the_query_tracker() {
    let env = ExecEnv::new(TNetworkAddress::new("localhost", 22000));
    let ctx = common::test_query_ctx("henry");

    let mut a = RuntimeState::new(
        common::unique_query_id("shared_tracker"),
        UniqueId::new(1, 1),
        &ctx,
        Some(Arc::clone(&env)),
    )
    .expect("state a");
    a.init_mem_trackers(1000);
    let mut b = RuntimeState::new(
        common::unique_query_id("shared_tracker"),
        UniqueId::new(1, 2),
        &ctx,
        Some(Arc::clone(&env)),
    )
    .expect("state b");
    b.init_mem_trackers(1000);

    let query_a = a.query_mem_tracker().expect("query tracker");
    let query_b = b.query_mem_tracker().expect("query tracker");
    assert!(Arc::ptr_eq(&query_a, &query_b));

    a.instance_mem_tracker().expect("instance a").consume(300);
    b.instance_mem_tracker().expect("instance b").consume(400);
    assert_eq!(query_a.consumption(), 700);
    assert_eq!(env.process_mem_tracker().consumption(), 700);
}

#[test]
fn codegen_lifetime_follows_options() {
    let with_codegen = state_with_options(TQueryOptions::default(), None);
    assert!(with_codegen.codegen().is_some());
    with_codegen
        .codegen()
        .expect("codegen")
        .optimize_module()
        .expect("optimize");

    let without = state_with_options(
        TQueryOptions {
            disable_codegen: Some(true),
            ..Default::default()
        },
        None,
    );
    assert!(without.codegen().is_none());
}

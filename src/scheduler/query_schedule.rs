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
use std::collections::{BTreeMap, HashMap};

use crate::common::types::UniqueId;
use crate::scheduler::resource_broker::ReservationResponse;
use crate::wire::internal_service::{TPlanFragment, TPlanFragmentDestination, TQueryCtx};
use crate::wire::types::{TNetworkAddress, TScanRangeLocations, TScanRangeParams};

/// Scan ranges assigned to one backend: plan node id -> ranges.
pub type PerNodeScanRanges = BTreeMap<i32, Vec<TScanRangeParams>>;

/// backend address -> per-node scan ranges.
pub type FragmentScanRangeAssignment = HashMap<TNetworkAddress, PerNodeScanRanges>;

/// The serialized plan-fragment graph handed over by the frontend.
#[derive(Clone, Debug, Default)]
pub struct QueryExecRequest {
    /// fragments[0] is the coordinator (root) fragment.
    pub fragments: Vec<TPlanFragment>,
    /// Scan-range locality, keyed by plan node id.
    pub per_node_scan_ranges: HashMap<i32, Vec<TScanRangeLocations>>,
    pub query_ctx: TQueryCtx,
    /// Frontend resource estimates, consumed by the reservation request.
    pub per_host_mem_estimate: i64,
    pub per_host_vcores: i32,
}

/// Placement of one fragment: execution hosts, the instance pinned to
/// each host, its scan ranges, and where its sink sends.
#[derive(Clone, Debug, Default)]
pub struct FragmentExecParams {
    pub hosts: Vec<TNetworkAddress>,
    pub instance_ids: Vec<UniqueId>,
    pub scan_range_assignment: FragmentScanRangeAssignment,
    pub destinations: Vec<TPlanFragmentDestination>,
    pub per_exch_num_senders: BTreeMap<i32, i32>,
}

/// The complete placement of a query. Owned by the coordinator and
/// immutable once `SimpleScheduler::schedule` returns success.
#[derive(Debug)]
pub struct QuerySchedule {
    query_id: UniqueId,
    request: QueryExecRequest,
    fragment_exec_params: Vec<FragmentExecParams>,
    reservation: Option<ReservationResponse>,
    next_instance_id: i64,
}

impl QuerySchedule {
    pub fn new(query_id: UniqueId, request: QueryExecRequest) -> Self {
        let num_fragments = request.fragments.len();
        Self {
            query_id,
            request,
            fragment_exec_params: vec![FragmentExecParams::default(); num_fragments],
            reservation: None,
            next_instance_id: 0,
        }
    }

    pub fn query_id(&self) -> UniqueId {
        self.query_id
    }

    pub fn request(&self) -> &QueryExecRequest {
        &self.request
    }

    pub fn fragment_exec_params(&self) -> &[FragmentExecParams] {
        &self.fragment_exec_params
    }

    pub(crate) fn fragment_exec_params_mut(&mut self) -> &mut Vec<FragmentExecParams> {
        &mut self.fragment_exec_params
    }

    /// Fragment-instance ids share the query id's hi bits; the low bits
    /// number the instances, so an instance id maps back to its query.
    pub(crate) fn next_instance_id(&mut self) -> UniqueId {
        self.next_instance_id += 1;
        UniqueId::new(
            self.query_id.hi,
            self.query_id.lo.wrapping_add(self.next_instance_id),
        )
    }

    pub fn reservation(&self) -> Option<&ReservationResponse> {
        self.reservation.as_ref()
    }

    pub(crate) fn set_reservation(&mut self, reservation: ReservationResponse) {
        self.reservation = Some(reservation);
    }

    /// Total distinct execution hosts over all fragments.
    pub fn unique_hosts(&self) -> Vec<TNetworkAddress> {
        let mut hosts: Vec<TNetworkAddress> = self
            .fragment_exec_params
            .iter()
            .flat_map(|params| params.hosts.iter().cloned())
            .collect();
        hosts.sort_by(|a, b| (&a.hostname, a.port).cmp(&(&b.hostname, b.port)));
        hosts.dedup();
        hosts
    }

    pub fn num_fragment_instances(&self) -> usize {
        self.fragment_exec_params
            .iter()
            .map(|params| params.instance_ids.len())
            .sum()
    }
}

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
//! Matches plan fragments to backends: locality-aware scan-range
//! assignment with round-robin fallback, fragment placement, resource
//! reservations and admission-pool authorization.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tracing::{info, warn};

use crate::common::status::Status;
use crate::common::thrift_codec::thrift_binary_deserialize;
use crate::common::types::UniqueId;
use crate::runtime::profile::{CounterRef, RuntimeProfile};
use crate::scheduler::query_schedule::{
    FragmentScanRangeAssignment, QueryExecRequest, QuerySchedule,
};
use crate::scheduler::resource_broker::{ReservationRequest, ResourceBroker};
use crate::scheduler::statestore::{StatestoreSubscriber, TopicDeltaMap};
use crate::wire::internal_service::{
    TDataSinkType, TPlanFragment, TPlanFragmentDestination, TPlanNodeType, TQueryOptions,
};
use crate::wire::metrics::TCounterType;
use crate::wire::types::{TBackendDescriptor, TNetworkAddress, TScanRangeLocations};

pub const MEMBERSHIP_TOPIC: &str = "impala-membership";

/// Query-scope cancellation hook. The coordinator implements this so
/// preemption callbacks can tear the query down without the scheduler
/// depending on coordinator internals.
pub trait QueryCancelHandle: Send + Sync {
    fn query_id(&self) -> UniqueId;
    fn cancel_query(&self, cause: &Status);
}

#[derive(Default)]
struct BackendMaps {
    // datanode ip -> backends on that node, rotated per local assignment.
    backend_map: HashMap<String, VecDeque<TBackendDescriptor>>,
    // hostname -> ip, so locality lists can name hosts either way.
    backend_ip_map: HashMap<String, String>,
    // backend id -> descriptor, tracked so deltas can remove precisely.
    current_membership: HashMap<String, TBackendDescriptor>,
    // Round-robin state for non-local assignment. Rebuilt (and the cursor
    // reset) on every membership change so stale cursors never survive a
    // map swap.
    nonlocal_ips: Vec<String>,
    next_nonlocal_idx: usize,
}

impl BackendMaps {
    fn rebuild_from_membership(&mut self) {
        self.backend_map.clear();
        self.backend_ip_map.clear();
        for descriptor in self.current_membership.values() {
            let ip = if descriptor.ip_address.is_empty() {
                descriptor.address.hostname.clone()
            } else {
                descriptor.ip_address.clone()
            };
            self.backend_map
                .entry(ip.clone())
                .or_default()
                .push_back(descriptor.clone());
            self.backend_ip_map
                .insert(descriptor.address.hostname.clone(), ip);
        }
        self.nonlocal_ips = self.backend_map.keys().cloned().collect();
        self.nonlocal_ips.sort();
        self.next_nonlocal_idx = 0;
    }

    fn resolve_ip(&self, hostname: &str) -> Option<String> {
        if self.backend_map.contains_key(hostname) {
            return Some(hostname.to_string());
        }
        self.backend_ip_map.get(hostname).cloned()
    }

    fn num_backends(&self) -> usize {
        self.backend_map.values().map(|list| list.len()).sum()
    }
}

#[derive(Default)]
struct ActiveResourceMaps {
    active_reservations: HashMap<UniqueId, Arc<dyn QueryCancelHandle>>,
    active_client_resources: HashMap<UniqueId, Arc<dyn QueryCancelHandle>>,
}

#[derive(Deserialize, Default)]
struct PoolWhitelistFile {
    #[serde(default)]
    pools: PoolsSection,
}

#[derive(Deserialize, Default)]
struct PoolsSection {
    #[serde(default)]
    defaults: Vec<String>,
    #[serde(default)]
    users: HashMap<String, Vec<String>>,
}

pub struct SimpleScheduler {
    backend_maps: Mutex<BackendMaps>,
    statestore_subscriber: Option<Arc<StatestoreSubscriber>>,
    backend_id: String,
    backend_descriptor: TBackendDescriptor,
    resource_broker: Option<Arc<dyn ResourceBroker>>,
    active_resources: Mutex<ActiveResourceMaps>,
    user_pool_whitelist: HashMap<String, Vec<String>>,
    default_pools: BTreeSet<String>,

    metrics_profile: RuntimeProfile,
    total_assignments: CounterRef,
    total_local_assignments: CounterRef,
    num_backends_metric: CounterRef,
    initialised: AtomicBool,
    update_count: AtomicU32,
}

impl SimpleScheduler {
    /// Dynamic mode: membership arrives via the statestore subscriber.
    pub fn new_dynamic(
        subscriber: Arc<StatestoreSubscriber>,
        backend_id: impl Into<String>,
        backend_address: TNetworkAddress,
        resource_broker: Option<Arc<dyn ResourceBroker>>,
    ) -> Arc<Self> {
        let backend_descriptor = TBackendDescriptor {
            ip_address: backend_address.hostname.clone(),
            address: backend_address,
            is_coordinator: Some(true),
        };
        Arc::new(Self::new_inner(
            Some(subscriber),
            backend_id.into(),
            backend_descriptor,
            resource_broker,
        ))
    }

    /// Static mode: a fixed backend list supplied at construction.
    pub fn new_static(
        backends: Vec<TNetworkAddress>,
        resource_broker: Option<Arc<dyn ResourceBroker>>,
    ) -> Arc<Self> {
        let backend_descriptor = TBackendDescriptor {
            address: backends
                .first()
                .cloned()
                .unwrap_or_else(|| TNetworkAddress::new("localhost", 0)),
            ip_address: backends
                .first()
                .map(|b| b.hostname.clone())
                .unwrap_or_default(),
            is_coordinator: Some(true),
        };
        let scheduler = Self::new_inner(None, String::new(), backend_descriptor, resource_broker);
        {
            let mut maps = scheduler
                .backend_maps
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for (idx, address) in backends.into_iter().enumerate() {
                let descriptor = TBackendDescriptor {
                    ip_address: address.hostname.clone(),
                    address,
                    is_coordinator: None,
                };
                maps.current_membership
                    .insert(format!("static-{idx}"), descriptor);
            }
            maps.rebuild_from_membership();
            scheduler
                .num_backends_metric
                .set(maps.num_backends() as i64);
        }
        scheduler.initialised.store(true, Ordering::Release);
        Arc::new(scheduler)
    }

    fn new_inner(
        statestore_subscriber: Option<Arc<StatestoreSubscriber>>,
        backend_id: String,
        backend_descriptor: TBackendDescriptor,
        resource_broker: Option<Arc<dyn ResourceBroker>>,
    ) -> Self {
        let metrics_profile = RuntimeProfile::new("SimpleScheduler");
        let total_assignments =
            metrics_profile.add_counter("TotalAssignments", TCounterType::Unit);
        let total_local_assignments =
            metrics_profile.add_counter("TotalLocalAssignments", TCounterType::Unit);
        let num_backends_metric = metrics_profile.add_counter("NumBackends", TCounterType::Unit);

        let (user_pool_whitelist, default_pools) = Self::load_pool_whitelist();

        Self {
            backend_maps: Mutex::new(BackendMaps::default()),
            statestore_subscriber,
            backend_id,
            backend_descriptor,
            resource_broker,
            active_resources: Mutex::new(ActiveResourceMaps::default()),
            user_pool_whitelist,
            default_pools,
            metrics_profile,
            total_assignments,
            total_local_assignments,
            num_backends_metric,
            initialised: AtomicBool::new(false),
            update_count: AtomicU32::new(0),
        }
    }

    fn load_pool_whitelist() -> (HashMap<String, Vec<String>>, BTreeSet<String>) {
        let path = crate::common::config::pool_whitelist_path();
        if path.is_empty() {
            return (HashMap::new(), BTreeSet::new());
        }
        match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|s| toml::from_str::<PoolWhitelistFile>(&s).map_err(|e| e.to_string()))
        {
            Ok(file) => (
                file.pools.users,
                file.pools.defaults.into_iter().collect(),
            ),
            Err(e) => {
                warn!(
                    target: "springbok::scheduler",
                    error = %e,
                    path = %path,
                    "failed to load pool whitelist"
                );
                (HashMap::new(), BTreeSet::new())
            }
        }
    }

    /// Registers with the subscription manager in dynamic mode.
    pub fn init(self: &Arc<Self>) -> Result<(), Status> {
        if let Some(subscriber) = &self.statestore_subscriber {
            let scheduler = Arc::clone(self);
            subscriber.register_topic(
                MEMBERSHIP_TOPIC,
                Box::new(move |deltas| scheduler.update_membership(deltas)),
            );
        }
        self.initialised.store(true, Ordering::Release);
        Ok(())
    }

    pub fn metrics_profile(&self) -> &RuntimeProfile {
        &self.metrics_profile
    }

    pub fn initialised(&self) -> bool {
        self.initialised.load(Ordering::Acquire)
    }

    pub fn total_assignments(&self) -> i64 {
        self.total_assignments.value()
    }

    pub fn total_local_assignments(&self) -> i64 {
        self.total_local_assignments.value()
    }

    pub fn backend_descriptor(&self) -> &TBackendDescriptor {
        &self.backend_descriptor
    }

    /// Applies one ordered batch of membership deltas. Maps are rebuilt
    /// under the map lock, and the round-robin cursor resets with them.
    fn update_membership(&self, deltas: &TopicDeltaMap) {
        let Some(delta) = deltas.get(MEMBERSHIP_TOPIC) else {
            return;
        };
        let mut maps = self.backend_maps.lock().unwrap_or_else(|e| e.into_inner());
        if !delta.is_delta {
            maps.current_membership.clear();
        }
        for entry in &delta.entries {
            if entry.deleted {
                maps.current_membership.remove(&entry.key);
                continue;
            }
            match thrift_binary_deserialize::<TBackendDescriptor>(&entry.value) {
                Ok(descriptor) => {
                    maps.current_membership.insert(entry.key.clone(), descriptor);
                }
                Err(e) => {
                    warn!(
                        target: "springbok::scheduler",
                        key = %entry.key,
                        error = %e,
                        "malformed membership entry"
                    );
                }
            }
        }
        maps.rebuild_from_membership();
        self.num_backends_metric.set(maps.num_backends() as i64);

        let count = self.update_count.fetch_add(1, Ordering::Relaxed);
        if count % 10 == 0 {
            info!(
                target: "springbok::scheduler",
                backend_id = %self.backend_id,
                num_backends = maps.num_backends(),
                "membership updated"
            );
        }
    }

    pub fn has_local_backend(&self, data_location: &TNetworkAddress) -> bool {
        let maps = self.backend_maps.lock().unwrap_or_else(|e| e.into_inner());
        maps.resolve_ip(&data_location.hostname)
            .and_then(|ip| maps.backend_map.get(&ip))
            .map(|list| !list.is_empty())
            .unwrap_or(false)
    }

    pub fn get_all_known_backends(&self) -> Vec<TBackendDescriptor> {
        let maps = self.backend_maps.lock().unwrap_or_else(|e| e.into_inner());
        maps.backend_map
            .values()
            .flat_map(|list| list.iter().cloned())
            .collect()
    }

    /// Backend for a single data location: local when possible, global
    /// round-robin otherwise.
    pub fn get_backend(
        &self,
        data_location: &TNetworkAddress,
    ) -> Result<TBackendDescriptor, Status> {
        self.assign_backend(std::slice::from_ref(data_location))
            .map(|(backend, _local)| backend)
    }

    /// Backends such that `out[i]` should read `data_locations[i]`.
    pub fn get_backends(
        &self,
        data_locations: &[TNetworkAddress],
        out: &mut Vec<TBackendDescriptor>,
    ) -> Result<(), Status> {
        for location in data_locations {
            out.push(self.get_backend(location)?);
        }
        Ok(())
    }

    // Preference walk over the candidate host list, then global
    // round-robin. Both paths advance rotation state under the map lock.
    fn assign_backend(
        &self,
        candidate_hosts: &[TNetworkAddress],
    ) -> Result<(TBackendDescriptor, bool), Status> {
        let mut maps = self.backend_maps.lock().unwrap_or_else(|e| e.into_inner());
        for host in candidate_hosts {
            let Some(ip) = maps.resolve_ip(&host.hostname) else {
                continue;
            };
            let Some(list) = maps.backend_map.get_mut(&ip) else {
                continue;
            };
            if let Some(backend) = list.pop_front() {
                list.push_back(backend.clone());
                self.total_assignments.update(1);
                self.total_local_assignments.update(1);
                return Ok((backend, true));
            }
        }

        if maps.nonlocal_ips.is_empty() {
            return Err(Status::runtime_error("no backends configured"));
        }
        let idx = maps.next_nonlocal_idx % maps.nonlocal_ips.len();
        maps.next_nonlocal_idx = maps.next_nonlocal_idx.wrapping_add(1);
        let ip = maps.nonlocal_ips[idx].clone();
        let list = maps
            .backend_map
            .get_mut(&ip)
            .ok_or_else(|| Status::internal_error("round-robin state out of sync"))?;
        let backend = list
            .pop_front()
            .ok_or_else(|| Status::internal_error("empty backend list"))?;
        list.push_back(backend.clone());
        self.total_assignments.update(1);
        Ok((backend, false))
    }

    /// Assigns every scan range of one scan node to a backend. With
    /// `exec_at_coord`, every range lands on the coordinator.
    pub fn compute_scan_range_assignment(
        &self,
        node_id: i32,
        locations: &[TScanRangeLocations],
        exec_at_coord: bool,
        assignment: &mut FragmentScanRangeAssignment,
    ) -> Result<(), Status> {
        for location in locations {
            let address = if exec_at_coord {
                self.backend_descriptor.address.clone()
            } else {
                let (backend, _local) = self.assign_backend(&location.hosts)?;
                backend.address
            };
            assignment
                .entry(address)
                .or_default()
                .entry(node_id)
                .or_default()
                .push(crate::wire::types::TScanRangeParams {
                    scan_range: location.scan_range.clone(),
                    volume_id: None,
                });
        }
        Ok(())
    }

    fn scan_node_ids(fragment: &TPlanFragment) -> Vec<i32> {
        fragment
            .plan
            .as_ref()
            .map(|plan| {
                plan.nodes
                    .iter()
                    .filter(|n| n.node_type == TPlanNodeType::ScanNode)
                    .map(|n| n.node_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Leftmost (first preorder) exchange node of a fragment's plan.
    fn leftmost_exchange_id(fragment: &TPlanFragment) -> Option<i32> {
        fragment.plan.as_ref().and_then(|plan| {
            plan.nodes
                .iter()
                .find(|n| n.node_type == TPlanNodeType::ExchangeNode)
                .map(|n| n.node_id)
        })
    }

    /// Index of the fragment whose plan contains exchange node `node_id`.
    fn fragment_with_exchange(request: &QueryExecRequest, node_id: i32) -> Option<usize> {
        request.fragments.iter().position(|fragment| {
            fragment
                .plan
                .as_ref()
                .map(|plan| {
                    plan.nodes.iter().any(|n| {
                        n.node_type == TPlanNodeType::ExchangeNode && n.node_id == node_id
                    })
                })
                .unwrap_or(false)
        })
    }

    /// Produces the full placement for a query: scan-range assignments,
    /// fragment hosts and instances, sink destinations, and (when a
    /// broker is configured) the resource reservation.
    pub fn schedule(
        &self,
        coord: Arc<dyn QueryCancelHandle>,
        schedule: &mut QuerySchedule,
    ) -> Result<(), Status> {
        let request = schedule.request().clone();

        // Scan-range assignment per fragment.
        for (idx, fragment) in request.fragments.iter().enumerate() {
            let scan_nodes = Self::scan_node_ids(fragment);
            let exec_at_coord = scan_nodes.is_empty();
            let mut assignment = FragmentScanRangeAssignment::new();
            for node_id in &scan_nodes {
                let locations = request
                    .per_node_scan_ranges
                    .get(node_id)
                    .map(|l| l.as_slice())
                    .unwrap_or(&[]);
                self.compute_scan_range_assignment(
                    *node_id,
                    locations,
                    exec_at_coord,
                    &mut assignment,
                )?;
            }
            schedule.fragment_exec_params_mut()[idx].scan_range_assignment = assignment;
        }

        // Fragment hosts: the union of assigned scan hosts; fragments
        // without a scan source run on the coordinator.
        for idx in 0..request.fragments.len() {
            let hosts: Vec<TNetworkAddress> = {
                let params = &schedule.fragment_exec_params()[idx];
                let mut hosts: Vec<TNetworkAddress> =
                    params.scan_range_assignment.keys().cloned().collect();
                hosts.sort_by(|a, b| (&a.hostname, a.port).cmp(&(&b.hostname, b.port)));
                hosts
            };
            let hosts = if hosts.is_empty() {
                vec![self.backend_descriptor.address.clone()]
            } else {
                hosts
            };
            let instance_ids: Vec<UniqueId> =
                hosts.iter().map(|_| schedule.next_instance_id()).collect();
            let params = &mut schedule.fragment_exec_params_mut()[idx];
            params.hosts = hosts;
            params.instance_ids = instance_ids;
        }

        // Sink destinations: a fragment's stream sink feeds the fragment
        // holding the matching exchange node.
        for idx in 0..request.fragments.len() {
            let fragment = &request.fragments[idx];
            let Some(sink) = fragment.output_sink.as_ref() else {
                continue;
            };
            if sink.sink_type != TDataSinkType::DataStreamSink {
                continue;
            }
            let Some(dest_node_id) = sink.dest_node_id else {
                continue;
            };
            let Some(dest_idx) = Self::fragment_with_exchange(&request, dest_node_id) else {
                return Err(Status::internal_error(format!(
                    "no fragment consumes exchange node {dest_node_id}"
                )));
            };
            if Self::leftmost_exchange_id(&request.fragments[dest_idx]) != Some(dest_node_id) {
                // Only the leftmost exchange determines the feeding edge;
                // other exchanges are joined builds handled elsewhere.
                continue;
            }
            let destinations: Vec<TPlanFragmentDestination> = {
                let dest_params = &schedule.fragment_exec_params()[dest_idx];
                dest_params
                    .instance_ids
                    .iter()
                    .zip(dest_params.hosts.iter())
                    .map(|(instance_id, host)| TPlanFragmentDestination {
                        fragment_instance_id: (*instance_id).into(),
                        server: host.clone(),
                    })
                    .collect()
            };
            let num_senders = schedule.fragment_exec_params()[idx].instance_ids.len() as i32;
            {
                let params = &mut schedule.fragment_exec_params_mut()[dest_idx];
                *params.per_exch_num_senders.entry(dest_node_id).or_insert(0) += num_senders;
            }
            schedule.fragment_exec_params_mut()[idx].destinations = destinations;
        }

        // Resource reservation, when a broker is configured.
        if let Some(broker) = &self.resource_broker {
            let pool = self.resolve_request_pool(
                &request.query_ctx.user,
                request.query_ctx.query_options.as_ref(),
            )?;
            let reservation_request = ReservationRequest {
                request_pool: pool,
                user: request.query_ctx.user.clone(),
                memory_bytes: request.per_host_mem_estimate,
                vcores: request.per_host_vcores,
                hosts: schedule.unique_hosts(),
            };
            let reservation = broker.reserve(&reservation_request)?;
            {
                let mut guard = self
                    .active_resources
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                guard
                    .active_reservations
                    .insert(reservation.reservation_id, Arc::clone(&coord));
                for resource_id in &reservation.allocated_client_resource_ids {
                    guard
                        .active_client_resources
                        .insert(*resource_id, Arc::clone(&coord));
                }
            }
            schedule.set_reservation(reservation);
        }

        Ok(())
    }

    /// Releases the reservation taken by `schedule`, if any.
    pub fn release(&self, schedule: &QuerySchedule) -> Result<(), Status> {
        let Some(reservation) = schedule.reservation() else {
            return Ok(());
        };
        if let Some(broker) = &self.resource_broker {
            broker.release(reservation.reservation_id)?;
        }
        let mut guard = self
            .active_resources
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.active_reservations.remove(&reservation.reservation_id);
        for resource_id in &reservation.allocated_client_resource_ids {
            guard.active_client_resources.remove(resource_id);
        }
        Ok(())
    }

    pub fn handle_preempted_reservation(&self, reservation_id: UniqueId) {
        let coord = {
            let guard = self
                .active_resources
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            guard.active_reservations.get(&reservation_id).cloned()
        };
        match coord {
            Some(coord) => coord.cancel_query(&Status::cancelled_with_cause(format!(
                "Reservation {reservation_id} was preempted"
            ))),
            None => warn!(
                target: "springbok::scheduler",
                reservation_id = %reservation_id,
                "preempted reservation not found"
            ),
        }
    }

    pub fn handle_preempted_resource(&self, client_resource_id: UniqueId) {
        self.cancel_by_client_resource(
            client_resource_id,
            format!("Resource {client_resource_id} was preempted"),
        );
    }

    pub fn handle_lost_resource(&self, client_resource_id: UniqueId) {
        self.cancel_by_client_resource(
            client_resource_id,
            format!("Resource {client_resource_id} was lost"),
        );
    }

    fn cancel_by_client_resource(&self, client_resource_id: UniqueId, cause: String) {
        let coord = {
            let guard = self
                .active_resources
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            guard
                .active_client_resources
                .get(&client_resource_id)
                .cloned()
        };
        match coord {
            Some(coord) => coord.cancel_query(&Status::cancelled_with_cause(cause)),
            None => warn!(
                target: "springbok::scheduler",
                client_resource_id = %client_resource_id,
                "client resource not found"
            ),
        }
    }

    /// Admission pool for `user`: the requested pool when permitted, else
    /// the user's first whitelisted pool, else any default pool.
    pub fn resolve_request_pool(
        &self,
        user: &str,
        options: Option<&TQueryOptions>,
    ) -> Result<String, Status> {
        let user_pools = self.user_pool_whitelist.get(user);
        if let Some(requested) = options.and_then(|o| o.request_pool.as_deref()) {
            if !requested.is_empty() {
                let permitted = user_pools
                    .map(|pools| pools.iter().any(|p| p == requested))
                    .unwrap_or(false)
                    || self.default_pools.contains(requested);
                if permitted {
                    return Ok(requested.to_string());
                }
                return Err(Status::permission_denied(format!(
                    "user {user} is not authorized to use pool {requested}"
                )));
            }
        }
        if let Some(first) = user_pools.and_then(|pools| pools.first()) {
            return Ok(first.clone());
        }
        if let Some(default) = self.default_pools.iter().next() {
            return Ok(default.clone());
        }
        Err(Status::permission_denied(format!(
            "no pool configured for user {user}"
        )))
    }

    /// The whitelist as loaded, for configuration checks.
    pub fn user_pool_map(&self) -> &HashMap<String, Vec<String>> {
        &self.user_pool_whitelist
    }
}

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
//! Resource-broker boundary. The broker mediates cluster reservations;
//! scheduling only needs reserve/release plus the identity types that
//! preemption callbacks carry.

use std::collections::HashMap;

use crate::common::status::Status;
use crate::common::types::UniqueId;
use crate::wire::types::TNetworkAddress;

#[derive(Clone, Debug)]
pub struct ReservationRequest {
    pub request_pool: String,
    pub user: String,
    pub memory_bytes: i64,
    pub vcores: i32,
    pub hosts: Vec<TNetworkAddress>,
}

#[derive(Clone, Debug, Default)]
pub struct ReservationResponse {
    pub reservation_id: UniqueId,
    pub allocated_client_resource_ids: Vec<UniqueId>,
    pub per_host_memory_bytes: HashMap<String, i64>,
}

pub trait ResourceBroker: Send + Sync {
    fn reserve(&self, request: &ReservationRequest) -> Result<ReservationResponse, Status>;
    fn release(&self, reservation_id: UniqueId) -> Result<(), Status>;
}

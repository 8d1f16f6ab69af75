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
//! Per-address pool of internal-service clients.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use crate::common::status::Status;
use crate::rpc::thrift_client::{RpcError, ThriftClient, TlsContext};
use crate::wire::internal_service::{
    TCancelPlanFragmentParams, TCancelPlanFragmentResult, TExecPlanFragmentParams,
    TExecPlanFragmentResult, TReportExecStatusParams, TReportExecStatusResult,
};
use crate::wire::types::TNetworkAddress;

/// Typed stub over one connection. Connection lifecycle lives in the
/// underlying [`ThriftClient`]; these methods only frame calls.
pub struct InternalServiceClient {
    client: ThriftClient,
}

impl InternalServiceClient {
    pub fn new(address: TNetworkAddress, tls: Option<Arc<TlsContext>>) -> Self {
        Self {
            client: ThriftClient::new(address, tls),
        }
    }

    pub fn open(&mut self) -> Result<(), Status> {
        self.client.open()
    }

    pub fn open_with_retry(&mut self, num_tries: u32, wait_ms: u64) -> Result<(), Status> {
        self.client.open_with_retry(num_tries, wait_ms)
    }

    pub fn close(&mut self) {
        self.client.close()
    }

    pub fn reopen(&mut self) -> Result<(), Status> {
        self.client.reopen()
    }

    pub fn address(&self) -> &TNetworkAddress {
        self.client.address()
    }

    pub fn exec_plan_fragment(
        &mut self,
        params: &TExecPlanFragmentParams,
    ) -> Result<TExecPlanFragmentResult, RpcError> {
        self.client.call("ExecPlanFragment", params)
    }

    pub fn report_exec_status(
        &mut self,
        params: &TReportExecStatusParams,
    ) -> Result<TReportExecStatusResult, RpcError> {
        self.client.call("ReportExecStatus", params)
    }

    pub fn cancel_plan_fragment(
        &mut self,
        params: &TCancelPlanFragmentParams,
    ) -> Result<TCancelPlanFragmentResult, RpcError> {
        self.client.call("CancelPlanFragment", params)
    }
}

/// Caches opened clients per destination. Checked-out clients return to
/// the pool when the [`ClientConnection`] handle drops.
pub struct ClientCache {
    tls: Option<Arc<TlsContext>>,
    cache: Mutex<HashMap<TNetworkAddress, Vec<InternalServiceClient>>>,
}

impl ClientCache {
    pub fn new(tls: Option<Arc<TlsContext>>) -> Arc<Self> {
        Arc::new(Self {
            tls,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn get_client(
        self: &Arc<Self>,
        address: &TNetworkAddress,
    ) -> Result<ClientConnection, Status> {
        let cached = {
            let mut guard = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            guard.get_mut(address).and_then(|clients| clients.pop())
        };
        let mut client = match cached {
            Some(client) => client,
            None => InternalServiceClient::new(address.clone(), self.tls.clone()),
        };
        // A pooled client that hit a transport failure comes back closed
        // (the failing call dropped its connection), so this reconnects
        // rather than handing out a dead socket.
        client.open()?;
        Ok(ClientConnection {
            cache: Arc::clone(self),
            client: Some(client),
        })
    }

    fn return_client(&self, client: InternalServiceClient) {
        let mut guard = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .entry(client.address().clone())
            .or_default()
            .push(client);
    }
}

/// RAII checkout of a pooled client.
pub struct ClientConnection {
    cache: Arc<ClientCache>,
    client: Option<InternalServiceClient>,
}

impl Deref for ClientConnection {
    type Target = InternalServiceClient;

    fn deref(&self) -> &InternalServiceClient {
        self.client.as_ref().expect("client checked out")
    }
}

impl DerefMut for ClientConnection {
    fn deref_mut(&mut self) -> &mut InternalServiceClient {
        self.client.as_mut().expect("client checked out")
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.cache.return_client(client);
        }
    }
}

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
//! Data sinks terminate a fragment's pipeline. Every fragment has one, so
//! opening the executor drains the whole plan.

use std::sync::{Arc, Mutex};

use crate::common::status::Status;
use crate::exec::data_stream::{DataStreamMgr, StreamKey};
use crate::exec::row_batch::RowBatch;
use crate::runtime::runtime_state::RuntimeState;

pub trait DataSink: Send {
    fn send(&mut self, state: &RuntimeState, batch: &RowBatch) -> Result<(), Status>;

    /// Flushes and finalizes. Called exactly once, also on error paths.
    fn close(&mut self, state: &RuntimeState) -> Result<(), Status>;
}

/// Collects final result rows for the client-facing session layer.
pub struct ResultSink {
    rows: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: bool,
}

impl ResultSink {
    pub fn new() -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
        let rows = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                rows: Arc::clone(&rows),
                closed: false,
            },
            rows,
        )
    }
}

impl DataSink for ResultSink {
    fn send(&mut self, _state: &RuntimeState, batch: &RowBatch) -> Result<(), Status> {
        let mut guard = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        guard.extend(batch.rows().iter().cloned());
        Ok(())
    }

    fn close(&mut self, _state: &RuntimeState) -> Result<(), Status> {
        self.closed = true;
        Ok(())
    }
}

/// Feeds an exchange node of downstream fragment instances through the
/// in-process stream manager.
pub struct DataStreamSink {
    stream_mgr: Arc<DataStreamMgr>,
    dest_keys: Vec<StreamKey>,
    closed: bool,
}

impl DataStreamSink {
    pub fn new(stream_mgr: Arc<DataStreamMgr>, dest_keys: Vec<StreamKey>) -> Self {
        Self {
            stream_mgr,
            dest_keys,
            closed: false,
        }
    }
}

impl DataSink for DataStreamSink {
    fn send(&mut self, _state: &RuntimeState, batch: &RowBatch) -> Result<(), Status> {
        for key in &self.dest_keys {
            let Some(recvr) = self.stream_mgr.find_recvr(key) else {
                return Err(Status::internal_error(format!(
                    "no receiver registered for fragment {} node {}",
                    key.fragment_instance_id, key.dest_node_id
                )));
            };
            recvr.add_batch(batch.rows().to_vec());
        }
        Ok(())
    }

    fn close(&mut self, _state: &RuntimeState) -> Result<(), Status> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        for key in &self.dest_keys {
            if let Some(recvr) = self.stream_mgr.find_recvr(key) {
                recvr.sender_eos();
            }
        }
        Ok(())
    }
}

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
//! Scan sources produce row batches from assigned scan ranges. Storage
//! readers and decoders live behind this trait.

use std::sync::Arc;
use std::time::Duration;

use crate::common::status::Status;
use crate::exec::data_stream::{DataStreamRecvr, RecvResult};
use crate::exec::row_batch::RowBatch;
use crate::runtime::runtime_state::RuntimeState;
use crate::wire::types::TScanRangeParams;

pub trait ScanSource: Send {
    /// Next batch, or Ok(None) at end of stream. Implementations respect
    /// `state.batch_size()` and poll cancellation between batches.
    fn next_batch(&mut self, state: &RuntimeState) -> Result<Option<RowBatch>, Status>;
}

/// Built-in source decoding each scan range payload as newline-separated
/// rows. Stands in for the columnar readers in tests and the demo path.
pub struct LinesScanSource {
    pending_rows: std::vec::IntoIter<Vec<u8>>,
}

impl LinesScanSource {
    pub fn new(ranges: &[TScanRangeParams]) -> Self {
        let mut rows = Vec::new();
        for range in ranges {
            for line in range.scan_range.data.split(|b| *b == b'\n') {
                if !line.is_empty() {
                    rows.push(line.to_vec());
                }
            }
        }
        Self {
            pending_rows: rows.into_iter(),
        }
    }
}

impl ScanSource for LinesScanSource {
    fn next_batch(&mut self, state: &RuntimeState) -> Result<Option<RowBatch>, Status> {
        let batch_size = state.batch_size().max(1);
        let mut rows = Vec::with_capacity(batch_size);
        for row in self.pending_rows.by_ref() {
            rows.push(row);
            if rows.len() >= batch_size {
                break;
            }
        }
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(RowBatch::new(rows, state.instance_mem_tracker())))
    }
}

/// Source draining an exchange receiver fed by upstream fragments.
pub struct ExchangeScanSource {
    recvr: Arc<DataStreamRecvr>,
    poll: Duration,
}

impl ExchangeScanSource {
    pub fn new(recvr: Arc<DataStreamRecvr>) -> Self {
        Self {
            recvr,
            poll: Duration::from_millis(50),
        }
    }
}

impl ScanSource for ExchangeScanSource {
    fn next_batch(&mut self, state: &RuntimeState) -> Result<Option<RowBatch>, Status> {
        loop {
            if state.is_cancelled() {
                return Err(Status::cancelled());
            }
            match self.recvr.recv_batch(self.poll)? {
                RecvResult::Batch(rows) => {
                    if rows.is_empty() {
                        continue;
                    }
                    return Ok(Some(RowBatch::new(rows, state.instance_mem_tracker())));
                }
                RecvResult::Eos => return Ok(None),
                RecvResult::TimedOut => continue,
            }
        }
    }
}

/// Source for fragments with no scan node and no exchange input.
pub struct EmptyScanSource;

impl ScanSource for EmptyScanSource {
    fn next_batch(&mut self, _state: &RuntimeState) -> Result<Option<RowBatch>, Status> {
        Ok(None)
    }
}

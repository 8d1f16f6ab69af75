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
//! In-process data streams between fragment instances. A receiver is
//! registered per (fragment instance, exchange node); senders count down
//! with an EOS marker each.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::common::status::Status;
use crate::common::types::UniqueId;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct StreamKey {
    pub fragment_instance_id: UniqueId,
    pub dest_node_id: i32,
}

struct RecvrState {
    batches: VecDeque<Vec<Vec<u8>>>,
    senders_remaining: usize,
    cancelled: bool,
}

/// Bounded-by-senders stream receiver. Consumers block on `recv_batch`
/// until a batch arrives or every sender has sent EOS.
pub struct DataStreamRecvr {
    state: Mutex<RecvrState>,
    cv: Condvar,
}

impl DataStreamRecvr {
    fn new(num_senders: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RecvrState {
                batches: VecDeque::new(),
                senders_remaining: num_senders.max(1),
                cancelled: false,
            }),
            cv: Condvar::new(),
        })
    }

    pub fn add_batch(&self, rows: Vec<Vec<u8>>) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if guard.cancelled {
            return;
        }
        guard.batches.push_back(rows);
        self.cv.notify_all();
    }

    pub fn sender_eos(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard.senders_remaining = guard.senders_remaining.saturating_sub(1);
        self.cv.notify_all();
    }

    pub fn cancel(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard.cancelled = true;
        guard.batches.clear();
        self.cv.notify_all();
    }

    /// One bounded wait for the next batch. `TimedOut` hands control back
    /// to the caller so it can poll fragment state between waits.
    pub fn recv_batch(&self, wait: Duration) -> Result<RecvResult, Status> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if guard.cancelled {
            return Err(Status::cancelled());
        }
        if let Some(batch) = guard.batches.pop_front() {
            return Ok(RecvResult::Batch(batch));
        }
        if guard.senders_remaining == 0 {
            return Ok(RecvResult::Eos);
        }
        let (mut guard, _timeout) = self
            .cv
            .wait_timeout(guard, wait)
            .unwrap_or_else(|e| e.into_inner());
        if guard.cancelled {
            return Err(Status::cancelled());
        }
        if let Some(batch) = guard.batches.pop_front() {
            return Ok(RecvResult::Batch(batch));
        }
        if guard.senders_remaining == 0 {
            return Ok(RecvResult::Eos);
        }
        Ok(RecvResult::TimedOut)
    }
}

#[derive(Debug)]
pub enum RecvResult {
    Batch(Vec<Vec<u8>>),
    Eos,
    TimedOut,
}

/// Registry of live stream receivers on this node.
pub struct DataStreamMgr {
    recvrs: Mutex<HashMap<StreamKey, Arc<DataStreamRecvr>>>,
}

impl DataStreamMgr {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            recvrs: Mutex::new(HashMap::new()),
        })
    }

    pub fn create_recvr(&self, key: StreamKey, num_senders: usize) -> Arc<DataStreamRecvr> {
        let recvr = DataStreamRecvr::new(num_senders);
        self.recvrs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::clone(&recvr));
        recvr
    }

    pub fn find_recvr(&self, key: &StreamKey) -> Option<Arc<DataStreamRecvr>> {
        self.recvrs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn deregister_recvr(&self, key: &StreamKey) {
        let removed = self
            .recvrs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        if let Some(recvr) = removed {
            recvr.cancel();
        }
    }

    /// Cancels every stream feeding the given fragment instance.
    pub fn cancel_fragment(&self, fragment_instance_id: UniqueId) {
        let guard = self.recvrs.lock().unwrap_or_else(|e| e.into_inner());
        for (key, recvr) in guard.iter() {
            if key.fragment_instance_id == fragment_instance_id {
                recvr.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DataStreamMgr, StreamKey};
    use crate::common::types::UniqueId;
    use std::time::Duration;

    fn key() -> StreamKey {
        StreamKey {
            fragment_instance_id: UniqueId::new(7, 7),
            dest_node_id: 2,
        }
    }

    #[test]
    fn recv_returns_batches_then_eos() {
        let mgr = DataStreamMgr::new();
        let recvr = mgr.create_recvr(key(), 1);
        recvr.add_batch(vec![b"row".to_vec()]);
        recvr.sender_eos();

        match recvr.recv_batch(Duration::from_millis(10)).expect("recv") {
            super::RecvResult::Batch(batch) => assert_eq!(batch.len(), 1),
            other => panic!("expected batch, got {other:?}"),
        }
        assert!(matches!(
            recvr.recv_batch(Duration::from_millis(10)).expect("recv"),
            super::RecvResult::Eos
        ));
    }

    #[test]
    fn cancel_unblocks_receiver() {
        let mgr = DataStreamMgr::new();
        let recvr = mgr.create_recvr(key(), 1);
        mgr.cancel_fragment(UniqueId::new(7, 7));
        assert!(recvr.recv_batch(Duration::from_millis(10)).is_err());
    }
}

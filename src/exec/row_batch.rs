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
use std::sync::Arc;

use crate::runtime::mem_tracker::{MemTracker, TrackedBytes};

/// A batch of opaque serialized rows flowing between a scan source and a
/// sink. Row memory is charged to the owning tracker for the batch's
/// lifetime.
pub struct RowBatch {
    rows: Vec<Vec<u8>>,
    byte_size: usize,
    _tracked: Option<TrackedBytes>,
}

impl RowBatch {
    pub fn new(rows: Vec<Vec<u8>>, tracker: Option<Arc<MemTracker>>) -> Self {
        let byte_size = rows.iter().map(|r| r.len()).sum();
        let tracked = tracker.map(|t| TrackedBytes::new(byte_size, t));
        Self {
            rows,
            byte_size,
            _tracked: tracked,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<u8>> {
        // TrackedBytes releases on drop; the caller takes untracked rows.
        let mut this = self;
        std::mem::take(&mut this.rows)
    }
}

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
//! Subscriber side of the statestore membership feed. Transport is
//! external; whoever drives the feed calls [`StatestoreSubscriber::deliver`]
//! with ordered delta batches, and registered callbacks run in that
//! delivery context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One keyed entry of a topic delta. `deleted` entries are tombstones.
#[derive(Clone, Debug)]
pub struct TopicEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub deleted: bool,
}

#[derive(Clone, Debug, Default)]
pub struct TopicDelta {
    pub topic_name: String,
    pub entries: Vec<TopicEntry>,
    /// False means the delta carries the full topic state.
    pub is_delta: bool,
}

pub type TopicDeltaMap = HashMap<String, TopicDelta>;
pub type UpdateCallback = Box<dyn Fn(&TopicDeltaMap) + Send + Sync>;

pub struct StatestoreSubscriber {
    subscriber_id: String,
    callbacks: Mutex<HashMap<String, Vec<UpdateCallback>>>,
}

impl StatestoreSubscriber {
    pub fn new(subscriber_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            subscriber_id: subscriber_id.into(),
            callbacks: Mutex::new(HashMap::new()),
        })
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    pub fn register_topic(&self, topic_name: impl Into<String>, callback: UpdateCallback) {
        let mut guard = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        guard.entry(topic_name.into()).or_default().push(callback);
    }

    /// Hands one update batch to every callback registered for a topic
    /// present in the batch. Callbacks run sequentially: there is exactly
    /// one membership-update context at a time.
    pub fn deliver(&self, deltas: &TopicDeltaMap) {
        let guard = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        for topic_name in deltas.keys() {
            if let Some(callbacks) = guard.get(topic_name) {
                for callback in callbacks {
                    callback(deltas);
                }
            }
        }
    }
}

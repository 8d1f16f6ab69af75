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
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::common::pretty;
use crate::wire::metrics::TCounterType;

pub const NO_LIMIT: i64 = -1;

/// Hierarchical memory accounting. Consumption charged to a tracker is
/// charged to every ancestor atomically per level; limits are checked
/// against the whole ancestor chain.
///
/// Only bytes explicitly reported by callers are tracked; this is not
/// allocator or RSS accounting.
#[derive(Debug)]
pub struct MemTracker {
    label: String,
    limit: i64,
    parent: Option<Arc<MemTracker>>,
    consumption: AtomicI64,
    peak: AtomicI64,
    children: Mutex<Vec<Weak<MemTracker>>>,
}

impl MemTracker {
    pub fn new_root(label: impl Into<String>, limit: i64) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            limit,
            parent: None,
            consumption: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            children: Mutex::new(Vec::new()),
        })
    }

    pub fn new_child(
        label: impl Into<String>,
        limit: i64,
        parent: &Arc<MemTracker>,
    ) -> Arc<Self> {
        let child = Arc::new(Self {
            label: label.into(),
            limit,
            parent: Some(Arc::clone(parent)),
            consumption: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            children: Mutex::new(Vec::new()),
        });
        parent
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::downgrade(&child));
        child
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn has_limit(&self) -> bool {
        self.limit >= 0
    }

    pub fn consumption(&self) -> i64 {
        self.consumption.load(Ordering::Relaxed)
    }

    pub fn peak_consumption(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn parent(&self) -> Option<Arc<MemTracker>> {
        self.parent.clone()
    }

    pub fn children(&self) -> Vec<Arc<MemTracker>> {
        let guard = self.children.lock().unwrap_or_else(|e| e.into_inner());
        guard.iter().filter_map(|weak| weak.upgrade()).collect()
    }

    /// Charges `bytes` to this tracker and every ancestor. No limit check.
    pub fn consume(&self, bytes: i64) {
        if bytes <= 0 {
            return;
        }
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            let new_value = current.consumption.fetch_add(bytes, Ordering::AcqRel) + bytes;
            current.update_peak(new_value);
            tracker = current.parent.as_deref();
        }
    }

    /// Charges `bytes` if no tracker in the ancestor chain would exceed its
    /// limit; rolls the charge back and returns false otherwise.
    pub fn try_consume(&self, bytes: i64) -> bool {
        if bytes <= 0 {
            return true;
        }
        let mut charged: Vec<&MemTracker> = Vec::new();
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            let new_value = current.consumption.fetch_add(bytes, Ordering::AcqRel) + bytes;
            if current.limit >= 0 && new_value > current.limit {
                current.consumption.fetch_sub(bytes, Ordering::AcqRel);
                for undo in charged {
                    undo.consumption.fetch_sub(bytes, Ordering::AcqRel);
                }
                return false;
            }
            current.update_peak(new_value);
            charged.push(current);
            tracker = current.parent.as_deref();
        }
        true
    }

    pub fn release(&self, bytes: i64) {
        if bytes <= 0 {
            return;
        }
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            current.consumption.fetch_sub(bytes, Ordering::AcqRel);
            tracker = current.parent.as_deref();
        }
    }

    pub fn limit_exceeded(&self) -> bool {
        self.limit >= 0 && self.consumption() > self.limit
    }

    /// True if this tracker or any ancestor is over its limit.
    pub fn any_limit_exceeded(&self) -> bool {
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            if current.limit_exceeded() {
                return true;
            }
            tracker = current.parent.as_deref();
        }
        false
    }

    /// Structured dump of this subtree's usage for memory-limit reports.
    pub fn log_usage(&self) -> String {
        let mut out = String::new();
        self.log_usage_recursive(&mut out, "");
        out
    }

    fn log_usage_recursive(&self, out: &mut String, prefix: &str) {
        let limit = if self.has_limit() {
            format!(" Limit={}", pretty::print(self.limit, TCounterType::Bytes))
        } else {
            String::new()
        };
        let _ = writeln!(
            out,
            "{}{}:{} Consumption={} Peak={}",
            prefix,
            self.label,
            limit,
            pretty::print(self.consumption(), TCounterType::Bytes),
            pretty::print(self.peak_consumption(), TCounterType::Bytes),
        );
        for child in self.children() {
            child.log_usage_recursive(out, &format!("{prefix}  "));
        }
    }

    fn update_peak(&self, value: i64) {
        let mut prev = self.peak.load(Ordering::Relaxed);
        while value > prev {
            match self
                .peak
                .compare_exchange(prev, value, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Logically accounted bytes that can move between trackers, following the
/// current-holder ownership model. Releases on drop.
#[derive(Debug)]
pub struct TrackedBytes {
    bytes: i64,
    tracker: Arc<MemTracker>,
}

impl TrackedBytes {
    pub fn new(bytes: usize, tracker: Arc<MemTracker>) -> Self {
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);
        tracker.consume(bytes);
        Self { bytes, tracker }
    }

    pub fn bytes(&self) -> i64 {
        self.bytes
    }

    pub fn transfer_to(&mut self, tracker: Arc<MemTracker>) {
        if Arc::ptr_eq(&self.tracker, &tracker) {
            return;
        }
        self.tracker.release(self.bytes);
        tracker.consume(self.bytes);
        self.tracker = tracker;
    }
}

impl Drop for TrackedBytes {
    fn drop(&mut self) {
        self.tracker.release(self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::{MemTracker, NO_LIMIT, TrackedBytes};

    #[test]
    fn consume_charges_ancestors() {
        let root = MemTracker::new_root("process", NO_LIMIT);
        let query = MemTracker::new_child("query", 100, &root);
        let instance = MemTracker::new_child("instance", NO_LIMIT, &query);

        instance.consume(60);
        assert_eq!(instance.consumption(), 60);
        assert_eq!(query.consumption(), 60);
        assert_eq!(root.consumption(), 60);

        instance.release(10);
        assert_eq!(root.consumption(), 50);
        assert_eq!(root.peak_consumption(), 60);
    }

    #[test]
    fn try_consume_respects_ancestor_limit() {
        let root = MemTracker::new_root("process", NO_LIMIT);
        let query = MemTracker::new_child("query", 100, &root);
        let instance = MemTracker::new_child("instance", NO_LIMIT, &query);

        assert!(instance.try_consume(60));
        assert!(!instance.try_consume(50));
        assert_eq!(instance.consumption(), 60);
        assert_eq!(query.consumption(), 60);
        assert!(!query.any_limit_exceeded());

        instance.consume(50);
        assert!(query.limit_exceeded());
        assert!(instance.any_limit_exceeded());
    }

    #[test]
    fn tracked_bytes_move_between_trackers() {
        let root = MemTracker::new_root("process", NO_LIMIT);
        let a = MemTracker::new_child("a", NO_LIMIT, &root);
        let b = MemTracker::new_child("b", NO_LIMIT, &root);

        {
            let mut payload = TrackedBytes::new(128, a.clone());
            assert_eq!(a.consumption(), 128);
            payload.transfer_to(b.clone());
            assert_eq!(a.consumption(), 0);
            assert_eq!(b.consumption(), 128);
        }
        assert_eq!(b.consumption(), 0);
        assert_eq!(root.peak_consumption(), 128);
    }
}

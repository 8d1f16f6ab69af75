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
//! Process-wide thread quota split evenly across registered pools.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub struct ThreadResourceMgr {
    system_threads_quota: usize,
    pools: Mutex<Vec<Weak<ResourcePool>>>,
}

pub struct ResourcePool {
    mgr: Weak<ThreadResourceMgr>,
    num_threads: AtomicI64,
}

impl ThreadResourceMgr {
    /// `system_threads_quota == 0` defaults to 3x the core count, leaving
    /// headroom for blocked I/O threads.
    pub fn new(system_threads_quota: usize) -> Arc<Self> {
        let quota = if system_threads_quota > 0 {
            system_threads_quota
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                * 3
        };
        Arc::new(Self {
            system_threads_quota: quota,
            pools: Mutex::new(Vec::new()),
        })
    }

    pub fn system_threads_quota(&self) -> usize {
        self.system_threads_quota
    }

    pub fn register_pool(self: &Arc<Self>) -> Arc<ResourcePool> {
        let pool = Arc::new(ResourcePool {
            mgr: Arc::downgrade(self),
            num_threads: AtomicI64::new(0),
        });
        let mut guard = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        guard.retain(|weak| weak.strong_count() > 0);
        guard.push(Arc::downgrade(&pool));
        pool
    }

    fn num_pools(&self) -> usize {
        let guard = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        guard.iter().filter(|weak| weak.strong_count() > 0).count()
    }
}

impl ResourcePool {
    /// Per-pool quota: the system quota split across live pools.
    pub fn quota(&self) -> usize {
        let Some(mgr) = self.mgr.upgrade() else {
            return 1;
        };
        (mgr.system_threads_quota / mgr.num_pools().max(1)).max(1)
    }

    pub fn num_threads(&self) -> i64 {
        self.num_threads.load(Ordering::Relaxed)
    }

    pub fn try_acquire_thread_token(&self) -> bool {
        let quota = self.quota() as i64;
        let prev = self.num_threads.fetch_add(1, Ordering::AcqRel);
        if prev >= quota {
            self.num_threads.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    pub fn release_thread_token(&self) {
        let prev = self.num_threads.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::ThreadResourceMgr;

    #[test]
    fn tokens_bounded_by_quota() {
        let mgr = ThreadResourceMgr::new(2);
        let pool = mgr.register_pool();
        assert!(pool.try_acquire_thread_token());
        assert!(pool.try_acquire_thread_token());
        assert!(!pool.try_acquire_thread_token());
        pool.release_thread_token();
        assert!(pool.try_acquire_thread_token());
    }
}

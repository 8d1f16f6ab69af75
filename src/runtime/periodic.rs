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
//! One sampler thread servicing rate counters, sampling counters,
//! bucketing counters and time-series counters.
//!
//! Callers deregister a counter once its source stops changing; failing to
//! do so leaks a registry slot but stays correct.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::runtime::profile::{CounterRef, RuntimeProfile, TimeSeriesCounter};
use crate::wire::metrics::TCounterType;

fn counter_key(counter: &CounterRef) -> usize {
    Arc::as_ptr(counter) as usize
}

struct RateCounter {
    dst: CounterRef,
    src: CounterRef,
    elapsed_ms: i64,
}

struct SamplingCounter {
    dst: CounterRef,
    src: CounterRef,
    total: i64,
    num_samples: i64,
}

struct BucketingCounters {
    src: CounterRef,
    buckets: Vec<CounterRef>,
    num_sampled: i64,
}

#[derive(Default)]
struct Registries {
    rate_counters: HashMap<usize, RateCounter>,
    sampling_counters: HashMap<usize, SamplingCounter>,
    bucketing_counters: HashMap<usize, BucketingCounters>,
    time_series: HashMap<usize, Arc<TimeSeriesCounter>>,
}

struct UpdaterState {
    registries: Mutex<Registries>,
    stopped: AtomicBool,
    period: Duration,
}

/// Drives all periodically maintained counters of one runtime context.
/// Owned by `ExecEnv`; tests construct their own with a short period.
pub struct PeriodicCounterUpdater {
    state: Arc<UpdaterState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicCounterUpdater {
    pub fn new(period: Duration) -> Self {
        let state = Arc::new(UpdaterState {
            registries: Mutex::new(Registries::default()),
            stopped: AtomicBool::new(false),
            period: period.max(Duration::from_millis(1)),
        });
        let thread_state = Arc::clone(&state);
        let handle = std::thread::Builder::new()
            .name("counter_updater".to_string())
            .spawn(move || run_update_loop(thread_state))
            .expect("spawn counter updater");
        Self {
            state,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Registers a rate counter on `profile` differentiating `src` over
    /// wall time. Unit counters become units/sec, byte counters bytes/sec.
    pub fn add_rate_counter(
        &self,
        profile: &RuntimeProfile,
        name: impl Into<String>,
        src: CounterRef,
    ) -> CounterRef {
        let dst_type = match src.counter_type() {
            TCounterType::Bytes => TCounterType::BytesPerSecond,
            _ => TCounterType::UnitPerSecond,
        };
        let dst = profile.add_counter(name, dst_type);
        let mut guard = self
            .state
            .registries
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.rate_counters.insert(
            counter_key(&dst),
            RateCounter {
                dst: Arc::clone(&dst),
                src,
                elapsed_ms: 0,
            },
        );
        dst
    }

    pub fn stop_rate_counter(&self, counter: &CounterRef) {
        let mut guard = self
            .state
            .registries
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.rate_counters.remove(&counter_key(counter));
    }

    /// Registers a sampling counter on `profile` averaging the samples of
    /// `src` taken since creation.
    pub fn add_sampling_counter(
        &self,
        profile: &RuntimeProfile,
        name: impl Into<String>,
        src: CounterRef,
    ) -> CounterRef {
        let dst = profile.add_counter(name, src.counter_type());
        let mut guard = self
            .state
            .registries
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.sampling_counters.insert(
            counter_key(&dst),
            SamplingCounter {
                dst: Arc::clone(&dst),
                src,
                total: 0,
                num_samples: 0,
            },
        );
        dst
    }

    pub fn stop_sampling_counter(&self, counter: &CounterRef) {
        let mut guard = self
            .state
            .registries
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.sampling_counters.remove(&counter_key(counter));
    }

    /// Registers a bucket vector: each period the bucket at the source's
    /// current value (clamped to the last bucket) is incremented.
    pub fn register_bucketing_counters(&self, src: CounterRef, buckets: Vec<CounterRef>) {
        if buckets.is_empty() {
            return;
        }
        let mut guard = self
            .state
            .registries
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.bucketing_counters.insert(
            counter_key(&src),
            BucketingCounters {
                src,
                buckets,
                num_sampled: 0,
            },
        );
    }

    pub fn stop_bucketing_counters(&self, src: &CounterRef) {
        let mut guard = self
            .state
            .registries
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.bucketing_counters.remove(&counter_key(src));
    }

    /// Creates a time-series counter on `profile` sampling `src` each
    /// period. Time-series counters are never merged across nodes.
    pub fn add_time_series_counter(
        &self,
        profile: &RuntimeProfile,
        name: impl Into<String>,
        src: CounterRef,
    ) -> Arc<TimeSeriesCounter> {
        let period_ms = self.state.period.as_millis().min(i32::MAX as u128) as i32;
        let series = TimeSeriesCounter::new(name, src.counter_type(), period_ms, Arc::clone(&src));
        profile.add_time_series(Arc::clone(&series));
        let mut guard = self
            .state
            .registries
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard
            .time_series
            .insert(Arc::as_ptr(&series) as usize, Arc::clone(&series));
        series
    }

    pub fn stop_time_series_counter(&self, series: &Arc<TimeSeriesCounter>) {
        let mut guard = self
            .state
            .registries
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.time_series.remove(&(Arc::as_ptr(series) as usize));
    }
}

impl Drop for PeriodicCounterUpdater {
    fn drop(&mut self) {
        self.state.stopped.store(true, Ordering::Release);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn run_update_loop(state: Arc<UpdaterState>) {
    let period_ms = state.period.as_millis().min(i64::MAX as u128) as i64;
    while !state.stopped.load(Ordering::Acquire) {
        std::thread::sleep(state.period);
        let mut guard = state.registries.lock().unwrap_or_else(|e| e.into_inner());

        for rate in guard.rate_counters.values_mut() {
            rate.elapsed_ms += period_ms;
            let value = rate.src.value();
            if rate.elapsed_ms > 0 {
                rate.dst.set(value * 1000 / rate.elapsed_ms);
            }
        }

        for sampling in guard.sampling_counters.values_mut() {
            sampling.total = sampling.total.saturating_add(sampling.src.value());
            sampling.num_samples += 1;
            sampling.dst.set(sampling.total / sampling.num_samples);
        }

        for bucketing in guard.bucketing_counters.values_mut() {
            let idx = (bucketing.src.value().max(0) as usize)
                .min(bucketing.buckets.len().saturating_sub(1));
            bucketing.buckets[idx].update(1);
            bucketing.num_sampled += 1;
        }

        for series in guard.time_series.values() {
            series.sample();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PeriodicCounterUpdater;
    use crate::runtime::profile::RuntimeProfile;
    use crate::wire::metrics::TCounterType;
    use std::time::Duration;

    #[test]
    fn rate_counter_tracks_source() {
        let updater = PeriodicCounterUpdater::new(Duration::from_millis(5));
        let profile = RuntimeProfile::new("node");
        let src = profile.add_counter("BytesRead", TCounterType::Bytes);
        let rate = updater.add_rate_counter(&profile, "BytesReadRate", src.clone());
        src.set(1_000_000);
        std::thread::sleep(Duration::from_millis(60));
        assert!(rate.value() > 0);
        updater.stop_rate_counter(&rate);
        let frozen = rate.value();
        src.set(100_000_000);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(rate.value(), frozen);
    }

    #[test]
    fn bucketing_counts_source_level() {
        let updater = PeriodicCounterUpdater::new(Duration::from_millis(5));
        let profile = RuntimeProfile::new("node");
        let src = profile.add_counter("Level", TCounterType::Unit);
        let buckets: Vec<_> = (0..4)
            .map(|i| profile.add_counter(format!("Bucket{i}"), TCounterType::Unit))
            .collect();
        updater.register_bucketing_counters(src.clone(), buckets.clone());
        src.set(2);
        std::thread::sleep(Duration::from_millis(60));
        updater.stop_bucketing_counters(&src);
        assert!(buckets[2].value() > 0);
        assert_eq!(buckets[0].value() + buckets[1].value() + buckets[3].value(), 0);
    }

    #[test]
    fn time_series_samples_accumulate() {
        let updater = PeriodicCounterUpdater::new(Duration::from_millis(5));
        let profile = RuntimeProfile::new("node");
        let src = profile.add_counter("Rows", TCounterType::Unit);
        let series = updater.add_time_series_counter(&profile, "RowsSeries", src.clone());
        src.set(7);
        std::thread::sleep(Duration::from_millis(60));
        updater.stop_time_series_counter(&series);
        let (_period, samples) = series.samples();
        assert!(!samples.is_empty());
        assert!(samples.iter().any(|v| *v == 7));
    }
}

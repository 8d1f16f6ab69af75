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
//! Hierarchical, thread-safe runtime profiles.
//!
//! A profile is a named node in a tree of counters, info strings and event
//! sequences. Nodes are shared via `Arc`; a parent owns its children and no
//! node points back up, so the tree cannot contain cycles. Each kind of
//! payload is guarded by its own lock, and no caller-supplied code runs
//! while a lock is held.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use crate::common::pretty;
use crate::common::status::Status;
use crate::common::thrift_codec;
use crate::wire::metrics::TCounterType;
use crate::wire::runtime_profile::{
    TCounter, TEventSequence, TRuntimeProfileNode, TRuntimeProfileTree, TTimeSeriesCounter,
};

pub const TOTAL_TIME_COUNTER_NAME: &str = "TotalTime";

/// Root of the child-counter forest; top-level counters are children of "".
pub const ROOT_COUNTER_NAME: &str = "";

pub type CounterRef = Arc<Counter>;
pub type DerivedCounterFn = Box<dyn Fn() -> i64 + Send + Sync>;

enum CounterKind {
    Plain(AtomicI64),
    /// `peak` is reported as the value; `current` tracks the live level.
    HighWaterMark {
        current: AtomicI64,
        peak: AtomicI64,
    },
    Derived(DerivedCounterFn),
}

impl std::fmt::Debug for CounterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CounterKind::Plain(v) => write!(f, "Plain({})", v.load(Ordering::Relaxed)),
            CounterKind::HighWaterMark { current, peak } => write!(
                f,
                "HighWaterMark(current={}, peak={})",
                current.load(Ordering::Relaxed),
                peak.load(Ordering::Relaxed)
            ),
            CounterKind::Derived(_) => write!(f, "Derived"),
        }
    }
}

#[derive(Debug)]
pub struct Counter {
    name: String,
    type_: TCounterType,
    kind: CounterKind,
}

impl Counter {
    fn plain(name: impl Into<String>, type_: TCounterType) -> CounterRef {
        Arc::new(Counter {
            name: name.into(),
            type_,
            kind: CounterKind::Plain(AtomicI64::new(0)),
        })
    }

    fn high_water_mark(name: impl Into<String>, type_: TCounterType) -> CounterRef {
        Arc::new(Counter {
            name: name.into(),
            type_,
            kind: CounterKind::HighWaterMark {
                current: AtomicI64::new(0),
                peak: AtomicI64::new(0),
            },
        })
    }

    fn derived(name: impl Into<String>, type_: TCounterType, f: DerivedCounterFn) -> CounterRef {
        Arc::new(Counter {
            name: name.into(),
            type_,
            kind: CounterKind::Derived(f),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn counter_type(&self) -> TCounterType {
        self.type_
    }

    /// Atomic delta update. On a high-water-mark counter this moves the
    /// current level and raises the peak.
    pub fn update(&self, delta: i64) {
        match &self.kind {
            CounterKind::Plain(v) => {
                v.fetch_add(delta, Ordering::Relaxed);
            }
            CounterKind::HighWaterMark { current, peak } => {
                let new_val = current.fetch_add(delta, Ordering::AcqRel) + delta;
                update_max(peak, new_val);
            }
            CounterKind::Derived(_) => {
                debug_assert!(false, "update() on derived counter {}", self.name);
            }
        }
    }

    pub fn bit_or(&self, delta: i64) {
        if let CounterKind::Plain(v) = &self.kind {
            v.fetch_or(delta, Ordering::Relaxed);
        }
    }

    pub fn set(&self, value: i64) {
        match &self.kind {
            CounterKind::Plain(v) => v.store(value, Ordering::Relaxed),
            CounterKind::HighWaterMark { current, peak } => {
                current.store(value, Ordering::Relaxed);
                update_max(peak, value);
            }
            CounterKind::Derived(_) => {
                debug_assert!(false, "set() on derived counter {}", self.name);
            }
        }
    }

    pub fn set_double(&self, value: f64) {
        self.set(value.to_bits() as i64);
    }

    /// Reported value: plain value, high-water-mark peak, or the derived
    /// function's result.
    pub fn value(&self) -> i64 {
        match &self.kind {
            CounterKind::Plain(v) => v.load(Ordering::Relaxed),
            CounterKind::HighWaterMark { peak, .. } => peak.load(Ordering::Relaxed),
            CounterKind::Derived(f) => f(),
        }
    }

    pub fn double_value(&self) -> f64 {
        f64::from_bits(self.value() as u64)
    }

    /// Live level of a high-water-mark counter; equals `value()` otherwise.
    pub fn current_value(&self) -> i64 {
        match &self.kind {
            CounterKind::HighWaterMark { current, .. } => current.load(Ordering::Relaxed),
            _ => self.value(),
        }
    }

    /// Bounded update on a high-water-mark counter: applies `delta` only if
    /// the new level would not exceed `max`. Atomic CAS loop.
    pub fn try_update(&self, delta: i64, max: i64) -> bool {
        let CounterKind::HighWaterMark { current, peak } = &self.kind else {
            debug_assert!(false, "try_update() on non-HWM counter {}", self.name);
            return false;
        };
        loop {
            let old_val = current.load(Ordering::Acquire);
            let new_val = old_val + delta;
            if new_val > max {
                return false;
            }
            if current
                .compare_exchange(old_val, new_val, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                update_max(peak, new_val);
                return true;
            }
        }
    }
}

fn update_max(cell: &AtomicI64, value: i64) {
    let mut prev = cell.load(Ordering::Relaxed);
    while value > prev {
        match cell.compare_exchange(prev, value, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => prev = actual,
        }
    }
}

/// Derived-counter function: throughput of `total` per second of `timer`.
pub fn units_per_second(total: &CounterRef, timer: &CounterRef) -> i64 {
    let elapsed_ns = timer.value();
    if elapsed_ns <= 0 {
        return 0;
    }
    let secs = elapsed_ns as f64 / 1_000_000_000.0;
    (total.value() as f64 / secs) as i64
}

/// Derived-counter function: plain sum over a counter list.
pub fn counter_sum(counters: &[CounterRef]) -> i64 {
    counters
        .iter()
        .fold(0i64, |acc, c| acc.saturating_add(c.value()))
}

/// Wall, user and system time of one thread of execution, plus context
/// switch counts.
#[derive(Clone, Debug)]
pub struct ThreadCounters {
    pub total_time: CounterRef,
    pub user_time: CounterRef,
    pub sys_time: CounterRef,
    pub voluntary_context_switches: CounterRef,
    pub involuntary_context_switches: CounterRef,
}

/// Ordered (label, ns-since-start) pairs tracking one serial process.
/// Marked from a single thread.
#[derive(Debug)]
pub struct EventSequence {
    state: Mutex<EventSequenceState>,
}

#[derive(Debug)]
struct EventSequenceState {
    start: Instant,
    events: Vec<(String, i64)>,
}

impl EventSequence {
    fn new() -> Self {
        Self {
            state: Mutex::new(EventSequenceState {
                start: Instant::now(),
                events: Vec::new(),
            }),
        }
    }

    fn from_thrift(t: &TEventSequence) -> Self {
        let events = t
            .labels
            .iter()
            .cloned()
            .zip(t.timestamps.iter().copied())
            .collect();
        Self {
            state: Mutex::new(EventSequenceState {
                start: Instant::now(),
                events,
            }),
        }
    }

    pub fn mark_event(&self, label: impl Into<String>) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = clamp_u128_to_i64(guard.start.elapsed().as_nanos());
        guard.events.push((label.into(), elapsed));
    }

    pub fn elapsed_time(&self) -> i64 {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        clamp_u128_to_i64(guard.start.elapsed().as_nanos())
    }

    pub fn events(&self) -> Vec<(String, i64)> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .clone()
    }

    fn to_thrift(&self, name: &str) -> TEventSequence {
        let events = self.events();
        TEventSequence {
            name: name.to_string(),
            timestamps: events.iter().map(|(_, t)| *t).collect(),
            labels: events.into_iter().map(|(l, _)| l).collect(),
        }
    }
}

const STREAMING_SAMPLER_CAPACITY: usize = 64;

/// Fixed-capacity sample ring. When full, adjacent samples are averaged
/// pairwise and the effective period doubles, so the window keeps covering
/// the whole lifetime at decreasing resolution.
#[derive(Debug)]
struct StreamingSampler {
    samples: Vec<i64>,
    period_ms: i32,
    // Incoming samples folded into one stored sample.
    collection_ratio: i32,
    current_sum: i64,
    current_count: i32,
}

impl StreamingSampler {
    fn new(initial_period_ms: i32) -> Self {
        Self {
            samples: Vec::with_capacity(STREAMING_SAMPLER_CAPACITY),
            period_ms: initial_period_ms.max(1),
            collection_ratio: 1,
            current_sum: 0,
            current_count: 0,
        }
    }

    fn from_values(period_ms: i32, values: Vec<i64>) -> Self {
        Self {
            samples: values,
            period_ms: period_ms.max(1),
            collection_ratio: 1,
            current_sum: 0,
            current_count: 0,
        }
    }

    fn add_sample(&mut self, sample: i64) {
        self.current_sum = self.current_sum.saturating_add(sample);
        self.current_count += 1;
        if self.current_count < self.collection_ratio {
            return;
        }
        self.samples
            .push(self.current_sum / self.current_count as i64);
        self.current_sum = 0;
        self.current_count = 0;

        if self.samples.len() == STREAMING_SAMPLER_CAPACITY {
            let halved: Vec<i64> = self
                .samples
                .chunks(2)
                .map(|pair| pair.iter().sum::<i64>() / pair.len() as i64)
                .collect();
            self.samples = halved;
            self.period_ms = self.period_ms.saturating_mul(2);
            self.collection_ratio = self.collection_ratio.saturating_mul(2);
        }
    }
}

/// Periodically sampled value series. Fed by the sampler thread; never
/// merged across nodes.
#[derive(Debug)]
pub struct TimeSeriesCounter {
    name: String,
    type_: TCounterType,
    source: Option<CounterRef>,
    samples: Mutex<StreamingSampler>,
}

impl TimeSeriesCounter {
    pub(crate) fn new(
        name: impl Into<String>,
        type_: TCounterType,
        period_ms: i32,
        source: CounterRef,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            type_,
            source: Some(source),
            samples: Mutex::new(StreamingSampler::new(period_ms)),
        })
    }

    fn from_thrift(t: &TTimeSeriesCounter) -> Arc<Self> {
        Arc::new(Self {
            name: t.name.clone(),
            type_: TCounterType::from_i32(t.type_),
            source: None,
            samples: Mutex::new(StreamingSampler::from_values(
                t.period_ms,
                t.values.clone(),
            )),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take one sample from the source counter. Read-only series (rebuilt
    /// from thrift) have no source and ignore this.
    pub(crate) fn sample(&self) {
        let Some(source) = &self.source else {
            return;
        };
        let value = source.value();
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .add_sample(value);
    }

    pub fn samples(&self) -> (i32, Vec<i64>) {
        let guard = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        (guard.period_ms, guard.samples.clone())
    }

    fn to_thrift(&self) -> TTimeSeriesCounter {
        let (period_ms, values) = self.samples();
        TTimeSeriesCounter {
            name: self.name.clone(),
            type_: self.type_.as_i32(),
            period_ms,
            values,
        }
    }
}

#[derive(Default)]
struct CounterMaps {
    counter_map: HashMap<String, CounterRef>,
    // Parent counter name -> child counter names; "" is the root.
    child_counter_map: HashMap<String, BTreeSet<String>>,
}

#[derive(Default)]
struct ChildSet {
    // (child, indent) in insertion order; map for lookups by name.
    children: Vec<(RuntimeProfile, bool)>,
    child_map: HashMap<String, RuntimeProfile>,
}

#[derive(Default)]
struct InfoStrings {
    map: HashMap<String, String>,
    display_order: Vec<String>,
}

/// A named node in the profile tree. Clones share the node.
#[derive(Clone)]
pub struct RuntimeProfile {
    inner: Arc<RuntimeProfileInner>,
}

struct RuntimeProfileInner {
    name: RwLock<String>,
    metadata: AtomicI64,
    counters: Mutex<CounterMaps>,
    children: Mutex<ChildSet>,
    info_strings: Mutex<InfoStrings>,
    event_sequences: Mutex<HashMap<String, Arc<EventSequence>>>,
    time_series: Mutex<HashMap<String, Arc<TimeSeriesCounter>>>,
    total_time: CounterRef,
    // Fraction of root total time spent in this node alone, as f64 bits.
    local_time_percent: AtomicU64,
}

impl std::fmt::Debug for RuntimeProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeProfile")
            .field("name", &self.name())
            .finish()
    }
}

impl RuntimeProfile {
    pub fn new(name: impl Into<String>) -> Self {
        let total_time = Counter::plain(TOTAL_TIME_COUNTER_NAME, TCounterType::TimeNs);
        let mut counter_maps = CounterMaps::default();
        counter_maps
            .counter_map
            .insert(TOTAL_TIME_COUNTER_NAME.to_string(), Arc::clone(&total_time));
        counter_maps
            .child_counter_map
            .entry(ROOT_COUNTER_NAME.to_string())
            .or_default()
            .insert(TOTAL_TIME_COUNTER_NAME.to_string());
        Self {
            inner: Arc::new(RuntimeProfileInner {
                name: RwLock::new(name.into()),
                metadata: AtomicI64::new(0),
                counters: Mutex::new(counter_maps),
                children: Mutex::new(ChildSet::default()),
                info_strings: Mutex::new(InfoStrings::default()),
                event_sequences: Mutex::new(HashMap::new()),
                time_series: Mutex::new(HashMap::new()),
                total_time,
                local_time_percent: AtomicU64::new(0f64.to_bits()),
            }),
        }
    }

    pub fn name(&self) -> String {
        self.inner
            .name
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Only call on top-level profiles; children are filed by name.
    pub fn set_name(&self, name: impl Into<String>) {
        let mut guard = self.inner.name.write().unwrap_or_else(|e| e.into_inner());
        *guard = name.into();
    }

    pub fn metadata(&self) -> i64 {
        self.inner.metadata.load(Ordering::Relaxed)
    }

    pub fn set_metadata(&self, md: i64) {
        self.inner.metadata.store(md, Ordering::Relaxed);
    }

    pub fn total_time_counter(&self) -> CounterRef {
        Arc::clone(&self.inner.total_time)
    }

    pub fn local_time_percent(&self) -> f64 {
        f64::from_bits(self.inner.local_time_percent.load(Ordering::Relaxed))
    }

    pub fn num_counters(&self) -> usize {
        self.inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .counter_map
            .len()
    }

    pub fn add_counter(&self, name: impl Into<String>, type_: TCounterType) -> CounterRef {
        self.add_child_counter(name, type_, ROOT_COUNTER_NAME)
    }

    /// Adds a counter under `parent_counter_name` in the child-counter
    /// forest. Re-adding an existing name returns the existing counter.
    pub fn add_child_counter(
        &self,
        name: impl Into<String>,
        type_: TCounterType,
        parent_counter_name: &str,
    ) -> CounterRef {
        let name = name.into();
        let mut guard = self.inner.counters.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = guard.counter_map.get(&name) {
            return Arc::clone(existing);
        }
        let counter = Counter::plain(name.clone(), type_);
        guard.counter_map.insert(name.clone(), Arc::clone(&counter));
        guard
            .child_counter_map
            .entry(parent_counter_name.to_string())
            .or_default()
            .insert(name);
        counter
    }

    pub fn add_high_water_mark_counter(
        &self,
        name: impl Into<String>,
        type_: TCounterType,
        parent_counter_name: &str,
    ) -> CounterRef {
        let name = name.into();
        let mut guard = self.inner.counters.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = guard.counter_map.get(&name) {
            return Arc::clone(existing);
        }
        let counter = Counter::high_water_mark(name.clone(), type_);
        guard.counter_map.insert(name.clone(), Arc::clone(&counter));
        guard
            .child_counter_map
            .entry(parent_counter_name.to_string())
            .or_default()
            .insert(name);
        counter
    }

    /// Returns None if a counter with this name already exists.
    pub fn add_derived_counter(
        &self,
        name: impl Into<String>,
        type_: TCounterType,
        f: DerivedCounterFn,
        parent_counter_name: &str,
    ) -> Option<CounterRef> {
        let name = name.into();
        let mut guard = self.inner.counters.lock().unwrap_or_else(|e| e.into_inner());
        if guard.counter_map.contains_key(&name) {
            return None;
        }
        let counter = Counter::derived(name.clone(), type_, f);
        guard.counter_map.insert(name.clone(), Arc::clone(&counter));
        guard
            .child_counter_map
            .entry(parent_counter_name.to_string())
            .or_default()
            .insert(name);
        Some(counter)
    }

    pub fn add_timer(&self, name: impl Into<String>) -> CounterRef {
        self.add_counter(name, TCounterType::TimeNs)
    }

    /// Thread-usage counter group under `<prefix>TotalWallClockTime`.
    pub fn add_thread_counters(&self, prefix: &str) -> ThreadCounters {
        let total_name = format!("{prefix}TotalWallClockTime");
        let total_time = self.add_counter(total_name.clone(), TCounterType::TimeNs);
        ThreadCounters {
            user_time: self.add_child_counter(
                format!("{prefix}UserTime"),
                TCounterType::TimeNs,
                &total_name,
            ),
            sys_time: self.add_child_counter(
                format!("{prefix}SysTime"),
                TCounterType::TimeNs,
                &total_name,
            ),
            voluntary_context_switches: self.add_child_counter(
                format!("{prefix}VoluntaryContextSwitches"),
                TCounterType::Unit,
                &total_name,
            ),
            involuntary_context_switches: self.add_child_counter(
                format!("{prefix}InvoluntaryContextSwitches"),
                TCounterType::Unit,
                &total_name,
            ),
            total_time,
        }
    }

    pub fn get_counter(&self, name: &str) -> Option<CounterRef> {
        self.inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .counter_map
            .get(name)
            .cloned()
    }

    /// Collects counters named `name` from this node and all descendants.
    pub fn get_counters(&self, name: &str, out: &mut Vec<CounterRef>) {
        if let Some(c) = self.get_counter(name) {
            out.push(c);
        }
        for (child, _) in self.children_with_indent() {
            child.get_counters(name, out);
        }
    }

    pub fn add_info_string(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let mut guard = self
            .inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if guard.map.insert(key.clone(), value.into()).is_none() {
            guard.display_order.push(key);
        }
    }

    pub fn get_info_string(&self, key: &str) -> Option<String> {
        self.inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map
            .get(key)
            .cloned()
    }

    pub fn add_event_sequence(&self, key: impl Into<String>) -> Arc<EventSequence> {
        let key = key.into();
        let mut guard = self
            .inner
            .event_sequences
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            guard
                .entry(key)
                .or_insert_with(|| Arc::new(EventSequence::new())),
        )
    }

    pub fn get_event_sequence(&self, name: &str) -> Option<Arc<EventSequence>> {
        self.inner
            .event_sequences
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub(crate) fn add_time_series(&self, counter: Arc<TimeSeriesCounter>) {
        let mut guard = self
            .inner
            .time_series
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.entry(counter.name().to_string()).or_insert(counter);
    }

    /// Adds `child` at the end of the child list. A child with the same
    /// name is not added twice.
    pub fn add_child(&self, child: RuntimeProfile, indent: bool) {
        self.insert_child(child, indent, None);
    }

    /// Adds `child` immediately after the child named `location`, which
    /// must already be present; appends when it is not.
    pub fn add_child_after(&self, child: RuntimeProfile, indent: bool, location: &str) {
        self.insert_child(child, indent, Some(location));
    }

    fn insert_child(&self, child: RuntimeProfile, indent: bool, location: Option<&str>) {
        let child_name = child.name();
        let mut guard = self.inner.children.lock().unwrap_or_else(|e| e.into_inner());
        if guard.child_map.contains_key(&child_name) {
            return;
        }
        guard.child_map.insert(child_name, child.clone());
        let pos = location
            .and_then(|loc| guard.children.iter().position(|(c, _)| c.name() == loc))
            .map(|idx| idx + 1)
            .unwrap_or(guard.children.len());
        guard.children.insert(pos, (child, indent));
    }

    pub fn get_child(&self, name: &str) -> Option<RuntimeProfile> {
        self.inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .child_map
            .get(name)
            .cloned()
    }

    fn get_or_create_child(&self, name: &str, indent: bool) -> RuntimeProfile {
        if let Some(existing) = self.get_child(name) {
            return existing;
        }
        let child = RuntimeProfile::new(name);
        self.add_child(child.clone(), indent);
        child
    }

    pub fn children(&self) -> Vec<RuntimeProfile> {
        self.children_with_indent()
            .into_iter()
            .map(|(c, _)| c)
            .collect()
    }

    fn children_with_indent(&self) -> Vec<(RuntimeProfile, bool)> {
        self.inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .children
            .clone()
    }

    /// All profiles in this subtree, including self, preorder.
    pub fn get_all_children(&self, out: &mut Vec<RuntimeProfile>) {
        out.push(self.clone());
        for (child, _) in self.children_with_indent() {
            child.get_all_children(out);
        }
    }

    pub fn sort_children<F>(&self, mut cmp: F)
    where
        F: FnMut(&RuntimeProfile, &RuntimeProfile) -> CmpOrdering,
    {
        let mut guard = self.inner.children.lock().unwrap_or_else(|e| e.into_inner());
        guard.children.sort_by(|a, b| cmp(&a.0, &b.0));
    }

    /// Merges `src` into this profile: counters with identical path are
    /// summed, first-seen info strings are preserved, missing children are
    /// created, extra children on this side are left intact. Event
    /// sequences and time-series counters are not merged. Running this
    /// concurrently in opposing directions on the same pair is not safe.
    pub fn merge(&self, src: &RuntimeProfile) {
        let (src_counters, src_child_counters) = src.snapshot_counters();
        {
            let mut guard = self.inner.counters.lock().unwrap_or_else(|e| e.into_inner());
            for (name, type_, value) in &src_counters {
                let counter = match guard.counter_map.get(name) {
                    Some(c) => Arc::clone(c),
                    None => {
                        let c = Counter::plain(name.clone(), *type_);
                        guard.counter_map.insert(name.clone(), Arc::clone(&c));
                        c
                    }
                };
                counter.update(*value);
            }
            for (parent, children) in src_child_counters {
                guard
                    .child_counter_map
                    .entry(parent)
                    .or_default()
                    .extend(children);
            }
        }

        for (key, value) in src.snapshot_info_strings() {
            let mut guard = self
                .inner
                .info_strings
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if !guard.map.contains_key(&key) {
                guard.map.insert(key.clone(), value);
                guard.display_order.push(key);
            }
        }

        for (src_child, indent) in src.children_with_indent() {
            let dst_child = self.get_or_create_child(&src_child.name(), indent);
            dst_child.merge(&src_child);
        }
    }

    /// Updates this profile from an incoming serialized tree: counter
    /// values and info strings are replaced by the incoming ones. Event
    /// sequences and time-series counters are not touched.
    pub fn update(&self, tree: &TRuntimeProfileTree) {
        if tree.nodes.is_empty() {
            return;
        }
        let mut idx = 0usize;
        self.update_from_nodes(&tree.nodes, &mut idx);
    }

    fn update_from_nodes(&self, nodes: &[TRuntimeProfileNode], idx: &mut usize) {
        let Some(node) = nodes.get(*idx) else {
            return;
        };
        *idx += 1;

        {
            let mut guard = self.inner.counters.lock().unwrap_or_else(|e| e.into_inner());
            for tcounter in &node.counters {
                let counter = match guard.counter_map.get(&tcounter.name) {
                    Some(c) => Arc::clone(c),
                    None => {
                        let c = Counter::plain(tcounter.name.clone(), tcounter.type_);
                        guard.counter_map.insert(tcounter.name.clone(), Arc::clone(&c));
                        guard
                            .child_counter_map
                            .entry(ROOT_COUNTER_NAME.to_string())
                            .or_default()
                            .insert(tcounter.name.clone());
                        c
                    }
                };
                counter.set(tcounter.value);
            }
            for (parent, children) in &node.child_counters_map {
                guard
                    .child_counter_map
                    .entry(parent.clone())
                    .or_default()
                    .extend(children.iter().cloned());
            }
        }

        {
            let mut guard = self
                .inner
                .info_strings
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for key in &node.info_strings_display_order {
                let Some(value) = node.info_strings.get(key) else {
                    continue;
                };
                if guard.map.insert(key.clone(), value.clone()).is_none() {
                    guard.display_order.push(key.clone());
                }
            }
        }

        self.set_metadata(node.metadata);

        for _ in 0..node.num_children {
            let Some(child_node) = nodes.get(*idx) else {
                return;
            };
            let child = self.get_or_create_child(&child_node.name, child_node.indent);
            child.update_from_nodes(nodes, idx);
        }
    }

    pub fn create_from_thrift(tree: &TRuntimeProfileTree) -> Option<RuntimeProfile> {
        let mut idx = 0usize;
        Self::create_from_nodes(&tree.nodes, &mut idx)
    }

    fn create_from_nodes(nodes: &[TRuntimeProfileNode], idx: &mut usize) -> Option<RuntimeProfile> {
        let node = nodes.get(*idx)?;
        *idx += 1;

        let profile = RuntimeProfile::new(node.name.clone());
        profile.set_metadata(node.metadata);
        {
            let mut guard = profile
                .inner
                .counters
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for tcounter in &node.counters {
                let counter = match guard.counter_map.get(&tcounter.name) {
                    Some(c) => Arc::clone(c),
                    None => {
                        let c = Counter::plain(tcounter.name.clone(), tcounter.type_);
                        guard.counter_map.insert(tcounter.name.clone(), Arc::clone(&c));
                        c
                    }
                };
                counter.set(tcounter.value);
            }
            for (parent, children) in &node.child_counters_map {
                guard
                    .child_counter_map
                    .entry(parent.clone())
                    .or_default()
                    .extend(children.iter().cloned());
            }
            // Counters not claimed by any parent belong to the root.
            let claimed: BTreeSet<String> = guard
                .child_counter_map
                .values()
                .flat_map(|s| s.iter().cloned())
                .collect();
            let unclaimed: Vec<String> = guard
                .counter_map
                .keys()
                .filter(|name| !claimed.contains(*name))
                .cloned()
                .collect();
            guard
                .child_counter_map
                .entry(ROOT_COUNTER_NAME.to_string())
                .or_default()
                .extend(unclaimed);
        }
        {
            let mut guard = profile
                .inner
                .info_strings
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for key in &node.info_strings_display_order {
                if let Some(value) = node.info_strings.get(key) {
                    if guard.map.insert(key.clone(), value.clone()).is_none() {
                        guard.display_order.push(key.clone());
                    }
                }
            }
        }
        if let Some(seqs) = &node.event_sequences {
            let mut guard = profile
                .inner
                .event_sequences
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for seq in seqs {
                guard.insert(seq.name.clone(), Arc::new(EventSequence::from_thrift(seq)));
            }
        }
        if let Some(series) = &node.time_series_counters {
            let mut guard = profile
                .inner
                .time_series
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for ts in series {
                guard.insert(ts.name.clone(), TimeSeriesCounter::from_thrift(ts));
            }
        }

        let num_children = node.num_children.max(0);
        for _ in 0..num_children {
            let indent = nodes.get(*idx).map(|n| n.indent).unwrap_or(false);
            if let Some(child) = Self::create_from_nodes(nodes, idx) {
                profile.add_child(child, indent);
            }
        }
        Some(profile)
    }

    pub fn to_thrift(&self) -> TRuntimeProfileTree {
        let mut nodes = Vec::new();
        self.to_thrift_nodes(&mut nodes, false);
        TRuntimeProfileTree::new(nodes)
    }

    fn to_thrift_nodes(&self, out: &mut Vec<TRuntimeProfileNode>, indent: bool) {
        let (counters, child_counters_map) = self.snapshot_counters();
        let tcounters = counters
            .into_iter()
            .map(|(name, type_, value)| TCounter::new(name, type_, value))
            .collect();

        let (info_strings, info_strings_display_order) = {
            let guard = self
                .inner
                .info_strings
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            (
                guard.map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                guard.display_order.clone(),
            )
        };

        let event_sequences: Vec<(String, Arc<EventSequence>)> = {
            let guard = self
                .inner
                .event_sequences
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        let tseqs: Vec<TEventSequence> = event_sequences
            .iter()
            .map(|(name, seq)| seq.to_thrift(name))
            .collect();

        let tseries: Vec<TTimeSeriesCounter> = {
            let series: Vec<Arc<TimeSeriesCounter>> = self
                .inner
                .time_series
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .values()
                .cloned()
                .collect();
            series.iter().map(|ts| ts.to_thrift()).collect()
        };

        let children = self.children_with_indent();

        out.push(TRuntimeProfileNode {
            name: self.name(),
            num_children: children.len() as i32,
            counters: tcounters,
            metadata: self.metadata(),
            indent,
            info_strings,
            info_strings_display_order,
            child_counters_map: child_counters_map.into_iter().collect(),
            event_sequences: if tseqs.is_empty() { None } else { Some(tseqs) },
            time_series_counters: if tseries.is_empty() {
                None
            } else {
                Some(tseries)
            },
        });

        for (child, child_indent) in children {
            child.to_thrift_nodes(out, child_indent);
        }
    }

    // Snapshot counter refs under the lock, evaluate values after dropping
    // it: derived counters run caller-supplied code.
    fn snapshot_counters(
        &self,
    ) -> (
        Vec<(String, TCounterType, i64)>,
        HashMap<String, BTreeSet<String>>,
    ) {
        let (refs, child_map) = {
            let guard = self.inner.counters.lock().unwrap_or_else(|e| e.into_inner());
            let refs: Vec<CounterRef> = guard.counter_map.values().cloned().collect();
            (refs, guard.child_counter_map.clone())
        };
        let mut values: Vec<(String, TCounterType, i64)> = refs
            .into_iter()
            .map(|c| (c.name().to_string(), c.counter_type(), c.value()))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        (values, child_map)
    }

    fn snapshot_info_strings(&self) -> Vec<(String, String)> {
        let guard = self
            .inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard
            .display_order
            .iter()
            .filter_map(|k| guard.map.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Divides all counters (except derived ones) by `n`, recursively.
    /// Used to build average profiles across instances.
    pub fn divide(&self, n: i64) {
        if n <= 0 {
            return;
        }
        let refs: Vec<CounterRef> = {
            let guard = self.inner.counters.lock().unwrap_or_else(|e| e.into_inner());
            guard.counter_map.values().cloned().collect()
        };
        for counter in refs {
            if matches!(counter.kind, CounterKind::Derived(_)) {
                continue;
            }
            counter.set(counter.value() / n);
        }
        for (child, _) in self.children_with_indent() {
            child.divide(n);
        }
    }

    /// One top-down walk computing, for every node, the fraction of the
    /// root's total time spent in that node alone.
    pub fn compute_time_in_profile(&self) {
        self.compute_time_in_profile_helper(self.total_time_counter().value());
    }

    fn compute_time_in_profile_helper(&self, root_total: i64) {
        if root_total <= 0 {
            return;
        }
        let children = self.children_with_indent();
        let children_total: i64 = children
            .iter()
            .map(|(c, _)| c.total_time_counter().value())
            .sum();
        let local = (self.total_time_counter().value() - children_total).max(0);
        let fraction = (local as f64 / root_total as f64).clamp(0.0, 1.0);
        self.inner
            .local_time_percent
            .store(fraction.to_bits(), Ordering::Relaxed);
        for (child, _) in children {
            child.compute_time_in_profile_helper(root_total);
        }
    }

    /// Prefix-indented rendering of the tree.
    pub fn pretty_print(&self, out: &mut String, prefix: &str) {
        let total = self.total_time_counter().value();
        let _ = writeln!(
            out,
            "{}{}:(Total: {}, % non-child: {:.2}%)",
            prefix,
            self.name(),
            pretty::print(total, TCounterType::TimeNs),
            self.local_time_percent() * 100.0
        );

        for (key, value) in self.snapshot_info_strings() {
            let _ = writeln!(out, "{prefix}   {key}: {value}");
        }

        let sequences: Vec<(String, Arc<EventSequence>)> = {
            let guard = self
                .inner
                .event_sequences
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        for (name, seq) in sequences {
            let _ = writeln!(out, "{prefix}   {name}:");
            let mut prev = 0i64;
            for (label, ts) in seq.events() {
                let _ = writeln!(
                    out,
                    "{prefix}     - {label}: {} ({})",
                    pretty::print(ts, TCounterType::TimeNs),
                    pretty::print(ts - prev, TCounterType::TimeNs),
                );
                prev = ts;
            }
        }

        let (counters, child_counter_map) = self.snapshot_counters();
        let counter_values: HashMap<&str, (TCounterType, i64)> = counters
            .iter()
            .map(|(name, type_, value)| (name.as_str(), (*type_, *value)))
            .collect();
        Self::print_child_counters(
            prefix,
            ROOT_COUNTER_NAME,
            &counter_values,
            &child_counter_map,
            out,
        );

        for (child, indent) in self.children_with_indent() {
            let child_prefix = if indent {
                format!("{prefix}  ")
            } else {
                prefix.to_string()
            };
            child.pretty_print(out, &child_prefix);
        }
    }

    fn print_child_counters(
        prefix: &str,
        counter_name: &str,
        counter_values: &HashMap<&str, (TCounterType, i64)>,
        child_counter_map: &HashMap<String, BTreeSet<String>>,
        out: &mut String,
    ) {
        let Some(children) = child_counter_map.get(counter_name) else {
            return;
        };
        for child in children {
            if child == TOTAL_TIME_COUNTER_NAME {
                // Rendered in the header line.
                continue;
            }
            if let Some((type_, value)) = counter_values.get(child.as_str()) {
                let _ = writeln!(
                    out,
                    "{prefix}   - {child}: {}",
                    pretty::print(*value, *type_)
                );
            }
            Self::print_child_counters(
                &format!("{prefix}  "),
                child,
                counter_values,
                child_counter_map,
                out,
            );
        }
    }

    /// thrift compact -> gzip -> base64. Lossless for counters, info
    /// strings, the child tree and event sequences.
    pub fn serialize_to_archive_string(&self) -> Result<String, Status> {
        thrift_codec::serialize_to_archive_string(&self.to_thrift())
    }

    pub fn from_archive_string(archive: &str) -> Result<RuntimeProfile, Status> {
        let tree: TRuntimeProfileTree = thrift_codec::deserialize_archive_string(archive)?;
        RuntimeProfile::create_from_thrift(&tree)
            .ok_or_else(|| Status::internal_error("empty profile archive"))
    }
}

/// Adds elapsed wall time to a TIME_NS counter when dropped.
pub struct ScopedTimer {
    counter: CounterRef,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(counter: CounterRef) -> Self {
        debug_assert_eq!(counter.counter_type(), TCounterType::TimeNs);
        Self {
            counter,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        self.counter
            .update(clamp_u128_to_i64(self.start.elapsed().as_nanos()));
    }
}

/// Decrements the counter for this object's lifetime.
pub struct ScopedCounter {
    counter: CounterRef,
    val: i64,
}

impl ScopedCounter {
    pub fn new(counter: CounterRef, val: i64) -> Self {
        counter.update(-val);
        Self { counter, val }
    }
}

impl Drop for ScopedCounter {
    fn drop(&mut self) {
        self.counter.update(self.val);
    }
}

pub fn clamp_u128_to_i64(value: u128) -> i64 {
    if value > i64::MAX as u128 {
        i64::MAX
    } else {
        value as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_counter_is_idempotent() {
        let profile = RuntimeProfile::new("node");
        let a = profile.add_counter("Rows", TCounterType::Unit);
        let b = profile.add_counter("Rows", TCounterType::Unit);
        assert!(Arc::ptr_eq(&a, &b));
        a.update(5);
        assert_eq!(b.value(), 5);
        assert!(Arc::ptr_eq(
            &profile.get_counter("Rows").expect("counter"),
            &a
        ));
    }

    #[test]
    fn high_water_mark_tracks_peak() {
        let profile = RuntimeProfile::new("node");
        let hwm = profile.add_high_water_mark_counter("Mem", TCounterType::Bytes, "");
        hwm.update(3);
        hwm.update(2);
        hwm.update(-4);
        hwm.update(1);
        assert_eq!(hwm.current_value(), 2);
        assert_eq!(hwm.value(), 5);
    }

    #[test]
    fn try_update_is_bounded() {
        let profile = RuntimeProfile::new("node");
        let hwm = profile.add_high_water_mark_counter("Mem", TCounterType::Bytes, "");
        assert!(hwm.try_update(8, 10));
        assert!(!hwm.try_update(3, 10));
        assert_eq!(hwm.current_value(), 8);
        assert!(hwm.try_update(2, 10));
        assert_eq!(hwm.value(), 10);
    }

    #[test]
    fn derived_counter_computes_lazily() {
        let profile = RuntimeProfile::new("node");
        let src = profile.add_counter("Bytes", TCounterType::Bytes);
        let src_for_fn = Arc::clone(&src);
        let derived = profile
            .add_derived_counter(
                "BytesDoubled",
                TCounterType::Bytes,
                Box::new(move || src_for_fn.value() * 2),
                "",
            )
            .expect("fresh name");
        src.set(21);
        assert_eq!(derived.value(), 42);
        assert!(
            profile
                .add_derived_counter("BytesDoubled", TCounterType::Bytes, Box::new(|| 0), "")
                .is_none()
        );
    }

    #[test]
    fn merge_sums_and_creates_missing() {
        let p1 = RuntimeProfile::new("root");
        p1.add_counter("A", TCounterType::Unit).update(10);
        p1.add_counter("B", TCounterType::TimeNs).update(2_000_000_000);

        let p2 = RuntimeProfile::new("root");
        p2.add_counter("A", TCounterType::Unit).update(5);
        p2.add_counter("B", TCounterType::TimeNs).update(1_000_000_000);
        p2.add_counter("C", TCounterType::Unit).update(7);

        p1.merge(&p2);
        assert_eq!(p1.get_counter("A").expect("A").value(), 15);
        assert_eq!(p1.get_counter("B").expect("B").value(), 3_000_000_000);
        assert_eq!(p1.get_counter("C").expect("C").value(), 7);
    }

    #[test]
    fn update_replaces_counter_values() {
        let src = RuntimeProfile::new("root");
        src.add_counter("A", TCounterType::Unit).set(11);
        src.add_info_string("Table", "lineitem");
        let tree = src.to_thrift();

        let dst = RuntimeProfile::new("root");
        dst.add_counter("A", TCounterType::Unit).set(99);
        dst.add_info_string("Table", "orders");
        dst.update(&tree);
        dst.update(&tree);
        assert_eq!(dst.get_counter("A").expect("A").value(), 11);
        assert_eq!(dst.get_info_string("Table").as_deref(), Some("lineitem"));
    }

    #[test]
    fn thrift_round_trip_preserves_structure() {
        let root = RuntimeProfile::new("root");
        root.add_counter("A", TCounterType::Unit).set(1);
        let child = RuntimeProfile::new("child");
        child.add_counter("B", TCounterType::Bytes).set(1024);
        child.add_info_string("Path", "/tmp/x");
        root.add_child(child, true);

        let rebuilt =
            RuntimeProfile::create_from_thrift(&root.to_thrift()).expect("rebuild profile");
        assert_eq!(rebuilt.name(), "root");
        assert_eq!(rebuilt.get_counter("A").expect("A").value(), 1);
        let rebuilt_child = rebuilt.get_child("child").expect("child");
        assert_eq!(rebuilt_child.get_counter("B").expect("B").value(), 1024);
        assert_eq!(rebuilt_child.get_info_string("Path").as_deref(), Some("/tmp/x"));
    }

    #[test]
    fn event_sequences_survive_round_trip_but_not_merge() {
        let src = RuntimeProfile::new("root");
        let seq = src.add_event_sequence("Query Timeline");
        seq.mark_event("planned");
        seq.mark_event("started");

        let rebuilt =
            RuntimeProfile::create_from_thrift(&src.to_thrift()).expect("rebuild profile");
        let rebuilt_seq = rebuilt
            .get_event_sequence("Query Timeline")
            .expect("sequence");
        let events = rebuilt_seq.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, "planned");

        let dst = RuntimeProfile::new("root");
        dst.merge(&src);
        assert!(dst.get_event_sequence("Query Timeline").is_none());
    }

    #[test]
    fn compute_time_in_profile_splits_locally() {
        let root = RuntimeProfile::new("root");
        root.total_time_counter().update(100);
        let child = RuntimeProfile::new("child");
        child.total_time_counter().update(40);
        root.add_child(child.clone(), true);

        root.compute_time_in_profile();
        assert!((root.local_time_percent() - 0.6).abs() < 1e-9);
        assert!((child.local_time_percent() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn add_child_after_orders_children() {
        let root = RuntimeProfile::new("root");
        root.add_child(RuntimeProfile::new("a"), true);
        root.add_child(RuntimeProfile::new("c"), true);
        root.add_child_after(RuntimeProfile::new("b"), true, "a");
        let names: Vec<String> = root.children().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn divide_halves_counters() {
        let root = RuntimeProfile::new("root");
        root.add_counter("A", TCounterType::Unit).set(10);
        let child = RuntimeProfile::new("child");
        child.add_counter("B", TCounterType::Unit).set(6);
        root.add_child(child.clone(), true);
        root.divide(2);
        assert_eq!(root.get_counter("A").expect("A").value(), 5);
        assert_eq!(child.get_counter("B").expect("B").value(), 3);
    }
}

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
//! Opaque codegen handle. The actual JIT lives behind this boundary; the
//! runtime only manages its lifetime: create with the fragment, optimize
//! once before execution, drop with the RuntimeState.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::status::Status;
use crate::runtime::profile::RuntimeProfile;

pub struct CodegenContext {
    profile: RuntimeProfile,
    optimizations_enabled: AtomicBool,
    optimized: AtomicBool,
}

impl CodegenContext {
    pub fn new(fragment_name: &str) -> Result<CodegenContext, Status> {
        let profile = RuntimeProfile::new(format!("CodeGen ({fragment_name})"));
        Ok(CodegenContext {
            profile,
            optimizations_enabled: AtomicBool::new(false),
            optimized: AtomicBool::new(false),
        })
    }

    pub fn profile(&self) -> &RuntimeProfile {
        &self.profile
    }

    pub fn enable_optimizations(&self, enable: bool) {
        self.optimizations_enabled.store(enable, Ordering::Relaxed);
    }

    /// Runs module optimization once; later calls are no-ops.
    pub fn optimize_module(&self) -> Result<(), Status> {
        if self.optimized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let timer = self.profile.add_timer("OptimizationTime");
        let _scoped = crate::runtime::profile::ScopedTimer::new(timer);
        Ok(())
    }
}

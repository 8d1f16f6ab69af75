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
use std::sync::OnceLock;

/// Total physical memory in bytes, read once. Returns i64::MAX when the
/// platform value cannot be determined so limit comparisons stay harmless.
pub fn physical_mem() -> i64 {
    static PHYSICAL: OnceLock<i64> = OnceLock::new();
    *PHYSICAL.get_or_init(read_physical_mem)
}

fn read_physical_mem() -> i64 {
    let Ok(contents) = std::fs::read_to_string("/proc/meminfo") else {
        return i64::MAX;
    };
    for line in contents.lines() {
        let Some(rest) = line.strip_prefix("MemTotal:") else {
            continue;
        };
        let kb = rest
            .trim()
            .trim_end_matches("kB")
            .trim()
            .parse::<i64>()
            .unwrap_or(0);
        if kb > 0 {
            return kb.saturating_mul(1024);
        }
    }
    i64::MAX
}

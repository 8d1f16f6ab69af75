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

/// Unit of a profile counter. Encoded as i32 on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TCounterType {
    Unit,
    UnitPerSecond,
    CpuTicks,
    Bytes,
    BytesPerSecond,
    TimeNs,
    DoubleValue,
    Bitmap,
}

impl TCounterType {
    pub fn as_i32(self) -> i32 {
        match self {
            TCounterType::Unit => 0,
            TCounterType::UnitPerSecond => 1,
            TCounterType::CpuTicks => 2,
            TCounterType::Bytes => 3,
            TCounterType::BytesPerSecond => 4,
            TCounterType::TimeNs => 5,
            TCounterType::DoubleValue => 6,
            TCounterType::Bitmap => 7,
        }
    }

    pub fn from_i32(value: i32) -> TCounterType {
        match value {
            0 => TCounterType::Unit,
            1 => TCounterType::UnitPerSecond,
            2 => TCounterType::CpuTicks,
            3 => TCounterType::Bytes,
            4 => TCounterType::BytesPerSecond,
            5 => TCounterType::TimeNs,
            6 => TCounterType::DoubleValue,
            7 => TCounterType::Bitmap,
            // Unknown units from a newer peer degrade to a raw number.
            _ => TCounterType::Unit,
        }
    }
}

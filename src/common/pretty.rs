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
//! Human-readable rendering of counter values for profile output.

use crate::wire::metrics::TCounterType;

const KILOBYTE: f64 = 1024.0;
const MEGABYTE: f64 = 1024.0 * 1024.0;
const GIGABYTE: f64 = 1024.0 * 1024.0 * 1024.0;

const THOUSAND: f64 = 1_000.0;
const MILLION: f64 = 1_000_000.0;
const BILLION: f64 = 1_000_000_000.0;

pub fn print(value: i64, unit: TCounterType) -> String {
    match unit {
        TCounterType::Unit => print_unit(value),
        TCounterType::UnitPerSecond => format!("{}/sec", print_unit(value)),
        TCounterType::CpuTicks => {
            // Displayed as a raw tick count; converting to time requires the
            // clock rate, which the profile does not carry.
            print_unit(value)
        }
        TCounterType::Bytes => print_bytes(value),
        TCounterType::BytesPerSecond => format!("{}/sec", print_bytes(value)),
        TCounterType::TimeNs => print_time_ns(value),
        TCounterType::DoubleValue => format!("{:.2}", f64::from_bits(value as u64)),
        TCounterType::Bitmap => format!("{:#x}", value),
    }
}

fn print_unit(value: i64) -> String {
    let v = value as f64;
    if v.abs() >= BILLION {
        format!("{:.2}B", v / BILLION)
    } else if v.abs() >= MILLION {
        format!("{:.2}M", v / MILLION)
    } else if v.abs() >= THOUSAND {
        format!("{:.2}K", v / THOUSAND)
    } else {
        format!("{}", value)
    }
}

fn print_bytes(value: i64) -> String {
    let v = value as f64;
    if v.abs() >= GIGABYTE {
        format!("{:.2} GB", v / GIGABYTE)
    } else if v.abs() >= MEGABYTE {
        format!("{:.2} MB", v / MEGABYTE)
    } else if v.abs() >= KILOBYTE {
        format!("{:.2} KB", v / KILOBYTE)
    } else {
        format!("{}.00 B", value)
    }
}

fn print_time_ns(value: i64) -> String {
    if value < 0 {
        return format!("{}ns", value);
    }
    let total_ns = value as u64;
    let total_ms = total_ns / 1_000_000;
    if total_ms == 0 {
        if total_ns >= 1_000 {
            return format!("{}.{:03}us", total_ns / 1_000, total_ns % 1_000);
        }
        return format!("{}ns", total_ns);
    }
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1_000) % 60;
    let millis = total_ms % 1_000;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 || hours > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    if hours == 0 {
        if seconds > 0 || minutes > 0 {
            out.push_str(&format!("{}s", seconds));
        }
        if minutes == 0 {
            out.push_str(&format!("{}ms", millis));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::print;
    use crate::wire::metrics::TCounterType;

    #[test]
    fn prints_units() {
        assert_eq!(print(999, TCounterType::Unit), "999");
        assert_eq!(print(1_500, TCounterType::Unit), "1.50K");
        assert_eq!(print(2_000_000, TCounterType::Unit), "2.00M");
    }

    #[test]
    fn prints_bytes() {
        assert_eq!(print(512, TCounterType::Bytes), "512.00 B");
        assert_eq!(print(2048, TCounterType::Bytes), "2.00 KB");
        assert_eq!(
            print(3 * 1024 * 1024 * 1024, TCounterType::Bytes),
            "3.00 GB"
        );
    }

    #[test]
    fn prints_times() {
        assert_eq!(print(500, TCounterType::TimeNs), "500ns");
        assert_eq!(print(1_500_000_000, TCounterType::TimeNs), "1s500ms");
        assert_eq!(print(90_000_000_000, TCounterType::TimeNs), "1m30s");
    }
}

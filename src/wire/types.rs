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
use std::fmt;

use thrift::protocol::{
    TFieldIdentifier, TInputProtocol, TOutputProtocol, TSerializable, TStructIdentifier, TType,
};

use crate::wire::{
    read_struct_list, write_bool_field, write_i32_field, write_i64_field, write_string_field,
    write_struct_field, write_struct_list_field,
};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct TUniqueId {
    pub hi: i64,
    pub lo: i64,
}

impl TUniqueId {
    pub fn new(hi: i64, lo: i64) -> Self {
        Self { hi, lo }
    }
}

impl TSerializable for TUniqueId {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TUniqueId"))?;
        write_i64_field(o, "hi", 1, self.hi)?;
        write_i64_field(o, "lo", 2, self.lo)?;
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TUniqueId> {
        i.read_struct_begin()?;
        let mut hi = 0;
        let mut lo = 0;
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => hi = i.read_i64()?,
                Some(2) => lo = i.read_i64()?,
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(TUniqueId { hi, lo })
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct TNetworkAddress {
    pub hostname: String,
    pub port: i32,
}

impl TNetworkAddress {
    pub fn new(hostname: impl Into<String>, port: i32) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

impl fmt::Display for TNetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

impl TSerializable for TNetworkAddress {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TNetworkAddress"))?;
        write_string_field(o, "hostname", 1, &self.hostname)?;
        write_i32_field(o, "port", 2, self.port)?;
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TNetworkAddress> {
        i.read_struct_begin()?;
        let mut hostname = String::new();
        let mut port = 0;
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => hostname = i.read_string()?,
                Some(2) => port = i.read_i32()?,
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(TNetworkAddress { hostname, port })
    }
}

/// Describes one backend as published on the membership topic. Immutable
/// once observed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TBackendDescriptor {
    pub address: TNetworkAddress,
    pub ip_address: String,
    pub is_coordinator: Option<bool>,
}

impl TSerializable for TBackendDescriptor {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TBackendDescriptor"))?;
        write_struct_field(o, "address", 1, &self.address)?;
        write_string_field(o, "ip_address", 2, &self.ip_address)?;
        if let Some(v) = self.is_coordinator {
            write_bool_field(o, "is_coordinator", 3, v)?;
        }
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TBackendDescriptor> {
        i.read_struct_begin()?;
        let mut desc = TBackendDescriptor::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => desc.address = TNetworkAddress::read_from_in_protocol(i)?,
                Some(2) => desc.ip_address = i.read_string()?,
                Some(3) => desc.is_coordinator = Some(i.read_bool()?),
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(desc)
    }
}

/// Opaque byte-addressable reference consumed by scan-source readers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TScanRange {
    pub data: Vec<u8>,
}

impl TScanRange {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl TSerializable for TScanRange {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TScanRange"))?;
        o.write_field_begin(&TFieldIdentifier::new("data", TType::String, 1))?;
        o.write_bytes(&self.data)?;
        o.write_field_end()?;
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TScanRange> {
        i.read_struct_begin()?;
        let mut data = Vec::new();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => data = i.read_bytes()?,
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(TScanRange { data })
    }
}

/// One scan range plus its ordered locality preference list.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TScanRangeLocations {
    pub scan_range: TScanRange,
    pub hosts: Vec<TNetworkAddress>,
}

impl TSerializable for TScanRangeLocations {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TScanRangeLocations"))?;
        write_struct_field(o, "scan_range", 1, &self.scan_range)?;
        write_struct_list_field(o, "hosts", 2, &self.hosts)?;
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TScanRangeLocations> {
        i.read_struct_begin()?;
        let mut out = TScanRangeLocations::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => out.scan_range = TScanRange::read_from_in_protocol(i)?,
                Some(2) => out.hosts = read_struct_list(i)?,
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

/// Scan range handed to a particular fragment instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TScanRangeParams {
    pub scan_range: TScanRange,
    pub volume_id: Option<i32>,
}

impl TSerializable for TScanRangeParams {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TScanRangeParams"))?;
        write_struct_field(o, "scan_range", 1, &self.scan_range)?;
        if let Some(v) = self.volume_id {
            write_i32_field(o, "volume_id", 2, v)?;
        }
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TScanRangeParams> {
        i.read_struct_begin()?;
        let mut out = TScanRangeParams::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => out.scan_range = TScanRange::read_from_in_protocol(i)?,
                Some(2) => out.volume_id = Some(i.read_i32()?),
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

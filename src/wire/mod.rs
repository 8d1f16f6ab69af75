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
//! Field-tagged wire structs for all cross-node traffic.
//!
//! Unknown fields are skipped on read, so adding fields stays
//! backward-compatible. Binary protocol is used on the wire; the compact
//! protocol only for archived profiles.

pub mod internal_service;
pub mod metrics;
pub mod runtime_profile;
pub mod status;
pub mod types;

use thrift::protocol::{
    TInputProtocol, TListIdentifier, TOutputProtocol, TSerializable, TType,
};

pub(crate) fn write_string_field(
    o: &mut dyn TOutputProtocol,
    name: &'static str,
    id: i16,
    value: &str,
) -> thrift::Result<()> {
    o.write_field_begin(&thrift::protocol::TFieldIdentifier::new(
        name,
        TType::String,
        id,
    ))?;
    o.write_string(value)?;
    o.write_field_end()
}

pub(crate) fn write_i32_field(
    o: &mut dyn TOutputProtocol,
    name: &'static str,
    id: i16,
    value: i32,
) -> thrift::Result<()> {
    o.write_field_begin(&thrift::protocol::TFieldIdentifier::new(name, TType::I32, id))?;
    o.write_i32(value)?;
    o.write_field_end()
}

pub(crate) fn write_i64_field(
    o: &mut dyn TOutputProtocol,
    name: &'static str,
    id: i16,
    value: i64,
) -> thrift::Result<()> {
    o.write_field_begin(&thrift::protocol::TFieldIdentifier::new(name, TType::I64, id))?;
    o.write_i64(value)?;
    o.write_field_end()
}

pub(crate) fn write_bool_field(
    o: &mut dyn TOutputProtocol,
    name: &'static str,
    id: i16,
    value: bool,
) -> thrift::Result<()> {
    o.write_field_begin(&thrift::protocol::TFieldIdentifier::new(
        name,
        TType::Bool,
        id,
    ))?;
    o.write_bool(value)?;
    o.write_field_end()
}

pub(crate) fn write_struct_field<T: TSerializable>(
    o: &mut dyn TOutputProtocol,
    name: &'static str,
    id: i16,
    value: &T,
) -> thrift::Result<()> {
    o.write_field_begin(&thrift::protocol::TFieldIdentifier::new(
        name,
        TType::Struct,
        id,
    ))?;
    value.write_to_out_protocol(o)?;
    o.write_field_end()
}

pub(crate) fn write_struct_list_field<T: TSerializable>(
    o: &mut dyn TOutputProtocol,
    name: &'static str,
    id: i16,
    items: &[T],
) -> thrift::Result<()> {
    o.write_field_begin(&thrift::protocol::TFieldIdentifier::new(
        name,
        TType::List,
        id,
    ))?;
    o.write_list_begin(&TListIdentifier::new(TType::Struct, items.len() as i32))?;
    for item in items {
        item.write_to_out_protocol(o)?;
    }
    o.write_list_end()?;
    o.write_field_end()
}

pub(crate) fn write_string_list_field(
    o: &mut dyn TOutputProtocol,
    name: &'static str,
    id: i16,
    items: &[String],
) -> thrift::Result<()> {
    o.write_field_begin(&thrift::protocol::TFieldIdentifier::new(
        name,
        TType::List,
        id,
    ))?;
    o.write_list_begin(&TListIdentifier::new(TType::String, items.len() as i32))?;
    for item in items {
        o.write_string(item)?;
    }
    o.write_list_end()?;
    o.write_field_end()
}

pub(crate) fn write_i64_list_field(
    o: &mut dyn TOutputProtocol,
    name: &'static str,
    id: i16,
    items: &[i64],
) -> thrift::Result<()> {
    o.write_field_begin(&thrift::protocol::TFieldIdentifier::new(
        name,
        TType::List,
        id,
    ))?;
    o.write_list_begin(&TListIdentifier::new(TType::I64, items.len() as i32))?;
    for item in items {
        o.write_i64(*item)?;
    }
    o.write_list_end()?;
    o.write_field_end()
}

pub(crate) fn read_struct_list<T: TSerializable>(
    i: &mut dyn TInputProtocol,
) -> thrift::Result<Vec<T>> {
    let header = i.read_list_begin()?;
    let mut items = Vec::with_capacity(header.size.max(0) as usize);
    for _ in 0..header.size {
        items.push(T::read_from_in_protocol(i)?);
    }
    i.read_list_end()?;
    Ok(items)
}

pub(crate) fn read_string_list(i: &mut dyn TInputProtocol) -> thrift::Result<Vec<String>> {
    let header = i.read_list_begin()?;
    let mut items = Vec::with_capacity(header.size.max(0) as usize);
    for _ in 0..header.size {
        items.push(i.read_string()?);
    }
    i.read_list_end()?;
    Ok(items)
}

pub(crate) fn read_i64_list(i: &mut dyn TInputProtocol) -> thrift::Result<Vec<i64>> {
    let header = i.read_list_begin()?;
    let mut items = Vec::with_capacity(header.size.max(0) as usize);
    for _ in 0..header.size {
        items.push(i.read_i64()?);
    }
    i.read_list_end()?;
    Ok(items)
}

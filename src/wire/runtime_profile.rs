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
use std::collections::{BTreeMap, BTreeSet};

use thrift::protocol::{
    TFieldIdentifier, TInputProtocol, TMapIdentifier, TOutputProtocol, TSerializable,
    TSetIdentifier, TStructIdentifier, TType,
};

use crate::wire::metrics::TCounterType;
use crate::wire::{
    read_i64_list, read_string_list, read_struct_list, write_bool_field, write_i32_field,
    write_i64_field, write_i64_list_field, write_string_field, write_string_list_field,
    write_struct_list_field,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TCounter {
    pub name: String,
    pub type_: TCounterType,
    pub value: i64,
}

impl TCounter {
    pub fn new(name: impl Into<String>, type_: TCounterType, value: i64) -> Self {
        Self {
            name: name.into(),
            type_,
            value,
        }
    }
}

impl TSerializable for TCounter {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TCounter"))?;
        write_string_field(o, "name", 1, &self.name)?;
        write_i32_field(o, "type", 2, self.type_.as_i32())?;
        write_i64_field(o, "value", 3, self.value)?;
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TCounter> {
        i.read_struct_begin()?;
        let mut name = String::new();
        let mut type_ = TCounterType::Unit;
        let mut value = 0;
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => name = i.read_string()?,
                Some(2) => type_ = TCounterType::from_i32(i.read_i32()?),
                Some(3) => value = i.read_i64()?,
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(TCounter { name, type_, value })
    }
}

/// Ordered `(label, ns_since_start)` pairs, shipped as parallel lists.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TEventSequence {
    pub name: String,
    pub timestamps: Vec<i64>,
    pub labels: Vec<String>,
}

impl TSerializable for TEventSequence {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TEventSequence"))?;
        write_string_field(o, "name", 1, &self.name)?;
        write_i64_list_field(o, "timestamps", 2, &self.timestamps)?;
        write_string_list_field(o, "labels", 3, &self.labels)?;
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TEventSequence> {
        i.read_struct_begin()?;
        let mut out = TEventSequence::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => out.name = i.read_string()?,
                Some(2) => out.timestamps = read_i64_list(i)?,
                Some(3) => out.labels = read_string_list(i)?,
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TTimeSeriesCounter {
    pub name: String,
    pub type_: i32,
    pub period_ms: i32,
    pub values: Vec<i64>,
}

impl TSerializable for TTimeSeriesCounter {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TTimeSeriesCounter"))?;
        write_string_field(o, "name", 1, &self.name)?;
        write_i32_field(o, "type", 2, self.type_)?;
        write_i32_field(o, "period_ms", 3, self.period_ms)?;
        write_i64_list_field(o, "values", 4, &self.values)?;
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TTimeSeriesCounter> {
        i.read_struct_begin()?;
        let mut out = TTimeSeriesCounter::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => out.name = i.read_string()?,
                Some(2) => out.type_ = i.read_i32()?,
                Some(3) => out.period_ms = i.read_i32()?,
                Some(4) => out.values = read_i64_list(i)?,
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

/// One profile node in the preorder-flattened tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TRuntimeProfileNode {
    pub name: String,
    pub num_children: i32,
    pub counters: Vec<TCounter>,
    pub metadata: i64,
    pub indent: bool,
    pub info_strings: BTreeMap<String, String>,
    pub info_strings_display_order: Vec<String>,
    pub child_counters_map: BTreeMap<String, BTreeSet<String>>,
    pub event_sequences: Option<Vec<TEventSequence>>,
    pub time_series_counters: Option<Vec<TTimeSeriesCounter>>,
}

impl TSerializable for TRuntimeProfileNode {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TRuntimeProfileNode"))?;
        write_string_field(o, "name", 1, &self.name)?;
        write_i32_field(o, "num_children", 2, self.num_children)?;
        write_struct_list_field(o, "counters", 3, &self.counters)?;
        write_i64_field(o, "metadata", 4, self.metadata)?;
        write_bool_field(o, "indent", 5, self.indent)?;

        o.write_field_begin(&TFieldIdentifier::new("info_strings", TType::Map, 6))?;
        o.write_map_begin(&TMapIdentifier::new(
            TType::String,
            TType::String,
            self.info_strings.len() as i32,
        ))?;
        for (k, v) in &self.info_strings {
            o.write_string(k)?;
            o.write_string(v)?;
        }
        o.write_map_end()?;
        o.write_field_end()?;

        write_string_list_field(
            o,
            "info_strings_display_order",
            7,
            &self.info_strings_display_order,
        )?;

        o.write_field_begin(&TFieldIdentifier::new("child_counters_map", TType::Map, 8))?;
        o.write_map_begin(&TMapIdentifier::new(
            TType::String,
            TType::Set,
            self.child_counters_map.len() as i32,
        ))?;
        for (parent, children) in &self.child_counters_map {
            o.write_string(parent)?;
            o.write_set_begin(&TSetIdentifier::new(TType::String, children.len() as i32))?;
            for child in children {
                o.write_string(child)?;
            }
            o.write_set_end()?;
        }
        o.write_map_end()?;
        o.write_field_end()?;

        if let Some(seqs) = &self.event_sequences {
            write_struct_list_field(o, "event_sequences", 9, seqs)?;
        }
        if let Some(ts) = &self.time_series_counters {
            write_struct_list_field(o, "time_series_counters", 10, ts)?;
        }
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TRuntimeProfileNode> {
        i.read_struct_begin()?;
        let mut out = TRuntimeProfileNode::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => out.name = i.read_string()?,
                Some(2) => out.num_children = i.read_i32()?,
                Some(3) => out.counters = read_struct_list(i)?,
                Some(4) => out.metadata = i.read_i64()?,
                Some(5) => out.indent = i.read_bool()?,
                Some(6) => {
                    let header = i.read_map_begin()?;
                    for _ in 0..header.size {
                        let k = i.read_string()?;
                        let v = i.read_string()?;
                        out.info_strings.insert(k, v);
                    }
                    i.read_map_end()?;
                }
                Some(7) => out.info_strings_display_order = read_string_list(i)?,
                Some(8) => {
                    let header = i.read_map_begin()?;
                    for _ in 0..header.size {
                        let parent = i.read_string()?;
                        let set_header = i.read_set_begin()?;
                        let mut children = BTreeSet::new();
                        for _ in 0..set_header.size {
                            children.insert(i.read_string()?);
                        }
                        i.read_set_end()?;
                        out.child_counters_map.insert(parent, children);
                    }
                    i.read_map_end()?;
                }
                Some(9) => out.event_sequences = Some(read_struct_list(i)?),
                Some(10) => out.time_series_counters = Some(read_struct_list(i)?),
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TRuntimeProfileTree {
    pub nodes: Vec<TRuntimeProfileNode>,
}

impl TRuntimeProfileTree {
    pub fn new(nodes: Vec<TRuntimeProfileNode>) -> Self {
        Self { nodes }
    }
}

impl TSerializable for TRuntimeProfileTree {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TRuntimeProfileTree"))?;
        write_struct_list_field(o, "nodes", 1, &self.nodes)?;
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TRuntimeProfileTree> {
        i.read_struct_begin()?;
        let mut nodes = Vec::new();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => nodes = read_struct_list(i)?,
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(TRuntimeProfileTree { nodes })
    }
}

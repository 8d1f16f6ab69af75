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
//! Messages of the backend-to-backend internal service.

use std::collections::BTreeMap;

use thrift::protocol::{
    TFieldIdentifier, TInputProtocol, TListIdentifier, TMapIdentifier, TOutputProtocol,
    TSerializable, TStructIdentifier, TType,
};

use crate::wire::runtime_profile::TRuntimeProfileTree;
use crate::wire::status::TStatus;
use crate::wire::types::{TNetworkAddress, TScanRangeParams, TUniqueId};
use crate::wire::{
    read_string_list, read_struct_list, write_bool_field, write_i32_field, write_i64_field,
    write_string_field, write_string_list_field, write_struct_field, write_struct_list_field,
};

/// Protocol version tag carried by every internal-service message.
pub const INTERNAL_SERVICE_VERSION_V1: i32 = 1;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TQueryOptions {
    pub batch_size: Option<i32>,
    pub max_errors: Option<i32>,
    pub disable_codegen: Option<bool>,
    pub mem_limit: Option<i64>,
    pub enable_profile: Option<bool>,
    pub request_pool: Option<String>,
}

impl TSerializable for TQueryOptions {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TQueryOptions"))?;
        if let Some(v) = self.batch_size {
            write_i32_field(o, "batch_size", 1, v)?;
        }
        if let Some(v) = self.max_errors {
            write_i32_field(o, "max_errors", 2, v)?;
        }
        if let Some(v) = self.disable_codegen {
            write_bool_field(o, "disable_codegen", 3, v)?;
        }
        if let Some(v) = self.mem_limit {
            write_i64_field(o, "mem_limit", 4, v)?;
        }
        if let Some(v) = self.enable_profile {
            write_bool_field(o, "enable_profile", 5, v)?;
        }
        if let Some(v) = &self.request_pool {
            write_string_field(o, "request_pool", 6, v)?;
        }
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TQueryOptions> {
        i.read_struct_begin()?;
        let mut out = TQueryOptions::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => out.batch_size = Some(i.read_i32()?),
                Some(2) => out.max_errors = Some(i.read_i32()?),
                Some(3) => out.disable_codegen = Some(i.read_bool()?),
                Some(4) => out.mem_limit = Some(i.read_i64()?),
                Some(5) => out.enable_profile = Some(i.read_bool()?),
                Some(6) => out.request_pool = Some(i.read_string()?),
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

/// Query-wide context shipped with every fragment of a query.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TQueryCtx {
    pub query_options: Option<TQueryOptions>,
    pub now_string: String,
    pub user: String,
}

impl TSerializable for TQueryCtx {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TQueryCtx"))?;
        if let Some(opts) = &self.query_options {
            write_struct_field(o, "query_options", 1, opts)?;
        }
        write_string_field(o, "now_string", 2, &self.now_string)?;
        write_string_field(o, "user", 3, &self.user)?;
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TQueryCtx> {
        i.read_struct_begin()?;
        let mut out = TQueryCtx::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => out.query_options = Some(TQueryOptions::read_from_in_protocol(i)?),
                Some(2) => out.now_string = i.read_string()?,
                Some(3) => out.user = i.read_string()?,
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TPlanNodeType {
    ScanNode,
    ExchangeNode,
    AggregationNode,
    HashJoinNode,
    SortNode,
}

impl TPlanNodeType {
    pub fn as_i32(self) -> i32 {
        match self {
            TPlanNodeType::ScanNode => 0,
            TPlanNodeType::ExchangeNode => 1,
            TPlanNodeType::AggregationNode => 2,
            TPlanNodeType::HashJoinNode => 3,
            TPlanNodeType::SortNode => 4,
        }
    }

    pub fn from_i32(value: i32) -> TPlanNodeType {
        match value {
            0 => TPlanNodeType::ScanNode,
            1 => TPlanNodeType::ExchangeNode,
            2 => TPlanNodeType::AggregationNode,
            3 => TPlanNodeType::HashJoinNode,
            _ => TPlanNodeType::SortNode,
        }
    }
}

/// Minimal plan node: the runtime only needs identity, type and arity to
/// place fragments; operator internals belong to the executor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TPlanNode {
    pub node_id: i32,
    pub node_type: TPlanNodeType,
    pub num_children: i32,
}

impl TPlanNode {
    pub fn new(node_id: i32, node_type: TPlanNodeType, num_children: i32) -> Self {
        Self {
            node_id,
            node_type,
            num_children,
        }
    }
}

impl TSerializable for TPlanNode {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TPlanNode"))?;
        write_i32_field(o, "node_id", 1, self.node_id)?;
        write_i32_field(o, "node_type", 2, self.node_type.as_i32())?;
        write_i32_field(o, "num_children", 3, self.num_children)?;
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TPlanNode> {
        i.read_struct_begin()?;
        let mut node_id = -1;
        let mut node_type = TPlanNodeType::ScanNode;
        let mut num_children = 0;
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => node_id = i.read_i32()?,
                Some(2) => node_type = TPlanNodeType::from_i32(i.read_i32()?),
                Some(3) => num_children = i.read_i32()?,
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(TPlanNode {
            node_id,
            node_type,
            num_children,
        })
    }
}

/// Plan nodes in depth-first preorder, like the profile tree.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TPlan {
    pub nodes: Vec<TPlanNode>,
}

impl TSerializable for TPlan {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TPlan"))?;
        write_struct_list_field(o, "nodes", 1, &self.nodes)?;
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TPlan> {
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
        Ok(TPlan { nodes })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TDataSinkType {
    DataStreamSink,
    ResultSink,
}

impl TDataSinkType {
    pub fn as_i32(self) -> i32 {
        match self {
            TDataSinkType::DataStreamSink => 0,
            TDataSinkType::ResultSink => 1,
        }
    }

    pub fn from_i32(value: i32) -> TDataSinkType {
        match value {
            0 => TDataSinkType::DataStreamSink,
            _ => TDataSinkType::ResultSink,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TDataSink {
    pub sink_type: TDataSinkType,
    /// Exchange node fed by this sink, for stream sinks.
    pub dest_node_id: Option<i32>,
}

impl TDataSink {
    pub fn result_sink() -> Self {
        Self {
            sink_type: TDataSinkType::ResultSink,
            dest_node_id: None,
        }
    }

    pub fn stream_sink(dest_node_id: i32) -> Self {
        Self {
            sink_type: TDataSinkType::DataStreamSink,
            dest_node_id: Some(dest_node_id),
        }
    }
}

impl TSerializable for TDataSink {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TDataSink"))?;
        write_i32_field(o, "sink_type", 1, self.sink_type.as_i32())?;
        if let Some(v) = self.dest_node_id {
            write_i32_field(o, "dest_node_id", 2, v)?;
        }
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TDataSink> {
        i.read_struct_begin()?;
        let mut sink_type = TDataSinkType::ResultSink;
        let mut dest_node_id = None;
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => sink_type = TDataSinkType::from_i32(i.read_i32()?),
                Some(2) => dest_node_id = Some(i.read_i32()?),
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(TDataSink {
            sink_type,
            dest_node_id,
        })
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TPlanFragment {
    pub display_name: String,
    pub plan: Option<TPlan>,
    pub output_sink: Option<TDataSink>,
}

impl TSerializable for TPlanFragment {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TPlanFragment"))?;
        write_string_field(o, "display_name", 1, &self.display_name)?;
        if let Some(plan) = &self.plan {
            write_struct_field(o, "plan", 2, plan)?;
        }
        if let Some(sink) = &self.output_sink {
            write_struct_field(o, "output_sink", 3, sink)?;
        }
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TPlanFragment> {
        i.read_struct_begin()?;
        let mut out = TPlanFragment::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => out.display_name = i.read_string()?,
                Some(2) => out.plan = Some(TPlan::read_from_in_protocol(i)?),
                Some(3) => out.output_sink = Some(TDataSink::read_from_in_protocol(i)?),
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

/// One downstream consumer of a fragment's stream sink.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TPlanFragmentDestination {
    pub fragment_instance_id: TUniqueId,
    pub server: TNetworkAddress,
}

impl TSerializable for TPlanFragmentDestination {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TPlanFragmentDestination"))?;
        write_struct_field(o, "fragment_instance_id", 1, &self.fragment_instance_id)?;
        write_struct_field(o, "server", 2, &self.server)?;
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(
        i: &mut dyn TInputProtocol,
    ) -> thrift::Result<TPlanFragmentDestination> {
        i.read_struct_begin()?;
        let mut out = TPlanFragmentDestination::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => out.fragment_instance_id = TUniqueId::read_from_in_protocol(i)?,
                Some(2) => out.server = TNetworkAddress::read_from_in_protocol(i)?,
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

/// Per-instance execution parameters.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TPlanFragmentExecParams {
    pub query_id: TUniqueId,
    pub fragment_instance_id: TUniqueId,
    pub per_node_scan_ranges: BTreeMap<i32, Vec<TScanRangeParams>>,
    pub destinations: Option<Vec<TPlanFragmentDestination>>,
    /// Senders feeding each exchange node of this fragment.
    pub per_exch_num_senders: Option<BTreeMap<i32, i32>>,
}

impl TSerializable for TPlanFragmentExecParams {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TPlanFragmentExecParams"))?;
        write_struct_field(o, "query_id", 1, &self.query_id)?;
        write_struct_field(o, "fragment_instance_id", 2, &self.fragment_instance_id)?;

        o.write_field_begin(&TFieldIdentifier::new(
            "per_node_scan_ranges",
            TType::Map,
            3,
        ))?;
        o.write_map_begin(&TMapIdentifier::new(
            TType::I32,
            TType::List,
            self.per_node_scan_ranges.len() as i32,
        ))?;
        for (node_id, ranges) in &self.per_node_scan_ranges {
            o.write_i32(*node_id)?;
            o.write_list_begin(&TListIdentifier::new(TType::Struct, ranges.len() as i32))?;
            for range in ranges {
                range.write_to_out_protocol(o)?;
            }
            o.write_list_end()?;
        }
        o.write_map_end()?;
        o.write_field_end()?;

        if let Some(dests) = &self.destinations {
            write_struct_list_field(o, "destinations", 4, dests)?;
        }
        if let Some(senders) = &self.per_exch_num_senders {
            o.write_field_begin(&TFieldIdentifier::new(
                "per_exch_num_senders",
                TType::Map,
                5,
            ))?;
            o.write_map_begin(&TMapIdentifier::new(
                TType::I32,
                TType::I32,
                senders.len() as i32,
            ))?;
            for (node_id, count) in senders {
                o.write_i32(*node_id)?;
                o.write_i32(*count)?;
            }
            o.write_map_end()?;
            o.write_field_end()?;
        }
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(
        i: &mut dyn TInputProtocol,
    ) -> thrift::Result<TPlanFragmentExecParams> {
        i.read_struct_begin()?;
        let mut out = TPlanFragmentExecParams::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => out.query_id = TUniqueId::read_from_in_protocol(i)?,
                Some(2) => out.fragment_instance_id = TUniqueId::read_from_in_protocol(i)?,
                Some(3) => {
                    let header = i.read_map_begin()?;
                    for _ in 0..header.size {
                        let node_id = i.read_i32()?;
                        let ranges = read_struct_list(i)?;
                        out.per_node_scan_ranges.insert(node_id, ranges);
                    }
                    i.read_map_end()?;
                }
                Some(4) => out.destinations = Some(read_struct_list(i)?),
                Some(5) => {
                    let header = i.read_map_begin()?;
                    let mut senders = BTreeMap::new();
                    for _ in 0..header.size {
                        let node_id = i.read_i32()?;
                        let count = i.read_i32()?;
                        senders.insert(node_id, count);
                    }
                    i.read_map_end()?;
                    out.per_exch_num_senders = Some(senders);
                }
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TExecPlanFragmentParams {
    pub protocol_version: i32,
    pub fragment: Option<TPlanFragment>,
    pub params: Option<TPlanFragmentExecParams>,
    pub coord: Option<TNetworkAddress>,
    pub backend_num: Option<i32>,
    pub query_ctx: Option<TQueryCtx>,
}

impl TSerializable for TExecPlanFragmentParams {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TExecPlanFragmentParams"))?;
        write_i32_field(o, "protocol_version", 1, self.protocol_version)?;
        if let Some(v) = &self.fragment {
            write_struct_field(o, "fragment", 2, v)?;
        }
        if let Some(v) = &self.params {
            write_struct_field(o, "params", 3, v)?;
        }
        if let Some(v) = &self.coord {
            write_struct_field(o, "coord", 4, v)?;
        }
        if let Some(v) = self.backend_num {
            write_i32_field(o, "backend_num", 5, v)?;
        }
        if let Some(v) = &self.query_ctx {
            write_struct_field(o, "query_ctx", 6, v)?;
        }
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(
        i: &mut dyn TInputProtocol,
    ) -> thrift::Result<TExecPlanFragmentParams> {
        i.read_struct_begin()?;
        let mut out = TExecPlanFragmentParams::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => out.protocol_version = i.read_i32()?,
                Some(2) => out.fragment = Some(TPlanFragment::read_from_in_protocol(i)?),
                Some(3) => out.params = Some(TPlanFragmentExecParams::read_from_in_protocol(i)?),
                Some(4) => out.coord = Some(TNetworkAddress::read_from_in_protocol(i)?),
                Some(5) => out.backend_num = Some(i.read_i32()?),
                Some(6) => out.query_ctx = Some(TQueryCtx::read_from_in_protocol(i)?),
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TExecPlanFragmentResult {
    pub status: Option<TStatus>,
}

impl TSerializable for TExecPlanFragmentResult {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TExecPlanFragmentResult"))?;
        if let Some(v) = &self.status {
            write_struct_field(o, "status", 1, v)?;
        }
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(
        i: &mut dyn TInputProtocol,
    ) -> thrift::Result<TExecPlanFragmentResult> {
        i.read_struct_begin()?;
        let mut out = TExecPlanFragmentResult::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => out.status = Some(TStatus::read_from_in_protocol(i)?),
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

/// Side effects of an insert, sent with the final report only.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TInsertExecStatus {
    pub files_to_move: BTreeMap<String, String>,
    pub num_appended_rows: Option<BTreeMap<String, i64>>,
}

impl TSerializable for TInsertExecStatus {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TInsertExecStatus"))?;
        o.write_field_begin(&TFieldIdentifier::new("files_to_move", TType::Map, 1))?;
        o.write_map_begin(&TMapIdentifier::new(
            TType::String,
            TType::String,
            self.files_to_move.len() as i32,
        ))?;
        for (k, v) in &self.files_to_move {
            o.write_string(k)?;
            o.write_string(v)?;
        }
        o.write_map_end()?;
        o.write_field_end()?;

        if let Some(rows) = &self.num_appended_rows {
            o.write_field_begin(&TFieldIdentifier::new("num_appended_rows", TType::Map, 2))?;
            o.write_map_begin(&TMapIdentifier::new(
                TType::String,
                TType::I64,
                rows.len() as i32,
            ))?;
            for (k, v) in rows {
                o.write_string(k)?;
                o.write_i64(*v)?;
            }
            o.write_map_end()?;
            o.write_field_end()?;
        }
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TInsertExecStatus> {
        i.read_struct_begin()?;
        let mut out = TInsertExecStatus::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => {
                    let header = i.read_map_begin()?;
                    for _ in 0..header.size {
                        let k = i.read_string()?;
                        let v = i.read_string()?;
                        out.files_to_move.insert(k, v);
                    }
                    i.read_map_end()?;
                }
                Some(2) => {
                    let header = i.read_map_begin()?;
                    let mut rows = BTreeMap::new();
                    for _ in 0..header.size {
                        let k = i.read_string()?;
                        let v = i.read_i64()?;
                        rows.insert(k, v);
                    }
                    i.read_map_end()?;
                    out.num_appended_rows = Some(rows);
                }
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TReportExecStatusParams {
    pub protocol_version: i32,
    pub query_id: Option<TUniqueId>,
    pub backend_num: Option<i32>,
    pub fragment_instance_id: Option<TUniqueId>,
    pub status: Option<TStatus>,
    pub done: Option<bool>,
    pub profile: Option<TRuntimeProfileTree>,
    pub error_log: Option<Vec<String>>,
    pub insert_exec_status: Option<TInsertExecStatus>,
}

impl TSerializable for TReportExecStatusParams {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TReportExecStatusParams"))?;
        write_i32_field(o, "protocol_version", 1, self.protocol_version)?;
        if let Some(v) = &self.query_id {
            write_struct_field(o, "query_id", 2, v)?;
        }
        if let Some(v) = self.backend_num {
            write_i32_field(o, "backend_num", 3, v)?;
        }
        if let Some(v) = &self.fragment_instance_id {
            write_struct_field(o, "fragment_instance_id", 4, v)?;
        }
        if let Some(v) = &self.status {
            write_struct_field(o, "status", 5, v)?;
        }
        if let Some(v) = self.done {
            write_bool_field(o, "done", 6, v)?;
        }
        if let Some(v) = &self.profile {
            write_struct_field(o, "profile", 7, v)?;
        }
        if let Some(v) = &self.error_log {
            write_string_list_field(o, "error_log", 8, v)?;
        }
        if let Some(v) = &self.insert_exec_status {
            write_struct_field(o, "insert_exec_status", 9, v)?;
        }
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(
        i: &mut dyn TInputProtocol,
    ) -> thrift::Result<TReportExecStatusParams> {
        i.read_struct_begin()?;
        let mut out = TReportExecStatusParams::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => out.protocol_version = i.read_i32()?,
                Some(2) => out.query_id = Some(TUniqueId::read_from_in_protocol(i)?),
                Some(3) => out.backend_num = Some(i.read_i32()?),
                Some(4) => out.fragment_instance_id = Some(TUniqueId::read_from_in_protocol(i)?),
                Some(5) => out.status = Some(TStatus::read_from_in_protocol(i)?),
                Some(6) => out.done = Some(i.read_bool()?),
                Some(7) => out.profile = Some(TRuntimeProfileTree::read_from_in_protocol(i)?),
                Some(8) => out.error_log = Some(read_string_list(i)?),
                Some(9) => {
                    out.insert_exec_status = Some(TInsertExecStatus::read_from_in_protocol(i)?)
                }
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TReportExecStatusResult {
    pub status: Option<TStatus>,
}

impl TSerializable for TReportExecStatusResult {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TReportExecStatusResult"))?;
        if let Some(v) = &self.status {
            write_struct_field(o, "status", 1, v)?;
        }
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(
        i: &mut dyn TInputProtocol,
    ) -> thrift::Result<TReportExecStatusResult> {
        i.read_struct_begin()?;
        let mut out = TReportExecStatusResult::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => out.status = Some(TStatus::read_from_in_protocol(i)?),
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TCancelPlanFragmentParams {
    pub protocol_version: i32,
    pub fragment_instance_id: Option<TUniqueId>,
}

impl TSerializable for TCancelPlanFragmentParams {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TCancelPlanFragmentParams"))?;
        write_i32_field(o, "protocol_version", 1, self.protocol_version)?;
        if let Some(v) = &self.fragment_instance_id {
            write_struct_field(o, "fragment_instance_id", 2, v)?;
        }
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(
        i: &mut dyn TInputProtocol,
    ) -> thrift::Result<TCancelPlanFragmentParams> {
        i.read_struct_begin()?;
        let mut out = TCancelPlanFragmentParams::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => out.protocol_version = i.read_i32()?,
                Some(2) => {
                    out.fragment_instance_id = Some(TUniqueId::read_from_in_protocol(i)?)
                }
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TCancelPlanFragmentResult {
    pub status: Option<TStatus>,
}

impl TSerializable for TCancelPlanFragmentResult {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TCancelPlanFragmentResult"))?;
        if let Some(v) = &self.status {
            write_struct_field(o, "status", 1, v)?;
        }
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(
        i: &mut dyn TInputProtocol,
    ) -> thrift::Result<TCancelPlanFragmentResult> {
        i.read_struct_begin()?;
        let mut out = TCancelPlanFragmentResult::default();
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => out.status = Some(TStatus::read_from_in_protocol(i)?),
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(out)
    }
}

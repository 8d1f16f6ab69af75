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
use thrift::protocol::{TInputProtocol, TOutputProtocol, TSerializable, TStructIdentifier, TType};

use crate::wire::{read_string_list, write_i32_field, write_string_list_field};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TStatusCode {
    Ok,
    Cancelled,
    MemLimitExceeded,
    InternalError,
    RuntimeError,
    ThriftRpcError,
    PermissionDenied,
}

impl TStatusCode {
    pub fn as_i32(self) -> i32 {
        match self {
            TStatusCode::Ok => 0,
            TStatusCode::Cancelled => 1,
            TStatusCode::MemLimitExceeded => 2,
            TStatusCode::InternalError => 3,
            TStatusCode::RuntimeError => 4,
            TStatusCode::ThriftRpcError => 5,
            TStatusCode::PermissionDenied => 6,
        }
    }

    pub fn from_i32(value: i32) -> TStatusCode {
        match value {
            0 => TStatusCode::Ok,
            1 => TStatusCode::Cancelled,
            2 => TStatusCode::MemLimitExceeded,
            3 => TStatusCode::InternalError,
            4 => TStatusCode::RuntimeError,
            5 => TStatusCode::ThriftRpcError,
            6 => TStatusCode::PermissionDenied,
            _ => TStatusCode::InternalError,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TStatus {
    pub status_code: TStatusCode,
    pub error_msgs: Option<Vec<String>>,
}

impl TStatus {
    pub fn new(status_code: TStatusCode, error_msgs: Option<Vec<String>>) -> Self {
        Self {
            status_code,
            error_msgs,
        }
    }

    pub fn ok() -> Self {
        Self::new(TStatusCode::Ok, None)
    }
}

impl TSerializable for TStatus {
    fn write_to_out_protocol(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new("TStatus"))?;
        write_i32_field(o, "status_code", 1, self.status_code.as_i32())?;
        if let Some(msgs) = &self.error_msgs {
            write_string_list_field(o, "error_msgs", 2, msgs)?;
        }
        o.write_field_stop()?;
        o.write_struct_end()
    }

    fn read_from_in_protocol(i: &mut dyn TInputProtocol) -> thrift::Result<TStatus> {
        i.read_struct_begin()?;
        let mut status_code = TStatusCode::Ok;
        let mut error_msgs = None;
        loop {
            let field = i.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id {
                Some(1) => status_code = TStatusCode::from_i32(i.read_i32()?),
                Some(2) => error_msgs = Some(read_string_list(i)?),
                _ => i.skip(field.field_type)?,
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(TStatus {
            status_code,
            error_msgs,
        })
    }
}

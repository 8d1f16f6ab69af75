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
//! Serialization helpers shared by the RPC and archive paths.

use std::io::{Read, Write};

use base64::Engine;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thrift::protocol::{
    TBinaryInputProtocol, TBinaryOutputProtocol, TCompactInputProtocol, TCompactOutputProtocol,
    TFieldIdentifier, TListIdentifier, TMapIdentifier, TMessageIdentifier, TOutputProtocol,
    TSerializable, TSetIdentifier, TStructIdentifier,
};
use thrift::transport::{TBufferChannel, TIoChannel};

use crate::common::status::Status;

pub fn thrift_binary_serialize<T: TSerializable>(value: &T) -> Result<Vec<u8>, Status> {
    serialize_with_growth(|channel| {
        let mut protocol = TBinaryOutputProtocol::new(channel, true);
        value.write_to_out_protocol(&mut protocol)
    })
}

pub fn thrift_binary_deserialize<T: TSerializable>(bytes: &[u8]) -> Result<T, Status> {
    let mut channel = TBufferChannel::with_capacity(bytes.len(), 0);
    channel.set_readable_bytes(bytes);
    let (r, _) = channel
        .split()
        .map_err(|e| Status::internal_error(e.to_string()))?;
    let mut prot = TBinaryInputProtocol::new(r, true);
    T::read_from_in_protocol(&mut prot).map_err(|e| Status::internal_error(e.to_string()))
}

pub(crate) fn thrift_compact_serialize<T: TSerializable>(value: &T) -> Result<Vec<u8>, Status> {
    serialize_with_growth(|channel| {
        let mut protocol = TCompactOutputProtocol::new(channel);
        value.write_to_out_protocol(&mut protocol)
    })
}

pub(crate) fn thrift_compact_deserialize<T: TSerializable>(bytes: &[u8]) -> Result<T, Status> {
    let mut channel = TBufferChannel::with_capacity(bytes.len(), 0);
    channel.set_readable_bytes(bytes);
    let (r, _) = channel
        .split()
        .map_err(|e| Status::internal_error(e.to_string()))?;
    let mut prot = TCompactInputProtocol::new(r);
    T::read_from_in_protocol(&mut prot).map_err(|e| Status::internal_error(e.to_string()))
}

// TBufferChannel has a fixed write capacity; retry with a larger transport
// until the payload fits. Profile trees for wide plans can run to megabytes.
fn serialize_with_growth<F>(mut write: F) -> Result<Vec<u8>, Status>
where
    F: FnMut(&mut TBufferChannel) -> thrift::Result<()>,
{
    const INITIAL_CAPACITY: usize = 1024;
    const MAX_CAPACITY: usize = 64 * 1024 * 1024;

    let mut capacity = INITIAL_CAPACITY;
    loop {
        let mut channel = TBufferChannel::with_capacity(0, capacity);
        match write(&mut channel) {
            Ok(()) => return Ok(channel.write_bytes()),
            Err(e) => {
                if capacity >= MAX_CAPACITY {
                    return Err(Status::internal_error(e.to_string()));
                }
                capacity = capacity.saturating_mul(2).min(MAX_CAPACITY);
            }
        }
    }
}

/// Archive encoding: thrift compact -> gzip -> base64. Not a lightweight
/// operation; keep it off the hot path.
pub fn serialize_to_archive_string<T: TSerializable>(value: &T) -> Result<String, Status> {
    let compact = thrift_compact_serialize(value)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&compact)
        .map_err(|e| Status::internal_error(format!("gzip profile: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| Status::internal_error(format!("gzip profile: {e}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(compressed))
}

pub fn deserialize_archive_string<T: TSerializable>(archive: &str) -> Result<T, Status> {
    let compressed = base64::engine::general_purpose::STANDARD
        .decode(archive.trim())
        .map_err(|e| Status::internal_error(format!("base64 decode archive: {e}")))?;
    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut compact = Vec::new();
    decoder
        .read_to_end(&mut compact)
        .map_err(|e| Status::internal_error(format!("gunzip archive: {e}")))?;
    thrift_compact_deserialize(&compact)
}

// Output protocol that renders a thrift struct as JSON keyed by field
// name, for debug logging of wire messages.
#[derive(Default)]
struct NamedJsonOutputProtocol {
    stack: Vec<Container>,
    root: Option<serde_json::Value>,
}

enum Container {
    Struct {
        fields: serde_json::Map<String, serde_json::Value>,
        current_field: Option<String>,
    },
    List(Vec<serde_json::Value>),
    Map {
        entries: Vec<(serde_json::Value, serde_json::Value)>,
        pending_key: Option<serde_json::Value>,
    },
}

impl NamedJsonOutputProtocol {
    fn push_value(&mut self, v: serde_json::Value) -> thrift::Result<()> {
        match self.stack.last_mut() {
            None => {
                self.root = Some(v);
            }
            Some(Container::Struct {
                fields,
                current_field,
            }) => {
                let key = current_field
                    .take()
                    .unwrap_or_else(|| "__unknown_field__".to_string());
                fields.insert(key, v);
            }
            Some(Container::List(items)) => {
                items.push(v);
            }
            Some(Container::Map {
                entries,
                pending_key,
            }) => {
                if pending_key.is_none() {
                    *pending_key = Some(v);
                } else {
                    let key = pending_key.take().expect("pending_key");
                    entries.push((key, v));
                }
            }
        }
        Ok(())
    }

    fn pop_container_value(&mut self) -> serde_json::Value {
        match self.stack.pop() {
            None => serde_json::Value::Null,
            Some(Container::Struct { fields, .. }) => serde_json::Value::Object(fields),
            Some(Container::List(items)) => serde_json::Value::Array(items),
            Some(Container::Map { entries, .. }) => serde_json::Value::Array(
                entries
                    .into_iter()
                    .map(|(k, v)| serde_json::Value::Array(vec![k, v]))
                    .collect(),
            ),
        }
    }
}

impl TOutputProtocol for NamedJsonOutputProtocol {
    fn write_message_begin(&mut self, _identifier: &TMessageIdentifier) -> thrift::Result<()> {
        Ok(())
    }

    fn write_message_end(&mut self) -> thrift::Result<()> {
        Ok(())
    }

    fn write_struct_begin(&mut self, _identifier: &TStructIdentifier) -> thrift::Result<()> {
        self.stack.push(Container::Struct {
            fields: serde_json::Map::new(),
            current_field: None,
        });
        Ok(())
    }

    fn write_struct_end(&mut self) -> thrift::Result<()> {
        let v = self.pop_container_value();
        self.push_value(v)
    }

    fn write_field_begin(&mut self, identifier: &TFieldIdentifier) -> thrift::Result<()> {
        if let Some(Container::Struct { current_field, .. }) = self.stack.last_mut() {
            *current_field = identifier
                .name
                .clone()
                .or_else(|| identifier.id.map(|id| format!("field_{id}")));
        }
        Ok(())
    }

    fn write_field_end(&mut self) -> thrift::Result<()> {
        Ok(())
    }

    fn write_field_stop(&mut self) -> thrift::Result<()> {
        Ok(())
    }

    fn write_bool(&mut self, b: bool) -> thrift::Result<()> {
        self.push_value(serde_json::Value::Bool(b))
    }

    fn write_bytes(&mut self, b: &[u8]) -> thrift::Result<()> {
        let mut s = String::with_capacity(2 + b.len() * 2);
        s.push_str("0x");
        for byte in b {
            use std::fmt::Write;
            let _ = write!(&mut s, "{:02x}", byte);
        }
        self.push_value(serde_json::Value::String(s))
    }

    fn write_i8(&mut self, i: i8) -> thrift::Result<()> {
        self.push_value(serde_json::Value::Number(serde_json::Number::from(i)))
    }

    fn write_i16(&mut self, i: i16) -> thrift::Result<()> {
        self.push_value(serde_json::Value::Number(serde_json::Number::from(i)))
    }

    fn write_i32(&mut self, i: i32) -> thrift::Result<()> {
        self.push_value(serde_json::Value::Number(serde_json::Number::from(i)))
    }

    fn write_i64(&mut self, i: i64) -> thrift::Result<()> {
        self.push_value(serde_json::Value::Number(serde_json::Number::from(i)))
    }

    fn write_double(&mut self, d: f64) -> thrift::Result<()> {
        if let Some(n) = serde_json::Number::from_f64(d) {
            self.push_value(serde_json::Value::Number(n))
        } else {
            self.push_value(serde_json::Value::String(d.to_string()))
        }
    }

    fn write_string(&mut self, s: &str) -> thrift::Result<()> {
        self.push_value(serde_json::Value::String(s.to_string()))
    }

    fn write_list_begin(&mut self, identifier: &TListIdentifier) -> thrift::Result<()> {
        self.stack.push(Container::List(Vec::with_capacity(
            identifier.size.max(0) as usize,
        )));
        Ok(())
    }

    fn write_list_end(&mut self) -> thrift::Result<()> {
        let v = self.pop_container_value();
        self.push_value(v)
    }

    fn write_set_begin(&mut self, identifier: &TSetIdentifier) -> thrift::Result<()> {
        self.stack.push(Container::List(Vec::with_capacity(
            identifier.size.max(0) as usize,
        )));
        Ok(())
    }

    fn write_set_end(&mut self) -> thrift::Result<()> {
        let v = self.pop_container_value();
        self.push_value(v)
    }

    fn write_map_begin(&mut self, identifier: &TMapIdentifier) -> thrift::Result<()> {
        self.stack.push(Container::Map {
            entries: Vec::with_capacity(identifier.size.max(0) as usize),
            pending_key: None,
        });
        Ok(())
    }

    fn write_map_end(&mut self) -> thrift::Result<()> {
        let v = self.pop_container_value();
        self.push_value(v)
    }

    fn flush(&mut self) -> thrift::Result<()> {
        Ok(())
    }

    fn write_byte(&mut self, b: u8) -> thrift::Result<()> {
        self.push_value(serde_json::Value::Number(serde_json::Number::from(b)))
    }
}

/// Renders any wire struct as JSON keyed by field name. Debug logging
/// only; binary payloads come out as hex strings.
pub fn thrift_named_json<T: TSerializable>(value: &T) -> Result<String, Status> {
    let mut prot = NamedJsonOutputProtocol::default();
    value
        .write_to_out_protocol(&mut prot)
        .map_err(|e| Status::internal_error(e.to_string()))?;
    let root = prot.root.unwrap_or(serde_json::Value::Null);
    serde_json::to_string(&root).map_err(|e| Status::internal_error(e.to_string()))
}

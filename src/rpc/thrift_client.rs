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
//! Connection-oriented thrift client: socket lifecycle, TLS, and
//! open-with-retry. Serialization belongs to the typed stubs layered on
//! top; this type only manages the transport.

use std::io::{BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustls::pki_types::ServerName;
use thrift::protocol::{
    TBinaryInputProtocol, TBinaryOutputProtocol, TFieldIdentifier, TInputProtocol,
    TMessageIdentifier, TMessageType, TOutputProtocol, TSerializable, TStructIdentifier, TType,
};
use thrift::transport::{TBufferedReadTransport, TBufferedWriteTransport};
use tracing::info;

use crate::common::status::Status;
use crate::wire::types::TNetworkAddress;

/// Outcome classes of one RPC, driving the retry state machine: transport
/// failures may be retried after a reopen, anything else is final.
#[derive(Clone, Debug)]
pub enum RpcError {
    Transport(String),
    Application(String),
}

impl RpcError {
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }

    pub fn to_status(&self) -> Status {
        match self {
            RpcError::Transport(msg) => Status::rpc_error(msg.clone()),
            RpcError::Application(msg) => Status::internal_error(msg.clone()),
        }
    }
}

fn classify(e: thrift::Error) -> RpcError {
    match e {
        thrift::Error::Transport(t) => RpcError::Transport(t.to_string()),
        other => RpcError::Application(other.to_string()),
    }
}

/// Client-side TLS configuration. The trusted CA bundle is loaded once at
/// construction and shared by every socket created from this context.
pub struct TlsContext {
    config: Arc<rustls::ClientConfig>,
}

impl TlsContext {
    pub fn from_ca_file(path: &str) -> Result<TlsContext, Status> {
        let file = std::fs::File::open(path)
            .map_err(|e| Status::runtime_error(format!("open CA bundle {path}: {e}")))?;
        let mut reader = BufReader::new(file);
        let mut roots = rustls::RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert =
                cert.map_err(|e| Status::runtime_error(format!("parse CA bundle {path}: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| Status::runtime_error(format!("load CA cert from {path}: {e}")))?;
        }
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(TlsContext {
            config: Arc::new(config),
        })
    }
}

trait ReadWrite: Read + Write + Send {}
impl<T: Read + Write + Send> ReadWrite for T {}

// One underlying byte stream feeding both the buffered read and write
// transports of a connection.
#[derive(Clone)]
struct SharedStream {
    inner: Arc<Mutex<Box<dyn ReadWrite>>>,
}

impl Read for SharedStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .read(buf)
    }
}

impl Write for SharedStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).flush()
    }
}

struct Connection {
    i_prot: TBinaryInputProtocol<TBufferedReadTransport<SharedStream>>,
    o_prot: TBinaryOutputProtocol<TBufferedWriteTransport<SharedStream>>,
}

pub struct ThriftClient {
    address: TNetworkAddress,
    tls: Option<Arc<TlsContext>>,
    connect_timeout: Duration,
    conn: Option<Connection>,
    seq_id: i32,
}

impl ThriftClient {
    pub fn new(address: TNetworkAddress, tls: Option<Arc<TlsContext>>) -> Self {
        Self {
            address,
            tls,
            connect_timeout: Duration::from_secs(5),
            conn: None,
            seq_id: 0,
        }
    }

    pub fn address(&self) -> &TNetworkAddress {
        &self.address
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Opens the transport if not already open.
    pub fn open(&mut self) -> Result<(), Status> {
        if self.conn.is_some() {
            return Ok(());
        }
        let stream = self.create_socket()?;
        let shared = SharedStream {
            inner: Arc::new(Mutex::new(stream)),
        };
        self.conn = Some(Connection {
            i_prot: TBinaryInputProtocol::new(TBufferedReadTransport::new(shared.clone()), true),
            o_prot: TBinaryOutputProtocol::new(TBufferedWriteTransport::new(shared), true),
        });
        Ok(())
    }

    /// Retries `open` with a fixed backoff. `num_tries == 0` retries
    /// indefinitely.
    pub fn open_with_retry(&mut self, num_tries: u32, wait_ms: u64) -> Result<(), Status> {
        let mut try_count = 0u32;
        loop {
            try_count += 1;
            match self.open() {
                Ok(()) => return Ok(()),
                Err(status) => {
                    info!(
                        target: "springbok::rpc",
                        address = %self.address,
                        "Unable to connect"
                    );
                    if num_tries == 0 {
                        info!(
                            target: "springbok::rpc",
                            "(Attempt {}, will retry indefinitely)", try_count
                        );
                    } else {
                        if num_tries != 1 {
                            info!(
                                target: "springbok::rpc",
                                "(Attempt {} of {})", try_count, num_tries
                            );
                        }
                        if try_count == num_tries {
                            return Err(status);
                        }
                    }
                }
            }
            std::thread::sleep(Duration::from_millis(wait_ms));
        }
    }

    /// Safe on a never-opened client.
    pub fn close(&mut self) {
        self.conn = None;
    }

    pub fn reopen(&mut self) -> Result<(), Status> {
        self.close();
        self.open()
    }

    fn create_socket(&self) -> Result<Box<dyn ReadWrite>, Status> {
        let addr = format!("{}:{}", self.address.hostname, self.address.port);
        let mut last_err = None;
        let resolved = std::net::ToSocketAddrs::to_socket_addrs(&addr)
            .map_err(|e| Status::rpc_error(format!("resolve {addr}: {e}")))?;
        for sock_addr in resolved {
            match TcpStream::connect_timeout(&sock_addr, self.connect_timeout) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    return self.wrap_stream(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(Status::rpc_error(format!(
            "Couldn't open transport for {addr} ({})",
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses".to_string())
        )))
    }

    fn wrap_stream(&self, stream: TcpStream) -> Result<Box<dyn ReadWrite>, Status> {
        let Some(tls) = &self.tls else {
            return Ok(Box::new(stream));
        };
        let server_name = ServerName::try_from(self.address.hostname.clone())
            .map_err(|e| Status::rpc_error(format!("invalid TLS server name: {e}")))?;
        let conn = rustls::ClientConnection::new(Arc::clone(&tls.config), server_name)
            .map_err(|e| Status::rpc_error(format!("TLS handshake setup failed: {e}")))?;
        Ok(Box::new(rustls::StreamOwned::new(conn, stream)))
    }

    /// One request/response round trip: `<method>_args` out, reply or
    /// application exception in. A transport failure drops the
    /// connection, so the next `open()` or `open_with_retry()` on this
    /// client reconnects instead of reusing a dead socket.
    pub(crate) fn call<A, R>(&mut self, method: &str, args: &A) -> Result<R, RpcError>
    where
        A: TSerializable,
        R: TSerializable,
    {
        if self.conn.is_none() {
            return Err(RpcError::Transport(format!(
                "client for {} is not open",
                self.address
            )));
        }
        self.seq_id += 1;
        let seq_id = self.seq_id;
        let conn = self.conn.as_mut().expect("connection checked above");

        let result = write_call(&mut conn.o_prot, method, seq_id, args)
            .map_err(classify)
            .and_then(|()| read_reply(&mut conn.i_prot, method));
        if let Err(e) = &result {
            if e.is_transport() {
                self.conn = None;
            }
        }
        result
    }
}

fn write_call<A: TSerializable>(
    o_prot: &mut dyn TOutputProtocol,
    method: &str,
    seq_id: i32,
    args: &A,
) -> thrift::Result<()> {
    o_prot.write_message_begin(&TMessageIdentifier::new(method, TMessageType::Call, seq_id))?;
    o_prot.write_struct_begin(&TStructIdentifier::new(format!("{method}_args")))?;
    o_prot.write_field_begin(&TFieldIdentifier::new("params", TType::Struct, 1))?;
    args.write_to_out_protocol(o_prot)?;
    o_prot.write_field_end()?;
    o_prot.write_field_stop()?;
    o_prot.write_struct_end()?;
    o_prot.write_message_end()?;
    o_prot.flush()
}

fn read_reply<R: TSerializable>(
    i_prot: &mut dyn TInputProtocol,
    method: &str,
) -> Result<R, RpcError> {
    let header = i_prot.read_message_begin().map_err(classify)?;
    match header.message_type {
        TMessageType::Reply => {}
        TMessageType::Exception => {
            let err = thrift::Error::read_application_error_from_in_protocol(i_prot)
                .map_err(classify)?;
            i_prot.read_message_end().map_err(classify)?;
            return Err(RpcError::Application(err.to_string()));
        }
        other => {
            return Err(RpcError::Application(format!(
                "unexpected message type for {method}: {other:?}"
            )));
        }
    }
    if header.name != method {
        return Err(RpcError::Application(format!(
            "unexpected reply name: {} (expected {method})",
            header.name
        )));
    }

    i_prot.read_struct_begin().map_err(classify)?;
    let mut value: Option<R> = None;
    loop {
        let field = i_prot.read_field_begin().map_err(classify)?;
        if field.field_type == TType::Stop {
            break;
        }
        match field.id {
            Some(0) => value = Some(R::read_from_in_protocol(i_prot).map_err(classify)?),
            _ => i_prot.skip(field.field_type).map_err(classify)?,
        }
        i_prot.read_field_end().map_err(classify)?;
    }
    i_prot.read_struct_end().map_err(classify)?;
    i_prot.read_message_end().map_err(classify)?;

    value.ok_or_else(|| RpcError::Application(format!("missing {method} result")))
}

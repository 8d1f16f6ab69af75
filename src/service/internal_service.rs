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
//! Backend-to-backend thrift service: fragment dispatch, status reports
//! and cancellation.

use std::sync::Arc;
use std::thread;

use thrift::protocol::{
    TBinaryInputProtocolFactory, TBinaryOutputProtocolFactory, TFieldIdentifier, TInputProtocol,
    TMessageIdentifier, TMessageType, TOutputProtocol, TSerializable, TStructIdentifier, TType,
};
use thrift::server::{TProcessor, TServer};
use thrift::transport::{TBufferedReadTransportFactory, TBufferedWriteTransportFactory};
use thrift::{ApplicationError, ApplicationErrorKind};
use tracing::{error, info};

use crate::common::status::Status;
use crate::common::types::UniqueId;
use crate::service::coordinator::CoordinatorRegistry;
use crate::service::fragment_mgr::FragmentMgr;
use crate::wire::internal_service::{
    TCancelPlanFragmentParams, TCancelPlanFragmentResult, TExecPlanFragmentParams,
    TExecPlanFragmentResult, TReportExecStatusParams, TReportExecStatusResult,
};

pub struct InternalService {
    fragment_mgr: Arc<FragmentMgr>,
    coordinators: Arc<CoordinatorRegistry>,
}

impl InternalService {
    pub fn new(fragment_mgr: Arc<FragmentMgr>, coordinators: Arc<CoordinatorRegistry>) -> Arc<Self> {
        Arc::new(Self {
            fragment_mgr,
            coordinators,
        })
    }

    pub fn fragment_mgr(&self) -> Arc<FragmentMgr> {
        Arc::clone(&self.fragment_mgr)
    }

    pub fn coordinators(&self) -> Arc<CoordinatorRegistry> {
        Arc::clone(&self.coordinators)
    }

    fn exec_plan_fragment(&self, params: TExecPlanFragmentParams) -> TExecPlanFragmentResult {
        let status = match self.fragment_mgr.exec_plan_fragment(params) {
            Ok(()) => Status::OK,
            Err(status) => status,
        };
        TExecPlanFragmentResult {
            status: Some(status.to_thrift()),
        }
    }

    fn report_exec_status(&self, params: TReportExecStatusParams) -> TReportExecStatusResult {
        let status = match params.query_id.map(UniqueId::from) {
            Some(query_id) => match self.coordinators.get(query_id) {
                Some(coordinator) => coordinator.update_fragment_exec_status(&params),
                None => Status::internal_error(format!("unknown query {query_id}")),
            },
            None => Status::internal_error("report missing query id"),
        };
        TReportExecStatusResult {
            status: Some(status.to_thrift()),
        }
    }

    fn cancel_plan_fragment(&self, params: TCancelPlanFragmentParams) -> TCancelPlanFragmentResult {
        let status = match params.fragment_instance_id.map(UniqueId::from) {
            Some(finst_id) => self.fragment_mgr.cancel_plan_fragment(finst_id),
            None => Status::internal_error("cancel missing fragment instance id"),
        };
        TCancelPlanFragmentResult {
            status: Some(status.to_thrift()),
        }
    }
}

pub struct InternalServiceProcessor {
    service: Arc<InternalService>,
}

impl InternalServiceProcessor {
    pub fn new(service: Arc<InternalService>) -> Self {
        Self { service }
    }
}

fn read_call_args<T: TSerializable>(i_prot: &mut dyn TInputProtocol) -> thrift::Result<Option<T>> {
    i_prot.read_struct_begin()?;
    let mut args: Option<T> = None;
    loop {
        let field = i_prot.read_field_begin()?;
        if field.field_type == TType::Stop {
            break;
        }
        match field.id {
            Some(1) => args = Some(T::read_from_in_protocol(i_prot)?),
            _ => i_prot.skip(field.field_type)?,
        }
        i_prot.read_field_end()?;
    }
    i_prot.read_struct_end()?;
    Ok(args)
}

fn write_call_result<R: TSerializable>(
    o_prot: &mut dyn TOutputProtocol,
    method: &str,
    seq_id: i32,
    result: &R,
) -> thrift::Result<()> {
    o_prot.write_message_begin(&TMessageIdentifier::new(method, TMessageType::Reply, seq_id))?;
    o_prot.write_struct_begin(&TStructIdentifier::new(format!("{method}_result")))?;
    o_prot.write_field_begin(&TFieldIdentifier::new("success", TType::Struct, 0))?;
    result.write_to_out_protocol(o_prot)?;
    o_prot.write_field_end()?;
    o_prot.write_field_stop()?;
    o_prot.write_struct_end()?;
    o_prot.write_message_end()?;
    o_prot.flush()
}

fn write_application_error(
    o_prot: &mut dyn TOutputProtocol,
    method: &str,
    seq_id: i32,
    kind: ApplicationErrorKind,
    message: String,
) -> thrift::Result<()> {
    o_prot.write_message_begin(&TMessageIdentifier::new(
        method,
        TMessageType::Exception,
        seq_id,
    ))?;
    let err = ApplicationError::new(kind, message);
    thrift::Error::write_application_error_to_out_protocol(&err, o_prot)?;
    o_prot.write_message_end()?;
    o_prot.flush()
}

impl TProcessor for InternalServiceProcessor {
    fn process(
        &self,
        i_prot: &mut dyn TInputProtocol,
        o_prot: &mut dyn TOutputProtocol,
    ) -> thrift::Result<()> {
        let header = i_prot.read_message_begin()?;
        let seq_id = header.sequence_number;
        match header.name.as_str() {
            "ExecPlanFragment" => {
                let args = read_call_args::<TExecPlanFragmentParams>(i_prot)?;
                i_prot.read_message_end()?;
                match args {
                    Some(params) => {
                        let result = self.service.exec_plan_fragment(params);
                        write_call_result(o_prot, "ExecPlanFragment", seq_id, &result)
                    }
                    None => write_application_error(
                        o_prot,
                        "ExecPlanFragment",
                        seq_id,
                        ApplicationErrorKind::ProtocolError,
                        "missing call arguments".to_string(),
                    ),
                }
            }
            "ReportExecStatus" => {
                let args = read_call_args::<TReportExecStatusParams>(i_prot)?;
                i_prot.read_message_end()?;
                match args {
                    Some(params) => {
                        let result = self.service.report_exec_status(params);
                        write_call_result(o_prot, "ReportExecStatus", seq_id, &result)
                    }
                    None => write_application_error(
                        o_prot,
                        "ReportExecStatus",
                        seq_id,
                        ApplicationErrorKind::ProtocolError,
                        "missing call arguments".to_string(),
                    ),
                }
            }
            "CancelPlanFragment" => {
                let args = read_call_args::<TCancelPlanFragmentParams>(i_prot)?;
                i_prot.read_message_end()?;
                match args {
                    Some(params) => {
                        let result = self.service.cancel_plan_fragment(params);
                        write_call_result(o_prot, "CancelPlanFragment", seq_id, &result)
                    }
                    None => write_application_error(
                        o_prot,
                        "CancelPlanFragment",
                        seq_id,
                        ApplicationErrorKind::ProtocolError,
                        "missing call arguments".to_string(),
                    ),
                }
            }
            unknown => {
                i_prot.skip(TType::Struct)?;
                i_prot.read_message_end()?;
                write_application_error(
                    o_prot,
                    unknown,
                    seq_id,
                    ApplicationErrorKind::UnknownMethod,
                    format!("unknown method {unknown}"),
                )
            }
        }
    }
}

/// Starts the internal service in a background thread.
pub fn start_internal_service(
    service: Arc<InternalService>,
    host: &str,
    port: u16,
    num_workers: usize,
) -> Result<(), Status> {
    let bind_host = if host.is_empty() { "0.0.0.0" } else { host };
    let addr = format!("{bind_host}:{port}");
    let addr_for_log = addr.clone();

    info!(
        target: "springbok::rpc",
        "Starting internal service on {}", addr
    );

    let processor = InternalServiceProcessor::new(service);
    let mut server = TServer::new(
        TBufferedReadTransportFactory::new(),
        TBinaryInputProtocolFactory::new(),
        TBufferedWriteTransportFactory::new(),
        TBinaryOutputProtocolFactory::new(),
        processor,
        num_workers,
    );

    thread::Builder::new()
        .name("internal-service".to_string())
        .spawn(move || {
            info!(
                target: "springbok::rpc",
                "Internal service listening on {}", addr_for_log
            );
            if let Err(e) = server.listen(&addr) {
                error!(
                    target: "springbok::rpc",
                    "Internal service error: {}", e
                );
            }
        })
        .map_err(|e| Status::internal_error(format!("failed to spawn server thread: {e}")))?;

    Ok(())
}

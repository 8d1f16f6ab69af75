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

use crate::wire::status::{TStatus, TStatusCode};

/// Execution status threaded through every layer of the runtime.
///
/// `Status` is cheap to clone for the OK case and carries an error message
/// otherwise. The first non-OK status wins at each scope; callers enforce
/// that with [`Status::update`]-style sticky cells rather than mutating a
/// status in place.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Status {
    code: TStatusCode,
    msg: Option<String>,
}

/// Why a query stopped early. The runtime internally overloads CANCELLED to
/// also mean "limit reached during fetch"; this enum is what callers see.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CancelledCause {
    User,
    MemLimit,
    System,
}

impl Status {
    pub const OK: Status = Status {
        code: TStatusCode::Ok,
        msg: None,
    };

    pub fn cancelled() -> Status {
        Status {
            code: TStatusCode::Cancelled,
            msg: Some("Cancelled".to_string()),
        }
    }

    pub fn cancelled_with_cause(msg: impl Into<String>) -> Status {
        Status {
            code: TStatusCode::Cancelled,
            msg: Some(msg.into()),
        }
    }

    pub fn mem_limit_exceeded(msg: impl Into<String>) -> Status {
        Status {
            code: TStatusCode::MemLimitExceeded,
            msg: Some(msg.into()),
        }
    }

    pub fn internal_error(msg: impl Into<String>) -> Status {
        Status {
            code: TStatusCode::InternalError,
            msg: Some(msg.into()),
        }
    }

    pub fn runtime_error(msg: impl Into<String>) -> Status {
        Status {
            code: TStatusCode::RuntimeError,
            msg: Some(msg.into()),
        }
    }

    pub fn rpc_error(msg: impl Into<String>) -> Status {
        Status {
            code: TStatusCode::ThriftRpcError,
            msg: Some(msg.into()),
        }
    }

    pub fn permission_denied(msg: impl Into<String>) -> Status {
        Status {
            code: TStatusCode::PermissionDenied,
            msg: Some(msg.into()),
        }
    }

    pub fn ok(&self) -> bool {
        self.code == TStatusCode::Ok
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == TStatusCode::Cancelled
    }

    pub fn is_mem_limit_exceeded(&self) -> bool {
        self.code == TStatusCode::MemLimitExceeded
    }

    pub fn code(&self) -> TStatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        self.msg.as_deref().unwrap_or("")
    }

    pub fn to_thrift(&self) -> TStatus {
        TStatus {
            status_code: self.code,
            error_msgs: self.msg.as_ref().map(|m| vec![m.clone()]),
        }
    }

    pub fn from_thrift(t: &TStatus) -> Status {
        Status {
            code: t.status_code,
            msg: t
                .error_msgs
                .as_ref()
                .and_then(|msgs| msgs.first().cloned()),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.msg {
            Some(m) => write!(f, "{:?}: {}", self.code, m),
            None => write!(f, "{:?}", self.code),
        }
    }
}

/// Sticky status cell: the first non-OK status wins, later updates are
/// ignored. All reads/writes go through the owner's mutex.
#[derive(Debug)]
pub struct StatusCell {
    status: std::sync::Mutex<Status>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self {
            status: std::sync::Mutex::new(Status::OK),
        }
    }

    /// If `status` is an error and no error has been recorded yet, record
    /// it. Returns the current (possibly pre-existing) status.
    pub fn update(&self, status: &Status) -> Status {
        self.update_with_transition(status).0
    }

    /// Like [`StatusCell::update`], also reporting whether this call was
    /// the one that recorded the error.
    pub fn update_with_transition(&self, status: &Status) -> (Status, bool) {
        let mut guard = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if !status.ok() && guard.ok() {
            *guard = status.clone();
            return (guard.clone(), true);
        }
        (guard.clone(), false)
    }

    pub fn get(&self) -> Status {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{Status, StatusCell};

    #[test]
    fn first_error_wins() {
        let cell = StatusCell::new();
        assert!(cell.update(&Status::OK).ok());
        let first = Status::internal_error("boom");
        assert_eq!(cell.update(&first), first);
        assert_eq!(cell.update(&Status::cancelled()), first);
        assert_eq!(cell.update(&Status::OK), first);
        assert!(!cell.get().ok());
    }
}

// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! OBEX request/response model.
//!
//! Framing and SRM are handled by the transport, which hands the engine one
//! request per OBEX packet with its headers decoded. A PUT split over several
//! packets arrives as non-final requests ([`ObexRequest::is_final`]) that the
//! server assembles and answers with Continue until the final one.

pub mod constants;

/// OBEX operation carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Connect,
    Disconnect,
    Put,
    Get,
    SetPath,
    Abort,
}

impl Opcode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Opcode::Connect => "CONNECT",
            Opcode::Disconnect => "DISCONNECT",
            Opcode::Put => "PUT",
            Opcode::Get => "GET",
            Opcode::SetPath => "SETPATH",
            Opcode::Abort => "ABORT",
        }
    }
}

/// OBEX response codes (final bit set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    Continue = 0x90,
    Success = 0xA0,
    BadRequest = 0xC0,
    Unauthorized = 0xC1,
    Forbidden = 0xC3,
    NotFound = 0xC4,
    NotAcceptable = 0xC6,
    PreconditionFailed = 0xCC,
    InternalServerError = 0xD0,
    NotImplemented = 0xD1,
    ServiceUnavailable = 0xD3,
}

impl ResponseCode {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseCode::Success | ResponseCode::Continue)
    }
}

/// SETPATH flags byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetPathFlags(pub u8);

impl SetPathFlags {
    const BACKUP: u8 = 0x01;
    const DONT_CREATE: u8 = 0x02;

    /// Flags for "go to parent first".
    pub fn parent() -> Self {
        Self(Self::BACKUP | Self::DONT_CREATE)
    }

    /// Flags for a plain descent (or reset to root with an empty name).
    pub fn child() -> Self {
        Self(Self::DONT_CREATE)
    }

    pub fn go_to_parent(&self) -> bool {
        self.0 & Self::BACKUP != 0
    }
}

/// Decoded OBEX headers relevant to MAP.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    pub connection_id: Option<u32>,
    pub name: Option<String>,
    pub type_: Option<String>,
    pub target: Option<Vec<u8>>,
    pub who: Option<Vec<u8>>,
    pub app_params: Option<Vec<u8>>,
    pub body: Option<Vec<u8>>,
}

/// One request as delivered by the transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObexRequest {
    pub opcode: Opcode,
    pub headers: Headers,
    pub setpath_flags: SetPathFlags,
    /// False while a multi-packet PUT still has body packets to come.
    pub is_final: bool,
}

impl ObexRequest {
    /// Create a final request with empty headers.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            headers: Headers::default(),
            setpath_flags: SetPathFlags::default(),
            is_final: true,
        }
    }

    pub fn with_type(mut self, type_: &str) -> Self {
        self.headers.type_ = Some(type_.to_string());
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.headers.name = Some(name.to_string());
        self
    }

    pub fn with_target(mut self, target: &[u8]) -> Self {
        self.headers.target = Some(target.to_vec());
        self
    }

    pub fn with_app_params(mut self, params: Vec<u8>) -> Self {
        self.headers.app_params = Some(params);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.headers.body = Some(body);
        self
    }

    pub fn with_flags(mut self, flags: SetPathFlags) -> Self {
        self.setpath_flags = flags;
        self
    }

    pub fn with_connection_id(mut self, id: u32) -> Self {
        self.headers.connection_id = Some(id);
        self
    }

    /// Mark this packet as non-final (more PUT body follows).
    pub fn partial(mut self) -> Self {
        self.is_final = false;
        self
    }

    /// Name header, with an absent header reading as empty.
    pub fn name(&self) -> &str {
        self.headers.name.as_deref().unwrap_or("")
    }
}

/// Response handed back to the transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObexResponse {
    pub code: ResponseCode,
    pub headers: Headers,
}

impl ObexResponse {
    pub fn new(code: ResponseCode) -> Self {
        Self {
            code,
            headers: Headers::default(),
        }
    }

    pub fn success() -> Self {
        Self::new(ResponseCode::Success)
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.headers.body = Some(body);
        self
    }

    pub fn with_app_params(mut self, params: Vec<u8>) -> Self {
        if !params.is_empty() {
            self.headers.app_params = Some(params);
        }
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.headers.name = Some(name.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setpath_flags() {
        assert!(SetPathFlags::parent().go_to_parent());
        assert!(!SetPathFlags::child().go_to_parent());
        assert!(!SetPathFlags::default().go_to_parent());
    }

    #[test]
    fn test_request_name_defaults_empty() {
        let req = ObexRequest::new(Opcode::Get);
        assert_eq!(req.name(), "");
        assert_eq!(req.clone().with_name("inbox").name(), "inbox");
        assert!(req.is_final);
    }

    #[test]
    fn test_empty_app_params_not_attached() {
        let resp = ObexResponse::success().with_app_params(Vec::new());
        assert!(resp.headers.app_params.is_none());
        assert_eq!(resp.code.as_u8(), 0xA0);
    }
}

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

//! Engine error type and its OBEX response mapping.

use thiserror::Error;

use crate::bmsg::BmsgError;
use crate::obex::ResponseCode;
use crate::store::StoreError;

pub type MapResult<T> = std::result::Result<T, MapError>;

#[derive(Debug, Error)]
pub enum MapError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not acceptable: {0}")]
    NotAcceptable(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error(transparent)]
    Message(#[from] BmsgError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MapError {
    /// The OBEX response code reported to the peer for this error.
    pub fn response_code(&self) -> ResponseCode {
        match self {
            MapError::BadRequest(_) | MapError::Message(_) => ResponseCode::BadRequest,
            MapError::NotFound(_) => ResponseCode::NotFound,
            MapError::Forbidden(_) => ResponseCode::Forbidden,
            MapError::NotAcceptable(_) => ResponseCode::NotAcceptable,
            MapError::PreconditionFailed(_) => ResponseCode::PreconditionFailed,
            MapError::NotImplemented(_) => ResponseCode::NotImplemented,
            MapError::ServiceUnavailable(_) | MapError::NotConnected(_) => {
                ResponseCode::ServiceUnavailable
            }
            MapError::Store(StoreError::Unavailable(_)) => ResponseCode::ServiceUnavailable,
            MapError::Store(StoreError::Unchanged(_)) => ResponseCode::NotFound,
            MapError::Store(StoreError::Backend(_))
            | MapError::Transport(_)
            | MapError::Xml(_) => ResponseCode::InternalServerError,
        }
    }
}

impl From<xml::writer::Error> for MapError {
    fn from(e: xml::writer::Error) -> Self {
        MapError::Xml(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_codes() {
        assert_eq!(
            MapError::BadRequest("x".into()).response_code(),
            ResponseCode::BadRequest
        );
        assert_eq!(
            MapError::Store(StoreError::Unavailable("db".into())).response_code(),
            ResponseCode::ServiceUnavailable
        );
        assert_eq!(
            MapError::Store(StoreError::Unchanged("update".into())).response_code(),
            ResponseCode::NotFound
        );
        assert_eq!(
            MapError::Message(BmsgError::BadStatus).response_code(),
            ResponseCode::BadRequest
        );
    }
}

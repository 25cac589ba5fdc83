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

//! Per-peer MAS session state.

use tracing::{debug, warn};

use crate::folder::FolderId;
use crate::obex::{Headers, ObexRequest};
use crate::resource::FormatVersions;

/// Whether a GET or PUT is being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Busy,
}

/// Collects a PUT delivered over several packets.
///
/// Type, Name and application parameters usually come with the first
/// packet and only body follows, so headers are kept from the first packet
/// that carries them.
#[derive(Debug, Default)]
pub struct PutAssembler {
    headers: Option<Headers>,
    buffer: Vec<u8>,
}

fn fill_missing(pending: &mut Headers, later: Headers) {
    pending.connection_id = pending.connection_id.or(later.connection_id);
    pending.name = pending.name.take().or(later.name);
    pending.type_ = pending.type_.take().or(later.type_);
    pending.app_params = pending.app_params.take().or(later.app_params);
}

impl PutAssembler {
    /// Add one packet.
    ///
    /// Returns the whole request, with the merged headers and full body, once
    /// the final packet arrives; otherwise `None`.
    pub fn process(&mut self, mut request: ObexRequest) -> Option<ObexRequest> {
        if let Some(chunk) = request.headers.body.take() {
            self.buffer.extend_from_slice(&chunk);
        }
        let mut headers = match self.headers.take() {
            Some(mut pending) => {
                fill_missing(&mut pending, request.headers);
                pending
            }
            None => {
                if !request.is_final {
                    debug!("Started PUT assembly, type {:?}", request.headers.type_);
                }
                request.headers
            }
        };
        if !request.is_final {
            self.headers = Some(headers);
            return None;
        }
        debug!("PUT complete: {} bytes", self.buffer.len());
        headers.body = Some(std::mem::take(&mut self.buffer));
        request.headers = headers;
        Some(request)
    }

    pub fn in_progress(&self) -> bool {
        self.headers.is_some()
    }

    pub fn reset(&mut self) {
        if self.in_progress() {
            warn!("Dropping partial PUT body of {} bytes", self.buffer.len());
        }
        self.headers = None;
        self.buffer.clear();
    }
}

/// State of one connected MCE.
#[derive(Debug)]
pub struct SessionState {
    pub peer: String,
    pub connection_id: u32,
    pub current_folder: FolderId,
    pub phase: SessionPhase,
    /// The peer holds an MNS reference through this session.
    pub notifications_registered: bool,
    pub(crate) pending_put: PutAssembler,
    local_features: u32,
    remote_features: u32,
    formats: Option<FormatVersions>,
}

impl SessionState {
    pub fn new(
        peer: &str,
        connection_id: u32,
        root: FolderId,
        local_features: u32,
        remote_features: u32,
    ) -> Self {
        Self {
            peer: peer.to_string(),
            connection_id,
            current_folder: root,
            phase: SessionPhase::Idle,
            notifications_registered: false,
            pending_put: PutAssembler::default(),
            local_features,
            remote_features,
            formats: None,
        }
    }

    pub fn remote_features(&self) -> u32 {
        self.remote_features
    }

    /// Local capabilities intersected with the peer's.
    pub fn negotiated_features(&self) -> u32 {
        self.local_features & self.remote_features
    }

    /// Update the peer's mask, e.g. once its MAS SDP record is known.
    pub fn set_remote_features(&mut self, mask: u32) {
        self.remote_features = mask;
        self.formats = None;
    }

    /// Format versions for the negotiated mask, computed on first use.
    pub fn formats(&mut self) -> FormatVersions {
        if let Some(formats) = self.formats {
            return formats;
        }
        let formats = FormatVersions::from_features(self.negotiated_features());
        self.formats = Some(formats);
        formats
    }
}

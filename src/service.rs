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

//! Account-side collaborator: sending, folder refresh and owner presence.

use tracing::info;

use crate::bmsg::MessageType;
use crate::error::MapResult;

/// A pushed message handed over for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub handle: String,
    pub msg_type: MessageType,
    /// Primary recipient addresses (phone numbers or e-mail).
    pub recipients: Vec<String>,
    pub text: String,
    pub retry: bool,
    /// Do not keep a copy in the sent folder.
    pub transparent: bool,
}

/// Owner presence as exchanged through `x-bt/ownerStatus`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerStatus {
    pub presence_availability: u8,
    pub presence_text: String,
    pub last_activity: String,
    pub chat_state: u8,
}

/// Account backend for one MAS instance.
pub trait MessageService: Send + Sync {
    /// Hand a message from the outbox to the network.
    fn send_message(&self, mas_id: u8, message: &OutgoingMessage) -> MapResult<()>;

    /// Refresh `folder` of the account from its server.
    fn update_folder(&self, mas_id: u8, folder: &str) -> MapResult<()>;

    fn owner_status(&self, mas_id: u8, conversation_id: Option<&str>) -> MapResult<OwnerStatus>;

    fn set_owner_status(
        &self,
        mas_id: u8,
        conversation_id: Option<&str>,
        status: &OwnerStatus,
    ) -> MapResult<()>;
}

/// Service that only logs requests. Used when no account backend is wired.
#[derive(Debug, Default)]
pub struct LoggingService;

impl MessageService for LoggingService {
    fn send_message(&self, mas_id: u8, message: &OutgoingMessage) -> MapResult<()> {
        info!(
            "[MAS {}] send {} {} to {:?}",
            mas_id,
            message.msg_type.as_str(),
            message.handle,
            message.recipients
        );
        Ok(())
    }

    fn update_folder(&self, mas_id: u8, folder: &str) -> MapResult<()> {
        info!("[MAS {}] update folder {}", mas_id, folder);
        Ok(())
    }

    fn owner_status(&self, _mas_id: u8, _conversation_id: Option<&str>) -> MapResult<OwnerStatus> {
        Ok(OwnerStatus::default())
    }

    fn set_owner_status(
        &self,
        mas_id: u8,
        conversation_id: Option<&str>,
        status: &OwnerStatus,
    ) -> MapResult<()> {
        info!(
            "[MAS {}] owner status {:?} for {:?}",
            mas_id, status, conversation_id
        );
        Ok(())
    }
}

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

//! Application parameter tag ids.

/// Allowed length of a tag's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagLength {
    Exact(usize),
    Max(usize),
}

impl TagLength {
    pub fn accepts(&self, len: usize) -> bool {
        match *self {
            TagLength::Exact(n) => len == n,
            TagLength::Max(n) => len <= n,
        }
    }
}

/// MAP application parameter tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ParamTag {
    MaxListCount = 0x01,
    ListStartOffset = 0x02,
    FilterMessageType = 0x03,
    FilterPeriodBegin = 0x04,
    FilterPeriodEnd = 0x05,
    FilterReadStatus = 0x06,
    FilterRecipient = 0x07,
    FilterOriginator = 0x08,
    FilterPriority = 0x09,
    Attachment = 0x0A,
    Transparent = 0x0B,
    Retry = 0x0C,
    NewMessage = 0x0D,
    NotificationStatus = 0x0E,
    MasInstanceId = 0x0F,
    ParameterMask = 0x10,
    FolderListingSize = 0x11,
    ListingSize = 0x12,
    SubjectLength = 0x13,
    Charset = 0x14,
    FractionRequest = 0x15,
    FractionDeliver = 0x16,
    StatusIndicator = 0x17,
    StatusValue = 0x18,
    MseTime = 0x19,
    DatabaseIdentifier = 0x1A,
    ConversationListingVersionCounter = 0x1B,
    PresenceAvailability = 0x1C,
    PresenceText = 0x1D,
    LastActivity = 0x1E,
    FilterLastActivityBegin = 0x1F,
    FilterLastActivityEnd = 0x20,
    ChatState = 0x21,
    ConversationId = 0x22,
    FolderVersionCounter = 0x23,
    FilterMessageHandle = 0x24,
    NotificationFilterMask = 0x25,
    ConversationParameterMask = 0x26,
    OwnerUci = 0x27,
    ExtendedData = 0x28,
    MapSupportedFeatures = 0x29,
    MessageHandle = 0x2A,
    ModifyText = 0x2B,
}

impl ParamTag {
    pub const ALL: [ParamTag; 43] = [
        ParamTag::MaxListCount,
        ParamTag::ListStartOffset,
        ParamTag::FilterMessageType,
        ParamTag::FilterPeriodBegin,
        ParamTag::FilterPeriodEnd,
        ParamTag::FilterReadStatus,
        ParamTag::FilterRecipient,
        ParamTag::FilterOriginator,
        ParamTag::FilterPriority,
        ParamTag::Attachment,
        ParamTag::Transparent,
        ParamTag::Retry,
        ParamTag::NewMessage,
        ParamTag::NotificationStatus,
        ParamTag::MasInstanceId,
        ParamTag::ParameterMask,
        ParamTag::FolderListingSize,
        ParamTag::ListingSize,
        ParamTag::SubjectLength,
        ParamTag::Charset,
        ParamTag::FractionRequest,
        ParamTag::FractionDeliver,
        ParamTag::StatusIndicator,
        ParamTag::StatusValue,
        ParamTag::MseTime,
        ParamTag::DatabaseIdentifier,
        ParamTag::ConversationListingVersionCounter,
        ParamTag::PresenceAvailability,
        ParamTag::PresenceText,
        ParamTag::LastActivity,
        ParamTag::FilterLastActivityBegin,
        ParamTag::FilterLastActivityEnd,
        ParamTag::ChatState,
        ParamTag::ConversationId,
        ParamTag::FolderVersionCounter,
        ParamTag::FilterMessageHandle,
        ParamTag::NotificationFilterMask,
        ParamTag::ConversationParameterMask,
        ParamTag::OwnerUci,
        ParamTag::ExtendedData,
        ParamTag::MapSupportedFeatures,
        ParamTag::MessageHandle,
        ParamTag::ModifyText,
    ];

    pub fn from_u8(id: u8) -> Option<Self> {
        match id {
            0x01..=0x2B => Some(Self::ALL[(id - 1) as usize]),
            _ => None,
        }
    }

    pub fn id(&self) -> u8 {
        *self as u8
    }

    /// Allowed value length on the wire.
    pub fn length(&self) -> TagLength {
        use ParamTag::*;
        match self {
            FilterMessageType | FilterReadStatus | FilterPriority | Attachment | Transparent
            | Retry | NewMessage | NotificationStatus | MasInstanceId | SubjectLength | Charset
            | FractionRequest | FractionDeliver | StatusIndicator | StatusValue
            | PresenceAvailability | ChatState | ModifyText => TagLength::Exact(1),
            MaxListCount | ListStartOffset | FolderListingSize | ListingSize => TagLength::Exact(2),
            ParameterMask | NotificationFilterMask | ConversationParameterMask
            | MapSupportedFeatures => TagLength::Exact(4),
            DatabaseIdentifier | ConversationListingVersionCounter | FolderVersionCounter => {
                TagLength::Max(32)
            }
            FilterMessageHandle | MessageHandle => TagLength::Max(64),
            ConversationId => TagLength::Max(128),
            FilterPeriodBegin | FilterPeriodEnd | FilterRecipient | FilterOriginator | MseTime
            | PresenceText | LastActivity | FilterLastActivityBegin | FilterLastActivityEnd
            | OwnerUci | ExtendedData => TagLength::Max(255),
        }
    }
}

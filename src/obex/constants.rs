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

//! MAP target UUIDs, OBEX type strings and capability bits.

use uuid::Uuid;

/// Message Access Service target (CONNECT to the MAS).
pub const MAS_TARGET_UUID: Uuid = Uuid::from_u128(0xbb582b40_420c_11db_b0de_0800200c9a66);

/// Message Notification Service target (CONNECT to the peer's MNS).
pub const MNS_TARGET_UUID: Uuid = Uuid::from_u128(0xbb582b41_420c_11db_b0de_0800200c9a66);

/// OBEX Type header values.
pub mod types {
    pub const FOLDER_LISTING: &str = "x-obex/folder-listing";
    pub const MESSAGE_LISTING: &str = "x-bt/MAP-msg-listing";
    pub const CONVERSATION_LISTING: &str = "x-bt/MAP-convo-listing";
    pub const MESSAGE: &str = "x-bt/message";
    pub const MESSAGE_STATUS: &str = "x-bt/messageStatus";
    pub const NOTIFICATION_REGISTRATION: &str = "x-bt/MAP-NotificationRegistration";
    pub const NOTIFICATION_FILTER: &str = "x-bt/MAP-notification-filter";
    pub const MESSAGE_UPDATE: &str = "x-bt/MAP-messageUpdate";
    pub const INSTANCE_INFORMATION: &str = "x-bt/MASInstanceInformation";
    pub const OWNER_STATUS: &str = "x-bt/ownerStatus";
    pub const EVENT_REPORT: &str = "x-bt/MAP-event-report";
}

/// MapSupportedFeatures bits.
pub mod features {
    pub const NOTIFICATION_REGISTRATION: u32 = 1 << 0;
    pub const NOTIFICATION: u32 = 1 << 1;
    pub const BROWSING: u32 = 1 << 2;
    pub const UPLOADING: u32 = 1 << 3;
    pub const DELETE: u32 = 1 << 4;
    pub const INSTANCE_INFORMATION: u32 = 1 << 5;
    pub const EXTENDED_EVENT_REPORT_1_1: u32 = 1 << 6;
    pub const EVENT_REPORT_1_2: u32 = 1 << 7;
    pub const MESSAGE_FORMAT_1_1: u32 = 1 << 8;
    pub const MESSAGE_LISTING_FORMAT_1_1: u32 = 1 << 9;
    pub const PERSISTENT_MESSAGE_HANDLES: u32 = 1 << 10;
    pub const DATABASE_IDENTIFIER: u32 = 1 << 11;
    pub const FOLDER_VERSION_COUNTER: u32 = 1 << 12;
    pub const CONVERSATION_VERSION_COUNTERS: u32 = 1 << 13;
    pub const PARTICIPANT_PRESENCE_NOTIFICATION: u32 = 1 << 14;
    pub const PARTICIPANT_CHAT_STATE_NOTIFICATION: u32 = 1 << 15;
    pub const PBAP_CONTACT_CROSS_REFERENCE: u32 = 1 << 16;
    pub const NOTIFICATION_FILTERING: u32 = 1 << 17;
    pub const UTC_OFFSET_TIMESTAMP: u32 = 1 << 18;
    pub const SUPPORTED_FEATURES_IN_CONNECT: u32 = 1 << 19;
    pub const CONVERSATION_LISTING: u32 = 1 << 20;
    pub const OWNER_STATUS: u32 = 1 << 21;
    pub const MESSAGE_FORWARDING: u32 = 1 << 22;

    /// Mask assumed for a peer that never advertised its features (MAP 1.1 baseline).
    pub const LEGACY_DEFAULT: u32 = 0x0000_001F;

    /// Everything this engine implements.
    pub const ALL_SUPPORTED: u32 = 0x007F_FFFF;
}

/// SDP attribute ids read from the peer's MAS/MNS records.
pub mod sdp {
    pub const GOEP_L2CAP_PSM: u16 = 0x0200;
    pub const MAS_INSTANCE_ID: u16 = 0x0315;
    pub const SUPPORTED_MESSAGE_TYPES: u16 = 0x0316;
    pub const MAP_SUPPORTED_FEATURES: u16 = 0x0317;
}

/// Longest MASInstanceInformation body sent back to a peer.
pub const INSTANCE_INFORMATION_MAX_LEN: usize = 200;

/// MaxListCount used when a listing request omits it.
pub const DEFAULT_MAX_LIST_COUNT: u32 = 1024;

/// Well-known folder names.
pub mod folders {
    pub const ROOT: &str = "";
    pub const TELECOM: &str = "telecom";
    pub const MSG: &str = "msg";
    pub const INBOX: &str = "inbox";
    pub const OUTBOX: &str = "outbox";
    pub const SENT: &str = "sent";
    pub const DELETED: &str = "deleted";
    pub const DRAFT: &str = "draft";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            MAS_TARGET_UUID.to_string(),
            "bb582b40-420c-11db-b0de-0800200c9a66"
        );
        assert_eq!(
            MNS_TARGET_UUID.to_string(),
            "bb582b41-420c-11db-b0de-0800200c9a66"
        );
        assert_eq!(MAS_TARGET_UUID.as_bytes().len(), 16);
    }

    #[test]
    fn test_feature_bits() {
        assert_eq!(features::EVENT_REPORT_1_2, 0x80);
        assert_eq!(features::MESSAGE_FORMAT_1_1, 0x100);
        assert_eq!(features::MESSAGE_FORWARDING, 0x0040_0000);
        assert_eq!(features::ALL_SUPPORTED & features::MESSAGE_FORWARDING, features::MESSAGE_FORWARDING);
    }
}

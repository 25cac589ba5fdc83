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

//! TLV application parameter codec.
//!
//! Decoding never fails as a whole: a value whose length is out of bounds
//! for its tag is dropped with a warning and parsing moves on to the next
//! triplet. Unknown tags are skipped.

pub mod tag;

use tracing::{debug, warn};

pub use tag::{ParamTag, TagLength};

/// FilterMessageType bits. A set bit excludes that type.
pub mod message_type_filter {
    pub const SMS_GSM: u8 = 1 << 0;
    pub const SMS_CDMA: u8 = 1 << 1;
    pub const EMAIL: u8 = 1 << 2;
    pub const MMS: u8 = 1 << 3;
    pub const IM: u8 = 1 << 4;
}

/// Decoded application parameters of one request or response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationParameters {
    pub max_list_count: Option<u32>,
    pub list_start_offset: Option<u32>,
    pub filter_message_type: Option<u8>,
    pub filter_period_begin: Option<String>,
    pub filter_period_end: Option<String>,
    pub filter_read_status: Option<u8>,
    pub filter_recipient: Option<String>,
    pub filter_originator: Option<String>,
    pub filter_priority: Option<u8>,
    pub attachment: Option<u8>,
    pub transparent: Option<u8>,
    pub retry: Option<u8>,
    pub new_message: Option<u8>,
    pub notification_status: Option<u8>,
    pub mas_instance_id: Option<u8>,
    pub parameter_mask: Option<u32>,
    pub folder_listing_size: Option<u32>,
    pub listing_size: Option<u32>,
    pub subject_length: Option<u8>,
    pub charset: Option<u8>,
    pub fraction_request: Option<u8>,
    pub fraction_deliver: Option<u8>,
    pub status_indicator: Option<u8>,
    pub status_value: Option<u8>,
    pub mse_time: Option<String>,
    pub database_identifier: Option<String>,
    pub conversation_listing_version_counter: Option<String>,
    pub presence_availability: Option<u8>,
    pub presence_text: Option<String>,
    pub last_activity: Option<String>,
    pub filter_last_activity_begin: Option<String>,
    pub filter_last_activity_end: Option<String>,
    pub chat_state: Option<u8>,
    pub conversation_id: Option<String>,
    pub folder_version_counter: Option<String>,
    pub filter_message_handle: Option<String>,
    pub notification_filter_mask: Option<u32>,
    pub conversation_parameter_mask: Option<u32>,
    pub owner_uci: Option<String>,
    pub extended_data: Option<String>,
    pub map_supported_features: Option<u32>,
    pub message_handle: Option<String>,
    pub modify_text: Option<u8>,
}

fn be_uint(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32)
}

fn decode_text(tag: ParamTag, bytes: &[u8]) -> Option<String> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Some(s.trim_end_matches('\0').to_string()),
        Err(_) => {
            warn!("Dropping {:?}: value is not UTF-8", tag);
            None
        }
    }
}

impl ApplicationParameters {
    /// Decode a TLV stream.
    pub fn decode(data: &[u8]) -> Self {
        let mut params = Self::default();
        let mut pos = 0;

        while pos + 2 <= data.len() {
            let id = data[pos];
            let len = data[pos + 1] as usize;
            let start = pos + 2;
            let end = start + len;
            if end > data.len() {
                warn!(
                    "Truncated parameter 0x{:02X}: declared {} bytes, {} left",
                    id,
                    len,
                    data.len() - start
                );
                break;
            }
            pos = end;

            let Some(tag) = ParamTag::from_u8(id) else {
                debug!("Ignoring unknown parameter tag 0x{:02X}", id);
                continue;
            };
            let expected = tag.length();
            if !expected.accepts(len) {
                warn!(
                    "Dropping {:?}: received {} bytes, expected {:?}",
                    tag, len, expected
                );
                continue;
            }
            params.set(tag, &data[start..end]);
        }

        if pos < data.len() && data.len() - pos < 2 {
            warn!("Trailing {} bytes after last parameter", data.len() - pos);
        }

        params
    }

    fn set(&mut self, tag: ParamTag, v: &[u8]) {
        let byte = v.first().copied().unwrap_or(0);
        match tag {
            ParamTag::MaxListCount => self.max_list_count = Some(be_uint(v)),
            ParamTag::ListStartOffset => self.list_start_offset = Some(be_uint(v)),
            ParamTag::FilterMessageType => self.filter_message_type = Some(byte),
            ParamTag::FilterPeriodBegin => self.filter_period_begin = decode_text(tag, v),
            ParamTag::FilterPeriodEnd => self.filter_period_end = decode_text(tag, v),
            ParamTag::FilterReadStatus => self.filter_read_status = Some(byte),
            ParamTag::FilterRecipient => {
                self.filter_recipient = decode_text(tag, v).filter(|s| !s.is_empty())
            }
            ParamTag::FilterOriginator => {
                self.filter_originator = decode_text(tag, v).filter(|s| !s.is_empty())
            }
            ParamTag::FilterPriority => self.filter_priority = Some(byte),
            ParamTag::Attachment => self.attachment = Some(byte),
            ParamTag::Transparent => self.transparent = Some(byte),
            ParamTag::Retry => self.retry = Some(byte),
            ParamTag::NewMessage => self.new_message = Some(byte),
            ParamTag::NotificationStatus => self.notification_status = Some(byte),
            ParamTag::MasInstanceId => self.mas_instance_id = Some(byte),
            ParamTag::ParameterMask => self.parameter_mask = Some(be_uint(v)),
            ParamTag::FolderListingSize => self.folder_listing_size = Some(be_uint(v)),
            ParamTag::ListingSize => self.listing_size = Some(be_uint(v)),
            ParamTag::SubjectLength => self.subject_length = Some(byte),
            ParamTag::Charset => self.charset = Some(byte),
            ParamTag::FractionRequest => self.fraction_request = Some(byte),
            ParamTag::FractionDeliver => self.fraction_deliver = Some(byte),
            ParamTag::StatusIndicator => self.status_indicator = Some(byte),
            ParamTag::StatusValue => self.status_value = Some(byte),
            ParamTag::MseTime => self.mse_time = decode_text(tag, v),
            ParamTag::DatabaseIdentifier => self.database_identifier = decode_text(tag, v),
            ParamTag::ConversationListingVersionCounter => {
                self.conversation_listing_version_counter = decode_text(tag, v)
            }
            ParamTag::PresenceAvailability => self.presence_availability = Some(byte),
            ParamTag::PresenceText => self.presence_text = decode_text(tag, v),
            ParamTag::LastActivity => self.last_activity = decode_text(tag, v),
            ParamTag::FilterLastActivityBegin => {
                self.filter_last_activity_begin = decode_text(tag, v)
            }
            ParamTag::FilterLastActivityEnd => self.filter_last_activity_end = decode_text(tag, v),
            ParamTag::ChatState => self.chat_state = Some(byte),
            ParamTag::ConversationId => self.conversation_id = decode_text(tag, v),
            ParamTag::FolderVersionCounter => self.folder_version_counter = decode_text(tag, v),
            ParamTag::FilterMessageHandle => self.filter_message_handle = decode_text(tag, v),
            ParamTag::NotificationFilterMask => self.notification_filter_mask = Some(be_uint(v)),
            ParamTag::ConversationParameterMask => {
                self.conversation_parameter_mask = Some(be_uint(v))
            }
            ParamTag::OwnerUci => self.owner_uci = decode_text(tag, v),
            ParamTag::ExtendedData => self.extended_data = decode_text(tag, v),
            ParamTag::MapSupportedFeatures => self.map_supported_features = Some(be_uint(v)),
            ParamTag::MessageHandle => self.message_handle = decode_text(tag, v),
            ParamTag::ModifyText => self.modify_text = Some(byte),
        }
    }

    /// Encode every present value in tag order.
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = ParamEncoder::new();
        for tag in ParamTag::ALL {
            self.encode_tag(&mut enc, tag);
        }
        enc.finish()
    }

    fn encode_tag(&self, enc: &mut ParamEncoder, tag: ParamTag) {
        let int = |v: Option<u32>| v;
        let byte = |v: Option<u8>| v.map(u32::from);
        let value: Option<u32> = match tag {
            ParamTag::MaxListCount => int(self.max_list_count),
            ParamTag::ListStartOffset => int(self.list_start_offset),
            ParamTag::FilterMessageType => byte(self.filter_message_type),
            ParamTag::FilterReadStatus => byte(self.filter_read_status),
            ParamTag::FilterPriority => byte(self.filter_priority),
            ParamTag::Attachment => byte(self.attachment),
            ParamTag::Transparent => byte(self.transparent),
            ParamTag::Retry => byte(self.retry),
            ParamTag::NewMessage => byte(self.new_message),
            ParamTag::NotificationStatus => byte(self.notification_status),
            ParamTag::MasInstanceId => byte(self.mas_instance_id),
            ParamTag::ParameterMask => int(self.parameter_mask),
            ParamTag::FolderListingSize => int(self.folder_listing_size),
            ParamTag::ListingSize => int(self.listing_size),
            ParamTag::SubjectLength => byte(self.subject_length),
            ParamTag::Charset => byte(self.charset),
            ParamTag::FractionRequest => byte(self.fraction_request),
            ParamTag::FractionDeliver => byte(self.fraction_deliver),
            ParamTag::StatusIndicator => byte(self.status_indicator),
            ParamTag::StatusValue => byte(self.status_value),
            ParamTag::PresenceAvailability => byte(self.presence_availability),
            ParamTag::ChatState => byte(self.chat_state),
            ParamTag::NotificationFilterMask => int(self.notification_filter_mask),
            ParamTag::ConversationParameterMask => int(self.conversation_parameter_mask),
            ParamTag::MapSupportedFeatures => int(self.map_supported_features),
            ParamTag::ModifyText => byte(self.modify_text),
            _ => None,
        };
        if let Some(v) = value {
            enc.put_int(tag, v);
            return;
        }

        let text: Option<&String> = match tag {
            ParamTag::FilterPeriodBegin => self.filter_period_begin.as_ref(),
            ParamTag::FilterPeriodEnd => self.filter_period_end.as_ref(),
            ParamTag::FilterRecipient => self.filter_recipient.as_ref(),
            ParamTag::FilterOriginator => self.filter_originator.as_ref(),
            ParamTag::MseTime => self.mse_time.as_ref(),
            ParamTag::DatabaseIdentifier => self.database_identifier.as_ref(),
            ParamTag::ConversationListingVersionCounter => self.conversation_listing_version_counter.as_ref(),
            ParamTag::PresenceText => self.presence_text.as_ref(),
            ParamTag::LastActivity => self.last_activity.as_ref(),
            ParamTag::FilterLastActivityBegin => self.filter_last_activity_begin.as_ref(),
            ParamTag::FilterLastActivityEnd => self.filter_last_activity_end.as_ref(),
            ParamTag::ConversationId => self.conversation_id.as_ref(),
            ParamTag::FolderVersionCounter => self.folder_version_counter.as_ref(),
            ParamTag::FilterMessageHandle => self.filter_message_handle.as_ref(),
            ParamTag::OwnerUci => self.owner_uci.as_ref(),
            ParamTag::ExtendedData => self.extended_data.as_ref(),
            ParamTag::MessageHandle => self.message_handle.as_ref(),
            _ => None,
        };
        if let Some(s) = text {
            enc.put_str(tag, s);
        }
    }
}

/// Builds an outgoing TLV stream in caller order.
#[derive(Debug, Default)]
pub struct ParamEncoder {
    buf: Vec<u8>,
}

impl ParamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fixed-width integer tag, big-endian at the tag's width.
    pub fn put_int(&mut self, tag: ParamTag, value: u32) -> &mut Self {
        let width = match tag.length() {
            TagLength::Exact(n) => n,
            TagLength::Max(_) => {
                warn!("{:?} is not a fixed-width parameter", tag);
                return self;
            }
        };
        let bytes = value.to_be_bytes();
        self.buf.push(tag.id());
        self.buf.push(width as u8);
        self.buf.extend_from_slice(&bytes[4 - width..]);
        self
    }

    /// Append a text tag, truncated to the tag's maximum length.
    pub fn put_str(&mut self, tag: ParamTag, value: &str) -> &mut Self {
        let max = match tag.length() {
            TagLength::Max(n) => n,
            TagLength::Exact(_) => {
                warn!("{:?} is not a text parameter", tag);
                return self;
            }
        };
        let mut end = value.len().min(max);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.push(tag.id());
        self.buf.push(end as u8);
        self.buf.extend_from_slice(&value.as_bytes()[..end]);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_set() -> ApplicationParameters {
        ApplicationParameters {
            max_list_count: Some(0x1234),
            list_start_offset: Some(3),
            filter_message_type: Some(message_type_filter::EMAIL),
            filter_period_begin: Some("20240101T000000".into()),
            filter_period_end: Some("20241231T235959".into()),
            filter_read_status: Some(1),
            filter_recipient: Some("Bob*".into()),
            filter_originator: Some("*@example.com".into()),
            filter_priority: Some(2),
            attachment: Some(0),
            transparent: Some(1),
            retry: Some(1),
            new_message: Some(1),
            notification_status: Some(1),
            mas_instance_id: Some(2),
            parameter_mask: Some(0x001F_FFFF),
            folder_listing_size: Some(5),
            listing_size: Some(42),
            subject_length: Some(40),
            charset: Some(1),
            fraction_request: Some(0),
            fraction_deliver: Some(1),
            status_indicator: Some(0),
            status_value: Some(1),
            mse_time: Some("20240102T030405+0100".into()),
            database_identifier: Some("0123456789ABCDEF0123456789ABCDEF".into()),
            conversation_listing_version_counter: Some("00000000000000000000000000000001".into()),
            presence_availability: Some(2),
            presence_text: Some("Busy".into()),
            last_activity: Some("20240102T030405".into()),
            filter_last_activity_begin: Some("20240101T000000".into()),
            filter_last_activity_end: Some("20240103T000000".into()),
            chat_state: Some(3),
            conversation_id: Some("E1E2E3E4F1F2F3F4A1A2A3A4B1B2B3B4".into()),
            folder_version_counter: Some("00000000000000000000000000000002".into()),
            filter_message_handle: Some("0400000000000001".into()),
            notification_filter_mask: Some(0x0000_7FFF),
            conversation_parameter_mask: Some(0x0000_7FFF),
            owner_uci: Some("tel:+15550100".into()),
            extended_data: Some("0:5;1:2;".into()),
            map_supported_features: Some(0x007F_FFFF),
            message_handle: Some("0400000000000002".into()),
            modify_text: Some(1),
        }
    }

    #[test]
    fn test_round_trip_every_tag() {
        let params = all_set();
        let encoded = params.encode();
        assert_eq!(ApplicationParameters::decode(&encoded), params);
    }

    #[test]
    fn test_fixed_width_encoding() {
        let mut enc = ParamEncoder::new();
        enc.put_int(ParamTag::MaxListCount, 10)
            .put_int(ParamTag::NewMessage, 1)
            .put_int(ParamTag::MapSupportedFeatures, 0x0102_0304);
        assert_eq!(
            enc.finish(),
            vec![0x01, 2, 0x00, 0x0A, 0x0D, 1, 0x01, 0x29, 4, 0x01, 0x02, 0x03, 0x04]
        );
    }

    #[test]
    fn test_bad_length_dropped_parse_continues() {
        // MaxListCount with 3 bytes, then a valid ListStartOffset.
        let data = [0x01, 3, 0, 0, 5, 0x02, 2, 0, 7];
        let params = ApplicationParameters::decode(&data);
        assert_eq!(params.max_list_count, None);
        assert_eq!(params.list_start_offset, Some(7));
    }

    #[test]
    fn test_unknown_tag_ignored() {
        let data = [0x7F, 1, 9, 0x0E, 1, 1];
        let params = ApplicationParameters::decode(&data);
        assert_eq!(params.notification_status, Some(1));
    }

    #[test]
    fn test_truncated_stream_keeps_earlier_values() {
        let data = [0x0E, 1, 1, 0x22, 10, b'a'];
        let params = ApplicationParameters::decode(&data);
        assert_eq!(params.notification_status, Some(1));
        assert_eq!(params.conversation_id, None);
    }

    #[test]
    fn test_empty_originator_recipient_are_absent() {
        let data = [0x07, 0, 0x08, 0, 0x22, 0];
        let params = ApplicationParameters::decode(&data);
        assert_eq!(params.filter_recipient, None);
        assert_eq!(params.filter_originator, None);
        assert_eq!(params.conversation_id, Some(String::new()));
    }

    #[test]
    fn test_overlong_handle_dropped() {
        let mut data = vec![0x24, 65];
        data.extend(std::iter::repeat(b'A').take(65));
        assert_eq!(ApplicationParameters::decode(&data).filter_message_handle, None);
    }

    #[test]
    fn test_trailing_nul_trimmed() {
        let data = [0x2A, 4, b'A', b'B', b'C', 0];
        assert_eq!(
            ApplicationParameters::decode(&data).message_handle.as_deref(),
            Some("ABC")
        );
    }

    #[test]
    fn test_put_str_truncates_to_max() {
        let long = "F".repeat(40);
        let mut enc = ParamEncoder::new();
        enc.put_str(ParamTag::DatabaseIdentifier, &long);
        let out = enc.finish();
        assert_eq!(out[1], 32);
        assert_eq!(out.len(), 34);
    }
}

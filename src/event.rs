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

//! MAP event reports.

use tracing::{debug, warn};
use xml::writer::{EmitterConfig, XmlEvent};

use crate::bmsg::MessageType;
use crate::obex::constants::features;

/// Event kinds, in NotificationFilterMask bit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewMessage,
    MessageDeleted,
    MessageShift,
    SendingSuccess,
    SendingFailure,
    DeliverySuccess,
    DeliveryFailure,
    MemoryFull,
    MemoryAvailable,
    ReadStatusChanged,
    ConversationChanged,
    ParticipantPresenceChanged,
    ParticipantChatStateChanged,
    MessageExtendedDataChanged,
    MessageRemoved,
}

impl EventKind {
    pub const ALL: [EventKind; 15] = [
        EventKind::NewMessage,
        EventKind::MessageDeleted,
        EventKind::MessageShift,
        EventKind::SendingSuccess,
        EventKind::SendingFailure,
        EventKind::DeliverySuccess,
        EventKind::DeliveryFailure,
        EventKind::MemoryFull,
        EventKind::MemoryAvailable,
        EventKind::ReadStatusChanged,
        EventKind::ConversationChanged,
        EventKind::ParticipantPresenceChanged,
        EventKind::ParticipantChatStateChanged,
        EventKind::MessageExtendedDataChanged,
        EventKind::MessageRemoved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewMessage => "NewMessage",
            EventKind::MessageDeleted => "MessageDeleted",
            EventKind::MessageShift => "MessageShift",
            EventKind::SendingSuccess => "SendingSuccess",
            EventKind::SendingFailure => "SendingFailure",
            EventKind::DeliverySuccess => "DeliverySuccess",
            EventKind::DeliveryFailure => "DeliveryFailure",
            EventKind::MemoryFull => "MemoryFull",
            EventKind::MemoryAvailable => "MemoryAvailable",
            EventKind::ReadStatusChanged => "ReadStatusChanged",
            EventKind::ConversationChanged => "ConversationChanged",
            EventKind::ParticipantPresenceChanged => "ParticipantPresenceChanged",
            EventKind::ParticipantChatStateChanged => "ParticipantChatStateChanged",
            EventKind::MessageExtendedDataChanged => "MessageExtendedDataChanged",
            EventKind::MessageRemoved => "MessageRemoved",
        }
    }

    /// NotificationFilterMask bit for this kind.
    pub fn filter_bit(&self) -> u32 {
        let index = Self::ALL.iter().position(|k| k == self).unwrap_or(0);
        1 << index
    }

    /// Lowest report version able to carry this kind.
    pub fn min_version(&self) -> ReportVersion {
        match self {
            EventKind::ReadStatusChanged => ReportVersion::V1_1,
            EventKind::ConversationChanged
            | EventKind::ParticipantPresenceChanged
            | EventKind::ParticipantChatStateChanged
            | EventKind::MessageExtendedDataChanged
            | EventKind::MessageRemoved => ReportVersion::V1_2,
            _ => ReportVersion::V1_0,
        }
    }

    fn is_memory_event(&self) -> bool {
        matches!(self, EventKind::MemoryFull | EventKind::MemoryAvailable)
    }
}

/// Mask with every event kind enabled.
pub const ALL_EVENTS_MASK: u32 = (1 << 15) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReportVersion {
    V1_0,
    V1_1,
    V1_2,
}

impl ReportVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportVersion::V1_0 => "1.0",
            ReportVersion::V1_1 => "1.1",
            ReportVersion::V1_2 => "1.2",
        }
    }

    /// Version supported by a feature mask.
    pub fn from_features(mask: u32) -> Self {
        if mask & features::EVENT_REPORT_1_2 != 0 {
            ReportVersion::V1_2
        } else if mask & features::EXTENDED_EVENT_REPORT_1_1 != 0 {
            ReportVersion::V1_1
        } else {
            ReportVersion::V1_0
        }
    }
}

/// Fields of one event. Unset fields are left out of the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventInfo {
    pub kind: EventKind,
    pub handle: String,
    pub folder: String,
    pub old_folder: String,
    pub msg_type: Option<MessageType>,
    pub datetime: String,
    pub subject: String,
    pub sender_name: String,
    pub priority: Option<bool>,
    pub conversation_id: String,
    pub conversation_name: String,
    pub presence_availability: Option<u8>,
    pub presence_text: String,
    pub last_activity: String,
    pub chat_state: Option<u8>,
    pub read_status: Option<bool>,
    pub extended_data: String,
    pub participant_uci: String,
    pub contact_uid: String,
}

impl EventInfo {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            handle: String::new(),
            folder: String::new(),
            old_folder: String::new(),
            msg_type: None,
            datetime: String::new(),
            subject: String::new(),
            sender_name: String::new(),
            priority: None,
            conversation_id: String::new(),
            conversation_name: String::new(),
            presence_availability: None,
            presence_text: String::new(),
            last_activity: String::new(),
            chat_state: None,
            read_status: None,
            extended_data: String::new(),
            participant_uci: String::new(),
            contact_uid: String::new(),
        }
    }

    /// Shorthand for a message event.
    pub fn message(kind: EventKind, handle: &str, folder: &str, msg_type: MessageType) -> Self {
        Self {
            handle: handle.to_string(),
            folder: folder.to_string(),
            msg_type: Some(msg_type),
            ..Self::new(kind)
        }
    }
}

/// Attributes a report may carry, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attr {
    Handle,
    Folder,
    OldFolder,
    MsgType,
    Datetime,
    Subject,
    SenderName,
    Priority,
    ConversationName,
    ConversationId,
    PresenceAvailability,
    PresenceText,
    LastActivity,
    ChatState,
    ReadStatus,
    ExtendedData,
    ParticipantUci,
    ContactUid,
}

fn attributes(kind: EventKind, version: ReportVersion) -> Vec<Attr> {
    use Attr::*;
    if kind.is_memory_event() {
        return Vec::new();
    }

    let mut attrs = vec![Handle, Folder];
    if kind == EventKind::MessageShift {
        attrs.push(OldFolder);
    }
    attrs.push(MsgType);

    match kind {
        EventKind::NewMessage => {
            if version >= ReportVersion::V1_1 {
                attrs.extend([Datetime, Subject, SenderName, Priority]);
            }
            if version == ReportVersion::V1_2 {
                attrs.extend([
                    ConversationName,
                    ConversationId,
                    ReadStatus,
                    ParticipantUci,
                    ContactUid,
                ]);
            }
        }
        EventKind::SendingFailure => {
            if version == ReportVersion::V1_2 {
                attrs.push(ConversationId);
            }
        }
        EventKind::ReadStatusChanged => {
            if version == ReportVersion::V1_2 {
                attrs.extend([ConversationName, ConversationId, ReadStatus]);
            }
        }
        EventKind::ConversationChanged => {
            attrs = vec![
                ConversationName,
                ConversationId,
                PresenceAvailability,
                PresenceText,
                LastActivity,
                ChatState,
                ExtendedData,
                ParticipantUci,
                ContactUid,
            ];
        }
        EventKind::ParticipantPresenceChanged | EventKind::ParticipantChatStateChanged => {
            attrs = vec![
                SenderName,
                ConversationName,
                ConversationId,
                PresenceAvailability,
                PresenceText,
                LastActivity,
                ChatState,
                ParticipantUci,
                ContactUid,
            ];
        }
        EventKind::MessageExtendedDataChanged => {
            attrs.extend([
                Datetime,
                SenderName,
                ConversationName,
                ConversationId,
                ExtendedData,
                ParticipantUci,
                ContactUid,
            ]);
        }
        EventKind::MessageRemoved => {
            attrs.extend([ConversationName, ConversationId]);
        }
        _ => {
            if version == ReportVersion::V1_2 {
                attrs.extend([ConversationName, ConversationId]);
            }
        }
    }
    attrs
}

fn yes_no(v: bool) -> &'static str {
    if v {
        "yes"
    } else {
        "no"
    }
}

fn value(info: &EventInfo, attr: Attr) -> Option<(&'static str, String)> {
    let text = |name: &'static str, s: &str| (!s.is_empty()).then(|| (name, s.to_string()));
    match attr {
        Attr::Handle => text("handle", &info.handle),
        Attr::Folder => text("folder", &info.folder),
        Attr::OldFolder => text("old_folder", &info.old_folder),
        Attr::MsgType => info.msg_type.map(|t| ("msg_type", t.as_str().to_string())),
        Attr::Datetime => text("datetime", &info.datetime),
        Attr::Subject => text("subject", &info.subject),
        Attr::SenderName => text("sender_name", &info.sender_name),
        Attr::Priority => info.priority.map(|p| ("priority", yes_no(p).to_string())),
        Attr::ConversationName => text("conversation_name", &info.conversation_name),
        Attr::ConversationId => text("conversation_id", &info.conversation_id),
        Attr::PresenceAvailability => info
            .presence_availability
            .map(|p| ("presence_availability", p.to_string())),
        Attr::PresenceText => text("presence_text", &info.presence_text),
        Attr::LastActivity => text("last_activity", &info.last_activity),
        Attr::ChatState => info.chat_state.map(|c| ("chat_state", c.to_string())),
        Attr::ReadStatus => info.read_status.map(|r| ("read_status", yes_no(r).to_string())),
        Attr::ExtendedData => text("extended_data", &info.extended_data),
        Attr::ParticipantUci => text("participant_uci", &info.participant_uci),
        Attr::ContactUid => text("contact_uid", &info.contact_uid),
    }
}

/// Render an event report, or `None` when the event must not be sent at
/// `version`.
pub fn build_event_xml(info: &EventInfo, version: ReportVersion) -> Option<String> {
    if version < info.kind.min_version() {
        debug!(
            "{} not reportable at event version {}",
            info.kind.as_str(),
            version.as_str()
        );
        return None;
    }

    let values: Vec<(&'static str, String)> = attributes(info.kind, version)
        .into_iter()
        .filter_map(|a| value(info, a))
        .collect();

    match write_report(info.kind, version, &values) {
        Ok(xml) => Some(xml),
        Err(e) => {
            warn!("Failed to build {} report: {}", info.kind.as_str(), e);
            None
        }
    }
}

fn write_report(
    kind: EventKind,
    version: ReportVersion,
    values: &[(&'static str, String)],
) -> Result<String, xml::writer::Error> {
    let mut buf = Vec::new();
    {
        let mut w = EmitterConfig::new()
            .write_document_declaration(false)
            .perform_indent(true)
            .create_writer(&mut buf);
        w.write(XmlEvent::start_element("MAP-event-report").attr("version", version.as_str()))?;
        let mut event = XmlEvent::start_element("event").attr("type", kind.as_str());
        for (name, v) in values {
            event = event.attr(*name, v.as_str());
        }
        w.write(event)?;
        w.write(XmlEvent::end_element())?;
        w.write(XmlEvent::end_element())?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

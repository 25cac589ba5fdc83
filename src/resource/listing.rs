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

//! Listing rows and their XML documents.

use std::io::Write;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent};

use crate::bmsg::{FormatVersion, MessageType};
use crate::store::Cursor;

/// Message-listing ParameterMask bits.
pub mod message_mask {
    pub const SUBJECT: u32 = 1 << 0;
    pub const DATETIME: u32 = 1 << 1;
    pub const SENDER_NAME: u32 = 1 << 2;
    pub const SENDER_ADDRESSING: u32 = 1 << 3;
    pub const RECIPIENT_NAME: u32 = 1 << 4;
    pub const RECIPIENT_ADDRESSING: u32 = 1 << 5;
    pub const TYPE: u32 = 1 << 6;
    pub const SIZE: u32 = 1 << 7;
    pub const RECEPTION_STATUS: u32 = 1 << 8;
    pub const TEXT: u32 = 1 << 9;
    pub const ATTACHMENT_SIZE: u32 = 1 << 10;
    pub const PRIORITY: u32 = 1 << 11;
    pub const READ: u32 = 1 << 12;
    pub const SENT: u32 = 1 << 13;
    pub const PROTECTED: u32 = 1 << 14;
    pub const REPLYTO_ADDRESSING: u32 = 1 << 15;
    pub const DELIVERY_STATUS: u32 = 1 << 16;
    pub const CONVERSATION_ID: u32 = 1 << 17;
    pub const CONVERSATION_NAME: u32 = 1 << 18;
    pub const DIRECTION: u32 = 1 << 19;
    pub const ATTACHMENT_MIME: u32 = 1 << 20;
}

/// Conversation-listing ConvParameterMask bits.
pub mod conversation_mask {
    pub const NAME: u32 = 1 << 0;
    pub const LAST_ACTIVITY: u32 = 1 << 1;
    pub const READ_STATUS: u32 = 1 << 2;
    pub const VERSION_COUNTER: u32 = 1 << 3;
    pub const SUMMARY: u32 = 1 << 4;
    pub const PARTICIPANTS: u32 = 1 << 5;
    pub const PARTICIPANT_UCI: u32 = 1 << 6;
    pub const PARTICIPANT_DISPLAY_NAME: u32 = 1 << 7;
    pub const PARTICIPANT_CHAT_STATE: u32 = 1 << 8;
    pub const PARTICIPANT_LAST_ACTIVITY: u32 = 1 << 9;
    pub const PARTICIPANT_X_BT_UID: u32 = 1 << 10;
    pub const PARTICIPANT_NAME: u32 = 1 << 11;
    pub const PARTICIPANT_PRESENCE_AVAILABILITY: u32 = 1 << 12;
    pub const PARTICIPANT_PRESENCE_TEXT: u32 = 1 << 13;
    pub const PARTICIPANT_PRIORITY: u32 = 1 << 14;
}

/// Whether a field with `bit` is emitted under `mask`.
///
/// Required fields always are; an absent mask, zero, or all-ones selects
/// every field.
pub fn field_wanted(mask: Option<u32>, bit: u32, required: bool) -> bool {
    if required {
        return true;
    }
    match mask {
        None | Some(0) | Some(u32::MAX) => true,
        Some(m) => m & bit != 0,
    }
}

fn yes_no(v: bool) -> String {
    if v { "yes" } else { "no" }.to_string()
}

type Attrs = Vec<(&'static str, String)>;

fn push_attr(attrs: &mut Attrs, name: &'static str, value: String, wanted: bool) {
    if wanted && !value.is_empty() {
        attrs.push((name, value));
    }
}

fn write_element<W: Write>(
    w: &mut EventWriter<W>,
    name: &str,
    attrs: &Attrs,
) -> Result<(), xml::writer::Error> {
    let mut element = XmlEvent::start_element(name);
    for (k, v) in attrs {
        element = element.attr(*k, v.as_str());
    }
    w.write(element)
}

/// One row of `MessageList`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageListingElement {
    pub handle: String,
    pub subject: String,
    pub datetime: String,
    pub sender_name: String,
    pub sender_addressing: String,
    pub replyto_addressing: String,
    pub recipient_name: String,
    pub recipient_addressing: String,
    pub msg_type: Option<MessageType>,
    pub size: i64,
    pub text: bool,
    pub reception_status: String,
    pub attachment_size: i64,
    pub priority: bool,
    pub read: bool,
    pub sent: bool,
    pub protected: bool,
    pub delivery_status: String,
    pub conversation_id: String,
    pub conversation_name: String,
    pub direction: String,
    pub attachment_mime_types: String,
}

impl MessageListingElement {
    /// Read the current row of a cursor over `query::MESSAGE_COLUMNS`.
    pub fn from_cursor(c: &Cursor) -> Self {
        Self {
            handle: c.get_string(0),
            subject: c.get_string(1),
            datetime: c.get_string(2),
            sender_name: c.get_string(3),
            sender_addressing: c.get_string(4),
            replyto_addressing: c.get_string(5),
            recipient_name: c.get_string(6),
            recipient_addressing: c.get_string(7),
            msg_type: MessageType::from_code(c.get_int(8)),
            size: c.get_int64(9),
            text: c.get_int(10) != 0,
            reception_status: c.get_string(11),
            attachment_size: c.get_int64(12),
            priority: c.get_int(13) != 0,
            read: c.get_int(14) != 0,
            sent: c.get_int(15) != 0,
            protected: c.get_int(16) != 0,
            delivery_status: c.get_string(17),
            conversation_id: c.get_string(18),
            conversation_name: c.get_string(19),
            direction: c.get_string(20),
            attachment_mime_types: c.get_string(21),
        }
    }

    fn attributes(&self, version: FormatVersion, mask: Option<u32>, subject_length: Option<u8>) -> Attrs {
        use message_mask::*;
        let on = |bit| field_wanted(mask, bit, false);
        let mut a = Attrs::new();

        push_attr(&mut a, "handle", self.handle.clone(), true);
        let subject = match subject_length {
            Some(n) if n > 0 => self.subject.chars().take(n as usize).collect(),
            _ => self.subject.clone(),
        };
        push_attr(&mut a, "subject", subject, true);
        push_attr(&mut a, "datetime", self.datetime.clone(), true);
        push_attr(&mut a, "sender_name", self.sender_name.clone(), on(SENDER_NAME));
        push_attr(&mut a, "sender_addressing", self.sender_addressing.clone(), on(SENDER_ADDRESSING));
        push_attr(&mut a, "replyto_addressing", self.replyto_addressing.clone(), on(REPLYTO_ADDRESSING));
        push_attr(&mut a, "recipient_name", self.recipient_name.clone(), on(RECIPIENT_NAME));
        push_attr(&mut a, "recipient_addressing", self.recipient_addressing.clone(), true);
        if let Some(t) = self.msg_type {
            push_attr(&mut a, "type", t.as_str().to_string(), true);
        }
        push_attr(&mut a, "size", self.size.to_string(), true);
        push_attr(&mut a, "text", yes_no(self.text), on(TEXT));
        push_attr(&mut a, "reception_status", self.reception_status.clone(), true);
        push_attr(&mut a, "attachment_size", self.attachment_size.to_string(), true);
        push_attr(&mut a, "priority", yes_no(self.priority), on(PRIORITY));
        push_attr(&mut a, "read", yes_no(self.read), on(READ));
        push_attr(&mut a, "sent", yes_no(self.sent), on(SENT));
        push_attr(&mut a, "protected", yes_no(self.protected), on(PROTECTED));

        if version == FormatVersion::V1_1 {
            push_attr(&mut a, "delivery_status", self.delivery_status.clone(), on(DELIVERY_STATUS));
            push_attr(&mut a, "conversation_id", self.conversation_id.clone(), true);
            push_attr(&mut a, "conversation_name", self.conversation_name.clone(), on(CONVERSATION_NAME));
            push_attr(&mut a, "direction", self.direction.clone(), true);
            push_attr(
                &mut a,
                "attachment_mime_types",
                self.attachment_mime_types.clone(),
                on(ATTACHMENT_MIME),
            );
        }
        a
    }
}

/// `MAP-msg-listing` document.
pub fn write_message_listing(
    elements: &[MessageListingElement],
    version: FormatVersion,
    mask: Option<u32>,
    subject_length: Option<u8>,
) -> Result<String, xml::writer::Error> {
    let mut buf = Vec::new();
    {
        let mut w = EmitterConfig::new()
            .write_document_declaration(true)
            .perform_indent(true)
            .create_writer(&mut buf);
        w.write(XmlEvent::start_element("MAP-msg-listing").attr("version", version.as_str()))?;
        for element in elements {
            write_element(&mut w, "msg", &element.attributes(version, mask, subject_length))?;
            w.write(XmlEvent::end_element())?;
        }
        w.write(XmlEvent::end_element())?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// One row of `Participant`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Participant {
    pub uci: String,
    pub display_name: String,
    pub chat_state: String,
    pub last_activity: String,
    pub x_bt_uid: String,
    pub name: String,
    pub presence_availability: String,
    pub presence_text: String,
    pub priority: String,
}

impl Participant {
    pub fn from_cursor(c: &Cursor) -> Self {
        Self {
            uci: c.get_string(0),
            display_name: c.get_string(1),
            chat_state: c.get_string(2),
            last_activity: c.get_string(3),
            x_bt_uid: c.get_string(4),
            name: c.get_string(5),
            presence_availability: c.get_string(6),
            presence_text: c.get_string(7),
            priority: c.get_string(8),
        }
    }

    fn attributes(&self, mask: Option<u32>) -> Attrs {
        use conversation_mask::*;
        let on = |bit| field_wanted(mask, bit, false);
        let mut a = Attrs::new();
        push_attr(&mut a, "uci", self.uci.clone(), true);
        push_attr(&mut a, "display_name", self.display_name.clone(), true);
        push_attr(&mut a, "chat_state", self.chat_state.clone(), true);
        push_attr(&mut a, "last_activity", self.last_activity.clone(), true);
        push_attr(&mut a, "x_bt_uid", self.x_bt_uid.clone(), on(PARTICIPANT_X_BT_UID));
        push_attr(&mut a, "name", self.name.clone(), on(PARTICIPANT_NAME));
        push_attr(
            &mut a,
            "presence_availability",
            self.presence_availability.clone(),
            on(PARTICIPANT_PRESENCE_AVAILABILITY),
        );
        push_attr(
            &mut a,
            "presence_text",
            self.presence_text.clone(),
            on(PARTICIPANT_PRESENCE_TEXT),
        );
        push_attr(&mut a, "priority", self.priority.clone(), on(PARTICIPANT_PRIORITY));
        a
    }
}

/// One row of `Conversation` with its participants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationListingElement {
    pub id: String,
    pub name: String,
    pub last_activity: String,
    pub read: bool,
    pub version_counter: String,
    pub summary: String,
    pub participants: Vec<Participant>,
}

impl ConversationListingElement {
    pub fn from_cursor(c: &Cursor) -> Self {
        Self {
            id: c.get_string(0),
            name: c.get_string(1),
            last_activity: c.get_string(2),
            read: c.get_int(3) != 0,
            version_counter: c.get_string(4),
            summary: c.get_string(5),
            participants: Vec::new(),
        }
    }

    fn attributes(&self, mask: Option<u32>) -> Attrs {
        let mut a = Attrs::new();
        push_attr(&mut a, "id", self.id.clone(), true);
        push_attr(&mut a, "name", self.name.clone(), true);
        push_attr(&mut a, "last_activity", self.last_activity.clone(), true);
        push_attr(&mut a, "read_status", yes_no(self.read), true);
        push_attr(&mut a, "version_counter", self.version_counter.clone(), true);
        push_attr(
            &mut a,
            "summary",
            self.summary.clone(),
            field_wanted(mask, conversation_mask::SUMMARY, false),
        );
        a
    }
}

/// `MAP-convo-listing` document.
pub fn write_conversation_listing(
    conversations: &[ConversationListingElement],
    mask: Option<u32>,
) -> Result<String, xml::writer::Error> {
    let with_participants = field_wanted(mask, conversation_mask::PARTICIPANTS, false);
    let mut buf = Vec::new();
    {
        let mut w = EmitterConfig::new()
            .write_document_declaration(true)
            .perform_indent(true)
            .create_writer(&mut buf);
        w.write(XmlEvent::start_element("MAP-convo-listing").attr("version", "1.0"))?;
        for convo in conversations {
            write_element(&mut w, "conversation", &convo.attributes(mask))?;
            if with_participants {
                for p in &convo.participants {
                    write_element(&mut w, "participant", &p.attributes(mask))?;
                    w.write(XmlEvent::end_element())?;
                }
            }
            w.write(XmlEvent::end_element())?;
        }
        w.write(XmlEvent::end_element())?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

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

//! bMessage codec.
//!
//! A bMessage is a line-oriented document: header properties, originator
//! vCards, then nested `BENV` envelopes holding recipient vCards with the
//! innermost envelope wrapping the `BBODY`.

pub mod vcard;

use thiserror::Error;
use tracing::debug;

use crate::params::message_type_filter;

pub use vcard::{Vcard, VcardVersion};

const MSG_BEGIN: &str = "BEGIN:MSG";
const MSG_END: &str = "END:MSG";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BmsgError {
    #[error("Missing or invalid STATUS")]
    BadStatus,

    #[error("Missing TYPE")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Native charset not allowed for {0}")]
    NativeCharset(&'static str),

    #[error("Malformed bMessage: {0}")]
    Malformed(String),
}

/// Message type as carried in TYPE and stored in the listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Email,
    SmsGsm,
    SmsCdma,
    Mms,
    Im,
}

impl MessageType {
    pub const ALL: [MessageType; 5] = [
        MessageType::Email,
        MessageType::SmsGsm,
        MessageType::SmsCdma,
        MessageType::Mms,
        MessageType::Im,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Email => "EMAIL",
            MessageType::SmsGsm => "SMS_GSM",
            MessageType::SmsCdma => "SMS_CDMA",
            MessageType::Mms => "MMS",
            MessageType::Im => "IM",
        }
    }

    /// Exact, case-sensitive match on the TYPE value.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Integer code used by the store.
    pub fn code(&self) -> i32 {
        match self {
            MessageType::Email => 1,
            MessageType::SmsGsm => 2,
            MessageType::SmsCdma => 3,
            MessageType::Mms => 4,
            MessageType::Im => 5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// FilterMessageType bit that excludes this type.
    pub fn filter_bit(&self) -> u8 {
        match self {
            MessageType::SmsGsm => message_type_filter::SMS_GSM,
            MessageType::SmsCdma => message_type_filter::SMS_CDMA,
            MessageType::Email => message_type_filter::EMAIL,
            MessageType::Mms => message_type_filter::MMS,
            MessageType::Im => message_type_filter::IM,
        }
    }

    pub fn is_sms(&self) -> bool {
        matches!(self, MessageType::SmsGsm | MessageType::SmsCdma)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadStatus {
    Read,
    #[default]
    Unread,
}

impl ReadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadStatus::Read => "READ",
            ReadStatus::Unread => "UNREAD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "READ" => Some(ReadStatus::Read),
            "UNREAD" => Some(ReadStatus::Unread),
            _ => None,
        }
    }
}

/// Charset application parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Charset {
    Native,
    #[default]
    Utf8,
}

impl Charset {
    pub fn from_u8(v: u8) -> Self {
        if v == 0 {
            Charset::Native
        } else {
            Charset::Utf8
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Charset::Native => 0,
            Charset::Utf8 => 1,
        }
    }
}

/// Negotiated message / listing format version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum FormatVersion {
    #[default]
    V1_0,
    V1_1,
}

impl FormatVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatVersion::V1_0 => "1.0",
            FormatVersion::V1_1 => "1.1",
        }
    }
}

/// The BBODY section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyPart {
    pub part_id: Option<String>,
    pub encoding: Option<String>,
    pub charset: Option<String>,
    pub language: Option<String>,
    /// Declared LENGTH; derived from the text when absent.
    pub length: Option<usize>,
    pub text: String,
}

impl BodyPart {
    pub fn new(text: &str) -> Self {
        Self {
            charset: Some("UTF-8".to_string()),
            text: text.to_string(),
            ..Self::default()
        }
    }

    /// LENGTH value: the text plus its BEGIN:MSG/END:MSG framing.
    pub fn derived_length(&self) -> usize {
        MSG_BEGIN.len() + 2 + self.text.len() + 2 + MSG_END.len() + 2
    }
}

/// One message transfer unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BMessage {
    pub version: String,
    pub status: ReadStatus,
    pub msg_type: MessageType,
    pub folder: String,
    pub extended_data: Option<String>,
    pub originators: Vec<Vcard>,
    pub recipients: Vec<Vcard>,
    pub body: BodyPart,
}

impl BMessage {
    pub fn new(msg_type: MessageType, folder: &str, text: &str) -> Self {
        Self {
            version: "1.0".to_string(),
            status: ReadStatus::Unread,
            msg_type,
            folder: folder.to_string(),
            extended_data: None,
            originators: Vec::new(),
            recipients: Vec::new(),
            body: BodyPart::new(text),
        }
    }

    /// Recipients sitting in the outermost envelope.
    pub fn primary_recipients(&self) -> impl Iterator<Item = &Vcard> {
        self.recipients.iter().filter(|r| r.env_level == 0)
    }

    /// Parse an inbound bMessage.
    ///
    /// `charset` is the request's Charset parameter; `format` selects whether
    /// vCard Bluetooth ids are read.
    pub fn parse(input: &str, charset: Charset, format: FormatVersion) -> Result<Self, BmsgError> {
        let sep = if input.contains("\r\n") { "\r\n" } else { "\n" };
        let mut reader = LineReader {
            lines: input.split(sep).collect(),
            pos: 0,
            sep,
        };

        loop {
            match reader.next_line() {
                Some(l) if l.trim().is_empty() => continue,
                Some(l) if l.trim_end() == "BEGIN:BMSG" => break,
                _ => return Err(BmsgError::Malformed("missing BEGIN:BMSG".into())),
            }
        }

        let mut version = "1.0".to_string();
        let mut status = None;
        let mut type_str = None;
        let mut folder = String::new();
        let mut extended_data = None;

        while let Some(line) = reader.peek() {
            let line = line.trim_end();
            if line == "BEGIN:VCARD" || line == "BEGIN:BENV" {
                break;
            }
            if line == "END:BMSG" {
                return Err(BmsgError::Malformed("no envelope".into()));
            }
            reader.advance();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key {
                "VERSION" => version = value.to_string(),
                "STATUS" => status = Some(ReadStatus::parse(value).ok_or(BmsgError::BadStatus)?),
                "TYPE" => type_str = Some(value.to_string()),
                "FOLDER" => folder = value.to_string(),
                "EXTENDEDDATA" => extended_data = Some(value.to_string()),
                other => debug!("Ignoring bMessage property {}", other),
            }
        }

        let status = status.ok_or(BmsgError::BadStatus)?;
        let type_str = type_str.ok_or(BmsgError::MissingType)?;
        let msg_type =
            MessageType::parse(&type_str).ok_or_else(|| BmsgError::UnknownType(type_str.clone()))?;
        if charset == Charset::Native && !msg_type.is_sms() {
            return Err(BmsgError::NativeCharset(msg_type.as_str()));
        }

        let mut originators = Vec::new();
        while reader.peek().map(str::trim_end) == Some("BEGIN:VCARD") {
            reader.advance();
            originators.push(reader.read_vcard(0, format)?);
        }

        match reader.next_line().map(str::trim_end) {
            Some("BEGIN:BENV") => {}
            _ => return Err(BmsgError::Malformed("missing BEGIN:BENV".into())),
        }
        let mut recipients = Vec::new();
        let mut body = None;
        reader.read_envelope(0, format, &mut recipients, &mut body)?;
        let body = body.ok_or_else(|| BmsgError::Malformed("missing BBODY".into()))?;

        loop {
            match reader.next_line().map(str::trim_end) {
                Some("") => continue,
                Some("END:BMSG") => break,
                _ => return Err(BmsgError::Malformed("missing END:BMSG".into())),
            }
        }

        Ok(Self {
            version,
            status,
            msg_type,
            folder,
            extended_data,
            originators,
            recipients,
            body,
        })
    }

    /// Serialize with CRLF line endings.
    pub fn to_bmessage_string(&self, format: FormatVersion) -> String {
        let mut out = String::new();
        let push = |out: &mut String, s: &str| {
            out.push_str(s);
            out.push_str("\r\n");
        };

        push(&mut out, "BEGIN:BMSG");
        push(&mut out, &format!("VERSION:{}", self.version));
        push(&mut out, &format!("STATUS:{}", self.status.as_str()));
        push(&mut out, &format!("TYPE:{}", self.msg_type.as_str()));
        push(&mut out, &format!("FOLDER:{}", self.folder));
        if let Some(data) = &self.extended_data {
            push(&mut out, &format!("EXTENDEDDATA:{}", data));
        }
        for card in &self.originators {
            card.write(&mut out, format);
        }

        let depth = self.recipients.iter().map(|r| r.env_level).max().unwrap_or(0);
        for level in 0..=depth {
            push(&mut out, "BEGIN:BENV");
            for card in self.recipients.iter().filter(|r| r.env_level == level) {
                card.write(&mut out, format);
            }
        }

        let body = &self.body;
        push(&mut out, "BEGIN:BBODY");
        if let Some(v) = &body.part_id {
            push(&mut out, &format!("PARTID:{}", v));
        }
        if let Some(v) = &body.encoding {
            push(&mut out, &format!("ENCODING:{}", v));
        }
        if let Some(v) = &body.charset {
            push(&mut out, &format!("CHARSET:{}", v));
        }
        if let Some(v) = &body.language {
            push(&mut out, &format!("LANGUAGE:{}", v));
        }
        let length = body.length.unwrap_or_else(|| body.derived_length());
        push(&mut out, &format!("LENGTH:{}", length));
        push(&mut out, MSG_BEGIN);
        push(&mut out, &body.text);
        push(&mut out, MSG_END);
        push(&mut out, "END:BBODY");

        for _ in 0..=depth {
            push(&mut out, "END:BENV");
        }
        push(&mut out, "END:BMSG");
        out
    }
}

struct LineReader<'a> {
    lines: Vec<&'a str>,
    pos: usize,
    sep: &'static str,
}

impl<'a> LineReader<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn next_line(&mut self) -> Option<&'a str> {
        let line = self.peek();
        if line.is_some() {
            self.advance();
        }
        line
    }

    fn read_vcard(&mut self, level: usize, format: FormatVersion) -> Result<Vcard, BmsgError> {
        let mut card = Vcard {
            env_level: level,
            ..Vcard::default()
        };
        loop {
            let line = self
                .next_line()
                .ok_or_else(|| BmsgError::Malformed("unterminated VCARD".into()))?
                .trim_end();
            if line == "END:VCARD" {
                return Ok(card);
            }
            card.apply_line(line, format);
        }
    }

    fn read_envelope(
        &mut self,
        level: usize,
        format: FormatVersion,
        recipients: &mut Vec<Vcard>,
        body: &mut Option<BodyPart>,
    ) -> Result<(), BmsgError> {
        loop {
            let line = self
                .next_line()
                .ok_or_else(|| BmsgError::Malformed("unterminated BENV".into()))?
                .trim_end();
            match line {
                "BEGIN:VCARD" => recipients.push(self.read_vcard(level, format)?),
                "BEGIN:BENV" => self.read_envelope(level + 1, format, recipients, body)?,
                "BEGIN:BBODY" => *body = Some(self.read_body()?),
                "END:BENV" => return Ok(()),
                "" => {}
                other => debug!("Ignoring envelope line {}", other),
            }
        }
    }

    fn read_body(&mut self) -> Result<BodyPart, BmsgError> {
        let mut body = BodyPart::default();
        let mut text: Option<Vec<&str>> = None;
        loop {
            let line = self
                .next_line()
                .ok_or_else(|| BmsgError::Malformed("unterminated BBODY".into()))?;
            let control = line.trim_end();
            if control == MSG_BEGIN {
                let chunk = text.get_or_insert_with(Vec::new);
                loop {
                    let msg_line = self
                        .next_line()
                        .ok_or_else(|| BmsgError::Malformed("unterminated MSG".into()))?;
                    if msg_line.trim_end() == MSG_END {
                        break;
                    }
                    chunk.push(msg_line);
                }
                continue;
            }
            if control == "END:BBODY" {
                body.text = text.map(|t| t.join(self.sep)).unwrap_or_default();
                return Ok(body);
            }
            let Some((key, value)) = control.split_once(':') else {
                continue;
            };
            match key {
                "PARTID" => body.part_id = Some(value.to_string()),
                "ENCODING" => body.encoding = Some(value.to_string()),
                "CHARSET" => body.charset = Some(value.to_string()),
                "LANGUAGE" => body.language = Some(value.to_string()),
                "LENGTH" => body.length = value.trim().parse().ok(),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "BEGIN:BMSG\r\n\
VERSION:1.0\r\n\
STATUS:UNREAD\r\n\
TYPE:SMS_GSM\r\n\
FOLDER:TELECOM/MSG/OUTBOX\r\n\
BEGIN:VCARD\r\n\
VERSION:2.1\r\n\
N:Me\r\n\
TEL:+15550000\r\n\
END:VCARD\r\n\
BEGIN:BENV\r\n\
BEGIN:VCARD\r\n\
VERSION:2.1\r\n\
N:Alice\r\n\
TEL:+15550100\r\n\
END:VCARD\r\n\
BEGIN:BENV\r\n\
BEGIN:VCARD\r\n\
VERSION:3.0\r\n\
N:Bob\r\n\
FN:Bob B\r\n\
EMAIL:bob@example.com\r\n\
END:VCARD\r\n\
BEGIN:BBODY\r\n\
CHARSET:UTF-8\r\n\
LENGTH:36\r\n\
BEGIN:MSG\r\n\
Hello there\r\n\
/END:MSG\r\n\
END:MSG\r\n\
END:BBODY\r\n\
END:BENV\r\n\
END:BENV\r\n\
END:BMSG\r\n";

    #[test]
    fn test_parse_sample() {
        let msg = BMessage::parse(SAMPLE, Charset::Utf8, FormatVersion::V1_0).unwrap();
        assert_eq!(msg.status, ReadStatus::Unread);
        assert_eq!(msg.msg_type, MessageType::SmsGsm);
        assert_eq!(msg.folder, "TELECOM/MSG/OUTBOX");
        assert_eq!(msg.originators.len(), 1);
        assert_eq!(msg.originators[0].name, "Me");
        assert_eq!(msg.recipients.len(), 2);
        assert_eq!(msg.recipients[0].name, "Alice");
        assert_eq!(msg.recipients[0].env_level, 0);
        assert_eq!(msg.recipients[1].env_level, 1);
        assert_eq!(msg.recipients[1].version, VcardVersion::V3_0);
        assert_eq!(msg.recipients[1].emails, vec!["bob@example.com"]);
        assert_eq!(msg.body.text, "Hello there\r\n/END:MSG");
        assert_eq!(msg.body.length, Some(36));
        assert_eq!(msg.primary_recipients().count(), 1);
    }

    #[test]
    fn test_lf_only_input() {
        let lf = SAMPLE.replace("\r\n", "\n");
        let msg = BMessage::parse(&lf, Charset::Utf8, FormatVersion::V1_0).unwrap();
        assert_eq!(msg.body.text, "Hello there\n/END:MSG");
    }

    #[test]
    fn test_missing_status() {
        let input = SAMPLE.replace("STATUS:UNREAD\r\n", "");
        assert_eq!(
            BMessage::parse(&input, Charset::Utf8, FormatVersion::V1_0),
            Err(BmsgError::BadStatus)
        );
    }

    #[test]
    fn test_unknown_type() {
        let input = SAMPLE.replace("TYPE:SMS_GSM", "TYPE:sms_gsm");
        assert_eq!(
            BMessage::parse(&input, Charset::Utf8, FormatVersion::V1_0),
            Err(BmsgError::UnknownType("sms_gsm".into()))
        );
    }

    #[test]
    fn test_native_charset_only_for_sms() {
        assert!(BMessage::parse(SAMPLE, Charset::Native, FormatVersion::V1_0).is_ok());
        let email = SAMPLE.replace("TYPE:SMS_GSM", "TYPE:EMAIL");
        assert_eq!(
            BMessage::parse(&email, Charset::Native, FormatVersion::V1_0),
            Err(BmsgError::NativeCharset("EMAIL"))
        );
    }

    #[test]
    fn test_missing_body() {
        let input = "BEGIN:BMSG\r\nSTATUS:READ\r\nTYPE:MMS\r\nBEGIN:BENV\r\nEND:BENV\r\nEND:BMSG\r\n";
        assert!(matches!(
            BMessage::parse(input, Charset::Utf8, FormatVersion::V1_0),
            Err(BmsgError::Malformed(_))
        ));
    }

    #[test]
    fn test_round_trip() {
        let mut msg = BMessage::new(MessageType::Email, "telecom/msg/inbox", "Line one\r\nLine two");
        msg.status = ReadStatus::Read;
        msg.extended_data = Some("0:3;".into());
        msg.originators.push(Vcard::with_email("Sender", "s@example.com"));
        msg.recipients.push(Vcard::with_email("To", "to@example.com"));
        let mut cc = Vcard::with_email("Cc", "cc@example.com").at_level(1);
        cc.version = VcardVersion::V3_0;
        cc.formatted_name = "C C".into();
        cc.bt_ucis.push("im:cc".into());
        msg.recipients.push(cc);
        msg.recipients.push(Vcard::with_phone("Bcc", "+1555").at_level(2));

        let text = msg.to_bmessage_string(FormatVersion::V1_1);
        let parsed = BMessage::parse(&text, Charset::Utf8, FormatVersion::V1_1).unwrap();

        assert_eq!(parsed.status, msg.status);
        assert_eq!(parsed.msg_type, msg.msg_type);
        assert_eq!(parsed.folder, msg.folder);
        assert_eq!(parsed.extended_data, msg.extended_data);
        assert_eq!(parsed.originators, msg.originators);
        assert_eq!(parsed.recipients, msg.recipients);
        assert_eq!(parsed.body.text, msg.body.text);
        assert_eq!(parsed.body.length, Some(msg.body.derived_length()));
    }

    #[test]
    fn test_derived_length() {
        let body = BodyPart::new("abc");
        assert_eq!(body.derived_length(), 3 + 22);
    }

    #[test]
    fn test_type_codes() {
        for t in MessageType::ALL {
            assert_eq!(MessageType::from_code(t.code()), Some(t));
            assert_eq!(MessageType::parse(t.as_str()), Some(t));
        }
        assert_eq!(MessageType::SmsCdma.filter_bit(), 0x02);
    }
}

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

//! Store writes for pushed messages and status changes, and the message
//! read-back used by GET.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::bmsg::vcard::{Vcard, VcardVersion};
use crate::bmsg::{BMessage, BmsgError, Charset, MessageType, ReadStatus};
use crate::error::{MapError, MapResult};
use crate::obex::constants::folders;
use crate::store::{execute, execute_one, query, StoreConnection, StoreError, Value};

const SEED_MASK: u64 = (1 << 56) - 1;

/// Top byte of a message handle.
fn type_marker(msg_type: MessageType) -> u64 {
    match msg_type {
        MessageType::SmsGsm => 0x01,
        MessageType::SmsCdma => 0x02,
        MessageType::Mms => 0x04,
        MessageType::Email => 0x08,
        MessageType::Im => 0x10,
    }
}

/// Listing timestamp, `YYYYMMDDTHHMMSS`.
pub fn listing_datetime(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%S").to_string()
}

/// Mints message handles for pushed messages.
///
/// The low 56 bits are the UTC time written as `YYYYMMDDhhmmss` and read as
/// hex, bumped past the previous handle so two pushes within the same second
/// never collide.
#[derive(Debug, Default)]
pub struct HandleGenerator {
    last: u64,
}

impl HandleGenerator {
    pub fn next(&mut self, msg_type: MessageType, now: DateTime<Utc>) -> String {
        let stamp = u64::from_str_radix(&now.format("%Y%m%d%H%M%S").to_string(), 16)
            .unwrap_or(0)
            & SEED_MASK;
        let seed = stamp.max(self.last + 1) & SEED_MASK;
        self.last = seed;
        format!("{:016X}", (type_marker(msg_type) << 56) | seed)
    }
}

/// A pushed message about to be stored.
#[derive(Debug)]
pub struct NewMessage<'a> {
    pub handle: &'a str,
    pub message: &'a BMessage,
    /// Leaf folder name, `outbox` or `draft`.
    pub folder: &'a str,
    pub charset: Charset,
    pub transparent: bool,
    pub retry: bool,
    pub conversation_id: Option<&'a str>,
    pub datetime: &'a str,
}

fn name_and_address(msg_type: MessageType, cards: &[Vcard]) -> (String, String) {
    let Some(card) = cards.first() else {
        return (String::new(), String::new());
    };
    let address = if msg_type == MessageType::Email {
        card.emails.first()
    } else {
        card.phone_numbers.first()
    };
    (card.name.clone(), address.cloned().unwrap_or_default())
}

fn missing(handle: &str) -> impl Fn(StoreError) -> MapError + '_ {
    move |e| match e {
        StoreError::Unchanged(_) => MapError::NotFound(format!("message {}", handle)),
        other => MapError::Store(other),
    }
}

/// Insert message, listing row, vCards and conversation linkage.
///
/// Callers run this inside a transaction; any error leaves nothing behind.
pub fn insert_message(conn: &dyn StoreConnection, new: &NewMessage<'_>) -> MapResult<()> {
    let msg = new.message;
    let folder_path = if msg.folder.is_empty() {
        format!("{}/{}/{}", folders::TELECOM, folders::MSG, new.folder)
    } else {
        msg.folder.clone()
    };
    let length = msg.body.length.unwrap_or_else(|| msg.body.derived_length());

    execute(
        conn,
        "insert into Message (transparent, retry, char_set, handle, body, version, status, type, \
         folder_path, extended_data, part_id, encoding, content_charset, language, content_length, \
         conversation_id) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        &[
            new.transparent.into(),
            new.retry.into(),
            i64::from(new.charset.as_u8()).into(),
            new.handle.into(),
            msg.body.text.as_str().into(),
            msg.version.as_str().into(),
            msg.status.as_str().into(),
            msg.msg_type.code().into(),
            folder_path.into(),
            msg.extended_data.clone().into(),
            msg.body.part_id.clone().into(),
            msg.body.encoding.clone().into(),
            msg.body.charset.clone().into(),
            msg.body.language.clone().into(),
            Value::Int(length as i64),
            new.conversation_id.into(),
        ],
    )?;

    let (sender_name, sender_addressing) = name_and_address(msg.msg_type, &msg.originators);
    let (recipient_name, recipient_addressing) = name_and_address(msg.msg_type, &msg.recipients);
    execute(
        conn,
        "insert into MessageList (handle, subject, datetime, sender_name, sender_addressing, \
         recipient_name, recipient_addressing, type, size, text, reception_status, attachment_size, \
         priority, read, sent, protected, folder, delivery_status, conversation_id, direction) \
         values (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 'complete', 0, 0, ?, ?, 0, ?, 'sent', ?, 'outgoing')",
        &[
            new.handle.into(),
            "".into(),
            new.datetime.into(),
            sender_name.into(),
            sender_addressing.into(),
            recipient_name.into(),
            recipient_addressing.into(),
            msg.msg_type.code().into(),
            Value::Int(msg.body.text.len() as i64),
            (msg.status == ReadStatus::Read).into(),
            (new.folder == folders::OUTBOX).into(),
            new.folder.into(),
            new.conversation_id.unwrap_or("").into(),
        ],
    )?;

    for (is_originator, cards) in [(true, &msg.originators), (false, &msg.recipients)] {
        for card in cards {
            insert_vcard(conn, new.handle, card, is_originator)?;
        }
    }

    if let Some(convo) = new.conversation_id {
        execute_one(
            conn,
            "update Conversation set last_activity = ?, summary = ? where convo_id = ?",
            &[
                new.datetime.into(),
                msg.body.text.as_str().into(),
                convo.into(),
            ],
        )
        .map_err(|e| match e {
            StoreError::Unchanged(_) => MapError::NotFound(format!("conversation {}", convo)),
            other => MapError::Store(other),
        })?;
    }
    debug!("Stored {} in {}", new.handle, new.folder);
    Ok(())
}

fn insert_vcard(
    conn: &dyn StoreConnection,
    handle: &str,
    card: &Vcard,
    is_originator: bool,
) -> MapResult<()> {
    execute(
        conn,
        "insert into Vcard (handle, is_originator, version, name, formatted_name, phone_numbers, \
         email_addresses, x_bt_uid, x_bt_ucis, env_level) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        &[
            handle.into(),
            is_originator.into(),
            card.version.as_str().into(),
            card.name.as_str().into(),
            card.formatted_name.as_str().into(),
            card.phone_numbers.join(";").into(),
            card.emails.join(";").into(),
            card.bt_uids.join(";").into(),
            card.bt_ucis.join(";").into(),
            Value::Int(card.env_level as i64),
        ],
    )?;
    Ok(())
}

fn split_list(s: &str) -> Vec<String> {
    s.split(';')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Body text of a stored message.
pub fn message_text(conn: &dyn StoreConnection, handle: &str) -> MapResult<String> {
    let mut c = query(conn, "select body from Message where handle = ?", &[handle.into()])?;
    if !c.next_row() {
        return Err(MapError::NotFound(format!("message {}", handle)));
    }
    Ok(c.get_string(0))
}

/// Rebuild a stored message with its originators and recipients.
pub fn load_message(conn: &dyn StoreConnection, handle: &str) -> MapResult<BMessage> {
    let mut c = query(
        conn,
        "select body, version, status, type, folder_path, extended_data, part_id, encoding, \
         content_charset, language, content_length from Message where handle = ?",
        &[handle.into()],
    )?;
    if !c.next_row() {
        return Err(MapError::NotFound(format!("message {}", handle)));
    }
    let code = c.get_int(3);
    let msg_type = MessageType::from_code(code)
        .ok_or_else(|| BmsgError::UnknownType(code.to_string()))?;
    let optional = |i: usize| c.is_not_null(i).then(|| c.get_string(i));

    let mut msg = BMessage::new(msg_type, &c.get_string(4), &c.get_string(0));
    let version = c.get_string(1);
    if !version.is_empty() {
        msg.version = version;
    }
    msg.status = ReadStatus::parse(&c.get_string(2)).unwrap_or_default();
    msg.extended_data = optional(5).filter(|s| !s.is_empty());
    msg.body.part_id = optional(6);
    msg.body.encoding = optional(7);
    if let Some(charset) = optional(8) {
        msg.body.charset = Some(charset);
    }
    msg.body.language = optional(9);
    msg.body.length = c.is_not_null(10).then(|| c.get_int64(10) as usize);

    let mut cards = query(
        conn,
        "select is_originator, version, name, formatted_name, phone_numbers, email_addresses, \
         x_bt_uid, x_bt_ucis, env_level from Vcard where handle = ? order by id",
        &[handle.into()],
    )?;
    while cards.next_row() {
        let card = Vcard {
            version: VcardVersion::parse(&cards.get_string(1)),
            name: cards.get_string(2),
            formatted_name: cards.get_string(3),
            phone_numbers: split_list(&cards.get_string(4)),
            emails: split_list(&cards.get_string(5)),
            bt_uids: split_list(&cards.get_string(6)),
            bt_ucis: split_list(&cards.get_string(7)),
            env_level: cards.get_int64(8).max(0) as usize,
        };
        if cards.get_int(0) != 0 {
            msg.originators.push(card);
        } else {
            msg.recipients.push(card);
        }
    }
    Ok(msg)
}

/// Set the read flag on the listing row and the message STATUS.
pub fn set_read_status(conn: &dyn StoreConnection, handle: &str, read: bool) -> MapResult<()> {
    execute_one(
        conn,
        "update MessageList set read = ? where handle = ?",
        &[read.into(), handle.into()],
    )
    .map_err(missing(handle))?;
    let status = if read { ReadStatus::Read } else { ReadStatus::Unread };
    execute(
        conn,
        "update Message set status = ? where handle = ?",
        &[status.as_str().into(), handle.into()],
    )?;
    Ok(())
}

/// Move a message into `deleted`, or back to `inbox` when undeleting.
pub fn set_deleted(conn: &dyn StoreConnection, handle: &str, deleted: bool) -> MapResult<()> {
    let target = if deleted { folders::DELETED } else { folders::INBOX };
    let moved = if deleted {
        execute_one(
            conn,
            "update MessageList set folder = ? where handle = ?",
            &[target.into(), handle.into()],
        )
    } else {
        execute_one(
            conn,
            "update MessageList set folder = ? where handle = ? and folder = ?",
            &[target.into(), handle.into(), folders::DELETED.into()],
        )
    };
    moved.map_err(missing(handle))?;
    execute(
        conn,
        "update Message set folder_path = ? where handle = ?",
        &[
            format!("{}/{}/{}", folders::TELECOM, folders::MSG, target).into(),
            handle.into(),
        ],
    )?;
    Ok(())
}

pub fn set_extended_data(conn: &dyn StoreConnection, handle: &str, data: &str) -> MapResult<()> {
    execute_one(
        conn,
        "update Message set extended_data = ? where handle = ?",
        &[data.into(), handle.into()],
    )
    .map_err(missing(handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{transaction, DataStore, SqliteStore};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    fn sms() -> BMessage {
        let mut msg = BMessage::new(MessageType::SmsGsm, "", "Running late");
        msg.originators.push(Vcard::with_phone("Me", "+15550000"));
        msg.recipients.push(Vcard::with_phone("Alice", "+15550100"));
        msg.recipients.push(Vcard::with_phone("Bob", "+15550200").at_level(1));
        msg
    }

    fn new_message<'a>(handle: &'a str, msg: &'a BMessage) -> NewMessage<'a> {
        NewMessage {
            handle,
            message: msg,
            folder: folders::OUTBOX,
            charset: Charset::Utf8,
            transparent: false,
            retry: true,
            conversation_id: None,
            datetime: "20240102T030405",
        }
    }

    #[test]
    fn test_handles_increase_within_a_second() {
        let mut handles = HandleGenerator::default();
        let a = handles.next(MessageType::SmsGsm, now());
        let b = handles.next(MessageType::SmsGsm, now());
        assert_eq!(a, "0120240102030405");
        assert_eq!(b, "0120240102030406");
        assert_eq!(handles.next(MessageType::Email, now()).len(), 16);
        assert!(handles.next(MessageType::Im, now()).starts_with("10"));
    }

    #[test]
    fn test_listing_datetime() {
        assert_eq!(listing_datetime(now()), "20240102T030405");
    }

    #[test]
    fn test_insert_and_load_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.connect().unwrap();
        let msg = sms();
        let new = new_message("0120240102030405", &msg);
        transaction(conn.as_ref(), |c| insert_message(c, &new)).unwrap();

        let loaded = load_message(conn.as_ref(), "0120240102030405").unwrap();
        assert_eq!(loaded.msg_type, MessageType::SmsGsm);
        assert_eq!(loaded.folder, "telecom/msg/outbox");
        assert_eq!(loaded.body.text, "Running late");
        assert_eq!(loaded.originators.len(), 1);
        assert_eq!(loaded.recipients.len(), 2);
        assert_eq!(loaded.recipients[1].env_level, 1);
        assert_eq!(loaded.recipients[0].phone_numbers, vec!["+15550100".to_string()]);

        let mut c = query(
            conn.as_ref(),
            "select folder, sent, recipient_addressing, direction from MessageList",
            &[],
        )
        .unwrap();
        assert!(c.next_row());
        assert_eq!(c.get_string(0), "outbox");
        assert_eq!(c.get_int(1), 1);
        assert_eq!(c.get_string(2), "+15550100");
        assert_eq!(c.get_string(3), "outgoing");
    }

    #[test]
    fn test_unknown_conversation_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.connect().unwrap();
        let msg = sms();
        let mut new = new_message("0120240102030405", &msg);
        new.conversation_id = Some("nope");

        let result = transaction(conn.as_ref(), |c| insert_message(c, &new));
        assert!(matches!(result, Err(MapError::NotFound(_))));

        let mut c = query(conn.as_ref(), "select count(*) from Message", &[]).unwrap();
        assert!(c.next_row());
        assert_eq!(c.get_int(0), 0);
    }

    #[test]
    fn test_status_updates() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.connect().unwrap();
        let msg = sms();
        let new = new_message("H1", &msg);
        transaction(conn.as_ref(), |c| insert_message(c, &new)).unwrap();

        set_read_status(conn.as_ref(), "H1", true).unwrap();
        assert_eq!(load_message(conn.as_ref(), "H1").unwrap().status, ReadStatus::Read);

        set_deleted(conn.as_ref(), "H1", true).unwrap();
        assert_eq!(load_message(conn.as_ref(), "H1").unwrap().folder, "telecom/msg/deleted");
        set_deleted(conn.as_ref(), "H1", false).unwrap();
        assert_eq!(load_message(conn.as_ref(), "H1").unwrap().folder, "telecom/msg/inbox");
        // Only deleted messages can be undeleted.
        assert!(matches!(
            set_deleted(conn.as_ref(), "H1", false),
            Err(MapError::NotFound(_))
        ));

        set_extended_data(conn.as_ref(), "H1", "0:12;").unwrap();
        assert_eq!(
            load_message(conn.as_ref(), "H1").unwrap().extended_data.as_deref(),
            Some("0:12;")
        );
        assert!(matches!(
            set_read_status(conn.as_ref(), "missing", true),
            Err(MapError::NotFound(_))
        ));
    }

    #[test]
    fn test_message_text_missing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.connect().unwrap();
        assert!(matches!(
            message_text(conn.as_ref(), "nope"),
            Err(MapError::NotFound(_))
        ));
    }
}

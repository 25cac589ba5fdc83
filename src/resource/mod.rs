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

//! Listing and resource engine.
//!
//! Turns decoded request parameters into store queries and protocol XML,
//! applies message mutations inside store transactions, keeps the per-peer
//! notification filters and decides which events reach which peer.

pub mod listing;
pub mod mutation;
pub mod query;

use chrono::{Local, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bmsg::{BMessage, Charset, FormatVersion};
use crate::error::{MapError, MapResult};
use crate::event::{build_event_xml, EventInfo, EventKind, ReportVersion, ALL_EVENTS_MASK};
use crate::folder::{Folder, FolderTree};
use crate::obex::constants::{features, folders, DEFAULT_MAX_LIST_COUNT};
use crate::params::{ApplicationParameters, ParamEncoder, ParamTag};
use crate::service::{MessageService, OutgoingMessage};
use crate::store::{self, transaction, Cursor, DataStore, StoreConnection, Value};

pub use listing::{ConversationListingElement, MessageListingElement, Participant};
pub use mutation::HandleGenerator;
pub use query::Wildcard;

/// Message and listing format versions negotiated for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatVersions {
    pub message: FormatVersion,
    pub listing: FormatVersion,
}

impl FormatVersions {
    pub fn from_features(mask: u32) -> Self {
        let pick = |bit: u32| {
            if mask & bit != 0 {
                FormatVersion::V1_1
            } else {
                FormatVersion::V1_0
            }
        };
        Self {
            message: pick(features::MESSAGE_FORMAT_1_1),
            listing: pick(features::MESSAGE_LISTING_FORMAT_1_1),
        }
    }
}

/// Body and application parameters of a listing response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// `None` when MaxListCount was zero.
    pub body: Option<Vec<u8>>,
    pub app_params: Vec<u8>,
}

/// Result of storing a pushed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedMessage {
    pub handle: String,
    /// Set when the account service refused an outbox message; the event
    /// is reported to registered peers.
    pub send_failure: Option<EventInfo>,
}

/// 128-bit identifiers reported to clients that track store changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCounters {
    database_identifier: u128,
    folder_version: u128,
    conversation_version: u128,
}

impl VersionCounters {
    fn new() -> Self {
        Self {
            database_identifier: uuid::Uuid::new_v4().as_u128(),
            folder_version: 0,
            conversation_version: 0,
        }
    }

    fn render(value: u128) -> String {
        hex::encode_upper(value.to_be_bytes())
    }

    pub fn database_identifier(&self) -> String {
        Self::render(self.database_identifier)
    }

    pub fn folder_version(&self) -> String {
        Self::render(self.folder_version)
    }

    pub fn conversation_version(&self) -> String {
        Self::render(self.conversation_version)
    }
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.is_empty())
}

fn open(store: &dyn DataStore) -> MapResult<Box<dyn StoreConnection + '_>> {
    store.connect().map_err(|e| {
        warn!("Message store unavailable: {}", e);
        MapError::ServiceUnavailable(e.to_string())
    })
}

fn run(conn: &dyn StoreConnection, q: &query::SqlQuery) -> MapResult<Cursor> {
    Ok(store::query(conn, &q.sql, &q.binds)?)
}

fn mse_time() -> String {
    Local::now().format("%Y%m%dT%H%M%S%z").to_string()
}

fn ensure_conversation(conn: &dyn StoreConnection, convo_id: &str) -> MapResult<()> {
    let mut c = store::query(
        conn,
        "select count(*) from Conversation where convo_id = ?",
        &[convo_id.into()],
    )?;
    if c.next_row() && c.get_int64(0) > 0 {
        Ok(())
    } else {
        Err(MapError::NotFound(format!("conversation {}", convo_id)))
    }
}

/// Engine for one MAS instance.
pub struct ResourceEngine {
    mas_id: u8,
    store: Arc<dyn DataStore>,
    service: Arc<dyn MessageService>,
    /// Peer address to NotificationFilterMask. No entry means all events.
    notification_filters: HashMap<String, u32>,
    counters: VersionCounters,
    handles: HandleGenerator,
}

impl ResourceEngine {
    pub fn new(mas_id: u8, store: Arc<dyn DataStore>, service: Arc<dyn MessageService>) -> Self {
        Self {
            mas_id,
            store,
            service,
            notification_filters: HashMap::new(),
            counters: VersionCounters::new(),
            handles: HandleGenerator::default(),
        }
    }

    pub fn mas_id(&self) -> u8 {
        self.mas_id
    }

    pub fn counters(&self) -> &VersionCounters {
        &self.counters
    }

    /// Add the account's store folders below `telecom/msg`.
    pub fn load_folders(&self, tree: &mut FolderTree) -> MapResult<usize> {
        let Some(msg) = tree.msg_folder() else {
            return Ok(0);
        };
        let conn = open(self.store.as_ref())?;
        let mut load = |parent: i64| -> MapResult<Vec<(i64, String)>> {
            let mut c = store::query(
                conn.as_ref(),
                "select id, name from Folder where parent_id = ? order by id",
                &[Value::Int(parent)],
            )?;
            let mut children = Vec::new();
            while c.next_row() {
                children.push((c.get_int64(0), c.get_string(1)));
            }
            Ok(children)
        };
        let added = tree.populate(msg, 0, &mut load)?;
        info!("[MAS {}] Loaded {} store folders", self.mas_id, added);
        Ok(added)
    }

    /// Message listing of `folder`, or across all folders when the folder is
    /// conceptual.
    pub fn message_listing(
        &self,
        folder: &Folder,
        params: &ApplicationParameters,
        feature_mask: u32,
    ) -> MapResult<Listing> {
        let conn = open(self.store.as_ref())?;
        if let Some(convo) = non_empty(&params.conversation_id) {
            ensure_conversation(conn.as_ref(), convo)?;
        }
        let folder_filter = (!folder.ignore).then_some(folder.name.as_str());
        let max_list_count = params.max_list_count.unwrap_or(DEFAULT_MAX_LIST_COUNT);

        let mut c = run(conn.as_ref(), &query::message_count(folder_filter, params))?;
        let (size, unread) = if c.next_row() {
            (c.get_int64(0), c.get_int64(1))
        } else {
            (0, 0)
        };

        let mut enc = ParamEncoder::new();
        enc.put_int(ParamTag::NewMessage, (unread > 0) as u32)
            .put_int(ParamTag::ListingSize, size.clamp(0, u16::MAX as i64) as u32)
            .put_str(ParamTag::MseTime, &mse_time());
        if feature_mask & features::DATABASE_IDENTIFIER != 0 {
            enc.put_str(ParamTag::DatabaseIdentifier, &self.counters.database_identifier());
        }
        if feature_mask & features::FOLDER_VERSION_COUNTER != 0 {
            enc.put_str(ParamTag::FolderVersionCounter, &self.counters.folder_version());
        }

        let body = if max_list_count == 0 {
            None
        } else {
            let mut rows = run(
                conn.as_ref(),
                &query::message_listing(folder_filter, params, max_list_count),
            )?;
            let mut elements = Vec::with_capacity(rows.row_count());
            while rows.next_row() {
                elements.push(MessageListingElement::from_cursor(&rows));
            }
            let version = FormatVersions::from_features(feature_mask).listing;
            let xml = listing::write_message_listing(
                &elements,
                version,
                params.parameter_mask,
                params.subject_length,
            )?;
            Some(xml.into_bytes())
        };
        debug!(
            "[MAS {}] message listing of '{}': {} matching, {} unread",
            self.mas_id, folder.name, size, unread
        );
        Ok(Listing {
            body,
            app_params: enc.finish(),
        })
    }

    pub fn conversation_listing(
        &self,
        params: &ApplicationParameters,
        feature_mask: u32,
    ) -> MapResult<Listing> {
        let conn = open(self.store.as_ref())?;
        if let Some(convo) = non_empty(&params.conversation_id) {
            ensure_conversation(conn.as_ref(), convo)?;
        }
        let max_list_count = params.max_list_count.unwrap_or(DEFAULT_MAX_LIST_COUNT);

        let mut c = run(conn.as_ref(), &query::conversation_count(params))?;
        let size = if c.next_row() { c.get_int64(0) } else { 0 };

        let mut enc = ParamEncoder::new();
        enc.put_int(ParamTag::ListingSize, size.clamp(0, u16::MAX as i64) as u32)
            .put_str(ParamTag::MseTime, &mse_time());
        if feature_mask & features::DATABASE_IDENTIFIER != 0 {
            enc.put_str(ParamTag::DatabaseIdentifier, &self.counters.database_identifier());
        }
        if feature_mask & features::CONVERSATION_VERSION_COUNTERS != 0 {
            enc.put_str(
                ParamTag::ConversationListingVersionCounter,
                &self.counters.conversation_version(),
            );
        }

        let body = if max_list_count == 0 {
            None
        } else {
            let mut rows = run(
                conn.as_ref(),
                &query::conversation_listing(params, max_list_count),
            )?;
            let mut conversations = Vec::with_capacity(rows.row_count());
            while rows.next_row() {
                conversations.push(ConversationListingElement::from_cursor(&rows));
            }
            if listing::field_wanted(
                params.conversation_parameter_mask,
                listing::conversation_mask::PARTICIPANTS,
                false,
            ) {
                for convo in &mut conversations {
                    let mut p = run(conn.as_ref(), &query::participants(&convo.id, params))?;
                    while p.next_row() {
                        convo.participants.push(Participant::from_cursor(&p));
                    }
                }
            }
            let xml =
                listing::write_conversation_listing(&conversations, params.conversation_parameter_mask)?;
            Some(xml.into_bytes())
        };
        Ok(Listing {
            body,
            app_params: enc.finish(),
        })
    }

    /// Serialized bMessage for `handle`.
    pub fn get_message(&self, handle: &str, format: FormatVersion) -> MapResult<Vec<u8>> {
        let conn = open(self.store.as_ref())?;
        let msg = mutation::load_message(conn.as_ref(), handle)?;
        Ok(msg.to_bmessage_string(format).into_bytes())
    }

    /// Apply a `x-bt/messageStatus` PUT.
    pub fn set_message_status(&self, handle: &str, params: &ApplicationParameters) -> MapResult<()> {
        let indicator = params
            .status_indicator
            .ok_or_else(|| MapError::BadRequest("StatusIndicator missing".into()))?;
        let conn = open(self.store.as_ref())?;
        match indicator {
            0 | 1 => {
                let value = params
                    .status_value
                    .ok_or_else(|| MapError::BadRequest("StatusValue missing".into()))?;
                transaction(conn.as_ref(), |c| {
                    if indicator == 0 {
                        mutation::set_read_status(c, handle, value == 1)
                    } else {
                        mutation::set_deleted(c, handle, value == 1)
                    }
                })
            }
            2 => {
                let data = params
                    .extended_data
                    .as_deref()
                    .ok_or_else(|| MapError::BadRequest("ExtendedData missing".into()))?;
                mutation::set_extended_data(conn.as_ref(), handle, data)
            }
            other => Err(MapError::BadRequest(format!("StatusIndicator {}", other))),
        }
    }

    /// Store a pushed bMessage in `folder` and return its new handle.
    ///
    /// Messages pushed to the outbox are handed to the account service;
    /// drafts are only stored. A refused send still stores the message and
    /// yields a SendingFailure event.
    pub fn push_message(
        &mut self,
        folder: &Folder,
        body: &[u8],
        params: &ApplicationParameters,
        format: FormatVersion,
    ) -> MapResult<PushedMessage> {
        let leaf = folder.name.to_ascii_lowercase();
        if leaf != folders::OUTBOX && leaf != folders::DRAFT {
            return Err(MapError::BadRequest(format!(
                "cannot push to '{}'",
                folder.name
            )));
        }
        let text = std::str::from_utf8(body)
            .map_err(|_| MapError::BadRequest("bMessage is not UTF-8".into()))?;
        let charset = Charset::from_u8(params.charset.unwrap_or(1));
        let mut msg = BMessage::parse(text, charset, format)?;

        let conn = open(self.store.as_ref())?;
        if let Some(original) = non_empty(&params.message_handle) {
            let original_text = mutation::message_text(conn.as_ref(), original)?;
            if params.modify_text == Some(1) {
                msg.body.text = format!("{}\r\n{}", msg.body.text, original_text);
                msg.body.length = None;
            }
            debug!("[MAS {}] forwarding {}", self.mas_id, original);
        }

        let now = Utc::now();
        let handle = self.handles.next(msg.msg_type, now);
        let datetime = mutation::listing_datetime(now);
        let transparent = params.transparent == Some(1);
        let retry = params.retry.map_or(true, |r| r == 1);
        let new = mutation::NewMessage {
            handle: &handle,
            message: &msg,
            folder: &leaf,
            charset,
            transparent,
            retry,
            conversation_id: non_empty(&params.conversation_id),
            datetime: &datetime,
        };
        transaction(conn.as_ref(), |c| mutation::insert_message(c, &new))?;
        info!("[MAS {}] Stored pushed message {} in {}", self.mas_id, handle, leaf);

        let mut send_failure = None;
        if leaf == folders::OUTBOX {
            let outgoing = OutgoingMessage {
                handle: handle.clone(),
                msg_type: msg.msg_type,
                recipients: msg
                    .primary_recipients()
                    .filter_map(|r| r.primary_address())
                    .map(str::to_string)
                    .collect(),
                text: msg.body.text.clone(),
                retry,
                transparent,
            };
            if let Err(e) = self.service.send_message(self.mas_id, &outgoing) {
                warn!("[MAS {}] Sending {} failed: {}", self.mas_id, handle, e);
                send_failure = Some(EventInfo::message(
                    EventKind::SendingFailure,
                    &handle,
                    &format!("{}/{}/{}", folders::TELECOM, folders::MSG, leaf),
                    msg.msg_type,
                ));
            }
        }
        Ok(PushedMessage {
            handle,
            send_failure,
        })
    }

    pub fn set_notification_filter(&mut self, peer: &str, mask: u32) {
        debug!("[MAS {}] {} notification filter 0x{:04X}", self.mas_id, peer, mask);
        self.notification_filters.insert(peer.to_string(), mask);
    }

    pub fn notification_filter(&self, peer: &str) -> u32 {
        self.notification_filters
            .get(peer)
            .copied()
            .unwrap_or(ALL_EVENTS_MASK)
    }

    pub fn clear_notification_filter(&mut self, peer: &str) {
        self.notification_filters.remove(peer);
    }

    /// Event report body for `peer`, or `None` when its filter or the report
    /// version rules the event out.
    pub fn prepare_event_report(
        &self,
        peer: &str,
        event: &EventInfo,
        version: ReportVersion,
    ) -> Option<String> {
        if self.notification_filter(peer) & event.kind.filter_bit() == 0 {
            debug!(
                "[MAS {}] {} filtered for {}",
                self.mas_id,
                event.kind.as_str(),
                peer
            );
            return None;
        }
        build_event_xml(event, version)
    }

    /// Advance the counters a store change invalidates.
    pub fn record_event(&mut self, event: &EventInfo) {
        match event.kind {
            EventKind::NewMessage
            | EventKind::MessageDeleted
            | EventKind::MessageShift
            | EventKind::MessageRemoved => {
                self.counters.folder_version = self.counters.folder_version.wrapping_add(1);
            }
            EventKind::ConversationChanged
            | EventKind::ParticipantPresenceChanged
            | EventKind::ParticipantChatStateChanged => {
                self.counters.conversation_version =
                    self.counters.conversation_version.wrapping_add(1);
            }
            _ => {}
        }
    }

    /// The store was replaced or reset; clients must resynchronize.
    pub fn reset_database_identifier(&mut self) {
        self.counters.database_identifier = uuid::Uuid::new_v4().as_u128();
        info!("[MAS {}] New database identifier", self.mas_id);
    }
}

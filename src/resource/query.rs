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

//! SQL for listing requests.

use crate::bmsg::MessageType;
use crate::params::ApplicationParameters;
use crate::store::Value;

/// A filter pattern with at most one `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wildcard {
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    /// A star with nothing around it.
    Any,
}

impl Wildcard {
    /// Text before the star means starts-with, otherwise text after it means
    /// ends-with. No star at all means contains.
    pub fn parse(pattern: &str) -> Self {
        match pattern.split_once('*') {
            None => Wildcard::Contains(pattern.to_string()),
            Some((left, _)) if !left.is_empty() => Wildcard::StartsWith(left.to_string()),
            Some((_, right)) if !right.is_empty() => Wildcard::EndsWith(right.to_string()),
            Some(_) => Wildcard::Any,
        }
    }

    /// Right-hand side of a `like` and its bound text.
    fn like(&self) -> Option<(&'static str, &str)> {
        match self {
            Wildcard::Contains(s) => Some(("'%' || ? || '%'", s.as_str())),
            Wildcard::StartsWith(s) => Some(("? || '%'", s.as_str())),
            Wildcard::EndsWith(s) => Some(("'%' || ?", s.as_str())),
            Wildcard::Any => None,
        }
    }

    /// `(c1 like X or c2 like X ...)` over `columns`, one bind per column.
    fn any_column(&self, columns: &[&str]) -> Option<(String, Vec<Value>)> {
        let (rhs, text) = self.like()?;
        let clause = columns
            .iter()
            .map(|c| format!("{} like {}", c, rhs))
            .collect::<Vec<_>>()
            .join(" or ");
        let binds = columns.iter().map(|_| Value::from(text)).collect();
        Some((format!("({})", clause), binds))
    }
}

/// SQL text plus positional binds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlQuery {
    pub sql: String,
    pub binds: Vec<Value>,
}

impl SqlQuery {
    fn new(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            binds: Vec::new(),
        }
    }

    fn push(&mut self, clause: &str, binds: impl IntoIterator<Item = Value>) {
        self.sql.push_str(clause);
        self.binds.extend(binds);
    }

    fn page(&mut self, params: &ApplicationParameters, max_list_count: u32) {
        if max_list_count != 0 {
            self.push(
                " limit ? offset ?",
                [
                    Value::from(max_list_count),
                    Value::from(params.list_start_offset.unwrap_or(0)),
                ],
            );
        }
    }
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.is_empty())
}

pub(crate) const MESSAGE_COLUMNS: &str = "select m.handle, m.subject, m.datetime, m.sender_name, \
m.sender_addressing, m.replyto_addressing, m.recipient_name, m.recipient_addressing, m.type, \
m.size, m.text, m.reception_status, m.attachment_size, m.priority, m.read, m.sent, m.protected, \
m.delivery_status, m.conversation_id, m.conversation_name, m.direction, m.attachment_mime_types \
from MessageList m where 1 = 1";

const MESSAGE_COUNT: &str = "select count(*), coalesce(sum(case when m.read = 0 then 1 else 0 end), 0) \
from MessageList m where 1 = 1";

fn vcard_filter(query: &mut SqlQuery, pattern: &str, is_originator: bool) {
    // A lone star matches everyone.
    if pattern == "*" {
        return;
    }
    if let Some((clause, binds)) = Wildcard::parse(pattern).any_column(&[
        "v.name",
        "v.phone_numbers",
        "v.email_addresses",
    ]) {
        query.push(
            &format!(
                " and m.handle in (select v.handle from Vcard v where v.is_originator = {} and {})",
                is_originator as i32, clause
            ),
            binds,
        );
    }
}

fn message_filters(query: &mut SqlQuery, folder: Option<&str>, params: &ApplicationParameters) {
    if let Some(folder) = folder.filter(|f| !f.is_empty()) {
        query.push(" and m.folder = ?", [Value::from(folder)]);
    }
    if let Some(handle) = non_empty(&params.filter_message_handle) {
        query.push(" and m.handle = ?", [Value::from(handle)]);
    }
    if let Some(convo) = non_empty(&params.conversation_id) {
        query.push(" and m.conversation_id = ?", [Value::from(convo)]);
    }
    if let Some(mask) = params.filter_message_type.filter(|m| *m != 0) {
        let excluded: Vec<Value> = MessageType::ALL
            .into_iter()
            .filter(|t| mask & t.filter_bit() != 0)
            .map(|t| Value::from(t.code()))
            .collect();
        if !excluded.is_empty() {
            let marks = vec!["?"; excluded.len()].join(", ");
            query.push(&format!(" and m.type not in ({})", marks), excluded);
        }
    }
    if let Some(begin) = non_empty(&params.filter_period_begin) {
        query.push(" and ? <= m.datetime", [Value::from(begin)]);
    }
    if let Some(end) = non_empty(&params.filter_period_end) {
        query.push(" and m.datetime <= ?", [Value::from(end)]);
    }
    match params.filter_read_status {
        Some(1) => query.push(" and m.read = ?", [Value::Int(0)]),
        Some(2) => query.push(" and m.read = ?", [Value::Int(1)]),
        _ => {}
    }
    match params.filter_priority {
        Some(1) => query.push(" and m.priority = ?", [Value::Int(1)]),
        Some(2) => query.push(" and m.priority = ?", [Value::Int(0)]),
        _ => {}
    }
    if let Some(originator) = non_empty(&params.filter_originator) {
        vcard_filter(query, originator, true);
    }
    if let Some(recipient) = non_empty(&params.filter_recipient) {
        vcard_filter(query, recipient, false);
    }
}

/// Rows of a message listing, newest first, paged.
pub fn message_listing(
    folder: Option<&str>,
    params: &ApplicationParameters,
    max_list_count: u32,
) -> SqlQuery {
    let mut query = SqlQuery::new(MESSAGE_COLUMNS);
    message_filters(&mut query, folder, params);
    query.sql.push_str(" order by m.datetime desc");
    query.page(params, max_list_count);
    query
}

/// `count(*)` and unread count over the same filters, unpaged.
pub fn message_count(folder: Option<&str>, params: &ApplicationParameters) -> SqlQuery {
    let mut query = SqlQuery::new(MESSAGE_COUNT);
    message_filters(&mut query, folder, params);
    query
}

fn conversation_filters(query: &mut SqlQuery, params: &ApplicationParameters) {
    if let Some(begin) = non_empty(&params.filter_last_activity_begin) {
        query.push(" and last_activity >= ?", [Value::from(begin)]);
    }
    if let Some(end) = non_empty(&params.filter_last_activity_end) {
        query.push(" and last_activity <= ?", [Value::from(end)]);
    }
    match params.filter_read_status {
        Some(1) => query.push(" and read_status = ?", [Value::Int(0)]),
        Some(2) => query.push(" and read_status = ?", [Value::Int(1)]),
        _ => {}
    }
    if let Some(convo) = non_empty(&params.conversation_id) {
        query.push(" and convo_id = ?", [Value::from(convo)]);
    }
}

/// Conversations, most recently created first, paged.
pub fn conversation_listing(params: &ApplicationParameters, max_list_count: u32) -> SqlQuery {
    let mut query = SqlQuery::new(
        "select convo_id, name, last_activity, read_status, version_counter, summary \
         from Conversation where 1 = 1",
    );
    conversation_filters(&mut query, params);
    query.sql.push_str(" order by id desc");
    query.page(params, max_list_count);
    query
}

pub fn conversation_count(params: &ApplicationParameters) -> SqlQuery {
    let mut query = SqlQuery::new("select count(*) from Conversation where 1 = 1");
    conversation_filters(&mut query, params);
    query
}

/// Participants of one conversation, narrowed by FilterRecipient.
pub fn participants(convo_id: &str, params: &ApplicationParameters) -> SqlQuery {
    let mut query = SqlQuery::new(
        "select uci, display_name, chat_state, last_activity, x_bt_uid, name, \
         presence_availability, presence_text, priority from Participant where convo_id = ?",
    );
    query.binds.push(Value::from(convo_id));
    if let Some(recipient) = non_empty(&params.filter_recipient) {
        // No special case for a lone star here: it parses to Any and adds nothing.
        if let Some((clause, binds)) = Wildcard::parse(recipient).any_column(&["convo_id", "name"]) {
            query.push(&format!(" and {}", clause), binds);
        }
    }
    query
}

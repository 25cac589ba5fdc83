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

//! MAS server: OBEX request dispatch for one MAS instance.

pub mod session;

pub use session::{PutAssembler, SessionPhase, SessionState};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{AccountKind, InstanceConfig};
use crate::error::{MapError, MapResult};
use crate::event::{EventInfo, ReportVersion};
use crate::folder::{Folder, FolderTree};
use crate::mns::{MnsClient, MnsNotice};
use crate::obex::constants::{
    features, types, DEFAULT_MAX_LIST_COUNT, INSTANCE_INFORMATION_MAX_LEN, MAS_TARGET_UUID,
};
use crate::obex::{ObexRequest, ObexResponse, Opcode, ResponseCode};
use crate::params::{ApplicationParameters, ParamEncoder, ParamTag};
use crate::resource::ResourceEngine;
use crate::service::{MessageService, OwnerStatus};
use crate::store::DataStore;

/// Connection ids are unique across every instance of the process.
static NEXT_CONNECTION_ID: AtomicU32 = AtomicU32::new(1);

fn params_of(request: &ObexRequest) -> ApplicationParameters {
    request
        .headers
        .app_params
        .as_deref()
        .map(ApplicationParameters::decode)
        .unwrap_or_default()
}

fn has_text(v: &Option<String>) -> bool {
    v.as_deref().is_some_and(|s| !s.is_empty())
}

/// Cut `s` to at most `max` bytes without splitting a character.
fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn error_response(peer: &str, opcode: Opcode, e: &MapError) -> ObexResponse {
    let code = e.response_code();
    warn!(
        "{} from {} failed with 0x{:02X}: {}",
        opcode.as_str(),
        peer,
        code.as_u8(),
        e
    );
    ObexResponse::new(code)
}

pub struct MasServer {
    config: InstanceConfig,
    folders: FolderTree,
    resource: ResourceEngine,
    service: Arc<dyn MessageService>,
    mns: Arc<Mutex<MnsClient>>,
    sessions: HashMap<String, SessionState>,
}

impl MasServer {
    pub fn new(
        config: InstanceConfig,
        store: Arc<dyn DataStore>,
        service: Arc<dyn MessageService>,
        mns: Arc<Mutex<MnsClient>>,
    ) -> MapResult<Self> {
        let resource = ResourceEngine::new(config.mas_id, store, service.clone());
        let mut folders = FolderTree::for_account(config.account);
        if config.account.has_dynamic_folders() {
            resource.load_folders(&mut folders)?;
        }
        info!(
            "[MAS {}] '{}' ready ({} account, {} folders)",
            config.mas_id,
            config.name,
            config.account.as_str(),
            folders.len()
        );
        Ok(Self {
            config,
            folders,
            resource,
            service,
            mns,
            sessions: HashMap::new(),
        })
    }

    pub fn mas_id(&self) -> u8 {
        self.config.mas_id
    }

    pub fn session(&self, peer: &str) -> Option<&SessionState> {
        self.sessions.get(peer)
    }

    pub fn folders(&self) -> &FolderTree {
        &self.folders
    }

    pub fn resource(&self) -> &ResourceEngine {
        &self.resource
    }

    /// Process one request from `peer`. Failures become error responses.
    pub fn handle_request(&mut self, peer: &str, request: ObexRequest) -> ObexResponse {
        let opcode = request.opcode;
        debug!(
            "[MAS {}] {} from {} type={:?} name={:?}",
            self.config.mas_id,
            opcode.as_str(),
            peer,
            request.headers.type_,
            request.headers.name
        );
        let result = match opcode {
            Opcode::Connect => self.connect(peer, &request),
            Opcode::Disconnect => self.disconnect(peer),
            Opcode::Abort => self.abort(peer),
            Opcode::SetPath => self.set_path(peer, &request),
            Opcode::Get | Opcode::Put => self.transfer(peer, request),
        };
        result.unwrap_or_else(|e| error_response(peer, opcode, &e))
    }

    fn session_mut(&mut self, peer: &str) -> MapResult<&mut SessionState> {
        self.sessions
            .get_mut(peer)
            .ok_or_else(|| MapError::BadRequest(format!("{} is not connected", peer)))
    }

    fn connect(&mut self, peer: &str, request: &ObexRequest) -> MapResult<ObexResponse> {
        let target = request.headers.target.as_deref().unwrap_or_default();
        if target != MAS_TARGET_UUID.as_bytes() {
            return Err(MapError::BadRequest("CONNECT without MAS target".into()));
        }
        let params = params_of(request);
        let remote = params
            .map_supported_features
            .unwrap_or(features::LEGACY_DEFAULT);
        if let Some(old) = self.sessions.get(peer) {
            warn!(
                "[MAS {}] {} reconnected, dropping connection {}",
                self.config.mas_id, peer, old.connection_id
            );
            self.close_session(peer);
        }
        let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let session = SessionState::new(
            peer,
            connection_id,
            self.folders.root(),
            self.config.supported_features,
            remote,
        );
        self.sessions.insert(peer.to_string(), session);
        info!(
            "[MAS {}] {} connected (connection {}, features 0x{:06X})",
            self.config.mas_id, peer, connection_id, remote
        );

        let mut response = ObexResponse::success();
        response.headers.who = Some(MAS_TARGET_UUID.as_bytes().to_vec());
        response.headers.connection_id = Some(connection_id);
        Ok(response)
    }

    fn disconnect(&mut self, peer: &str) -> MapResult<ObexResponse> {
        self.close_session(peer);
        Ok(ObexResponse::success())
    }

    /// The transport to `peer` went away without a DISCONNECT.
    pub fn transport_lost(&mut self, peer: &str) {
        if self.sessions.contains_key(peer) {
            warn!("[MAS {}] Transport to {} lost", self.config.mas_id, peer);
        }
        self.close_session(peer);
    }

    fn close_session(&mut self, peer: &str) {
        let Some(session) = self.sessions.remove(peer) else {
            return;
        };
        if session.notifications_registered {
            self.mns.lock().disconnect(peer, self.config.mas_id);
        }
        self.resource.clear_notification_filter(peer);
        info!(
            "[MAS {}] {} disconnected (connection {})",
            self.config.mas_id, peer, session.connection_id
        );
    }

    fn abort(&mut self, peer: &str) -> MapResult<ObexResponse> {
        if let Some(session) = self.sessions.get_mut(peer) {
            session.pending_put.reset();
            session.phase = SessionPhase::Idle;
        }
        Ok(ObexResponse::success())
    }

    fn set_path(&mut self, peer: &str, request: &ObexRequest) -> MapResult<ObexResponse> {
        let current = self.session_mut(peer)?.current_folder;
        let next = self
            .folders
            .set_path(current, request.name(), request.setpath_flags)?;
        debug!(
            "[MAS {}] {} now in '{}'",
            self.config.mas_id,
            peer,
            self.folders.full_path(next)
        );
        self.session_mut(peer)?.current_folder = next;
        Ok(ObexResponse::success())
    }

    /// Peer's MAS feature mask learned from SDP after CONNECT.
    pub fn set_remote_features(&mut self, peer: &str, mask: u32) {
        if let Some(session) = self.sessions.get_mut(peer) {
            session.set_remote_features(mask);
        }
    }

    /// Store was replaced; the database identifier changes.
    pub fn store_reset(&mut self) {
        self.resource.reset_database_identifier();
    }

    /// Receive MNS channel notices for this instance's sessions.
    pub fn subscribe_mns(&self) -> mpsc::UnboundedReceiver<MnsNotice> {
        self.mns.lock().subscribe()
    }

    /// A dropped MNS channel ends the peer's registration and releases this
    /// instance's reference, so the peer has to register again.
    pub fn on_mns_notice(&mut self, notice: &MnsNotice) {
        let MnsNotice::Disconnected { peer } = notice else {
            return;
        };
        let Some(session) = self.sessions.get_mut(peer) else {
            return;
        };
        if session.notifications_registered {
            info!("[MAS {}] MNS to {} dropped", self.config.mas_id, peer);
            session.notifications_registered = false;
            self.mns.lock().disconnect(peer, self.config.mas_id);
        }
    }

    /// Route a store event to every registered peer. Returns the number of
    /// reports sent.
    pub fn notify_event(&mut self, event: &EventInfo) -> usize {
        self.resource.record_event(event);
        let mut sent = 0;
        let mut mns = self.mns.lock();
        for session in self.sessions.values() {
            if !session.notifications_registered {
                continue;
            }
            let mut mask = session.negotiated_features();
            if let Some(remote) = mns.remote_features(&session.peer) {
                mask &= remote;
            }
            let version = ReportVersion::from_features(mask);
            let Some(body) = self.resource.prepare_event_report(&session.peer, event, version) else {
                continue;
            };
            match mns.send_event(&session.peer, body.into_bytes(), self.config.mas_id) {
                Ok(()) => sent += 1,
                Err(e) => warn!(
                    "[MAS {}] {} not sent to {}: {}",
                    self.config.mas_id,
                    event.kind.as_str(),
                    session.peer,
                    e
                ),
            }
        }
        sent
    }

    fn transfer(&mut self, peer: &str, request: ObexRequest) -> MapResult<ObexResponse> {
        self.session_mut(peer)?.phase = SessionPhase::Busy;
        let result = match request.opcode {
            Opcode::Get => self.get(peer, &request),
            _ => self.put(peer, request),
        };
        if let Some(session) = self.sessions.get_mut(peer) {
            session.phase = SessionPhase::Idle;
        }
        result
    }

    fn get(&mut self, peer: &str, request: &ObexRequest) -> MapResult<ObexResponse> {
        let params = params_of(request);
        match request.headers.type_.as_deref().unwrap_or_default() {
            types::FOLDER_LISTING => self.get_folder_listing(peer, request, &params),
            types::MESSAGE_LISTING => self.get_message_listing(peer, request, &params),
            types::CONVERSATION_LISTING => {
                let mask = self.session_mut(peer)?.negotiated_features();
                let listing = self.resource.conversation_listing(&params, mask)?;
                Ok(listing_response(listing))
            }
            types::MESSAGE => {
                let handle = request.name();
                if handle.is_empty() {
                    return Err(MapError::BadRequest("GET message without handle".into()));
                }
                let format = self.session_mut(peer)?.formats().message;
                let body = self.resource.get_message(handle, format)?;
                Ok(ObexResponse::success().with_body(body))
            }
            types::INSTANCE_INFORMATION => self.get_instance_information(&params),
            types::OWNER_STATUS => {
                self.require_im()?;
                let status = self
                    .service
                    .owner_status(self.config.mas_id, params.conversation_id.as_deref())?;
                let mut enc = ParamEncoder::new();
                enc.put_int(ParamTag::PresenceAvailability, status.presence_availability as u32)
                    .put_int(ParamTag::ChatState, status.chat_state as u32);
                if !status.presence_text.is_empty() {
                    enc.put_str(ParamTag::PresenceText, &status.presence_text);
                }
                if !status.last_activity.is_empty() {
                    enc.put_str(ParamTag::LastActivity, &status.last_activity);
                }
                Ok(ObexResponse::success().with_app_params(enc.finish()))
            }
            other => Err(MapError::BadRequest(format!("GET type '{}'", other))),
        }
    }

    fn get_folder_listing(
        &mut self,
        peer: &str,
        request: &ObexRequest,
        params: &ApplicationParameters,
    ) -> MapResult<ObexResponse> {
        let current = self.session_mut(peer)?.current_folder;
        let folder = match request.name() {
            "" => current,
            name => self
                .folders
                .child(current, name)
                .ok_or_else(|| MapError::NotFound(format!("folder '{}'", name)))?,
        };
        let max = params.max_list_count.unwrap_or(DEFAULT_MAX_LIST_COUNT);
        if max == 0 {
            let mut enc = ParamEncoder::new();
            enc.put_int(ParamTag::FolderListingSize, self.folders.child_count(folder) as u32);
            return Ok(ObexResponse::success().with_app_params(enc.finish()));
        }
        let offset = params.list_start_offset.unwrap_or(0) as usize;
        let xml = self.folders.list_children_page(folder, offset, max as usize)?;
        Ok(ObexResponse::success().with_body(xml.into_bytes()))
    }

    fn get_message_listing(
        &mut self,
        peer: &str,
        request: &ObexRequest,
        params: &ApplicationParameters,
    ) -> MapResult<ObexResponse> {
        let session = self.session_mut(peer)?;
        let current = session.current_folder;
        let mask = session.negotiated_features();
        let name = request.name();

        let folder = if name.is_empty()
            && (has_text(&params.filter_message_handle) || has_text(&params.conversation_id))
        {
            Folder::conceptual(name)
        } else {
            let id = if name.is_empty() {
                current
            } else {
                self.folders
                    .child(current, name)
                    .ok_or_else(|| MapError::NotFound(format!("folder '{}'", name)))?
            };
            self.folders
                .get(id)
                .cloned()
                .ok_or_else(|| MapError::NotFound(format!("folder {}", id)))?
        };
        let listing = self.resource.message_listing(&folder, params, mask)?;
        Ok(listing_response(listing))
    }

    fn get_instance_information(&self, params: &ApplicationParameters) -> MapResult<ObexResponse> {
        let requested = params
            .mas_instance_id
            .ok_or_else(|| MapError::BadRequest("MASInstanceID missing".into()))?;
        if requested != self.config.mas_id {
            return Err(MapError::NotFound(format!("MAS instance {}", requested)));
        }
        let name = truncate_at_char_boundary(&self.config.name, INSTANCE_INFORMATION_MAX_LEN);
        let mut enc = ParamEncoder::new();
        if let Some(uci) = self.config.owner_uci.as_deref() {
            enc.put_str(ParamTag::OwnerUci, uci);
        }
        Ok(ObexResponse::success()
            .with_body(name.as_bytes().to_vec())
            .with_app_params(enc.finish()))
    }

    fn require_im(&self) -> MapResult<()> {
        if self.config.account == AccountKind::Im {
            Ok(())
        } else {
            Err(MapError::NotImplemented(
                "owner status on a non-IM instance".into(),
            ))
        }
    }

    fn put(&mut self, peer: &str, request: ObexRequest) -> MapResult<ObexResponse> {
        let session = self.session_mut(peer)?;
        let Some(request) = session.pending_put.process(request) else {
            return Ok(ObexResponse::new(ResponseCode::Continue));
        };
        let current = session.current_folder;
        let format = session.formats().message;
        let params = params_of(&request);
        let body = request.headers.body.as_deref().unwrap_or_default();

        match request.headers.type_.as_deref().unwrap_or_default() {
            types::MESSAGE => {
                let name = request.name();
                let id = if name.is_empty() {
                    current
                } else {
                    self.folders
                        .child(current, name)
                        .ok_or_else(|| MapError::NotFound(format!("folder '{}'", name)))?
                };
                let folder = self
                    .folders
                    .get(id)
                    .cloned()
                    .ok_or_else(|| MapError::NotFound(format!("folder {}", id)))?;
                let pushed = self.resource.push_message(&folder, body, &params, format)?;
                if let Some(failure) = &pushed.send_failure {
                    self.notify_event(failure);
                }
                Ok(ObexResponse::success().with_name(&pushed.handle))
            }
            types::MESSAGE_STATUS => {
                let handle = request.name();
                if handle.is_empty() {
                    return Err(MapError::BadRequest("messageStatus without handle".into()));
                }
                self.resource.set_message_status(handle, &params)?;
                Ok(ObexResponse::success())
            }
            types::NOTIFICATION_REGISTRATION => {
                self.register_notifications(peer, params.notification_status)
            }
            types::NOTIFICATION_FILTER => {
                let mask = params
                    .notification_filter_mask
                    .ok_or_else(|| MapError::BadRequest("NotificationFilterMask missing".into()))?;
                self.resource.set_notification_filter(peer, mask);
                Ok(ObexResponse::success())
            }
            types::MESSAGE_UPDATE => {
                let path = self.folders.full_path(current);
                self.service.update_folder(self.config.mas_id, &path)?;
                Ok(ObexResponse::success())
            }
            types::OWNER_STATUS => {
                self.require_im()?;
                let status = OwnerStatus {
                    presence_availability: params.presence_availability.unwrap_or(0),
                    presence_text: params.presence_text.clone().unwrap_or_default(),
                    last_activity: params.last_activity.clone().unwrap_or_default(),
                    chat_state: params.chat_state.unwrap_or(0),
                };
                self.service.set_owner_status(
                    self.config.mas_id,
                    params.conversation_id.as_deref(),
                    &status,
                )?;
                Ok(ObexResponse::success())
            }
            other => Err(MapError::BadRequest(format!("PUT type '{}'", other))),
        }
    }

    fn register_notifications(
        &mut self,
        peer: &str,
        status: Option<u8>,
    ) -> MapResult<ObexResponse> {
        let mas_id = self.config.mas_id;
        let session = self
            .sessions
            .get_mut(peer)
            .ok_or_else(|| MapError::BadRequest(format!("{} is not connected", peer)))?;
        match status {
            Some(1) => {
                if !session.notifications_registered {
                    session.notifications_registered = true;
                    self.mns.lock().connect(peer, mas_id);
                }
            }
            Some(0) => {
                if session.notifications_registered {
                    session.notifications_registered = false;
                    self.mns.lock().disconnect(peer, mas_id);
                }
            }
            _ => {
                return Err(MapError::BadRequest(
                    "NotificationStatus missing or invalid".into(),
                ))
            }
        }
        info!(
            "[MAS {}] {} notifications {}",
            mas_id,
            peer,
            if status == Some(1) { "on" } else { "off" }
        );
        Ok(ObexResponse::success())
    }
}

fn listing_response(listing: crate::resource::Listing) -> ObexResponse {
    let mut response = ObexResponse::success().with_app_params(listing.app_params);
    if let Some(body) = listing.body {
        response = response.with_body(body);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mns::{MnsTransport, MnsTransportEvent, ObexClientSession, ObexConnector, SdpSearch};
    use crate::obex::SetPathFlags;
    use crate::service::LoggingService;
    use crate::store::SqliteStore;

    const PEER: &str = "AA:BB:CC:DD:EE:FF";

    struct NoSdp;

    impl SdpSearch for NoSdp {
        fn search_mns(&self, _peer: &str, _reply: mpsc::UnboundedSender<MnsTransportEvent>) {}
    }

    #[derive(Default)]
    struct Sent(Arc<Mutex<Vec<ObexRequest>>>);

    struct SentSession(Arc<Mutex<Vec<ObexRequest>>>);

    impl ObexConnector for Sent {
        fn open(
            &self,
            _peer: &str,
            _transport: MnsTransport,
            _events: mpsc::UnboundedSender<MnsTransportEvent>,
        ) -> MapResult<Box<dyn ObexClientSession>> {
            Ok(Box::new(SentSession(self.0.clone())))
        }
    }

    impl ObexClientSession for SentSession {
        fn connect(&mut self, _request: ObexRequest) -> MapResult<()> {
            Ok(())
        }

        fn put(&mut self, request: ObexRequest) -> MapResult<()> {
            self.0.lock().push(request);
            Ok(())
        }

        fn disconnect(&mut self) -> MapResult<()> {
            Ok(())
        }
    }

    fn server_with(config: InstanceConfig) -> (MasServer, Arc<Mutex<MnsClient>>, Arc<Mutex<Vec<ObexRequest>>>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let sent = Sent::default();
        let log = sent.0.clone();
        let (client, _rx) = MnsClient::new(features::ALL_SUPPORTED, Arc::new(NoSdp), Arc::new(sent));
        let mns = Arc::new(Mutex::new(client));
        let server = MasServer::new(config, store, Arc::new(LoggingService), mns.clone()).unwrap();
        (server, mns, log)
    }

    fn server() -> (MasServer, Arc<Mutex<MnsClient>>, Arc<Mutex<Vec<ObexRequest>>>) {
        server_with(InstanceConfig::new(0, "SMS/MMS", AccountKind::SmsMms))
    }

    fn connect(server: &mut MasServer) -> ObexResponse {
        let mut enc = ParamEncoder::new();
        enc.put_int(ParamTag::MapSupportedFeatures, features::ALL_SUPPORTED);
        server.handle_request(
            PEER,
            ObexRequest::new(Opcode::Connect)
                .with_target(MAS_TARGET_UUID.as_bytes())
                .with_app_params(enc.finish()),
        )
    }

    fn into_inbox(server: &mut MasServer) {
        for name in ["telecom", "msg", "inbox"] {
            let r = server.handle_request(
                PEER,
                ObexRequest::new(Opcode::SetPath)
                    .with_name(name)
                    .with_flags(SetPathFlags::child()),
            );
            assert_eq!(r.code, ResponseCode::Success);
        }
    }

    #[test]
    fn test_connect_requires_mas_target() {
        let (mut server, _, _) = server();
        let r = server.handle_request(PEER, ObexRequest::new(Opcode::Connect));
        assert_eq!(r.code, ResponseCode::BadRequest);
        assert!(r.headers.connection_id.is_none());
        assert!(server.session(PEER).is_none());

        let r = connect(&mut server);
        assert_eq!(r.code, ResponseCode::Success);
        assert!(r.headers.connection_id.is_some());
        assert_eq!(r.headers.who.as_deref(), Some(&MAS_TARGET_UUID.as_bytes()[..]));
    }

    #[test]
    fn test_connection_ids_increase() {
        let (mut server, _, _) = server();
        let first = connect(&mut server).headers.connection_id.unwrap();
        server.handle_request(PEER, ObexRequest::new(Opcode::Disconnect));
        let second = connect(&mut server).headers.connection_id.unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_requests_need_session() {
        let (mut server, _, _) = server();
        let r = server.handle_request(
            PEER,
            ObexRequest::new(Opcode::Get).with_type(types::FOLDER_LISTING),
        );
        assert_eq!(r.code, ResponseCode::BadRequest);
    }

    #[test]
    fn test_setpath_navigation() {
        let (mut server, _, _) = server();
        connect(&mut server);
        into_inbox(&mut server);
        let inbox = server.folders().find_path("telecom/msg/inbox");
        assert_eq!(server.session(PEER).map(|s| s.current_folder), inbox);

        let r = server.handle_request(
            PEER,
            ObexRequest::new(Opcode::SetPath)
                .with_name("nope")
                .with_flags(SetPathFlags::child()),
        );
        assert_eq!(r.code, ResponseCode::NotFound);
        assert_eq!(server.session(PEER).map(|s| s.current_folder), inbox);
    }

    #[test]
    fn test_folder_listing_size_only() {
        let (mut server, _, _) = server();
        connect(&mut server);
        let mut enc = ParamEncoder::new();
        enc.put_int(ParamTag::MaxListCount, 0);
        let r = server.handle_request(
            PEER,
            ObexRequest::new(Opcode::Get)
                .with_type(types::FOLDER_LISTING)
                .with_name("telecom")
                .with_app_params(enc.finish()),
        );
        assert_eq!(r.code, ResponseCode::Success);
        assert!(r.headers.body.is_none());
        let params = ApplicationParameters::decode(r.headers.app_params.as_deref().unwrap());
        assert_eq!(params.folder_listing_size, Some(1));
    }

    #[test]
    fn test_phase_restored_after_failure() {
        let (mut server, _, _) = server();
        connect(&mut server);
        let r = server.handle_request(
            PEER,
            ObexRequest::new(Opcode::Get).with_type("x-bt/unknown"),
        );
        assert_eq!(r.code, ResponseCode::BadRequest);
        assert_eq!(server.session(PEER).unwrap().phase, SessionPhase::Idle);
    }

    #[test]
    fn test_instance_information() {
        let long_name = "é".repeat(150);
        let (mut server, _, _) = server_with(InstanceConfig::new(2, &long_name, AccountKind::Email));
        connect(&mut server);

        let get = |server: &mut MasServer, id: Option<u32>| {
            let mut enc = ParamEncoder::new();
            if let Some(id) = id {
                enc.put_int(ParamTag::MasInstanceId, id);
            }
            server.handle_request(
                PEER,
                ObexRequest::new(Opcode::Get)
                    .with_type(types::INSTANCE_INFORMATION)
                    .with_app_params(enc.finish()),
            )
        };
        assert_eq!(get(&mut server, None).code, ResponseCode::BadRequest);
        assert_eq!(get(&mut server, Some(5)).code, ResponseCode::NotFound);
        let r = get(&mut server, Some(2));
        let body = r.headers.body.unwrap();
        assert_eq!(body.len(), INSTANCE_INFORMATION_MAX_LEN);
        assert!(std::str::from_utf8(&body).is_ok());
    }

    #[test]
    fn test_owner_status_only_for_im() {
        let (mut server, _, _) = server();
        connect(&mut server);
        let r = server.handle_request(
            PEER,
            ObexRequest::new(Opcode::Get).with_type(types::OWNER_STATUS),
        );
        assert_eq!(r.code, ResponseCode::NotImplemented);

        let (mut im, _, _) = server_with(InstanceConfig::new(1, "Chat", AccountKind::Im));
        connect(&mut im);
        let r = im.handle_request(
            PEER,
            ObexRequest::new(Opcode::Get).with_type(types::OWNER_STATUS),
        );
        assert_eq!(r.code, ResponseCode::Success);
    }

    const OUTBOX_PUSH: &str = "BEGIN:BMSG\r\nVERSION:1.0\r\nSTATUS:READ\r\nTYPE:SMS_GSM\r\nFOLDER:\r\n\
BEGIN:BENV\r\nBEGIN:VCARD\r\nVERSION:2.1\r\nN:Bob\r\nTEL:+15550200\r\nEND:VCARD\r\n\
BEGIN:BBODY\r\nCHARSET:UTF-8\r\nLENGTH:34\r\nBEGIN:MSG\r\nRunning late\r\nEND:MSG\r\nEND:BBODY\r\n\
END:BENV\r\nEND:BMSG\r\n";

    fn into_msg(server: &mut MasServer) {
        for name in ["telecom", "msg"] {
            server.handle_request(
                PEER,
                ObexRequest::new(Opcode::SetPath)
                    .with_name(name)
                    .with_flags(SetPathFlags::child()),
            );
        }
    }

    #[test]
    fn test_multi_packet_put_completes() {
        let (mut server, _, _) = server();
        connect(&mut server);
        into_msg(&mut server);
        let (head, tail) = OUTBOX_PUSH.as_bytes().split_at(40);

        let r = server.handle_request(
            PEER,
            ObexRequest::new(Opcode::Put)
                .with_type(types::MESSAGE)
                .with_name("outbox")
                .with_body(head.to_vec())
                .partial(),
        );
        assert_eq!(r.code, ResponseCode::Continue);
        assert!(server.session(PEER).unwrap().pending_put.in_progress());

        let r = server.handle_request(
            PEER,
            ObexRequest::new(Opcode::Put).with_body(tail.to_vec()),
        );
        assert_eq!(r.code, ResponseCode::Success);
        assert_eq!(r.headers.name.as_deref().map(str::len), Some(16));
        assert!(!server.session(PEER).unwrap().pending_put.in_progress());
    }

    #[test]
    fn test_abort_drops_partial_put() {
        let (mut server, _, _) = server();
        connect(&mut server);
        into_msg(&mut server);
        server.handle_request(
            PEER,
            ObexRequest::new(Opcode::Put)
                .with_type(types::MESSAGE)
                .with_name("outbox")
                .with_body(b"BEGIN:BMSG\r\n".to_vec())
                .partial(),
        );
        server.handle_request(PEER, ObexRequest::new(Opcode::Abort));
        assert!(!server.session(PEER).unwrap().pending_put.in_progress());

        // The type of the aborted PUT does not carry over.
        let r = server.handle_request(
            PEER,
            ObexRequest::new(Opcode::Put).with_body(OUTBOX_PUSH.as_bytes().to_vec()),
        );
        assert_eq!(r.code, ResponseCode::BadRequest);
    }

    #[test]
    fn test_notification_registration_references_mns() {
        let (mut server, mns, _) = server();
        connect(&mut server);
        let register = |server: &mut MasServer, status: Option<u32>| {
            let mut enc = ParamEncoder::new();
            if let Some(s) = status {
                enc.put_int(ParamTag::NotificationStatus, s);
            }
            server.handle_request(
                PEER,
                ObexRequest::new(Opcode::Put)
                    .with_type(types::NOTIFICATION_REGISTRATION)
                    .with_app_params(enc.finish())
                    .with_body(vec![0x30]),
            )
        };
        assert_eq!(register(&mut server, None).code, ResponseCode::BadRequest);
        assert_eq!(register(&mut server, Some(1)).code, ResponseCode::Success);
        assert_eq!(mns.lock().ref_count(PEER), 1);

        server.handle_request(PEER, ObexRequest::new(Opcode::Disconnect));
        assert_eq!(mns.lock().ref_count(PEER), 0);
    }

    #[test]
    fn test_events_reach_registered_peers() {
        use crate::bmsg::MessageType;
        use crate::event::EventKind;
        use crate::mns::MnsRecord;

        let (mut server, mns, log) = server();
        connect(&mut server);
        let mut enc = ParamEncoder::new();
        enc.put_int(ParamTag::NotificationStatus, 1);
        server.handle_request(
            PEER,
            ObexRequest::new(Opcode::Put)
                .with_type(types::NOTIFICATION_REGISTRATION)
                .with_app_params(enc.finish()),
        );
        {
            let mut client = mns.lock();
            client.handle_transport_event(MnsTransportEvent::SdpComplete {
                peer: PEER.into(),
                record: Some(MnsRecord {
                    transport: MnsTransport::Rfcomm(5),
                    supported_features: features::LEGACY_DEFAULT,
                }),
            });
            client.handle_transport_event(MnsTransportEvent::Connected {
                peer: PEER.into(),
                connection_id: 9,
            });
        }

        let new = EventInfo::message(EventKind::NewMessage, "0100000000000001", "telecom/msg/inbox", MessageType::SmsGsm);
        assert_eq!(server.notify_event(&new), 1);
        // MNS advertises no 1.1 reports, so the read-status event is gated.
        let read = EventInfo::message(EventKind::ReadStatusChanged, "0100000000000001", "telecom/msg/inbox", MessageType::SmsGsm);
        assert_eq!(server.notify_event(&read), 0);

        let sent = log.lock();
        assert_eq!(sent.len(), 1);
        let body = String::from_utf8(sent[0].headers.body.clone().unwrap()).unwrap();
        assert!(body.contains("version=\"1.0\""));
    }

    #[test]
    fn test_mns_loss_clears_registration() {
        let (mut server, mns, _) = server();
        connect(&mut server);
        let mut enc = ParamEncoder::new();
        enc.put_int(ParamTag::NotificationStatus, 1);
        server.handle_request(
            PEER,
            ObexRequest::new(Opcode::Put)
                .with_type(types::NOTIFICATION_REGISTRATION)
                .with_app_params(enc.finish()),
        );
        assert!(server.session(PEER).unwrap().notifications_registered);
        assert_eq!(mns.lock().ref_count(PEER), 1);
        server.on_mns_notice(&MnsNotice::Disconnected { peer: PEER.into() });
        assert!(!server.session(PEER).unwrap().notifications_registered);
        assert_eq!(mns.lock().ref_count(PEER), 0);

        server.handle_request(PEER, ObexRequest::new(Opcode::Disconnect));
        assert_eq!(mns.lock().ref_count(PEER), 0);
    }

    #[test]
    fn test_reconnect_releases_mns_reference() {
        let (mut server, mns, _) = server();
        connect(&mut server);
        let mut enc = ParamEncoder::new();
        enc.put_int(ParamTag::NotificationStatus, 1);
        server.handle_request(
            PEER,
            ObexRequest::new(Opcode::Put)
                .with_type(types::NOTIFICATION_REGISTRATION)
                .with_app_params(enc.finish()),
        );
        assert_eq!(mns.lock().ref_count(PEER), 1);

        let first = server.session(PEER).unwrap().connection_id;
        connect(&mut server);
        let session = server.session(PEER).unwrap();
        assert_ne!(session.connection_id, first);
        assert!(!session.notifications_registered);
        assert_eq!(mns.lock().ref_count(PEER), 0);

        server.handle_request(PEER, ObexRequest::new(Opcode::Disconnect));
        assert_eq!(mns.lock().ref_count(PEER), 0);
    }

    #[test]
    fn test_refused_send_reported_to_mns() {
        use crate::mns::MnsRecord;
        use crate::service::OutgoingMessage;

        struct Refusing;

        impl MessageService for Refusing {
            fn send_message(&self, _: u8, _: &OutgoingMessage) -> MapResult<()> {
                Err(MapError::ServiceUnavailable("no signal".into()))
            }

            fn update_folder(&self, _: u8, _: &str) -> MapResult<()> {
                Ok(())
            }

            fn owner_status(&self, _: u8, _: Option<&str>) -> MapResult<OwnerStatus> {
                Ok(OwnerStatus::default())
            }

            fn set_owner_status(&self, _: u8, _: Option<&str>, _: &OwnerStatus) -> MapResult<()> {
                Ok(())
            }
        }

        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let sent = Sent::default();
        let log = sent.0.clone();
        let (client, _rx) = MnsClient::new(features::ALL_SUPPORTED, Arc::new(NoSdp), Arc::new(sent));
        let mns = Arc::new(Mutex::new(client));
        let mut server = MasServer::new(
            InstanceConfig::new(0, "SMS/MMS", AccountKind::SmsMms),
            store,
            Arc::new(Refusing),
            mns.clone(),
        )
        .unwrap();
        connect(&mut server);
        let mut enc = ParamEncoder::new();
        enc.put_int(ParamTag::NotificationStatus, 1);
        server.handle_request(
            PEER,
            ObexRequest::new(Opcode::Put)
                .with_type(types::NOTIFICATION_REGISTRATION)
                .with_app_params(enc.finish()),
        );
        {
            let mut client = mns.lock();
            client.handle_transport_event(MnsTransportEvent::SdpComplete {
                peer: PEER.into(),
                record: Some(MnsRecord {
                    transport: MnsTransport::L2cap(0x1001),
                    supported_features: features::ALL_SUPPORTED,
                }),
            });
            client.handle_transport_event(MnsTransportEvent::Connected {
                peer: PEER.into(),
                connection_id: 3,
            });
        }

        into_msg(&mut server);
        let r = server.handle_request(
            PEER,
            ObexRequest::new(Opcode::Put)
                .with_type(types::MESSAGE)
                .with_name("outbox")
                .with_body(OUTBOX_PUSH.as_bytes().to_vec()),
        );
        assert_eq!(r.code, ResponseCode::Success);

        let sent = log.lock();
        assert_eq!(sent.len(), 1);
        let body = String::from_utf8(sent[0].headers.body.clone().unwrap()).unwrap();
        assert!(body.contains("SendingFailure"));
        assert!(body.contains(r.headers.name.as_deref().unwrap()));
    }

    #[test]
    fn test_truncate_at_char_boundary() {
        assert_eq!(truncate_at_char_boundary("abc", 5), "abc");
        assert_eq!(truncate_at_char_boundary("aé", 2), "a");
    }
}

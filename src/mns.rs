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

//! MNS client: pushes event reports to a peer's notification server.
//!
//! One channel per peer is shared by every local MAS instance that asked
//! for notifications. SDP results and transport state changes are not
//! applied where they happen; they are posted as [`MnsTransportEvent`]s and
//! applied by [`MnsClient::handle_transport_event`] from the pump task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{MapError, MapResult};
use crate::obex::constants::{types, MNS_TARGET_UUID};
use crate::obex::{ObexRequest, Opcode};
use crate::params::{ParamEncoder, ParamTag};

/// How to reach a peer's MNS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MnsTransport {
    Rfcomm(u8),
    /// GOEP L2CAP PSM.
    L2cap(u16),
}

/// The parts of a peer's MNS SDP record the client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MnsRecord {
    pub transport: MnsTransport,
    pub supported_features: u32,
}

/// Completions posted by SDP and the OBEX transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MnsTransportEvent {
    SdpComplete {
        peer: String,
        record: Option<MnsRecord>,
    },
    Connected {
        peer: String,
        connection_id: u32,
    },
    Failed {
        peer: String,
        /// Both sides connected at once; worth one more attempt.
        collision: bool,
    },
    Disconnected {
        peer: String,
    },
}

/// Channel changes reported to subscribed MAS instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MnsNotice {
    Connected { peer: String },
    Disconnected { peer: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MnsState {
    Idle,
    SdpSearching,
    Connecting,
    Connected,
    Disconnected,
}

/// SDP lookup of a peer's MNS record. The result is posted on `reply`.
pub trait SdpSearch: Send + Sync {
    fn search_mns(&self, peer: &str, reply: mpsc::UnboundedSender<MnsTransportEvent>);
}

/// Opens OBEX client sessions. The session posts its state changes on
/// `events`.
pub trait ObexConnector: Send + Sync {
    fn open(
        &self,
        peer: &str,
        transport: MnsTransport,
        events: mpsc::UnboundedSender<MnsTransportEvent>,
    ) -> MapResult<Box<dyn ObexClientSession>>;
}

/// An open OBEX client session to a peer's MNS.
pub trait ObexClientSession: Send {
    fn connect(&mut self, request: ObexRequest) -> MapResult<()>;

    fn put(&mut self, request: ObexRequest) -> MapResult<()>;

    fn disconnect(&mut self) -> MapResult<()>;
}

/// SDP and OBEX stand-in for hosts without a Bluetooth transport bound.
/// Every search reports that the peer has no MNS record.
#[derive(Debug, Default)]
pub struct UnboundTransport;

impl SdpSearch for UnboundTransport {
    fn search_mns(&self, peer: &str, reply: mpsc::UnboundedSender<MnsTransportEvent>) {
        debug!("No SDP backend, {} has no MNS record", peer);
        if reply
            .send(MnsTransportEvent::SdpComplete {
                peer: peer.to_string(),
                record: None,
            })
            .is_err()
        {
            warn!("MNS event queue closed");
        }
    }
}

impl ObexConnector for UnboundTransport {
    fn open(
        &self,
        peer: &str,
        _transport: MnsTransport,
        _events: mpsc::UnboundedSender<MnsTransportEvent>,
    ) -> MapResult<Box<dyn ObexClientSession>> {
        Err(MapError::NotImplemented(format!("no OBEX transport to {}", peer)))
    }
}

struct PeerChannel {
    /// MAS instance ids holding a reference.
    refs: HashSet<u8>,
    state: MnsState,
    transport: Option<MnsTransport>,
    connection_id: Option<u32>,
    remote_features: Option<u32>,
    session: Option<Box<dyn ObexClientSession>>,
    collision_retried: bool,
}

impl PeerChannel {
    fn new() -> Self {
        Self {
            refs: HashSet::new(),
            state: MnsState::Idle,
            transport: None,
            connection_id: None,
            remote_features: None,
            session: None,
            collision_retried: false,
        }
    }

    fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.disconnect() {
                warn!("MNS disconnect failed: {}", e);
            }
        }
        self.connection_id = None;
        self.state = MnsState::Disconnected;
    }
}

pub struct MnsClient {
    local_features: u32,
    sdp: Arc<dyn SdpSearch>,
    connector: Arc<dyn ObexConnector>,
    events_tx: mpsc::UnboundedSender<MnsTransportEvent>,
    observers: Vec<mpsc::UnboundedSender<MnsNotice>>,
    peers: HashMap<String, PeerChannel>,
}

impl MnsClient {
    /// Create the client and the queue its transport events arrive on.
    pub fn new(
        local_features: u32,
        sdp: Arc<dyn SdpSearch>,
        connector: Arc<dyn ObexConnector>,
    ) -> (Self, mpsc::UnboundedReceiver<MnsTransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                local_features,
                sdp,
                connector,
                events_tx,
                observers: Vec::new(),
                peers: HashMap::new(),
            },
            events_rx,
        )
    }

    /// Queue for SDP and transport completions produced outside the client.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<MnsTransportEvent> {
        self.events_tx.clone()
    }

    /// Receive channel notices.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<MnsNotice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    pub fn state(&self, peer: &str) -> MnsState {
        self.peers.get(peer).map_or(MnsState::Idle, |p| p.state)
    }

    /// Feature mask from the peer's MNS record, once SDP has completed.
    pub fn remote_features(&self, peer: &str) -> Option<u32> {
        self.peers.get(peer).and_then(|p| p.remote_features)
    }

    pub fn ref_count(&self, peer: &str) -> usize {
        self.peers.get(peer).map_or(0, |p| p.refs.len())
    }

    /// Take a reference on the peer's channel for `mas_id`, starting SDP if
    /// this is the first one.
    pub fn connect(&mut self, peer: &str, mas_id: u8) {
        let channel = self
            .peers
            .entry(peer.to_string())
            .or_insert_with(PeerChannel::new);
        channel.refs.insert(mas_id);
        debug!("MNS {} referenced by MAS {} ({} refs)", peer, mas_id, channel.refs.len());

        if matches!(channel.state, MnsState::Idle | MnsState::Disconnected) {
            channel.state = MnsState::SdpSearching;
            channel.collision_retried = false;
            info!("Searching MNS record of {}", peer);
            self.sdp.search_mns(peer, self.events_tx.clone());
        }
    }

    /// Drop `mas_id`'s reference; the channel closes with the last one.
    pub fn disconnect(&mut self, peer: &str, mas_id: u8) {
        let Some(channel) = self.peers.get_mut(peer) else {
            return;
        };
        if !channel.refs.remove(&mas_id) {
            return;
        }
        if channel.refs.is_empty() {
            info!("Closing MNS channel to {}", peer);
            channel.close();
        }
    }

    /// Push an event report body for `mas_id`.
    pub fn send_event(&mut self, peer: &str, body: Vec<u8>, mas_id: u8) -> MapResult<()> {
        let channel = self
            .peers
            .get_mut(peer)
            .filter(|c| c.state == MnsState::Connected)
            .ok_or_else(|| MapError::NotConnected(format!("MNS {}", peer)))?;
        let session = channel
            .session
            .as_mut()
            .ok_or_else(|| MapError::NotConnected(format!("MNS {} has no session", peer)))?;

        let mut params = ParamEncoder::new();
        params.put_int(ParamTag::MasInstanceId, mas_id as u32);
        let mut request = ObexRequest::new(Opcode::Put)
            .with_type(types::EVENT_REPORT)
            .with_app_params(params.finish())
            .with_body(body);
        if let Some(id) = channel.connection_id {
            request = request.with_connection_id(id);
        }
        session.put(request)
    }

    /// Apply one SDP or transport completion.
    pub fn handle_transport_event(&mut self, event: MnsTransportEvent) {
        match event {
            MnsTransportEvent::SdpComplete { peer, record } => self.on_sdp_complete(&peer, record),
            MnsTransportEvent::Connected {
                peer,
                connection_id,
            } => {
                let Some(channel) = self.peers.get_mut(&peer) else {
                    return;
                };
                if channel.refs.is_empty() {
                    channel.close();
                    return;
                }
                channel.state = MnsState::Connected;
                channel.connection_id = Some(connection_id);
                info!("MNS connected to {} (connection {})", peer, connection_id);
                self.notify(MnsNotice::Connected { peer });
            }
            MnsTransportEvent::Failed { peer, collision } => self.on_failed(&peer, collision),
            MnsTransportEvent::Disconnected { peer } => {
                let Some(channel) = self.peers.get_mut(&peer) else {
                    return;
                };
                channel.session = None;
                channel.connection_id = None;
                channel.state = MnsState::Disconnected;
                info!("MNS channel to {} closed", peer);
                self.notify(MnsNotice::Disconnected { peer });
            }
        }
    }

    fn on_sdp_complete(&mut self, peer: &str, record: Option<MnsRecord>) {
        let Some(channel) = self.peers.get_mut(peer) else {
            return;
        };
        if channel.state != MnsState::SdpSearching {
            debug!("Ignoring late MNS SDP result for {}", peer);
            return;
        }
        if channel.refs.is_empty() {
            channel.state = MnsState::Disconnected;
            return;
        }
        let Some(record) = record else {
            warn!("No MNS record found on {}", peer);
            channel.state = MnsState::Disconnected;
            self.notify(MnsNotice::Disconnected {
                peer: peer.to_string(),
            });
            return;
        };
        channel.transport = Some(record.transport);
        channel.remote_features = Some(record.supported_features);
        self.open_session(peer, record.transport);
    }

    fn open_session(&mut self, peer: &str, transport: MnsTransport) {
        let opened = self
            .connector
            .open(peer, transport, self.events_tx.clone())
            .and_then(|mut session| {
                let mut params = ParamEncoder::new();
                params.put_int(ParamTag::MapSupportedFeatures, self.local_features);
                session.connect(
                    ObexRequest::new(Opcode::Connect)
                        .with_target(MNS_TARGET_UUID.as_bytes())
                        .with_app_params(params.finish()),
                )?;
                Ok(session)
            });
        let Some(channel) = self.peers.get_mut(peer) else {
            return;
        };
        match opened {
            Ok(session) => {
                debug!("MNS session to {} opened over {:?}", peer, transport);
                channel.session = Some(session);
                channel.state = MnsState::Connecting;
            }
            Err(e) => {
                error!("Opening MNS session to {} failed: {}", peer, e);
                channel.state = MnsState::Disconnected;
                self.notify(MnsNotice::Disconnected {
                    peer: peer.to_string(),
                });
            }
        }
    }

    fn on_failed(&mut self, peer: &str, collision: bool) {
        let Some(channel) = self.peers.get_mut(peer) else {
            return;
        };
        channel.session = None;
        channel.connection_id = None;
        if collision && !channel.collision_retried && !channel.refs.is_empty() {
            channel.collision_retried = true;
            warn!("MNS connection collision with {}, retrying once", peer);
            let transport = channel.transport;
            match transport {
                Some(transport) => {
                    channel.state = MnsState::Connecting;
                    self.open_session(peer, transport);
                }
                None => {
                    channel.state = MnsState::SdpSearching;
                    self.sdp.search_mns(peer, self.events_tx.clone());
                }
            }
            return;
        }
        warn!("MNS connection to {} failed", peer);
        channel.state = MnsState::Disconnected;
        self.notify(MnsNotice::Disconnected {
            peer: peer.to_string(),
        });
    }

    fn notify(&mut self, notice: MnsNotice) {
        self.observers.retain(|tx| tx.send(notice.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeSdp {
        searches: Mutex<Vec<String>>,
    }

    impl SdpSearch for FakeSdp {
        fn search_mns(&self, peer: &str, _reply: mpsc::UnboundedSender<MnsTransportEvent>) {
            self.searches.lock().push(peer.to_string());
        }
    }

    #[derive(Default)]
    struct Log {
        connects: Vec<ObexRequest>,
        puts: Vec<ObexRequest>,
        disconnects: usize,
        opens: usize,
    }

    #[derive(Default)]
    struct FakeConnector {
        log: Arc<Mutex<Log>>,
    }

    struct FakeSession {
        log: Arc<Mutex<Log>>,
    }

    impl ObexConnector for FakeConnector {
        fn open(
            &self,
            _peer: &str,
            _transport: MnsTransport,
            _events: mpsc::UnboundedSender<MnsTransportEvent>,
        ) -> MapResult<Box<dyn ObexClientSession>> {
            self.log.lock().opens += 1;
            Ok(Box::new(FakeSession {
                log: self.log.clone(),
            }))
        }
    }

    impl ObexClientSession for FakeSession {
        fn connect(&mut self, request: ObexRequest) -> MapResult<()> {
            self.log.lock().connects.push(request);
            Ok(())
        }

        fn put(&mut self, request: ObexRequest) -> MapResult<()> {
            self.log.lock().puts.push(request);
            Ok(())
        }

        fn disconnect(&mut self) -> MapResult<()> {
            self.log.lock().disconnects += 1;
            Ok(())
        }
    }

    const PEER: &str = "00:11:22:33:44:55";

    fn record() -> MnsRecord {
        MnsRecord {
            transport: MnsTransport::L2cap(0x1005),
            supported_features: 0x7F,
        }
    }

    fn client() -> (MnsClient, Arc<FakeSdp>, Arc<Mutex<Log>>) {
        let sdp = Arc::new(FakeSdp::default());
        let connector = FakeConnector::default();
        let log = connector.log.clone();
        let (client, _rx) = MnsClient::new(0x7FFFFF, sdp.clone(), Arc::new(connector));
        (client, sdp, log)
    }

    fn connected() -> (MnsClient, Arc<FakeSdp>, Arc<Mutex<Log>>) {
        let (mut client, sdp, log) = client();
        client.connect(PEER, 0);
        client.handle_transport_event(MnsTransportEvent::SdpComplete {
            peer: PEER.into(),
            record: Some(record()),
        });
        client.handle_transport_event(MnsTransportEvent::Connected {
            peer: PEER.into(),
            connection_id: 7,
        });
        (client, sdp, log)
    }

    #[test]
    fn test_first_reference_starts_sdp() {
        let (mut client, sdp, _) = client();
        client.connect(PEER, 0);
        client.connect(PEER, 1);
        assert_eq!(sdp.searches.lock().len(), 1);
        assert_eq!(client.state(PEER), MnsState::SdpSearching);
        assert_eq!(client.ref_count(PEER), 2);
    }

    #[test]
    fn test_connect_flow() {
        let (client, _, log) = connected();
        assert_eq!(client.state(PEER), MnsState::Connected);
        assert_eq!(client.remote_features(PEER), Some(0x7F));
        let log = log.lock();
        assert_eq!(log.connects.len(), 1);
        assert_eq!(
            log.connects[0].headers.target.as_deref(),
            Some(&MNS_TARGET_UUID.as_bytes()[..])
        );
    }

    #[test]
    fn test_send_requires_connection() {
        let (mut client, _, _) = client();
        assert!(matches!(
            client.send_event(PEER, b"<x/>".to_vec(), 0),
            Err(MapError::NotConnected(_))
        ));
        client.connect(PEER, 0);
        assert!(matches!(
            client.send_event(PEER, b"<x/>".to_vec(), 0),
            Err(MapError::NotConnected(_))
        ));
    }

    #[test]
    fn test_send_event() {
        let (mut client, _, log) = connected();
        client.send_event(PEER, b"<report/>".to_vec(), 3).unwrap();
        let log = log.lock();
        let put = &log.puts[0];
        assert_eq!(put.headers.type_.as_deref(), Some(types::EVENT_REPORT));
        assert_eq!(put.headers.connection_id, Some(7));
        assert_eq!(put.headers.app_params.as_deref(), Some(&[0x0F, 0x01, 0x03][..]));
    }

    #[test]
    fn test_last_reference_closes() {
        let (mut client, _, log) = connected();
        client.connect(PEER, 1);
        client.disconnect(PEER, 0);
        assert_eq!(client.state(PEER), MnsState::Connected);
        client.disconnect(PEER, 1);
        assert_eq!(client.state(PEER), MnsState::Disconnected);
        assert_eq!(log.lock().disconnects, 1);
    }

    #[test]
    fn test_collision_retries_once() {
        let (mut client, _, log) = client();
        let mut notices = client.subscribe();
        client.connect(PEER, 0);
        client.handle_transport_event(MnsTransportEvent::SdpComplete {
            peer: PEER.into(),
            record: Some(record()),
        });
        client.handle_transport_event(MnsTransportEvent::Failed {
            peer: PEER.into(),
            collision: true,
        });
        assert_eq!(client.state(PEER), MnsState::Connecting);
        assert_eq!(log.lock().opens, 2);
        assert!(notices.try_recv().is_err());

        client.handle_transport_event(MnsTransportEvent::Failed {
            peer: PEER.into(),
            collision: true,
        });
        assert_eq!(client.state(PEER), MnsState::Disconnected);
        assert_eq!(
            notices.try_recv().ok(),
            Some(MnsNotice::Disconnected { peer: PEER.into() })
        );
    }

    #[test]
    fn test_missing_record_notifies() {
        let (mut client, _, _) = client();
        let mut notices = client.subscribe();
        client.connect(PEER, 0);
        client.handle_transport_event(MnsTransportEvent::SdpComplete {
            peer: PEER.into(),
            record: None,
        });
        assert_eq!(client.state(PEER), MnsState::Disconnected);
        assert!(notices.try_recv().is_ok());
    }
}

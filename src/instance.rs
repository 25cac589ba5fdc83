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

//! Per-instance dispatcher tasks.
//!
//! Each MAS instance is owned by one task; everything that touches its
//! sessions goes through the instance queue.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MapError, MapResult};
use crate::event::EventInfo;
use crate::mns::{MnsClient, MnsTransportEvent};
use crate::obex::{ObexRequest, ObexResponse};
use crate::server::MasServer;

const QUEUE_DEPTH: usize = 32;

/// Work posted to an instance task.
#[derive(Debug)]
pub enum InstanceMessage {
    /// An OBEX request; the response is sent on `reply`.
    Request {
        peer: String,
        request: ObexRequest,
        reply: oneshot::Sender<ObexResponse>,
    },
    TransportLost {
        peer: String,
    },
    /// A change reported by the message store observer.
    StoreEvent(EventInfo),
    StoreReset,
    /// Peer's MAS features learned from SDP.
    RemoteFeatures {
        peer: String,
        features: u32,
    },
    Shutdown,
}

/// Sending side of an instance queue.
#[derive(Debug, Clone)]
pub struct InstanceHandle {
    mas_id: u8,
    tx: mpsc::Sender<InstanceMessage>,
}

impl InstanceHandle {
    pub fn mas_id(&self) -> u8 {
        self.mas_id
    }

    pub async fn send(&self, message: InstanceMessage) -> MapResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| MapError::ServiceUnavailable(format!("MAS {} stopped", self.mas_id)))
    }

    /// Dispatch a request and wait for its response.
    pub async fn request(&self, peer: &str, request: ObexRequest) -> MapResult<ObexResponse> {
        let (reply, response) = oneshot::channel();
        self.send(InstanceMessage::Request {
            peer: peer.to_string(),
            request,
            reply,
        })
        .await?;
        response
            .await
            .map_err(|_| MapError::ServiceUnavailable(format!("MAS {} dropped request", self.mas_id)))
    }
}

fn dispatch(server: &mut MasServer, message: InstanceMessage) {
    match message {
        InstanceMessage::Request {
            peer,
            request,
            reply,
        } => {
            let response = server.handle_request(&peer, request);
            if reply.send(response).is_err() {
                warn!("[MAS {}] {} went away before its response", server.mas_id(), peer);
            }
        }
        InstanceMessage::TransportLost { peer } => server.transport_lost(&peer),
        InstanceMessage::StoreEvent(event) => {
            let sent = server.notify_event(&event);
            debug!(
                "[MAS {}] {} reported to {} peers",
                server.mas_id(),
                event.kind.as_str(),
                sent
            );
        }
        InstanceMessage::StoreReset => server.store_reset(),
        InstanceMessage::RemoteFeatures { peer, features } => {
            server.set_remote_features(&peer, features)
        }
        InstanceMessage::Shutdown => {}
    }
}

/// Run `server` on its own task.
pub fn spawn_instance(mut server: MasServer) -> (InstanceHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(QUEUE_DEPTH);
    let mut notices = server.subscribe_mns();
    let mas_id = server.mas_id();

    let task = tokio::spawn(async move {
        info!("[MAS {}] Dispatcher started", mas_id);
        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(InstanceMessage::Shutdown) | None => break,
                    Some(message) => dispatch(&mut server, message),
                },
                Some(notice) = notices.recv() => server.on_mns_notice(&notice),
            }
        }
        info!("[MAS {}] Dispatcher stopped", mas_id);
    });

    (InstanceHandle { mas_id, tx }, task)
}

/// Apply MNS transport completions as they arrive.
pub fn spawn_mns_pump(
    client: Arc<Mutex<MnsClient>>,
    mut events: mpsc::UnboundedReceiver<MnsTransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            client.lock().handle_transport_event(event);
        }
        debug!("MNS event queue closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccountKind, InstanceConfig};
    use crate::mns::{MnsNotice, MnsState, MnsTransport, ObexClientSession, ObexConnector, SdpSearch};
    use crate::obex::constants::{features, MAS_TARGET_UUID};
    use crate::obex::{Opcode, ResponseCode};
    use crate::service::LoggingService;
    use crate::store::SqliteStore;

    struct NoSdp;

    impl SdpSearch for NoSdp {
        fn search_mns(&self, _peer: &str, _reply: mpsc::UnboundedSender<MnsTransportEvent>) {}
    }

    struct NoObex;

    impl ObexConnector for NoObex {
        fn open(
            &self,
            _peer: &str,
            _transport: MnsTransport,
            _events: mpsc::UnboundedSender<MnsTransportEvent>,
        ) -> MapResult<Box<dyn ObexClientSession>> {
            Err(MapError::Transport("no transport".into()))
        }
    }

    fn spawn() -> (InstanceHandle, JoinHandle<()>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let (client, _events) = MnsClient::new(features::ALL_SUPPORTED, Arc::new(NoSdp), Arc::new(NoObex));
        let server = MasServer::new(
            InstanceConfig::new(0, "SMS/MMS", AccountKind::SmsMms),
            store,
            Arc::new(LoggingService),
            Arc::new(Mutex::new(client)),
        )
        .unwrap();
        spawn_instance(server)
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let (handle, task) = spawn();
        let response = handle
            .request(
                "peer",
                ObexRequest::new(Opcode::Connect).with_target(MAS_TARGET_UUID.as_bytes()),
            )
            .await
            .unwrap();
        assert_eq!(response.code, ResponseCode::Success);

        handle.send(InstanceMessage::Shutdown).await.unwrap();
        task.await.unwrap();
        assert!(handle
            .request("peer", ObexRequest::new(Opcode::Disconnect))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_transport_loss_ends_session() {
        let (handle, _task) = spawn();
        handle
            .request(
                "peer",
                ObexRequest::new(Opcode::Connect).with_target(MAS_TARGET_UUID.as_bytes()),
            )
            .await
            .unwrap();
        handle
            .send(InstanceMessage::TransportLost {
                peer: "peer".into(),
            })
            .await
            .unwrap();
        let response = handle
            .request("peer", ObexRequest::new(Opcode::SetPath))
            .await
            .unwrap();
        assert_eq!(response.code, ResponseCode::BadRequest);
    }

    #[tokio::test]
    async fn test_mns_pump_applies_events() {
        let (client, events) = MnsClient::new(features::ALL_SUPPORTED, Arc::new(NoSdp), Arc::new(NoObex));
        let client = Arc::new(Mutex::new(client));
        let (sender, mut notices) = {
            let mut c = client.lock();
            c.connect("peer", 0);
            (c.event_sender(), c.subscribe())
        };
        let _pump = spawn_mns_pump(client.clone(), events);

        sender
            .send(MnsTransportEvent::SdpComplete {
                peer: "peer".into(),
                record: None,
            })
            .unwrap();
        assert_eq!(
            notices.recv().await,
            Some(MnsNotice::Disconnected {
                peer: "peer".into()
            })
        );
        assert_eq!(client.lock().state("peer"), MnsState::Disconnected);
    }
}

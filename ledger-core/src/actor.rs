//! Actor-based front end for the local peer
//!
//! Proposals from any number of clients are funnelled through one Tokio task
//! that owns the [`Network`], so invocations execute and commit one at a time
//! in arrival order.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                PeerHandle (Clone)                     │
//! │         Sends proposals to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               PeerActor (Single Task)                 │
//! │                       │                               │
//! │                       ▼                               │
//! │               Network::submit()                       │
//! │     (execute chaincode, commit write set)             │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::host::{InvocationResult, Network, Proposal};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Message sent to the peer actor
#[derive(Debug)]
pub enum PeerMessage {
    /// Execute a proposal
    Submit {
        /// Proposal to execute
        proposal: Proposal,
        /// Reply channel
        response: oneshot::Sender<Result<InvocationResult>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that executes proposals
#[derive(Debug)]
pub struct PeerActor {
    /// Hosted channels
    network: Arc<Network>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<PeerMessage>,
}

impl PeerActor {
    /// Create new actor
    pub fn new(network: Arc<Network>, mailbox: mpsc::Receiver<PeerMessage>) -> Self {
        Self { network, mailbox }
    }

    /// Run the actor event loop until shutdown or all handles are dropped
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                PeerMessage::Submit { proposal, response } => {
                    let result = self.network.submit(proposal);
                    if let Err(e) = &result {
                        tracing::error!("Error handling proposal: {}", e);
                    }
                    let _ = response.send(result);
                }
                PeerMessage::Shutdown => break,
            }
        }
        tracing::info!("Peer actor stopped");
    }
}

/// Handle for sending proposals to the actor
#[derive(Clone, Debug)]
pub struct PeerHandle {
    sender: mpsc::Sender<PeerMessage>,
}

impl PeerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<PeerMessage>) -> Self {
        Self { sender }
    }

    /// Execute a proposal
    pub async fn submit(&self, proposal: Proposal) -> Result<InvocationResult> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PeerMessage::Submit {
                proposal,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(PeerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))
    }
}

/// Spawn the peer actor and return a handle
pub fn spawn_peer_actor(network: Arc<Network>, mailbox_capacity: usize) -> PeerHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let actor = PeerActor::new(network, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    PeerHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Chaincode, Response, Stub};
    use crate::storage::MemoryStore;
    use crate::types::{Channel, Principal};

    struct Echo;

    impl Chaincode for Echo {
        fn invoke(&self, stub: &mut Stub<'_>, function: &str, _args: &[String]) -> Response {
            match stub.state_mut().put("last", function.as_bytes().to_vec()) {
                Ok(()) => Response::ok(function.as_bytes().to_vec()),
                Err(e) => Response::error(e.kind(), e),
            }
        }
    }

    fn network() -> Arc<Network> {
        let network = Network::new().unwrap();
        let channel = Channel::new("main");
        network
            .add_channel(channel.clone(), Arc::new(MemoryStore::new()))
            .unwrap();
        network.install(&channel, "echo", Arc::new(Echo)).unwrap();
        Arc::new(network)
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let handle = spawn_peer_actor(network(), 8);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_submit() {
        let network = network();
        let handle = spawn_peer_actor(Arc::clone(&network), 8);

        let proposal = Proposal::new(
            Channel::new("main"),
            "echo",
            Principal::new("alice"),
            "hello",
            vec![],
        );
        let result = handle.submit(proposal).await.unwrap();
        assert_eq!(result.response.payload, b"hello".to_vec());

        let store = network.store(&Channel::new("main")).unwrap();
        assert_eq!(store.get("last").unwrap(), Some(b"hello".to_vec()));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let handle = spawn_peer_actor(network(), 8);
        handle.shutdown().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let proposal = Proposal::new(
            Channel::new("main"),
            "echo",
            Principal::new("alice"),
            "late",
            vec![],
        );
        assert!(matches!(
            handle.submit(proposal).await,
            Err(Error::Concurrency(_))
        ));
    }
}

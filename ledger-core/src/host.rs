//! Local host runtime
//!
//! A [`Network`] hosts channels, each with its own [`StateStore`] and a set of
//! installed [`Chaincode`]s. Submitting a [`Proposal`] runs the chaincode
//! against a fresh [`Stub`] and, if the response is `OK`, commits the
//! invocation's write set. A failed response discards every write.
//!
//! # Cross-channel calls
//!
//! A chaincode may call another chaincode on a different channel through
//! [`Stub::invoke_chaincode`]. The callee shares the caller's identity,
//! timestamp and transaction ID; its writes are committed together with the
//! outer invocation, and a failed commit on any channel restores the others.
//! Calls nest one level deep.

use crate::error::{Error, ErrorKind, Result};
use crate::metrics::Metrics;
use crate::state::StateTx;
use crate::storage::{open_store, StateStore, WriteSet};
use crate::types::{Channel, Principal};
use crate::Config;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Outcome flag of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Committed
    Ok,
    /// Rejected, nothing written
    Error,
}

impl Status {
    /// Label used in responses and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Error => "ERROR",
        }
    }
}

/// Chaincode response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Outcome
    pub status: Status,
    /// `<Kind>: <detail>` on error, empty on success
    pub message: String,
    /// Result bytes (JSON for every function of this workspace)
    pub payload: Vec<u8>,
}

impl Response {
    /// Successful response
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            status: Status::Ok,
            message: String::new(),
            payload,
        }
    }

    /// Successful response with a JSON payload
    pub fn ok_json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(payload) => Self::ok(payload),
            Err(e) => Self::error(ErrorKind::Host, e),
        }
    }

    /// Error response tagged with a stable kind
    pub fn error(kind: ErrorKind, detail: impl fmt::Display) -> Self {
        Self {
            status: Status::Error,
            message: format!("{}: {}", kind, detail),
            payload: Vec::new(),
        }
    }

    /// True on `OK`
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Tag of an error response
    pub fn kind(&self) -> Option<&str> {
        match self.status {
            Status::Ok => None,
            Status::Error => self.message.split(':').next(),
        }
    }

    /// Decode the JSON payload
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Named event emitted by a committed invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractEvent {
    /// Event name
    pub name: String,
    /// Event payload
    pub payload: Vec<u8>,
}

/// Invocation request as seen by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Target channel
    pub channel: Channel,
    /// Target chaincode
    pub chaincode: String,
    /// Invoking principal
    pub caller: Principal,
    /// Transaction timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Function name
    pub function: String,
    /// String arguments
    #[serde(default)]
    pub args: Vec<String>,
}

impl Proposal {
    /// Proposal stamped with the current time
    pub fn new(
        channel: Channel,
        chaincode: impl Into<String>,
        caller: Principal,
        function: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            channel,
            chaincode: chaincode.into(),
            caller,
            timestamp: Utc::now(),
            function: function.into(),
            args,
        }
    }

    /// Override the timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// What the host returns for a submitted proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    /// Host transaction ID (UUIDv7)
    pub tx_id: String,
    /// Chaincode response
    pub response: Response,
    /// Event of a committed invocation
    pub event: Option<ContractEvent>,
}

/// A smart contract plugged into the host
pub trait Chaincode: Send + Sync {
    /// Handle one invocation
    fn invoke(&self, stub: &mut Stub<'_>, function: &str, args: &[String]) -> Response;
}

/// Invocation context handed to a chaincode
pub struct Stub<'a> {
    network: &'a Network,
    channel: Channel,
    caller: Principal,
    timestamp: DateTime<Utc>,
    tx_id: String,
    depth: usize,
    state: StateTx<'a>,
    nested: BTreeMap<Channel, WriteSet>,
    event: Option<ContractEvent>,
}

impl fmt::Debug for Stub<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub")
            .field("channel", &self.channel)
            .field("caller", &self.caller)
            .field("tx_id", &self.tx_id)
            .finish()
    }
}

impl<'a> Stub<'a> {
    /// Invoking principal
    pub fn caller(&self) -> &Principal {
        &self.caller
    }

    /// Channel the invocation runs on
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Transaction timestamp
    pub fn now(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Host transaction ID
    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    /// Read view of the channel state
    pub fn state(&self) -> &StateTx<'a> {
        &self.state
    }

    /// Read-write view of the channel state
    pub fn state_mut(&mut self) -> &mut StateTx<'a> {
        &mut self.state
    }

    /// Set the invocation's event, replacing any earlier one
    pub fn set_event(&mut self, name: impl Into<String>, payload: Vec<u8>) {
        self.event = Some(ContractEvent {
            name: name.into(),
            payload,
        });
    }

    /// Call a chaincode on another channel
    pub fn invoke_chaincode(
        &mut self,
        channel: &Channel,
        chaincode: &str,
        function: &str,
        args: &[String],
    ) -> Result<Response> {
        if channel == &self.channel {
            return Err(Error::InvalidArgument(format!(
                "chaincode calls within channel {} are not supported",
                channel
            )));
        }
        if self.depth > 0 {
            return Err(Error::InvalidArgument(
                "cross-channel calls nest one level deep".to_string(),
            ));
        }

        let (store, target) = self.network.resolve(channel, chaincode)?;
        let seed = self.nested.remove(channel).unwrap_or_default();

        let mut callee = Stub {
            network: self.network,
            channel: channel.clone(),
            caller: self.caller.clone(),
            timestamp: self.timestamp,
            tx_id: self.tx_id.clone(),
            depth: self.depth + 1,
            state: StateTx::with_writes(store.as_ref(), seed.clone()),
            nested: BTreeMap::new(),
            event: None,
        };

        let response = target.invoke(&mut callee, function, args);
        let writes = if response.is_ok() {
            callee.state.into_write_set()
        } else {
            seed
        };
        if !writes.is_empty() {
            self.nested.insert(channel.clone(), writes);
        }

        tracing::debug!(
            tx_id = %self.tx_id,
            channel = %channel,
            chaincode,
            function,
            status = response.status.as_str(),
            "Cross-channel call"
        );
        Ok(response)
    }
}

struct ChannelState {
    store: Arc<dyn StateStore>,
    chaincodes: BTreeMap<String, Arc<dyn Chaincode>>,
}

/// Channels, their stores and installed chaincodes
pub struct Network {
    channels: RwLock<BTreeMap<Channel, ChannelState>>,
    /// Single writer: one invocation executes and commits at a time
    commit_lock: Mutex<()>,
    metrics: Metrics,
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("channels", &self.channels.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Network {
    /// Empty network
    pub fn new() -> Result<Self> {
        let metrics = Metrics::new().map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self {
            channels: RwLock::new(BTreeMap::new()),
            commit_lock: Mutex::new(()),
            metrics,
        })
    }

    /// Network with one store per configured channel
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let network = Self::new()?;
        for channel in &config.channels {
            network.add_channel(channel.clone(), open_store(config, channel)?)?;
        }
        tracing::info!(
            service = %config.service_name,
            channels = config.channels.len(),
            "Network initialized"
        );
        Ok(network)
    }

    /// Register a channel backed by `store`
    pub fn add_channel(&self, channel: Channel, store: Arc<dyn StateStore>) -> Result<()> {
        let mut channels = self.channels.write();
        if channels.contains_key(&channel) {
            return Err(Error::AlreadyExists(format!("channel {}", channel)));
        }
        channels.insert(
            channel,
            ChannelState {
                store,
                chaincodes: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Install a chaincode on a channel
    pub fn install(
        &self,
        channel: &Channel,
        name: impl Into<String>,
        chaincode: Arc<dyn Chaincode>,
    ) -> Result<()> {
        let name = name.into();
        let mut channels = self.channels.write();
        let state = channels
            .get_mut(channel)
            .ok_or_else(|| Error::NotFound(format!("channel {}", channel)))?;
        tracing::info!(channel = %channel, chaincode = %name, "Chaincode installed");
        state.chaincodes.insert(name, chaincode);
        Ok(())
    }

    /// Committed store of a channel
    pub fn store(&self, channel: &Channel) -> Result<Arc<dyn StateStore>> {
        self.channels
            .read()
            .get(channel)
            .map(|c| Arc::clone(&c.store))
            .ok_or_else(|| Error::NotFound(format!("channel {}", channel)))
    }

    /// Metrics of this network
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn resolve(
        &self,
        channel: &Channel,
        chaincode: &str,
    ) -> Result<(Arc<dyn StateStore>, Arc<dyn Chaincode>)> {
        let channels = self.channels.read();
        let state = channels
            .get(channel)
            .ok_or_else(|| Error::NotFound(format!("channel {}", channel)))?;
        let target = state.chaincodes.get(chaincode).ok_or_else(|| {
            Error::NotFound(format!("chaincode {} on channel {}", chaincode, channel))
        })?;
        Ok((Arc::clone(&state.store), Arc::clone(target)))
    }

    /// Commit the write sets of one invocation, outer channel first.
    ///
    /// Channels have separate stores, so a commit failing part-way restores
    /// the channels already committed to their previous values before the
    /// error is returned.
    fn commit_all(
        &self,
        tx_id: &str,
        timestamp: DateTime<Utc>,
        sets: &[(Channel, Arc<dyn StateStore>, WriteSet)],
    ) -> Result<usize> {
        let mut undo = Vec::with_capacity(sets.len());
        for (_, store, writes) in sets {
            let mut previous = WriteSet::new();
            for key in writes.keys() {
                previous.insert(key.clone(), store.get(key)?);
            }
            undo.push(previous);
        }

        let mut written = 0;
        for (i, (channel, store, writes)) in sets.iter().enumerate() {
            if let Err(e) = store.commit(tx_id, timestamp, writes) {
                tracing::error!(tx_id, channel = %channel, error = %e, "Commit failed, restoring earlier channels");
                for ((restored, store, _), previous) in sets[..i].iter().zip(&undo) {
                    if let Err(undo_err) = store.commit(tx_id, timestamp, previous) {
                        tracing::error!(tx_id, channel = %restored, error = %undo_err, "Restore failed");
                    }
                }
                return Err(e);
            }
            written += writes.len();
        }
        Ok(written)
    }

    /// Execute a proposal and commit its writes if it succeeds
    pub fn submit(&self, proposal: Proposal) -> Result<InvocationResult> {
        let (store, target) = self.resolve(&proposal.channel, &proposal.chaincode)?;
        let _writer = self.commit_lock.lock();
        let started = Instant::now();
        let tx_id = Uuid::now_v7().to_string();

        let mut stub = Stub {
            network: self,
            channel: proposal.channel.clone(),
            caller: proposal.caller.clone(),
            timestamp: proposal.timestamp,
            tx_id: tx_id.clone(),
            depth: 0,
            state: StateTx::new(store.as_ref()),
            nested: BTreeMap::new(),
            event: None,
        };

        let response = target.invoke(&mut stub, &proposal.function, &proposal.args);

        let event = if response.is_ok() {
            let Stub {
                state,
                nested,
                event,
                ..
            } = stub;
            let writes = state.into_write_set();
            let mut sets = vec![(proposal.channel.clone(), store, writes)];
            for (channel, writes) in nested {
                sets.push((channel.clone(), self.store(&channel)?, writes));
            }
            let written = self.commit_all(&tx_id, proposal.timestamp, &sets)?;
            self.metrics.record_writes(written);
            event
        } else {
            tracing::warn!(
                tx_id = %tx_id,
                function = %proposal.function,
                caller = %proposal.caller,
                message = %response.message,
                "Invocation rejected"
            );
            None
        };

        self.metrics.record_invocation(
            &proposal.function,
            response.status.as_str(),
            started.elapsed().as_secs_f64(),
        );

        Ok(InvocationResult {
            tx_id,
            response,
            event,
        })
    }
}

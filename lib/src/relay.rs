// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Pairing relay channel
//!
//! The verification app and the host exchange small payloads through a
//! relay server, addressed by the channel ID of a
//! [PairingIdentity][dbb_core::pairing::PairingIdentity]. Payloads are
//! sealed with the pairing key and base64 encoded for carriage.
//!
//! [RelayChannel::start_long_poll] runs a single background poll task
//! delivering decrypted payloads to a [PayloadHandler], while each
//! [RelayChannel::post] runs on a short lived task. Failed polls back off
//! exponentially, every task stops on [RelayChannel::shutdown].

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, RwLock,
    },
    time::Duration,
};

use base64::prelude::{Engine as _, BASE64_STANDARD};
use log::{debug, info, warn};
use tokio::{sync::watch, task::JoinHandle};

use dbb_core::pairing::{PairingIdentity, PairingKey};
use dbb_proto::relay::{RelayRequest, RelayResponse, RELAY_URL};

use crate::Error;

/// Receiver for payloads delivered over the relay
pub trait PayloadHandler: Send + Sync + 'static {
    /// Called once per decrypted payload
    fn on_payload(&self, payload: Vec<u8>);
}

impl<F: Fn(Vec<u8>) + Send + Sync + 'static> PayloadHandler for F {
    fn on_payload(&self, payload: Vec<u8>) {
        (self)(payload)
    }
}

/// Publish payloads into a channel
impl PayloadHandler for tokio::sync::mpsc::UnboundedSender<Vec<u8>> {
    fn on_payload(&self, payload: Vec<u8>) {
        if self.send(payload).is_err() {
            debug!("Relay payload receiver dropped");
        }
    }
}

/// Relay configuration
#[derive(Clone, Debug, PartialEq)]
pub struct RelayConfig {
    /// Relay server URL
    pub url: String,

    /// Per request timeout
    pub timeout: Duration,

    /// Delay between successful polls
    pub poll_interval: Duration,

    /// Initial delay after a failed poll
    pub backoff_min: Duration,

    /// Maximum delay between failed polls
    pub backoff_max: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: RELAY_URL.to_string(),
            timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(500),
            backoff_min: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// Channel ID and key for a pairing session
#[derive(Clone)]
struct Channel {
    id: String,
    key: PairingKey,
}

impl Channel {
    /// Decode and open a relay payload
    fn open(&self, payload: &str) -> Option<Vec<u8>> {
        let blob = match BASE64_STANDARD.decode(payload.as_bytes()) {
            Ok(v) => v,
            Err(e) => {
                warn!("Discarding relay payload with invalid base64: {}", e);
                return None;
            }
        };

        match self.key.open(&blob) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Discarding undecryptable relay payload: {}", e);
                None
            }
        }
    }
}

/// State shared with background tasks
struct Inner {
    client: reqwest::Client,
    config: RelayConfig,
    channel: RwLock<Option<Channel>>,
    poll_seq: AtomicU64,
    post_seq: AtomicU64,
}

/// Relay channel for a pairing session
pub struct RelayChannel {
    inner: Arc<Inner>,
    poll: Mutex<Option<JoinHandle<()>>>,
    posts: Mutex<Vec<JoinHandle<()>>>,
    cancel: watch::Sender<bool>,
}

impl RelayChannel {
    /// Create a relay channel with no pairing identity configured
    pub fn new(config: RelayConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("dbb/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        let (cancel, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                config,
                channel: RwLock::new(None),
                poll_seq: AtomicU64::new(0),
                post_seq: AtomicU64::new(0),
            }),
            poll: Mutex::new(None),
            posts: Mutex::new(vec![]),
            cancel,
        })
    }

    /// Configure the channel from a pairing identity
    pub fn with_identity(self, identity: &PairingIdentity) -> Self {
        self.set_channel(identity.channel_id(), identity.key().clone());
        self
    }

    /// Set the channel ID and key
    pub fn set_channel(&self, id: &str, key: PairingKey) {
        info!("Relay channel: {}", id);

        let mut c = self.inner.channel.write().unwrap_or_else(|e| e.into_inner());
        *c = Some(Channel {
            id: id.to_string(),
            key,
        });
    }

    /// Clear the channel, subsequent posts are rejected
    pub fn clear_channel(&self) {
        let mut c = self.inner.channel.write().unwrap_or_else(|e| e.into_inner());
        *c = None;
    }

    /// Fetch the configured channel ID
    pub fn channel_id(&self) -> Option<String> {
        self.inner.channel().map(|c| c.id)
    }

    /// Issue a single poll, returning the decrypted payloads
    pub async fn poll_once(&self) -> Result<Vec<Vec<u8>>, Error> {
        self.inner.poll_once().await
    }

    /// Post a payload and await the relay response
    pub async fn post_now(&self, payload: &[u8]) -> Result<(), Error> {
        self.inner.post(payload).await
    }

    /// Post a payload on a background task
    ///
    /// Returns false without making a request if no channel is configured
    /// or no runtime is available
    pub fn post(&self, payload: Vec<u8>) -> bool {
        if self.inner.channel().is_none() {
            debug!("Relay post without channel");
            return false;
        }

        let rt = match tokio::runtime::Handle::try_current() {
            Ok(v) => v,
            Err(_) => {
                warn!("Relay post requires a tokio runtime");
                return false;
            }
        };

        let mut posts = self.reap();

        let inner = self.inner.clone();
        let mut cancel = self.cancel.subscribe();

        posts.push(rt.spawn(async move {
            tokio::select! {
                r = inner.post(&payload) => if let Err(e) = r {
                    warn!("Relay post failed: {}", e);
                },
                _ = cancel.changed() => debug!("Relay post cancelled"),
            }
        }));

        true
    }

    /// Number of post tasks still running
    pub fn pending_posts(&self) -> usize {
        self.reap().len()
    }

    /// Start the background poll task, replacing any running poll
    pub fn start_long_poll(&self, handler: impl PayloadHandler) -> Result<(), Error> {
        if self.inner.channel().is_none() {
            return Err(Error::ChannelNotConfigured);
        }
        if *self.cancel.borrow() {
            return Err(Error::Cancelled);
        }

        let rt = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let inner = self.inner.clone();
        let cancel = self.cancel.subscribe();

        let h = rt.spawn(long_poll(inner, handler, cancel));

        if let Some(old) = lock(&self.poll).replace(h) {
            debug!("Replacing running relay poll");
            old.abort();
        }

        Ok(())
    }

    /// Check whether the poll task is running
    pub fn is_polling(&self) -> bool {
        lock(&self.poll)
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop background tasks, waiting for them to exit
    pub async fn shutdown(&self) {
        debug!("Relay shutdown");

        self.cancel.send_replace(true);

        let poll = lock(&self.poll).take();
        if let Some(h) = poll {
            let _ = h.await;
        }

        let posts: Vec<_> = lock(&self.posts).drain(..).collect();
        for h in posts {
            let _ = h.await;
        }
    }

    /// Prune finished post tasks
    fn reap(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        let mut posts = lock(&self.posts);
        posts.retain(|h| !h.is_finished());
        posts
    }
}

impl Drop for RelayChannel {
    fn drop(&mut self) {
        self.cancel.send_replace(true);
    }
}

impl Inner {
    fn channel(&self) -> Option<Channel> {
        self.channel
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn poll_once(&self) -> Result<Vec<Vec<u8>>, Error> {
        let c = self.channel().ok_or(Error::ChannelNotConfigured)?;
        let req = RelayRequest::get(&c.id, self.poll_seq.fetch_add(1, Ordering::SeqCst));

        debug!("Relay poll (seq: {})", req.s);

        let resp: RelayResponse = self
            .client
            .get(&self.config.url)
            .query(&req)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp.data.iter().filter_map(|m| c.open(&m.payload)).collect())
    }

    async fn post(&self, payload: &[u8]) -> Result<(), Error> {
        let c = self.channel().ok_or(Error::ChannelNotConfigured)?;

        let blob = c.key.seal(payload)?;
        let req = RelayRequest::post(
            &c.id,
            self.post_seq.fetch_add(1, Ordering::SeqCst),
            BASE64_STANDARD.encode(blob),
        );

        debug!("Relay post (seq: {})", req.s);

        let resp: RelayResponse = self
            .client
            .post(&self.config.url)
            .form(&req)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!("Relay post response: {} entries", resp.data.len());

        Ok(())
    }
}

/// Poll loop, exits on cancellation
async fn long_poll(
    inner: Arc<Inner>,
    handler: impl PayloadHandler,
    mut cancel: watch::Receiver<bool>,
) {
    let mut backoff = inner.config.backoff_min;

    debug!("Relay poll started");

    while !*cancel.borrow() {
        let r = tokio::select! {
            r = inner.poll_once() => r,
            _ = cancel.changed() => break,
        };

        let delay = match r {
            Ok(payloads) => {
                backoff = inner.config.backoff_min;
                for p in payloads {
                    handler.on_payload(p);
                }
                inner.config.poll_interval
            }
            Err(e) => {
                warn!("Relay poll failed: {} (retry in {:?})", e, backoff);
                let d = backoff;
                backoff = (backoff * 2).min(inner.config.backoff_max);
                d
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => (),
            _ = cancel.changed() => break,
        }
    }

    debug!("Relay poll stopped");
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

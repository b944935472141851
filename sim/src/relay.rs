// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Mock pairing relay server, served by [mockito]
//!
//! Relay requests are matched by closures over the shared channel state:
//! failures injected with [MockRelay::fail_next] answer `500`, malformed
//! requests to the relay path `400`, and anything else unmatched receives
//! mockito's default `501`.

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard},
};

use log::{debug, trace};
use mockito::{Matcher, Mock, Request, Server, ServerOpts};
use url::{form_urlencoded, Url};

use dbb_proto::relay::{RelayMessage, RelayRequest, RelayResponse};

/// Request path served by the mock relay
pub const RELAY_PATH: &str = "/smartverification/index.php";

#[derive(Default)]
struct RelayState {
    /// Payloads waiting for delivery to the host, per channel
    to_host: HashMap<String, VecDeque<String>>,
    /// Payloads posted by the host, per channel
    posted: HashMap<String, Vec<String>>,
    /// Decoded requests in receipt order
    requests: Vec<RelayRequest>,
    /// Number of upcoming requests to fail
    fail_next: usize,
}

type SharedState = Arc<Mutex<RelayState>>;

/// HTTP relay server for testing
pub struct MockRelay {
    server: Server,
    state: SharedState,
    _mocks: Vec<Mock>,
}

impl MockRelay {
    /// Start the relay on `127.0.0.1:port` (`0` for an ephemeral port)
    pub async fn start(port: u16) -> anyhow::Result<Self> {
        let mut server = Server::new_with_opts_async(ServerOpts {
            host: "127.0.0.1",
            port,
            ..Default::default()
        })
        .await;

        let state = SharedState::default();
        let mut mocks = Vec::new();

        for method in ["GET", "POST"] {
            // Injected failures
            let (s1, s2) = (state.clone(), state.clone());
            let m = server
                .mock(method, Matcher::Any)
                .match_request(move |_| lock(&s1).fail_next > 0)
                .with_status(500)
                .with_body_from_request(move |_| {
                    let mut s = lock(&s2);
                    s.fail_next = s.fail_next.saturating_sub(1);
                    vec![]
                })
                .create_async()
                .await;
            mocks.push(m);

            // Well formed relay requests
            let (s1, s2) = (state.clone(), state.clone());
            let m = server
                .mock(method, Matcher::Any)
                .match_request(move |r| lock(&s1).fail_next == 0 && decode(r).is_some())
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body_from_request(move |r| match decode(r) {
                    Some(req) => {
                        let resp = respond(&mut lock(&s2), req);
                        serde_json::to_vec(&resp).unwrap_or_default()
                    }
                    None => vec![],
                })
                .create_async()
                .await;
            mocks.push(m);

            // Malformed requests to the relay path
            let s1 = state.clone();
            let m = server
                .mock(method, Matcher::Any)
                .match_request(move |r| {
                    lock(&s1).fail_next == 0
                        && is_relay_path(r.path_and_query())
                        && decode(r).is_none()
                })
                .with_status(400)
                .create_async()
                .await;
            mocks.push(m);
        }

        debug!("Relay listening on {}", server.socket_address());

        Ok(Self {
            server,
            state,
            _mocks: mocks,
        })
    }

    /// Relay URL for clients
    pub fn url(&self) -> String {
        format!("{}{}", self.server.url(), RELAY_PATH)
    }

    /// Socket address of the relay
    pub fn addr(&self) -> SocketAddr {
        self.server.socket_address()
    }

    /// Queue a (base64 encoded) payload for delivery to the host
    pub fn push(&self, channel: &str, payload: impl Into<String>) {
        self.state()
            .to_host
            .entry(channel.to_string())
            .or_default()
            .push_back(payload.into());
    }

    /// Fetch payloads posted by the host on a channel
    pub fn posted(&self, channel: &str) -> Vec<String> {
        self.state()
            .posted
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Fetch the decoded request log
    pub fn requests(&self) -> Vec<RelayRequest> {
        self.state().requests.clone()
    }

    /// Count poll requests received for a channel
    pub fn polls(&self, channel: &str) -> usize {
        self.state()
            .requests
            .iter()
            .filter(|r| !r.is_post() && r.uuid == channel)
            .count()
    }

    /// Respond to the next `n` requests with an internal server error
    pub fn fail_next(&self, n: usize) {
        self.state().fail_next = n;
    }

    fn state(&self) -> MutexGuard<'_, RelayState> {
        lock(&self.state)
    }
}

fn lock(m: &Mutex<RelayState>) -> MutexGuard<'_, RelayState> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Decode a relay request from a mockito request
fn decode(r: &Request) -> Option<RelayRequest> {
    let body = r.body().ok()?;
    parse(r.method(), r.path_and_query(), body)
}

fn is_relay_path(path_and_query: &str) -> bool {
    path_and_query.split('?').next() == Some(RELAY_PATH)
}

/// Parse a relay request, polls carry parameters in the query and posts in
/// a form body. Posts without a payload are rejected.
fn parse(method: &str, path_and_query: &str, body: &[u8]) -> Option<RelayRequest> {
    if !is_relay_path(path_and_query) {
        return None;
    }
    let url = Url::parse("http://localhost").ok()?.join(path_and_query).ok()?;

    let req = match method {
        "GET" => RelayRequest::from_pairs(url.query_pairs()),
        "POST" => RelayRequest::from_pairs(form_urlencoded::parse(body)),
        _ => None,
    }?;

    match (req.is_post(), &req.pl) {
        (true, None) => None,
        _ => Some(req),
    }
}

/// Record a request and build the response
fn respond(s: &mut RelayState, req: RelayRequest) -> RelayResponse {
    trace!("Relay request: {:?}", req);
    s.requests.push(req.clone());

    match (req.is_post(), req.pl) {
        (true, Some(pl)) => {
            s.posted.entry(req.uuid).or_default().push(pl);
            RelayResponse::default()
        }
        _ => {
            let data = s
                .to_host
                .get_mut(&req.uuid)
                .map(|q| q.drain(..).map(|payload| RelayMessage { payload }).collect())
                .unwrap_or_default();
            RelayResponse { data }
        }
    }
}

// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Pairing relay wire format
//!
//! Requests carry `c` (action), `uuid` (channel ID), `dt` (always `0`),
//! `s` (per-direction sequence number) and, for posts, `pl` (base64 payload).
//! Polls are sent as `GET` query parameters, posts as `POST` form bodies.
//! Both return `{"data":[{"payload":"<base64>"}, ...]}`.

use serde::{Deserialize, Serialize};

/// Default relay server URL
pub const RELAY_URL: &str = "https://digitalbitbox.com/smartverification/index.php";

/// Relay action for fetching pending payloads
pub const ACTION_GET: &str = "gd";

/// Relay action for posting a payload
pub const ACTION_POST: &str = "data";

/// Relay request parameters
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct RelayRequest {
    /// Action (`gd` or `data`)
    pub c: String,
    /// Channel ID
    pub uuid: String,
    /// Reserved, always zero
    pub dt: u8,
    /// Sequence number
    pub s: u64,
    /// Base64 payload (posts only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pl: Option<String>,
}

impl RelayRequest {
    /// Build a poll request
    pub fn get(channel_id: &str, seq: u64) -> Self {
        Self {
            c: ACTION_GET.to_string(),
            uuid: channel_id.to_string(),
            dt: 0,
            s: seq,
            pl: None,
        }
    }

    /// Build a post request
    pub fn post(channel_id: &str, seq: u64, payload: String) -> Self {
        Self {
            c: ACTION_POST.to_string(),
            uuid: channel_id.to_string(),
            dt: 0,
            s: seq,
            pl: Some(payload),
        }
    }

    /// Rebuild a request from decoded key / value pairs (query or form body)
    pub fn from_pairs<I, K, V>(pairs: I) -> Option<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let (mut c, mut uuid, mut dt, mut s, mut pl) = (None, None, 0, None, None);

        for (k, v) in pairs {
            let v = v.as_ref();
            match k.as_ref() {
                "c" => c = Some(v.to_string()),
                "uuid" => uuid = Some(v.to_string()),
                "dt" => dt = v.parse().ok()?,
                "s" => s = v.parse().ok(),
                "pl" => pl = Some(v.to_string()),
                _ => (),
            }
        }

        Some(Self {
            c: c?,
            uuid: uuid?,
            dt,
            s: s?,
            pl,
        })
    }

    /// Check whether this is a post request
    pub fn is_post(&self) -> bool {
        self.c == ACTION_POST
    }
}

/// Relay response
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct RelayResponse {
    #[serde(default)]
    pub data: Vec<RelayMessage>,
}

/// Relay message entry
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Base64 encoded payload
    pub payload: String,
}

//! Wire models for the bridge's local HTTP API (the v1 JSON surface).
//!
//! Mutating endpoints wrap their replies in a one-element array of
//! `{"success": ...}` / `{"error": ...}` objects; the lights endpoint returns
//! a plain map keyed by the bridge-local light index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One element of the array envelope used by the pairing and state-change
/// endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiReply<T> {
    Success(T),
    Error(ApiError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub kind: u32,
    pub address: String,
    pub description: String,
}

pub mod error_codes {
    /// Token unknown to the bridge (revoked or never issued).
    pub const UNAUTHORIZED_USER: u32 = 1;
    /// Pairing attempted without the physical link button pressed.
    pub const LINK_BUTTON_NOT_PRESSED: u32 = 101;
}

impl ApiError {
    /// Both pairing refusal and a revoked token mean the same thing to the
    /// caller: no valid registration with this bridge.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self.kind,
            error_codes::UNAUTHORIZED_USER | error_codes::LINK_BUTTON_NOT_PRESSED
        )
    }
}

/// Payload POSTed to `/api` to request a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub devicetype: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterSuccess {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightState {
    pub on: bool,
    pub reachable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bri: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hue: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sat: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ct: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xy: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colormode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// A light as listed by the bridge. `uniqueid` is the stable vendor
/// identifier (MAC-derived); older firmware can omit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Light {
    pub name: String,
    pub state: LightState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniqueid: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub light_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modelid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturername: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swversion: Option<String>,
}

/// Reply of the lights endpoint, keyed by bridge-local light index ("1", "2", ...).
pub type LightsMap = BTreeMap<String, Light>;

/// Body PUT to a light's state endpoint. Only the fields present are changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightStateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bri: Option<u32>,
}

impl LightStateUpdate {
    pub fn on(on: bool) -> Self {
        Self { on: Some(on), bri: None }
    }
}

/// Subset of the bridge `/config` reply used to confirm a live, authorized
/// connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridgeid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swversion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apiversion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_error_reply_decodes() {
        let raw = r#"[{"error":{"type":101,"address":"","description":"link button not pressed"}}]"#;
        let replies: Vec<ApiReply<RegisterSuccess>> = serde_json::from_str(raw).unwrap();
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            ApiReply::Error(e) => {
                assert_eq!(e.kind, error_codes::LINK_BUTTON_NOT_PRESSED);
                assert!(e.is_unauthorized());
            }
            ApiReply::Success(_) => panic!("expected error reply"),
        }
    }

    #[test]
    fn register_success_reply_decodes() {
        let raw = r#"[{"success":{"username":"83b7780291a6ceffbe0bd049104df"}}]"#;
        let replies: Vec<ApiReply<RegisterSuccess>> = serde_json::from_str(raw).unwrap();
        match &replies[0] {
            ApiReply::Success(s) => assert_eq!(s.username, "83b7780291a6ceffbe0bd049104df"),
            ApiReply::Error(e) => panic!("expected success, got {e:?}"),
        }
    }

    #[test]
    fn light_state_update_serializes_only_set_fields() {
        let body = serde_json::to_value(LightStateUpdate::on(false)).unwrap();
        assert_eq!(body, serde_json::json!({"on": false}));
    }

    #[test]
    fn transport_error_code_1_is_unauthorized() {
        let e = ApiError {
            kind: error_codes::UNAUTHORIZED_USER,
            address: "/lights".to_string(),
            description: "unauthorized user".to_string(),
        };
        assert!(e.is_unauthorized());
        let e = ApiError { kind: 901, ..e };
        assert!(!e.is_unauthorized());
    }
}

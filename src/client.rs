//! Standalone HTTP client for the bridge's local JSON API.
//!
//! - Blocking client using `ureq` (no async).
//! - Uses existing models in `crate::models::hue`.
//! - Covers the endpoints this module needs: pairing, the config liveness
//!   check, the lights listing, and per-light state changes.
//!
//! The bridge replies 200 even for application errors; those arrive as the
//! `[{"error": ...}]` envelope and are mapped onto `HueClientError` here so
//! callers only ever see the transport/authorization distinction.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::models::hue::{
    ApiReply, BridgeConfig, LightStateUpdate, LightsMap, RegisterRequest, RegisterSuccess,
};

#[derive(Debug)]
pub enum HueClientError {
    /// Pairing refused (link button not pressed) or a previously issued
    /// token has been revoked.
    Unauthorized,
    /// Network, HTTP or bridge-internal failure.
    Unreachable(String),
    /// The bridge replied with JSON we do not understand.
    Json(serde_path_to_error::Error<serde_json::Error>),
}

impl core::fmt::Display for HueClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HueClientError::Unauthorized => write!(f, "bridge refused authorization"),
            HueClientError::Unreachable(s) => write!(f, "bridge unreachable: {}", s),
            HueClientError::Json(e) => write!(f, "unexpected bridge reply: {}", e),
        }
    }
}

impl std::error::Error for HueClientError {}

impl From<serde_path_to_error::Error<serde_json::Error>> for HueClientError {
    fn from(value: serde_path_to_error::Error<serde_json::Error>) -> Self {
        HueClientError::Json(value)
    }
}

impl From<crate::models::hue::ApiError> for HueClientError {
    fn from(value: crate::models::hue::ApiError) -> Self {
        if value.is_unauthorized() {
            HueClientError::Unauthorized
        } else {
            HueClientError::Unreachable(format!(
                "bridge error {} at {}: {}",
                value.kind, value.address, value.description
            ))
        }
    }
}

fn decode_json<T: DeserializeOwned>(body: &str) -> Result<T, HueClientError> {
    let mut de = serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(&mut de).map_err(HueClientError::Json)
}

/// Decode a reply that is either the expected payload or the array-of-errors
/// envelope the bridge substitutes when a request fails at application level.
fn decode_reply<T: DeserializeOwned>(body: &str) -> Result<T, HueClientError> {
    if let Ok(replies) = serde_json::from_str::<Vec<ApiReply<serde_json::Value>>>(body) {
        for reply in replies {
            if let ApiReply::Error(e) = reply {
                return Err(e.into());
            }
        }
    }
    decode_json(body)
}

fn read_body(resp: Result<ureq::Response, ureq::Error>) -> Result<String, HueClientError> {
    match resp {
        Ok(r) => r
            .into_string()
            .map_err(|e| HueClientError::Unreachable(format!("reading reply: {}", e))),
        Err(ureq::Error::Transport(t)) => Err(HueClientError::Unreachable(t.to_string())),
        Err(ureq::Error::Status(status, resp)) => {
            let body = resp.into_string().unwrap_or_else(|_| String::from("<no body>"));
            Err(HueClientError::Unreachable(format!("http {}: {}", status, body)))
        }
    }
}

pub struct HueClient {
    agent: ureq::Agent,
}

impl HueClient {
    pub fn new(request_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(request_timeout).build();
        HueClient { agent }
    }

    fn url(ip: &str, path: &str) -> String {
        format!("http://{}/api{}", ip, path)
    }

    /// Request a token from the bridge's pairing endpoint. Only succeeds
    /// while the physical link button has recently been pressed.
    pub fn register(&self, ip: &str, devicetype: &str) -> Result<String, HueClientError> {
        let payload = RegisterRequest {
            devicetype: devicetype.to_string(),
        };
        let body = read_body(self.agent.post(&Self::url(ip, "")).send_json(&payload))?;
        let replies: Vec<ApiReply<RegisterSuccess>> = decode_json(&body)?;
        match replies.into_iter().next() {
            Some(ApiReply::Success(s)) => Ok(s.username),
            Some(ApiReply::Error(e)) => Err(e.into()),
            None => Err(HueClientError::Unreachable(String::from("empty pairing reply"))),
        }
    }

    /// Liveness and token check. An authorized token yields the config
    /// object; a revoked one yields the unauthorized error envelope.
    pub fn get_config(&self, ip: &str, token: &str) -> Result<BridgeConfig, HueClientError> {
        let url = Self::url(ip, &format!("/{}/config", token));
        let body = read_body(self.agent.get(&url).call())?;
        decode_reply(&body)
    }

    pub fn get_lights(&self, ip: &str, token: &str) -> Result<LightsMap, HueClientError> {
        let url = Self::url(ip, &format!("/{}/lights", token));
        let body = read_body(self.agent.get(&url).call())?;
        decode_reply(&body)
    }

    pub fn set_light_state(
        &self,
        ip: &str,
        token: &str,
        light_key: &str,
        update: &LightStateUpdate,
    ) -> Result<(), HueClientError> {
        let url = Self::url(ip, &format!("/{}/lights/{}/state", token, light_key));
        let body = read_body(self.agent.put(&url).send_json(update))?;
        // The reply is one success/error entry per attribute in the update.
        let replies: Vec<ApiReply<serde_json::Value>> = decode_json(&body)?;
        for reply in replies {
            if let ApiReply::Error(e) = reply {
                return Err(e.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_lights_fixture() -> String {
        std::fs::read_to_string("tests/data/lights.json").expect("fixture present")
    }

    #[test]
    fn decodes_lights_fixture() {
        let lights: LightsMap = decode_reply(&load_lights_fixture()).expect("parse lights");
        assert_eq!(lights.len(), 3);

        let hallway = lights.get("1").expect("light 1 present");
        assert_eq!(hallway.name, "Hallway");
        assert!(hallway.state.on);
        assert!(hallway.state.reachable);
        assert_eq!(hallway.uniqueid.as_deref(), Some("00:17:88:01:00:bd:c7:b9-0b"));

        let porch = lights.get("3").expect("light 3 present");
        assert!(!porch.state.reachable);
    }

    #[test]
    fn empty_lights_map_is_valid() {
        let lights: LightsMap = decode_reply("{}").expect("parse empty map");
        assert!(lights.is_empty());
    }

    #[test]
    fn unauthorized_envelope_maps_to_unauthorized() {
        let body = r#"[{"error":{"type":1,"address":"/lights","description":"unauthorized user"}}]"#;
        match decode_reply::<LightsMap>(body) {
            Err(HueClientError::Unauthorized) => {}
            other => panic!("expected Unauthorized, got {:?}", other),
        }
    }

    #[test]
    fn non_auth_envelope_maps_to_unreachable() {
        let body = r#"[{"error":{"type":901,"address":"/","description":"internal error"}}]"#;
        match decode_reply::<LightsMap>(body) {
            Err(HueClientError::Unreachable(msg)) => assert!(msg.contains("901")),
            other => panic!("expected Unreachable, got {:?}", other),
        }
    }

    #[test]
    fn malformed_reply_reports_json_path() {
        let body = r#"{"1":{"name":"Hallway","state":{"reachable":true}}}"#;
        match decode_reply::<LightsMap>(body) {
            Err(HueClientError::Json(e)) => {
                assert!(e.path().to_string().contains('1'));
            }
            other => panic!("expected Json error, got {:?}", other),
        }
    }
}

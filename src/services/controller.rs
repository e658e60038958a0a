//! Bridge controller: discovery, pairing, the poll/diff loop, the daily
//! census and the one-shot switch operation. Owns every status transition
//! surfaced through the ability row.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, Utc};
use log::{debug, error, info, warn};

use crate::client::{HueClient, HueClientError};
use crate::db::models::{AbilityStatus, NewBrainAbility, NewBridge, NewLightEvent, abilities};
use crate::db::store::{LightStore, StoreError};
use crate::discovery::{self, DiscoveredBridge, DiscoveryError};
use crate::models::hue::{BridgeConfig, LightStateUpdate, LightsMap};
use crate::services::gate::PollGate;

/// Header key the bridge advertises over SSDP, doubling as its unique id key.
pub const BRIDGE_SERVICE_KEY: &str = "hue-bridgeid";
pub const BRIDGE_PORT: &str = "80";

/// The slice of the bridge HTTP API the controller drives.
pub trait BridgeApi {
    fn register(&self, ip: &str, devicetype: &str) -> Result<String, HueClientError>;
    fn verify(&self, ip: &str, token: &str) -> Result<BridgeConfig, HueClientError>;
    fn lights(&self, ip: &str, token: &str) -> Result<LightsMap, HueClientError>;
    fn set_on(&self, ip: &str, token: &str, light_key: &str, on: bool) -> Result<(), HueClientError>;
}

impl BridgeApi for HueClient {
    fn register(&self, ip: &str, devicetype: &str) -> Result<String, HueClientError> {
        HueClient::register(self, ip, devicetype)
    }

    fn verify(&self, ip: &str, token: &str) -> Result<BridgeConfig, HueClientError> {
        self.get_config(ip, token)
    }

    fn lights(&self, ip: &str, token: &str) -> Result<LightsMap, HueClientError> {
        self.get_lights(ip, token)
    }

    fn set_on(&self, ip: &str, token: &str, light_key: &str, on: bool) -> Result<(), HueClientError> {
        self.set_light_state(ip, token, light_key, &LightStateUpdate::on(on))
    }
}

/// How the controller finds a bridge it has no usable record of.
pub trait BridgeLocator {
    fn locate(&self) -> Result<DiscoveredBridge, DiscoveryError>;
}

/// SSDP scan configured for the bridge's advertised service key.
pub struct SsdpLocator {
    pub timeout: Duration,
}

impl BridgeLocator for SsdpLocator {
    fn locate(&self) -> Result<DiscoveredBridge, DiscoveryError> {
        discovery::discover(BRIDGE_SERVICE_KEY, BRIDGE_PORT, &[BRIDGE_SERVICE_KEY], self.timeout)
    }
}

#[derive(Debug)]
pub enum ControlError {
    /// An operation that needs a bridge link ran before one was established.
    NotConnected,
    Discovery(DiscoveryError),
    Api(HueClientError),
    Store(StoreError),
}

impl core::fmt::Display for ControlError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ControlError::NotConnected => write!(f, "no bridge link established"),
            ControlError::Discovery(e) => write!(f, "discovery failed: {}", e),
            ControlError::Api(e) => write!(f, "bridge api failed: {}", e),
            ControlError::Store(e) => write!(f, "store failed: {}", e),
        }
    }
}

impl std::error::Error for ControlError {}

impl From<StoreError> for ControlError {
    fn from(value: StoreError) -> Self {
        ControlError::Store(value)
    }
}

/// Failure policy: the status each error kind surfaces through the ability
/// row. Only a refused pairing gets its own status; everything else reads
/// as the bridge being gone. The fixed retry backoff applies to all kinds.
fn failure_status(error: &ControlError) -> AbilityStatus {
    match error {
        ControlError::Api(HueClientError::Unauthorized) => AbilityStatus::NotAuthorized,
        ControlError::Api(_) => AbilityStatus::NotFound,
        ControlError::Discovery(_) => AbilityStatus::NotFound,
        ControlError::Store(_) => AbilityStatus::NotFound,
        ControlError::NotConnected => AbilityStatus::NotFound,
    }
}

/// What the controller remembers about one light between polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedLight {
    pub name: String,
    pub on: bool,
    pub reachable: bool,
}

/// Last-known light state keyed by vendor unique id. Passed into and out of
/// each poll cycle; never persisted.
pub type LightSnapshot = BTreeMap<String, ObservedLight>;

/// Reduce a lights reply to the fields the diff cares about. Lights without
/// a unique id cannot be matched between polls or resolved to a device row,
/// so they are logged and left out.
pub fn snapshot_from_lights(lights: &LightsMap) -> LightSnapshot {
    let mut snapshot = LightSnapshot::new();
    for (key, light) in lights {
        let Some(unique_id) = light.uniqueid.as_ref() else {
            warn!("Poll: light {} (\"{}\") has no unique id; ignoring", key, light.name);
            continue;
        };
        snapshot.insert(
            unique_id.clone(),
            ObservedLight {
                name: light.name.clone(),
                on: light.state.on,
                reachable: light.state.reachable,
            },
        );
    }
    snapshot
}

/// Lights whose on/off or reachability differs from the prior snapshot.
/// Lights with no prior observation are not changes; they just seed the
/// next snapshot.
pub fn changed_lights(prev: &LightSnapshot, current: &LightSnapshot) -> Vec<(String, ObservedLight)> {
    let mut changed = Vec::new();
    for (unique_id, light) in current {
        if let Some(old) = prev.get(unique_id) {
            if old.on != light.on || old.reachable != light.reachable {
                changed.push((unique_id.clone(), light.clone()));
            }
        }
    }
    changed
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecordSummary {
    pub recorded: usize,
    /// Observations with no matching device row, logged and skipped.
    pub unresolved: usize,
    /// Events lost to store write failures.
    pub dropped: usize,
}

/// Append one event per observation, all stamped with `event_time`.
/// Resolution misses and write failures cost only their own entry; the rest
/// of the batch still lands.
fn record_observations<S: LightStore>(
    store: &mut S,
    entries: &[(String, ObservedLight)],
    event_time: DateTime<Utc>,
    context: &str,
) -> RecordSummary {
    let mut summary = RecordSummary::default();
    for (unique_id, light) in entries {
        let light_id = match store.device_id_by_unique_id(unique_id) {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!(
                    "{}: light {} (\"{}\") has no device record; skipping",
                    context, unique_id, light.name
                );
                summary.unresolved += 1;
                continue;
            }
            Err(e) => {
                error!("{}: resolving light {} failed: {}", context, unique_id, e);
                summary.unresolved += 1;
                continue;
            }
        };
        match store.append_light_event(NewLightEvent::new(event_time, light.on, light.reachable, light_id)) {
            Ok(()) => {
                debug!("{}: event recorded for {} at {}", context, unique_id, event_time);
                summary.recorded += 1;
            }
            Err(e) => {
                error!("{}: recording event for {} failed: {}", context, unique_id, e);
                summary.dropped += 1;
            }
        }
    }
    summary
}

/// Whether the daily census is due at `now`: a slot is configured, the
/// time-of-day has passed, and no census ran today yet.
fn census_due(census_time: Option<NaiveTime>, last_census: Option<NaiveDate>, now: DateTime<Local>) -> bool {
    let Some(at) = census_time else {
        return false;
    };
    if now.time() < at {
        return false;
    }
    match last_census {
        Some(day) => day < now.date_naive(),
        None => true,
    }
}

#[derive(Debug, Clone)]
struct BridgeLink {
    ip_address: String,
    access_token: String,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Application identifier presented to the bridge when pairing.
    pub devicetype: String,
    /// Minimum spacing between fetches against the bridge.
    pub poll_spacing: Duration,
    /// Fixed hold-off between failed connect attempts.
    pub retry_backoff: Duration,
    /// Local time-of-day of the daily census; None disables the built-in
    /// trigger (an external scheduler may call `record_all_lights` instead).
    pub census_time: Option<NaiveTime>,
}

/// Everything one poll produced: the replacement snapshot plus bookkeeping.
#[derive(Debug)]
pub struct PollOutcome {
    pub snapshot: LightSnapshot,
    pub changed: Vec<(String, ObservedLight)>,
    pub recorded: usize,
    pub unresolved: usize,
    pub dropped: usize,
}

pub struct BridgeController<S, A, L> {
    store: S,
    api: A,
    locator: L,
    gate: PollGate,
    settings: ControllerSettings,
    /// Last status written to the ability row; None before the first write.
    status: Option<AbilityStatus>,
    link: Option<BridgeLink>,
    last_census: Option<NaiveDate>,
}

impl<S: LightStore, A: BridgeApi, L: BridgeLocator> BridgeController<S, A, L> {
    pub fn new(store: S, api: A, locator: L, settings: ControllerSettings) -> Self {
        let gate = PollGate::new(settings.poll_spacing);
        BridgeController {
            store,
            api,
            locator,
            gate,
            settings,
            status: None,
            link: None,
            last_census: None,
        }
    }

    /// The store also backs the schedule lookup and startup registration,
    /// which live outside the controller.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Write a phase transition to the ability row. Store failures here are
    /// logged and swallowed: status reporting must never take the control
    /// loop down.
    fn note_status(&mut self, status: AbilityStatus) {
        if self.status == Some(status) {
            return;
        }
        info!(
            "Bridge: status {} -> {}",
            self.status.map(AbilityStatus::as_str).unwrap_or("-"),
            status
        );
        if let Err(e) = self.store.set_ability_status(abilities::HUE_BRIDGE_LIGHTS, status) {
            error!("Bridge: recording status {} failed: {}", status, e);
        }
        self.status = Some(status);
    }

    /// Create the ability row on first start; later starts find it present.
    pub fn ensure_ability(&mut self) -> Result<(), ControlError> {
        if !self.store.ability_exists(abilities::HUE_BRIDGE_LIGHTS)? {
            info!("Bridge: registering ability {}", abilities::HUE_BRIDGE_LIGHTS);
            self.store.create_ability(NewBrainAbility::hue_bridge_lights())?;
        }
        Ok(())
    }

    /// Establish a bridge link, preferring the persisted active record and
    /// falling back to a fresh discovery + pairing.
    pub fn connect_or_discover(&mut self) -> Result<(), ControlError> {
        self.note_status(AbilityStatus::Discovery);

        match self.store.active_bridge() {
            Ok(Some(bridge)) => match self.api.verify(&bridge.ip_address, &bridge.access_token) {
                Ok(config) => {
                    info!("Bridge: connected to \"{}\" at {}", config.name, bridge.ip_address);
                    self.link = Some(BridgeLink {
                        ip_address: bridge.ip_address,
                        access_token: bridge.access_token,
                    });
                    self.note_status(AbilityStatus::Connected);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Bridge: stored bridge at {} not usable ({}); rediscovering",
                        bridge.ip_address, e
                    );
                }
            },
            Ok(None) => debug!("Bridge: no active bridge on record"),
            Err(e) => warn!("Bridge: reading active bridge failed ({}); rediscovering", e),
        }

        self.discover_and_pair()
    }

    fn discover_and_pair(&mut self) -> Result<(), ControlError> {
        let found = match self.locator.locate() {
            Ok(found) => found,
            Err(e) => {
                self.note_status(AbilityStatus::NotFound);
                return Err(ControlError::Discovery(e));
            }
        };
        let unique_id = found.attributes.get(BRIDGE_SERVICE_KEY).cloned().unwrap_or_default();
        info!("Bridge: discovered bridge {} at {}", unique_id, found.ip_address);

        match self.api.register(&found.ip_address, &self.settings.devicetype) {
            Ok(token) => match self.adopt_bridge(unique_id, found.ip_address, token) {
                Ok(()) => {
                    self.note_status(AbilityStatus::Connected);
                    Ok(())
                }
                Err(e) => {
                    self.note_status(AbilityStatus::NotFound);
                    Err(e)
                }
            },
            Err(HueClientError::Unauthorized) => {
                // The operator has to press the link button; retry later.
                self.note_status(AbilityStatus::NotAuthorized);
                Err(ControlError::Api(HueClientError::Unauthorized))
            }
            Err(e) => {
                self.note_status(AbilityStatus::NotFound);
                Err(ControlError::Api(e))
            }
        }
    }

    /// Make the newly paired bridge the only bridge on record: deactivate
    /// the active row(s), drop everything inactive, create the new one.
    fn adopt_bridge(&mut self, unique_id: String, ip_address: String, access_token: String) -> Result<(), ControlError> {
        let existing = self.store.bridges()?;
        for bridge in existing.iter().filter(|b| b.is_active) {
            self.store.deactivate_bridge(bridge.id)?;
        }
        let dropped = self.store.delete_inactive_bridges()?;
        if dropped > 0 {
            info!("Bridge: superseded {} stored bridge record(s)", dropped);
        }
        let id = self
            .store
            .create_bridge(NewBridge::active(unique_id, ip_address.clone(), access_token.clone()))?;
        debug!("Bridge: created bridge record {}", id);
        self.link = Some(BridgeLink { ip_address, access_token });
        Ok(())
    }

    /// One gated fetch-diff-persist pass. `last` is the snapshot from the
    /// previous cycle; the returned outcome carries its replacement.
    pub fn poll_cycle(&mut self, last: &LightSnapshot) -> Result<PollOutcome, ControlError> {
        let link = self.link.clone().ok_or(ControlError::NotConnected)?;

        self.gate.wait_turn();
        let lights = self
            .api
            .lights(&link.ip_address, &link.access_token)
            .map_err(ControlError::Api)?;

        let snapshot = snapshot_from_lights(&lights);
        let changed = changed_lights(last, &snapshot);
        let summary = record_observations(&mut self.store, &changed, Utc::now(), "Poll");

        Ok(PollOutcome {
            snapshot,
            changed,
            recorded: summary.recorded,
            unresolved: summary.unresolved,
            dropped: summary.dropped,
        })
    }

    /// Full census: one event per resolvable light regardless of change,
    /// all sharing one event time.
    pub fn record_all_lights(&mut self) -> Result<RecordSummary, ControlError> {
        let link = self.link.clone().ok_or(ControlError::NotConnected)?;

        self.gate.wait_turn();
        let lights = self
            .api
            .lights(&link.ip_address, &link.access_token)
            .map_err(ControlError::Api)?;

        let snapshot = snapshot_from_lights(&lights);
        let entries: Vec<(String, ObservedLight)> =
            snapshot.iter().map(|(id, light)| (id.clone(), light.clone())).collect();
        let summary = record_observations(&mut self.store, &entries, Utc::now(), "Census");
        info!(
            "Census: {} recorded, {} unresolved, {} dropped",
            summary.recorded, summary.unresolved, summary.dropped
        );
        Ok(summary)
    }

    /// Switch one light by vendor unique id. A light the bridge does not
    /// list is logged and ignored, matching the advisory nature of switching.
    pub fn set_light(&mut self, unique_id: &str, on: bool) -> Result<(), ControlError> {
        let link = self.link.clone().ok_or(ControlError::NotConnected)?;

        self.gate.wait_turn();
        let lights = self
            .api
            .lights(&link.ip_address, &link.access_token)
            .map_err(ControlError::Api)?;

        for (key, light) in &lights {
            if light.uniqueid.as_deref() == Some(unique_id) {
                self.api
                    .set_on(&link.ip_address, &link.access_token, key, on)
                    .map_err(ControlError::Api)?;
                info!(
                    "Bridge: light {} (\"{}\") switched {}",
                    unique_id,
                    light.name,
                    if on { "on" } else { "off" }
                );
                return Ok(());
            }
        }
        warn!("Bridge: no light with unique id {} on the bridge", unique_id);
        Ok(())
    }

    /// Apply the failure policy: log, surface the mapped status, drop the
    /// link so the next iteration reconnects, hold off for the backoff.
    fn handle_failure(&mut self, context: &str, error: &ControlError) {
        error!("{}: {}", context, error);
        self.note_status(failure_status(error));
        self.link = None;
        thread::sleep(self.settings.retry_backoff);
    }

    /// Run until killed: keep a link up, poll while connected, census once
    /// a day when configured, back off on failures.
    pub fn run(&mut self) -> ! {
        // A census slot already past at startup belongs to today's history,
        // not to right now; wait for tomorrow's occurrence.
        if let Some(at) = self.settings.census_time {
            let now = Local::now();
            if now.time() >= at {
                self.last_census = Some(now.date_naive());
            }
            info!("Census: scheduled daily at {}", at.format("%H:%M"));
        }

        let mut snapshot = LightSnapshot::new();
        loop {
            if self.link.is_none() {
                if let Err(e) = self.connect_or_discover() {
                    error!("Bridge: connect failed: {}", e);
                    thread::sleep(self.settings.retry_backoff);
                }
                // Keep the snapshot across reconnects so changes that
                // happened during an outage still get recorded.
                continue;
            }

            let now = Local::now();
            if census_due(self.settings.census_time, self.last_census, now) {
                match self.record_all_lights() {
                    Ok(_) => self.last_census = Some(now.date_naive()),
                    Err(e) => self.handle_failure("Census", &e),
                }
                continue;
            }

            match self.poll_cycle(&snapshot) {
                Ok(outcome) => {
                    if outcome.changed.is_empty() {
                        debug!("Poll: no changed lights");
                    } else {
                        info!(
                            "Poll: {} changed light(s), {} recorded, {} unresolved, {} dropped",
                            outcome.changed.len(),
                            outcome.recorded,
                            outcome.unresolved,
                            outcome.dropped
                        );
                    }
                    snapshot = outcome.snapshot;
                }
                Err(e) => self.handle_failure("Poll", &e),
            }
        }
    }
}

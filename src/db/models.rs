//! Diesel model structs for bridge inventory, light events, schedules and
//! the brain ability row surfaced to the rest of the system.

use std::fmt;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema;

// Constants standardizing `brain_abilities` rows and bridge inventory fields.
pub mod abilities {
    pub const HUE_BRIDGE_LIGHTS: &str = "phillips_hue_bridge_lights";
    pub const LEVEL_NORMAL: &str = "Normal";
    pub const HUB_TYPE: &str = "phillips_hue_bridge";
    pub const DEVICE_TYPE: &str = "phillips_hue_bridge_light";
}

pub mod bridge_info {
    pub const MANUFACTURER: &str = "Phillips Manufacturing";
    pub const NAME: &str = "Phillips Hue Bridge";
    pub const ENERGY_WATTS: f64 = 1.6792;
}

/// Connection phase mirrored into `brain_abilities.status`. The stored
/// strings are part of the external contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbilityStatus {
    Discovery,
    Connected,
    NotFound,
    NotAuthorized,
}

impl AbilityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AbilityStatus::Discovery => "Discovery",
            AbilityStatus::Connected => "Connected",
            AbilityStatus::NotFound => "Not Found",
            AbilityStatus::NotAuthorized => "Not Authorized",
        }
    }
}

impl fmt::Display for AbilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::bridges)]
pub struct Bridge {
    pub id: i64,
    pub unique_id: String,
    pub ip_address: String,
    pub access_token: String,
    pub is_active: bool,
    pub manufacturer: String,
    pub name: String,
    pub energy_watts: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::bridges)]
pub struct NewBridge {
    pub unique_id: String,
    pub ip_address: String,
    pub access_token: String,
    pub is_active: bool,
    pub manufacturer: String,
    pub name: String,
    pub energy_watts: f64,
}

impl NewBridge {
    /// A freshly paired bridge, created active with the fixed inventory info.
    pub fn active(unique_id: String, ip_address: String, access_token: String) -> Self {
        Self {
            unique_id,
            ip_address,
            access_token,
            is_active: true,
            manufacturer: bridge_info::MANUFACTURER.to_string(),
            name: bridge_info::NAME.to_string(),
            energy_watts: bridge_info::ENERGY_WATTS,
        }
    }
}

/// A provisioned light. Rows are created by the inventory side of the
/// system; this crate only resolves `unique_id` to `id`.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::devices)]
pub struct Device {
    pub id: i64,
    pub unique_id: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::light_events)]
#[diesel(belongs_to(Device, foreign_key = light_id))]
pub struct LightEvent {
    pub id: i64,
    pub event_time: DateTime<Utc>,
    pub is_on: bool,
    pub is_reachable: bool,
    pub value: f64,
    pub light_id: i64,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::light_events)]
pub struct NewLightEvent {
    pub event_time: DateTime<Utc>,
    pub is_on: bool,
    pub is_reachable: bool,
    pub value: f64,
    pub light_id: i64,
}

impl NewLightEvent {
    /// Light events carry no measured value yet, only the on/reachable pair.
    pub fn new(event_time: DateTime<Utc>, is_on: bool, is_reachable: bool, light_id: i64) -> Self {
        Self { event_time, is_on, is_reachable, value: 0.0, light_id }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::brain_abilities)]
pub struct BrainAbility {
    pub id: i64,
    pub ability: String,
    pub status: String,
    pub level: String,
    pub hub_type: String,
    pub device_type: String,
    pub machine_learning: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::brain_abilities)]
pub struct NewBrainAbility {
    pub ability: String,
    pub status: String,
    pub level: String,
    pub hub_type: String,
    pub device_type: String,
    pub machine_learning: bool,
}

impl NewBrainAbility {
    /// The ability row this module registers on first start.
    pub fn hue_bridge_lights() -> Self {
        Self {
            ability: abilities::HUE_BRIDGE_LIGHTS.to_string(),
            status: AbilityStatus::NotFound.as_str().to_string(),
            level: abilities::LEVEL_NORMAL.to_string(),
            hub_type: abilities::HUB_TYPE.to_string(),
            device_type: abilities::DEVICE_TYPE.to_string(),
            machine_learning: false,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::light_schedules)]
#[diesel(belongs_to(Device, foreign_key = light_id))]
pub struct LightSchedule {
    pub id: i64,
    pub time: DateTime<Utc>,
    pub desired_state: bool,
    pub light_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ability_status_strings_match_external_contract() {
        assert_eq!(AbilityStatus::Discovery.as_str(), "Discovery");
        assert_eq!(AbilityStatus::Connected.as_str(), "Connected");
        assert_eq!(AbilityStatus::NotFound.as_str(), "Not Found");
        assert_eq!(AbilityStatus::NotAuthorized.as_str(), "Not Authorized");
    }

    #[test]
    fn new_bridge_active_fills_inventory_defaults() {
        let b = NewBridge::active(
            "001788fffe23a412".to_string(),
            "192.168.1.40".to_string(),
            "token".to_string(),
        );
        assert!(b.is_active);
        assert_eq!(b.manufacturer, bridge_info::MANUFACTURER);
        assert_eq!(b.name, bridge_info::NAME);
        assert_eq!(b.energy_watts, bridge_info::ENERGY_WATTS);
    }

    #[test]
    fn new_light_event_defaults_value_to_zero() {
        let e = NewLightEvent::new(Utc::now(), true, false, 7);
        assert_eq!(e.value, 0.0);
        assert!(e.is_on);
        assert!(!e.is_reachable);
    }
}

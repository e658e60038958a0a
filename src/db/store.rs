//! Persistence gateway: the narrow store interface the controller and
//! schedule lookup work against, plus its Postgres implementation.

use chrono::Utc;
use diesel::PgConnection;
use diesel::prelude::*;

use crate::db::models::{
    AbilityStatus, Bridge, LightSchedule, NewBrainAbility, NewBridge, NewLightEvent,
};
use crate::schema;

#[derive(Debug)]
pub enum StoreError {
    Db(diesel::result::Error),
}

impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StoreError::Db(e) => write!(f, "database error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<diesel::result::Error> for StoreError {
    fn from(value: diesel::result::Error) -> Self {
        StoreError::Db(value)
    }
}

pub trait LightStore {
    fn active_bridge(&mut self) -> Result<Option<Bridge>, StoreError>;
    fn bridges(&mut self) -> Result<Vec<Bridge>, StoreError>;
    fn create_bridge(&mut self, bridge: NewBridge) -> Result<i64, StoreError>;
    fn deactivate_bridge(&mut self, id: i64) -> Result<(), StoreError>;
    /// Remove bridge rows that are no longer active. Returns how many went.
    fn delete_inactive_bridges(&mut self) -> Result<usize, StoreError>;
    fn set_ability_status(&mut self, ability: &str, status: AbilityStatus) -> Result<(), StoreError>;
    fn ability_exists(&mut self, ability: &str) -> Result<bool, StoreError>;
    fn create_ability(&mut self, ability: NewBrainAbility) -> Result<(), StoreError>;
    fn device_id_by_unique_id(&mut self, unique_id: &str) -> Result<Option<i64>, StoreError>;
    fn append_light_event(&mut self, event: NewLightEvent) -> Result<(), StoreError>;
    fn scheduled_lights(&mut self) -> Result<Vec<LightSchedule>, StoreError>;
}

pub struct PgStore {
    conn: PgConnection,
}

impl PgStore {
    pub fn new(conn: PgConnection) -> Self {
        PgStore { conn }
    }
}

impl LightStore for PgStore {
    fn active_bridge(&mut self) -> Result<Option<Bridge>, StoreError> {
        use schema::bridges::dsl as B;
        let bridge = B::bridges
            .filter(B::is_active.eq(true))
            .select(Bridge::as_select())
            .first(&mut self.conn)
            .optional()?;
        Ok(bridge)
    }

    fn bridges(&mut self) -> Result<Vec<Bridge>, StoreError> {
        use schema::bridges::dsl as B;
        let rows = B::bridges
            .select(Bridge::as_select())
            .order(B::id.asc())
            .load(&mut self.conn)?;
        Ok(rows)
    }

    fn create_bridge(&mut self, bridge: NewBridge) -> Result<i64, StoreError> {
        use schema::bridges::dsl as B;
        let id = diesel::insert_into(B::bridges)
            .values(&bridge)
            .returning(B::id)
            .get_result(&mut self.conn)?;
        Ok(id)
    }

    fn deactivate_bridge(&mut self, id: i64) -> Result<(), StoreError> {
        use schema::bridges::dsl as B;
        diesel::update(B::bridges.filter(B::id.eq(id)))
            .set((B::is_active.eq(false), B::updated_at.eq(Utc::now())))
            .execute(&mut self.conn)?;
        Ok(())
    }

    fn delete_inactive_bridges(&mut self) -> Result<usize, StoreError> {
        use schema::bridges::dsl as B;
        let deleted = diesel::delete(B::bridges.filter(B::is_active.eq(false))).execute(&mut self.conn)?;
        Ok(deleted)
    }

    fn set_ability_status(&mut self, ability: &str, status: AbilityStatus) -> Result<(), StoreError> {
        use schema::brain_abilities::dsl as A;
        diesel::update(A::brain_abilities.filter(A::ability.eq(ability)))
            .set((A::status.eq(status.as_str()), A::updated_at.eq(Utc::now())))
            .execute(&mut self.conn)?;
        Ok(())
    }

    fn ability_exists(&mut self, ability: &str) -> Result<bool, StoreError> {
        use schema::brain_abilities::dsl as A;
        let found: Option<i64> = A::brain_abilities
            .filter(A::ability.eq(ability))
            .select(A::id)
            .first(&mut self.conn)
            .optional()?;
        Ok(found.is_some())
    }

    fn create_ability(&mut self, ability: NewBrainAbility) -> Result<(), StoreError> {
        use schema::brain_abilities::dsl as A;
        diesel::insert_into(A::brain_abilities)
            .values(&ability)
            .on_conflict(A::ability)
            .do_nothing()
            .execute(&mut self.conn)?;
        Ok(())
    }

    fn device_id_by_unique_id(&mut self, unique_id: &str) -> Result<Option<i64>, StoreError> {
        use schema::devices::dsl as D;
        let id = D::devices
            .filter(D::unique_id.eq(unique_id))
            .select(D::id)
            .first(&mut self.conn)
            .optional()?;
        Ok(id)
    }

    fn append_light_event(&mut self, event: NewLightEvent) -> Result<(), StoreError> {
        use schema::light_events::dsl as E;
        diesel::insert_into(E::light_events).values(&event).execute(&mut self.conn)?;
        Ok(())
    }

    fn scheduled_lights(&mut self) -> Result<Vec<LightSchedule>, StoreError> {
        use schema::light_schedules::dsl as S;
        let rows = S::light_schedules
            .select(LightSchedule::as_select())
            .order(S::time.asc())
            .load(&mut self.conn)?;
        Ok(rows)
    }
}

/// In-memory store standing in for Postgres in unit tests. Records every
/// write so assertions can inspect the full history, and injects failures
/// where a test asks for them.
#[cfg(test)]
pub mod testing {
    use std::collections::BTreeMap;

    use super::*;

    #[derive(Default)]
    pub struct MemoryStore {
        pub bridges: Vec<Bridge>,
        next_bridge_id: i64,
        pub devices: BTreeMap<String, i64>,
        pub events: Vec<NewLightEvent>,
        pub status_history: Vec<AbilityStatus>,
        pub abilities: Vec<NewBrainAbility>,
        pub schedules: Vec<LightSchedule>,
        /// Fail `append_light_event` for this light id.
        pub fail_event_for_light: Option<i64>,
        /// Fail every read operation.
        pub fail_reads: bool,
        /// Fail `set_ability_status`.
        pub fail_status_writes: bool,
    }

    pub fn synthetic_db_error() -> StoreError {
        StoreError::Db(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::Unknown,
            Box::new(String::from("synthetic failure")),
        ))
    }

    impl MemoryStore {
        pub fn with_device(mut self, unique_id: &str, device_id: i64) -> Self {
            self.devices.insert(unique_id.to_string(), device_id);
            self
        }

        pub fn active_bridge_count(&self) -> usize {
            self.bridges.iter().filter(|b| b.is_active).count()
        }

        pub fn insert_active_bridge(&mut self, unique_id: &str, ip: &str, token: &str) -> i64 {
            let new = NewBridge::active(unique_id.to_string(), ip.to_string(), token.to_string());
            self.push_bridge(new)
        }

        fn push_bridge(&mut self, new: NewBridge) -> i64 {
            self.next_bridge_id += 1;
            let now = Utc::now();
            self.bridges.push(Bridge {
                id: self.next_bridge_id,
                unique_id: new.unique_id,
                ip_address: new.ip_address,
                access_token: new.access_token,
                is_active: new.is_active,
                manufacturer: new.manufacturer,
                name: new.name,
                energy_watts: new.energy_watts,
                created_at: now,
                updated_at: now,
            });
            self.next_bridge_id
        }
    }

    impl LightStore for MemoryStore {
        fn active_bridge(&mut self) -> Result<Option<Bridge>, StoreError> {
            if self.fail_reads {
                return Err(synthetic_db_error());
            }
            Ok(self.bridges.iter().find(|b| b.is_active).cloned())
        }

        fn bridges(&mut self) -> Result<Vec<Bridge>, StoreError> {
            if self.fail_reads {
                return Err(synthetic_db_error());
            }
            Ok(self.bridges.clone())
        }

        fn create_bridge(&mut self, bridge: NewBridge) -> Result<i64, StoreError> {
            Ok(self.push_bridge(bridge))
        }

        fn deactivate_bridge(&mut self, id: i64) -> Result<(), StoreError> {
            for b in &mut self.bridges {
                if b.id == id {
                    b.is_active = false;
                }
            }
            Ok(())
        }

        fn delete_inactive_bridges(&mut self) -> Result<usize, StoreError> {
            let before = self.bridges.len();
            self.bridges.retain(|b| b.is_active);
            Ok(before - self.bridges.len())
        }

        fn set_ability_status(&mut self, _ability: &str, status: AbilityStatus) -> Result<(), StoreError> {
            if self.fail_status_writes {
                return Err(synthetic_db_error());
            }
            self.status_history.push(status);
            Ok(())
        }

        fn ability_exists(&mut self, ability: &str) -> Result<bool, StoreError> {
            if self.fail_reads {
                return Err(synthetic_db_error());
            }
            Ok(self.abilities.iter().any(|a| a.ability == ability))
        }

        fn create_ability(&mut self, ability: NewBrainAbility) -> Result<(), StoreError> {
            self.abilities.push(ability);
            Ok(())
        }

        fn device_id_by_unique_id(&mut self, unique_id: &str) -> Result<Option<i64>, StoreError> {
            if self.fail_reads {
                return Err(synthetic_db_error());
            }
            Ok(self.devices.get(unique_id).copied())
        }

        fn append_light_event(&mut self, event: NewLightEvent) -> Result<(), StoreError> {
            if self.fail_event_for_light == Some(event.light_id) {
                return Err(synthetic_db_error());
            }
            self.events.push(event);
            Ok(())
        }

        fn scheduled_lights(&mut self) -> Result<Vec<LightSchedule>, StoreError> {
            if self.fail_reads {
                return Err(synthetic_db_error());
            }
            Ok(self.schedules.clone())
        }
    }
}

//! Schedule lookup: surfaces on/off schedules produced by the scheduling
//! side of the system. Read-only here.

use log::error;

use crate::db::models::LightSchedule;
use crate::db::store::LightStore;

/// All persisted schedule entries, earliest first. A store failure is logged
/// and yields an empty list; callers never see an error.
pub fn scheduled_lights<S: LightStore>(store: &mut S) -> Vec<LightSchedule> {
    match store.scheduled_lights() {
        Ok(entries) => entries,
        Err(e) => {
            error!("Schedule: reading scheduled lights failed: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::db::store::testing::MemoryStore;

    #[test]
    fn returns_persisted_entries() {
        let mut store = MemoryStore::default();
        store.schedules.push(LightSchedule {
            id: 1,
            time: Utc::now(),
            desired_state: true,
            light_id: 38,
        });
        store.schedules.push(LightSchedule {
            id: 2,
            time: Utc::now(),
            desired_state: false,
            light_id: 38,
        });

        let entries = scheduled_lights(&mut store);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].desired_state);
        assert_eq!(entries[1].light_id, 38);
    }

    #[test]
    fn store_failure_yields_empty_list() {
        let mut store = MemoryStore::default();
        store.schedules.push(LightSchedule {
            id: 1,
            time: Utc::now(),
            desired_state: true,
            light_id: 1,
        });
        store.fail_reads = true;

        assert!(scheduled_lights(&mut store).is_empty());
    }
}

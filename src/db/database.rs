use std::collections::HashMap;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::characteristic::{perms, Characteristic};
use super::service::Service;
use super::{status, Aid, AttributeDb, Iid};
use crate::http::StatusCode;
use crate::server::{Sid, MAX_SESSIONS};

/// One accessory: an id plus its services
#[derive(Debug, Clone)]
pub struct Accessory {
    /// Accessory id; the bridge itself is aid 1
    pub aid: Aid,
    /// Services in declaration order
    pub services: Vec<Service>,
}

impl Accessory {
    /// Create an accessory with no services yet
    #[must_use]
    pub fn new(aid: Aid) -> Self {
        Self {
            aid,
            services: Vec::new(),
        }
    }

    /// Append a service
    #[must_use]
    pub fn with_service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    /// Assign sequential instance ids to services and characteristics
    fn assign_iids(&mut self) {
        let mut next: Iid = 1;
        for service in &mut self.services {
            service.iid = next;
            next += 1;
            for characteristic in &mut service.characteristics {
                characteristic.iid = next;
                next += 1;
            }
        }
    }
}

/// In-memory attribute database with per-session event state
///
/// Subscriptions are a bitmask per characteristic (one bit per session
/// slot); writes to a subscribed characteristic enqueue a pending event
/// for every subscribed session except the writer.
#[derive(Debug)]
pub struct AccessoryDatabase {
    accessories: Vec<Accessory>,
    subscribers: HashMap<(Aid, Iid), u8>,
    pending: Vec<Vec<(Aid, Iid)>>,
}

impl Default for AccessoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct WriteRequest {
    characteristics: Vec<WriteItem>,
}

#[derive(Deserialize)]
struct WriteItem {
    aid: Aid,
    iid: Iid,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    ev: Option<bool>,
}

struct ReadQuery {
    ids: Vec<(Aid, Iid)>,
    meta: bool,
    perms: bool,
    type_id: bool,
    ev: bool,
}

impl AccessoryDatabase {
    /// Empty database
    #[must_use]
    pub fn new() -> Self {
        Self {
            accessories: Vec::new(),
            subscribers: HashMap::new(),
            pending: vec![Vec::new(); MAX_SESSIONS],
        }
    }

    /// Add an accessory, assigning instance ids to its attributes
    pub fn add_accessory(&mut self, mut accessory: Accessory) {
        accessory.assign_iids();
        self.accessories.push(accessory);
    }

    /// Look up a characteristic
    #[must_use]
    pub fn find(&self, aid: Aid, iid: Iid) -> Option<&Characteristic> {
        self.accessories
            .iter()
            .find(|a| a.aid == aid)?
            .services
            .iter()
            .flat_map(|s| &s.characteristics)
            .find(|c| c.iid == iid)
    }

    fn find_mut(&mut self, aid: Aid, iid: Iid) -> Option<&mut Characteristic> {
        self.accessories
            .iter_mut()
            .find(|a| a.aid == aid)?
            .services
            .iter_mut()
            .flat_map(|s| &mut s.characteristics)
            .find(|c| c.iid == iid)
    }

    /// Find the first characteristic of a given type on an accessory
    #[must_use]
    pub fn find_by_type(&self, aid: Aid, type_id: &str) -> Option<&Characteristic> {
        self.accessories
            .iter()
            .find(|a| a.aid == aid)?
            .services
            .iter()
            .flat_map(|s| &s.characteristics)
            .find(|c| c.type_id == type_id)
    }

    /// Whether a session is subscribed to a characteristic
    #[must_use]
    pub fn subscribed(&self, sid: Sid, aid: Aid, iid: Iid) -> bool {
        self.subscribers
            .get(&(aid, iid))
            .is_some_and(|mask| mask & (1 << sid) != 0)
    }

    /// Apply a value change from outside any session (hardware state, for
    /// example) and notify every subscribed session
    ///
    /// # Errors
    ///
    /// Returns the HAP status sub-code on a missing characteristic or a
    /// value that does not fit.
    pub fn set_value(&mut self, aid: Aid, iid: Iid, value: &serde_json::Value) -> Result<(), i32> {
        self.apply_value(aid, iid, value, None)
    }

    fn apply_value(
        &mut self,
        aid: Aid,
        iid: Iid,
        value: &serde_json::Value,
        writer: Option<Sid>,
    ) -> Result<(), i32> {
        let characteristic = self
            .find_mut(aid, iid)
            .ok_or(status::RESOURCE_NOT_FOUND)?;
        characteristic.write_value(value)?;
        self.enqueue_event(aid, iid, writer);
        Ok(())
    }

    fn enqueue_event(&mut self, aid: Aid, iid: Iid, writer: Option<Sid>) {
        let Some(&mask) = self.subscribers.get(&(aid, iid)) else {
            return;
        };
        for sid in 0..MAX_SESSIONS {
            #[allow(clippy::cast_possible_truncation)]
            let sid = sid as Sid;
            if mask & (1 << sid) == 0 || writer == Some(sid) {
                continue;
            }
            let queue = &mut self.pending[sid as usize];
            if !queue.contains(&(aid, iid)) {
                queue.push((aid, iid));
            }
        }
    }

    fn set_subscription(&mut self, sid: Sid, aid: Aid, iid: Iid, enabled: bool) {
        let mask = self.subscribers.entry((aid, iid)).or_insert(0);
        if enabled {
            *mask |= 1 << sid;
        } else {
            *mask &= !(1 << sid);
        }
    }

    fn characteristic_json(
        &self,
        sid: Sid,
        aid: Aid,
        characteristic: &Characteristic,
        query: &ReadQuery,
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut object = serde_json::Map::new();
        object.insert("aid".to_string(), json!(aid));
        object.insert("iid".to_string(), json!(characteristic.iid));
        object.insert("value".to_string(), characteristic.value.to_json());
        if query.meta {
            characteristic.append_meta(&mut object);
        }
        if query.perms {
            object.insert(
                "perms".to_string(),
                json!(perms::to_json_array(characteristic.perms)),
            );
        }
        if query.type_id {
            object.insert("type".to_string(), json!(characteristic.type_id));
        }
        if query.ev {
            object.insert(
                "ev".to_string(),
                json!(self.subscribed(sid, aid, characteristic.iid)),
            );
        }
        object
    }
}

fn parse_query(raw: &str) -> Option<ReadQuery> {
    let mut query = ReadQuery {
        ids: Vec::new(),
        meta: false,
        perms: false,
        type_id: false,
        ev: false,
    };

    for part in raw.split('&') {
        let (key, value) = part.split_once('=')?;
        match key {
            "id" => {
                for pair in value.split(',') {
                    let (aid, iid) = pair.split_once('.')?;
                    query.ids.push((aid.parse().ok()?, iid.parse().ok()?));
                }
            }
            "meta" => query.meta = value == "1",
            "perms" => query.perms = value == "1",
            "type" => query.type_id = value == "1",
            "ev" => query.ev = value == "1",
            _ => return None,
        }
    }

    if query.ids.is_empty() {
        return None;
    }
    Some(query)
}

impl AttributeDb for AccessoryDatabase {
    fn open(&mut self, _sid: Sid) {}

    fn close(&mut self, sid: Sid) {
        for mask in self.subscribers.values_mut() {
            *mask &= !(1 << sid);
        }
        self.pending[sid as usize].clear();
    }

    fn get_db(&mut self, _sid: Sid) -> String {
        let accessories: Vec<serde_json::Value> = self
            .accessories
            .iter()
            .map(|accessory| {
                let services: Vec<serde_json::Value> = accessory
                    .services
                    .iter()
                    .map(|service| {
                        let characteristics: Vec<serde_json::Value> = service
                            .characteristics
                            .iter()
                            .map(|c| {
                                let mut object = serde_json::Map::new();
                                object.insert("iid".to_string(), json!(c.iid));
                                object.insert("type".to_string(), json!(c.type_id));
                                object.insert(
                                    "perms".to_string(),
                                    json!(perms::to_json_array(c.perms)),
                                );
                                c.append_meta(&mut object);
                                if c.readable() {
                                    object.insert("value".to_string(), c.value.to_json());
                                }
                                serde_json::Value::Object(object)
                            })
                            .collect();

                        let mut object = serde_json::Map::new();
                        object.insert("iid".to_string(), json!(service.iid));
                        object.insert("type".to_string(), json!(service.type_id));
                        if service.primary {
                            object.insert("primary".to_string(), json!(true));
                        }
                        if service.hidden {
                            object.insert("hidden".to_string(), json!(true));
                        }
                        object.insert(
                            "characteristics".to_string(),
                            serde_json::Value::Array(characteristics),
                        );
                        serde_json::Value::Object(object)
                    })
                    .collect();

                json!({ "aid": accessory.aid, "services": services })
            })
            .collect();

        json!({ "accessories": accessories }).to_string()
    }

    fn read(&mut self, sid: Sid, query: &str) -> (StatusCode, Option<String>) {
        let Some(query) = parse_query(query) else {
            return (StatusCode::BAD_REQUEST, None);
        };

        let mut entries = Vec::new();
        let mut statuses = Vec::new();
        for &(aid, iid) in &query.ids {
            match self.find(aid, iid) {
                None => {
                    statuses.push(status::RESOURCE_NOT_FOUND);
                    entries.push(json!({ "aid": aid, "iid": iid }));
                }
                Some(characteristic) if !characteristic.readable() => {
                    statuses.push(status::WRITE_ONLY);
                    entries.push(json!({ "aid": aid, "iid": iid }));
                }
                Some(characteristic) => {
                    statuses.push(status::SUCCESS);
                    entries.push(serde_json::Value::Object(self.characteristic_json(
                        sid,
                        aid,
                        characteristic,
                        &query,
                    )));
                }
            }
        }

        let all_ok = statuses.iter().all(|&s| s == status::SUCCESS);
        if !all_ok {
            // multi-status: every entry carries its status
            for (entry, status) in entries.iter_mut().zip(&statuses) {
                if let Some(object) = entry.as_object_mut() {
                    object.insert("status".to_string(), json!(status));
                }
            }
        }

        let body = json!({ "characteristics": entries }).to_string();
        let code = if all_ok {
            StatusCode::OK
        } else {
            StatusCode::MULTI_STATUS
        };
        (code, Some(body))
    }

    fn write(&mut self, sid: Sid, body: &[u8]) -> (StatusCode, Option<String>) {
        let Ok(request) = serde_json::from_slice::<WriteRequest>(body) else {
            return (StatusCode::BAD_REQUEST, None);
        };

        let mut results = Vec::new();
        for item in &request.characteristics {
            let mut item_status = status::SUCCESS;

            let capabilities = self
                .find(item.aid, item.iid)
                .map(|c| (c.notifies(), c.writable()));
            match capabilities {
                None => item_status = status::RESOURCE_NOT_FOUND,
                Some((notifies, writable)) => {
                    if let Some(enabled) = item.ev {
                        if notifies {
                            debug!(
                                sid,
                                aid = item.aid,
                                iid = item.iid,
                                enabled,
                                "event subscription"
                            );
                            self.set_subscription(sid, item.aid, item.iid, enabled);
                        } else {
                            item_status = status::NOTIFICATION_NOT_SUPPORTED;
                        }
                    }

                    if item_status == status::SUCCESS {
                        if let Some(value) = &item.value {
                            if writable {
                                if let Err(code) =
                                    self.apply_value(item.aid, item.iid, value, Some(sid))
                                {
                                    item_status = code;
                                }
                            } else {
                                item_status = status::READ_ONLY;
                            }
                        }
                    }
                }
            }

            results.push((item.aid, item.iid, item_status));
        }

        if results.iter().all(|&(_, _, s)| s == status::SUCCESS) {
            return (StatusCode::NO_CONTENT, None);
        }

        let entries: Vec<serde_json::Value> = results
            .iter()
            .map(|&(aid, iid, s)| json!({ "aid": aid, "iid": iid, "status": s }))
            .collect();
        (
            StatusCode::MULTI_STATUS,
            Some(json!({ "characteristics": entries }).to_string()),
        )
    }

    fn get_events(&mut self, sid: Sid) -> Option<String> {
        let drained = std::mem::take(&mut self.pending[sid as usize]);
        if drained.is_empty() {
            return None;
        }

        let entries: Vec<serde_json::Value> = drained
            .iter()
            .filter_map(|&(aid, iid)| {
                self.find(aid, iid)
                    .map(|c| json!({ "aid": aid, "iid": iid, "value": c.value.to_json() }))
            })
            .collect();
        Some(json!({ "characteristics": entries }).to_string())
    }
}

//! The bus core (C2): device/client registries and the define/update/delete/
//! enumerate/change/message/enable-BLOB operations that connect them.
//!
//! Locking discipline: a registry (`devices`/`clients`) lock is held only
//! long enough to snapshot the current membership into a `Vec` of cloned
//! `Arc` handles, or to insert/remove an entry. Dispatch to each device or
//! client then happens after the registry lock has been released, serialized
//! only by that single device's or client's own mutex — so a callback that
//! re-enters the bus (e.g. a device's `attach` defining a property, which
//! notifies clients) can never deadlock against the registry lock.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use indexmap::IndexMap;
use slog::Logger;

use crate::blob::BlobCache;
use crate::client::Client;
use crate::device::{BlobMode, Device, EnableBlobRecord, PropertyChange};
use crate::error::{BusError, BusResult};
use crate::property::Property;
use crate::selector::Selector;

pub type ClientId = u64;

struct ClientEntry {
    client: Arc<Mutex<dyn Client>>,
    blob_policy: Mutex<Vec<EnableBlobRecord>>,
}

pub struct Bus {
    devices: RwLock<IndexMap<String, Arc<Mutex<dyn Device>>>>,
    clients: RwLock<IndexMap<ClientId, ClientEntry>>,
    properties: RwLock<IndexMap<(String, String), Property>>,
    blobs: BlobCache,
    next_client_id: AtomicU64,
    log: Logger,
}

impl Bus {
    pub fn new(log: Logger) -> Arc<Bus> {
        Arc::new(Bus {
            devices: RwLock::new(IndexMap::new()),
            clients: RwLock::new(IndexMap::new()),
            properties: RwLock::new(IndexMap::new()),
            blobs: BlobCache::new(),
            next_client_id: AtomicU64::new(0),
            log,
        })
    }

    pub fn blobs(&self) -> &BlobCache {
        &self.blobs
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    fn handle(self: &Arc<Self>) -> BusHandle {
        BusHandle(self.clone())
    }

    fn device_snapshot(&self) -> Vec<(String, Arc<Mutex<dyn Device>>)> {
        self.devices
            .read()
            .expect("device registry lock poisoned")
            .iter()
            .map(|(name, device)| (name.clone(), device.clone()))
            .collect()
    }

    fn client_snapshot(&self) -> Vec<(ClientId, Arc<Mutex<dyn Client>>)> {
        self.clients
            .read()
            .expect("client registry lock poisoned")
            .iter()
            .map(|(id, entry)| (*id, entry.client.clone()))
            .collect()
    }

    // -- device / client lifecycle (C7) -------------------------------------

    pub fn attach_device(self: &Arc<Self>, device: Arc<Mutex<dyn Device>>) {
        let name = device.lock().expect("device mutex poisoned").name().to_string();
        self.devices
            .write()
            .expect("device registry lock poisoned")
            .insert(name, device.clone());
        let handle = self.handle();
        device.lock().expect("device mutex poisoned").attach(&handle);
    }

    pub fn detach_device(self: &Arc<Self>, name: &str) -> BusResult<()> {
        let device = self
            .devices
            .write()
            .expect("device registry lock poisoned")
            .shift_remove(name)
            .ok_or_else(|| BusError::UnknownDevice(name.to_string()))?;
        let handle = self.handle();
        device.lock().expect("device mutex poisoned").detach(&handle);
        // Delete anything the device left defined, and reclaim its BLOBs.
        self.delete_property(name, None).ok();
        self.blobs.remove_device(name);
        Ok(())
    }

    pub fn attach_client(self: &Arc<Self>, client: Arc<Mutex<dyn Client>>) -> ClientId {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        self.clients.write().expect("client registry lock poisoned").insert(
            id,
            ClientEntry {
                client: client.clone(),
                blob_policy: Mutex::new(Vec::new()),
            },
        );
        let handle = self.handle();
        client.lock().expect("client mutex poisoned").attach(&handle, id);
        // A newly attached client gets a full snapshot from every device.
        self.enumerate_properties(Selector::all());
        id
    }

    pub fn detach_client(self: &Arc<Self>, id: ClientId) -> BusResult<()> {
        let entry = self
            .clients
            .write()
            .expect("client registry lock poisoned")
            .shift_remove(&id)
            .ok_or(BusError::UnknownClient(id))?;
        let handle = self.handle();
        entry.client.lock().expect("client mutex poisoned").detach(&handle);
        Ok(())
    }

    // -- property propagation (C2) ------------------------------------------

    pub fn define_property(self: &Arc<Self>, property: Property) {
        let key = (property.device.clone(), property.name.clone());
        self.properties
            .write()
            .expect("property table lock poisoned")
            .insert(key, property.clone());
        for (_, client) in self.client_snapshot() {
            client
                .lock()
                .expect("client mutex poisoned")
                .define_property(&property);
        }
    }

    pub fn update_property(self: &Arc<Self>, property: Property) -> BusResult<()> {
        let key = (property.device.clone(), property.name.clone());
        {
            let mut properties = self.properties.write().expect("property table lock poisoned");
            let existing = properties
                .get_mut(&key)
                .ok_or_else(|| BusError::UnknownProperty(key.0.clone(), key.1.clone()))?;
            existing.apply_update(property.clone())?;
        }
        for (_, client) in self.client_snapshot() {
            client
                .lock()
                .expect("client mutex poisoned")
                .update_property(&property);
        }
        Ok(())
    }

    pub fn delete_property(self: &Arc<Self>, device: &str, property: Option<&str>) -> BusResult<()> {
        {
            let mut properties = self.properties.write().expect("property table lock poisoned");
            match property {
                Some(name) => {
                    properties
                        .shift_remove(&(device.to_string(), name.to_string()))
                        .ok_or_else(|| BusError::UnknownProperty(device.to_string(), name.to_string()))?;
                }
                None => properties.retain(|(dev, _), _| dev != device),
            }
        }
        for (_, client) in self.client_snapshot() {
            client
                .lock()
                .expect("client mutex poisoned")
                .delete_property(device, property);
        }
        Ok(())
    }

    pub fn enumerate_properties(self: &Arc<Self>, selector: Selector) {
        let handle = self.handle();
        for (name, device) in self.device_snapshot() {
            if selector.matches_device(&name) {
                device
                    .lock()
                    .expect("device mutex poisoned")
                    .enumerate_properties(&handle, &selector);
            }
        }
    }

    pub fn change_property(self: &Arc<Self>, device_name: &str, mut change: PropertyChange) -> BusResult<()> {
        let device = self
            .devices
            .read()
            .expect("device registry lock poisoned")
            .get(device_name)
            .cloned()
            .ok_or_else(|| BusError::UnknownDevice(device_name.to_string()))?;

        if !change.switch_items.is_empty() {
            let key = (device_name.to_string(), change.property.clone());
            let rule_result = {
                let properties = self.properties.read().expect("property table lock poisoned");
                properties.get(&key).map(|property| {
                    let mut probe = property.clone();
                    probe.set_switches(&change.switch_items).map(|()| probe)
                })
            };
            match rule_result {
                Some(Ok(normalized)) => {
                    // Forward the full, rule-normalized vector rather than just
                    // the items the client mentioned, so the device always sees
                    // a complete desired state for `OneOfMany`/`AtMostOne`.
                    change.switch_items = normalized
                        .items()
                        .iter()
                        .map(|item| (item.name.clone(), matches!(item.value, crate::property::ItemValue::Switch(true))))
                        .collect();
                }
                Some(Err(_)) => {
                    let mut properties = self.properties.write().expect("property table lock poisoned");
                    if let Some(property) = properties.get_mut(&key) {
                        property.state = crate::property::PropertyState::Alert;
                        let rejected = property.clone();
                        drop(properties);
                        for (_, client) in self.client_snapshot() {
                            client.lock().expect("client mutex poisoned").update_property(&rejected);
                        }
                        self.message(
                            Some(device_name),
                            &format!("rejected change to {}: switch rule violation", change.property),
                        );
                    }
                    return Ok(());
                }
                None => {}
            }
        }

        if !change.number_items.is_empty() {
            let key = (device_name.to_string(), change.property.clone());
            let clamp_result = {
                let properties = self.properties.read().expect("property table lock poisoned");
                properties.get(&key).map(|property| {
                    let mut probe = property.clone();
                    probe.set_numbers(&change.number_items).map(|()| probe)
                })
            };
            match clamp_result {
                Some(Ok(normalized)) => {
                    // Only the items the client actually requested are
                    // forwarded, each clamped/snapped to its declared
                    // bounds; untouched items keep whatever the device
                    // already reported.
                    change.number_items = change
                        .number_items
                        .iter()
                        .filter_map(|(name, _)| match normalized.find_item(name).map(|item| &item.value) {
                            Some(crate::property::ItemValue::Number { target, .. }) => Some((name.clone(), *target)),
                            _ => None,
                        })
                        .collect();
                }
                Some(Err(_)) => {
                    let mut properties = self.properties.write().expect("property table lock poisoned");
                    if let Some(property) = properties.get_mut(&key) {
                        property.state = crate::property::PropertyState::Alert;
                        let rejected = property.clone();
                        drop(properties);
                        for (_, client) in self.client_snapshot() {
                            client.lock().expect("client mutex poisoned").update_property(&rejected);
                        }
                        self.message(
                            Some(device_name),
                            &format!("rejected change to {}: invalid number item", change.property),
                        );
                    }
                    return Ok(());
                }
                None => {}
            }
        }

        let handle = self.handle();
        device
            .lock()
            .expect("device mutex poisoned")
            .change_property(&handle, change);
        Ok(())
    }

    pub fn message(self: &Arc<Self>, device: Option<&str>, text: &str) {
        for (_, client) in self.client_snapshot() {
            client.lock().expect("client mutex poisoned").message(device, text);
        }
    }

    pub fn enable_blob(self: &Arc<Self>, client_id: ClientId, record: EnableBlobRecord) -> BusResult<()> {
        let clients = self.clients.read().expect("client registry lock poisoned");
        let entry = clients.get(&client_id).ok_or(BusError::UnknownClient(client_id))?;
        let mut policy = entry.blob_policy.lock().expect("blob policy mutex poisoned");
        policy.retain(|existing| !(existing.device == record.device && existing.property == record.property));
        policy.push(record);
        Ok(())
    }

    /// The BLOB delivery mode in effect for `client_id` against
    /// `device`/`property`. Most specific record wins: fully specified
    /// (device+name) beats device-only beats name-only beats the bare
    /// default record. `default_mode` is the protocol's fallback (XML:
    /// `Never`, JSON: `Url`) used when the client has no matching record at
    /// all.
    pub fn blob_mode_for(&self, client_id: ClientId, device: &str, property: &str, default_mode: BlobMode) -> BlobMode {
        let clients = self.clients.read().expect("client registry lock poisoned");
        let Some(entry) = clients.get(&client_id) else {
            return default_mode;
        };
        let policy = entry.blob_policy.lock().expect("blob policy mutex poisoned");
        let specificity = |record: &&EnableBlobRecord| -> u8 {
            match (record.device.is_some(), record.property.is_some()) {
                (true, true) => 3,
                (true, false) => 2,
                (false, true) => 1,
                (false, false) => 0,
            }
        };
        policy
            .iter()
            .filter(|record| record.device.as_deref().map(|d| d == device).unwrap_or(true))
            .filter(|record| record.property.as_deref().map(|p| p == property).unwrap_or(true))
            .max_by_key(specificity)
            .map(|record| record.mode)
            .unwrap_or(default_mode)
    }
}

/// Cheap-to-clone reference to the bus, handed to `Device`/`Client`
/// callbacks so they can call back into the bus (define properties, send
/// messages) without needing their own `Arc<Bus>` plumbing.
#[derive(Clone)]
pub struct BusHandle(Arc<Bus>);

impl Deref for BusHandle {
    type Target = Arc<Bus>;

    fn deref(&self) -> &Arc<Bus> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{Item, ItemValue, Perm, PropertyState, ProtocolVersion};
    use std::sync::Mutex as StdMutex;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    struct RecordingClient {
        defines: StdMutex<Vec<String>>,
        updates: StdMutex<Vec<String>>,
        deletes: StdMutex<Vec<String>>,
    }

    impl RecordingClient {
        fn new() -> Arc<Mutex<RecordingClient>> {
            Arc::new(Mutex::new(RecordingClient {
                defines: StdMutex::new(Vec::new()),
                updates: StdMutex::new(Vec::new()),
                deletes: StdMutex::new(Vec::new()),
            }))
        }
    }

    impl Client for RecordingClient {
        fn name(&self) -> &str {
            "recorder"
        }

        fn attach(&mut self, _bus: &BusHandle, _id: ClientId) {}

        fn define_property(&mut self, property: &Property) {
            self.defines.lock().unwrap().push(property.name.clone());
        }

        fn update_property(&mut self, property: &Property) {
            self.updates.lock().unwrap().push(property.name.clone());
        }

        fn delete_property(&mut self, device: &str, property: Option<&str>) {
            self.deletes.lock().unwrap().push(format!("{device}.{property:?}"));
        }

        fn message(&mut self, _device: Option<&str>, _text: &str) {}

        fn detach(&mut self, _bus: &BusHandle) {}
    }

    struct ParkDevice;

    impl Device for ParkDevice {
        fn name(&self) -> &str {
            "mount"
        }

        fn attach(&mut self, bus: &BusHandle) {
            let property = Property::new(
                "mount",
                "MOUNT_PARK",
                "Main",
                "Park",
                PropertyState::Ok,
                Perm::ReadWrite,
                None,
                ProtocolVersion::Current20,
                vec![Item::new("PARKED", "Parked", ItemValue::Switch(false))],
            )
            .unwrap();
            bus.define_property(property);
        }

        fn enumerate_properties(&mut self, bus: &BusHandle, selector: &crate::selector::Selector) {
            if selector.matches("mount", "MOUNT_PARK") {
                self.attach(bus);
            }
        }

        fn change_property(&mut self, _bus: &BusHandle, _change: PropertyChange) {}

        fn detach(&mut self, bus: &BusHandle) {
            bus.delete_property("mount", None).ok();
        }
    }

    #[test]
    fn attaching_device_then_client_delivers_a_full_snapshot() {
        let bus = Bus::new(test_logger());
        bus.attach_device(Arc::new(Mutex::new(ParkDevice)));

        let client = RecordingClient::new();
        bus.attach_client(client.clone());

        let defines = client.lock().unwrap().defines.lock().unwrap().clone();
        assert_eq!(defines, vec!["MOUNT_PARK".to_string()]);
    }

    #[test]
    fn detaching_device_notifies_clients_of_deletion() {
        let bus = Bus::new(test_logger());
        bus.attach_device(Arc::new(Mutex::new(ParkDevice)));
        let client = RecordingClient::new();
        bus.attach_client(client.clone());

        bus.detach_device("mount").unwrap();

        let deletes = client.lock().unwrap().deletes.lock().unwrap().clone();
        assert_eq!(deletes, vec!["mount.None".to_string()]);
    }

    #[test]
    fn update_rejects_reshaped_property() {
        let bus = Bus::new(test_logger());
        bus.attach_device(Arc::new(Mutex::new(ParkDevice)));

        let reshaped = Property::new(
            "mount",
            "MOUNT_PARK",
            "Main",
            "Park",
            PropertyState::Ok,
            Perm::ReadWrite,
            None,
            ProtocolVersion::Current20,
            vec![
                Item::new("PARKED", "Parked", ItemValue::Switch(false)),
                Item::new("EXTRA", "Extra", ItemValue::Switch(false)),
            ],
        )
        .unwrap();

        let err = bus.update_property(reshaped).unwrap_err();
        assert!(matches!(err, BusError::Property(_)));
    }

    #[test]
    fn unknown_device_change_is_reported_not_panicked() {
        let bus = Bus::new(test_logger());
        let err = bus
            .change_property(
                "ghost",
                PropertyChange {
                    property: "X".into(),
                    text_items: vec![],
                    number_items: vec![],
                    switch_items: vec![],
                },
            )
            .unwrap_err();
        assert_eq!(err, BusError::UnknownDevice("ghost".into()));
    }

    struct SlotDevice;

    impl Device for SlotDevice {
        fn name(&self) -> &str {
            "wheel"
        }

        fn attach(&mut self, bus: &BusHandle) {
            let property = Property::new(
                "wheel",
                "SLOT",
                "Main",
                "Slot",
                PropertyState::Ok,
                Perm::ReadWrite,
                Some(crate::property::SwitchRule::OneOfMany),
                ProtocolVersion::Current20,
                vec![
                    Item::new("A", "A", ItemValue::Switch(false)),
                    Item::new("B", "B", ItemValue::Switch(true)),
                    Item::new("C", "C", ItemValue::Switch(false)),
                ],
            )
            .unwrap();
            bus.define_property(property);
        }

        fn enumerate_properties(&mut self, bus: &BusHandle, selector: &crate::selector::Selector) {
            if selector.matches("wheel", "SLOT") {
                self.attach(bus);
            }
        }

        fn change_property(&mut self, bus: &BusHandle, change: PropertyChange) {
            let mut property = Property::new(
                "wheel",
                "SLOT",
                "Main",
                "Slot",
                PropertyState::Ok,
                Perm::ReadWrite,
                Some(crate::property::SwitchRule::OneOfMany),
                ProtocolVersion::Current20,
                change
                    .switch_items
                    .iter()
                    .map(|(name, on)| Item::new(name.clone(), name.clone(), ItemValue::Switch(*on)))
                    .collect(),
            )
            .unwrap();
            property.state = PropertyState::Ok;
            bus.update_property(property).ok();
        }

        fn detach(&mut self, bus: &BusHandle) {
            bus.delete_property("wheel", None).ok();
        }
    }

    #[test]
    fn one_of_many_violation_never_reaches_the_device() {
        let bus = Bus::new(test_logger());
        bus.attach_device(Arc::new(Mutex::new(SlotDevice)));
        let client = RecordingClient::new();
        bus.attach_client(client.clone());

        let err = bus.change_property(
            "wheel",
            PropertyChange {
                property: "SLOT".into(),
                text_items: vec![],
                number_items: vec![],
                switch_items: vec![("A".into(), false), ("B".into(), false), ("C".into(), false)],
            },
        );
        assert!(err.is_ok(), "rule violations are reported via state/message, not an error return");

        // The device's change_property would have emitted a second "update"
        // for SLOT with a fully-off vector if it had been invoked; since the
        // bus short-circuits on the rule violation, only the define (from
        // attach) and the alert-state update from the bus itself are seen.
        let updates = client.lock().unwrap().updates.lock().unwrap().clone();
        assert_eq!(updates, vec!["SLOT".to_string()]);
    }

    #[test]
    fn one_of_many_change_normalizes_the_full_vector() {
        let bus = Bus::new(test_logger());
        bus.attach_device(Arc::new(Mutex::new(SlotDevice)));
        let client = RecordingClient::new();
        bus.attach_client(client.clone());

        bus.change_property(
            "wheel",
            PropertyChange {
                property: "SLOT".into(),
                text_items: vec![],
                number_items: vec![],
                switch_items: vec![("A".into(), true)],
            },
        )
        .unwrap();

        let updates = client.lock().unwrap().updates.lock().unwrap().clone();
        assert_eq!(updates, vec!["SLOT".to_string()]);
    }

    struct FocuserDevice {
        received: Arc<StdMutex<Vec<(String, f64)>>>,
    }

    impl Device for FocuserDevice {
        fn name(&self) -> &str {
            "focuser"
        }

        fn attach(&mut self, bus: &BusHandle) {
            let property = Property::new(
                "focuser",
                "FOCUS_POSITION",
                "Main",
                "Position",
                PropertyState::Ok,
                Perm::ReadWrite,
                None,
                ProtocolVersion::Current20,
                vec![Item::new(
                    "POSITION",
                    "Position",
                    ItemValue::Number {
                        min: 0.0,
                        max: 100.0,
                        step: 5.0,
                        format: "%g".into(),
                        target: 0.0,
                        value: 0.0,
                    },
                )],
            )
            .unwrap();
            bus.define_property(property);
        }

        fn enumerate_properties(&mut self, bus: &BusHandle, selector: &crate::selector::Selector) {
            if selector.matches("focuser", "FOCUS_POSITION") {
                self.attach(bus);
            }
        }

        fn change_property(&mut self, _bus: &BusHandle, change: PropertyChange) {
            self.received.lock().unwrap().extend(change.number_items);
        }

        fn detach(&mut self, bus: &BusHandle) {
            bus.delete_property("focuser", None).ok();
        }
    }

    #[test]
    fn number_change_is_clamped_and_snapped_before_reaching_the_device() {
        let bus = Bus::new(test_logger());
        let received = Arc::new(StdMutex::new(Vec::new()));
        bus.attach_device(Arc::new(Mutex::new(FocuserDevice { received: received.clone() })));

        bus.change_property(
            "focuser",
            PropertyChange {
                property: "FOCUS_POSITION".into(),
                text_items: vec![],
                number_items: vec![("POSITION".into(), 523.0)],
                switch_items: vec![],
            },
        )
        .unwrap();

        assert_eq!(*received.lock().unwrap(), vec![("POSITION".to_string(), 100.0)]);
    }

    #[test]
    fn blob_mode_falls_back_to_the_protocol_default() {
        let bus = Bus::new(test_logger());
        let client = RecordingClient::new();
        let id = bus.attach_client(client);
        assert_eq!(bus.blob_mode_for(id, "ccd", "CCD_IMAGE", BlobMode::Never), BlobMode::Never);
        assert_eq!(bus.blob_mode_for(id, "ccd", "CCD_IMAGE", BlobMode::Url), BlobMode::Url);
    }

    #[test]
    fn enable_blob_is_scoped_by_property_first() {
        let bus = Bus::new(test_logger());
        let client = RecordingClient::new();
        let id = bus.attach_client(client);
        bus.enable_blob(
            id,
            EnableBlobRecord {
                device: None,
                property: None,
                mode: BlobMode::Also,
            },
        )
        .unwrap();
        bus.enable_blob(
            id,
            EnableBlobRecord {
                device: None,
                property: Some("CCD_IMAGE".into()),
                mode: BlobMode::Only,
            },
        )
        .unwrap();
        assert_eq!(bus.blob_mode_for(id, "ccd", "CCD_IMAGE", BlobMode::Never), BlobMode::Only);
        assert_eq!(bus.blob_mode_for(id, "ccd", "CCD_TEMPERATURE", BlobMode::Never), BlobMode::Also);
    }

    #[test]
    fn enable_blob_device_scope_beats_the_bare_default() {
        let bus = Bus::new(test_logger());
        let client = RecordingClient::new();
        let id = bus.attach_client(client);
        bus.enable_blob(
            id,
            EnableBlobRecord {
                device: None,
                property: None,
                mode: BlobMode::Also,
            },
        )
        .unwrap();
        bus.enable_blob(
            id,
            EnableBlobRecord {
                device: Some("ccd".into()),
                property: None,
                mode: BlobMode::Never,
            },
        )
        .unwrap();
        assert_eq!(bus.blob_mode_for(id, "ccd", "CCD_IMAGE", BlobMode::Url), BlobMode::Never);
        assert_eq!(bus.blob_mode_for(id, "guider", "CCD_IMAGE", BlobMode::Url), BlobMode::Also);
    }
}

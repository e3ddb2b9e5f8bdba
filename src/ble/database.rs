//! Indexed collection of per-peer device records.
//!
//! The database is the single writer for [`Device`] records: every
//! mutation goes through a typed method here so that registered
//! delegates observe creations, updates, and deletions in the order the
//! causing operations ran. The whole structure is single-threaded and
//! cooperative; delegates are invoked synchronously and must not
//! recursively mutate the database.

use heapless::Vec;

use crate::ble::device::Device;
use crate::ble::{BluetoothState, DeviceAttribute, DeviceState, OperatingSystem};
use crate::config::{MAX_DELEGATES, MAX_DEVICES, MAX_DEVICE_SERVICES};
use crate::datatype::{MacAddress, PayloadData, PseudoAddress, TargetIdentifier, Timestamp, Uuid128};

/// Observer of database changes.
///
/// All methods default to no-ops so implementations only override what
/// they care about.
pub trait DatabaseDelegate {
    fn did_create(&self, device: &Device) {
        let _ = device;
    }

    fn did_update(&self, device: &Device, attribute: DeviceAttribute) {
        let _ = (device, attribute);
    }

    fn did_delete(&self, device: &Device) {
        let _ = device;
    }

    fn bluetooth_state_changed(&self, state: BluetoothState) {
        let _ = state;
    }
}

/// Bounded table of device records with delegate fan-out.
pub struct DeviceDatabase<'d> {
    devices: Vec<Device, MAX_DEVICES>,
    delegates: Vec<&'d dyn DatabaseDelegate, MAX_DELEGATES>,
}

impl<'d> DeviceDatabase<'d> {
    pub fn new() -> Self {
        DeviceDatabase {
            devices: Vec::new(),
            delegates: Vec::new(),
        }
    }

    /// Register a change observer. Returns false when the delegate table
    /// is full.
    pub fn add_delegate(&mut self, delegate: &'d dyn DatabaseDelegate) -> bool {
        self.delegates.push(delegate).is_ok()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, target: &TargetIdentifier) -> bool {
        self.index_of(target).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// Targets of every device satisfying `predicate`.
    pub fn matches(
        &self,
        mut predicate: impl FnMut(&Device) -> bool,
    ) -> Vec<TargetIdentifier, MAX_DEVICES> {
        let mut out = Vec::new();
        for device in self.devices.iter() {
            if predicate(device) {
                // capacities match, cannot overflow
                let _ = out.push(device.target());
            }
        }
        out
    }

    /// Lookup only; `None` for unknown targets.
    pub fn device_for_target(&self, target: &TargetIdentifier) -> Option<&Device> {
        self.index_of(target).map(|i| &self.devices[i])
    }

    /// Get or create the record for a MAC, recording the latest
    /// advertisement bytes when given.
    pub fn device_for_mac(
        &mut self,
        mac: &MacAddress,
        advert: Option<&[u8]>,
        now: Timestamp,
    ) -> Option<&Device> {
        let target = TargetIdentifier::from(*mac);
        let idx = match self.index_of(&target) {
            Some(idx) => {
                if let Some(bytes) = advert {
                    let mut data = crate::ble::radio::AdvertData::new();
                    let take = bytes.len().min(data.capacity());
                    let _ = data.extend_from_slice(&bytes[..take]);
                    self.devices[idx].set_advert(data);
                    self.notify_update(idx, DeviceAttribute::Advert);
                }
                idx
            }
            None => {
                let idx = self.create(target, now)?;
                if let Some(bytes) = advert {
                    let mut data = crate::ble::radio::AdvertData::new();
                    let take = bytes.len().min(data.capacity());
                    let _ = data.extend_from_slice(&bytes[..take]);
                    self.devices[idx].set_advert(data);
                }
                self.notify_create(idx);
                idx
            }
        };
        Some(&self.devices[idx])
    }

    /// Get or create by MAC and pseudo-address. When the pseudo-address
    /// is already known under a different MAC, the peer has rotated its
    /// address: the stale record is retired and its identity state moves
    /// to the record for the current MAC.
    pub fn device_for_mac_and_pseudo(
        &mut self,
        mac: &MacAddress,
        pseudo: PseudoAddress,
        now: Timestamp,
    ) -> Option<&Device> {
        let target = TargetIdentifier::from(*mac);
        if self.index_of(&target).is_none() {
            let idx = self.create(target, now)?;
            self.notify_create(idx);
        }
        self.adopt_pseudo(&target, pseudo);
        self.device_for_target(&target)
    }

    /// Get or create keyed by payload identity.
    pub fn device_for_payload(
        &mut self,
        payload: &PayloadData,
        now: Timestamp,
    ) -> Option<&Device> {
        if let Some(idx) = self
            .devices
            .iter()
            .position(|d| d.payload() == Some(payload))
        {
            return Some(&self.devices[idx]);
        }
        let pseudo = PseudoAddress::from_payload(payload)?;
        let target = TargetIdentifier::from(pseudo);
        let idx = match self.index_of(&target) {
            Some(idx) => idx,
            None => {
                let idx = self.create(target, now)?;
                self.notify_create(idx);
                idx
            }
        };
        self.devices[idx].set_pseudo_address(pseudo);
        self.devices[idx].set_payload(payload.clone(), now);
        self.notify_update(idx, DeviceAttribute::Payload);
        Some(&self.devices[idx])
    }

    /// Delete a record, notifying delegates.
    pub fn remove(&mut self, target: &TargetIdentifier) {
        if let Some(idx) = self.index_of(target) {
            let device = self.devices.swap_remove(idx);
            self.notify_delete(&device);
        }
    }

    // Typed updates, called by the engine.

    pub(crate) fn set_state(&mut self, target: &TargetIdentifier, state: DeviceState, now: Timestamp) {
        if let Some(idx) = self.index_of(target) {
            self.devices[idx].set_state(state, now);
            self.notify_update(idx, DeviceAttribute::State);
        }
    }

    pub(crate) fn add_rssi(&mut self, target: &TargetIdentifier, taken: Timestamp, rssi: i8) {
        if let Some(idx) = self.index_of(target) {
            self.devices[idx].push_rssi(taken, rssi);
            self.notify_update(idx, DeviceAttribute::Rssi);
        }
    }

    pub(crate) fn set_operating_system(&mut self, target: &TargetIdentifier, os: OperatingSystem) {
        if let Some(idx) = self.index_of(target) {
            self.devices[idx].set_operating_system(os);
            self.notify_update(idx, DeviceAttribute::OperatingSystem);
        }
    }

    pub(crate) fn set_services(&mut self, target: &TargetIdentifier, services: &[Uuid128]) {
        if let Some(idx) = self.index_of(target) {
            let mut list: Vec<Uuid128, MAX_DEVICE_SERVICES> = Vec::new();
            for uuid in services.iter().take(MAX_DEVICE_SERVICES) {
                let _ = list.push(*uuid);
            }
            self.devices[idx].set_services(list);
            self.notify_update(idx, DeviceAttribute::Services);
        }
    }

    pub(crate) fn set_payload_characteristic(&mut self, target: &TargetIdentifier, uuid: Uuid128) {
        if let Some(idx) = self.index_of(target) {
            self.devices[idx].set_payload_characteristic(uuid);
            self.notify_update(idx, DeviceAttribute::PayloadCharacteristic);
        }
    }

    pub(crate) fn set_signal_characteristic(&mut self, target: &TargetIdentifier, uuid: Uuid128) {
        if let Some(idx) = self.index_of(target) {
            self.devices[idx].set_signal_characteristic(uuid);
            self.notify_update(idx, DeviceAttribute::SignalCharacteristic);
        }
    }

    pub(crate) fn set_ignore(&mut self, target: &TargetIdentifier, ignore: bool) {
        if let Some(idx) = self.index_of(target) {
            self.devices[idx].set_ignore(ignore);
            self.notify_update(idx, DeviceAttribute::Ignore);
        }
    }

    pub(crate) fn record_connect_failure(&mut self, target: &TargetIdentifier) {
        if let Some(idx) = self.index_of(target) {
            self.devices[idx].record_connect_failure();
        }
    }

    /// Commit a completed payload read. Derives the pseudo-address,
    /// merges any stale record for the same peer, then stores the
    /// payload.
    pub(crate) fn set_payload(
        &mut self,
        target: &TargetIdentifier,
        payload: PayloadData,
        now: Timestamp,
    ) {
        if self.index_of(target).is_none() {
            debug!("payload for unknown target {:?}", target);
            return;
        }
        if let Some(pseudo) = PseudoAddress::from_payload(&payload) {
            self.adopt_pseudo(target, pseudo);
        }
        // adopt_pseudo may have shuffled the table
        if let Some(idx) = self.index_of(target) {
            self.devices[idx].set_payload(payload, now);
            self.notify_update(idx, DeviceAttribute::Payload);
        }
    }

    /// Fan out a controller power-state change.
    pub(crate) fn notify_bluetooth_state(&self, state: BluetoothState) {
        for delegate in self.delegates.iter() {
            delegate.bluetooth_state_changed(state);
        }
    }

    /// Record `pseudo` on `target`, retiring any other record that
    /// already carries it (the peer's previous MAC).
    fn adopt_pseudo(&mut self, target: &TargetIdentifier, pseudo: PseudoAddress) {
        let stale = self
            .devices
            .iter()
            .position(|d| d.pseudo_address() == Some(pseudo) && d.target() != *target);
        if let Some(stale_idx) = stale {
            let retired = self.devices.swap_remove(stale_idx);
            debug!(
                "peer rotated address: {:?} -> {:?}",
                retired.target(),
                target
            );
            if let Some(idx) = self.index_of(target) {
                self.devices[idx].absorb(&retired);
            }
            self.notify_delete(&retired);
        }
        if let Some(idx) = self.index_of(target) {
            if self.devices[idx].pseudo_address() != Some(pseudo) {
                self.devices[idx].set_pseudo_address(pseudo);
                self.notify_update(idx, DeviceAttribute::PseudoAddress);
            }
        }
    }

    fn index_of(&self, target: &TargetIdentifier) -> Option<usize> {
        self.devices.iter().position(|d| d.target() == *target)
    }

    /// Insert a fresh record, evicting a stale one when at capacity.
    /// Does not notify creation; callers do that once the record is
    /// fully initialised.
    fn create(&mut self, target: TargetIdentifier, now: Timestamp) -> Option<usize> {
        if self.devices.is_full() && !self.evict_one() {
            warn!("device table full; dropping {:?}", target);
            return None;
        }
        match self.devices.push(Device::new(target, now)) {
            Ok(()) => Some(self.devices.len() - 1),
            Err(_) => None,
        }
    }

    /// Drop the oldest ignored device, or failing that the oldest
    /// disconnected one. Live connections are never evicted.
    fn evict_one(&mut self) -> bool {
        let victim = self
            .devices
            .iter()
            .enumerate()
            .filter(|(_, d)| d.ignored())
            .min_by_key(|(_, d)| d.created_at())
            .map(|(i, _)| i)
            .or_else(|| {
                self.devices
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| d.state() == DeviceState::Disconnected)
                    .min_by_key(|(_, d)| d.created_at())
                    .map(|(i, _)| i)
            });
        match victim {
            Some(idx) => {
                let device = self.devices.swap_remove(idx);
                debug!("evicting stale device {:?}", device.target());
                self.notify_delete(&device);
                true
            }
            None => false,
        }
    }

    fn notify_create(&self, idx: usize) {
        let device = &self.devices[idx];
        for delegate in self.delegates.iter() {
            delegate.did_create(device);
        }
    }

    fn notify_update(&self, idx: usize, attribute: DeviceAttribute) {
        let device = &self.devices[idx];
        for delegate in self.delegates.iter() {
            delegate.did_update(device, attribute);
        }
    }

    fn notify_delete(&self, device: &Device) {
        for delegate in self.delegates.iter() {
            delegate.did_delete(device);
        }
    }
}

impl<'d> Default for DeviceDatabase<'d> {
    fn default() -> Self {
        DeviceDatabase::new()
    }
}

#[cfg(test)]
mod tests {
    use core::cell::RefCell;

    use super::*;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x10, 0x20, 0x30, 0x40, 0x50, last])
    }

    fn ts(at: u64) -> Timestamp {
        Timestamp::from_millis(at)
    }

    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    enum Change {
        Created(TargetIdentifier),
        Updated(TargetIdentifier, DeviceAttribute),
        Deleted(TargetIdentifier),
        Bluetooth(BluetoothState),
    }

    #[derive(Default)]
    struct Recorder {
        changes: RefCell<std::vec::Vec<Change>>,
    }

    impl DatabaseDelegate for Recorder {
        fn did_create(&self, device: &Device) {
            self.changes
                .borrow_mut()
                .push(Change::Created(device.target()));
        }

        fn did_update(&self, device: &Device, attribute: DeviceAttribute) {
            self.changes
                .borrow_mut()
                .push(Change::Updated(device.target(), attribute));
        }

        fn did_delete(&self, device: &Device) {
            self.changes
                .borrow_mut()
                .push(Change::Deleted(device.target()));
        }

        fn bluetooth_state_changed(&self, state: BluetoothState) {
            self.changes.borrow_mut().push(Change::Bluetooth(state));
        }
    }

    #[test]
    fn create_then_update_fires_in_order() {
        let recorder = Recorder::default();
        let mut db = DeviceDatabase::new();
        assert!(db.add_delegate(&recorder));

        db.device_for_mac(&mac(1), Some(&[0x02, 0x01, 0x06]), ts(10))
            .unwrap();
        let target = TargetIdentifier::from(mac(1));
        db.add_rssi(&target, ts(20), -60);
        db.device_for_mac(&mac(1), Some(&[0x02, 0x01, 0x06]), ts(30))
            .unwrap();

        let changes = recorder.changes.borrow();
        assert_eq!(
            *changes,
            vec![
                Change::Created(target),
                Change::Updated(target, DeviceAttribute::Rssi),
                Change::Updated(target, DeviceAttribute::Advert),
            ]
        );
    }

    #[test]
    fn lookup_does_not_create() {
        let db = DeviceDatabase::new();
        assert!(db
            .device_for_target(&TargetIdentifier::from(mac(9)))
            .is_none());
    }

    #[test]
    fn remove_notifies_delete() {
        let recorder = Recorder::default();
        let mut db = DeviceDatabase::new();
        db.add_delegate(&recorder);
        db.device_for_mac(&mac(1), None, ts(0)).unwrap();
        let target = TargetIdentifier::from(mac(1));

        db.remove(&target);
        assert!(db.is_empty());
        assert_eq!(
            recorder.changes.borrow().last(),
            Some(&Change::Deleted(target))
        );
    }

    #[test]
    fn payload_commit_merges_rotated_mac() {
        let recorder = Recorder::default();
        let mut db = DeviceDatabase::new();
        db.add_delegate(&recorder);

        // first sighting under the old MAC, payload read succeeds
        let old = TargetIdentifier::from(mac(1));
        db.device_for_mac(&mac(1), None, ts(0)).unwrap();
        let payload = PayloadData::from_bytes(&[8, 0, 1, 0, 2, 9, 9, 9, 9, 9, 9, 7]).unwrap();
        db.set_operating_system(&old, OperatingSystem::Android);
        db.set_payload(&old, payload.clone(), ts(5));

        // peer rotates its MAC, same payload read again
        let new = TargetIdentifier::from(mac(2));
        db.device_for_mac(&mac(2), None, ts(100)).unwrap();
        db.set_payload(&new, payload, ts(105));

        assert_eq!(db.len(), 1);
        let merged = db.device_for_target(&new).unwrap();
        assert_eq!(merged.operating_system(), OperatingSystem::Android);
        assert!(merged.payload().is_some());
        assert!(recorder.changes.borrow().contains(&Change::Deleted(old)));
    }

    #[test]
    fn device_for_mac_and_pseudo_retires_stale_record() {
        let mut db = DeviceDatabase::new();
        let pseudo = PseudoAddress::new([9, 9, 9, 9, 9, 9]);

        db.device_for_mac_and_pseudo(&mac(1), pseudo, ts(0)).unwrap();
        assert_eq!(db.len(), 1);

        db.device_for_mac_and_pseudo(&mac(2), pseudo, ts(50)).unwrap();
        assert_eq!(db.len(), 1);
        let device = db
            .device_for_target(&TargetIdentifier::from(mac(2)))
            .unwrap();
        assert_eq!(device.pseudo_address(), Some(pseudo));
        assert!(db
            .device_for_target(&TargetIdentifier::from(mac(1)))
            .is_none());
    }

    #[test]
    fn device_for_payload_creates_and_finds() {
        let mut db = DeviceDatabase::new();
        let payload = PayloadData::from_bytes(&[1, 2, 3, 4, 5, 6, 7]).unwrap();

        let created = db.device_for_payload(&payload, ts(0)).unwrap().target();
        assert_eq!(db.len(), 1);

        let found = db.device_for_payload(&payload, ts(10)).unwrap().target();
        assert_eq!(created, found);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn matches_filters_by_predicate() {
        let mut db = DeviceDatabase::new();
        db.device_for_mac(&mac(1), None, ts(0)).unwrap();
        db.device_for_mac(&mac(2), None, ts(1)).unwrap();
        db.set_ignore(&TargetIdentifier::from(mac(1)), true);

        let pending = db.matches(|d| !d.ignored() && d.payload().is_none());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0], TargetIdentifier::from(mac(2)));
    }

    #[test]
    fn ignored_devices_are_retained() {
        let mut db = DeviceDatabase::new();
        db.device_for_mac(&mac(1), None, ts(0)).unwrap();
        let target = TargetIdentifier::from(mac(1));
        db.set_ignore(&target, true);
        assert!(db.device_for_target(&target).unwrap().ignored());
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn eviction_prefers_ignored_devices() {
        let mut db = DeviceDatabase::new();
        for i in 0..MAX_DEVICES {
            db.device_for_mac(&MacAddress::new([0, 0, 0, 0, 1, i as u8]), None, ts(i as u64))
                .unwrap();
        }
        let first = TargetIdentifier::from(MacAddress::new([0, 0, 0, 0, 1, 3]));
        db.set_ignore(&first, true);

        db.device_for_mac(&mac(0xfe), None, ts(1_000)).unwrap();
        assert_eq!(db.len(), MAX_DEVICES);
        assert!(db.device_for_target(&first).is_none());
        assert!(db
            .device_for_target(&TargetIdentifier::from(mac(0xfe)))
            .is_some());
    }

    #[test]
    fn bluetooth_state_fans_out() {
        let recorder = Recorder::default();
        let mut db = DeviceDatabase::new();
        db.add_delegate(&recorder);
        db.notify_bluetooth_state(BluetoothState::PoweredOn);
        assert_eq!(
            recorder.changes.borrow().as_slice(),
            &[Change::Bluetooth(BluetoothState::PoweredOn)]
        );
    }
}

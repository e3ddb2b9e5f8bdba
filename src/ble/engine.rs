//! Per-peer connection state machine.
//!
//! The engine sits between the radio adapter's callbacks and the
//! [`Coordinator`](crate::ble::coordinator::Coordinator). For each peer
//! it drives the exchange
//!
//! ```text
//! disconnected -> connecting -> connected -> discovering -> reading -> disconnected
//! ```
//!
//! under a single-threaded cooperative model: the only blocking
//! primitive is [`wait_with_timeout`](ConnectionEngine::wait_with_timeout),
//! which drains radio events between sleeps. The shared radio cannot
//! scan and initiate a connection at once, so both scanning and
//! advertising pause around every self-initiated connect and are
//! restored by the reconciliation sweep.

use core::time::Duration;

use heapless::Vec;

use crate::ble::database::DeviceDatabase;
use crate::ble::radio::{
    AdvertData, ConnHandle, ConnectionParams, GattCharacteristic, GattChunk, Radio, RadioEvent,
};
use crate::ble::{BluetoothState, DeviceState, HeraldCharacteristic, LinkState, OperatingSystem};
use crate::config::{
    CONNECT_TIMEOUT, DISCOVERY_TIMEOUT, HCI_REMOTE_USER_TERMINATED, HERALD_SERVICE_UUID,
    MAX_CONNECTION_STATES, MAX_DISCOVERED_CHARACTERISTICS, PAYLOAD_READ_TIMEOUT, POLL_PERIOD,
    REMOTE_IDLE_TIMEOUT, SCANNING_ENABLED, SCAN_FILTER_DUPLICATES, SCAN_PASSIVE,
};
use crate::datatype::{MacAddress, PayloadData, TargetIdentifier, Timestamp};

/// Book-keeping for one in-flight or live link.
///
/// Exists iff a connection attempt is in flight or a connection is up;
/// `handle` is `None` exactly when the link is down.
pub struct ConnectionState {
    target: TargetIdentifier,
    link: LinkState,
    handle: Option<ConnHandle>,
    address: MacAddress,
    read_buffer: PayloadData,
    /// The peer opened this link. We must not force it closed; it goes
    /// away when the peer drops it or the idle sweep reaps it.
    remote_instigated: bool,
}

impl ConnectionState {
    fn new(target: TargetIdentifier) -> Self {
        ConnectionState {
            target,
            link: LinkState::Disconnected,
            handle: None,
            address: target.mac_address(),
            read_buffer: PayloadData::new(),
            remote_instigated: false,
        }
    }

    pub fn target(&self) -> TargetIdentifier {
        self.target
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn handle(&self) -> Option<ConnHandle> {
        self.handle
    }

    pub fn remote_instigated(&self) -> bool {
        self.remote_instigated
    }
}

/// The connection/discovery state engine.
///
/// Owns the radio, the device database, and the connection-state table.
/// Radio callbacks enter through [`pump`](ConnectionEngine::pump); the
/// coordinator calls the activity methods (`open_connection`,
/// `service_discovery`, `read_payload`, `close_connection`) strictly one
/// peer at a time.
pub struct ConnectionEngine<'d, R: Radio> {
    radio: R,
    database: DeviceDatabase<'d>,
    states: Vec<ConnectionState, MAX_CONNECTION_STATES>,
    scanning_enabled: bool,
    scanning: bool,
    advertising: bool,
}

impl<'d, R: Radio> ConnectionEngine<'d, R> {
    pub fn new(radio: R, database: DeviceDatabase<'d>) -> Self {
        ConnectionEngine {
            radio,
            database,
            states: Vec::new(),
            scanning_enabled: SCANNING_ENABLED,
            scanning: false,
            advertising: false,
        }
    }

    pub fn database(&self) -> &DeviceDatabase<'d> {
        &self.database
    }

    pub fn database_mut(&mut self) -> &mut DeviceDatabase<'d> {
        &mut self.database
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn now(&self) -> Timestamp {
        self.radio.now()
    }

    pub fn set_scanning_enabled(&mut self, enabled: bool) {
        self.scanning_enabled = enabled;
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn connection_count(&self) -> usize {
        self.states.len()
    }

    pub fn state_of(&self, target: &TargetIdentifier) -> Option<&ConnectionState> {
        self.state_index(target).map(|i| &self.states[i])
    }

    /// Whether an exchange with `target` is currently in progress. An
    /// idle connected link does not count: it can be reused.
    pub fn in_flight(&self, target: &TargetIdentifier) -> bool {
        self.state_of(target).map_or(false, |s| {
            matches!(
                s.link,
                LinkState::Connecting | LinkState::Discovering | LinkState::Reading
            )
        })
    }

    /// Bring the radio up: advertise always, scan when enabled.
    pub fn start(&mut self) {
        if !self.scanning_enabled {
            debug!("scanning disabled by configuration");
            return;
        }
        info!("proximity engine starting");
        self.start_advertising();
        self.start_scanning();
        self.database.notify_bluetooth_state(BluetoothState::PoweredOn);
    }

    /// Stop scanning. Advertising continues so peers can still find us.
    pub fn stop(&mut self) {
        if !self.scanning_enabled {
            return;
        }
        info!("proximity engine stopping");
        self.stop_scanning();
        self.database.notify_bluetooth_state(BluetoothState::PoweredOff);
    }

    /// Drain and dispatch every pending radio callback.
    pub fn pump(&mut self) {
        while let Some(event) = self.radio.poll_event() {
            self.dispatch(event);
        }
    }

    /// Re-evaluate `keep_waiting` every `period`, sleeping in between
    /// and draining radio events before each check. Returns
    /// `Duration::ZERO` on early completion, else the time spent.
    pub fn wait_with_timeout(
        &mut self,
        budget: Duration,
        period: Duration,
        mut keep_waiting: impl FnMut(&Self) -> bool,
    ) -> Duration {
        self.pump();
        if !keep_waiting(self) {
            return Duration::ZERO;
        }
        let start = self.radio.now();
        let mut spent = self.radio.now().saturating_duration_since(start);
        while spent < budget {
            self.radio.sleep(period);
            self.pump();
            if !keep_waiting(self) {
                return Duration::ZERO;
            }
            spent = self.radio.now().saturating_duration_since(start);
        }
        spent
    }

    /// Connect to a peer, or reuse its live link. Scanning and
    /// advertising pause for the duration of the attempt.
    ///
    /// Returns true once the link is up.
    pub fn open_connection(&mut self, target: &TargetIdentifier) -> bool {
        debug!("open_connection {:?}", target);
        let Some(idx) = self.ensure_state(target) else {
            warn!("connection table full; cannot track {:?}", target);
            return false;
        };

        // the radio cannot scan, advertise, and connect at once
        self.stop_scanning();
        self.stop_advertising();

        if self.states[idx].handle.is_some() {
            debug!("existing connection to {:?}; reusing", target);
            return true;
        }

        self.states[idx].link = LinkState::Connecting;
        // we are now definitely the instigators
        self.states[idx].remote_instigated = false;
        let addr = self.states[idx].address;

        match self.radio.connect(&addr, &ConnectionParams::default()) {
            Err(err) => {
                warn!("connect to {:?} failed: {:?}", addr, err);
                self.states[idx].link = LinkState::Disconnected;
                if err.is_transient() {
                    // stamp the failure so the coordinator's backoff applies
                    let now = self.radio.now();
                    self.database.set_state(target, DeviceState::Disconnected, now);
                }
                // advertising resumes at once; scanning waits for reconciliation
                self.start_advertising();
                false
            }
            Ok(handle) => {
                self.states[idx].handle = Some(handle);
                let t = *target;
                let spent = self.wait_with_timeout(CONNECT_TIMEOUT, POLL_PERIOD, |e| {
                    e.state_of(&t).map_or(false, |s| s.link == LinkState::Connecting)
                });
                if !spent.is_zero() {
                    warn!(
                        "connect to {:?} timed out after {} ms",
                        addr,
                        spent.as_millis() as u64
                    );
                    self.abandon_attempt(&t);
                    return false;
                }
                self.state_of(&t).map_or(false, |s| s.link == LinkState::Connected)
            }
        }
    }

    /// Discover the proximity service on a connected peer. Completion is
    /// observed through the device record's service list; a found
    /// payload characteristic starts the chunked read immediately.
    pub fn service_discovery(&mut self, target: &TargetIdentifier) -> bool {
        let Some(idx) = self.state_index(target) else {
            debug!("no connection state for discovery on {:?}", target);
            return false;
        };
        if self.states[idx].link != LinkState::Connected {
            debug!("not connected to {:?}; skipping discovery", target);
            return false;
        }
        let Some(handle) = self.states[idx].handle else {
            debug!("connection state for {:?} has no handle", target);
            return false;
        };

        self.states[idx].link = LinkState::Discovering;
        if let Err(err) = self.radio.discover_service(handle, &HERALD_SERVICE_UUID) {
            warn!("could not start discovery on {:?}: {:?}", target, err);
            // ensures a disconnect callback completes the exchange
            self.radio.disconnect(handle, HCI_REMOTE_USER_TERMINATED);
            return false;
        }

        let t = *target;
        let spent = self.wait_with_timeout(DISCOVERY_TIMEOUT, POLL_PERIOD, |e| {
            let link_up = e.state_of(&t).map_or(false, |s| s.handle.is_some());
            let services_set = e
                .database
                .device_for_target(&t)
                .map_or(false, |d| d.has_services_set());
            link_up && !services_set
        });
        if !spent.is_zero() {
            debug!(
                "service discovery on {:?} timed out after {} ms",
                t,
                spent.as_millis() as u64
            );
            return false;
        }
        self.database
            .device_for_target(&t)
            .map_or(false, |d| d.has_services_set() && !d.ignored())
    }

    /// Wait for the payload read begun during discovery to commit.
    pub fn read_payload(&mut self, target: &TargetIdentifier) -> bool {
        if self.state_index(target).is_none() {
            debug!("no connection state for payload read on {:?}", target);
            return false;
        }
        let t = *target;
        let spent = self.wait_with_timeout(PAYLOAD_READ_TIMEOUT, POLL_PERIOD, |e| {
            e.state_of(&t).map_or(false, |s| s.link == LinkState::Reading)
        });
        if !spent.is_zero() {
            debug!("payload read on {:?} timed out", t);
            return false;
        }
        self.database
            .device_for_target(&t)
            .map_or(false, |d| d.payload().is_some())
    }

    /// Close the exchange with a peer. Remote-instigated links stay up;
    /// returns true when the link remains open.
    pub fn close_connection(&mut self, target: &TargetIdentifier) -> bool {
        let Some(idx) = self.state_index(target) else {
            return false;
        };
        debug!("close_connection {:?}", target);
        if let Some(handle) = self.states[idx].handle {
            if self.states[idx].remote_instigated {
                debug!("peer opened this link; leaving it up");
            } else {
                self.radio.disconnect(handle, HCI_REMOTE_USER_TERMINATED);
            }
        } else {
            // peer already dropped the link
            self.states[idx].remote_instigated = false;
        }
        if !self.states[idx].remote_instigated {
            self.states.swap_remove(idx);
            return false;
        }
        true
    }

    /// Reconciliation sweep: resync cached states with the radio's
    /// ground truth, reap idle remote-instigated links, drop dead
    /// states, and restart scanning and advertising.
    ///
    /// Needed because the host stack does not always deliver disconnect
    /// callbacks, e.g. for peers that accept a connection but never
    /// finish the exchange.
    pub fn reconcile(&mut self) {
        if !self.states.is_empty() {
            debug!("reconciling {} connection states", self.states.len());
            let now = self.radio.now();
            for idx in 0..self.states.len() {
                let target = self.states[idx].target;
                let addr = self.states[idx].address;
                self.states[idx].handle = self.radio.connection_for_addr(&addr);
                if self.states[idx].link == LinkState::Disconnected {
                    self.states[idx].handle = None;
                }
                if let Some(handle) = self.states[idx].handle {
                    if self.states[idx].remote_instigated {
                        let idle = self
                            .database
                            .device_for_target(&target)
                            .and_then(|d| d.time_since_connected(now));
                        if idle.map_or(false, |d| d > REMOTE_IDLE_TIMEOUT) {
                            debug!("remote-instigated link {:?} idle; disconnecting", target);
                            self.radio.disconnect(handle, HCI_REMOTE_USER_TERMINATED);
                            self.states[idx].handle = None;
                        }
                    }
                }
            }
            // a null handle means the radio is done with the link
            let mut idx = 0;
            while idx < self.states.len() {
                if self.states[idx].handle.is_none() {
                    self.states.swap_remove(idx);
                } else {
                    idx += 1;
                }
            }
        }
        self.start_scanning();
        self.start_advertising();
    }

    fn dispatch(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::Advertisement {
                addr,
                rssi,
                adv_type: _,
                data,
            } => self.on_advertisement(addr, rssi, &data),
            RadioEvent::Connected { handle, addr, err } => self.on_connected(handle, addr, err),
            RadioEvent::Disconnected { handle, reason } => self.on_disconnected(handle, reason),
            RadioEvent::DiscoveryCompleted {
                handle,
                characteristics,
            } => self.on_discovery_completed(handle, &characteristics),
            RadioEvent::ServiceNotFound { handle } => self.on_service_not_found(handle),
            RadioEvent::DiscoveryError { handle, err } => self.on_discovery_error(handle, err),
            RadioEvent::GattRead { handle, err, chunk } => {
                self.on_gatt_read(handle, err, chunk.as_ref())
            }
        }
    }

    fn on_advertisement(&mut self, addr: MacAddress, rssi: i8, data: &AdvertData) {
        let now = self.radio.now();
        let target = TargetIdentifier::from(addr);
        let (known, ignored) = match self.database.device_for_mac(&addr, Some(data.as_slice()), now) {
            Some(device) => (device.latest_rssi().is_some(), device.ignored()),
            None => return,
        };
        if ignored {
            return;
        }
        if !known {
            debug!("new contact {:?} at {} dBm", addr, rssi);
        }
        // record the reading last, once the other fields are settled
        self.database.add_rssi(&target, now, rssi);
    }

    fn on_connected(&mut self, handle: ConnHandle, addr: MacAddress, err: u8) {
        let idx = match self.state_index_by_handle(handle) {
            Some(idx) => idx,
            None => {
                // peer-initiated connection: start tracking it
                let target = TargetIdentifier::from(addr);
                let Some(idx) = self.ensure_state(&target) else {
                    warn!("connection table full; refusing {:?}", addr);
                    self.radio.disconnect(handle, HCI_REMOTE_USER_TERMINATED);
                    return;
                };
                self.states[idx].remote_instigated = true;
                self.states[idx].handle = Some(handle);
                self.states[idx].address = addr;
                idx
            }
        };
        let target = self.states[idx].target;
        let now = self.radio.now();
        let now_known = self.database.device_for_mac(&addr, None, now).is_some();

        if err != 0 {
            // some peers accept the connection yet report an error;
            // count it as a failed attempt
            debug!("connected callback for {:?} with error {}", target, err);
            self.states[idx].handle = None;
            self.states[idx].link = LinkState::Disconnected;
            if now_known {
                self.database.set_state(&target, DeviceState::Disconnected, now);
            }
            self.start_advertising();
            return;
        }

        debug!("connected to {:?}", target);
        self.states[idx].address = addr;
        self.states[idx].handle = Some(handle);
        self.states[idx].link = LinkState::Connected;
        if now_known {
            self.database.set_state(&target, DeviceState::Connected, now);
        }
    }

    fn on_disconnected(&mut self, handle: ConnHandle, reason: u8) {
        let Some(idx) = self.state_index_by_handle(handle) else {
            debug!("disconnect for unknown handle {:?}", handle);
            return;
        };
        let target = self.states[idx].target;
        if reason != 0 {
            debug!("{:?} disconnected, reason {}", target, reason);
        }
        if self.states[idx].link == LinkState::Reading {
            debug!("link dropped mid-read; partial payload discarded");
        }
        self.states[idx].read_buffer.clear();
        self.states[idx].link = LinkState::Disconnected;
        self.states[idx].handle = None;
        let now = self.radio.now();
        self.database.set_state(&target, DeviceState::Disconnected, now);
        if !self.states[idx].remote_instigated {
            self.states.swap_remove(idx);
        }
    }

    fn on_discovery_completed(
        &mut self,
        handle: ConnHandle,
        characteristics: &Vec<GattCharacteristic, MAX_DISCOVERED_CHARACTERISTICS>,
    ) {
        let Some(idx) = self.state_index_by_handle(handle) else {
            debug!("discovery result for unknown handle {:?}", handle);
            return;
        };
        let target = self.states[idx].target;
        debug!(
            "discovery on {:?} found {} characteristics",
            target,
            characteristics.len()
        );

        let mut payload_found = false;
        for characteristic in characteristics.iter() {
            match HeraldCharacteristic::classify(&characteristic.uuid) {
                Some(HeraldCharacteristic::Payload) => {
                    debug!("payload characteristic found; reading");
                    self.database
                        .set_payload_characteristic(&target, characteristic.uuid);
                    self.states[idx].read_buffer.clear();
                    self.states[idx].link = LinkState::Reading;
                    payload_found = true;
                    if let Err(err) =
                        self.radio
                            .read_characteristic(handle, characteristic.value_handle, 0)
                    {
                        warn!("payload read failed to start: {:?}", err);
                    }
                }
                Some(HeraldCharacteristic::SignalAndroid) => {
                    self.database
                        .set_signal_characteristic(&target, characteristic.uuid);
                    self.database
                        .set_operating_system(&target, OperatingSystem::Android);
                }
                Some(HeraldCharacteristic::SignalIos) => {
                    self.database
                        .set_signal_characteristic(&target, characteristic.uuid);
                    self.database
                        .set_operating_system(&target, OperatingSystem::Ios);
                }
                None => {
                    debug!("characteristic {:?} is not ours", characteristic.uuid);
                }
            }
        }

        if !payload_found {
            debug!("payload characteristic missing; ignoring {:?}", target);
            self.database.set_ignore(&target, true);
        }

        // record the service list as the very last action so waiters
        // observe a fully-populated record
        self.database.set_services(&target, &[HERALD_SERVICE_UUID]);
    }

    fn on_service_not_found(&mut self, handle: ConnHandle) {
        let Some(idx) = self.state_index_by_handle(handle) else {
            return;
        };
        let target = self.states[idx].target;
        debug!("proximity service not found on {:?}; ignoring device", target);
        self.database.set_services(&target, &[]);
        self.database.set_ignore(&target, true);
        if !self.states[idx].remote_instigated {
            self.radio.disconnect(handle, HCI_REMOTE_USER_TERMINATED);
        }
    }

    fn on_discovery_error(&mut self, handle: ConnHandle, err: i32) {
        let Some(idx) = self.state_index_by_handle(handle) else {
            return;
        };
        let target = self.states[idx].target;
        // transient: the device keeps its ignore flag unset and gets
        // retried on a later tick
        debug!("discovery on {:?} failed with {}", target, err);
        if !self.states[idx].remote_instigated {
            self.radio.disconnect(handle, HCI_REMOTE_USER_TERMINATED);
        }
    }

    fn on_gatt_read(&mut self, handle: ConnHandle, err: u8, chunk: Option<&GattChunk>) {
        let Some(idx) = self.state_index_by_handle(handle) else {
            debug!("read callback for unknown handle {:?}", handle);
            return;
        };
        let target = self.states[idx].target;
        match chunk {
            Some(data) => {
                if self.states[idx].read_buffer.append(data).is_err() {
                    warn!("payload from {:?} overflows buffer; truncating", target);
                }
            }
            None => {
                if err == 0 {
                    let payload = self.states[idx].read_buffer.clone();
                    debug!(
                        "payload read from {:?} complete: {:?}",
                        target,
                        payload
                    );
                    let now = self.radio.now();
                    self.database.set_payload(&target, payload, now);
                } else {
                    debug!("read from {:?} ended with error {}; discarding", target, err);
                }
                self.states[idx].read_buffer.clear();
                self.states[idx].link = LinkState::Connected;
            }
        }
    }

    /// Give up on a connection attempt that never completed: release the
    /// handle, stamp the failure, drop the state.
    fn abandon_attempt(&mut self, target: &TargetIdentifier) {
        if let Some(idx) = self.state_index(target) {
            if let Some(handle) = self.states[idx].handle.take() {
                self.radio.disconnect(handle, HCI_REMOTE_USER_TERMINATED);
            }
            self.states[idx].link = LinkState::Disconnected;
            self.states.swap_remove(idx);
        }
        let now = self.radio.now();
        self.database.set_state(target, DeviceState::Disconnected, now);
        self.start_advertising();
    }

    fn state_index(&self, target: &TargetIdentifier) -> Option<usize> {
        self.states.iter().position(|s| s.target == *target)
    }

    fn state_index_by_handle(&self, handle: ConnHandle) -> Option<usize> {
        self.states.iter().position(|s| s.handle == Some(handle))
    }

    /// Find or create the state slot for `target`, purging dead slots
    /// when the table is full.
    fn ensure_state(&mut self, target: &TargetIdentifier) -> Option<usize> {
        if let Some(idx) = self.state_index(target) {
            return Some(idx);
        }
        if self.states.is_full() {
            let mut idx = 0;
            while idx < self.states.len() {
                if self.states[idx].handle.is_none()
                    && self.states[idx].link == LinkState::Disconnected
                {
                    self.states.swap_remove(idx);
                } else {
                    idx += 1;
                }
            }
        }
        match self.states.push(ConnectionState::new(*target)) {
            Ok(()) => Some(self.states.len() - 1),
            Err(_) => None,
        }
    }

    fn start_scanning(&mut self) {
        if self.scanning || !self.scanning_enabled {
            return;
        }
        match self.radio.start_scan(SCAN_PASSIVE, SCAN_FILTER_DUPLICATES) {
            Ok(()) => self.scanning = true,
            Err(err) => warn!("starting scan failed: {:?}", err),
        }
    }

    fn stop_scanning(&mut self) {
        if self.scanning {
            self.scanning = false;
            self.radio.stop_scan();
        }
    }

    fn start_advertising(&mut self) {
        if self.advertising {
            return;
        }
        match self.radio.start_advertise(&HERALD_SERVICE_UUID) {
            Ok(()) => self.advertising = true,
            Err(err) => warn!("starting advertising failed: {:?}", err),
        }
    }

    fn stop_advertising(&mut self) {
        if self.advertising {
            self.advertising = false;
            self.radio.stop_advertise();
        }
    }
}

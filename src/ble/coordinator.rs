//! Activity scheduling over the device database.
//!
//! Each tick inspects the database for peers that still need their
//! identity payload and runs the full exchange for one peer at a time:
//! open connection, discover the service, read the payload, close. The
//! reconciliation sweep runs at the start of the tick and again after
//! every activity, successful or not.

use core::time::Duration;

use crate::ble::device::Device;
use crate::ble::engine::ConnectionEngine;
use crate::ble::radio::Radio;
use crate::config::{CONNECT_BACKOFF_BASE, CONNECT_BACKOFF_MAX_SHIFT};
use crate::datatype::Timestamp;

/// Retry delay after `failures` consecutive failed exchanges.
fn backoff_after(failures: u16) -> Duration {
    let doublings = failures.saturating_sub(1).min(CONNECT_BACKOFF_MAX_SHIFT);
    CONNECT_BACKOFF_BASE * (1u32 << doublings)
}

/// Serializes payload-acquisition activities over the engine.
#[derive(Default)]
pub struct Coordinator {
    ticks: u32,
}

impl Coordinator {
    pub fn new() -> Self {
        Coordinator::default()
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Run one scheduling pass.
    pub fn tick<R: Radio>(&mut self, engine: &mut ConnectionEngine<'_, R>) {
        self.ticks = self.ticks.wrapping_add(1);
        engine.pump();
        engine.reconcile();

        let now = engine.now();
        let candidates = engine
            .database()
            .matches(|device| Self::wants_exchange(device, now));

        for target in candidates.iter() {
            if engine.in_flight(target) {
                continue;
            }
            debug!("scheduling payload exchange with {:?}", target);
            let connected = engine.open_connection(target);
            let discovered = connected && engine.service_discovery(target);
            let read = discovered && engine.read_payload(target);
            engine.close_connection(target);
            if !read {
                engine.database_mut().record_connect_failure(target);
            }
            engine.reconcile();
        }
    }

    /// A device needs an exchange when it is not suppressed, has no
    /// payload yet, and is outside its failure backoff window.
    fn wants_exchange(device: &Device, now: Timestamp) -> bool {
        if device.ignored() || device.payload().is_some() {
            return false;
        }
        let failures = device.connect_failures();
        if failures == 0 {
            return true;
        }
        match device.time_since_disconnected(now) {
            Some(idle) => idle >= backoff_after(failures),
            None => true,
        }
    }
}

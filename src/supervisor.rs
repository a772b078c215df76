//! Initialisation and fault recovery for Ccs811 devices
//!
//! The supervisor runs as a background task for the lifetime of a device,
//! it brings the device up on construction and again whenever the transaction
//! engine reports a fault, retrying forever until the device responds.
//!
//! Copyright 2019 Ryan Kurte

use std::sync::Arc;

use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::time::{sleep, Instant};

use crate::{Error, Measurement};
use crate::base::{BusTransport, Core, Transaction};
use crate::device::*;

/// Device operating mode
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum DeviceMode {
    /// Initialisation pending or in progress
    Uninitialized,
    /// Initialised and accepting transactions
    Ready,
    /// A transaction or initialisation attempt failed, re-initialisation pending
    Faulted,
}

/// Shared device state, published to observers on every change
#[derive(PartialEq, Clone, Debug)]
pub struct DeviceState {
    pub mode: DeviceMode,
    /// MEAS_MODE byte applied on each initialisation
    pub measurement_config: u8,
    /// Most recent successful measurement
    pub last_reading: Option<Measurement>,
    pub last_reading_at: Option<Instant>,
    /// Number of faults raised from the ready state
    pub faults: u64,
}

impl DeviceState {
    pub(crate) fn new(measurement_config: u8) -> Self {
        DeviceState {
            mode: DeviceMode::Uninitialized,
            measurement_config,
            last_reading: None,
            last_reading_at: None,
            faults: 0,
        }
    }
}

/// Requests to the supervisor
#[derive(PartialEq, Clone, Copy, Debug)]
pub(crate) enum Event {
    /// A transaction failed while the device was ready
    Fault,
    /// The device was reset and must be brought up again
    Reinit,
}

/// Supervisor task
///
/// Takes ownership of the bus gate acquired at construction and holds it until the
/// first initialisation succeeds, then waits for events requesting re-initialisation.
pub(crate) async fn run<T: BusTransport>(core: Arc<Core<T>>, gate: OwnedMutexGuard<()>, mut events: mpsc::UnboundedReceiver<Event>) {
    let mut gate = Some(gate);

    loop {
        let guard = match gate.take() {
            Some(g) => g,
            None => core.gate.clone().lock_owned().await,
        };

        bring_up(&core).await;

        // Ready is published while the gate is still held, a waiter on the gate
        // (firmware update) must never have its mode change overwritten
        core.state.send_modify(|s| s.mode = DeviceMode::Ready);
        drop(guard);
        info!("Ccs811 ready");

        match events.recv().await {
            Some(e) => debug!("Re-initialising device ({:?})", e),
            None => return,
        }
    }
}

/// Run the initialisation sequence until it succeeds
async fn bring_up<T: BusTransport>(core: &Core<T>) {
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        core.state.send_modify(|s| s.mode = DeviceMode::Uninitialized);

        match initialise(core).await {
            Ok(()) => {
                debug!("Initialisation complete after {} attempt(s)", attempt);
                return;
            },
            Err(e) => {
                warn!("Initialisation attempt {} failed: {}, retrying in {:?}", attempt, e, RETRY_DELAY);
                core.state.send_modify(|s| s.mode = DeviceMode::Faulted);
            }
        }

        sleep(RETRY_DELAY).await;
    }
}

/// Initialisation sequence, the caller must hold the bus gate
async fn initialise<T: BusTransport>(core: &Core<T>) -> Result<(), Error<T::Error>> {
    // Check we're talking to the right device
    let id = core.execute(Transaction::read(Register::HwId, 1).privileged()).await?;
    if id[0] != HARDWARE_ID {
        return Err(Error::IdentityMismatch(id[0]));
    }

    // Switch from boot to application firmware
    core.execute(Transaction::command(Register::AppStart).privileged()).await?;

    let mode = core.state.borrow().measurement_config;
    trace!("Applying measurement mode: 0x{:02x}", mode);

    core.execute(Transaction::write(Register::MeasMode, &[mode]).privileged()).await?;

    Ok(())
}

//! Base communication implementation for interacting with Ccs811 device
//!
//! Copyright 2019 Ryan Kurte

use core::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use embedded_hal::blocking::i2c;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::sleep;

use crate::Error;
use crate::device::*;
use crate::supervisor::{DeviceMode, DeviceState, Event};

/// Bus transport used to reach the device
///
/// A fresh handle is opened for every transaction and closed (or dropped, on failure)
/// once the transaction completes, handles are never shared between transactions.
#[async_trait]
pub trait BusTransport: Send + Sync + 'static {
    /// Transport error type
    type Error: Debug + Send + 'static;
    /// Open connection to the bus
    type Handle: Send;

    /// Open the numbered bus
    async fn open(&self, bus: u8) -> Result<Self::Handle, Self::Error>;
    /// Write bytes to the device at `address`, returning the number of bytes written
    async fn write(&self, handle: &mut Self::Handle, address: u8, data: &[u8]) -> Result<usize, Self::Error>;
    /// Read `len` bytes from the device at `address`
    async fn read(&self, handle: &mut Self::Handle, address: u8, len: usize) -> Result<Vec<u8>, Self::Error>;
    /// Close a bus connection
    async fn close(&self, handle: Self::Handle) -> Result<(), Self::Error>;
}

/// Transport implementation over blocking embedded-hal I2C connections
///
/// `open` is called with the bus number for each transaction, for example
/// `|bus| I2cdev::new(format!("/dev/i2c-{}", bus))` on linux.
///
/// Bus calls block the executor thread for the length of each transfer (a few
/// hundred microseconds for CCS811 sized transfers). This is intended for a
/// `current_thread` runtime dedicated to the sensor, other tasks sharing the
/// runtime are stalled while a transfer is on the wire.
pub struct HalTransport<F> {
    open: F,
}

impl<F> HalTransport<F> {
    pub fn new(open: F) -> Self {
        HalTransport { open }
    }
}

#[async_trait]
impl<F, Conn, Err> BusTransport for HalTransport<F> where
    F: Fn(u8) -> Result<Conn, Err> + Send + Sync + 'static,
    Conn: i2c::Read<Error=Err> + i2c::Write<Error=Err> + Send + 'static,
    Err: Debug + Send + 'static,
{
    type Error = Err;
    type Handle = Conn;

    async fn open(&self, bus: u8) -> Result<Conn, Err> {
        (self.open)(bus)
    }

    async fn write(&self, conn: &mut Conn, address: u8, data: &[u8]) -> Result<usize, Err> {
        trace!("Writing: {:02x?}", data);

        conn.write(address, data)?;

        Ok(data.len())
    }

    async fn read(&self, conn: &mut Conn, address: u8, len: usize) -> Result<Vec<u8>, Err> {
        let mut buff = vec![0u8; len];

        conn.read(address, &mut buff)?;

        trace!("Read data: {:02x?}", buff);

        Ok(buff)
    }

    async fn close(&self, conn: Conn) -> Result<(), Err> {
        drop(conn);
        Ok(())
    }
}

/// A single logical operation against the device
#[derive(PartialEq, Clone, Debug)]
pub struct Transaction {
    /// Register or mailbox to address
    pub register: Register,
    /// Data written following the register address
    pub payload: Vec<u8>,
    /// Number of bytes to read back, zero for write-only transactions
    pub read_len: usize,
    /// Skip the bus gate, only valid while the caller already holds it
    pub(crate) bypass_gate: bool,
}

impl Transaction {
    /// Read `len` bytes from a register
    pub fn read(register: Register, len: usize) -> Self {
        Transaction { register, payload: vec![], read_len: len, bypass_gate: false }
    }

    /// Write data to a register
    pub fn write(register: Register, payload: &[u8]) -> Self {
        Transaction { register, payload: payload.to_vec(), read_len: 0, bypass_gate: false }
    }

    /// Write data to a register then read `len` bytes back
    pub fn write_read(register: Register, payload: &[u8], len: usize) -> Self {
        Transaction { register, payload: payload.to_vec(), read_len: len, bypass_gate: false }
    }

    /// Write to a register with no associated data
    pub fn command(register: Register) -> Self {
        Self::write(register, &[])
    }

    pub(crate) fn privileged(mut self) -> Self {
        self.bypass_gate = true;
        self
    }
}

/// Shared device core, owns the transport, the bus gate and the device state
pub(crate) struct Core<T: BusTransport> {
    pub(crate) transport: T,
    pub(crate) bus: u8,
    pub(crate) address: u8,
    pub(crate) gate: Arc<Mutex<()>>,
    pub(crate) state: watch::Sender<DeviceState>,
    pub(crate) events: mpsc::UnboundedSender<Event>,
}

impl<T: BusTransport> Core<T> {
    /// Execute a transaction, serialised through the bus gate unless bypassed
    pub(crate) async fn execute(&self, tx: Transaction) -> Result<Vec<u8>, Error<T::Error>> {
        if tx.bypass_gate {
            return match self.run(&tx).await {
                Ok(v) => Ok(v),
                Err(e) => Err(self.fault(e, true)),
            };
        }

        // Checked before queueing and again once the gate is held, the device
        // may have faulted while we were waiting
        self.ensure_ready()?;
        let _gate = self.gate.lock().await;
        self.ensure_ready()?;

        match self.run(&tx).await {
            Ok(v) => Ok(v),
            Err(e) => Err(self.fault(e, false)),
        }
    }

    /// Open, write, settle, read and close for a single transaction
    async fn run(&self, tx: &Transaction) -> Result<Vec<u8>, Error<T::Error>> {
        let reg = tx.register as u8;

        let mut handle = self.transport.open(self.bus).await.map_err(Error::Conn)?;

        if !tx.payload.is_empty() || tx.read_len == 0 {
            let mut buff = Vec::with_capacity(tx.payload.len() + 1);
            buff.push(reg);
            buff.extend_from_slice(&tx.payload);

            self.write(&mut handle, &buff).await?;
            sleep(SETTLE_DELAY).await;
        }

        let mut data = vec![];
        if tx.read_len > 0 {
            // Set the register pointer, then read back
            self.write(&mut handle, &[reg]).await?;
            sleep(SETTLE_DELAY).await;

            data = self.transport.read(&mut handle, self.address, tx.read_len).await
                .map_err(Error::Conn)?;

            if data.len() != tx.read_len {
                return Err(Error::ReadLength{ expected: tx.read_len, actual: data.len() });
            }
        }

        self.transport.close(handle).await.map_err(Error::Conn)?;

        Ok(data)
    }

    async fn write(&self, handle: &mut T::Handle, data: &[u8]) -> Result<(), Error<T::Error>> {
        let n = self.transport.write(handle, self.address, data).await
            .map_err(Error::Conn)?;

        if n != data.len() {
            return Err(Error::WriteLength{ expected: data.len(), actual: n });
        }

        Ok(())
    }

    pub(crate) fn ensure_ready(&self) -> Result<(), Error<T::Error>> {
        match self.state.borrow().mode {
            DeviceMode::Ready => Ok(()),
            _ => Err(Error::NotReady),
        }
    }

    /// Mark the device as faulted following a bus failure
    ///
    /// A fault from the ready state is counted and, outside of initialisation,
    /// reported to the supervisor for re-initialisation.
    fn fault(&self, err: Error<T::Error>, privileged: bool) -> Error<T::Error> {
        let mut tripped = false;

        self.state.send_modify(|s| {
            if s.mode == DeviceMode::Ready {
                s.faults += 1;
                tripped = true;
            }
            s.mode = DeviceMode::Faulted;
        });

        if tripped && !privileged {
            warn!("Bus transaction failed, device faulted: {}", err);
            self.request(Event::Fault);
        } else {
            debug!("Bus transaction failed: {}", err);
        }

        err
    }

    /// Signal the supervisor, fire-and-forget
    pub(crate) fn request(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("Supervisor not running, dropped {:?}", event);
        }
    }
}

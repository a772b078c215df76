//! Scripted bus transport for driver tests
//!
//! Copyright 2019 Ryan Kurte

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::base::BusTransport;
use crate::device::{Register, HARDWARE_ID};

/// Recorded transport operation
#[derive(PartialEq, Clone, Debug)]
pub enum Op {
    Open,
    Write(Vec<u8>),
    Read(usize),
    Close,
}

#[derive(PartialEq, Clone, Debug)]
pub struct FakeError;

#[derive(Default)]
struct Inner {
    registers: HashMap<u8, Vec<u8>>,
    log: Vec<Op>,
    in_flight: usize,
    max_in_flight: usize,
    fail_opens: usize,
    fail_reads: usize,
    read_excess: usize,
}

/// Register-backed fake device
///
/// Writes with data update the addressed register, reads return the contents of
/// the last addressed register (zero padded). Clones share state.
#[derive(Clone)]
pub struct FakeTransport {
    inner: Arc<Mutex<Inner>>,
}

pub struct FakeHandle {
    inner: Arc<Mutex<Inner>>,
    pointer: Option<u8>,
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        if let Ok(mut i) = self.inner.lock() {
            i.in_flight -= 1;
        }
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        let s = FakeTransport { inner: Arc::new(Mutex::new(Inner::default())) };
        s.set_register(Register::HwId, &[HARDWARE_ID]);
        s
    }

    pub fn set_register(&self, register: Register, data: &[u8]) {
        self.inner.lock().unwrap().registers.insert(register as u8, data.to_vec());
    }

    pub fn register(&self, register: Register) -> Vec<u8> {
        self.inner.lock().unwrap().registers.get(&(register as u8)).cloned().unwrap_or_default()
    }

    /// Fail the next `n` bus opens
    pub fn fail_opens(&self, n: usize) {
        self.inner.lock().unwrap().fail_opens = n;
    }

    /// Fail the next `n` bus reads
    pub fn fail_reads(&self, n: usize) {
        self.inner.lock().unwrap().fail_reads = n;
    }

    /// Return `n` extra bytes on every read
    pub fn read_excess(&self, n: usize) {
        self.inner.lock().unwrap().read_excess = n;
    }

    pub fn log(&self) -> Vec<Op> {
        self.inner.lock().unwrap().log.clone()
    }

    pub fn clear_log(&self) {
        self.inner.lock().unwrap().log.clear();
    }

    pub fn count<F: Fn(&Op) -> bool>(&self, f: F) -> usize {
        self.inner.lock().unwrap().log.iter().filter(|op| f(op)).count()
    }

    /// Largest number of handles open at the same time
    pub fn max_in_flight(&self) -> usize {
        self.inner.lock().unwrap().max_in_flight
    }
}

#[async_trait]
impl BusTransport for FakeTransport {
    type Error = FakeError;
    type Handle = FakeHandle;

    async fn open(&self, _bus: u8) -> Result<FakeHandle, FakeError> {
        let mut i = self.inner.lock().unwrap();
        i.log.push(Op::Open);

        if i.fail_opens > 0 {
            i.fail_opens -= 1;
            return Err(FakeError);
        }

        i.in_flight += 1;
        i.max_in_flight = i.max_in_flight.max(i.in_flight);

        Ok(FakeHandle { inner: self.inner.clone(), pointer: None })
    }

    async fn write(&self, handle: &mut FakeHandle, _address: u8, data: &[u8]) -> Result<usize, FakeError> {
        let mut i = self.inner.lock().unwrap();
        i.log.push(Op::Write(data.to_vec()));

        handle.pointer = data.first().cloned();
        if data.len() > 1 {
            i.registers.insert(data[0], data[1..].to_vec());
        }

        Ok(data.len())
    }

    async fn read(&self, handle: &mut FakeHandle, _address: u8, len: usize) -> Result<Vec<u8>, FakeError> {
        let mut i = self.inner.lock().unwrap();
        i.log.push(Op::Read(len));

        if i.fail_reads > 0 {
            i.fail_reads -= 1;
            return Err(FakeError);
        }

        let mut data = handle.pointer
            .and_then(|p| i.registers.get(&p).cloned())
            .unwrap_or_default();
        data.resize(len + i.read_excess, 0);

        Ok(data)
    }

    async fn close(&self, handle: FakeHandle) -> Result<(), FakeError> {
        self.inner.lock().unwrap().log.push(Op::Close);
        drop(handle);
        Ok(())
    }
}

//! Baseline persistence hooks
//!
//! The Ccs811 algorithm baseline drifts as the sensor is conditioned, restoring a
//! saved baseline after power cycling avoids a lengthy burn-in. Where and how the
//! baseline is stored is up to the application.
//!
//! Copyright 2019 Ryan Kurte

use std::io;

use crate::{BusTransport, Ccs811, Error};

/// Storage for a saved algorithm baseline
pub trait BaselineStore {
    /// Load a saved baseline, if one exists
    fn load(&mut self) -> io::Result<Option<u16>>;
    /// Save a baseline
    fn save(&mut self, baseline: u16) -> io::Result<()>;
}

/// In-memory baseline store
#[derive(PartialEq, Clone, Debug, Default)]
pub struct MemoryBaseline(pub Option<u16>);

impl BaselineStore for MemoryBaseline {
    fn load(&mut self) -> io::Result<Option<u16>> {
        Ok(self.0)
    }

    fn save(&mut self, baseline: u16) -> io::Result<()> {
        self.0 = Some(baseline);
        Ok(())
    }
}

impl<T: BusTransport> Ccs811<T> {
    /// Restore the baseline from a store, returning the restored value
    /// Nothing is written to the device where the store is empty
    pub async fn restore_baseline<S: BaselineStore>(&self, store: &mut S) -> Result<Option<u16>, Error<T::Error>> {
        let baseline = match store.load()? {
            Some(v) => v,
            None => {
                debug!("No saved baseline");
                return Ok(None);
            }
        };

        debug!("Restoring baseline: 0x{:04x}", baseline);
        self.write_baseline(baseline).await?;

        Ok(Some(baseline))
    }

    /// Read the current baseline from the device and save it to a store
    pub async fn save_baseline<S: BaselineStore>(&self, store: &mut S) -> Result<u16, Error<T::Error>> {
        let baseline = self.read_baseline().await?;

        debug!("Saving baseline: 0x{:04x}", baseline);
        store.save(baseline)?;

        Ok(baseline)
    }
}

//! Application firmware update
//!
//! The device is reset into its bootloader, the application area erased, and the
//! new image streamed to APP_DATA in 8 byte chunks before being verified.
//! Normal operation resumes via the supervisor once the update completes.
//!
//! Copyright 2019 Ryan Kurte

use std::io::{self, Read};

use tokio::time::sleep;

use crate::{BusTransport, Ccs811, Error};
use crate::base::{Core, Transaction};
use crate::device::*;
use crate::supervisor::{DeviceMode, Event};

impl<T: BusTransport> Ccs811<T> {
    /// Flash a new application firmware image, returning the number of bytes written
    ///
    /// The bus gate is held for the duration of the update and the device is
    /// re-initialised afterwards whether or not the update succeeded.
    pub async fn update_firmware<R: Read>(&self, mut image: R) -> Result<usize, Error<T::Error>> {
        let _gate = self.core.gate.lock().await;

        self.core.state.send_modify(|s| s.mode = DeviceMode::Uninitialized);

        let res = flash(&self.core, &mut image).await;
        match &res {
            Ok(n) => info!("Firmware update complete ({} bytes)", n),
            Err(e) => error!("Firmware update failed: {}", e),
        }

        self.core.request(Event::Reinit);

        res
    }
}

async fn flash<T: BusTransport, R: Read>(core: &Core<T>, image: &mut R) -> Result<usize, Error<T::Error>> {
    debug!("Resetting to bootloader");
    core.execute(Transaction::write(Register::SwReset, &RESET_MAGIC).privileged()).await?;
    sleep(WAIT_AFTER_RESET).await;

    debug!("Erasing application");
    core.execute(Transaction::write(Register::AppErase, &ERASE_MAGIC).privileged()).await?;
    sleep(WAIT_AFTER_ERASE).await;

    let mut chunk = [0u8; FIRMWARE_CHUNK];
    let mut written = 0;

    loop {
        let n = fill(image, &mut chunk)?;
        if n == 0 {
            break;
        }

        core.execute(Transaction::write(Register::AppData, &chunk[..n]).privileged()).await?;
        sleep(WAIT_AFTER_DATA).await;

        written += n;
        trace!("Wrote {} bytes", written);

        if n < chunk.len() {
            break;
        }
    }

    debug!("Verifying application");
    core.execute(Transaction::command(Register::AppVerify).privileged()).await?;
    sleep(WAIT_AFTER_VERIFY).await;

    let status = core.execute(Transaction::read(Register::Status, 1).privileged()).await?;
    let status = Status(status[0]);

    if !status.app_verified() || !status.app_valid() {
        return Err(Error::VerifyFailed(status.0));
    }

    Ok(written)
}

/// Read until `buff` is full or the image ends
fn fill<R: Read>(image: &mut R, buff: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;

    while n < buff.len() {
        match image.read(&mut buff[n..]) {
            Ok(0) => break,
            Ok(v) => n += v,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(n)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Config;
    use crate::mock::{FakeTransport, Op};

    /// Reader returning at most 3 bytes per call
    struct Trickle<'a>(&'a [u8]);

    impl<'a> Read for Trickle<'a> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.0.len().min(buf.len()).min(3);
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_fill() {
        let data: Vec<u8> = (0..20).collect();
        let mut r = Trickle(&data);
        let mut buff = [0u8; FIRMWARE_CHUNK];

        assert_eq!(fill(&mut r, &mut buff).unwrap(), 8);
        assert_eq!(buff, [0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(fill(&mut r, &mut buff).unwrap(), 8);
        assert_eq!(fill(&mut r, &mut buff).unwrap(), 4);
        assert_eq!(&buff[..4], &[16, 17, 18, 19]);
        assert_eq!(fill(&mut r, &mut buff).unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_firmware() {
        let fake = FakeTransport::new();
        let sensor = Ccs811::new(fake.clone(), Config::default()).await;
        sensor.wait_ready().await;
        fake.clear_log();

        // Verified and valid
        fake.set_register(Register::Status, &[0x30]);

        let image: Vec<u8> = (0..20).collect();
        let n = sensor.update_firmware(Trickle(&image)).await.unwrap();
        assert_eq!(n, 20);

        // Rejected while the device restarts
        assert_eq!(sensor.mode(), DeviceMode::Uninitialized);
        assert!(matches!(sensor.read_status().await, Err(Error::NotReady)));

        let writes: Vec<Vec<u8>> = fake.log().into_iter()
            .filter_map(|op| match op { Op::Write(d) => Some(d), _ => None })
            .collect();

        assert_eq!(&writes[..7], &[
            vec![0xFF, 0x11, 0xE5, 0x72, 0x8A],
            vec![0xF1, 0xE7, 0xA7, 0xE6, 0x09],
            vec![0xF2, 0, 1, 2, 3, 4, 5, 6, 7],
            vec![0xF2, 8, 9, 10, 11, 12, 13, 14, 15],
            vec![0xF2, 16, 17, 18, 19],
            vec![0xF3],
            vec![0x00],
        ]);

        // Supervisor brings the application back up
        sensor.wait_ready().await;
        assert_eq!(fake.count(|op| *op == Op::Write(vec![0xF4])), 1);
        assert_eq!(sensor.state().faults, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_firmware_queued_during_init() {
        let fake = FakeTransport::new();
        fake.set_register(Register::Status, &[0x30]);

        let sensor = Ccs811::new(fake.clone(), Config::default()).await;
        let image = [0u8; 8];

        // Update queues on the gate held by initialisation, sample the mode mid-erase
        let (res, (mode, status)) = tokio::join!(
            sensor.update_firmware(&image[..]),
            async {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                (sensor.mode(), sensor.read_status().await)
            },
        );

        assert_eq!(res.unwrap(), 8);
        assert_eq!(mode, DeviceMode::Uninitialized);
        assert!(matches!(status, Err(Error::NotReady)));

        // Initialisation completed before the update started
        let log = fake.log();
        let app_start = log.iter().position(|op| *op == Op::Write(vec![0xF4])).unwrap();
        let reset = log.iter().position(|op| *op == Op::Write(vec![0xFF, 0x11, 0xE5, 0x72, 0x8A])).unwrap();
        assert!(app_start < reset);

        sensor.wait_ready().await;
        assert_eq!(sensor.mode(), DeviceMode::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_firmware_verify_failed() {
        let fake = FakeTransport::new();
        let sensor = Ccs811::new(fake.clone(), Config::default()).await;
        sensor.wait_ready().await;

        // Verify complete but application invalid
        fake.set_register(Register::Status, &[0x20]);

        let image = [0u8; 8];
        let res = sensor.update_firmware(&image[..]).await;
        assert!(matches!(res, Err(Error::VerifyFailed(0x20))));

        // Still re-initialised
        sensor.wait_ready().await;
        assert_eq!(sensor.mode(), DeviceMode::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_firmware_bus_failure() {
        let fake = FakeTransport::new();
        let sensor = Ccs811::new(fake.clone(), Config::default()).await;
        sensor.wait_ready().await;

        fake.fail_opens(1);

        let image = [0u8; 8];
        assert!(matches!(sensor.update_firmware(&image[..]).await, Err(Error::Conn(_))));

        sensor.wait_ready().await;
        assert_eq!(sensor.state().faults, 0);
    }
}

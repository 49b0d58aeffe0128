//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface for the sender's hardware: analog
//!     channels (ldr, voltage divider, current sensor, thermistor), the dht22
//!     and the relay gpio. abstracts away the difference between running on a
//!     real Raspberry Pi (using `rppal`) and a development machine (using mocks).
//!
//! design philosophy:
//!     - "Compile Anywhere": The node should compile on Windows/Mac/Linux.
//!     - "Scriptable": the mock returns whatever the test put in it.
//!
//! relationships:
//!     - used by: sampling.rs (adc + dht), actuator.rs (gpio)
//!     - uses: rppal (on feature="hardware")
//!     - uses: tokio::process (python DHT driver, killed when it overruns)
//!
//! ==============================================================================

use anyhow::Result;

pub trait SensorHardware: Send + Sync {
    /// one raw conversion from an adc channel
    fn read_adc(&self, channel: u8) -> Result<u16>;
    /// (temperature °C, relative humidity %)
    fn read_dht22(&self, pin: u8) -> Result<(f32, f32)>;
    fn write_gpio(&self, pin: u8, level: bool) -> Result<()>;
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For Non-Hardware Build and tests)
// ==============================================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct MockState {
    adc: HashMap<u8, u16>,
    dht: Option<(f32, f32)>,
    gpio: HashMap<u8, bool>,
    gpio_fails: bool,
}

/// Scriptable stand-in for the sender board.
///
/// unset adc channels read 0; an unset dht fails like a disconnected sensor.
#[derive(Default)]
pub struct MockHal {
    state: Mutex<MockState>,
}

impl MockHal {
    pub fn new() -> Self {
        tracing::info!("Using MOCK HAL (No hardware access)");
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_adc(&self, channel: u8, raw: u16) {
        self.state().adc.insert(channel, raw);
    }

    pub fn set_dht(&self, reading: Option<(f32, f32)>) {
        self.state().dht = reading;
    }

    pub fn fail_gpio(&self, fail: bool) {
        self.state().gpio_fails = fail;
    }

    pub fn gpio_level(&self, pin: u8) -> Option<bool> {
        self.state().gpio.get(&pin).copied()
    }
}

impl SensorHardware for MockHal {
    fn read_adc(&self, channel: u8) -> Result<u16> {
        Ok(self.state().adc.get(&channel).copied().unwrap_or(0))
    }

    fn read_dht22(&self, pin: u8) -> Result<(f32, f32)> {
        tracing::trace!("[MOCK DHT22] Reading pin {}", pin);
        self.state()
            .dht
            .ok_or_else(|| anyhow::anyhow!("DHT22 on pin {} not responding", pin))
    }

    fn write_gpio(&self, pin: u8, level: bool) -> Result<()> {
        let mut state = self.state();
        if state.gpio_fails {
            anyhow::bail!("GPIO {} write failed", pin);
        }
        tracing::debug!("[MOCK GPIO] Pin {} write {}", pin, level);
        state.gpio.insert(pin, level);
        Ok(())
    }
}

/// Run an external driver to completion, killing it if it outlives `timeout`.
///
/// blocking; call from a `spawn_blocking` task on a tokio runtime.
pub fn run_driver(
    mut command: tokio::process::Command,
    timeout: Duration,
) -> Result<std::process::Output> {
    command.kill_on_drop(true);
    let handle = tokio::runtime::Handle::try_current()?;
    // on timeout the output future is dropped and the child with it
    let output = handle
        .block_on(async { tokio::time::timeout(timeout, command.output()).await })
        .map_err(|_| anyhow::anyhow!("driver did not finish within {:?}", timeout))??;
    Ok(output)
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
//
// analog channels come from an MCP3008 (10-bit, 8 channels) on SPI0/CE0.
// set sampling.adc_max = 1023 when using it.

#[cfg(feature = "hardware")]
pub struct Hal {
    spi: Mutex<rppal::spi::Spi>,
    gpio: rppal::gpio::Gpio,
    dht_timeout: Duration,
}

#[cfg(feature = "hardware")]
impl Hal {
    /// `dht_timeout` bounds one run of the python DHT22 driver
    pub fn new(dht_timeout: Duration) -> Result<Self> {
        use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
        tracing::info!("Using REAL HARDWARE HAL (rppal)");
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, 1_000_000, Mode::Mode0)?;
        let gpio = rppal::gpio::Gpio::new()?;
        Ok(Self {
            spi: Mutex::new(spi),
            gpio,
            dht_timeout,
        })
    }
}

#[cfg(feature = "hardware")]
impl SensorHardware for Hal {
    fn read_adc(&self, channel: u8) -> Result<u16> {
        if channel > 7 {
            anyhow::bail!("MCP3008 has no channel {}", channel);
        }
        // start bit, single-ended + channel, padding
        let write = [0x01, (0x08 | channel) << 4, 0x00];
        let mut read = [0u8; 3];
        let spi = self.spi.lock().unwrap_or_else(|e| e.into_inner());
        spi.transfer(&mut read, &write)?;
        Ok((((read[1] & 0x03) as u16) << 8) | read[2] as u16)
    }

    fn read_dht22(&self, pin: u8) -> Result<(f32, f32)> {
        // NOTE: python subprocess for DHT22 stability on generic Linux kernels;
        // native bit-banging is notoriously flaky without a kernel driver.
        let script = format!(
            r#"
import adafruit_dht, board, json, sys
try:
    dht = adafruit_dht.DHT22(board.D{})
    print(json.dumps({{"t": dht.temperature, "h": dht.humidity}}))
except Exception:
    print("null")
"#,
            pin
        );
        let mut command = tokio::process::Command::new("python3");
        command.args(["-c", &script]);
        let output = run_driver(command, self.dht_timeout)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim() == "null" {
            anyhow::bail!("DHT22 read failed");
        }
        let v: serde_json::Value = serde_json::from_str(&stdout)?;
        let t = v["t"].as_f64().ok_or_else(|| anyhow::anyhow!("Missing temp"))?;
        let h = v["h"].as_f64().ok_or_else(|| anyhow::anyhow!("Missing humidity"))?;
        Ok((t as f32, h as f32))
    }

    fn write_gpio(&self, pin: u8, level: bool) -> Result<()> {
        let mut p = self.gpio.get(pin)?.into_output();
        // keep the relay where we put it when the handle drops
        p.set_reset_on_drop(false);
        if level {
            p.set_high();
        } else {
            p.set_low();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_adc_defaults_to_zero() {
        let hal = MockHal::new();
        assert_eq!(hal.read_adc(3).unwrap(), 0);
        hal.set_adc(3, 2048);
        assert_eq!(hal.read_adc(3).unwrap(), 2048);
    }

    #[test]
    fn test_mock_dht_unset_fails() {
        let hal = MockHal::new();
        assert!(hal.read_dht22(4).is_err());
        hal.set_dht(Some((25.0, 50.0)));
        assert_eq!(hal.read_dht22(4).unwrap(), (25.0, 50.0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_driver_output() {
        let mut command = tokio::process::Command::new("sh");
        command.args(["-c", "echo null"]);
        let timeout = Duration::from_secs(5);
        let output = tokio::task::spawn_blocking(move || run_driver(command, timeout))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "null");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hung_driver_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let mut command = tokio::process::Command::new("sh");
        command.args(["-c", &format!("sleep 1 && touch {}", marker.display())]);

        let started = std::time::Instant::now();
        let timeout = Duration::from_millis(100);
        let result = tokio::task::spawn_blocking(move || run_driver(command, timeout))
            .await
            .unwrap();
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_millis(900));

        // a surviving child would have created the marker by now
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[test]
    fn test_mock_gpio() {
        let hal = MockHal::new();
        hal.write_gpio(26, true).unwrap();
        assert_eq!(hal.gpio_level(26), Some(true));
        hal.fail_gpio(true);
        assert!(hal.write_gpio(26, false).is_err());
        assert_eq!(hal.gpio_level(26), Some(true));
    }
}

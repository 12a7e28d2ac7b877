//! A mock instrument that generates synthetic readings.

use super::Instrument;
use anyhow::{bail, Result};
use rand::Rng;
use tracing::info;

/// A fake multimeter for tests and dry runs.
///
/// Answers a small SCPI-flavored command set: `*IDN?`, `MEAS:RES?`,
/// `MEAS:VOLT?`. Readings are the configured base value plus uniform noise.
pub struct MockMultimeter {
    connected: bool,
    base_resistance: f64,
    base_voltage: f64,
    noise: f64,
}

impl Default for MockMultimeter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMultimeter {
    /// Create a mock with 1 kΩ / 1 V nominal readings and 1% noise.
    pub fn new() -> Self {
        Self {
            connected: false,
            base_resistance: 1000.0,
            base_voltage: 1.0,
            noise: 0.01,
        }
    }

    /// Set the nominal resistance reading.
    pub fn with_resistance(mut self, ohms: f64) -> Self {
        self.base_resistance = ohms;
        self
    }

    /// Set the relative noise amplitude.
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }

    fn reading(&self, base: f64) -> f64 {
        let jitter = rand::thread_rng().gen_range(-self.noise..=self.noise);
        base * (1.0 + jitter)
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connected {
            bail!("mock multimeter is not connected");
        }
        Ok(())
    }
}

impl Instrument for MockMultimeter {
    fn connect(&mut self) -> Result<()> {
        info!("connecting to mock multimeter");
        self.connected = true;
        Ok(())
    }

    fn identify(&mut self) -> Result<String> {
        self.ensure_connected()?;
        Ok("BENCHRUN,MOCK-34465A,0,1.0".to_string())
    }

    fn write(&mut self, command: &str) -> Result<()> {
        self.ensure_connected()?;
        if command.is_empty() {
            bail!("empty command");
        }
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String> {
        self.ensure_connected()?;
        match command {
            "*IDN?" => self.identify(),
            "MEAS:RES?" => Ok(format!("{:.6E}", self.reading(self.base_resistance))),
            "MEAS:VOLT?" => Ok(format!("{:.6E}", self.reading(self.base_voltage))),
            other => bail!("unsupported query '{other}'"),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.connected {
            info!("disconnecting mock multimeter");
        }
        self.connected = false;
        Ok(())
    }
}

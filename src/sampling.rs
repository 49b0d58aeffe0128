//! Sensor sampling unit
//!
//! One call to [`Sampler::sample`] takes `samples_per_channel` raw reads from
//! every analog channel, averages them, applies the channel's calibration and
//! adds the DHT22 reading. The whole pass runs against one deadline
//! (`sampling.window_ms`); anything that fails, times out or comes back out of
//! range is logged and reported as 0.0. The caller always gets a complete
//! record.

use std::sync::Arc;
use tokio::time::{timeout_at, Instant};

use crate::config::{CurrentCalibration, SamplingConfig, ThermistorCalibration, VoltageCalibration};
use crate::domain::{ReadingRecord, SenderId};
use crate::hal::SensorHardware;

const KELVIN_OFFSET: f32 = 273.15;

/// averaged raw values of one pass, `None` where every read failed
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnalogAverages {
    pub light: Option<f32>,
    pub voltage: Option<f32>,
    pub current: Option<f32>,
    pub thermistor: Option<f32>,
}

pub struct Sampler<H> {
    sender_id: SenderId,
    hardware: Arc<H>,
    config: SamplingConfig,
}

impl<H: SensorHardware + 'static> Sampler<H> {
    pub fn new(sender_id: SenderId, hardware: Arc<H>, config: SamplingConfig) -> Self {
        Self {
            sender_id,
            hardware,
            config,
        }
    }

    pub async fn sample(&self) -> ReadingRecord {
        let deadline = Instant::now() + self.config.window();

        let hw = self.hardware.clone();
        let cfg = self.config.clone();
        let analog = match timeout_at(
            deadline,
            tokio::task::spawn_blocking(move || average_channels(&*hw, &cfg)),
        )
        .await
        {
            Ok(Ok(averages)) => averages,
            Ok(Err(e)) => {
                tracing::warn!(sender_id = self.sender_id, "analog sampling task failed: {e}");
                AnalogAverages::default()
            }
            Err(_) => {
                tracing::warn!(sender_id = self.sender_id, "analog sampling exceeded window");
                AnalogAverages::default()
            }
        };

        let hw = self.hardware.clone();
        let pin = self.config.dht_pin;
        let dht = match timeout_at(
            deadline,
            tokio::task::spawn_blocking(move || hw.read_dht22(pin)),
        )
        .await
        {
            Ok(Ok(Ok((t, h)))) if t.is_finite() && h.is_finite() => (t, h),
            Ok(Ok(Ok((t, h)))) => {
                tracing::warn!(
                    sender_id = self.sender_id,
                    "dht22 returned non-finite values ({t}, {h})"
                );
                (0.0, 0.0)
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(sender_id = self.sender_id, "dht22 read failed: {e:#}");
                (0.0, 0.0)
            }
            Ok(Err(e)) => {
                tracing::warn!(sender_id = self.sender_id, "dht22 task failed: {e}");
                (0.0, 0.0)
            }
            Err(_) => {
                tracing::warn!(sender_id = self.sender_id, "dht22 read exceeded window");
                (0.0, 0.0)
            }
        };

        self.build_record(analog, dht)
    }

    fn build_record(&self, analog: AnalogAverages, (dht_t, dht_h): (f32, f32)) -> ReadingRecord {
        let cfg = &self.config;
        let volts = |raw: f32| adc_to_volts(raw, cfg.adc_max, cfg.adc_ref_volts);

        let light_raw = analog.light.map(|raw| raw.round() as i32).unwrap_or(0);
        let voltage = analog
            .voltage
            .map(|raw| calibrate_voltage(volts(raw), &cfg.voltage))
            .unwrap_or(0.0);
        let current = analog
            .current
            .map(|raw| calibrate_current(volts(raw), &cfg.current))
            .unwrap_or(0.0);
        let thermistor_temperature = analog
            .thermistor
            .map(|raw| thermistor_celsius(raw, cfg.adc_max, &cfg.thermistor))
            .unwrap_or(0.0);

        if analog.thermistor.is_some() && thermistor_temperature == 0.0 {
            tracing::warn!(sender_id = self.sender_id, "thermistor adc out of range");
        }
        let voltage = self.finite_or_zero("voltage", voltage);
        let current = self.finite_or_zero("current", current);

        ReadingRecord {
            sender_id: self.sender_id,
            light_raw,
            dht_temperature: dht_t,
            dht_humidity: dht_h,
            thermistor_temperature,
            voltage,
            current,
            valid: true,
        }
    }

    fn finite_or_zero(&self, field: &'static str, value: f32) -> f32 {
        if value.is_finite() {
            return value;
        }
        tracing::warn!(
            sender_id = self.sender_id,
            field,
            "calibration produced {value}, reporting 0"
        );
        0.0
    }
}

/// Average `samples_per_channel` reads of every analog channel.
///
/// failed reads and reads above `adc_max` are skipped; a channel with no good
/// read at all comes back `None`.
pub fn average_channels<H: SensorHardware + ?Sized>(
    hw: &H,
    cfg: &SamplingConfig,
) -> AnalogAverages {
    let average = |channel: u8| -> Option<f32> {
        let mut sum = 0u64;
        let mut good = 0u32;
        for _ in 0..cfg.samples_per_channel {
            match hw.read_adc(channel) {
                Ok(raw) if raw <= cfg.adc_max => {
                    sum += raw as u64;
                    good += 1;
                }
                Ok(raw) => tracing::debug!(channel, raw, "adc sample above range"),
                Err(e) => tracing::debug!(channel, "adc read failed: {e:#}"),
            }
        }
        if good == 0 {
            tracing::warn!(channel, "no usable adc samples");
            return None;
        }
        Some(sum as f32 / good as f32)
    };

    AnalogAverages {
        light: average(cfg.light_channel),
        voltage: average(cfg.voltage_channel),
        current: average(cfg.current_channel),
        thermistor: average(cfg.thermistor_channel),
    }
}

pub fn adc_to_volts(raw: f32, adc_max: u16, ref_volts: f32) -> f32 {
    raw / adc_max as f32 * ref_volts
}

pub fn calibrate_voltage(pin_volts: f32, cal: &VoltageCalibration) -> f32 {
    pin_volts * cal.scale + cal.offset
}

pub fn calibrate_current(pin_volts: f32, cal: &CurrentCalibration) -> f32 {
    noise_gate((pin_volts - cal.zero_volts) / cal.volts_per_amp, cal.noise_gate_amps)
}

/// Snap magnitudes strictly below `threshold` to exactly zero.
pub fn noise_gate(amps: f32, threshold: f32) -> f32 {
    if amps.abs() < threshold {
        0.0
    } else {
        amps
    }
}

/// Beta-equation temperature of an NTC on the low side of a divider.
///
/// 0.0 when the averaged adc value is at either rail (open or shorted
/// thermistor) or the result is not finite.
pub fn thermistor_celsius(raw: f32, adc_max: u16, cal: &ThermistorCalibration) -> f32 {
    let max = adc_max as f32;
    if raw <= 0.0 || raw >= max {
        return 0.0;
    }
    let resistance = cal.series_ohms * raw / (max - raw);
    let t0 = cal.nominal_celsius + KELVIN_OFFSET;
    let inv_t = 1.0 / t0 + (resistance / cal.nominal_ohms).ln() / cal.beta;
    let celsius = 1.0 / inv_t - KELVIN_OFFSET;
    if celsius.is_finite() {
        celsius
    } else {
        0.0
    }
}

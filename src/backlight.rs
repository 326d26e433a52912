//! Ambient-light controlled backlight: a moving average over the light
//! sensor and a linear map from filtered reading to PWM duty.

/// Readings at or below this are treated as dark.
pub const LIGHT_DARK: u16 = 1000;
/// Full-scale 12-bit ADC reading.
pub const LIGHT_BRIGHT: u16 = 4095;
pub const DUTY_MIN: u8 = 10;
pub const DUTY_MAX: u8 = 255;
/// Minimum time between sensor samples.
pub const SAMPLE_MS: u32 = 50;

/// Fixed-window moving average.
pub struct MovingAverage<const N: usize> {
    window: [u16; N],
    next: usize,
    filled: usize,
    sum: u32,
}

impl<const N: usize> Default for MovingAverage<N> {
    fn default() -> Self {
        Self {
            window: [0; N],
            next: 0,
            filled: 0,
            sum: 0,
        }
    }
}

impl<const N: usize> MovingAverage<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sample and return the average of the samples in the window.
    pub fn push(&mut self, sample: u16) -> u16 {
        if N == 0 {
            return sample;
        }
        if self.filled == N {
            self.sum -= self.window[self.next] as u32;
        } else {
            self.filled += 1;
        }
        self.window[self.next] = sample;
        self.sum += sample as u32;
        self.next = (self.next + 1) % N;
        (self.sum / self.filled as u32) as u16
    }

    pub fn value(&self) -> Option<u16> {
        (self.filled > 0).then(|| (self.sum / self.filled as u32) as u16)
    }
}

/// Map a filtered light reading to backlight duty: dark rooms get the
/// brightest backlight, bright rooms the dimmest.
pub fn duty_for_light(reading: u16) -> u8 {
    let x = reading as i32;
    let (in_lo, in_hi) = (LIGHT_DARK as i32, LIGHT_BRIGHT as i32);
    let (out_lo, out_hi) = (DUTY_MAX as i32, DUTY_MIN as i32);
    let y = (x - in_lo) * (out_hi - out_lo) / (in_hi - in_lo) + out_lo;
    y.clamp(DUTY_MIN as i32, DUTY_MAX as i32) as u8
}

#[cfg(target_os = "espidf")]
pub use driver::AmbientBacklight;

#[cfg(target_os = "espidf")]
mod driver {
    use super::*;
    use crate::debug_flags;
    use anyhow::Result;
    use esp_idf_hal::adc::attenuation::DB_11;
    use esp_idf_hal::adc::oneshot::config::AdcChannelConfig;
    use esp_idf_hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
    use esp_idf_hal::adc::ADC1;
    use esp_idf_hal::gpio::{Gpio0, Gpio3};
    use esp_idf_hal::ledc::config::TimerConfig;
    use esp_idf_hal::ledc::{LedcDriver, LedcTimerDriver, Resolution, CHANNEL0, TIMER0};
    use esp_idf_hal::prelude::*;
    use log::{info, warn};

    pub struct AmbientBacklight {
        sensor: AdcChannelDriver<'static, Gpio3, AdcDriver<'static, ADC1>>,
        pwm: LedcDriver<'static>,
        filter: MovingAverage<16>,
        duty: u8,
        last_sample: u32,
        read_failures: u32,
    }

    impl AmbientBacklight {
        pub fn new(adc: ADC1, sensor_pin: Gpio3, timer: TIMER0, channel: CHANNEL0, backlight_pin: Gpio0) -> Result<Self> {
            let adc = AdcDriver::new(adc)?;
            let config = AdcChannelConfig {
                attenuation: DB_11,
                ..Default::default()
            };
            let sensor = AdcChannelDriver::new(adc, sensor_pin, &config)?;

            let timer = LedcTimerDriver::new(
                timer,
                &TimerConfig::new()
                    .frequency(5.kHz().into())
                    .resolution(Resolution::Bits8),
            )?;
            let mut pwm = LedcDriver::new(channel, timer, backlight_pin)?;
            pwm.set_duty(DUTY_MAX as u32)?;
            info!("backlight: ready, max duty {}", pwm.get_max_duty());

            Ok(Self {
                sensor,
                pwm,
                filter: MovingAverage::new(),
                duty: DUTY_MAX,
                last_sample: 0,
                read_failures: 0,
            })
        }

        /// Sample the sensor if due and apply the new duty.
        pub fn update(&mut self, now: u32) {
            if now.wrapping_sub(self.last_sample) < SAMPLE_MS {
                return;
            }
            self.last_sample = now;

            let raw = match self.sensor.read() {
                Ok(v) => v,
                Err(e) => {
                    self.read_failures += 1;
                    if self.read_failures == 1 || self.read_failures % 10 == 0 {
                        warn!("backlight: adc read failed ({}x): {}", self.read_failures, e);
                    }
                    return;
                }
            };
            self.read_failures = 0;

            let filtered = self.filter.push(raw);
            let duty = duty_for_light(filtered);
            if duty == self.duty {
                return;
            }
            if debug_flags::is_on(&debug_flags::DEBUG_BACKLIGHT) {
                info!("backlight: raw={} filtered={} duty {} -> {}", raw, filtered, self.duty, duty);
            }
            match self.pwm.set_duty(duty as u32) {
                Ok(()) => self.duty = duty,
                Err(e) => warn!("backlight: set duty failed: {}", e),
            }
        }
    }
}

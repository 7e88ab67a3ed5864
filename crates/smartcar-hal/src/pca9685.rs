//! [`MotorActuator`] for a Raspberry Pi motor HAT built around a PCA9685
//! 16-channel PWM controller.
//!
//! Each wheel uses three channels: a PWM channel for speed and two logic
//! channels for direction. The gimbal servos sit on two further channels of
//! the same chip, so the whole board is a single non-reentrant device.

use pwm_pca9685::{Address, Channel, Pca9685};
use rppal::i2c::I2c;
use smartcar_types::{CarError, DriveProfile};
use tracing::{debug, info};

use crate::actuator::MotorActuator;

/// 25 MHz oscillator / (4096 × 50 Hz) − 1.
const PRESCALE_50HZ: u8 = 121;
/// Ticks per PWM period.
const PWM_RESOLUTION: u32 = 4096;
/// PWM period at 50 Hz, in microseconds.
const PERIOD_US: u32 = 20_000;
/// Servo pulse width at 0° and 180°, in microseconds.
const SERVO_MIN_US: u32 = 500;
const SERVO_MAX_US: u32 = 2_500;
/// Full-on duty for logic-level direction channels.
const FULL_ON: u16 = 4095;

/// PCA9685 channels wired to one wheel's H-bridge.
#[derive(Debug, Clone, Copy)]
pub struct WheelChannels {
    pub pwm: u8,
    pub in1: u8,
    pub in2: u8,
}

/// Wheel wiring in `[left_front, right_front, left_rear, right_rear]` order,
/// matching [`DriveProfile::wheel_directions`].
#[derive(Debug, Clone, Copy)]
pub struct WheelLayout(pub [WheelChannels; 4]);

impl Default for WheelLayout {
    fn default() -> Self {
        Self([
            WheelChannels { pwm: 0, in1: 1, in2: 2 },
            WheelChannels { pwm: 5, in1: 3, in2: 4 },
            WheelChannels { pwm: 6, in1: 7, in2: 8 },
            WheelChannels { pwm: 11, in1: 12, in2: 13 },
        ])
    }
}

/// The motor HAT driver.
pub struct Pca9685Motor {
    id: String,
    pwm: Pca9685<I2c>,
    layout: WheelLayout,
}

impl Pca9685Motor {
    /// Open the default I2C bus and configure the chip at `address` for 50 Hz.
    ///
    /// # Errors
    ///
    /// Returns [`CarError::HardwareUnavailable`] when the bus or the chip
    /// cannot be reached.
    pub fn open(address: u8, layout: WheelLayout) -> Result<Self, CarError> {
        let id = format!("pca9685@{address:#04x}");
        let i2c = I2c::new().map_err(|e| CarError::hardware(&id, e.to_string()))?;
        let mut pwm = Pca9685::new(i2c, Address::from(address))
            .map_err(|e| CarError::hardware(&id, format!("{e:?}")))?;
        pwm.set_prescale(PRESCALE_50HZ)
            .map_err(|e| CarError::hardware(&id, format!("{e:?}")))?;
        pwm.enable()
            .map_err(|e| CarError::hardware(&id, format!("{e:?}")))?;
        info!(driver = %id, "motor controller ready");
        Ok(Self { id, pwm, layout })
    }

    fn write(&mut self, channel: u8, off: u16) -> Result<(), CarError> {
        let ch = channel_for(channel)
            .ok_or_else(|| CarError::hardware(&self.id, format!("no such channel {channel}")))?;
        self.pwm
            .set_channel_on_off(ch, 0, off)
            .map_err(|e| CarError::hardware(&self.id, format!("channel {channel}: {e:?}")))
    }

    fn set_wheel(&mut self, wheel: WheelChannels, direction: i8, duty: u16) -> Result<(), CarError> {
        let (in1, in2, duty) = match direction {
            d if d > 0 => (FULL_ON, 0, duty),
            d if d < 0 => (0, FULL_ON, duty),
            _ => (0, 0, 0),
        };
        self.write(wheel.pwm, duty)?;
        self.write(wheel.in1, in1)?;
        self.write(wheel.in2, in2)
    }
}

impl MotorActuator for Pca9685Motor {
    fn id(&self) -> &str {
        &self.id
    }

    fn drive(&mut self, profile: DriveProfile, speed_percent: u8) -> Result<(), CarError> {
        let duty = speed_duty(speed_percent);
        debug!(%profile, speed_percent, duty, "drive");
        let layout = self.layout;
        for (wheel, direction) in layout.0.into_iter().zip(profile.wheel_directions()) {
            self.set_wheel(wheel, direction, duty)?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CarError> {
        let layout = self.layout;
        for wheel in layout.0 {
            self.set_wheel(wheel, 0, 0)?;
        }
        Ok(())
    }

    fn set_servo_angle(&mut self, channel: u8, angle: u8) -> Result<(), CarError> {
        self.write(channel, servo_ticks(angle))
    }
}

fn speed_duty(speed_percent: u8) -> u16 {
    (u32::from(speed_percent.min(100)) * u32::from(FULL_ON) / 100) as u16
}

fn servo_ticks(angle: u8) -> u16 {
    let angle = u32::from(angle.min(180));
    let pulse_us = SERVO_MIN_US + angle * (SERVO_MAX_US - SERVO_MIN_US) / 180;
    (pulse_us * PWM_RESOLUTION / PERIOD_US) as u16
}

fn channel_for(n: u8) -> Option<Channel> {
    Some(match n {
        0 => Channel::C0,
        1 => Channel::C1,
        2 => Channel::C2,
        3 => Channel::C3,
        4 => Channel::C4,
        5 => Channel::C5,
        6 => Channel::C6,
        7 => Channel::C7,
        8 => Channel::C8,
        9 => Channel::C9,
        10 => Channel::C10,
        11 => Channel::C11,
        12 => Channel::C12,
        13 => Channel::C13,
        14 => Channel::C14,
        15 => Channel::C15,
        _ => return None,
    })
}

use std::time::Duration;

use log::{debug, info, warn};

use crate::{
    config::{ServoConfig, MAX_ANGLE, MIN_ANGLE},
    error::ActuatorError,
    platform::{Clock, PwmOutput},
};

/// Base number of interpolation steps at speed 1.0.
const STEP_DIVISOR: f32 = 10.0;
/// Delay between steps at speed 1.0 (50 ms).
const STEP_DELAY_US: f64 = 50_000.0;

/// Position servo driven through a single PWM channel.
///
/// `set_angle` blocks the caller for the whole motion: the move is performed as a
/// fixed-size stepped interpolation from the last written duty to the target duty,
/// sleeping between steps. `current_angle` only changes after the terminal write,
/// so a failed move leaves it at the last fully reached position while
/// `current_duty` tracks what was actually written to the channel.
pub struct ServoActuator<P, C> {
    pwm: P,
    clock: C,
    min_duty: u32,
    max_duty: u32,
    neutral_angle: i32,
    current_angle: i32,
    current_duty: u32,
}

impl<P, C> ServoActuator<P, C>
where
    P: PwmOutput,
    C: Clock,
{
    pub fn new(pwm: P, clock: C, config: &ServoConfig) -> Self {
        let mut servo = Self {
            pwm,
            clock,
            min_duty: config.min_duty.min(config.max_duty),
            max_duty: config.max_duty.max(config.min_duty),
            neutral_angle: config.closed_angle.clamp(MIN_ANGLE, MAX_ANGLE),
            current_angle: 0,
            current_duty: 0,
        };
        servo.current_duty = servo.angle_to_duty(0);
        info!(
            "servo ready (duty {}..{}, neutral {} deg)",
            servo.min_duty, servo.max_duty, servo.neutral_angle
        );
        servo
    }

    pub fn current_angle(&self) -> i32 {
        self.current_angle
    }

    pub fn current_duty(&self) -> u32 {
        self.current_duty
    }

    pub fn angle_to_duty(&self, angle: i32) -> u32 {
        let offset = (angle.clamp(MIN_ANGLE, MAX_ANGLE) - MIN_ANGLE) as u32;
        let span = (MAX_ANGLE - MIN_ANGLE) as u32;
        self.min_duty + offset * (self.max_duty - self.min_duty) / span
    }

    pub fn set_angle(&mut self, target: i32, speed: f32) -> Result<(), ActuatorError> {
        let target_angle = target.clamp(MIN_ANGLE, MAX_ANGLE);
        if target_angle != target {
            debug!("servo target {target} clamped to {target_angle}");
        }

        let speed = if speed.is_finite() && speed > 0.0 {
            speed
        } else {
            warn!("invalid servo speed {speed}; using 1.0");
            1.0
        };

        let target_duty = self.angle_to_duty(target_angle) as i64;
        let start_duty = self.current_duty as i64;
        let step = step_size(target_duty - start_duty, speed);
        let delay = Duration::from_micros((STEP_DELAY_US / speed as f64) as u64);

        let mut duty = start_duty;
        let mut steps = 0_u32;
        if step != 0 {
            loop {
                let Some(next) = duty.checked_add(step) else {
                    break;
                };
                if (step > 0 && next > target_duty) || (step < 0 && next < target_duty) {
                    break;
                }
                self.write(next as u32, target_angle)?;
                duty = next;
                steps += 1;
                self.clock.sleep(delay);
            }
        }

        // Final write absorbs the truncation drift of the fixed step.
        self.write(target_duty as u32, target_angle)?;
        self.current_angle = target_angle;

        debug!(
            "servo moved to {} deg (duty {} -> {}, {} steps, speed {})",
            target_angle, start_duty, target_duty, steps, speed
        );
        Ok(())
    }

    /// Drive to the neutral (closed) position.
    pub fn park(&mut self) -> Result<(), ActuatorError> {
        self.set_angle(self.neutral_angle, 1.0)
    }

    fn write(&mut self, duty: u32, target_angle: i32) -> Result<(), ActuatorError> {
        self.pwm
            .set_duty(duty)
            .map_err(|source| ActuatorError {
                target_angle,
                source,
            })?;
        self.current_duty = duty;
        Ok(())
    }
}

/// `delta / (10 / speed)` truncated toward zero, never zero while a move remains
/// and never longer than the move itself.
fn step_size(delta: i64, speed: f32) -> i64 {
    if delta == 0 {
        return 0;
    }
    let step = (delta as f64 / (STEP_DIVISOR as f64 / speed as f64)).trunc();
    if step.abs() >= delta.abs() as f64 {
        delta
    } else if step == 0.0 {
        delta.signum()
    } else {
        step as i64
    }
}

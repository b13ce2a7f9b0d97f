use anyhow::anyhow;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::states::Rotation;

/// A motor that can take exactly one step at a time.
pub trait Drive {
    fn step(&mut self, rotation: Rotation) -> anyhow::Result<()>;

    /// De-energize the coils. The platform holds by gear friction alone.
    fn release(&mut self) -> anyhow::Result<()>;
}

// Half-step coil sequence for a 28BYJ-48, bit n drives IN(n+1).
const HALF_STEPS: [u8; 8] = [
    0b0001, 0b0011, 0b0010, 0b0110, 0b0100, 0b1100, 0b1000, 0b1001,
];

/// 28BYJ-48 unipolar stepper on a ULN2003 darlington board, half-step mode.
pub struct Uln2003<P, D>
where
    P: OutputPin,
    D: DelayNs,
{
    pins: [P; 4],
    delay: D,
    step_delay_us: u32,
    phase: usize,
}

impl<P, D> Uln2003<P, D>
where
    P: OutputPin,
    D: DelayNs,
{
    pub fn new(pins: [P; 4], delay: D, step_delay_us: u32) -> Self {
        Self {
            pins,
            delay,
            step_delay_us,
            phase: 0,
        }
    }

    fn set_coils(&mut self, mask: u8) -> anyhow::Result<()> {
        for (i, pin) in self.pins.iter_mut().enumerate() {
            let result = if (mask & (1 << i)) != 0 {
                pin.set_high()
            } else {
                pin.set_low()
            };
            result.map_err(|e| anyhow!("coil IN{} failed: {:?}", i + 1, e))?;
        }
        Ok(())
    }
}

impl<P, D> Drive for Uln2003<P, D>
where
    P: OutputPin,
    D: DelayNs,
{
    fn step(&mut self, rotation: Rotation) -> anyhow::Result<()> {
        self.phase = match rotation {
            Rotation::Clockwise => (self.phase + 1) % HALF_STEPS.len(),
            Rotation::CounterClockwise => (self.phase + HALF_STEPS.len() - 1) % HALF_STEPS.len(),
        };
        self.set_coils(HALF_STEPS[self.phase])?;
        self.delay.delay_us(self.step_delay_us);
        Ok(())
    }

    fn release(&mut self) -> anyhow::Result<()> {
        self.set_coils(0)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::convert::Infallible;
    use std::rc::Rc;

    use embedded_hal::digital::ErrorType;

    use super::*;

    #[derive(Debug, Clone, Default)]
    struct MockPin {
        level: Rc<RefCell<bool>>,
    }

    impl ErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            *self.level.borrow_mut() = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            *self.level.borrow_mut() = true;
            Ok(())
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    fn coils(pins: &[MockPin; 4]) -> u8 {
        pins.iter()
            .enumerate()
            .fold(0, |mask, (i, pin)| mask | ((*pin.level.borrow() as u8) << i))
    }

    fn motor() -> ([MockPin; 4], Uln2003<MockPin, NoDelay>) {
        let pins: [MockPin; 4] = Default::default();
        let motor = Uln2003::new(pins.clone(), NoDelay, 2000);
        (pins, motor)
    }

    #[test]
    fn clockwise_walks_the_half_step_table() {
        let (pins, mut motor) = motor();
        for expected in [0b0011, 0b0010, 0b0110, 0b0100] {
            motor.step(Rotation::Clockwise).unwrap();
            assert_eq!(coils(&pins), expected);
        }
    }

    #[test]
    fn counterclockwise_wraps_backwards() {
        let (pins, mut motor) = motor();
        motor.step(Rotation::CounterClockwise).unwrap();
        assert_eq!(coils(&pins), 0b1001);
        motor.step(Rotation::CounterClockwise).unwrap();
        assert_eq!(coils(&pins), 0b1000);
    }

    #[test]
    fn release_drops_all_coils() {
        let (pins, mut motor) = motor();
        motor.step(Rotation::Clockwise).unwrap();
        motor.release().unwrap();
        assert_eq!(coils(&pins), 0);
    }
}

//! Board assembly. Owns every collaborator and wires them in dependency
//! order: clocks, LEDs, descriptors, then the USB device.

use crate::app::Application;
use crate::device::Device;
use crate::endpoint::UsbHardware;
use crate::variant::{Identity, Variant};
use failure::Error;

pub trait Clocks {
    fn sysclk_hz(&self) -> u32;
    fn ahb_hz(&self) -> u32;
    fn apb1_hz(&self) -> u32;
    fn apb2_hz(&self) -> u32;
}

pub trait OutputPin {
    fn set(&mut self, on: bool);
}

pub struct Leds<P> {
    pub green: P,
    pub orange: P,
    pub red: P,
    pub blue: P,
}

pub const HEARTBEAT_PERIOD_MS: u32 = 1000;

/// Blinks a LED to show the firmware is alive.
#[derive(Debug)]
pub struct Heartbeat {
    period_ms: u32,
    elapsed_ms: u32,
    on: bool,
}

impl Heartbeat {
    pub fn new(period_ms: u32) -> Self {
        Self {
            period_ms,
            elapsed_ms: 0,
            on: false,
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Advances time; the LED toggles once per half period.
    pub fn tick(&mut self, elapsed_ms: u32, led: &mut impl OutputPin) {
        let half = (self.period_ms / 2).max(1);
        self.elapsed_ms += elapsed_ms;
        while self.elapsed_ms >= half {
            self.elapsed_ms -= half;
            self.on = !self.on;
            led.set(self.on);
        }
    }
}

pub struct Board<H, A, P> {
    leds: Leds<P>,
    heartbeat: Heartbeat,
    device: Device<H, A>,
    variant: Variant,
}

impl<H: UsbHardware, A: Application, P: OutputPin> Board<H, A, P> {
    /// Brings the board up. A failure lights the red LED and is returned to
    /// the caller, which is expected to halt.
    pub fn bring_up(
        clocks: &impl Clocks,
        mut leds: Leds<P>,
        hw: H,
        app: A,
        variant: Variant,
        identity: &Identity,
    ) -> Result<Self, Error> {
        log::info!("CPU running @ {} kHz", clocks.sysclk_hz() / 1000);
        log::info!("        AHB @ {} kHz", clocks.ahb_hz() / 1000);
        log::info!("       APB1 @ {} kHz", clocks.apb1_hz() / 1000);
        log::info!("       APB2 @ {} kHz", clocks.apb2_hz() / 1000);

        for led in [&mut leds.green, &mut leds.orange, &mut leds.red, &mut leds.blue].iter_mut() {
            led.set(false);
        }

        match Self::start_device(hw, app, variant, identity) {
            Ok(device) => {
                log::info!("USB device started as {}", variant);
                Ok(Board {
                    leds,
                    heartbeat: Heartbeat::new(HEARTBEAT_PERIOD_MS),
                    device,
                    variant,
                })
            }
            Err(e) => {
                leds.red.set(true);
                log::error!("FATAL: {}", e);
                Err(e)
            }
        }
    }

    fn start_device(hw: H, app: A, variant: Variant, identity: &Identity) -> Result<Device<H, A>, Error> {
        let descriptors = variant.descriptors(identity)?;
        log::debug!(
            "{} descriptors: configuration {} bytes, {} strings",
            variant,
            descriptors.total_length(),
            descriptors.string_descriptors.len()
        );
        let mut device = Device::new(hw, app, descriptors, variant.class_handlers());
        device.start()?;
        Ok(device)
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn device(&self) -> &Device<H, A> {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device<H, A> {
        &mut self.device
    }

    pub fn leds(&self) -> &Leds<P> {
        &self.leds
    }

    /// Periodic housekeeping: heartbeat LED and pending bulk IN data.
    pub fn tick(&mut self, elapsed_ms: u32) {
        self.heartbeat.tick(elapsed_ms, &mut self.leds.green);
        self.device.poll_application();
    }

    /// Lights the red LED for an unrecoverable error.
    pub fn fatal(&mut self, reason: &str) {
        self.leds.red.set(true);
        log::error!("FATAL ERROR: {}", reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Loopback;
    use crate::error::HardwareError;
    use usb_device::endpoint::{EndpointAddress, EndpointType};

    struct FixedClocks;

    impl Clocks for FixedClocks {
        fn sysclk_hz(&self) -> u32 {
            168_000_000
        }
        fn ahb_hz(&self) -> u32 {
            168_000_000
        }
        fn apb1_hz(&self) -> u32 {
            42_000_000
        }
        fn apb2_hz(&self) -> u32 {
            84_000_000
        }
    }

    #[derive(Default, Debug)]
    struct Pin {
        on: bool,
        writes: usize,
    }

    impl OutputPin for Pin {
        fn set(&mut self, on: bool) {
            self.on = on;
            self.writes += 1;
        }
    }

    fn leds() -> Leds<Pin> {
        Leds {
            green: Pin::default(),
            orange: Pin::default(),
            red: Pin::default(),
            blue: Pin::default(),
        }
    }

    struct Core {
        fail: bool,
    }

    impl UsbHardware for Core {
        fn configure(&mut self, _: EndpointAddress, _: EndpointType, _: u16) -> Result<(), HardwareError> {
            if self.fail {
                Err(HardwareError::Rejected)
            } else {
                Ok(())
            }
        }
        fn disable(&mut self, _: EndpointAddress) {}
        fn submit(&mut self, _: EndpointAddress, _: &[u8]) -> Result<(), HardwareError> {
            Ok(())
        }
        fn stall(&mut self, _: EndpointAddress) {}
        fn clear_stall(&mut self, _: EndpointAddress) {}
        fn set_address(&mut self, _: u8) {}
    }

    #[test]
    fn heartbeat_toggles_every_half_period() {
        let mut led = Pin::default();
        let mut hb = Heartbeat::new(1000);
        hb.tick(499, &mut led);
        assert_eq!(led.writes, 0);
        hb.tick(1, &mut led);
        assert!(led.on);
        hb.tick(1000, &mut led);
        assert!(led.on);
        assert_eq!(led.writes, 3);
    }

    #[test]
    fn bring_up_starts_device() {
        let board = Board::bring_up(
            &FixedClocks,
            leds(),
            Core { fail: false },
            Loopback::new(),
            Variant::CdcAcm { notification: true },
            &Identity::default(),
        )
        .unwrap();
        assert!(!board.leds().red.on);
        assert_eq!(board.device().descriptors().total_length(), 75);
    }

    #[test]
    fn tick_drives_heartbeat_and_fatal_lights_red() {
        let mut board = Board::bring_up(
            &FixedClocks,
            leds(),
            Core { fail: false },
            Loopback::new(),
            Variant::Vendor,
            &Identity::default(),
        )
        .unwrap();
        board.tick(HEARTBEAT_PERIOD_MS / 2);
        assert!(board.leds().green.on);
        assert!(board.heartbeat.is_on());

        board.fatal("test");
        assert!(board.leds().red.on);
    }

    #[test]
    fn failed_bring_up_reports_hardware_error() {
        let result = Board::bring_up(
            &FixedClocks,
            leds(),
            Core { fail: true },
            Loopback::new(),
            Variant::Vendor,
            &Identity::default(),
        );
        let err = result.err().unwrap();
        assert_eq!(err.downcast_ref::<HardwareError>(), Some(&HardwareError::Rejected));
    }
}

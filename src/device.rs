//! The USB device: descriptors, default control pipe and the configuration,
//! driven by events from the USB core.

use crate::app::Application;
use crate::builder::DescriptorSet;
use crate::control::{ControlPipe, ControlState, Stall, CONTROL_BUFFER_SIZE};
use crate::endpoint::{ep0_in, ep0_out, Endpoint, Event, UsbHardware};
use crate::error::HardwareError;
use crate::interface::{ClassHandler, Configuration};
use crate::usb::{UsbDescriptorType, FULL_SPEED_MAX_PACKET_SIZE};
use crate::EndpointInfo;
use usb_device::control::{Recipient, Request, RequestType};
use usb_device::endpoint::{EndpointAddress, EndpointType};
use usb_device::UsbDirection;

const FEATURE_ENDPOINT_HALT: u16 = 0;
const FEATURE_DEVICE_REMOTE_WAKEUP: u16 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Default,
    Addressed,
    Configured,
}

pub struct Device<H, A> {
    hw: H,
    app: A,
    descriptors: DescriptorSet,
    configuration: Configuration,
    pipe: ControlPipe,
    state: DeviceState,
    address: u8,
    remote_wakeup: bool,
}

impl<H: UsbHardware, A: Application> Device<H, A> {
    pub fn new(
        hw: H,
        app: A,
        descriptors: DescriptorSet,
        handlers: Vec<Box<dyn ClassHandler>>,
    ) -> Self {
        let configuration = Configuration::new(&descriptors, handlers);
        let pipe = ControlPipe::new(descriptors.max_packet_size_0);
        Self {
            hw,
            app,
            descriptors,
            configuration,
            pipe,
            state: DeviceState::Default,
            address: 0,
            remote_wakeup: false,
        }
    }

    /// Enables the control endpoint pair. Call once the core is up and
    /// again after every bus reset.
    pub fn start(&mut self) -> Result<(), HardwareError> {
        let mps = u16::from(self.descriptors.max_packet_size_0);
        self.hw.configure(ep0_out(), EndpointType::Control, mps)?;
        self.hw.configure(ep0_in(), EndpointType::Control, mps)?;
        Ok(())
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn control_state(&self) -> ControlState {
        self.pipe.state()
    }

    pub fn descriptors(&self) -> &DescriptorSet {
        &self.descriptors
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    pub fn hw_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Reset => self.reset(),
            Event::Setup(packet) => self.setup(&packet),
            Event::OutComplete(address, data) if address.index() == 0 => {
                if let Some(req) = self.pipe.out_complete(&mut self.hw, data) {
                    let result = match self.configuration.route(&req) {
                        Some(interface) => interface.handler_mut().control_out(&req, self.pipe.data()),
                        None => Err(Stall),
                    };
                    self.finish_out(result);
                }
            }
            Event::OutComplete(address, data) => self.bulk_out(address, data),
            Event::InComplete(address) if address.index() == 0 => {
                if let Some(req) = self.pipe.in_complete(&mut self.hw) {
                    self.status_complete(&req);
                }
            }
            Event::InComplete(address) => {
                if let Some(ep) = self.configuration.endpoint_mut(address) {
                    ep.complete();
                }
                self.poll_application();
            }
        }
    }

    /// Moves pending application data to bulk IN if the endpoint is free.
    pub fn poll_application(&mut self) {
        if self.state != DeviceState::Configured {
            return;
        }
        let ep = match self.configuration.bulk_in() {
            Some(ep) if ep.is_active() && !ep.is_busy() && !ep.is_halted() => ep,
            _ => return,
        };

        let mut buf = [0u8; FULL_SPEED_MAX_PACKET_SIZE as usize];
        let mps = usize::from(ep.max_packet_size()).min(buf.len());
        let n = self.app.produce(&mut buf[..mps]);
        if n == 0 {
            return;
        }
        if let Err(e) = ep.write(&mut self.hw, &buf[..n]) {
            log::warn!("bulk IN {:#04x} failed, {} bytes lost: {}", u8::from(ep.address()), n, e);
            ep.set_halted(&mut self.hw, true);
        }
    }

    fn reset(&mut self) {
        log::debug!("bus reset");
        self.configuration.deactivate(&mut self.hw);
        self.pipe.reset();
        self.state = DeviceState::Default;
        self.address = 0;
        self.remote_wakeup = false;
        self.hw.set_address(0);
        if let Err(e) = self.start() {
            log::warn!("control endpoint refused after reset: {}", e);
        }
    }

    fn bulk_out(&mut self, address: EndpointAddress, data: &[u8]) {
        let owned = match self.configuration.bulk_out() {
            Some(ep) => ep.address() == address && ep.is_active(),
            None => false,
        };
        if !owned {
            return;
        }
        let kept = self.app.accept(data);
        if kept < data.len() {
            log::warn!("application dropped {} bytes", data.len() - kept);
        }
        self.poll_application();
    }

    fn setup(&mut self, packet: &[u8; 8]) {
        let req = self.pipe.setup(packet);
        log::trace!(
            "setup {:?} {:?} {:?} req={:#04x} value={:#06x} index={} length={}",
            req.direction,
            req.request_type,
            req.recipient,
            req.request,
            req.value,
            req.index,
            req.length
        );

        if req.direction == UsbDirection::In {
            let mut buf = [0u8; CONTROL_BUFFER_SIZE];
            match self.control_in(&req, &mut buf) {
                Ok(n) => self.pipe.respond_in(&mut self.hw, &buf[..n]),
                Err(Stall) => self.pipe.reject(&mut self.hw),
            }
        } else if req.length > 0 {
            // Only class and vendor requests take an OUT data stage.
            if self.state == DeviceState::Configured && self.configuration.route(&req).is_some() {
                self.pipe.expect_out(&mut self.hw);
            } else {
                self.pipe.reject(&mut self.hw);
            }
        } else {
            let result = self.control_out(&req);
            self.finish_out(result);
        }
    }

    fn finish_out(&mut self, result: Result<(), Stall>) {
        match result {
            Ok(()) => self.pipe.accept(&mut self.hw),
            Err(Stall) => self.pipe.reject(&mut self.hw),
        }
    }

    /// Runs after the status stage of a request, where its effect may only
    /// start now.
    fn status_complete(&mut self, req: &Request) {
        if req.request_type == RequestType::Standard
            && req.recipient == Recipient::Device
            && req.request == Request::SET_ADDRESS
        {
            self.address = req.value as u8;
            self.hw.set_address(self.address);
            self.state = if self.address == 0 {
                DeviceState::Default
            } else {
                DeviceState::Addressed
            };
            log::debug!("address {}", self.address);
        }
    }

    fn control_in(&mut self, req: &Request, buf: &mut [u8]) -> Result<usize, Stall> {
        if req.request_type != RequestType::Standard {
            if self.state != DeviceState::Configured {
                return Err(Stall);
            }
            return self
                .configuration
                .route(req)
                .ok_or(Stall)?
                .handler_mut()
                .control_in(req, buf);
        }

        let response: &[u8] = match (req.recipient, req.request) {
            (Recipient::Device, Request::GET_STATUS) => {
                let status = u8::from(self.descriptors.self_powered) | u8::from(self.remote_wakeup) << 1;
                return copy_out(buf, &[status, 0]);
            }
            (Recipient::Device, Request::GET_DESCRIPTOR) => self.descriptor(req)?,
            (Recipient::Device, Request::GET_CONFIGURATION) => {
                let value = match self.state {
                    DeviceState::Configured => self.configuration.value(),
                    _ => 0,
                };
                return copy_out(buf, &[value]);
            }
            (Recipient::Interface, Request::GET_STATUS) => {
                self.configured_interface(req)?;
                &[0, 0]
            }
            (Recipient::Interface, Request::GET_INTERFACE) => {
                self.configured_interface(req)?;
                &[0]
            }
            (Recipient::Endpoint, Request::GET_STATUS) => {
                let address = endpoint_address(req)?;
                let halted = if address.index() == 0 {
                    false
                } else {
                    self.configured_endpoint(address)?.is_halted()
                };
                return copy_out(buf, &[u8::from(halted), 0]);
            }
            _ => return Err(Stall),
        };
        copy_out(buf, response)
    }

    fn descriptor(&self, req: &Request) -> Result<&[u8], Stall> {
        let (dtype, index) = req.descriptor_type_index();
        match UsbDescriptorType::from_u8(dtype) {
            Some(UsbDescriptorType::Device) if index == 0 => Ok(&self.descriptors.device_descriptor),
            Some(UsbDescriptorType::Configuration) if index == 0 => {
                Ok(&self.descriptors.configuration_descriptor)
            }
            Some(UsbDescriptorType::String) => self.descriptors.string(index).ok_or(Stall),
            _ => Err(Stall),
        }
    }

    fn control_out(&mut self, req: &Request) -> Result<(), Stall> {
        if req.request_type != RequestType::Standard {
            if self.state != DeviceState::Configured {
                return Err(Stall);
            }
            return self
                .configuration
                .route(req)
                .ok_or(Stall)?
                .handler_mut()
                .control_out(req, &[]);
        }

        match (req.recipient, req.request) {
            (Recipient::Device, Request::SET_ADDRESS) => {
                if req.value > 127 || self.state == DeviceState::Configured {
                    return Err(Stall);
                }
                Ok(())
            }
            (Recipient::Device, Request::SET_CONFIGURATION) => self.set_configuration(req.value),
            (Recipient::Device, Request::SET_FEATURE)
            | (Recipient::Device, Request::CLEAR_FEATURE)
                if req.value == FEATURE_DEVICE_REMOTE_WAKEUP =>
            {
                self.remote_wakeup = req.request == Request::SET_FEATURE;
                Ok(())
            }
            (Recipient::Interface, Request::SET_INTERFACE) => {
                self.configured_interface(req)?;
                if req.value == 0 {
                    Ok(())
                } else {
                    Err(Stall)
                }
            }
            (Recipient::Endpoint, Request::SET_FEATURE)
            | (Recipient::Endpoint, Request::CLEAR_FEATURE)
                if req.value == FEATURE_ENDPOINT_HALT =>
            {
                let address = endpoint_address(req)?;
                if address.index() == 0 {
                    return Ok(());
                }
                let halt = req.request == Request::SET_FEATURE;
                if self.state != DeviceState::Configured {
                    return Err(Stall);
                }
                let ep = self.configuration.endpoint_mut(address).ok_or(Stall)?;
                ep.set_halted(&mut self.hw, halt);
                Ok(())
            }
            _ => Err(Stall),
        }
    }

    fn set_configuration(&mut self, value: u16) -> Result<(), Stall> {
        if self.state == DeviceState::Default {
            return Err(Stall);
        }
        if value == 0 {
            self.configuration.deactivate(&mut self.hw);
            self.state = DeviceState::Addressed;
            log::debug!("deconfigured");
            return Ok(());
        }
        if value != u16::from(self.configuration.value()) {
            return Err(Stall);
        }

        if self.configuration.is_active() {
            self.configuration.deactivate(&mut self.hw);
        }
        if self.configuration.activate(&mut self.hw).is_err() {
            self.state = DeviceState::Addressed;
            return Err(Stall);
        }
        self.state = DeviceState::Configured;
        log::debug!("configuration {} active", value);
        Ok(())
    }

    fn configured_interface(&mut self, req: &Request) -> Result<(), Stall> {
        if self.state != DeviceState::Configured || req.index > 0xff {
            return Err(Stall);
        }
        self.configuration
            .interface_mut(req.index as u8)
            .map(|_| ())
            .ok_or(Stall)
    }

    fn configured_endpoint(
        &mut self,
        address: EndpointAddress,
    ) -> Result<&mut Endpoint, Stall> {
        if self.state != DeviceState::Configured {
            return Err(Stall);
        }
        self.configuration.endpoint_mut(address).ok_or(Stall)
    }
}

/// Endpoint named by wIndex. The high byte is reserved and must be zero.
fn endpoint_address(req: &Request) -> Result<EndpointAddress, Stall> {
    if req.index > 0xff {
        return Err(Stall);
    }
    Ok(EndpointAddress::from(req.index as u8))
}

fn copy_out(buf: &mut [u8], data: &[u8]) -> Result<usize, Stall> {
    let n = data.len().min(buf.len());
    buf[..n].copy_from_slice(&data[..n]);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Loopback;
    use crate::variant::{Identity, Variant};

    #[derive(Default)]
    struct Hw {
        sent: Vec<(u8, Vec<u8>)>,
        stalled: Vec<u8>,
        address: Option<u8>,
    }

    impl UsbHardware for Hw {
        fn configure(&mut self, _: EndpointAddress, _: EndpointType, _: u16) -> Result<(), HardwareError> {
            Ok(())
        }
        fn disable(&mut self, _: EndpointAddress) {}
        fn submit(&mut self, address: EndpointAddress, data: &[u8]) -> Result<(), HardwareError> {
            self.sent.push((address.into(), data.to_vec()));
            Ok(())
        }
        fn stall(&mut self, address: EndpointAddress) {
            self.stalled.push(address.into());
        }
        fn clear_stall(&mut self, address: EndpointAddress) {
            let address: u8 = address.into();
            self.stalled.retain(|a| *a != address);
        }
        fn set_address(&mut self, address: u8) {
            self.address = Some(address);
        }
    }

    fn vendor_device() -> Device<Hw, Loopback> {
        let variant = Variant::Vendor;
        let set = variant.descriptors(&Identity::default()).unwrap();
        let mut dev = Device::new(Hw::default(), Loopback::new(), set, variant.class_handlers());
        dev.start().unwrap();
        dev
    }

    fn no_data(dev: &mut Device<Hw, Loopback>, packet: [u8; 8]) {
        dev.handle_event(Event::Setup(packet));
        dev.handle_event(Event::InComplete(ep0_in()));
    }

    #[test]
    fn set_address_waits_for_status_stage() {
        let mut dev = vendor_device();
        dev.handle_event(Event::Setup([0x00, 0x05, 0x0c, 0x00, 0x00, 0x00, 0x00, 0x00]));
        assert_eq!(dev.hw().address, None);
        assert_eq!(dev.state(), DeviceState::Default);

        dev.handle_event(Event::InComplete(ep0_in()));
        assert_eq!(dev.hw().address, Some(12));
        assert_eq!(dev.state(), DeviceState::Addressed);
    }

    #[test]
    fn set_configuration_requires_address() {
        let mut dev = vendor_device();
        dev.handle_event(Event::Setup([0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]));
        assert_eq!(dev.hw().stalled, vec![0x80, 0x00]);
        assert_eq!(dev.control_state(), ControlState::Idle);
    }

    #[test]
    fn configure_and_deconfigure() {
        let mut dev = vendor_device();
        no_data(&mut dev, [0x00, 0x05, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00]);
        no_data(&mut dev, [0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(dev.state(), DeviceState::Configured);
        assert!(dev.configuration().is_active());

        dev.handle_event(Event::Setup([0x80, 0x08, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00]));
        assert_eq!(dev.hw().sent.last(), Some(&(0x80, vec![1])));

        no_data(&mut dev, [0x00, 0x09, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(dev.state(), DeviceState::Addressed);
        assert!(!dev.configuration().is_active());
    }

    #[test]
    fn unknown_configuration_value_stalls() {
        let mut dev = vendor_device();
        no_data(&mut dev, [0x00, 0x05, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00]);
        dev.handle_event(Event::Setup([0x00, 0x09, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00]));
        assert_eq!(dev.hw().stalled, vec![0x80, 0x00]);
        assert_eq!(dev.state(), DeviceState::Addressed);
    }

    #[test]
    fn endpoint_halt_feature() {
        let mut dev = vendor_device();
        no_data(&mut dev, [0x00, 0x05, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00]);
        no_data(&mut dev, [0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);

        no_data(&mut dev, [0x02, 0x03, 0x00, 0x00, 0x81, 0x00, 0x00, 0x00]);
        assert_eq!(dev.hw().stalled, vec![0x81]);

        dev.handle_event(Event::Setup([0x82, 0x00, 0x00, 0x00, 0x81, 0x00, 0x02, 0x00]));
        assert_eq!(dev.hw().sent.last(), Some(&(0x80, vec![1, 0])));
        dev.handle_event(Event::InComplete(ep0_in()));
        dev.handle_event(Event::OutComplete(ep0_out(), &[]));

        no_data(&mut dev, [0x02, 0x01, 0x00, 0x00, 0x81, 0x00, 0x00, 0x00]);
        assert!(dev.hw().stalled.is_empty());
    }

    #[test]
    fn reserved_index_byte_is_refused() {
        let mut dev = vendor_device();
        no_data(&mut dev, [0x00, 0x05, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00]);
        no_data(&mut dev, [0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);

        dev.handle_event(Event::Setup([0x02, 0x03, 0x00, 0x00, 0x81, 0x01, 0x00, 0x00]));
        assert_eq!(dev.hw().stalled, vec![0x80, 0x00]);
        assert!(!dev.configuration.endpoint_mut(EndpointAddress::from(0x81)).unwrap().is_halted());

        dev.handle_event(Event::Setup([0x81, 0x0a, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00]));
        assert_eq!(dev.hw().stalled, vec![0x80, 0x00, 0x80, 0x00]);
        assert_eq!(dev.control_state(), ControlState::Idle);
    }

    #[test]
    fn reset_returns_to_default() {
        let mut dev = vendor_device();
        no_data(&mut dev, [0x00, 0x05, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00]);
        no_data(&mut dev, [0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        dev.handle_event(Event::Reset);
        assert_eq!(dev.state(), DeviceState::Default);
        assert_eq!(dev.address(), 0);
        assert!(!dev.configuration().is_active());
        assert_eq!(dev.control_state(), ControlState::Idle);
    }

    #[test]
    fn bulk_out_is_ignored_until_configured() {
        let mut dev = vendor_device();
        dev.handle_event(Event::OutComplete(EndpointAddress::from(0x01), b"early"));
        assert_eq!(dev.app().pending(), 0);
    }
}

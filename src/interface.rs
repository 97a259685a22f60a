//! Runtime composition: interfaces own endpoints and class-request handlers,
//! the configuration owns interfaces.

use crate::builder::DescriptorSet;
use crate::cdc::{
    ControlLineState, LineCoding, GET_LINE_CODING, SEND_BREAK, SET_CONTROL_LINE_STATE,
    SET_LINE_CODING,
};
use crate::control::Stall;
use crate::endpoint::{Endpoint, UsbHardware};
use crate::error::HardwareError;
use crate::usb::UsbClass;
use crate::EndpointInfo;
use usb_device::control::{Recipient, Request, RequestType};
use usb_device::endpoint::{EndpointAddress, EndpointType};
use usb_device::UsbDirection;

/// Class or vendor requests addressed to one interface.
///
/// Anything a handler does not override is answered with a STALL. Handlers
/// see both request types and must check `request_type` themselves.
pub trait ClassHandler {
    /// Fills `buf` with the response to an IN request and returns its length.
    fn control_in(&mut self, _req: &Request, _buf: &mut [u8]) -> Result<usize, Stall> {
        Err(Stall)
    }

    /// Consumes an OUT request together with its data stage, if any.
    fn control_out(&mut self, _req: &Request, _data: &[u8]) -> Result<(), Stall> {
        Err(Stall)
    }

    /// Called when the configuration is torn down.
    fn reset(&mut self) {}
}

/// Handler for interfaces without class requests.
pub struct NoClassRequests;

impl ClassHandler for NoClassRequests {}

/// Abstract Control Model requests of a CDC communication interface.
#[derive(Debug, Default)]
pub struct CdcAcmControl {
    line_coding: LineCoding,
    line_state: ControlLineState,
    break_duration: Option<u16>,
}

impl CdcAcmControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line_coding(&self) -> &LineCoding {
        &self.line_coding
    }

    pub fn line_state(&self) -> ControlLineState {
        self.line_state
    }

    /// Duration of the last break the host asked for, in milliseconds.
    pub fn break_duration(&self) -> Option<u16> {
        self.break_duration
    }
}

impl ClassHandler for CdcAcmControl {
    fn control_in(&mut self, req: &Request, buf: &mut [u8]) -> Result<usize, Stall> {
        if req.request_type != RequestType::Class {
            return Err(Stall);
        }
        match req.request {
            GET_LINE_CODING if buf.len() >= LineCoding::SIZE => {
                buf[..LineCoding::SIZE].copy_from_slice(&self.line_coding.bytes());
                Ok(LineCoding::SIZE)
            }
            _ => Err(Stall),
        }
    }

    fn control_out(&mut self, req: &Request, data: &[u8]) -> Result<(), Stall> {
        if req.request_type != RequestType::Class {
            return Err(Stall);
        }
        match req.request {
            SET_LINE_CODING => {
                self.line_coding = LineCoding::parse(data).ok_or(Stall)?;
                log::debug!("line coding {:?}", self.line_coding);
            }
            SET_CONTROL_LINE_STATE => {
                self.line_state = ControlLineState::from(req.value);
                log::debug!("control line state {:?}", self.line_state);
            }
            SEND_BREAK => {
                self.break_duration = Some(req.value);
            }
            _ => return Err(Stall),
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.line_state = ControlLineState::default();
        self.break_duration = None;
    }
}

pub struct Interface {
    number: u8,
    class: UsbClass,
    endpoints: Vec<Endpoint>,
    handler: Box<dyn ClassHandler>,
}

impl Interface {
    pub fn new(number: u8, class: UsbClass, endpoints: Vec<Endpoint>, handler: Box<dyn ClassHandler>) -> Self {
        Self {
            number,
            class,
            endpoints,
            handler,
        }
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn class(&self) -> UsbClass {
        self.class
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn handler_mut(&mut self) -> &mut dyn ClassHandler {
        self.handler.as_mut()
    }

    /// Class and vendor requests whose recipient is this interface.
    pub fn intercepts(&self, req: &Request) -> bool {
        match req.request_type {
            RequestType::Class | RequestType::Vendor => {}
            _ => return false,
        }
        req.recipient == Recipient::Interface && req.index == u16::from(self.number)
    }
}

/// The single configuration of the device.
pub struct Configuration {
    value: u8,
    interfaces: Vec<Interface>,
    active: bool,
}

impl Configuration {
    /// Binds the interfaces of `descriptors` to `handlers`, given in interface
    /// order. Interfaces left without a handler stall every class request.
    pub fn new(descriptors: &DescriptorSet, handlers: Vec<Box<dyn ClassHandler>>) -> Self {
        let mut handlers = handlers.into_iter();
        let interfaces = descriptors
            .interfaces
            .iter()
            .map(|layout| {
                let endpoints = layout
                    .endpoints
                    .iter()
                    .map(|ep| Endpoint::new(ep.clone(), layout.number))
                    .collect();
                let handler = handlers
                    .next()
                    .unwrap_or_else(|| Box::new(NoClassRequests) as Box<dyn ClassHandler>);
                Interface::new(layout.number, layout.class, endpoints, handler)
            })
            .collect();

        Self {
            value: descriptors.configuration_value,
            interfaces,
            active: false,
        }
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    /// Enables every endpoint of every interface. Either all of them end up
    /// bound to hardware or none do.
    pub fn activate(&mut self, hw: &mut impl UsbHardware) -> Result<(), HardwareError> {
        let result = self
            .interfaces
            .iter_mut()
            .flat_map(|i| i.endpoints.iter_mut())
            .try_for_each(|endpoint| {
                endpoint.activate(&mut *hw).map_err(|e| {
                    log::warn!("endpoint {:#04x} refused: {}", u8::from(endpoint.address()), e);
                    e
                })
            });
        if let Err(e) = result {
            self.deactivate(hw);
            return Err(e);
        }
        self.active = true;
        Ok(())
    }

    pub fn deactivate(&mut self, hw: &mut impl UsbHardware) {
        for interface in &mut self.interfaces {
            for endpoint in &mut interface.endpoints {
                endpoint.deactivate(hw);
            }
            interface.handler.reset();
        }
        self.active = false;
    }

    pub fn interface_mut(&mut self, number: u8) -> Option<&mut Interface> {
        self.interfaces.iter_mut().find(|i| i.number == number)
    }

    /// The interface a class or vendor request is addressed to.
    pub fn route(&mut self, req: &Request) -> Option<&mut Interface> {
        self.interfaces.iter_mut().find(|i| i.intercepts(req))
    }

    pub fn endpoint_mut(&mut self, address: EndpointAddress) -> Option<&mut Endpoint> {
        self.interfaces
            .iter_mut()
            .flat_map(|i| i.endpoints.iter_mut())
            .find(|ep| ep.address() == address)
    }

    fn bulk(&mut self, direction: UsbDirection) -> Option<&mut Endpoint> {
        self.interfaces
            .iter_mut()
            .flat_map(|i| i.endpoints.iter_mut())
            .find(|ep| ep.ep_type() == EndpointType::Bulk && ep.direction() == direction)
    }

    /// Endpoint carrying application data to the host.
    pub fn bulk_in(&mut self) -> Option<&mut Endpoint> {
        self.bulk(UsbDirection::In)
    }

    /// Endpoint carrying application data from the host.
    pub fn bulk_out(&mut self) -> Option<&mut Endpoint> {
        self.bulk(UsbDirection::Out)
    }
}

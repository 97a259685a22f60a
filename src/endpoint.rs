//! Protocol-side view of hardware endpoints.

use crate::error::HardwareError;
use crate::usb::UsbEndpointDescriptor;
use crate::EndpointInfo;
use usb_device::endpoint::{EndpointAddress, EndpointType};
use usb_device::UsbDirection;

/// Capabilities the USB core driver provides. The protocol layer never touches
/// registers; everything goes through this trait.
pub trait UsbHardware {
    /// Enables an endpoint with the given transfer type and packet size.
    fn configure(
        &mut self,
        address: EndpointAddress,
        ep_type: EndpointType,
        max_packet_size: u16,
    ) -> Result<(), HardwareError>;

    fn disable(&mut self, address: EndpointAddress);

    /// Queues one packet for transmission on an IN endpoint. A zero-length
    /// slice sends a zero-length packet.
    fn submit(&mut self, address: EndpointAddress, data: &[u8]) -> Result<(), HardwareError>;

    fn stall(&mut self, address: EndpointAddress);

    fn clear_stall(&mut self, address: EndpointAddress);

    fn set_address(&mut self, address: u8);
}

/// Something the USB core reported. Completion events stand in for transfer
/// callbacks and are processed one at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event<'a> {
    /// Bus reset issued by the host.
    Reset,
    /// An 8-byte SETUP packet arrived on endpoint 0.
    Setup([u8; 8]),
    /// Data received on an OUT endpoint.
    OutComplete(EndpointAddress, &'a [u8]),
    /// The packet queued on an IN endpoint was collected by the host.
    InComplete(EndpointAddress),
}

pub fn ep0_out() -> EndpointAddress {
    EndpointAddress::from_parts(0, UsbDirection::Out)
}

pub fn ep0_in() -> EndpointAddress {
    EndpointAddress::from_parts(0, UsbDirection::In)
}

/// An endpoint of an interface, bound to hardware while its configuration is active.
#[derive(Debug)]
pub struct Endpoint {
    descriptor: UsbEndpointDescriptor,
    interface: u8,
    active: bool,
    busy: bool,
    halted: bool,
}

impl Endpoint {
    pub fn new(descriptor: UsbEndpointDescriptor, interface: u8) -> Self {
        Self {
            descriptor,
            interface,
            active: false,
            busy: false,
            halted: false,
        }
    }

    /// Number of the interface owning this endpoint.
    pub fn interface(&self) -> u8 {
        self.interface
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// An IN transfer is queued and not yet collected.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn activate(&mut self, hw: &mut impl UsbHardware) -> Result<(), HardwareError> {
        hw.configure(
            self.descriptor.address,
            self.descriptor.ep_type,
            self.descriptor.max_packet_size,
        )?;
        self.active = true;
        self.busy = false;
        self.halted = false;
        Ok(())
    }

    pub fn deactivate(&mut self, hw: &mut impl UsbHardware) {
        if self.active {
            hw.disable(self.descriptor.address);
        }
        self.active = false;
        self.busy = false;
        self.halted = false;
    }

    pub fn write(&mut self, hw: &mut impl UsbHardware, data: &[u8]) -> Result<(), HardwareError> {
        if !self.active || self.direction() != UsbDirection::In {
            return Err(HardwareError::NotConfigured);
        }
        if self.busy || self.halted {
            return Err(HardwareError::Busy);
        }
        debug_assert!(data.len() <= usize::from(self.descriptor.max_packet_size));
        hw.submit(self.descriptor.address, data)?;
        self.busy = true;
        Ok(())
    }

    /// Marks the queued IN packet as collected.
    pub fn complete(&mut self) {
        self.busy = false;
    }

    pub fn set_halted(&mut self, hw: &mut impl UsbHardware, halted: bool) {
        if halted {
            hw.stall(self.descriptor.address);
        } else {
            hw.clear_stall(self.descriptor.address);
            self.busy = false;
        }
        self.halted = halted;
    }
}

impl EndpointInfo for Endpoint {
    fn descriptor(&self) -> &UsbEndpointDescriptor {
        &self.descriptor
    }
}

//! USB full-speed composite device: descriptor tree, control pipe and
//! interface/configuration composition for a CDC-ACM virtual COM port or a
//! vendor-specific bulk device.

pub use usb_device::UsbDirection;
pub use usb_device::endpoint::{EndpointType, EndpointAddress};
pub mod app;
pub mod board;
pub mod builder;
pub mod cdc;
pub mod control;
pub mod device;
pub mod endpoint;
pub mod error;
pub mod generator;
pub mod interface;
pub mod usb;
pub mod variant;

pub use crate::error::{DescriptorError, HardwareError};

pub trait EndpointInfo {
    fn descriptor(&self) -> &usb::UsbEndpointDescriptor;

    fn address(&self) -> EndpointAddress {
        self.descriptor().address
    }

    fn ep_type(&self) -> EndpointType {
        self.descriptor().ep_type
    }

    fn direction(&self) -> UsbDirection {
        self.address().direction()
    }

    fn max_packet_size(&self) -> u16 {
        self.descriptor().max_packet_size
    }
}

impl EndpointInfo for usb::UsbEndpointDescriptor {
    fn descriptor(&self) -> &usb::UsbEndpointDescriptor {
        self
    }
}

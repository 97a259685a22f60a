//! The two device personalities sharing one protocol core: a CDC-ACM
//! virtual COM port and a vendor-specific bulk device.

use crate::builder::{DescriptorSet, DeviceBuilder, UsbVidPid};
use crate::cdc::create_cdc_function;
use crate::error::DescriptorError;
use crate::interface::{CdcAcmControl, ClassHandler, NoClassRequests};
use crate::usb::{LeWord, UsbClass, UsbEndpointDescriptor, UsbString, FULL_SPEED_MAX_PACKET_SIZE};
use crate::EndpointInfo;
use failure::{bail, Error};
use std::fmt;
use std::str::FromStr;
use usb_device::endpoint::{EndpointAddress, EndpointType};

/// Identity words in wire order, low byte first.
pub const VENDOR_ID: [u8; 2] = [0xad, 0xde];
pub const PRODUCT_ID: [u8; 2] = [0xef, 0xbe];
pub const DEVICE_RELEASE: [u8; 2] = [0xfe, 0xca];

pub const NOTIFICATION_ENDPOINT: u8 = 0x82;
pub const DATA_OUT_ENDPOINT: u8 = 0x01;
pub const DATA_IN_ENDPOINT: u8 = 0x81;

/// What the device tells the host about itself.
#[derive(Clone, Debug)]
pub struct Identity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_release: u16,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
    pub configuration: String,
    pub interface: String,
    pub max_power_ma: usize,
    pub self_powered: bool,
}

impl Default for Identity {
    fn default() -> Self {
        Identity {
            vendor_id: LeWord::from_bytes(VENDOR_ID).get(),
            product_id: LeWord::from_bytes(PRODUCT_ID).get(),
            device_release: LeWord::from_bytes(DEVICE_RELEASE).get(),
            manufacturer: "PhiSch.org".into(),
            product: "PhiSch.org USB Virtual COM Port (VCP) Demo on STM32F4Discovery".into(),
            serial_number: "D2209DFF-B80D-4E44-A8E5-466ADCCE7E30".into(),
            configuration: "PhiSch.org USB Virtual COM Port (VCP) Configuration".into(),
            interface: "PhiSch.org USB Comm. Device Class (CDC) Interface".into(),
            max_power_ma: 10,
            self_powered: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
    /// Virtual COM port. Without the notification endpoint the
    /// communication interface has no endpoints at all.
    CdcAcm { notification: bool },
    Vendor,
}

impl FromStr for Variant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(match s {
            "cdc-acm" | "vcp" => Variant::CdcAcm { notification: true },
            "cdc-acm-reduced" => Variant::CdcAcm {
                notification: false,
            },
            "vendor" => Variant::Vendor,
            _ => bail!("unknown device variant '{}'", s),
        })
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Variant::CdcAcm { notification: true } => write!(f, "cdc-acm"),
            Variant::CdcAcm { notification: false } => write!(f, "cdc-acm-reduced"),
            Variant::Vendor => write!(f, "vendor"),
        }
    }
}

fn endpoint(address: u8, ep_type: EndpointType, max_packet_size: u16, interval: u8) -> UsbEndpointDescriptor {
    UsbEndpointDescriptor {
        address: EndpointAddress::from(address),
        ep_type,
        max_packet_size,
        interval,
    }
}

impl Variant {
    pub fn builder(&self, id: &Identity) -> DeviceBuilder {
        let device = DeviceBuilder::new(UsbVidPid(id.vendor_id, id.product_id))
            .device_release(id.device_release)
            .max_packet_size_0(64)
            .manufacturer(id.manufacturer.as_str())
            .product(id.product.as_str())
            .serial_number(id.serial_number.as_str())
            .configuration(id.configuration.as_str())
            .self_powered(id.self_powered)
            .max_power(id.max_power_ma);

        let data_out = endpoint(DATA_OUT_ENDPOINT, EndpointType::Bulk, FULL_SPEED_MAX_PACKET_SIZE, 0);
        let data_in = endpoint(DATA_IN_ENDPOINT, EndpointType::Bulk, FULL_SPEED_MAX_PACKET_SIZE, 0);
        let interface_string = UsbString::Const(id.interface.clone());

        match self {
            Variant::CdcAcm { notification } => {
                let mut device = device
                    .device_class(UsbClass::Miscellaneous)
                    .device_sub_class(0x02)
                    .device_protocol(0x01);
                let notify = endpoint(NOTIFICATION_ENDPOINT, EndpointType::Interrupt, 8, 0xff);
                let comm_ep: Option<&dyn EndpointInfo> = if *notification { Some(&notify) } else { None };
                create_cdc_function(&mut device, comm_ep, &data_out, &data_in, interface_string);
                device
            }
            Variant::Vendor => {
                let mut device = device
                    .device_class(UsbClass::VendorSpecific)
                    .device_sub_class(0x02)
                    .device_protocol(0x01);
                device
                    .alloc_interface()
                    .interface_class(UsbClass::VendorSpecific)
                    .interface_string(interface_string)
                    .num_endpoints(2)
                    .endpoint(data_out)
                    .endpoint(data_in)
                    .save(&mut device);
                device
            }
        }
    }

    pub fn descriptors(&self, id: &Identity) -> Result<DescriptorSet, DescriptorError> {
        self.builder(id).build()
    }

    /// Class request handlers in interface order.
    pub fn class_handlers(&self) -> Vec<Box<dyn ClassHandler>> {
        match self {
            Variant::CdcAcm { .. } => vec![
                Box::new(CdcAcmControl::new()) as Box<dyn ClassHandler>,
                Box::new(NoClassRequests),
            ],
            Variant::Vendor => vec![Box::new(NoClassRequests)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_variant_names() {
        assert_eq!("vcp".parse::<Variant>().unwrap(), Variant::CdcAcm { notification: true });
        assert_eq!(
            "cdc-acm-reduced".parse::<Variant>().unwrap(),
            Variant::CdcAcm {
                notification: false
            }
        );
        assert_eq!("vendor".parse::<Variant>().unwrap(), Variant::Vendor);
        assert!("hid".parse::<Variant>().is_err());
        assert_eq!(Variant::Vendor.to_string(), "vendor");
    }

    #[test]
    fn identity_words_keep_wire_order() {
        let set = Variant::Vendor.descriptors(&Identity::default()).unwrap();
        assert_eq!(&set.device_descriptor[8..14], &[0xad, 0xde, 0xef, 0xbe, 0xfe, 0xca]);
        assert_eq!(set.device_descriptor[7], 64);
        assert_eq!(&set.device_descriptor[2..4], &[0x00, 0x02]);
    }

    #[test]
    fn cdc_acm_tree() {
        let set = Variant::CdcAcm { notification: true }
            .descriptors(&Identity::default())
            .unwrap();
        let c = &set.configuration_descriptor;
        assert_eq!(set.total_length(), 75);
        assert_eq!(c.len(), 75);
        assert_eq!(c[4], 2);
        assert_eq!(&c[..9], &[9, 2, 75, 0, 2, 1, 4, 0xc0, 5]);
        // association
        assert_eq!(&c[9..17], &[8, 0x0b, 0, 2, 0x02, 0x02, 0x01, 5]);
        // communication interface with one endpoint
        assert_eq!(&c[17..26], &[9, 4, 0, 0, 1, 0x02, 0x02, 0x01, 5]);
        // union names the data interface
        assert_eq!(&c[40..45], &[5, 0x24, 0x06, 0, 1]);
        assert_eq!(&c[45..52], &[7, 5, 0x82, 0x03, 8, 0, 0xff]);
        assert_eq!(&c[52..61], &[9, 4, 1, 0, 2, 0x0a, 0, 0, 5]);
        assert_eq!(&c[61..68], &[7, 5, 0x01, 0x02, 64, 0, 0]);
        assert_eq!(&c[68..75], &[7, 5, 0x81, 0x02, 64, 0, 0]);
        assert_eq!(&set.device_descriptor[4..7], &[0xef, 0x02, 0x01]);
    }

    #[test]
    fn reduced_cdc_acm_drops_notification_endpoint() {
        let set = Variant::CdcAcm {
            notification: false,
        }
        .descriptors(&Identity::default())
        .unwrap();
        assert_eq!(set.total_length(), 68);
        assert_eq!(set.configuration_descriptor[17 + 4], 0);
        assert_eq!(set.configuration_descriptor[40 + 4], 1);
    }

    #[test]
    fn vendor_tree() {
        let set = Variant::Vendor.descriptors(&Identity::default()).unwrap();
        assert_eq!(set.total_length(), 32);
        assert_eq!(
            set.configuration_descriptor,
            vec![
                9, 2, 32, 0, 1, 1, 4, 0xc0, 5, //
                9, 4, 0, 0, 2, 0xff, 0, 0, 5, //
                7, 5, 0x01, 0x02, 64, 0, 0, //
                7, 5, 0x81, 0x02, 64, 0, 0,
            ]
        );
        assert_eq!(&set.device_descriptor[4..7], &[0xff, 0x02, 0x01]);
    }

    #[test]
    fn strings_follow_fixed_indices() {
        let set = Variant::CdcAcm { notification: true }
            .descriptors(&Identity::default())
            .unwrap();
        assert_eq!(&set.device_descriptor[14..17], &[1, 2, 3]);
        assert_eq!(set.string_descriptors.len(), 6);
        let manufacturer = set.string(1).unwrap();
        assert_eq!(manufacturer[0] as usize, 2 + 2 * "PhiSch.org".len());
        assert_eq!(&manufacturer[2..4], &[b'P', 0]);
    }

    #[test]
    fn handlers_cover_every_interface() {
        let variant = Variant::CdcAcm { notification: true };
        let set = variant.descriptors(&Identity::default()).unwrap();
        assert_eq!(variant.class_handlers().len(), set.interfaces.len());
    }
}

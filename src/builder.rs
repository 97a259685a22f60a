use crate::cdc::CdcFunctionalDescriptor;
use crate::control::CONTROL_BUFFER_SIZE;
use crate::error::DescriptorError;
use crate::usb::{
    LeWord, UsbClass, UsbConfigurationDescriptor, UsbDescriptorWriter, UsbDeviceDescriptor,
    UsbEndpointDescriptor, UsbInterfaceAssociationDescriptor, UsbInterfaceDescriptor, UsbString,
    UsbStringAllocator, FULL_SPEED_MAX_PACKET_SIZE, USB_MAX_ENDPOINTS, USB_RELEASE_2_0,
};
use bit_field::BitField;
use failure::{err_msg, Error};
use std::collections::BTreeMap;
use usb_device::descriptor::lang_id;
use usb_device::endpoint::{EndpointAddress, EndpointType};
use usb_device::UsbDirection;

/// A USB vendor ID and product ID pair.
pub struct UsbVidPid(pub u16, pub u16);

macro_rules! generate_field_setters {
    ( $( $(#[$meta:meta])* $name:ident: $type:ty, )* ) => {
        $(
            $(#[$meta])*
            pub fn $name(mut self, $name: $type) -> Self {
                self.descriptor.$name = $name;
                self
            }
        )*
    }
}

/// Symbolic reference to an interface of the configuration being built.
///
/// Cross-references (association, union, call management) carry handles so
/// that they always agree with the interface they name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct InterfaceHandle(u8);

impl InterfaceHandle {
    pub(crate) fn new(number: u8) -> Self {
        InterfaceHandle(number)
    }

    pub fn number(self) -> u8 {
        self.0
    }
}

/// Interface as seen by the runtime composition layer.
#[derive(Clone, Debug)]
pub struct InterfaceLayout {
    pub number: u8,
    pub class: UsbClass,
    pub endpoints: Vec<UsbEndpointDescriptor>,
}

/// Serialized descriptors of a device with exactly one configuration.
#[derive(Clone, Debug)]
pub struct DescriptorSet {
    pub device_descriptor: Vec<u8>,
    pub configuration_descriptor: Vec<u8>,
    pub string_descriptors: BTreeMap<u8, Vec<u8>>,
    pub configuration_value: u8,
    pub max_packet_size_0: u8,
    pub self_powered: bool,
    pub interfaces: Vec<InterfaceLayout>,
    /// Every endpoint of the device, control endpoint 0 pair first.
    pub endpoints: Vec<UsbEndpointDescriptor>,
}

impl DescriptorSet {
    pub fn string(&self, index: u8) -> Option<&[u8]> {
        self.string_descriptors.get(&index).map(|s| s.as_slice())
    }

    pub fn total_length(&self) -> u16 {
        LeWord::from_bytes([
            self.configuration_descriptor[2],
            self.configuration_descriptor[3],
        ])
        .get()
    }
}

pub struct DeviceBuilder {
    pub descriptor: UsbDeviceDescriptor,
    pub configuration_desc: UsbConfigurationDescriptor,
    pub associations: Vec<UsbInterfaceAssociationDescriptor>,
    pub interfaces: Vec<InterfaceBuilder>,
    languages: Vec<u16>,
    next_interface: u8,
}

impl DeviceBuilder {
    pub fn new(vid_pid: UsbVidPid) -> Self {
        let mut attributes: u8 = 0;
        // Reserved, must always be set.
        attributes.set_bit(7, true);

        Self {
            descriptor: UsbDeviceDescriptor {
                usb_release: LeWord::new(USB_RELEASE_2_0),
                device_class: UsbClass::PerInterface,
                device_sub_class: 0,
                device_protocol: 0,
                max_packet_size_0: 8,
                vendor_id: LeWord::new(vid_pid.0),
                product_id: LeWord::new(vid_pid.1),
                device_release: LeWord::new(0x0010),
                manufacturer: UsbString::None,
                product: UsbString::None,
                serial_number: UsbString::None,
            },
            configuration_desc: UsbConfigurationDescriptor {
                configuration_value: 1,
                configuration_string: UsbString::None,
                attributes,
                max_power: 50,
            },
            associations: Vec::new(),
            interfaces: Vec::new(),
            languages: vec![lang_id::ENGLISH_US],
            next_interface: 0,
        }
    }

    generate_field_setters! {
        /// Sets the device class code assigned by USB.org. Use
        /// `UsbClass::VendorSpecific` for devices that do not conform to any class,
        /// `UsbClass::Miscellaneous` (subclass 0x02, protocol 0x01) for composites
        /// built from interface associations.
        ///
        /// Default: `UsbClass::PerInterface`
        device_class: UsbClass,

        /// Sets the device sub-class code. Depends on class.
        ///
        /// Default: `0x00`
        device_sub_class: u8,

        /// Sets the device protocol code. Depends on class and sub-class.
        ///
        /// Default: `0x00`
        device_protocol: u8,
    }

    /// Sets the device release version in BCD.
    ///
    /// Default: `0x0010` ("0.1")
    pub fn device_release(mut self, device_release: u16) -> Self {
        self.descriptor.device_release = LeWord::new(device_release);
        self
    }

    /// Sets the maximum packet size in bytes for the control endpoint 0.
    ///
    /// Valid values are 8, 16, 32 and 64. Full-speed devices should use 64.
    ///
    /// Default: 8 bytes
    pub fn max_packet_size_0(mut self, max_packet_size_0: u8) -> Self {
        match max_packet_size_0 {
            8 | 16 | 32 | 64 => {}
            _ => panic!("invalid max_packet_size_0"),
        }

        self.descriptor.max_packet_size_0 = max_packet_size_0;
        self
    }

    /// Sets whether the device may have an external power source.
    ///
    /// This should be set to `true` even if the device is sometimes self-powered and may not
    /// always draw power from the USB bus.
    ///
    /// Default: `false`
    ///
    /// See also: `max_power`
    pub fn self_powered(mut self, self_powered: bool) -> Self {
        self.configuration_desc.attributes.set_bit(6, self_powered);
        self
    }

    /// Sets whether the device supports remotely waking up the host is requested.
    ///
    /// Default: `false`
    pub fn supports_remote_wakeup(mut self, supports_remote_wakeup: bool) -> Self {
        self.configuration_desc
            .attributes
            .set_bit(5, supports_remote_wakeup);
        self
    }

    /// Sets the maximum current drawn from the USB bus by the device in milliamps.
    ///
    /// The default is 100 mA. If your device always uses an external power source and never draws
    /// power from the USB bus, this can be set to 0.
    ///
    /// See also: `self_powered`
    ///
    /// Default: 100mA
    pub fn max_power(mut self, max_power_ma: usize) -> Self {
        if max_power_ma > 500 {
            panic!("max_power is too much")
        }

        self.configuration_desc.max_power = (max_power_ma / 2) as u8;
        self
    }

    /// Sets the configuration value the host selects with `SET_CONFIGURATION`.
    ///
    /// Default: 1
    pub fn configuration_value(mut self, value: u8) -> Self {
        assert_ne!(value, 0, "configuration value 0 means unconfigured");
        self.configuration_desc.configuration_value = value;
        self
    }

    /// Sets the manufacturer name string descriptor.
    ///
    /// Default: (none)
    pub fn manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.descriptor.manufacturer = UsbString::Const(manufacturer.into());
        self
    }

    /// Sets the product name string descriptor.
    ///
    /// Default: (none)
    pub fn product(mut self, product: impl Into<String>) -> Self {
        self.descriptor.product = UsbString::Const(product.into());
        self
    }

    /// Sets the serial number string descriptor.
    ///
    /// Default: (none)
    pub fn serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.descriptor.serial_number = UsbString::Const(serial_number.into());
        self
    }

    /// Sets the configuration string descriptor.
    ///
    /// Default: (none)
    pub fn configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration_desc.configuration_string = UsbString::Const(configuration.into());
        self
    }

    /// Sets the language IDs reported in string descriptor 0.
    ///
    /// Default: English (US)
    pub fn languages(mut self, languages: &[u16]) -> Self {
        self.languages = languages.to_vec();
        self
    }

    fn add_interface(&mut self, interface: InterfaceBuilder) {
        self.interfaces.push(interface);
    }

    /// Reserves the next interface number.
    pub fn alloc_interface(&mut self) -> InterfaceBuilder {
        let builder = InterfaceBuilder::new(self.next_interface);
        self.next_interface += 1;
        builder
    }

    pub fn association(&mut self, association: UsbInterfaceAssociationDescriptor) {
        self.associations.push(association);
    }

    fn check_interfaces(interfaces: &[InterfaceBuilder]) -> Result<(), DescriptorError> {
        if interfaces.is_empty() {
            return Err(DescriptorError::NoInterfaces);
        }

        for (i, interface) in interfaces.iter().enumerate() {
            let number = interface.descriptor.interface_number;
            if i > 0 && interfaces[i - 1].descriptor.interface_number == number {
                return Err(DescriptorError::DuplicateInterface(number));
            }
            if usize::from(number) != i {
                return Err(DescriptorError::NonContiguousInterfaces {
                    expected: i as u8,
                    found: number,
                });
            }
            if let Some(declared) = interface.num_endpoints {
                if usize::from(declared) != interface.endpoints.len() {
                    return Err(DescriptorError::EndpointCountMismatch {
                        interface: number,
                        declared,
                        actual: interface.endpoints.len(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_endpoints(interfaces: &[InterfaceBuilder]) -> Result<(), DescriptorError> {
        let mut seen: Vec<u8> = Vec::new();
        for endpoint in interfaces.iter().flat_map(|i| i.endpoints.iter()) {
            let address: u8 = endpoint.address.into();
            if endpoint.address.index() == 0 || endpoint.address.index() >= USB_MAX_ENDPOINTS {
                return Err(DescriptorError::InvalidEndpointAddress(address));
            }
            match endpoint.ep_type {
                EndpointType::Bulk | EndpointType::Interrupt => {}
                _ => return Err(DescriptorError::UnsupportedTransferType(address)),
            }
            if endpoint.max_packet_size > FULL_SPEED_MAX_PACKET_SIZE {
                return Err(DescriptorError::MaxPacketSizeTooLarge {
                    address,
                    size: endpoint.max_packet_size,
                });
            }
            if seen.contains(&address) {
                return Err(DescriptorError::DuplicateEndpoint(address));
            }
            seen.push(address);
        }
        Ok(())
    }

    fn check_references(&self, interface_count: usize) -> Result<(), DescriptorError> {
        let exists = |handle: InterfaceHandle| usize::from(handle.number()) < interface_count;

        for interface in &self.interfaces {
            for functional in &interface.functional_descriptors {
                if let Some(missing) = functional
                    .referenced_interfaces()
                    .into_iter()
                    .find(|h| !exists(*h))
                {
                    return Err(DescriptorError::UnknownInterface(missing.number()));
                }
            }
        }

        for iad in &self.associations {
            let last = usize::from(iad.first_interface.number()) + usize::from(iad.interface_count);
            if iad.interface_count == 0 || last > interface_count {
                return Err(DescriptorError::UnknownInterface(last.saturating_sub(1) as u8));
            }
        }
        Ok(())
    }

    /// The device class triple must describe one of the supported layouts:
    /// an IAD composite, a vendor-specific device, a CDC device, or class-per-interface.
    fn check_class(&self) -> Result<(), DescriptorError> {
        let class = self.descriptor.device_class;
        let has_class = |c: UsbClass| {
            self.interfaces
                .iter()
                .any(|i| i.descriptor.interface_class == c)
        };
        let ok = match class {
            UsbClass::PerInterface => true,
            UsbClass::Miscellaneous => {
                self.descriptor.device_sub_class == 0x02
                    && self.descriptor.device_protocol == 0x01
                    && !self.associations.is_empty()
            }
            UsbClass::VendorSpecific => has_class(UsbClass::VendorSpecific),
            UsbClass::Cdc => has_class(UsbClass::Cdc),
            UsbClass::CdcData => false,
        };
        if ok {
            Ok(())
        } else {
            Err(DescriptorError::ClassMismatch {
                class: class as u8,
            })
        }
    }

    pub fn build(mut self) -> Result<DescriptorSet, DescriptorError> {
        self.interfaces
            .sort_by_key(|i| i.descriptor.interface_number);
        Self::check_interfaces(&self.interfaces)?;
        Self::check_endpoints(&self.interfaces)?;
        self.check_references(self.interfaces.len())?;
        self.check_class()?;

        // Allocate strings
        let mut str_alloc = UsbStringAllocator::new();
        str_alloc.alloc(&self.descriptor.manufacturer);
        str_alloc.alloc(&self.descriptor.product);
        str_alloc.alloc(&self.descriptor.serial_number);
        str_alloc.alloc(&self.configuration_desc.configuration_string);
        for iad in &self.associations {
            str_alloc.alloc(&iad.function_string);
        }
        for interface in &self.interfaces {
            str_alloc.alloc(&interface.descriptor.interface_string);
        }

        // Generate device descriptor
        let device_descriptor = self.descriptor.bytes(1, &str_alloc)?.to_vec();

        // Generate configuration descriptor
        let mut w = UsbDescriptorWriter::new();
        w.configuration(
            &self
                .configuration_desc
                .bytes(self.interfaces.len() as u8, &str_alloc)?,
        );
        for interface in &self.interfaces {
            let number = interface.descriptor.interface_number;
            for iad in self
                .associations
                .iter()
                .filter(|a| a.first_interface.number() == number)
            {
                w.record(&iad.bytes(&str_alloc)?);
            }
            w.record(
                &interface
                    .descriptor
                    .bytes(interface.endpoints.len() as u8, &str_alloc)?,
            );
            for functional in &interface.functional_descriptors {
                functional.write(&mut w)?;
            }
            for endpoint in &interface.endpoints {
                w.record(&endpoint.bytes());
            }
        }
        let configuration_descriptor = w.finish()?;
        // GET_DESCRIPTOR answers come out of the control buffer
        if configuration_descriptor.len() > CONTROL_BUFFER_SIZE {
            return Err(DescriptorError::TooLong(configuration_descriptor.len()));
        }

        // Generate string descriptors
        let mut string_descriptors = BTreeMap::new();
        for (i, s) in str_alloc.into_inner().into_iter().enumerate() {
            let mut w = UsbDescriptorWriter::new();
            match s {
                // list of supported languages
                UsbString::None => w.languages(&self.languages)?,
                UsbString::Const(s) => w.string(&s)?,
            }
            string_descriptors.insert(i as u8, w.finish()?);
        }

        // Generate endpoint list
        let max_packet_size_0 = self.descriptor.max_packet_size_0;
        let mut endpoints = Vec::new();
        for direction in &[UsbDirection::Out, UsbDirection::In] {
            endpoints.push(UsbEndpointDescriptor {
                address: EndpointAddress::from_parts(0, *direction),
                ep_type: EndpointType::Control,
                max_packet_size: u16::from(max_packet_size_0),
                interval: 0,
            });
        }

        let mut interfaces = Vec::new();
        for interface in self.interfaces {
            endpoints.extend(interface.endpoints.iter().cloned());
            interfaces.push(InterfaceLayout {
                number: interface.descriptor.interface_number,
                class: interface.descriptor.interface_class,
                endpoints: interface.endpoints,
            });
        }

        Ok(DescriptorSet {
            device_descriptor,
            configuration_descriptor,
            string_descriptors,
            configuration_value: self.configuration_desc.configuration_value,
            max_packet_size_0,
            self_powered: self.configuration_desc.attributes.get_bit(6),
            interfaces,
            endpoints,
        })
    }
}

#[derive(Clone)]
pub struct InterfaceBuilder {
    pub descriptor: UsbInterfaceDescriptor,
    pub functional_descriptors: Vec<CdcFunctionalDescriptor>,
    pub endpoints: Vec<UsbEndpointDescriptor>,
    num_endpoints: Option<u8>,
}

impl InterfaceBuilder {
    /// Starts an interface with an explicit number. Prefer
    /// `DeviceBuilder::alloc_interface`, which numbers interfaces in order.
    pub fn new(interface_number: u8) -> Self {
        Self {
            descriptor: UsbInterfaceDescriptor {
                interface_number,
                alternate_setting: 0,
                interface_class: UsbClass::VendorSpecific,
                interface_sub_class: 0,
                interface_protocol: 0,
                interface_string: UsbString::None,
            },
            functional_descriptors: Vec::new(),
            endpoints: Vec::new(),
            num_endpoints: None,
        }
    }

    pub fn handle(&self) -> InterfaceHandle {
        InterfaceHandle(self.descriptor.interface_number)
    }

    generate_field_setters! {
        interface_class: UsbClass,
        interface_sub_class: u8,
        interface_protocol: u8,
    }

    pub fn interface_string(mut self, string: UsbString) -> Self {
        self.descriptor.interface_string = string;
        self
    }

    /// Declares the endpoint count up front; `build` refuses the tree if the
    /// endpoint list ends up a different length.
    pub fn num_endpoints(mut self, count: u8) -> Self {
        self.num_endpoints = Some(count);
        self
    }

    pub fn functional(mut self, descriptor: CdcFunctionalDescriptor) -> Self {
        self.functional_descriptors.push(descriptor);
        self
    }

    pub fn endpoint(mut self, endpoint: UsbEndpointDescriptor) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn save(self, device: &mut DeviceBuilder) {
        device.add_interface(self)
    }
}

pub struct EndpointBuilder {
    pub number: Option<u8>,
    pub direction: Option<UsbDirection>,
    pub ep_type: Option<EndpointType>,
    pub max_packet_size: Option<u16>,
    pub interval: u8,
}

impl EndpointBuilder {
    pub fn new() -> Self {
        Self {
            number: None,
            direction: None,
            ep_type: None,
            max_packet_size: None,
            interval: 0,
        }
    }

    pub fn number(mut self, number: u8) -> Self {
        self.number = Some(number);
        self
    }

    pub fn direction(mut self, direction: UsbDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn ep_type(mut self, ep_type: EndpointType) -> Self {
        self.ep_type = Some(ep_type);
        self
    }

    pub fn max_packet_size(mut self, max_packet_size: u16) -> Self {
        self.max_packet_size = Some(max_packet_size);
        self
    }

    pub fn interval(mut self, interval: u8) -> Self {
        self.interval = interval;
        self
    }

    pub fn build(self) -> Result<UsbEndpointDescriptor, Error> {
        let number = self.number.ok_or_else(|| err_msg("Endpoint number is not set"))?;
        let direction = self
            .direction
            .ok_or_else(|| err_msg("Endpoint direction is not set"))?;
        let ep_type = self.ep_type.ok_or_else(|| err_msg("Endpoint type is not set"))?;
        let max_packet_size = self
            .max_packet_size
            .ok_or_else(|| err_msg("Max packet size is not set"))?;

        Ok(UsbEndpointDescriptor {
            address: EndpointAddress::from_parts(usize::from(number), direction),
            ep_type,
            max_packet_size,
            interval: self.interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(number: u8, direction: UsbDirection) -> UsbEndpointDescriptor {
        EndpointBuilder::new()
            .number(number)
            .direction(direction)
            .ep_type(EndpointType::Bulk)
            .max_packet_size(64)
            .build()
            .unwrap()
    }

    fn device() -> DeviceBuilder {
        DeviceBuilder::new(UsbVidPid(0x1209, 0x0001))
    }

    #[test]
    fn endpoint_builder_requires_every_field() {
        assert!(EndpointBuilder::new().number(1).build().is_err());
        let ep = bulk(2, UsbDirection::In);
        let address: u8 = ep.address.into();
        assert_eq!(address, 0x82);
    }

    #[test]
    fn single_interface_lengths() {
        let mut dev = device();
        dev.alloc_interface()
            .endpoint(bulk(1, UsbDirection::Out))
            .endpoint(bulk(1, UsbDirection::In))
            .save(&mut dev);
        let set = dev.build().unwrap();

        assert_eq!(set.total_length(), 32);
        assert_eq!(set.configuration_descriptor.len(), 32);
        assert_eq!(set.configuration_descriptor[4], 1);
        assert_eq!(set.device_descriptor.len(), 18);
        assert_eq!(set.endpoints.len(), 4);
    }

    #[test]
    fn interfaces_are_emitted_in_number_order() {
        let mut dev = device();
        InterfaceBuilder::new(1)
            .endpoint(bulk(2, UsbDirection::In))
            .save(&mut dev);
        InterfaceBuilder::new(0)
            .endpoint(bulk(1, UsbDirection::In))
            .save(&mut dev);
        let set = dev.build().unwrap();
        assert_eq!(set.configuration_descriptor[9 + 2], 0);
        assert_eq!(set.configuration_descriptor[9 + 9 + 7 + 2], 1);
    }

    #[test]
    fn gap_in_interface_numbers_is_refused() {
        let mut dev = device();
        InterfaceBuilder::new(0)
            .endpoint(bulk(1, UsbDirection::In))
            .save(&mut dev);
        InterfaceBuilder::new(2)
            .endpoint(bulk(2, UsbDirection::In))
            .save(&mut dev);
        assert_eq!(
            dev.build().unwrap_err(),
            DescriptorError::NonContiguousInterfaces {
                expected: 1,
                found: 2
            }
        );
    }

    #[test]
    fn configuration_must_fit_control_buffer() {
        let mut dev = device();
        for n in 0..12u8 {
            InterfaceBuilder::new(n)
                .endpoint(bulk(n + 1, UsbDirection::Out))
                .endpoint(bulk(n + 1, UsbDirection::In))
                .save(&mut dev);
        }
        assert_eq!(dev.build().unwrap_err(), DescriptorError::TooLong(9 + 12 * 23));
    }

    #[test]
    fn duplicate_interface_is_refused() {
        let mut dev = device();
        InterfaceBuilder::new(0).save(&mut dev);
        InterfaceBuilder::new(0).save(&mut dev);
        assert_eq!(dev.build().unwrap_err(), DescriptorError::DuplicateInterface(0));
    }

    #[test]
    fn declared_endpoint_count_must_match() {
        let mut dev = device();
        dev.alloc_interface()
            .num_endpoints(2)
            .endpoint(bulk(1, UsbDirection::Out))
            .save(&mut dev);
        assert_eq!(
            dev.build().unwrap_err(),
            DescriptorError::EndpointCountMismatch {
                interface: 0,
                declared: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn oversized_packet_is_refused() {
        let mut dev = device();
        let mut ep = bulk(1, UsbDirection::In);
        ep.max_packet_size = 512;
        dev.alloc_interface().endpoint(ep).save(&mut dev);
        assert_eq!(
            dev.build().unwrap_err(),
            DescriptorError::MaxPacketSizeTooLarge {
                address: 0x81,
                size: 512
            }
        );
    }

    #[test]
    fn endpoint_zero_and_duplicates_are_refused() {
        let mut dev = device();
        dev.alloc_interface()
            .endpoint(bulk(0, UsbDirection::In))
            .save(&mut dev);
        assert_eq!(
            dev.build().unwrap_err(),
            DescriptorError::InvalidEndpointAddress(0x80)
        );

        let mut dev = device();
        dev.alloc_interface()
            .endpoint(bulk(1, UsbDirection::In))
            .endpoint(bulk(1, UsbDirection::In))
            .save(&mut dev);
        assert_eq!(dev.build().unwrap_err(), DescriptorError::DuplicateEndpoint(0x81));
    }

    #[test]
    fn isochronous_is_refused() {
        let mut dev = device();
        let mut ep = bulk(1, UsbDirection::In);
        ep.ep_type = EndpointType::Isochronous;
        dev.alloc_interface().endpoint(ep).save(&mut dev);
        assert_eq!(
            dev.build().unwrap_err(),
            DescriptorError::UnsupportedTransferType(0x81)
        );
    }

    #[test]
    fn dangling_union_reference_is_refused() {
        let mut dev = device();
        let comm = dev.alloc_interface();
        let handle = comm.handle();
        comm.functional(CdcFunctionalDescriptor::Union {
            control_interface: handle,
            subordinate_interfaces: vec![InterfaceHandle::new(3)],
        })
        .save(&mut dev);
        assert_eq!(dev.build().unwrap_err(), DescriptorError::UnknownInterface(3));
    }

    #[test]
    fn miscellaneous_class_needs_an_association() {
        let mut dev = device()
            .device_class(UsbClass::Miscellaneous)
            .device_sub_class(0x02)
            .device_protocol(0x01);
        dev.alloc_interface()
            .endpoint(bulk(1, UsbDirection::In))
            .save(&mut dev);
        assert_eq!(
            dev.build().unwrap_err(),
            DescriptorError::ClassMismatch { class: 0xef }
        );
    }

    #[test]
    fn strings_are_indexed_in_allocation_order() {
        let mut dev = device()
            .manufacturer("Maker")
            .product("Thing")
            .serial_number("0001")
            .configuration("Default");
        dev.alloc_interface()
            .interface_string(UsbString::Const("Data".into()))
            .endpoint(bulk(1, UsbDirection::In))
            .save(&mut dev);
        let set = dev.build().unwrap();

        assert_eq!(&set.device_descriptor[14..17], &[1, 2, 3]);
        assert_eq!(set.configuration_descriptor[6], 4);
        assert_eq!(set.configuration_descriptor[9 + 8], 5);
        assert_eq!(set.string(0), Some(&[4u8, 0x03, 0x09, 0x04][..]));
        assert_eq!(set.string(5).map(|s| s[0]), Some(10));
        assert_eq!(set.string(6), None);
    }

    #[test]
    fn power_attributes() {
        let mut dev = device().self_powered(true).max_power(10);
        dev.alloc_interface()
            .endpoint(bulk(1, UsbDirection::In))
            .save(&mut dev);
        let set = dev.build().unwrap();
        assert!(set.self_powered);
        assert_eq!(set.configuration_descriptor[7], 0xc0);
        assert_eq!(set.configuration_descriptor[8], 5);
    }

    #[test]
    #[should_panic]
    fn invalid_control_packet_size_panics() {
        let _ = device().max_packet_size_0(12);
    }
}

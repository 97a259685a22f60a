use crate::builder::InterfaceHandle;
use crate::error::DescriptorError;
use usb_device::endpoint::{EndpointAddress, EndpointType};

/// Maximum number of endpoints in one direction. Specified by the USB specification.
pub const USB_MAX_ENDPOINTS: usize = 16;

/// Largest `wMaxPacketSize` a full-speed bulk, interrupt or control endpoint may declare.
pub const FULL_SPEED_MAX_PACKET_SIZE: u16 = 64;

/// `bcdUSB` for a USB 2.0 device.
pub const USB_RELEASE_2_0: u16 = 0x0200;

/// Descriptor type codes this crate emits or answers for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum UsbDescriptorType {
    Device = 0x01,
    Configuration = 0x02,
    String = 0x03,
    Interface = 0x04,
    Endpoint = 0x05,
    DeviceQualifier = 0x06,
    InterfaceAssociation = 0x0b,
    /// `CS_INTERFACE`, used by the CDC functional descriptors.
    ClassInterface = 0x24,
}

impl UsbDescriptorType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => UsbDescriptorType::Device,
            0x02 => UsbDescriptorType::Configuration,
            0x03 => UsbDescriptorType::String,
            0x04 => UsbDescriptorType::Interface,
            0x05 => UsbDescriptorType::Endpoint,
            0x06 => UsbDescriptorType::DeviceQualifier,
            0x0b => UsbDescriptorType::InterfaceAssociation,
            0x24 => UsbDescriptorType::ClassInterface,
            _ => return None,
        })
    }
}

/// Class codes used at device, function and interface level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum UsbClass {
    /// Class is defined by each interface.
    PerInterface = 0x00,
    /// Communications Device Class (control interface).
    Cdc = 0x02,
    /// CDC data interface.
    CdcData = 0x0a,
    /// Miscellaneous; with subclass 0x02 / protocol 0x01 announces an IAD composite.
    Miscellaneous = 0xef,
    VendorSpecific = 0xff,
}

/// A 16-bit field kept as its little-endian wire bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeWord {
    pub lo: u8,
    pub hi: u8,
}

impl LeWord {
    pub const fn new(value: u16) -> Self {
        Self {
            lo: value as u8,
            hi: (value >> 8) as u8,
        }
    }

    pub const fn from_bytes(bytes: [u8; 2]) -> Self {
        Self {
            lo: bytes[0],
            hi: bytes[1],
        }
    }

    pub const fn get(self) -> u16 {
        (self.hi as u16) << 8 | self.lo as u16
    }
}

impl From<u16> for LeWord {
    fn from(value: u16) -> Self {
        LeWord::new(value)
    }
}

#[derive(Clone, Debug)]
pub struct UsbDeviceDescriptor {
    pub usb_release: LeWord,
    pub device_class: UsbClass,
    pub device_sub_class: u8,
    pub device_protocol: u8,
    pub max_packet_size_0: u8,
    pub vendor_id: LeWord,
    pub product_id: LeWord,
    pub device_release: LeWord,
    pub manufacturer: UsbString,
    pub product: UsbString,
    pub serial_number: UsbString,
}

impl UsbDeviceDescriptor {
    pub const SIZE: usize = 18;

    pub fn bytes(
        &self,
        num_configurations: u8,
        alloc: &UsbStringAllocator,
    ) -> Result<[u8; Self::SIZE], DescriptorError> {
        Ok([
            Self::SIZE as u8,
            UsbDescriptorType::Device as u8,
            self.usb_release.lo,
            self.usb_release.hi, // bcdUSB
            self.device_class as u8,   // bDeviceClass
            self.device_sub_class,     // bDeviceSubClass
            self.device_protocol,      // bDeviceProtocol
            self.max_packet_size_0,    // bMaxPacketSize0
            self.vendor_id.lo,
            self.vendor_id.hi, // idVendor
            self.product_id.lo,
            self.product_id.hi, // idProduct
            self.device_release.lo,
            self.device_release.hi,               // bcdDevice
            alloc.resolve(&self.manufacturer)?,  // iManufacturer
            alloc.resolve(&self.product)?,       // iProduct
            alloc.resolve(&self.serial_number)?, // iSerialNumber
            num_configurations,                  // bNumConfigurations
        ])
    }
}

#[derive(Clone, Debug)]
pub struct UsbConfigurationDescriptor {
    pub configuration_value: u8,
    pub configuration_string: UsbString,
    pub attributes: u8,
    pub max_power: u8,
}

impl UsbConfigurationDescriptor {
    pub const SIZE: usize = 9;

    /// Header bytes with `wTotalLength` left at zero; the writer patches it in `finish`.
    pub fn bytes(
        &self,
        num_interfaces: u8,
        alloc: &UsbStringAllocator,
    ) -> Result<[u8; Self::SIZE], DescriptorError> {
        Ok([
            Self::SIZE as u8,
            UsbDescriptorType::Configuration as u8,
            0,
            0,                                        // wTotalLength
            num_interfaces,                           // bNumInterfaces
            self.configuration_value,                 // bConfigurationValue
            alloc.resolve(&self.configuration_string)?, // iConfiguration
            self.attributes,                          // bmAttributes
            self.max_power,                           // bMaxPower
        ])
    }
}

#[derive(Clone, Debug)]
pub struct UsbInterfaceAssociationDescriptor {
    pub first_interface: InterfaceHandle,
    pub interface_count: u8,
    pub function_class: UsbClass,
    pub function_sub_class: u8,
    pub function_protocol: u8,
    pub function_string: UsbString,
}

impl UsbInterfaceAssociationDescriptor {
    pub const SIZE: usize = 8;

    pub fn bytes(&self, alloc: &UsbStringAllocator) -> Result<[u8; Self::SIZE], DescriptorError> {
        Ok([
            Self::SIZE as u8,
            UsbDescriptorType::InterfaceAssociation as u8,
            self.first_interface.number(),         // bFirstInterface
            self.interface_count,                  // bInterfaceCount
            self.function_class as u8,             // bFunctionClass
            self.function_sub_class,               // bFunctionSubClass
            self.function_protocol,                // bFunctionProtocol
            alloc.resolve(&self.function_string)?, // iFunction
        ])
    }
}

#[derive(Clone, Debug)]
pub struct UsbInterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub interface_class: UsbClass,
    pub interface_sub_class: u8,
    pub interface_protocol: u8,
    pub interface_string: UsbString,
}

impl UsbInterfaceDescriptor {
    pub const SIZE: usize = 9;

    pub fn bytes(
        &self,
        num_endpoints: u8,
        alloc: &UsbStringAllocator,
    ) -> Result<[u8; Self::SIZE], DescriptorError> {
        Ok([
            Self::SIZE as u8,
            UsbDescriptorType::Interface as u8,
            self.interface_number,                  // bInterfaceNumber
            self.alternate_setting,                 // bAlternateSetting
            num_endpoints,                          // bNumEndpoints
            self.interface_class as u8,             // bInterfaceClass
            self.interface_sub_class,               // bInterfaceSubClass
            self.interface_protocol,                // bInterfaceProtocol
            alloc.resolve(&self.interface_string)?, // iInterface
        ])
    }
}

#[derive(Clone, Debug)]
pub struct UsbEndpointDescriptor {
    pub address: EndpointAddress,
    pub ep_type: EndpointType,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl UsbEndpointDescriptor {
    pub const SIZE: usize = 7;

    pub fn bytes(&self) -> [u8; Self::SIZE] {
        let mps = LeWord::new(self.max_packet_size);

        [
            Self::SIZE as u8,
            UsbDescriptorType::Endpoint as u8,
            self.address.into(),  // bEndpointAddress
            self.ep_type as u8,   // bmAttributes
            mps.lo,
            mps.hi,        // wMaxPacketSize
            self.interval, // bInterval
        ]
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum UsbString {
    None,
    Const(String),
}

/// Hands out string indices. Index 0 is the language table and doubles as "no string".
pub struct UsbStringAllocator {
    strings: Vec<UsbString>,
}

impl UsbStringAllocator {
    pub fn new() -> Self {
        Self {
            strings: vec![UsbString::None],
        }
    }

    pub fn alloc(&mut self, string: &UsbString) -> u8 {
        if let Some(index) = self.get_index(string) {
            index
        } else {
            let index = self.strings.len() as u8;
            self.strings.push(string.clone());
            index
        }
    }

    pub fn get_index(&self, string: &UsbString) -> Option<u8> {
        self.strings
            .iter()
            .enumerate()
            .find(|(_, s)| *s == string)
            .map(|(i, _)| i as u8)
    }

    pub fn resolve(&self, string: &UsbString) -> Result<u8, DescriptorError> {
        self.get_index(string).ok_or(DescriptorError::UnresolvedString)
    }

    pub fn into_inner(self) -> Vec<UsbString> {
        self.strings
    }
}

/// Accumulates descriptors into one contiguous blob.
pub struct UsbDescriptorWriter {
    buf: Vec<u8>,
    configuration_offset: Option<usize>,
}

impl UsbDescriptorWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            configuration_offset: None,
        }
    }

    /// Writes a variable-length descriptor, deriving `bLength` from the body.
    pub fn write(&mut self, descriptor_type: UsbDescriptorType, body: &[u8]) -> Result<(), DescriptorError> {
        let length = body.len() + 2;
        if length > usize::from(u8::max_value()) {
            return Err(DescriptorError::TooLong(length));
        }
        self.buf.push(length as u8);
        self.buf.push(descriptor_type as u8);
        self.buf.extend_from_slice(body);
        Ok(())
    }

    /// Appends an already-serialized fixed-size record.
    pub fn record(&mut self, record: &[u8]) {
        debug_assert_eq!(usize::from(record[0]), record.len());
        self.buf.extend_from_slice(record);
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn configuration(&mut self, header: &[u8; UsbConfigurationDescriptor::SIZE]) {
        self.configuration_offset = Some(self.position());
        self.record(header);
    }

    pub fn string(&mut self, string: &str) -> Result<(), DescriptorError> {
        let mut buf = Vec::new();
        string
            .encode_utf16()
            .for_each(|c| buf.extend_from_slice(&c.to_le_bytes()));
        self.write(UsbDescriptorType::String, &buf)
    }

    pub fn languages(&mut self, lang_ids: &[u16]) -> Result<(), DescriptorError> {
        let mut buf = Vec::new();
        lang_ids
            .iter()
            .for_each(|id| buf.extend_from_slice(&id.to_le_bytes()));
        self.write(UsbDescriptorType::String, &buf)
    }

    /// Returns the blob with `wTotalLength` of the configuration header filled in.
    pub fn finish(mut self) -> Result<Vec<u8>, DescriptorError> {
        if let Some(offset) = self.configuration_offset {
            let length = self.position() - offset;
            if length > usize::from(u16::max_value()) {
                return Err(DescriptorError::TooLong(length));
            }
            let total = LeWord::new(length as u16);
            self.buf[offset + 2] = total.lo;
            self.buf[offset + 3] = total.hi;
        }
        Ok(self.buf)
    }
}

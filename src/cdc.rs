//! Communications Device Class (CDC) Abstract Control Model support.

use crate::builder::{DeviceBuilder, InterfaceHandle};
use crate::error::DescriptorError;
use crate::usb::{
    LeWord, UsbClass, UsbDescriptorType, UsbDescriptorWriter, UsbInterfaceAssociationDescriptor,
    UsbString,
};
use crate::EndpointInfo;
use bit_field::BitField;

pub const CDC_SUBCLASS_ACM: u8 = 0x02;
pub const CDC_PROTOCOL_AT: u8 = 0x01;

/// CDC specification release 1.10.
pub const CDC_RELEASE_1_10: u16 = 0x0110;

pub const SET_LINE_CODING: u8 = 0x20;
pub const GET_LINE_CODING: u8 = 0x21;
pub const SET_CONTROL_LINE_STATE: u8 = 0x22;
pub const SEND_BREAK: u8 = 0x23;

/// Device supports `Set_Line_Coding`, `Set_Control_Line_State`, `Get_Line_Coding`
/// and the `Serial_State` notification.
pub const ACM_CAP_LINE_CODING: u8 = 1 << 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CdcSubtype {
    Header = 0x00,
    CallManagement = 0x01,
    AbstractControl = 0x02,
    Union = 0x06,
}

/// Functional descriptors placed after the CDC control interface descriptor.
///
/// Interface references are handles and are turned into numbers only when the
/// tree is serialized.
#[derive(Clone, Debug)]
pub enum CdcFunctionalDescriptor {
    Header {
        cdc_release: LeWord,
    },
    CallManagement {
        capabilities: u8,
        data_interface: InterfaceHandle,
    },
    AbstractControl {
        capabilities: u8,
    },
    Union {
        control_interface: InterfaceHandle,
        subordinate_interfaces: Vec<InterfaceHandle>,
    },
}

impl CdcFunctionalDescriptor {
    pub const HEADER_SIZE: usize = 5;
    pub const CALL_MANAGEMENT_SIZE: usize = 5;
    pub const ABSTRACT_CONTROL_SIZE: usize = 4;

    pub fn subtype(&self) -> CdcSubtype {
        match self {
            CdcFunctionalDescriptor::Header { .. } => CdcSubtype::Header,
            CdcFunctionalDescriptor::CallManagement { .. } => CdcSubtype::CallManagement,
            CdcFunctionalDescriptor::AbstractControl { .. } => CdcSubtype::AbstractControl,
            CdcFunctionalDescriptor::Union { .. } => CdcSubtype::Union,
        }
    }

    /// Size on the wire, including the three header bytes.
    pub fn size(&self) -> usize {
        match self {
            CdcFunctionalDescriptor::Header { .. } => Self::HEADER_SIZE,
            CdcFunctionalDescriptor::CallManagement { .. } => Self::CALL_MANAGEMENT_SIZE,
            CdcFunctionalDescriptor::AbstractControl { .. } => Self::ABSTRACT_CONTROL_SIZE,
            CdcFunctionalDescriptor::Union {
                subordinate_interfaces,
                ..
            } => 4 + subordinate_interfaces.len(),
        }
    }

    pub fn referenced_interfaces(&self) -> Vec<InterfaceHandle> {
        match self {
            CdcFunctionalDescriptor::CallManagement { data_interface, .. } => vec![*data_interface],
            CdcFunctionalDescriptor::Union {
                control_interface,
                subordinate_interfaces,
            } => {
                let mut handles = vec![*control_interface];
                handles.extend_from_slice(subordinate_interfaces);
                handles
            }
            _ => Vec::new(),
        }
    }

    pub fn write(&self, w: &mut UsbDescriptorWriter) -> Result<(), DescriptorError> {
        let mut body = vec![self.subtype() as u8];
        match self {
            CdcFunctionalDescriptor::Header { cdc_release } => {
                body.extend_from_slice(&[cdc_release.lo, cdc_release.hi]);
            }
            CdcFunctionalDescriptor::CallManagement {
                capabilities,
                data_interface,
            } => {
                body.extend_from_slice(&[*capabilities, data_interface.number()]);
            }
            CdcFunctionalDescriptor::AbstractControl { capabilities } => {
                body.push(*capabilities);
            }
            CdcFunctionalDescriptor::Union {
                control_interface,
                subordinate_interfaces,
            } => {
                body.push(control_interface.number());
                body.extend(subordinate_interfaces.iter().map(|i| i.number()));
            }
        }
        debug_assert_eq!(body.len() + 2, self.size());
        w.write(UsbDescriptorType::ClassInterface, &body)
    }
}

/// Composes a CDC-ACM function: an association descriptor, the communication
/// interface with its functional descriptors and optional notification
/// endpoint, and the data interface carrying the two bulk endpoints.
///
/// Returns the handles of the communication and data interfaces.
pub fn create_cdc_function(
    device: &mut DeviceBuilder,
    comm_ep: Option<&dyn EndpointInfo>,
    read_ep: &impl EndpointInfo,
    write_ep: &impl EndpointInfo,
    interface_string: UsbString,
) -> (InterfaceHandle, InterfaceHandle) {
    let comm_if = device.alloc_interface();
    let data_if = device.alloc_interface();
    let comm_handle = comm_if.handle();
    let data_handle = data_if.handle();

    device.association(UsbInterfaceAssociationDescriptor {
        first_interface: comm_handle,
        interface_count: 2,
        function_class: UsbClass::Cdc,
        function_sub_class: CDC_SUBCLASS_ACM,
        function_protocol: CDC_PROTOCOL_AT,
        function_string: interface_string.clone(),
    });

    let mut comm_if = comm_if
        .interface_class(UsbClass::Cdc)
        .interface_sub_class(CDC_SUBCLASS_ACM)
        .interface_protocol(CDC_PROTOCOL_AT)
        .interface_string(interface_string.clone())
        .functional(CdcFunctionalDescriptor::Header {
            cdc_release: LeWord::new(CDC_RELEASE_1_10),
        })
        .functional(CdcFunctionalDescriptor::CallManagement {
            capabilities: 0,
            data_interface: data_handle,
        })
        .functional(CdcFunctionalDescriptor::AbstractControl {
            capabilities: ACM_CAP_LINE_CODING,
        })
        .functional(CdcFunctionalDescriptor::Union {
            control_interface: comm_handle,
            subordinate_interfaces: vec![data_handle],
        });
    if let Some(ep) = comm_ep {
        comm_if = comm_if.endpoint(ep.descriptor().clone());
    }
    comm_if.save(device);

    data_if
        .interface_class(UsbClass::CdcData)
        .interface_string(interface_string)
        .endpoint(read_ep.descriptor().clone())
        .endpoint(write_ep.descriptor().clone())
        .save(device);

    (comm_handle, data_handle)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StopBits {
    One = 0,
    OnePointFive = 1,
    Two = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Parity {
    None = 0,
    Odd = 1,
    Even = 2,
    Mark = 3,
    Space = 4,
}

/// Payload of `SET_LINE_CODING` / `GET_LINE_CODING`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineCoding {
    pub data_rate: u32,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub data_bits: u8,
}

impl Default for LineCoding {
    fn default() -> Self {
        LineCoding {
            data_rate: 115_200,
            stop_bits: StopBits::One,
            parity: Parity::None,
            data_bits: 8,
        }
    }
}

impl LineCoding {
    pub const SIZE: usize = 7;

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        let stop_bits = match data[4] {
            0 => StopBits::One,
            1 => StopBits::OnePointFive,
            2 => StopBits::Two,
            _ => return None,
        };
        let parity = match data[5] {
            0 => Parity::None,
            1 => Parity::Odd,
            2 => Parity::Even,
            3 => Parity::Mark,
            4 => Parity::Space,
            _ => return None,
        };
        let data_bits = match data[6] {
            5 | 6 | 7 | 8 | 16 => data[6],
            _ => return None,
        };
        Some(LineCoding {
            data_rate: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            stop_bits,
            parity,
            data_bits,
        })
    }

    pub fn bytes(&self) -> [u8; Self::SIZE] {
        let rate = self.data_rate.to_le_bytes();
        [
            rate[0],
            rate[1],
            rate[2],
            rate[3],
            self.stop_bits as u8,
            self.parity as u8,
            self.data_bits,
        ]
    }
}

/// DTR and RTS as carried in `wValue` of `SET_CONTROL_LINE_STATE`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlLineState {
    pub dtr: bool,
    pub rts: bool,
}

impl From<u16> for ControlLineState {
    fn from(value: u16) -> Self {
        ControlLineState {
            dtr: value.get_bit(0),
            rts: value.get_bit(1),
        }
    }
}

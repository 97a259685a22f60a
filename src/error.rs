use failure::Fail;

/// Reasons a descriptor tree is refused by `DeviceBuilder::build`.
///
/// All of these are programming errors in the composition; a device carrying
/// them must not be allowed to enumerate.
#[derive(Debug, Clone, PartialEq, Eq, Fail)]
pub enum DescriptorError {
    #[fail(display = "configuration declares no interfaces")]
    NoInterfaces,

    #[fail(display = "interface numbers are not contiguous: expected {}, found {}", expected, found)]
    NonContiguousInterfaces { expected: u8, found: u8 },

    #[fail(display = "interface {} is declared more than once", _0)]
    DuplicateInterface(u8),

    #[fail(
        display = "interface {} declares {} endpoints but lists {}",
        interface, declared, actual
    )]
    EndpointCountMismatch {
        interface: u8,
        declared: u8,
        actual: usize,
    },

    #[fail(display = "reference to undeclared interface {}", _0)]
    UnknownInterface(u8),

    #[fail(display = "endpoint address 0x{:02x} is not usable by an interface", _0)]
    InvalidEndpointAddress(u8),

    #[fail(display = "endpoint 0x{:02x} is used more than once", _0)]
    DuplicateEndpoint(u8),

    #[fail(
        display = "endpoint 0x{:02x} max packet size {} exceeds the full-speed limit",
        address, size
    )]
    MaxPacketSizeTooLarge { address: u8, size: u16 },

    #[fail(display = "endpoint 0x{:02x} uses an unsupported transfer type", _0)]
    UnsupportedTransferType(u8),

    #[fail(display = "string is referenced but was never allocated")]
    UnresolvedString,

    #[fail(display = "device class 0x{:02x} does not match the declared interfaces", class)]
    ClassMismatch { class: u8 },

    #[fail(display = "descriptor of {} bytes is too long", _0)]
    TooLong(usize),
}

/// Failure signalled by the hardware endpoint collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Fail)]
pub enum HardwareError {
    #[fail(display = "endpoint refused the request")]
    Rejected,

    #[fail(display = "endpoint is busy")]
    Busy,

    #[fail(display = "endpoint is not configured")]
    NotConfigured,
}

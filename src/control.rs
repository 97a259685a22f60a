//! Control transfers on the default pipe (endpoint 0).
//!
//! The pipe only sequences stages; deciding what a request means is left to
//! `Device`. A SETUP packet always restarts the pipe, whatever stage it was in.

use crate::endpoint::{ep0_in, ep0_out, UsbHardware};
use bit_field::BitField;
use heapless::Vec;
use usb_device::control::{Recipient, Request, RequestType};
use usb_device::UsbDirection;

/// Largest response or OUT data stage the pipe buffers.
pub const CONTROL_BUFFER_SIZE: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlState {
    Idle,
    SetupReceived,
    DataStageIn,
    DataStageOut,
    NoDataStage,
    StatusStage,
}

/// The request cannot be served; answered with a protocol STALL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stall;

pub fn parse_setup(packet: &[u8; 8]) -> Request {
    let request_type = packet[0];

    Request {
        direction: if request_type.get_bit(7) {
            UsbDirection::In
        } else {
            UsbDirection::Out
        },
        request_type: match request_type.get_bits(5..7) {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        },
        recipient: match request_type.get_bits(0..5) {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        },
        request: packet[1],
        value: u16::from_le_bytes([packet[2], packet[3]]),
        index: u16::from_le_bytes([packet[4], packet[5]]),
        length: u16::from_le_bytes([packet[6], packet[7]]),
    }
}

pub struct ControlPipe {
    state: ControlState,
    max_packet_size: usize,
    request: Option<Request>,
    buf: Vec<u8, CONTROL_BUFFER_SIZE>,
    position: usize,
    in_finished: bool,
}

impl ControlPipe {
    pub fn new(max_packet_size: u8) -> Self {
        Self {
            state: ControlState::Idle,
            max_packet_size: usize::from(max_packet_size),
            request: None,
            buf: Vec::new(),
            position: 0,
            in_finished: false,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    /// The request of the transaction in progress.
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Data received in the OUT data stage.
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    pub fn reset(&mut self) {
        self.state = ControlState::Idle;
        self.request = None;
        self.buf.clear();
        self.position = 0;
        self.in_finished = false;
    }

    /// Starts a new transaction, abandoning whatever was in flight.
    pub fn setup(&mut self, packet: &[u8; 8]) -> Request {
        if self.state != ControlState::Idle {
            log::trace!("control transfer abandoned in {:?}", self.state);
        }
        self.reset();

        let request = parse_setup(packet);
        self.request = Some(request);
        self.state = ControlState::SetupReceived;
        request
    }

    /// Answers an IN request with `data`, truncated to what the host asked for.
    pub fn respond_in(&mut self, hw: &mut impl UsbHardware, data: &[u8]) {
        let request = match self.request {
            Some(r) if self.state == ControlState::SetupReceived && r.direction == UsbDirection::In => r,
            _ => return self.reject(hw),
        };

        let len = data
            .len()
            .min(usize::from(request.length))
            .min(CONTROL_BUFFER_SIZE);
        self.buf.clear();
        if self.buf.extend_from_slice(&data[..len]).is_err() {
            return self.reject(hw);
        }
        self.position = 0;
        self.in_finished = false;
        self.state = ControlState::DataStageIn;
        self.send_next(hw);
    }

    fn send_next(&mut self, hw: &mut impl UsbHardware) {
        let requested = self
            .request
            .map(|r| usize::from(r.length))
            .unwrap_or(0);
        let remaining = self.buf.len() - self.position;
        let count = remaining.min(self.max_packet_size);

        if hw
            .submit(ep0_in(), &self.buf[self.position..self.position + count])
            .is_err()
        {
            log::warn!("endpoint 0 refused a data packet");
            return self.reject(hw);
        }
        self.position += count;

        // A full packet at the end of a short response needs a trailing ZLP.
        self.in_finished = count < self.max_packet_size
            || (self.position == self.buf.len() && self.buf.len() == requested);
    }

    /// Expects the host to send `wLength` bytes before the request can be handled.
    pub fn expect_out(&mut self, hw: &mut impl UsbHardware) {
        match self.request {
            Some(r)
                if self.state == ControlState::SetupReceived
                    && r.direction == UsbDirection::Out
                    && r.length > 0
                    && usize::from(r.length) <= CONTROL_BUFFER_SIZE =>
            {
                self.state = ControlState::DataStageOut;
            }
            _ => self.reject(hw),
        }
    }

    /// Completes a request without data stage, or one whose OUT data has
    /// been consumed, by sending the zero-length status packet.
    pub fn accept(&mut self, hw: &mut impl UsbHardware) {
        match self.state {
            ControlState::SetupReceived | ControlState::DataStageOut => {}
            _ => return self.reject(hw),
        }
        if self.state == ControlState::SetupReceived {
            self.state = ControlState::NoDataStage;
        }
        if hw.submit(ep0_in(), &[]).is_err() {
            log::warn!("endpoint 0 refused the status packet");
            return self.reject(hw);
        }
        self.state = ControlState::StatusStage;
    }

    pub fn reject(&mut self, hw: &mut impl UsbHardware) {
        hw.stall(ep0_in());
        hw.stall(ep0_out());
        self.reset();
    }

    /// Handles completion of a packet on EP0 IN. Returns the request when its
    /// status stage just finished.
    pub fn in_complete(&mut self, hw: &mut impl UsbHardware) -> Option<Request> {
        match self.state {
            ControlState::DataStageIn => {
                if self.in_finished {
                    self.state = ControlState::StatusStage;
                } else {
                    self.send_next(hw);
                }
                None
            }
            ControlState::StatusStage if !self.expects_out_status() => {
                let request = self.request;
                self.reset();
                request
            }
            _ => None,
        }
    }

    /// Handles data received on EP0 OUT. Returns the request once its whole
    /// OUT data stage is in `data()`.
    pub fn out_complete(&mut self, hw: &mut impl UsbHardware, data: &[u8]) -> Option<Request> {
        match self.state {
            ControlState::DataStageOut => {
                let request = self.request?;
                if self.buf.extend_from_slice(data).is_err()
                    || self.buf.len() > usize::from(request.length)
                {
                    self.reject(hw);
                    return None;
                }
                if self.buf.len() == usize::from(request.length) || data.len() < self.max_packet_size {
                    Some(request)
                } else {
                    None
                }
            }
            ControlState::StatusStage if self.expects_out_status() => {
                self.reset();
                None
            }
            ControlState::DataStageIn => {
                // Host ended the data stage early; this is its status packet.
                self.reset();
                None
            }
            _ => None,
        }
    }

    /// After an IN data stage the host acknowledges with an OUT ZLP; every
    /// other transaction ends with our IN ZLP.
    fn expects_out_status(&self) -> bool {
        self.request
            .map(|r| r.direction == UsbDirection::In)
            .unwrap_or(false)
    }
}

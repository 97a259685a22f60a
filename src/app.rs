//! Consumers of the bulk endpoints.

use heapless::Deque;

/// Payload sink and source behind the bulk data interface. Both calls happen
/// from the USB event context and must not block.
pub trait Application {
    /// Takes a chunk received on bulk OUT. Returns how many bytes were kept.
    /// There is no back-pressure: whatever does not fit is dropped and the
    /// device only logs the loss.
    fn accept(&mut self, data: &[u8]) -> usize;

    /// Fills `buf` with the next chunk for bulk IN. Returns 0 when there is
    /// nothing to send.
    fn produce(&mut self, buf: &mut [u8]) -> usize;
}

pub const LOOPBACK_CAPACITY: usize = 512;

/// Echoes everything the host sends.
pub struct Loopback {
    queue: Deque<u8, LOOPBACK_CAPACITY>,
}

impl Loopback {
    pub fn new() -> Self {
        Self {
            queue: Deque::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Default for Loopback {
    fn default() -> Self {
        Self::new()
    }
}

impl Application for Loopback {
    fn accept(&mut self, data: &[u8]) -> usize {
        data.iter()
            .take_while(|b| self.queue.push_back(**b).is_ok())
            .count()
    }

    fn produce(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            match self.queue.pop_front() {
                Some(b) => buf[n] = b,
                None => break,
            }
            n += 1;
        }
        n
    }
}

/// Byte-level access to a UART.
pub trait SerialPort {
    /// Returns false when the transmitter cannot take another byte yet.
    fn try_write(&mut self, byte: u8) -> bool;

    fn try_read(&mut self) -> Option<u8>;
}

pub const BRIDGE_BUFFER: usize = 256;

/// Forwards bulk OUT to a UART and UART input to bulk IN.
pub struct UartBridge<U> {
    uart: U,
    to_uart: Deque<u8, BRIDGE_BUFFER>,
}

impl<U: SerialPort> UartBridge<U> {
    pub fn new(uart: U) -> Self {
        Self {
            uart,
            to_uart: Deque::new(),
        }
    }

    pub fn uart(&self) -> &U {
        &self.uart
    }

    pub fn uart_mut(&mut self) -> &mut U {
        &mut self.uart
    }

    /// Moves queued bytes into the UART until its transmitter fills up.
    pub fn flush(&mut self) {
        while let Some(b) = self.to_uart.front().copied() {
            if !self.uart.try_write(b) {
                break;
            }
            self.to_uart.pop_front();
        }
    }
}

impl<U: SerialPort> Application for UartBridge<U> {
    fn accept(&mut self, data: &[u8]) -> usize {
        let kept = data
            .iter()
            .take_while(|b| self.to_uart.push_back(**b).is_ok())
            .count();
        self.flush();
        kept
    }

    fn produce(&mut self, buf: &mut [u8]) -> usize {
        self.flush();
        let mut n = 0;
        while n < buf.len() {
            match self.uart.try_read() {
                Some(b) => buf[n] = b,
                None => break,
            }
            n += 1;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn loopback_echoes_in_order() {
        let mut app = Loopback::new();
        assert_eq!(app.accept(b"hello"), 5);
        let mut buf = [0u8; 3];
        assert_eq!(app.produce(&mut buf), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(app.produce(&mut buf), 2);
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(app.produce(&mut buf), 0);
    }

    #[test]
    fn loopback_drops_overflow() {
        let mut app = Loopback::new();
        let data = [0x5a; LOOPBACK_CAPACITY + 10];
        assert_eq!(app.accept(&data), LOOPBACK_CAPACITY);
        assert_eq!(app.pending(), LOOPBACK_CAPACITY);
    }

    #[derive(Default)]
    struct FakeUart {
        tx: Vec<u8>,
        tx_room: usize,
        rx: VecDeque<u8>,
    }

    impl SerialPort for FakeUart {
        fn try_write(&mut self, byte: u8) -> bool {
            if self.tx_room == 0 {
                return false;
            }
            self.tx_room -= 1;
            self.tx.push(byte);
            true
        }

        fn try_read(&mut self) -> Option<u8> {
            self.rx.pop_front()
        }
    }

    #[test]
    fn bridge_forwards_both_ways() {
        let mut bridge = UartBridge::new(FakeUart {
            tx_room: 2,
            rx: b"ok".iter().copied().collect(),
            ..Default::default()
        });
        assert_eq!(bridge.accept(b"AT\r"), 3);
        assert_eq!(bridge.uart().tx, b"AT");

        bridge.uart_mut().tx_room = 8;
        let mut buf = [0u8; 64];
        assert_eq!(bridge.produce(&mut buf), 2);
        assert_eq!(&buf[..2], b"ok");
        assert_eq!(bridge.uart().tx, b"AT\r");
    }
}

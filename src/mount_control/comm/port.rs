use std::io::Read;
use std::time::Duration;
use tracing::warn;

/// Byte-level access to one serial line. The framed layer above owns all
/// timing and retry policy; implementations only move bytes.
pub trait Port: Send {
    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()>;

    /// Read one byte, waiting at most `timeout`. `Ok(None)` on timeout.
    fn read_byte(&mut self, timeout: Duration) -> std::io::Result<Option<u8>>;
}

/// A real tty through the serialport crate: 8N1, hardware flow control,
/// with the line-speed toggle on open that shakes loose a wedged
/// controller UART.
pub struct TtyPort {
    port: Box<dyn serialport::SerialPort>,
    baud: u32,
}

impl TtyPort {
    pub fn open(path: &str, baud: u32) -> Result<TtyPort, serialport::Error> {
        let port = serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::Hardware)
            .timeout(Duration::from_secs(1))
            .open()?;
        let mut tty = TtyPort { port, baud };
        tty.toggle_line_speed();
        let _ = tty.port.clear(serialport::ClearBuffer::All);
        Ok(tty)
    }

    /// Drop the line to 0 baud for a second, then restore the configured
    /// rate. Part of the open contract for these controllers.
    fn toggle_line_speed(&mut self) {
        if let Err(e) = self.port.set_baud_rate(0) {
            warn!("line-speed toggle not supported here: {}", e);
            return;
        }
        std::thread::sleep(Duration::from_secs(1));
        if let Err(e) = self.port.set_baud_rate(self.baud) {
            warn!("could not restore line speed: {}", e);
        }
    }
}

impl Port for TtyPort {
    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        std::io::Write::write_all(&mut self.port, data)
    }

    fn read_byte(&mut self, timeout: Duration) -> std::io::Result<Option<u8>> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// A port that is never there. Stands in for hardware that the test-mode
/// bits keep the protocol layer from ever touching.
#[derive(Debug, Default)]
pub struct NullPort;

impl Port for NullPort {
    fn write_all(&mut self, _data: &[u8]) -> std::io::Result<()> {
        Ok(())
    }

    fn read_byte(&mut self, _timeout: Duration) -> std::io::Result<Option<u8>> {
        Ok(None)
    }
}

/// Scripted port for wire-level tests: records writes, plays back queued
/// responses one byte at a time, times out when a response runs dry.
#[cfg(test)]
pub struct ScriptedPort {
    pub written: Vec<u8>,
    replies: std::collections::VecDeque<Vec<u8>>,
    current: Vec<u8>,
    cursor: usize,
}

#[cfg(test)]
impl ScriptedPort {
    pub fn new() -> Self {
        ScriptedPort {
            written: Vec::new(),
            replies: std::collections::VecDeque::new(),
            current: Vec::new(),
            cursor: 0,
        }
    }

    pub fn push_reply(&mut self, reply: impl AsRef<[u8]>) {
        self.replies.push_back(reply.as_ref().to_vec());
    }

    pub fn written_str(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }
}

#[cfg(test)]
impl Port for ScriptedPort {
    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn read_byte(&mut self, _timeout: Duration) -> std::io::Result<Option<u8>> {
        if self.cursor >= self.current.len() {
            match self.replies.pop_front() {
                Some(next) => {
                    self.current = next;
                    self.cursor = 0;
                }
                None => return Ok(None),
            }
        }
        if self.current.is_empty() {
            // An explicitly queued empty reply models one timeout.
            return Ok(None);
        }
        let b = self.current[self.cursor];
        self.cursor += 1;
        if self.cursor == self.current.len() {
            self.current = Vec::new();
            self.cursor = 0;
        }
        Ok(Some(b))
    }
}

pub mod crc;
pub mod port;

pub use crc::crc16;
pub use port::{NullPort, Port, TtyPort};

use crate::util::consts::{FAULT_TIMEOUT, MAX_TRY, RESP_LEN, SERIAL_TIMEOUT};
use crate::util::CommError;
use retry::delay::Fixed;
use std::time::Duration;
use tracing::{error, warn};

/// One framed serial line to a controller. Owns the retry, CRC, and echo
/// discipline; the typed protocol layer above formats commands and parses
/// fields.
pub struct SerialLink {
    port: Box<dyn Port>,
    label: &'static str,
}

impl SerialLink {
    pub fn new(port: Box<dyn Port>, label: &'static str) -> Self {
        SerialLink { port, label }
    }

    /// Frame a command body with its CRC and terminator.
    fn frame(body: &str) -> String {
        format!("{}{:04X}\r", body, crc16(body.as_bytes()))
    }

    /// Send a framed command and return the verified response with its CRC
    /// and terminator stripped. Failed reads or verification failures clear
    /// the line and resend, up to the retry budget.
    pub fn transact(&mut self, body: &str) -> Result<String, CommError> {
        let framed = Self::frame(body);
        let result = retry::retry_with_index(
            Fixed::from_millis(0).take(MAX_TRY as usize - 1),
            |try_no| {
                if try_no > 1 {
                    warn!("{}: clearing and resending [{}]", self.label, body);
                    self.clear_line();
                }
                self.exchange(&framed, body)
            },
        );
        result.map_err(|e| match e {
            retry::Error::Operation { error, .. } => {
                error!("{}: too many tries on [{}]", self.label, body);
                error
            }
            retry::Error::Internal(msg) => CommError::Timeout { partial: msg },
        })
    }

    fn exchange(&mut self, framed: &str, body: &str) -> Result<String, CommError> {
        self.port.write_all(framed.as_bytes())?;
        let resp = self.read_until(b'\r', SERIAL_TIMEOUT)?;
        self.verify(body, &resp)
    }

    /// CRC and echo check; returns the response body.
    fn verify(&self, command: &str, response: &str) -> Result<String, CommError> {
        if response.len() < 5 || !response.is_char_boundary(response.len() - 5) {
            return Err(CommError::BadField {
                response: response.to_string(),
            });
        }
        let cut = &response[..response.len() - 5];
        let wire_hex = &response[response.len() - 5..response.len() - 1];
        let wire = u16::from_str_radix(wire_hex, 16).map_err(|_| CommError::BadCrc {
            response: response.to_string(),
        })?;
        if crc16(cut.as_bytes()) != wire {
            error!(
                "{}: bad CRC on response [{}], [{}]",
                self.label,
                response.trim_end(),
                wire_hex
            );
            return Err(CommError::BadCrc {
                response: response.to_string(),
            });
        }

        // Axis echo check: a reply to an RA command must name RA, same for
        // Dec. Mismatches mean the controllers got out of step.
        let mismatch = (command.contains("RA") && !cut.contains("RA"))
            || (!command.contains("RA") && command.contains("Dec") && !cut.contains("Dec"));
        if mismatch {
            error!(
                "{}: command [{}] echoed [{}]",
                self.label,
                command,
                cut.trim_end()
            );
            return Err(CommError::EchoMismatch {
                command: command.to_string(),
                response: cut.to_string(),
            });
        }

        Ok(cut.to_string())
    }

    /// Send the fault-log request; free-form response terminated by `;`,
    /// no CRC or echo verification, inbound buffer drained afterwards.
    pub fn transact_fault(&mut self, body: &str) -> Result<String, CommError> {
        let framed = Self::frame(body);
        self.port.write_all(framed.as_bytes())?;
        let fault = self.read_until(b';', FAULT_TIMEOUT)?;
        self.drain();
        Ok(fault)
    }

    /// Plain unframed command for the focus controller; optional float
    /// reply.
    pub fn send_unframed(&mut self, command: &str, want_reply: bool) -> Result<Option<f64>, CommError> {
        self.port.write_all(command.as_bytes())?;
        self.port.write_all(b"\r")?;
        if !want_reply {
            return Ok(None);
        }
        let resp = self.read_until(b'\r', SERIAL_TIMEOUT)?;
        let text = resp.trim_end_matches('\r').trim();
        let value: f64 = text.parse().map_err(|_| {
            error!("{}: reply [{}] to [{}] invalid", self.label, text, command);
            CommError::BadField {
                response: resp.clone(),
            }
        })?;
        Ok(Some(value))
    }

    /// Drain anything inbound, prod the controller with a bare terminator,
    /// and drain the reply. Run between a failed exchange and its resend.
    fn clear_line(&mut self) {
        if let Err(e) = self.read_until(b'\r', SERIAL_TIMEOUT) {
            warn!("{}: error on clearing read (non-fatal): {}", self.label, e);
        }
        let _ = self.port.write_all(b"\r");
        if let Err(e) = self.read_until(b'\r', Duration::from_secs(2)) {
            warn!("{}: error on clearing read (non-fatal): {}", self.label, e);
        }
    }

    /// Discard inbound bytes until the line goes quiet.
    fn drain(&mut self) {
        while let Ok(Some(_)) = self.port.read_byte(Duration::from_millis(50)) {}
    }

    /// Accumulate one byte at a time until the terminator, the length cap,
    /// or a timeout.
    fn read_until(&mut self, term: u8, timeout: Duration) -> Result<String, CommError> {
        let mut buf = Vec::new();
        loop {
            match self.port.read_byte(timeout)? {
                Some(b) => buf.push(b),
                None => {
                    let partial = String::from_utf8_lossy(&buf).into_owned();
                    error!("{}: timeout on serial read (read [{}])", self.label, partial);
                    return Err(CommError::Timeout { partial });
                }
            }
            if *buf.last().unwrap() == term {
                break;
            }
            if buf.len() >= RESP_LEN {
                let partial = String::from_utf8_lossy(&buf).into_owned();
                error!(
                    "{}: no termination character in response (read [{}])",
                    self.label, partial
                );
                return Err(CommError::Unterminated { partial });
            }
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

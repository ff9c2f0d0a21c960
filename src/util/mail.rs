use std::io::Write;
use std::process::{Command, Stdio};
use tracing::warn;

/// Outbound alert channel for hardware faults.
pub trait Mailer: Send {
    fn alert(&mut self, body: &str);
}

/// Discards alerts; used when no address is configured and in tests.
#[derive(Debug, Default)]
pub struct NullMailer;

impl Mailer for NullMailer {
    fn alert(&mut self, _body: &str) {}
}

/// Pipes the alert through the system `mailx`.
#[derive(Debug)]
pub struct ProcessMailer {
    address: String,
}

impl ProcessMailer {
    pub fn new(address: impl Into<String>) -> Self {
        ProcessMailer {
            address: address.into(),
        }
    }
}

impl Mailer for ProcessMailer {
    fn alert(&mut self, body: &str) {
        let spawned = Command::new("mailx")
            .arg("-s")
            .arg("Mount error")
            .arg(&self.address)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(mut child) => {
                if let Some(stdin) = child.stdin.as_mut() {
                    let _ = stdin.write_all(body.as_bytes());
                }
                let _ = child.wait();
            }
            Err(e) => warn!("could not dispatch mail alert: {}", e),
        }
    }
}

use lettre::address::{Address, Envelope};
use lettre::{SmtpTransport, Transport};
use std::sync::Mutex;

/// Downstream delivery behind a narrow interface so the gateway can be
/// tested with a recording fake.
pub trait Forwarder: Send + Sync {
    fn forward(&self, envelope_from: &str, recipients: &[String], raw: &[u8]) -> anyhow::Result<()>;
}

/// Relays raw message bytes to the downstream SMTP server.
pub struct SmtpForwarder {
    host: String,
    port: u16,
}

impl SmtpForwarder {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        SmtpForwarder {
            host: host.into(),
            port,
        }
    }
}

impl Forwarder for SmtpForwarder {
    fn forward(&self, envelope_from: &str, recipients: &[String], raw: &[u8]) -> anyhow::Result<()> {
        let from = envelope_from.parse::<Address>().ok();
        let rcpts: Vec<Address> = recipients.iter().filter_map(|r| r.parse().ok()).collect();
        anyhow::ensure!(!rcpts.is_empty(), "no valid recipient addresses");

        let envelope = Envelope::new(from, rcpts)?;
        // Plaintext link to a local downstream, as with any post-queue
        // content filter reinjection.
        let mailer = SmtpTransport::builder_dangerous(self.host.as_str())
            .port(self.port)
            .build();
        mailer.send_raw(&envelope, raw)?;
        log::debug!(
            "relayed {} bytes to {}:{}",
            raw.len(),
            self.host,
            self.port
        );
        Ok(())
    }
}

/// One captured delivery, for assertions in tests.
pub struct ForwardedMail {
    pub envelope_from: String,
    pub recipients: Vec<String>,
    pub raw: Vec<u8>,
}

/// Test fake that records deliveries instead of opening sockets.
#[derive(Default)]
pub struct RecordingForwarder {
    pub sent: Mutex<Vec<ForwardedMail>>,
}

impl Forwarder for RecordingForwarder {
    fn forward(&self, envelope_from: &str, recipients: &[String], raw: &[u8]) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(ForwardedMail {
            envelope_from: envelope_from.to_string(),
            recipients: recipients.to_vec(),
            raw: raw.to_vec(),
        });
        Ok(())
    }
}

/// Pull the bare address out of `user@domain` or `Name <user@domain>`.
pub fn extract_address(value: &str) -> String {
    let value = value.trim();
    if let (Some(start), Some(end)) = (value.find('<'), value.rfind('>')) {
        if start < end {
            return value[start + 1..end].trim().to_string();
        }
    }
    value.to_string()
}

/// Lowercased domain part of an address, or empty when there is none.
pub fn address_domain(address: &str) -> String {
    extract_address(address)
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_address() {
        assert_eq!(extract_address("user@example.com"), "user@example.com");
        assert_eq!(
            extract_address("Some Name <user@example.com>"),
            "user@example.com"
        );
        assert_eq!(extract_address("  <user@example.com>  "), "user@example.com");
    }

    #[test]
    fn test_address_domain() {
        assert_eq!(address_domain("user@Example.COM"), "example.com");
        assert_eq!(address_domain("Name <user@example.com>"), "example.com");
        assert_eq!(address_domain("no-at-sign"), "");
        assert_eq!(address_domain(""), "");
    }

    #[test]
    fn test_recording_forwarder_captures_delivery() {
        let forwarder = RecordingForwarder::default();
        forwarder
            .forward(
                "a@x.com",
                &["b@smtp-gateway-lab.com".to_string()],
                b"raw bytes",
            )
            .unwrap();
        let sent = forwarder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope_from, "a@x.com");
        assert_eq!(sent[0].recipients, vec!["b@smtp-gateway-lab.com"]);
        assert_eq!(sent[0].raw, b"raw bytes");
    }
}

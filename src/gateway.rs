use crate::config::Config;
use crate::evidence::EvidenceSink;
use crate::message::MailMessage;
use crate::relay::{address_domain, extract_address, Forwarder};
use crate::rewrite::Rewriter;
use crate::rules::RuleSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// The SMTP front door: accepts mail, runs the rewrite engine, archives
/// evidence and relays downstream. One task per connection; the only
/// state shared between tasks is read-only.
#[derive(Clone)]
pub struct Gateway {
    config: Arc<Config>,
    rewriter: Arc<Rewriter>,
    evidence: Arc<dyn EvidenceSink>,
    forwarder: Arc<dyn Forwarder>,
}

impl Gateway {
    pub fn new(
        config: Config,
        rules: RuleSet,
        evidence: Arc<dyn EvidenceSink>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        let opts = config.rewrite_options();
        Gateway {
            config: Arc::new(config),
            rewriter: Arc::new(Rewriter::new(Arc::new(rules), opts)),
            evidence,
            forwarder,
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind((
            self.config.listen_host.as_str(),
            self.config.listen_port,
        ))
        .await?;
        log::info!(
            "gateway listening on {}:{}",
            self.config.listen_host,
            self.config.listen_port
        );
        log::info!(
            "forwarding to downstream {}:{}",
            self.config.downstream_host,
            self.config.downstream_port
        );

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    log::info!("shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    log::debug!("connection from {peer}");
                    let gateway = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = gateway.handle_session(stream).await {
                            log::warn!("session from {peer} ended with error: {e}");
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Drive one SMTP session. Generic over the stream so tests can use
    /// an in-memory duplex pipe.
    pub async fn handle_session<S>(&self, stream: S) -> anyhow::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        writer.write_all(b"220 traingate ESMTP ready\r\n").await?;

        let mut mail_from = String::new();
        let mut rcpt_tos: Vec<String> = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                break;
            }
            let command = line.trim_end_matches(['\r', '\n']);
            let upper = command.to_ascii_uppercase();

            if upper.starts_with("EHLO") || upper.starts_with("HELO") {
                writer.write_all(b"250 traingate\r\n").await?;
            } else if let Some(arg) = strip_verb(command, &upper, "MAIL FROM:") {
                mail_from = extract_address(arg);
                writer.write_all(b"250 2.1.0 OK\r\n").await?;
            } else if let Some(arg) = strip_verb(command, &upper, "RCPT TO:") {
                let address = extract_address(arg);
                if address_domain(&address) != self.config.allowed_domain {
                    log::info!("refusing relay for {address}");
                    writer.write_all(b"550 5.7.1 Relaying denied\r\n").await?;
                } else {
                    rcpt_tos.push(address);
                    writer.write_all(b"250 2.1.5 OK\r\n").await?;
                }
            } else if upper == "DATA" {
                if rcpt_tos.is_empty() {
                    writer.write_all(b"554 5.5.1 No valid recipients\r\n").await?;
                    continue;
                }
                writer
                    .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                    .await?;
                let raw = read_data(&mut reader).await?;
                self.process_message(&mail_from, &rcpt_tos, raw).await;
                writer
                    .write_all(b"250 Message accepted for delivery\r\n")
                    .await?;
                mail_from.clear();
                rcpt_tos.clear();
            } else if upper == "RSET" {
                mail_from.clear();
                rcpt_tos.clear();
                writer.write_all(b"250 2.0.0 OK\r\n").await?;
            } else if upper == "NOOP" {
                writer.write_all(b"250 2.0.0 OK\r\n").await?;
            } else if upper == "QUIT" {
                writer.write_all(b"221 2.0.0 Bye\r\n").await?;
                break;
            } else {
                writer
                    .write_all(b"502 5.5.2 Command not recognized\r\n")
                    .await?;
            }
        }
        Ok(())
    }

    /// Archive, rewrite and relay one received message. All failures
    /// here are logged and swallowed; the SMTP client already got its
    /// acknowledgement path decided.
    async fn process_message(&self, mail_from: &str, rcpt_tos: &[String], raw: Vec<u8>) {
        match self.evidence.store(&raw) {
            Ok(location) => log::info!("evidence saved to {location}"),
            Err(e) => log::error!("evidence write failed: {e}"),
        }

        let to_forward = match MailMessage::parse(&raw) {
            Ok(mut msg) => {
                let outcome = self.rewriter.process(&mut msg);
                if !outcome.detections.is_empty() {
                    log::info!("rewrite result: {:?}", outcome.detections);
                }
                outcome.bytes
            }
            Err(e) => {
                log::warn!("unparsable message, forwarding unmodified: {e}");
                raw
            }
        };

        let allowed: Vec<String> = rcpt_tos
            .iter()
            .filter(|r| address_domain(r) == self.config.allowed_domain)
            .cloned()
            .collect();
        if allowed.is_empty() {
            log::warn!("relay attempt with no allowed recipients, dropping");
            return;
        }

        let forwarder = self.forwarder.clone();
        let from = mail_from.to_string();
        let result =
            tokio::task::spawn_blocking(move || forwarder.forward(&from, &allowed, &to_forward))
                .await;
        match result {
            Ok(Ok(())) => log::info!("forwarded to downstream"),
            Ok(Err(e)) => log::error!("forwarding failed: {e}"),
            Err(e) => log::error!("forwarding task panicked: {e}"),
        }
    }
}

/// Case-insensitive verb match returning the argument with the original
/// casing intact (addresses are case-sensitive in the local part).
fn strip_verb<'a>(command: &'a str, upper: &str, verb: &str) -> Option<&'a str> {
    if upper.starts_with(verb) {
        Some(&command[verb.len()..])
    } else {
        None
    }
}

/// Collect DATA lines until the lone-dot terminator, undoing dot
/// stuffing along the way.
async fn read_data<R>(reader: &mut R) -> anyhow::Result<Vec<u8>>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut raw = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            anyhow::bail!("connection closed mid-DATA");
        }
        let content = line.trim_end_matches(['\r', '\n']);
        if content == "." {
            break;
        }
        let content = content.strip_prefix('.').unwrap_or(content);
        raw.extend_from_slice(content.as_bytes());
        raw.extend_from_slice(b"\r\n");
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::MemoryEvidenceStore;
    use crate::relay::RecordingForwarder;
    use tokio::io::AsyncReadExt;

    fn test_gateway() -> (Gateway, Arc<MemoryEvidenceStore>, Arc<RecordingForwarder>) {
        let evidence = Arc::new(MemoryEvidenceStore::default());
        let forwarder = Arc::new(RecordingForwarder::default());
        let gateway = Gateway::new(
            Config::default(),
            RuleSet::builtin(),
            evidence.clone(),
            forwarder.clone(),
        );
        (gateway, evidence, forwarder)
    }

    async fn run_session(gateway: Gateway, script: &str) -> String {
        let (mut client, server) = tokio::io::duplex(256 * 1024);
        let task = tokio::spawn(async move { gateway.handle_session(server).await });

        client.write_all(script.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        task.await.unwrap().unwrap();
        String::from_utf8(response).unwrap()
    }

    #[tokio::test]
    async fn test_session_relays_allowed_recipient() {
        let (gateway, evidence, forwarder) = test_gateway();
        let script = "EHLO client.example\r\n\
MAIL FROM:<sender@x.com>\r\n\
RCPT TO:<user@smtp-gateway-lab.com>\r\n\
DATA\r\n\
From: sender@x.com\r\n\
To: user@smtp-gateway-lab.com\r\n\
Subject: hello\r\n\
\r\n\
just a note\r\n\
.\r\n\
QUIT\r\n";
        let responses = run_session(gateway, script).await;
        assert!(responses.starts_with("220 "));
        assert!(responses.contains("354 "));
        assert!(responses.contains("250 Message accepted for delivery"));
        assert!(responses.contains("221 "));

        assert_eq!(evidence.stored.lock().unwrap().len(), 1);
        let sent = forwarder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope_from, "sender@x.com");
        assert_eq!(sent[0].recipients, vec!["user@smtp-gateway-lab.com"]);
    }

    #[tokio::test]
    async fn test_session_refuses_foreign_recipient() {
        let (gateway, _evidence, forwarder) = test_gateway();
        let script = "HELO client.example\r\n\
MAIL FROM:<sender@x.com>\r\n\
RCPT TO:<victim@other.example>\r\n\
DATA\r\n\
QUIT\r\n";
        let responses = run_session(gateway, script).await;
        assert!(responses.contains("550 5.7.1 Relaying denied"));
        // DATA with no accepted recipients is refused outright.
        assert!(responses.contains("554 5.5.1"));
        assert!(forwarder.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_rewrites_phishy_message() {
        let (gateway, evidence, forwarder) = test_gateway();
        let script = "EHLO client.example\r\n\
MAIL FROM:<sender@x.com>\r\n\
RCPT TO:<user@smtp-gateway-lab.com>\r\n\
DATA\r\n\
From: sender@x.com\r\n\
To: user@smtp-gateway-lab.com\r\n\
Subject: URGENT: Please review\r\n\
Content-Type: text/plain\r\n\
\r\n\
Take action required within 24 hours or your account will be suspended immediately.\r\n\
.\r\n\
QUIT\r\n";
        run_session(gateway, script).await;

        let sent = forwarder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let forwarded = String::from_utf8_lossy(&sent[0].raw);
        assert!(forwarded.contains("X-Training-Gateway: smtp-training-gateway"));
        assert!(forwarded.contains("[Potential phishing: Urgency]"));
        assert!(forwarded.contains("=== PERSUASION CUES DETECTED ==="));

        // Evidence holds the pre-rewrite bytes.
        let stored = evidence.stored.lock().unwrap();
        assert!(!String::from_utf8_lossy(&stored[0]).contains("X-Training-Gateway"));
    }

    #[tokio::test]
    async fn test_data_unstuffs_leading_dots() {
        let (gateway, evidence, _forwarder) = test_gateway();
        let script = "EHLO client.example\r\n\
MAIL FROM:<sender@x.com>\r\n\
RCPT TO:<user@smtp-gateway-lab.com>\r\n\
DATA\r\n\
Subject: dots\r\n\
\r\n\
..hidden line\r\n\
.\r\n\
QUIT\r\n";
        run_session(gateway, script).await;
        let stored = evidence.stored.lock().unwrap();
        assert!(String::from_utf8_lossy(&stored[0]).contains("\r\n.hidden line\r\n"));
    }

    #[tokio::test]
    async fn test_rset_clears_envelope() {
        let (gateway, _evidence, forwarder) = test_gateway();
        let script = "EHLO client.example\r\n\
MAIL FROM:<sender@x.com>\r\n\
RCPT TO:<user@smtp-gateway-lab.com>\r\n\
RSET\r\n\
DATA\r\n\
QUIT\r\n";
        let responses = run_session(gateway, script).await;
        assert!(responses.contains("554 5.5.1"));
        assert!(forwarder.sent.lock().unwrap().is_empty());
    }
}

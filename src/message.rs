use mailparse::body::Body;
use mailparse::{parse_mail, ParsedMail};

/// Body of a single MIME part. Leaf parts keep their original encoded
/// payload so untouched parts serialize byte-for-byte; a rewritten leaf
/// re-emits as UTF-8 `8bit`.
enum PartBody {
    Leaf {
        encoded: Vec<u8>,
        text: String,
        rewritten: Option<String>,
    },
    Multipart {
        boundary: String,
        parts: Vec<MailPart>,
    },
}

struct MailPart {
    headers: Vec<(String, String)>,
    content_type: String,
    body: PartBody,
}

/// An owned, mutable view of a parsed RFC822 message: ordered repeatable
/// headers, a MIME part tree, and byte serialization. Built once per
/// inbound message and discarded after the rewritten bytes are produced.
pub struct MailMessage {
    raw: Vec<u8>,
    root: MailPart,
}

/// Decoded text content of a part, falling back to a lossy decode of the
/// raw payload when the declared charset cannot be honoured.
fn part_text(part: &ParsedMail) -> String {
    match part.get_body() {
        Ok(text) => text,
        Err(e) => {
            log::debug!("part decode failed ({e}), falling back to lossy raw");
            String::from_utf8_lossy(&part.get_body_raw().unwrap_or_default()).to_string()
        }
    }
}

/// Raw transfer-encoded payload bytes of a leaf part, exactly as they
/// appeared in the original message.
fn part_encoded(part: &ParsedMail) -> Vec<u8> {
    match part.get_body_encoded() {
        Body::Base64(body) => body.get_raw().to_vec(),
        Body::QuotedPrintable(body) => body.get_raw().to_vec(),
        Body::SevenBit(body) => body.get_raw().to_vec(),
        Body::EightBit(body) => body.get_raw().to_vec(),
        Body::Binary(body) => body.get_raw().to_vec(),
    }
}

fn build_part(parsed: &ParsedMail) -> MailPart {
    let headers = parsed
        .headers
        .iter()
        .map(|h| (h.get_key(), h.get_value()))
        .collect();
    let content_type = parsed.ctype.mimetype.to_lowercase();
    let boundary = parsed.ctype.params.get("boundary").cloned();

    let body = match boundary {
        Some(boundary) if content_type.starts_with("multipart/") && !parsed.subparts.is_empty() => {
            PartBody::Multipart {
                boundary,
                parts: parsed.subparts.iter().map(build_part).collect(),
            }
        }
        _ => PartBody::Leaf {
            encoded: part_encoded(parsed),
            text: if content_type.starts_with("text/") {
                part_text(parsed)
            } else {
                String::new()
            },
            rewritten: None,
        },
    };

    MailPart {
        headers,
        content_type,
        body,
    }
}

fn find_leaf<'a>(part: &'a MailPart, content_type: &str) -> Option<&'a MailPart> {
    match &part.body {
        PartBody::Leaf { .. } => (part.content_type == content_type).then_some(part),
        PartBody::Multipart { parts, .. } => {
            parts.iter().find_map(|p| find_leaf(p, content_type))
        }
    }
}

fn find_leaf_mut<'a>(part: &'a mut MailPart, content_type: &str) -> Option<&'a mut MailPart> {
    if matches!(part.body, PartBody::Leaf { .. }) {
        if part.content_type == content_type {
            return Some(part);
        }
        return None;
    }
    match &mut part.body {
        PartBody::Multipart { parts, .. } => {
            parts.iter_mut().find_map(|p| find_leaf_mut(p, content_type))
        }
        PartBody::Leaf { .. } => None,
    }
}

fn to_crlf(text: &str) -> Vec<u8> {
    text.replace("\r\n", "\n").replace('\n', "\r\n").into_bytes()
}

fn write_part(out: &mut Vec<u8>, part: &MailPart) {
    match &part.body {
        PartBody::Leaf {
            rewritten: Some(text),
            ..
        } => {
            // Rewritten content replaces the original payload and its
            // transfer encoding.
            for (name, value) in &part.headers {
                let lower = name.to_lowercase();
                if lower == "content-type" || lower == "content-transfer-encoding" {
                    continue;
                }
                out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
            }
            out.extend_from_slice(
                format!("Content-Type: {}; charset=\"utf-8\"\r\n", part.content_type).as_bytes(),
            );
            out.extend_from_slice(b"Content-Transfer-Encoding: 8bit\r\n");
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(&to_crlf(text));
        }
        PartBody::Leaf {
            encoded,
            rewritten: None,
            ..
        } => {
            for (name, value) in &part.headers {
                out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
            }
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(encoded);
        }
        PartBody::Multipart { boundary, parts } => {
            for (name, value) in &part.headers {
                out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
            }
            out.extend_from_slice(b"\r\n");
            for sub in parts {
                out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
                write_part(out, sub);
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        }
    }
}

impl MailMessage {
    pub fn parse(raw: &[u8]) -> anyhow::Result<Self> {
        let parsed = parse_mail(raw)?;
        Ok(MailMessage {
            raw: raw.to_vec(),
            root: build_part(&parsed),
        })
    }

    /// The original bytes exactly as received.
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// First occurrence of a header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.root
            .headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Remove every occurrence of the header, then append it with the
    /// new value at the end of the header block.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.remove_header(name);
        self.root.headers.push((name.to_string(), value.to_string()));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.root.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn subject(&self) -> String {
        self.header("Subject").unwrap_or_default().to_string()
    }

    /// Decoded text of the first part with the given content type,
    /// walking the part tree depth-first. A non-multipart message
    /// matches against itself.
    pub fn first_part_text(&self, content_type: &str) -> Option<String> {
        find_leaf(&self.root, content_type).map(|part| match &part.body {
            PartBody::Leaf {
                text, rewritten, ..
            } => rewritten.clone().unwrap_or_else(|| text.clone()),
            PartBody::Multipart { .. } => unreachable!("find_leaf only returns leaves"),
        })
    }

    /// Replace the text content of the first part with the given content
    /// type. Returns false if no such part exists.
    pub fn replace_first_part_text(&mut self, content_type: &str, new_text: String) -> bool {
        match find_leaf_mut(&mut self.root, content_type) {
            Some(part) => {
                if let PartBody::Leaf { rewritten, .. } = &mut part.body {
                    *rewritten = Some(new_text);
                }
                true
            }
            None => false,
        }
    }

    /// Serialize the full message back to RFC822 bytes. Untouched leaf
    /// parts keep their original encoded payload verbatim.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.raw.len() + 1024);
        write_part(&mut out, &self.root);
        out
    }
}

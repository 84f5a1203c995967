/// SIP message model and header extraction
/// Reference: RFC 3261 - SIP: Session Initiation Protocol
///
/// Carries just enough of a request/response to drive transaction matching:
/// the start line plus an ordered header list. Header lookup is
/// case-insensitive and returns the topmost value, which is all the
/// transaction-id rules ever need.
use std::fmt;

use thiserror::Error;

/// RFC 3261 branch parameters start with this magic cookie. A branch without
/// it was generated by an RFC 2543 element.
pub const MAGIC_COOKIE: &str = "z9hG4bK";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("malformed start line")]
    MalformedStartLine,
    #[error("no Via header")]
    MissingVia,
    #[error("no branch parameter in top Via")]
    MissingBranch,
    #[error("no Call-ID header")]
    MissingCallId,
    #[error("missing or malformed CSeq header")]
    MalformedCseq,
}

/// A SIP request: method, Request-URI and headers in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Topmost value of the named header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        header(&self.headers, name)
    }
}

/// A SIP response: status line and headers in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl Response {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header(&self.headers, name)
    }
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Parse a request from wire text. Bodies are ignored; header folding is not
/// supported.
pub fn parse_request(raw: &str) -> Result<Request, MessageError> {
    let mut lines = raw.lines();
    let start = lines.next().ok_or(MessageError::MalformedStartLine)?;
    let mut parts = start.split_whitespace();
    let (method, uri, version) = (parts.next(), parts.next(), parts.next());
    match (method, uri, version) {
        (Some(method), Some(uri), Some(version)) if version.starts_with("SIP/") => Ok(Request {
            method: method.to_string(),
            uri: uri.to_string(),
            headers: parse_headers(lines),
        }),
        _ => Err(MessageError::MalformedStartLine),
    }
}

/// Parse a response from wire text.
pub fn parse_response(raw: &str) -> Result<Response, MessageError> {
    let mut lines = raw.lines();
    let start = lines.next().ok_or(MessageError::MalformedStartLine)?;
    let mut parts = start.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("SIP/") => {
            let status = code.parse().map_err(|_| MessageError::MalformedStartLine)?;
            let reason = start.splitn(3, ' ').nth(2).unwrap_or("").to_string();
            Ok(Response {
                status,
                reason,
                headers: parse_headers(lines),
            })
        }
        _ => Err(MessageError::MalformedStartLine),
    }
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some(colon) = line.find(':') {
            headers.push((
                line[..colon].trim().to_string(),
                line[colon + 1..].trim().to_string(),
            ));
        }
    }
    headers
}

/// Byte position of an ASCII needle in the haystack, ignoring ASCII case.
/// Positions refer to the haystack itself, so slicing at them is safe even
/// when the haystack contains multi-byte characters.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.len() > h.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

/// Extract the branch parameter from a Via header value.
pub fn via_branch(via: &str) -> Option<String> {
    let pos = find_ascii_ci(via, "branch=")?;
    let value = &via[pos + "branch=".len()..];
    let end = value
        .find(|c: char| c == ';' || c == ',' || c == ' ' || c == '\t')
        .unwrap_or(value.len());
    if end == 0 {
        return None;
    }
    Some(value[..end].to_string())
}

/// Extract the tag parameter from a From or To header value.
pub fn get_tag(header_value: &str) -> Option<String> {
    let pos = find_ascii_ci(header_value, "tag=")?;
    let value = &header_value[pos + "tag=".len()..];
    let end = value
        .find(|c: char| c == ';' || c == '>' || c == ' ' || c == '\t')
        .unwrap_or(value.len());
    if end == 0 {
        return None;
    }
    Some(value[..end].to_string())
}

/// Split a CSeq header value into sequence number and method.
fn cseq_parts(value: &str) -> Option<(u32, String)> {
    let mut parts = value.split_whitespace();
    let num = parts.next()?.parse().ok()?;
    let method = parts.next()?.to_string();
    Some((num, method))
}

/// RFC 3261 server transaction identifier.
///
/// Requests with a magic-cookie branch are matched on branch plus method
/// (§17.2.3; ACK maps to the INVITE it acknowledges). Requests from RFC 2543
/// elements have no usable branch, so their identity is assembled from the
/// Request-URI, From tag, Call-ID and CSeq.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServerTransactionId {
    Rfc3261 {
        branch: String,
        method: String,
    },
    Rfc2543 {
        uri: String,
        from_tag: Option<String>,
        call_id: String,
        cseq_num: u32,
        cseq_method: String,
    },
}

/// RFC 2543 ACK correlation key: like the 2543 transaction id but without the
/// CSeq method, since an ACK's own method would never equal the INVITE's.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckId2543 {
    pub uri: String,
    pub from_tag: Option<String>,
    pub call_id: String,
    pub cseq_num: u32,
}

/// Outcome of server-transaction-id derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerIdOutcome {
    Id(ServerTransactionId),
    /// An ACK whose branch predates RFC 3261; the caller must fall back to
    /// 2543 ACK matching against stored ack ids.
    Is2543Ack,
}

/// Derive the server transaction id of a request per RFC 3261 §17.2.3.
pub fn server_transaction_id(request: &Request) -> Result<ServerIdOutcome, MessageError> {
    let via = request.header("via").ok_or(MessageError::MissingVia)?;
    match via_branch(via) {
        Some(branch) if branch.starts_with(MAGIC_COOKIE) => {
            // An ACK belongs to the INVITE transaction it acknowledges.
            let method = if request.method == "ACK" {
                "INVITE".to_string()
            } else {
                request.method.clone()
            };
            Ok(ServerIdOutcome::Id(ServerTransactionId::Rfc3261 {
                branch,
                method,
            }))
        }
        _ if request.method == "ACK" => Ok(ServerIdOutcome::Is2543Ack),
        _ => {
            let (cseq_num, cseq_method) = request
                .header("cseq")
                .and_then(cseq_parts)
                .ok_or(MessageError::MalformedCseq)?;
            Ok(ServerIdOutcome::Id(ServerTransactionId::Rfc2543 {
                uri: request.uri.clone(),
                from_tag: request.header("from").and_then(get_tag),
                call_id: request
                    .header("call-id")
                    .ok_or(MessageError::MissingCallId)?
                    .to_string(),
                cseq_num,
                cseq_method,
            }))
        }
    }
}

/// Derive the RFC 2543 ACK correlation key of a request.
///
/// Computed for an INVITE when its server transaction is created, and for an
/// incoming ACK when the primary lookup misses.
pub fn server_transaction_ack_id_2543(request: &Request) -> Result<AckId2543, MessageError> {
    let (cseq_num, _) = request
        .header("cseq")
        .and_then(cseq_parts)
        .ok_or(MessageError::MalformedCseq)?;
    Ok(AckId2543 {
        uri: request.uri.clone(),
        from_tag: request.header("from").and_then(get_tag),
        call_id: request
            .header("call-id")
            .ok_or(MessageError::MissingCallId)?
            .to_string(),
        cseq_num,
    })
}

/// Derive the client transaction id `(branch, method)` of a response, from
/// its top Via branch and CSeq method.
pub fn client_transaction_id(response: &Response) -> Result<(String, String), MessageError> {
    let via = response.header("via").ok_or(MessageError::MissingVia)?;
    let branch = via_branch(via).ok_or(MessageError::MissingBranch)?;
    let (_, method) = response
        .header("cseq")
        .and_then(cseq_parts)
        .ok_or(MessageError::MalformedCseq)?;
    Ok((branch, method))
}

impl fmt::Display for ServerTransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerTransactionId::Rfc3261 { branch, method } => {
                write!(f, "3261/{}/{}", branch, method)
            }
            ServerTransactionId::Rfc2543 {
                uri,
                from_tag,
                call_id,
                cseq_num,
                cseq_method,
            } => write!(
                f,
                "2543/{}/{}/{}/{} {}",
                uri,
                from_tag.as_deref().unwrap_or("-"),
                call_id,
                cseq_num,
                cseq_method
            ),
        }
    }
}



/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    #[kani::proof]
    fn via_branch_never_panics() {
        let data: [u8; 24] = kani::any();
        if let Ok(s) = std::str::from_utf8(&data) {
            let _ = via_branch(s);
        }
    }

    #[kani::proof]
    fn get_tag_never_panics() {
        let data: [u8; 24] = kani::any();
        if let Ok(s) = std::str::from_utf8(&data) {
            let _ = get_tag(s);
        }
    }
}

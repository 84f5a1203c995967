//! SIP/SIPS URL parsing
//!
//! Covers the subset of RFC 3261 §19.1 the proxy configuration needs:
//! `scheme:[user[:password]@]host[:port][;params]`. Hosts are folded to
//! lowercase; the original text is kept alongside the parsed form so
//! diagnostics can show what was actually configured.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Sip,
    Sips,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Sip => "sip",
            Scheme::Sips => "sips",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,
    #[error("missing sip: or sips: scheme")]
    MissingScheme,
    #[error("missing host")]
    MissingHost,
    #[error("invalid port '{0}'")]
    InvalidPort(String),
    #[error("unterminated IPv6 reference")]
    UnterminatedIpv6,
}

/// A parsed SIP or SIPS URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipUrl {
    raw: String,
    scheme: Scheme,
    user: Option<String>,
    host: String,
    port: Option<u16>,
    params: Vec<(String, Option<String>)>,
}

impl SipUrl {
    /// The text this URL was parsed from, verbatim.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// User part, including any password portion, exactly as written.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Host, folded to lowercase.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn params(&self) -> &[(String, Option<String>)] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<Option<&str>> {
        self.params
            .iter()
            .find(|(k, _)| k == &name.to_lowercase())
            .map(|(_, v)| v.as_deref())
    }
}

impl fmt::Display for SipUrl {
    /// The original text, verbatim. Diagnostics must show what the operator
    /// actually configured, not the parsed rendition.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse a URL that must carry an explicit `sip:` or `sips:` scheme.
pub fn parse(input: &str) -> Result<SipUrl, UrlError> {
    if input.is_empty() {
        return Err(UrlError::Empty);
    }
    match detect_scheme(input) {
        Some((scheme, rest)) => parse_after_scheme(input, scheme, rest),
        None => Err(UrlError::MissingScheme),
    }
}

/// Parse a URL, assuming `default` as the scheme when none is written.
///
/// "example.org:5060" has no scheme; the colon introduces a port, not a
/// scheme, because only `sip:` and `sips:` are recognized.
pub fn parse_with_default_scheme(default: Scheme, input: &str) -> Result<SipUrl, UrlError> {
    if input.is_empty() {
        return Err(UrlError::Empty);
    }
    match detect_scheme(input) {
        Some((scheme, rest)) => parse_after_scheme(input, scheme, rest),
        None => parse_after_scheme(input, default, input),
    }
}

fn detect_scheme(input: &str) -> Option<(Scheme, &str)> {
    if let Some(prefix) = input.get(.."sips:".len()) {
        if prefix.eq_ignore_ascii_case("sips:") {
            return Some((Scheme::Sips, &input["sips:".len()..]));
        }
    }
    if let Some(prefix) = input.get(.."sip:".len()) {
        if prefix.eq_ignore_ascii_case("sip:") {
            return Some((Scheme::Sip, &input["sip:".len()..]));
        }
    }
    None
}

fn parse_after_scheme(raw: &str, scheme: Scheme, rest: &str) -> Result<SipUrl, UrlError> {
    let (addr, param_text) = match rest.find(';') {
        Some(i) => (&rest[..i], Some(&rest[i + 1..])),
        None => (rest, None),
    };

    let (user, hostport) = match addr.find('@') {
        Some(i) => (Some(addr[..i].to_string()), &addr[i + 1..]),
        None => (None, addr),
    };

    let (host, port) = split_hostport(hostport)?;
    if host.is_empty() {
        return Err(UrlError::MissingHost);
    }

    let mut params = Vec::new();
    if let Some(text) = param_text {
        for piece in text.split(';').filter(|p| !p.is_empty()) {
            match piece.find('=') {
                Some(i) => params.push((
                    piece[..i].to_lowercase(),
                    Some(piece[i + 1..].to_string()),
                )),
                None => params.push((piece.to_lowercase(), None)),
            }
        }
    }

    Ok(SipUrl {
        raw: raw.to_string(),
        scheme,
        user,
        host: host.to_lowercase(),
        port,
        params,
    })
}

fn split_hostport(hostport: &str) -> Result<(&str, Option<u16>), UrlError> {
    // IPv6 references keep their colons inside brackets.
    if let Some(inner) = hostport.strip_prefix('[') {
        let close = inner.find(']').ok_or(UrlError::UnterminatedIpv6)?;
        let host = &hostport[..close + 2];
        let tail = &inner[close + 1..];
        return match tail.strip_prefix(':') {
            Some(port) => Ok((host, Some(parse_port(port)?))),
            None if tail.is_empty() => Ok((host, None)),
            None => Err(UrlError::InvalidPort(tail.to_string())),
        };
    }

    match hostport.rfind(':') {
        Some(i) => Ok((&hostport[..i], Some(parse_port(&hostport[i + 1..])?))),
        None => Ok((hostport, None)),
    }
}

fn parse_port(text: &str) -> Result<u16, UrlError> {
    text.parse()
        .map_err(|_| UrlError::InvalidPort(text.to_string()))
}

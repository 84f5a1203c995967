pub mod messages;
pub mod url;

pub use messages::{
    parse_request, parse_response, AckId2543, MessageError, Request, Response,
    ServerIdOutcome, ServerTransactionId,
};
pub use url::{Scheme, SipUrl, UrlError};

//! Binding protocol codec.
//!
//! After the mutual TLS handshake with the relay ingress, the dialer sends one
//! [`ConnectRequest`] naming the bound endpoint and reads back one
//! [`ConnectResponse`]. Application bytes flow only after that exchange.
//!
//! Frame: `u16` little-endian body length, then the body. The body is a tiny
//! fixed schema of tagged fields (varints and length-delimited strings);
//! zero/empty fields are omitted and decode back as zero/empty.
//!
//! ```rust
//! use tom_binding::{ConnectRequest, ConnectResponse};
//!
//! # async fn example() -> Result<(), tom_binding::CodecError> {
//! let (mut client, mut relay) = tokio::io::duplex(1024);
//!
//! tom_binding::write_request(&mut client, &ConnectRequest::new("app.internal", 443)).await?;
//! let req = tom_binding::read_request(&mut relay).await?;
//! assert_eq!(req.host, "app.internal");
//!
//! tom_binding::write_response(&mut relay, &ConnectResponse::accepted("ep_123", "https")).await?;
//! let resp = tom_binding::read_response(&mut client).await?;
//! assert!(!resp.is_rejected());
//! # Ok(())
//! # }
//! ```

mod error;
mod frame;
mod message;
mod wire;

pub use error::{CodecError, Rejected};
pub use frame::{
    encode_frame, read_frame, read_request, read_response, write_frame, write_request,
    write_response, LENGTH_PREFIX_LEN, MAX_BODY_LEN,
};
pub use message::{ConnectRequest, ConnectResponse};
pub use wire::WireKind;

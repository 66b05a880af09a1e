use bytes::{Bytes, BytesMut};

use crate::wire::{put_string_field, put_varint_field, FieldReader};
use crate::{CodecError, Rejected};

const REQ_HOST: u64 = 1;
const REQ_PORT: u64 = 2;

const RESP_ENDPOINT_ID: u64 = 1;
const RESP_PROTO: u64 = 2;
const RESP_ERROR_CODE: u64 = 3;
const RESP_ERROR_MESSAGE: u64 = 4;

/// Sent by the dialer right after the TLS handshake: which bound endpoint
/// this connection is for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    pub host: String,
    pub port: u16,
}

impl ConnectRequest {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Encode the frame body (without the length prefix).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.host.len() + 8);
        put_string_field(&mut buf, REQ_HOST, &self.host);
        put_varint_field(&mut buf, REQ_PORT, u64::from(self.port));
        buf.freeze()
    }

    /// Decode a frame body. Absent fields decode as empty / zero.
    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        let mut req = Self::default();
        let mut reader = FieldReader::new(body);
        while let Some((field, value)) = reader.next_field()? {
            match field {
                REQ_HOST => req.host = value.into_string(field)?,
                REQ_PORT => {
                    let raw = value.into_u64(field)?;
                    req.port = u16::try_from(raw)
                        .map_err(|_| CodecError::OutOfRange { field, value: raw })?;
                }
                _ => {} // unknown fields are skipped
            }
        }
        Ok(req)
    }
}

/// The relay's answer to a [`ConnectRequest`].
///
/// A frame that decodes cleanly can still be a refusal: see
/// [`ConnectResponse::rejection`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectResponse {
    pub endpoint_id: String,
    pub proto: String,
    pub error_code: String,
    pub error_message: String,
}

impl ConnectResponse {
    /// Successful response for the given endpoint.
    pub fn accepted(endpoint_id: impl Into<String>, proto: impl Into<String>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            proto: proto.into(),
            ..Self::default()
        }
    }

    /// Refusal carrying an error code and message.
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: code.into(),
            error_message: message.into(),
            ..Self::default()
        }
    }

    pub fn is_rejected(&self) -> bool {
        !self.error_code.is_empty() || !self.error_message.is_empty()
    }

    pub fn rejection(&self) -> Option<Rejected> {
        self.is_rejected().then(|| Rejected {
            code: self.error_code.clone(),
            message: self.error_message.clone(),
        })
    }

    /// `Ok(self)` when the relay accepted the binding, `Err` otherwise.
    pub fn into_result(self) -> Result<Self, Rejected> {
        if self.is_rejected() {
            return Err(Rejected {
                code: self.error_code,
                message: self.error_message,
            });
        }
        Ok(self)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_string_field(&mut buf, RESP_ENDPOINT_ID, &self.endpoint_id);
        put_string_field(&mut buf, RESP_PROTO, &self.proto);
        put_string_field(&mut buf, RESP_ERROR_CODE, &self.error_code);
        put_string_field(&mut buf, RESP_ERROR_MESSAGE, &self.error_message);
        buf.freeze()
    }

    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        let mut resp = Self::default();
        let mut reader = FieldReader::new(body);
        while let Some((field, value)) = reader.next_field()? {
            match field {
                RESP_ENDPOINT_ID => resp.endpoint_id = value.into_string(field)?,
                RESP_PROTO => resp.proto = value.into_string(field)?,
                RESP_ERROR_CODE => resp.error_code = value.into_string(field)?,
                RESP_ERROR_MESSAGE => resp.error_message = value.into_string(field)?,
                _ => {}
            }
        }
        Ok(resp)
    }
}

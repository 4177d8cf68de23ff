use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Method, StatusCode};

use crate::hpack::DecoderError;

fn to_string(bytes: Bytes) -> Result<String, DecoderError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| DecoderError::InvalidUtf8)
}

/// An HPACK header field.
///
/// Pseudo headers are broken out into their own variants as they carry
/// typed values and are only legal in specific positions of a block.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Header {
    Field { name: HeaderName, value: HeaderValue },
    // TODO: Change these types to `http::uri` types.
    Authority(String),
    Method(Method),
    Scheme(String),
    Path(String),
    Status(StatusCode),
}

impl Header {
    /// Create a header from raw name and value octets, mapping pseudo header
    /// names onto their typed variants.
    pub fn new(name: Bytes, value: Bytes) -> Result<Header, DecoderError> {
        if name.is_empty() {
            return Err(DecoderError::InvalidRepresentation);
        }

        if name[0] == b':' {
            match &name[..] {
                b":authority" => {
                    let value = to_string(value)?;
                    Ok(Header::Authority(value))
                }
                b":method" => {
                    let method =
                        Method::from_bytes(&value).map_err(|_| DecoderError::InvalidRepresentation)?;
                    Ok(Header::Method(method))
                }
                b":scheme" => {
                    let value = to_string(value)?;
                    Ok(Header::Scheme(value))
                }
                b":path" => {
                    let value = to_string(value)?;
                    Ok(Header::Path(value))
                }
                b":status" => {
                    let status = StatusCode::from_bytes(&value)
                        .map_err(|_| DecoderError::InvalidStatusCode)?;
                    Ok(Header::Status(status))
                }
                _ => Err(DecoderError::InvalidPseudoheader),
            }
        } else {
            let name =
                HeaderName::from_lowercase(&name).map_err(|_| DecoderError::InvalidRepresentation)?;
            let value =
                HeaderValue::from_bytes(&value).map_err(|_| DecoderError::InvalidRepresentation)?;

            Ok(Header::Field { name, value })
        }
    }

    /// Returns the size of the header, as defined by RFC 7541 § 4.1: the sum
    /// of the octet lengths of its name and value plus 32.
    pub fn len(&self) -> usize {
        match *self {
            Header::Field {
                ref name,
                ref value,
            } => name.as_str().len() + value.len() + 32,
            Header::Authority(ref v) => 10 + v.len() + 32,
            Header::Method(ref v) => 7 + v.as_str().len() + 32,
            Header::Scheme(ref v) => 7 + v.len() + 32,
            Header::Path(ref v) => 5 + v.len() + 32,
            Header::Status(_) => 7 + 3 + 32,
        }
    }

    /// Returns the header name as wire octets.
    pub fn name(&self) -> &[u8] {
        match *self {
            Header::Field { ref name, .. } => name.as_str().as_bytes(),
            Header::Authority(..) => b":authority",
            Header::Method(..) => b":method",
            Header::Scheme(..) => b":scheme",
            Header::Path(..) => b":path",
            Header::Status(..) => b":status",
        }
    }

    /// Returns the header value as wire octets.
    pub fn value(&self) -> Bytes {
        match *self {
            Header::Field { ref value, .. } => Bytes::copy_from_slice(value.as_bytes()),
            Header::Authority(ref v) => Bytes::copy_from_slice(v.as_bytes()),
            Header::Method(ref v) => Bytes::copy_from_slice(v.as_str().as_bytes()),
            Header::Scheme(ref v) => Bytes::copy_from_slice(v.as_bytes()),
            Header::Path(ref v) => Bytes::copy_from_slice(v.as_bytes()),
            Header::Status(ref v) => Bytes::copy_from_slice(v.as_str().as_bytes()),
        }
    }

    /// Sensitive values must never be put in the dynamic table.
    pub fn is_sensitive(&self) -> bool {
        match *self {
            Header::Field { ref value, .. } => value.is_sensitive(),
            // Pseudo headers are never sensitive
            _ => false,
        }
    }
}

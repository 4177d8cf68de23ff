use std::fmt;

use bytes::{Bytes, BytesMut};
use http::header::{self, HeaderName, HeaderValue};
use http::{uri, HeaderMap, Method, Request, StatusCode, Uri};

use crate::frame::{util, Error, Frame, Head, Kind, StreamDependency, StreamId};
use crate::hpack;

/// Header frame
///
/// This could be either a request or a response.
#[derive(Eq, PartialEq)]
pub struct Headers {
    /// The ID of the stream with which this frame is associated.
    stream_id: StreamId,

    /// The stream dependency information, if any.
    stream_dep: Option<StreamDependency>,

    /// The decoded header fields
    fields: HeaderMap,

    /// Pseudo headers, these are broken out as they must be sent as part of the
    /// headers frame.
    pseudo: Pseudo,

    /// The associated flags
    flags: HeadersFlag,
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub struct HeadersFlag(u8);

#[derive(Debug, Default, Eq, PartialEq)]
pub struct Pseudo {
    // Request
    pub method: Option<Method>,
    pub scheme: Option<String>,
    pub authority: Option<String>,
    pub path: Option<String>,

    // Response
    pub status: Option<StatusCode>,
}

/// An iterator yielding a header block in encode order: pseudo headers first,
/// then the regular fields.
struct Iter {
    pseudo: Option<Pseudo>,
    fields: header::IntoIter<HeaderValue>,
    // The most recently yielded name; `IntoIter` elides the name for
    // repeated values of the same field.
    last_name: Option<HeaderName>,
}

const END_STREAM: u8 = 0x1;
const END_HEADERS: u8 = 0x4;
const PADDED: u8 = 0x8;
const PRIORITY: u8 = 0x20;
const ALL: u8 = END_STREAM | END_HEADERS | PADDED | PRIORITY;

// ===== impl Headers =====

impl Headers {
    /// Create a new HEADERS frame
    pub fn new(stream_id: StreamId, pseudo: Pseudo, fields: HeaderMap) -> Self {
        Headers {
            stream_id,
            stream_dep: None,
            fields,
            pseudo,
            flags: HeadersFlag::default(),
        }
    }

    /// Create a trailers frame: a header block with no pseudo headers.
    pub fn trailers(stream_id: StreamId, fields: HeaderMap) -> Self {
        let mut flags = HeadersFlag::default();
        flags.set_end_stream();

        Headers {
            stream_id,
            stream_dep: None,
            fields,
            pseudo: Pseudo::default(),
            flags,
        }
    }

    /// Loads the header frame but doesn't actually do HPACK decoding.
    ///
    /// HPACK decoding is done in the `load_hpack` step.
    pub fn load(head: Head, mut src: Bytes) -> Result<(Self, BytesMut), Error> {
        let flags = HeadersFlag::load(head.flag());

        if head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        if flags.is_padded() {
            let _ = util::strip_padding(&mut src)?;
        }

        let stream_dep = if flags.is_priority() {
            if src.len() < 5 {
                return Err(Error::PayloadLengthTooShort);
            }
            let dep = StreamDependency::load(&src[..5])?;

            // A stream cannot depend on itself. An endpoint MUST treat this
            // as a stream error (Section 5.4.2) of type `PROTOCOL_ERROR`.
            if dep.dependency_id() == head.stream_id() {
                return Err(Error::InvalidDependencyId);
            }

            let _ = src.split_to(5);
            Some(dep)
        } else {
            None
        };

        let headers = Headers {
            stream_id: head.stream_id(),
            stream_dep,
            fields: HeaderMap::new(),
            pseudo: Pseudo::default(),
            flags,
        };

        Ok((headers, BytesMut::from(&src[..])))
    }

    /// Decode the HPACK header block accumulated in `src` into this frame's
    /// pseudo headers and fields.
    ///
    /// Must only be called once the entire block (HEADERS plus any
    /// CONTINUATION frames) has been received.
    pub fn load_hpack(
        &mut self,
        src: &mut BytesMut,
        max_header_list_size: usize,
        decoder: &mut hpack::Decoder,
    ) -> Result<(), Error> {
        let mut err = false;
        let mut size = 0;
        let mut seen_regular = false;

        macro_rules! set_pseudo {
            ($field:ident, $val:expr) => {{
                if seen_regular || self.pseudo.$field.is_some() {
                    // Pseudo headers after a regular field, or a repeated
                    // pseudo header, malform the message.
                    err = true;
                } else {
                    self.pseudo.$field = Some($val);
                }
            }};
        }

        decoder.decode(src, |header| {
            use crate::hpack::Header::*;

            size += header.len();

            if size > max_header_list_size {
                tracing::debug!("header list too large; size={} max={}", size, max_header_list_size);
                err = true;
                return;
            }

            match header {
                Field { name, value } => {
                    seen_regular = true;
                    self.fields.append(name, value);
                }
                Authority(v) => set_pseudo!(authority, v),
                Method(v) => set_pseudo!(method, v),
                Scheme(v) => set_pseudo!(scheme, v),
                Path(v) => set_pseudo!(path, v),
                Status(v) => set_pseudo!(status, v),
            }
        })?;

        if err {
            return Err(Error::MalformedMessage);
        }

        Ok(())
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Returns `true` if the frame represents trailers
    ///
    /// Trailers are header frames that contain no pseudo headers.
    pub fn is_trailers(&self) -> bool {
        self.pseudo.method.is_none() && self.pseudo.status.is_none()
    }

    pub fn is_end_headers(&self) -> bool {
        self.flags.is_end_headers()
    }

    pub fn set_end_headers(&mut self) {
        self.flags.set_end_headers();
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags.is_end_stream()
    }

    pub fn set_end_stream(&mut self) {
        self.flags.set_end_stream()
    }

    pub fn is_informational(&self) -> bool {
        self.pseudo.status.map_or(false, |s| s.is_informational())
    }

    pub fn fields(&self) -> &HeaderMap {
        &self.fields
    }

    pub fn pseudo(&self) -> &Pseudo {
        &self.pseudo
    }

    pub fn into_parts(self) -> (Pseudo, HeaderMap) {
        (self.pseudo, self.fields)
    }

    /// Convert a received header block into an `http::Request`.
    ///
    /// Fails with `MalformedMessage` if mandatory pseudo headers are missing.
    pub fn into_request(self) -> Result<Request<()>, Error> {
        let mut b = Request::builder().version(http::Version::HTTP_2);

        let method = match self.pseudo.method {
            Some(method) => method,
            None => return Err(Error::MalformedMessage),
        };
        b = b.method(method);

        let mut parts = uri::Parts::default();

        if let Some(scheme) = self.pseudo.scheme {
            parts.scheme = Some(
                uri::Scheme::try_from(scheme.as_str()).map_err(|_| Error::MalformedMessage)?,
            );
        }

        if let Some(authority) = self.pseudo.authority {
            parts.authority = Some(
                uri::Authority::try_from(authority.as_str())
                    .map_err(|_| Error::MalformedMessage)?,
            );
        }

        match self.pseudo.path {
            Some(ref path) if !path.is_empty() => {
                parts.path_and_query = Some(
                    uri::PathAndQuery::try_from(path.as_str())
                        .map_err(|_| Error::MalformedMessage)?,
                );
            }
            // The `:path` pseudo header must be present and non-empty.
            _ => return Err(Error::MalformedMessage),
        }

        let uri = Uri::from_parts(parts).map_err(|_| Error::MalformedMessage)?;
        b = b.uri(uri);

        let mut request = b.body(()).map_err(|_| Error::MalformedMessage)?;
        *request.headers_mut() = self.fields;

        Ok(request)
    }

    /// Encode this frame, splitting the header block into CONTINUATION
    /// frames as needed so no frame exceeds `max_frame_size`.
    pub fn encode(self, encoder: &mut hpack::Encoder, dst: &mut BytesMut, max_frame_size: usize) {
        let stream_id = self.stream_id;
        let mut flags = self.flags;

        // Encode the entire header block up front; it is framed below.
        let mut block = BytesMut::new();
        let headers = Iter {
            pseudo: Some(self.pseudo),
            fields: self.fields.into_iter(),
            last_name: None,
        };
        encoder.encode(headers, &mut block);

        let mut rem = block.freeze();
        let mut first = true;

        loop {
            let len = rem.len().min(max_frame_size);
            let chunk = rem.split_to(len);
            let end_headers = rem.is_empty();

            if first {
                if end_headers {
                    flags.set_end_headers();
                } else {
                    flags.unset_end_headers();
                }
                let head = Head::new(Kind::Headers, flags.into(), stream_id);
                head.encode(chunk.len(), dst);
            } else {
                let flag = if end_headers { END_HEADERS } else { 0 };
                let head = Head::new(Kind::Continuation, flag, stream_id);
                head.encode(chunk.len(), dst);
            }

            dst.extend_from_slice(&chunk);

            if end_headers {
                break;
            }
            first = false;
        }
    }
}

impl From<Headers> for Frame {
    fn from(src: Headers) -> Self {
        Frame::Headers(src)
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("Headers");
        builder
            .field("stream_id", &self.stream_id)
            .field("flags", &self.flags);

        if let Some(ref dep) = self.stream_dep {
            builder.field("stream_dep", dep);
        }

        // `fields` and `pseudo` purposefully not included
        builder.finish()
    }
}

// ===== impl Pseudo =====

impl Pseudo {
    pub fn request(method: Method, uri: &Uri) -> Self {
        let path = uri
            .path_and_query()
            .map(|v| v.as_str().to_owned())
            .unwrap_or_else(|| "/".to_owned());

        let mut pseudo = Pseudo {
            method: Some(method),
            scheme: None,
            authority: None,
            path: Some(path),
            status: None,
        };

        // If the URI includes a scheme component, add it to the pseudo headers
        if let Some(scheme) = uri.scheme() {
            pseudo.set_scheme(scheme.as_str().to_owned());
        }

        // If the URI includes an authority component, add it to the pseudo
        // headers
        if let Some(authority) = uri.authority() {
            pseudo.set_authority(authority.as_str().to_owned());
        }

        pseudo
    }

    pub fn response(status: StatusCode) -> Self {
        Pseudo {
            method: None,
            scheme: None,
            authority: None,
            path: None,
            status: Some(status),
        }
    }

    pub fn set_scheme(&mut self, scheme: String) {
        self.scheme = Some(scheme);
    }

    pub fn set_authority(&mut self, authority: String) {
        self.authority = Some(authority);
    }
}

// ===== impl Iter =====

impl Iterator for Iter {
    type Item = hpack::Header;

    fn next(&mut self) -> Option<Self::Item> {
        use crate::hpack::Header::*;

        if let Some(ref mut pseudo) = self.pseudo {
            if let Some(method) = pseudo.method.take() {
                return Some(Method(method));
            }

            if let Some(scheme) = pseudo.scheme.take() {
                return Some(Scheme(scheme));
            }

            if let Some(authority) = pseudo.authority.take() {
                return Some(Authority(authority));
            }

            if let Some(path) = pseudo.path.take() {
                return Some(Path(path));
            }

            if let Some(status) = pseudo.status.take() {
                return Some(Status(status));
            }
        }

        self.pseudo = None;

        match self.fields.next() {
            Some((Some(name), value)) => {
                self.last_name = Some(name.clone());
                Some(Field { name, value })
            }
            Some((None, value)) => Some(Field {
                name: self
                    .last_name
                    .clone()
                    .expect("header iterator yielded a value before any name"),
                value,
            }),
            None => None,
        }
    }
}

// ===== impl HeadersFlag =====

impl HeadersFlag {
    pub fn empty() -> HeadersFlag {
        HeadersFlag(0)
    }

    pub fn load(bits: u8) -> HeadersFlag {
        HeadersFlag(bits & ALL)
    }

    pub fn is_end_stream(&self) -> bool {
        self.0 & END_STREAM == END_STREAM
    }

    pub fn set_end_stream(&mut self) {
        self.0 |= END_STREAM
    }

    pub fn is_end_headers(&self) -> bool {
        self.0 & END_HEADERS == END_HEADERS
    }

    pub fn set_end_headers(&mut self) {
        self.0 |= END_HEADERS
    }

    pub fn unset_end_headers(&mut self) {
        self.0 &= !END_HEADERS
    }

    pub fn is_padded(&self) -> bool {
        self.0 & PADDED == PADDED
    }

    pub fn is_priority(&self) -> bool {
        self.0 & PRIORITY == PRIORITY
    }
}

impl Default for HeadersFlag {
    /// Returns a `HeadersFlag` value with `END_HEADERS` set.
    fn default() -> Self {
        HeadersFlag(END_HEADERS)
    }
}

impl From<HeadersFlag> for u8 {
    fn from(src: HeadersFlag) -> u8 {
        src.0
    }
}

impl fmt::Debug for HeadersFlag {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        util::debug_flags(fmt, self.0)
            .flag_if(self.is_end_headers(), "END_HEADERS")
            .flag_if(self.is_end_stream(), "END_STREAM")
            .flag_if(self.is_padded(), "PADDED")
            .flag_if(self.is_priority(), "PRIORITY")
            .finish()
    }
}

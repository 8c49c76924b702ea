//! Read-only views over the payloads the host hands to a phase callback.
//!
//! A view is built fresh for each callback and borrows the host's data for the duration of
//! that callback only; filters that need the data later must copy it.

use {
    bytes::Bytes,
    http::{header::GetAll, HeaderMap, HeaderValue},
};

/// Common accessors for every header and trailer view.
pub trait HeaderView {
    /// The underlying header map.
    fn header_map(&self) -> &HeaderMap;

    /// The first value for `name`, if present and valid UTF-8.
    fn get(&self, name: &str) -> Option<&str> {
        self.header_map().get(name).and_then(|v| v.to_str().ok())
    }

    /// Every value for `name`, in the order the host supplied them.
    fn get_all(&self, name: &str) -> GetAll<'_, HeaderValue> {
        self.header_map().get_all(name)
    }

    fn contains(&self, name: &str) -> bool {
        self.header_map().contains_key(name)
    }

    /// The number of header entries, counting repeated names once per value.
    fn len(&self) -> usize {
        self.header_map().len()
    }

    fn is_empty(&self) -> bool {
        self.header_map().is_empty()
    }
}

macro_rules! header_view {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug)]
        pub struct $name<'a> {
            headers: &'a HeaderMap,
        }

        impl<'a> $name<'a> {
            pub fn new(headers: &'a HeaderMap) -> Self {
                Self { headers }
            }
        }

        impl HeaderView for $name<'_> {
            fn header_map(&self) -> &HeaderMap {
                self.headers
            }
        }
    };
}

header_view! {
    /// Request headers, seen in the decode-headers phase.
    RequestHeaders
}

header_view! {
    /// Request trailers, seen in the decode-trailers phase.
    RequestTrailers
}

header_view! {
    /// Response headers, seen in the encode-headers phase.
    ResponseHeaders
}

header_view! {
    /// Response trailers, seen in the encode-trailers phase.
    ResponseTrailers
}

impl ResponseHeaders<'_> {
    /// The numeric response status, when the host passes it as a `status` header.
    pub fn status(&self) -> Option<u16> {
        self.get("status").and_then(|s| s.parse().ok())
    }
}

/// A chunk of body data, seen in the decode-data and encode-data phases.
#[derive(Clone, Copy, Debug)]
pub struct BufferView<'a> {
    data: &'a Bytes,
}

impl<'a> BufferView<'a> {
    pub fn new(data: &'a Bytes) -> Self {
        Self { data }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    /// A cheap reference-counted copy of the chunk.
    pub fn to_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The chunk as text, with invalid UTF-8 replaced.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.data).into_owned()
    }
}

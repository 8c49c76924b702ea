//! The host's opaque request handle, and the raw enumerations that travel with it.

use std::{fmt, sync::Arc};

/// The identity of a request, as supplied by the proxy core.
///
/// The `id` is an opaque token: it is only ever compared and hashed, never interpreted. The
/// `worker_id` selects the registry shard owned by the worker thread that drives this request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    id: u64,
    worker_id: u32,
}

impl RequestKey {
    pub fn new(id: u64, worker_id: u32) -> Self {
        Self { id, worker_id }
    }

    /// The host's identity token for this request.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The worker thread that owns this request.
    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}@worker{}", self.id, self.worker_id)
    }
}

/// The handle passed by the host on every lifecycle callback.
///
/// Owned by the host for the lifetime of the request. The bridge keeps a copy of the
/// [`RequestKey`] for lookups, and must not use the handle after the destroy callback for it
/// has been processed.
#[derive(Clone, Debug)]
pub struct HostRequest {
    key: RequestKey,
    config_id: u64,
    plugin_name: Arc<str>,
}

impl HostRequest {
    pub fn new(key: RequestKey, config_id: u64, plugin_name: impl Into<Arc<str>>) -> Self {
        Self {
            key,
            config_id,
            plugin_name: plugin_name.into(),
        }
    }

    pub fn key(&self) -> RequestKey {
        self.key
    }

    pub fn config_id(&self) -> u64 {
        self.config_id
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }
}

/// Helper for the raw `u64` codes exchanged with the host.
macro_rules! raw_code_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident as $kind:literal {
            $($(#[$vmeta:meta])* $variant:ident = $code:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $code,)+
        }

        impl $name {
            /// The raw code understood by the host.
            pub fn code(self) -> u64 {
                self as u64
            }
        }

        impl TryFrom<u64> for $name {
            type Error = $crate::error::Error;
            fn try_from(code: u64) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok(Self::$variant),)+
                    _ => Err($crate::error::Error::InvalidCode { kind: $kind, code }),
                }
            }
        }
    };
}

pub(crate) use raw_code_enum;

raw_code_enum! {
    /// A point in the request pipeline at which the host calls into the bridge.
    pub enum Phase as "phase" {
        DecodeHeader = 1,
        DecodeData = 2,
        DecodeTrailer = 3,
        EncodeHeader = 4,
        EncodeData = 5,
        EncodeTrailer = 6,
    }
}

impl Phase {
    /// Whether this phase runs in the request (downstream to upstream) direction.
    pub fn is_decode(self) -> bool {
        matches!(
            self,
            Phase::DecodeHeader | Phase::DecodeData | Phase::DecodeTrailer
        )
    }

    /// Whether this phase carries a streamed body chunk.
    pub fn is_data(self) -> bool {
        matches!(self, Phase::DecodeData | Phase::EncodeData)
    }
}

raw_code_enum! {
    /// The host's access log event types.
    ///
    /// Only the downstream variants are meaningful for HTTP filters; the rest exist so that
    /// any code the host sends can be named in diagnostics.
    pub enum AccessLogType as "access log type" {
        NotSet = 0,
        TcpUpstreamConnected = 1,
        TcpPeriodic = 2,
        TcpConnectionEnd = 3,
        DownstreamStart = 4,
        DownstreamPeriodic = 5,
        DownstreamEnd = 6,
        UpstreamPoolReady = 7,
        UpstreamPeriodic = 8,
        UpstreamEnd = 9,
        DownstreamTunnelSuccessfullyEstablished = 10,
        UdpTunnelUpstreamConnected = 11,
        UdpPeriodic = 12,
        UdpSessionEnd = 13,
    }
}

raw_code_enum! {
    /// Why the host is tearing a request down.
    pub enum DestroyReason as "destroy reason" {
        Normal = 0,
        Terminate = 1,
    }
}

raw_code_enum! {
    /// Why a request's managed state is being released.
    pub enum FinalizeReason as "finalize reason" {
        /// The host destroyed the request before its state was released.
        Normal = 0,
        /// The state was released without a destroy callback ever being observed.
        Abandoned = 1,
    }
}

//! Bookkeeping for filter failures caught at a dispatcher entry.

use {crate::error::HostError, std::any::Any};

/// A failure caught on a request whose terminal reply has not been delivered yet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PanicInfo {
    pub(crate) panicked: bool,
    pub(crate) details: String,
}

impl PanicInfo {
    pub fn panicked(&self) -> bool {
        self.panicked
    }

    pub fn details(&self) -> &str {
        &self.details
    }
}

/// What a caught panic payload means for the request.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PanicKind {
    /// The filter hit a host call for a request that is already gone; nothing to reply to.
    RequestGone,
    /// The host could not take a reply from where the panic happened; defer it.
    NotInFilterContext,
    /// Any other failure, with its description.
    Failure(String),
}

/// Classify a payload returned by [`std::panic::catch_unwind`].
pub(crate) fn classify(payload: &(dyn Any + Send)) -> PanicKind {
    if let Some(err) = payload.downcast_ref::<HostError>() {
        return match err {
            HostError::RequestFinished | HostError::FilterDestroyed => PanicKind::RequestGone,
            HostError::NotInFilterContext => PanicKind::NotInFilterContext,
            other => PanicKind::Failure(other.to_string()),
        };
    }
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return PanicKind::Failure((*msg).to_owned());
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return PanicKind::Failure(msg.clone());
    }
    PanicKind::Failure("filter panicked with a non-string payload".to_owned())
}

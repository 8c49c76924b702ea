//! Filter directives.

use crate::handle::raw_code_enum;

raw_code_enum! {
    /// The directive a filter returns from a phase callback, telling the host how to proceed.
    ///
    /// The numeric values are the codes the host's filter-chain state machine understands.
    pub enum Status as "status" {
        /// The filter is handling the phase asynchronously and will call
        /// [`HttpRequest::continue_request`][crate::request::HttpRequest::continue_request]
        /// later.
        Running = 0,
        /// A local reply has been sent; the host must not continue the chain.
        LocalReply = 1,
        Continue = 2,
        /// Stop iteration and buffer body data until more arrives.
        StopAndBuffer = 3,
        /// Like [`Status::StopAndBuffer`], but subject to the host's buffer watermarks.
        StopAndBufferWatermark = 4,
        StopNoBuffer = 5,
    }
}

impl Status {
    /// Whether this directive asks the host to wait for more body data.
    ///
    /// Returning one of these on an end-of-stream event is a contract violation, since no
    /// more data will ever arrive.
    pub fn waits_for_data(self) -> bool {
        matches!(self, Status::StopAndBuffer | Status::StopAndBufferWatermark)
    }
}

impl From<Status> for u64 {
    fn from(status: Status) -> u64 {
        status.code()
    }
}

//! Lifecycle and concurrency bridge between a multithreaded proxy core and per-request HTTP
//! filters.
//!
//! The proxy core (the [`Host`]) drives each request through a fixed series of callbacks on
//! a [`Bridge`]: header, data and trailer phases in both directions, access log events, and a
//! final destroy. The bridge keeps one [`HttpRequest`] per live request in a registry sharded
//! by worker thread, routes each callback to that request's [`StreamFilter`], and contains
//! filter panics so a failing filter ends its own request with a `500` local reply instead of
//! taking the worker down.

// When building the project in release mode:
//   (1): Promote warnings into errors.
//   (2): Deny broken documentation links.
//   (3): Deny invalid codeblock attributes in documentation.
//   (4): Promote warnings in examples into errors, except for unused variables.
#![cfg_attr(not(debug_assertions), deny(warnings))]
#![cfg_attr(not(debug_assertions), deny(clippy::all))]
#![cfg_attr(not(debug_assertions), deny(rustdoc::broken_intra_doc_links))]
#![cfg_attr(not(debug_assertions), deny(rustdoc::invalid_codeblock_attributes))]
#![cfg_attr(not(debug_assertions), doc(test(attr(deny(warnings)))))]
#![cfg_attr(not(debug_assertions), doc(test(attr(allow(dead_code)))))]
#![cfg_attr(not(debug_assertions), doc(test(attr(allow(unused_variables)))))]

pub mod concurrency;
pub mod config;
pub mod error;
pub mod factory;
pub mod filter;
pub mod handle;
pub mod host;
pub mod logging;
pub mod registry;
pub mod request;
pub mod status;
pub mod views;

mod dispatch;

pub use {
    dispatch::Bridge,
    error::{Error, HostError},
    factory::{FilterFactories, PluginBuilder},
    filter::{FilterFactory, PassThroughFilter, StreamFilter},
    handle::{AccessLogType, DestroyReason, FinalizeReason, HostRequest, Phase, RequestKey},
    host::{Host, LocalReply},
    request::{HttpRequest, Lifecycle},
    status::Status,
};

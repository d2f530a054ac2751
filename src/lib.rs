//! Blocking clipboard access on top of an asynchronous clipboard service.
//!
//! - [`bridge`]: the nested-wait [`bridge::SyncBridge`] and its
//!   [`bridge::EventLoop`].
//! - [`backend`]: the asynchronous platform clipboards it drives.
//! - [`clipboard`]: the typed facade applications use.
//! - [`service`] and [`ipc`]: the clipboard service daemon and its wire
//!   protocol.

pub mod backend;
pub mod bridge;
pub mod clipboard;
pub mod ipc;
pub mod service;

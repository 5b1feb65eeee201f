//! Protocol-facing types.
//!
//! This module defines:
//! - HTTP method/version/header primitives shared with the external codec
//! - Request/response head records captured per stream
//! - The decoded-message contract between codec and connection

pub mod message;
pub mod types;

pub use message::{InboundMessage, OutboundMessage, WsFrame};
pub use types::{Headers, HttpVersion, Method, RequestHead, ResponseHead};

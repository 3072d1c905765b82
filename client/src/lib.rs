//! # Turnstile Client
//!
//! Real-time queue and seat coordination client for the Turnstile ticketing
//! storefront.
//!
//! The storefront keeps users in a virtual waiting line before a ticket sale
//! opens, then walks them through seat selection and payment inside a timed
//! window. This crate is the client-side coordination layer that makes that
//! work:
//!
//! - [`connection`] - one persistent multiplexed WebSocket (STOMP subset)
//!   connection shared by every consumer, with explicit reconnect handling
//! - [`queue`] - queue position reconciled from REST snapshots and live
//!   broadcasts, plus one-shot personal lifecycle events
//! - [`seats`] - a bounded log of seat status changes and a pure
//!   reconciliation fold over a seat list
//! - [`flow`] - the waiting → ready → purchase → payment state machine with
//!   the 15-minute purchase countdown
//! - [`exit`] - interception of leave attempts while a queue slot is held,
//!   releasing the slot back to the end of the line
//! - [`api`] - thin typed REST layer over the backend's response envelope
//!
//! Presentation is out of scope: the crate exposes reconciled state over
//! `watch` channels and navigation instructions through an injected
//! [`environment::Navigator`], and the embedding shell renders them.

pub mod api;
pub mod config;
pub mod connection;
pub mod environment;
pub mod error;
pub mod exit;
pub mod flow;
pub mod queue;
pub mod seats;
pub mod stomp;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};

//! inbox-poller - Vendor mailbox poller for purchasing
//!
//! This crate ingests vendor email, links it to open purchase orders,
//! extracts shipping and risk signals, processes document attachments and
//! applies vendor replies to invoice disputes.

pub mod config;
pub mod domain;
pub mod providers;
pub mod services;
pub mod storage;

pub use services::{PollerService, RunSummary};

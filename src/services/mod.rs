//! Business services layer.
//!
//! This module contains the poll pipeline: fetching, normalization,
//! correlation, signal extraction, dispute handling and attachment
//! processing, coordinated by [`PollerService`].
//!
//! # Architecture
//!
//! ```text
//! PollerService::run_cycle
//!          |
//!          v
//!    sync_service  ->  normalizer  ->  correlation_service
//!                                          |
//!                                          v
//!                   signal_service, dispute_service, attachment_service
//!          |
//!          v
//! Infrastructure (Providers, Storage)
//! ```
//!
//! Every service call takes a [`PollContext`] carrying the database, the
//! settings and the cycle's fixed `now`.

pub mod attachment_service;
pub mod classifier;
mod context;
pub mod correlation_service;
pub mod dispute_service;
pub mod normalizer;
mod poller_service;
pub mod signal_service;
pub mod stock_alert;
pub mod sync_service;

pub use context::PollContext;
pub use poller_service::{PollError, PollResult, PollerService, RunSummary};
pub use sync_service::{FetchFailure, FetchOptions, FetchStrategy, FetchedBatch, FullFetchReason};

//! Concurrent execution of many rollouts.
//!
//! ```text
//!            Vec<RolloutJob>
//!                  │
//!           ┌──────▼───────┐
//!           │  WorkerPool  │  at most max_workers in flight
//!           └──────┬───────┘
//!        ┌─────────┼─────────┐
//!        ▼         ▼         ▼
//!   coordinator coordinator coordinator   (one per rollout, isolated)
//!        └─────────┼─────────┘
//!                  ▼
//!        RateLimitedProvider (model-call cap)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use trajforge::scheduler::{RolloutJob, WorkerPool};
//!
//! let pool = WorkerPool::new(64, coordinator);
//! let shutdown = pool.shutdown_handle();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     shutdown.trigger();
//! });
//! let report = pool.run(jobs).await;
//! ```

pub mod worker_pool;

pub use worker_pool::{PoolReport, PoolStats, RolloutJob, ShutdownHandle, WorkerPool};

//! Story-driven delivery pipeline.
//!
//! A story moves through three phases (spec, execution, QA). Any failure is
//! handed to the recovery system, which decides whether to retry, roll back,
//! skip or escalate. Each phase is a [`executor::PhaseExecutor`] and talks to
//! the outside world only through the capabilities in [`capability`].

pub mod capability;
pub mod checklist;
pub mod config;
pub mod context;
pub mod errors;
pub mod execution;
pub mod executor;
pub mod logging;
pub mod pipeline;
pub mod qa;
pub mod recovery;
pub mod spec_pipeline;
pub mod util;

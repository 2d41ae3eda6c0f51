//! Core runtime components.
//!
//! This module contains the scheduler and the task model it drives:
//! - the builder that configures a scheduler,
//! - the main loop and its ready queue,
//! - the per-task context and the suspension protocol behind it.

mod core;
mod ready_queue;
mod suspend;

pub(crate) mod builder;
pub(crate) mod context;

pub mod task;

pub use builder::SchedulerBuilder;
pub use context::Ctx;
pub use core::Scheduler;

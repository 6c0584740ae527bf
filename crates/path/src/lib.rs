//! stepkit task paths.
//!
//! A [`TaskPath`] drives a task's navigators forward and back, fetches
//! subtasks through a [`TaskRepository`], and starts and stops the
//! [`AsyncAction`]s declared by the task at step boundaries.

#![warn(missing_docs)]

mod action;
mod config;
mod controller;
mod error;
mod path;
mod registry;
mod task;

pub use action::{AsyncAction, AsyncActionConfiguration, AsyncActionFactory, AsyncActionStatus};
pub use config::PathConfig;
pub use controller::{FinishReason, TaskController, TaskRepository};
pub use error::{AsyncActionError, PathError, Result};
pub use path::TaskPath;
pub use task::{Task, TaskDefinition};

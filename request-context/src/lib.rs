//! Per-request context construction for HTTP executors.
//!
//! For every request the [`builder::ContextBuilder`] merges the path, form,
//! query and route-setting parameters into one read-only
//! [`view::ParameterView`] and creates the [`state::RequestState`] that
//! carries the correlation id, logger span and timing of that request. The
//! [`adapter::ContextHandler`] then runs the route's [`adapter::Executor`]
//! and turns its result into a classified [`reply::Reply`].

pub mod adapter;
pub mod builder;
pub mod config;
pub mod correlation;
pub mod errors;
pub mod extensions;
pub mod input;
pub mod metrics_defs;
pub mod reply;
pub mod service;
pub mod state;
pub mod transport;
pub mod view;

pub use adapter::{ContextHandler, Executor, Handled, MaskingPolicy};
pub use builder::ContextBuilder;
pub use errors::{ContextError, HandlerError};
pub use reply::{Outcome, Reply};
pub use service::ContextService;
pub use state::RequestState;
pub use view::ParameterView;

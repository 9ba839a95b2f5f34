//! Policy composition: event correlation and policy dispatch for
//! storage-server interception points.
//!
//! The host server calls into the engine at every interception point. The
//! [`event::classifier`] turns each call into canonical events, correlating
//! open/close pairs through the per-session [`event::session::SessionContext`].
//! The [`policy::PolicyDispatcher`] routes each event to the configured
//! policies whose clauses and [`conditional`]s match. Policies are named units
//! of behavior in a [`policy::PolicyRegistry`]; the built-in ones live in
//! [`policies`] and reach the host only through the collaborator traits in
//! [`services`].
//!
//! A host embedding the engine loads a [`config::Config`], installs
//! [`logging::init_production`] for its lifetime, and feeds every call to a
//! [`handler::EventHandler`].
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod conditional;
pub mod config;
pub mod document;
pub mod error;
pub mod event;
pub mod handler;
pub mod logging;
pub mod policies;
pub mod policy;
pub mod query;
pub mod retention;
pub mod services;
pub mod verification;

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub(crate) mod api;
pub mod app;
pub mod cache;
pub mod clients;
pub mod config;
pub mod domain;
pub mod observability;
pub mod pipeline;
pub mod session;
pub mod slots;
pub mod util;

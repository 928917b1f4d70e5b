#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub(crate) mod api;
pub mod app;
pub(crate) mod clients;
pub mod clustering;
pub mod config;
pub mod observability;
pub(crate) mod pipeline;
pub(crate) mod store;
pub(crate) mod util;

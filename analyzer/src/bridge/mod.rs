//! HTTP surface of the analysis service.

pub mod form;
pub mod server;

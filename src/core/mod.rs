//! Core data models shared by the router, the process hosts and the dispatcher

#![allow(dead_code)]

mod envelope;
mod request;

pub use envelope::*;
pub use request::*;

// src/lib.rs — Library root for Sparrow

pub mod backend;
pub mod chat;
pub mod cli;
pub mod infra;

//! Core run orchestration and domain logic for feedlinks.
//!
//! This crate ties together fetching, query matching, deduplication against
//! the link history, and the wikitext merge into one batch run
//! ([`pipeline::run`]).

pub mod aggregate;
pub mod matcher;
pub mod merge;
pub mod pipeline;
pub mod source;

//! Test fixtures for Tessera development.
//!
//! Provides region-local data kinds with easily checked merge/split
//! behaviour ([`Counter`], [`SectionCounter`], [`Deadlines`]) and a
//! [`Fixtures`] registry bundling all three.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

pub use fixtures::{Counter, Deadlines, Fixtures, SectionCounter};

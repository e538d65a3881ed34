//! Merge pipeline stages.
//!
//! Each submodule is one stage; the orchestrator in [`crate::merge`] wires
//! them together:
//!
//! ```text
//!   request ──▶ fields ──▶ docx / markup ──▶ sanitize ──▶ convert ──▶ bytes
//!              (contract)   (rendering)      (untrusted    (format
//!                                             HTML only)    chain)
//! ```
//!
//! Stages are independent of storage and of each other: every one takes
//! bytes or a JSON payload and returns bytes or a [`crate::error::MergeError`].

pub mod convert;
pub mod docx;
pub mod fields;
pub mod markup;
pub mod sanitize;

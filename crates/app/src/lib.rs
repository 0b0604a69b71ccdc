//! trieq command-line front end
//!
//! The binary lives in `src/cli/main.rs`; the reports it prints are built
//! here so they can be tested without a terminal.

pub mod report;

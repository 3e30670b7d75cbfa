//! Crate-level tests spanning several modules.

mod ranking;

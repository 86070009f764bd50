//! Test modules for the sandbox crate.

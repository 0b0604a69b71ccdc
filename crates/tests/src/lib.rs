//! Cross-crate integration tests for trieq

#[cfg(test)]
mod eq_integration;

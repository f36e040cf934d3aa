//! Shared test doubles for `ragloom-foundation` integration tests.
//!
//! Each test binary includes this module with `mod common;` and uses only
//! the parts it needs.

#![allow(dead_code)]

pub mod doubles;
pub mod mock_llm;

pub use doubles::{BagOfWordsEmbedder, OneHotEmbedder, fixed_clock, whitespace};
pub use mock_llm::MockLLM;

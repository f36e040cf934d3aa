//! Ragloom kernel
//!
//! Contracts and core data shared by every ragloom component: the error
//! taxonomy, the node model, the callback vocabulary, collaborator traits,
//! chat memory, and the workflow event model.

// error module
pub mod error;
pub use error::{ErrorKind, KernelError, KernelResult};

// node & document model
pub mod schema;
pub use schema::{
    Document, Metadata, MetadataMode, Node, NodeRelationship, NodeWithScore, ObjectType,
    QueryBundle, RelatedNodeInfo,
};

pub mod prompt;

// callback vocabulary
pub mod callbacks;

// collaborator contracts (LLM, embeddings, tokenizer, clock, tools)
pub mod llm;

// chat memory
pub mod memory;

// workflow events and retry policy
pub mod workflow;

// typed settings tree
pub mod settings;

// config loader
#[cfg(feature = "config")]
pub mod config;

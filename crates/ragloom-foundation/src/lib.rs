//! Ragloom foundation
//!
//! Implementations on top of `ragloom-kernel`: the callback manager, node
//! parsers, metadata extractors, the object index, the workflow engine,
//! chat memory buffers and retrieval postprocessors.

// callbacks module - trace tree and sinks
pub mod callbacks;

// similarity helpers shared by retrieval code
pub mod similarity;

// node_parser module - documents to ordered, linked nodes
pub mod node_parser;

// extractors module - LLM-backed metadata enrichment
pub mod extractors;

// object_index module - typed objects retrieved by embedding similarity
pub mod object_index;

// workflow module - event-driven dispatcher
pub mod workflow;

// memory module - chat history buffers
pub mod memory;

// postprocessor module - reranking and filtering of retrieved nodes
pub mod postprocessor;

// logging bootstrap
pub mod logging;

pub use callbacks::{CallbackManager, DebugCallbackHandler, TracingCallbackHandler};
pub use extractors::ExtractorChain;
pub use logging::init_logging;
pub use memory::{SimpleMemory, SummaryBufferMemory, TokenBufferMemory};
pub use node_parser::{SentenceSplitter, TokenTextSplitter};
pub use object_index::{ObjectIndex, ObjectRetriever};
pub use postprocessor::{NodePostprocessor, PostprocessorChain};
pub use workflow::{Context, RunHandle, Workflow};

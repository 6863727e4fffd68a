pub mod backend;
pub mod chain;
pub mod chat_service;
pub mod chunker;
pub mod extractor;
pub mod indexing_service;
pub mod llm;
pub mod monitor;
pub mod normalizer;
pub mod processor;
pub mod task_queue;
pub mod text_extraction;
pub mod vector_store;

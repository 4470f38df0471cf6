pub mod export;
pub mod gateway;
pub mod image;
pub mod llm;
pub mod parser;
pub mod prompt;
pub mod workflow;

#![forbid(unsafe_code)]

pub mod classifier;
pub mod cli;
pub mod contract;
pub mod event;
pub mod gemini;
pub mod harvest;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod server;
pub mod splitter;
pub mod storage;
pub mod structurer;
pub mod taxonomy;

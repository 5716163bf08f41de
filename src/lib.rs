pub mod attention;
pub mod beam_search;
pub mod config;
pub mod data_loader;
pub mod evaluation;
pub mod metrics;
pub mod model;
pub mod scheduler;
pub mod tokenizer;
pub mod training;

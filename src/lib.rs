pub mod backup;
pub mod batching;
pub mod configs;
pub mod control;
pub mod error;
pub mod prompts;
pub mod records;
pub mod runner;
pub mod table;
pub mod translations;
pub mod translators;

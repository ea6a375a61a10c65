pub mod agent;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod llm;
pub mod protocol;
pub mod scheduler;
pub mod skills;
pub mod store;
pub mod workspace;

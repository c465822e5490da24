pub mod browser;
pub mod config;
pub mod crawler;
pub mod output;
pub mod subgraph;

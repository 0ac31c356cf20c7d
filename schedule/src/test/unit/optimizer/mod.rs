pub mod apply_opt;
pub mod config;
pub mod heuristics;
pub mod program;
pub mod search;
pub mod tc;

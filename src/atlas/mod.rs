pub mod cache;
pub mod fallback;
pub mod inflight;
pub mod service;

pub mod client;
pub mod overpass;
pub mod retry;

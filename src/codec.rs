pub mod http;
pub mod payload;

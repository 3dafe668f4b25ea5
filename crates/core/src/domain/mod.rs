pub mod inquiry;
pub mod quote;
pub mod service;

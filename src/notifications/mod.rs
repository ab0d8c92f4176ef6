pub mod senders;
pub mod service;

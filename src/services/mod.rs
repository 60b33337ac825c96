pub mod cache;
pub mod dispatcher;
pub mod extensions;
pub mod fingerprint;
pub mod manifest;
pub mod queue;
pub mod store;
pub mod worker;

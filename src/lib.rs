pub mod config;
pub mod frame;
pub mod receiver;
pub mod reporter;
pub mod sender;
pub mod shutdown;
pub mod socket;
pub mod stats;
pub mod tracker;

pub mod alloc;
pub mod client;
pub mod disk_format;
pub mod dispatch;
pub mod error;
pub mod mfs;
pub mod protocol;
pub mod server;
pub mod storage;

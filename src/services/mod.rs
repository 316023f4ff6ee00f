pub mod batch;
pub mod config;
pub mod encoding;
pub mod log;
pub mod patcher;
pub mod pipeline;
pub mod providers;
pub mod retry;
pub mod session;
pub mod signing;
pub mod storage;
pub mod translator;

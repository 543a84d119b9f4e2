pub mod logger;
pub mod pidfile;
pub mod worker;

pub use logger::LoggerFeature;
pub use pidfile::PidFileFeature;
pub use worker::WorkerFeature;

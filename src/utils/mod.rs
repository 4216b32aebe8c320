pub mod logging;
pub mod retry;

pub use logging::init_logging;
pub use retry::RetryPolicy;

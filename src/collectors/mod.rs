pub mod types;
pub mod nagios;
pub mod dummy;

pub use types::*;
pub use nagios::{NagiosApi, NagiosCollector, StatusSource};
pub use dummy::DummyCollector;

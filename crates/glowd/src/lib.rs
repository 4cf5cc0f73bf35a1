pub mod adapters;
pub mod api;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod registry;
pub mod weather;

pub use config::format_diagnostics;
pub use config::Config;
pub use config::Diagnostic;
pub use config::Diagnostics;
pub use config::LogLevel;
pub use engine::Engine;
pub use engine::EngineHandle;
pub use engine::LightState;
pub use engine::Rgb;
pub use error::ControlError;
pub use error::VendorError;
pub use registry::Capability;
pub use registry::Registry;
pub use registry::Vendor;

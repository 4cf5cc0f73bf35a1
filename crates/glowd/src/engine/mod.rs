mod engine;
mod handle;
mod message;
mod preset;
mod scores;
pub mod state;

pub use engine::Engine;
pub use handle::EngineHandle;
pub use message::EngineInfo;
pub use message::LightStatus;
pub use preset::Preset;
pub use preset::PresetTable;
pub use preset::PresetTarget;
pub use preset::OFF_PRESET;
pub use scores::score_brightness;
pub use scores::Alert;
pub use state::LightState;
pub use state::Rgb;
pub use state::StateStore;
pub use state::MAX_BRIGHTNESS;

#[cfg(test)]
pub(crate) use engine::tests;

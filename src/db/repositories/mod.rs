pub mod settings;
pub mod snapshots;

pub use settings::SettingsRepository;
pub use snapshots::SnapshotRepository;

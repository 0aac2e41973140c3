//! Snapcut Export Model
//!
//! Defines the data contracts shared by the export engine and its callers:
//! - **Settings:** Resolution, codecs, container, and bitrates of one export
//! - **Presets:** Static platform catalog mapping names to settings
//! - **Progress:** Ordered status events emitted over the life of an export
//! - **Project:** The read-only timeline view the engine renders from
//!
//! Settings are validated up front so incompatible codec/container
//! combinations fail before any output file is created.

pub mod preset;
pub mod progress;
pub mod project;
pub mod settings;

pub use preset::*;
pub use progress::*;
pub use project::*;
pub use settings::*;

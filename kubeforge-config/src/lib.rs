//! Configuration loading for the kubeforge backend.
//!
//! Values are resolved in layers, later layers winning: built-in defaults,
//! a TOML file, the environment (`KUBEFORGE_*`, with `.env` support) and
//! finally command-line flags. The result is validated before it is handed
//! to the engine as a [`BackendConfig`](kubeforge_core::BackendConfig).

pub mod cli;
pub mod layer;
pub mod loader;
pub mod sources;
pub mod validation;

pub use cli::ConfigArgs;
pub use layer::ConfigLayer;
pub use loader::{ConfigLoadError, ConfigLoader};
pub use sources::{EnvConfig, FileConfig};
pub use validation::{ConfigGuardRailError, validate};

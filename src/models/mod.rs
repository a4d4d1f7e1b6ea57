pub mod download;
pub mod manager;
pub mod registry;
pub mod resolver;

pub use download::{HttpFetcher, ModelFetcher};
pub use manager::{ModelManager, ModelSpec};
pub use registry::{ModelEntry, Registry, RegistryStore};
pub use resolver::{check_collision, resolve, NameIndex};

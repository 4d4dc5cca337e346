// Adapters layer: concrete implementations of the domain ports (camera,
// storage, object stores, system commands).

pub mod camera;
pub mod object_store;
pub mod ppm;
pub mod storage;
pub mod system;

pub use camera::{CommandCamera, PpmDirectorySource, SyntheticScene, SyntheticSource};
pub use object_store::DirectoryObjectStore;
pub use storage::ImageStorage;
pub use system::{SysinfoDiskSpace, SystemCommandRunner};

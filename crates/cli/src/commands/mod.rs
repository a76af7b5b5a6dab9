pub mod attach;
pub mod build;
pub mod services;
pub mod version;

pub use attach::AttachArgs;
pub use build::BuildArgs;
pub use services::ServicesArgs;
pub use version::VersionArgs;

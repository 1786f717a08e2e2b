pub mod config;
pub mod container;
pub mod http;
pub mod logging;
pub mod server;

pub use config::Config;
pub use container::{ContainerError, ContainerWriter, RawContainerWriter};
pub use http::{create_router, AppError, AppResult, AppState};
pub use server::Server;

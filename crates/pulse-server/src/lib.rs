pub mod admission;
pub mod broadcaster;
pub mod registry;
pub mod server;
pub mod session;

pub use admission::{Caller, IdentityProvider, RoleAllowList, StaticTokenProvider};
pub use broadcaster::Broadcaster;
pub use registry::ConnectionRegistry;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};

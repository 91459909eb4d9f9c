pub mod context;
pub mod http;
pub mod listener;
pub mod mdns;
pub mod resource;

pub use context::ServerContext;
pub use listener::{bind, run, serve};
pub use mdns::{NullAnnouncer, ServiceAnnouncer};
pub use resource::{Resource, ResourceTable};

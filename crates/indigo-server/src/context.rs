use std::sync::Arc;

use slog::Logger;

use indigo_core::Bus;
use indigo_support::config::ServerConfig;

use crate::resource::ResourceTable;

pub struct ServerContext {
    pub bus: Arc<Bus>,
    pub resources: ResourceTable,
    pub config: ServerConfig,
    pub log: Logger,
}

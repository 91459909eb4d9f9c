//! Service discovery is out of scope for this workspace (no Bonjour/mDNS
//! responder is implemented here); this trait is the seam a real responder
//! plugs into. `NullAnnouncer` logs the intent and does nothing else, which
//! keeps the server usable on hosts with no mDNS stack at all.

use slog::Logger;

pub trait ServiceAnnouncer: Send + Sync {
    fn announce(&self, name: &str, port: u16);
    fn withdraw(&self);
}

pub struct NullAnnouncer {
    log: Logger,
}

impl NullAnnouncer {
    pub fn new(log: Logger) -> NullAnnouncer {
        NullAnnouncer { log }
    }
}

impl ServiceAnnouncer for NullAnnouncer {
    fn announce(&self, name: &str, port: u16) {
        slog::debug!(self.log, "mdns advertisement skipped (no announcer configured)"; "name" => name, "port" => port);
    }

    fn withdraw(&self) {}
}

//! Accept loop (C6): one kernel thread per accepted connection, protocol
//! picked by sniffing the first byte exactly as the original server's
//! worker-thread entry point does (`<` XML, `{` JSON, `G`/`P` HTTP).

use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use slog::Logger;

use indigo_core::Bus;
use indigo_support::config::ServerConfig;

use crate::context::ServerContext;
use crate::http;
use crate::mdns::ServiceAnnouncer;
use crate::resource::ResourceTable;

/// Binds the listening socket without entering the accept loop, so callers
/// (tests, or a supervisor wanting to know the actual ephemeral port) can
/// inspect `local_addr()` before serving.
pub fn bind(config: &ServerConfig) -> io::Result<TcpListener> {
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    TcpListener::bind(&addr)
}

pub fn run(
    bus: Arc<Bus>,
    config: ServerConfig,
    resources: ResourceTable,
    announcer: Arc<dyn ServiceAnnouncer>,
    log: Logger,
) -> io::Result<()> {
    let listener = bind(&config)?;
    serve(listener, bus, config, resources, announcer, log)
}

pub fn serve(
    listener: TcpListener,
    bus: Arc<Bus>,
    config: ServerConfig,
    resources: ResourceTable,
    announcer: Arc<dyn ServiceAnnouncer>,
    log: Logger,
) -> io::Result<()> {
    slog::info!(log, "indigo bus listening"; "addr" => ?listener.local_addr());
    announcer.announce("indigo", config.server.port);

    let ctx = Arc::new(ServerContext {
        bus,
        resources,
        config,
        log: log.clone(),
    });

    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(stream) => stream,
            Err(err) => {
                slog::warn!(log, "accept failed"; "error" => %err);
                continue;
            }
        };
        let ctx = ctx.clone();
        thread::spawn(move || {
            if let Err(err) = handle_connection(stream, &ctx) {
                slog::debug!(ctx.log, "connection ended with error"; "error" => %err);
            }
        });
    }
    Ok(())
}

fn handle_connection(stream: TcpStream, ctx: &ServerContext) -> io::Result<()> {
    let mut probe = [0u8; 1];
    let peeked = stream.peek(&mut probe)?;
    if peeked == 0 {
        return Ok(());
    }
    match probe[0] {
        b'<' => indigo_proto_xml::serve_xml_connection(stream, ctx.bus.clone(), ctx.log.clone()),
        b'{' => indigo_proto_json::serve_json_connection(stream, ctx.bus.clone(), ctx.log.clone(), false),
        b'G' | b'P' => http::handle_http(stream, ctx),
        other => {
            slog::debug!(ctx.log, "unrecognised protocol byte, closing"; "byte" => other);
            Ok(())
        }
    }
}

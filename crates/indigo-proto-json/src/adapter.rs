//! Drives one connection speaking the JSON dialect, either raw
//! newline-delimited over TCP or tunneled through WebSocket text frames.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use slog::Logger;

use indigo_core::{BlobMode, Bus, BusHandle, Client, ClientId, EnableBlobRecord, Property, PropertyKind, Selector};

use crate::message::{InboundMessage, OutboundMessage};
use crate::translate::{del_property_to_value, message_to_value, property_to_vector, value_to_inbound, vector_to_change, vector_to_value};
use crate::value::{to_string, Parser};
use crate::websocket::{read_text_frame, write_text_frame};

static NEXT_CONN_NAME: AtomicU64 = AtomicU64::new(0);

enum Sink {
    Raw(Box<dyn Write + Send>),
    WebSocket(Box<dyn Write + Send>),
}

impl Sink {
    fn send(&mut self, text: &str) -> io::Result<()> {
        match self {
            Sink::Raw(writer) => {
                writer.write_all(text.as_bytes())?;
                writer.write_all(b"\n")
            }
            Sink::WebSocket(writer) => write_text_frame(writer, text.as_bytes()),
        }
    }
}

pub struct JsonClientAdapter {
    name: String,
    sink: Mutex<Sink>,
    bus: Arc<Bus>,
    client_id: Mutex<Option<ClientId>>,
    log: Logger,
}

impl JsonClientAdapter {
    fn new(sink: Sink, bus: Arc<Bus>, log: Logger) -> JsonClientAdapter {
        let name = format!("json-client-{}", NEXT_CONN_NAME.fetch_add(1, Ordering::Relaxed));
        JsonClientAdapter {
            name,
            sink: Mutex::new(sink),
            bus,
            client_id: Mutex::new(None),
            log,
        }
    }

    /// JSON defaults BLOB delivery to URL references, unlike the XML dialect.
    fn blob_mode(&self, device: &str, property: &str) -> BlobMode {
        match *self.client_id.lock().expect("client id mutex poisoned") {
            Some(id) => self.bus.blob_mode_for(id, device, property, BlobMode::Url),
            None => BlobMode::Url,
        }
    }

    fn emit(&self, value: crate::value::JsonValue) {
        let text = to_string(&value);
        if let Err(err) = self.sink.lock().expect("json sink mutex poisoned").send(&text) {
            slog::warn!(self.log, "failed writing json message"; "error" => %err);
        }
    }

    fn emit_property(&self, property: &Property, verb: &str) {
        let mode = self.blob_mode(&property.device, &property.name);
        if property.kind != PropertyKind::Blob && mode == BlobMode::Only {
            return;
        }
        let mut vector = property_to_vector(property);
        if property.kind == PropertyKind::Blob {
            if mode == BlobMode::Never {
                return;
            }
            // The JSON dialect has no inline/base64 transfer, so any enabled
            // mode resolves to a URL reference; the client always fetches
            // BLOB bytes over HTTP (see indigo-server::http).
            for (item, raw) in property.items().iter().zip(vector.items.iter_mut()) {
                if let indigo_core::ItemValue::Blob { format, .. } = &item.value {
                    let key = (property.device.clone(), property.name.clone(), item.name.clone());
                    if let Some(entry) = self.bus.blobs().get_by_key(&key) {
                        raw.text = format!("/blob/{:x}{}", entry.handle, format);
                    }
                }
            }
        }
        self.emit(vector_to_value(verb, &vector));
    }
}

impl Client for JsonClientAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&mut self, bus: &BusHandle, id: ClientId) {
        *self.client_id.lock().expect("client id mutex poisoned") = Some(id);
        // The JSON dialect defaults BLOB delivery to URL references, unlike
        // XML's default-suppress, since JSON has no inline transfer form.
        bus.enable_blob(id, EnableBlobRecord { device: None, property: None, mode: BlobMode::Url }).ok();
    }

    fn define_property(&mut self, property: &Property) {
        self.emit_property(property, "def");
    }

    fn update_property(&mut self, property: &Property) {
        self.emit_property(property, "set");
    }

    fn delete_property(&mut self, device: &str, property: Option<&str>) {
        self.emit(del_property_to_value(device, property));
    }

    fn message(&mut self, device: Option<&str>, text: &str) {
        self.emit(message_to_value(device, text));
    }

    fn detach(&mut self, _bus: &BusHandle) {}
}

pub fn serve_json_connection<S>(mut stream: S, bus: Arc<Bus>, log: Logger, websocket: bool) -> io::Result<()>
where
    S: Read + Write + Send + TryCloneWrite + 'static,
{
    let sink = if websocket {
        Sink::WebSocket(stream.try_clone_write()?)
    } else {
        Sink::Raw(stream.try_clone_write()?)
    };
    let adapter = Arc::new(Mutex::new(JsonClientAdapter::new(sink, bus.clone(), log.clone())));
    let client_id = bus.attach_client(adapter);

    let mut parser = Parser::new();
    if websocket {
        loop {
            match read_text_frame(&mut stream) {
                Ok(Some(payload)) => {
                    parser.feed(&payload);
                    drain_parser(&mut parser, &bus, client_id, &log);
                }
                Ok(None) => break,
                Err(err) => {
                    slog::debug!(log, "websocket read error"; "error" => %err);
                    break;
                }
            }
        }
    } else {
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    parser.feed(&buf[..n]);
                    drain_parser(&mut parser, &bus, client_id, &log);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    slog::debug!(log, "json connection read error"; "error" => %err);
                    break;
                }
            }
        }
    }
    bus.detach_client(client_id).ok();
    Ok(())
}

fn drain_parser(parser: &mut Parser, bus: &Arc<Bus>, client_id: ClientId, log: &Logger) {
    loop {
        match parser.next_value() {
            Ok(Some(value)) => match value_to_inbound(&value) {
                Ok(inbound) => dispatch_inbound(bus, client_id, inbound, log),
                Err(_) => continue,
            },
            Ok(None) => break,
            Err(_) => {
                slog::debug!(log, "malformed json message");
                break;
            }
        }
    }
}

fn dispatch_inbound(bus: &Arc<Bus>, client_id: ClientId, inbound: InboundMessage, log: &Logger) {
    match inbound {
        InboundMessage::GetProperties { device, property } => {
            bus.enumerate_properties(Selector { device, property });
        }
        InboundMessage::NewVector(vector) => {
            let change = vector_to_change(&vector);
            if let Err(err) = bus.change_property(&vector.device, change) {
                slog::debug!(log, "rejected change"; "error" => %err);
            }
        }
        InboundMessage::EnableBlob { device, property, mode } => {
            bus.enable_blob(client_id, EnableBlobRecord { device: Some(device), property, mode }).ok();
        }
    }
}

pub trait TryCloneWrite {
    fn try_clone_write(&self) -> io::Result<Box<dyn Write + Send>>;
}

impl TryCloneWrite for std::net::TcpStream {
    fn try_clone_write(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(self.try_clone()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indigo_core::{Item, ItemValue, Perm, PropertyState, ProtocolVersion};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn define_property_serializes_as_raw_json_line() {
        let bus = Bus::new(test_logger());
        let sink = SharedBuffer::default();
        let mut adapter = JsonClientAdapter::new(Sink::Raw(Box::new(sink.clone())), bus, test_logger());
        let property = Property::new(
            "mount",
            "MOUNT_PARK",
            "Main",
            "Park",
            PropertyState::Ok,
            Perm::ReadWrite,
            None,
            ProtocolVersion::Current20,
            vec![Item::new("PARKED", "Parked", ItemValue::Switch(false))],
        )
        .unwrap();
        adapter.define_property(&property);
        let written = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert!(written.contains("defSwitchVector"));
        assert!(written.ends_with('\n'));
    }

    #[test]
    fn blob_in_also_mode_still_resolves_to_a_url_reference() {
        let bus = Bus::new(test_logger());
        let key = ("ccd".to_string(), "CCD_IMAGE".to_string(), "IMAGE".to_string());
        let handle = bus.blobs().register(key, ".fits".to_string(), None);

        let sink = SharedBuffer::default();
        let adapter = Arc::new(Mutex::new(JsonClientAdapter::new(Sink::Raw(Box::new(sink.clone())), bus.clone(), test_logger())));
        let client_id = bus.attach_client(adapter.clone());
        bus.enable_blob(
            client_id,
            EnableBlobRecord {
                device: None,
                property: None,
                mode: BlobMode::Also,
            },
        )
        .unwrap();

        let property = Property::new(
            "ccd",
            "CCD_IMAGE",
            "Main",
            "Image",
            PropertyState::Ok,
            Perm::ReadOnly,
            None,
            ProtocolVersion::Current20,
            vec![Item::new("IMAGE", "Image", ItemValue::Blob { format: ".fits".into(), size: 0 })],
        )
        .unwrap();
        adapter.lock().unwrap().define_property(&property);

        let written = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert!(written.contains(&format!("/blob/{:x}.fits", handle)));
    }
}

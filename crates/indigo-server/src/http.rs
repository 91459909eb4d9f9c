//! HTTP side-channel (C6): `/` redirect or WebSocket upgrade, `/blob/<handle>.<ext>`
//! GET/PUT, and the static resource table, matching the original server's
//! byte-sniffed `G`/`P` branch of its accept loop.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;

use flate2::write::GzEncoder;
use flate2::Compression;

use indigo_proto_json::serve_json_connection;
use indigo_proto_json::websocket::accept_key;

use crate::context::ServerContext;

const SERVER_BANNER: &str = "INDIGO/2.0-rust";

pub fn handle_http(stream: TcpStream, ctx: &ServerContext) -> io::Result<()> {
    let writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut writer = writer;

    let Some(request_line) = read_line(&mut reader)? else {
        return Ok(());
    };
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let target = parts.next().unwrap_or("/").to_string();
    let (path, _query) = target.split_once('?').unwrap_or((target.as_str(), ""));
    let path = path.to_string();

    let mut headers = HashMap::new();
    loop {
        match read_line(&mut reader)? {
            None => return Ok(()),
            Some(line) if line.is_empty() => break,
            Some(line) => {
                if let Some((key, value)) = line.split_once(':') {
                    headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
                }
            }
        }
    }

    if path == "/" {
        if let Some(key) = headers.get("sec-websocket-key") {
            write_upgrade(&mut writer, key)?;
            let duplex = WsDuplex { reader, writer };
            return serve_json_connection(duplex, ctx.bus.clone(), ctx.log.clone(), true);
        }
        return write_redirect(&mut writer);
    }

    if let Some(rest) = path.strip_prefix("/blob/") {
        return handle_blob(rest, &method, &mut reader, &mut writer, &headers, ctx);
    }

    match ctx.resources.find(&path) {
        Some(resource) => write_resource(&mut writer, resource),
        None => write_not_found(&mut writer, &path),
    }
}

fn handle_blob(
    rest: &str,
    method: &str,
    reader: &mut BufReader<TcpStream>,
    writer: &mut TcpStream,
    headers: &HashMap<String, String>,
    ctx: &ServerContext,
) -> io::Result<()> {
    let (handle_str, ext) = rest.split_once('.').unwrap_or((rest, ""));
    let Ok(handle) = u64::from_str_radix(handle_str, 16) else {
        return write_not_found(writer, rest);
    };

    match method {
        "GET" => {
            let Some(entry) = ctx.bus.blobs().get(handle) else {
                return write_not_found(writer, rest);
            };
            let (format, bytes) = entry.content();
            let wants_gzip = headers.get("accept-encoding").map(|v| v.contains("gzip")).unwrap_or(false);
            let use_gzip = wants_gzip && ctx.config.blob.compression && format != ".jpeg";

            let uncompressed_len = bytes.len();
            let body = if use_gzip {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&bytes)?;
                encoder.finish()?
            } else {
                bytes
            };

            write!(writer, "HTTP/1.1 200 OK\r\n")?;
            write!(writer, "Server: {SERVER_BANNER}\r\n")?;
            if format == ".jpeg" {
                write!(writer, "Content-Type: image/jpeg\r\n")?;
            } else {
                write!(writer, "Content-Type: application/octet-stream\r\n")?;
                write!(writer, "Content-Disposition: attachment; filename=\"{handle:x}{format}\"\r\n")?;
            }
            if use_gzip {
                write!(writer, "Content-Encoding: gzip\r\n")?;
                write!(writer, "X-Uncompressed-Content-Length: {uncompressed_len}\r\n")?;
            }
            write!(writer, "Content-Length: {}\r\n\r\n", body.len())?;
            writer.write_all(&body)
        }
        "PUT" => {
            let len: usize = headers.get("content-length").and_then(|v| v.parse().ok()).unwrap_or(0);
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body)?;
            match ctx.bus.blobs().get(handle) {
                Some(entry) => {
                    entry.set_content(format!(".{ext}"), body);
                    write!(writer, "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
                }
                None => write_not_found(writer, rest),
            }
        }
        _ => write_not_found(writer, rest),
    }
}

fn write_redirect<W: Write>(writer: &mut W) -> io::Result<()> {
    write!(writer, "HTTP/1.1 301 Moved Permanently\r\n")?;
    write!(writer, "Server: {SERVER_BANNER}\r\n")?;
    write!(writer, "Location: /mng.html\r\n")?;
    write!(writer, "Content-Type: text/html\r\n\r\n")?;
    write!(writer, "<a href='/mng.html'>INDIGO Server Manager</a>")
}

fn write_not_found<W: Write>(writer: &mut W, path: &str) -> io::Result<()> {
    write!(writer, "HTTP/1.1 404 Not Found\r\n")?;
    write!(writer, "Content-Type: text/plain\r\n\r\n")?;
    write!(writer, "{path} not found!\r\n")
}

fn write_resource<W: Write>(writer: &mut W, resource: &crate::resource::Resource) -> io::Result<()> {
    write!(writer, "HTTP/1.1 200 OK\r\n")?;
    write!(writer, "Server: {SERVER_BANNER}\r\n")?;
    write!(writer, "Content-Type: {}\r\n", resource.content_type)?;
    write!(writer, "Content-Length: {}\r\n\r\n", resource.bytes.len())?;
    writer.write_all(resource.bytes)
}

fn write_upgrade<W: Write>(writer: &mut W, client_key: &str) -> io::Result<()> {
    write!(writer, "HTTP/1.1 101 Switching Protocols\r\n")?;
    write!(writer, "Server: {SERVER_BANNER}\r\n")?;
    write!(writer, "Upgrade: websocket\r\n")?;
    write!(writer, "Connection: Upgrade\r\n")?;
    write!(writer, "Sec-WebSocket-Accept: {}\r\n\r\n", accept_key(client_key))
}

fn read_line(reader: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Joins the buffered request reader and the raw stream writer into the
/// single `Read + Write` handle `serve_json_connection` expects, so the
/// WebSocket tunnel keeps any bytes the request-line/header parse already
/// buffered ahead of the upgrade.
struct WsDuplex {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Read for WsDuplex {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Write for WsDuplex {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl indigo_proto_json::adapter::TryCloneWrite for WsDuplex {
    fn try_clone_write(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(self.writer.try_clone()?))
    }
}

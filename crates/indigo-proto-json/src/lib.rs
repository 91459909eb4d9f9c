pub mod adapter;
pub mod message;
pub mod translate;
pub mod value;
pub mod websocket;

pub use adapter::{serve_json_connection, JsonClientAdapter};
pub use value::{JsonValue, Parser};

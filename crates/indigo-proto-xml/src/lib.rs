pub mod adapter;
pub mod message;
pub mod parser;
pub mod translate;
pub mod writer;

pub use adapter::{serve_xml_connection, XmlClientAdapter};
pub use parser::Parser;

pub mod catalog;
pub mod epg;
pub mod ingest;
pub mod notification;

pub use catalog::*;
pub use epg::*;
pub use ingest::*;
pub use notification::*;

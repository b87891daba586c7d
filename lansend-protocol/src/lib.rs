mod device;
mod dto;
mod error;
mod event;
mod file_type;

pub use device::*;
pub use dto::*;
pub use error::*;
pub use event::*;
pub use file_type::*;

pub const PROTOCOL_VERSION: &str = "2.0";
pub const DEFAULT_PORT: u16 = 53317;

/// Route prefix shared by all protocol endpoints.
pub const API_PREFIX: &str = "/api/localsend/v2";

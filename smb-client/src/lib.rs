pub mod config;
pub mod connection;
pub mod event;
pub mod protocol;
pub mod transport;
pub mod util;

mod byte_helper;

pub use smb_client_core::error::SMBError;
pub use smb_client_core::nt_status::NTStatus;
pub use smb_client_core::{SMBParseResult, SMBResult};

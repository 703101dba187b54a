//! Transfer module for FTP server
//!
//! Handles data channel negotiation and file streaming.

pub mod data_channel;
pub mod file_ops;

pub use data_channel::{DataChannel, DataChannelManager};
pub use file_ops::{Direction, PartialUpload, StreamOptions, TransferState, send_file, stream};

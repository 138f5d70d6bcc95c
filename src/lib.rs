// Bulk Watermarker Library

pub mod archive;
pub mod codec;
pub mod collection;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod session;
pub mod settings;
pub mod watermark;

pub use error::PipelineError;
pub use session::{Session, SessionOptions};

//! Asset access for the rendering core

pub mod accessor;

pub use accessor::{AssetAccessor, FileSystemAccessor};

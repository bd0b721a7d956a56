//! Data containers and loaders

pub mod libsvm;
pub mod table;

pub use self::libsvm::*;
pub use self::table::*;

pub mod error;
pub mod keys;
pub mod prompt;
pub mod record;
pub mod reference;
pub mod result;
pub mod ttl;

pub use error::ValidationError;
pub use prompt::*;
pub use record::*;
pub use reference::*;
pub use result::*;

pub mod content;
pub mod protocol;
pub mod tool;

pub use content::Content;
pub use protocol::*;
pub use tool::Tool;

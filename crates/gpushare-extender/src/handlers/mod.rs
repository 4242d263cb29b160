pub mod extender;
pub mod inventory;
pub mod status;

// Re-export handler functions
pub use extender::*;
pub use inventory::*;
pub use status::*;

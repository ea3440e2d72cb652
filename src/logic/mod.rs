pub mod applier;
pub mod loader;
pub mod report;
pub mod resolver;

pub use applier::*;
pub use loader::*;
pub use report::*;
pub use resolver::*;

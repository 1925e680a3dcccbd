pub mod browser;
pub mod plan;
pub mod probe;
pub mod run;

// Re-export command functions for convenience
pub use browser::BrowserHandle;
pub use plan::plan;
pub use probe::{auth, fetch, resolve};
pub use run::{run, RunOptions};

//! Persistent state shared across runs
//!
//! Only two pieces of state outlive a process: the daily dedup store and the
//! (optional) discovery cache. Both go through [`StateFile`], which writes to a
//! temporary sibling and renames it into place so a crash never leaves a
//! half-written file behind.

mod state;

pub use state::StateFile;

//! Crawl rotation scheduling
//!
//! Decides what a run crawls: which run slot owns this invocation, which
//! target buckets are due today, and in what order URLs are worked.
//!
//! # Architecture
//!
//! ```text
//!   now / override ──▶ RotationScheduler::plan_run ──▶ RunPlan
//!                            │                           │
//!                            ├── select_slot             ├── slot + query space
//!                            ├── is_backlog              ├── buckets (calendar)
//!                            └── buckets_for_date        └── targets() by priority
//! ```
//!
//! # Modules
//!
//! - [`rotation`] - Slot catalog, slot selection and the run plan
//! - [`buckets`] - Bucket catalog and day/week rotation
//! - [`freshness`] - Re-crawl eligibility, URL ordering and stop conditions
//! - [`error`] - Scheduler errors
//!
//! # Quick Start
//!
//! ```no_run
//! use chrono::Local;
//! use jobharvest::config::RunConfig;
//! use jobharvest::scheduler::RotationScheduler;
//!
//! let scheduler = RotationScheduler::new();
//! let plan = scheduler.plan_run(Local::now().naive_local(), &RunConfig::default())?;
//! for target in plan.targets() {
//!     println!("{} ({})", target.id, target.origin);
//! }
//! # Ok::<(), jobharvest::scheduler::SchedulerError>(())
//! ```

pub mod buckets;
pub mod error;
pub mod freshness;
pub mod rotation;

pub use buckets::{buckets_for_date, weekly_schedule, CrawlBucket};
pub use error::{SchedulerError, SchedulerResult};
pub use freshness::{
    order_by_priority, priority, should_crawl, should_stop, CrawlHistory, CrawlLog, CrawlStatus,
};
pub use rotation::{
    placement_boost_terms, QueryCombo, RotationScheduler, RunPlan, RunSlot, SlotDefinition,
    SLOT_CATALOG,
};

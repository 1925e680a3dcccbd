//! Deterministic run-slot rotation
//!
//! The day is cut into `K` slots. Each run resolves to one slot from the wall
//! clock (or an explicit override), and each slot owns a disjoint share of the
//! {industry × city × job-type} query space, so `K` consecutive runs cover the
//! whole space once.
//!
//! - Same input time (or override) always produces the same slot
//! - Slots are fixed; coverage over real time depends on how often runs are triggered

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::HashSet;
use tracing::info;

use super::buckets::{buckets_for_date, CrawlBucket};
use super::error::{SchedulerError, SchedulerResult};
use crate::config::RunConfig;
use crate::models::CrawlTarget;

// ============================================================================
// Slot Catalog
// ============================================================================

/// A named partition of the query space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotDefinition {
    pub name: &'static str,
    pub industries: &'static [&'static str],
    pub cities: &'static [&'static str],
    /// Job types this slot queries
    pub job_types: &'static [&'static str],
    /// Widen freshness filters to all time
    pub backlog: bool,
}

const ALL_JOB_TYPES: &[&str] = &["graduate", "internship", "placement"];

const MAJOR_CITIES: &[&str] = &[
    "london", "manchester", "birmingham", "leeds", "glasgow", "edinburgh", "bristol",
    "liverpool", "nottingham", "newcastle", "sheffield", "oxford", "cambridge", "cardiff",
    "belfast",
];

/// Default slot catalog
pub const SLOT_CATALOG: &[SlotDefinition] = &[
    SlotDefinition {
        name: "south-finance-business",
        industries: &[
            "finance", "investment", "banking", "accounting", "business", "economics",
            "consulting", "actuarial", "risk management", "audit", "tax", "corporate finance",
            "wealth management", "asset management", "insurance", "real estate",
        ],
        cities: &[
            "london", "reading", "oxford", "cambridge", "brighton", "southampton", "guildford",
            "canterbury", "portsmouth", "winchester", "basingstoke",
        ],
        job_types: ALL_JOB_TYPES,
        backlog: false,
    },
    SlotDefinition {
        name: "midlands-engineering-manufacturing",
        industries: &[
            "engineering", "mechanical engineering", "civil engineering", "automotive",
            "manufacturing", "aerospace", "energy", "electrical engineering",
            "chemical engineering", "construction", "structural engineering",
            "environmental engineering", "nuclear engineering", "rail engineering",
            "process engineering", "design engineering",
        ],
        cities: &[
            "birmingham", "coventry", "leicester", "derby", "nottingham", "stoke-on-trent",
            "wolverhampton", "solihull", "nuneaton", "rugby",
        ],
        job_types: ALL_JOB_TYPES,
        backlog: false,
    },
    SlotDefinition {
        name: "north-tech-data-marketing",
        industries: &[
            "technology", "software engineering", "data", "analytics", "marketing", "digital",
            "product management", "cyber security", "ux design", "data science",
            "machine learning", "cloud computing", "devops", "game development", "e-commerce",
            "content marketing",
        ],
        cities: &[
            "manchester", "leeds", "liverpool", "newcastle", "sheffield", "york", "preston",
            "bolton", "stockport", "warrington", "chester",
        ],
        job_types: ALL_JOB_TYPES,
        backlog: true,
    },
    SlotDefinition {
        name: "nations-health-education-law",
        industries: &[
            "healthcare", "public sector", "education", "law", "government", "charity",
            "environment", "social work", "psychology", "policy", "nursing", "pharmacy",
            "public health", "corporate law", "human rights", "research",
        ],
        cities: &[
            "glasgow", "edinburgh", "cardiff", "belfast", "aberdeen", "swansea", "dundee",
            "inverness", "stirling", "newport",
        ],
        job_types: ALL_JOB_TYPES,
        backlog: true,
    },
    SlotDefinition {
        name: "placement-all-industries",
        industries: &[
            "finance", "business", "engineering", "technology", "consulting", "marketing",
            "sales", "law", "healthcare", "supply chain", "operations", "manufacturing", "fmcg",
            "media", "human resources", "data science",
        ],
        cities: MAJOR_CITIES,
        job_types: &["placement"],
        backlog: true,
    },
    SlotDefinition {
        name: "internship-all-industries",
        industries: &[
            "finance", "investment", "banking", "consulting", "technology",
            "software engineering", "data", "marketing", "design", "engineering", "media",
            "journalism", "law", "biotech", "public sector", "sustainability",
        ],
        cities: MAJOR_CITIES,
        job_types: &["internship"],
        backlog: true,
    },
    SlotDefinition {
        name: "graduate-all-industries",
        industries: &[
            "finance", "banking", "consulting", "technology", "software engineering", "data",
            "marketing", "engineering", "manufacturing", "law", "healthcare",
            "pharmaceutical", "government", "media", "supply chain", "operations",
        ],
        cities: MAJOR_CITIES,
        job_types: &["graduate"],
        backlog: true,
    },
];

/// Upper bound for placement search terms per slot
pub const MAX_BOOST_TERMS: usize = 2000;

/// Posting window outside backlog runs
pub const RECENT_WINDOW_DAYS: i64 = 30;

const GENERIC_PLACEMENT_TERMS: &[&str] = &[
    "placement uk",
    "placement jobs uk",
    "placement year uk",
    "year in industry uk",
    "industrial placement uk",
    "industrial trainee uk",
    "undergraduate placement uk",
    "placement scheme uk",
    "placement programme uk",
    "placement student uk",
];

// ============================================================================
// Plan Types
// ============================================================================

/// One {industry × city × job-type} combination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct QueryCombo {
    pub industry: &'static str,
    pub city: &'static str,
    pub job_type: &'static str,
}

impl QueryCombo {
    /// Free-text search query for this combination
    pub fn query(&self) -> String {
        format!("{} {} jobs {}", self.industry, self.job_type, self.city)
    }
}

/// The slot a run resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSlot {
    pub index: usize,
    pub hours_per_slot: u32,
    pub definition: SlotDefinition,
    /// Picked by override rather than the clock
    pub pinned: bool,
}

/// Everything a run needs to know about what to crawl
#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    pub date: NaiveDate,
    pub slot: RunSlot,
    pub buckets: Vec<CrawlBucket>,
    pub backlog: bool,
    pub query_space: Vec<QueryCombo>,
}

impl RunPlan {
    /// Targets of all buckets, high priority first, each id once
    ///
    /// Order within a priority tier is shuffled with a seed derived from the
    /// date and slot, so repeated plans for the same input agree.
    pub fn targets(&self) -> Vec<CrawlTarget> {
        let mut seen = HashSet::new();
        let mut targets: Vec<CrawlTarget> = self
            .buckets
            .iter()
            .flat_map(|b| b.targets())
            .filter(|t| seen.insert(t.id.clone()))
            .collect();

        let seed = (self.date.num_days_from_ce() as u64) * 31 + self.slot.index as u64;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        targets.shuffle(&mut rng);
        targets.sort_by_key(|t| t.priority);
        targets
    }

    /// Earliest accepted posting date, `None` when the backlog window is open
    pub fn posted_cutoff(&self) -> Option<NaiveDate> {
        if self.backlog {
            None
        } else {
            self.date.checked_sub_signed(chrono::Duration::days(RECENT_WINDOW_DAYS))
        }
    }

    /// Result pages per search query
    pub fn pages_per_query(&self) -> u32 {
        if self.backlog {
            2
        } else {
            1
        }
    }

    /// Search queries for one target, `n` at most
    ///
    /// Drawn from the slot's query space, plus the placement terms for the
    /// placement-only slot. Each target starts at its own offset derived
    /// from its id and the date, so targets and days spread over the space.
    pub fn search_queries(&self, target_id: &str, n: usize) -> Vec<String> {
        let mut pool: Vec<String> = self.query_space.iter().map(QueryCombo::query).collect();
        if matches!(self.slot.definition.job_types, ["placement"]) {
            pool.extend(placement_boost_terms(&self.slot.definition));
        }
        if pool.is_empty() || n == 0 {
            return Vec::new();
        }

        let seed = target_id
            .bytes()
            .fold(self.date.num_days_from_ce() as u64, |h, b| {
                h.wrapping_mul(31).wrapping_add(u64::from(b))
            });
        let start = (seed % pool.len() as u64) as usize;

        pool.iter()
            .cycle()
            .skip(start)
            .take(n.min(pool.len()))
            .cloned()
            .collect()
    }

    /// Whether a record's posting date falls in the run's window
    ///
    /// Dates that do not parse are accepted.
    pub fn accepts_posted(&self, posted_at: Option<&str>) -> bool {
        let Some(cutoff) = self.posted_cutoff() else {
            return true;
        };
        match posted_at.and_then(parse_posted_date) {
            Some(date) => date >= cutoff,
            None => true,
        }
    }
}

/// Leading `YYYY-MM-DD` of an ISO timestamp
fn parse_posted_date(value: &str) -> Option<NaiveDate> {
    let head = value.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

// ============================================================================
// Rotation Scheduler
// ============================================================================

/// Picks the run slot and assembles the run plan
#[derive(Debug, Clone)]
pub struct RotationScheduler {
    slots: &'static [SlotDefinition],
}

impl RotationScheduler {
    pub fn new() -> Self {
        Self { slots: SLOT_CATALOG }
    }

    /// Use another slot catalog
    pub fn with_slots(slots: &'static [SlotDefinition]) -> Self {
        Self { slots }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Hours covered by each slot: `max(1, 24 / K)`
    pub fn hours_per_slot(&self) -> u32 {
        (24 / self.slots.len().max(1) as u32).max(1)
    }

    /// Slot for a wall-clock time, or the normalised override
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::EmptySlotCatalog` for an empty catalog
    pub fn select_slot(&self, now: NaiveDateTime, override_index: Option<i64>) -> SchedulerResult<RunSlot> {
        let k = self.slots.len();
        if k == 0 {
            return Err(SchedulerError::EmptySlotCatalog);
        }
        let hours_per_slot = self.hours_per_slot();

        let (index, pinned) = match override_index {
            Some(n) => {
                let k = k as i64;
                ((((n % k) + k) % k) as usize, true)
            }
            None => (((now.hour() / hours_per_slot) as usize) % k, false),
        };

        Ok(RunSlot {
            index,
            hours_per_slot,
            definition: self.slots[index],
            pinned,
        })
    }

    /// Slot definition by index
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidSlot` when out of range
    pub fn slot(&self, index: usize) -> SchedulerResult<&SlotDefinition> {
        self.slots
            .get(index)
            .ok_or_else(|| SchedulerError::invalid_slot(index, self.slots.len()))
    }

    /// Whether the backlog window applies, after operator overrides
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::ConflictingOverrides` when both overrides are set
    pub fn is_backlog(&self, slot: &RunSlot, run: &RunConfig) -> SchedulerResult<bool> {
        match (run.force_backlog, run.force_fresh_only) {
            (true, true) => Err(SchedulerError::ConflictingOverrides {
                reason: "force_backlog and force_fresh_only are both set".into(),
            }),
            (true, false) => Ok(true),
            (false, true) => Ok(false),
            (false, false) => Ok(slot.definition.backlog),
        }
    }

    /// Combinations owned by a slot
    ///
    /// A combination belongs to the first slot that lists it, so the slots
    /// partition the union of the catalog.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidSlot` when out of range
    pub fn query_space(&self, index: usize) -> SchedulerResult<Vec<QueryCombo>> {
        self.slot(index)?;

        let mut owned_earlier = HashSet::new();
        for earlier in &self.slots[..index] {
            owned_earlier.extend(combinations(earlier));
        }

        let mut seen = HashSet::new();
        Ok(combinations(&self.slots[index])
            .into_iter()
            .filter(|c| !owned_earlier.contains(c) && seen.insert(*c))
            .collect())
    }

    /// Assemble the plan for a run
    ///
    /// # Errors
    ///
    /// Propagates slot selection and override errors
    pub fn plan_run(&self, now: NaiveDateTime, run: &RunConfig) -> SchedulerResult<RunPlan> {
        let slot = self.select_slot(now, run.run_slot_override)?;
        let backlog = self.is_backlog(&slot, run)?;
        let date = now.date();
        let buckets = buckets_for_date(date);
        let query_space = self.query_space(slot.index)?;

        info!(
            slot = slot.index,
            slot_name = slot.definition.name,
            pinned = slot.pinned,
            backlog,
            buckets = ?buckets.iter().map(|b| b.id).collect::<Vec<_>>(),
            combinations = query_space.len(),
            "Run planned"
        );

        Ok(RunPlan {
            date,
            slot,
            buckets,
            backlog,
            query_space,
        })
    }

    /// Human-readable slot table
    pub fn format_schedule(&self) -> String {
        let hours = self.hours_per_slot();
        let mut output = format!("Run slots ({} slots, {} h each)\n", self.slots.len(), hours);
        output.push_str(&format!("{:=<72}\n", ""));
        output.push_str(&format!(
            "{:>4} | {:^11} | {:<36} | {}\n",
            "Slot", "Hours", "Name", "Backlog"
        ));
        output.push_str(&format!("{:-<72}\n", ""));

        for (i, slot) in self.slots.iter().enumerate() {
            let start = i as u32 * hours;
            let hours_label = if start >= 24 {
                "override".to_string()
            } else {
                format!("{:02}:00-{:02}:59", start, (start + hours - 1).min(23))
            };
            output.push_str(&format!(
                "{:>4} | {:^11} | {:<36} | {}\n",
                i,
                hours_label,
                slot.name,
                if slot.backlog { "yes" } else { "no" }
            ));
        }

        output
    }
}

impl Default for RotationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn combinations(slot: &SlotDefinition) -> Vec<QueryCombo> {
    let mut out = Vec::with_capacity(slot.industries.len() * slot.cities.len() * slot.job_types.len());
    for industry in slot.industries {
        for city in slot.cities {
            for job_type in slot.job_types {
                out.push(QueryCombo {
                    industry,
                    city,
                    job_type,
                });
            }
        }
    }
    out
}

/// Placement search terms for a slot, lower-cased and deduplicated
pub fn placement_boost_terms(slot: &SlotDefinition) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    let mut add = |value: String| {
        let cleaned = value.trim().to_lowercase();
        if cleaned.is_empty() || terms.len() >= MAX_BOOST_TERMS {
            return;
        }
        if seen.insert(cleaned.clone()) {
            terms.push(cleaned);
        }
    };

    for term in GENERIC_PLACEMENT_TERMS {
        add(term.to_string());
    }
    for industry in slot.industries {
        add(format!("{industry} placement"));
        add(format!("{industry} placement uk"));
        add(format!("{industry} placement year"));
        add(format!("{industry} year in industry"));
        add(format!("{industry} industrial placement"));
        add(format!("{industry} undergraduate placement"));
        add(format!("placement student {industry}"));
    }
    for city in slot.cities {
        add(format!("placement jobs {city}"));
        add(format!("placement year {city}"));
        add(format!("year in industry {city}"));
        add(format!("industrial placement {city}"));
        add(format!("{city} placement scheme"));
    }

    terms
}

// ============================================================================
// Tests
// ============================================================================

//! Crawl bucket catalog and calendar rotation
//!
//! ATS platforms are crawled every day, job boards every third day, and one
//! of five company buckets is picked by week of month.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::models::{CrawlTarget, PriorityTier, TargetHint};

/// A group of targets crawled together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CrawlBucket {
    pub id: &'static str,
    pub name: &'static str,
    pub sources: &'static [&'static str],
    pub priority: PriorityTier,
}

pub const ATS_DAILY: CrawlBucket = CrawlBucket {
    id: "ats-daily",
    name: "ATS Platforms (Daily)",
    sources: &[
        "greenhouse:stripe",
        "greenhouse:monzo",
        "greenhouse:deliveroo",
        "greenhouse:cloudflare",
        "greenhouse:octopus-energy",
        "greenhouse:starling-bank",
        "lever:spotify",
        "lever:darktrace",
        "lever:graphcore",
        "lever:benevolentai",
    ],
    priority: PriorityTier::High,
};

pub const JOB_BOARDS: CrawlBucket = CrawlBucket {
    id: "job-boards",
    name: "Job Boards (Every 3 days)",
    sources: &["reed", "totaljobs", "monster", "gradcracker", "prospects", "targetjobs"],
    priority: PriorityTier::High,
};

/// Weekly company rotation, indexed by week of month
pub const COMPANY_BUCKETS: [CrawlBucket; 5] = [
    CrawlBucket {
        id: "engineering-week1",
        name: "Engineering Companies (Week 1)",
        sources: &[
            "arup", "atkins", "wsp", "aecom", "mott-macdonald", "jacobs", "balfour-beatty",
            "costain",
        ],
        priority: PriorityTier::Medium,
    },
    CrawlBucket {
        id: "engineering-week2",
        name: "Engineering Companies (Week 2)",
        sources: &[
            "skanska-uk", "laing-orourke", "ramboll", "stantec-uk", "buro-happold", "hoare-lea",
            "sweco",
        ],
        priority: PriorityTier::Medium,
    },
    CrawlBucket {
        id: "manufacturing-week3",
        name: "Manufacturing & Aerospace (Week 3)",
        sources: &[
            "rolls-royce", "bae-systems", "dyson", "jaguar-land-rover", "airbus-uk", "gkn",
            "mbda", "siemens-uk",
        ],
        priority: PriorityTier::Medium,
    },
    CrawlBucket {
        id: "tech-finance-week4",
        name: "Tech & Finance (Week 4)",
        sources: &[
            "national-grid", "sse", "edf-uk", "octopus-energy", "shell-uk", "bp-uk",
            "google-london", "microsoft-uk", "amazon-uk", "bloomberg-london", "deepmind",
        ],
        priority: PriorityTier::Medium,
    },
    CrawlBucket {
        id: "consulting-public-week5",
        name: "Consulting & Public Sector (Week 5)",
        sources: &[
            "goldman-sachs-london", "jpmorgan-london", "barclays", "hsbc", "lloyds", "natwest",
            "deloitte-uk", "pwc-uk", "kpmg-uk", "ey-uk", "civil-service", "network-rail", "tfl",
            "hs2",
        ],
        priority: PriorityTier::Low,
    },
];

/// Origins of the sources named in the buckets
const SOURCE_ORIGINS: &[(&str, &str)] = &[
    ("reed", "https://www.reed.co.uk"),
    ("totaljobs", "https://www.totaljobs.com"),
    ("monster", "https://www.monster.co.uk"),
    ("gradcracker", "https://www.gradcracker.com"),
    ("prospects", "https://www.prospects.ac.uk"),
    ("targetjobs", "https://targetjobs.co.uk"),
    ("arup", "https://www.arup.com"),
    ("atkins", "https://careers.atkinsrealis.com"),
    ("wsp", "https://www.wsp.com"),
    ("aecom", "https://aecom.jobs"),
    ("mott-macdonald", "https://www.mottmac.com"),
    ("jacobs", "https://jacobs.com"),
    ("balfour-beatty", "https://www.balfourbeatty.com"),
    ("costain", "https://www.costain.com"),
    ("skanska-uk", "https://www.skanska.co.uk"),
    ("laing-orourke", "https://www.laingorourke.com"),
    ("ramboll", "https://uk.ramboll.com"),
    ("stantec-uk", "https://www.stantec.com"),
    ("buro-happold", "https://www.burohappold.com"),
    ("hoare-lea", "https://hoarelea.com"),
    ("sweco", "https://www.sweco.co.uk"),
    ("rolls-royce", "https://careers.rolls-royce.com"),
    ("bae-systems", "https://www.baesystems.com"),
    ("dyson", "https://careers.dyson.com"),
    ("jaguar-land-rover", "https://www.jaguarlandrovercareers.com"),
    ("airbus-uk", "https://www.airbus.com"),
    ("gkn", "https://www.gknaerospace.com"),
    ("mbda", "https://careers.mbda-systems.com"),
    ("siemens-uk", "https://www.siemens.com"),
    ("national-grid", "https://www.nationalgrid.com"),
    ("sse", "https://careers.sse.com"),
    ("edf-uk", "https://www.edfenergy.com"),
    ("octopus-energy", "https://octopus.energy"),
    ("shell-uk", "https://www.shell.co.uk"),
    ("bp-uk", "https://www.bp.com"),
    ("google-london", "https://www.google.com/about/careers"),
    ("microsoft-uk", "https://careers.microsoft.com"),
    ("amazon-uk", "https://www.amazon.jobs"),
    ("bloomberg-london", "https://www.bloomberg.com/company/careers"),
    ("deepmind", "https://deepmind.google"),
    ("goldman-sachs-london", "https://www.goldmansachs.com/careers"),
    ("jpmorgan-london", "https://careers.jpmorgan.com"),
    ("barclays", "https://search.jobs.barclays"),
    ("hsbc", "https://www.hsbc.com/careers"),
    ("lloyds", "https://www.lloydsbankinggroup.com/careers"),
    ("natwest", "https://jobs.natwestgroup.com"),
    ("deloitte-uk", "https://www.deloitte.com/uk/en/careers"),
    ("pwc-uk", "https://www.pwc.co.uk/careers"),
    ("kpmg-uk", "https://www.kpmgcareers.co.uk"),
    ("ey-uk", "https://www.ey.com/en_uk/careers"),
    ("civil-service", "https://www.civil-service-careers.gov.uk"),
    ("network-rail", "https://www.networkrail.co.uk/careers"),
    ("tfl", "https://tfl.gov.uk/corporate/careers"),
    ("hs2", "https://www.hs2.org.uk/careers"),
];

impl CrawlBucket {
    /// Targets for the bucket's sources
    ///
    /// `greenhouse:{slug}` and `lever:{slug}` resolve to public ATS boards;
    /// names without a known origin are skipped.
    pub fn targets(&self) -> Vec<CrawlTarget> {
        self.sources
            .iter()
            .filter_map(|source| source_target(source, self.priority))
            .collect()
    }
}

fn source_target(source: &str, priority: PriorityTier) -> Option<CrawlTarget> {
    if let Some((platform, slug)) = source.split_once(':') {
        let (origin, hint) = match platform {
            "greenhouse" => (format!("https://boards.greenhouse.io/{slug}"), TargetHint::Greenhouse),
            "lever" => (format!("https://jobs.lever.co/{slug}"), TargetHint::Lever),
            "smartrecruiters" => (
                format!("https://jobs.smartrecruiters.com/{slug}"),
                TargetHint::SmartRecruiters,
            ),
            _ => return None,
        };
        return Some(CrawlTarget::new(slug, origin, priority).with_hint(hint));
    }

    let (_, origin) = SOURCE_ORIGINS.iter().find(|(id, _)| *id == source)?;
    let target = CrawlTarget::new(source, *origin, priority);
    Some(if JOB_BOARDS.sources.contains(&source) {
        target.with_hint(TargetHint::JobBoard)
    } else {
        target
    })
}

/// Look a bucket up by id
pub fn bucket_by_id(id: &str) -> Option<CrawlBucket> {
    std::iter::once(ATS_DAILY)
        .chain(std::iter::once(JOB_BOARDS))
        .chain(COMPANY_BUCKETS)
        .find(|b| b.id == id)
}

/// Week of month (1-5), weeks starting on Sunday
pub fn week_of_month(date: NaiveDate) -> u32 {
    let first_weekday = date
        .with_day(1)
        .map(|first| first.weekday().num_days_from_sunday())
        .unwrap_or(0);
    (date.day() - 1 + first_weekday + 1).div_ceil(7)
}

/// Buckets due on a date
pub fn buckets_for_date(date: NaiveDate) -> Vec<CrawlBucket> {
    let mut buckets = vec![ATS_DAILY];
    if date.day() % 3 == 1 {
        buckets.push(JOB_BOARDS);
    }
    let index = ((week_of_month(date) as usize).saturating_sub(1)) % COMPANY_BUCKETS.len();
    buckets.push(COMPANY_BUCKETS[index]);
    buckets
}

/// Seven-day preview: job boards on odd days, company buckets in turn
pub fn weekly_schedule() -> Vec<(u32, Vec<CrawlBucket>)> {
    (1..=7u32)
        .map(|day| {
            let mut buckets = vec![ATS_DAILY];
            if day % 2 == 1 {
                buckets.push(JOB_BOARDS);
            }
            buckets.push(COMPANY_BUCKETS[((day - 1) as usize) % COMPANY_BUCKETS.len()]);
            (day, buckets)
        })
        .collect()
}

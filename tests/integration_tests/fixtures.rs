//! Test fixtures for integration tests
//!
//! Provides sample pages and feeds for the mock servers

/// Careers listing that passes the job-page heuristic
pub const CAREERS_HTML: &str = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Graduate Jobs | Acme Engineering</title>
</head>
<body>
    <h1>Graduate jobs and placements</h1>
    <div class="job-card"><a href="/jobs/graduate-civil-engineer">Graduate Civil Engineer</a> - Bristol</div>
    <div class="job-card"><a href="/jobs/placement-student">Placement Student</a> - London</div>
    <div class="job-card"><a href="/jobs/trainee-surveyor">Trainee Surveyor</a> - Leeds</div>
</body>
</html>
"#;

/// Posting page carrying schema.org JSON-LD
pub const POSTING_HTML: &str = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <title>Graduate Civil Engineer | Acme Engineering</title>
    <script type="application/ld+json">
    {
        "@context": "https://schema.org",
        "@type": "JobPosting",
        "title": "Graduate Civil Engineer",
        "hiringOrganization": {"@type": "Organization", "name": "Acme Engineering"},
        "jobLocation": {"@type": "Place", "address": {"addressLocality": "Bristol"}},
        "datePosted": "2024-01-10",
        "employmentType": "FULL_TIME",
        "description": "<p>Join our graduate scheme.</p>"
    }
    </script>
</head>
<body><h1>Graduate Civil Engineer</h1></body>
</html>
"#;

/// Anti-bot interstitial
pub const CHALLENGE_HTML: &str = r#"
<html><head><title>Just a moment...</title></head>
<body><div id="cf-browser-verification">Checking your browser before accessing the site.</div></body>
</html>
"#;

/// Greenhouse board feed
pub const GREENHOUSE_FEED: &str = r#"{"jobs": [
    {"id": 101, "title": "Graduate Software Engineer",
     "absolute_url": "https://boards.greenhouse.io/acme/jobs/101",
     "location": {"name": "London"}, "updated_at": "2024-01-12T09:00:00Z"},
    {"id": 102, "title": "Data Science Intern",
     "absolute_url": "https://boards.greenhouse.io/acme/jobs/102",
     "location": {"name": "Remote"}, "updated_at": "2024-01-11T09:00:00Z"}
]}"#;

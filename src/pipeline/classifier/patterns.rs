//! Heuristic pattern families shared by the fallback classifier, the
//! Stage1-only tier and semantic duplicate detection.
//!
//! These are best-effort and meant to be tuned; none of them is load-bearing
//! for correctness of the pipeline.

use std::sync::LazyLock;

use regex::Regex;

// ═══════════════════════════════════════════════════════════
// Domains
// ═══════════════════════════════════════════════════════════

/// Applicant-tracking systems that send mail on behalf of employers.
pub const ATS_DOMAINS: &[&str] = &[
    "greenhouse.io",
    "greenhouse-mail.io",
    "lever.co",
    "myworkday.com",
    "myworkdayjobs.com",
    "workday.com",
    "icims.com",
    "smartrecruiters.com",
    "jobvite.com",
    "ashbyhq.com",
    "taleo.net",
    "successfactors.com",
    "bamboohr.com",
    "workablemail.com",
    "workable.com",
    "recruitee.com",
    "breezy.hr",
    "applytojob.com",
    "jazzhr.com",
    "teamtailor.com",
];

/// Job boards: may send real application confirmations, but mostly alerts.
pub const JOB_BOARD_DOMAINS: &[&str] = &[
    "indeed.com",
    "indeedemail.com",
    "linkedin.com",
    "glassdoor.com",
    "ziprecruiter.com",
    "monster.com",
    "dice.com",
    "wellfound.com",
];

pub const FREE_MAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "yahoo.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "icloud.com",
    "me.com",
    "aol.com",
    "proton.me",
    "protonmail.com",
    "gmx.com",
];

fn matches_domain(domain: &str, list: &[&str]) -> bool {
    let domain = domain.trim().to_lowercase();
    list.iter()
        .any(|d| domain == *d || domain.ends_with(&format!(".{d}")))
}

pub fn is_ats_domain(domain: &str) -> bool {
    matches_domain(domain, ATS_DOMAINS)
}

pub fn is_job_board_domain(domain: &str) -> bool {
    matches_domain(domain, JOB_BOARD_DOMAINS)
}

pub fn is_free_mail_domain(domain: &str) -> bool {
    matches_domain(domain, FREE_MAIL_DOMAINS)
}

/// Domain that identifies a single employer (not ATS, job board or free mail).
pub fn is_employer_domain(domain: &str) -> bool {
    !domain.trim().is_empty()
        && !is_ats_domain(domain)
        && !is_job_board_domain(domain)
        && !is_free_mail_domain(domain)
}

/// Registrable label of a domain: `mail.acme.co.uk` → `acme`.
pub fn domain_label(domain: &str) -> Option<String> {
    let labels: Vec<&str> = domain
        .trim()
        .trim_end_matches('.')
        .split('.')
        .filter(|l| !l.is_empty())
        .collect();
    if labels.len() < 2 {
        return None;
    }
    let n = labels.len();
    let second_level = ["co", "com", "org", "net", "ac", "gov"];
    let idx = if n >= 3 && labels[n - 1].len() == 2 && second_level.contains(&labels[n - 2]) {
        n - 3
    } else {
        n - 2
    };
    Some(labels[idx].to_lowercase())
}

// ═══════════════════════════════════════════════════════════
// Keyword families
// ═══════════════════════════════════════════════════════════

pub static REJECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bunfortunately\b[^.]{0,100}?\b(not (be )?(moving|move|proceed\w*|selected|able to (offer|move))|other (candidates|applicants)|(decided|chosen) to)|regret to inform|not (be )?moving forward|decided to (move|proceed) forward with other|(pursue|move forward with) other candidates|position has been filled|not been selected|were not selected|will not be proceeding|no longer (under consideration|being considered)|decided not to proceed",
    )
    .expect("valid regex")
});

pub static OFFER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)pleased to (offer|extend)|offer letter|extend (you )?an offer|\bjob offer\b|offer of employment|congratulations[^.]{0,60}\boffer\b",
    )
    .expect("valid regex")
});

pub static INTERVIEW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\binterview (invitation|request|schedul\w*|confirmation)|\b(invite|inviting) you (to|for) (an? )?(interview|call|chat|conversation)|schedule (an?|your) (interview|call|phone screen)|\bphone screen\b|next steps? in (the|our) (hiring|interview|recruiting) process|\bon-?site interview|technical (interview|assessment)|coding (challenge|assessment)",
    )
    .expect("valid regex")
});

pub static APPLICATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)application (has been )?(submitted|received)|thank(s| you) for (applying|your application)|(we|we've|we have) received your application|your application (to|for|with)|indeed application:",
    )
    .expect("valid regex")
});

pub static NEWSLETTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)job alert|jobs? you may (like|be interested)|recommended jobs|new jobs (for you|matching)|talent (community|network)|newsletter|weekly digest|career (fair|tips)|webinar|jobs matching your (search|profile)",
    )
    .expect("valid regex")
});

/// Generic job vocabulary for the last-resort heuristic.
pub const JOB_KEYWORDS: &[&str] = &[
    "application",
    "applied",
    "applying",
    "position",
    "candidate",
    "recruiter",
    "recruiting",
    "hiring",
    "resume",
    "role",
    "job",
];

pub const MARKETING_KEYWORDS: &[&str] = &[
    "sale",
    "discount",
    "% off",
    "promo",
    "deal",
    "coupon",
    "free trial",
    "limited time",
    "shop",
    "order",
    "shipping",
    "subscribe",
    "upgrade",
];

/// Number of distinct keywords from `list` present in lowercased `text`.
pub fn keyword_hits(text_lower: &str, list: &[&str]) -> usize {
    list.iter()
        .filter(|k| {
            let check_start = k.chars().next().is_some_and(|c| c.is_alphanumeric());
            let check_end = k.chars().next_back().is_some_and(|c| c.is_alphanumeric());
            text_lower.match_indices(*k).any(|(i, _)| {
                let before = text_lower[..i].chars().next_back();
                let after = text_lower[i + k.len()..].chars().next();
                let boundary = |c: Option<char>| c.map_or(true, |c| !c.is_alphanumeric());
                (!check_start || boundary(before)) && (!check_end || boundary(after))
            })
        })
        .count()
}

// ═══════════════════════════════════════════════════════════
// Field extraction
// ═══════════════════════════════════════════════════════════

/// "Application submitted, <position>, <company> - <location>"
pub static SUBMITTED_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)application submitted,\s*(?P<position>[^,\n]+?),\s*(?P<company>[^,\n]+?)\s+-\s+(?P<location>[^\n]+)",
    )
    .expect("valid regex")
});

/// "Indeed Application: <position>"
pub static BOARD_SUBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:indeed|linkedin) application:\s*(?P<position>.+?)\s*$")
        .expect("valid regex")
});

/// "... for the <position> position at <Company>"
pub static POSITION_AT_COMPANY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?i:for|to) (?i:the )?(?P<position>[A-Z][\w/&+#.' -]{1,60}?) (?i:position|role|opening|job)? ?(?i:at|with) (?P<company>[A-Z][\w&.'-]*(?: [A-Z][\w&.'-]*){0,4})",
    )
    .expect("valid regex")
});

pub static COMPANY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i:applying to|applied to|interest in|application (?:to|with)|team at|position at|role at|job at|careers? at|opportunity at|joining) (?P<company>[A-Z][\w&.'-]*(?: [A-Z][\w&.'-]*){0,4})",
    )
    .expect("valid regex")
});

pub static POSITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i:for the|for our|the) (?P<position>[A-Z][\w/&+#.' -]{1,60}?) (?i:position|role|opening)|(?i:position|role|job title)(?::| of) (?P<position2>[A-Z][\w/&+#.' -]{1,60})",
    )
    .expect("valid regex")
});

pub static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i:location|based in|located in)(?::|\s)\s*(?P<location>[A-Z][A-Za-z .'-]+(?:, ?[A-Z][A-Za-z .'-]+)?)",
    )
    .expect("valid regex")
});

/// Suffixes stripped from sender display names to recover the employer.
pub const DISPLAY_NAME_SUFFIXES: &[&str] = &[
    " recruiting team",
    " recruiting",
    " talent acquisition",
    " talent team",
    " talent",
    " careers",
    " hiring team",
    " hiring",
    " jobs",
    " hr",
    " people team",
];

/// Display names that name a service, not an employer.
pub const NON_EMPLOYER_NAMES: &[&str] = &[
    "no-reply",
    "noreply",
    "do not reply",
    "donotreply",
    "notifications",
    "workday",
    "greenhouse",
    "lever",
    "indeed",
    "linkedin",
    "glassdoor",
    "icims",
    "smartrecruiters",
    "jobvite",
    "recruiting",
    "careers",
    "talent acquisition",
];

//! Inbound intent detection.
//!
//! The router intercepts a small set of intents before the LLM loop runs.
//! Currently: the "run a cron job once" request, matched by normalized
//! keyword lookup with an optional explicit `job-<id>` reference.

use std::sync::OnceLock;

use regex::Regex;

/// Keywords that mark a message as a one-shot cron run request.
///
/// Matching is case-insensitive substring over the whole message. The
/// localized entries cover the "run a scheduled task once" phrasing in
/// Chinese.
const CRON_RUN_KEYWORDS: &[&str] = &[
    "cron run",
    "run cron job",
    "run the cron job",
    "只测试一次",
    "执行一次定时任务",
    "运行一次定时任务",
    "跑一次定时任务",
];

/// A detected one-shot cron run intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronRunIntent {
    /// Explicit job id from the message, when present.
    pub job_id: Option<String>,
}

/// Detect a one-shot cron run request in an inbound message.
pub fn detect_cron_run(content: &str) -> Option<CronRunIntent> {
    let normalized = content.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }

    let matched = CRON_RUN_KEYWORDS
        .iter()
        .any(|kw| normalized.contains(&kw.to_lowercase()));
    if !matched {
        return None;
    }

    Some(CronRunIntent {
        job_id: extract_job_id(content),
    })
}

/// Extract an explicit `job-<alnum>` reference from free text.
pub fn extract_job_id(content: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"job-[A-Za-z0-9]+").expect("valid job-id regex"));
    re.find(content).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_keyword_matches() {
        let intent = detect_cron_run("please cron run the report").unwrap();
        assert!(intent.job_id.is_none());
    }

    #[test]
    fn keyword_is_case_insensitive() {
        assert!(detect_cron_run("Cron Run now").is_some());
    }

    #[test]
    fn chinese_one_shot_matches() {
        let intent = detect_cron_run("只测试一次定时任务").unwrap();
        assert!(intent.job_id.is_none());
    }

    #[test]
    fn chinese_run_once_variants_match() {
        assert!(detect_cron_run("帮我执行一次定时任务").is_some());
        assert!(detect_cron_run("运行一次定时任务吧").is_some());
    }

    #[test]
    fn explicit_job_id_extracted() {
        let intent = detect_cron_run("cron run job-a1b2c3 please").unwrap();
        assert_eq!(intent.job_id.as_deref(), Some("job-a1b2c3"));
    }

    #[test]
    fn unrelated_text_does_not_match() {
        assert!(detect_cron_run("what's the weather?").is_none());
        assert!(detect_cron_run("my cron expression is broken").is_none());
        assert!(detect_cron_run("").is_none());
    }

    #[test]
    fn job_id_regex_stops_at_non_alnum() {
        assert_eq!(extract_job_id("see job-abc123,then").as_deref(), Some("job-abc123"));
        assert_eq!(extract_job_id("no id here"), None);
    }
}

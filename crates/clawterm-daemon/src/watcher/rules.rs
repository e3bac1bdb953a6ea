//! Match rules per alert category.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use tracing::warn;

use clawterm_core::AlertCategory;

/// Ordered rules for one category; the first match wins.
pub struct CategoryRules {
    pub category: AlertCategory,
    pub rules: Vec<Regex>,
}

impl CategoryRules {
    /// Text matched by the first matching rule in `text`.
    pub fn first_match<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.rules
            .iter()
            .find_map(|rule| rule.find(text))
            .map(|m| m.as_str())
    }
}

// (pattern, case-insensitive)
const PERMISSION: &[(&str, bool)] = &[
    (r"\bAllow\b", true),
    (r"\(y/n\)", true),
    (r"Do you want to", true),
    (r"\bapprove\b", true),
    (r"\bpermission\b", true),
    (r"Press Enter to", true),
];

const ERROR: &[(&str, bool)] = &[
    (r"\bError:", false),
    (r"\bERROR\b", false),
    (r"\bENOENT\b", false),
    (r"\bTypeError\b", false),
    (r"\bSyntaxError\b", false),
    (r"\bfatal:", false),
    (r"command not found", false),
    (r"\bpanic\b", true),
    (r"\bFAILED\b", false),
];

const COMPLETION: &[(&str, bool)] = &[
    (r"(?m)\bDone[.!]?\s*$", false),
    (r"\bCompleted?\b", true),
    (r"\bFinished\b", true),
    (r"\bSuccess\b", true),
];

/// Categories in evaluation order.
pub static CATEGORIES: LazyLock<Vec<CategoryRules>> = LazyLock::new(|| {
    AlertCategory::ALL
        .iter()
        .map(|&category| CategoryRules {
            category,
            rules: compile(patterns(category)),
        })
        .collect()
});

const fn patterns(category: AlertCategory) -> &'static [(&'static str, bool)] {
    match category {
        AlertCategory::Permission => PERMISSION,
        AlertCategory::Error => ERROR,
        AlertCategory::Completion => COMPLETION,
    }
}

fn compile(patterns: &[(&str, bool)]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|&(pattern, case_insensitive)| {
            RegexBuilder::new(pattern)
                .case_insensitive(case_insensitive)
                .build()
                .inspect_err(|e| warn!(pattern, error = %e, "Skipping invalid watcher rule"))
                .ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(category: AlertCategory) -> &'static CategoryRules {
        CATEGORIES
            .iter()
            .find(|c| c.category == category)
            .unwrap_or_else(|| panic!("missing {category}"))
    }

    #[test]
    fn every_rule_compiles() {
        assert_eq!(rules(AlertCategory::Permission).rules.len(), PERMISSION.len());
        assert_eq!(rules(AlertCategory::Error).rules.len(), ERROR.len());
        assert_eq!(rules(AlertCategory::Completion).rules.len(), COMPLETION.len());
    }

    #[test]
    fn first_matching_rule_wins() {
        let permission = rules(AlertCategory::Permission);
        assert_eq!(
            permission.first_match("Do you want to proceed? (y/n)"),
            Some("(y/n)")
        );
        assert_eq!(permission.first_match("allow edits?"), Some("allow"));
    }

    #[test]
    fn error_rules_are_case_sensitive_except_panic() {
        let error = rules(AlertCategory::Error);
        assert_eq!(error.first_match("error: lowercase"), None);
        assert_eq!(error.first_match("thread 'main' PANICKED"), None);
        assert_eq!(error.first_match("a Panic occurred"), Some("Panic"));
        assert_eq!(error.first_match("bash: foo: command not found"), Some("command not found"));
    }

    #[test]
    fn done_must_end_a_line() {
        let completion = rules(AlertCategory::Completion);
        assert_eq!(completion.first_match("Done.\n$ "), Some("Done."));
        assert_eq!(completion.first_match("Done with step one, next"), None);
        assert_eq!(completion.first_match("Build finished"), Some("finished"));
    }
}

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use super::parser::{Feed, Item};
use crate::config::Rule;

/// First standalone 3-4 digit number in a title ("Jour 640", "#1024 - ...").
///
/// Word boundaries are ASCII-only so "640ème" still yields 640.
static EPISODE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u:\b)([0-9]{3,4})(?-u:\b)").expect("episode token pattern is valid")
});

/// Multi-part markers such as `[1/2]`, `[2/2]`, `[10 / 10]`.
static FRACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([0-9]+)\s*/\s*([0-9]+)\]").expect("fraction pattern is valid")
});

/// Errors raised while evaluating rules.
///
/// Only configuration mistakes fail a request; missing or odd item data never does.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid title_regex pattern {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A rule prepared for repeated evaluation over a feed's items.
enum CompiledRule {
    /// `None` when the configured threshold is unparseable (rule keeps everything).
    LengthMax(Option<u64>),
    TitleContains(String),
    TitleExcludes(String),
    TitleRegex(Regex),
    EpisodeNumberMin(u32),
    TitleFractionEquals,
    Unknown,
}

impl CompiledRule {
    fn compile(rule: &Rule) -> Result<Self, RuleError> {
        Ok(match rule {
            Rule::LengthMax { value } => {
                let max = parse_itunes_duration(value);
                if max.is_none() {
                    tracing::warn!(value = %value, "Can't parse length_max threshold, rule ignored");
                }
                CompiledRule::LengthMax(max)
            }
            Rule::TitleContains { value } => CompiledRule::TitleContains(value.to_lowercase()),
            Rule::TitleExcludes { value } => CompiledRule::TitleExcludes(value.to_lowercase()),
            Rule::TitleRegex { value } => {
                let re = Regex::new(value).map_err(|source| RuleError::InvalidRegex {
                    pattern: value.clone(),
                    source,
                })?;
                CompiledRule::TitleRegex(re)
            }
            Rule::EpisodeNumberMin { min } => CompiledRule::EpisodeNumberMin(*min),
            Rule::TitleFractionEquals => CompiledRule::TitleFractionEquals,
            Rule::Unknown => CompiledRule::Unknown,
        })
    }

    fn matches(&self, item: &Item) -> bool {
        let title = item.title.as_str();

        match self {
            CompiledRule::LengthMax(None) => true,
            CompiledRule::LengthMax(Some(max)) => {
                if item.duration.trim().is_empty() {
                    tracing::warn!(title = %title, "No duration provided, keeping item");
                    return true;
                }
                match parse_itunes_duration(&item.duration) {
                    Some(seconds) => seconds <= *max,
                    None => {
                        tracing::warn!(
                            title = %title,
                            duration = %item.duration,
                            "Can't parse duration, keeping item"
                        );
                        true
                    }
                }
            }
            CompiledRule::TitleContains(needle) => title.to_lowercase().contains(needle.as_str()),
            CompiledRule::TitleExcludes(needle) => !title.to_lowercase().contains(needle.as_str()),
            CompiledRule::TitleRegex(re) => re.is_match(title),
            CompiledRule::EpisodeNumberMin(min) => {
                if item.episode > 0 {
                    return item.episode >= *min;
                }
                // Fall back to a number embedded in the title
                EPISODE_TOKEN
                    .captures(title)
                    .and_then(|caps| caps[1].parse::<u32>().ok())
                    .is_some_and(|n| n >= *min)
            }
            CompiledRule::TitleFractionEquals => FRACTION.captures(title).is_some_and(|caps| {
                match (caps[1].parse::<u64>(), caps[2].parse::<u64>()) {
                    (Ok(part), Ok(total)) => part == total,
                    _ => false,
                }
            }),
            CompiledRule::Unknown => true,
        }
    }
}

/// Filters a feed's items through an ordered rule list.
///
/// An item survives only if every rule accepts it; evaluation stops at the first
/// rule that rejects. The channel title is carried over and item order is kept.
///
/// # Errors
///
/// Returns [`RuleError::InvalidRegex`] if a `title_regex` rule does not compile.
/// This fails the whole evaluation, unlike missing item data which always keeps
/// the item.
pub fn apply_rules(feed: &Feed, rules: &[Rule]) -> Result<Feed, RuleError> {
    let compiled = rules
        .iter()
        .map(CompiledRule::compile)
        .collect::<Result<Vec<_>, _>>()?;

    let items = feed
        .items
        .iter()
        .filter(|item| compiled.iter().all(|rule| rule.matches(item)))
        .cloned()
        .collect();

    Ok(Feed {
        title: feed.title.clone(),
        items,
    })
}

/// Parses an iTunes duration into seconds.
///
/// Accepted forms:
/// - `"SS"` (plain seconds, any magnitude)
/// - `"MM:SS"`
/// - `"H:MM:SS"` / `"HH:MM:SS"`
///
/// Returns `None` for empty input, negative or non-numeric parts, or more than
/// three components.
pub fn parse_itunes_duration(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut seconds: u64 = 0;
    let mut count = 0;
    for part in s.split(':') {
        count += 1;
        if count > 3 {
            return None;
        }
        let part = part.trim();
        if part.is_empty() {
            return None;
        }
        let n: u64 = part.parse().ok()?;
        seconds = seconds.checked_mul(60)?.checked_add(n)?;
    }

    Some(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item(title: &str) -> Item {
        Item {
            title: title.to_string(),
            ..Item::default()
        }
    }

    fn feed(items: Vec<Item>) -> Feed {
        Feed {
            title: "Channel".to_string(),
            items,
        }
    }

    fn kept_titles(out: &Feed) -> Vec<&str> {
        out.items.iter().map(|i| i.title.as_str()).collect()
    }

    #[test]
    fn test_episode_number_min_uses_explicit_episode() {
        let input = feed(vec![
            Item {
                episode: 639,
                ..item("Jour 639")
            },
            Item {
                episode: 640,
                ..item("Jour 640")
            },
        ]);

        let out = apply_rules(&input, &[Rule::EpisodeNumberMin { min: 640 }]).unwrap();
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].episode, 640);
    }

    #[test]
    fn test_episode_number_min_falls_back_to_title() {
        let input = feed(vec![
            item("Jour 639 - la suite"),
            item("Jour 1024"),
            item("Episode 12"),
            item("Sans numéro"),
        ]);

        let out = apply_rules(&input, &[Rule::EpisodeNumberMin { min: 640 }]).unwrap();
        assert_eq!(kept_titles(&out), vec!["Jour 1024"]);
    }

    #[test]
    fn test_episode_number_min_ignores_longer_numbers() {
        // 12345 is not a 3-4 digit token; 700 is the first standalone one
        let input = feed(vec![item("Ref 12345 part 700")]);
        let out = apply_rules(&input, &[Rule::EpisodeNumberMin { min: 640 }]).unwrap();
        assert_eq!(out.items.len(), 1);
    }

    #[test]
    fn test_episode_number_min_token_before_accented_suffix() {
        let input = feed(vec![item("Le 640ème jour"), item("Le 639ème jour")]);
        let out = apply_rules(&input, &[Rule::EpisodeNumberMin { min: 640 }]).unwrap();
        assert_eq!(kept_titles(&out), vec!["Le 640ème jour"]);
    }

    #[test]
    fn test_title_contains_case_insensitive() {
        let input = feed(vec![item("Normal episode"), item("[REDIFF] Old episode")]);
        let out = apply_rules(
            &input,
            &[Rule::TitleContains {
                value: "[rediff]".to_string(),
            }],
        )
        .unwrap();
        assert_eq!(kept_titles(&out), vec!["[REDIFF] Old episode"]);
    }

    #[test]
    fn test_title_excludes() {
        let input = feed(vec![item("Normal episode"), item("[REDIFF] Old episode")]);
        let out = apply_rules(
            &input,
            &[Rule::TitleExcludes {
                value: "REDIFF".to_string(),
            }],
        )
        .unwrap();
        assert_eq!(kept_titles(&out), vec!["Normal episode"]);
    }

    #[test]
    fn test_title_regex_is_unanchored() {
        let input = feed(vec![item("Bonus: interview"), item("Episode 3")]);
        let out = apply_rules(
            &input,
            &[Rule::TitleRegex {
                value: r"(?i)interview".to_string(),
            }],
        )
        .unwrap();
        assert_eq!(kept_titles(&out), vec!["Bonus: interview"]);
    }

    #[test]
    fn test_invalid_regex_fails_evaluation() {
        let input = feed(vec![item("anything")]);
        let err = apply_rules(
            &input,
            &[Rule::TitleRegex {
                value: "([unclosed".to_string(),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::InvalidRegex { ref pattern, .. } if pattern == "([unclosed"));
        assert!(err.to_string().contains("([unclosed"));
    }

    #[test]
    fn test_title_fraction_equals() {
        let input = feed(vec![
            item("[1/2] L'affaire des petits pains au chocolat"),
            item("[2/2] L'affaire des petits pains au chocolat"),
            item("[3/3] Autre affaire"),
            item("[2/3] Encore autre chose"),
            item("Épisode sans fraction"),
        ]);

        let out = apply_rules(&input, &[Rule::TitleFractionEquals]).unwrap();
        assert_eq!(
            kept_titles(&out),
            vec![
                "[2/2] L'affaire des petits pains au chocolat",
                "[3/3] Autre affaire"
            ]
        );
    }

    #[test]
    fn test_title_fraction_uses_first_match_and_tolerates_spaces() {
        let input = feed(vec![item("[10 / 10] Finale [1/2]"), item("[1/2] Part [2/2]")]);
        let out = apply_rules(&input, &[Rule::TitleFractionEquals]).unwrap();
        assert_eq!(kept_titles(&out), vec!["[10 / 10] Finale [1/2]"]);
    }

    #[test]
    fn test_length_max() {
        let input = feed(vec![
            Item {
                duration: "9:59".to_string(),
                ..item("short")
            },
            Item {
                duration: "10:01".to_string(),
                ..item("long")
            },
            Item {
                duration: String::new(),
                ..item("unknown")
            },
            Item {
                duration: "about ten minutes".to_string(),
                ..item("garbled")
            },
        ]);

        let out = apply_rules(
            &input,
            &[Rule::LengthMax {
                value: "10:00".to_string(),
            }],
        )
        .unwrap();
        assert_eq!(kept_titles(&out), vec!["short", "unknown", "garbled"]);
    }

    #[test]
    fn test_length_max_with_unparseable_threshold_keeps_all() {
        let input = feed(vec![Item {
            duration: "5:00:00".to_string(),
            ..item("very long")
        }]);
        let out = apply_rules(
            &input,
            &[Rule::LengthMax {
                value: "ten minutes".to_string(),
            }],
        )
        .unwrap();
        assert_eq!(out.items.len(), 1);
    }

    #[test]
    fn test_unknown_rule_keeps_everything() {
        let input = feed(vec![item("a"), item("b")]);
        let out = apply_rules(&input, &[Rule::Unknown]).unwrap();
        assert_eq!(out.items.len(), 2);
    }

    #[test]
    fn test_rules_are_anded_in_order() {
        let input = feed(vec![
            Item {
                episode: 700,
                ..item("[2/2] Keep")
            },
            Item {
                episode: 700,
                ..item("[1/2] Drop")
            },
            Item {
                episode: 10,
                ..item("[2/2] Too early")
            },
        ]);
        let rules = [Rule::EpisodeNumberMin { min: 640 }, Rule::TitleFractionEquals];
        let out = apply_rules(&input, &rules).unwrap();
        assert_eq!(kept_titles(&out), vec!["[2/2] Keep"]);
        assert_eq!(out.title, "Channel");
    }

    #[test]
    fn test_no_rules_keeps_everything() {
        let input = feed(vec![item("a"), item("b")]);
        assert_eq!(apply_rules(&input, &[]).unwrap(), input);
    }

    #[test]
    fn test_parse_itunes_duration_forms() {
        assert_eq!(parse_itunes_duration("1234"), Some(1234));
        assert_eq!(parse_itunes_duration(" 09:59 "), Some(599));
        assert_eq!(parse_itunes_duration("1:02:03"), Some(3723));
        assert_eq!(parse_itunes_duration("01:02:03"), Some(3723));
    }

    #[test]
    fn test_parse_itunes_duration_rejects() {
        assert_eq!(parse_itunes_duration(""), None);
        assert_eq!(parse_itunes_duration("   "), None);
        assert_eq!(parse_itunes_duration("-5"), None);
        assert_eq!(parse_itunes_duration("1:2:3:4"), None);
        assert_eq!(parse_itunes_duration("10:"), None);
        assert_eq!(parse_itunes_duration("ab:cd"), None);
    }
}

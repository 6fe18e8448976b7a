//! Config validation: unknown-key detection with Levenshtein suggestions
//! and plausibility range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for `TrackingConfig`.
///
/// Maintained by hand to match the struct hierarchy in tracking_config.rs.
/// Any new field added to `TrackingConfig` must be added here too.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [sampling]
        "sampling",
        "sampling.interval_ms",
        "sampling.min_interval_ms",
        "sampling.max_delay_ms",
        "sampling.high_accuracy",
        // [filter]
        "filter",
        "filter.min_movement_deg",
        // [heading]
        "heading",
        "heading.smoothing_factor",
        "heading.emit_threshold_deg",
        // [delivery]
        "delivery",
        "delivery.base_url",
        "delivery.timeout_secs",
        "delivery.max_in_flight",
        // [lifecycle]
        "lifecycle",
        "lifecycle.max_hold_secs",
        "lifecycle.tag",
        "lifecycle.lock_dir",
        // [roles]
        "roles",
        "roles.pickup",
        "roles.pickup.primary_path",
        "roles.pickup.fallback_path",
        "roles.pickup.status",
        "roles.pickup.min_movement_deg",
        "roles.delivery",
        "roles.delivery.primary_path",
        "roles.delivery.fallback_path",
        "roles.delivery.status",
        "roles.delivery.min_movement_deg",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by(|(ka, da), (kb, db)| da.cmp(db).then_with(|| ka.cmp(kb)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// Unknown keys never fail the load; they are only reported.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Plausibility Ranges
// ============================================================================

/// Check a parsed config for values that are legal but unlikely to be intended.
///
/// Returns warnings only; hard errors live in `TrackingConfig::validate()`.
pub fn validate_ranges(config: &super::TrackingConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    // Beyond a minute between fixes the live marker is visibly stale.
    if config.sampling.interval_ms > 60_000 {
        warnings.push(ValidationWarning {
            field: "sampling.interval_ms".to_string(),
            message: format!(
                "sampling.interval_ms = {} is above 60 s; live positions will lag",
                config.sampling.interval_ms
            ),
            suggestion: None,
        });
    }

    // 0.01° ≈ 1.1 km: a courier could cross a neighbourhood unreported.
    let eps = config.filter.min_movement_deg;
    if eps > 0.01 {
        warnings.push(ValidationWarning {
            field: "filter.min_movement_deg".to_string(),
            message: format!("filter.min_movement_deg = {eps} suppresses movement over ~1 km"),
            suggestion: None,
        });
    }

    if config.lifecycle.max_hold_secs * 1_000 < config.sampling.interval_ms {
        warnings.push(ValidationWarning {
            field: "lifecycle.max_hold_secs".to_string(),
            message: format!(
                "lifecycle.max_hold_secs = {} expires before the first fix interval",
                config.lifecycle.max_hold_secs
            ),
            suggestion: None,
        });
    }

    warnings
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingConfig;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("hello", "hello"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("intreval_ms", "interval_ms"), 2);
        assert_eq!(levenshtein("fallbak_path", "fallback_path"), 1);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [roles]
            [roles.pickup]
            primary_path = "/a"
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"roles".to_string()));
        assert!(keys.contains(&"roles.pickup".to_string()));
        assert!(keys.contains(&"roles.pickup.primary_path".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let toml_str = r#"
[heading]
smoothing_facter = 0.1
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].field.contains("smoothing_facter"));
        assert_eq!(
            warnings[0].suggestion.as_deref(),
            Some("heading.smoothing_factor")
        );
    }

    #[test]
    fn test_all_valid_keys_produce_zero_warnings() {
        let toml_str = r#"
[sampling]
interval_ms = 3000

[roles.delivery]
primary_path = "/x"
fallback_path = "/y"
status = "on_the_way"
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {:?}", warnings);
    }

    #[test]
    fn test_suggest_correction_no_match_for_garbage() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }

    #[test]
    fn test_ranges_defaults_clean() {
        let warnings = validate_ranges(&TrackingConfig::default());
        assert!(warnings.is_empty(), "Defaults should produce no warnings: {:?}", warnings);
    }

    #[test]
    fn test_ranges_flags_huge_threshold() {
        let mut config = TrackingConfig::default();
        config.filter.min_movement_deg = 0.5;
        let warnings = validate_ranges(&config);
        assert!(warnings.iter().any(|w| w.field == "filter.min_movement_deg"));
    }
}

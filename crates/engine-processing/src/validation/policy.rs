use crate::error::PolicyError;
use regex::Regex;
use std::collections::HashSet;

pub const DEFAULT_NOTE_MAX_LEN: usize = 500;

/// Data-handling rules supplied by the district. Field names compare
/// case-insensitively.
#[derive(Debug, Clone)]
pub struct DataHandlingPolicy {
    disallowed_fields: HashSet<String>,
    disallowed_patterns: Vec<Regex>,
    note_max_len: usize,
}

impl Default for DataHandlingPolicy {
    fn default() -> Self {
        Self {
            disallowed_fields: HashSet::new(),
            disallowed_patterns: Vec::new(),
            note_max_len: DEFAULT_NOTE_MAX_LEN,
        }
    }
}

impl DataHandlingPolicy {
    pub fn new<I, S>(
        disallowed_fields: I,
        disallowed_patterns: &[String],
        note_max_len: usize,
    ) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let disallowed_patterns = disallowed_patterns
            .iter()
            .enumerate()
            .map(|(index, pattern)| {
                Regex::new(pattern).map_err(|e| PolicyError::InvalidPattern {
                    index: index + 1,
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            disallowed_fields: disallowed_fields
                .into_iter()
                .map(|field| field.as_ref().trim().to_ascii_lowercase())
                .filter(|field| !field.is_empty())
                .collect(),
            disallowed_patterns,
            note_max_len,
        })
    }

    pub fn is_disallowed_field(&self, name: &str) -> bool {
        self.disallowed_fields.contains(&name.to_ascii_lowercase())
    }

    pub fn matches_disallowed_pattern(&self, value: &str) -> bool {
        self.disallowed_patterns.iter().any(|re| re.is_match(value))
    }

    pub fn note_max_len(&self) -> usize {
        self.note_max_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_match_case_insensitively() {
        let policy = DataHandlingPolicy::new(["SSN", " home_address "], &[], 100).unwrap();
        assert!(policy.is_disallowed_field("ssn"));
        assert!(policy.is_disallowed_field("Home_Address"));
        assert!(!policy.is_disallowed_field("note"));
    }

    #[test]
    fn bad_patterns_are_reported_by_position() {
        let err = DataHandlingPolicy::new(
            Vec::<String>::new(),
            &[r"\d+".to_string(), "(".to_string()],
            100,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidPattern { index: 2, .. }));
    }
}

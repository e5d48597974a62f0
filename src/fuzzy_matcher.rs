use crate::schema::SchemaSnapshot;
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

/// How a suggested name was found. Lower ranks always win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchRank {
    /// Equal once underscores are removed and case is folded.
    Normalized,
    /// One normalized name is a prefix of the other (shorter side > 2 chars).
    Prefix,
    /// Jaro-Winkler similarity at or above the matcher threshold.
    Similar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameMatch {
    pub name: String,
    pub rank: MatchRank,
}

/// A suggested column together with the table it lives in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMatch {
    pub table: String,
    pub column: String,
    pub rank: MatchRank,
}

/// Schema name matcher for unknown table/column identifiers
pub struct SchemaNameMatcher {
    /// Similarity threshold (0.0-1.0) for the last-resort rank
    pub similarity_threshold: f64,
}

impl Default for SchemaNameMatcher {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.88,
        }
    }
}

impl SchemaNameMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            similarity_threshold: threshold,
        }
    }

    /// Normalize a name for matching
    /// - Converts to lowercase
    /// - Removes underscores
    /// - Strips identifier quoting
    pub fn normalize(name: &str) -> String {
        name.trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']')
            .to_lowercase()
            .replace('_', "")
    }

    fn rank(&self, offending: &str, candidate: &str) -> Option<MatchRank> {
        let a = Self::normalize(offending);
        let b = Self::normalize(candidate);
        if a.is_empty() || b.is_empty() {
            return None;
        }
        if a == b {
            return Some(MatchRank::Normalized);
        }
        let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
        if short.len() > 2 && long.starts_with(short.as_str()) {
            return Some(MatchRank::Prefix);
        }
        if jaro_winkler(&a, &b) >= self.similarity_threshold {
            return Some(MatchRank::Similar);
        }
        None
    }

    /// Best candidate for `offending`: the best rank wins, ties go to the
    /// first candidate in iteration order.
    pub fn best_match<'a, I>(&self, offending: &str, candidates: I) -> Option<NameMatch>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best: Option<NameMatch> = None;
        for candidate in candidates {
            if candidate.eq_ignore_ascii_case(offending) {
                // the name exists verbatim, so it is not a correction
                continue;
            }
            let Some(rank) = self.rank(offending, candidate) else {
                continue;
            };
            if best.as_ref().map_or(true, |b| rank < b.rank) {
                best = Some(NameMatch {
                    name: candidate.to_string(),
                    rank,
                });
                if rank == MatchRank::Normalized {
                    break;
                }
            }
        }
        best
    }

    pub fn match_table(&self, snapshot: &SchemaSnapshot, table: &str) -> Option<NameMatch> {
        self.best_match(table, snapshot.tables.iter().map(|t| t.as_str()))
    }

    pub fn match_column(
        &self,
        snapshot: &SchemaSnapshot,
        table: &str,
        column: &str,
    ) -> Option<ColumnMatch> {
        let canonical = snapshot.find_table(table)?;
        self.best_match(column, snapshot.columns_of(canonical).iter().map(|c| c.as_str()))
            .map(|m| ColumnMatch {
                table: canonical.to_string(),
                column: m.name,
                rank: m.rank,
            })
    }

    /// Column search across every table: all tables are tried at each rank
    /// before moving on to the next rank.
    pub fn match_column_anywhere(
        &self,
        snapshot: &SchemaSnapshot,
        column: &str,
    ) -> Option<ColumnMatch> {
        let mut best: Option<ColumnMatch> = None;
        for (table, _) in snapshot.iter() {
            if let Some(m) = self.match_column(snapshot, table, column) {
                if best.as_ref().map_or(true, |b| m.rank < b.rank) {
                    let done = m.rank == MatchRank::Normalized;
                    best = Some(m);
                    if done {
                        break;
                    }
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::new()
            .with_table("patients", &["patient_id", "full_name", "gender"])
            .with_table("visits", &["visit_id", "patient_id", "visit_date"])
            .with_table("prescriptions", &["prescription_id", "drug_name"])
    }

    #[test]
    fn test_normalized_match_beats_prefix() {
        let matcher = SchemaNameMatcher::default();
        let m = matcher.match_column(&snapshot(), "patients", "fullname").unwrap();
        assert_eq!(m.column, "full_name");
        assert_eq!(m.rank, MatchRank::Normalized);
    }

    #[test]
    fn test_normalized_beats_earlier_prefix_candidate() {
        let matcher = SchemaNameMatcher::default();
        let m = matcher
            .best_match("fullname", ["full_name_old", "Full_Name"].into_iter())
            .unwrap();
        assert_eq!(m.name, "Full_Name");
    }

    #[test]
    fn test_prefix_match_first_encountered_wins() {
        let matcher = SchemaNameMatcher::default();
        let m = matcher
            .best_match("visit", ["visit_id", "visit_date"].into_iter())
            .unwrap();
        assert_eq!(m.name, "visit_id");
        assert_eq!(m.rank, MatchRank::Prefix);
    }

    #[test]
    fn test_short_prefix_is_ignored() {
        let matcher = SchemaNameMatcher::default();
        assert!(matcher.best_match("id", ["identifier"].into_iter()).is_none());
    }

    #[test]
    fn test_similarity_rank_for_typos() {
        let matcher = SchemaNameMatcher::default();
        let m = matcher.match_table(&snapshot(), "perscriptions").unwrap();
        assert_eq!(m.name, "prescriptions");
        assert_eq!(m.rank, MatchRank::Similar);
    }

    #[test]
    fn test_table_match() {
        let matcher = SchemaNameMatcher::default();
        let m = matcher.match_table(&snapshot(), "patient").unwrap();
        assert_eq!(m.name, "patients");
        assert_eq!(m.rank, MatchRank::Prefix);
    }

    #[test]
    fn test_column_anywhere_prefers_better_rank_over_order() {
        let matcher = SchemaNameMatcher::default();
        let m = matcher.match_column_anywhere(&snapshot(), "visitdate").unwrap();
        assert_eq!(m.table, "visits");
        assert_eq!(m.column, "visit_date");
    }

    #[test]
    fn test_no_candidates() {
        let matcher = SchemaNameMatcher::default();
        assert!(matcher.match_column(&snapshot(), "patients", "zzz").is_none());
        assert!(matcher.match_column(&snapshot(), "unknown", "full_name").is_none());
    }
}

//! Relaxed version parsing and ordering shared by every adapter.
//!
//! Package indexes carry versions that are not strict semver:
//! pre-release suffixes (`1.0rc1`), PEP 440 epochs (`1!2.0`), and
//! Debian epochs (`1:1.24.0`) all occur in practice. The comparison
//! extracts the leading numeric components and keeps the remainder as
//! a tie-breaker rather than discarding non-conforming versions.

use std::cmp::Ordering;

/// A version split into epoch, numeric release components, and an
/// uninterpreted remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaxedVersion {
    epoch: u64,
    release: Vec<u64>,
    rest: String,
    raw: String,
}

impl RelaxedVersion {
    /// Parse never fails: anything unrecognizable becomes an empty
    /// release with the whole string as remainder.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let (epoch, body) = split_epoch(trimmed);

        let mut release = Vec::new();
        let mut remainder = body;
        loop {
            let digits: String = remainder.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                break;
            }
            match digits.parse::<u64>() {
                Ok(component) => release.push(component),
                Err(_) => break,
            }
            remainder = &remainder[digits.len()..];
            if let Some(next) = remainder.strip_prefix('.') {
                if next.chars().next().map(|c| c.is_ascii_digit()) == Some(true) {
                    remainder = next;
                    continue;
                }
            }
            break;
        }

        Self {
            epoch,
            release,
            rest: remainder.to_string(),
            raw: raw.to_string(),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Numeric release component at `index`, zero when absent.
    pub fn component(&self, index: usize) -> u64 {
        self.release.get(index).copied().unwrap_or(0)
    }

    pub fn major(&self) -> u64 {
        self.component(0)
    }

    pub fn minor(&self) -> u64 {
        self.component(1)
    }

    /// Compare by version meaning only, ignoring raw spelling, so
    /// `2.0` and `2.0.0` are equal. Use this for boundary tests.
    pub fn key_cmp(&self, other: &Self) -> Ordering {
        if self.epoch != other.epoch {
            return self.epoch.cmp(&other.epoch);
        }
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            let ordering = self.component(i).cmp(&other.component(i));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        cmp_rest(&self.rest, &other.rest)
    }
}

impl Ord for RelaxedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key_cmp(other).then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for RelaxedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn split_epoch(body: &str) -> (u64, &str) {
    for separator in ['!', ':'] {
        if let Some((head, tail)) = body.split_once(separator) {
            if let Ok(epoch) = head.parse::<u64>() {
                return (epoch, tail);
            }
        }
    }
    (0, body)
}

/// An empty remainder outranks a pre-release remainder: `1.0` comes
/// after `1.0rc1`. Two non-empty remainders compare lexicographically.
fn cmp_rest(a: &str, b: &str) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.cmp(b),
    }
}

/// Sort versions under the relaxed order, optionally filtered by a
/// cutoff: ascending keeps `v >= cutoff`, descending keeps
/// `v <= cutoff`.
pub fn sort(versions: &[String], ascending: bool, cutoff: Option<&str>) -> Vec<String> {
    let mut parsed: Vec<RelaxedVersion> = versions.iter().map(|v| RelaxedVersion::parse(v)).collect();
    parsed.sort();

    if let Some(cutoff) = cutoff {
        let bound = RelaxedVersion::parse(cutoff);
        parsed.retain(|v| {
            if ascending {
                v.key_cmp(&bound) != Ordering::Less
            } else {
                v.key_cmp(&bound) != Ordering::Greater
            }
        });
    }

    if !ascending {
        parsed.reverse();
    }

    parsed.into_iter().map(|v| v.raw).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ascending_sort_is_numeric_not_lexicographic() {
        let sorted = sort(&strs(&["0.10.0", "0.2.0", "0.9.1"]), true, None);
        assert_eq!(sorted, strs(&["0.2.0", "0.9.1", "0.10.0"]));
    }

    #[test]
    fn descending_cutoff_keeps_at_most_cutoff() {
        let sorted = sort(
            &strs(&["0.18.0", "0.19.2", "0.20.3", "0.21.0"]),
            false,
            Some("0.20.3"),
        );
        assert_eq!(sorted, strs(&["0.20.3", "0.19.2", "0.18.0"]));
    }

    #[test]
    fn ascending_cutoff_keeps_at_least_cutoff() {
        let sorted = sort(
            &strs(&["1.0", "1.1", "2.0", "0.9"]),
            true,
            Some("1.1"),
        );
        assert_eq!(sorted, strs(&["1.1", "2.0"]));
    }

    #[test]
    fn prerelease_sorts_before_final() {
        let sorted = sort(&strs(&["1.0", "1.0rc1", "1.0a1"]), true, None);
        assert_eq!(sorted, strs(&["1.0a1", "1.0rc1", "1.0"]));
    }

    #[test]
    fn prereleases_are_kept_not_discarded() {
        let sorted = sort(&strs(&["2.0.0rc1", "1.9.0"]), false, None);
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0], "2.0.0rc1");
    }

    #[test]
    fn epochs_dominate_release_components() {
        let sorted = sort(&strs(&["1:1.0", "2.5", "1!1.9"]), true, None);
        assert_eq!(sorted, strs(&["2.5", "1:1.0", "1!1.9"]));
    }

    #[test]
    fn equivalent_spellings_compare_equal_by_key() {
        let a = RelaxedVersion::parse("2.0");
        let b = RelaxedVersion::parse("2.0.0");
        assert_eq!(a.key_cmp(&b), Ordering::Equal);
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_still_gets_a_stable_slot() {
        let sorted = sort(&strs(&["not-a-version", "1.0"]), true, None);
        assert_eq!(sorted, strs(&["not-a-version", "1.0"]));
    }

    #[test]
    fn components_default_to_zero() {
        let v = RelaxedVersion::parse("3");
        assert_eq!(v.major(), 3);
        assert_eq!(v.minor(), 0);
    }
}

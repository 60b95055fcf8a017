use crate::error::ResolveError;
use semver::Version;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// `~>`: only the right-most given component may increase.
    Pessimistic,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Clause {
    op: Op,
    version: Version,
    /// Number of components written, 1 to 3.
    precision: usize,
}

/// Comma-separated conjunction of version clauses, e.g. `>= 1.2, < 2.0` or `~> 4.1`.
/// An empty constraint matches every release.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionConstraint {
    clauses: Vec<Clause>,
}

impl VersionConstraint {
    pub fn parse(input: &str) -> Result<Self, ResolveError> {
        let invalid = |message: String| ResolveError::InvalidConstraint {
            constraint: input.to_string(),
            message,
        };

        let mut clauses = Vec::new();
        for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (op, rest) = [
                ("~>", Op::Pessimistic),
                (">=", Op::Ge),
                ("<=", Op::Le),
                ("!=", Op::Ne),
                (">", Op::Gt),
                ("<", Op::Lt),
                ("=", Op::Eq),
            ]
            .iter()
            .find_map(|(prefix, op)| part.strip_prefix(prefix).map(|rest| (*op, rest)))
            .unwrap_or((Op::Eq, part));

            let (version, precision) = parse_partial(rest.trim()).map_err(invalid)?;
            clauses.push(Clause {
                op,
                version,
                precision,
            });
        }

        Ok(Self { clauses })
    }

    pub fn matches(&self, candidate: &Version) -> bool {
        if !candidate.pre.is_empty() {
            // Pre-releases only match an exact pin.
            return self
                .clauses
                .iter()
                .any(|c| c.op == Op::Eq && &c.version == candidate);
        }
        self.clauses.iter().all(|c| c.matches(candidate))
    }
}

impl Clause {
    fn matches(&self, v: &Version) -> bool {
        let base = strip_pre(v);
        match self.op {
            Op::Eq => base == self.version,
            Op::Ne => base != self.version,
            Op::Gt => base > self.version,
            Op::Ge => base >= self.version,
            Op::Lt => base < self.version,
            Op::Le => base <= self.version,
            Op::Pessimistic => {
                let upper = if self.precision >= 3 {
                    Version::new(self.version.major, self.version.minor + 1, 0)
                } else {
                    Version::new(self.version.major + 1, 0, 0)
                };
                base >= self.version && base < upper
            }
        }
    }
}

fn strip_pre(v: &Version) -> Version {
    Version::new(v.major, v.minor, v.patch)
}

fn parse_partial(raw: &str) -> Result<(Version, usize), String> {
    let raw = raw.strip_prefix('v').unwrap_or(raw);
    let (numbers, pre) = match raw.split_once('-') {
        Some((numbers, pre)) => (numbers, Some(pre)),
        None => (raw, None),
    };

    let parts: Vec<&str> = numbers.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(format!("malformed version {raw:?}"));
    }
    let mut nums = [0u64; 3];
    for (i, part) in parts.iter().enumerate() {
        nums[i] = part
            .parse()
            .map_err(|_| format!("malformed version component {part:?}"))?;
    }

    let text = match pre {
        Some(pre) => format!("{}.{}.{}-{}", nums[0], nums[1], nums[2], pre),
        None => format!("{}.{}.{}", nums[0], nums[1], nums[2]),
    };
    let version = Version::parse(&text).map_err(|e| e.to_string())?;
    Ok((version, parts.len()))
}

/// Highest available version satisfying `constraint`. Unparseable entries are skipped.
pub fn select_version(available: &[String], constraint: &VersionConstraint) -> Option<Version> {
    available
        .iter()
        .filter_map(|v| parse_partial(v).ok().map(|(v, _)| v))
        .filter(|v| constraint.matches(v))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn versions(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn pick(constraint: &str, list: &[&str]) -> Option<String> {
        let c = VersionConstraint::parse(constraint).expect("constraint");
        select_version(&versions(list), &c).map(|v| v.to_string())
    }

    #[test]
    fn empty_constraint_picks_highest_release() {
        assert_eq!(
            pick("", &["1.0.0", "2.1.0", "2.2.0-beta.1", "1.9.9"]).as_deref(),
            Some("2.1.0")
        );
    }

    #[test]
    fn pessimistic_operator_bounds_the_last_component() {
        let list = ["1.1.0", "1.2.0", "1.2.7", "1.3.0", "2.0.0"];
        assert_eq!(pick("~> 1.2", &list).as_deref(), Some("1.3.0"));
        assert_eq!(pick("~> 1.2.0", &list).as_deref(), Some("1.2.7"));
        assert_eq!(pick("~> 1", &list).as_deref(), Some("1.3.0"));
    }

    #[test]
    fn conjunctions_and_exclusions() {
        let list = ["1.0.0", "1.5.0", "1.6.0", "2.0.0"];
        assert_eq!(pick(">= 1.0, < 2.0, != 1.6.0", &list).as_deref(), Some("1.5.0"));
        assert_eq!(pick("= 1.0.0", &list).as_deref(), Some("1.0.0"));
        assert_eq!(pick("1.6.0", &list).as_deref(), Some("1.6.0"));
        assert_eq!(pick("> 2.0.0", &list), None);
    }

    #[test]
    fn prerelease_requires_exact_pin() {
        let list = ["1.0.0", "1.1.0-rc.1"];
        assert_eq!(pick(">= 1.0.0", &list).as_deref(), Some("1.0.0"));
        assert_eq!(pick("= 1.1.0-rc.1", &list).as_deref(), Some("1.1.0-rc.1"));
    }

    #[test]
    fn malformed_constraints_are_errors() {
        assert!(VersionConstraint::parse(">= one").is_err());
        assert!(VersionConstraint::parse("1.2.3.4").is_err());
        assert!(VersionConstraint::parse("~> 1..2").is_err());
    }

    proptest! {
        #[test]
        fn selected_version_always_satisfies_constraint(
            major in 0u64..4, minor in 0u64..4,
            available in proptest::collection::vec((0u64..4, 0u64..4, 0u64..4), 0..8)
        ) {
            let constraint = VersionConstraint::parse(&format!("~> {major}.{minor}")).expect("constraint");
            let list: Vec<String> = available.iter().map(|(a, b, c)| format!("{a}.{b}.{c}")).collect();
            if let Some(chosen) = select_version(&list, &constraint) {
                prop_assert!(constraint.matches(&chosen));
                prop_assert!(list.contains(&chosen.to_string()));
            }
        }
    }
}

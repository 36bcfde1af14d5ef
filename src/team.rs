//! Team mapping and per-team rollups.
//!
//! Users are bucketed into the team the CSV mapping assigns them, unmapped users
//! into `Other`, and a `Total` row sums every real team.

use crate::error::{DashboardError, Result};
use crate::metrics::{mean, UserMetrics};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;
use std::path::Path;

/// Team name that the mapping may use explicitly for the catch-all bucket.
pub const OTHER_TEAM: &str = "Other";
pub const TOTAL_ROW: &str = "Total";

/// Automation accounts never attributed to any team.
pub const EXCLUDED_BOTS: &[&str] = &[
    "dependabot",
    "dependabot[bot]",
    "github-actions",
    "github-actions[bot]",
    "renovate",
    "renovate[bot]",
    "codecov",
    "codecov[bot]",
    "Copilot",
    "coderabbitai",
    "coderabbitai[bot]",
];

pub fn is_excluded_bot(username: &str) -> bool {
    EXCLUDED_BOTS.contains(&username)
}

/// One row of the team mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub github_username: String,
    pub team_name: String,
}

#[derive(Debug, Deserialize)]
struct MappingRecord {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    github_username: Option<String>,
    #[serde(default)]
    team_name: Option<String>,
}

/// Parses a mapping CSV with `github_username` and `team_name` columns (and an
/// optional `name`).
pub fn parse_team_mappings<R: Read>(reader: R) -> Result<Vec<TeamMember>> {
    let mut rows = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = rows
        .headers()
        .map_err(|e| DashboardError::MappingLoad(e.to_string()))?;
    for required in ["github_username", "team_name"] {
        if !headers.iter().any(|h| h == required) {
            return Err(DashboardError::MappingLoad(format!(
                "missing required column '{required}'"
            )));
        }
    }

    rows.deserialize::<MappingRecord>()
        .map(|record| -> Result<TeamMember> {
            let record = record.map_err(|e| DashboardError::MappingLoad(e.to_string()))?;
            Ok(TeamMember {
                name: record.name.filter(|n| !n.is_empty()),
                github_username: record.github_username.unwrap_or_default(),
                team_name: record.team_name.unwrap_or_default(),
            })
        })
        .collect()
}

pub async fn load_team_mappings(path: &Path) -> Result<Vec<TeamMember>> {
    let contents = tokio::fs::read(path).await.map_err(|e| {
        DashboardError::MappingLoad(format!("cannot read {}: {}", path.display(), e))
    })?;
    let members = parse_team_mappings(contents.as_slice())?;
    tracing::debug!(path = %path.display(), members = members.len(), "Loaded team mapping");
    Ok(members)
}

/// Identity of a row in the team rollup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TeamBucket {
    Team(String),
    /// Users with no (or an empty) team in the mapping.
    Other,
    /// Sum over every real team.
    Total,
}

impl TeamBucket {
    pub fn name(&self) -> &str {
        match self {
            TeamBucket::Team(name) => name,
            TeamBucket::Other => OTHER_TEAM,
            TeamBucket::Total => TOTAL_ROW,
        }
    }

    /// `Other`, `Total` and blank team names all land in the `Other` bucket.
    fn for_team_name(team_name: &str) -> Self {
        if team_name.is_empty() || team_name == OTHER_TEAM || team_name == TOTAL_ROW {
            TeamBucket::Other
        } else {
            TeamBucket::Team(team_name.to_string())
        }
    }
}

impl Serialize for TeamBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamMetrics {
    #[serde(rename = "teamName")]
    pub bucket: TeamBucket,
    #[serde(flatten)]
    pub metrics: UserMetrics,
    #[serde(rename = "prsPerPerson")]
    pub prs_per_person: f64,
    #[serde(rename = "totalMembers")]
    pub total_members: u64,
}

/// Running sums for one bucket.
#[derive(Debug, Default, Clone)]
struct Accumulator {
    merged_prs: u64,
    reviewed_prs: u64,
    open_prs_aged: u64,
    commits: u64,
    additions: u64,
    deletions: u64,
    changed_files: u64,
    /// Sum of `avg_cycle_time_hours * merged_prs`, i.e. total cycle hours.
    cycle_hours: f64,
}

impl Accumulator {
    fn add_user(&mut self, metrics: &UserMetrics) {
        self.merged_prs += metrics.merged_prs;
        self.reviewed_prs += metrics.reviewed_prs;
        self.open_prs_aged += metrics.open_prs_aged;
        self.commits += metrics.commits;
        self.additions += metrics.total_additions;
        self.deletions += metrics.total_deletions;
        self.changed_files += metrics.total_changed_files;
        self.cycle_hours += metrics.avg_cycle_time_hours * metrics.merged_prs as f64;
    }

    fn add(&mut self, other: &Accumulator) {
        self.merged_prs += other.merged_prs;
        self.reviewed_prs += other.reviewed_prs;
        self.open_prs_aged += other.open_prs_aged;
        self.commits += other.commits;
        self.additions += other.additions;
        self.deletions += other.deletions;
        self.changed_files += other.changed_files;
        self.cycle_hours += other.cycle_hours;
    }

    fn sums(&self) -> UserMetrics {
        UserMetrics {
            merged_prs: self.merged_prs,
            reviewed_prs: self.reviewed_prs,
            open_prs_aged: self.open_prs_aged,
            commits: self.commits,
            total_additions: self.additions,
            total_deletions: self.deletions,
            total_changed_files: self.changed_files,
            ..UserMetrics::default()
        }
    }

    fn with_averages(&self) -> UserMetrics {
        UserMetrics {
            avg_cycle_time_hours: mean(self.cycle_hours, self.merged_prs),
            avg_additions_per_pr: mean(self.additions as f64, self.merged_prs),
            avg_deletions_per_pr: mean(self.deletions as f64, self.merged_prs),
            avg_files_changed_per_pr: mean(self.changed_files as f64, self.merged_prs),
            ..self.sums()
        }
    }

    fn into_row(self, bucket: TeamBucket, members: u64) -> TeamMetrics {
        match bucket {
            TeamBucket::Other => TeamMetrics {
                bucket,
                metrics: self.sums(),
                prs_per_person: 0.0,
                total_members: 0,
            },
            bucket => TeamMetrics {
                metrics: self.with_averages(),
                prs_per_person: self.merged_prs as f64 / members.max(1) as f64,
                total_members: members,
                bucket,
            },
        }
    }
}

/// Rolls per-user metrics up into one row per mapped team, then `Other`, then `Total`.
///
/// `Total` sums only real teams; users routed to `Other` appear in no total.
pub fn group_metrics_by_team(
    user_metrics: &BTreeMap<String, UserMetrics>,
    members: &[TeamMember],
) -> Vec<TeamMetrics> {
    // First mapping row wins for a username listed twice.
    let mut team_of: HashMap<&str, &str> = HashMap::new();
    let mut team_order: Vec<&str> = Vec::new();
    let mut team_members: HashMap<&str, HashSet<&str>> = HashMap::new();

    for member in members {
        let team = member.team_name.as_str();
        if let TeamBucket::Team(_) = TeamBucket::for_team_name(team) {
            if !team_members.contains_key(team) {
                team_order.push(team);
                team_members.insert(team, HashSet::new());
            }
        }

        let username = member.github_username.as_str();
        if username.is_empty() || team_of.contains_key(username) {
            continue;
        }
        team_of.insert(username, team);
        if let Some(roster) = team_members.get_mut(team) {
            roster.insert(username);
        }
    }

    let mut teams: HashMap<&str, Accumulator> = team_order
        .iter()
        .map(|team| (*team, Accumulator::default()))
        .collect();
    let mut other = Accumulator::default();

    for (username, metrics) in user_metrics {
        if is_excluded_bot(username) {
            continue;
        }
        let team = team_of.get(username.as_str()).copied().unwrap_or("");
        match teams.get_mut(team) {
            Some(acc) => acc.add_user(metrics),
            None => other.add_user(metrics),
        }
    }

    let mut grand = Accumulator::default();
    let mut grand_members = 0u64;
    let mut rows = Vec::with_capacity(team_order.len() + 2);

    for team in &team_order {
        let acc = teams.remove(team).unwrap_or_default();
        let size = team_members.get(team).map_or(0, |roster| roster.len() as u64);
        grand.add(&acc);
        grand_members += size;
        rows.push(acc.into_row(TeamBucket::Team(team.to_string()), size));
    }

    rows.push(other.into_row(TeamBucket::Other, 0));
    rows.push(grand.into_row(TeamBucket::Total, grand_members));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(username: &str, team: &str) -> TeamMember {
        TeamMember {
            name: None,
            github_username: username.to_string(),
            team_name: team.to_string(),
        }
    }

    fn user(merged: u64, cycle: f64, additions: u64) -> UserMetrics {
        UserMetrics {
            merged_prs: merged,
            avg_cycle_time_hours: cycle,
            total_additions: additions,
            reviewed_prs: 1,
            ..UserMetrics::default()
        }
    }

    fn row<'a>(rows: &'a [TeamMetrics], name: &str) -> &'a TeamMetrics {
        rows.iter()
            .find(|r| r.bucket.name() == name)
            .unwrap_or_else(|| panic!("missing row {name}"))
    }

    #[test]
    fn test_two_team_scenario() {
        let members = vec![member("alice", "TeamA"), member("bob", "TeamB")];
        let metrics = BTreeMap::from([
            ("alice".to_string(), user(5, 10.0, 50)),
            ("bob".to_string(), user(3, 2.0, 30)),
        ]);

        let rows = group_metrics_by_team(&metrics, &members);

        assert_eq!(
            rows.iter().map(|r| r.bucket.name()).collect::<Vec<_>>(),
            vec!["TeamA", "TeamB", "Other", "Total"]
        );
        assert_eq!(row(&rows, "TeamA").metrics.merged_prs, 5);
        assert_eq!(row(&rows, "TeamB").metrics.merged_prs, 3);
        let total = row(&rows, "Total");
        assert_eq!(total.bucket, TeamBucket::Total);
        assert_eq!(total.metrics.merged_prs, 8);
        assert_eq!(total.metrics.avg_cycle_time_hours, 56.0 / 8.0);
        assert_eq!(total.metrics.avg_additions_per_pr, 10.0);
        assert_eq!(total.total_members, 2);
        assert_eq!(total.prs_per_person, 4.0);
    }

    #[test]
    fn test_unmapped_users_go_to_other_and_not_total() {
        let members = vec![member("alice", "TeamA"), member("erin", "")];
        let metrics = BTreeMap::from([
            ("alice".to_string(), user(2, 4.0, 10)),
            ("dave".to_string(), user(7, 1.0, 70)),
            ("erin".to_string(), user(1, 1.0, 5)),
        ]);

        let rows = group_metrics_by_team(&metrics, &members);
        let other = row(&rows, "Other");

        assert_eq!(other.metrics.merged_prs, 8);
        assert_eq!(other.metrics.avg_cycle_time_hours, 0.0);
        assert_eq!(other.metrics.avg_additions_per_pr, 0.0);
        assert_eq!(other.prs_per_person, 0.0);
        assert_eq!(other.total_members, 0);
        assert_eq!(row(&rows, "Total").metrics.merged_prs, 2);
    }

    #[test]
    fn test_bots_are_excluded_everywhere() {
        let members = vec![member("alice", "TeamA"), member("dependabot", "TeamA")];
        let metrics = BTreeMap::from([
            ("alice".to_string(), user(1, 1.0, 1)),
            ("dependabot".to_string(), user(40, 1.0, 400)),
            ("github-actions[bot]".to_string(), user(9, 1.0, 90)),
        ]);

        let rows = group_metrics_by_team(&metrics, &members);

        assert_eq!(row(&rows, "TeamA").metrics.merged_prs, 1);
        assert_eq!(row(&rows, "Other").metrics.merged_prs, 0);
        assert_eq!(row(&rows, "Total").metrics.merged_prs, 1);
    }

    #[test]
    fn test_team_without_merges_has_zero_averages() {
        let members = vec![member("alice", "TeamA"), member("bob", "TeamA")];
        let metrics = BTreeMap::from([("alice".to_string(), user(0, 0.0, 0))]);

        let rows = group_metrics_by_team(&metrics, &members);
        let team = row(&rows, "TeamA");

        assert_eq!(team.metrics.avg_cycle_time_hours, 0.0);
        assert_eq!(team.metrics.avg_files_changed_per_pr, 0.0);
        assert_eq!(team.prs_per_person, 0.0);
        assert_eq!(team.total_members, 2);
        assert!(!row(&rows, "Total").metrics.avg_cycle_time_hours.is_nan());
    }

    #[test]
    fn test_total_matches_sum_of_real_teams() {
        let members: Vec<TeamMember> = (0..12)
            .map(|i| member(&format!("user{i}"), &format!("Team{}", i % 4)))
            .collect();
        let metrics: BTreeMap<String, UserMetrics> = (0..15)
            .map(|i| (format!("user{i}"), user(i as u64, 2.5, i as u64 * 3)))
            .collect();

        let rows = group_metrics_by_team(&metrics, &members);
        let real_sum: u64 = rows
            .iter()
            .filter(|r| matches!(r.bucket, TeamBucket::Team(_)))
            .map(|r| r.metrics.merged_prs)
            .sum();

        assert_eq!(row(&rows, "Total").metrics.merged_prs, real_sum);
        assert_eq!(row(&rows, "Other").metrics.merged_prs, 12 + 13 + 14);
    }

    #[test]
    fn test_duplicate_username_counts_only_in_first_team() {
        let members = vec![
            member("alice", "TeamA"),
            member("bob", "TeamB"),
            member("alice", "TeamB"),
        ];
        let metrics = BTreeMap::from([
            ("alice".to_string(), user(4, 1.0, 4)),
            ("bob".to_string(), user(2, 1.0, 2)),
        ]);

        let rows = group_metrics_by_team(&metrics, &members);
        let team_b = row(&rows, "TeamB");

        assert_eq!(row(&rows, "TeamA").total_members, 1);
        assert_eq!(row(&rows, "TeamA").metrics.merged_prs, 4);
        assert_eq!(team_b.total_members, 1);
        assert_eq!(team_b.metrics.merged_prs, 2);
        assert_eq!(team_b.prs_per_person, 2.0);
        assert_eq!(row(&rows, "Total").total_members, 2);
    }

    #[test]
    fn test_team_named_total_is_routed_to_other() {
        let members = vec![member("alice", "TeamA"), member("mallory", "Total")];
        let metrics = BTreeMap::from([
            ("alice".to_string(), user(1, 1.0, 1)),
            ("mallory".to_string(), user(5, 1.0, 5)),
        ]);

        let rows = group_metrics_by_team(&metrics, &members);

        assert_eq!(
            rows.iter().map(|r| r.bucket.name()).collect::<Vec<_>>(),
            vec!["TeamA", "Other", "Total"]
        );
        assert_eq!(row(&rows, "Other").metrics.merged_prs, 5);
        assert_eq!(row(&rows, "Total").metrics.merged_prs, 1);
        assert_eq!(row(&rows, "Total").total_members, 1);
    }

    #[test]
    fn test_parse_team_mappings() {
        let csv = "name,github_username,team_name\n\
                   Alice A, alice ,TeamA\n\
                   Bob,,TeamB\n\
                   ,carol,\n";

        let members = parse_team_mappings(csv.as_bytes()).unwrap();

        assert_eq!(members.len(), 3);
        assert_eq!(members[0].github_username, "alice");
        assert_eq!(members[0].name.as_deref(), Some("Alice A"));
        assert_eq!(members[1].github_username, "");
        assert_eq!(members[2].name, None);
        assert_eq!(members[2].team_name, "");
    }

    #[test]
    fn test_parse_team_mappings_requires_columns() {
        let err = parse_team_mappings("user,team\nalice,TeamA\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DashboardError::MappingLoad(_)));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_mapping_error() {
        let err = load_team_mappings(Path::new("/nonexistent/team-mapping.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, DashboardError::MappingLoad(_)));
    }

    #[test]
    fn test_team_metrics_contract() {
        let rows = group_metrics_by_team(&BTreeMap::new(), &[member("alice", "TeamA")]);
        let json = serde_json::to_value(&rows[0]).unwrap();

        assert_eq!(json["teamName"], "TeamA");
        assert_eq!(json["mergedPRs"], 0);
        assert_eq!(json["prsPerPerson"], 0.0);
        assert_eq!(json["totalMembers"], 1);
        assert_eq!(serde_json::to_value(&rows[2]).unwrap()["teamName"], "Total");
    }
}

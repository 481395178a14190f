// src/join.rs

use anyhow::Result;
use std::collections::HashSet;
use tracing::{debug, trace};

use crate::{overview::Overview, report::UsageEntry, write::OutputRow, xnat::ProjectRecord};

/// Rows for one report plus the bookkeeping needed to explain what was left out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Joined {
    pub rows: Vec<OutputRow>,
    /// Expected substudies with no emitted row, in overview order.
    pub missing: Vec<String>,
    /// Entries dropped because the overview does not list them.
    pub filtered_out: usize,
    /// Entries whose project XNAT does not know.
    pub unresolved: usize,
}

/// Join usage entries with the overview and the registry.
///
/// `resolve` returns `Ok(None)` for unknown projects; those are skipped. Any
/// `Err` from it is returned as-is and stops the join.
pub fn join_records<F>(entries: &[UsageEntry], overview: &Overview, mut resolve: F) -> Result<Joined>
where
    F: FnMut(&str) -> Result<Option<ProjectRecord>>,
{
    let mut joined = Joined::default();

    for entry in entries {
        let project_id = entry.project_id();
        if !overview.accepts(project_id) {
            trace!(project_id, "not in study overview");
            joined.filtered_out += 1;
            continue;
        }

        let Some(project) = resolve(project_id)? else {
            joined.unresolved += 1;
            continue;
        };

        joined.rows.push(OutputRow::new(
            entry,
            overview.main_study_for(project_id),
            project,
        ));
    }

    if overview.is_filtering() {
        let emitted: HashSet<&str> = joined.rows.iter().map(|r| r.project_id.as_str()).collect();
        joined.missing = overview
            .substudies()
            .iter()
            .filter(|s| !emitted.contains(s.as_str()))
            .cloned()
            .collect();
    }

    debug!(
        rows = joined.rows.len(),
        filtered_out = joined.filtered_out,
        unresolved = joined.unresolved,
        missing = joined.missing.len(),
        "joined report"
    );
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{overview::read_overview, report::parse_report_str, xnat::Investigator};
    use anyhow::anyhow;
    use std::{collections::HashMap, path::Path};

    fn entries(text: &str) -> Vec<UsageEntry> {
        parse_report_str(text, Path::new("du.txt")).expect("valid report")
    }

    fn known(ids: &[&str]) -> HashMap<String, ProjectRecord> {
        ids.iter()
            .map(|id| {
                let record = ProjectRecord {
                    id: id.to_string(),
                    name: format!("Study {}", id),
                    pi: Investigator {
                        lastname: "Doe".into(),
                        ..Default::default()
                    },
                };
                (id.to_string(), record)
            })
            .collect()
    }

    #[test]
    fn unfiltered_uses_identity_main_study() -> Result<()> {
        let registry = known(&["projA", "projB"]);
        let joined = join_records(
            &entries("h\n100\t/data/projA\n250\t/data/projB\n"),
            &Overview::Unfiltered,
            |id| Ok(registry.get(id).cloned()),
        )?;

        assert_eq!(joined.rows.len(), 2);
        for row in &joined.rows {
            assert_eq!(row.main_study, row.project_id);
        }
        assert!(joined.missing.is_empty());
        Ok(())
    }

    #[test]
    fn unknown_projects_are_skipped() -> Result<()> {
        let registry = known(&["projA"]);
        let joined = join_records(
            &entries("h\n100\t/data/projA\n250\t/data/projB\n"),
            &Overview::Unfiltered,
            |id| Ok(registry.get(id).cloned()),
        )?;

        assert_eq!(joined.rows.len(), 1);
        assert_eq!(joined.rows[0].project_id, "projA");
        assert_eq!(joined.rows[0].data_usage, "100");
        assert_eq!(joined.unresolved, 1);
        Ok(())
    }

    #[test]
    fn filtered_rows_and_missing_substudies() -> Result<()> {
        let overview = read_overview(
            "substudy;main_study\nprojA;Group1\nprojB;Group1\nprojC;Group2\n".as_bytes(),
            Path::new("overview.csv"),
        )?;
        // projB is expected but XNAT does not know it; projD is not expected
        let registry = known(&["projA", "projD"]);
        let mut asked = Vec::new();
        let joined = join_records(
            &entries("h\n1\t/d/projA\n2\t/d/projB\n3\t/d/projD\n"),
            &overview,
            |id| {
                asked.push(id.to_string());
                Ok(registry.get(id).cloned())
            },
        )?;

        assert_eq!(asked, vec!["projA", "projB"]);
        assert_eq!(joined.rows.len(), 1);
        assert_eq!(joined.rows[0].main_study, "Group1");
        assert_eq!(joined.missing, vec!["projB", "projC"]);
        assert_eq!(joined.filtered_out, 1);
        assert_eq!(joined.unresolved, 1);
        Ok(())
    }

    #[test]
    fn resolver_errors_stop_the_join() {
        let result = join_records(
            &entries("h\n1\t/d/projA\n2\t/d/projB\n"),
            &Overview::Unfiltered,
            |id| match id {
                "projB" => Err(anyhow!("connection reset")),
                _ => Ok(None),
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn output_follows_report_order() -> Result<()> {
        let registry = known(&["a", "b", "c"]);
        let joined = join_records(
            &entries("h\n1\t/x/c\n2\t/x/a\n3\t/x/b\n4\t/x/a\n"),
            &Overview::Unfiltered,
            |id| Ok(registry.get(id).cloned()),
        )?;
        let ids: Vec<_> = joined.rows.iter().map(|r| r.project_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b", "a"]);
        Ok(())
    }
}

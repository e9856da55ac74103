//! Derived read-models over the study graph
//!
//! These are computed on demand from the base tables rather than
//! materialized, so they can never drift from the underlying rows.

use crate::error::Result;
use crate::types::*;
use chrono::NaiveDate;
use rusqlite::OptionalExtension;

use super::repo::Database;

/// A flattened study card: the study's headline fields plus the distinct
/// names of its related entities and the year of its latest publication.
///
/// A study with no children yields empty name lists and no publication
/// year; it is not an error.
#[derive(Debug, Clone)]
pub struct StudyOverview {
    pub study_id: String,
    pub nct_id: NctId,
    pub official_title: String,
    pub brief_title: Option<String>,
    pub phase: Option<Phase>,
    pub status: Option<StudyStatus>,
    /// Distinct condition names, sorted
    pub condition_names: Vec<String>,
    /// Distinct intervention names, sorted
    pub intervention_names: Vec<String>,
    /// Distinct molecular target names, sorted
    pub target_names: Vec<String>,
    pub latest_publication_year: Option<i64>,
}

/// The latest reported efficacy results for a study, one slot per
/// headline result type.
///
/// "Latest" means highest `publication_date`; among rows sharing a date
/// (or all lacking one) the most recently inserted row wins. Dated rows
/// always beat undated ones.
#[derive(Debug, Clone)]
pub struct ResultsSummary {
    pub study_id: String,
    /// Latest overall-survival result
    pub latest_os: Option<StudyResult>,
    /// Latest progression-free-survival result
    pub latest_pfs: Option<StudyResult>,
    /// Latest objective-response-rate result
    pub latest_orr: Option<StudyResult>,
    /// Most recent publication date across all of the study's results
    pub latest_publication_date: Option<NaiveDate>,
}

impl Database {
    /// Compute the overview read-model for a study.
    /// Returns `None` if the study does not exist.
    pub fn study_overview(&self, study_id: &str) -> Result<Option<StudyOverview>> {
        let study = match self.get_study(study_id)? {
            Some(study) => study,
            None => return Ok(None),
        };

        let condition_names = self.distinct_child_names("conditions", study_id)?;
        let intervention_names = self.distinct_child_names("interventions", study_id)?;
        let target_names = self.distinct_child_names("molecular_targets", study_id)?;

        let latest_publication_year: Option<i64> = {
            let conn = self.connection();
            conn.query_row(
                "SELECT MAX(publication_year) FROM publications \
                 WHERE study_id = ? AND is_active = 1",
                [study_id],
                |r| r.get(0),
            )?
        };

        Ok(Some(StudyOverview {
            study_id: study.id,
            nct_id: study.nct_id,
            official_title: study.official_title,
            brief_title: study.brief_title,
            phase: study.phase,
            status: study.status,
            condition_names,
            intervention_names,
            target_names,
            latest_publication_year,
        }))
    }

    fn distinct_child_names(&self, table: &str, study_id: &str) -> Result<Vec<String>> {
        // `table` is one of our own table names, never caller input
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT name FROM {} WHERE study_id = ? ORDER BY name",
            table
        ))?;
        let rows = stmt.query_map([study_id], |r| r.get(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    /// Compute the results summary read-model for a study.
    /// Returns `None` if the study does not exist.
    pub fn results_summary(&self, study_id: &str) -> Result<Option<ResultsSummary>> {
        if self.get_study(study_id)?.is_none() {
            return Ok(None);
        }

        let latest_os = self.latest_result_of_type(study_id, &ResultType::Os)?;
        let latest_pfs = self.latest_result_of_type(study_id, &ResultType::Pfs)?;
        let latest_orr = self.latest_result_of_type(study_id, &ResultType::Orr)?;

        let latest_publication_date = {
            let conn = self.connection();
            let max: Option<String> = conn.query_row(
                "SELECT MAX(publication_date) FROM results WHERE study_id = ?",
                [study_id],
                |r| r.get(0),
            )?;
            max.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
        };

        Ok(Some(ResultsSummary {
            study_id: study_id.to_string(),
            latest_os,
            latest_pfs,
            latest_orr,
            latest_publication_date,
        }))
    }

    fn latest_result_of_type(
        &self,
        study_id: &str,
        result_type: &ResultType,
    ) -> Result<Option<StudyResult>> {
        let conn = self.connection();
        conn.query_row(
            "SELECT * FROM results WHERE study_id = ?1 AND result_type = ?2 \
             ORDER BY publication_date IS NULL, publication_date DESC, rowid DESC \
             LIMIT 1",
            rusqlite::params![study_id, result_type.as_str()],
            Self::row_to_result,
        )
        .optional()
        .map_err(crate::error::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn insert_study(db: &Database, nct: &str) -> Study {
        let study = Study::new(NctId::new(nct).unwrap(), "A study");
        let condition = Condition::new(&study.id, "Melanoma");
        db.insert_study(&study, &[condition]).unwrap();
        study
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_overview_childless_study() {
        let db = test_db();
        let study = insert_study(&db, "NCT01234567");

        let overview = db.study_overview(&study.id).unwrap().unwrap();
        assert_eq!(overview.condition_names, vec!["Melanoma"]);
        assert!(overview.intervention_names.is_empty());
        assert!(overview.target_names.is_empty());
        assert_eq!(overview.latest_publication_year, None);
    }

    #[test]
    fn test_overview_names_distinct_and_sorted() {
        let db = test_db();
        let study = insert_study(&db, "NCT01234567");

        db.insert_intervention(&Intervention::new(&study.id, "Pembrolizumab"))
            .unwrap();
        db.insert_intervention(&Intervention::new(&study.id, "Carboplatin"))
            .unwrap();
        db.insert_intervention(&Intervention::new(&study.id, "Pembrolizumab"))
            .unwrap();

        let mut publication = Publication::new(&study.id, "First readout");
        publication.publication_year = Some(2021);
        db.insert_publication(&publication, &[]).unwrap();
        let mut publication = Publication::new(&study.id, "Updated analysis");
        publication.publication_year = Some(2024);
        db.insert_publication(&publication, &[]).unwrap();

        let overview = db.study_overview(&study.id).unwrap().unwrap();
        assert_eq!(
            overview.intervention_names,
            vec!["Carboplatin", "Pembrolizumab"]
        );
        assert_eq!(overview.latest_publication_year, Some(2024));
    }

    #[test]
    fn test_overview_missing_study() {
        let db = test_db();
        assert!(db.study_overview("nope").unwrap().is_none());
    }

    #[test]
    fn test_results_summary_latest_per_type() {
        let db = test_db();
        let study = insert_study(&db, "NCT01234567");

        let mut old_os = StudyResult::new(&study.id);
        old_os.result_type = Some(ResultType::Os);
        old_os.value = Some("18.2 months".to_string());
        old_os.publication_date = Some(date("2021-06-01"));
        db.insert_result(&old_os).unwrap();

        let mut new_os = StudyResult::new(&study.id);
        new_os.result_type = Some(ResultType::Os);
        new_os.value = Some("23.4 months".to_string());
        new_os.publication_date = Some(date("2024-03-15"));
        db.insert_result(&new_os).unwrap();

        let mut pfs = StudyResult::new(&study.id);
        pfs.result_type = Some(ResultType::Pfs);
        pfs.publication_date = Some(date("2022-01-10"));
        db.insert_result(&pfs).unwrap();

        let summary = db.results_summary(&study.id).unwrap().unwrap();
        assert_eq!(summary.latest_os.unwrap().id, new_os.id);
        assert_eq!(summary.latest_pfs.unwrap().id, pfs.id);
        assert!(summary.latest_orr.is_none());
        assert_eq!(summary.latest_publication_date, Some(date("2024-03-15")));
    }

    #[test]
    fn test_results_summary_tie_breaks_on_insertion_order() {
        let db = test_db();
        let study = insert_study(&db, "NCT01234567");

        let mut first = StudyResult::new(&study.id);
        first.result_type = Some(ResultType::Orr);
        first.publication_date = Some(date("2023-05-01"));
        db.insert_result(&first).unwrap();

        let mut second = StudyResult::new(&study.id);
        second.result_type = Some(ResultType::Orr);
        second.publication_date = Some(date("2023-05-01"));
        db.insert_result(&second).unwrap();

        let summary = db.results_summary(&study.id).unwrap().unwrap();
        // Same date: the later insert wins
        assert_eq!(summary.latest_orr.unwrap().id, second.id);
    }

    #[test]
    fn test_results_summary_dated_beats_undated() {
        let db = test_db();
        let study = insert_study(&db, "NCT01234567");

        let mut dated = StudyResult::new(&study.id);
        dated.result_type = Some(ResultType::Os);
        dated.publication_date = Some(date("2020-01-01"));
        db.insert_result(&dated).unwrap();

        let mut undated = StudyResult::new(&study.id);
        undated.result_type = Some(ResultType::Os);
        db.insert_result(&undated).unwrap();

        let summary = db.results_summary(&study.id).unwrap().unwrap();
        assert_eq!(summary.latest_os.unwrap().id, dated.id);
    }
}

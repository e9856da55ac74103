//! Integration tests for the trialscope storage and service layers
//!
//! These tests exercise the end-to-end flow: migrations, study writes with
//! their invariants, search, read-models, accounts, and user activity.

use chrono::{Duration, NaiveDate, Utc};
use tempfile::TempDir;
use trialscope_core::db::Database;
use trialscope_core::{
    ClientInfo, Condition, Error, Feedback, FeedbackStatus, FeedbackType, Intervention,
    MolecularTarget, NctId, NewUser, Page, PageRequest, Phase, Publication, Service, Study,
    StudyFilter, StudyResult, StudyStatus, ResultType,
};

fn open_service() -> Service {
    let db = Database::open_in_memory().unwrap();
    db.migrate().unwrap();
    Service::new(db).unwrap()
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn make_study(nct: &str, title: &str) -> (Study, Vec<Condition>) {
    let study = Study::new(NctId::new(nct).unwrap(), title);
    let condition = Condition::new(&study.id, "Non-small cell lung cancer");
    (study, vec![condition])
}

fn register(service: &Service, username: &str) -> String {
    service
        .register(&NewUser {
            username: username.to_string(),
            email: format!("{}@example.org", username),
            password: "hunter2024".to_string(),
            full_name: None,
            institution: None,
            title: None,
            specialty: None,
        })
        .unwrap()
        .id
}

// ============================================
// Persistence
// ============================================

#[test]
fn test_on_disk_database_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trialscope.db");

    let study_id;
    {
        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        let (study, conditions) = make_study("NCT04267848", "A phase 3 trial of osimertinib");
        db.insert_study(&study, &conditions).unwrap();
        study_id = study.id;
    }

    // Reopen and read back
    let db = Database::open(&path).unwrap();
    db.migrate().unwrap();
    let found = db.get_study(&study_id).unwrap().unwrap();
    assert_eq!(found.nct_id.as_str(), "NCT04267848");
    assert_eq!(db.list_conditions(&study_id).unwrap().len(), 1);
}

// ============================================
// Study invariants and lookup
// ============================================

#[test]
fn test_study_without_condition_rejected_atomically() {
    let service = open_service();
    let study = Study::new(NctId::new("NCT00000001").unwrap(), "Orphan");
    let err = service.create_study(&study, &[]).unwrap_err();
    assert!(matches!(err, Error::Constraint(_)));
    assert!(matches!(
        service.get_study_detail(&study.id),
        Err(Error::NotFound(_, _))
    ));
}

#[test]
fn test_duplicate_nct_id_rejected() {
    let service = open_service();
    let (first, conditions) = make_study("NCT01234567", "First registration");
    service.create_study(&first, &conditions).unwrap();

    let (second, conditions) = make_study("NCT01234567", "Duplicate registration");
    assert!(service.create_study(&second, &conditions).is_err());
}

#[test]
fn test_study_detail_collects_children() {
    let service = open_service();
    let (mut study, conditions) = make_study("NCT01234567", "KEYNOTE-like trial");
    study.phase = Some(Phase::Phase3);
    study.status = Some(StudyStatus::Recruiting);
    service.create_study(&study, &conditions).unwrap();

    let db = service.db();
    db.insert_intervention(&Intervention::new(&study.id, "Pembrolizumab"))
        .unwrap();
    db.insert_molecular_target(&MolecularTarget::new(&study.id, "PD-L1"))
        .unwrap();
    let mut publication = Publication::new(&study.id, "Interim analysis");
    publication.publication_year = Some(2024);
    db.insert_publication(&publication, &[]).unwrap();

    let detail = service.get_study_detail(&study.id).unwrap();
    assert_eq!(detail.conditions.len(), 1);
    assert_eq!(detail.interventions.len(), 1);
    assert_eq!(detail.molecular_targets.len(), 1);
    assert_eq!(detail.publications.len(), 1);
    assert!(detail.results.is_empty());
}

#[test]
fn test_lookup_by_nct_id() {
    let service = open_service();
    let (study, conditions) = make_study("NCT04267848", "Osimertinib trial");
    service.create_study(&study, &conditions).unwrap();

    let found = service
        .get_study_by_nct(&NctId::new("NCT04267848").unwrap())
        .unwrap();
    assert_eq!(found.id, study.id);

    assert!(matches!(
        service.get_study_by_nct(&NctId::new("NCT99999999").unwrap()),
        Err(Error::NotFound(_, _))
    ));
}

#[test]
fn test_delete_study_cascades_and_detaches_feedback() {
    let service = open_service();
    let user_id = register(&service, "alice");
    let (study, conditions) = make_study("NCT01234567", "Short-lived trial");
    service.create_study(&study, &conditions).unwrap();

    service.toggle_favorite(&user_id, &study.id).unwrap();
    service.record_view(&user_id, &study.id).unwrap();
    let feedback = service
        .submit_feedback(
            Some(&user_id),
            Some(&study.id),
            FeedbackType::DataCorrection,
            "Enrollment looks off",
        )
        .unwrap();

    service.delete_study(&study.id, Some(&user_id)).unwrap();

    // Owned activity rows are gone
    let favorites = service
        .list_favorites(&user_id, PageRequest::default())
        .unwrap();
    assert_eq!(favorites.total, 0);
    let history = service
        .list_history(&user_id, PageRequest::default())
        .unwrap();
    assert_eq!(history.total, 0);

    // Feedback survives with the study reference cleared
    let kept = service.db().get_feedback(&feedback.id).unwrap().unwrap();
    assert_eq!(kept.study_id, None);
}

// ============================================
// Search
// ============================================

#[test]
fn test_search_filters_combine_with_and() {
    let service = open_service();

    let (mut lung, conditions) = make_study("NCT00000001", "Osimertinib in EGFR-mutated NSCLC");
    lung.phase = Some(Phase::Phase3);
    service.create_study(&lung, &conditions).unwrap();
    service
        .db()
        .insert_intervention(&Intervention::new(&lung.id, "Osimertinib"))
        .unwrap();

    let (mut melanoma, _) = make_study("NCT00000002", "Pembrolizumab in melanoma");
    melanoma.phase = Some(Phase::Phase3);
    let melanoma_condition = Condition::new(&melanoma.id, "Melanoma");
    service
        .create_study(&melanoma, &[melanoma_condition])
        .unwrap();

    let filter = StudyFilter {
        phases: vec![Phase::Phase3],
        intervention: Some("osimertinib".to_string()),
        ..Default::default()
    };
    let page = service
        .search_studies(&filter, PageRequest::default(), None)
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, lung.id);
}

#[test]
fn test_search_order_is_stable_across_pages() {
    let service = open_service();
    for i in 0..6 {
        let (study, conditions) = make_study(&format!("NCT0000000{}", i), "Batch study");
        service.create_study(&study, &conditions).unwrap();
    }

    let all: Page<_> = service
        .search_studies(&StudyFilter::default(), PageRequest::new(1, 10), None)
        .unwrap();
    let first: Page<_> = service
        .search_studies(&StudyFilter::default(), PageRequest::new(1, 3), None)
        .unwrap();
    let second: Page<_> = service
        .search_studies(&StudyFilter::default(), PageRequest::new(2, 3), None)
        .unwrap();

    let paged_ids: Vec<_> = first
        .items
        .iter()
        .chain(second.items.iter())
        .map(|s| s.id.clone())
        .collect();
    let all_ids: Vec<_> = all.items.iter().map(|s| s.id.clone()).collect();
    assert_eq!(paged_ids, all_ids);
}

#[test]
fn test_free_text_matches_nct_id() {
    let service = open_service();
    let (study, conditions) = make_study("NCT04267848", "Some trial");
    service.create_study(&study, &conditions).unwrap();

    let filter = StudyFilter {
        query: Some("NCT04267848".to_string()),
        ..Default::default()
    };
    let page = service
        .search_studies(&filter, PageRequest::default(), None)
        .unwrap();
    assert_eq!(page.total, 1);
}

// ============================================
// Read-models
// ============================================

#[test]
fn test_results_summary_tracks_latest_per_type() {
    let service = open_service();
    let (study, conditions) = make_study("NCT01234567", "Efficacy trial");
    service.create_study(&study, &conditions).unwrap();
    let db = service.db();

    let mut os_2021 = StudyResult::new(&study.id);
    os_2021.result_type = Some(ResultType::Os);
    os_2021.publication_date = Some(date("2021-06-01"));
    db.insert_result(&os_2021).unwrap();

    let mut os_2024 = StudyResult::new(&study.id);
    os_2024.result_type = Some(ResultType::Os);
    os_2024.publication_date = Some(date("2024-03-15"));
    db.insert_result(&os_2024).unwrap();

    let mut orr = StudyResult::new(&study.id);
    orr.result_type = Some(ResultType::Orr);
    orr.publication_date = Some(date("2022-09-10"));
    db.insert_result(&orr).unwrap();

    let summary = service.results_summary(&study.id).unwrap();
    assert_eq!(summary.latest_os.unwrap().id, os_2024.id);
    assert_eq!(summary.latest_orr.unwrap().id, orr.id);
    assert!(summary.latest_pfs.is_none());
    assert_eq!(summary.latest_publication_date, Some(date("2024-03-15")));
}

#[test]
fn test_overview_for_childless_and_rich_studies() {
    let service = open_service();
    let (study, conditions) = make_study("NCT01234567", "Overview trial");
    service.create_study(&study, &conditions).unwrap();

    let overview = service.study_overview(&study.id).unwrap();
    assert_eq!(overview.condition_names.len(), 1);
    assert!(overview.intervention_names.is_empty());
    assert_eq!(overview.latest_publication_year, None);

    service
        .db()
        .insert_intervention(&Intervention::new(&study.id, "Nivolumab"))
        .unwrap();
    let overview = service.study_overview(&study.id).unwrap();
    assert_eq!(overview.intervention_names, vec!["Nivolumab"]);
}

// ============================================
// Accounts and activity
// ============================================

#[test]
fn test_full_user_journey() {
    let service = open_service();
    let (study, conditions) = make_study("NCT01234567", "Journey trial");
    service.create_study(&study, &conditions).unwrap();

    service
        .register(&NewUser {
            username: "carol".to_string(),
            email: "carol@example.org".to_string(),
            password: "research42".to_string(),
            full_name: Some("Carol Jones".to_string()),
            institution: None,
            title: None,
            specialty: Some("Oncology".to_string()),
        })
        .unwrap();

    let auth = service
        .authenticate("carol", "research42", &ClientInfo::default())
        .unwrap();
    let profile = service.check_session(&auth.token).unwrap();

    // Favorite, view twice, search
    assert!(service.toggle_favorite(&profile.id, &study.id).unwrap());
    service.record_view(&profile.id, &study.id).unwrap();
    service.record_view(&profile.id, &study.id).unwrap();
    service
        .search_studies(
            &StudyFilter {
                query: Some("journey".to_string()),
                ..Default::default()
            },
            PageRequest::default(),
            Some(&profile.id),
        )
        .unwrap();

    let favorites = service
        .list_favorites(&profile.id, PageRequest::default())
        .unwrap();
    assert_eq!(favorites.total, 1);
    assert_eq!(favorites.items[0].study.id, study.id);

    // History is append-only: both views are present
    let history = service
        .list_history(&profile.id, PageRequest::default())
        .unwrap();
    assert_eq!(history.total, 2);

    let searches = service
        .list_search_history(&profile.id, PageRequest::default())
        .unwrap();
    assert_eq!(searches.total, 1);
    assert_eq!(searches.items[0].result_count, Some(1));

    service.logout(&auth.token).unwrap();
}

#[test]
fn test_toggle_favorite_is_an_involution() {
    let service = open_service();
    let user_id = register(&service, "dave");
    let (study, conditions) = make_study("NCT01234567", "Toggle trial");
    service.create_study(&study, &conditions).unwrap();

    assert!(service.toggle_favorite(&user_id, &study.id).unwrap());
    assert!(!service.toggle_favorite(&user_id, &study.id).unwrap());
    assert!(service.toggle_favorite(&user_id, &study.id).unwrap());

    let favorites = service
        .list_favorites(&user_id, PageRequest::default())
        .unwrap();
    assert_eq!(favorites.total, 1);
}

#[test]
fn test_expired_sessions_are_refused_and_cleaned() {
    let service = open_service();
    let user_id = register(&service, "erin");

    // Insert an already-expired session directly
    let now = Utc::now();
    let session = trialscope_core::UserSession {
        id: "sess-1".to_string(),
        user_id,
        session_token: "stale-token".to_string(),
        ip_address: None,
        user_agent: None,
        expires_at: now - Duration::minutes(5),
        created_at: now - Duration::hours(9),
    };
    service.db().insert_session(&session).unwrap();

    assert!(matches!(
        service.check_session("stale-token"),
        Err(Error::SessionExpired)
    ));
    assert_eq!(service.cleanup_expired_sessions().unwrap(), 1);
    assert!(matches!(
        service.check_session("stale-token"),
        Err(Error::SessionExpired)
    ));
}

// ============================================
// Feedback triage
// ============================================

#[test]
fn test_feedback_triage_flow() {
    let service = open_service();
    let user_id = register(&service, "frank");

    let feedback: Feedback = service
        .submit_feedback(
            Some(&user_id),
            None,
            FeedbackType::FeatureRequest,
            "Please add a biomarker filter",
        )
        .unwrap();

    let pending = service
        .list_feedback(Some(FeedbackStatus::Pending), PageRequest::default())
        .unwrap();
    assert_eq!(pending.total, 1);

    let updated = service
        .update_feedback(
            &feedback.id,
            FeedbackStatus::Resolved,
            Some("Shipped in the filters panel"),
            None,
        )
        .unwrap();
    assert_eq!(updated.status, FeedbackStatus::Resolved);
    assert!(updated.resolved_at.is_some());

    let pending = service
        .list_feedback(Some(FeedbackStatus::Pending), PageRequest::default())
        .unwrap();
    assert_eq!(pending.total, 0);
}

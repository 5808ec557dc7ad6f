//! Issue lifecycle scenarios run against the in-memory store.

use std::sync::Arc;

use cb_core::{
    AppError, AssignedStaff, Citizen, CitizenDirectory, ErrorKind, IssuePatch, IssueStatus,
    NewCitizen, NewIssue, PageRequest, Principal, Role,
};
use cb_engine::CivicEngine;
use cb_store_memory::MemoryStore;
use chrono::Utc;
use uuid::Uuid;

struct Board {
    engine: CivicEngine,
    store: Arc<MemoryStore>,
    admin: Principal,
    ana: Principal,
    sam: Principal,
}

async fn register(store: &MemoryStore, email: &str, role: Role) -> Citizen {
    let mut citizen = Citizen::registered(
        NewCitizen {
            email: email.to_string(),
            display_name: email.split('@').next().unwrap_or_default().to_string(),
            photo_url: None,
        },
        Utc::now(),
    );
    citizen.role = role;
    assert!(store.insert_if_absent(citizen.clone()).await.unwrap());
    citizen
}

async fn board() -> Board {
    let store = Arc::new(MemoryStore::new());
    register(&store, "boss@city.gov", Role::Admin).await;
    register(&store, "ana@example.org", Role::Citizen).await;
    register(&store, "sam@city.gov", Role::Staff).await;

    Board {
        engine: CivicEngine::with_store(store.clone()),
        store,
        admin: Principal::new("boss@city.gov"),
        ana: Principal::new("ana@example.org"),
        sam: Principal::new("sam@city.gov"),
    }
}

fn pothole() -> NewIssue {
    NewIssue {
        title: "Pothole on Elm St".to_string(),
        description: "Deep enough to damage tyres".to_string(),
        category: "roads".to_string(),
        location: Some("Elm St & 3rd".to_string()),
        image_url: None,
    }
}

fn sam_assignment() -> AssignedStaff {
    AssignedStaff {
        staff_email: "sam@city.gov".to_string(),
        staff_name: "Sam".to_string(),
    }
}

impl Board {
    async fn reported_issue(&self) -> Uuid {
        self.engine
            .create_issue(Some(&self.ana), pothole())
            .await
            .unwrap()
            .id
    }

    async fn timeline_labels(&self, id: Uuid) -> Vec<String> {
        self.engine
            .get_timeline(None, id)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.status)
            .collect()
    }
}

#[tokio::test]
async fn test_full_citizen_admin_staff_scenario() {
    let board = board().await;

    let issue = board
        .engine
        .create_issue(Some(&board.ana), pothole())
        .await
        .unwrap();
    assert_eq!(issue.status, IssueStatus::Reported);
    assert_eq!(issue.reporter_email, "ana@example.org");

    let assigned = board
        .engine
        .assign_issue(Some(&board.admin), issue.id, sam_assignment())
        .await
        .unwrap();
    assert_eq!(assigned.status, IssueStatus::Pending);
    assert_eq!(board.timeline_labels(issue.id).await.len(), 2);

    let resolved = board
        .engine
        .staff_set_issue_status(Some(&board.sam), issue.id, "resolved")
        .await
        .unwrap();
    assert_eq!(resolved.status, IssueStatus::Resolved);
    assert!(resolved.resolved_at.is_some());

    let timeline = board.engine.get_timeline(None, issue.id).await.unwrap();
    assert_eq!(timeline.len(), 3);
    assert_eq!(timeline[0].updated_by, "sam@city.gov");

    assert_eq!(board.engine.upvote_issue(Some(&board.ana), issue.id).await.unwrap(), 1);
    let again = board.engine.upvote_issue(Some(&board.ana), issue.id).await;
    assert!(matches!(again, Err(AppError::AlreadyVoted)));

    let stored = board.engine.get_issue(None, issue.id).await.unwrap();
    assert_eq!(stored.upvote_count, 1);
    assert_eq!(stored.upvote_count, stored.upvotes.len() as u64);
}

#[tokio::test]
async fn test_reject_is_a_no_op_unless_pending() {
    let board = board().await;
    let id = board.reported_issue().await;

    board
        .engine
        .resolve_issue(Some(&board.admin), id)
        .await
        .unwrap();
    let outcome = board
        .engine
        .reject_issue(Some(&board.admin), id)
        .await
        .unwrap();
    assert!(outcome.is_none());

    let stored = board.engine.get_issue(None, id).await.unwrap();
    assert_eq!(stored.status, IssueStatus::Resolved);
    assert_eq!(board.timeline_labels(id).await, ["Resolved", "Issue reported"]);
}

#[tokio::test]
async fn test_reject_applies_to_pending_issues() {
    let board = board().await;
    let id = board.reported_issue().await;
    board
        .engine
        .assign_issue(Some(&board.admin), id, sam_assignment())
        .await
        .unwrap();

    let rejected = board
        .engine
        .reject_issue(Some(&board.admin), id)
        .await
        .unwrap()
        .expect("pending issues can be rejected");
    assert_eq!(rejected.status, IssueStatus::Rejected);
    assert_eq!(board.timeline_labels(id).await[0], "Rejected");
}

#[tokio::test]
async fn test_assignment_reopens_resolved_issues() {
    let board = board().await;
    let id = board.reported_issue().await;
    board
        .engine
        .resolve_issue(Some(&board.admin), id)
        .await
        .unwrap();

    let reopened = board
        .engine
        .assign_issue(Some(&board.admin), id, sam_assignment())
        .await
        .unwrap();
    assert_eq!(reopened.status, IssueStatus::Pending);
    assert!(reopened.resolved_at.is_none());
    assert_eq!(reopened.assigned_staff, Some(sam_assignment()));

    let labels = board.timeline_labels(id).await;
    assert_eq!(labels.iter().filter(|label| *label == "Assigned").count(), 1);
}

#[tokio::test]
async fn test_resolved_at_tracks_the_resolved_status() {
    let board = board().await;

    let first = board.reported_issue().await;
    let resolved = board
        .engine
        .set_issue_status(Some(&board.admin), first, "resolved")
        .await
        .unwrap();
    assert!(resolved.resolved_at.is_some());

    let second = board.reported_issue().await;
    let pending = board
        .engine
        .set_issue_status(Some(&board.admin), second, "pending")
        .await
        .unwrap();
    assert!(pending.resolved_at.is_none());

    let reopened = board
        .engine
        .set_issue_status(Some(&board.admin), first, "pending")
        .await
        .unwrap();
    assert!(reopened.resolved_at.is_none());
}

#[tokio::test]
async fn test_timeline_follows_commit_order() {
    let board = board().await;
    let id = board.reported_issue().await;
    board
        .engine
        .assign_issue(Some(&board.admin), id, sam_assignment())
        .await
        .unwrap();
    board
        .engine
        .set_issue_status(Some(&board.sam), id, "pending")
        .await
        .unwrap();
    board
        .engine
        .reject_issue(Some(&board.admin), id)
        .await
        .unwrap();
    board
        .engine
        .set_issue_status(Some(&board.admin), id, "pending")
        .await
        .unwrap();
    board
        .engine
        .resolve_issue(Some(&board.admin), id)
        .await
        .unwrap();

    assert_eq!(
        board.timeline_labels(id).await,
        ["Resolved", "pending", "Rejected", "pending", "Assigned", "Issue reported"]
    );
    let entries = board.engine.get_timeline(None, id).await.unwrap();
    assert!(entries.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    // The assignee's edit through the general path is attributed to their role.
    assert_eq!(entries[3].updated_by, "Staff");
}

#[tokio::test]
async fn test_assignment_requires_an_admin() {
    let board = board().await;
    let id = board.reported_issue().await;

    let anonymous = board.engine.assign_issue(None, id, sam_assignment()).await;
    assert_eq!(anonymous.unwrap_err().kind(), ErrorKind::Unauthenticated);

    let citizen = board
        .engine
        .assign_issue(Some(&board.ana), id, sam_assignment())
        .await;
    assert_eq!(citizen.unwrap_err().kind(), ErrorKind::Forbidden);

    assert_eq!(board.timeline_labels(id).await, ["Issue reported"]);
}

#[tokio::test]
async fn test_staff_self_service_checks_the_assignee() {
    let board = board().await;
    let id = board.reported_issue().await;

    let unassigned = board
        .engine
        .staff_set_issue_status(Some(&board.sam), id, "resolved")
        .await;
    assert!(matches!(unassigned, Err(AppError::Forbidden(_))));

    let missing = board
        .engine
        .staff_set_issue_status(Some(&board.sam), Uuid::now_v7(), "resolved")
        .await;
    assert!(matches!(missing, Err(AppError::NotFound(..))));

    board
        .engine
        .assign_issue(Some(&board.admin), id, sam_assignment())
        .await
        .unwrap();
    let admin_self_service = board
        .engine
        .staff_set_issue_status(Some(&board.admin), id, "resolved")
        .await;
    assert!(matches!(admin_self_service, Err(AppError::Forbidden(_))));

    let assigned = board.engine.list_assigned_issues(Some(&board.sam)).await.unwrap();
    assert_eq!(assigned.len(), 1);
    assert_eq!(assigned[0].id, id);
}

#[tokio::test]
async fn test_invalid_status_requests_are_refused() {
    let board = board().await;
    let id = board.reported_issue().await;

    let unknown = board
        .engine
        .set_issue_status(Some(&board.admin), id, "archived")
        .await;
    assert!(matches!(unknown, Err(AppError::InvalidState(_))));

    let premature_reject = board
        .engine
        .set_issue_status(Some(&board.admin), id, "rejected")
        .await;
    assert!(matches!(premature_reject, Err(AppError::InvalidState(_))));

    let stored = board.engine.get_issue(None, id).await.unwrap();
    assert_eq!(stored.status, IssueStatus::Reported);
    assert_eq!(board.timeline_labels(id).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_upvotes_succeed_once() {
    let board = board().await;
    let id = board.reported_issue().await;

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let engine = board.engine.clone();
            let voter = Principal::new("bob@example.org");
            tokio::spawn(async move { engine.upvote_issue(Some(&voter), id).await })
        })
        .collect();

    let mut accepted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(err) => assert!(matches!(err, AppError::AlreadyVoted)),
        }
    }
    assert_eq!(accepted, 1);

    let stored = board.engine.get_issue(None, id).await.unwrap();
    assert_eq!(stored.upvote_count, 1);
    assert!(stored.upvotes.contains("bob@example.org"));
}

#[tokio::test]
async fn test_blocking_stops_mutations_on_the_next_request() {
    let board = board().await;
    let ana = board
        .store
        .find_by_email("ana@example.org")
        .await
        .unwrap()
        .unwrap();
    let id = board.reported_issue().await;

    board
        .engine
        .block_citizen(Some(&board.admin), ana.id, true)
        .await
        .unwrap();
    let blocked = board.engine.create_issue(Some(&board.ana), pothole()).await;
    assert!(matches!(blocked, Err(AppError::Forbidden(_))));
    let upvote = board.engine.upvote_issue(Some(&board.ana), id).await;
    assert!(matches!(upvote, Err(AppError::Forbidden(_))));
    // Reads stay available.
    board.engine.get_issue(Some(&board.ana), id).await.unwrap();

    board
        .engine
        .block_citizen(Some(&board.admin), ana.id, false)
        .await
        .unwrap();
    board
        .engine
        .create_issue(Some(&board.ana), pothole())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_promotion_takes_effect_immediately() {
    let board = board().await;
    let id = board.reported_issue().await;
    let ana = board
        .store
        .find_by_email("ana@example.org")
        .await
        .unwrap()
        .unwrap();

    assert!(board
        .engine
        .assign_issue(Some(&board.ana), id, sam_assignment())
        .await
        .is_err());
    board
        .engine
        .set_citizen_role(Some(&board.admin), ana.id, Role::Admin)
        .await
        .unwrap();
    board
        .engine
        .assign_issue(Some(&board.ana), id, sam_assignment())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_creation_requires_text_fields() {
    let board = board().await;
    let missing_title = NewIssue {
        title: "  ".to_string(),
        ..pothole()
    };
    let err = board
        .engine
        .create_issue(Some(&board.ana), missing_title)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let anonymous = board.engine.create_issue(None, pothole()).await;
    assert!(matches!(anonymous, Err(AppError::Unauthenticated)));
}

#[tokio::test]
async fn test_edits_are_owner_only_and_leave_no_timeline_entry() {
    let board = board().await;
    let id = board.reported_issue().await;
    let patch = IssuePatch {
        description: Some("Now two potholes".to_string()),
        ..IssuePatch::default()
    };

    let stranger = Principal::new("bob@example.org");
    let denied = board
        .engine
        .edit_issue(Some(&stranger), id, patch.clone())
        .await;
    assert!(matches!(denied, Err(AppError::Forbidden(_))));

    let edited = board
        .engine
        .edit_issue(Some(&board.ana), id, patch)
        .await
        .unwrap();
    assert_eq!(edited.description, "Now two potholes");
    assert_eq!(edited.status, IssueStatus::Reported);
    assert_eq!(board.timeline_labels(id).await, ["Issue reported"]);
}

#[tokio::test]
async fn test_deleting_an_issue_keeps_its_history() {
    let board = board().await;
    let id = board.reported_issue().await;

    board
        .engine
        .delete_issue(Some(&board.ana), id)
        .await
        .unwrap();
    let gone = board.engine.get_issue(None, id).await;
    assert!(matches!(gone, Err(AppError::NotFound(..))));
    assert_eq!(board.timeline_labels(id).await, ["Issue reported"]);

    let twice = board.engine.delete_issue(Some(&board.ana), id).await;
    assert!(matches!(twice, Err(AppError::NotFound(..))));
}

#[tokio::test]
async fn test_listings_and_statistics() {
    let board = board().await;
    let mut ids = Vec::new();
    for _ in 0..12 {
        ids.push(board.reported_issue().await);
    }
    board
        .engine
        .assign_issue(Some(&board.admin), ids[0], sam_assignment())
        .await
        .unwrap();
    board
        .engine
        .assign_issue(Some(&board.admin), ids[1], sam_assignment())
        .await
        .unwrap();
    board
        .engine
        .staff_set_issue_status(Some(&board.sam), ids[1], "resolved")
        .await
        .unwrap();

    let first_page = board
        .engine
        .list_issues(None, PageRequest::new(1))
        .await
        .unwrap();
    let second_page = board
        .engine
        .list_issues(None, PageRequest::new(2))
        .await
        .unwrap();
    assert_eq!(first_page.len(), 10);
    assert_eq!(second_page.len(), 2);
    assert_eq!(first_page[0].id, ids[11]);

    let latest = board.engine.latest_issues(None, None).await.unwrap();
    assert_eq!(latest.len(), 6);

    let summary = board.engine.issue_summary(None).await.unwrap();
    assert_eq!((summary.total_issues, summary.pending, summary.resolved), (12, 1, 1));

    let mine = board
        .engine
        .citizen_stats(Some(&board.ana), "ana@example.org")
        .await
        .unwrap();
    assert_eq!(mine, summary);

    let staff = board
        .engine
        .staff_stats(Some(&board.sam), "sam@city.gov")
        .await
        .unwrap();
    assert_eq!((staff.assigned, staff.resolved, staff.today), (2, 1, 2));

    let snooping = board
        .engine
        .staff_stats(Some(&board.ana), "sam@city.gov")
        .await;
    assert!(matches!(snooping, Err(AppError::Forbidden(_))));

    let reported = board
        .engine
        .list_reporter_issues(Some(&board.ana), "ana@example.org")
        .await
        .unwrap();
    assert_eq!(reported.len(), 12);
}

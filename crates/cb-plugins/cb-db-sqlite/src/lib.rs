//! # cb-db-sqlite Implementation
//!
//! This module implements the data mapping between the SQLite relational model
//! and the `cb-core` domain models. Identifiers are stored as 16-byte BLOBs and
//! timestamps as microseconds since the Unix epoch, so both sort correctly.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use cb_core::models::{
    ApplicationStatus, AssignedStaff, Citizen, Issue, IssueFilter, IssuePatch, IssueStatus,
    ReviewDecision, Role, StaffApplication, TimelineEntry, WorkStatus,
};
use cb_core::traits::{
    CitizenDirectory, IssueStore, ReviewOutcome, StaffRoster, StatusChange, TimelineLedger,
    TransitionOutcome, UpvoteOutcome,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{ConnectOptions, Executor, QueryBuilder, Row, Sqlite, SqliteConnection};
use tracing::info;
use uuid::Uuid;

macro_rules! issue_select {
    () => {
        "SELECT id, reporter_email, title, description, category, location, image_url, \
         status, staff_email, staff_name, upvote_count, created_at, resolved_at, \
         (SELECT json_group_array(email) FROM issue_upvotes u WHERE u.issue_id = issues.id) \
         AS upvotes FROM issues"
    };
}

macro_rules! citizen_select {
    () => {
        "SELECT id, email, display_name, photo_url, role, blocked, premium, created_at \
         FROM citizens"
    };
}

macro_rules! staff_select {
    () => {
        "SELECT id, staff_email, staff_name, phone, status, work_status, created_at FROM staff"
    };
}

/// SQLite-backed implementation of every store port.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    /// Held open for in-memory databases, which vanish with their last connection.
    anchor: Option<Arc<Mutex<SqliteConnection>>>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `url` and runs pending migrations.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid sqlite url `{url}`"))?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let (pool_options, anchor) = if in_memory {
            // A single pooled connection that is never reaped, plus an anchor
            // connection so a recycled pool connection reattaches to the same data.
            let anchor = options.connect().await?;
            let pool_options = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
            (pool_options, Some(Arc::new(Mutex::new(anchor))))
        } else {
            (SqlitePoolOptions::new().max_connections(5), None)
        };
        let pool = pool_options.connect_with(options).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(in_memory, "sqlite store ready");
        Ok(Self { pool, anchor })
    }

    /// Whether this store keeps an in-memory database pinned open.
    pub fn is_in_memory(&self) -> bool {
        self.anchor.is_some()
    }
}

// Helpers for UUID and timestamp conversion
fn uuid_to_blob(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

fn blob_to_uuid(blob: &[u8]) -> anyhow::Result<Uuid> {
    Uuid::from_slice(blob).context("malformed id column")
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(micros: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| anyhow!("timestamp out of range: {micros}"))
}

fn to_i64(value: u64) -> anyhow::Result<i64> {
    i64::try_from(value).context("value exceeds sqlite integer range")
}

fn application_status_str(status: ApplicationStatus) -> &'static str {
    match status {
        ApplicationStatus::Pending => "pending",
        ApplicationStatus::Approved => "approved",
        ApplicationStatus::Rejected => "rejected",
    }
}

fn parse_application_status(raw: &str) -> anyhow::Result<ApplicationStatus> {
    match raw {
        "pending" => Ok(ApplicationStatus::Pending),
        "approved" => Ok(ApplicationStatus::Approved),
        "rejected" => Ok(ApplicationStatus::Rejected),
        other => Err(anyhow!("unknown application status `{other}`")),
    }
}

fn parse_work_status(raw: Option<String>) -> anyhow::Result<Option<WorkStatus>> {
    match raw.as_deref() {
        None => Ok(None),
        Some("available") => Ok(Some(WorkStatus::Available)),
        Some(other) => Err(anyhow!("unknown work status `{other}`")),
    }
}

fn issue_from_row(row: &SqliteRow) -> anyhow::Result<Issue> {
    let staff_email: Option<String> = row.try_get("staff_email")?;
    let staff_name: Option<String> = row.try_get("staff_name")?;
    let upvotes: String = row.try_get("upvotes")?;
    let upvotes: BTreeSet<String> = serde_json::from_str(&upvotes)?;

    Ok(Issue {
        id: blob_to_uuid(&row.try_get::<Vec<u8>, _>("id")?)?,
        reporter_email: row.try_get("reporter_email")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        location: row.try_get("location")?,
        image_url: row.try_get("image_url")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        assigned_staff: staff_email
            .zip(staff_name)
            .map(|(staff_email, staff_name)| AssignedStaff {
                staff_email,
                staff_name,
            }),
        upvotes,
        upvote_count: u64::try_from(row.try_get::<i64, _>("upvote_count")?)?,
        created_at: from_micros(row.try_get("created_at")?)?,
        resolved_at: row
            .try_get::<Option<i64>, _>("resolved_at")?
            .map(from_micros)
            .transpose()?,
    })
}

fn timeline_from_row(row: &SqliteRow) -> anyhow::Result<TimelineEntry> {
    Ok(TimelineEntry {
        id: blob_to_uuid(&row.try_get::<Vec<u8>, _>("id")?)?,
        issue_id: blob_to_uuid(&row.try_get::<Vec<u8>, _>("issue_id")?)?,
        status: row.try_get("status")?,
        message: row.try_get("message")?,
        updated_by: row.try_get("updated_by")?,
        timestamp: from_micros(row.try_get("timestamp")?)?,
    })
}

fn citizen_from_row(row: &SqliteRow) -> anyhow::Result<Citizen> {
    Ok(Citizen {
        id: blob_to_uuid(&row.try_get::<Vec<u8>, _>("id")?)?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        photo_url: row.try_get("photo_url")?,
        role: Role::from_str(&row.try_get::<String, _>("role")?)?,
        blocked: row.try_get("blocked")?,
        premium: row.try_get("premium")?,
        created_at: from_micros(row.try_get("created_at")?)?,
    })
}

fn staff_from_row(row: &SqliteRow) -> anyhow::Result<StaffApplication> {
    Ok(StaffApplication {
        id: blob_to_uuid(&row.try_get::<Vec<u8>, _>("id")?)?,
        staff_email: row.try_get("staff_email")?,
        staff_name: row.try_get("staff_name")?,
        phone: row.try_get("phone")?,
        status: parse_application_status(&row.try_get::<String, _>("status")?)?,
        work_status: parse_work_status(row.try_get("work_status")?)?,
        created_at: from_micros(row.try_get("created_at")?)?,
    })
}

async fn fetch_issue<'e, E>(executor: E, id: Uuid) -> anyhow::Result<Option<Issue>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(concat!(issue_select!(), " WHERE id = ?"))
        .bind(uuid_to_blob(id))
        .fetch_optional(executor)
        .await?
        .as_ref()
        .map(issue_from_row)
        .transpose()
}

async fn fetch_citizen_by_email<'e, E>(executor: E, email: &str) -> anyhow::Result<Option<Citizen>>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(concat!(citizen_select!(), " WHERE email = ?"))
        .bind(email.to_string())
        .fetch_optional(executor)
        .await?
        .as_ref()
        .map(citizen_from_row)
        .transpose()
}

/// Appends the `WHERE` clause matching `filter`.
fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &IssueFilter) {
    query.push(" WHERE 1 = 1");
    if let Some(email) = &filter.reporter_email {
        query.push(" AND reporter_email = ").push_bind(email.clone());
    }
    if let Some(email) = &filter.assigned_to {
        query.push(" AND staff_email = ").push_bind(email.clone());
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(from) = filter.created_from {
        query.push(" AND created_at >= ").push_bind(to_micros(from));
    }
    if let Some(until) = filter.created_until {
        query.push(" AND created_at < ").push_bind(to_micros(until));
    }
}

#[async_trait]
impl IssueStore for SqliteStore {
    async fn insert(&self, issue: Issue) -> anyhow::Result<()> {
        let (staff_email, staff_name) = match issue.assigned_staff {
            Some(staff) => (Some(staff.staff_email), Some(staff.staff_name)),
            None => (None, None),
        };
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO issues (id, reporter_email, title, description, category, location, \
             image_url, status, staff_email, staff_name, upvote_count, created_at, resolved_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(issue.id))
        .bind(issue.reporter_email)
        .bind(issue.title)
        .bind(issue.description)
        .bind(issue.category)
        .bind(issue.location)
        .bind(issue.image_url)
        .bind(issue.status.as_str())
        .bind(staff_email)
        .bind(staff_name)
        .bind(to_i64(issue.upvotes.len() as u64)?)
        .bind(to_micros(issue.created_at))
        .bind(issue.resolved_at.map(to_micros))
        .execute(&mut *tx)
        .await?;

        for email in issue.upvotes {
            sqlx::query("INSERT INTO issue_upvotes (issue_id, email) VALUES (?, ?)")
                .bind(uuid_to_blob(issue.id))
                .bind(email)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Issue>> {
        fetch_issue(&self.pool, id).await
    }

    async fn list(
        &self,
        filter: &IssueFilter,
        offset: u64,
        limit: Option<u64>,
    ) -> anyhow::Result<Vec<Issue>> {
        let mut query = QueryBuilder::new(issue_select!());
        push_filter(&mut query, filter);
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map(to_i64).transpose()?.unwrap_or(-1);
        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(to_i64(offset)?);

        query
            .build()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(issue_from_row)
            .collect()
    }

    async fn count(&self, filter: &IssueFilter) -> anyhow::Result<u64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM issues");
        push_filter(&mut query, filter);
        let count: i64 = query.build().fetch_one(&self.pool).await?.try_get(0)?;
        Ok(u64::try_from(count)?)
    }

    async fn update_fields(&self, id: Uuid, patch: &IssuePatch) -> anyhow::Result<Option<Issue>> {
        let trimmed = |field: &Option<String>| field.as_deref().map(|value| value.trim().to_string());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE issues SET title = COALESCE(?, title), description = COALESCE(?, description), \
             category = COALESCE(?, category), location = COALESCE(?, location), \
             image_url = COALESCE(?, image_url) WHERE id = ?",
        )
        .bind(trimmed(&patch.title))
        .bind(trimmed(&patch.description))
        .bind(trimmed(&patch.category))
        .bind(patch.location.clone())
        .bind(patch.image_url.clone())
        .bind(uuid_to_blob(id))
        .execute(&mut *tx)
        .await?;

        let issue = fetch_issue(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(issue)
    }

    /// Conditional `UPDATE`; the preconditions are part of the `WHERE` clause.
    async fn transition(
        &self,
        id: Uuid,
        change: &StatusChange,
    ) -> anyhow::Result<TransitionOutcome> {
        let resolved_at = (change.to == IssueStatus::Resolved).then(|| to_micros(change.at));
        let mut update = QueryBuilder::<Sqlite>::new("UPDATE issues SET status = ");
        update
            .push_bind(change.to.as_str())
            .push(", resolved_at = ")
            .push_bind(resolved_at)
            .push(" WHERE id = ")
            .push_bind(uuid_to_blob(id))
            .push(" AND status IN (");
        let mut sources = update.separated(", ");
        for status in &change.allowed_from {
            sources.push_bind(status.as_str());
        }
        update.push(")");
        if let Some(assignee) = &change.assignee {
            update.push(" AND staff_email = ").push_bind(assignee.clone());
        }

        let mut tx = self.pool.begin().await?;
        let applied = update.build().execute(&mut *tx).await?.rows_affected() > 0;
        let current = fetch_issue(&mut *tx, id).await?;
        tx.commit().await?;

        Ok(match current {
            None => TransitionOutcome::Missing,
            Some(issue) if applied => TransitionOutcome::Applied(issue),
            Some(issue) if !change.allowed_from.contains(&issue.status) => {
                TransitionOutcome::StatusMismatch(issue.status)
            }
            Some(_) => TransitionOutcome::AssigneeMismatch,
        })
    }

    async fn assign(&self, id: Uuid, staff: &AssignedStaff) -> anyhow::Result<Option<Issue>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE issues SET staff_email = ?, staff_name = ?, status = ?, resolved_at = NULL \
             WHERE id = ?",
        )
        .bind(staff.staff_email.clone())
        .bind(staff.staff_name.clone())
        .bind(IssueStatus::Pending.as_str())
        .bind(uuid_to_blob(id))
        .execute(&mut *tx)
        .await?;

        let issue = fetch_issue(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(issue)
    }

    /// The vote row and the counter change in one transaction that starts with
    /// a write, so concurrent voters serialize on the database lock.
    async fn add_upvote(&self, id: Uuid, email: &str) -> anyhow::Result<UpvoteOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO issue_upvotes (issue_id, email) \
             SELECT ?1, ?2 WHERE EXISTS (SELECT 1 FROM issues WHERE id = ?1) \
             ON CONFLICT (issue_id, email) DO NOTHING",
        )
        .bind(uuid_to_blob(id))
        .bind(email.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            let exists = sqlx::query("SELECT 1 FROM issues WHERE id = ?")
                .bind(uuid_to_blob(id))
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            tx.rollback().await?;
            return Ok(if exists {
                UpvoteOutcome::AlreadyVoted
            } else {
                UpvoteOutcome::Missing
            });
        }

        let count: i64 = sqlx::query(
            "UPDATE issues SET upvote_count = upvote_count + 1 WHERE id = ? RETURNING upvote_count",
        )
        .bind(uuid_to_blob(id))
        .fetch_one(&mut *tx)
        .await?
        .try_get(0)?;
        tx.commit().await?;

        Ok(UpvoteOutcome::Added(u64::try_from(count)?))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let removed = sqlx::query("DELETE FROM issues WHERE id = ?")
            .bind(uuid_to_blob(id))
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }
}

#[async_trait]
impl TimelineLedger for SqliteStore {
    async fn append(&self, entry: TimelineEntry) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO timeline (id, issue_id, status, message, updated_by, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(entry.id))
        .bind(uuid_to_blob(entry.issue_id))
        .bind(entry.status)
        .bind(entry.message)
        .bind(entry.updated_by)
        .bind(to_micros(entry.timestamp))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(&self, issue_id: Uuid) -> anyhow::Result<Vec<TimelineEntry>> {
        sqlx::query(
            "SELECT id, issue_id, status, message, updated_by, timestamp FROM timeline \
             WHERE issue_id = ? ORDER BY timestamp DESC, id DESC",
        )
        .bind(uuid_to_blob(issue_id))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(timeline_from_row)
        .collect()
    }
}

#[async_trait]
impl CitizenDirectory for SqliteStore {
    async fn insert_if_absent(&self, citizen: Citizen) -> anyhow::Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO citizens (id, email, display_name, photo_url, role, blocked, premium, \
             created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT (email) DO NOTHING",
        )
        .bind(uuid_to_blob(citizen.id))
        .bind(citizen.email)
        .bind(citizen.display_name)
        .bind(citizen.photo_url)
        .bind(citizen.role.as_str())
        .bind(citizen.blocked)
        .bind(citizen.premium)
        .bind(to_micros(citizen.created_at))
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Citizen>> {
        sqlx::query(concat!(citizen_select!(), " WHERE id = ?"))
            .bind(uuid_to_blob(id))
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(citizen_from_row)
            .transpose()
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Citizen>> {
        fetch_citizen_by_email(&self.pool, email).await
    }

    async fn list(&self, search: &str, limit: Option<u64>) -> anyhow::Result<Vec<Citizen>> {
        let limit = limit.map(to_i64).transpose()?.unwrap_or(-1);
        sqlx::query(concat!(
            citizen_select!(),
            " WHERE ?1 = '' OR instr(lower(display_name), lower(?1)) > 0 \
             OR instr(lower(email), lower(?1)) > 0 \
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        ))
        .bind(search.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(citizen_from_row)
        .collect()
    }

    async fn set_role(&self, id: Uuid, role: Role) -> anyhow::Result<Option<Citizen>> {
        sqlx::query("UPDATE citizens SET role = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(uuid_to_blob(id))
            .execute(&self.pool)
            .await?;
        self.find(id).await
    }

    async fn set_blocked(&self, id: Uuid, blocked: bool) -> anyhow::Result<Option<Citizen>> {
        sqlx::query("UPDATE citizens SET blocked = ? WHERE id = ?")
            .bind(blocked)
            .bind(uuid_to_blob(id))
            .execute(&self.pool)
            .await?;
        self.find(id).await
    }

    async fn set_premium(&self, email: &str, premium: bool) -> anyhow::Result<Option<Citizen>> {
        sqlx::query("UPDATE citizens SET premium = ? WHERE email = ?")
            .bind(premium)
            .bind(email.to_string())
            .execute(&self.pool)
            .await?;
        self.find_by_email(email).await
    }
}

#[async_trait]
impl StaffRoster for SqliteStore {
    async fn insert_if_absent(&self, application: StaffApplication) -> anyhow::Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO staff (id, staff_email, staff_name, phone, status, work_status, \
             created_at) VALUES (?, ?, ?, ?, ?, ?, ?) ON CONFLICT (staff_email) DO NOTHING",
        )
        .bind(uuid_to_blob(application.id))
        .bind(application.staff_email)
        .bind(application.staff_name)
        .bind(application.phone)
        .bind(application_status_str(application.status))
        .bind(application.work_status.map(|_| "available"))
        .bind(to_micros(application.created_at))
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<StaffApplication>> {
        sqlx::query(concat!(staff_select!(), " WHERE id = ?"))
            .bind(uuid_to_blob(id))
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(staff_from_row)
            .transpose()
    }

    async fn list(&self) -> anyhow::Result<Vec<StaffApplication>> {
        sqlx::query(concat!(staff_select!(), " ORDER BY created_at DESC, id DESC"))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(staff_from_row)
            .collect()
    }

    /// Application and citizen change in one transaction; a missing citizen
    /// rolls the application update back.
    async fn review(&self, id: Uuid, decision: ReviewDecision) -> anyhow::Result<ReviewOutcome> {
        let work_status = (decision == ReviewDecision::Approved).then_some("available");
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(concat!(
            "UPDATE staff SET status = ?, work_status = COALESCE(?, work_status) WHERE id = ? ",
            "RETURNING id, staff_email, staff_name, phone, status, work_status, created_at"
        ))
        .bind(application_status_str(decision.status()))
        .bind(work_status)
        .bind(uuid_to_blob(id))
        .fetch_optional(&mut *tx)
        .await?;
        let Some(application) = row.as_ref().map(staff_from_row).transpose()? else {
            tx.rollback().await?;
            return Ok(ReviewOutcome::Missing);
        };

        if decision == ReviewDecision::Approved {
            let promoted = sqlx::query("UPDATE citizens SET role = ? WHERE email = ?")
                .bind(Role::Staff.as_str())
                .bind(application.staff_email.clone())
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if promoted == 0 {
                tx.rollback().await?;
                return Ok(ReviewOutcome::CitizenMissing);
            }
        }

        tx.commit().await?;
        Ok(ReviewOutcome::Reviewed(application))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let removed = sqlx::query("DELETE FROM staff WHERE id = ?")
            .bind(uuid_to_blob(id))
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }
}

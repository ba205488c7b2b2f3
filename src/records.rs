use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::columns::TableViewDef;
use crate::domain::CrmError;

/// Which record domain a grid is showing. Opportunity grids render
/// renewal records grouped by stage columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableKind {
    Organizations,
    Contacts,
    Opportunities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relationship {
    Customer,
    Prospect,
    NotAFit,
    FormerCustomer,
}

impl Relationship {
    pub fn label(&self) -> &'static str {
        match self {
            Relationship::Customer => "Customer",
            Relationship::Prospect => "Prospect",
            Relationship::NotAFit => "Not a fit",
            Relationship::FormerCustomer => "Former customer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Lead,
    Target,
    Engaged,
    Trial,
    Customer,
    ClosedLost,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Lead => "Lead",
            Stage::Target => "Target",
            Stage::Engaged => "Engaged",
            Stage::Trial => "Trial",
            Stage::Customer => "Customer",
            Stage::ClosedLost => "Closed lost",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnboardingStatus {
    NotApplicable,
    NotStarted,
    OnTrack,
    Late,
    Stuck,
    Done,
    Successful,
}

impl OnboardingStatus {
    pub fn label(&self) -> &'static str {
        match self {
            OnboardingStatus::NotApplicable => "Not applicable",
            OnboardingStatus::NotStarted => "Not started",
            OnboardingStatus::OnTrack => "On track",
            OnboardingStatus::Late => "Late",
            OnboardingStatus::Stuck => "Stuck",
            OnboardingStatus::Done => "Done",
            OnboardingStatus::Successful => "Successful",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenewalLikelihood {
    HighRenewal,
    MediumRenewal,
    LowRenewal,
    ZeroRenewal,
}

impl RenewalLikelihood {
    pub fn label(&self) -> &'static str {
        match self {
            RenewalLikelihood::HighRenewal => "High",
            RenewalLikelihood::MediumRenewal => "Medium",
            RenewalLikelihood::LowRenewal => "Low",
            RenewalLikelihood::ZeroRenewal => "Zero",
        }
    }
}

/// Interaction kinds shown on the timeline. The serialized names follow
/// the backend touchpoint type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TouchpointKind {
    #[serde(rename = "INTERACTION_EVENT_EMAIL_SENT")]
    EmailSent,
    #[serde(rename = "INTERACTION_EVENT_CHAT")]
    Chat,
    #[serde(rename = "MEETING")]
    Meeting,
    #[serde(rename = "LOG_ENTRY")]
    LogEntry,
    #[serde(rename = "ISSUE_CREATED")]
    IssueCreated,
    #[serde(rename = "ISSUE_UPDATED")]
    IssueUpdated,
    #[serde(rename = "ACTION_CREATED")]
    ActionCreated,
}

impl TouchpointKind {
    pub fn label(&self) -> &'static str {
        match self {
            TouchpointKind::EmailSent => "Email sent",
            TouchpointKind::Chat => "Message received",
            TouchpointKind::Meeting => "Meeting",
            TouchpointKind::LogEntry => "Log entry",
            TouchpointKind::IssueCreated => "Issue created",
            TouchpointKind::IssueUpdated => "Issue updated",
            TouchpointKind::ActionCreated => "Organization created",
        }
    }
}

/// One entry of an organization's interaction timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub at: DateTime<Utc>,
    pub kind: TouchpointKind,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Social {
    pub url: String,
    #[serde(default)]
    pub followers_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country_code_a2: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalSummary {
    #[serde(default)]
    pub arr_forecast: Option<f64>,
    #[serde(default)]
    pub next_renewal_date: Option<NaiveDate>,
    #[serde(default)]
    pub renewal_likelihood: Option<RenewalLikelihood>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetails {
    #[serde(default)]
    pub renewal_summary: RenewalSummary,
    #[serde(default)]
    pub onboarding_status: Option<OnboardingStatus>,
    #[serde(default)]
    pub churned_at: Option<NaiveDate>,
    #[serde(default)]
    pub ltv: Option<f64>,
}

fn default_created() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

/// A mirrored organization record. Read-only from the perspective of the
/// filter/column layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub relationship: Option<Relationship>,
    #[serde(default)]
    pub stage: Option<Stage>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub lead_source: Option<String>,
    #[serde(default)]
    pub employees: Option<u64>,
    #[serde(default)]
    pub year_founded: Option<i32>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub socials: Vec<Social>,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub account: AccountDetails,
    #[serde(default = "default_created")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,
}

impl Organization {
    pub fn linkedin(&self) -> Option<&Social> {
        self.socials.iter().find(|s| s.url.contains("linkedin"))
    }

    /// Derived last touchpoint, the newest timeline entry.
    pub fn last_touchpoint(&self) -> Option<&TimelineEvent> {
        self.timeline.iter().max_by_key(|e| e.at)
    }

    pub fn company_age(&self) -> Option<i32> {
        self.year_founded.map(|y| Utc::now().year() - y)
    }

    pub fn country(&self) -> Option<&str> {
        self.locations
            .first()
            .and_then(|l| l.country_code_a2.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRole {
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub started_at: Option<NaiveDate>,
    #[serde(default)]
    pub ended_at: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub phone_numbers: Vec<String>,
    #[serde(default)]
    pub job_roles: Vec<JobRole>,
    /// Persona tags.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub socials: Vec<Social>,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub connected_users: Vec<String>,
}

impl Contact {
    pub fn name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        full.trim().to_string()
    }

    pub fn linkedin(&self) -> Option<&Social> {
        self.socials.iter().find(|s| s.url.contains("linkedin"))
    }

    pub fn job_title(&self) -> Option<&str> {
        self.job_roles
            .iter()
            .find(|r| r.ended_at.is_none())
            .and_then(|r| r.job_title.as_deref())
    }
}

/// A renewal opportunity, denormalized with the owning organization's
/// name and touchpoint so opportunity grids need no cross-cache joins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Renewal {
    pub id: String,
    #[serde(default)]
    pub organization_id: String,
    #[serde(default)]
    pub organization_name: String,
    #[serde(default)]
    pub arr_forecast: Option<f64>,
    #[serde(default)]
    pub renewal_date: Option<NaiveDate>,
    #[serde(default)]
    pub likelihood: Option<RenewalLikelihood>,
    #[serde(default)]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub last_touchpoint_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_touchpoint_kind: Option<TouchpointKind>,
}

/// Borrowed view over one cached record, the unit the predicate
/// dispatcher and cell mappers work on.
#[derive(Debug, Clone, Copy)]
pub enum RowRef<'a> {
    Org(&'a Organization),
    Contact(&'a Contact),
    Renewal(&'a Renewal),
}

/// The full workspace snapshot as persisted on disk: mirrored records
/// plus the saved table view definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub renewals: Vec<Renewal>,
    #[serde(default)]
    pub table_view_defs: Vec<TableViewDef>,
}

impl Workspace {
    pub fn load(path: &Path) -> Result<Workspace, CrmError> {
        let metadata = fs::metadata(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => CrmError::FileNotFound(path.to_path_buf()),
            ErrorKind::PermissionDenied => CrmError::PermissionDenied(path.to_path_buf()),
            _ => CrmError::Io(e),
        })?;
        if !metadata.is_file() {
            return Err(CrmError::LoadingFailed("not a file".into()));
        }

        let raw = fs::read_to_string(path)?;
        let workspace: Workspace = serde_json::from_str(&raw)?;
        info!(
            "Loaded workspace: {} orgs, {} contacts, {} renewals, {} views",
            workspace.organizations.len(),
            workspace.contacts.len(),
            workspace.renewals.len(),
            workspace.table_view_defs.len()
        );
        Ok(workspace)
    }

    pub fn save(&self, path: &PathBuf) -> Result<(), CrmError> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        debug!("Saved workspace to {}", path.display());
        Ok(())
    }
}

/// Owned record cache. Mutations bump the revision counter; consumers
/// compare revisions and rebuild their views when stale.
#[derive(Debug, Default)]
pub struct RecordCache {
    organizations: Vec<Organization>,
    contacts: Vec<Contact>,
    renewals: Vec<Renewal>,
    revision: u64,
}

impl RecordCache {
    pub fn new(organizations: Vec<Organization>, contacts: Vec<Contact>, renewals: Vec<Renewal>) -> Self {
        Self {
            organizations,
            contacts,
            renewals,
            revision: 1,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self, kind: TableKind) -> usize {
        match kind {
            TableKind::Organizations => self.organizations.len(),
            TableKind::Contacts => self.contacts.len(),
            TableKind::Opportunities => self.renewals.len(),
        }
    }

    pub fn row(&self, kind: TableKind, idx: usize) -> Option<RowRef<'_>> {
        match kind {
            TableKind::Organizations => self.organizations.get(idx).map(RowRef::Org),
            TableKind::Contacts => self.contacts.get(idx).map(RowRef::Contact),
            TableKind::Opportunities => self.renewals.get(idx).map(RowRef::Renewal),
        }
    }

    pub fn organizations(&self) -> &[Organization] {
        &self.organizations
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn renewals(&self) -> &[Renewal] {
        &self.renewals
    }

    /// Swap in a fresh snapshot, invalidating every derived view.
    pub fn replace(&mut self, organizations: Vec<Organization>, contacts: Vec<Contact>, renewals: Vec<Renewal>) {
        self.organizations = organizations;
        self.contacts = contacts;
        self.renewals = renewals;
        self.revision += 1;
        debug!("Record cache replaced, revision {}", self.revision);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_revision_bumps_on_replace() {
        let mut cache = RecordCache::new(Vec::new(), Vec::new(), Vec::new());
        let before = cache.revision();
        cache.replace(Vec::new(), Vec::new(), Vec::new());
        assert!(cache.revision() > before);
    }

    #[test]
    fn last_touchpoint_is_newest_event() {
        let org: Organization = serde_json::from_value(serde_json::json!({
            "id": "o1",
            "name": "Acme",
            "timeline": [
                { "at": "2024-01-01T10:00:00Z", "kind": "MEETING", "summary": "kickoff" },
                { "at": "2024-03-05T10:00:00Z", "kind": "LOG_ENTRY", "summary": "note" }
            ]
        }))
        .unwrap();
        let tp = org.last_touchpoint().unwrap();
        assert_eq!(tp.kind, TouchpointKind::LogEntry);
    }

    #[test]
    fn contact_name_joins_and_trims() {
        let c = Contact {
            id: "c1".into(),
            first_name: "Isabella".into(),
            last_name: String::new(),
            ..Contact::default()
        };
        assert_eq!(c.name(), "Isabella");
    }

    #[test]
    fn workspace_fixture_parses() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/workspace.json");
        let ws = Workspace::load(&path).unwrap();
        assert!(!ws.organizations.is_empty());
        assert!(!ws.table_view_defs.is_empty());
    }
}

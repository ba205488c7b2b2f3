use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::filters::{parse_group, FilterGroup, FilterItem, FilterValue};
use crate::records::{RowRef, TableKind};

/// Column identifiers as persisted in table view definitions. The space is
/// closed, with an explicit `Unknown` fallback: a typo'd or removed
/// identifier deserializes instead of erroring and is dropped from render.
/// The raw string is carried along so saving a view never rewrites a
/// column this build does not recognize.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnType {
    OrganizationsAvatar,
    OrganizationsName,
    OrganizationsWebsite,
    OrganizationsRelationship,
    OrganizationsStage,
    OrganizationsCreatedDate,
    OrganizationsEmployeeCount,
    OrganizationsOwner,
    OrganizationsIndustry,
    OrganizationsForecastArr,
    OrganizationsRenewalDate,
    OrganizationsRenewalLikelihood,
    OrganizationsOnboardingStatus,
    OrganizationsLastTouchpoint,
    OrganizationsLastTouchpointDate,
    OrganizationsChurnDate,
    OrganizationsSocials,
    OrganizationsLinkedinFollowerCount,
    OrganizationsLeadSource,
    OrganizationsLtv,
    OrganizationsCity,
    OrganizationsIsPublic,
    OrganizationsYearFounded,
    OrganizationsTags,
    ContactsAvatar,
    ContactsName,
    ContactsOrganization,
    ContactsEmails,
    ContactsPhoneNumbers,
    ContactsCity,
    ContactsRegion,
    ContactsLinkedin,
    ContactsPersona,
    ContactsJobTitle,
    ContactsLinkedinFollowerCount,
    ContactsConnections,
    RenewalsName,
    RenewalsForecastArr,
    RenewalsRenewalDate,
    RenewalsRenewalLikelihood,
    RenewalsLastTouchpoint,
    RenewalsOwner,
    /// Stage markers carried only inside embedded column filters of
    /// opportunity views. Not renderable.
    ExternalStage,
    InternalStage,
    /// Fallback for identifiers this build does not know, keeping the
    /// persisted string intact.
    Unknown(String),
}

impl ColumnType {
    pub fn as_str(&self) -> &str {
        match self {
            ColumnType::OrganizationsAvatar => "ORGANIZATIONS_AVATAR",
            ColumnType::OrganizationsName => "ORGANIZATIONS_NAME",
            ColumnType::OrganizationsWebsite => "ORGANIZATIONS_WEBSITE",
            ColumnType::OrganizationsRelationship => "ORGANIZATIONS_RELATIONSHIP",
            ColumnType::OrganizationsStage => "ORGANIZATIONS_STAGE",
            ColumnType::OrganizationsCreatedDate => "ORGANIZATIONS_CREATED_DATE",
            ColumnType::OrganizationsEmployeeCount => "ORGANIZATIONS_EMPLOYEE_COUNT",
            ColumnType::OrganizationsOwner => "ORGANIZATIONS_OWNER",
            ColumnType::OrganizationsIndustry => "ORGANIZATIONS_INDUSTRY",
            ColumnType::OrganizationsForecastArr => "ORGANIZATIONS_FORECAST_ARR",
            ColumnType::OrganizationsRenewalDate => "ORGANIZATIONS_RENEWAL_DATE",
            ColumnType::OrganizationsRenewalLikelihood => "ORGANIZATIONS_RENEWAL_LIKELIHOOD",
            ColumnType::OrganizationsOnboardingStatus => "ORGANIZATIONS_ONBOARDING_STATUS",
            ColumnType::OrganizationsLastTouchpoint => "ORGANIZATIONS_LAST_TOUCHPOINT",
            ColumnType::OrganizationsLastTouchpointDate => "ORGANIZATIONS_LAST_TOUCHPOINT_DATE",
            ColumnType::OrganizationsChurnDate => "ORGANIZATIONS_CHURN_DATE",
            ColumnType::OrganizationsSocials => "ORGANIZATIONS_SOCIALS",
            ColumnType::OrganizationsLinkedinFollowerCount => {
                "ORGANIZATIONS_LINKEDIN_FOLLOWER_COUNT"
            }
            ColumnType::OrganizationsLeadSource => "ORGANIZATIONS_LEAD_SOURCE",
            ColumnType::OrganizationsLtv => "ORGANIZATIONS_LTV",
            ColumnType::OrganizationsCity => "ORGANIZATIONS_CITY",
            ColumnType::OrganizationsIsPublic => "ORGANIZATIONS_IS_PUBLIC",
            ColumnType::OrganizationsYearFounded => "ORGANIZATIONS_YEAR_FOUNDED",
            ColumnType::OrganizationsTags => "ORGANIZATIONS_TAGS",
            ColumnType::ContactsAvatar => "CONTACTS_AVATAR",
            ColumnType::ContactsName => "CONTACTS_NAME",
            ColumnType::ContactsOrganization => "CONTACTS_ORGANIZATION",
            ColumnType::ContactsEmails => "CONTACTS_EMAILS",
            ColumnType::ContactsPhoneNumbers => "CONTACTS_PHONE_NUMBERS",
            ColumnType::ContactsCity => "CONTACTS_CITY",
            ColumnType::ContactsRegion => "CONTACTS_REGION",
            ColumnType::ContactsLinkedin => "CONTACTS_LINKEDIN",
            ColumnType::ContactsPersona => "CONTACTS_PERSONA",
            ColumnType::ContactsJobTitle => "CONTACTS_JOB_TITLE",
            ColumnType::ContactsLinkedinFollowerCount => "CONTACTS_LINKEDIN_FOLLOWER_COUNT",
            ColumnType::ContactsConnections => "CONTACTS_CONNECTIONS",
            ColumnType::RenewalsName => "RENEWALS_NAME",
            ColumnType::RenewalsForecastArr => "RENEWALS_FORECAST_ARR",
            ColumnType::RenewalsRenewalDate => "RENEWALS_RENEWAL_DATE",
            ColumnType::RenewalsRenewalLikelihood => "RENEWALS_RENEWAL_LIKELIHOOD",
            ColumnType::RenewalsLastTouchpoint => "RENEWALS_LAST_TOUCHPOINT",
            ColumnType::RenewalsOwner => "RENEWALS_OWNER",
            ColumnType::ExternalStage => "externalStage",
            ColumnType::InternalStage => "internalStage",
            ColumnType::Unknown(raw) => raw,
        }
    }

    /// Header text for CSV exports: the identifier with underscores
    /// turned into spaces.
    pub fn humanize(&self) -> String {
        self.as_str().replace('_', " ")
    }

    pub fn is_avatar(&self) -> bool {
        matches!(self, ColumnType::OrganizationsAvatar | ColumnType::ContactsAvatar)
    }
}

impl ColumnType {
    fn parse_known(s: &str) -> Option<ColumnType> {
        let ct = match s {
            "ORGANIZATIONS_AVATAR" => ColumnType::OrganizationsAvatar,
            "ORGANIZATIONS_NAME" => ColumnType::OrganizationsName,
            "ORGANIZATIONS_WEBSITE" => ColumnType::OrganizationsWebsite,
            "ORGANIZATIONS_RELATIONSHIP" => ColumnType::OrganizationsRelationship,
            "ORGANIZATIONS_STAGE" => ColumnType::OrganizationsStage,
            "ORGANIZATIONS_CREATED_DATE" => ColumnType::OrganizationsCreatedDate,
            "ORGANIZATIONS_EMPLOYEE_COUNT" => ColumnType::OrganizationsEmployeeCount,
            "ORGANIZATIONS_OWNER" => ColumnType::OrganizationsOwner,
            "ORGANIZATIONS_INDUSTRY" => ColumnType::OrganizationsIndustry,
            "ORGANIZATIONS_FORECAST_ARR" => ColumnType::OrganizationsForecastArr,
            "ORGANIZATIONS_RENEWAL_DATE" => ColumnType::OrganizationsRenewalDate,
            "ORGANIZATIONS_RENEWAL_LIKELIHOOD" => ColumnType::OrganizationsRenewalLikelihood,
            "ORGANIZATIONS_ONBOARDING_STATUS" => ColumnType::OrganizationsOnboardingStatus,
            "ORGANIZATIONS_LAST_TOUCHPOINT" => ColumnType::OrganizationsLastTouchpoint,
            "ORGANIZATIONS_LAST_TOUCHPOINT_DATE" => ColumnType::OrganizationsLastTouchpointDate,
            "ORGANIZATIONS_CHURN_DATE" => ColumnType::OrganizationsChurnDate,
            "ORGANIZATIONS_SOCIALS" => ColumnType::OrganizationsSocials,
            "ORGANIZATIONS_LINKEDIN_FOLLOWER_COUNT" => {
                ColumnType::OrganizationsLinkedinFollowerCount
            }
            "ORGANIZATIONS_LEAD_SOURCE" => ColumnType::OrganizationsLeadSource,
            "ORGANIZATIONS_LTV" => ColumnType::OrganizationsLtv,
            "ORGANIZATIONS_CITY" => ColumnType::OrganizationsCity,
            "ORGANIZATIONS_IS_PUBLIC" => ColumnType::OrganizationsIsPublic,
            "ORGANIZATIONS_YEAR_FOUNDED" => ColumnType::OrganizationsYearFounded,
            "ORGANIZATIONS_TAGS" => ColumnType::OrganizationsTags,
            "CONTACTS_AVATAR" => ColumnType::ContactsAvatar,
            "CONTACTS_NAME" => ColumnType::ContactsName,
            "CONTACTS_ORGANIZATION" => ColumnType::ContactsOrganization,
            "CONTACTS_EMAILS" => ColumnType::ContactsEmails,
            "CONTACTS_PHONE_NUMBERS" => ColumnType::ContactsPhoneNumbers,
            "CONTACTS_CITY" => ColumnType::ContactsCity,
            "CONTACTS_REGION" => ColumnType::ContactsRegion,
            "CONTACTS_LINKEDIN" => ColumnType::ContactsLinkedin,
            "CONTACTS_PERSONA" => ColumnType::ContactsPersona,
            "CONTACTS_JOB_TITLE" => ColumnType::ContactsJobTitle,
            "CONTACTS_LINKEDIN_FOLLOWER_COUNT" => ColumnType::ContactsLinkedinFollowerCount,
            "CONTACTS_CONNECTIONS" => ColumnType::ContactsConnections,
            "RENEWALS_NAME" => ColumnType::RenewalsName,
            "RENEWALS_FORECAST_ARR" => ColumnType::RenewalsForecastArr,
            "RENEWALS_RENEWAL_DATE" => ColumnType::RenewalsRenewalDate,
            "RENEWALS_RENEWAL_LIKELIHOOD" => ColumnType::RenewalsRenewalLikelihood,
            "RENEWALS_LAST_TOUCHPOINT" => ColumnType::RenewalsLastTouchpoint,
            "RENEWALS_OWNER" => ColumnType::RenewalsOwner,
            "externalStage" => ColumnType::ExternalStage,
            "internalStage" => ColumnType::InternalStage,
            _ => return None,
        };
        Some(ct)
    }
}

impl From<String> for ColumnType {
    fn from(s: String) -> Self {
        ColumnType::parse_known(&s).unwrap_or(ColumnType::Unknown(s))
    }
}

impl From<ColumnType> for String {
    fn from(ct: ColumnType) -> Self {
        match ct {
            ColumnType::Unknown(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

/// Static render properties of one column kind.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub title: &'static str,
    pub width: u16,
    pub min_width: u16,
    pub max_width: u16,
    pub resizable: bool,
    pub filterable: bool,
    pub sortable: bool,
}

const fn spec(
    title: &'static str,
    width: u16,
    min_width: u16,
    max_width: u16,
) -> ColumnSpec {
    ColumnSpec {
        title,
        width,
        min_width,
        max_width,
        resizable: true,
        filterable: true,
        sortable: true,
    }
}

/// The per-domain column registry. Stage markers and unknown identifiers
/// have no entry and are silently dropped from the resolved schema.
pub fn column_spec(ct: &ColumnType) -> Option<ColumnSpec> {
    let s = match ct {
        ColumnType::OrganizationsAvatar | ColumnType::ContactsAvatar => ColumnSpec {
            title: "",
            width: 4,
            min_width: 4,
            max_width: 4,
            resizable: false,
            filterable: false,
            sortable: false,
        },
        ColumnType::OrganizationsName => spec("Name", 24, 12, 64),
        ColumnType::OrganizationsWebsite => spec("Website", 22, 10, 64),
        ColumnType::OrganizationsRelationship => spec("Relationship", 16, 10, 20),
        ColumnType::OrganizationsStage => spec("Stage", 12, 8, 16),
        ColumnType::OrganizationsCreatedDate => spec("Created", 12, 10, 12),
        ColumnType::OrganizationsEmployeeCount => spec("Employees", 10, 6, 12),
        ColumnType::OrganizationsOwner => spec("Owner", 16, 8, 32),
        ColumnType::OrganizationsIndustry => spec("Industry", 18, 10, 32),
        ColumnType::OrganizationsForecastArr => spec("ARR Forecast", 14, 10, 16),
        ColumnType::OrganizationsRenewalDate => spec("Renewal", 12, 10, 12),
        ColumnType::OrganizationsRenewalLikelihood => spec("Health", 8, 6, 10),
        ColumnType::OrganizationsOnboardingStatus => spec("Onboarding", 14, 8, 16),
        ColumnType::OrganizationsLastTouchpoint => spec("Last touchpoint", 24, 12, 40),
        ColumnType::OrganizationsLastTouchpointDate => spec("Last touch", 12, 10, 12),
        ColumnType::OrganizationsChurnDate => spec("Churned", 12, 10, 12),
        ColumnType::OrganizationsSocials => spec("LinkedIn", 26, 12, 64),
        ColumnType::OrganizationsLinkedinFollowerCount => spec("Followers", 10, 6, 12),
        ColumnType::OrganizationsLeadSource => spec("Source", 12, 8, 20),
        ColumnType::OrganizationsLtv => spec("LTV", 12, 8, 14),
        ColumnType::OrganizationsCity => spec("Country", 8, 4, 12),
        ColumnType::OrganizationsIsPublic => spec("Ownership", 10, 8, 10),
        ColumnType::OrganizationsYearFounded => spec("Founded", 8, 6, 8),
        ColumnType::OrganizationsTags => spec("Tags", 18, 8, 40),
        ColumnType::ContactsName => spec("Name", 22, 12, 64),
        ColumnType::ContactsOrganization => spec("Organization", 22, 10, 64),
        ColumnType::ContactsEmails => spec("Email", 26, 12, 64),
        ColumnType::ContactsPhoneNumbers => spec("Phone", 16, 10, 24),
        ColumnType::ContactsCity => spec("City", 14, 8, 24),
        ColumnType::ContactsRegion => spec("Region", 14, 8, 24),
        ColumnType::ContactsLinkedin => spec("LinkedIn", 26, 12, 64),
        ColumnType::ContactsPersona => spec("Persona", 16, 8, 40),
        ColumnType::ContactsJobTitle => spec("Job Title", 18, 8, 40),
        ColumnType::ContactsLinkedinFollowerCount => spec("LinkedIn Followers", 18, 6, 18),
        ColumnType::ContactsConnections => spec("Connected To", 16, 8, 40),
        ColumnType::RenewalsName => spec("Organization", 24, 12, 64),
        ColumnType::RenewalsForecastArr => spec("ARR Forecast", 14, 10, 16),
        ColumnType::RenewalsRenewalDate => spec("Renewal", 12, 10, 12),
        ColumnType::RenewalsRenewalLikelihood => spec("Health", 8, 6, 10),
        ColumnType::RenewalsLastTouchpoint => spec("Last touchpoint", 24, 12, 40),
        ColumnType::RenewalsOwner => spec("Owner", 16, 8, 32),
        ColumnType::ExternalStage | ColumnType::InternalStage | ColumnType::Unknown(_) => {
            return None;
        }
    };
    Some(s)
}

/// One persisted column of a view. `filter` carries a serialized
/// `FilterGroup`, exactly as the backend stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnView {
    pub column_id: u32,
    pub column_type: ColumnType,
    #[serde(default)]
    pub name: String,
    pub visible: bool,
    #[serde(default)]
    pub width: u16,
    #[serde(default)]
    pub filter: String,
}

impl ColumnView {
    fn filter_group(&self) -> FilterGroup {
        parse_group(&self.filter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortSpec {
    pub by: ColumnType,
    pub direction: SortDirection,
}

/// A saved grid preset: ordered columns, table-level filters and sorting.
/// Owned by the backend in the original system; here it is mirrored in the
/// workspace file. Columns are never deleted, only hidden.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableViewDef {
    pub id: String,
    pub name: String,
    pub table_type: TableKind,
    #[serde(default)]
    pub table_id: String,
    pub columns: Vec<ColumnView>,
    #[serde(default)]
    pub filters: String,
    #[serde(default)]
    pub sorting: String,
    #[serde(default)]
    pub is_preset: bool,
    #[serde(default)]
    pub is_shared: bool,
}

/// A column joined with its registry entry, ready for rendering.
#[derive(Debug, Clone)]
pub struct ResolvedColumn {
    pub view: ColumnView,
    pub spec: ColumnSpec,
}

impl ResolvedColumn {
    pub fn title(&self) -> &str {
        if self.view.name.is_empty() {
            self.spec.title
        } else {
            &self.view.name
        }
    }

    pub fn render_width(&self) -> u16 {
        if self.view.width == 0 {
            self.spec.width
        } else {
            self.view.width.clamp(self.spec.min_width, self.spec.max_width)
        }
    }
}

/// Merge the persisted view with the static registry. View order is
/// preserved; identifiers without a registry entry are skipped.
pub fn resolve_columns(def: &TableViewDef) -> Vec<ResolvedColumn> {
    def.columns
        .iter()
        .filter_map(|cv| match column_spec(&cv.column_type) {
            Some(spec) => Some(ResolvedColumn {
                view: cv.clone(),
                spec,
            }),
            None => {
                debug!(
                    "Dropping column {:?} from view '{}': not in registry",
                    cv.column_type, def.name
                );
                None
            }
        })
        .collect()
}

/// Move one element of an ordered list from `from` to `to`. The explicit,
/// independently testable core of drag-reordering. Out-of-range indices
/// and `from == to` are no-ops.
pub fn move_item<T>(items: &mut Vec<T>, from: usize, to: usize) {
    if from == to || from >= items.len() || to >= items.len() {
        return;
    }
    let item = items.remove(from);
    items.insert(to, item);
}

impl TableViewDef {
    /// Column ids pinned to the leading edge. Organizations and contacts
    /// pin avatar + name; opportunity views pin the column whose embedded
    /// filter marks the first external stage.
    pub fn leading_pinned(&self) -> Vec<u32> {
        match self.table_type {
            TableKind::Organizations => self
                .columns
                .iter()
                .filter(|c| {
                    matches!(
                        c.column_type,
                        ColumnType::OrganizationsAvatar | ColumnType::OrganizationsName
                    )
                })
                .map(|c| c.column_id)
                .collect(),
            TableKind::Contacts => self
                .columns
                .iter()
                .filter(|c| {
                    matches!(
                        c.column_type,
                        ColumnType::ContactsAvatar | ColumnType::ContactsName
                    )
                })
                .map(|c| c.column_id)
                .collect(),
            TableKind::Opportunities => self
                .columns
                .iter()
                .filter(|c| {
                    stage_marker(&c.filter_group(), ColumnType::ExternalStage)
                        .is_some_and(|stage| stage == "STAGE1")
                })
                .map(|c| c.column_id)
                .collect(),
        }
    }

    /// Column ids pinned to the trailing edge: the closed-won/closed-lost
    /// stage columns of opportunity views.
    pub fn trailing_pinned(&self) -> Vec<u32> {
        match self.table_type {
            TableKind::Opportunities => self
                .columns
                .iter()
                .filter(|c| {
                    stage_marker(&c.filter_group(), ColumnType::InternalStage)
                        .is_some_and(|stage| stage == "CLOSED_WON" || stage == "CLOSED_LOST")
                })
                .map(|c| c.column_id)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Ids of the columns the user may reorder.
    pub fn draggable_ids(&self) -> Vec<u32> {
        let leading = self.leading_pinned();
        let trailing = self.trailing_pinned();
        self.columns
            .iter()
            .map(|c| c.column_id)
            .filter(|id| !leading.contains(id) && !trailing.contains(id))
            .collect()
    }

    /// Reorder by column id within the draggable subset. Pinned columns
    /// never move; the column id sequence of the moved subset is
    /// renumbered so ids stay the stable ordering key.
    pub fn reorder_column(&mut self, source_id: u32, dest_id: u32) {
        if source_id == dest_id {
            return;
        }
        let draggable = self.draggable_ids();
        if !draggable.contains(&source_id) || !draggable.contains(&dest_id) {
            trace!("Reorder rejected: {source_id} -> {dest_id} touches a pinned column");
            return;
        }
        let Some(from) = self.columns.iter().position(|c| c.column_id == source_id) else {
            return;
        };
        let Some(to) = self.columns.iter().position(|c| c.column_id == dest_id) else {
            return;
        };
        move_item(&mut self.columns, from, to);
        self.renumber_draggable();
        trace!("Reordered column {source_id} -> {dest_id} in view '{}'", self.name);
    }

    /// Reassign the draggable subset's ids in ascending order along the
    /// new column order. Pinned ids are untouched.
    fn renumber_draggable(&mut self) {
        let leading = self.leading_pinned();
        let trailing = self.trailing_pinned();
        let mut ids: Vec<u32> = self
            .columns
            .iter()
            .map(|c| c.column_id)
            .filter(|id| !leading.contains(id) && !trailing.contains(id))
            .collect();
        ids.sort_unstable();
        let mut next = ids.into_iter();
        for column in &mut self.columns {
            if leading.contains(&column.column_id) || trailing.contains(&column.column_id) {
                continue;
            }
            if let Some(id) = next.next() {
                column.column_id = id;
            }
        }
    }

    /// Flip one column's visibility without touching the order. Pinned
    /// columns stay visible.
    pub fn toggle_visibility(&mut self, column_type: ColumnType) -> bool {
        let pinned: Vec<u32> = self
            .leading_pinned()
            .into_iter()
            .chain(self.trailing_pinned())
            .collect();
        if let Some(column) = self
            .columns
            .iter_mut()
            .find(|c| c.column_type == column_type)
        {
            if pinned.contains(&column.column_id) {
                return false;
            }
            column.visible = !column.visible;
            return true;
        }
        false
    }

    pub fn set_column_width(&mut self, column_type: ColumnType, width: u16) {
        let Some(spec) = column_spec(&column_type) else {
            return;
        };
        if !spec.resizable {
            return;
        }
        if let Some(column) = self
            .columns
            .iter_mut()
            .find(|c| c.column_type == column_type)
        {
            column.width = width.clamp(spec.min_width, spec.max_width);
        }
    }

    /// Stable-partition the draggable columns so visible ones come first,
    /// as applied when the column edit menu closes.
    pub fn order_columns_by_visibility(&mut self) {
        let draggable = self.draggable_ids();
        let mut subset: Vec<ColumnView> = Vec::with_capacity(draggable.len());
        let mut slots: Vec<usize> = Vec::with_capacity(draggable.len());
        for (idx, column) in self.columns.iter().enumerate() {
            if draggable.contains(&column.column_id) {
                slots.push(idx);
                subset.push(column.clone());
            }
        }
        subset.sort_by_key(|c| !c.visible);
        for (slot, column) in slots.into_iter().zip(subset) {
            self.columns[slot] = column;
        }
        self.renumber_draggable();
    }

    pub fn filter_group(&self) -> FilterGroup {
        parse_group(&self.filters)
    }

    /// Replace or add the criterion for one property in the table-level
    /// AND group and persist it back to the serialized form.
    pub fn upsert_filter(&mut self, item: FilterItem) {
        let mut group = self.filter_group();
        match group
            .and
            .iter_mut()
            .find(|node| node.filter.property == item.property)
        {
            Some(node) => node.filter = item,
            None => group.and.push(crate::filters::FilterNode { filter: item }),
        }
        self.filters = serde_json::to_string(&group).unwrap_or_default();
    }

    pub fn clear_filters(&mut self) {
        self.filters = String::new();
    }

    pub fn sort_spec(&self) -> Option<SortSpec> {
        if self.sorting.is_empty() {
            return None;
        }
        serde_json::from_str(&self.sorting).ok()
    }

    pub fn set_sort_spec(&mut self, sort: Option<SortSpec>) {
        self.sorting = match sort {
            Some(s) => serde_json::to_string(&s).unwrap_or_default(),
            None => String::new(),
        };
    }
}

/// Extract the value of a stage marker criterion from an embedded column
/// filter, if present.
fn stage_marker(group: &FilterGroup, marker: ColumnType) -> Option<String> {
    group
        .and
        .iter()
        .find(|node| node.filter.property == marker)
        .and_then(|node| match &node.filter.value {
            FilterValue::Str(s) => Some(s.clone()),
            FilterValue::List(items) => items.first().cloned(),
            _ => None,
        })
}

/// Humanized initials shown in avatar cells.
pub fn initials(name: &str) -> String {
    name.split_whitespace()
        .take(2)
        .filter_map(|w| w.chars().next())
        .collect::<String>()
        .to_uppercase()
}

pub fn format_number(n: f64) -> String {
    let whole = n.round() as i64;
    let digits = whole.abs().to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if whole < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

/// Cell text for one column/row pair: the per-domain cell renderer the
/// grid and the CSV mapper share. Columns asked about a foreign record
/// kind render empty.
pub fn cell_text(ct: &ColumnType, row: RowRef<'_>) -> String {
    match (ct, row) {
        (ColumnType::OrganizationsAvatar, RowRef::Org(o)) => initials(&o.name),
        (ColumnType::OrganizationsName, RowRef::Org(o)) => o.name.clone(),
        (ColumnType::OrganizationsWebsite, RowRef::Org(o)) => {
            o.website.clone().unwrap_or_default()
        }
        (ColumnType::OrganizationsRelationship, RowRef::Org(o)) => {
            o.relationship.map(|r| r.label().to_string()).unwrap_or_default()
        }
        (ColumnType::OrganizationsStage, RowRef::Org(o)) => {
            o.stage.map(|s| s.label().to_string()).unwrap_or_default()
        }
        (ColumnType::OrganizationsCreatedDate, RowRef::Org(o)) => {
            o.created_at.date_naive().to_string()
        }
        (ColumnType::OrganizationsEmployeeCount, RowRef::Org(o)) => {
            o.employees.map(|e| format_number(e as f64)).unwrap_or_default()
        }
        (ColumnType::OrganizationsOwner, RowRef::Org(o)) => {
            o.owner.as_ref().map(|u| u.name.clone()).unwrap_or_default()
        }
        (ColumnType::OrganizationsIndustry, RowRef::Org(o)) => {
            o.industry.clone().unwrap_or_default()
        }
        (ColumnType::OrganizationsForecastArr, RowRef::Org(o)) => o
            .account
            .renewal_summary
            .arr_forecast
            .map(|v| format!("${}", format_number(v)))
            .unwrap_or_default(),
        (ColumnType::OrganizationsRenewalDate, RowRef::Org(o)) => o
            .account
            .renewal_summary
            .next_renewal_date
            .map(|d| d.to_string())
            .unwrap_or_default(),
        (ColumnType::OrganizationsRenewalLikelihood, RowRef::Org(o)) => o
            .account
            .renewal_summary
            .renewal_likelihood
            .map(|l| l.label().to_string())
            .unwrap_or_default(),
        (ColumnType::OrganizationsOnboardingStatus, RowRef::Org(o)) => o
            .account
            .onboarding_status
            .map(|s| s.label().to_string())
            .unwrap_or_default(),
        (ColumnType::OrganizationsLastTouchpoint, RowRef::Org(o)) => o
            .last_touchpoint()
            .map(|e| format!("{} - {}", e.kind.label(), e.summary))
            .unwrap_or_default(),
        (ColumnType::OrganizationsLastTouchpointDate, RowRef::Org(o)) => o
            .last_touchpoint()
            .map(|e| e.at.date_naive().to_string())
            .unwrap_or_default(),
        (ColumnType::OrganizationsChurnDate, RowRef::Org(o)) => o
            .account
            .churned_at
            .map(|d| d.to_string())
            .unwrap_or_default(),
        (ColumnType::OrganizationsSocials, RowRef::Org(o)) => {
            o.linkedin().map(|s| s.url.clone()).unwrap_or_default()
        }
        (ColumnType::OrganizationsLinkedinFollowerCount, RowRef::Org(o)) => o
            .linkedin()
            .and_then(|s| s.followers_count)
            .map(|c| format_number(c as f64))
            .unwrap_or_default(),
        (ColumnType::OrganizationsLeadSource, RowRef::Org(o)) => {
            o.lead_source.clone().unwrap_or_default()
        }
        (ColumnType::OrganizationsLtv, RowRef::Org(o)) => o
            .account
            .ltv
            .map(|v| format!("${}", format_number(v)))
            .unwrap_or_default(),
        (ColumnType::OrganizationsCity, RowRef::Org(o)) => {
            o.country().unwrap_or_default().to_string()
        }
        (ColumnType::OrganizationsIsPublic, RowRef::Org(o)) => match o.is_public {
            Some(true) => "Public".to_string(),
            Some(false) => "Private".to_string(),
            None => String::new(),
        },
        (ColumnType::OrganizationsYearFounded, RowRef::Org(o)) => {
            o.year_founded.map(|y| y.to_string()).unwrap_or_default()
        }
        (ColumnType::OrganizationsTags, RowRef::Org(o)) => o.tags.join(", "),
        (ColumnType::ContactsAvatar, RowRef::Contact(c)) => initials(&c.name()),
        (ColumnType::ContactsName, RowRef::Contact(c)) => c.name(),
        (ColumnType::ContactsOrganization, RowRef::Contact(c)) => {
            c.organization_name.clone().unwrap_or_default()
        }
        (ColumnType::ContactsEmails, RowRef::Contact(c)) => c.emails.join("; "),
        (ColumnType::ContactsPhoneNumbers, RowRef::Contact(c)) => c.phone_numbers.join("; "),
        (ColumnType::ContactsCity, RowRef::Contact(c)) => c
            .locations
            .first()
            .and_then(|l| l.locality.clone())
            .unwrap_or_default(),
        (ColumnType::ContactsRegion, RowRef::Contact(c)) => c
            .locations
            .first()
            .and_then(|l| l.region.clone())
            .unwrap_or_default(),
        (ColumnType::ContactsLinkedin, RowRef::Contact(c)) => {
            c.linkedin().map(|s| s.url.clone()).unwrap_or_default()
        }
        (ColumnType::ContactsPersona, RowRef::Contact(c)) => c.tags.join(", "),
        (ColumnType::ContactsJobTitle, RowRef::Contact(c)) => {
            c.job_title().unwrap_or_default().to_string()
        }
        (ColumnType::ContactsLinkedinFollowerCount, RowRef::Contact(c)) => c
            .linkedin()
            .and_then(|s| s.followers_count)
            .map(|n| format_number(n as f64))
            .unwrap_or_default(),
        (ColumnType::ContactsConnections, RowRef::Contact(c)) => c.connected_users.join(", "),
        (ColumnType::RenewalsName, RowRef::Renewal(r)) => r.organization_name.clone(),
        (ColumnType::RenewalsForecastArr, RowRef::Renewal(r)) => r
            .arr_forecast
            .map(|v| format!("${}", format_number(v)))
            .unwrap_or_default(),
        (ColumnType::RenewalsRenewalDate, RowRef::Renewal(r)) => {
            r.renewal_date.map(|d| d.to_string()).unwrap_or_default()
        }
        (ColumnType::RenewalsRenewalLikelihood, RowRef::Renewal(r)) => {
            r.likelihood.map(|l| l.label().to_string()).unwrap_or_default()
        }
        (ColumnType::RenewalsLastTouchpoint, RowRef::Renewal(r)) => {
            match (r.last_touchpoint_kind, r.last_touchpoint_at) {
                (Some(kind), Some(at)) => {
                    format!("{} - {}", kind.label(), at.date_naive())
                }
                _ => String::new(),
            }
        }
        (ColumnType::RenewalsOwner, RowRef::Renewal(r)) => {
            r.owner.as_ref().map(|u| u.name.clone()).unwrap_or_default()
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{ComparisonOperator, FilterItem, FilterNode};

    fn column(id: u32, ct: ColumnType) -> ColumnView {
        ColumnView {
            column_id: id,
            column_type: ct,
            name: String::new(),
            visible: true,
            width: 0,
            filter: String::new(),
        }
    }

    fn org_view() -> TableViewDef {
        TableViewDef {
            id: "1".into(),
            name: "All orgs".into(),
            table_type: TableKind::Organizations,
            table_id: String::new(),
            columns: vec![
                column(1, ColumnType::OrganizationsAvatar),
                column(2, ColumnType::OrganizationsName),
                column(3, ColumnType::OrganizationsWebsite),
                column(4, ColumnType::OrganizationsStage),
                column(5, ColumnType::OrganizationsOwner),
            ],
            filters: String::new(),
            sorting: String::new(),
            is_preset: true,
            is_shared: false,
        }
    }

    fn stage_column(id: u32, marker: ColumnType, stage: &str) -> ColumnView {
        let group = FilterGroup {
            and: vec![FilterNode {
                filter: FilterItem {
                    property: marker,
                    operation: ComparisonOperator::Equals,
                    value: FilterValue::Str(stage.to_string()),
                    active: true,
                    include_empty: false,
                },
            }],
        };
        ColumnView {
            column_id: id,
            column_type: ColumnType::RenewalsName,
            name: format!("stage {id}"),
            visible: true,
            width: 0,
            filter: serde_json::to_string(&group).unwrap(),
        }
    }

    #[test]
    fn unknown_column_type_is_dropped_from_resolution() {
        let mut def = org_view();
        def.columns.push(ColumnView {
            column_id: 6,
            column_type: ColumnType::from("ORGANIZATIONS_FAX_NUMBER".to_string()),
            name: String::new(),
            visible: true,
            width: 0,
            filter: String::new(),
        });
        let resolved = resolve_columns(&def);
        assert_eq!(resolved.len(), 5);
    }

    #[test]
    fn unknown_identifier_keeps_its_raw_string() {
        assert_eq!(
            ColumnType::from("SOMETHING_ELSE".to_string()),
            ColumnType::Unknown("SOMETHING_ELSE".to_string())
        );
        assert_eq!(
            ColumnType::from("ORGANIZATIONS_NAME".to_string()),
            ColumnType::OrganizationsName
        );
    }

    #[test]
    fn unknown_column_survives_a_save_round_trip() {
        let raw = r#"{
            "columnId": 7,
            "columnType": "ORGANIZATIONS_FAX_NUMBER",
            "name": "",
            "visible": true,
            "width": 0,
            "filter": ""
        }"#;
        let column: ColumnView = serde_json::from_str(raw).unwrap();
        assert_eq!(
            column.column_type,
            ColumnType::Unknown("ORGANIZATIONS_FAX_NUMBER".to_string())
        );
        let saved = serde_json::to_value(&column).unwrap();
        assert_eq!(saved["columnType"], "ORGANIZATIONS_FAX_NUMBER");
    }

    #[test]
    fn move_item_is_idempotent_for_equal_indices() {
        let mut items = vec![1, 2, 3, 4];
        move_item(&mut items, 2, 2);
        assert_eq!(items, vec![1, 2, 3, 4]);
    }

    #[test]
    fn move_item_moves_forward_and_back() {
        let mut items = vec!["a", "b", "c", "d"];
        move_item(&mut items, 0, 2);
        assert_eq!(items, vec!["b", "c", "a", "d"]);
        move_item(&mut items, 2, 0);
        assert_eq!(items, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn pinned_columns_are_not_draggable() {
        let def = org_view();
        let draggable = def.draggable_ids();
        assert!(!draggable.contains(&1));
        assert!(!draggable.contains(&2));
        assert_eq!(draggable, vec![3, 4, 5]);
    }

    #[test]
    fn reorder_keeps_pinned_columns_in_place() {
        let mut def = org_view();
        def.reorder_column(3, 5);
        let order: Vec<ColumnType> = def.columns.iter().map(|c| c.column_type.clone()).collect();
        assert_eq!(order[0], ColumnType::OrganizationsAvatar);
        assert_eq!(order[1], ColumnType::OrganizationsName);
        assert_eq!(order[2], ColumnType::OrganizationsStage);
        assert_eq!(order[3], ColumnType::OrganizationsOwner);
        assert_eq!(order[4], ColumnType::OrganizationsWebsite);
        // id sequence of the draggable subset stays ascending
        let ids: Vec<u32> = def.columns.iter().map(|c| c.column_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn reorder_source_equals_destination_is_noop() {
        let mut def = org_view();
        let before: Vec<ColumnType> =
            def.columns.iter().map(|c| c.column_type.clone()).collect();
        def.reorder_column(4, 4);
        let after: Vec<ColumnType> =
            def.columns.iter().map(|c| c.column_type.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn reorder_rejects_pinned_source() {
        let mut def = org_view();
        let before: Vec<ColumnType> =
            def.columns.iter().map(|c| c.column_type.clone()).collect();
        def.reorder_column(2, 4);
        let after: Vec<ColumnType> =
            def.columns.iter().map(|c| c.column_type.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn opportunity_pinning_follows_stage_markers() {
        let def = TableViewDef {
            id: "9".into(),
            name: "Opportunities".into(),
            table_type: TableKind::Opportunities,
            table_id: String::new(),
            columns: vec![
                stage_column(1, ColumnType::ExternalStage, "STAGE1"),
                stage_column(2, ColumnType::ExternalStage, "STAGE2"),
                stage_column(3, ColumnType::InternalStage, "CLOSED_WON"),
                stage_column(4, ColumnType::InternalStage, "CLOSED_LOST"),
            ],
            filters: String::new(),
            sorting: String::new(),
            is_preset: true,
            is_shared: false,
        };
        assert_eq!(def.leading_pinned(), vec![1]);
        assert_eq!(def.trailing_pinned(), vec![3, 4]);
        assert_eq!(def.draggable_ids(), vec![2]);
    }

    #[test]
    fn toggle_visibility_flips_only_the_flag() {
        let mut def = org_view();
        let order_before: Vec<u32> = def.columns.iter().map(|c| c.column_id).collect();
        assert!(def.toggle_visibility(ColumnType::OrganizationsStage));
        assert!(!def.columns[3].visible);
        let order_after: Vec<u32> = def.columns.iter().map(|c| c.column_id).collect();
        assert_eq!(order_before, order_after);
        // pinned name column cannot be hidden
        assert!(!def.toggle_visibility(ColumnType::OrganizationsName));
    }

    #[test]
    fn order_by_visibility_moves_hidden_draggables_last() {
        let mut def = org_view();
        def.toggle_visibility(ColumnType::OrganizationsWebsite);
        def.order_columns_by_visibility();
        let order: Vec<ColumnType> = def.columns.iter().map(|c| c.column_type.clone()).collect();
        assert_eq!(
            order,
            vec![
                ColumnType::OrganizationsAvatar,
                ColumnType::OrganizationsName,
                ColumnType::OrganizationsStage,
                ColumnType::OrganizationsOwner,
                ColumnType::OrganizationsWebsite,
            ]
        );
    }

    #[test]
    fn width_is_clamped_to_registry_bounds() {
        let mut def = org_view();
        def.set_column_width(ColumnType::OrganizationsStage, 200);
        let column = def
            .columns
            .iter()
            .find(|c| c.column_type == ColumnType::OrganizationsStage)
            .unwrap();
        assert_eq!(column.width, 16);
    }

    #[test]
    fn format_number_groups_thousands() {
        assert_eq!(format_number(1234567.0), "1,234,567");
        assert_eq!(format_number(42.0), "42");
    }
}

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::columns::ColumnType;
use crate::records::{RecordCache, RowRef, TableKind, TouchpointKind};

/// Sentinel owner id meaning "records without an owner".
pub const EMPTY_OWNER: &str = "__EMPTY__";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComparisonOperator {
    #[default]
    Equals,
    Contains,
    In,
    Lt,
    Gt,
    Between,
    After,
}

/// The polymorphic criterion value. Untagged, so variant order matters:
/// objects first, then numbers before number pairs, date pairs before
/// generic string lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Touchpoint {
        types: Vec<TouchpointKind>,
        after: NaiveDate,
    },
    Number(f64),
    NumberPair([f64; 2]),
    DatePair([Option<NaiveDate>; 2]),
    Str(String),
    List(Vec<String>),
}

impl Default for FilterValue {
    fn default() -> Self {
        FilterValue::Str(String::new())
    }
}

impl FilterValue {
    fn as_str(&self) -> Option<&str> {
        match self {
            FilterValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_list(&self) -> Vec<String> {
        match self {
            FilterValue::List(items) => items.clone(),
            FilterValue::Str(s) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            FilterValue::Number(n) => Some(*n),
            FilterValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn as_number_pair(&self) -> Option<[f64; 2]> {
        match self {
            FilterValue::NumberPair(p) => Some(*p),
            _ => None,
        }
    }

    fn as_date_pair(&self) -> Option<[Option<NaiveDate>; 2]> {
        match self {
            FilterValue::DatePair(p) => Some(*p),
            FilterValue::Str(s) => s.parse().ok().map(|d| [Some(d), None]),
            _ => None,
        }
    }
}

fn default_active() -> bool {
    true
}

/// One persisted criterion, as stored in view and column filter strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterItem {
    pub property: ColumnType,
    #[serde(default)]
    pub operation: ComparisonOperator,
    #[serde(default)]
    pub value: FilterValue,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub include_empty: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterNode {
    pub filter: FilterItem,
}

/// The only combinator the persisted shape uses: a flat AND over items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterGroup {
    #[serde(rename = "AND", default)]
    pub and: Vec<FilterNode>,
}

/// Parse a serialized filter group. Empty and malformed input both come
/// back as the empty group: a broken filter must never hide rows.
pub fn parse_group(raw: &str) -> FilterGroup {
    if raw.is_empty() {
        return FilterGroup::default();
    }
    match serde_json::from_str(raw) {
        Ok(group) => group,
        Err(e) => {
            warn!("Ignoring malformed filter group: {e}");
            FilterGroup::default()
        }
    }
}

pub type Predicate = Box<dyn Fn(RowRef<'_>) -> bool + Send + Sync>;

fn pass() -> Predicate {
    Box::new(|_| true)
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

/// Case-insensitive substring criterion over an optional text field.
fn text_predicate<F>(item: &FilterItem, get: F) -> Predicate
where
    F: Fn(RowRef<'_>) -> Option<String> + Send + Sync + 'static,
{
    let needle = item
        .value
        .as_str()
        .unwrap_or_default()
        .to_lowercase();
    let include_empty = item.include_empty;
    Box::new(move |row| match get(row) {
        Some(text) if !text.is_empty() => {
            include_empty && needle.is_empty() || contains_ci(&text, &needle)
        }
        _ => include_empty,
    })
}

/// Membership criterion: the row's key must appear in the selected list.
/// A missing key passes when `includeEmpty` is set or the list carries
/// the empty-owner sentinel.
fn list_predicate<F>(item: &FilterItem, get: F) -> Predicate
where
    F: Fn(RowRef<'_>) -> Option<String> + Send + Sync + 'static,
{
    let selected = item.value.as_list();
    let include_empty = item.include_empty || selected.iter().any(|s| s == EMPTY_OWNER);
    Box::new(move |row| match get(row) {
        Some(key) => selected.contains(&key),
        None => include_empty,
    })
}

/// Intersection criterion for multi-valued fields such as tags.
fn overlap_predicate<F>(item: &FilterItem, get: F) -> Predicate
where
    F: Fn(RowRef<'_>) -> Vec<String> + Send + Sync + 'static,
{
    let selected = item.value.as_list();
    let include_empty = item.include_empty;
    Box::new(move |row| {
        let values = get(row);
        if values.is_empty() {
            return include_empty;
        }
        values.iter().any(|v| selected.contains(v))
    })
}

/// Ordered comparison over an optional numeric field. `LT`/`GT` are
/// strict, only `BETWEEN` includes its bounds.
fn number_predicate<F>(item: &FilterItem, get: F) -> Predicate
where
    F: Fn(RowRef<'_>) -> Option<f64> + Send + Sync + 'static,
{
    let op = item.operation;
    let value = item.value.clone();
    let include_empty = item.include_empty;
    Box::new(move |row| {
        let Some(n) = get(row) else {
            return include_empty;
        };
        match op {
            ComparisonOperator::Lt => value.as_number().is_some_and(|v| n < v),
            ComparisonOperator::Gt => value.as_number().is_some_and(|v| n > v),
            ComparisonOperator::Between => value
                .as_number_pair()
                .is_some_and(|[lo, hi]| lo <= n && n <= hi),
            ComparisonOperator::Equals => value.as_number().is_some_and(|v| n == v),
            _ => true,
        }
    })
}

/// Inclusive range over an optional amount, as used for ARR forecast and
/// LTV sliders. Rows without an amount never match.
fn range_predicate<F>(item: &FilterItem, get: F) -> Predicate
where
    F: Fn(RowRef<'_>) -> Option<f64> + Send + Sync + 'static,
{
    let pair = item.value.as_number_pair();
    Box::new(move |row| match (get(row), pair) {
        (Some(n), Some([lo, hi])) => lo <= n && n <= hi,
        _ => false,
    })
}

/// Open-ended date window. `[Some(a), None]` means on-or-after `a`,
/// `[None, Some(b)]` on-or-before `b`.
fn date_window_predicate<F>(item: &FilterItem, get: F) -> Predicate
where
    F: Fn(RowRef<'_>) -> Option<NaiveDate> + Send + Sync + 'static,
{
    let pair = item.value.as_date_pair();
    Box::new(move |row| {
        let Some(d) = get(row) else {
            return false;
        };
        let Some([lo, hi]) = pair else {
            return true;
        };
        lo.is_none_or(|lo| lo <= d) && hi.is_none_or(|hi| d <= hi)
    })
}

/// Touchpoint criterion: the newest interaction must be one of the
/// selected kinds and not older than the cutoff. `strict` governs what an
/// empty kind selection means: no rows, or the date check alone.
fn touchpoint_predicate<F>(item: &FilterItem, strict: bool, get: F) -> Predicate
where
    F: Fn(RowRef<'_>) -> Option<(TouchpointKind, NaiveDate)> + Send + Sync + 'static,
{
    let (types, after) = match &item.value {
        FilterValue::Touchpoint { types, after } => (types.clone(), Some(*after)),
        _ => (Vec::new(), None),
    };
    Box::new(move |row| {
        let Some((kind, at)) = get(row) else {
            return false;
        };
        let recent = after.is_none_or(|cutoff| at >= cutoff);
        if types.is_empty() {
            return !strict && recent;
        }
        types.contains(&kind) && recent
    })
}

/// Compile one criterion into a boolean predicate over rows. Inactive
/// criteria and properties without a handler compile to pass-through:
/// filtering fails open, never by hiding data.
pub fn compile(item: Option<&FilterItem>) -> Predicate {
    let Some(item) = item else {
        return pass();
    };
    if !item.active {
        return pass();
    }

    match &item.property {
        ColumnType::OrganizationsName => text_predicate(item, |row| match row {
            RowRef::Org(o) => Some(o.name.clone()),
            _ => None,
        }),
        ColumnType::OrganizationsWebsite => text_predicate(item, |row| match row {
            RowRef::Org(o) => o.website.clone(),
            _ => None,
        }),
        ColumnType::OrganizationsRelationship => list_predicate(item, |row| match row {
            RowRef::Org(o) => o
                .relationship
                .and_then(|r| serde_json::to_value(r).ok())
                .and_then(|v| v.as_str().map(str::to_string)),
            _ => None,
        }),
        ColumnType::OrganizationsStage => list_predicate(item, |row| match row {
            RowRef::Org(o) => o
                .stage
                .and_then(|s| serde_json::to_value(s).ok())
                .and_then(|v| v.as_str().map(str::to_string)),
            _ => None,
        }),
        ColumnType::OrganizationsIndustry => list_predicate(item, |row| match row {
            RowRef::Org(o) => o.industry.clone(),
            _ => None,
        }),
        ColumnType::OrganizationsLeadSource => list_predicate(item, |row| match row {
            RowRef::Org(o) => o.lead_source.clone(),
            _ => None,
        }),
        ColumnType::OrganizationsCreatedDate => date_window_predicate(item, |row| match row {
            RowRef::Org(o) => Some(o.created_at.date_naive()),
            _ => None,
        }),
        ColumnType::OrganizationsEmployeeCount => number_predicate(item, |row| match row {
            RowRef::Org(o) => o.employees.map(|e| e as f64),
            _ => None,
        }),
        ColumnType::OrganizationsLinkedinFollowerCount => {
            number_predicate(item, |row| match row {
                RowRef::Org(o) => o.linkedin().and_then(|s| s.followers_count).map(|c| c as f64),
                _ => None,
            })
        }
        ColumnType::OrganizationsYearFounded => number_predicate(item, |row| match row {
            RowRef::Org(o) => o.company_age().map(|a| a as f64),
            _ => None,
        }),
        ColumnType::OrganizationsOwner => list_predicate(item, |row| match row {
            RowRef::Org(o) => o.owner.as_ref().map(|u| u.id.clone()),
            _ => None,
        }),
        ColumnType::OrganizationsForecastArr => range_predicate(item, |row| match row {
            RowRef::Org(o) => o.account.renewal_summary.arr_forecast,
            _ => None,
        }),
        ColumnType::OrganizationsLtv => range_predicate(item, |row| match row {
            RowRef::Org(o) => o.account.ltv,
            _ => None,
        }),
        ColumnType::OrganizationsRenewalDate => date_window_predicate(item, |row| match row {
            RowRef::Org(o) => o.account.renewal_summary.next_renewal_date,
            _ => None,
        }),
        ColumnType::OrganizationsChurnDate => date_window_predicate(item, |row| match row {
            RowRef::Org(o) => o.account.churned_at,
            _ => None,
        }),
        ColumnType::OrganizationsOnboardingStatus => list_predicate(item, |row| match row {
            RowRef::Org(o) => o
                .account
                .onboarding_status
                .and_then(|s| serde_json::to_value(s).ok())
                .and_then(|v| v.as_str().map(str::to_string)),
            _ => None,
        }),
        ColumnType::OrganizationsRenewalLikelihood => list_predicate(item, |row| match row {
            RowRef::Org(o) => o
                .account
                .renewal_summary
                .renewal_likelihood
                .and_then(|l| serde_json::to_value(l).ok())
                .and_then(|v| v.as_str().map(str::to_string)),
            _ => None,
        }),
        ColumnType::OrganizationsCity => list_predicate(item, |row| match row {
            RowRef::Org(o) => o.country().map(str::to_string),
            _ => None,
        }),
        ColumnType::OrganizationsIsPublic => list_predicate(item, |row| match row {
            RowRef::Org(o) => o.is_public.map(|p| {
                if p {
                    "public".to_string()
                } else {
                    "private".to_string()
                }
            }),
            _ => None,
        }),
        ColumnType::OrganizationsSocials => text_predicate(item, |row| match row {
            RowRef::Org(o) => o.linkedin().map(|s| s.url.clone()),
            _ => None,
        }),
        ColumnType::OrganizationsTags => overlap_predicate(item, |row| match row {
            RowRef::Org(o) => o.tags.clone(),
            _ => Vec::new(),
        }),
        ColumnType::OrganizationsLastTouchpoint => {
            touchpoint_predicate(item, true, |row| match row {
                RowRef::Org(o) => o
                    .last_touchpoint()
                    .map(|e| (e.kind, e.at.date_naive())),
                _ => None,
            })
        }
        ColumnType::OrganizationsLastTouchpointDate => {
            date_window_predicate(item, |row| match row {
                RowRef::Org(o) => o.last_touchpoint().map(|e| e.at.date_naive()),
                _ => None,
            })
        }
        ColumnType::ContactsName => text_predicate(item, |row| match row {
            RowRef::Contact(c) => Some(c.name()),
            _ => None,
        }),
        ColumnType::ContactsOrganization => text_predicate(item, |row| match row {
            RowRef::Contact(c) => c.organization_name.clone(),
            _ => None,
        }),
        ColumnType::ContactsEmails => text_predicate(item, |row| match row {
            RowRef::Contact(c) => Some(c.emails.join("; ")).filter(|s| !s.is_empty()),
            _ => None,
        }),
        ColumnType::ContactsPhoneNumbers => text_predicate(item, |row| match row {
            RowRef::Contact(c) => {
                Some(c.phone_numbers.join("; ")).filter(|s| !s.is_empty())
            }
            _ => None,
        }),
        ColumnType::ContactsCity => list_predicate(item, |row| match row {
            RowRef::Contact(c) => c.locations.first().and_then(|l| l.locality.clone()),
            _ => None,
        }),
        ColumnType::ContactsRegion => list_predicate(item, |row| match row {
            RowRef::Contact(c) => c.locations.first().and_then(|l| l.region.clone()),
            _ => None,
        }),
        ColumnType::ContactsLinkedin => text_predicate(item, |row| match row {
            RowRef::Contact(c) => c.linkedin().map(|s| s.url.clone()),
            _ => None,
        }),
        ColumnType::ContactsPersona => overlap_predicate(item, |row| match row {
            RowRef::Contact(c) => c.tags.clone(),
            _ => Vec::new(),
        }),
        ColumnType::ContactsJobTitle => text_predicate(item, |row| match row {
            RowRef::Contact(c) => c.job_title().map(str::to_string),
            _ => None,
        }),
        ColumnType::ContactsLinkedinFollowerCount => number_predicate(item, |row| match row {
            RowRef::Contact(c) => {
                c.linkedin().and_then(|s| s.followers_count).map(|n| n as f64)
            }
            _ => None,
        }),
        ColumnType::ContactsConnections => overlap_predicate(item, |row| match row {
            RowRef::Contact(c) => c.connected_users.clone(),
            _ => Vec::new(),
        }),
        ColumnType::RenewalsName => text_predicate(item, |row| match row {
            RowRef::Renewal(r) => Some(r.organization_name.clone()),
            _ => None,
        }),
        ColumnType::RenewalsForecastArr => range_predicate(item, |row| match row {
            RowRef::Renewal(r) => r.arr_forecast,
            _ => None,
        }),
        ColumnType::RenewalsRenewalDate => date_window_predicate(item, |row| match row {
            RowRef::Renewal(r) => r.renewal_date,
            _ => None,
        }),
        ColumnType::RenewalsRenewalLikelihood => list_predicate(item, |row| match row {
            RowRef::Renewal(r) => r
                .likelihood
                .and_then(|l| serde_json::to_value(l).ok())
                .and_then(|v| v.as_str().map(str::to_string)),
            _ => None,
        }),
        ColumnType::RenewalsOwner => list_predicate(item, |row| match row {
            RowRef::Renewal(r) => r.owner.as_ref().map(|u| u.id.clone()),
            _ => None,
        }),
        ColumnType::RenewalsLastTouchpoint => {
            touchpoint_predicate(item, false, |row| match row {
                RowRef::Renewal(r) => match (r.last_touchpoint_kind, r.last_touchpoint_at) {
                    (Some(kind), Some(at)) => Some((kind, at.date_naive())),
                    _ => None,
                },
                _ => None,
            })
        }
        // Stage markers only classify columns, never rows.
        ColumnType::ExternalStage | ColumnType::InternalStage => pass(),
        ColumnType::Unknown(raw) => {
            warn!("No predicate for unknown filter property '{raw}', passing all rows");
            pass()
        }
        other => {
            trace!("Property {:?} has no predicate, passing all rows", other);
            pass()
        }
    }
}

/// Compile a whole group: the conjunction of its member predicates.
pub fn compile_group(group: &FilterGroup) -> Vec<Predicate> {
    group
        .and
        .iter()
        .map(|node| compile(Some(&node.filter)))
        .collect()
}

/// Apply compiled predicates over a record kind in parallel, yielding the
/// surviving cache indices in original order.
pub fn filter_rows(cache: &RecordCache, kind: TableKind, predicates: &[Predicate]) -> Vec<usize> {
    (0..cache.len(kind))
        .into_par_iter()
        .filter(|&idx| match cache.row(kind, idx) {
            Some(row) => predicates.iter().all(|p| p(row)),
            None => false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Organization, Owner, Renewal};

    fn org(json: serde_json::Value) -> Organization {
        serde_json::from_value(json).unwrap()
    }

    fn item(property: ColumnType, value: FilterValue) -> FilterItem {
        FilterItem {
            property,
            operation: ComparisonOperator::Equals,
            value,
            active: true,
            include_empty: false,
        }
    }

    #[test]
    fn inactive_criterion_passes_everything() {
        let mut criterion = item(
            ColumnType::OrganizationsName,
            FilterValue::Str("nothing-matches-this".into()),
        );
        criterion.active = false;
        let p = compile(Some(&criterion));
        let o = org(serde_json::json!({ "id": "1", "name": "Acme" }));
        assert!(p(RowRef::Org(&o)));
    }

    #[test]
    fn unknown_property_passes_everything() {
        let criterion = item(
            ColumnType::from("ORGANIZATIONS_FAX_NUMBER".to_string()),
            FilterValue::Str("x".into()),
        );
        let p = compile(Some(&criterion));
        let o = org(serde_json::json!({ "id": "1", "name": "Acme" }));
        assert!(p(RowRef::Org(&o)));
    }

    #[test]
    fn malformed_group_parses_as_empty() {
        let group = parse_group("{ this is not json ");
        assert!(group.and.is_empty());
        assert!(parse_group("").and.is_empty());
    }

    #[test]
    fn name_contains_is_case_insensitive() {
        let p = compile(Some(&item(
            ColumnType::OrganizationsName,
            FilterValue::Str("acme".into()),
        )));
        let hit = org(serde_json::json!({ "id": "1", "name": "Acme Corp" }));
        let miss = org(serde_json::json!({ "id": "2", "name": "Globex" }));
        assert!(p(RowRef::Org(&hit)));
        assert!(!p(RowRef::Org(&miss)));
    }

    #[test]
    fn include_empty_passes_missing_field() {
        let mut criterion = item(
            ColumnType::OrganizationsWebsite,
            FilterValue::Str("example.com".into()),
        );
        criterion.include_empty = true;
        let p = compile(Some(&criterion));
        let no_site = org(serde_json::json!({ "id": "1", "name": "Acme" }));
        assert!(p(RowRef::Org(&no_site)));

        criterion.include_empty = false;
        let p = compile(Some(&criterion));
        assert!(!p(RowRef::Org(&no_site)));
    }

    #[test]
    fn between_bounds_are_inclusive() {
        let mut criterion = item(
            ColumnType::OrganizationsEmployeeCount,
            FilterValue::NumberPair([10.0, 50.0]),
        );
        criterion.operation = ComparisonOperator::Between;
        let p = compile(Some(&criterion));
        for (employees, expected) in [(9, false), (10, true), (50, true), (51, false)] {
            let o = org(serde_json::json!({ "id": "1", "name": "A", "employees": employees }));
            assert_eq!(p(RowRef::Org(&o)), expected, "employees = {employees}");
        }
    }

    #[test]
    fn lt_and_gt_exclude_the_boundary() {
        let boundary = org(serde_json::json!({ "id": "1", "name": "A", "employees": 10 }));
        for (operation, value, expected) in [
            (ComparisonOperator::Lt, 10.0, false),
            (ComparisonOperator::Lt, 11.0, true),
            (ComparisonOperator::Gt, 10.0, false),
            (ComparisonOperator::Gt, 9.0, true),
        ] {
            let mut criterion = item(
                ColumnType::OrganizationsEmployeeCount,
                FilterValue::Number(value),
            );
            criterion.operation = operation;
            let p = compile(Some(&criterion));
            assert_eq!(
                p(RowRef::Org(&boundary)),
                expected,
                "{operation:?} {value}"
            );
        }
    }

    #[test]
    fn empty_owner_sentinel_matches_unowned() {
        let p = compile(Some(&item(
            ColumnType::OrganizationsOwner,
            FilterValue::List(vec![EMPTY_OWNER.to_string()]),
        )));
        let unowned = org(serde_json::json!({ "id": "1", "name": "A" }));
        let mut owned = unowned.clone();
        owned.owner = Some(Owner {
            id: "u1".into(),
            name: "Sam".into(),
        });
        assert!(p(RowRef::Org(&unowned)));
        assert!(!p(RowRef::Org(&owned)));
    }

    #[test]
    fn arr_range_rejects_missing_amounts() {
        let p = compile(Some(&item(
            ColumnType::OrganizationsForecastArr,
            FilterValue::NumberPair([0.0, 100_000.0]),
        )));
        let no_arr = org(serde_json::json!({ "id": "1", "name": "A" }));
        assert!(!p(RowRef::Org(&no_arr)));
        let with_arr = org(serde_json::json!({
            "id": "2", "name": "B",
            "account": { "renewalSummary": { "arrForecast": 5000.0 } }
        }));
        assert!(p(RowRef::Org(&with_arr)));
    }

    #[test]
    fn renewal_date_window_is_open_ended() {
        let p = compile(Some(&item(
            ColumnType::OrganizationsRenewalDate,
            FilterValue::DatePair([Some("2024-06-01".parse().unwrap()), None]),
        )));
        let before = org(serde_json::json!({
            "id": "1", "name": "A",
            "account": { "renewalSummary": { "nextRenewalDate": "2024-05-20" } }
        }));
        let after = org(serde_json::json!({
            "id": "2", "name": "B",
            "account": { "renewalSummary": { "nextRenewalDate": "2024-07-01" } }
        }));
        assert!(!p(RowRef::Org(&before)));
        assert!(p(RowRef::Org(&after)));
    }

    #[test]
    fn touchpoint_is_strict_for_organizations_lenient_for_renewals() {
        let empty_selection = FilterValue::Touchpoint {
            types: Vec::new(),
            after: "2024-01-01".parse().unwrap(),
        };
        let org_p = compile(Some(&item(
            ColumnType::OrganizationsLastTouchpoint,
            empty_selection.clone(),
        )));
        let o = org(serde_json::json!({
            "id": "1", "name": "A",
            "timeline": [{ "at": "2024-03-01T09:00:00Z", "kind": "MEETING", "summary": "" }]
        }));
        assert!(!org_p(RowRef::Org(&o)));

        // With no kinds selected the renewal arm still applies the cutoff:
        // recent touchpoints pass, stale ones and untouched records do not.
        let renewal_p = compile(Some(&item(
            ColumnType::RenewalsLastTouchpoint,
            empty_selection,
        )));
        let renewal = |json: serde_json::Value| -> Renewal {
            serde_json::from_value(json).unwrap()
        };
        let recent = renewal(serde_json::json!({
            "id": "r1", "organizationName": "A",
            "lastTouchpointAt": "2024-03-01T09:00:00Z",
            "lastTouchpointKind": "MEETING"
        }));
        let stale = renewal(serde_json::json!({
            "id": "r2", "organizationName": "B",
            "lastTouchpointAt": "2023-11-01T09:00:00Z",
            "lastTouchpointKind": "MEETING"
        }));
        let untouched = renewal(serde_json::json!({
            "id": "r3", "organizationName": "C"
        }));
        assert!(renewal_p(RowRef::Renewal(&recent)));
        assert!(!renewal_p(RowRef::Renewal(&stale)));
        assert!(!renewal_p(RowRef::Renewal(&untouched)));
    }

    #[test]
    fn touchpoint_matches_kind_and_cutoff() {
        let criterion = item(
            ColumnType::OrganizationsLastTouchpoint,
            FilterValue::Touchpoint {
                types: vec![TouchpointKind::Meeting],
                after: "2024-02-01".parse().unwrap(),
            },
        );
        let p = compile(Some(&criterion));
        let recent = org(serde_json::json!({
            "id": "1", "name": "A",
            "timeline": [{ "at": "2024-03-01T09:00:00Z", "kind": "MEETING", "summary": "" }]
        }));
        let stale = org(serde_json::json!({
            "id": "2", "name": "B",
            "timeline": [{ "at": "2024-01-10T09:00:00Z", "kind": "MEETING", "summary": "" }]
        }));
        let wrong_kind = org(serde_json::json!({
            "id": "3", "name": "C",
            "timeline": [{ "at": "2024-03-01T09:00:00Z", "kind": "LOG_ENTRY", "summary": "" }]
        }));
        assert!(p(RowRef::Org(&recent)));
        assert!(!p(RowRef::Org(&stale)));
        assert!(!p(RowRef::Org(&wrong_kind)));
    }

    #[test]
    fn group_is_a_conjunction() {
        let raw = serde_json::json!({
            "AND": [
                { "filter": { "property": "ORGANIZATIONS_NAME", "value": "acme" } },
                { "filter": {
                    "property": "ORGANIZATIONS_RELATIONSHIP",
                    "value": ["CUSTOMER"]
                } }
            ]
        })
        .to_string();
        let predicates = compile_group(&parse_group(&raw));
        let customer = org(serde_json::json!({
            "id": "1", "name": "Acme", "relationship": "CUSTOMER"
        }));
        let prospect = org(serde_json::json!({
            "id": "2", "name": "Acme Labs", "relationship": "PROSPECT"
        }));
        assert!(predicates.iter().all(|p| p(RowRef::Org(&customer))));
        assert!(!predicates.iter().all(|p| p(RowRef::Org(&prospect))));
    }

    #[test]
    fn filter_rows_keeps_original_order() {
        let orgs: Vec<Organization> = ["Acme", "Globex", "Acme West"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                org(serde_json::json!({ "id": i.to_string(), "name": name }))
            })
            .collect();
        let cache = RecordCache::new(orgs, Vec::new(), Vec::new());
        let predicates = vec![compile(Some(&item(
            ColumnType::OrganizationsName,
            FilterValue::Str("acme".into()),
        )))];
        let rows = filter_rows(&cache, TableKind::Organizations, &predicates);
        assert_eq!(rows, vec![0, 2]);
    }

    #[test]
    fn untagged_values_deserialize_by_shape() {
        let item: FilterItem = serde_json::from_value(serde_json::json!({
            "property": "ORGANIZATIONS_EMPLOYEE_COUNT",
            "operation": "BETWEEN",
            "value": [10, 50]
        }))
        .unwrap();
        assert_eq!(item.value, FilterValue::NumberPair([10.0, 50.0]));

        let item: FilterItem = serde_json::from_value(serde_json::json!({
            "property": "ORGANIZATIONS_RENEWAL_DATE",
            "value": [null, "2024-06-01"]
        }))
        .unwrap();
        assert!(matches!(item.value, FilterValue::DatePair([None, Some(_)])));

        let item: FilterItem = serde_json::from_value(serde_json::json!({
            "property": "ORGANIZATIONS_LAST_TOUCHPOINT",
            "value": { "types": ["MEETING"], "after": "2024-01-01" }
        }))
        .unwrap();
        assert!(matches!(item.value, FilterValue::Touchpoint { .. }));
    }
}

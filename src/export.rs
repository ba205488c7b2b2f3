use tracing::debug;

use crate::columns::{cell_text, ColumnType, TableViewDef};
use crate::records::RowRef;

/// How cell text is escaped on export.
///
/// `Legacy` reproduces the historical behavior of stripping commas out of
/// cell values before quoting, which is lossy. `Rfc4180` quotes instead
/// and is the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CsvQuoting {
    #[default]
    Rfc4180,
    Legacy,
}

/// An output column of the export. The contact name column splits into
/// first and last name; every other visible column maps one to one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportColumn {
    View(ColumnType),
    ContactsFirstName,
    ContactsLastName,
}

impl ExportColumn {
    pub fn header(&self) -> String {
        match self {
            ExportColumn::View(ct) => ct.humanize(),
            ExportColumn::ContactsFirstName => "CONTACTS FIRST NAME".to_string(),
            ExportColumn::ContactsLastName => "CONTACTS LAST NAME".to_string(),
        }
    }

    fn value(&self, row: RowRef<'_>) -> String {
        match (self, row) {
            (ExportColumn::View(ct), row) => cell_text(ct, row),
            (ExportColumn::ContactsFirstName, RowRef::Contact(c)) => c.first_name.clone(),
            (ExportColumn::ContactsLastName, RowRef::Contact(c)) => c.last_name.clone(),
            _ => String::new(),
        }
    }
}

/// The visible columns of a view in order, minus avatars, with the
/// contact name split applied.
pub fn export_columns(def: &TableViewDef) -> Vec<ExportColumn> {
    let mut out = Vec::new();
    for column in &def.columns {
        if !column.visible || column.column_type.is_avatar() {
            continue;
        }
        match &column.column_type {
            ColumnType::ContactsName => {
                out.push(ExportColumn::ContactsFirstName);
                out.push(ExportColumn::ContactsLastName);
            }
            ct => out.push(ExportColumn::View(ct.clone())),
        }
    }
    out
}

/// Base file name for a view's export, matching the preset naming the
/// web client used.
pub fn table_file_name(view_name: &str) -> &'static str {
    match view_name {
        "Targets" => "targets",
        "Customers" => "customers",
        "Contacts" => "contacts",
        "Leads" => "leads",
        "Churn" => "churned",
        _ => "organizations",
    }
}

fn sanitize(value: &str, quoting: CsvQuoting) -> String {
    match quoting {
        CsvQuoting::Legacy => {
            let stripped = value.replace(',', "");
            if stripped.contains(['"', '\n', '\r']) {
                format!("\"{}\"", stripped.replace('"', "\"\""))
            } else {
                stripped
            }
        }
        CsvQuoting::Rfc4180 => {
            if value.contains([',', '"', '\n', '\r']) {
                format!("\"{}\"", value.replace('"', "\"\""))
            } else {
                value.to_string()
            }
        }
    }
}

/// Render the visible part of a view as CSV text: one header row of
/// humanized column identifiers, then one line per row, CRLF separated.
pub fn export_rows<'a, I>(def: &TableViewDef, rows: I, quoting: CsvQuoting) -> String
where
    I: IntoIterator<Item = RowRef<'a>>,
{
    let columns = export_columns(def);
    let mut lines = Vec::new();
    lines.push(
        columns
            .iter()
            .map(|c| sanitize(&c.header(), quoting))
            .collect::<Vec<_>>()
            .join(","),
    );
    let mut count = 0usize;
    for row in rows {
        lines.push(
            columns
                .iter()
                .map(|c| sanitize(&c.value(row), quoting))
                .collect::<Vec<_>>()
                .join(","),
        );
        count += 1;
    }
    debug!("Exported {count} rows over {} columns", columns.len());
    lines.join("\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::ColumnView;
    use crate::records::{Contact, Organization, TableKind};

    fn column(id: u32, ct: ColumnType, visible: bool) -> ColumnView {
        ColumnView {
            column_id: id,
            column_type: ct,
            name: String::new(),
            visible,
            width: 0,
            filter: String::new(),
        }
    }

    fn org_view() -> TableViewDef {
        TableViewDef {
            id: "1".into(),
            name: "Customers".into(),
            table_type: TableKind::Organizations,
            table_id: String::new(),
            columns: vec![
                column(1, ColumnType::OrganizationsAvatar, true),
                column(2, ColumnType::OrganizationsName, true),
                column(3, ColumnType::OrganizationsWebsite, false),
                column(4, ColumnType::OrganizationsEmployeeCount, true),
            ],
            filters: String::new(),
            sorting: String::new(),
            is_preset: true,
            is_shared: false,
        }
    }

    fn org(name: &str, employees: u64) -> Organization {
        serde_json::from_value(serde_json::json!({
            "id": "1", "name": name, "employees": employees
        }))
        .unwrap()
    }

    #[test]
    fn avatar_and_hidden_columns_are_excluded() {
        let columns = export_columns(&org_view());
        assert_eq!(
            columns,
            vec![
                ExportColumn::View(ColumnType::OrganizationsName),
                ExportColumn::View(ColumnType::OrganizationsEmployeeCount),
            ]
        );
    }

    #[test]
    fn headers_are_humanized_identifiers() {
        let def = org_view();
        let o = org("Acme", 12);
        let csv = export_rows(&def, [RowRef::Org(&o)], CsvQuoting::Rfc4180);
        let header = csv.lines().next().unwrap();
        assert_eq!(header, "ORGANIZATIONS NAME,ORGANIZATIONS EMPLOYEE COUNT");
    }

    #[test]
    fn contact_name_splits_into_first_and_last() {
        let def = TableViewDef {
            id: "2".into(),
            name: "Contacts".into(),
            table_type: TableKind::Contacts,
            table_id: String::new(),
            columns: vec![
                column(1, ColumnType::ContactsAvatar, true),
                column(2, ColumnType::ContactsName, true),
                column(3, ColumnType::ContactsEmails, true),
            ],
            filters: String::new(),
            sorting: String::new(),
            is_preset: true,
            is_shared: false,
        };
        let c = Contact {
            id: "c1".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            emails: vec!["ada@example.com".into()],
            ..Contact::default()
        };
        let csv = export_rows(&def, [RowRef::Contact(&c)], CsvQuoting::Rfc4180);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "CONTACTS FIRST NAME,CONTACTS LAST NAME,CONTACTS EMAILS"
        );
        assert_eq!(lines.next().unwrap(), "Ada,Lovelace,ada@example.com");
    }

    #[test]
    fn rfc4180_quotes_instead_of_mutating() {
        assert_eq!(sanitize("1,200", CsvQuoting::Rfc4180), "\"1,200\"");
        assert_eq!(
            sanitize("said \"hi\"", CsvQuoting::Rfc4180),
            "\"said \"\"hi\"\"\""
        );
        assert_eq!(sanitize("plain", CsvQuoting::Rfc4180), "plain");
    }

    #[test]
    fn legacy_mode_strips_commas() {
        // Lossy on purpose: the historical exporter removed commas from
        // cell values rather than quoting them.
        assert_eq!(sanitize("1,200", CsvQuoting::Legacy), "1200");
        assert_eq!(sanitize("Acme, Inc.", CsvQuoting::Legacy), "Acme Inc.");
        assert_eq!(
            sanitize("line\nbreak", CsvQuoting::Legacy),
            "\"line\nbreak\""
        );
    }

    #[test]
    fn rows_are_crlf_separated() {
        let def = org_view();
        let a = org("Acme", 10);
        let b = org("Globex", 20);
        let csv = export_rows(&def, [RowRef::Org(&a), RowRef::Org(&b)], CsvQuoting::Rfc4180);
        assert_eq!(csv.matches("\r\n").count(), 2);
        assert!(csv.ends_with("Globex,20"));
    }

    #[test]
    fn preset_names_map_to_file_names() {
        assert_eq!(table_file_name("Churn"), "churned");
        assert_eq!(table_file_name("Targets"), "targets");
        assert_eq!(table_file_name("All orgs"), "organizations");
    }
}

use std::path::PathBuf;

use derive_setters::Setters;
use ratatui::crossterm::event::KeyEvent;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed workspace data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("loading failed: {0}")]
    LoadingFailed(String),
    #[error("no table view definition named {0}")]
    UnknownPreset(String),
}

/// Runtime configuration, built with setters in main.
#[derive(Debug, Clone, Setters)]
pub struct CrmConfig {
    /// Poll timeout for terminal events, in milliseconds.
    pub event_poll_time: u64,
    /// Hard cap for rendered column width.
    pub max_column_width: usize,
    /// How long a transient status message stays relevant, in seconds.
    pub status_message_timeout: u64,
    /// Directory CSV exports are written to.
    pub export_dir: PathBuf,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            event_poll_time: 100,
            max_column_width: 42,
            status_message_timeout: 5,
            export_dir: PathBuf::from("."),
        }
    }
}

/// What the command line prompt is currently collecting input for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CMDMode {
    Raw,
    SearchTable,
    SearchInColumn,
    FilterByColumn,
    Palette,
}

impl CMDMode {
    pub fn prompt(&self) -> &'static str {
        match self {
            CMDMode::Raw => ":",
            CMDMode::SearchTable => "/",
            CMDMode::SearchInColumn => "c/",
            CMDMode::FilterByColumn => "f>",
            CMDMode::Palette => ">",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Message {
    Quit,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    MovePageUp,
    MovePageDown,
    MoveBeginning,
    MoveEnd,
    MoveToFirstColumn,
    MoveToLastColumn,
    Enter,
    Exit,
    Help,
    Resize(usize, usize),
    RawKey(KeyEvent),
    EnterCommand,
    Search,
    SearchInColumn,
    SearchNext,
    SearchPrev,
    Filter,
    ClearFilters,
    SortAscending,
    SortDescending,
    ToggleIndex,
    ToggleColumnVisible,
    MoveColumnLeft,
    MoveColumnRight,
    GrowColumn,
    ShrinkColumn,
    OrderColumnsByVisibility,
    NextPreset,
    PrevPreset,
    ExportCsv,
    CopyCell,
    CopyRow,
    Palette,
    ReloadWorkspace,
}

pub const HELP_TEXT: &str = "\
 crmv - CRM workspace viewer

 Movement     arrows/hjkl, PgUp/PgDn, g/G first/last row, 0/$ first/last column
 Enter        open record detail (timeline for organizations)
 Esc          leave detail / popup
 Tab / S-Tab  next / previous saved view
 /            search table          c    search in column
 n / N        next / previous match
 f            filter current column F clear filters
 s / S        sort ascending / descending
 v            hide/show column      < >  move column
 + -          resize column         i    toggle row index
 o            order columns by visibility
 e            export view as CSV    r    reload workspace
 y / Y        copy cell / row       Ctrl+K command palette
 ?            this help             q    quit
";

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use arboard::Clipboard;
use rayon::prelude::*;
use ratatui::crossterm::event::{KeyCode, KeyEvent};
use tracing::{debug, error, info, trace, warn};

use crate::columns::{
    cell_text, resolve_columns, ColumnType, ResolvedColumn, SortDirection, SortSpec, TableViewDef,
};
use crate::domain::{CMDMode, CrmConfig, CrmError, Message, HELP_TEXT};
use crate::export::{export_rows, table_file_name, CsvQuoting};
use crate::filters::{
    compile_group, filter_rows, ComparisonOperator, FilterItem, FilterValue,
};
use crate::inputter::{InputResult, Inputter};
use crate::palette::Palette;
use crate::records::{RecordCache, RowRef, Workspace};
use crate::ui::{CMDLINE_HEIGHT, COLUMN_SPACER, SCROLLBAR_WIDTH, TABLE_HEADER_HEIGHT};

#[derive(Debug, PartialEq)]
pub enum Status {
    EMPTY,
    READY,
    QUITTING,
}

#[derive(Debug, Clone, Copy)]
enum Modus {
    TABLE,
    RECORD,
    POPUP,
    CMDINPUT,
    PALETTE,
}

/// One rendered column strip: header, width and the windowed cell texts.
#[derive(Clone)]
pub struct UIColumn {
    pub name: String,
    pub width: usize,
    pub data: Vec<String>,
}

impl UIColumn {
    fn empty() -> Self {
        UIColumn {
            name: String::new(),
            width: 0,
            data: Vec::new(),
        }
    }
}

/// The grid over the active view: filtered row mapping, column window and
/// cursor state.
struct GridView {
    rows: Arc<Vec<usize>>, // Grid row position to cache index. Arc for parallel search.
    columns: Vec<ResolvedColumn>, // Resolved visible columns of the active view.
    visible_columns: Vec<usize>, // Indices into `columns` that fit the frame.
    visible_width: usize,
    cursor_row: usize,
    cursor_column: usize,
    offset_row: usize,
    offset_column: usize,
    data: Vec<UIColumn>,
    search_results: Vec<(usize, usize)>,
    search_idx: usize,
    show_index: bool,
    index: UIColumn,
    height: usize,
    width: usize,
}

impl GridView {
    fn empty() -> Self {
        GridView {
            rows: Arc::new(Vec::new()),
            columns: Vec::new(),
            visible_columns: Vec::new(),
            visible_width: 0,
            cursor_row: 0,
            cursor_column: 0,
            offset_row: 0,
            offset_column: 0,
            data: Vec::new(),
            search_results: Vec::new(),
            search_idx: 0,
            show_index: false,
            index: UIColumn::empty(),
            height: 0,
            width: 0,
        }
    }

    fn build_index(&mut self) {
        let rbegin = self.offset_row;
        let rend = std::cmp::min(rbegin + self.height, self.rows.len());
        let data = (rbegin..rend)
            .map(|pos| (pos + 1).to_string())
            .collect::<Vec<String>>();
        let width = data.last().map(|s| s.len()).unwrap_or(3);
        self.index = UIColumn {
            name: String::new(),
            width,
            data,
        }
    }

    fn cursor_pos(&self) -> usize {
        self.offset_row + self.cursor_row
    }
}

/// Record detail: field names next to values, with the timeline appended
/// for organizations.
struct RecordView {
    grid_pos: usize, // Position in GridView.rows
    header_data: Vec<String>,
    header_width: usize,
    header_view: UIColumn,
    value_data: Vec<String>,
    value_width: usize,
    value_view: UIColumn,
    cursor_row: usize,
    cursor_offset: usize,
    height: usize,
    width: usize,
}

impl RecordView {
    fn empty() -> Self {
        RecordView {
            grid_pos: 0,
            header_data: Vec::new(),
            header_width: 0,
            header_view: UIColumn::empty(),
            value_data: Vec::new(),
            value_width: 0,
            value_view: UIColumn::empty(),
            cursor_row: 0,
            cursor_offset: 0,
            height: 0,
            width: 0,
        }
    }
}

pub struct UIData {
    pub name: String,
    pub table: Vec<UIColumn>,
    pub index: UIColumn,
    pub nrows: usize,
    pub selected_row: usize,
    pub selected_column: usize,
    pub abs_selected_row: usize,
    pub show_popup: bool,
    pub popup_message: String,
    pub show_palette: bool,
    pub palette_items: Vec<&'static str>,
    pub palette_selected: usize,
    pub layout: UILayout,
    pub last_update: Instant,
    pub cmdinput: InputResult,
    pub cmd_mode: Option<CMDMode>,
    pub active_cmdinput: bool,
    pub status_message: String,
    pub last_status_message_update: Instant,
}

impl UIData {
    pub fn empty() -> Self {
        UIData {
            name: String::new(),
            table: Vec::new(),
            index: UIColumn::empty(),
            nrows: 0,
            selected_row: 0,
            selected_column: 0,
            abs_selected_row: 0,
            show_popup: false,
            popup_message: String::new(),
            show_palette: false,
            palette_items: Vec::new(),
            palette_selected: 0,
            layout: UILayout::default(),
            last_update: Instant::now(),
            cmdinput: InputResult::default(),
            cmd_mode: None,
            active_cmdinput: false,
            status_message: String::new(),
            last_status_message_update: Instant::now(),
        }
    }
}

#[derive(Default, Clone, Debug)]
pub struct UILayout {
    pub width: usize,
    pub height: usize,
    pub table_width: usize,
    pub table_height: usize,
    pub index_width: usize,
    pub index_height: usize,
    pub statusline_width: usize,
    pub statusline_height: usize,
}

impl UILayout {
    pub fn from_values(index_width: usize, ui_width: usize, ui_height: usize) -> Self {
        let table_width = ui_width.saturating_sub(SCROLLBAR_WIDTH + index_width);
        let table_height = ui_height.saturating_sub(CMDLINE_HEIGHT + TABLE_HEADER_HEIGHT);
        let layout = UILayout {
            width: ui_width,
            height: ui_height,
            table_width,
            table_height,
            index_width,
            index_height: table_height,
            statusline_width: ui_width,
            statusline_height: CMDLINE_HEIGHT,
        };
        trace!("Build UILayout: {:?}", layout);
        layout
    }
}

pub struct Model {
    config: CrmConfig,
    pub status: Status,
    modus: Modus,
    previous_modus: Modus,
    cache: RecordCache,
    view_defs: Vec<TableViewDef>,
    active_view: usize,
    seen_revision: u64,
    grid: GridView,
    record_view: RecordView,
    workspace_path: PathBuf,
    dirty: bool,
    last_update: Instant,
    uilayout: UILayout,
    uidata: UIData,
    clipboard: Option<Clipboard>,
    input: Inputter,
    cmd_mode: Option<CMDMode>,
    last_input: InputResult,
    active_cmdinput: bool,
    palette: Palette,
    status_message: String,
    last_status_message_update: Instant,
}

impl Model {
    pub fn load(
        config: &CrmConfig,
        path: PathBuf,
        preset: Option<&str>,
        ui_width: usize,
        ui_height: usize,
    ) -> Result<Self, CrmError> {
        let start_time = Instant::now();
        let workspace = Workspace::load(&path)?;
        if workspace.table_view_defs.is_empty() {
            return Err(CrmError::LoadingFailed(
                "workspace has no table view definitions".into(),
            ));
        }

        let active_view = match preset {
            Some(name) => workspace
                .table_view_defs
                .iter()
                .position(|d| d.name == name)
                .ok_or_else(|| CrmError::UnknownPreset(name.to_string()))?,
            None => 0,
        };

        let clipboard = match Clipboard::new() {
            Ok(c) => Some(c),
            Err(e) => {
                warn!("Clipboard unavailable: {e}");
                None
            }
        };

        let mut model = Self {
            config: config.clone(),
            status: Status::READY,
            modus: Modus::TABLE,
            previous_modus: Modus::TABLE,
            cache: RecordCache::new(
                workspace.organizations,
                workspace.contacts,
                workspace.renewals,
            ),
            view_defs: workspace.table_view_defs,
            active_view,
            seen_revision: 0,
            grid: GridView::empty(),
            record_view: RecordView::empty(),
            workspace_path: path,
            dirty: false,
            last_update: Instant::now(),
            uilayout: UILayout::from_values(0, ui_width, ui_height),
            uidata: UIData::empty(),
            clipboard,
            input: Inputter::default(),
            cmd_mode: None,
            last_input: InputResult::default(),
            active_cmdinput: false,
            palette: Palette::default(),
            status_message: "Started crmv!".to_string(),
            last_status_message_update: Instant::now(),
        };
        model.rebuild_rows();
        model.update_table_data();
        model.set_status_message(format!(
            "Loaded workspace in {}ms",
            start_time.elapsed().as_millis()
        ));
        Ok(model)
    }

    fn active_def(&self) -> &TableViewDef {
        &self.view_defs[self.active_view]
    }

    fn active_def_mut(&mut self) -> &mut TableViewDef {
        &mut self.view_defs[self.active_view]
    }

    /// Text of one grid cell, addressed by grid row position and index
    /// into the resolved visible columns.
    fn cell(&self, grid_pos: usize, column: usize) -> String {
        let kind = self.active_def().table_type;
        let Some(&cache_idx) = self.grid.rows.get(grid_pos) else {
            return String::new();
        };
        let Some(rc) = self.grid.columns.get(column) else {
            return String::new();
        };
        match self.cache.row(kind, cache_idx) {
            Some(row) => cell_text(&rc.view.column_type, row),
            None => String::new(),
        }
    }

    fn current_column_type(&self) -> Option<ColumnType> {
        self.grid
            .visible_columns
            .get(self.grid.cursor_column)
            .and_then(|&idx| self.grid.columns.get(idx))
            .map(|rc| rc.view.column_type.clone())
    }

    /// Recompute the filtered and sorted row mapping from the active view
    /// definition. Runs the compiled predicates in parallel.
    fn rebuild_rows(&mut self) {
        let start_time = Instant::now();
        let def = self.active_def().clone();
        let predicates = compile_group(&def.filter_group());
        let mut rows = filter_rows(&self.cache, def.table_type, &predicates);

        if let Some(sort) = def.sort_spec()
            && let Some(col) = resolve_columns(&def)
                .iter()
                .position(|rc| rc.view.column_type == sort.by)
        {
            let kind = def.table_type;
            let ct = sort.by.clone();
            let mut keyed: Vec<(String, usize)> = rows
                .into_iter()
                .map(|idx| {
                    let key = self
                        .cache
                        .row(kind, idx)
                        .map(|row| cell_text(&ct, row))
                        .unwrap_or_default();
                    (key, idx)
                })
                .collect();
            keyed.sort_by(|(a, _), (b, _)| {
                let ord = compare_cells(a, b);
                match sort.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
            rows = keyed.into_iter().map(|(_, idx)| idx).collect();
            trace!("Sorted by column {col} ({ct:?})");
        }

        self.grid.rows = Arc::new(rows);
        self.grid.columns = resolve_columns(&def)
            .into_iter()
            .filter(|rc| rc.view.visible)
            .collect();
        self.grid.search_results.clear();
        self.grid.search_idx = 0;
        self.grid.cursor_row = 0;
        self.grid.offset_row = 0;
        self.seen_revision = self.cache.revision();
        self.status = if self.grid.rows.is_empty() {
            Status::EMPTY
        } else {
            Status::READY
        };
        debug!(
            "Rebuilt view '{}': {} rows in {}ms",
            def.name,
            self.grid.rows.len(),
            start_time.elapsed().as_millis()
        );
    }

    /// Window the resolved columns into the frame and materialize cell
    /// text for the visible rows.
    fn update_table_data(&mut self) {
        self.grid.width = self.uilayout.table_width;
        self.grid.height = self.uilayout.table_height;

        let rbegin = self.grid.offset_row;
        let rend = std::cmp::min(rbegin + self.grid.height, self.grid.rows.len());

        self.grid.visible_columns = Vec::new();
        let mut visible_width = 0;
        let mut render_widths: Vec<usize> = self
            .grid
            .columns
            .iter()
            .map(|rc| {
                std::cmp::min(rc.render_width() as usize, self.config.max_column_width)
            })
            .collect();

        for cidx in self.grid.offset_column..self.grid.columns.len() {
            let width = render_widths[cidx];
            if visible_width + width + COLUMN_SPACER <= self.grid.width {
                self.grid.visible_columns.push(cidx);
                visible_width += width + COLUMN_SPACER;
            } else {
                // Last partially visible column
                if visible_width < self.grid.width {
                    render_widths[cidx] = self.grid.width - visible_width;
                    self.grid.visible_columns.push(cidx);
                    visible_width = self.grid.width;
                }
                break;
            }
        }
        self.grid.visible_width = visible_width;
        if !self.grid.visible_columns.is_empty() {
            self.grid.cursor_column = std::cmp::min(
                self.grid.cursor_column,
                self.grid.visible_columns.len() - 1,
            );
        }

        self.grid.data = Vec::with_capacity(self.grid.visible_columns.len());
        let kind = self.active_def().table_type;
        for &cidx in self.grid.visible_columns.iter() {
            let rc = &self.grid.columns[cidx];
            let width = render_widths[cidx];
            let data = self.grid.rows[rbegin..rend]
                .iter()
                .map(|&idx| match self.cache.row(kind, idx) {
                    Some(row) => cell_text(&rc.view.column_type, row),
                    None => {
                        error!("Row index {idx} is out of cache bounds");
                        String::new()
                    }
                })
                .collect();
            self.grid.data.push(UIColumn {
                name: shorten(rc.title(), width),
                width,
                data,
            });
        }

        self.grid.build_index();
        self.update_uidata_for_table();
    }

    fn update_uidata_for_table(&mut self) {
        let def = self.active_def();
        self.uidata = UIData {
            name: format!("{} [{}/{}]", def.name, self.active_view + 1, self.view_defs.len()),
            table: self.grid.data.clone(),
            index: if self.grid.show_index {
                self.grid.index.clone()
            } else {
                UIColumn::empty()
            },
            nrows: self.grid.rows.len(),
            selected_row: self.grid.cursor_row,
            selected_column: self.grid.cursor_column,
            abs_selected_row: self.grid.cursor_pos(),
            show_popup: false,
            popup_message: String::new(),
            show_palette: false,
            palette_items: Vec::new(),
            palette_selected: 0,
            layout: self.uilayout.clone(),
            last_update: Instant::now(),
            cmdinput: self.last_input.clone(),
            cmd_mode: self.cmd_mode,
            active_cmdinput: self.active_cmdinput,
            status_message: self.status_message.clone(),
            last_status_message_update: self.last_status_message_update,
        }
    }

    fn update_uidata_for_record(&mut self) {
        let record = &self.record_view;
        self.uidata = UIData {
            name: format!("R[{}]", self.active_def().name),
            table: vec![record.header_view.clone(), record.value_view.clone()],
            index: UIColumn::empty(),
            nrows: self.grid.rows.len(),
            selected_row: record.cursor_row,
            selected_column: 1,
            abs_selected_row: record.grid_pos,
            show_popup: false,
            popup_message: String::new(),
            show_palette: false,
            palette_items: Vec::new(),
            palette_selected: 0,
            layout: self.uilayout.clone(),
            last_update: Instant::now(),
            cmdinput: self.last_input.clone(),
            cmd_mode: self.cmd_mode,
            active_cmdinput: self.active_cmdinput,
            status_message: self.status_message.clone(),
            last_status_message_update: self.last_status_message_update,
        }
    }

    fn update_uidata_for_palette(&mut self) {
        let (items, selected) = self.palette.visible();
        self.uidata.show_palette = true;
        self.uidata.palette_items = items;
        self.uidata.palette_selected = selected;
        self.uidata.cmdinput = self.last_input.clone();
        self.uidata.cmd_mode = Some(CMDMode::Palette);
        self.uidata.last_update = Instant::now();
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        self.last_status_message_update = Instant::now();
        self.uidata.status_message = self.status_message.clone();
        self.uidata.last_status_message_update = self.last_status_message_update;
        self.uidata.last_update = Instant::now();
    }

    pub fn get_uidata(&self) -> &UIData {
        &self.uidata
    }

    pub fn raw_keyevents(&self) -> bool {
        self.active_cmdinput || matches!(self.modus, Modus::PALETTE)
    }

    pub fn quit(&mut self) {
        self.status = Status::QUITTING;
    }

    /// Persist local edits (column layout, filters, sorting) back into the
    /// workspace file. Called once on shutdown.
    pub fn persist(&self) -> Result<(), CrmError> {
        if !self.dirty {
            return Ok(());
        }
        let workspace = Workspace {
            organizations: self.cache.organizations().to_vec(),
            contacts: self.cache.contacts().to_vec(),
            renewals: self.cache.renewals().to_vec(),
            table_view_defs: self.view_defs.clone(),
        };
        workspace.save(&self.workspace_path)?;
        info!("Persisted view definitions to {}", self.workspace_path.display());
        Ok(())
    }

    fn ui_resize(&mut self, width: usize, height: usize) {
        trace!(
            "UI was resized! w:{}->{}, h:{}->{}",
            self.uilayout.width, width, self.uilayout.height, height
        );
        let index_width = if self.grid.show_index {
            self.grid.index.width
        } else {
            0
        };
        self.uilayout = UILayout::from_values(index_width, width, height);
        match self.modus {
            Modus::TABLE => self.update_table_data(),
            Modus::RECORD => self.update_record_data(),
            Modus::POPUP | Modus::CMDINPUT | Modus::PALETTE => {}
        }
    }

    pub fn update(&mut self, message: Option<Message>) -> Result<(), CrmError> {
        // A replaced record cache invalidates the row mapping.
        if self.seen_revision != self.cache.revision() {
            self.rebuild_rows();
            self.update_table_data();
        }

        if let Some(msg) = message {
            match self.modus {
                Modus::TABLE => match msg {
                    Message::Quit => self.quit(),
                    Message::MoveDown => self.move_table_selection_down(1),
                    Message::MoveUp => self.move_table_selection_up(1),
                    Message::MoveLeft => self.move_table_selection_left(),
                    Message::MoveRight => self.move_table_selection_right(),
                    Message::MovePageUp => {
                        self.move_table_selection_up(self.uilayout.table_height + 1)
                    }
                    Message::MovePageDown => {
                        self.move_table_selection_down(self.uilayout.table_height + 1)
                    }
                    Message::MoveBeginning => self.move_table_selection_beginning(),
                    Message::MoveEnd => self.move_table_selection_end(),
                    Message::MoveToFirstColumn => {
                        self.select_cell(self.grid.cursor_pos(), 0);
                    }
                    Message::MoveToLastColumn => {
                        let last = self.grid.columns.len().saturating_sub(1);
                        self.select_cell(self.grid.cursor_pos(), last);
                    }
                    Message::ToggleIndex => self.toggle_table_index(),
                    Message::Resize(width, height) => self.ui_resize(width, height),
                    Message::CopyCell => self.copy_table_cell(),
                    Message::CopyRow => self.copy_table_row(),
                    Message::Help => self.show_help(),
                    Message::EnterCommand => self.enter_cmd_mode(CMDMode::Raw),
                    Message::Search => self.enter_cmd_mode(CMDMode::SearchTable),
                    Message::SearchInColumn => self.enter_cmd_mode(CMDMode::SearchInColumn),
                    Message::Filter => self.enter_cmd_mode(CMDMode::FilterByColumn),
                    Message::ClearFilters => self.clear_filters(),
                    Message::SearchNext => self.search_next(1),
                    Message::SearchPrev => self.search_next(-1),
                    Message::SortAscending => self.sort_current_column(SortDirection::Asc),
                    Message::SortDescending => self.sort_current_column(SortDirection::Desc),
                    Message::ToggleColumnVisible => self.toggle_column_visible(),
                    Message::MoveColumnLeft => self.move_column(-1),
                    Message::MoveColumnRight => self.move_column(1),
                    Message::GrowColumn => self.resize_column(2),
                    Message::ShrinkColumn => self.resize_column(-2),
                    Message::OrderColumnsByVisibility => self.order_columns_by_visibility(),
                    Message::NextPreset => self.switch_preset(1),
                    Message::PrevPreset => self.switch_preset(-1),
                    Message::ExportCsv => self.export_csv(CsvQuoting::default()),
                    Message::Palette => self.enter_palette(),
                    Message::ReloadWorkspace => self.reload_workspace(),
                    Message::Enter => self.enter(),
                    Message::Exit => self.exit(),
                    _ => (),
                },
                Modus::RECORD => match msg {
                    Message::Quit => self.quit(),
                    Message::MoveDown => self.move_record_selection_down(1),
                    Message::MoveUp => self.move_record_selection_up(1),
                    Message::MovePageUp => self.move_record_selection_up(10),
                    Message::MovePageDown => self.move_record_selection_down(10),
                    Message::MoveLeft => self.previous_record(),
                    Message::MoveRight => self.next_record(),
                    Message::Resize(width, height) => self.ui_resize(width, height),
                    Message::CopyCell => self.copy_record_cell(),
                    Message::Help => self.show_help(),
                    Message::Exit => self.exit(),
                    _ => (),
                },
                Modus::POPUP => match msg {
                    Message::Quit => self.quit(),
                    Message::Resize(width, height) => self.ui_resize(width, height),
                    Message::Exit | Message::Enter | Message::Help => self.exit(),
                    _ => (),
                },
                Modus::CMDINPUT => {
                    if let Message::RawKey(key) = msg {
                        self.raw_input(key);
                    }
                }
                Modus::PALETTE => {
                    if let Message::RawKey(key) = msg
                        && let Some(next) = self.palette_input(key)
                    {
                        return self.update(Some(next));
                    }
                }
            }
        }

        self.last_update = Instant::now();
        Ok(())
    }

    // -------------------- Control handling functions ---------------------- //

    fn enter(&mut self) {
        if self.grid.rows.is_empty() {
            return;
        }
        let grid_pos = self.grid.cursor_pos();
        self.build_record_view(grid_pos);
        self.previous_modus = self.modus;
        self.modus = Modus::RECORD;
    }

    fn exit(&mut self) {
        match self.modus {
            Modus::TABLE => {}
            Modus::RECORD => {
                self.previous_modus = Modus::RECORD;
                self.modus = Modus::TABLE;
                self.update_table_data();
            }
            Modus::POPUP => {
                trace!("Close popup ...");
                self.modus = self.previous_modus;
                self.previous_modus = Modus::POPUP;
                self.uidata.show_popup = false;
                self.uidata.last_update = Instant::now();
            }
            Modus::CMDINPUT | Modus::PALETTE => {}
        }
    }

    fn show_help(&mut self) {
        self.previous_modus = self.modus;
        self.modus = Modus::POPUP;
        self.uidata.popup_message = HELP_TEXT.to_string();
        self.uidata.show_popup = true;
        self.uidata.last_update = Instant::now();
    }

    fn enter_cmd_mode(&mut self, mode: CMDMode) {
        trace!("Entering command mode {:?}", mode);
        self.previous_modus = self.modus;
        self.modus = Modus::CMDINPUT;
        self.cmd_mode = Some(mode);
        self.active_cmdinput = true;
        self.input.clear();
        self.last_input = self.input.get();
        self.uidata.cmdinput = self.last_input.clone();
        self.uidata.active_cmdinput = self.active_cmdinput;
        self.uidata.cmd_mode = self.cmd_mode;
        self.uidata.last_update = Instant::now();
    }

    fn raw_input(&mut self, key: KeyEvent) {
        if self.active_cmdinput {
            self.last_input = self.input.read(key);
            if self.last_input.finished {
                self.handle_cmd_input();
            }
            self.uidata.cmdinput = self.last_input.clone();
            self.uidata.cmd_mode = self.cmd_mode;
            self.uidata.last_update = Instant::now();
        }
    }

    fn handle_cmd_input(&mut self) {
        self.active_cmdinput = false;
        self.modus = self.previous_modus;
        self.previous_modus = Modus::CMDINPUT;
        self.uidata.active_cmdinput = self.active_cmdinput;

        let cmd_input = self.last_input.input.clone();
        let canceled = self.last_input.canceled;
        let mode = self.cmd_mode.take();
        if canceled {
            return;
        }
        match mode {
            Some(CMDMode::SearchTable) => self.search(&cmd_input, false),
            Some(CMDMode::SearchInColumn) => self.search(&cmd_input, true),
            Some(CMDMode::FilterByColumn) => self.quick_filter(&cmd_input),
            Some(CMDMode::Raw) => self.raw_command(&cmd_input),
            Some(CMDMode::Palette) | None => {}
        }
    }

    /// The `:` commands that have no key binding.
    fn raw_command(&mut self, input: &str) {
        match input.trim() {
            "q" | "quit" => self.quit(),
            "w" | "write" => match self.persist() {
                Ok(_) => self.set_status_message("Saved workspace"),
                Err(e) => {
                    error!("Saving workspace failed: {e}");
                    self.set_status_message(format!("Save failed: {e}"));
                }
            },
            "export legacy" => self.export_csv(CsvQuoting::Legacy),
            "export" => self.export_csv(CsvQuoting::Rfc4180),
            other => {
                info!("Unknown command: {other}");
                self.set_status_message(format!("Unknown command: {other}"));
            }
        }
    }

    fn enter_palette(&mut self) {
        self.previous_modus = self.modus;
        self.modus = Modus::PALETTE;
        self.input.clear();
        self.last_input = self.input.get();
        self.palette.set_query("");
        self.update_uidata_for_palette();
    }

    fn palette_input(&mut self, key: KeyEvent) -> Option<Message> {
        match key.code {
            KeyCode::Esc => {
                self.modus = self.previous_modus;
                self.previous_modus = Modus::PALETTE;
                self.update_table_data();
                None
            }
            KeyCode::Up => {
                self.palette.move_up();
                self.update_uidata_for_palette();
                None
            }
            KeyCode::Down => {
                self.palette.move_down();
                self.update_uidata_for_palette();
                None
            }
            KeyCode::Enter => {
                let message = self.palette.selected_message();
                self.modus = self.previous_modus;
                self.previous_modus = Modus::PALETTE;
                self.update_table_data();
                message
            }
            _ => {
                self.last_input = self.input.read(key);
                self.palette.set_query(&self.last_input.input);
                self.update_uidata_for_palette();
                None
            }
        }
    }

    // -------------------- Search and filtering ---------------------- //

    fn search(&mut self, term: &str, current_column_only: bool) {
        trace!("Starting search for {} ...", term);
        if term.is_empty() {
            return;
        }
        let start_time = Instant::now();
        let needle = term.to_lowercase();
        let kind = self.active_def().table_type;
        let rows = Arc::clone(&self.grid.rows);

        let column_range: Vec<usize> = if current_column_only {
            self.grid
                .visible_columns
                .get(self.grid.cursor_column)
                .map(|&c| vec![c])
                .unwrap_or_default()
        } else {
            (0..self.grid.columns.len()).collect()
        };

        let columns = &self.grid.columns;
        let cache = &self.cache;
        let mut matches: Vec<(usize, usize)> = rows
            .par_iter()
            .enumerate()
            .flat_map(|(pos, &idx)| {
                let mut hits = Vec::new();
                if let Some(row) = cache.row(kind, idx) {
                    for &cidx in column_range.iter() {
                        let text = cell_text(&columns[cidx].view.column_type, row);
                        if text.to_lowercase().contains(&needle) {
                            hits.push((pos, cidx));
                        }
                    }
                }
                hits
            })
            .collect();
        matches.sort_unstable();

        let search_duration = start_time.elapsed().as_millis();
        if matches.is_empty() {
            self.grid.search_results.clear();
            self.set_status_message("Found no matches!");
        } else {
            trace!(
                "Search found {} matches in {}ms",
                matches.len(),
                search_duration
            );
            let cursor_pos = self.grid.cursor_pos();
            self.grid.search_results = matches;
            self.grid.search_idx = self
                .grid
                .search_results
                .iter()
                .position(|&(row, _col)| row >= cursor_pos)
                .unwrap_or(0);
            self.search_next(0);
            self.set_status_message(format!(
                "Found {} results",
                self.grid.search_results.len()
            ));
        }
    }

    // Moves the cursor to the next search result. Step must be -1, 0 or 1.
    fn search_next(&mut self, step: i32) {
        let total = self.grid.search_results.len();
        if total == 0 {
            return;
        }
        let idx = self.grid.search_idx as i32 + step;
        self.grid.search_idx = if idx < 0 {
            total - 1
        } else {
            idx as usize % total
        };
        let (row, column) = self.grid.search_results[self.grid.search_idx];
        self.select_cell(row, column);
        self.set_status_message(format!(
            "Search result {}/{}",
            self.grid.search_idx + 1,
            total
        ));
    }

    fn select_cell(&mut self, row: usize, column: usize) {
        trace!("Select cell {}:{}", row, column);
        if self.grid.visible_columns.contains(&column) {
            self.grid.cursor_column = self
                .grid
                .visible_columns
                .iter()
                .position(|&c| c == column)
                .unwrap_or(0);
        } else {
            self.grid.offset_column = column;
            self.grid.cursor_column = 0;
        }

        if row >= self.grid.offset_row && row < self.grid.offset_row + self.grid.height {
            self.grid.cursor_row = row - self.grid.offset_row;
        } else {
            self.grid.cursor_row = 0;
            self.grid.offset_row = row;
        }
        self.update_table_data();
    }

    /// Turn a prompt entry into a persisted criterion on the current
    /// column. `>n`, `<n` and `a..b` become ordered comparisons, anything
    /// else a contains match.
    fn quick_filter(&mut self, term: &str) {
        let Some(property) = self.current_column_type() else {
            return;
        };
        let term = term.trim();
        if term.is_empty() {
            return;
        }

        let (operation, value) = if let Some(rest) = term.strip_prefix('>') {
            match rest.trim().parse::<f64>() {
                Ok(n) => (ComparisonOperator::Gt, FilterValue::Number(n)),
                Err(_) => (ComparisonOperator::Contains, FilterValue::Str(term.into())),
            }
        } else if let Some(rest) = term.strip_prefix('<') {
            match rest.trim().parse::<f64>() {
                Ok(n) => (ComparisonOperator::Lt, FilterValue::Number(n)),
                Err(_) => (ComparisonOperator::Contains, FilterValue::Str(term.into())),
            }
        } else if let Some((lo, hi)) = term.split_once("..") {
            match (lo.trim().parse::<f64>(), hi.trim().parse::<f64>()) {
                (Ok(lo), Ok(hi)) => (
                    ComparisonOperator::Between,
                    FilterValue::NumberPair([lo, hi]),
                ),
                _ => (ComparisonOperator::Contains, FilterValue::Str(term.into())),
            }
        } else {
            (ComparisonOperator::Contains, FilterValue::Str(term.into()))
        };

        self.active_def_mut().upsert_filter(FilterItem {
            property,
            operation,
            value,
            active: true,
            include_empty: false,
        });
        self.dirty = true;
        self.rebuild_rows();
        self.update_table_data();
        self.set_status_message(format!("Filtered: {} rows", self.grid.rows.len()));
    }

    fn clear_filters(&mut self) {
        self.active_def_mut().clear_filters();
        self.dirty = true;
        self.rebuild_rows();
        self.update_table_data();
        self.set_status_message("Cleared filters");
    }

    fn sort_current_column(&mut self, direction: SortDirection) {
        let Some(by) = self.current_column_type() else {
            return;
        };
        self.active_def_mut()
            .set_sort_spec(Some(SortSpec { by, direction }));
        self.dirty = true;
        self.rebuild_rows();
        self.update_table_data();
    }

    // -------------------- Column layout ---------------------- //

    fn toggle_column_visible(&mut self) {
        let Some(ct) = self.current_column_type() else {
            return;
        };
        if self.active_def_mut().toggle_visibility(ct) {
            self.dirty = true;
            self.rebuild_rows();
            self.update_table_data();
        } else {
            self.set_status_message("Column cannot be hidden");
        }
    }

    /// Swap the current column with its neighbor, within the reorderable
    /// subset of the view.
    fn move_column(&mut self, direction: i32) {
        let Some(&current) = self.grid.visible_columns.get(self.grid.cursor_column) else {
            return;
        };
        let neighbor = current as i32 + direction;
        if neighbor < 0 || neighbor as usize >= self.grid.columns.len() {
            return;
        }
        let source_id = self.grid.columns[current].view.column_id;
        let dest_id = self.grid.columns[neighbor as usize].view.column_id;
        self.active_def_mut().reorder_column(source_id, dest_id);
        self.dirty = true;
        self.rebuild_rows();
        self.update_table_data();
    }

    fn resize_column(&mut self, delta: i32) {
        let Some(&current) = self.grid.visible_columns.get(self.grid.cursor_column) else {
            return;
        };
        let rc = &self.grid.columns[current];
        let ct = rc.view.column_type.clone();
        let width = (rc.render_width() as i32 + delta).max(1) as u16;
        self.active_def_mut().set_column_width(ct, width);
        self.dirty = true;
        self.rebuild_rows();
        self.update_table_data();
    }

    fn order_columns_by_visibility(&mut self) {
        self.active_def_mut().order_columns_by_visibility();
        self.dirty = true;
        self.rebuild_rows();
        self.update_table_data();
    }

    fn switch_preset(&mut self, direction: i32) {
        let total = self.view_defs.len() as i32;
        self.active_view = ((self.active_view as i32 + direction + total) % total) as usize;
        self.grid = GridView::empty();
        self.rebuild_rows();
        self.update_table_data();
        let def = self.active_def();
        debug!("Switched to view '{}' ({:?})", def.name, def.table_type);
    }

    fn toggle_table_index(&mut self) {
        self.grid.show_index = !self.grid.show_index;
        let index_width = if self.grid.show_index {
            self.grid.index.width
        } else {
            0
        };
        self.uilayout =
            UILayout::from_values(index_width, self.uilayout.width, self.uilayout.height);
        self.update_table_data();
    }

    // -------------------- Export and clipboard ---------------------- //

    fn export_csv(&mut self, quoting: CsvQuoting) {
        let def = self.active_def();
        let kind = def.table_type;
        let rows = self
            .grid
            .rows
            .iter()
            .filter_map(|&idx| self.cache.row(kind, idx));
        let csv = export_rows(def, rows, quoting);

        let path = self
            .config
            .export_dir
            .join(format!("{}.csv", table_file_name(&def.name)));
        match fs::write(&path, csv) {
            Ok(_) => {
                info!("Exported {} rows to {}", self.grid.rows.len(), path.display());
                self.set_status_message(format!("Exported to {}", path.display()));
            }
            Err(e) => {
                error!("CSV export to {} failed: {e}", path.display());
                self.set_status_message(format!("Export failed: {e}"));
            }
        }
    }

    fn copy_to_clipboard(&mut self, content: String) {
        match self.clipboard.as_mut() {
            Some(clipboard) => match clipboard.set_text(content) {
                Ok(_) => trace!("Copied content to clipboard."),
                Err(e) => trace!("Error copying to clipboard: {:?}", e),
            },
            None => self.set_status_message("Clipboard unavailable"),
        }
    }

    fn copy_table_cell(&mut self) {
        let Some(&column) = self.grid.visible_columns.get(self.grid.cursor_column) else {
            return;
        };
        let cell = self.cell(self.grid.cursor_pos(), column);
        trace!("Cell content: {}", cell);
        self.copy_to_clipboard(cell);
    }

    fn copy_table_row(&mut self) {
        let grid_pos = self.grid.cursor_pos();
        let content = (0..self.grid.columns.len())
            .map(|c| wrap_cell_content(&self.cell(grid_pos, c)))
            .collect::<Vec<String>>()
            .join(",");
        self.copy_to_clipboard(content);
    }

    fn copy_record_cell(&mut self) {
        let record = &self.record_view;
        let cell = record
            .value_data
            .get(record.cursor_offset + record.cursor_row)
            .cloned()
            .unwrap_or_default();
        trace!("Cell content: {}", cell);
        self.copy_to_clipboard(cell);
    }

    fn reload_workspace(&mut self) {
        match Workspace::load(&self.workspace_path) {
            Ok(workspace) => {
                self.cache.replace(
                    workspace.organizations,
                    workspace.contacts,
                    workspace.renewals,
                );
                // rebuild happens on the next update pass via the revision check
                self.set_status_message("Reloaded workspace");
            }
            Err(e) => {
                error!("Workspace reload failed: {e}");
                self.set_status_message(format!("Reload failed: {e}"));
            }
        }
    }

    // -------------------- Record detail view ---------------------- //

    fn build_record_view(&mut self, grid_pos: usize) {
        trace!("Building record view ...");
        let kind = self.active_def().table_type;
        let mut headers: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        for rc in self.grid.columns.iter() {
            headers.push(
                rc.title()
                    .chars()
                    .take(self.config.max_column_width)
                    .collect(),
            );
        }
        for (cidx, _) in self.grid.columns.iter().enumerate() {
            values.push(self.cell(grid_pos, cidx));
        }

        // Organizations get their interaction timeline appended.
        if let Some(&cache_idx) = self.grid.rows.get(grid_pos)
            && let Some(RowRef::Org(org)) = self.cache.row(kind, cache_idx)
        {
            let mut events = org.timeline.clone();
            events.sort_by_key(|e| std::cmp::Reverse(e.at));
            for event in events {
                headers.push("Timeline".to_string());
                values.push(format!(
                    "{} {}: {}",
                    event.at.date_naive(),
                    event.kind.label(),
                    event.summary
                ));
            }
        }

        let record = &mut self.record_view;
        record.grid_pos = grid_pos;
        record.cursor_row = 0;
        record.cursor_offset = 0;
        record.height = self.uilayout.table_height;
        record.width = self.uilayout.table_width;
        record.header_width = headers.iter().map(|h| h.len()).max().unwrap_or(0);
        record.value_width = record.width.saturating_sub(record.header_width);
        record.header_data = headers;
        record.value_data = values;

        self.update_record_data();
    }

    fn update_record_data(&mut self) {
        let record = &mut self.record_view;
        let rbegin = record.cursor_offset;
        let rend = std::cmp::min(rbegin + record.height, record.value_data.len());

        record.header_view = UIColumn {
            name: "Field".to_string(),
            data: record.header_data[rbegin..rend].to_vec(),
            width: record.header_width,
        };
        record.value_view = UIColumn {
            name: "Value".to_string(),
            data: record.value_data[rbegin..rend].to_vec(),
            width: record.value_width,
        };
        self.update_uidata_for_record();
    }

    fn move_record_selection_up(&mut self, size: usize) {
        let record = &mut self.record_view;
        if record.cursor_row > 0 {
            record.cursor_row = record.cursor_row.saturating_sub(size);
        } else if record.cursor_offset > 0 {
            record.cursor_offset = record.cursor_offset.saturating_sub(size);
        }
        self.update_record_data();
    }

    fn move_record_selection_down(&mut self, size: usize) {
        let record = &mut self.record_view;
        if record.value_data.is_empty() {
            return;
        }
        if record.cursor_row + record.cursor_offset < record.value_data.len() - 1 {
            if record.cursor_row < record.height.saturating_sub(1) {
                record.cursor_row =
                    std::cmp::min(record.cursor_row + size, record.value_data.len() - 1);
            } else {
                record.cursor_offset =
                    std::cmp::min(record.cursor_offset + size, record.value_data.len() - 1);
            }
            self.update_record_data();
        }
    }

    fn previous_record(&mut self) {
        if self.record_view.grid_pos > 0 {
            let pos = self.record_view.grid_pos - 1;
            self.build_record_view(pos);
        }
    }

    fn next_record(&mut self) {
        if self.record_view.grid_pos + 1 < self.grid.rows.len() {
            let pos = self.record_view.grid_pos + 1;
            self.build_record_view(pos);
        }
    }

    // -------------------- Grid movement ---------------------- //

    fn move_table_selection_beginning(&mut self) {
        self.grid.cursor_row = 0;
        self.grid.offset_row = 0;
        self.update_table_data();
    }

    fn move_table_selection_end(&mut self) {
        if self.grid.rows.is_empty() {
            return;
        }
        if self.grid.rows.len() < self.uilayout.table_height {
            self.grid.offset_row = 0;
            self.grid.cursor_row = self.grid.rows.len() - 1;
        } else {
            self.grid.offset_row = self.grid.rows.len() - self.uilayout.table_height;
            self.grid.cursor_row = self.uilayout.table_height - 1;
        }
        self.update_table_data();
    }

    fn move_table_selection_up(&mut self, size: usize) {
        if self.grid.cursor_row > 0 {
            self.grid.cursor_row = self.grid.cursor_row.saturating_sub(size);
        } else if self.grid.offset_row > 0 {
            self.grid.offset_row = self.grid.offset_row.saturating_sub(size);
        }
        self.update_table_data();
    }

    fn move_table_selection_down(&mut self, size: usize) {
        if self.grid.rows.is_empty() {
            return;
        }
        if self.grid.cursor_pos() < self.grid.rows.len() - 1 {
            if self.grid.cursor_row < self.uilayout.table_height.saturating_sub(1) {
                self.grid.cursor_row = std::cmp::min(
                    self.grid.cursor_row + size,
                    self.grid.rows.len() - self.grid.offset_row - 1,
                );
            } else {
                self.grid.offset_row =
                    std::cmp::min(self.grid.offset_row + size, self.grid.rows.len() - 1);
                self.grid.cursor_row = std::cmp::min(
                    self.uilayout.table_height - 1,
                    self.grid.rows.len() - self.grid.offset_row - 1,
                );
            }
            self.update_table_data();
        }
    }

    fn move_table_selection_left(&mut self) {
        if self.grid.cursor_column > 0 {
            self.grid.cursor_column -= 1;
        } else if self.grid.offset_column > 0 {
            self.grid.offset_column -= 1;
        }
        self.update_table_data();
    }

    fn move_table_selection_right(&mut self) {
        if self.grid.columns.is_empty() {
            return;
        }
        if self.grid.cursor_column + self.grid.offset_column < self.grid.columns.len() - 1 {
            if self.grid.cursor_column < self.grid.visible_columns.len().saturating_sub(1) {
                self.grid.cursor_column += 1;
            } else {
                self.grid.offset_column += 1;
            }
            self.update_table_data();
        } else if self.grid.visible_width > self.grid.width
            && self.grid.offset_column < self.grid.columns.len() - 1
        {
            // Last column wider than the frame, keep scrolling into it
            self.grid.offset_column += 1;
            self.update_table_data();
        }
    }
}

fn shorten(name: &str, width: usize) -> String {
    if width < 3 {
        return String::new();
    }
    if name.len() > width {
        let mut reduced: String = name.chars().take(width - 3).collect();
        reduced.push_str("...");
        reduced
    } else {
        name.to_string()
    }
}

/// Numeric-aware cell comparison. Amounts keep their `$` and thousands
/// separators in cell text, strip those before trying a float parse.
fn compare_cells(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |s: &str| -> Result<f64, std::num::ParseFloatError> {
        s.trim_start_matches('$').replace(',', "").parse()
    };
    match (parse(a), parse(b)) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

fn wrap_cell_content(c: &str) -> String {
    let needs_escaping = c.contains('"');
    let needs_wrapping = c.contains([' ', '\t', ',']);
    let mut out = String::from(c);
    if needs_escaping {
        out = out.replace('"', "\"\"");
    }
    if needs_wrapping {
        out = format!("\"{out}\"");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_path() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/workspace.json")
    }

    fn load_model() -> Model {
        Model::load(&CrmConfig::default(), fixture_path(), None, 120, 40).unwrap()
    }

    #[test]
    fn load_builds_grid_for_first_view() {
        let model = load_model();
        assert_eq!(model.status, Status::READY);
        assert!(!model.grid.rows.is_empty());
        assert!(!model.grid.columns.is_empty());
        assert!(model.uidata.nrows > 0);
    }

    #[test]
    fn unknown_preset_is_an_error() {
        let result = Model::load(
            &CrmConfig::default(),
            fixture_path(),
            Some("does-not-exist"),
            120,
            40,
        );
        assert!(matches!(result, Err(CrmError::UnknownPreset(_))));
    }

    #[test]
    fn preset_switch_wraps_around() {
        let mut model = load_model();
        let total = model.view_defs.len();
        for _ in 0..total {
            model.update(Some(Message::NextPreset)).unwrap();
        }
        assert_eq!(model.active_view, 0);
        model.update(Some(Message::PrevPreset)).unwrap();
        assert_eq!(model.active_view, total - 1);
    }

    #[test]
    fn quick_filter_persists_and_reduces_rows() {
        let mut model = load_model();
        let all = model.grid.rows.len();
        // move off the avatar column, which takes no filter
        model.update(Some(Message::MoveRight)).unwrap();
        model.update(Some(Message::Filter)).unwrap();
        for chr in "zzz-no-such-org".chars() {
            model
                .update(Some(Message::RawKey(KeyEvent::from(KeyCode::Char(chr)))))
                .unwrap();
        }
        model
            .update(Some(Message::RawKey(KeyEvent::from(KeyCode::Enter))))
            .unwrap();
        assert!(model.grid.rows.len() < all);
        assert!(model.dirty);
        assert!(!model.active_def().filters.is_empty());

        model.update(Some(Message::ClearFilters)).unwrap();
        assert_eq!(model.grid.rows.len(), all);
        assert!(model.active_def().filters.is_empty());
    }

    #[test]
    fn sorting_persists_into_the_view_definition() {
        let mut model = load_model();
        model.update(Some(Message::SortDescending)).unwrap();
        let sort = model.active_def().sort_spec().unwrap();
        assert_eq!(sort.direction, SortDirection::Desc);
        assert!(model.dirty);
    }

    #[test]
    fn cache_replace_triggers_rebuild_on_next_update() {
        let mut model = load_model();
        model.cache.replace(Vec::new(), Vec::new(), Vec::new());
        model.update(None).unwrap();
        assert!(model.grid.rows.is_empty());
        assert_eq!(model.status, Status::EMPTY);
    }

    #[test]
    fn palette_enter_dispatches_selected_action() {
        let mut model = load_model();
        model.update(Some(Message::Palette)).unwrap();
        for chr in "quit".chars() {
            model
                .update(Some(Message::RawKey(KeyEvent::from(KeyCode::Char(chr)))))
                .unwrap();
        }
        model
            .update(Some(Message::RawKey(KeyEvent::from(KeyCode::Enter))))
            .unwrap();
        assert_eq!(model.status, Status::QUITTING);
    }

    #[test]
    fn compare_cells_handles_amounts() {
        assert_eq!(
            compare_cells("$1,200", "$900"),
            std::cmp::Ordering::Greater
        );
        assert_eq!(compare_cells("12", "100"), std::cmp::Ordering::Less);
        assert_eq!(compare_cells("Acme", "Globex"), std::cmp::Ordering::Less);
    }

    #[test]
    fn wrap_cell_content_quotes_spaces_and_commas() {
        assert_eq!(wrap_cell_content("plain"), "plain");
        assert_eq!(wrap_cell_content("a b"), "\"a b\"");
        assert_eq!(wrap_cell_content("a\"b"), "a\"\"b");
        assert_eq!(wrap_cell_content("a,b"), "\"a,b\"");
    }
}

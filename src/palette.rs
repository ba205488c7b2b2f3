use tracing::trace;

use crate::domain::Message;

/// One executable action of the command palette.
pub struct PaletteEntry {
    pub label: &'static str,
    pub message: Message,
}

fn default_entries() -> Vec<PaletteEntry> {
    vec![
        PaletteEntry {
            label: "Export view as CSV",
            message: Message::ExportCsv,
        },
        PaletteEntry {
            label: "Clear filters",
            message: Message::ClearFilters,
        },
        PaletteEntry {
            label: "Sort ascending",
            message: Message::SortAscending,
        },
        PaletteEntry {
            label: "Sort descending",
            message: Message::SortDescending,
        },
        PaletteEntry {
            label: "Hide or show column",
            message: Message::ToggleColumnVisible,
        },
        PaletteEntry {
            label: "Move column left",
            message: Message::MoveColumnLeft,
        },
        PaletteEntry {
            label: "Move column right",
            message: Message::MoveColumnRight,
        },
        PaletteEntry {
            label: "Order columns by visibility",
            message: Message::OrderColumnsByVisibility,
        },
        PaletteEntry {
            label: "Next view",
            message: Message::NextPreset,
        },
        PaletteEntry {
            label: "Previous view",
            message: Message::PrevPreset,
        },
        PaletteEntry {
            label: "Search table",
            message: Message::Search,
        },
        PaletteEntry {
            label: "Filter current column",
            message: Message::Filter,
        },
        PaletteEntry {
            label: "Copy cell",
            message: Message::CopyCell,
        },
        PaletteEntry {
            label: "Copy row",
            message: Message::CopyRow,
        },
        PaletteEntry {
            label: "Toggle row index",
            message: Message::ToggleIndex,
        },
        PaletteEntry {
            label: "Reload workspace",
            message: Message::ReloadWorkspace,
        },
        PaletteEntry {
            label: "Help",
            message: Message::Help,
        },
        PaletteEntry {
            label: "Quit",
            message: Message::Quit,
        },
    ]
}

/// Fuzzy action launcher state. Matching is a ranked case-insensitive
/// substring search over the entry labels.
pub struct Palette {
    entries: Vec<PaletteEntry>,
    matches: Vec<usize>,
    selected: usize,
}

impl Default for Palette {
    fn default() -> Self {
        let entries = default_entries();
        let matches = (0..entries.len()).collect();
        Palette {
            entries,
            matches,
            selected: 0,
        }
    }
}

impl Palette {
    pub fn set_query(&mut self, query: &str) {
        let needle = query.to_lowercase();
        let mut scored: Vec<(usize, usize)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| {
                entry
                    .label
                    .to_lowercase()
                    .find(&needle)
                    .map(|pos| (pos, idx))
            })
            .collect();
        scored.sort_by_key(|&(pos, idx)| (pos, self.entries[idx].label.len()));
        self.matches = scored.into_iter().map(|(_, idx)| idx).collect();
        self.selected = 0;
        trace!("Palette query '{query}' has {} matches", self.matches.len());
    }

    pub fn move_up(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn move_down(&mut self) {
        if self.selected + 1 < self.matches.len() {
            self.selected += 1;
        }
    }

    pub fn selected_message(&self) -> Option<Message> {
        self.matches
            .get(self.selected)
            .map(|&idx| self.entries[idx].message.clone())
    }

    /// Visible labels in ranked order, with the selected index.
    pub fn visible(&self) -> (Vec<&'static str>, usize) {
        let labels = self
            .matches
            .iter()
            .map(|&idx| self.entries[idx].label)
            .collect();
        (labels, self.selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_lists_everything() {
        let mut palette = Palette::default();
        palette.set_query("");
        let (labels, selected) = palette.visible();
        assert_eq!(labels.len(), default_entries().len());
        assert_eq!(selected, 0);
    }

    #[test]
    fn query_ranks_earlier_matches_first() {
        let mut palette = Palette::default();
        palette.set_query("sort");
        let (labels, _) = palette.visible();
        assert_eq!(labels[0], "Sort ascending");
        assert!(labels.contains(&"Sort descending"));
    }

    #[test]
    fn selection_is_clamped_to_matches() {
        let mut palette = Palette::default();
        palette.set_query("quit");
        palette.move_down();
        palette.move_down();
        assert!(matches!(palette.selected_message(), Some(Message::Quit)));
    }

    #[test]
    fn no_match_yields_no_message() {
        let mut palette = Palette::default();
        palette.set_query("zzzzzz");
        assert!(palette.selected_message().is_none());
    }
}

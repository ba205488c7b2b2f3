use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style, Stylize},
    symbols::border,
    text::{Line, Span},
    widgets::{Block, Clear, Paragraph},
    Frame,
};

use crate::domain::CrmConfig;
use crate::model::{Model, UIColumn, UIData};

pub const CMDLINE_HEIGHT: usize = 2;
pub const TABLE_HEADER_HEIGHT: usize = 1;
pub const SCROLLBAR_WIDTH: usize = 1;
pub const COLUMN_SPACER: usize = 1;

pub struct TableUI {
    status_message_timeout: u64,
}

impl TableUI {
    pub fn new(cfg: &CrmConfig) -> Self {
        Self {
            status_message_timeout: cfg.status_message_timeout,
        }
    }

    pub fn draw(&self, model: &Model, frame: &mut Frame) {
        let uidata = model.get_uidata();
        let area = frame.area();

        self.draw_header(uidata, frame, area);
        self.draw_grid(uidata, frame, area);
        self.draw_statusline(uidata, frame, area);

        if uidata.show_popup {
            self.draw_popup(uidata, frame, area);
        }
        if uidata.show_palette {
            self.draw_palette(uidata, frame, area);
        }
    }

    fn draw_header(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let mut spans: Vec<Span> = Vec::new();
        if uidata.layout.index_width > 0 {
            spans.push(Span::raw(" ".repeat(uidata.layout.index_width + COLUMN_SPACER)));
        }
        for (cidx, column) in uidata.table.iter().enumerate() {
            let style = if cidx == uidata.selected_column {
                Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
            } else {
                Style::default().add_modifier(Modifier::BOLD)
            };
            spans.push(Span::styled(pad(&column.name, column.width), style));
            spans.push(Span::raw(" "));
        }
        let header_area = Rect {
            x: area.x,
            y: area.y,
            width: area.width,
            height: TABLE_HEADER_HEIGHT as u16,
        };
        frame.render_widget(Paragraph::new(Line::from(spans)), header_area);
    }

    fn draw_grid(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let nrows = uidata
            .table
            .first()
            .map(|c: &UIColumn| c.data.len())
            .unwrap_or(0);

        let mut lines: Vec<Line> = Vec::with_capacity(nrows);
        for row in 0..nrows {
            let selected_row = row == uidata.selected_row;
            let mut spans: Vec<Span> = Vec::new();

            if uidata.layout.index_width > 0 {
                let idx = uidata.index.data.get(row).cloned().unwrap_or_default();
                spans.push(Span::styled(
                    pad(&idx, uidata.layout.index_width),
                    Style::default().fg(Color::DarkGray),
                ));
                spans.push(Span::raw(" "));
            }

            for (cidx, column) in uidata.table.iter().enumerate() {
                let cell = column.data.get(row).cloned().unwrap_or_default();
                let mut style = Style::default();
                if selected_row {
                    style = style.add_modifier(Modifier::REVERSED);
                }
                if selected_row && cidx == uidata.selected_column {
                    style = style.add_modifier(Modifier::BOLD).fg(Color::Yellow);
                }
                spans.push(Span::styled(pad(&cell, column.width), style));
                spans.push(Span::raw(" "));
            }
            lines.push(Line::from(spans));
        }

        let grid_area = Rect {
            x: area.x,
            y: area.y + TABLE_HEADER_HEIGHT as u16,
            width: area.width,
            height: area.height.saturating_sub((TABLE_HEADER_HEIGHT + CMDLINE_HEIGHT) as u16),
        };
        frame.render_widget(Paragraph::new(lines), grid_area);
    }

    fn draw_statusline(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let position = if uidata.nrows > 0 {
            format!("{}/{}", uidata.abs_selected_row + 1, uidata.nrows)
        } else {
            "empty".to_string()
        };

        let info_line = Line::from(vec![
            Span::raw(" "),
            uidata.name.clone().bold(),
            Span::raw("  "),
            Span::styled(position, Style::default().fg(Color::DarkGray)),
        ]);

        // Second line: either the active prompt or a transient status message
        let message_line = if uidata.active_cmdinput || uidata.show_palette {
            let prompt = uidata.cmd_mode.map(|m| m.prompt()).unwrap_or(":");
            Line::from(vec![
                Span::styled(prompt, Style::default().fg(Color::Cyan)),
                Span::raw(uidata.cmdinput.input.clone()),
                Span::styled("█", Style::default().fg(Color::Cyan)),
            ])
        } else if uidata.last_status_message_update.elapsed().as_secs()
            < self.status_message_timeout
        {
            Line::from(Span::raw(uidata.status_message.clone()))
        } else {
            Line::from(Span::styled(
                " ? for help",
                Style::default().fg(Color::DarkGray),
            ))
        };

        let status_area = Rect {
            x: area.x,
            y: area.y + area.height.saturating_sub(CMDLINE_HEIGHT as u16),
            width: area.width,
            height: CMDLINE_HEIGHT as u16,
        };
        frame.render_widget(Paragraph::new(vec![info_line, message_line]), status_area);
    }

    fn draw_popup(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let popup = centered(area, 70, 80);
        let block = Block::bordered()
            .title(Line::from(" help ".bold()).centered())
            .border_set(border::THICK);
        frame.render_widget(Clear, popup);
        frame.render_widget(
            Paragraph::new(uidata.popup_message.clone()).block(block),
            popup,
        );
    }

    fn draw_palette(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let popup = centered(area, 50, 60);
        let block = Block::bordered()
            .title(Line::from(" actions ".bold()).centered())
            .border_set(border::THICK);

        let mut lines: Vec<Line> = Vec::with_capacity(uidata.palette_items.len() + 1);
        lines.push(Line::from(vec![
            Span::styled("> ", Style::default().fg(Color::Cyan)),
            Span::raw(uidata.cmdinput.input.clone()),
            Span::styled("█", Style::default().fg(Color::Cyan)),
        ]));
        for (idx, label) in uidata.palette_items.iter().enumerate() {
            let style = if idx == uidata.palette_selected {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            };
            lines.push(Line::from(Span::styled(format!("  {label}"), style)));
        }

        frame.render_widget(Clear, popup);
        frame.render_widget(Paragraph::new(lines).block(block), popup);
    }
}

fn pad(text: &str, width: usize) -> String {
    let mut out: String = text.chars().take(width).collect();
    while out.chars().count() < width {
        out.push(' ');
    }
    out
}

fn centered(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let width = area.width * percent_x / 100;
    let height = area.height * percent_y / 100;
    Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_truncates_and_fills() {
        assert_eq!(pad("abc", 5), "abc  ");
        assert_eq!(pad("abcdef", 3), "abc");
    }

    #[test]
    fn centered_stays_inside_the_area() {
        let area = Rect::new(0, 0, 100, 40);
        let popup = centered(area, 50, 50);
        assert!(popup.x + popup.width <= area.width);
        assert!(popup.y + popup.height <= area.height);
        assert_eq!(popup.width, 50);
        assert_eq!(popup.height, 20);
    }
}

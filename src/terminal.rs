// SPDX-License-Identifier: GPL-3.0-only

//! Terminal scan screen
//!
//! Renders the camera preview with Unicode half-block characters, draws
//! a red box over the detected code, and reflects coordinator state in a
//! status bar. Pure presentation: every decision lives in the
//! coordinator; this loop only forwards key presses and paints events.

use crate::app::{Intent, MessageKind, Navigation, ScanCoordinator, ScanState, ScreenEvent, StatusMessage};
use crate::backends::camera::CameraFrame;
use crate::catalog::CatalogApi;
use crate::scan::{BoundingBox, ScanResult};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal, backend::CrosstermBackend, buffer::Buffer, layout::Rect, style::Color,
    widgets::Widget,
};
use std::io::{self, stdout};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Run the scan screen until navigation or quit
pub fn run<C: CatalogApi + 'static>(
    coordinator: ScanCoordinator<C>,
    events: mpsc::UnboundedReceiver<ScreenEvent>,
    handle: tokio::runtime::Handle,
    mirror: bool,
    api_base_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    enable_raw_mode()?;
    let mut out = stdout();
    execute!(out, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(out);
    let mut terminal = Terminal::new(backend)?;

    let result = run_screen(
        &mut terminal,
        &coordinator,
        events,
        &handle,
        mirror,
        api_base_url,
    );

    coordinator.teardown();

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run_screen<C: CatalogApi + 'static>(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    coordinator: &ScanCoordinator<C>,
    mut events: mpsc::UnboundedReceiver<ScreenEvent>,
    handle: &tokio::runtime::Handle,
    mirror: bool,
    api_base_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    handle.block_on(coordinator.start());

    let mut state = coordinator.state();
    let mut message: Option<StatusMessage> = None;
    let mut detection: Option<ScanResult> = None;
    let mut navigation: Option<Navigation> = None;

    loop {
        // Drain coordinator events since the last frame
        while let Ok(event) = events.try_recv() {
            match event {
                ScreenEvent::StateChanged(next) => state = next,
                ScreenEvent::Message(msg) => message = Some(msg),
                ScreenEvent::MessageCleared => message = None,
                ScreenEvent::Detection(result) => detection = Some(result),
                ScreenEvent::Navigate(nav) => navigation = Some(nav),
            }
        }

        let frame = coordinator.preview_frame();

        terminal.draw(|f| {
            let area = f.area();
            let preview_area = Rect {
                x: area.x,
                y: area.y,
                width: area.width,
                height: area.height.saturating_sub(1),
            };
            f.render_widget(
                &PreviewWidget {
                    frame: frame.clone(),
                    bounds: detection.as_ref().and_then(|d| d.bounds),
                    mirror,
                },
                preview_area,
            );

            let status_area = Rect {
                x: area.x,
                y: area.height.saturating_sub(1),
                width: area.width,
                height: 1,
            };
            f.render_widget(
                StatusBar {
                    state: &state,
                    intent: coordinator.intent(),
                    message: message.as_ref(),
                },
                status_area,
            );
        })?;

        // The confirmation stays on screen for the navigation delay; the
        // Navigate event is the signal to leave.
        if let Some(nav) = navigation.take() {
            if let Navigation::BookDetail { book_id } = nav {
                let url = format!(
                    "{}/books/{}/",
                    api_base_url.trim_end_matches('/'),
                    book_id
                );
                info!(url = %url, "Opening book detail view");
                if let Err(err) = open::that(&url) {
                    warn!(error = %err, "Could not open detail view");
                }
            }
            break;
        }

        if event::poll(Duration::from_millis(16))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
                break;
            }
            if key.code == KeyCode::Char('q') {
                break;
            }
            // Retry after a local error or a completed/aborted action
            if key.code == KeyCode::Char('r') && !state.is_busy() {
                detection = None;
                handle.block_on(coordinator.start());
            }
        }
    }

    Ok(())
}

/// Widget that renders a camera frame using half-block characters
struct PreviewWidget {
    frame: Option<Arc<CameraFrame>>,
    bounds: Option<BoundingBox>,
    mirror: bool,
}

impl Widget for &PreviewWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let Some(frame) = &self.frame else {
            let msg = "Waiting for camera...";
            let x = area.x + (area.width.saturating_sub(msg.len() as u16)) / 2;
            let y = area.y + area.height / 2;
            if y < area.y + area.height && x < area.x + area.width {
                buf.set_string(x, y, msg, ratatui::style::Style::default());
            }
            return;
        };

        // Each terminal cell shows two vertical pixels via the upper
        // half-block: fg is the top pixel, bg the bottom one.
        let frame_aspect = frame.width as f64 / frame.height as f64;
        let term_width = area.width as f64;
        let term_height = (area.height * 2) as f64;

        let (display_width, display_height) = if term_width / term_height > frame_aspect {
            let h = term_height;
            let w = h * frame_aspect;
            (w as u16, (h / 2.0) as u16)
        } else {
            let w = term_width;
            let h = w / frame_aspect;
            (w as u16, (h / 2.0) as u16)
        };
        if display_width == 0 || display_height == 0 {
            return;
        }

        let x_offset = area.x + (area.width.saturating_sub(display_width)) / 2;
        let y_offset = area.y + (area.height.saturating_sub(display_height)) / 2;

        let x_scale = frame.width as f64 / display_width as f64;
        let y_scale = frame.height as f64 / (display_height * 2) as f64;

        for ty in 0..display_height {
            for tx in 0..display_width {
                let term_x = x_offset + tx;
                let term_y = y_offset + ty;
                if term_x >= area.x + area.width || term_y >= area.y + area.height {
                    continue;
                }

                let src_col = if self.mirror {
                    display_width - 1 - tx
                } else {
                    tx
                };
                let src_x = (src_col as f64 * x_scale) as u32;
                let src_y_top = (ty as f64 * 2.0 * y_scale) as u32;
                let src_y_bottom = ((ty as f64 * 2.0 + 1.0) * y_scale) as u32;

                let (tr, tg, tb) = frame.rgb_at(src_x, src_y_top);
                let (br, bg, bb) = frame.rgb_at(src_x, src_y_bottom);

                if let Some(cell) = buf.cell_mut((term_x, term_y)) {
                    cell.set_char('▀');
                    cell.set_fg(Color::Rgb(tr, tg, tb));
                    cell.set_bg(Color::Rgb(br, bg, bb));
                }
            }
        }

        // Red box over the detected code, in display coordinates
        if let Some(b) = self.bounds {
            let to_col = |px: u32| -> u16 {
                let col = (px as f64 / x_scale) as u16;
                let col = col.min(display_width.saturating_sub(1));
                if self.mirror {
                    display_width.saturating_sub(1) - col
                } else {
                    col
                }
            };
            let to_row = |py: u32| -> u16 {
                ((py as f64 / (y_scale * 2.0)) as u16).min(display_height.saturating_sub(1))
            };

            let (c0, c1) = {
                let a = to_col(b.x);
                let bcol = to_col(b.x + b.width);
                (a.min(bcol), a.max(bcol))
            };
            let r0 = to_row(b.y);
            let r1 = to_row(b.y + b.height);

            for col in c0..=c1 {
                for row in r0..=r1 {
                    let on_edge = col == c0 || col == c1 || row == r0 || row == r1;
                    if !on_edge {
                        continue;
                    }
                    let term_x = x_offset + col;
                    let term_y = y_offset + row;
                    if term_x < area.x + area.width && term_y < area.y + area.height {
                        if let Some(cell) = buf.cell_mut((term_x, term_y)) {
                            cell.set_bg(Color::Red);
                        }
                    }
                }
            }
        }
    }
}

/// Single-line status bar: intent, state, current message, keys
struct StatusBar<'a> {
    state: &'a ScanState,
    intent: Intent,
    message: Option<&'a StatusMessage>,
}

impl Widget for StatusBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for x in area.x..area.x + area.width {
            if let Some(cell) = buf.cell_mut((x, area.y)) {
                cell.set_char(' ');
                cell.set_bg(Color::DarkGray);
            }
        }

        let left = format!(" [{}] {} ", self.intent.verb(), self.state.label());
        buf.set_string(
            area.x,
            area.y,
            truncate(&left, area.width as usize),
            ratatui::style::Style::default()
                .fg(Color::White)
                .bg(Color::DarkGray),
        );

        let keys = "'r' rescan | 'q' quit ";
        if area.width as usize > left.len() + keys.len() {
            buf.set_string(
                area.x + area.width - keys.len() as u16,
                area.y,
                keys,
                ratatui::style::Style::default()
                    .fg(Color::Gray)
                    .bg(Color::DarkGray),
            );
        }

        if let Some(message) = self.message {
            let fg = match message.kind {
                MessageKind::Info => Color::White,
                MessageKind::Success => Color::Green,
                MessageKind::Error => Color::LightRed,
            };
            let available = (area.width as usize)
                .saturating_sub(left.len())
                .saturating_sub(keys.len());
            if available > 4 {
                buf.set_string(
                    area.x + left.len() as u16,
                    area.y,
                    truncate(&message.text, available),
                    ratatui::style::Style::default().fg(fg).bg(Color::DarkGray),
                );
            }
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max.saturating_sub(1)).collect()
    }
}

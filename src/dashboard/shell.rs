use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Terminal,
};

use crate::client::AttachClient;
use crate::config::Settings;
use crate::{Error, Result};

use super::pager::{PagerKey, PagerState};
use super::poller::{Poller, SharedClient, SharedView};
use super::table::{header_line, row_line, Table};
use super::view::{KeyOutcome, View};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const FALLBACK_VIEWPORT: usize = 20;

/// Render state of one view: its published rows plus its pager.
pub(crate) struct ViewPane {
    title: String,
    pub(crate) table: Table,
    pager: PagerState,
    /// Last table-region height; the pager's viewport for key handling.
    viewport_height: usize,
    pub(crate) active: bool,
    note: Option<String>,
}

impl ViewPane {
    fn new(title: String, cursor_enabled: bool, sort_enabled: bool) -> Self {
        Self {
            title,
            table: Table::default(),
            pager: PagerState {
                cursor_enabled,
                sort_enabled,
                ..PagerState::new()
            },
            viewport_height: FALLBACK_VIEWPORT,
            active: true,
            note: None,
        }
    }
}

struct FilterEdit {
    slot: usize,
    original: String,
}

/// Everything behind the render lock: the terminal surface and every view's
/// row buffer. Pollers and the input loop both render through here, so
/// renders never interleave and a buffer swap is atomic with its redraw.
struct Screen {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    panes: Vec<ViewPane>,
    selected: usize,
    target: String,
    filter_edit: Option<FilterEdit>,
}

impl Screen {
    fn render(&mut self) {
        let Screen {
            terminal,
            panes,
            selected,
            target,
            filter_edit,
        } = self;
        let selected = *selected;
        let editing = filter_edit.is_some();
        let draw = terminal.draw(|frame| {
            let area = frame.size();
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(1),
                    Constraint::Length(1),
                    Constraint::Min(0),
                ])
                .split(area);

            frame.render_widget(
                Paragraph::new(tabs_line(target, panes, selected)),
                chunks[0],
            );

            let pane = &mut panes[selected];
            frame.render_widget(
                Paragraph::new(Line::from(Span::styled(
                    title_text(pane, editing, area.width as usize),
                    Style::default().add_modifier(Modifier::BOLD | Modifier::REVERSED),
                ))),
                chunks[1],
            );

            pane.viewport_height = (chunks[2].height as usize).max(2);
            let width = chunks[2].width as usize;

            // Filter, then sort, then clamp the viewport: the pipeline of
            // every render pass.
            let rows = pane.table.prepare(&pane.pager);
            pane.pager.clamp(rows.len(), pane.viewport_height);
            let widths = pane.table.layout_widths(&rows);

            let mut lines = Vec::with_capacity(pane.viewport_height);
            lines.push(Line::from(Span::styled(
                header_line(&pane.table, &pane.pager, &widths, width),
                Style::default().add_modifier(Modifier::REVERSED),
            )));
            let (start, end) = pane.pager.visible_range(rows.len(), pane.viewport_height - 1);
            for (i, row) in rows[start..end].iter().enumerate() {
                let text = row_line(row, &widths, pane.pager.hshift, width);
                let style = if pane.pager.cursor_line() == Some(i) {
                    Style::default().add_modifier(Modifier::REVERSED)
                } else {
                    Style::default()
                };
                lines.push(Line::from(Span::styled(text, style)));
            }
            frame.render_widget(Paragraph::new(lines), chunks[2]);
        });
        if let Err(e) = draw {
            tracing::warn!(error = %e, "render failed");
        }
    }

    fn pager_key(&mut self, key: PagerKey) {
        let pane = &mut self.panes[self.selected];
        let rows = pane.table.prepare(&pane.pager);
        let columns = pane.table.columns.clone();
        pane.pager
            .handle_key(key, &columns, rows.len(), pane.viewport_height);
        self.render();
    }
}

/// Handle shared by the input loop and every poller. The single lock
/// guarding terminal writes and row-buffer swaps.
#[derive(Clone)]
pub struct SharedScreen(Arc<Mutex<Screen>>);

impl SharedScreen {
    pub(crate) fn publish_rows(&self, slot: usize, table: Table) {
        let mut screen = self.0.lock().unwrap();
        screen.panes[slot].table = table;
        screen.render();
    }

    /// Freeze a pane: last rendered rows stay visible, marked stopped.
    pub(crate) fn mark_inactive(&self, slot: usize) {
        let mut screen = self.0.lock().unwrap();
        screen.panes[slot].active = false;
        screen.render();
    }

    fn resize(&self) {
        let mut screen = self.0.lock().unwrap();
        // Geometry is re-derived during the draw; filter and sort state
        // are untouched.
        screen.render();
    }
}

enum KeyAction {
    None,
    Quit,
    StopView(usize),
}

/// The interactive dashboard: owns the terminal, routes keys to the active
/// view's pager, runs one poller per view against one shared attach session.
pub struct Shell;

impl Shell {
    pub async fn run(pid: u32, views: Vec<Box<dyn View>>, settings: &Settings) -> Result<()> {
        let client = AttachClient::connect(pid, CONNECT_TIMEOUT).await?;
        Self::run_with_client(client, format!("pid {pid}"), views, settings).await
    }

    /// Run against an already connected session (tests, custom rendezvous).
    pub async fn run_with_client(
        mut client: AttachClient,
        target: String,
        views: Vec<Box<dyn View>>,
        settings: &Settings,
    ) -> Result<()> {
        if views.is_empty() {
            tracing::warn!("no views configured, nothing to show");
            client.bye().await;
            return Ok(());
        }
        client.ping().await?;

        let mut panes = Vec::with_capacity(views.len());
        let mut install_failures: Vec<Option<String>> = Vec::with_capacity(views.len());
        for view in &views {
            panes.push(ViewPane::new(
                view.title(),
                view.cursor_enabled(),
                view.sort_enabled(),
            ));
            let failure = match view.extension() {
                Some(spec) => match client.install_extension(spec).await {
                    Ok(()) => None,
                    Err(e @ Error::ExtensionInstall { .. }) => {
                        tracing::warn!(view = view.name(), error = %e, "extension unusable");
                        Some(e.to_string())
                    }
                    Err(e) => return Err(e),
                },
                None => None,
            };
            install_failures.push(failure);
        }

        enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;

        let screen = SharedScreen(Arc::new(Mutex::new(Screen {
            terminal,
            panes,
            selected: 0,
            target,
            filter_edit: None,
        })));

        let client: SharedClient = Arc::new(tokio::sync::Mutex::new(client));
        let shared_views: Vec<SharedView> = views
            .into_iter()
            .map(|v| Arc::new(Mutex::new(v)) as SharedView)
            .collect();

        let mut pollers: Vec<Option<Poller>> = Vec::with_capacity(shared_views.len());
        for (slot, view) in shared_views.iter().enumerate() {
            if let Some(reason) = install_failures[slot].take() {
                // One message, a frozen pane; never a crash.
                let mut s = screen.0.lock().unwrap();
                s.panes[slot].active = false;
                s.panes[slot].note = Some(reason);
                pollers.push(None);
                continue;
            }
            pollers.push(Some(Poller::spawn(
                Arc::clone(view),
                Arc::clone(&client),
                screen.clone(),
                slot,
                settings.poll_interval(),
            )));
        }

        screen.resize();
        let result = event_loop(&screen, &shared_views, &mut pollers).await;

        for poller in pollers.into_iter().flatten() {
            poller.stop().await;
        }
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);

        // End the session; the server tears down on `bye`.
        if let Ok(mutex) = Arc::try_unwrap(client) {
            mutex.into_inner().bye().await;
        }
        result
    }
}

async fn event_loop(
    screen: &SharedScreen,
    views: &[SharedView],
    pollers: &mut [Option<Poller>],
) -> Result<()> {
    let mut events = EventStream::new();
    loop {
        let Some(event) = events.next().await else {
            return Ok(());
        };
        match event {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                match handle_key(screen, views, &key) {
                    KeyAction::Quit => return Ok(()),
                    KeyAction::StopView(slot) => {
                        if let Some(poller) = pollers[slot].take() {
                            poller.stop().await;
                        }
                        screen.mark_inactive(slot);
                    }
                    KeyAction::None => {}
                }
            }
            Ok(Event::Resize(_, _)) => screen.resize(),
            Ok(_) => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

fn handle_key(screen: &SharedScreen, views: &[SharedView], key: &KeyEvent) -> KeyAction {
    let mut s = screen.0.lock().unwrap();

    if s.filter_edit.is_some() {
        match key.code {
            KeyCode::Enter => {
                s.filter_edit = None;
            }
            KeyCode::Esc => {
                let edit = s.filter_edit.take().unwrap();
                s.panes[edit.slot].pager.filter = edit.original;
            }
            KeyCode::Backspace => {
                let slot = s.filter_edit.as_ref().unwrap().slot;
                s.panes[slot].pager.filter.pop();
            }
            KeyCode::Char(c) => {
                let slot = s.filter_edit.as_ref().unwrap().slot;
                s.panes[slot].pager.filter.push(c);
            }
            _ => {}
        }
        s.render();
        return KeyAction::None;
    }

    match key.code {
        KeyCode::Char('q') => return KeyAction::Quit,
        KeyCode::Char('/') => {
            let slot = s.selected;
            let original = s.panes[slot].pager.filter.clone();
            s.filter_edit = Some(FilterEdit { slot, original });
            s.render();
        }
        KeyCode::Tab => {
            s.selected = (s.selected + 1) % s.panes.len();
            s.render();
        }
        KeyCode::Char(c @ '1'..='9') => {
            let slot = c as usize - '1' as usize;
            if slot < s.panes.len() {
                s.selected = slot;
                s.render();
            }
        }
        _ => {
            if let Some(pager_key) = map_pager_key(key) {
                s.pager_key(pager_key);
            } else if let KeyCode::Char(c) = key.code {
                let slot = s.selected;
                let outcome = views[slot].lock().unwrap().handle_key(c);
                match outcome {
                    KeyOutcome::Stop => return KeyAction::StopView(slot),
                    KeyOutcome::Handled => s.render(),
                    KeyOutcome::Ignored => {}
                }
            }
        }
    }
    KeyAction::None
}

/// Map a terminal key onto the uniform pager key model. Alt+arrows drive
/// sorting; plain arrows and page keys drive the viewport.
fn map_pager_key(key: &KeyEvent) -> Option<PagerKey> {
    let alt = key.modifiers.contains(KeyModifiers::ALT);
    Some(match key.code {
        KeyCode::Left if alt => PagerKey::SortPrev,
        KeyCode::Right if alt => PagerKey::SortNext,
        KeyCode::Up if alt => PagerKey::SortDesc,
        KeyCode::Down if alt => PagerKey::SortAsc,
        KeyCode::Left => PagerKey::Left,
        KeyCode::Right => PagerKey::Right,
        KeyCode::Up => PagerKey::Up,
        KeyCode::Down => PagerKey::Down,
        KeyCode::PageUp => PagerKey::PageUp,
        KeyCode::PageDown => PagerKey::PageDown,
        KeyCode::Home => PagerKey::Home,
        KeyCode::End => PagerKey::End,
        _ => return None,
    })
}

fn tabs_line(target: &str, panes: &[ViewPane], selected: usize) -> Line<'static> {
    let mut spans = vec![Span::styled(
        format!("periscope — {target}  "),
        Style::default().add_modifier(Modifier::BOLD),
    )];
    for (i, pane) in panes.iter().enumerate() {
        let label = pane_tab_text(i, pane);
        let style = if i == selected {
            Style::default().add_modifier(Modifier::REVERSED)
        } else {
            Style::default()
        };
        spans.push(Span::styled(label, style));
        spans.push(Span::raw(" "));
    }
    Line::from(spans)
}

fn pane_tab_text(index: usize, pane: &ViewPane) -> String {
    let mut label = format!("{}:{}", index + 1, pane.title);
    if !pane.active {
        label.push_str(" [stopped]");
    }
    label
}

fn title_text(pane: &ViewPane, editing: bool, width: usize) -> String {
    let mut text = format!(" {}", pane.title);
    if !pane.active {
        text.push_str(" [stopped]");
    }
    if let Some(note) = &pane.note {
        text.push_str(&format!(" — {note}"));
    }
    if editing || !pane.pager.filter.is_empty() {
        text.push_str(&format!("  f=\"{}\"", pane.pager.filter));
        if editing {
            text.push('_');
        }
    }
    let len = text.chars().count();
    if len < width {
        text.extend(std::iter::repeat(' ').take(width - len));
    }
    text
}

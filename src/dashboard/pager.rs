/// Uniform key-event model every view is driven by. The shell maps raw
/// terminal events onto these; views and the engine never see crossterm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerKey {
    Left,
    Right,
    Up,
    Down,
    PageUp,
    PageDown,
    Home,
    End,
    /// Move the sort column to the previous column, wrapping.
    SortPrev,
    /// Move the sort column to the next column, wrapping.
    SortNext,
    /// Sort ascending without changing the column.
    SortAsc,
    /// Sort descending without changing the column.
    SortDesc,
    /// Re-derive geometry only; no cursor motion.
    Resize,
}

/// Cursor, scroll and sort state of one view. Mutated only by this engine,
/// in response to key events or a resize.
///
/// Invariants after every update, whenever `row_count > 0`:
/// `cursor <= row_count - 1`, `scroll <= cursor`, and
/// `cursor - scroll < viewport_height`.
#[derive(Debug, Clone, PartialEq)]
pub struct PagerState {
    pub cursor: usize,
    pub scroll: usize,
    pub hshift: usize,
    pub filter: String,
    pub sort_column: Option<String>,
    pub sort_descending: bool,
    pub cursor_enabled: bool,
    pub sort_enabled: bool,
}

impl Default for PagerState {
    fn default() -> Self {
        Self {
            cursor: 0,
            scroll: 0,
            hshift: 0,
            filter: String::new(),
            sort_column: None,
            sort_descending: true,
            cursor_enabled: true,
            sort_enabled: true,
        }
    }
}

impl PagerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one key event against the current (filtered) row count and
    /// viewport height, then reassert all invariants.
    pub fn handle_key(
        &mut self,
        key: PagerKey,
        columns: &[String],
        row_count: usize,
        viewport_height: usize,
    ) {
        let height = viewport_height as i64;
        let max_pos = row_count as i64 - 1;
        let mut cursor = self.cursor as i64;
        let mut shift = self.scroll as i64;
        let mut hshift = self.hshift as i64;

        if self.sort_enabled {
            match key {
                PagerKey::SortPrev | PagerKey::SortNext if !columns.is_empty() => {
                    let current = self
                        .sort_column
                        .clone()
                        .unwrap_or_else(|| columns[0].clone());
                    let pos = columns.iter().position(|c| *c == current).unwrap_or(0);
                    let next = if key == PagerKey::SortNext {
                        (pos + 1) % columns.len()
                    } else {
                        (pos + columns.len() - 1) % columns.len()
                    };
                    self.sort_column = Some(columns[next].clone());
                }
                PagerKey::SortAsc => self.sort_descending = false,
                PagerKey::SortDesc => self.sort_descending = true,
                _ => {}
            }
        }

        match key {
            PagerKey::Left => hshift -= 1,
            PagerKey::Right => hshift += 1,
            PagerKey::Down => {
                if self.cursor_enabled {
                    cursor += 1;
                    if cursor > max_pos {
                        cursor = max_pos;
                    }
                    // Scroll only when the cursor would leave the viewport.
                    if cursor - shift >= height - 1 {
                        shift += 1;
                    }
                } else {
                    cursor += 1;
                    shift += 1;
                }
            }
            PagerKey::Up => {
                cursor -= 1;
                if !self.cursor_enabled {
                    shift -= 1;
                }
            }
            PagerKey::PageDown => {
                cursor += height;
                shift += height;
            }
            PagerKey::PageUp => {
                cursor -= height;
                shift -= height;
            }
            PagerKey::Home => {
                hshift = 0;
                cursor = 0;
                shift = 0;
            }
            PagerKey::End => {
                cursor = max_pos;
                shift = max_pos - height + 2;
            }
            _ => {}
        }

        if hshift < 0 {
            hshift = 0;
        }
        if cursor < 0 {
            shift -= 1;
            cursor = 0;
        }
        if cursor - shift < 0 {
            cursor = (shift - 1).max(0);
            shift -= 1;
        }
        if shift < 0 {
            shift = 0;
        }

        self.hshift = hshift as usize;
        self.cursor = cursor as usize;
        self.scroll = shift as usize;
        self.clamp(row_count, viewport_height);
    }

    /// Reassert invariants against the current row count. Run on every
    /// render pass, after filtering: the filtered set may have shrunk
    /// underneath the cursor.
    pub fn clamp(&mut self, row_count: usize, viewport_height: usize) {
        if row_count == 0 {
            self.cursor = 0;
            self.scroll = 0;
            return;
        }
        let height = viewport_height as i64;
        let max_pos = row_count as i64 - 1;
        let mut cursor = self.cursor as i64;
        let mut shift = self.scroll as i64;

        if cursor > max_pos {
            cursor = max_pos;
            shift = (max_pos - height + 2).max(0);
        }
        // A table that fits entirely never scrolls.
        if max_pos < height {
            shift = 0;
        }
        if cursor - shift >= height {
            shift = cursor - height + 1;
        }
        if shift > cursor {
            shift = cursor;
        }

        self.cursor = cursor as usize;
        self.scroll = shift as usize;
    }

    /// Rows visible in a viewport of the given height: `[scroll, end)`.
    pub fn visible_range(&self, row_count: usize, viewport_height: usize) -> (usize, usize) {
        let start = self.scroll.min(row_count);
        let end = (start + viewport_height).min(row_count);
        (start, end)
    }

    /// Cursor position relative to the viewport, when the cursor is shown.
    pub fn cursor_line(&self) -> Option<usize> {
        if self.cursor_enabled {
            Some(self.cursor - self.scroll)
        } else {
            None
        }
    }
}

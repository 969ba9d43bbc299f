mod pager;
mod poller;
mod shell;
mod table;
mod view;

pub use pager::{PagerKey, PagerState};
pub use poller::{Poller, SharedClient, SharedView};
pub use shell::{SharedScreen, Shell};
pub use table::{filter_rows, header_line, row_line, Cell, Row, Table};
pub use view::{Fetched, KeyOutcome, PathView, View, ViewOutcome};

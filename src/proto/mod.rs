mod frame;
mod wire;

pub use frame::{read_frame, write_frame, MAX_FRAME_BYTES};
pub use wire::{Request, Response, Status, DATA_SEPARATOR};

//! Windowed view caches over a sparse 64-bit address range.
//!
//! A view presents `[start, end)` as a dense sequence of rows and loads
//! them on demand in chunks, one engine command per chunk:
//! - [`HexView`]: fixed 16-byte rows, exact address arithmetic
//! - [`DisasmView`]: one instruction per row, estimated address mapping
//!
//! Reads never wait. A row that is not cached yet reads as `None` and a
//! background load is scheduled; observers learn about new data through
//! [`ViewEvent`]s and re-read.

pub mod disasm;
pub mod events;
pub mod hex;
pub mod range;
pub mod set;
pub mod store;

pub use disasm::DisasmView;
pub use events::ViewEvent;
pub use hex::{HexRow, HexView, ROW_SIZE};
pub use range::{RangeSource, ViewRange};
pub use set::ViewSet;

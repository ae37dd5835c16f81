//! Domain model (IDs, polls, markers, pages, errors).
//!
//! 外部 I/O には依存しない値と検証ロジックのみを置く。

pub mod errors;
pub mod ids;
pub mod marker;
pub mod page;
pub mod poll;

pub use self::errors::{ErrorKind, PollError};
pub use self::ids::{Id, IdMarker, IdParseError, PollId};
pub use self::marker::{Cursor, MarkerError, QueryMarker};
pub use self::page::ListPage;
pub use self::poll::{Answer, Poll, PollDraft, PollValidationError};

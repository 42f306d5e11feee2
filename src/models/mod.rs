pub mod decision;
pub mod download;
pub mod execution;
pub mod session;
pub mod snapshot;

pub use decision::Decision;
pub use download::{ArchiveEntry, ColumnType, DownloadedFile, FileContent, TableData};
pub use execution::ExecutionResult;
pub use session::{PageTransition, QuizReport, QuizSession, SessionStatus, StepOutcome};
pub use snapshot::{ElementKind, FileKind, FileRef, PageElement, PageSnapshot};

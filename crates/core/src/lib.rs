pub mod error;
pub mod ids;
pub mod locator;
pub mod record;
pub mod snapshot;
pub mod table;
pub mod token;
pub mod value;

pub use error::CoreError;
pub use ids::{AuthorId, DatasetId};
pub use locator::DatasetLocator;
pub use record::{CellAddr, CellWrite, ChangeRecord};
pub use snapshot::SnapshotDocument;
pub use table::Table;
pub use token::SequenceToken;
pub use value::CellValue;

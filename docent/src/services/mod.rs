mod response;
mod search;
mod sync;

pub use response::ResponseService;
pub use search::SearchService;
pub use sync::{DocumentSource, SyncService};

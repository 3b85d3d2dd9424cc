pub mod query;

pub use query::{router, start_server, AppState};

mod app;

pub use app::{build_router, AppState, HttpSettings, SESSION_HEADER};

pub mod dispatcher;
pub mod watcher;

pub use dispatcher::{Dispatcher, LocationMatch};
pub use watcher::LocationWatcher;

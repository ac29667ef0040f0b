mod cmd;
mod conf;
mod errors;
mod site;
mod watch;
pub mod db;
pub mod editor;
pub mod testing;
pub mod views;

pub use cmd::{EditorCommand, NestedCommand, ServeCommand, TablesCommand};
pub use conf::{EditorConf, WarehouseConf};
pub use errors::{EditorError, EditorResult};
pub use site::{Site, SiteBuilder, SiteError};

pub mod driver;
pub mod handler;

pub use driver::{BrowserContext, Locator, Page, Session, StorageState, WaitUntil};
pub use handler::{AuthHandler, BlockHandler, BlockNameResolver, FreeProbe, PageHandler};

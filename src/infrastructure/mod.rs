pub mod driver;

pub use driver::{BrowserDriver, CdpDriver};

pub mod browser;

pub use browser::CdpSession;

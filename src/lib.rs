//! kiroku - transparent HTTP traffic capture into HAR archives
//!
//! Wrap a `reqwest::Client` in a [`HarTransport`] and every request sent
//! through it lands in a HAR 1.2 file, written incrementally by a
//! [`HarWriter`].
//!
//! ```no_run
//! use kiroku::{HarTransport, HarWriter, Transport};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let writer = HarWriter::open("session.har")?.shared();
//! let transport = HarTransport::new(reqwest::Client::new(), writer);
//!
//! let request = reqwest::Request::new(
//!     reqwest::Method::GET,
//!     "https://httpbin.org/ip".parse()?,
//! );
//! let response = transport.execute(request).await?;
//! println!("{}", response.text().await?);
//!
//! transport.close()?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod convert;
pub mod error;
pub mod har;
pub mod output;
pub mod record;
pub mod writer;

pub use capture::{HarTransport, Transport};
pub use error::{Error, Result};
pub use writer::{HarWriter, Separator, SharedWriter, WriterOptions};

//! # sluice-testing
//!
//! Test infrastructure for sluice pools.
//!
//! [`MockManager`] is an in-memory [`ConnectionManager`](sluice_pool::ConnectionManager)
//! that records what the pool asks of it and can fail, hang or panic at each
//! lifecycle step on demand. The pool behaviour suites in this crate's
//! `tests/` directory run against it, so they need no database server.
//!
//! ```rust,ignore
//! use sluice_testing::{Fault, MockManager, Step};
//!
//! let manager = MockManager::new();
//! manager.fail(Step::Ping, Fault::Error);
//!
//! let pool = Pool::new(manager.clone(), config)?;
//! assert!(!pool.check_health().await.healthy);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock;

pub use mock::{Fault, MockConnection, MockError, MockManager, Step};

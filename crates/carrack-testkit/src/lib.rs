//! Carrack Testing Infrastructure
//!
//! Common setup for tests that need a device runtime, a communicator
//! registry and a transfer engine, plus proptest strategies for element
//! types, shapes and host arrays.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! carrack-testkit = { path = "../carrack-testkit" }
//! ```
//!
//! ```rust,ignore
//! use carrack_testkit::*;
//!
//! #[tokio::test]
//! async fn moves_data() {
//!     let fixture = TransferFixture::new(2);
//!     let src = fixture.upload(DeviceId(0), &[4], &[1i32, 2, 3, 4]);
//!     let dst = fixture.engine().transfer_to(&src, DeviceId(1)).unwrap();
//!     assert_host_eq(&dst.to_host().await.unwrap(), &src.to_host().await.unwrap());
//! }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod assertions;
pub mod fixtures;
pub mod producers;
pub mod strategies;

pub use assertions::*;
pub use fixtures::{TransferFixture, TransferFixtureBuilder};
pub use producers::delayed_fill;

pub use carrack_core::{DeviceId, ElementType, HostArray, Region};

/// Install a test-friendly subscriber once; later calls do nothing
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

//! Multi-writer test harness.
//!
//! Wires real sessions to a shared store so integration tests can drive
//! several collaborators against one dataset and watch them converge.

pub mod flaky;
pub mod network;
pub mod peer;

pub use flaky::FlakyStore;
pub use network::TestNetwork;
pub use peer::{test_config, TestPeer};

use std::time::{Duration, Instant};

use coframe_core::{CoreError, Table};

/// Polls `check` until it holds or `deadline` elapses, then checks once more.
///
/// Background tasks run on their own cadence, so assertions about their
/// effects must tolerate scheduling delay.
pub fn eventually(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

/// Builds an all-null table with rows `1..=rows` and the given columns.
pub fn grid(rows: i64, columns: &[&str]) -> Result<Table, CoreError> {
    Table::new(
        (1..=rows).collect(),
        columns.iter().map(|c| c.to_string()).collect(),
    )
}

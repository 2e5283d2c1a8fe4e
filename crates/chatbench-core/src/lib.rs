//! Load generation core: worker-pool dispatch, aggregation and the run driver.

pub mod aggregate;
pub mod dispatch;
pub mod driver;

pub use aggregate::{aggregate, AggregateReport};
pub use dispatch::{dispatch, ReservationCounter, RunResults, Slot};
pub use driver::{RunDriver, RunSummary};

//! Child-record resolution.
//!
//! Fetching is explicit: selecting a parent never triggers a request. A
//! request names every child object related to the parent in the phase and
//! is answered asynchronously, one response per child object, keyed by
//! [`FetchKey`]. The child count of a parent is stable once every key of
//! that parent has left the `Requested` state.

mod child;
mod config;
mod fetcher;
mod state;

pub use child::{ApplyReport, ChildRecordResolver};
pub use config::{
    ResolverConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_COUNT_TIMEOUT, DEFAULT_FETCH_TIMEOUT,
};
pub use fetcher::{ChildConfig, ChildFetchRequest, ChildFetcher};
pub use state::{FetchKey, FetchResponse, FetchState};

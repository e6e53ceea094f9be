//! Status monitor
//!
//! Time-bucketed attempt outcomes per API format, exposed as an admin
//! timeline and a reduced public one.

pub mod monitor;

pub use monitor::{
    AttemptOutcome, BucketStatus, BucketView, FormatTimeline, PublicBucket, PublicFormatTimeline,
    PublicStatusTimeline, StatusMonitor, StatusTimeline,
};

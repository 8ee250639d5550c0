#![recursion_limit = "256"]
//! Partner case transforms.
//!
//! Each transform takes a canonical message whose metadata holds a helpline
//! case payload, rebuilds it in the partner's wire format and submits it.
//! Every expected failure comes back as an error-shaped [`Delivery`].

pub mod ceemis;
pub mod cpims;
pub mod eemis;
mod rows;

use metrics::counter;
use ucg_core::{Delivery, Partner};

pub use ceemis::{CeemisAction, CeemisConfig, CeemisTransform};
pub use cpims::{CpimsConfig, CpimsTransform, GeoIndex};
pub use eemis::{EemisConfig, EemisTransform};

fn record_submission(partner: Partner, delivery: &Delivery) {
    counter!(
        "ucg_transform_submissions_total",
        "partner" => partner.as_str(),
        "status" => delivery.status.as_str()
    )
    .increment(1);
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

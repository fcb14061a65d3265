//! SNTP glue: `sntp_connect` shares the regular connect path and tags the
//! protocol discriminator so a completed round-trip surfaces as
//! `MG_EV_SNTP_TIME` instead of a raw read event.
//!
//! The SNTP packet decoder itself is an external collaborator and is not
//! implemented here.

use crate::connection::Protocol;

pub fn protocol() -> Protocol {
    Protocol::Sntp
}

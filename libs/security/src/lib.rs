//! Organisation authentication for the web-form surface: one-time email
//! codes, long-lived organisation tokens and the request gate that checks
//! them.

pub mod gate;
pub mod jwt;
pub mod org;
pub mod otp;

pub use gate::{AuthGate, GateRejection, OrgContext, require_org, requires_auth};
pub use jwt::{IssuedToken, OrgClaims, OrgTokenSigner, TOKEN_TTL};
pub use org::{MemoryOrganisationStore, Organisation, OrganisationStore, SharedOrganisationStore};
pub use otp::{
    IssuedOtp, LoggingNotifier, MemoryOtpStore, OTP_TTL, OtpError, OtpNotifier, OtpStore,
    SharedOtpNotifier, SharedOtpStore,
};

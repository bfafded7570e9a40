pub mod rm;
pub mod signup_request;

pub use rm::{RelationshipManager, RmStatus};
pub use signup_request::{
    ChannelKind, ChannelState, SignupRequest, SignupStatus, REQUIRED_DOCUMENT_KINDS,
};

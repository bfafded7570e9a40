pub mod channels;
pub mod database;
pub mod documents;
pub mod error;
pub mod otp;
pub mod registrar;
pub mod signup;
pub mod store;

pub use channels::{
    ChannelError, FailingOtpSender, MockOtpSender, OtpSender, SmsGateway, SmtpOtpMailer,
};
pub use database::{PgRmDirectory, PgSignupStore};
pub use documents::{DocumentStorage, LocalDocumentStorage, MockDocumentStorage, StorageError};
pub use error::SignupError;
pub use registrar::RmRegistrar;
pub use signup::{
    InitiatedSignup, NewSignup, OtpSettings, SignupService, StatusSnapshot, VerificationOutcome,
};
pub use store::{
    InMemoryRmDirectory, InMemorySignupStore, RmDirectory, SignupRequestStore, StoreError,
};

pub mod password;
pub mod validation;

pub use password::{hash_password, Password, PasswordHashString};
pub use validation::ValidatedJson;

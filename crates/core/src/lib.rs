pub mod config;
pub mod error;
pub mod pkce;
pub mod request;
pub mod restrictions;
pub mod server;
pub mod session;
pub mod state;
pub mod store;
pub mod userinfo;

pub use config::AuthConfig;
pub use error::AuthError;
pub use request::{AuthorizationRequest, CallbackParams};
pub use restrictions::Restrictions;
pub use server::{AuthorizationServer, HttpAuthorizationServer};
pub use session::{AuthSession, SessionSnapshot, SessionStatus};
pub use state::{AuthState, ErrorDetail, TokenResponse};
pub use store::{FileStateStore, MemoryStateStore, StateStore};
pub use userinfo::{UserInfoClient, UserInfoOutcome, UserProfile};

pub mod callback;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod session;
pub mod storage;
pub mod types;

pub use callback::CallbackServer;
pub use error::AuthError;
pub use flow::AuthFlow;
pub use session::{AuthState, SessionManager, SessionNotice, SessionSnapshot};
pub use storage::{FileStorage, MemoryStorage, PkceStore, StorageBackend, TokenStore};
pub use types::{
    AuthConfig, AuthorizeRequest, CallbackParams, PkceChallenge, StoredTokens, TokenResponse,
};

mod agent;
mod blob;
mod body;
mod decode;
mod error;
mod fetch;
mod form;
mod request;
mod response;

pub use agent::{Agent, AgentOptions, GOFER_VERSION, USER_AGENT};
pub use blob::Blob;
pub use body::{Body, BodyHolder, ByteStream};
pub use error::{ErrorFamily, FetchError, FetchErrorKind};
pub use fetch::{fetch, fetch_request};
pub use form::{Form, Multipart};
pub use request::{RedirectPolicy, Request, RequestInit};
pub use response::{Response, ResponseInit};

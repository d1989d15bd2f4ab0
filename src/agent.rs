use std::{fmt::Debug, sync::OnceLock};

use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
	client::legacy::{Client, connect::HttpConnector},
	rt::TokioExecutor,
};

use crate::body::OutboundBody;

pub const GOFER_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const USER_AGENT: &str = concat!("gofer/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
	pub user_agent: Option<String>,
}

/// A connection pool plus the per-pool defaults applied at dispatch.
///
/// Agents are cheap to clone (the pool is shared) and opaque to the rest
/// of the core: requests are dispatched through one, never mutate it. A
/// process-wide agent is used when a request names none.
#[derive(Clone)]
pub struct Agent {
	pub(crate) client: Client<HttpsConnector<HttpConnector>, OutboundBody>,
	pub(crate) user_agent: String,
}

impl Agent {
	pub fn new() -> Self {
		Self::with_options(AgentOptions::default())
	}

	pub fn with_options(options: AgentOptions) -> Self {
		let connector = HttpsConnectorBuilder::new()
			.with_webpki_roots()
			.https_or_http()
			.enable_http1()
			.build();
		let client = Client::builder(TokioExecutor::new()).build(connector);

		Self {
			client,
			user_agent: options.user_agent.unwrap_or_else(|| USER_AGENT.to_owned()),
		}
	}

	pub(crate) fn shared() -> Self {
		static SHARED: OnceLock<Agent> = OnceLock::new();
		SHARED.get_or_init(Self::new).clone()
	}
}

impl Default for Agent {
	fn default() -> Self {
		Self::new()
	}
}

impl Debug for Agent {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Agent")
			.field("user_agent", &self.user_agent)
			.finish_non_exhaustive()
	}
}

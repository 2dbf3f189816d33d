//! Dispatch driver for inbound requests and notifications.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::inbox::InboundMessage;
use crate::session::Session;
use crate::{Error, Result};

impl Session {
	/// Pulls inbound messages until end-of-stream, running `handler` for each one as a task on
	/// `runtime`.
	///
	/// Every message gets its own task so a handler may issue nested requests over this session
	/// (including ones that make the peer call back into us) while the loop keeps receiving.
	/// Handler failures are logged and do not stop the loop. Returns after end-of-stream once all
	/// handler tasks have finished.
	///
	/// # Errors
	///
	/// Whatever [`Session::next_message`] reports; handler tasks still running are aborted.
	pub async fn serve<H, Fut>(&self, runtime: &Handle, handler: H) -> Result<()>
	where
		H: Fn(Session, InboundMessage) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		let handler = Arc::new(handler);
		let mut tasks = JoinSet::new();

		loop {
			let msg = match self.next_message().await {
				Ok(Some(msg)) => msg,
				Ok(None) => break,
				Err(err) => {
					error!(error = %err, in_flight = tasks.len(), "rpc.serve.failed");
					tasks.abort_all();
					return Err(err);
				}
			};

			let session = self.clone();
			let handler = Arc::clone(&handler);
			tasks.spawn_on(
				async move {
					let method = msg.method().to_owned();
					let id = msg.id();
					if let Err(err) = handler(session, msg).await {
						log_handler_error(&method, id, &err);
					}
				},
				runtime,
			);

			while let Some(joined) = tasks.try_join_next() {
				if let Err(err) = joined {
					error!(error = %err, "rpc.serve.handler_panicked");
				}
			}
		}

		debug!(in_flight = tasks.len(), "rpc.serve.eof");
		while let Some(joined) = tasks.join_next().await {
			if let Err(err) = joined {
				error!(error = %err, "rpc.serve.handler_panicked");
			}
		}
		Ok(())
	}
}

fn log_handler_error(method: &str, id: Option<u32>, err: &Error) {
	match err {
		Error::ConnectionClosed => debug!(method, id, "rpc.serve.handler_disconnected"),
		_ => warn!(method, id, error = %err, "rpc.serve.handler_failed"),
	}
}

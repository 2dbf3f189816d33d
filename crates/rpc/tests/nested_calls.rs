//! Two sessions wired back to back, each serving the other.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use xeno_msgpack_rpc::{Error, InboundMessage, Result, Session, Value};

fn connected() -> (Session, Session) {
	let _ = tracing_subscriber::fmt::try_init();
	let (a, b) = tokio::io::duplex(64 * 1024);
	(Session::from_stream(a), Session::from_stream(b))
}

fn invalid_method(msg: &InboundMessage) -> Value {
	Value::Array(vec![Value::from(0), Value::from(format!("Invalid method name: {}", msg.method()))])
}

/// Computes `n!` by asking the peer for `(n - 1)!`.
async fn factorial(session: Session, msg: InboundMessage) -> Result<()> {
	if msg.method() != "factorial" {
		return msg.reply_error(invalid_method(&msg)).await;
	}
	let n = msg.args().first().and_then(Value::as_u64).unwrap_or(0);
	if n <= 1 {
		return msg.reply(Value::from(1)).await;
	}
	let rest = session.request("factorial", vec![Value::from(n - 1)]).await?;
	let rest = rest.as_u64().ok_or(Error::Usage("factorial answered with a non-integer"))?;
	msg.reply(Value::from(n * rest)).await
}

fn serve_in_background(session: &Session) -> tokio::task::JoinHandle<Result<()>> {
	let session = session.clone();
	tokio::spawn(async move { session.serve(&Handle::current(), factorial).await })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nested_calls_bounce_between_peers() {
	let (client, server) = connected();
	let client_loop = serve_in_background(&client);
	let server_loop = serve_in_background(&server);

	let result = tokio::time::timeout(Duration::from_secs(10), client.request("factorial", vec![Value::from(12)]))
		.await
		.expect("nested calls deadlocked")
		.unwrap();
	assert_eq!(result.as_u64(), Some(479_001_600));

	client.close().await.unwrap();
	server_loop.await.unwrap().unwrap();
	client_loop.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_method_is_answered_with_error() {
	let (client, server) = connected();
	let server_loop = serve_in_background(&server);

	let err = client.request("sqrt", vec![Value::from(4)]).await.unwrap_err();
	assert_eq!(err.remote_code_message(), Some((0, "Invalid method name: sqrt")));

	drop(client);
	server_loop.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn notifications_and_requests_share_the_stream() {
	let (client, server) = connected();
	let (logged_tx, mut logged) = mpsc::unbounded_channel();

	let server_loop = tokio::spawn({
		let server = server.clone();
		async move {
			server
				.serve(&Handle::current(), move |_, msg| {
					let logged_tx = logged_tx.clone();
					async move {
						match msg.method() {
							"log" => {
								let line = msg.args().first().and_then(Value::as_str).unwrap_or_default().to_owned();
								let _ = logged_tx.send(line);
								Ok(())
							}
							"add" => {
								let sum: u64 = msg.args().iter().filter_map(Value::as_u64).sum();
								msg.reply(Value::from(sum)).await
							}
							_ => msg.reply_error(invalid_method(&msg)).await,
						}
					}
				})
				.await
		}
	});

	client.notify("log", vec![Value::from("hello")]).await.unwrap();
	let sum = client.request("add", vec![Value::from(3), Value::from(3)]).await.unwrap();
	assert_eq!(sum.as_u64(), Some(6));
	assert_eq!(logged.recv().await.as_deref(), Some("hello"));

	client.close().await.unwrap();
	server_loop.await.unwrap().unwrap();
	assert!(server.at_eof());
}

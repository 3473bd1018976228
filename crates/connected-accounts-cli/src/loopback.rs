//! Loopback callback server for interactive `connect`.

use anyhow::{bail, Context};
use connected_accounts::CallbackRequest;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

const CALLBACK_PATH: &str = "/callback";

pub struct CallbackServer {
    listener: TcpListener,
    callback_url: String,
}

impl CallbackServer {
    /// Listen on a random free port on 127.0.0.1.
    pub async fn bind() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind local callback server")?;
        let port = listener
            .local_addr()
            .context("failed to get local address")?
            .port();

        let callback_url = format!("http://127.0.0.1:{}{}", port, CALLBACK_PATH);
        info!("OAuth callback server listening on {}", callback_url);
        Ok(Self { listener, callback_url })
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    /// Wait for the provider to redirect the browser back.
    pub async fn wait(self, timeout_secs: u64) -> anyhow::Result<CallbackRequest> {
        let received = timeout(Duration::from_secs(timeout_secs), async {
            loop {
                let (mut socket, _) = self.listener.accept().await?;

                let mut reader = BufReader::new(&mut socket);
                let mut request_line = String::new();
                reader.read_line(&mut request_line).await?;

                // "GET /callback?query HTTP/1.1"
                let Some(target) = request_line.split_whitespace().nth(1) else {
                    continue;
                };
                let (path, query) = target.split_once('?').unwrap_or((target, ""));
                if path != CALLBACK_PATH {
                    debug!("Ignoring request for {}", path);
                    send_response(&mut socket, "404 Not Found", page("Not found")).await?;
                    continue;
                }

                send_response(
                    &mut socket,
                    "200 OK",
                    page("Authorization received. You can close this tab."),
                )
                .await?;
                return Ok::<_, std::io::Error>(query.to_string());
            }
        })
        .await;

        let query = match received {
            Ok(result) => result.context("callback server error")?,
            Err(_) => bail!("OAuth flow timed out after {} seconds", timeout_secs),
        };
        Ok(CallbackRequest::from_query(self.callback_url, &query))
    }
}

/// Send HTTP response to the browser
async fn send_response(socket: &mut TcpStream, status: &str, html: String) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        html.len(),
        html
    );
    socket.write_all(response.as_bytes()).await?;
    socket.flush().await
}

fn page(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Connected Accounts</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 20vh">
    <h1>Connected Accounts</h1>
    <p>{}</p>
</body>
</html>"#,
        message
    )
}

//! Firmware HTTP client.
//!
//! Async client using `reqwest`. Every call takes the endpoint explicitly so
//! a single client survives the device moving between addresses.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use kulucka_protocol::constants::{MODE_CHANGE_PATH, STATUS_PATH};
use kulucka_protocol::{DeviceStatus, Endpoint, ModeChangeRequest, ModeChangeResponse};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::DeviceError;

/// Default per-request timeout. The firmware answers in well under a second
/// when it is reachable at all.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// The firmware endpoints used while the device changes networks.
///
/// Implemented over HTTP by [`HttpDeviceClient`]; tests provide scripted
/// implementations.
pub trait DeviceApi: Send + Sync {
    /// Asks the device to switch its WiFi mode.
    fn request_mode_change<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        request: &'a ModeChangeRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ModeChangeResponse, DeviceError>> + Send + 'a>>;

    /// Fetches the current network status, confirming the device identity.
    fn fetch_status<'a>(
        &'a self,
        endpoint: &'a Endpoint,
    ) -> Pin<Box<dyn Future<Output = Result<DeviceStatus, DeviceError>> + Send + 'a>>;
}

/// `reqwest`-backed firmware client.
pub struct HttpDeviceClient {
    http: reqwest::Client,
}

impl HttpDeviceClient {
    /// Creates a client with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, DeviceError> {
        // The device lives on the LAN; a system proxy would only get in the way.
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { http })
    }

    /// Performs a GET and decodes the JSON body.
    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        path: &str,
    ) -> Result<T, DeviceError> {
        let url = format!("{}{path}", endpoint.base_url());
        trace!(%url, "GET");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(DeviceError::from_transport)?;
        decode(resp).await
    }

    /// Performs a POST with a JSON body and decodes the JSON reply.
    async fn post<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        path: &str,
        body: &B,
    ) -> Result<T, DeviceError> {
        let url = format!("{}{path}", endpoint.base_url());
        trace!(%url, "POST");
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(DeviceError::from_transport)?;
        decode(resp).await
    }

    /// Asks the device to switch its WiFi mode.
    pub async fn request_mode_change(
        &self,
        endpoint: &Endpoint,
        request: &ModeChangeRequest,
    ) -> Result<ModeChangeResponse, DeviceError> {
        let resp: ModeChangeResponse = self.post(endpoint, MODE_CHANGE_PATH, request).await?;
        debug!(
            host = %endpoint.host,
            target = %request.mode,
            success = resp.success,
            new_ip = ?resp.new_ip,
            estimated_time = ?resp.estimated_time,
            "mode change acknowledged"
        );
        Ok(resp)
    }

    /// Fetches the device's network status.
    pub async fn fetch_status(&self, endpoint: &Endpoint) -> Result<DeviceStatus, DeviceError> {
        self.get(endpoint, STATUS_PATH).await
    }
}

impl DeviceApi for HttpDeviceClient {
    fn request_mode_change<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        request: &'a ModeChangeRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ModeChangeResponse, DeviceError>> + Send + 'a>> {
        Box::pin(HttpDeviceClient::request_mode_change(self, endpoint, request))
    }

    fn fetch_status<'a>(
        &'a self,
        endpoint: &'a Endpoint,
    ) -> Pin<Box<dyn Future<Output = Result<DeviceStatus, DeviceError>> + Send + 'a>> {
        Box::pin(HttpDeviceClient::fetch_status(self, endpoint))
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, DeviceError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(DeviceError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = resp.bytes().await.map_err(DeviceError::from_transport)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use kulucka_protocol::NetworkMode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Serves exactly one HTTP response and hands back the raw request.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (Endpoint, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let reply = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(reply.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            request
        });
        (local_endpoint(port), handle)
    }

    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= head_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8(data).unwrap()
    }

    fn local_endpoint(port: u16) -> Endpoint {
        Endpoint {
            host: "127.0.0.1".into(),
            port,
            mode: NetworkMode::Unknown,
        }
    }

    fn client() -> HttpDeviceClient {
        HttpDeviceClient::new(Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn fetch_status_parses_body() {
        let (endpoint, server) = serve_once(
            "200 OK",
            r#"{"mode":"station","ip":"192.168.1.42","connected":true,"deviceId":"esp32-1"}"#,
        )
        .await;

        let status = client().fetch_status(&endpoint).await.unwrap();
        assert_eq!(status.mode, NetworkMode::Station);
        assert_eq!(status.ip, "192.168.1.42");
        assert!(status.connected);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/wifi/status HTTP/1.1"));
    }

    #[tokio::test]
    async fn mode_change_posts_json() {
        let (endpoint, server) = serve_once(
            "200 OK",
            r#"{"success":true,"newIp":"192.168.1.42","estimatedTime":5}"#,
        )
        .await;

        let req = ModeChangeRequest::new(NetworkMode::Station, None);
        let resp = client().request_mode_change(&endpoint, &req).await.unwrap();
        assert!(resp.success);
        assert_eq!(resp.new_ip_hint(), Some("192.168.1.42"));
        assert_eq!(resp.estimated_delay(), Some(Duration::from_secs(5)));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/wifi/mode HTTP/1.1"));
        assert!(request.ends_with(r#"{"mode":"station"}"#));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let (endpoint, _server) = serve_once("404 Not Found", r#"{"error":"nope"}"#).await;

        let err = client().fetch_status(&endpoint).await.unwrap_err();
        match err {
            DeviceError::Status { status, ref body } => {
                assert_eq!(status, 404);
                assert!(body.contains("nope"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!err.is_unreachable());
    }

    #[tokio::test]
    async fn invalid_json_is_reported() {
        let (endpoint, _server) = serve_once("200 OK", "<html>router login</html>").await;

        let err = client().fetch_status(&endpoint).await.unwrap_err();
        assert!(matches!(err, DeviceError::Json(_)));
        assert!(!err.is_unreachable());
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = client()
            .fetch_status(&local_endpoint(port))
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _hold = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let client = HttpDeviceClient::new(Duration::from_millis(200)).unwrap();
        let err = client.fetch_status(&local_endpoint(port)).await.unwrap_err();
        assert!(matches!(err, DeviceError::Timeout));
        assert!(err.is_unreachable());
    }
}

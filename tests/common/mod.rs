//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use frame_server::{
    CallbackError, ClientConnection, ClientEventListener, FrameServer, HttpFrame, HttpFrameSource,
    ServerConfig, ServerError, Shutdown,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

pub const OK_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";

/// Config suited to tests: short timeouts, everything else default.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.timeouts.idle_secs = 5;
    config.timeouts.shutdown_secs = 1;
    config
}

/// Listener that records what it sees and optionally answers requests.
#[derive(Default)]
pub struct Recorder {
    requests: Mutex<Vec<String>>,
    responses: Mutex<Vec<u16>>,
    reply: bool,
}

impl Recorder {
    pub fn replying() -> Arc<Self> {
        Arc::new(Self {
            reply: true,
            ..Self::default()
        })
    }

    #[allow(dead_code)]
    pub fn silent() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `"METHOD URI"` for every request, in delivery order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn responses(&self) -> Vec<u16> {
        self.responses.lock().unwrap().clone()
    }
}

impl ClientEventListener<HttpFrame> for Recorder {
    fn on_request_received(
        &self,
        client: &ClientConnection,
        frame: &HttpFrame,
    ) -> Result<(), CallbackError> {
        self.requests
            .lock()
            .unwrap()
            .push(format!("{} {}", frame.method(), frame.uri()));
        if self.reply {
            client.write(OK_RESPONSE).map_err(CallbackError::new)?;
        }
        Ok(())
    }

    fn on_response_received(
        &self,
        _client: &ClientConnection,
        frame: &HttpFrame,
    ) -> Result<(), CallbackError> {
        self.responses
            .lock()
            .unwrap()
            .push(frame.status_code().unwrap_or_default());
        Ok(())
    }
}

/// A server running on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Shutdown,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    /// Trigger shutdown and wait for the server to stop.
    pub async fn stop(self) -> Result<(), ServerError> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }
}

/// Run `server`, binding 127.0.0.1 on an ephemeral port unless it is already listening.
pub fn start(mut server: FrameServer<HttpFrameSource>) -> TestServer {
    let addr = match server.local_addr() {
        Some(addr) => addr,
        None => server.bind("127.0.0.1", 0).expect("bind"),
    };
    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    let handle = tokio::spawn(server.run(receiver));
    TestServer {
        addr,
        shutdown,
        handle,
    }
}

/// Start an HTTP server with `recorder` as its only listener.
pub fn start_recording(recorder: Arc<Recorder>) -> TestServer {
    let mut server = FrameServer::http(test_config());
    server.add_client_event_listener(recorder);
    start(server)
}

/// Read until the server closes the connection. A reset counts as closed.
pub async fn read_until_closed<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut received = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), async {
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
            }
        }
    })
    .await;
    assert!(read.is_ok(), "connection was not closed by the server");
    received
}

/// Connect and send `data` in one write.
pub async fn send(addr: SocketAddr, data: &[u8]) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(data).await.expect("write");
    stream
}

/// Root CA, an intermediate it signed, and a `localhost` leaf signed by the intermediate.
pub struct TestPki {
    pub root: rcgen::Certificate,
    pub intermediate: rcgen::Certificate,
    pub leaf: rcgen::Certificate,
    leaf_key: rcgen::KeyPair,
}

fn ca_params(common_name: &str) -> rcgen::CertificateParams {
    let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).expect("ca params");
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);
    params
}

impl TestPki {
    pub fn generate() -> Self {
        let root_key = rcgen::KeyPair::generate().expect("root key");
        let root = ca_params("frame-server test root")
            .self_signed(&root_key)
            .expect("root cert");

        let intermediate_key = rcgen::KeyPair::generate().expect("intermediate key");
        let intermediate = ca_params("frame-server test intermediate")
            .signed_by(&intermediate_key, &root, &root_key)
            .expect("intermediate cert");

        let leaf_key = rcgen::KeyPair::generate().expect("leaf key");
        let mut leaf_params =
            rcgen::CertificateParams::new(vec!["localhost".to_string()]).expect("leaf params");
        leaf_params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "localhost");
        let leaf = leaf_params
            .signed_by(&leaf_key, &intermediate, &intermediate_key)
            .expect("leaf cert");

        Self {
            root,
            intermediate,
            leaf,
            leaf_key,
        }
    }

    /// Leaf followed by the intermediate.
    pub fn chain(&self) -> Vec<CertificateDer<'static>> {
        vec![self.leaf.der().clone(), self.intermediate.der().clone()]
    }

    pub fn leaf_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.leaf_key.serialize_der()))
    }

    /// Client connector that trusts only the root.
    pub fn connector(&self) -> tokio_rustls::TlsConnector {
        let mut roots = rustls::RootCertStore::empty();
        roots.add(self.root.der().clone()).expect("root");
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .expect("protocol versions")
            .with_root_certificates(roots)
            .with_no_client_auth();
        tokio_rustls::TlsConnector::from(Arc::new(config))
    }
}

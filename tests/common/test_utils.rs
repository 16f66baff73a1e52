//! Stand-ins for the engine process: a shell script speaking the stream
//! protocol and a loopback HTTP server speaking the command protocol.

use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Creates a temporary file with the given content.
///
/// The file is removed when the returned `NamedTempFile` is dropped.
pub fn create_temp_file(content: &[u8]) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

/// Shell script that answers like the engine in pipe mode.
///
/// Every response ends with a NUL byte. Special commands:
/// - `?V`: version line
/// - `stray`: a response followed by bytes nobody asked for
/// - `big`: 600000 bytes, more than the initial buffer
/// - `huge`: 5000000 bytes, more than the maximum buffer
/// - `hang`: never answers
/// - `q!`: exits
///
/// Anything else is echoed back with trailing whitespace.
pub const MOCK_ENGINE_SCRIPT: &str = r#"printf '\000'
while IFS= read -r cmd; do
  case "$cmd" in
    'q!') exit 0 ;;
    '?V') printf '5.9.8-mock\n\000' ;;
    'e scr.color=false') printf '\000' ;;
    'stray') printf 'first\000leftover' ;;
    'big') head -c 600000 /dev/zero | tr '\000' 'A'; printf '\000' ;;
    'huge') head -c 5000000 /dev/zero | tr '\000' 'B'; printf '\000' ;;
    'hang') sleep 60 ;;
    *) printf '%s  \n\000' "$cmd" ;;
  esac
done
"#;

/// Script that exits before producing the startup frame.
pub const DEAD_ENGINE_SCRIPT: &str = "exit 3\n";

/// Writes [`MOCK_ENGINE_SCRIPT`] to a temporary file for `sh` to run.
pub fn mock_engine_script() -> NamedTempFile {
    create_temp_file(MOCK_ENGINE_SCRIPT.as_bytes())
}

/// A loopback HTTP server imitating the engine's `/cmd/` endpoint.
///
/// `/cmd/fail` answers 500, `/cmd/slow` answers after a delay, every other
/// command is echoed back (percent-decoded, with trailing whitespace).
pub struct MockHttpServer {
    pub base_url: String,
    pub paths: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl MockHttpServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let paths = Arc::new(Mutex::new(Vec::new()));
        let recorded = paths.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve_connection(socket, recorded.clone()));
            }
        });
        Self {
            base_url: format!("http://{}", addr),
            paths,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.base_url
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap()
    }

    pub fn recorded(&self) -> Vec<String> {
        self.paths.lock().clone()
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(mut socket: TcpStream, paths: Arc<Mutex<Vec<String>>>) {
    let mut pending = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let head_end = loop {
            if let Some(pos) = find_head_end(&pending) {
                break pos;
            }
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => pending.extend_from_slice(&buf[..n]),
            }
        };
        let head = String::from_utf8_lossy(&pending[..head_end]).into_owned();
        pending.drain(..head_end + 4);

        let path = head
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or("/")
            .to_string();
        paths.lock().push(path.clone());

        let command = percent_decode(path.strip_prefix("/cmd/").unwrap_or(""));
        let (status, body) = match command.as_str() {
            "fail" => ("500 Internal Server Error", String::new()),
            "slow" => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                ("200 OK", "done\n".to_string())
            }
            "hang" => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                ("200 OK", String::new())
            }
            other => ("200 OK", format!("{}  \n", other)),
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        if socket.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn percent_decode(text: &str) -> String {
    percent_encoding::percent_decode_str(text)
        .decode_utf8_lossy()
        .into_owned()
}

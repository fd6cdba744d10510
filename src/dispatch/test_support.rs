use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

/// Canned behaviour of the stub inference endpoint.
#[derive(Debug, Clone)]
pub(crate) enum StubReply {
    /// Streams `tokens` content events after `first_delay`, `gap` apart,
    /// then `[DONE]` when `done` is set.
    Stream {
        first_delay: Duration,
        tokens: usize,
        gap: Duration,
        done: bool,
    },
    /// Answers with the given status and a JSON error body.
    Status(u16),
    /// Streams one event whose payload is not JSON.
    Garbage,
    /// Streams one error envelope.
    ErrorEnvelope,
}

pub(crate) struct StubServer {
    pub(crate) base_url: String,
    bodies: Arc<Mutex<Vec<String>>>,
    shutdown: mpsc::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl StubServer {
    /// Request bodies received so far, in arrival order.
    pub(crate) fn bodies(&self) -> Vec<String> {
        match self.bodies.lock() {
            Ok(bodies) => bodies.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        let _send_result = self.shutdown.send(());
        if let Some(handle) = self.thread.take() {
            drop(handle.join());
        }
    }
}

/// Spawn a thread-per-connection SSE endpoint on a random local port.
pub(crate) fn spawn_stub(reply: StubReply) -> Result<StubServer, String> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .map_err(|err| format!("bind stub server failed: {}", err))?;
    let addr = listener
        .local_addr()
        .map_err(|err| format!("stub addr failed: {}", err))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| format!("set_nonblocking failed: {}", err))?;

    let bodies = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&bodies);
    let (shutdown_tx, shutdown_rx) = mpsc::channel();

    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    let reply = reply.clone();
                    let recorded = Arc::clone(&recorded);
                    thread::spawn(move || handle_client(stream, &reply, &recorded));
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(_) => break,
            }
        }
    });

    Ok(StubServer {
        base_url: format!("http://{}/v1", addr),
        bodies,
        shutdown: shutdown_tx,
        thread: Some(handle),
    })
}

fn handle_client(mut stream: TcpStream, reply: &StubReply, recorded: &Mutex<Vec<String>>) {
    if stream.set_nonblocking(false).is_err() {
        return;
    }
    let Some(body) = read_request(&mut stream) else {
        return;
    };
    if let Ok(mut bodies) = recorded.lock() {
        bodies.push(body);
    }

    match reply {
        StubReply::Stream {
            first_delay,
            tokens,
            gap,
            done,
        } => {
            if !write_all(&mut stream, STREAM_HEAD) {
                return;
            }
            thread::sleep(*first_delay);
            for index in 0..*tokens {
                if index > 0 {
                    thread::sleep(*gap);
                }
                let event = format!(
                    "data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"tok{}\"}}}}]}}\n\n",
                    index
                );
                if !write_all(&mut stream, event.as_bytes()) {
                    return;
                }
            }
            if *done && !write_all(&mut stream, b"data: [DONE]\n\n") {
                return;
            }
        }
        StubReply::Status(code) => {
            let body = "{\"error\":{\"message\":\"overloaded\"}}";
            let response = format!(
                "HTTP/1.1 {} Error\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                code,
                body.len(),
                body
            );
            if !write_all(&mut stream, response.as_bytes()) {
                return;
            }
        }
        StubReply::Garbage => {
            if !write_all(&mut stream, STREAM_HEAD) || !write_all(&mut stream, b"data: {not json\n\n")
            {
                return;
            }
        }
        StubReply::ErrorEnvelope => {
            if !write_all(&mut stream, STREAM_HEAD)
                || !write_all(
                    &mut stream,
                    b"data: {\"error\":{\"message\":\"model crashed\"}}\n\n",
                )
            {
                return;
            }
        }
    }
    drop(stream.shutdown(Shutdown::Both));
}

const STREAM_HEAD: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";

fn write_all(stream: &mut TcpStream, bytes: &[u8]) -> bool {
    stream.write_all(bytes).is_ok() && stream.flush().is_ok()
}

fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let read = stream.read(&mut chunk).ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(chunk.get(..read)?);
        if let Some(pos) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break pos.checked_add(4)?;
        }
    };

    let head = String::from_utf8_lossy(buffer.get(..header_end)?).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let total = header_end.checked_add(content_length)?;
    while buffer.len() < total {
        let read = stream.read(&mut chunk).ok()?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(chunk.get(..read)?);
    }
    Some(String::from_utf8_lossy(buffer.get(header_end..)?).into_owned())
}

//! Client pipeline controller.
//!
//! Downloads the word list in bounded chunks, keeping `batch` requests in
//! flight at once (1 = plain client, >1 = greedy client). Responses are
//! reassembled from the byte stream by counting newline-terminated
//! records; the in-band `EOF` token terminates the run. Transport failures
//! trigger bounded reconnects with increasing backoff, resuming from the
//! last acknowledged offset so the final output has no gaps and no
//! duplicates.

use crate::config::ClientConfig;
use crate::protocol::{RecvBuffer, EOF_TOKEN};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// The result of a completed download.
#[derive(Debug)]
pub struct Download {
    /// Every word received, in delivery order.
    pub words: Vec<String>,
    /// Wall-clock span from the first send to end-of-data detection.
    pub elapsed: Duration,
}

impl Download {
    /// Elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }

    /// Frequency of each distinct word, in first-seen order.
    pub fn tally(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for word in &self.words {
            let count = counts.entry(word.as_str()).or_insert(0);
            if *count == 0 {
                order.push(word);
            }
            *count += 1;
        }
        order
            .into_iter()
            .map(|w| (w.to_string(), counts[w]))
            .collect()
    }
}

/// Client-side failures.
#[derive(Debug)]
pub enum ClientError {
    /// Reconnect budget exhausted without completing the download.
    RetriesExhausted { attempts: u32, last: io::Error },
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::RetriesExhausted { attempts, last } => write!(
                f,
                "Giving up after {attempts} reconnect attempt(s): {last}"
            ),
        }
    }
}

impl std::error::Error for ClientError {}

/// Download the word list described by `config`.
pub fn run(config: &ClientConfig) -> Result<Download, ClientError> {
    Pipeline::new(config).run()
}

struct Pipeline<'a> {
    config: &'a ClientConfig,
    /// Words received so far, in order.
    words: Vec<String>,
    /// Offset of the oldest request that has not been answered yet.
    /// Advanced only on a complete response line, so a reconnect resumes
    /// exactly where acknowledged data stops.
    acked_offset: usize,
    recv: RecvBuffer,
    attempts: u32,
    started: Instant,
    finished: Option<Duration>,
}

impl<'a> Pipeline<'a> {
    fn new(config: &'a ClientConfig) -> Self {
        Self {
            config,
            words: Vec::new(),
            acked_offset: config.start_offset,
            recv: RecvBuffer::new(),
            attempts: 0,
            started: Instant::now(),
            finished: None,
        }
    }

    fn run(mut self) -> Result<Download, ClientError> {
        let mut stream = match TcpStream::connect(self.config.connect.as_str()) {
            Ok(stream) => stream,
            Err(e) => self.reconnect(e)?,
        };

        self.started = Instant::now();

        loop {
            match self.cycle(&mut stream) {
                Ok(()) => {
                    if let Some(elapsed) = self.finished {
                        return Ok(Download {
                            words: self.words,
                            elapsed,
                        });
                    }
                }
                Err(e) => {
                    stream = self.reconnect(e)?;
                }
            }
        }
    }

    /// One send/receive cycle: `batch` pipelined requests, then reads
    /// until every one is answered or the end-of-data token arrives.
    fn cycle(&mut self, stream: &mut TcpStream) -> io::Result<()> {
        let k = self.config.chunk_size;
        let batch = self.config.batch;

        let mut msg = String::new();
        for i in 0..batch {
            let offset = self.acked_offset + i * k;
            msg.push_str(&format!("{offset},{k}\n"));
        }
        debug!(
            first_offset = self.acked_offset,
            batch, chunk_size = k, "Sending batch"
        );
        stream.write_all(msg.as_bytes())?;

        let mut acked_in_batch = 0;
        let mut scratch = [0u8; 4096];
        while acked_in_batch < batch {
            let n = match stream.read(&mut scratch) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "server closed before end of data",
                    ));
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.recv.feed(&scratch[..n]);

            for line in self.recv.take_lines() {
                if self.absorb_line(&line) {
                    self.finished = Some(self.started.elapsed());
                    return Ok(());
                }
                acked_in_batch += 1;
                self.acked_offset += k;
                if acked_in_batch >= batch {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Record the words of one complete response line. Returns true when
    /// the line carries the end-of-data token; any words preceding the
    /// token in that same line are still incorporated.
    fn absorb_line(&mut self, line: &str) -> bool {
        let mut reached_end = false;
        for token in line.split(',') {
            let token = token.trim();
            if token == EOF_TOKEN {
                reached_end = true;
            } else if !token.is_empty() {
                self.words.push(token.to_string());
            }
        }
        reached_end
    }

    /// Bounded reconnect with increasing backoff. Any buffered partial
    /// line is discarded; the caller resumes from `acked_offset`.
    fn reconnect(&mut self, err: io::Error) -> Result<TcpStream, ClientError> {
        let mut last = err;
        while self.attempts < self.config.max_retries {
            self.attempts += 1;
            let backoff = Duration::from_millis(
                self.config.retry_backoff_ms * u64::from(self.attempts),
            );
            warn!(
                attempt = self.attempts,
                error = %last,
                backoff_ms = backoff.as_millis() as u64,
                "Transport failure, reconnecting"
            );
            std::thread::sleep(backoff);
            self.recv.clear();

            match TcpStream::connect(self.config.connect.as_str()) {
                Ok(stream) => {
                    debug!(resume_offset = self.acked_offset, "Reconnected");
                    return Ok(stream);
                }
                Err(e) => last = e,
            }
        }

        Err(ClientError::RetriesExhausted {
            attempts: self.attempts,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_response;
    use crate::words::WordStore;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    fn test_config(addr: std::net::SocketAddr, chunk_size: usize, batch: usize) -> ClientConfig {
        ClientConfig {
            connect: addr.to_string(),
            start_offset: 0,
            chunk_size,
            batch,
            max_retries: 3,
            retry_backoff_ms: 10,
            quiet: true,
            log_level: "info".to_string(),
        }
    }

    fn sample_store() -> WordStore {
        WordStore::from_words(
            ["cat", "bat", "cat", "dog", "dog", "emu", "emu", "emu", "ant"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    /// Serve one connection with real range semantics, closing after EOF.
    fn serve_connection(stream: std::net::TcpStream, store: &WordStore) {
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        let mut stream = stream;
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).unwrap_or(0) == 0 {
                return;
            }
            let request = match crate::protocol::parse_request(line.trim()) {
                Some(r) => r,
                None => {
                    let _ = stream.write_all(&encode_response(&[], true));
                    return;
                }
            };
            let (words, reached_end) = store.lookup(request.offset, request.count);
            let bytes = encode_response(words, reached_end);
            if stream.write_all(&bytes).is_err() {
                return;
            }
            if reached_end {
                return;
            }
        }
    }

    #[test]
    fn test_plain_client_reconstructs_list() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let store = sample_store();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            serve_connection(stream, &store);
        });

        let config = test_config(addr, 5, 1);
        let download = run(&config).expect("download");
        assert_eq!(
            download.words,
            vec!["cat", "bat", "cat", "dog", "dog", "emu", "emu", "emu", "ant"]
        );
        handle.join().expect("server thread");
    }

    #[test]
    fn test_greedy_client_batches() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let store = sample_store();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            serve_connection(stream, &store);
        });

        let config = test_config(addr, 2, 3);
        let download = run(&config).expect("download");
        assert_eq!(download.words.len(), 9);
        assert_eq!(download.words[8], "ant");
        handle.join().expect("server thread");
    }

    #[test]
    fn test_reconnect_resumes_without_gaps_or_duplicates() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let store = sample_store();
        let handle = thread::spawn(move || {
            // First connection: answer a single request, then drop the socket.
            let (stream, _) = listener.accept().expect("accept");
            {
                let mut reader = BufReader::new(stream.try_clone().expect("clone"));
                let mut stream = stream;
                let mut line = String::new();
                reader.read_line(&mut line).expect("read");
                let request = crate::protocol::parse_request(line.trim()).expect("request");
                assert_eq!(request.offset, 0);
                let (words, reached_end) = store.lookup(request.offset, request.count);
                stream
                    .write_all(&encode_response(words, reached_end))
                    .expect("write");
            }
            // Second connection: the client must resume at offset 5.
            let (stream, _) = listener.accept().expect("accept");
            serve_connection(stream, &store);
        });

        let config = test_config(addr, 5, 1);
        let download = run(&config).expect("download");
        assert_eq!(
            download.words,
            vec!["cat", "bat", "cat", "dog", "dog", "emu", "emu", "emu", "ant"]
        );
        handle.join().expect("server thread");
    }

    #[test]
    fn test_retries_exhausted_is_error() {
        // Bind then drop so the port is very likely unreachable.
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let mut config = test_config(addr, 5, 1);
        config.max_retries = 2;
        config.retry_backoff_ms = 1;
        match run(&config) {
            Err(ClientError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected retries exhausted, got {other:?}"),
        }
    }

    #[test]
    fn test_tally_first_seen_order() {
        let download = Download {
            words: ["cat", "bat", "cat", "dog", "dog", "emu", "emu", "emu", "ant"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            elapsed: Duration::from_millis(1),
        };
        assert_eq!(
            download.tally(),
            vec![
                ("cat".to_string(), 2),
                ("bat".to_string(), 1),
                ("dog".to_string(), 2),
                ("emu".to_string(), 3),
                ("ant".to_string(), 1),
            ]
        );
    }
}

//! The Stratum v1 session state machine: connect, subscribe/authorize,
//! receive notify/set_difficulty, submit shares.
//!
//! Mirrors the reference client's `stratum_handle_message`: permissive
//! `mining.notify` field extraction, state-keyed (not id-keyed) response
//! dispatch, a 4 KiB line-buffered receive loop, and a near-capacity
//! buffer-clear rule.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use peach_core::trailer::decode_hex_truncated;
use peach_core::{BTrailer, Error, Result};

use crate::job::StratumJob;
use crate::wire;

const RECV_BUF_CAP: usize = 4096;
const RECV_BUF_SAFETY_MARGIN: usize = 100;
const DEFAULT_DIFFICULTY: u8 = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Disconnected,
    Connecting,
    Subscribing,
    Authorizing,
    Connected,
}

#[derive(Debug, Clone)]
pub struct StratumConfig {
    pub host: String,
    pub port: u16,
    pub wallet: String,
    pub worker: String,
    /// Send `mining.subscribe` before `mining.authorize`. The reference
    /// pool this client targets skips straight to AUTHORIZING, but the
    /// SUBSCRIBING branch is kept reachable for pools that require it.
    pub subscribe_first: bool,
}

pub struct StratumClient {
    config: StratumConfig,
    state: State,
    socket: Option<TcpStream>,
    recv_buf: Vec<u8>,
    msg_id: u64,
    pub pending: StratumJob,
    pub current: StratumJob,
    pub difficulty: u8,
    pub accepted_shares: u64,
    pub rejected_shares: u64,
}

impl StratumClient {
    /// Zero state; default pool difficulty 28; message-id counter starts
    /// at 1.
    pub fn init(config: StratumConfig) -> Self {
        StratumClient {
            config,
            state: State::Disconnected,
            socket: None,
            recv_buf: Vec::with_capacity(RECV_BUF_CAP),
            msg_id: 1,
            pending: StratumJob::default(),
            current: StratumJob::default(),
            difficulty: DEFAULT_DIFFICULTY,
            accepted_shares: 0,
            rejected_shares: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Resolve the host, open the socket, and kick off the handshake:
    /// `mining.subscribe` first if configured, otherwise straight to
    /// `mining.authorize`.
    pub fn connect(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let stream = TcpStream::connect(&addr)?;
        stream.set_read_timeout(Some(Duration::from_millis(100)))?;
        let _ = stream.set_nodelay(true);
        self.socket = Some(stream);
        self.recv_buf.clear();
        self.state = State::Connecting;

        if self.config.subscribe_first {
            self.state = State::Subscribing;
            self.send_subscribe()
        } else {
            self.state = State::Authorizing;
            self.send_authorize()
        }
    }

    pub fn disconnect(&mut self) {
        self.socket = None;
        self.recv_buf.clear();
        self.state = State::Disconnected;
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some() && self.state >= State::Subscribing
    }

    /// Non-blocking-in-effect poll of the socket: a single read bounded to
    /// 100 ms. Newline-terminated messages in the buffer are handled in
    /// arrival order; on hangup or a hard socket error the client
    /// disconnects.
    pub fn process(&mut self) -> Result<()> {
        let mut buf = [0u8; RECV_BUF_CAP];
        let read_result = match self.socket.as_mut() {
            Some(socket) => socket.read(&mut buf),
            None => return Ok(()),
        };

        match read_result {
            Ok(0) => self.disconnect(),
            Ok(n) => self.ingest(&buf[..n]),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                tracing::warn!(error = %e, "stratum socket error");
                self.disconnect();
            }
        }
        Ok(())
    }

    /// Scans `recv_buf` for newlines by byte offset and hands each complete
    /// line to the handler from a fixed stack buffer, never a fresh heap
    /// allocation. Consumed bytes are shifted out of `recv_buf` once per
    /// call, not once per line.
    fn ingest(&mut self, data: &[u8]) {
        self.recv_buf.extend_from_slice(data);

        let mut line_buf = [0u8; RECV_BUF_CAP];
        let mut start = 0usize;
        while let Some(rel) = self.recv_buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + rel;
            let len = end - start;
            line_buf[..len].copy_from_slice(&self.recv_buf[start..end]);
            start = end + 1;

            match std::str::from_utf8(&line_buf[..len]) {
                Ok(text) => {
                    if let Err(e) = self.handle_message(text) {
                        tracing::warn!(error = %e, "dropping malformed stratum message");
                    }
                }
                Err(_) => tracing::warn!("dropping non-utf8 stratum message"),
            }
        }
        if start > 0 {
            self.recv_buf.drain(..start);
        }

        if self.recv_buf.len() >= RECV_BUF_CAP - RECV_BUF_SAFETY_MARGIN {
            tracing::warn!("stratum receive buffer near capacity with no newline; clearing");
            self.recv_buf.clear();
        }
    }

    fn handle_message(&mut self, line: &str) -> Result<()> {
        if let Some(method) = wire::extract_method(line) {
            match method {
                "mining.notify" => self.handle_notify(line),
                "mining.set_difficulty" => self.handle_set_difficulty(line),
                other => {
                    tracing::debug!(method = other, "ignoring unrecognized method");
                    Ok(())
                }
            }
        } else if wire::has_key(line, "id") {
            self.handle_response(line)
        } else {
            Err(Error::Protocol("message has neither method nor id".into()))
        }
    }

    fn handle_notify(&mut self, line: &str) -> Result<()> {
        let mut params = [None; wire::MAX_PARAMS];
        let count = wire::extract_params(line, &mut params)
            .ok_or_else(|| Error::Protocol("mining.notify missing params".into()))?;
        if count < 6 {
            return Err(Error::Protocol("mining.notify params too short".into()));
        }
        let field = |i: usize| params[i].ok_or_else(|| Error::Protocol("mining.notify missing field".into()));

        let job_id_raw = field(0)?;
        if job_id_raw.len() > crate::job::JOB_ID_MAX_LEN {
            return Err(Error::Protocol("job id too long".into()));
        }
        let job_id = job_id_raw.to_string();

        let mut phash = [0u8; 32];
        decode_hex_truncated(field(1)?, &mut phash)?;
        let mut bnum = [0u8; 8];
        decode_hex_truncated(field(2)?, &mut bnum)?;
        let difficulty = wire::parse_numeric_field(field(3)?) as u8;
        let time0 = wire::parse_numeric_field(field(4)?) as u32;
        let mut mroot = [0u8; 32];
        decode_hex_truncated(field(5)?, &mut mroot)?;

        self.pending = StratumJob {
            job_id,
            phash,
            bnum,
            difficulty,
            time0,
            mroot,
            valid: true,
            job_seq: self.pending.job_seq + 1,
        };

        tracing::info!(job_id = %self.pending.job_id, difficulty, "new job");
        Ok(())
    }

    fn handle_set_difficulty(&mut self, line: &str) -> Result<()> {
        let mut params = [None; wire::MAX_PARAMS];
        let count = wire::extract_params(line, &mut params)
            .ok_or_else(|| Error::Protocol("mining.set_difficulty missing params".into()))?;
        if count == 0 {
            return Err(Error::Protocol("mining.set_difficulty missing value".into()));
        }
        let raw = params[0].unwrap();
        let value = wire::parse_numeric_field(raw);
        if value > 0 && value <= u8::MAX as u64 {
            self.difficulty = value as u8;
            tracing::info!(difficulty = self.difficulty, "pool difficulty updated");
        }
        Ok(())
    }

    fn handle_response(&mut self, line: &str) -> Result<()> {
        match self.state {
            State::Subscribing => {
                let has_result = wire::has_key(line, "result")
                    && wire::extract_raw_field(line, "result") != Some("null");
                if has_result {
                    self.state = State::Authorizing;
                    self.send_authorize()
                } else {
                    self.disconnect();
                    Err(Error::Protocol("mining.subscribe failed".into()))
                }
            }
            State::Authorizing => {
                let ok = wire::extract_bool_field(line, "result").unwrap_or(false);
                if ok {
                    self.state = State::Connected;
                    tracing::info!("authorized");
                    Ok(())
                } else {
                    self.disconnect();
                    Err(Error::Auth("mining.authorize rejected".into()))
                }
            }
            State::Connected => {
                let accepted = wire::extract_bool_field(line, "result").unwrap_or(false);
                if accepted {
                    self.accepted_shares += 1;
                } else {
                    self.rejected_shares += 1;
                }
                Ok(())
            }
            State::Disconnected | State::Connecting => {
                Err(Error::Protocol("response received with no request outstanding".into()))
            }
        }
    }

    fn send_subscribe(&mut self) -> Result<()> {
        let id = self.next_id();
        let line = format!("{{\"id\":{},\"method\":\"mining.subscribe\",\"params\":[]}}\n", id);
        self.send_line(&line)
    }

    fn send_authorize(&mut self) -> Result<()> {
        let id = self.next_id();
        let line = format!(
            "{{\"id\":{},\"method\":\"mining.authorize\",\"params\":[\"{}.{}\",\"x\"]}}\n",
            id, self.config.wallet, self.config.worker
        );
        self.send_line(&line)
    }

    /// Send a `mining.submit` with hex-encoded nonce and hash. Only
    /// permitted in CONNECTED.
    pub fn submit(&mut self, job_id: &str, nonce: &[u8; 32], hash: &[u8; 32]) -> Result<()> {
        if self.state != State::Connected {
            return Err(Error::Protocol("submit outside CONNECTED state".into()));
        }
        let id = self.next_id();
        let line = self.format_submit(id, job_id, nonce, hash);
        self.send_line(&line)
    }

    fn format_submit(&self, id: u64, job_id: &str, nonce: &[u8; 32], hash: &[u8; 32]) -> String {
        format!(
            "{{\"id\":{},\"method\":\"mining.submit\",\"params\":[\"{}.{}\",\"{}\",\"{}\",\"{}\"]}}\n",
            id,
            self.config.wallet,
            self.config.worker,
            job_id,
            peach_core::trailer::encode_hex(nonce),
            peach_core::trailer::encode_hex(hash),
        )
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        let socket = self.socket.as_mut().ok_or_else(|| Error::Network("not connected".into()))?;
        socket.write_all(line.as_bytes())?;
        Ok(())
    }

    fn next_id(&mut self) -> u64 {
        let id = self.msg_id;
        self.msg_id += 1;
        id
    }

    /// True iff a fresh job is waiting that the coordinator hasn't pulled
    /// yet.
    pub fn has_job(&self) -> bool {
        self.pending.valid && self.pending.job_seq != self.current.job_seq
    }

    /// Copy `pending` into `current` and project it into a `BTRAILER`.
    pub fn get_job(&mut self, out: &mut BTrailer) {
        self.current = self.pending.clone();
        *out = self.current.to_btrailer();
    }

    pub fn current_job_id(&self) -> &str {
        &self.current.job_id
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn client() -> StratumClient {
        StratumClient::init(StratumConfig {
            host: "pool.example".into(),
            port: 3333,
            wallet: "W".into(),
            worker: "w".into(),
            subscribe_first: false,
        })
    }

    #[test]
    fn authorize_success_transitions_to_connected() {
        let mut c = client();
        c.state = State::Authorizing;
        c.handle_message("{\"id\":1,\"result\":true,\"error\":null}").unwrap();
        assert_eq!(c.state(), State::Connected);
    }

    #[test]
    fn authorize_failure_disconnects() {
        let mut c = client();
        c.state = State::Authorizing;
        let err = c.handle_message("{\"id\":1,\"result\":false,\"error\":null}");
        assert!(err.is_err());
        assert_eq!(c.state(), State::Disconnected);
    }

    #[test]
    fn notify_parses_fields_and_bumps_sequence() {
        let mut c = client();
        let line = r#"{"method":"mining.notify","params":["j1","aa","0100000000000000","8","66ddee00","bb",true]}"#;
        c.handle_message(line).unwrap();
        assert!(c.pending.valid);
        assert_eq!(c.pending.job_seq, 1);
        assert_eq!(c.pending.difficulty, 8);
        assert_eq!(&c.pending.time0.to_le_bytes(), &[0x00, 0xee, 0xdd, 0x66]);
        assert_eq!(c.pending.bnum, [0x01, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn repeated_identical_notify_still_bumps_sequence() {
        let mut c = client();
        let line = r#"{"method":"mining.notify","params":["j1","aa","01","8","60","bb",true]}"#;
        c.handle_message(line).unwrap();
        c.handle_message(line).unwrap();
        assert_eq!(c.pending.job_seq, 2);
    }

    #[test]
    fn has_job_tracks_pending_vs_current_sequence() {
        let mut c = client();
        assert!(!c.has_job());
        let line = r#"{"method":"mining.notify","params":["j1","aa","01","8","60","bb",true]}"#;
        c.handle_message(line).unwrap();
        assert!(c.has_job());
        let mut out = BTrailer::default();
        c.get_job(&mut out);
        assert!(!c.has_job());
    }

    #[test]
    fn submit_requires_connected_state() {
        let mut c = client();
        let err = c.submit("j1", &[1; 32], &[2; 32]);
        assert!(err.is_err());
    }

    #[test]
    fn submit_formats_exact_wire_line() {
        let c = client();
        let line = c.format_submit(7, "j1", &[0x01; 32], &[0x02; 32]);
        let expected = format!(
            "{{\"id\":7,\"method\":\"mining.submit\",\"params\":[\"W.w\",\"j1\",\"{}\",\"{}\"]}}\n",
            "01".repeat(32),
            "02".repeat(32)
        );
        assert_eq!(line, expected);
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn set_difficulty_ignores_non_positive_values() {
        let mut c = client();
        c.handle_message(r#"{"method":"mining.set_difficulty","params":[0]}"#).unwrap();
        assert_eq!(c.difficulty, DEFAULT_DIFFICULTY);
        c.handle_message(r#"{"method":"mining.set_difficulty","params":[12]}"#).unwrap();
        assert_eq!(c.difficulty, 12);
    }
}

//! GVCP control-channel client: request/reply engine, heartbeat, and the
//! control-ownership state machine.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Buf;
use genicp::{
    AckHeader, CommandCode, CommandFlags, CommandHeader, GvcpStatus,
};
use tracing::{debug, info, trace, warn};

use crate::discovery::DeviceDescriptionUrl;
use crate::error::GigeError;

/// GVCP protocol constants.
pub mod consts {
    use std::time::Duration;

    /// GVCP control port (GigE Vision spec, section 7.3).
    pub const PORT: u16 = 3956;

    /// First-URL bootstrap register: 512-byte memory region.
    pub const DEVICE_DESCRIPTION_URL: u32 = 0x0000_0200;
    /// GVCP capability flags register.
    pub const GVCP_CAPABILITY: u32 = 0x0000_0934;
    /// Heartbeat timeout register, milliseconds.
    pub const HEARTBEAT_TIMEOUT: u32 = 0x0000_0938;
    /// Control Channel Privilege register.
    pub const CCP: u32 = 0x0000_0A00;

    /// Value written to CCP to claim exclusive control.
    pub const CCP_CLAIM: u32 = 0x0000_0002;
    /// Value written to CCP to release control.
    pub const CCP_RELEASE: u32 = 0x0000_0000;

    /// Capability bit for multi-address READREG/WRITEREG concatenation.
    pub const CAP_CONCAT_BIT: u32 = 0;
    /// Capability bit for WRITEMEM support.
    pub const CAP_WRITEMEM_BIT: u32 = 1;
    /// Capability bit for ACTION command support.
    pub const CAP_ACTION_BIT: u32 = 6;
    /// Capability bit for scheduled ACTION support.
    pub const CAP_SCHEDULED_ACTION_BIT: u32 = 17;

    /// Default ack timeout.
    pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(500);
    /// Default retry count.
    pub const DEFAULT_RETRIES: usize = 3;
    /// Default heartbeat timeout (device control-loss window).
    pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(5000);
    /// Extra slack added to a PENDING-proposed timeout.
    pub const PENDING_SLACK: Duration = Duration::from_millis(10);

    /// Maximum datagram payload under the 576-byte IPv4 MTU budget.
    pub const MAX_PAYLOAD: usize = 540;
}

/// State of the control-ownership state machine (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Owning,
    Disconnecting,
}

/// Cached optional-feature support, probed once via `GVCP_CAPABILITY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub concatenation: bool,
    pub writemem: bool,
    pub action: bool,
    pub scheduled_action: bool,
}

impl Capabilities {
    fn from_raw(raw: u32) -> Self {
        let bit = |n: u32| raw & (1 << n) != 0;
        Self {
            concatenation: bit(consts::CAP_CONCAT_BIT),
            writemem: bit(consts::CAP_WRITEMEM_BIT),
            action: bit(consts::CAP_ACTION_BIT),
            scheduled_action: bit(consts::CAP_SCHEDULED_ACTION_BIT),
        }
    }
}

struct Inner {
    socket: Option<UdpSocket>,
    request_id: u16,
    state: ConnectionState,
    capabilities: Option<Capabilities>,
    ack_timeout: Duration,
}

impl Inner {
    fn next_request_id(&mut self) -> u16 {
        let id = self.request_id;
        self.request_id = if self.request_id == u16::MAX { 1 } else { self.request_id + 1 };
        id
    }
}

struct HeartbeatHandle {
    stop: Arc<(Mutex<bool>, Condvar)>,
    thread: JoinHandle<()>,
}

/// A GVCP connection: one UDP socket owning control of a single device.
pub struct GvcpConnection {
    inner: Mutex<Inner>,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
    heartbeat_timeout: Duration,
    retries: usize,
    lost: AtomicBool,
}

impl GvcpConnection {
    /// Open a GVCP connection, claim control, and start the heartbeat.
    ///
    /// Corresponds to the `Disconnected -> Connecting -> Owning` transition
    /// of the control-ownership state machine.
    pub fn connect(ip: Ipv4Addr, port: u16) -> Result<Arc<Self>, GigeError> {
        Self::connect_with(ip, port, consts::DEFAULT_ACK_TIMEOUT, consts::DEFAULT_RETRIES, consts::DEFAULT_HEARTBEAT_TIMEOUT)
    }

    /// Open a connection with explicit timeouts (ambient configuration
    /// surface — see `SPEC_FULL.md` §4.7).
    pub fn connect_with(
        ip: Ipv4Addr,
        port: u16,
        ack_timeout: Duration,
        retries: usize,
        heartbeat_timeout: Duration,
    ) -> Result<Arc<Self>, GigeError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(SocketAddr::from((ip, port)))?;
        socket.set_read_timeout(Some(ack_timeout))?;

        let conn = Arc::new(Self {
            inner: Mutex::new(Inner {
                socket: Some(socket),
                request_id: 1,
                state: ConnectionState::Connecting,
                capabilities: None,
                ack_timeout,
            }),
            heartbeat: Mutex::new(None),
            heartbeat_timeout,
            retries,
            lost: AtomicBool::new(false),
        });

        info!(%ip, port, "claiming GVCP control channel");
        conn.writereg(&[(consts::CCP, consts::CCP_CLAIM)], true)?;
        conn.writereg(&[(consts::HEARTBEAT_TIMEOUT, heartbeat_timeout.as_millis() as u32)], true)?;
        let ccp = conn.readreg(&[consts::CCP])?;

        if ccp[0] != consts::CCP_CLAIM {
            let mut inner = conn.inner.lock().unwrap();
            inner.state = ConnectionState::Disconnected;
            return Err(GigeError::NotConnected);
        }

        conn.inner.lock().unwrap().state = ConnectionState::Owning;
        conn.spawn_heartbeat();
        info!(%ip, port, "GVCP control channel owned");
        Ok(conn)
    }

    fn spawn_heartbeat(self: &Arc<Self>) {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let period = self.heartbeat_timeout / 3;
        let conn = Arc::clone(self);
        let stop_clone = Arc::clone(&stop);
        let thread = thread::spawn(move || conn.heartbeat_loop(stop_clone, period));
        *self.heartbeat.lock().unwrap() = Some(HeartbeatHandle { stop, thread });
    }

    fn heartbeat_loop(self: Arc<Self>, stop: Arc<(Mutex<bool>, Condvar)>, period: Duration) {
        let (lock, cvar) = &*stop;
        loop {
            let guard = lock.lock().unwrap();
            let (guard, timed_out) = cvar.wait_timeout(guard, period).unwrap();
            if *guard {
                return;
            }
            drop(guard);
            if timed_out.timed_out() {
                match self.readreg(&[consts::CCP]) {
                    Ok(values) if values[0] == consts::CCP_CLAIM => {
                        trace!("heartbeat ok");
                    }
                    Ok(values) => {
                        warn!(ccp = values[0], "control channel lost, tearing down connection");
                        self.mark_lost();
                        return;
                    }
                    Err(err) => {
                        warn!(%err, "heartbeat read failed, tearing down connection");
                        self.mark_lost();
                        return;
                    }
                }
            }
        }
    }

    /// Flip the connection to lost and close the socket (§4.3/scenario 6:
    /// ownership loss tears down the connection, not just the state flag).
    fn mark_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        inner.state = ConnectionState::Disconnected;
        inner.socket = None;
    }

    fn check_connected(&self) -> Result<(), GigeError> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(GigeError::NotConnected);
        }
        let state = self.inner.lock().unwrap().state;
        match state {
            ConnectionState::Owning | ConnectionState::Connecting => Ok(()),
            _ => Err(GigeError::NotConnected),
        }
    }

    /// Release control and tear down the connection.
    ///
    /// Corresponds to `Owning -> Disconnecting -> Disconnected`.
    pub fn disconnect(&self) -> Result<(), GigeError> {
        {
            let state = self.inner.lock().unwrap().state;
            if state == ConnectionState::Disconnected {
                return Err(GigeError::NotConnected);
            }
        }
        // Release while still Owning: check_connected() rejects Disconnecting.
        self.writereg(&[(consts::CCP, consts::CCP_RELEASE)], true)?;
        self.inner.lock().unwrap().state = ConnectionState::Disconnecting;
        if let Some(handle) = self.heartbeat.lock().unwrap().take() {
            {
                let (lock, cvar) = &*handle.stop;
                *lock.lock().unwrap() = true;
                cvar.notify_one();
            }
            let _ = handle.thread.join();
        }
        let mut inner = self.inner.lock().unwrap();
        inner.state = ConnectionState::Disconnected;
        inner.socket = None;
        drop(inner);
        info!("GVCP connection disconnected");
        Ok(())
    }

    /// Run one request/reply transaction, including PENDING handling and
    /// bounded retry on full timeout.
    fn transact(
        &self,
        command: CommandCode,
        flags: CommandFlags,
        payload: &[u8],
        ack_required: bool,
    ) -> Result<(AckHeader, bytes::Bytes), GigeError> {
        let mut inner = self.inner.lock().unwrap();
        let request_id = inner.next_request_id();
        let header = CommandHeader {
            flags,
            command,
            length: payload.len() as u16,
            request_id,
        };
        let packet = header.encode(payload)?;
        let default_timeout = inner.ack_timeout;
        let socket = inner.socket.as_ref().ok_or(GigeError::NotConnected)?;

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            trace!(?command, request_id, attempt, "sending GVCP command");
            socket.send(&packet)?;
            if !ack_required {
                return Ok((
                    AckHeader {
                        status: GvcpStatus { code: genicp::StatusCode::Success, is_error: false, is_device_specific: false },
                        ack_code: command.ack_code().unwrap_or(0),
                        length: 0,
                        request_id,
                    },
                    bytes::Bytes::new(),
                ));
            }

            let mut pending = false;
            loop {
                let mut buf = vec![0u8; genicp::HEADER_SIZE + consts::MAX_PAYLOAD];
                match socket.recv(&mut buf) {
                    Ok(len) => {
                        let (ack, body) = AckHeader::decode(&buf[..len])?;
                        if ack.request_id != request_id {
                            return Err(GigeError::AckIdError { expected: request_id, got: ack.request_id });
                        }
                        if ack.is_pending() {
                            if body.len() < 4 {
                                return Err(GigeError::AckLengthError);
                            }
                            let mut cursor = &body[2..4];
                            let proposed_ms = cursor.get_u16();
                            let extended = Duration::from_millis(proposed_ms as u64) + consts::PENDING_SLACK;
                            socket.set_read_timeout(Some(extended))?;
                            pending = true;
                            debug!(proposed_ms, "received PENDING, extending timeout");
                            continue;
                        }
                        if pending {
                            socket.set_read_timeout(Some(default_timeout))?;
                        }
                        if ack.status.is_error {
                            return Err(GigeError::AckError { status: ack.status });
                        }
                        return Ok((ack, body));
                    }
                    Err(err) if is_timeout(&err) => {
                        if pending {
                            socket.set_read_timeout(Some(default_timeout))?;
                        }
                        if attempt >= self.retries {
                            return Err(GigeError::Timeout);
                        }
                        warn!(?command, request_id, attempt, "ack timeout, retrying");
                        break;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
    }

    /// READREG one or more 32-bit registers.
    pub fn readreg(&self, addresses: &[u32]) -> Result<Vec<u32>, GigeError> {
        self.check_connected()?;
        if addresses.len() > 1 {
            let caps = self.capabilities()?;
            if !caps.concatenation {
                return Err(GigeError::NotImplemented("multi-address READREG requires concatenation capability"));
            }
        }
        let payload = genicp::encode_read_reg(addresses)?;
        let (_ack, body) = self.transact(CommandCode::ReadReg, CommandFlags::ACK_REQUIRED, &payload, true)?;
        Ok(genicp::decode_read_reg_ack(&body, addresses.len())?)
    }

    /// WRITEREG one or more (address, value) pairs.
    pub fn writereg(&self, pairs: &[(u32, u32)], ack_required: bool) -> Result<(), GigeError> {
        self.check_connected()?;
        if pairs.len() > 1 {
            let caps = self.capabilities()?;
            if !caps.concatenation {
                return Err(GigeError::NotImplemented("multi-address WRITEREG requires concatenation capability"));
            }
        }
        let payload = genicp::encode_write_reg(pairs)?;
        let flags = if ack_required { CommandFlags::ACK_REQUIRED } else { CommandFlags::empty() };
        self.transact(CommandCode::WriteReg, flags, &payload, ack_required)?;
        Ok(())
    }

    /// READMEM, transparently chunked to `genicp::READMEM_MAX_PAYLOAD`.
    ///
    /// A tail shorter than a 4-byte multiple is rounded up for the wire
    /// request and truncated back to `byte_count` on return, matching the
    /// device-description-file fetch note in `SPEC_FULL.md` §6.
    pub fn readmem(&self, address: u32, byte_count: usize) -> Result<Vec<u8>, GigeError> {
        self.check_connected()?;
        let mut data = Vec::with_capacity(byte_count);
        let mut offset = 0usize;
        while offset < byte_count {
            let remaining = byte_count - offset;
            let chunk = aligned_chunk_len(remaining);
            let payload = genicp::encode_read_mem(address + offset as u32, chunk as u16)?;
            let (_ack, body) = self.transact(CommandCode::ReadMem, CommandFlags::ACK_REQUIRED, &payload, true)?;
            let (_echo, bytes) = genicp::decode_read_mem_ack(&body)?;
            data.extend_from_slice(&bytes);
            offset += chunk;
        }
        data.truncate(byte_count);
        Ok(data)
    }

    /// WRITEMEM, transparently chunked to `genicp::READMEM_MAX_PAYLOAD`.
    pub fn writemem(&self, address: u32, data: &[u8]) -> Result<(), GigeError> {
        self.check_connected()?;
        let caps = self.capabilities()?;
        if !caps.writemem {
            return Err(GigeError::NotImplemented("device does not support WRITEMEM"));
        }
        let mut offset = 0usize;
        while offset < data.len() {
            let chunk = (data.len() - offset).min(genicp::READMEM_MAX_PAYLOAD - 4);
            let payload = genicp::encode_write_mem(address + offset as u32, &data[offset..offset + chunk])?;
            self.transact(CommandCode::WriteMem, CommandFlags::ACK_REQUIRED, &payload, true)?;
            offset += chunk;
        }
        Ok(())
    }

    /// Send an ACTION command, optionally with a scheduled time.
    pub fn action(
        &self,
        device_key: u32,
        group_key: u32,
        group_mask: u32,
        scheduled_time: Option<u64>,
    ) -> Result<(), GigeError> {
        self.check_connected()?;
        let caps = self.capabilities()?;
        if !caps.action {
            return Err(GigeError::NotImplemented("device does not support ACTION"));
        }
        if scheduled_time.is_some() && !caps.scheduled_action {
            return Err(GigeError::NotImplemented("device does not support scheduled ACTION"));
        }
        let payload = genicp::encode_action(device_key, group_key, group_mask, scheduled_time);
        let flags = if scheduled_time.is_some() {
            CommandFlags::ACTION_SCHEDULED_TIME
        } else {
            CommandFlags::ACK_REQUIRED
        };
        self.transact(CommandCode::Action, flags, &payload, true)?;
        Ok(())
    }

    /// Read and parse the bootstrap device-description URL (§6).
    pub fn device_description_url(&self) -> Result<DeviceDescriptionUrl, GigeError> {
        let raw = self.readmem(consts::DEVICE_DESCRIPTION_URL, 512)?;
        let text = String::from_utf8_lossy(&raw);
        DeviceDescriptionUrl::parse(&text)
    }

    /// Fetch the device description document (XML or ZIP) named by the
    /// bootstrap URL. Only `local:` URLs, served out of device memory, are
    /// currently fetched; `file://` and `http(s)://` are recognized but not
    /// retrieved.
    pub fn get_device_description(&self) -> Result<Vec<u8>, GigeError> {
        match self.device_description_url()? {
            DeviceDescriptionUrl::Local { address, length, .. } => self.readmem(address, length as usize),
            DeviceDescriptionUrl::File { .. } => {
                Err(GigeError::NotImplemented("file:// device description fetch is not implemented"))
            }
            DeviceDescriptionUrl::Http => {
                Err(GigeError::NotImplemented("http(s) device description fetch is not implemented"))
            }
        }
    }

    /// Probe and cache the `GVCP_CAPABILITY` bitmask on first use.
    fn capabilities(&self) -> Result<Capabilities, GigeError> {
        if let Some(caps) = self.inner.lock().unwrap().capabilities {
            return Ok(caps);
        }
        let payload = genicp::encode_read_reg(&[consts::GVCP_CAPABILITY])?;
        let (_ack, body) = self.transact(CommandCode::ReadReg, CommandFlags::ACK_REQUIRED, &payload, true)?;
        let raw = genicp::decode_read_reg_ack(&body, 1)?[0];
        let caps = Capabilities::from_raw(raw);
        self.inner.lock().unwrap().capabilities = Some(caps);
        Ok(caps)
    }
}

/// Round `remaining` up to a multiple of 4, capped at `READMEM_MAX_PAYLOAD`
/// (rounding down instead when the cap would otherwise be exceeded).
fn aligned_chunk_len(remaining: usize) -> usize {
    let capped = remaining.min(genicp::READMEM_MAX_PAYLOAD);
    if capped % 4 == 0 {
        return capped.max(4);
    }
    let rounded_up = capped + (4 - capped % 4);
    if rounded_up <= genicp::READMEM_MAX_PAYLOAD {
        rounded_up
    } else {
        capped - capped % 4
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_decode_expected_bits() {
        let raw = (1 << consts::CAP_CONCAT_BIT)
            | (1 << consts::CAP_ACTION_BIT)
            | (1 << consts::CAP_SCHEDULED_ACTION_BIT);
        let caps = Capabilities::from_raw(raw);
        assert!(caps.concatenation);
        assert!(!caps.writemem);
        assert!(caps.action);
        assert!(caps.scheduled_action);
    }

    #[test]
    fn aligned_chunk_rounds_tail_up_to_multiple_of_four() {
        assert_eq!(aligned_chunk_len(3), 4);
        assert_eq!(aligned_chunk_len(4), 4);
        assert_eq!(aligned_chunk_len(5), 8);
    }

    #[test]
    fn heartbeat_period_is_a_third_of_timeout() {
        let timeout = Duration::from_secs(5);
        assert_eq!(timeout / 3, Duration::from_millis(1666));
    }
}

//! GVSP streaming receiver: packet ingestion, frame reassembly, and the
//! single ingestion thread per stream.

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Buf;
use genicp::gvsp::{PacketFormat, PacketHeader};
use tracing::{debug, trace, warn};

use crate::error::GigeError;
use crate::gvcp::GvcpConnection;
use crate::stats::StreamStats;

const LEADER_HEADER_SIZE: usize = 36;
const INGEST_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Decoded GVSP leader-packet payload (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LeaderPayload {
    payload_type: u16,
    pixel_format: u32,
    width: u32,
    height: u32,
}

impl LeaderPayload {
    fn decode(buf: &[u8]) -> Result<Self, GigeError> {
        if buf.len() < LEADER_HEADER_SIZE {
            return Err(GigeError::AckLengthError);
        }
        let mut cursor = buf;
        let payload_type = cursor.get_u16();
        let _reserved = cursor.get_u16();
        let _timestamp = cursor.get_u64();
        let pixel_format = cursor.get_u32();
        let width = cursor.get_u32();
        let height = cursor.get_u32();
        let _x_offset = cursor.get_u32();
        let _y_offset = cursor.get_u32();
        let _padding_x = cursor.get_u16();
        let _padding_y = cursor.get_u16();
        Ok(Self { payload_type, pixel_format, width, height })
    }
}

/// Effective bits per pixel encoded in a PFNC pixel-format code (bits
/// 23..16).
pub fn bit_depth_from_pixel_format(code: u32) -> u8 {
    ((code >> 16) & 0xff) as u8
}

/// Payload type for an image leader packet.
pub const LEADER_PAYLOAD_IMAGE: u16 = genicp::gvsp::LEADER_PAYLOAD_IMAGE;

/// One reassembled frame delivered to the frame callback.
#[derive(Debug, Clone)]
pub struct Frame {
    pub block_id: u16,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub data: Vec<u8>,
}

struct Assembly {
    block_id: u16,
    width: u32,
    height: u32,
    pixel_format: u32,
    buffer: Vec<u8>,
    received: Vec<bool>,
}

impl Assembly {
    fn is_complete(&self) -> bool {
        self.received.iter().all(|&r| r)
    }
}

/// Frame callback, invoked on the ingestion thread (§9: must not block on
/// GVCP operations). Returning `true` means the callback intercepted the
/// frame; otherwise, while recording mode is on, the frame is also pushed
/// onto the recording queue.
pub type FrameCallback = Box<dyn FnMut(&Frame) -> bool + Send>;

/// Builder for a [`GvspReceiver`], mirroring the teacher's stream-builder
/// idiom.
#[derive(Debug, Clone, Copy)]
pub struct GvspReceiverBuilder {
    payload_size: usize,
    packet_size: usize,
}

impl GvspReceiverBuilder {
    pub fn new(payload_size: usize, packet_size: usize) -> Self {
        Self { payload_size, packet_size }
    }

    /// Bind the receiver socket on `host_ip`, OS-assigned port.
    pub fn open(self, host_ip: Ipv4Addr) -> Result<GvspReceiver, GigeError> {
        if self.packet_size <= genicp::gvsp::HEADER_SIZE {
            return Err(GigeError::InvalidArgument("packet size must exceed the GVSP header size"));
        }
        let socket = UdpSocket::bind(SocketAddr::from((host_ip, 0)))?;
        socket.set_read_timeout(Some(INGEST_POLL_TIMEOUT))?;
        let local_port = socket.local_addr()?.port();
        Ok(GvspReceiver {
            socket,
            local_port,
            payload_size: self.payload_size,
            payload_stride: self.packet_size - genicp::gvsp::HEADER_SIZE,
            assembly: Mutex::new(None),
            stats: StreamStats::new(),
            stop: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
            recording: AtomicBool::new(false),
            recorded: Mutex::new(VecDeque::new()),
        })
    }
}

/// A GVSP stream receiver: one UDP socket, one pre-allocated assembly
/// buffer, one ingestion thread once started.
pub struct GvspReceiver {
    socket: UdpSocket,
    local_port: u16,
    payload_size: usize,
    payload_stride: usize,
    assembly: Mutex<Option<Assembly>>,
    stats: StreamStats,
    stop: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
    recording: AtomicBool,
    recorded: Mutex<VecDeque<Frame>>,
}

impl GvspReceiver {
    /// Host port the receiver socket was bound to; callers write this into
    /// the device's `GevSCPHostPort` register.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Snapshot of loss/throughput statistics.
    pub fn stats(&self) -> crate::stats::Snapshot {
        self.stats.snapshot()
    }

    /// Turn recording mode on or off. While on, frames the callback does
    /// not intercept are also appended to the recording queue.
    pub fn set_recording(&self, enabled: bool) {
        self.recording.store(enabled, Ordering::Relaxed);
    }

    /// Drain all frames accumulated in the recording queue.
    pub fn drain_recorded(&self) -> Vec<Frame> {
        self.recorded.lock().unwrap().drain(..).collect()
    }

    fn expected_packet_count(&self) -> usize {
        (self.payload_size + self.payload_stride - 1) / self.payload_stride
    }

    /// Spawn the ingestion thread. Packets not from `device_ip` are
    /// dropped; reassembled frames are delivered to `callback`.
    pub fn start_receive(self: &Arc<Self>, device_ip: Ipv4Addr, mut callback: FrameCallback) -> Result<(), GigeError> {
        let receiver = Arc::clone(self);
        let socket = receiver.socket.try_clone()?;
        let stop = Arc::clone(&receiver.stop);
        let expected = receiver.expected_packet_count();
        let thread = thread::spawn(move || {
            let mut buf = vec![0u8; 65535];
            while !stop.load(Ordering::Relaxed) {
                match socket.recv_from(&mut buf) {
                    Ok((len, SocketAddr::V4(src))) if *src.ip() == device_ip => {
                        receiver.stats.record_packet();
                        if let Err(err) = receiver.handle_packet(&buf[..len], expected, &mut callback) {
                            warn!(%err, "dropping malformed GVSP packet");
                        }
                    }
                    Ok(_) => continue,
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
                    Err(err) if err.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(err) => {
                        warn!(%err, "GVSP socket error, stopping ingestion");
                        break;
                    }
                }
            }
        });
        *self.thread.lock().unwrap() = Some(thread);
        Ok(())
    }

    /// Signal the ingestion thread to stop and join it. Socket and buffer
    /// are left intact.
    pub fn stop_receive(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Write this receiver's destination address and port into the
    /// device's stream channel registers (§4.4 `open_stream`).
    pub fn configure_destination(&self, conn: &GvcpConnection, channel: u32, host_ip: Ipv4Addr) -> Result<(), GigeError> {
        conn.writereg(&[(stream_channel::scda(channel), u32::from(host_ip))], true)?;
        conn.writereg(&[(stream_channel::scp_host_port(channel), u32::from(self.local_port))], true)?;
        Ok(())
    }

    /// Zero the device's stream destination registers and release the
    /// socket/buffer.
    pub fn close_stream(self, conn: &GvcpConnection, channel: u32) -> Result<(), GigeError> {
        self.stop_receive();
        conn.writereg(&[(stream_channel::scda(channel), 0)], true)?;
        conn.writereg(&[(stream_channel::scp_host_port(channel), 0)], true)?;
        Ok(())
    }

    fn handle_packet(
        &self,
        buf: &[u8],
        expected_packets: usize,
        callback: &mut FrameCallback,
    ) -> Result<(), GigeError> {
        let header = PacketHeader::decode(buf)?;
        let payload = &buf[genicp::gvsp::HEADER_SIZE..];
        match header.format {
            PacketFormat::Leader => self.on_leader(header.block_id, payload, expected_packets),
            PacketFormat::Data => self.on_data(header.block_id, header.packet_sequence, payload),
            PacketFormat::Trailer => self.on_trailer(header.block_id, callback),
        }
    }

    fn on_leader(&self, block_id: u16, payload: &[u8], expected_packets: usize) -> Result<(), GigeError> {
        let leader = LeaderPayload::decode(payload)?;
        let mut guard = self.assembly.lock().unwrap();
        if let Some(previous) = guard.as_ref() {
            if previous.block_id != block_id && !previous.is_complete() {
                debug!(block_id = previous.block_id, "discarding incomplete frame on new leader");
                self.stats.record_lost();
            }
        }
        trace!(block_id, width = leader.width, height = leader.height, "GVSP leader");
        *guard = Some(Assembly {
            block_id,
            width: leader.width,
            height: leader.height,
            pixel_format: leader.pixel_format,
            buffer: vec![0u8; self.payload_size],
            received: vec![false; expected_packets],
        });
        Ok(())
    }

    fn on_data(&self, block_id: u16, packet_sequence: u32, payload: &[u8]) -> Result<(), GigeError> {
        let mut guard = self.assembly.lock().unwrap();
        let Some(assembly) = guard.as_mut() else {
            return Ok(());
        };
        if block_id != assembly.block_id || packet_sequence == 0 {
            return Ok(()); // older block or malformed sequence: discard
        }
        let index = (packet_sequence - 1) as usize;
        if index >= assembly.received.len() {
            return Ok(());
        }
        let offset = index * self.payload_stride;
        if offset >= assembly.buffer.len() {
            return Ok(());
        }
        let copy_len = payload.len().min(assembly.buffer.len() - offset);
        assembly.buffer[offset..offset + copy_len].copy_from_slice(&payload[..copy_len]);
        assembly.received[index] = true;
        Ok(())
    }

    fn on_trailer(&self, block_id: u16, callback: &mut FrameCallback) -> Result<(), GigeError> {
        let mut guard = self.assembly.lock().unwrap();
        let Some(assembly) = guard.as_ref() else {
            return Ok(());
        };
        if assembly.block_id != block_id {
            return Ok(());
        }
        if !assembly.is_complete() {
            debug!(block_id, "trailer arrived with missing data packets, discarding frame");
            self.stats.record_lost();
            *guard = None;
            return Ok(());
        }
        let frame = Frame {
            block_id: assembly.block_id,
            width: assembly.width,
            height: assembly.height,
            bit_depth: bit_depth_from_pixel_format(assembly.pixel_format),
            data: assembly.buffer.clone(),
        };
        *guard = None;
        drop(guard);
        self.stats.record_delivered();
        let intercepted = callback(&frame);
        if !intercepted && self.recording.load(Ordering::Relaxed) {
            self.recorded.lock().unwrap().push_back(frame);
        }
        Ok(())
    }
}

/// Bootstrap register layout for the per-channel stream registers (GigE
/// Vision bootstrap register map, one 0x40-byte block per stream channel
/// starting at 0x0d00).
pub mod stream_channel {
    const BASE: u32 = 0x0000_0d00;
    const BLOCK_SIZE: u32 = 0x40;
    const SCDA_OFFSET: u32 = 0x18;
    const SCP_HOST_PORT_OFFSET: u32 = 0x24;
    const SCPS_OFFSET: u32 = 0x20;
    const SCPD_OFFSET: u32 = 0x2c;

    pub fn scda(channel: u32) -> u32 {
        BASE + channel * BLOCK_SIZE + SCDA_OFFSET
    }

    pub fn scp_host_port(channel: u32) -> u32 {
        BASE + channel * BLOCK_SIZE + SCP_HOST_PORT_OFFSET
    }

    /// `GevSCPSPacketSize`: negotiated GVSP packet size, bytes.
    pub fn scps(channel: u32) -> u32 {
        BASE + channel * BLOCK_SIZE + SCPS_OFFSET
    }

    /// `GevSCPD`: inter-packet transmit delay, in timestamp ticks.
    pub fn scpd(channel: u32) -> u32 {
        BASE + channel * BLOCK_SIZE + SCPD_OFFSET
    }
}

/// Write the negotiated packet size and inter-packet delay into the
/// device's stream channel registers, ahead of `open_stream`.
pub fn configure_packet_params(
    conn: &GvcpConnection,
    channel: u32,
    packet_size: u32,
    packet_delay: u32,
) -> Result<(), GigeError> {
    conn.writereg(&[(stream_channel::scps(channel), packet_size)], true)?;
    conn.writereg(&[(stream_channel::scpd(channel), packet_delay)], true)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn leader_bytes(width: u32, height: u32, pixel_format: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(LEADER_HEADER_SIZE);
        buf.extend_from_slice(&LEADER_PAYLOAD_IMAGE.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&0u64.to_be_bytes());
        buf.extend_from_slice(&pixel_format.to_be_bytes());
        buf.extend_from_slice(&width.to_be_bytes());
        buf.extend_from_slice(&height.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf
    }

    fn gvsp_packet(status: u16, block_id: u16, format: u8, sequence: u32, payload: &[u8]) -> Vec<u8> {
        let packet_id = ((format as u32) << 24) | (sequence & 0x00ff_ffff);
        let mut buf = Vec::with_capacity(genicp::gvsp::HEADER_SIZE + payload.len());
        buf.extend_from_slice(&status.to_be_bytes());
        buf.extend_from_slice(&block_id.to_be_bytes());
        buf.extend_from_slice(&packet_id.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn bit_depth_reads_pfnc_second_byte() {
        assert_eq!(bit_depth_from_pixel_format(0x0108_0001), 8);
        assert_eq!(bit_depth_from_pixel_format(0x010c_0006), 12);
    }

    fn new_receiver(payload_size: usize, packet_size: usize) -> GvspReceiver {
        GvspReceiverBuilder::new(payload_size, packet_size)
            .open(Ipv4Addr::new(127, 0, 0, 1))
            .expect("open receiver")
    }

    #[test]
    fn reassembles_frame_from_shuffled_data_packets() {
        let stride = 1440usize;
        let payload_size = 9 * stride;
        let receiver = new_receiver(payload_size, stride + genicp::gvsp::HEADER_SIZE);
        let expected = receiver.expected_packet_count();

        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_clone = Arc::clone(&delivered);
        let mut callback: FrameCallback = Box::new(move |frame| {
            delivered_clone.fetch_add(1, Ordering::SeqCst);
            assert_eq!(frame.width, 4);
            assert_eq!(frame.height, 4);
            false
        });

        receiver.set_recording(true);
        let leader = gvsp_packet(0, 7, 1, 0, &leader_bytes(4, 4, 0x0108_0001));
        receiver.handle_packet(&leader, expected, &mut callback).unwrap();

        let mut order: Vec<u32> = (1..=expected as u32).collect();
        // shuffle deterministically
        order.reverse();
        for seq in order {
            let payload = vec![seq as u8; stride];
            let packet = gvsp_packet(0, 7, 3, seq, &payload);
            receiver.handle_packet(&packet, expected, &mut callback).unwrap();
        }

        let trailer = gvsp_packet(0, 7, 2, 0, &[]);
        receiver.handle_packet(&trailer, expected, &mut callback).unwrap();

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(receiver.stats().frames_delivered, 1);
        let recorded = receiver.drain_recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].block_id, 7);
    }

    #[test]
    fn intercepted_frame_is_not_appended_to_recording_queue() {
        let stride = 1440usize;
        let payload_size = stride;
        let receiver = new_receiver(payload_size, stride + genicp::gvsp::HEADER_SIZE);
        let expected = receiver.expected_packet_count();
        receiver.set_recording(true);

        let mut callback: FrameCallback = Box::new(|_frame| true);
        let leader = gvsp_packet(0, 1, 1, 0, &leader_bytes(1, 1, 0x0108_0001));
        receiver.handle_packet(&leader, expected, &mut callback).unwrap();
        let data = gvsp_packet(0, 1, 3, 1, &vec![0u8; stride]);
        receiver.handle_packet(&data, expected, &mut callback).unwrap();
        let trailer = gvsp_packet(0, 1, 2, 0, &[]);
        receiver.handle_packet(&trailer, expected, &mut callback).unwrap();

        assert!(receiver.drain_recorded().is_empty());
    }

    #[test]
    fn missing_packet_at_trailer_suppresses_delivery_and_counts_loss() {
        let stride = 1440usize;
        let payload_size = 4 * stride;
        let receiver = new_receiver(payload_size, stride + genicp::gvsp::HEADER_SIZE);
        let expected = receiver.expected_packet_count();

        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_clone = Arc::clone(&delivered);
        let mut callback: FrameCallback = Box::new(move |_frame| {
            delivered_clone.fetch_add(1, Ordering::SeqCst);
            false
        });

        let leader = gvsp_packet(0, 3, 1, 0, &leader_bytes(2, 2, 0x0108_0001));
        receiver.handle_packet(&leader, expected, &mut callback).unwrap();
        // Only deliver packet 1, skip the rest.
        let packet = gvsp_packet(0, 3, 3, 1, &vec![0xAA; stride]);
        receiver.handle_packet(&packet, expected, &mut callback).unwrap();
        let trailer = gvsp_packet(0, 3, 2, 0, &[]);
        receiver.handle_packet(&trailer, expected, &mut callback).unwrap();

        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert_eq!(receiver.stats().frames_lost, 1);
    }
}

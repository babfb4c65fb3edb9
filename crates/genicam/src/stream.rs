//! Streaming builder bridging `tl-gige`'s GVSP receiver with an opened
//! device, following the `open_stream`/`start_receive`/`stop_receive`/
//! `close_stream` lifecycle of `spec.md` §4.4.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tl_gige::{configure_packet_params, Frame, FrameCallback, GvcpConnection, GvspReceiver, GvspReceiverBuilder, Snapshot};
use tracing::info;

use crate::device::GigeDevice;
use crate::error::GenicamError;

const DEFAULT_PACKET_SIZE: u32 = 1444;
const DEFAULT_PACKET_DELAY: u32 = 0;
const DEFAULT_STREAM_CHANNEL: u32 = 0;

/// `PayloadSize` bootstrap register, read when no explicit payload size is
/// configured on the builder.
const PAYLOAD_SIZE_REG: u32 = 0x0000_0984;

/// Builder for negotiating and opening a GVSP stream against an opened
/// device.
pub struct StreamBuilder<'a> {
    device: &'a GigeDevice,
    host_ip: Ipv4Addr,
    channel: u32,
    packet_size: u32,
    packet_delay: u32,
    payload_size: Option<usize>,
}

impl<'a> StreamBuilder<'a> {
    /// Create a builder bound to an opened device, receiving on `host_ip`.
    pub fn new(device: &'a GigeDevice, host_ip: Ipv4Addr) -> Self {
        Self {
            device,
            host_ip,
            channel: DEFAULT_STREAM_CHANNEL,
            packet_size: DEFAULT_PACKET_SIZE,
            packet_delay: DEFAULT_PACKET_DELAY,
            payload_size: None,
        }
    }

    /// Select the GigE Vision stream channel to configure (defaults to 0).
    pub fn channel(mut self, channel: u32) -> Self {
        self.channel = channel;
        self
    }

    /// Override the negotiated GVSP packet size.
    pub fn packet_size(mut self, size: u32) -> Self {
        self.packet_size = size;
        self
    }

    /// Override the inter-packet transmit delay.
    pub fn packet_delay(mut self, delay: u32) -> Self {
        self.packet_delay = delay;
        self
    }

    /// Override the expected frame payload size instead of reading the
    /// device's `PayloadSize` register.
    pub fn payload_size(mut self, size: usize) -> Self {
        self.payload_size = Some(size);
        self
    }

    /// Negotiate packet parameters, bind the receiver socket, program the
    /// device's stream destination, and start ingestion.
    pub fn build(self, callback: FrameCallback) -> Result<Stream, GenicamError> {
        let conn = Arc::clone(self.device.connection());
        configure_packet_params(&conn, self.channel, self.packet_size, self.packet_delay)?;

        let payload_size = match self.payload_size {
            Some(size) => size,
            None => self.device.readreg(&[PAYLOAD_SIZE_REG])?[0] as usize,
        };

        let receiver = Arc::new(GvspReceiverBuilder::new(payload_size, self.packet_size as usize).open(self.host_ip)?);
        receiver.configure_destination(&conn, self.channel, self.host_ip)?;
        receiver.start_receive(self.device.descriptor().current_ip, callback)?;
        info!(
            channel = self.channel,
            packet_size = self.packet_size,
            payload_size,
            host_port = receiver.local_port(),
            "GVSP stream opened"
        );
        Ok(Stream { receiver, channel: self.channel, connection: conn })
    }
}

/// A running GVSP stream bound to one device's stream channel.
pub struct Stream {
    receiver: Arc<GvspReceiver>,
    channel: u32,
    connection: Arc<GvcpConnection>,
}

impl Stream {
    /// Snapshot of loss/throughput statistics.
    pub fn stats(&self) -> Snapshot {
        self.receiver.stats()
    }

    /// Turn recording mode on or off.
    pub fn set_recording(&self, enabled: bool) {
        self.receiver.set_recording(enabled);
    }

    /// Drain frames accumulated in the recording queue.
    pub fn drain_recorded(&self) -> Vec<Frame> {
        self.receiver.drain_recorded()
    }

    /// Stop ingestion, zero the device's stream destination registers, and
    /// release the socket.
    pub fn close(self) -> Result<(), GenicamError> {
        let Stream { receiver, channel, connection } = self;
        receiver.stop_receive();
        let receiver = Arc::try_unwrap(receiver).expect("ingestion thread stopped, receiver is uniquely owned");
        receiver.close_stream(&connection, channel)?;
        info!(channel, "GVSP stream closed");
        Ok(())
    }
}

//! The two output channels updates travel over, and the shared buffer that
//! feeds them.
//!
//! Control traffic and pull-mode updates go over the client's reliable
//! stream. Push-mode updates go out as single datagrams, one per update,
//! capped at the configured payload ceiling; the recursive splitter
//! guarantees the cap is respected before the buffer is flushed.

use std::io::{self, Write};
use std::net::{IpAddr, UdpSocket};

use crate::{Error, Result};

/// Size of the shared update output buffer.
pub const UPDATE_BUF_SIZE: usize = 30000;

/// Consumer of finished (or overflowing) update-buffer contents.
pub trait UpdateSink {
    fn send(&mut self, data: &[u8]) -> Result<()>;
}

/// Counts instead of transmitting; used to size an update before deciding
/// whether it must be split.
pub struct MeasureSink;

impl UpdateSink for MeasureSink {
    fn send(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Delivers update bytes over the client's reliable stream.
pub struct StreamSink<'a, W: Write> {
    stream: &'a mut W,
}

impl<'a, W: Write> StreamSink<'a, W> {
    pub fn new(stream: &'a mut W) -> StreamSink<'a, W> {
        StreamSink { stream }
    }
}

impl<'a, W: Write> UpdateSink for StreamSink<'a, W> {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data)?;
        Ok(())
    }
}

/// An unreliable datagram channel. The socket primitive stays outside the
/// engine; [`UdpChannel`] adapts the standard library socket.
pub trait Datagram {
    fn send_to(&mut self, payload: &[u8], peer: IpAddr) -> io::Result<usize>;
}

/// Sends updates to a client's address on a fixed UDP port.
pub struct UdpChannel {
    socket: UdpSocket,
    port: u16,
}

impl UdpChannel {
    pub fn new(socket: UdpSocket, port: u16) -> UdpChannel {
        UdpChannel { socket, port }
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }
}

impl Datagram for UdpChannel {
    fn send_to(&mut self, payload: &[u8], peer: IpAddr) -> io::Result<usize> {
        self.socket.send_to(payload, (peer, self.port))
    }
}

/// Delivers one update as exactly one datagram. Oversized payloads and
/// short sends are fatal for the session.
pub struct DatagramSink<'a, D: Datagram> {
    channel: &'a mut D,
    peer: IpAddr,
    max_payload: usize,
}

impl<'a, D: Datagram> DatagramSink<'a, D> {
    pub fn new(channel: &'a mut D, peer: IpAddr, max_payload: usize) -> DatagramSink<'a, D> {
        DatagramSink { channel, peer, max_payload }
    }
}

impl<'a, D: Datagram> UpdateSink for DatagramSink<'a, D> {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.max_payload {
            return Err(Error::DatagramTooLarge(data.len()));
        }
        let sent = self.channel.send_to(data, self.peer)?;
        if sent != data.len() {
            return Err(Error::DatagramTruncated(sent, data.len()));
        }
        Ok(())
    }
}

/// The update output buffer. Encoders append through the `Write` impl;
/// callers that may exceed the buffer reserve room first, which flushes the
/// buffered prefix through the sink.
pub struct UpdateWriter<'a> {
    buf: Vec<u8>,
    capacity: usize,
    total: usize,
    sink: &'a mut dyn UpdateSink,
}

impl<'a> UpdateWriter<'a> {
    pub fn new(sink: &'a mut dyn UpdateSink) -> UpdateWriter<'a> {
        UpdateWriter::with_capacity(sink, UPDATE_BUF_SIZE)
    }

    pub fn with_capacity(sink: &'a mut dyn UpdateSink, capacity: usize) -> UpdateWriter<'a> {
        UpdateWriter { buf: Vec::with_capacity(capacity.min(4096)), capacity, total: 0, sink }
    }

    /// Makes room for `additional` bytes, flushing buffered output if the
    /// buffer would overflow.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        if self.buf.len() + additional > self.capacity {
            self.flush_buffer()?;
        }
        Ok(())
    }

    /// Room left before the next flush.
    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    pub fn flush_buffer(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.sink.send(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }

    /// Bytes written so far, flushed or not.
    pub fn total_bytes(&self) -> usize {
        self.total
    }

    /// Flushes the tail of the update and reports its total size.
    pub fn finish(mut self) -> Result<usize> {
        self.flush_buffer()?;
        Ok(self.total)
    }
}

impl<'a> Write for UpdateWriter<'a> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        self.total += data.len();
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

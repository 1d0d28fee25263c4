//! The tunnel engine: shuttles packets between a TUN device and a
//! connected UDP socket.  Both peers run the same engine; they differ
//! only in how the socket got connected.

use std::fs::File;
use std::io;

use std::io::{BufWriter, Write};
use std::net::UdpSocket;
use std::os::fd::AsFd;

use crate::err::*;
use crate::event_loop::{EventLoop, Flow};
use crate::frame::{self, SequenceCounter, HEADER_LEN};
use crate::packet_log::PacketLog;
use crate::tun::{TunDevice, MAX_PACKET};

/// Anything that moves whole packets through a pollable fd: one read
/// is one packet, one write is one packet.
pub trait PacketDevice: AsFd {
    fn recv_packet(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn send_packet(&self, packet: &[u8]) -> io::Result<()>;
}

impl PacketDevice for TunDevice {
    fn recv_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }
    fn send_packet(&self, packet: &[u8]) -> io::Result<()> {
        self.write(packet)
    }
}

/// A connected socket: the peer is implicit.
impl PacketDevice for UdpSocket {
    fn recv_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf)
    }
    fn send_packet(&self, packet: &[u8]) -> io::Result<()> {
        let n = self.send(packet)?;
        if n != packet.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero,
                                      "short datagram send"));
        }
        Ok(())
    }
}

/// Device → socket: read one packet, give it the next egress id, log
/// it, send it framed.
fn pump_egress<D, W>(device: &D, socket: &UdpSocket,
                     seq: &mut SequenceCounter, log: &mut PacketLog<W>,
                     packet: &mut [u8], frame_buf: &mut Vec<u8>)
                     -> Result<(), HLError>
    where D: PacketDevice + ?Sized, W: Write
{
    let len = device.recv_packet(packet)
        .map_err(|e| map_io_err(e, String::from("read from TUN device")))?;
    let id = seq.advance();
    log.record(id, len)?;
    frame::encode(id, &packet[..len], frame_buf);
    socket.send_packet(frame_buf)
        .map_err(|e| map_io_err(e, String::from("send to peer")))
}

/// Socket → device: read one datagram, split off the sender's id, log
/// it, inject the packet.
fn pump_ingress<D, W>(socket: &UdpSocket, device: &D,
                      log: &mut PacketLog<W>, datagram: &mut [u8])
                      -> Result<(), HLError>
    where D: PacketDevice + ?Sized, W: Write
{
    let len = socket.recv_packet(datagram)
        .map_err(|e| map_io_err(e, String::from("receive from peer")))?;
    let (id, payload) = frame::decode(&datagram[..len])?;
    log.record(id, payload.len())?;
    device.send_packet(payload)
        .map_err(|e| map_io_err(e, String::from("write to TUN device")))
}

pub struct TunnelEngine<D = TunDevice, W: Write = BufWriter<File>> {
    device: D,
    socket: UdpSocket,
    egress_seq: SequenceCounter,
    egress_log: PacketLog<W>,
    ingress_log: PacketLog<W>,
    packet: Vec<u8>,
    datagram: Vec<u8>,
    frame_buf: Vec<u8>,
}

impl<D: PacketDevice, W: Write> TunnelEngine<D, W> {
    /// `socket` must already be connected to the peer.
    pub fn new(device: D, socket: UdpSocket,
               ingress_log: PacketLog<W>, egress_log: PacketLog<W>)
               -> TunnelEngine<D, W> {
        TunnelEngine {
            device,
            socket,
            egress_seq: SequenceCounter::new(),
            egress_log,
            ingress_log,
            packet: vec![0; MAX_PACKET],
            datagram: vec![0; HEADER_LEN + MAX_PACKET],
            frame_buf: Vec::with_capacity(HEADER_LEN + MAX_PACKET),
        }
    }

    /// Forward one packet from the device to the peer.
    pub fn forward_egress(&mut self) -> Result<(), HLError> {
        pump_egress(&self.device, &self.socket, &mut self.egress_seq,
                    &mut self.egress_log, &mut self.packet,
                    &mut self.frame_buf)
    }

    /// Forward one datagram from the peer to the device.
    pub fn forward_ingress(&mut self) -> Result<(), HLError> {
        pump_ingress(&self.socket, &self.device, &mut self.ingress_log,
                     &mut self.datagram)
    }

    /// Hook both directions into `event_loop`.  They keep running until
    /// the loop ends; any forwarding failure ends it with that error.
    pub fn attach<'a>(&'a mut self, event_loop: &mut EventLoop<'a>) {
        let TunnelEngine { device, socket, egress_seq, egress_log,
                           ingress_log, packet, datagram, frame_buf } = self;
        let device: &'a D = device;
        let socket: &'a UdpSocket = socket;

        event_loop.register(device, move || {
            pump_egress(device, socket, egress_seq, egress_log, packet,
                        frame_buf)?;
            Ok(Flow::Continue)
        });
        event_loop.register(socket, move || {
            pump_ingress(socket, device, ingress_log, datagram)?;
            Ok(Flow::Continue)
        });
    }

    /// Hand back both logs, ingress first.
    pub fn into_logs(self) -> (PacketLog<W>, PacketLog<W>) {
        (self.ingress_log, self.egress_log)
    }
}

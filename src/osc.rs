// OSC output - sends pattern events as UDP OSC messages
// Payload is [pitch, velocity] as two int32 arguments

use crate::sequencer::error::SequencerError;
use crate::sequencer::output::{OscEvent, OutputAdapter, OutputEvent};
use rosc::{OscMessage, OscPacket, OscType, encoder};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

pub struct OscSender {
    socket: UdpSocket,
    target: SocketAddr,
    label: String,
}

impl OscSender {
    /// Bind an ephemeral local socket and resolve `target` ("host:port")
    pub fn new(target: &str) -> Result<Self, SequencerError> {
        let target_addr = target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SequencerError::Osc(format!("Cannot resolve OSC target {}", target)))?;

        let bind_addr: SocketAddr = if target_addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)?;

        tracing::info!(target = %target_addr, "OSC output ready");
        Ok(Self {
            socket,
            target: target_addr,
            label: format!("osc://{}", target_addr),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn send(&self, event: &OscEvent) -> Result<(), SequencerError> {
        let buf = encode(event)?;
        self.socket.send_to(&buf, self.target)?;
        Ok(())
    }
}

/// Encode one event as an OSC packet
pub fn encode(event: &OscEvent) -> Result<Vec<u8>, SequencerError> {
    let packet = OscPacket::Message(OscMessage {
        addr: event.address.clone(),
        args: event.payload.iter().copied().map(OscType::Int).collect(),
    });
    encoder::encode(&packet).map_err(|e| SequencerError::Osc(e.to_string()))
}

impl OutputAdapter for OscSender {
    fn name(&self) -> &str {
        &self.label
    }

    fn deliver(&mut self, event: &OutputEvent) -> Result<(), SequencerError> {
        match event {
            OutputEvent::Osc(osc) => self.send(osc),
            OutputEvent::Note(_) => Ok(()),
        }
    }
}

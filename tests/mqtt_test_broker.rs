//! In-process MQTT v5 broker stand-in for session tests
//!
//! Listens on a local port, answers CONNECT, PUBLISH (QoS 1 and 2), PUBREL
//! and PINGREQ, and records every CONNECT, PUBLISH and DISCONNECT it sees in
//! arrival order. Nothing is routed to subscribers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Last will carried by a CONNECT
#[derive(Debug, Clone, PartialEq)]
pub struct Will {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

/// Packet received from a client
#[derive(Debug, Clone, PartialEq)]
pub enum Captured {
    Connect {
        client_id: String,
        will: Option<Will>,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: u8,
        retain: bool,
    },
    Disconnect,
}

impl Captured {
    pub fn publish(topic: &str, payload: &[u8], qos: u8, retain: bool) -> Self {
        Captured::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        }
    }

    pub fn is_publish_to(&self, wanted: &str) -> bool {
        matches!(self, Captured::Publish { topic, .. } if topic == wanted)
    }
}

pub struct TestBroker {
    port: u16,
    packets: Arc<Mutex<Vec<Captured>>>,
    accept_task: JoinHandle<()>,
}

impl TestBroker {
    /// Listen on an ephemeral port
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener)
    }

    /// Listen on a specific port, e.g. one a session is already retrying
    pub async fn start_on(port: u16) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        Self::serve(listener)
    }

    /// A local port with nothing listening on it
    pub async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn serve(listener: TcpListener) -> Self {
        let port = listener.local_addr().unwrap().port();
        let packets = Arc::new(Mutex::new(Vec::new()));
        let recorded = packets.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_client(stream, recorded.clone()));
            }
        });

        Self {
            port,
            packets,
            accept_task,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn packets(&self) -> Vec<Captured> {
        self.packets.lock().await.clone()
    }

    pub async fn publishes_to(&self, topic: &str) -> Vec<Captured> {
        self.packets()
            .await
            .into_iter()
            .filter(|packet| packet.is_publish_to(topic))
            .collect()
    }

    /// Poll the recorded packets until `condition` holds or `timeout` passes
    pub async fn wait_for<F>(&self, condition: F, timeout: Duration) -> bool
    where
        F: Fn(&[Captured]) -> bool,
    {
        tokio::time::timeout(timeout, async {
            loop {
                if condition(&self.packets.lock().await) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn handle_client(mut stream: TcpStream, packets: Arc<Mutex<Vec<Captured>>>) {
    loop {
        let Ok(header) = stream.read_u8().await else {
            return;
        };
        let Some(length) = read_remaining_length(&mut stream).await else {
            return;
        };
        let mut body = vec![0u8; length];
        if stream.read_exact(&mut body).await.is_err() {
            return;
        }

        let reply = match header >> 4 {
            // CONNECT -> CONNACK success, no properties
            1 => {
                packets.lock().await.push(parse_connect(&body));
                vec![0x20, 0x03, 0x00, 0x00, 0x00]
            }
            // PUBLISH -> PUBACK / PUBREC for QoS 1 / 2
            3 => {
                let (packet, qos, pkid) = parse_publish(header, &body);
                packets.lock().await.push(packet);
                let [hi, lo] = pkid.to_be_bytes();
                match qos {
                    1 => vec![0x40, 0x02, hi, lo],
                    2 => vec![0x50, 0x02, hi, lo],
                    _ => Vec::new(),
                }
            }
            // PUBREL -> PUBCOMP
            6 => vec![0x70, 0x02, body[0], body[1]],
            // PINGREQ -> PINGRESP
            12 => vec![0xD0, 0x00],
            // DISCONNECT
            14 => {
                packets.lock().await.push(Captured::Disconnect);
                return;
            }
            _ => Vec::new(),
        };

        if !reply.is_empty() && stream.write_all(&reply).await.is_err() {
            return;
        }
    }
}

async fn read_remaining_length(stream: &mut TcpStream) -> Option<usize> {
    let mut value = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.ok()?;
        value |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
        if shift > 21 {
            return None;
        }
    }
}

fn parse_connect(body: &[u8]) -> Captured {
    let mut reader = Reader::new(body);
    let _protocol = reader.string();
    let _level = reader.u8();
    let flags = reader.u8();
    let _keep_alive = reader.u16();
    reader.skip_properties();

    let client_id = reader.string();
    let will = (flags & 0x04 != 0).then(|| {
        reader.skip_properties();
        Will {
            topic: reader.string(),
            payload: reader.binary(),
            qos: (flags >> 3) & 0x03,
            retain: flags & 0x20 != 0,
        }
    });

    Captured::Connect { client_id, will }
}

fn parse_publish(header: u8, body: &[u8]) -> (Captured, u8, u16) {
    let qos = (header >> 1) & 0x03;
    let retain = header & 0x01 != 0;

    let mut reader = Reader::new(body);
    let topic = reader.string();
    let pkid = if qos > 0 { reader.u16() } else { 0 };
    reader.skip_properties();
    let payload = reader.rest().to_vec();

    (
        Captured::Publish {
            topic,
            payload,
            qos,
            retain,
        },
        qos,
        pkid,
    )
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> &'a [u8] {
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        bytes
    }

    fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    fn u16(&mut self) -> u16 {
        let bytes = self.take(2);
        u16::from_be_bytes([bytes[0], bytes[1]])
    }

    fn binary(&mut self) -> Vec<u8> {
        let n = usize::from(self.u16());
        self.take(n).to_vec()
    }

    fn string(&mut self) -> String {
        String::from_utf8_lossy(&self.binary()).into_owned()
    }

    fn varint(&mut self) -> usize {
        let mut value = 0usize;
        let mut shift = 0;
        loop {
            let byte = self.u8();
            value |= usize::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return value;
            }
            shift += 7;
        }
    }

    fn skip_properties(&mut self) {
        let n = self.varint();
        self.take(n);
    }

    fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.buf[self.pos..];
        self.pos = self.buf.len();
        bytes
    }
}

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use clap::{value_t, App, Arg};
use log::{error, info, warn};

use vncpush::display::{Framebuffer, InputSink};
use vncpush::encoder::EncoderRegistry;
use vncpush::transport::UdpChannel;
use vncpush::{PixelFormat, Rect, Server, ServerConfig};

/// A self-contained test pattern, standing in for a real display backend.
struct TestPattern {
    width: u16,
    height: u16,
}

impl Framebuffer for TestPattern {
    fn width(&self) -> u16 {
        self.width
    }

    fn height(&self) -> u16 {
        self.height
    }

    fn format(&self) -> PixelFormat {
        PixelFormat::new_rgb8888()
    }

    fn read_rect(&self, rect: Rect, out: &mut Vec<u8>) {
        out.clear();
        for y in rect.y1..rect.y2 {
            for x in rect.x1..rect.x2 {
                let value = (x as u32 ^ y as u32) | 0xFF00_0000;
                out.extend_from_slice(&value.to_be_bytes());
            }
        }
    }
}

/// Logs input events instead of injecting them anywhere.
struct LoggingInput;

impl InputSink for LoggingInput {
    fn key_event(&mut self, down: bool, key: u32) {
        info!("key {:#x} {}", key, if down { "down" } else { "up" });
    }

    fn pointer_event(&mut self, button_mask: u8, x: u16, y: u16) {
        info!("pointer {:#04x} at ({}, {})", button_mask, x, y);
    }

    fn cut_text(&mut self, text: &str) {
        info!("clipboard: {:?}", text);
    }

    fn release_all_keys(&mut self) {
        info!("releasing all keys");
    }
}

fn main() {
    env_logger::init();

    let matches = App::new("rvncpushd")
        .about("VNC server with adaptive datagram updates")
        .arg(Arg::with_name("LISTEN-PORT")
                .help("port to listen on (default: 5900)")
                .index(1))
        .arg(Arg::with_name("udp-port")
                .long("udp-port")
                .takes_value(true)
                .help("UDP port updates are pushed to (default: 6829)"))
        .arg(Arg::with_name("push-interval")
                .long("push-interval")
                .takes_value(true)
                .help("initial push interval in milliseconds (default: 66)"))
        .arg(Arg::with_name("pull-threshold")
                .long("pull-threshold")
                .takes_value(true)
                .help("update requests before switching to server push (default: 10)"))
        .arg(Arg::with_name("desktop")
                .long("desktop")
                .takes_value(true)
                .help("desktop name (default: x11)"))
        .arg(Arg::with_name("view-only")
                .long("view-only")
                .help("ignore all client input"))
        .arg(Arg::with_name("always-shared")
                .long("always-shared")
                .help("treat every client as shared"))
        .arg(Arg::with_name("never-shared")
                .long("never-shared")
                .help("never share, whatever clients request"))
        .arg(Arg::with_name("dont-disconnect")
                .long("dont-disconnect")
                .help("refuse non-shared clients instead of disconnecting others"))
        .get_matches();

    let listen_port = value_t!(matches.value_of("LISTEN-PORT"), u16).unwrap_or(5900);

    let mut config = ServerConfig::default();
    config.datagram_port = value_t!(matches.value_of("udp-port"), u16)
        .unwrap_or(config.datagram_port);
    config.push_interval = value_t!(matches.value_of("push-interval"), u64)
        .unwrap_or(config.push_interval);
    config.pull_threshold = value_t!(matches.value_of("pull-threshold"), u32)
        .unwrap_or(config.pull_threshold);
    if let Some(desktop) = matches.value_of("desktop") {
        config.desktop_name = String::from(desktop);
    }
    config.view_only = matches.is_present("view-only");
    config.always_shared = matches.is_present("always-shared");
    config.never_shared = matches.is_present("never-shared");
    config.dont_disconnect = matches.is_present("dont-disconnect");
    config.user_name = std::env::var("USER").ok();
    let tick_interval = config.tick_interval;

    let listener = match TcpListener::bind(("0.0.0.0", listen_port)) {
        Ok(listener) => listener,
        Err(error) => {
            error!("cannot listen on port {}: {}", listen_port, error);
            std::process::exit(1)
        }
    };
    listener.set_nonblocking(true).expect("cannot use a non-blocking listener");

    let udp_socket = match UdpSocket::bind(("0.0.0.0", config.datagram_port)) {
        Ok(socket) => socket,
        Err(error) => {
            error!("cannot bind UDP port {}: {}", config.datagram_port, error);
            std::process::exit(1)
        }
    };
    let udp_input = udp_socket.try_clone().expect("cannot clone the UDP socket");
    udp_input.set_nonblocking(true).expect("cannot use a non-blocking UDP socket");
    let channel = UdpChannel::new(udp_socket, config.datagram_port);

    info!("listening on port {}, pushing to UDP port {}", listen_port, config.datagram_port);

    let (width, height) = (660u16, 668u16);
    let mut server: Server<TcpStream, UdpChannel> = Server::new(
        config,
        Box::new(TestPattern { width, height }),
        Box::new(LoggingInput),
        EncoderRegistry::new(),
        channel,
    );

    let started = Instant::now();
    let mut last_frame = 0u64;
    let mut frame = 0u32;
    loop {
        let now = started.elapsed().as_millis() as u64;

        match listener.accept() {
            Ok((stream, address)) => {
                stream.set_nonblocking(true).ok();
                match server.accept(stream, address.ip(), now) {
                    Ok(id) => info!("client {} connected from {}", id, address),
                    Err(error) => error!("handshake failed: {}", error),
                }
            }
            Err(ref error) if error.kind() == ErrorKind::WouldBlock => (),
            Err(error) => error!("incoming connection failed: {}", error),
        }

        // One message per readable client per pass. The peek decides whether
        // a message has started arriving; the read itself then blocks until
        // the message is complete.
        for id in server.client_ids() {
            let readable = match server.stream_mut(id) {
                Some(stream) => match stream.peek(&mut [0u8; 1]) {
                    Ok(0) => true, // EOF: let the read path close the session
                    Ok(_) => {
                        stream.set_nonblocking(false).ok();
                        true
                    }
                    Err(ref error) if error.kind() == ErrorKind::WouldBlock => false,
                    Err(error) => {
                        warn!("client {}: {}", id, error);
                        true
                    }
                },
                None => false,
            };
            if readable {
                let _ = server.process_client(id, now);
                if let Some(stream) = server.stream_mut(id) {
                    stream.set_nonblocking(true).ok();
                }
            }
        }

        let mut payload = [0u8; 64];
        match udp_input.recv_from(&mut payload) {
            Ok((length, _)) => server.process_datagram_input(&payload[..length]),
            Err(ref error) if error.kind() == ErrorKind::WouldBlock => (),
            Err(error) => warn!("datagram input: {}", error),
        }

        // Damage a cycling band of the pattern once per tick so there is
        // something to stream.
        if now.saturating_sub(last_frame) >= tick_interval {
            last_frame = now;
            frame = frame.wrapping_add(1);
            let band = i32::from(height) / 16;
            let y = (frame as i32 % 16) * band;
            server.mark_modified(Rect::new(0, y, i32::from(width), y + band));
        }
        server.tick(now);

        thread::sleep(Duration::from_millis(5));
    }
}

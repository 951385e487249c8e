//! The protocol state machine, message dispatch and the push scheduler.
//!
//! A [`Server`] owns every client connection. The embedding event loop
//! drives it with three calls: [`Server::process_client`] when a client's
//! reliable stream is readable, [`Server::process_datagram_input`] when the
//! datagram socket is, and [`Server::tick`] on a periodic timer. All
//! processing for one client is serialized; errors close only the affected
//! session.

use std::io::{Read, Write};
use std::net::IpAddr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info, warn};

use crate::display::{Framebuffer, InputSink};
use crate::encoder::EncoderRegistry;
use crate::protocol::{
    C2S, ClientInit, Encoding, InteractionCaps, Message, S2C, SecurityResult, SecurityType,
    SecurityTypes, ServerInit, Version,
};
use crate::region::Rect;
use crate::session::{Session, State};
use crate::transport::{Datagram, DatagramSink, StreamSink};
use crate::update::{recursive_send, send_update};
use crate::{Error, Result, ServerConfig};

/// A session paired with the stream its connection arrived on.
pub struct ClientConn<S> {
    pub session: Session,
    pub stream: S,
    pub peer: IpAddr,
}

pub struct Server<S, D> {
    config: ServerConfig,
    fb: Box<dyn Framebuffer>,
    input: Box<dyn InputSink>,
    encoders: EncoderRegistry,
    datagram: D,
    clients: Vec<ClientConn<S>>,
    /// Session currently holding the pointer, by id. Arbitrated by button
    /// mask transitions: pressing grabs, releasing lets go.
    pointer_owner: Option<u32>,
    next_session_id: u32,
    accepted_primary: bool,
}

impl<S: Read + Write, D: Datagram> Server<S, D> {
    pub fn new(
        config: ServerConfig,
        fb: Box<dyn Framebuffer>,
        input: Box<dyn InputSink>,
        encoders: EncoderRegistry,
        datagram: D,
    ) -> Server<S, D> {
        Server {
            config,
            fb,
            input,
            encoders,
            datagram,
            clients: Vec::new(),
            pointer_owner: None,
            next_session_id: 0,
            accepted_primary: false,
        }
    }

    /// Registers an incoming connection and opens the version handshake by
    /// sending the highest protocol version we speak. The client may answer
    /// with a lower one but never higher.
    pub fn accept(&mut self, stream: S, peer: IpAddr, now: u64) -> Result<u32> {
        self.accept_connection(stream, peer, now, false)
    }

    /// Registers an outgoing connection to a listening viewer. Reverse
    /// connections are exempt from the sharing policy.
    pub fn accept_reverse(&mut self, stream: S, peer: IpAddr, now: u64) -> Result<u32> {
        self.accept_connection(stream, peer, now, true)
    }

    fn accept_connection(
        &mut self,
        mut stream: S,
        peer: IpAddr,
        now: u64,
        reverse: bool,
    ) -> Result<u32> {
        if self.clients.is_empty() {
            // no other clients - make sure we don't think any keys are pressed
            self.input.release_all_keys();
        }

        let id = self.next_session_id;
        self.next_session_id += 1;

        let mut session = Session::new(
            id,
            self.fb.width(),
            self.fb.height(),
            self.fb.format(),
            self.config.push_interval,
            self.config.tick_interval,
            now,
        );
        session.reverse_connection = reverse;
        if !self.accepted_primary {
            session.primary = true;
            self.accepted_primary = true;
        }

        debug!("-> Version::{:?}", Version::Rfb38);
        Version::Rfb38.write_to(&mut stream)?;

        info!("accepted client {} from {}", id, peer);
        self.clients.push(ClientConn { session, stream, peer });
        Ok(id)
    }

    pub fn num_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn client_ids(&self) -> Vec<u32> {
        self.clients.iter().map(|c| c.session.id).collect()
    }

    pub fn session(&self, id: u32) -> Option<&Session> {
        self.clients.iter().find(|c| c.session.id == id).map(|c| &c.session)
    }

    pub fn session_mut(&mut self, id: u32) -> Option<&mut Session> {
        self.clients.iter_mut().find(|c| c.session.id == id).map(|c| &mut c.session)
    }

    pub fn stream_mut(&mut self, id: u32) -> Option<&mut S> {
        self.clients.iter_mut().find(|c| c.session.id == id).map(|c| &mut c.stream)
    }

    pub fn datagram_mut(&mut self) -> &mut D {
        &mut self.datagram
    }

    /// Records a change to the framebuffer for every client.
    pub fn mark_modified(&mut self, rect: Rect) {
        for conn in &mut self.clients {
            conn.session.mark_modified(rect);
        }
    }

    /// Records a screen-to-screen copy for every client. Clients that never
    /// asked for CopyRect get the destination as plain damage instead.
    pub fn mark_copy(&mut self, dst: Rect, dx: i32, dy: i32) {
        for conn in &mut self.clients {
            if conn.session.use_copy_rect {
                conn.session.mark_copy(dst, dx, dy);
            } else {
                conn.session.mark_modified(dst);
            }
        }
    }

    fn index_of(&self, id: u32) -> Option<usize> {
        self.clients.iter().position(|c| c.session.id == id)
    }

    /// Handles one message from a client's reliable stream, dispatching on
    /// the session's protocol state. On any error the session is closed and
    /// the error returned; other sessions are unaffected.
    pub fn process_client(&mut self, id: u32, now: u64) -> Result<()> {
        match self.process_client_inner(id, now) {
            Ok(()) => Ok(()),
            Err(error) => {
                match &error {
                    Error::PolicyRefused => info!("refusing client {}: sharing policy", id),
                    Error::Disconnected => info!("client {} disconnected", id),
                    other => warn!("closing client {}: {}", id, other),
                }
                self.close_client(id);
                Err(error)
            }
        }
    }

    fn process_client_inner(&mut self, id: u32, now: u64) -> Result<()> {
        let index = self.index_of(id).ok_or(Error::Disconnected)?;
        match self.clients[index].session.state {
            State::ProtocolVersion => self.process_version(index),
            State::SecurityType => self.process_security_type(index),
            State::TunnelingType => self.process_tunneling_type(index),
            State::AuthType => self.process_auth_type(index),
            State::Authentication => Err(Error::Unexpected("authentication state")),
            State::Initialisation => self.process_client_init(index),
            State::Normal => {
                let message = C2S::read_from(&mut self.clients[index].stream)?;
                debug!("<- {:?}", message);
                self.handle_normal(index, message, now)
            }
            State::Closed => Err(Error::Disconnected),
        }
    }

    fn process_version(&mut self, index: usize) -> Result<()> {
        let conn = &mut self.clients[index];
        let version = Version::negotiate_from(&mut conn.stream)?;
        debug!("<- Version::{:?} (client {})", version, conn.session.id);
        conn.session.version = version;
        // Tight protocol extensions are not negotiated yet.
        conn.session.tight_extensions = false;

        match version {
            Version::Rfb33 => {
                // In 3.3 the server dictates the security type as a u32.
                conn.stream.write_u32::<BigEndian>(1)?;
                conn.session.state = State::Initialisation;
            }
            _ => {
                let security_types = SecurityTypes(vec![SecurityType::None]);
                debug!("-> {:?}", security_types);
                security_types.write_to(&mut conn.stream)?;
                conn.session.state = State::SecurityType;
            }
        }
        Ok(())
    }

    fn process_security_type(&mut self, index: usize) -> Result<()> {
        let conn = &mut self.clients[index];
        let security_type = SecurityType::read_from(&mut conn.stream)?;
        debug!("<- SecurityType::{:?}", security_type);
        if security_type != SecurityType::None {
            return Err(Error::Unexpected("security type"));
        }
        // 3.8 reports a security result even for None; 3.7 does not.
        if conn.session.version == Version::Rfb38 {
            SecurityResult::Succeeded.write_to(&mut conn.stream)?;
        }
        conn.session.state = if conn.session.tight_extensions {
            State::TunnelingType
        } else {
            State::Initialisation
        };
        Ok(())
    }

    fn process_tunneling_type(&mut self, index: usize) -> Result<()> {
        let conn = &mut self.clients[index];
        let tunnel_type = conn.stream.read_u32::<BigEndian>()?;
        if tunnel_type != 0 {
            return Err(Error::Unexpected("tunneling type"));
        }
        conn.session.state = State::AuthType;
        Ok(())
    }

    fn process_auth_type(&mut self, index: usize) -> Result<()> {
        let conn = &mut self.clients[index];
        let auth_type = conn.stream.read_u32::<BigEndian>()?;
        if auth_type != 1 {
            return Err(Error::Unexpected("authentication scheme"));
        }
        SecurityResult::Succeeded.write_to(&mut conn.stream)?;
        conn.session.state = State::Initialisation;
        Ok(())
    }

    fn process_client_init(&mut self, index: usize) -> Result<()> {
        let others: Vec<u32> = self
            .clients
            .iter()
            .enumerate()
            .filter(|(i, c)| *i != index && c.session.state == State::Normal)
            .map(|(_, c)| c.session.id)
            .collect();

        let name = self.server_name();
        let (width, height, format) = (self.fb.width(), self.fb.height(), self.fb.format());

        let conn = &mut self.clients[index];
        let client_init = ClientInit::read_from(&mut conn.stream)?;
        debug!("<- {:?}", client_init);
        conn.session.shared = client_init.shared;

        let server_init = ServerInit {
            framebuffer_width: width,
            framebuffer_height: height,
            pixel_format: format,
            name,
        };
        debug!("-> {:?}", server_init);
        server_init.write_to(&mut conn.stream)?;
        if conn.session.tight_extensions {
            InteractionCaps::supported().write_to(&mut conn.stream)?;
        }
        conn.session.state = State::Normal;
        info!("client {} entering normal protocol", conn.session.id);

        let unshared = !conn.session.reverse_connection
            && (self.config.never_shared || (!self.config.always_shared && !client_init.shared));
        if unshared && !others.is_empty() {
            if self.config.dont_disconnect {
                return Err(Error::PolicyRefused);
            }
            for other in others {
                info!("closing client {}: not shared", other);
                self.close_client(other);
            }
        }
        Ok(())
    }

    fn handle_normal(&mut self, index: usize, message: C2S, now: u64) -> Result<()> {
        let Server { clients, fb, input, encoders, config, pointer_owner, .. } = self;
        let ClientConn { session, stream, .. } = &mut clients[index];

        match message {
            C2S::SetPixelFormat(format) => {
                session.format = format;
                session.ready_for_colour_map = true;
            }

            C2S::FixColourMapEntries { .. } => {
                return Err(Error::Unexpected("FixColourMapEntries"));
            }

            C2S::SetEncodings(encodings) => {
                let mut preferred = None;
                session.use_copy_rect = false;
                session.cursor_shape_updates = false;
                session.rich_cursor = false;
                session.cursor_pos_updates = false;
                session.last_rect_encoding = false;
                session.tight_compress_level = 6;
                session.tight_quality_level = -1;

                for encoding in encodings {
                    match encoding {
                        Encoding::CopyRect => session.use_copy_rect = true,
                        e if e.is_pixel_encoding() => {
                            if preferred.is_none() {
                                debug!("client {} prefers {:?} encoding", session.id, e);
                                preferred = Some(e);
                            }
                        }
                        Encoding::XCursor => {
                            session.cursor_shape_updates = true;
                            session.rich_cursor = false;
                            session.cursor_was_changed = true;
                        }
                        Encoding::RichCursor => {
                            if !session.cursor_shape_updates {
                                session.cursor_shape_updates = true;
                                session.rich_cursor = true;
                                session.cursor_was_changed = true;
                            }
                        }
                        Encoding::PointerPos => {
                            if !session.cursor_pos_updates {
                                session.cursor_pos_updates = true;
                                session.cursor_was_moved = true;
                                session.cursor_x = -1;
                                session.cursor_y = -1;
                            }
                        }
                        Encoding::LastRect => session.last_rect_encoding = true,
                        Encoding::CompressLevel(level) => {
                            session.zlib_compress_level = level;
                            session.tight_compress_level = level;
                        }
                        Encoding::QualityLevel(level) => {
                            session.tight_quality_level = i32::from(level);
                        }
                        Encoding::Unknown(value) => {
                            debug!("ignoring unknown encoding {}", value);
                        }
                        _ => {}
                    }
                }

                session.preferred_encoding = preferred.unwrap_or(Encoding::Raw);
                // Position updates are useless to a client that cannot draw
                // the cursor itself.
                if session.cursor_pos_updates && !session.cursor_shape_updates {
                    session.cursor_pos_updates = false;
                }
            }

            C2S::FramebufferUpdateRequest { incremental, x_position, y_position, width, height } => {
                session.stats.update_requests += 1;

                if session.primary {
                    session.update_request_count += 1;
                    if session.update_request_count > config.pull_threshold {
                        if !session.push_mode {
                            info!("client {}: switching to server push", session.id);
                            session.push_mode = true;
                            session.use_datagram = true;
                        }
                        return Ok(());
                    }
                }

                // Clamp to the screen: modified pixels must stay readable
                // from the framebuffer.
                let screen = Rect::new(0, 0, i32::from(fb.width()), i32::from(fb.height()));
                let rect = Rect::from_size(
                    i32::from(x_position),
                    i32::from(y_position),
                    i32::from(width),
                    i32::from(height),
                );
                if let Some(rect) = rect.intersect(&screen) {
                    session.add_requested(rect, incremental);
                }

                if !session.ready_for_colour_map {
                    /* client hasn't sent a SetPixelFormat so is using server's */
                    session.ready_for_colour_map = true;
                    if !session.format.true_colour {
                        let colours = fb.colour_map(0, 0);
                        S2C::SetColourMapEntries { first_colour: 0, colours }.write_to(stream)?;
                    }
                }

                if session.update_pending() {
                    let mut sink = StreamSink::new(stream);
                    send_update(session, fb.as_mut(), encoders, &mut sink, 0xFFFF_FFFF, true, None)?;
                }
            }

            C2S::KeyEvent { down, key, event_id } => {
                session.stats.key_events += 1;
                session.last_event_id = event_id;
                if !config.view_only && !session.view_only {
                    input.key_event(down, key);
                }
            }

            C2S::PointerEvent { button_mask, x_position, y_position, event_id } => {
                session.stats.pointer_events += 1;
                if let Some(owner) = *pointer_owner {
                    if owner != session.id {
                        return Ok(());
                    }
                }
                session.last_event_id = event_id;
                *pointer_owner = if button_mask == 0 { None } else { Some(session.id) };
                if !config.view_only && !session.view_only {
                    session.record_pointer(x_position, y_position);
                    input.pointer_event(button_mask, x_position, y_position);
                }
            }

            C2S::CutText(text) => {
                session.stats.cut_texts += 1;
                /* NOTE: We do not accept cut text from a view-only client */
                if !config.view_only && !session.view_only {
                    input.cut_text(&text);
                }
            }

            C2S::FramebufferUpdateAck { seq_num } => {
                session.stats.acks_received += 1;
                let lookup = session.unacked.delete_by_seq(seq_num);
                if lookup.is_none() {
                    debug!("late or duplicate ack for seq {}", seq_num);
                }
                session.adaptive.on_ack(seq_num, lookup, now);
            }
        }
        Ok(())
    }

    /// Runs the push scheduler over every eligible client: expires unacked
    /// updates into the modified region, supersedes in-flight updates the
    /// new frame covers, and pushes the modified extents as datagrams.
    pub fn tick(&mut self, now: u64) {
        let mut failed = Vec::new();
        {
            let Server { clients, fb, encoders, datagram, config, .. } = self;
            for conn in clients.iter_mut() {
                let session = &mut conn.session;
                if session.state != State::Normal || !session.primary || !session.push_mode {
                    continue;
                }

                {
                    let Session { adaptive, tight_quality_level, .. } = session;
                    adaptive.on_tick(now, tight_quality_level);
                }

                if !session.update_pending() {
                    continue;
                }
                if now.saturating_sub(session.last_update) <= session.adaptive.push_interval() {
                    continue;
                }

                {
                    let Session { unacked, modified, adaptive, .. } = session;
                    unacked.age_scan(now, adaptive.retransmit_timeout(), modified);
                    // The new frame re-encodes these pixels from current
                    // state; older in-flight updates for them are obsolete.
                    unacked.subtract_region(modified);
                }

                let extents = session.modified.extents();
                session.adaptive.begin_frame();
                let mut sink = DatagramSink::new(datagram, conn.peer, config.max_update_size);
                match recursive_send(
                    session,
                    fb.as_mut(),
                    encoders,
                    &mut sink,
                    extents,
                    now,
                    config.max_update_size,
                ) {
                    Ok(()) => session.last_update = now,
                    Err(error) => {
                        warn!("push to client {} failed: {}", session.id, error);
                        failed.push(session.id);
                    }
                }
            }
        }
        for id in failed {
            self.close_client(id);
        }
    }

    /// Rings the bell on every connected client.
    pub fn bell(&mut self) {
        let mut failed = Vec::new();
        for conn in &mut self.clients {
            if conn.session.state != State::Normal {
                continue;
            }
            if S2C::Bell.write_to(&mut conn.stream).is_err() {
                failed.push(conn.session.id);
            }
        }
        for id in failed {
            self.close_client(id);
        }
    }

    /// Propagates the server-side clipboard to every connected client.
    pub fn server_cut_text(&mut self, text: &str) {
        if self.config.view_only {
            return;
        }
        let mut failed = Vec::new();
        for conn in &mut self.clients {
            if conn.session.state != State::Normal || conn.session.view_only {
                continue;
            }
            if S2C::CutText(String::from(text)).write_to(&mut conn.stream).is_err() {
                failed.push(conn.session.id);
            }
        }
        for id in failed {
            self.close_client(id);
        }
    }

    /// Handles one datagram arriving on the input socket. Datagrams carry
    /// whole messages; only fixed-size key and pointer events are accepted,
    /// anything else is dropped.
    pub fn process_datagram_input(&mut self, payload: &[u8]) {
        let mut reader = payload;
        match C2S::read_from(&mut reader) {
            Ok(C2S::KeyEvent { down, key, .. }) if payload.len() == 12 => {
                if !self.config.view_only {
                    self.input.key_event(down, key);
                }
            }
            Ok(C2S::PointerEvent { button_mask, x_position, y_position, .. })
                if payload.len() == 10 =>
            {
                if !self.config.view_only {
                    self.input.pointer_event(button_mask, x_position, y_position);
                }
            }
            Ok(other) => warn!("ignoring datagram message {:?}", other),
            Err(error) => warn!("ignoring malformed datagram input: {}", error),
        }
    }

    /// Removes a client and releases everything it owned.
    pub fn close_client(&mut self, id: u32) {
        if let Some(index) = self.index_of(id) {
            let conn = self.clients.remove(index);
            let stats = &conn.session.stats;
            info!(
                "client {} gone: {} updates sent ({} bytes), {} acks, {} update requests",
                id,
                stats.updates_sent,
                stats.bytes_sent,
                stats.acks_received,
                stats.update_requests
            );
            if self.pointer_owner == Some(id) {
                self.pointer_owner = None;
            }
        }
    }

    /// The desktop name reported in ServerInit:
    /// `<user>'s <desktop> desktop (<host>:<display>)`.
    fn server_name(&self) -> String {
        let mut desktop = self.config.desktop_name.clone();
        /* sanity check on desktop name len */
        desktop.truncate(128);
        match &self.config.user_name {
            Some(user) => format!(
                "{}'s {} desktop ({}:{})",
                user, desktop, self.config.host_name, self.config.display
            ),
            None => {
                format!("{} desktop ({}:{})", desktop, self.config.host_name, self.config.display)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PixelFormat;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io;
    use std::rc::Rc;

    struct TestStream {
        input: VecDeque<u8>,
        output: Vec<u8>,
    }

    impl TestStream {
        fn new() -> TestStream {
            TestStream { input: VecDeque::new(), output: Vec::new() }
        }

        fn feed(&mut self, bytes: &[u8]) {
            self.input.extend(bytes.iter().copied());
        }

        fn feed_message(&mut self, message: &C2S) {
            let mut bytes = Vec::new();
            message.write_to(&mut bytes).unwrap();
            self.feed(&bytes);
        }
    }

    impl Read for TestStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.input.is_empty() {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted"));
            }
            let mut count = 0;
            while count < buf.len() {
                match self.input.pop_front() {
                    Some(byte) => {
                        buf[count] = byte;
                        count += 1;
                    }
                    None => break,
                }
            }
            Ok(count)
        }
    }

    impl Write for TestStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct TestDatagram {
        pub sent: Vec<(Vec<u8>, IpAddr)>,
    }

    impl Datagram for TestDatagram {
        fn send_to(&mut self, payload: &[u8], peer: IpAddr) -> io::Result<usize> {
            self.sent.push((payload.to_vec(), peer));
            Ok(payload.len())
        }
    }

    struct TestFramebuffer {
        width: u16,
        height: u16,
    }

    impl Framebuffer for TestFramebuffer {
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
            out.resize(rect.width() as usize * rect.height() as usize * 4, 0x33);
        }
    }

    #[derive(Debug, PartialEq, Eq)]
    enum InputEvent {
        Key(bool, u32),
        Pointer(u8, u16, u16),
        CutText(String),
        ReleaseAllKeys,
    }

    #[derive(Clone)]
    struct RecordingInput {
        events: Rc<RefCell<Vec<InputEvent>>>,
    }

    impl InputSink for RecordingInput {
        fn key_event(&mut self, down: bool, key: u32) {
            self.events.borrow_mut().push(InputEvent::Key(down, key));
        }

        fn pointer_event(&mut self, button_mask: u8, x: u16, y: u16) {
            self.events.borrow_mut().push(InputEvent::Pointer(button_mask, x, y));
        }

        fn cut_text(&mut self, text: &str) {
            self.events.borrow_mut().push(InputEvent::CutText(String::from(text)));
        }

        fn release_all_keys(&mut self) {
            self.events.borrow_mut().push(InputEvent::ReleaseAllKeys);
        }
    }

    type TestServer = Server<TestStream, TestDatagram>;

    fn server_with_config(config: ServerConfig) -> (TestServer, Rc<RefCell<Vec<InputEvent>>>) {
        let events = Rc::new(RefCell::new(Vec::new()));
        let input = RecordingInput { events: Rc::clone(&events) };
        let server = Server::new(
            config,
            Box::new(TestFramebuffer { width: 660, height: 668 }),
            Box::new(input),
            EncoderRegistry::new(),
            TestDatagram { sent: Vec::new() },
        );
        (server, events)
    }

    fn server() -> (TestServer, Rc<RefCell<Vec<InputEvent>>>) {
        server_with_config(ServerConfig::default())
    }

    fn peer() -> IpAddr {
        "192.0.2.1".parse().unwrap()
    }

    fn connect(server: &mut TestServer, shared: bool) -> u32 {
        let id = server.accept(TestStream::new(), peer(), 0).unwrap();
        server.stream_mut(id).unwrap().feed(b"RFB 003.008\n");
        server.process_client(id, 0).unwrap();
        assert_eq!(server.session(id).unwrap().state, State::SecurityType);
        server.stream_mut(id).unwrap().feed(&[1]);
        server.process_client(id, 0).unwrap();
        assert_eq!(server.session(id).unwrap().state, State::Initialisation);
        server.stream_mut(id).unwrap().feed(&[if shared { 1 } else { 0 }]);
        server.process_client(id, 0).unwrap();
        assert_eq!(server.session(id).unwrap().state, State::Normal);
        id
    }

    fn send(server: &mut TestServer, id: u32, message: C2S, now: u64) -> Result<()> {
        server.stream_mut(id).unwrap().feed_message(&message);
        server.process_client(id, now)
    }

    fn update_request(full: bool) -> C2S {
        C2S::FramebufferUpdateRequest {
            incremental: !full,
            x_position: 0,
            y_position: 0,
            width: 660,
            height: 668,
        }
    }

    #[test]
    fn handshake_reaches_normal_state() {
        let (mut server, events) = server();
        let id = connect(&mut server, true);
        let output = &server.stream_mut(id).unwrap().output;
        assert!(output.starts_with(b"RFB 003.008\n"));
        // first client triggers a key release
        assert_eq!(events.borrow()[0], InputEvent::ReleaseAllKeys);
        assert!(server.session(id).unwrap().primary);
    }

    #[test]
    fn rfb33_skips_the_security_negotiation() {
        let (mut server, _) = server();
        let id = server.accept(TestStream::new(), peer(), 0).unwrap();
        server.stream_mut(id).unwrap().feed(b"RFB 003.003\n");
        server.process_client(id, 0).unwrap();
        let session = server.session(id).unwrap();
        assert_eq!(session.version, Version::Rfb33);
        assert_eq!(session.state, State::Initialisation);
    }

    #[test]
    fn bad_version_string_closes_the_session() {
        let (mut server, _) = server();
        let id = server.accept(TestStream::new(), peer(), 0).unwrap();
        server.stream_mut(id).unwrap().feed(b"HTTP/1.1 200\n");
        assert!(server.process_client(id, 0).is_err());
        assert_eq!(server.num_clients(), 0);
    }

    #[test]
    fn set_encodings_picks_first_pixel_encoding_and_flags() {
        let (mut server, _) = server();
        let id = connect(&mut server, true);
        send(
            &mut server,
            id,
            C2S::SetEncodings(vec![
                Encoding::LastRect,
                Encoding::CopyRect,
                Encoding::Tight,
                Encoding::Hextile,
                Encoding::QualityLevel(9),
                Encoding::CompressLevel(2),
                Encoding::Unknown(4242),
            ]),
            0,
        )
        .unwrap();
        let session = server.session(id).unwrap();
        assert_eq!(session.preferred_encoding, Encoding::Tight);
        assert!(session.use_copy_rect);
        assert!(session.last_rect_encoding);
        assert_eq!(session.tight_quality_level, 9);
        assert_eq!(session.tight_compress_level, 2);
        assert_eq!(session.zlib_compress_level, 2);
    }

    #[test]
    fn cursor_position_requires_cursor_shape() {
        let (mut server, _) = server();
        let id = connect(&mut server, true);
        send(&mut server, id, C2S::SetEncodings(vec![Encoding::PointerPos]), 0).unwrap();
        assert!(!server.session(id).unwrap().cursor_pos_updates);

        send(
            &mut server,
            id,
            C2S::SetEncodings(vec![Encoding::PointerPos, Encoding::RichCursor]),
            0,
        )
        .unwrap();
        let session = server.session(id).unwrap();
        assert!(session.cursor_pos_updates);
        assert!(session.cursor_shape_updates);
        assert!(session.rich_cursor);
    }

    #[test]
    fn fix_colour_map_entries_is_rejected() {
        let (mut server, _) = server();
        let id = connect(&mut server, true);
        let result =
            send(&mut server, id, C2S::FixColourMapEntries { first_colour: 0, n_colours: 2 }, 0);
        assert!(result.is_err());
        assert_eq!(server.num_clients(), 0);
    }

    #[test]
    fn update_request_produces_a_stream_update() {
        let (mut server, _) = server();
        let id = connect(&mut server, true);
        let before = server.stream_mut(id).unwrap().output.len();
        send(&mut server, id, update_request(true), 0).unwrap();
        let session = server.session(id).unwrap();
        assert!(session.modified.is_empty());
        assert!(session.requested.is_empty());
        assert_eq!(session.stats.updates_sent, 1);
        assert!(server.stream_mut(id).unwrap().output.len() > before);
    }

    #[test]
    fn pull_flips_to_push_after_the_threshold() {
        let (mut server, _) = server();
        let id = connect(&mut server, true);
        for i in 0..10 {
            server.mark_modified(Rect::new(0, 0, 10, 10));
            let before = server.stream_mut(id).unwrap().output.len();
            send(&mut server, id, update_request(false), i).unwrap();
            assert!(
                server.stream_mut(id).unwrap().output.len() > before,
                "request {} should answer over the stream",
                i
            );
            assert!(!server.session(id).unwrap().push_mode);
        }

        // the eleventh request flips the session into push mode
        server.mark_modified(Rect::new(0, 0, 10, 10));
        let before = server.stream_mut(id).unwrap().output.len();
        send(&mut server, id, update_request(false), 11).unwrap();
        let session = server.session(id).unwrap();
        assert!(session.push_mode);
        assert!(session.use_datagram);
        assert_eq!(server.stream_mut(id).unwrap().output.len(), before);

        // from now on the scheduler pushes over the datagram channel
        server.tick(1000);
        assert!(!server.datagram_mut().sent.is_empty());
        assert!(!server.session(id).unwrap().unacked.is_empty());
    }

    #[test]
    fn non_primary_clients_never_flip_to_push() {
        let (mut server, _) = server();
        let first = connect(&mut server, true);
        let second = connect(&mut server, true);
        assert!(!server.session(second).unwrap().primary);
        for i in 0..20 {
            server.mark_modified(Rect::new(0, 0, 10, 10));
            send(&mut server, second, update_request(false), i).unwrap();
        }
        assert!(!server.session(second).unwrap().push_mode);
        assert!(server.session(first).unwrap().primary);
    }

    #[test]
    fn push_retransmit_folds_lost_updates_into_the_next_frame() {
        let (mut server, _) = server();
        let id = connect(&mut server, true);
        for i in 0..11 {
            server.mark_modified(Rect::new(0, 0, 10, 10));
            send(&mut server, id, update_request(false), i).unwrap();
        }
        server.mark_modified(Rect::new(0, 0, 50, 50));
        server.tick(1000);
        let sent_before = server.datagram_mut().sent.len();
        assert!(sent_before > 0);
        let first_seqs: Vec<u32> =
            server.session(id).unwrap().unacked.iter().map(|e| e.seq_num).collect();
        assert!(!first_seqs.is_empty());

        // no acks arrive; wait out the retransmit timeout and push again
        server.mark_modified(Rect::new(100, 100, 110, 110));
        server.tick(5000);
        assert!(server.datagram_mut().sent.len() > sent_before);
        // old sequence numbers are gone, newer ones replace them
        let session = server.session(id).unwrap();
        for entry in session.unacked.iter() {
            assert!(!first_seqs.contains(&entry.seq_num));
        }
    }

    #[test]
    fn ack_clears_the_queue_and_seeds_rtt() {
        let (mut server, _) = server();
        let id = connect(&mut server, true);
        for i in 0..11 {
            server.mark_modified(Rect::new(0, 0, 10, 10));
            send(&mut server, id, update_request(false), i).unwrap();
        }
        server.mark_modified(Rect::new(0, 0, 10, 10));
        server.tick(1000);
        let seqs: Vec<u32> =
            server.session(id).unwrap().unacked.iter().map(|e| e.seq_num).collect();
        assert!(!seqs.is_empty());

        for &seq in &seqs {
            send(&mut server, id, C2S::FramebufferUpdateAck { seq_num: seq }, 1100).unwrap();
        }
        let session = server.session(id).unwrap();
        assert!(session.unacked.is_empty());
        assert_eq!(session.adaptive.srtt(), Some(100.0));
        assert_eq!(session.adaptive.last_ack_seq_num(), *seqs.last().unwrap());

        // a duplicate ack is ignored
        send(&mut server, id, C2S::FramebufferUpdateAck { seq_num: seqs[0] }, 1200).unwrap();
        assert!(server.session(id).unwrap().unacked.is_empty());
    }

    #[test]
    fn pointer_lock_follows_button_transitions() {
        let (mut server, events) = server();
        let a = connect(&mut server, true);
        let b = connect(&mut server, true);
        events.borrow_mut().clear();

        let press = |x| C2S::PointerEvent {
            button_mask: 1,
            x_position: x,
            y_position: 0,
            event_id: 0,
        };
        let release = C2S::PointerEvent {
            button_mask: 0,
            x_position: 9,
            y_position: 0,
            event_id: 0,
        };

        send(&mut server, a, press(1), 0).unwrap();
        send(&mut server, b, press(2), 0).unwrap(); // dropped: a holds the lock
        send(&mut server, a, release, 0).unwrap();
        send(&mut server, b, press(3), 0).unwrap(); // accepted now

        assert_eq!(
            *events.borrow(),
            vec![
                InputEvent::Pointer(1, 1, 0),
                InputEvent::Pointer(0, 9, 0),
                InputEvent::Pointer(1, 3, 0),
            ]
        );
    }

    #[test]
    fn view_only_blocks_input_but_keeps_event_ids() {
        let (mut server, events) =
            server_with_config(ServerConfig { view_only: true, ..ServerConfig::default() });
        let id = connect(&mut server, true);
        events.borrow_mut().clear();
        send(&mut server, id, C2S::KeyEvent { down: true, key: 65, event_id: 1 }, 0).unwrap();
        send(
            &mut server,
            id,
            C2S::PointerEvent { button_mask: 1, x_position: 1, y_position: 1, event_id: 2 },
            0,
        )
        .unwrap();
        send(&mut server, id, C2S::CutText(String::from("secret")), 0).unwrap();
        assert!(events.borrow().is_empty());
        // the event id is still recorded for the update header echo
        assert_eq!(server.session(id).unwrap().last_event_id, 2);
    }

    #[test]
    fn sharing_policy_refuses_when_dont_disconnect() {
        let (mut server, _) = server_with_config(ServerConfig {
            dont_disconnect: true,
            ..ServerConfig::default()
        });
        let first = connect(&mut server, false);

        let second = server.accept(TestStream::new(), peer(), 0).unwrap();
        server.stream_mut(second).unwrap().feed(b"RFB 003.008\n");
        server.process_client(second, 0).unwrap();
        server.stream_mut(second).unwrap().feed(&[1]);
        server.process_client(second, 0).unwrap();
        server.stream_mut(second).unwrap().feed(&[0]);
        let result = server.process_client(second, 0);
        assert!(matches!(result, Err(Error::PolicyRefused)));
        assert_eq!(server.client_ids(), vec![first]);
    }

    #[test]
    fn sharing_policy_disconnects_others_by_default() {
        let (mut server, _) = server();
        let first = connect(&mut server, true);
        let second = connect(&mut server, false);
        assert_eq!(server.client_ids(), vec![second]);
        assert!(server.session(first).is_none());
    }

    #[test]
    fn always_shared_overrides_the_client_flag() {
        let (mut server, _) = server_with_config(ServerConfig {
            always_shared: true,
            ..ServerConfig::default()
        });
        let first = connect(&mut server, false);
        let second = connect(&mut server, false);
        assert_eq!(server.client_ids(), vec![first, second]);
    }

    #[test]
    fn bell_reaches_every_normal_client() {
        let (mut server, _) = server();
        let a = connect(&mut server, true);
        let b = connect(&mut server, true);
        let before_a = server.stream_mut(a).unwrap().output.len();
        let before_b = server.stream_mut(b).unwrap().output.len();
        server.bell();
        assert_eq!(server.stream_mut(a).unwrap().output.len(), before_a + 1);
        assert_eq!(server.stream_mut(b).unwrap().output.len(), before_b + 1);
    }

    #[test]
    fn datagram_input_injects_key_and_pointer_events() {
        let (mut server, events) = server();
        let _ = connect(&mut server, true);
        events.borrow_mut().clear();

        let mut key = Vec::new();
        C2S::KeyEvent { down: true, key: 65, event_id: 0 }.write_to(&mut key).unwrap();
        server.process_datagram_input(&key);

        let mut pointer = Vec::new();
        C2S::PointerEvent { button_mask: 1, x_position: 5, y_position: 6, event_id: 0 }
            .write_to(&mut pointer)
            .unwrap();
        server.process_datagram_input(&pointer);

        // truncated payloads are dropped
        server.process_datagram_input(&key[..5]);

        assert_eq!(
            *events.borrow(),
            vec![InputEvent::Key(true, 65), InputEvent::Pointer(1, 5, 6)]
        );
    }

    #[test]
    fn closing_a_client_releases_the_pointer_lock() {
        let (mut server, events) = server();
        let a = connect(&mut server, true);
        let b = connect(&mut server, true);
        send(
            &mut server,
            a,
            C2S::PointerEvent { button_mask: 1, x_position: 0, y_position: 0, event_id: 0 },
            0,
        )
        .unwrap();
        server.close_client(a);
        events.borrow_mut().clear();

        // b can take the lock immediately
        send(
            &mut server,
            b,
            C2S::PointerEvent { button_mask: 1, x_position: 4, y_position: 4, event_id: 0 },
            0,
        )
        .unwrap();
        assert_eq!(*events.borrow(), vec![InputEvent::Pointer(1, 4, 4)]);
        assert_eq!(server.session(b).unwrap().cursor_x, 4);
    }
}

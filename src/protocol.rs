//! RFB wire messages for protocol versions 3.3, 3.7 and 3.8, plus the
//! framebuffer-update acknowledgement this server layers on top.
//!
//! All multi-byte fields are big-endian. Every message knows how to read and
//! write itself through the [`Message`] trait; framing above the message
//! level (dispatch, state) lives in [`crate::server`].

use std::io::{ErrorKind as IoErrorKind, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::{Error, Result};

pub trait Message {
    fn read_from<R: Read>(reader: &mut R) -> Result<Self>
    where
        Self: Sized;
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()>;
}

/* All strings in VNC are either ASCII or Latin-1, both of which
   are embedded in Unicode. */
impl Message for String {
    fn read_from<R: Read>(reader: &mut R) -> Result<String> {
        let length = reader.read_u32::<BigEndian>()?;
        let mut string = vec![0; length as usize];
        reader.read_exact(&mut string)?;
        Ok(string.iter().map(|c| *c as char).collect())
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let length = self.len() as u32;
        writer.write_u32::<BigEndian>(length)?;
        writer.write_all(&self.chars().map(|c| c as u8).collect::<Vec<u8>>())?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Rfb33,
    Rfb37,
    Rfb38,
}

impl Version {
    /// Reads the peer's 12-byte version string and negotiates it down to one
    /// of the three standard protocol versions: minors above 8 come from
    /// buggy clients and get 3.8, minors 4 to 6 are non-standard and get
    /// 3.3, anything below 3 is ancient and also gets 3.3.
    pub fn negotiate_from<R: Read>(reader: &mut R) -> Result<Version> {
        let mut buf = [0; 12];
        reader.read_exact(&mut buf)?;
        if &buf[0..4] != b"RFB " || buf[7] != b'.' || buf[11] != b'\n' {
            return Err(Error::Unexpected("protocol version"));
        }
        let field = |bytes: &[u8]| -> Result<u32> {
            std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or(Error::Unexpected("protocol version"))
        };
        let major = field(&buf[4..7])?;
        let minor = field(&buf[8..11])?;
        if major != 3 {
            return Err(Error::Unexpected("protocol version"));
        }
        Ok(if minor >= 8 {
            Version::Rfb38
        } else if minor == 7 {
            Version::Rfb37
        } else {
            Version::Rfb33
        })
    }

    pub fn minor(&self) -> u8 {
        match self {
            Version::Rfb33 => 3,
            Version::Rfb37 => 7,
            Version::Rfb38 => 8,
        }
    }
}

impl Message for Version {
    fn read_from<R: Read>(reader: &mut R) -> Result<Version> {
        let mut buf = [0; 12];
        reader.read_exact(&mut buf)?;
        match &buf {
            b"RFB 003.003\n" => Ok(Version::Rfb33),
            b"RFB 003.007\n" => Ok(Version::Rfb37),
            b"RFB 003.008\n" => Ok(Version::Rfb38),
            _ => Err(Error::Unexpected("protocol version")),
        }
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            Version::Rfb33 => writer.write_all(b"RFB 003.003\n")?,
            Version::Rfb37 => writer.write_all(b"RFB 003.007\n")?,
            Version::Rfb38 => writer.write_all(b"RFB 003.008\n")?,
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityType {
    Unknown(u8),
    Invalid,
    None,
    VncAuthentication,
}

impl Message for SecurityType {
    fn read_from<R: Read>(reader: &mut R) -> Result<SecurityType> {
        let security_type = reader.read_u8()?;
        match security_type {
            0 => Ok(SecurityType::Invalid),
            1 => Ok(SecurityType::None),
            2 => Ok(SecurityType::VncAuthentication),
            n => Ok(SecurityType::Unknown(n)),
        }
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let security_type = match self {
            SecurityType::Invalid => 0,
            SecurityType::None => 1,
            SecurityType::VncAuthentication => 2,
            SecurityType::Unknown(n) => *n,
        };
        writer.write_u8(security_type)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct SecurityTypes(pub Vec<SecurityType>);

impl Message for SecurityTypes {
    fn read_from<R: Read>(reader: &mut R) -> Result<SecurityTypes> {
        let count = reader.read_u8()?;
        let mut security_types = Vec::new();
        for _ in 0..count {
            security_types.push(SecurityType::read_from(reader)?);
        }
        Ok(SecurityTypes(security_types))
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(self.0.len() as u8)?;
        for security_type in &self.0 {
            security_type.write_to(writer)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityResult {
    Succeeded,
    Failed,
}

impl Message for SecurityResult {
    fn read_from<R: Read>(reader: &mut R) -> Result<SecurityResult> {
        match reader.read_u32::<BigEndian>()? {
            0 => Ok(SecurityResult::Succeeded),
            1 => Ok(SecurityResult::Failed),
            _ => Err(Error::Unexpected("security result")),
        }
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let result = match self {
            SecurityResult::Succeeded => 0,
            SecurityResult::Failed => 1,
        };
        writer.write_u32::<BigEndian>(result)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct ClientInit {
    pub shared: bool,
}

impl Message for ClientInit {
    fn read_from<R: Read>(reader: &mut R) -> Result<ClientInit> {
        Ok(ClientInit { shared: reader.read_u8()? != 0 })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(if self.shared { 1 } else { 0 })?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_colour: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// RGB pixel format with 4 bytes per pixel and 3 bytes of depth.
    pub fn new_rgb8888() -> Self {
        PixelFormat {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: true,
            true_colour: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 0,
            green_shift: 8,
            blue_shift: 16,
        }
    }
}

impl Message for PixelFormat {
    fn read_from<R: Read>(reader: &mut R) -> Result<PixelFormat> {
        let pixel_format = PixelFormat {
            bits_per_pixel: reader.read_u8()?,
            depth: reader.read_u8()?,
            big_endian: reader.read_u8()? != 0,
            true_colour: reader.read_u8()? != 0,
            red_max: reader.read_u16::<BigEndian>()?,
            green_max: reader.read_u16::<BigEndian>()?,
            blue_max: reader.read_u16::<BigEndian>()?,
            red_shift: reader.read_u8()?,
            green_shift: reader.read_u8()?,
            blue_shift: reader.read_u8()?,
        };
        reader.read_exact(&mut [0u8; 3])?;
        Ok(pixel_format)
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(self.bits_per_pixel)?;
        writer.write_u8(self.depth)?;
        writer.write_u8(if self.big_endian { 1 } else { 0 })?;
        writer.write_u8(if self.true_colour { 1 } else { 0 })?;
        writer.write_u16::<BigEndian>(self.red_max)?;
        writer.write_u16::<BigEndian>(self.green_max)?;
        writer.write_u16::<BigEndian>(self.blue_max)?;
        writer.write_u8(self.red_shift)?;
        writer.write_u8(self.green_shift)?;
        writer.write_u8(self.blue_shift)?;
        writer.write_all(&[0u8; 3])?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct ServerInit {
    pub framebuffer_width: u16,
    pub framebuffer_height: u16,
    pub pixel_format: PixelFormat,
    pub name: String,
}

impl Message for ServerInit {
    fn read_from<R: Read>(reader: &mut R) -> Result<ServerInit> {
        Ok(ServerInit {
            framebuffer_width: reader.read_u16::<BigEndian>()?,
            framebuffer_height: reader.read_u16::<BigEndian>()?,
            pixel_format: PixelFormat::read_from(reader)?,
            name: String::read_from(reader)?,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(self.framebuffer_width)?;
        writer.write_u16::<BigEndian>(self.framebuffer_height)?;
        self.pixel_format.write_to(writer)?;
        self.name.write_to(writer)?;
        Ok(())
    }
}

/// One capability record in the interaction capabilities lists.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityInfo {
    pub code: i32,
    pub vendor: [u8; 4],
    pub signature: [u8; 8],
}

impl Message for CapabilityInfo {
    fn read_from<R: Read>(reader: &mut R) -> Result<CapabilityInfo> {
        let code = reader.read_i32::<BigEndian>()?;
        let mut vendor = [0; 4];
        reader.read_exact(&mut vendor)?;
        let mut signature = [0; 8];
        reader.read_exact(&mut signature)?;
        Ok(CapabilityInfo { code, vendor, signature })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_i32::<BigEndian>(self.code)?;
        writer.write_all(&self.vendor)?;
        writer.write_all(&self.signature)?;
        Ok(())
    }
}

const VENDOR_STANDARD: [u8; 4] = *b"STDV";
const VENDOR_TRIDIA: [u8; 4] = *b"TRDV";
const VENDOR_TIGHT: [u8; 4] = *b"TGHT";

/// Sent after ServerInit on tight-extension handshakes: the lists of
/// supported message types and encodings.
#[derive(Debug)]
pub struct InteractionCaps {
    pub server_messages: Vec<CapabilityInfo>,
    pub client_messages: Vec<CapabilityInfo>,
    pub encodings: Vec<CapabilityInfo>,
}

impl InteractionCaps {
    /// The capability list this server advertises.
    pub fn supported() -> InteractionCaps {
        let cap = |code, vendor, signature: &[u8; 8]| CapabilityInfo {
            code,
            vendor,
            signature: *signature,
        };
        InteractionCaps {
            server_messages: Vec::new(),
            client_messages: Vec::new(),
            encodings: vec![
                cap(1, VENDOR_STANDARD, b"COPYRECT"),
                cap(2, VENDOR_STANDARD, b"RRE_____"),
                cap(4, VENDOR_STANDARD, b"CORRE___"),
                cap(5, VENDOR_STANDARD, b"HEXTILE_"),
                cap(6, VENDOR_TRIDIA, b"ZLIB____"),
                cap(7, VENDOR_TIGHT, b"TIGHT___"),
                cap(-256, VENDOR_TIGHT, b"COMPRLVL"),
                cap(-32, VENDOR_TIGHT, b"JPEGQLVL"),
                cap(-240, VENDOR_TIGHT, b"X11CURSR"),
                cap(-239, VENDOR_TIGHT, b"RCHCURSR"),
                cap(-232, VENDOR_TIGHT, b"POINTPOS"),
                cap(-224, VENDOR_TIGHT, b"LASTRECT"),
            ],
        }
    }
}

impl Message for InteractionCaps {
    fn read_from<R: Read>(reader: &mut R) -> Result<InteractionCaps> {
        let n_server = reader.read_u16::<BigEndian>()?;
        let n_client = reader.read_u16::<BigEndian>()?;
        let n_encodings = reader.read_u16::<BigEndian>()?;
        reader.read_u16::<BigEndian>()?;
        let mut caps = InteractionCaps {
            server_messages: Vec::new(),
            client_messages: Vec::new(),
            encodings: Vec::new(),
        };
        for _ in 0..n_server {
            caps.server_messages.push(CapabilityInfo::read_from(reader)?);
        }
        for _ in 0..n_client {
            caps.client_messages.push(CapabilityInfo::read_from(reader)?);
        }
        for _ in 0..n_encodings {
            caps.encodings.push(CapabilityInfo::read_from(reader)?);
        }
        Ok(caps)
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(self.server_messages.len() as u16)?;
        writer.write_u16::<BigEndian>(self.client_messages.len() as u16)?;
        writer.write_u16::<BigEndian>(self.encodings.len() as u16)?;
        writer.write_u16::<BigEndian>(0)?;
        for cap in self
            .server_messages
            .iter()
            .chain(self.client_messages.iter())
            .chain(self.encodings.iter())
        {
            cap.write_to(writer)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct CopyRect {
    pub src_x_position: u16,
    pub src_y_position: u16,
}

impl Message for CopyRect {
    fn read_from<R: Read>(reader: &mut R) -> Result<CopyRect> {
        Ok(CopyRect {
            src_x_position: reader.read_u16::<BigEndian>()?,
            src_y_position: reader.read_u16::<BigEndian>()?,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(self.src_x_position)?;
        writer.write_u16::<BigEndian>(self.src_y_position)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Unknown(i32),
    // genuine encodings
    Raw,
    CopyRect,
    Rre,
    CoRre,
    Hextile,
    Zlib,
    Tight,
    // pseudo-encodings
    XCursor,
    RichCursor,
    PointerPos,
    LastRect,
    CompressLevel(u8),
    QualityLevel(u8),
}

impl Encoding {
    /// Whether this encoding can carry pixel rectangles, as opposed to a
    /// pseudo-encoding that only flags a protocol feature.
    pub fn is_pixel_encoding(&self) -> bool {
        matches!(
            self,
            Encoding::Raw
                | Encoding::Rre
                | Encoding::CoRre
                | Encoding::Hextile
                | Encoding::Zlib
                | Encoding::Tight
        )
    }
}

impl Message for Encoding {
    fn read_from<R: Read>(reader: &mut R) -> Result<Encoding> {
        let encoding = reader.read_i32::<BigEndian>()?;
        match encoding {
            0 => Ok(Encoding::Raw),
            1 => Ok(Encoding::CopyRect),
            2 => Ok(Encoding::Rre),
            4 => Ok(Encoding::CoRre),
            5 => Ok(Encoding::Hextile),
            6 => Ok(Encoding::Zlib),
            7 => Ok(Encoding::Tight),
            -240 => Ok(Encoding::XCursor),
            -239 => Ok(Encoding::RichCursor),
            -232 => Ok(Encoding::PointerPos),
            -224 => Ok(Encoding::LastRect),
            n if (-256..=-247).contains(&n) => Ok(Encoding::CompressLevel((n + 256) as u8)),
            n if (-32..=-23).contains(&n) => Ok(Encoding::QualityLevel((n + 32) as u8)),
            n => Ok(Encoding::Unknown(n)),
        }
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let encoding = match self {
            Encoding::Raw => 0,
            Encoding::CopyRect => 1,
            Encoding::Rre => 2,
            Encoding::CoRre => 4,
            Encoding::Hextile => 5,
            Encoding::Zlib => 6,
            Encoding::Tight => 7,
            Encoding::XCursor => -240,
            Encoding::RichCursor => -239,
            Encoding::PointerPos => -232,
            Encoding::LastRect => -224,
            Encoding::CompressLevel(n) => -256 + i32::from(*n),
            Encoding::QualityLevel(n) => -32 + i32::from(*n),
            Encoding::Unknown(n) => *n,
        };
        writer.write_i32::<BigEndian>(encoding)?;
        Ok(())
    }
}

/// Messages received from clients in the Normal protocol state.
///
/// Key and pointer events carry a 32-bit event id that is echoed back in
/// every framebuffer-update header, and type 7 acknowledges a
/// datagram-delivered update by sequence number.
#[derive(Debug, PartialEq, Eq)]
pub enum C2S {
    SetPixelFormat(PixelFormat),
    FixColourMapEntries {
        first_colour: u16,
        n_colours: u16,
    },
    SetEncodings(Vec<Encoding>),
    FramebufferUpdateRequest {
        incremental: bool,
        x_position: u16,
        y_position: u16,
        width: u16,
        height: u16,
    },
    KeyEvent {
        down: bool,
        key: u32,
        event_id: u32,
    },
    PointerEvent {
        button_mask: u8,
        x_position: u16,
        y_position: u16,
        event_id: u32,
    },
    CutText(String),
    FramebufferUpdateAck {
        seq_num: u32,
    },
}

impl Message for C2S {
    fn read_from<R: Read>(reader: &mut R) -> Result<C2S> {
        let message_type = match reader.read_u8() {
            Err(ref e) if e.kind() == IoErrorKind::UnexpectedEof => {
                return Err(Error::Disconnected)
            }
            result => result?,
        };
        match message_type {
            0 => {
                reader.read_exact(&mut [0u8; 3])?;
                Ok(C2S::SetPixelFormat(PixelFormat::read_from(reader)?))
            }
            1 => {
                reader.read_exact(&mut [0u8; 1])?;
                Ok(C2S::FixColourMapEntries {
                    first_colour: reader.read_u16::<BigEndian>()?,
                    n_colours: reader.read_u16::<BigEndian>()?,
                })
            }
            2 => {
                reader.read_exact(&mut [0u8; 1])?;
                let count = reader.read_u16::<BigEndian>()?;
                let mut encodings = Vec::new();
                for _ in 0..count {
                    encodings.push(Encoding::read_from(reader)?);
                }
                Ok(C2S::SetEncodings(encodings))
            }
            3 => Ok(C2S::FramebufferUpdateRequest {
                incremental: reader.read_u8()? != 0,
                x_position: reader.read_u16::<BigEndian>()?,
                y_position: reader.read_u16::<BigEndian>()?,
                width: reader.read_u16::<BigEndian>()?,
                height: reader.read_u16::<BigEndian>()?,
            }),
            4 => {
                let down = reader.read_u8()? != 0;
                reader.read_exact(&mut [0u8; 2])?;
                let key = reader.read_u32::<BigEndian>()?;
                let event_id = reader.read_u32::<BigEndian>()?;
                Ok(C2S::KeyEvent { down, key, event_id })
            }
            5 => Ok(C2S::PointerEvent {
                button_mask: reader.read_u8()?,
                x_position: reader.read_u16::<BigEndian>()?,
                y_position: reader.read_u16::<BigEndian>()?,
                event_id: reader.read_u32::<BigEndian>()?,
            }),
            6 => {
                reader.read_exact(&mut [0u8; 3])?;
                Ok(C2S::CutText(String::read_from(reader)?))
            }
            7 => {
                reader.read_exact(&mut [0u8; 3])?;
                Ok(C2S::FramebufferUpdateAck { seq_num: reader.read_u32::<BigEndian>()? })
            }
            _ => Err(Error::Unexpected("client to server message type")),
        }
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            C2S::SetPixelFormat(pixel_format) => {
                writer.write_u8(0)?;
                writer.write_all(&[0u8; 3])?;
                pixel_format.write_to(writer)?;
            }
            C2S::FixColourMapEntries { first_colour, n_colours } => {
                writer.write_u8(1)?;
                writer.write_all(&[0u8; 1])?;
                writer.write_u16::<BigEndian>(*first_colour)?;
                writer.write_u16::<BigEndian>(*n_colours)?;
            }
            C2S::SetEncodings(encodings) => {
                writer.write_u8(2)?;
                writer.write_all(&[0u8; 1])?;
                writer.write_u16::<BigEndian>(encodings.len() as u16)?;
                for encoding in encodings {
                    encoding.write_to(writer)?;
                }
            }
            C2S::FramebufferUpdateRequest { incremental, x_position, y_position, width, height } => {
                writer.write_u8(3)?;
                writer.write_u8(if *incremental { 1 } else { 0 })?;
                writer.write_u16::<BigEndian>(*x_position)?;
                writer.write_u16::<BigEndian>(*y_position)?;
                writer.write_u16::<BigEndian>(*width)?;
                writer.write_u16::<BigEndian>(*height)?;
            }
            C2S::KeyEvent { down, key, event_id } => {
                writer.write_u8(4)?;
                writer.write_u8(if *down { 1 } else { 0 })?;
                writer.write_all(&[0u8; 2])?;
                writer.write_u32::<BigEndian>(*key)?;
                writer.write_u32::<BigEndian>(*event_id)?;
            }
            C2S::PointerEvent { button_mask, x_position, y_position, event_id } => {
                writer.write_u8(5)?;
                writer.write_u8(*button_mask)?;
                writer.write_u16::<BigEndian>(*x_position)?;
                writer.write_u16::<BigEndian>(*y_position)?;
                writer.write_u32::<BigEndian>(*event_id)?;
            }
            C2S::CutText(text) => {
                writer.write_u8(6)?;
                writer.write_all(&[0u8; 3])?;
                text.write_to(writer)?;
            }
            C2S::FramebufferUpdateAck { seq_num } => {
                writer.write_u8(7)?;
                writer.write_all(&[0u8; 3])?;
                writer.write_u32::<BigEndian>(*seq_num)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct RectangleHeader {
    pub x_position: u16,
    pub y_position: u16,
    pub width: u16,
    pub height: u16,
    pub encoding: Encoding,
}

impl Message for RectangleHeader {
    fn read_from<R: Read>(reader: &mut R) -> Result<RectangleHeader> {
        Ok(RectangleHeader {
            x_position: reader.read_u16::<BigEndian>()?,
            y_position: reader.read_u16::<BigEndian>()?,
            width: reader.read_u16::<BigEndian>()?,
            height: reader.read_u16::<BigEndian>()?,
            encoding: Encoding::read_from(reader)?,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(self.x_position)?;
        writer.write_u16::<BigEndian>(self.y_position)?;
        writer.write_u16::<BigEndian>(self.width)?;
        writer.write_u16::<BigEndian>(self.height)?;
        self.encoding.write_to(writer)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Colour {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

impl Message for Colour {
    fn read_from<R: Read>(reader: &mut R) -> Result<Colour> {
        Ok(Colour {
            red: reader.read_u16::<BigEndian>()?,
            green: reader.read_u16::<BigEndian>()?,
            blue: reader.read_u16::<BigEndian>()?,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(self.red)?;
        writer.write_u16::<BigEndian>(self.green)?;
        writer.write_u16::<BigEndian>(self.blue)?;
        Ok(())
    }
}

/// Messages sent to clients in the Normal protocol state.
///
/// The framebuffer-update header carries the latest input event id and the
/// update's sequence number; the rectangle list that follows it is written
/// by the update builder, not here. `n_rects` of 0xFFFF means the update is
/// terminated by a LastRect marker instead of a known count.
#[derive(Debug, PartialEq, Eq)]
pub enum S2C {
    FramebufferUpdate {
        n_rects: u16,
        event_id: u32,
        seq_num: u32,
    },
    SetColourMapEntries {
        first_colour: u16,
        colours: Vec<Colour>,
    },
    Bell,
    CutText(String),
}

impl Message for S2C {
    fn read_from<R: Read>(reader: &mut R) -> Result<S2C> {
        let message_type = match reader.read_u8() {
            Err(ref e) if e.kind() == IoErrorKind::UnexpectedEof => {
                return Err(Error::Disconnected)
            }
            result => result?,
        };
        match message_type {
            0 => {
                reader.read_exact(&mut [0u8; 1])?;
                Ok(S2C::FramebufferUpdate {
                    n_rects: reader.read_u16::<BigEndian>()?,
                    event_id: reader.read_u32::<BigEndian>()?,
                    seq_num: reader.read_u32::<BigEndian>()?,
                })
            }
            1 => {
                reader.read_exact(&mut [0u8; 1])?;
                let first_colour = reader.read_u16::<BigEndian>()?;
                let count = reader.read_u16::<BigEndian>()?;
                let mut colours = Vec::new();
                for _ in 0..count {
                    colours.push(Colour::read_from(reader)?);
                }
                Ok(S2C::SetColourMapEntries { first_colour, colours })
            }
            2 => Ok(S2C::Bell),
            3 => {
                reader.read_exact(&mut [0u8; 3])?;
                Ok(S2C::CutText(String::read_from(reader)?))
            }
            _ => Err(Error::Unexpected("server to client message type")),
        }
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            S2C::FramebufferUpdate { n_rects, event_id, seq_num } => {
                writer.write_u8(0)?;
                writer.write_all(&[0u8; 1])?;
                writer.write_u16::<BigEndian>(*n_rects)?;
                writer.write_u32::<BigEndian>(*event_id)?;
                writer.write_u32::<BigEndian>(*seq_num)?;
            }
            S2C::SetColourMapEntries { first_colour, colours } => {
                writer.write_u8(1)?;
                writer.write_all(&[0u8; 1])?;
                writer.write_u16::<BigEndian>(*first_colour)?;
                writer.write_u16::<BigEndian>(colours.len() as u16)?;
                for colour in colours {
                    colour.write_to(writer)?;
                }
            }
            S2C::Bell => {
                writer.write_u8(2)?;
            }
            S2C::CutText(text) => {
                writer.write_u8(3)?;
                writer.write_all(&[0u8; 3])?;
                text.write_to(writer)?;
            }
        }
        Ok(())
    }
}

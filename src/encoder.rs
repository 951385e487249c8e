//! The encoder capability and the built-in Raw encoder.
//!
//! Pixel encoders plug in per encoding id. An encoder never holds a
//! reference to the session; everything it needs arrives in the
//! [`EncoderContext`] on each call.

use std::io::Write;

use crate::display::Framebuffer;
use crate::protocol::{Encoding, Message, PixelFormat, RectangleHeader};
use crate::region::Rect;
use crate::transport::UpdateWriter;
use crate::Result;

/// Wire size of a rectangle header.
pub const RECT_HEADER_SIZE: usize = 12;

/// Per-call view of the session parameters an encoder may depend on.
pub struct EncoderContext {
    /// The client's negotiated pixel format.
    pub format: PixelFormat,
    /// The framebuffer's native pixel format.
    pub native_format: PixelFormat,
    pub compress_level: u8,
    pub zlib_level: u8,
    pub quality_level: i32,
    /// Whether the client accepts LastRect-terminated updates; encoders
    /// that cannot precount their rectangles may only decline a count when
    /// this is set.
    pub last_rect_encoding: bool,
}

pub trait Encoder {
    fn encoding(&self) -> Encoding;

    /// How many wire rectangles `rect` will expand to. `None` means the
    /// count cannot be known before encoding and the update must be
    /// terminated with a LastRect marker instead.
    fn num_rects(&self, ctx: &EncoderContext, rect: Rect) -> Option<u32> {
        let _ = (ctx, rect);
        Some(1)
    }

    /// Encodes `rect` into `out`, rectangle header included.
    fn write_rect(
        &self,
        out: &mut UpdateWriter,
        fb: &dyn Framebuffer,
        ctx: &EncoderContext,
        rect: Rect,
    ) -> Result<()>;
}

/// Encoder for cursor-shape pseudo-rectangles (X-style or rich-colour).
pub trait CursorEncoder {
    fn write_cursor(
        &self,
        out: &mut UpdateWriter,
        fb: &dyn Framebuffer,
        ctx: &EncoderContext,
        rich: bool,
    ) -> Result<()>;
}

/// The encoders available to a server, keyed by encoding id.
pub struct EncoderRegistry {
    encoders: Vec<Box<dyn Encoder>>,
    cursor: Option<Box<dyn CursorEncoder>>,
}

impl EncoderRegistry {
    /// A registry with only the built-in Raw encoder.
    pub fn new() -> EncoderRegistry {
        EncoderRegistry { encoders: vec![Box::new(RawEncoder)], cursor: None }
    }

    /// Adds an encoder, replacing any previous one for the same encoding.
    pub fn register(&mut self, encoder: Box<dyn Encoder>) {
        let encoding = encoder.encoding();
        self.encoders.retain(|e| e.encoding() != encoding);
        self.encoders.push(encoder);
    }

    pub fn register_cursor(&mut self, encoder: Box<dyn CursorEncoder>) {
        self.cursor = Some(encoder);
    }

    pub fn get(&self, encoding: Encoding) -> Option<&dyn Encoder> {
        self.encoders.iter().find(|e| e.encoding() == encoding).map(|e| e.as_ref())
    }

    /// The encoder for the client's preferred encoding, falling back to Raw.
    pub fn select(&self, preferred: Encoding) -> &dyn Encoder {
        self.get(preferred)
            .or_else(|| self.get(Encoding::Raw))
            .expect("registry always holds the raw encoder")
    }

    pub fn cursor_encoder(&self) -> Option<&dyn CursorEncoder> {
        self.cursor.as_deref()
    }
}

impl Default for EncoderRegistry {
    fn default() -> EncoderRegistry {
        EncoderRegistry::new()
    }
}

/// The baseline encoding every client understands: a rectangle header
/// followed by rows of pixels translated into the client's format.
pub struct RawEncoder;

impl Encoder for RawEncoder {
    fn encoding(&self) -> Encoding {
        Encoding::Raw
    }

    fn write_rect(
        &self,
        out: &mut UpdateWriter,
        fb: &dyn Framebuffer,
        ctx: &EncoderContext,
        rect: Rect,
    ) -> Result<()> {
        out.reserve(RECT_HEADER_SIZE)?;
        RectangleHeader {
            x_position: rect.x1 as u16,
            y_position: rect.y1 as u16,
            width: rect.width() as u16,
            height: rect.height() as u16,
            encoding: Encoding::Raw,
        }
        .write_to(out)?;

        let mut native = Vec::new();
        fb.read_rect(rect, &mut native);

        let native_stride = rect.width() as usize * (ctx.native_format.bits_per_pixel / 8) as usize;
        let client_stride = rect.width() as usize * (ctx.format.bits_per_pixel / 8) as usize;
        for row in native.chunks(native_stride.max(1)) {
            out.reserve(client_stride)?;
            translate_row(&ctx.native_format, &ctx.format, row, out)?;
        }
        Ok(())
    }
}

/// Converts one row of pixels between two true-colour formats. When the
/// formats match, the row is passed through untouched.
pub fn translate_row(
    native: &PixelFormat,
    client: &PixelFormat,
    row: &[u8],
    out: &mut dyn Write,
) -> Result<()> {
    if native == client {
        out.write_all(row)?;
        return Ok(());
    }

    let native_bytes = (native.bits_per_pixel / 8) as usize;
    for pixel in row.chunks(native_bytes.max(1)) {
        let value = read_pixel(pixel, native);
        let red = scale(
            (value >> native.red_shift) & u32::from(native.red_max),
            native.red_max,
            client.red_max,
        );
        let green = scale(
            (value >> native.green_shift) & u32::from(native.green_max),
            native.green_max,
            client.green_max,
        );
        let blue = scale(
            (value >> native.blue_shift) & u32::from(native.blue_max),
            native.blue_max,
            client.blue_max,
        );
        let translated =
            (red << client.red_shift) | (green << client.green_shift) | (blue << client.blue_shift);
        write_pixel(translated, client, out)?;
    }
    Ok(())
}

fn scale(value: u32, from_max: u16, to_max: u16) -> u32 {
    if from_max == to_max || from_max == 0 {
        value
    } else {
        value * u32::from(to_max) / u32::from(from_max)
    }
}

fn read_pixel(bytes: &[u8], format: &PixelFormat) -> u32 {
    match format.bits_per_pixel {
        8 => u32::from(bytes[0]),
        16 => {
            let raw = [bytes[0], bytes[1]];
            if format.big_endian {
                u32::from(u16::from_be_bytes(raw))
            } else {
                u32::from(u16::from_le_bytes(raw))
            }
        }
        _ => {
            let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
            if format.big_endian {
                u32::from_be_bytes(raw)
            } else {
                u32::from_le_bytes(raw)
            }
        }
    }
}

fn write_pixel(value: u32, format: &PixelFormat, out: &mut dyn Write) -> Result<()> {
    match format.bits_per_pixel {
        8 => out.write_all(&[value as u8])?,
        16 => {
            let raw = if format.big_endian {
                (value as u16).to_be_bytes()
            } else {
                (value as u16).to_le_bytes()
            };
            out.write_all(&raw)?;
        }
        _ => {
            let raw = if format.big_endian { value.to_be_bytes() } else { value.to_le_bytes() };
            out.write_all(&raw)?;
        }
    }
    Ok(())
}

/// Writes the cursor-position pseudo-rectangle: position in the header,
/// no body.
pub fn write_cursor_pos(out: &mut UpdateWriter, x: u16, y: u16) -> Result<()> {
    out.reserve(RECT_HEADER_SIZE)?;
    RectangleHeader {
        x_position: x,
        y_position: y,
        width: 0,
        height: 0,
        encoding: Encoding::PointerPos,
    }
    .write_to(out)
}

/// Writes the empty rectangle that terminates an update whose rectangle
/// count was not known ahead of time.
pub fn write_last_rect_marker(out: &mut UpdateWriter) -> Result<()> {
    out.reserve(RECT_HEADER_SIZE)?;
    RectangleHeader {
        x_position: 0,
        y_position: 0,
        width: 0,
        height: 0,
        encoding: Encoding::LastRect,
    }
    .write_to(out)
}

//! Capability traits for the display backend and input injection.
//!
//! The protocol engine never touches pixels or devices directly; it talks to
//! the framebuffer source and the input subsystem through these traits.

use crate::protocol::Colour;
use crate::region::Rect;

/// The pixel surface being mirrored to clients.
pub trait Framebuffer {
    fn width(&self) -> u16;
    fn height(&self) -> u16;

    /// The native pixel format pixels are stored in.
    fn format(&self) -> crate::PixelFormat;

    /// Reads the pixels of `rect` into `out` in the native format, row-major
    /// and tightly packed. `rect` is guaranteed to lie within the screen.
    fn read_rect(&self, rect: Rect, out: &mut Vec<u8>);

    /// Whether the cursor sprite is currently composited into the
    /// framebuffer pixels.
    fn cursor_is_drawn(&self) -> bool {
        false
    }

    /// Removes the cursor sprite from the framebuffer, for clients that
    /// render the cursor themselves from shape updates.
    fn remove_cursor(&mut self) {}

    /// Draws the cursor sprite back onto the framebuffer, for clients that
    /// only see pixel updates.
    fn restore_cursor(&mut self) {}

    /// Entries of the installed colour map, for clients using a
    /// non-true-colour pixel format.
    fn colour_map(&self, first_colour: u16, count: u16) -> Vec<Colour> {
        let _ = (first_colour, count);
        Vec::new()
    }
}

/// Where client input events end up.
pub trait InputSink {
    fn key_event(&mut self, down: bool, key: u32);
    fn pointer_event(&mut self, button_mask: u8, x: u16, y: u16);
    fn cut_text(&mut self, text: &str);

    /// Called when the first client connects, so no key is left stuck from
    /// a previous session.
    fn release_all_keys(&mut self) {}
}

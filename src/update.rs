//! Building framebuffer updates and splitting them to datagram size.
//!
//! The builder runs the same pipeline for measurement and for transmission;
//! the sink decides where bytes go, and the `commit` flag decides whether
//! the session's accounting regions advance. The recursive splitter measures
//! a bounding box and subdivides it along its longer edge until every piece
//! fits the datagram payload ceiling.

use log::debug;

use crate::display::Framebuffer;
use crate::encoder::{
    write_cursor_pos, write_last_rect_marker, EncoderContext, EncoderRegistry, RECT_HEADER_SIZE,
};
use crate::protocol::{CopyRect, Encoding, Message, RectangleHeader, S2C};
use crate::region::{Rect, Region};
use crate::session::Session;
use crate::transport::{MeasureSink, UpdateSink, UpdateWriter};
use crate::unacked::UnackedEntry;
use crate::Result;

/// Builds one framebuffer update for `session` and hands it to `sink`.
///
/// The update covers what the client asked for out of what it is owed:
/// `(copy ∪ modified) ∩ requested`, with the safely copyable sub-region sent
/// as CopyRect and the rest through the session's preferred encoder. Returns
/// the update's total size in bytes, zero when nothing needed sending.
///
/// With `commit` unset this is a dry run: the sink sees the same bytes (a
/// measuring sink just counts them) but the accounting regions, cursor
/// flags and statistics stay untouched.
pub fn send_update(
    session: &mut Session,
    fb: &mut dyn Framebuffer,
    encoders: &EncoderRegistry,
    sink: &mut dyn UpdateSink,
    seq_num: u32,
    commit: bool,
    mut sent_region: Option<&mut Region>,
) -> Result<usize> {
    // A client that renders its own cursor must not see the sprite in the
    // pixel data; everyone else must.
    let mut send_shape = false;
    if session.cursor_shape_updates {
        if fb.cursor_is_drawn() {
            fb.remove_cursor();
        }
        if !fb.cursor_is_drawn()
            && session.cursor_was_changed
            && encoders.cursor_encoder().is_some()
        {
            send_shape = true;
        }
    } else if !fb.cursor_is_drawn() {
        fb.restore_cursor();
    }
    let send_pos = session.cursor_pos_updates && session.cursor_was_moved;

    // Modified pixels would overwrite the copy anyway.
    session.copy = session.copy.subtract(&session.modified);

    let update = session.copy.union(&session.modified).intersect(&session.requested);
    if let Some(out) = sent_region.as_deref_mut() {
        *out = update.clone();
    }
    if update.is_empty() && !send_shape && !send_pos {
        return Ok(0);
    }

    // Both the source and the destination of a copy must lie inside the
    // area the client is known to have, so the copyable sub-region is the
    // copy region clipped against the requested region and the requested
    // region translated by the copy delta.
    let (dx, dy) = session.copy_delta;
    let update_copy = session
        .copy
        .intersect(&session.requested)
        .intersect(&session.requested.translated(dx, dy));
    let update = update.subtract(&update_copy);

    if commit {
        // Whatever part of the copy is not being sent is owed as ordinary
        // modified pixels. A copy is never carried over to a later update.
        session.modified = session.modified.union(&session.copy);
        session.modified = session.modified.subtract(&update);
        session.modified = session.modified.subtract(&update_copy);
        session.requested.clear();
        session.copy.clear();
        session.copy_delta = (0, 0);
    }

    let encoder = encoders.select(session.preferred_encoding);
    let ctx = EncoderContext {
        format: session.format,
        native_format: fb.format(),
        compress_level: session.tight_compress_level,
        zlib_level: session.zlib_compress_level,
        quality_level: session.tight_quality_level,
        last_rect_encoding: session.last_rect_encoding,
    };

    let mut n_rects =
        update_copy.num_rects() as u32 + u32::from(send_shape) + u32::from(send_pos);
    let mut use_sentinel = false;
    for rect in update.rects() {
        match encoder.num_rects(&ctx, rect) {
            Some(n) => n_rects += n,
            None => {
                use_sentinel = true;
                break;
            }
        }
    }

    let mut writer = UpdateWriter::new(sink);
    S2C::FramebufferUpdate {
        n_rects: if use_sentinel { 0xFFFF } else { n_rects as u16 },
        event_id: session.last_event_id,
        seq_num,
    }
    .write_to(&mut writer)?;

    if send_shape {
        if commit {
            session.cursor_was_changed = false;
        }
        let cursor_encoder = encoders.cursor_encoder().expect("checked when planning");
        cursor_encoder.write_cursor(&mut writer, fb, &ctx, session.rich_cursor)?;
    }
    if send_pos {
        if commit {
            session.cursor_was_moved = false;
        }
        write_cursor_pos(&mut writer, session.cursor_x as u16, session.cursor_y as u16)?;
    }

    if !update_copy.is_empty() {
        write_copy_rects(&mut writer, &update_copy, dx, dy)?;
    }

    for rect in update.rects() {
        encoder.write_rect(&mut writer, fb, &ctx, rect)?;
    }

    if use_sentinel {
        write_last_rect_marker(&mut writer)?;
    }

    let num_bytes = writer.finish()?;
    if commit {
        session.stats.updates_sent += 1;
        session.stats.bytes_sent += num_bytes as u64;
    }
    Ok(num_bytes)
}

/// Emits `region` as CopyRect rectangles in an order that never lets an
/// earlier copy overwrite the source of a later one: bands sharing a top
/// edge are walked against the sign of `dy`, and rectangles inside a band
/// against the sign of `dx`.
fn write_copy_rects(
    out: &mut UpdateWriter,
    region: &Region,
    dx: i32,
    dy: i32,
) -> Result<()> {
    let rects = region.rects();
    let mut nrects = rects.len() as isize;

    let x_inc: isize = if dx <= 0 { 1 } else { -1 };
    let (mut this_rect, y_inc): (isize, isize) =
        if dy <= 0 { (0, 1) } else { (nrects - 1, -1) };

    while nrects > 0 {
        let mut first_in_next_band = this_rect;
        let mut nrects_in_band = 0;
        while nrects > 0
            && rects[first_in_next_band as usize].y1 == rects[this_rect as usize].y1
        {
            first_in_next_band += y_inc;
            nrects -= 1;
            nrects_in_band += 1;
        }

        // When the in-band direction opposes the band scan direction, start
        // from the far end of the band.
        if x_inc != y_inc {
            this_rect = first_in_next_band - y_inc;
        }

        while nrects_in_band > 0 {
            out.reserve(RECT_HEADER_SIZE + 4)?;
            let rect = &rects[this_rect as usize];
            RectangleHeader {
                x_position: rect.x1 as u16,
                y_position: rect.y1 as u16,
                width: rect.width() as u16,
                height: rect.height() as u16,
                encoding: Encoding::CopyRect,
            }
            .write_to(out)?;
            CopyRect {
                src_x_position: (rect.x1 - dx) as u16,
                src_y_position: (rect.y1 - dy) as u16,
            }
            .write_to(out)?;
            this_rect += x_inc;
            nrects_in_band -= 1;
        }

        this_rect = first_in_next_band;
    }
    Ok(())
}

/// Sizes the update that sending `rect` right now would produce, without
/// transmitting anything or advancing the session's accounting.
pub fn measure_region(
    session: &mut Session,
    fb: &mut dyn Framebuffer,
    encoders: &EncoderRegistry,
    rect: Rect,
) -> Result<usize> {
    session.requested.add_rect(rect);
    let mut sink = MeasureSink;
    let size = send_update(session, fb, encoders, &mut sink, 0xFFFF_FFFF, false, None)?;
    session.requested.clear();
    Ok(size)
}

/// Encodes and transmits `rect` as one datagram update, records it in the
/// unacked queue, and returns its size.
pub fn send_region(
    session: &mut Session,
    fb: &mut dyn Framebuffer,
    encoders: &EncoderRegistry,
    sink: &mut dyn UpdateSink,
    rect: Rect,
    now: u64,
) -> Result<usize> {
    session.requested.add_rect(rect);
    let seq_num = session.adaptive.next_seq_num();
    let mut region = Region::new();
    let num_bytes = send_update(session, fb, encoders, sink, seq_num, true, Some(&mut region))?;
    if num_bytes > 0 {
        debug!(
            "-> update seq {} frame {} ({} bytes) to client {}",
            seq_num,
            session.adaptive.frame_seq_num(),
            num_bytes,
            session.id
        );
        session.unacked.push_back(UnackedEntry {
            seq_num,
            send_time: now,
            num_bytes: num_bytes as u32,
            region,
        });
    }
    Ok(num_bytes)
}

/// Transmits the contents of `rect`, splitting it recursively until every
/// piece encodes below `max_update_size`. Splits go along the longer edge,
/// into at most eight strips per level; the strip count is also capped by
/// the edge length so the recursion always makes progress.
pub fn recursive_send(
    session: &mut Session,
    fb: &mut dyn Framebuffer,
    encoders: &EncoderRegistry,
    sink: &mut dyn UpdateSink,
    rect: Rect,
    now: u64,
    max_update_size: usize,
) -> Result<()> {
    let size = measure_region(session, fb, encoders, rect)?;
    let longer_edge = rect.width().max(rect.height()).max(1) as usize;
    let count = (size / max_update_size + 1).min(8).min(longer_edge);

    if size <= max_update_size || count <= 1 {
        session.adaptive.record_sent_bytes(size);
        send_region(session, fb, encoders, sink, rect, now)?;
        return Ok(());
    }

    let count = count as i32;
    if rect.width() > rect.height() {
        let strip = rect.width() / count;
        for i in 0..count {
            let x1 = rect.x1 + i * strip;
            let x2 = if i == count - 1 { rect.x2 } else { x1 + strip };
            recursive_send(
                session,
                fb,
                encoders,
                sink,
                Rect::new(x1, rect.y1, x2, rect.y2),
                now,
                max_update_size,
            )?;
        }
    } else {
        let strip = rect.height() / count;
        for i in 0..count {
            let y1 = rect.y1 + i * strip;
            let y2 = if i == count - 1 { rect.y2 } else { y1 + strip };
            recursive_send(
                session,
                fb,
                encoders,
                sink,
                Rect::new(rect.x1, y1, rect.x2, y2),
                now,
                max_update_size,
            )?;
        }
    }
    Ok(())
}

//! Per-client adaptation of push cadence and encoding quality.
//!
//! Sending throughput is sampled once per tick window from the bytes handed
//! to the datagram channel; receiving throughput is inferred from acks of
//! consecutive sequence numbers. When the server is producing faster than
//! the client absorbs, quality or frame rate is lowered, whichever is
//! currently higher on its scale; when the client keeps up with margin, the
//! same comparison is run in reverse. Round-trip time feeds a Jacobson
//! estimator whose output is the retransmission timeout.

use log::debug;

pub const PUSH_INTERVAL_MIN: u64 = 42;
pub const PUSH_INTERVAL_MAX: u64 = 1000;
pub const RETRANSMIT_TIMEOUT_MIN: u64 = 50;
pub const QUALITY_LEVEL_MIN: i32 = 1;
pub const QUALITY_LEVEL_MAX: i32 = 3;

/// Adjustments are held off until this many tick windows after the last one.
const ADJUST_HOLD_OFF_TICKS: u64 = 20;
/// Ramp up only when sending throughput is below this fraction of receiving.
const RAMP_UP_MARGIN: f64 = 0.9;
const PUSH_INTERVAL_STEP: u64 = 5;

#[derive(Debug)]
pub struct Adaptive {
    push_interval: u64,
    retransmit_timeout: u64,
    tick_interval: u64,
    srtt: f64,
    rttvar: f64,
    has_rtt_sample: bool,
    sending_throughput: Option<f64>,
    receiving_throughput: f64,
    tick_sent_bytes: u64,
    last_tick: u64,
    last_change: u64,
    seq_num_counter: u32,
    frame_seq_num_counter: u32,
    last_ack_seq_num: u32,
    last_ack_time: u64,
}

impl Adaptive {
    pub fn new(push_interval: u64, tick_interval: u64, now: u64) -> Adaptive {
        Adaptive {
            push_interval: push_interval.max(PUSH_INTERVAL_MIN).min(PUSH_INTERVAL_MAX),
            retransmit_timeout: RETRANSMIT_TIMEOUT_MIN,
            tick_interval,
            srtt: 0.0,
            rttvar: 0.0,
            has_rtt_sample: false,
            sending_throughput: None,
            // Optimistic prior: assume the path is fast until acks say
            // otherwise, so the first ramp decision has a denominator.
            receiving_throughput: 100_000.0,
            tick_sent_bytes: 0,
            last_tick: now,
            last_change: now,
            seq_num_counter: 0,
            frame_seq_num_counter: 0,
            last_ack_seq_num: 0,
            last_ack_time: now,
        }
    }

    pub fn push_interval(&self) -> u64 {
        self.push_interval
    }

    pub fn retransmit_timeout(&self) -> u64 {
        self.retransmit_timeout
    }

    pub fn srtt(&self) -> Option<f64> {
        if self.has_rtt_sample {
            Some(self.srtt)
        } else {
            None
        }
    }

    pub fn rttvar(&self) -> Option<f64> {
        if self.has_rtt_sample {
            Some(self.rttvar)
        } else {
            None
        }
    }

    pub fn sending_throughput(&self) -> Option<f64> {
        self.sending_throughput
    }

    pub fn receiving_throughput(&self) -> f64 {
        self.receiving_throughput
    }

    pub fn last_ack_seq_num(&self) -> u32 {
        self.last_ack_seq_num
    }

    pub fn frame_seq_num(&self) -> u32 {
        self.frame_seq_num_counter
    }

    /// Takes the sequence number for the next datagram update.
    pub fn next_seq_num(&mut self) -> u32 {
        let seq_num = self.seq_num_counter;
        self.seq_num_counter = self.seq_num_counter.wrapping_add(1);
        seq_num
    }

    /// Starts a new pushed frame: its sub-updates get sequence numbers above
    /// everything sent for the previous frame.
    pub fn begin_frame(&mut self) {
        self.seq_num_counter = self.seq_num_counter.wrapping_add(1);
        self.frame_seq_num_counter = self.frame_seq_num_counter.wrapping_add(1);
    }

    pub fn record_sent_bytes(&mut self, num_bytes: usize) {
        self.tick_sent_bytes += num_bytes as u64;
    }

    /// Closes the current tick window if it has elapsed: folds the window's
    /// byte count into the sending-throughput estimate and, when enough time
    /// has passed since the last adjustment, ramps quality or interval.
    pub fn on_tick(&mut self, now: u64, quality_level: &mut i32) {
        let elapsed = now.saturating_sub(self.last_tick);
        if elapsed <= self.tick_interval {
            return;
        }
        let instant = 1000.0 * self.tick_sent_bytes as f64 / elapsed as f64;
        let sending = match self.sending_throughput {
            None => instant,
            Some(previous) => 0.75 * previous + 0.25 * instant,
        };
        self.sending_throughput = Some(sending);
        self.last_tick = now;
        self.tick_sent_bytes = 0;

        // Both knobs map onto a 0..100% scale: quality over its effective
        // [1, 3] range, interval inverted over [42, 1000] ms. The knob that
        // is currently higher gives way first.
        let quality_pct = (*quality_level - QUALITY_LEVEL_MIN) as f64
            / (QUALITY_LEVEL_MAX - QUALITY_LEVEL_MIN) as f64;
        let interval_pct = (PUSH_INTERVAL_MAX - self.push_interval) as f64
            / (PUSH_INTERVAL_MAX - PUSH_INTERVAL_MIN) as f64;
        let hold_off = now.saturating_sub(self.last_change)
            > ADJUST_HOLD_OFF_TICKS * self.tick_interval;

        if sending > self.receiving_throughput {
            if hold_off {
                if quality_pct >= interval_pct {
                    *quality_level = (*quality_level - 1).clamp(QUALITY_LEVEL_MIN, QUALITY_LEVEL_MAX);
                } else {
                    self.push_interval = (self.push_interval + PUSH_INTERVAL_STEP).min(PUSH_INTERVAL_MAX);
                }
                debug!(
                    "ramp down: quality = {} interval = {}ms (sending {:.0} B/s, receiving {:.0} B/s)",
                    quality_level, self.push_interval, sending, self.receiving_throughput
                );
                self.last_change = now;
            }
        } else if sending < RAMP_UP_MARGIN * self.receiving_throughput {
            if hold_off {
                if quality_pct <= interval_pct {
                    *quality_level = (*quality_level + 1).clamp(QUALITY_LEVEL_MIN, QUALITY_LEVEL_MAX);
                } else {
                    self.push_interval =
                        self.push_interval.saturating_sub(PUSH_INTERVAL_STEP).max(PUSH_INTERVAL_MIN);
                }
                debug!(
                    "ramp up: quality = {} interval = {}ms (sending {:.0} B/s, receiving {:.0} B/s)",
                    quality_level, self.push_interval, sending, self.receiving_throughput
                );
                self.last_change = now;
            }
        }
    }

    /// Feeds an acknowledgement into the estimators. `lookup` is the send
    /// time and size of the matching unacked entry, `None` for a duplicate
    /// or late ack, which contributes nothing but still moves the ack
    /// cursor.
    pub fn on_ack(&mut self, seq_num: u32, lookup: Option<(u64, u32)>, now: u64) {
        if let Some((send_time, num_bytes)) = lookup {
            let r = now.saturating_sub(send_time) as f64;
            if !self.has_rtt_sample {
                self.srtt = r;
                self.rttvar = r / 2.0;
                self.has_rtt_sample = true;
            } else {
                let diff = (self.srtt - r).abs();
                self.rttvar = 0.75 * self.rttvar + 0.25 * diff;
                self.srtt = 0.875 * self.srtt + 0.125 * r;
            }
            self.retransmit_timeout =
                ((self.srtt + 2.0 * self.rttvar) as u64).max(RETRANSMIT_TIMEOUT_MIN);

            if self.last_ack_seq_num.wrapping_add(1) == seq_num {
                let elapsed = now.saturating_sub(self.last_ack_time).max(1);
                let t = 1000.0 * f64::from(num_bytes) / elapsed as f64;
                self.receiving_throughput = 0.875 * self.receiving_throughput + 0.125 * t;
                debug!(
                    "receiving throughput {:.0} B/s ({} bytes over {}ms)",
                    self.receiving_throughput, num_bytes, elapsed
                );
            }
        }
        self.last_ack_seq_num = seq_num;
        self.last_ack_time = now;
    }
}
